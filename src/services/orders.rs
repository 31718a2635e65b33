//! Read models over orders for buyers and vendors.

use chrono::{DateTime, Utc};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::auth::{Buyer, Vendor, Viewer};
use crate::entities::{order, order_item, payment_details, FulfillmentStatus, PaymentStatus};
use crate::errors::ServiceError;

const MAX_PAGE_SIZE: u64 = 100;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderItemView {
    pub id: Uuid,
    pub order_id: Uuid,
    pub store_id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub quantity: i32,
    pub unit_price: i64,
    pub total_price: i64,
    pub status: FulfillmentStatus,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub processing_at: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<order_item::Model> for OrderItemView {
    fn from(item: order_item::Model) -> Self {
        Self {
            id: item.id,
            order_id: item.order_id,
            store_id: item.store_id,
            product_id: item.product_id,
            variant_id: item.variant_id,
            quantity: item.quantity,
            unit_price: item.unit_price,
            total_price: item.total_price,
            status: item.status,
            confirmed_at: item.confirmed_at,
            processing_at: item.processing_at,
            shipped_at: item.shipped_at,
            delivered_at: item.delivered_at,
            cancelled_at: item.cancelled_at,
            refunded_at: item.refunded_at,
            created_at: item.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaymentView {
    pub id: Uuid,
    pub provider: String,
    pub method: String,
    pub amount: i64,
    pub fees: i64,
    pub net_amount: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub reference: String,
    pub is_escrow: bool,
    pub escrow_released_at: Option<DateTime<Utc>>,
    pub refund_amount: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl From<payment_details::Model> for PaymentView {
    fn from(payment: payment_details::Model) -> Self {
        Self {
            id: payment.id,
            provider: payment.provider,
            method: payment.method,
            amount: payment.amount,
            fees: payment.fees,
            net_amount: payment.net_amount,
            currency: payment.currency,
            status: payment.status,
            reference: payment.external_reference,
            is_escrow: payment.is_escrow,
            escrow_released_at: payment.escrow_released_at,
            refund_amount: payment.refund_amount,
            created_at: payment.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderSummary {
    pub id: Uuid,
    pub order_number: String,
    pub status: FulfillmentStatus,
    pub payment_status: PaymentStatus,
    pub currency: String,
    pub total: i64,
    pub is_multi_vendor: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&order::Model> for OrderSummary {
    fn from(order: &order::Model) -> Self {
        Self {
            id: order.id,
            order_number: order.order_number.clone(),
            status: order.status,
            payment_status: order.payment_status,
            currency: order.currency.clone(),
            total: order.total,
            is_multi_vendor: order.is_multi_vendor,
            created_at: order.created_at,
        }
    }
}

/// An order as its reader may see it. Vendors get only their own items and
/// no payment records.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderView {
    #[serde(flatten)]
    pub summary: OrderSummary,
    pub buyer_id: Uuid,
    pub subtotal: i64,
    pub tax: i64,
    pub shipping: i64,
    pub customer_name: String,
    pub email: String,
    pub phone: Option<String>,
    #[schema(value_type = Object)]
    pub shipping_address: serde_json::Value,
    #[schema(value_type = Option<Object>)]
    pub billing_address: Option<serde_json::Value>,
    pub notes: Option<String>,
    pub authorization_url: Option<String>,
    pub items: Vec<OrderItemView>,
    pub payments: Vec<PaymentView>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TimelineEntry {
    pub status: FulfillmentStatus,
    pub at: DateTime<Utc>,
}

/// Status history from the order's stamped timestamps, oldest first.
pub fn timeline(order: &order::Model) -> Vec<TimelineEntry> {
    let mut entries: Vec<TimelineEntry> = [
        FulfillmentStatus::Pending,
        FulfillmentStatus::Confirmed,
        FulfillmentStatus::Processing,
        FulfillmentStatus::Shipped,
        FulfillmentStatus::Delivered,
        FulfillmentStatus::Cancelled,
        FulfillmentStatus::Refunded,
    ]
    .into_iter()
    .filter_map(|status| order.stamped_at(status).map(|at| TimelineEntry { status, at }))
    .collect();
    // Stable, so equal stamps keep lifecycle order.
    entries.sort_by_key(|entry| entry.at);
    entries
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct OrderFilter {
    pub status: Option<FulfillmentStatus>,
    pub payment_status: Option<PaymentStatus>,
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct StoreItemFilter {
    pub status: Option<FulfillmentStatus>,
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
}

fn default_page() -> u64 {
    1
}

fn default_limit() -> u64 {
    20
}

/// Clamps a 1-based page and a page size to sane bounds.
fn page_bounds(page: u64, limit: u64) -> (u64, u64) {
    (page.max(1), limit.clamp(1, MAX_PAGE_SIZE))
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

#[derive(Clone)]
pub struct OrderQueryService {
    db: Arc<DatabaseConnection>,
}

impl OrderQueryService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    async fn find_order(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    /// Returns the order and the items the viewer may see, or `Unauthorized`.
    async fn visible_order(
        &self,
        viewer: Viewer,
        order_id: Uuid,
    ) -> Result<(order::Model, Vec<order_item::Model>, bool), ServiceError> {
        let order = self.find_order(order_id).await?;
        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .order_by_asc(order_item::Column::CreatedAt)
            .order_by_asc(order_item::Column::Id)
            .all(&*self.db)
            .await?;

        if order.buyer_id == viewer.user_id {
            return Ok((order, items, true));
        }

        let Some(store_id) = viewer.store_id else {
            return Err(ServiceError::Unauthorized(
                "Order belongs to another buyer".to_string(),
            ));
        };
        let own: Vec<order_item::Model> = items
            .into_iter()
            .filter(|item| item.store_id == store_id)
            .collect();
        if own.is_empty() {
            return Err(ServiceError::Unauthorized(
                "Store has no items on this order".to_string(),
            ));
        }
        Ok((order, own, false))
    }

    #[instrument(skip(self))]
    pub async fn get_order(&self, viewer: Viewer, order_id: Uuid) -> Result<OrderView, ServiceError> {
        let (order, items, is_buyer) = self.visible_order(viewer, order_id).await?;

        let payments = if is_buyer {
            payment_details::Entity::find()
                .filter(payment_details::Column::OrderId.eq(order.id))
                .order_by_asc(payment_details::Column::CreatedAt)
                .all(&*self.db)
                .await?
                .into_iter()
                .map(PaymentView::from)
                .collect()
        } else {
            Vec::new()
        };

        Ok(OrderView {
            summary: OrderSummary::from(&order),
            buyer_id: order.buyer_id,
            subtotal: order.subtotal,
            tax: order.tax,
            shipping: order.shipping,
            customer_name: order.customer_name,
            email: order.email,
            phone: order.phone,
            shipping_address: order.shipping_address,
            billing_address: order.billing_address,
            notes: order.notes,
            authorization_url: order.authorization_url,
            items: items.into_iter().map(OrderItemView::from).collect(),
            payments,
            updated_at: order.updated_at,
        })
    }

    #[instrument(skip(self))]
    pub async fn order_timeline(
        &self,
        viewer: Viewer,
        order_id: Uuid,
    ) -> Result<Vec<TimelineEntry>, ServiceError> {
        let (order, _, _) = self.visible_order(viewer, order_id).await?;
        Ok(timeline(&order))
    }

    #[instrument(skip(self))]
    pub async fn list_buyer_orders(
        &self,
        buyer: Buyer,
        filter: OrderFilter,
    ) -> Result<Page<OrderSummary>, ServiceError> {
        let (page, limit) = page_bounds(filter.page, filter.limit);

        let mut query = order::Entity::find().filter(order::Column::BuyerId.eq(buyer.user_id));
        if let Some(status) = filter.status {
            query = query.filter(order::Column::Status.eq(status));
        }
        if let Some(payment_status) = filter.payment_status {
            query = query.filter(order::Column::PaymentStatus.eq(payment_status));
        }

        let paginator = query
            .order_by_desc(order::Column::CreatedAt)
            .order_by_desc(order::Column::Id)
            .paginate(&*self.db, limit);
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page - 1).await?;

        Ok(Page {
            items: orders.iter().map(OrderSummary::from).collect(),
            total,
            page,
            limit,
            total_pages: total.div_ceil(limit),
        })
    }

    #[instrument(skip(self))]
    pub async fn list_store_items(
        &self,
        vendor: Vendor,
        filter: StoreItemFilter,
    ) -> Result<Page<OrderItemView>, ServiceError> {
        let (page, limit) = page_bounds(filter.page, filter.limit);

        let mut query =
            order_item::Entity::find().filter(order_item::Column::StoreId.eq(vendor.store_id));
        if let Some(status) = filter.status {
            query = query.filter(order_item::Column::Status.eq(status));
        }

        let paginator = query
            .order_by_desc(order_item::Column::CreatedAt)
            .order_by_desc(order_item::Column::Id)
            .paginate(&*self.db, limit);
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page - 1).await?;

        Ok(Page {
            items: items.into_iter().map(OrderItemView::from).collect(),
            total,
            page,
            limit,
            total_pages: total.div_ceil(limit),
        })
    }

    #[instrument(skip(self))]
    pub async fn get_store_item(
        &self,
        vendor: Vendor,
        item_id: Uuid,
    ) -> Result<OrderItemView, ServiceError> {
        let item = order_item::Entity::find_by_id(item_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order item {} not found", item_id)))?;
        if item.store_id != vendor.store_id {
            return Err(ServiceError::Unauthorized(
                "Item belongs to another store".to_string(),
            ));
        }
        Ok(item.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn order_at(created: DateTime<Utc>) -> order::Model {
        order::Model {
            id: Uuid::new_v4(),
            order_number: "ORD-1".into(),
            buyer_id: Uuid::new_v4(),
            currency: "NGN".into(),
            status: FulfillmentStatus::Pending,
            payment_status: PaymentStatus::Pending,
            subtotal: 0,
            tax: 0,
            shipping: 0,
            total: 0,
            customer_name: "Ada".into(),
            email: "ada@example.com".into(),
            phone: None,
            shipping_address: serde_json::json!({}),
            billing_address: None,
            notes: None,
            shipping_method_id: None,
            is_multi_vendor: false,
            authorization_url: None,
            authorization_reference: None,
            confirmed_at: None,
            processing_at: None,
            dispatched_at: None,
            delivered_at: None,
            cancelled_at: None,
            refunded_at: None,
            created_at: created,
            updated_at: created,
        }
    }

    #[test]
    fn timeline_lists_stamped_statuses_oldest_first() {
        let created = Utc::now();
        let mut order = order_at(created);
        order.confirmed_at = Some(created + Duration::minutes(5));
        order.dispatched_at = Some(created + Duration::hours(2));

        let entries = timeline(&order);
        let statuses: Vec<FulfillmentStatus> = entries.iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![
                FulfillmentStatus::Pending,
                FulfillmentStatus::Confirmed,
                FulfillmentStatus::Shipped
            ]
        );
    }

    #[test]
    fn page_bounds_are_clamped() {
        assert_eq!(page_bounds(0, 0), (1, 1));
        assert_eq!(page_bounds(3, 500), (3, MAX_PAGE_SIZE));
    }
}
