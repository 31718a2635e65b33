use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::status::{FulfillmentStatus, PaymentStatus};

/// A buyer's multi-vendor order.
///
/// Money fields are integer minor currency units. `status` is always the fold of the
/// statuses of its items and is only written by the fulfillment service.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub order_number: String,
    pub buyer_id: Uuid,
    pub currency: String,
    pub status: FulfillmentStatus,
    pub payment_status: PaymentStatus,
    pub subtotal: i64,
    pub tax: i64,
    pub shipping: i64,
    pub total: i64,
    pub customer_name: String,
    pub email: String,
    #[sea_orm(nullable)]
    pub phone: Option<String>,
    #[sea_orm(column_type = "Json")]
    pub shipping_address: Json,
    #[sea_orm(column_type = "Json", nullable)]
    pub billing_address: Option<Json>,
    #[sea_orm(nullable)]
    pub notes: Option<String>,
    #[sea_orm(nullable)]
    pub shipping_method_id: Option<Uuid>,
    pub is_multi_vendor: bool,
    #[sea_orm(nullable)]
    pub authorization_url: Option<String>,
    #[sea_orm(nullable)]
    pub authorization_reference: Option<String>,
    #[sea_orm(nullable)]
    pub confirmed_at: Option<DateTime<Utc>>,
    #[sea_orm(nullable)]
    pub processing_at: Option<DateTime<Utc>>,
    #[sea_orm(nullable)]
    pub dispatched_at: Option<DateTime<Utc>>,
    #[sea_orm(nullable)]
    pub delivered_at: Option<DateTime<Utc>>,
    #[sea_orm(nullable)]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[sea_orm(nullable)]
    pub refunded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItems,
    #[sea_orm(has_many = "super::payment_details::Entity")]
    Payments,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItems.def()
    }
}

impl Related<super::payment_details::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Payments.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Timestamp recorded when the order entered `status`, if any.
    pub fn stamped_at(&self, status: FulfillmentStatus) -> Option<DateTime<Utc>> {
        match status {
            FulfillmentStatus::Pending => Some(self.created_at),
            FulfillmentStatus::Confirmed => self.confirmed_at,
            FulfillmentStatus::Processing => self.processing_at,
            FulfillmentStatus::Shipped => self.dispatched_at,
            FulfillmentStatus::Delivered => self.delivered_at,
            FulfillmentStatus::Cancelled => self.cancelled_at,
            FulfillmentStatus::Refunded => self.refunded_at,
        }
    }
}

/// Column holding the timestamp stamped when an order enters `status`.
pub fn timestamp_column(status: FulfillmentStatus) -> Option<Column> {
    match status {
        FulfillmentStatus::Pending => None,
        FulfillmentStatus::Confirmed => Some(Column::ConfirmedAt),
        FulfillmentStatus::Processing => Some(Column::ProcessingAt),
        FulfillmentStatus::Shipped => Some(Column::DispatchedAt),
        FulfillmentStatus::Delivered => Some(Column::DeliveredAt),
        FulfillmentStatus::Cancelled => Some(Column::CancelledAt),
        FulfillmentStatus::Refunded => Some(Column::RefundedAt),
    }
}
