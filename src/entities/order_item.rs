use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::status::FulfillmentStatus;
use crate::errors::StockTarget;

/// One line of an order, owned by exactly one store.
///
/// `store_id` is frozen at checkout. `total_price == unit_price * quantity`.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "order_items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_id: Uuid,
    pub store_id: Uuid,
    pub product_id: Uuid,
    #[sea_orm(nullable)]
    pub variant_id: Option<Uuid>,
    pub quantity: i32,
    pub unit_price: i64,
    pub total_price: i64,
    pub status: FulfillmentStatus,
    /// Set once the reserved stock has been credited back
    pub stock_released: bool,
    #[sea_orm(nullable)]
    pub confirmed_at: Option<DateTime<Utc>>,
    #[sea_orm(nullable)]
    pub processing_at: Option<DateTime<Utc>>,
    #[sea_orm(nullable)]
    pub shipped_at: Option<DateTime<Utc>>,
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
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id"
    )]
    Order,
    #[sea_orm(
        belongs_to = "super::store::Entity",
        from = "Column::StoreId",
        to = "super::store::Column::Id"
    )]
    Store,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl Related<super::store::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Store.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Timestamp recorded when the item entered `status`, if any.
    pub fn stamped_at(&self, status: FulfillmentStatus) -> Option<DateTime<Utc>> {
        match status {
            FulfillmentStatus::Pending => Some(self.created_at),
            FulfillmentStatus::Confirmed => self.confirmed_at,
            FulfillmentStatus::Processing => self.processing_at,
            FulfillmentStatus::Shipped => self.shipped_at,
            FulfillmentStatus::Delivered => self.delivered_at,
            FulfillmentStatus::Cancelled => self.cancelled_at,
            FulfillmentStatus::Refunded => self.refunded_at,
        }
    }

    /// Stock row this item reserved at checkout.
    pub fn stock_target(&self) -> StockTarget {
        match self.variant_id {
            Some(variant_id) => StockTarget::Variant(variant_id),
            None => StockTarget::Product(self.product_id),
        }
    }
}

/// Column holding the timestamp stamped when an item enters `status`.
pub fn timestamp_column(status: FulfillmentStatus) -> Option<Column> {
    match status {
        FulfillmentStatus::Pending => None,
        FulfillmentStatus::Confirmed => Some(Column::ConfirmedAt),
        FulfillmentStatus::Processing => Some(Column::ProcessingAt),
        FulfillmentStatus::Shipped => Some(Column::ShippedAt),
        FulfillmentStatus::Delivered => Some(Column::DeliveredAt),
        FulfillmentStatus::Cancelled => Some(Column::CancelledAt),
        FulfillmentStatus::Refunded => Some(Column::RefundedAt),
    }
}
