use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::status::PaymentStatus;

/// One payment attempt against an order.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payment_details")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_id: Uuid,
    pub provider: String,
    pub method: String,
    pub amount: i64,
    pub fees: i64,
    pub net_amount: i64,
    pub currency: String,
    pub status: PaymentStatus,
    /// Gateway transaction reference, globally unique
    #[sea_orm(unique)]
    pub external_reference: String,
    #[sea_orm(nullable)]
    pub external_transaction_id: Option<String>,
    #[sea_orm(nullable)]
    pub gateway_response: Option<String>,
    pub is_escrow: bool,
    #[sea_orm(nullable)]
    pub escrow_released_at: Option<DateTime<Utc>>,
    #[sea_orm(nullable)]
    pub refunded_at: Option<DateTime<Utc>>,
    #[sea_orm(nullable)]
    pub refund_amount: Option<i64>,
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
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
