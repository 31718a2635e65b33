//! Payment Split Planner
//!
//! Decides how the gateway transaction for an order is routed between
//! vendor settlement accounts, initializes it, and records the attempt.

use async_trait::async_trait;
use chrono::Utc;
use rand::{distributions::Alphanumeric, Rng};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{Buyer, Platform};
use crate::db;
use crate::entities::{order, order_item, payment_details, store, FulfillmentStatus, PaymentStatus};
use crate::errors::ServiceError;
use crate::events::Event;
use crate::services::notifications::OrderNotifier;

/// One vendor's slice of a split transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitShare {
    pub store_id: Uuid,
    pub subaccount: String,
    /// Flat amount in minor units
    pub share: i64,
}

/// Where the money for one transaction goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SplitPlan {
    /// Settled to the platform account; no vendor is routed.
    Platform,
    /// The whole transaction goes to one vendor's subaccount.
    Single { subaccount: String },
    /// Flat shares to several vendor subaccounts. The platform keeps the remainder.
    Split { shares: Vec<SplitShare> },
}

/// Plans routing from per-item `(store_id, total_price)` pairs.
///
/// Stores without a settlement subaccount are left out of a split and
/// their share stays with the platform.
pub fn plan_split(item_totals: &[(Uuid, i64)], subaccounts: &HashMap<Uuid, String>) -> SplitPlan {
    let mut per_store: BTreeMap<Uuid, i64> = BTreeMap::new();
    for (store_id, total) in item_totals {
        *per_store.entry(*store_id).or_default() += *total;
    }

    if per_store.len() == 1 {
        return per_store
            .keys()
            .next()
            .and_then(|store_id| subaccounts.get(store_id))
            .map(|subaccount| SplitPlan::Single {
                subaccount: subaccount.clone(),
            })
            .unwrap_or(SplitPlan::Platform);
    }

    let shares: Vec<SplitShare> = per_store
        .into_iter()
        .filter_map(|(store_id, share)| {
            subaccounts.get(&store_id).map(|subaccount| SplitShare {
                store_id,
                subaccount: subaccount.clone(),
                share,
            })
        })
        .collect();

    if shares.is_empty() {
        SplitPlan::Platform
    } else {
        SplitPlan::Split { shares }
    }
}

/// What the gateway is asked to collect.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InitializeTransaction {
    pub email: String,
    /// Minor units
    pub amount: i64,
    pub currency: String,
    /// Proposed reference; the gateway's answer is authoritative
    pub reference: String,
    pub callback_url: Option<String>,
    pub metadata: serde_json::Value,
    pub split: SplitPlan,
}

/// The gateway's answer to a transaction initialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInit {
    pub authorization_url: String,
    pub access_code: Option<String>,
    pub reference: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Name recorded as the payment provider
    fn provider(&self) -> String;

    async fn initialize(
        &self,
        request: &InitializeTransaction,
    ) -> Result<TransactionInit, ServiceError>;
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaymentInit {
    pub order_id: Uuid,
    pub payment_id: Uuid,
    pub authorization_url: String,
    pub reference: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EscrowRelease {
    pub payment_id: Uuid,
    pub order_id: Uuid,
    pub amount: i64,
    pub released_at: chrono::DateTime<Utc>,
}

#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn OrderNotifier>,
    default_method: String,
    callback_url: Option<String>,
}

impl PaymentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn OrderNotifier>,
        default_method: String,
        callback_url: Option<String>,
    ) -> Self {
        Self {
            db,
            gateway,
            notifier,
            default_method,
            callback_url,
        }
    }

    fn proposed_reference(order: &order::Model) -> String {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(6)
            .map(char::from)
            .collect();
        format!("{}-{}", order.order_number, suffix.to_ascii_uppercase())
    }

    /// Initializes a gateway transaction for `order` and records it.
    ///
    /// The gateway is called outside any transaction; on failure nothing is
    /// written and the order keeps its stock reservation.
    #[instrument(skip(self, order, items), fields(order_id = %order.id))]
    pub async fn initialize_for_order(
        &self,
        order: &order::Model,
        items: &[order_item::Model],
        method: Option<&str>,
    ) -> Result<PaymentInit, ServiceError> {
        let store_ids: Vec<Uuid> = items.iter().map(|item| item.store_id).collect();
        let subaccounts: HashMap<Uuid, String> = store::Entity::find()
            .filter(store::Column::Id.is_in(store_ids))
            .all(&*self.db)
            .await?
            .into_iter()
            .filter_map(|s| {
                s.subaccount_code
                    .filter(|code| !code.trim().is_empty())
                    .map(|code| (s.id, code))
            })
            .collect();

        let item_totals: Vec<(Uuid, i64)> = items
            .iter()
            .map(|item| (item.store_id, item.total_price))
            .collect();
        let split = plan_split(&item_totals, &subaccounts);
        if order.is_multi_vendor && !matches!(split, SplitPlan::Split { .. }) {
            warn!("multi-vendor order has no routable vendor subaccounts");
        }

        let request = InitializeTransaction {
            email: order.email.clone(),
            amount: order.total,
            currency: order.currency.clone(),
            reference: Self::proposed_reference(order),
            callback_url: self.callback_url.clone(),
            metadata: serde_json::json!({
                "order_id": order.id,
                "order_number": order.order_number,
            }),
            split,
        };

        let init = self.gateway.initialize(&request).await.map_err(|e| {
            error!(error = %e, "payment initialization failed");
            match e {
                ServiceError::GatewayError(_) => e,
                other => ServiceError::GatewayError(other.to_string()),
            }
        })?;

        let now = Utc::now();
        let txn = self.db.begin().await?;

        let payment = payment_details::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            provider: Set(self.gateway.provider()),
            method: Set(method.unwrap_or(&self.default_method).to_string()),
            amount: Set(order.total),
            fees: Set(0),
            net_amount: Set(order.total),
            currency: Set(order.currency.clone()),
            status: Set(PaymentStatus::Pending),
            external_reference: Set(init.reference.clone()),
            external_transaction_id: Set(None),
            gateway_response: Set(None),
            is_escrow: Set(true),
            escrow_released_at: Set(None),
            refunded_at: Set(None),
            refund_amount: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        order::Entity::update_many()
            .col_expr(
                order::Column::AuthorizationUrl,
                Expr::value(Some(init.authorization_url.clone())),
            )
            .col_expr(
                order::Column::AuthorizationReference,
                Expr::value(Some(init.reference.clone())),
            )
            .col_expr(
                order::Column::PaymentStatus,
                Expr::value(PaymentStatus::Pending),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::Id.eq(order.id))
            .exec(&txn)
            .await?;

        db::commit(txn).await?;

        info!(
            payment_id = %payment.id,
            reference = %init.reference,
            amount = order.total,
            "payment initialized"
        );

        Ok(PaymentInit {
            order_id: order.id,
            payment_id: payment.id,
            authorization_url: init.authorization_url,
            reference: init.reference,
        })
    }

    /// Retries payment initialization for an unpaid, uncancelled order.
    #[instrument(skip(self))]
    pub async fn initialize_payment(
        &self,
        buyer: Buyer,
        order_id: Uuid,
        method: Option<String>,
    ) -> Result<PaymentInit, ServiceError> {
        let order = order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if order.buyer_id != buyer.user_id {
            return Err(ServiceError::Unauthorized(
                "Order belongs to another buyer".to_string(),
            ));
        }
        if order.status == FulfillmentStatus::Cancelled {
            return Err(ServiceError::Conflict(format!(
                "Order {} is cancelled",
                order.order_number
            )));
        }
        if !matches!(
            order.payment_status,
            PaymentStatus::Pending | PaymentStatus::Failed
        ) {
            return Err(ServiceError::Conflict(format!(
                "Order {} is already {}",
                order.order_number, order.payment_status
            )));
        }

        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .all(&*self.db)
            .await?;

        self.initialize_for_order(&order, &items, method.as_deref())
            .await
    }

    /// Releases a settled escrow payment to the vendors, once.
    #[instrument(skip(self))]
    pub async fn release_escrow(
        &self,
        platform: Platform,
        payment_id: Uuid,
    ) -> Result<EscrowRelease, ServiceError> {
        let payment = payment_details::Entity::find_by_id(payment_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Payment {} not found", payment_id)))?;

        if payment.status != PaymentStatus::Paid {
            return Err(ServiceError::Conflict(format!(
                "Payment {} is {}, not paid",
                payment_id, payment.status
            )));
        }
        if !payment.is_escrow {
            return Err(ServiceError::Conflict(format!(
                "Payment {} is not held in escrow",
                payment_id
            )));
        }

        let now = Utc::now();
        let result = payment_details::Entity::update_many()
            .col_expr(payment_details::Column::EscrowReleasedAt, Expr::value(Some(now)))
            .col_expr(payment_details::Column::UpdatedAt, Expr::value(now))
            .filter(payment_details::Column::Id.eq(payment_id))
            .filter(payment_details::Column::Status.eq(PaymentStatus::Paid))
            .filter(payment_details::Column::IsEscrow.eq(true))
            .filter(payment_details::Column::EscrowReleasedAt.is_null())
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            warn!(%payment_id, "escrow already released");
            return Err(ServiceError::Conflict(format!(
                "Escrow for payment {} already released",
                payment_id
            )));
        }

        info!(
            %payment_id,
            order_id = %payment.order_id,
            amount = payment.net_amount,
            released_by = %platform.user_id,
            "escrow released"
        );
        self.notifier
            .notify(Event::EscrowReleased {
                order_id: payment.order_id,
                payment_id,
                amount: payment.net_amount,
            })
            .await;

        Ok(EscrowRelease {
            payment_id,
            order_id: payment.order_id,
            amount: payment.net_amount,
            released_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> (Uuid, Uuid, Uuid) {
        // Sorted so BTreeMap order matches declaration order.
        let mut v = vec![Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        v.sort();
        (v[0], v[1], v[2])
    }

    #[test]
    fn two_vendors_with_subaccounts_get_flat_shares() {
        let (a, b, _) = ids();
        let subaccounts = HashMap::from([(a, "ACCT_A".to_string()), (b, "ACCT_B".to_string())]);
        let plan = plan_split(&[(a, 1000), (a, 0), (b, 1000)], &subaccounts);
        assert_eq!(
            plan,
            SplitPlan::Split {
                shares: vec![
                    SplitShare {
                        store_id: a,
                        subaccount: "ACCT_A".into(),
                        share: 1000
                    },
                    SplitShare {
                        store_id: b,
                        subaccount: "ACCT_B".into(),
                        share: 1000
                    },
                ]
            }
        );
    }

    #[test]
    fn single_vendor_routes_whole_transaction() {
        let (a, _, _) = ids();
        let subaccounts = HashMap::from([(a, "ACCT_A".to_string())]);
        assert_eq!(
            plan_split(&[(a, 500), (a, 700)], &subaccounts),
            SplitPlan::Single {
                subaccount: "ACCT_A".into()
            }
        );
    }

    #[test]
    fn single_vendor_without_subaccount_settles_to_platform() {
        let (a, _, _) = ids();
        assert_eq!(plan_split(&[(a, 500)], &HashMap::new()), SplitPlan::Platform);
    }

    #[test]
    fn vendors_without_subaccount_are_left_out_of_split() {
        let (a, b, c) = ids();
        let subaccounts = HashMap::from([(a, "ACCT_A".to_string()), (c, "ACCT_C".to_string())]);
        let plan = plan_split(&[(a, 100), (b, 200), (c, 300)], &subaccounts);
        match plan {
            SplitPlan::Split { shares } => {
                assert_eq!(shares.len(), 2);
                assert!(shares.iter().all(|s| s.store_id != b));
                assert_eq!(shares.iter().map(|s| s.share).sum::<i64>(), 400);
            }
            other => panic!("expected split, got {:?}", other),
        }
    }

    #[test]
    fn multi_vendor_without_any_subaccount_settles_to_platform() {
        let (a, b, _) = ids();
        assert_eq!(
            plan_split(&[(a, 100), (b, 200)], &HashMap::new()),
            SplitPlan::Platform
        );
    }
}
