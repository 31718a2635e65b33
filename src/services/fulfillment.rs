//! Fulfillment State Machine
//!
//! Per-item lifecycle transitions and the fold that derives an order's
//! status from its items. Every mutation writes the item with a
//! compare-and-set on its observed status and recomputes the parent order
//! in the same transaction, so an order is never visible out of step with
//! its items. Notifications go out only after commit.

use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction,
    EntityTrait, QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{Buyer, Platform, Vendor};
use crate::db;
use crate::entities::{order, order_item, payment_details, FulfillmentStatus, PaymentStatus};
use crate::errors::ServiceError;
use crate::events::Event;
use crate::services::notifications::{notify_all, OrderNotifier};
use crate::services::stock_ledger;

use FulfillmentStatus::*;

/// Something an actor asks to happen to an order item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemAction {
    Accept,
    Reject,
    StartProcessing,
    Dispatch,
    MarkDelivered,
    Cancel,
    Refund,
}

impl ItemAction {
    pub fn name(self) -> &'static str {
        match self {
            ItemAction::Accept => "accept",
            ItemAction::Reject => "reject",
            ItemAction::StartProcessing => "process",
            ItemAction::Dispatch => "dispatch",
            ItemAction::MarkDelivered => "mark delivered",
            ItemAction::Cancel => "cancel",
            ItemAction::Refund => "refund",
        }
    }
}

/// The legal transition table. Returns the status an item moves to.
pub fn transition(
    from: FulfillmentStatus,
    action: ItemAction,
) -> Result<FulfillmentStatus, ServiceError> {
    let to = match (action, from) {
        (ItemAction::Accept, Pending) => Confirmed,
        (ItemAction::Reject | ItemAction::Cancel, Pending | Confirmed) => Cancelled,
        (ItemAction::StartProcessing, Confirmed) => Processing,
        (ItemAction::Dispatch, Confirmed | Processing) => Shipped,
        (ItemAction::MarkDelivered, Shipped) => Delivered,
        (ItemAction::Refund, Shipped | Delivered | Cancelled) => Refunded,
        _ => {
            return Err(ServiceError::IllegalTransition {
                from,
                action: action.name(),
            })
        }
    };
    Ok(to)
}

/// Derives an order's status from the multiset of its item statuses.
///
/// Rules in priority order:
/// 1. all cancelled: cancelled
/// 2. all delivered: delivered
/// 3. all shipped or delivered: shipped
/// 4. all processing or later: processing
/// 5. all confirmed or later: confirmed
/// 6. all cancelled or refunded, at least one refunded: refunded
/// 7. otherwise pending
///
/// The result depends only on the counts, never on item order.
pub fn aggregate(statuses: &[FulfillmentStatus]) -> FulfillmentStatus {
    if statuses.is_empty() {
        return Pending;
    }

    let count = |wanted: &[FulfillmentStatus]| {
        statuses.iter().filter(|s| wanted.contains(*s)).count()
    };
    let total = statuses.len();
    let has = |status: FulfillmentStatus| statuses.contains(&status);

    if count(&[Cancelled]) == total {
        Cancelled
    } else if count(&[Delivered]) == total {
        Delivered
    } else if count(&[Shipped, Delivered]) == total && has(Shipped) {
        Shipped
    } else if count(&[Processing, Shipped, Delivered]) == total && has(Processing) {
        Processing
    } else if count(&[Confirmed, Processing, Shipped, Delivered]) == total && has(Confirmed) {
        Confirmed
    } else if count(&[Cancelled, Refunded]) == total && has(Refunded) {
        Refunded
    } else {
        Pending
    }
}

/// One item's move, as reported to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ItemChange {
    pub item_id: Uuid,
    pub store_id: Uuid,
    pub from: FulfillmentStatus,
    pub to: FulfillmentStatus,
    /// True when this move credited the item's reserved stock back
    pub stock_released: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FulfillmentUpdate {
    pub order_id: Uuid,
    pub order_status: FulfillmentStatus,
    pub items: Vec<ItemChange>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct SweepResult {
    pub cancelled_orders: Vec<Uuid>,
    pub failed: usize,
}

/// Who is asking, for ownership checks.
#[derive(Debug, Clone, Copy)]
enum Actor {
    Vendor(Vendor),
    Buyer(Buyer),
    Platform,
}

impl Actor {
    fn authorize(&self, order: &order::Model, item: &order_item::Model) -> Result<(), ServiceError> {
        match self {
            Actor::Vendor(vendor) if item.store_id != vendor.store_id => Err(
                ServiceError::Unauthorized("Item belongs to another store".to_string()),
            ),
            Actor::Buyer(buyer) if order.buyer_id != buyer.user_id => Err(
                ServiceError::Unauthorized("Order belongs to another buyer".to_string()),
            ),
            _ => Ok(()),
        }
    }
}

async fn lock_order(txn: &DatabaseTransaction, order_id: Uuid) -> Result<order::Model, ServiceError> {
    order::Entity::find_by_id(order_id)
        .lock_exclusive()
        .one(txn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
}

async fn order_items<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> Result<Vec<order_item::Model>, ServiceError> {
    Ok(order_item::Entity::find()
        .filter(order_item::Column::OrderId.eq(order_id))
        .order_by_asc(order_item::Column::CreatedAt)
        .order_by_asc(order_item::Column::Id)
        .all(conn)
        .await?)
}

/// Moves one item with a compare-and-set on the status it was read with.
async fn apply_item_transition<C: ConnectionTrait>(
    conn: &C,
    item: &order_item::Model,
    action: ItemAction,
    now: DateTime<Utc>,
) -> Result<ItemChange, ServiceError> {
    let to = transition(item.status, action)?;

    let mut update = order_item::Entity::update_many()
        .col_expr(order_item::Column::Status, Expr::value(to))
        .col_expr(order_item::Column::UpdatedAt, Expr::value(now));
    if item.stamped_at(to).is_none() {
        if let Some(column) = order_item::timestamp_column(to) {
            update = update.col_expr(column, Expr::value(now));
        }
    }
    let result = update
        .filter(order_item::Column::Id.eq(item.id))
        .filter(order_item::Column::Status.eq(item.status))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        return Err(ServiceError::Conflict(format!(
            "Order item {} changed concurrently",
            item.id
        )));
    }

    let stock_released = if to == Cancelled {
        stock_ledger::release_item(conn, item).await?
    } else {
        false
    };

    Ok(ItemChange {
        item_id: item.id,
        store_id: item.store_id,
        from: item.status,
        to,
        stock_released,
    })
}

/// Re-derives the order's status from its items and writes it if it moved.
///
/// Returns the resulting status and, when it changed, the previous one.
pub async fn recompute_order_status<C: ConnectionTrait>(
    conn: &C,
    order: &order::Model,
    now: DateTime<Utc>,
) -> Result<(FulfillmentStatus, Option<FulfillmentStatus>), ServiceError> {
    let statuses: Vec<FulfillmentStatus> = order_items(conn, order.id)
        .await?
        .into_iter()
        .map(|item| item.status)
        .collect();
    let next = aggregate(&statuses);
    if next == order.status {
        return Ok((next, None));
    }

    let mut update = order::Entity::update_many()
        .col_expr(order::Column::Status, Expr::value(next))
        .col_expr(order::Column::UpdatedAt, Expr::value(now));
    if order.stamped_at(next).is_none() {
        if let Some(column) = order::timestamp_column(next) {
            update = update.col_expr(column, Expr::value(now));
        }
    }
    let result = update
        .filter(order::Column::Id.eq(order.id))
        .filter(order::Column::Status.eq(order.status))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        return Err(ServiceError::Conflict(format!(
            "Order {} changed concurrently",
            order.id
        )));
    }

    info!(order_id = %order.id, from = %order.status, to = %next, "order status recomputed");
    Ok((next, Some(order.status)))
}

fn change_events(
    order_id: Uuid,
    changes: &[ItemChange],
    order_change: Option<(FulfillmentStatus, FulfillmentStatus)>,
) -> Vec<Event> {
    let mut events: Vec<Event> = changes
        .iter()
        .map(|change| Event::OrderItemStatusChanged {
            order_id,
            item_id: change.item_id,
            store_id: change.store_id,
            old_status: change.from,
            new_status: change.to,
        })
        .collect();
    if let Some((old_status, new_status)) = order_change {
        events.push(Event::OrderStatusChanged {
            order_id,
            old_status,
            new_status,
        });
    }
    events
}

/// Recomputes the order and builds the update and its pending notifications.
async fn settle(
    txn: &DatabaseTransaction,
    order: &order::Model,
    changes: Vec<ItemChange>,
    now: DateTime<Utc>,
) -> Result<(FulfillmentUpdate, Vec<Event>), ServiceError> {
    let (order_status, previous) = recompute_order_status(txn, order, now).await?;
    let events = change_events(
        order.id,
        &changes,
        previous.map(|old| (old, order_status)),
    );
    Ok((
        FulfillmentUpdate {
            order_id: order.id,
            order_status,
            items: changes,
        },
        events,
    ))
}

/// A refund needs a legal move and money that was actually collected.
fn refundable(order: &order::Model, item: &order_item::Model) -> Result<(), ServiceError> {
    transition(item.status, ItemAction::Refund)?;
    if order.payment_status != PaymentStatus::Paid {
        warn!(
            order_id = %order.id,
            item_id = %item.id,
            payment_status = %order.payment_status,
            "refund refused without a settled payment"
        );
        return Err(ServiceError::Conflict(format!(
            "Order {} has no settled payment to refund",
            order.order_number
        )));
    }
    Ok(())
}

/// Adds a refunded item's total to the order's settled payment. Once every
/// item is refunded or cancelled the payment and order are marked refunded.
async fn record_refund(
    txn: &DatabaseTransaction,
    item: &order_item::Model,
    order_status: FulfillmentStatus,
    now: DateTime<Utc>,
) -> Result<(), ServiceError> {
    let payment = payment_details::Entity::find()
        .filter(payment_details::Column::OrderId.eq(item.order_id))
        .filter(
            payment_details::Column::Status.is_in([PaymentStatus::Paid, PaymentStatus::Refunded]),
        )
        .order_by_desc(payment_details::Column::CreatedAt)
        .one(txn)
        .await?;

    let Some(payment) = payment else {
        return Err(ServiceError::Conflict(format!(
            "Order {} has no settled payment to refund",
            item.order_id
        )));
    };

    let refunded = payment.refund_amount.unwrap_or(0) + item.total_price;
    let mut update = payment_details::Entity::update_many()
        .col_expr(payment_details::Column::RefundAmount, Expr::value(Some(refunded)))
        .col_expr(payment_details::Column::UpdatedAt, Expr::value(now));
    if payment.refunded_at.is_none() {
        update = update.col_expr(payment_details::Column::RefundedAt, Expr::value(Some(now)));
    }
    if order_status == Refunded {
        update = update.col_expr(
            payment_details::Column::Status,
            Expr::value(PaymentStatus::Refunded),
        );
        order::Entity::update_many()
            .col_expr(order::Column::PaymentStatus, Expr::value(PaymentStatus::Refunded))
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::Id.eq(item.order_id))
            .exec(txn)
            .await?;
    }
    update
        .filter(payment_details::Column::Id.eq(payment.id))
        .exec(txn)
        .await?;

    info!(payment_id = %payment.id, refunded, "refund recorded");
    Ok(())
}

#[derive(Clone)]
pub struct FulfillmentService {
    db: Arc<DatabaseConnection>,
    notifier: Arc<dyn OrderNotifier>,
}

impl FulfillmentService {
    pub fn new(db: Arc<DatabaseConnection>, notifier: Arc<dyn OrderNotifier>) -> Self {
        Self { db, notifier }
    }

    /// Single-item transition shared by every per-item operation.
    async fn transition_item(
        &self,
        actor: Actor,
        item_id: Uuid,
        action: ItemAction,
    ) -> Result<FulfillmentUpdate, ServiceError> {
        let txn = self.db.begin().await?;

        let order_id = order_item::Entity::find_by_id(item_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order item {} not found", item_id)))?
            .order_id;

        // Lock the order first so concurrent changes to sibling items serialize.
        let order = lock_order(&txn, order_id).await?;
        let item = order_item::Entity::find_by_id(item_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order item {} not found", item_id)))?;

        actor.authorize(&order, &item)?;
        if action == ItemAction::Refund {
            refundable(&order, &item)?;
        }

        let now = Utc::now();
        let change = match apply_item_transition(&txn, &item, action, now).await {
            Ok(change) => change,
            Err(e) => {
                warn!(%item_id, action = action.name(), error = %e, "item transition refused");
                return Err(e);
            }
        };

        let (update, events) = settle(&txn, &order, vec![change], now).await?;
        if action == ItemAction::Refund {
            record_refund(&txn, &item, update.order_status, now).await?;
        }
        db::commit(txn).await?;

        counter!("marketplace.fulfillment.transitions", 1, "action" => action.name());
        info!(
            %item_id,
            order_id = %order.id,
            action = action.name(),
            order_status = %update.order_status,
            "order item transitioned"
        );

        notify_all(self.notifier.as_ref(), events).await;
        Ok(update)
    }

    #[instrument(skip(self))]
    pub async fn accept(&self, vendor: Vendor, item_id: Uuid) -> Result<FulfillmentUpdate, ServiceError> {
        self.transition_item(Actor::Vendor(vendor), item_id, ItemAction::Accept)
            .await
    }

    /// Cancels the item and credits its reserved stock back.
    #[instrument(skip(self))]
    pub async fn reject(&self, vendor: Vendor, item_id: Uuid) -> Result<FulfillmentUpdate, ServiceError> {
        self.transition_item(Actor::Vendor(vendor), item_id, ItemAction::Reject)
            .await
    }

    #[instrument(skip(self))]
    pub async fn start_processing(
        &self,
        vendor: Vendor,
        item_id: Uuid,
    ) -> Result<FulfillmentUpdate, ServiceError> {
        self.transition_item(Actor::Vendor(vendor), item_id, ItemAction::StartProcessing)
            .await
    }

    #[instrument(skip(self))]
    pub async fn dispatch(&self, vendor: Vendor, item_id: Uuid) -> Result<FulfillmentUpdate, ServiceError> {
        self.transition_item(Actor::Vendor(vendor), item_id, ItemAction::Dispatch)
            .await
    }

    /// Delivery is confirmed by the buyer, not the vendor.
    #[instrument(skip(self))]
    pub async fn mark_delivered(
        &self,
        buyer: Buyer,
        item_id: Uuid,
    ) -> Result<FulfillmentUpdate, ServiceError> {
        self.transition_item(Actor::Buyer(buyer), item_id, ItemAction::MarkDelivered)
            .await
    }

    /// Moves a shipped, delivered or cancelled item to refunded and records
    /// the amount against the order's settled payment.
    #[instrument(skip(self))]
    pub async fn refund_item(
        &self,
        platform: Platform,
        item_id: Uuid,
    ) -> Result<FulfillmentUpdate, ServiceError> {
        info!(%item_id, refunded_by = %platform.user_id, "refund requested");
        self.transition_item(Actor::Platform, item_id, ItemAction::Refund)
            .await
    }

    /// Applies `action` to every item of `order_id` owned by the vendor's
    /// store that can make the move, with one recomputation.
    async fn transition_store_items(
        &self,
        vendor: Vendor,
        order_id: Uuid,
        action: ItemAction,
    ) -> Result<FulfillmentUpdate, ServiceError> {
        let txn = self.db.begin().await?;
        let order = lock_order(&txn, order_id).await?;

        let owned: Vec<order_item::Model> = order_items(&txn, order.id)
            .await?
            .into_iter()
            .filter(|item| item.store_id == vendor.store_id)
            .collect();
        let Some(first) = owned.first() else {
            return Err(ServiceError::NotFound(format!(
                "Order {} has no items for this store",
                order_id
            )));
        };

        let movable: Vec<&order_item::Model> = owned
            .iter()
            .filter(|item| transition(item.status, action).is_ok())
            .collect();
        if movable.is_empty() {
            return Err(ServiceError::IllegalTransition {
                from: first.status,
                action: action.name(),
            });
        }

        let now = Utc::now();
        let mut changes = Vec::with_capacity(movable.len());
        for item in movable {
            changes.push(apply_item_transition(&txn, item, action, now).await?);
        }

        let (update, events) = settle(&txn, &order, changes, now).await?;
        db::commit(txn).await?;

        counter!(
            "marketplace.fulfillment.transitions",
            update.items.len() as u64,
            "action" => action.name()
        );
        info!(
            %order_id,
            store_id = %vendor.store_id,
            action = action.name(),
            items = update.items.len(),
            "store items transitioned"
        );

        notify_all(self.notifier.as_ref(), events).await;
        Ok(update)
    }

    #[instrument(skip(self))]
    pub async fn accept_store_order(
        &self,
        vendor: Vendor,
        order_id: Uuid,
    ) -> Result<FulfillmentUpdate, ServiceError> {
        self.transition_store_items(vendor, order_id, ItemAction::Accept)
            .await
    }

    #[instrument(skip(self))]
    pub async fn reject_store_order(
        &self,
        vendor: Vendor,
        order_id: Uuid,
    ) -> Result<FulfillmentUpdate, ServiceError> {
        self.transition_store_items(vendor, order_id, ItemAction::Reject)
            .await
    }

    /// Cancels every open item of the order and releases its stock.
    ///
    /// `unpaid_only` restricts the cancellation to orders whose payment is
    /// still pending, so a payment landing between the sweep's selection and
    /// its cancellation wins.
    async fn cancel(
        &self,
        buyer: Option<Buyer>,
        order_id: Uuid,
        unpaid_only: bool,
    ) -> Result<FulfillmentUpdate, ServiceError> {
        let txn = self.db.begin().await?;
        let order = lock_order(&txn, order_id).await?;

        if let Some(buyer) = buyer {
            if order.buyer_id != buyer.user_id {
                return Err(ServiceError::Unauthorized(
                    "Order belongs to another buyer".to_string(),
                ));
            }
        }
        if unpaid_only && order.payment_status != PaymentStatus::Pending {
            return Err(ServiceError::Conflict(format!(
                "Order {} is no longer awaiting payment",
                order.order_number
            )));
        }

        let items = order_items(&txn, order.id).await?;
        if let Some(blocking) = items.iter().find(|item| {
            item.status != Cancelled && transition(item.status, ItemAction::Cancel).is_err()
        }) {
            return Err(ServiceError::IllegalTransition {
                from: blocking.status,
                action: ItemAction::Cancel.name(),
            });
        }
        if items.iter().all(|item| item.status == Cancelled) {
            return Err(ServiceError::IllegalTransition {
                from: Cancelled,
                action: ItemAction::Cancel.name(),
            });
        }

        let now = Utc::now();
        let mut changes = Vec::new();
        for item in &items {
            if item.status == Cancelled {
                // Rejected earlier by its vendor; the claim makes this a no-op.
                stock_ledger::release_item(&txn, item).await?;
            } else {
                changes.push(apply_item_transition(&txn, item, ItemAction::Cancel, now).await?);
            }
        }

        let (update, events) = settle(&txn, &order, changes, now).await?;
        db::commit(txn).await?;

        info!(%order_id, items = update.items.len(), "order cancelled");
        notify_all(self.notifier.as_ref(), events).await;
        Ok(update)
    }

    /// Buyer cancellation, legal while nothing has started processing.
    #[instrument(skip(self))]
    pub async fn cancel_order(
        &self,
        buyer: Buyer,
        order_id: Uuid,
    ) -> Result<FulfillmentUpdate, ServiceError> {
        self.cancel(Some(buyer), order_id, false).await
    }

    /// Cancels orders still awaiting both fulfillment and payment that were
    /// placed before `cutoff`, returning their stock.
    #[instrument(skip(self))]
    pub async fn sweep_expired(&self, cutoff: DateTime<Utc>) -> Result<SweepResult, ServiceError> {
        let expired: Vec<Uuid> = order::Entity::find()
            .select_only()
            .column(order::Column::Id)
            .filter(order::Column::Status.eq(Pending))
            .filter(order::Column::PaymentStatus.eq(PaymentStatus::Pending))
            .filter(order::Column::CreatedAt.lt(cutoff))
            .order_by_asc(order::Column::CreatedAt)
            .into_tuple()
            .all(&*self.db)
            .await?;

        let mut result = SweepResult::default();
        for order_id in expired {
            match self.cancel(None, order_id, true).await {
                Ok(_) => result.cancelled_orders.push(order_id),
                Err(ServiceError::Conflict(_)) | Err(ServiceError::IllegalTransition { .. }) => {
                    // Paid or moved on since it was selected.
                }
                Err(e) => {
                    error!(%order_id, error = %e, "failed to expire order");
                    result.failed += 1;
                }
            }
        }

        if !result.cancelled_orders.is_empty() {
            counter!(
                "marketplace.orders.expired",
                result.cancelled_orders.len() as u64
            );
            info!(
                cancelled = result.cancelled_orders.len(),
                failed = result.failed,
                "expired abandoned orders"
            );
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rstest::rstest;
    use sea_orm::Iterable;

    #[rstest]
    #[case(Pending, ItemAction::Accept, Confirmed)]
    #[case(Pending, ItemAction::Reject, Cancelled)]
    #[case(Confirmed, ItemAction::Reject, Cancelled)]
    #[case(Confirmed, ItemAction::StartProcessing, Processing)]
    #[case(Confirmed, ItemAction::Dispatch, Shipped)]
    #[case(Processing, ItemAction::Dispatch, Shipped)]
    #[case(Shipped, ItemAction::MarkDelivered, Delivered)]
    #[case(Pending, ItemAction::Cancel, Cancelled)]
    #[case(Shipped, ItemAction::Refund, Refunded)]
    #[case(Delivered, ItemAction::Refund, Refunded)]
    #[case(Cancelled, ItemAction::Refund, Refunded)]
    fn legal_transitions(
        #[case] from: FulfillmentStatus,
        #[case] action: ItemAction,
        #[case] to: FulfillmentStatus,
    ) {
        assert_eq!(transition(from, action).unwrap(), to);
    }

    #[rstest]
    #[case(Confirmed, ItemAction::Accept)]
    #[case(Processing, ItemAction::Reject)]
    #[case(Shipped, ItemAction::Dispatch)]
    #[case(Pending, ItemAction::Dispatch)]
    #[case(Pending, ItemAction::StartProcessing)]
    #[case(Confirmed, ItemAction::MarkDelivered)]
    #[case(Pending, ItemAction::Refund)]
    #[case(Refunded, ItemAction::Refund)]
    #[case(Cancelled, ItemAction::Cancel)]
    fn illegal_transitions(#[case] from: FulfillmentStatus, #[case] action: ItemAction) {
        assert_matches!(
            transition(from, action),
            Err(ServiceError::IllegalTransition { from: f, .. }) if f == from
        );
    }

    #[test]
    fn refunded_is_terminal() {
        for action in [
            ItemAction::Accept,
            ItemAction::Reject,
            ItemAction::StartProcessing,
            ItemAction::Dispatch,
            ItemAction::MarkDelivered,
            ItemAction::Cancel,
            ItemAction::Refund,
        ] {
            assert!(transition(Refunded, action).is_err());
        }
    }

    #[test]
    fn every_move_changes_status() {
        for from in FulfillmentStatus::iter() {
            for action in [ItemAction::Accept, ItemAction::Dispatch, ItemAction::Refund] {
                if let Ok(to) = transition(from, action) {
                    assert_ne!(from, to);
                }
            }
        }
    }

    #[rstest]
    #[case(&[], Pending)]
    #[case(&[Cancelled], Cancelled)]
    #[case(&[Cancelled, Cancelled], Cancelled)]
    #[case(&[Delivered, Delivered], Delivered)]
    #[case(&[Shipped, Delivered], Shipped)]
    #[case(&[Shipped, Shipped], Shipped)]
    #[case(&[Processing, Shipped], Processing)]
    #[case(&[Confirmed, Delivered], Confirmed)]
    #[case(&[Confirmed, Pending], Pending)]
    #[case(&[Cancelled, Shipped], Pending)]
    #[case(&[Cancelled, Refunded], Refunded)]
    #[case(&[Refunded], Refunded)]
    #[case(&[Refunded, Delivered], Pending)]
    fn aggregation_rules(#[case] statuses: &[FulfillmentStatus], #[case] expected: FulfillmentStatus) {
        assert_eq!(aggregate(statuses), expected);
    }

    #[test]
    fn aggregation_ignores_item_order() {
        let forward = [Confirmed, Shipped, Processing];
        let mut reversed = forward;
        reversed.reverse();
        assert_eq!(aggregate(&forward), aggregate(&reversed));
        assert_eq!(aggregate(&forward), Confirmed);
    }

    #[test]
    fn change_events_include_order_change_last() {
        let order_id = Uuid::new_v4();
        let change = ItemChange {
            item_id: Uuid::new_v4(),
            store_id: Uuid::new_v4(),
            from: Pending,
            to: Cancelled,
            stock_released: true,
        };
        let events = change_events(order_id, &[change], Some((Pending, Cancelled)));
        assert_eq!(events.len(), 2);
        assert_matches!(
            events.last(),
            Some(Event::OrderStatusChanged {
                new_status: Cancelled,
                ..
            })
        );
    }
}
