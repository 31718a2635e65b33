//! Stock Ledger
//!
//! Atomic decrement/increment of available quantity on a product or a
//! product variant. Every call runs on the caller's connection so the stock
//! change commits or rolls back with the order mutation that triggered it.
//!
//! Reservation is a single conditional update
//! (`stock = stock - qty WHERE id = ? AND stock >= qty`); a concurrent
//! checkout that loses the race sees zero affected rows and reports
//! [`ServiceError::InsufficientStock`].

use chrono::Utc;
use metrics::counter;
use sea_orm::{sea_query::Expr, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use tracing::{debug, warn};

use crate::entities::{order_item, product, product_variant};
use crate::errors::{ServiceError, StockTarget};

fn ensure_positive(qty: i32) -> Result<(), ServiceError> {
    if qty <= 0 {
        return Err(ServiceError::ValidationError(format!(
            "stock quantity must be positive, got {}",
            qty
        )));
    }
    Ok(())
}

/// Current stock on `target`.
pub async fn available<C: ConnectionTrait>(
    conn: &C,
    target: StockTarget,
) -> Result<i32, ServiceError> {
    let stock = match target {
        StockTarget::Product(id) => product::Entity::find_by_id(id)
            .one(conn)
            .await?
            .map(|p| p.stock_quantity),
        StockTarget::Variant(id) => product_variant::Entity::find_by_id(id)
            .one(conn)
            .await?
            .map(|v| v.stock_quantity),
    };
    stock.ok_or_else(|| ServiceError::NotFound(format!("{} not found", target)))
}

/// Decrements stock on `target` by `qty`, failing if that would go negative.
pub async fn reserve<C: ConnectionTrait>(
    conn: &C,
    target: StockTarget,
    qty: i32,
) -> Result<(), ServiceError> {
    ensure_positive(qty)?;
    let now = Utc::now();

    let result = match target {
        StockTarget::Product(id) => {
            product::Entity::update_many()
                .col_expr(
                    product::Column::StockQuantity,
                    Expr::col(product::Column::StockQuantity).sub(qty),
                )
                .col_expr(product::Column::UpdatedAt, Expr::value(now))
                .filter(product::Column::Id.eq(id))
                .filter(product::Column::StockQuantity.gte(qty))
                .exec(conn)
                .await?
        }
        StockTarget::Variant(id) => {
            product_variant::Entity::update_many()
                .col_expr(
                    product_variant::Column::StockQuantity,
                    Expr::col(product_variant::Column::StockQuantity).sub(qty),
                )
                .col_expr(product_variant::Column::UpdatedAt, Expr::value(now))
                .filter(product_variant::Column::Id.eq(id))
                .filter(product_variant::Column::StockQuantity.gte(qty))
                .exec(conn)
                .await?
        }
    };

    if result.rows_affected == 0 {
        let available = available(conn, target).await?;
        counter!("marketplace.stock.reservation_conflicts", 1);
        warn!(%target, available, requested = qty, "stock reservation refused");
        return Err(ServiceError::InsufficientStock {
            target,
            available,
            requested: qty,
        });
    }

    debug!(%target, qty, "stock reserved");
    Ok(())
}

/// Credits `qty` back to `target`.
///
/// Not idempotent on its own; callers releasing an order item go through
/// [`release_item`].
pub async fn release<C: ConnectionTrait>(
    conn: &C,
    target: StockTarget,
    qty: i32,
) -> Result<(), ServiceError> {
    ensure_positive(qty)?;
    let now = Utc::now();

    let result = match target {
        StockTarget::Product(id) => {
            product::Entity::update_many()
                .col_expr(
                    product::Column::StockQuantity,
                    Expr::col(product::Column::StockQuantity).add(qty),
                )
                .col_expr(product::Column::UpdatedAt, Expr::value(now))
                .filter(product::Column::Id.eq(id))
                .exec(conn)
                .await?
        }
        StockTarget::Variant(id) => {
            product_variant::Entity::update_many()
                .col_expr(
                    product_variant::Column::StockQuantity,
                    Expr::col(product_variant::Column::StockQuantity).add(qty),
                )
                .col_expr(product_variant::Column::UpdatedAt, Expr::value(now))
                .filter(product_variant::Column::Id.eq(id))
                .exec(conn)
                .await?
        }
    };

    if result.rows_affected == 0 {
        return Err(ServiceError::NotFound(format!("{} not found", target)));
    }

    debug!(%target, qty, "stock released");
    Ok(())
}

/// Returns the stock an order item reserved, at most once per item.
///
/// The item's `stock_released` flag is claimed with a conditional update
/// before any stock moves, so a repeated cancellation credits nothing.
/// Returns whether this call did the release.
pub async fn release_item<C: ConnectionTrait>(
    conn: &C,
    item: &order_item::Model,
) -> Result<bool, ServiceError> {
    let claimed = order_item::Entity::update_many()
        .col_expr(order_item::Column::StockReleased, Expr::value(true))
        .filter(order_item::Column::Id.eq(item.id))
        .filter(order_item::Column::StockReleased.eq(false))
        .exec(conn)
        .await?;

    if claimed.rows_affected == 0 {
        debug!(item_id = %item.id, "stock already released");
        return Ok(false);
    }

    release(conn, item.stock_target(), item.quantity).await?;
    Ok(true)
}
