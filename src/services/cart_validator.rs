//! Cart Snapshot Validator
//!
//! Re-checks every line of a buyer's cart against the current catalog
//! before an order is assembled from it.

use sea_orm::{
    ColumnTrait, ConnectionTrait, EntityTrait, JoinType, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, RelationTrait,
};
use std::collections::HashMap;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::entities::{cart, cart_item, product, product_variant};
use crate::errors::{ServiceError, StockTarget};

pub const CART_EMPTY: &str = "cart is empty";

/// A cart line that passed validation, priced from the catalog as it is now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedLine {
    pub cart_item_id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub store_id: Uuid,
    pub quantity: i32,
    pub unit_price: i64,
    pub available_stock: i32,
    pub currency: String,
}

impl ValidatedLine {
    pub fn stock_target(&self) -> StockTarget {
        match self.variant_id {
            Some(variant_id) => StockTarget::Variant(variant_id),
            None => StockTarget::Product(self.product_id),
        }
    }

    pub fn total_price(&self) -> i64 {
        self.unit_price * i64::from(self.quantity)
    }
}

#[derive(Debug, Clone)]
pub struct ValidatedCart {
    pub cart_id: Uuid,
    /// Currency of the first line. Lines in another currency are not converted.
    pub currency: String,
    pub lines: Vec<ValidatedLine>,
}

/// Why one line was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineRejection {
    ProductUnavailable { name: Option<String> },
    VariantUnavailable { name: String },
    Shortage {
        name: String,
        target: StockTarget,
        available: i32,
        requested: i32,
    },
}

impl std::fmt::Display for LineRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LineRejection::ProductUnavailable { name: Some(name) } => {
                write!(f, "{}: product no longer available", name)
            }
            LineRejection::ProductUnavailable { name: None } => {
                write!(f, "product no longer available")
            }
            LineRejection::VariantUnavailable { name } => {
                write!(f, "{}: variant no longer available", name)
            }
            LineRejection::Shortage {
                name,
                available,
                requested,
                ..
            } => write!(
                f,
                "{}: insufficient stock (available {}, requested {})",
                name, available, requested
            ),
        }
    }
}

/// Turns the full set of line rejections into the caller-facing error.
///
/// A lone stock shortage is reported as `InsufficientStock` so callers get
/// the same error whether the shortfall was seen here or by the ledger.
pub fn rejection_error(rejections: Vec<LineRejection>) -> ServiceError {
    if let [LineRejection::Shortage {
        target,
        available,
        requested,
        ..
    }] = rejections.as_slice()
    {
        return ServiceError::InsufficientStock {
            target: *target,
            available: *available,
            requested: *requested,
        };
    }
    ServiceError::ValidationFailure(rejections.iter().map(ToString::to_string).collect())
}

/// Checks one cart line against its product and, when one was chosen, its variant.
pub fn validate_line(
    item: &cart_item::Model,
    product: Option<&product::Model>,
    variant: Option<&product_variant::Model>,
) -> Result<ValidatedLine, LineRejection> {
    let product = match product {
        Some(p) if p.is_available() => p,
        other => {
            return Err(LineRejection::ProductUnavailable {
                name: other.map(|p| p.name.clone()),
            })
        }
    };

    let (unit_price, available_stock, target, name) = match item.variant_id {
        Some(variant_id) => match variant {
            Some(v) if v.id == variant_id && v.product_id == product.id && v.deleted_at.is_none() => (
                v.price,
                v.stock_quantity,
                StockTarget::Variant(v.id),
                format!("{} ({})", product.name, v.name),
            ),
            _ => {
                return Err(LineRejection::VariantUnavailable {
                    name: product.name.clone(),
                })
            }
        },
        None => (
            product.price,
            product.stock_quantity,
            StockTarget::Product(product.id),
            product.name.clone(),
        ),
    };

    if available_stock < item.quantity {
        return Err(LineRejection::Shortage {
            name,
            target,
            available: available_stock,
            requested: item.quantity,
        });
    }

    Ok(ValidatedLine {
        cart_item_id: item.id,
        product_id: product.id,
        variant_id: item.variant_id,
        store_id: product.store_id,
        quantity: item.quantity,
        unit_price,
        available_stock,
        currency: product.currency.clone(),
    })
}

/// Cheap read-only check run before any write transaction is opened.
pub async fn ensure_cart_not_empty<C: ConnectionTrait>(
    conn: &C,
    buyer_id: Uuid,
) -> Result<(), ServiceError> {
    let lines = cart_item::Entity::find()
        .join(JoinType::InnerJoin, cart_item::Relation::Cart.def())
        .filter(cart::Column::BuyerId.eq(buyer_id))
        .count(conn)
        .await?;
    if lines == 0 {
        return Err(ServiceError::ValidationFailure(vec![CART_EMPTY.to_string()]));
    }
    Ok(())
}

/// Loads `buyer_id`'s cart and validates every line.
///
/// Fails with every rejection reason at once; a cart is never partially accepted.
#[instrument(skip(conn))]
pub async fn validate_cart<C: ConnectionTrait>(
    conn: &C,
    buyer_id: Uuid,
) -> Result<ValidatedCart, ServiceError> {
    let cart = cart::Entity::find()
        .filter(cart::Column::BuyerId.eq(buyer_id))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::ValidationFailure(vec![CART_EMPTY.to_string()]))?;

    let items = cart_item::Entity::find()
        .filter(cart_item::Column::CartId.eq(cart.id))
        .order_by_asc(cart_item::Column::CreatedAt)
        .order_by_asc(cart_item::Column::Id)
        .find_also_related(product::Entity)
        .all(conn)
        .await?;

    if items.is_empty() {
        return Err(ServiceError::ValidationFailure(vec![CART_EMPTY.to_string()]));
    }

    let variant_ids: Vec<Uuid> = items
        .iter()
        .filter_map(|(item, _)| item.variant_id)
        .collect();
    let variants: HashMap<Uuid, product_variant::Model> = if variant_ids.is_empty() {
        HashMap::new()
    } else {
        product_variant::Entity::find()
            .filter(product_variant::Column::Id.is_in(variant_ids))
            .all(conn)
            .await?
            .into_iter()
            .map(|v| (v.id, v))
            .collect()
    };

    let mut lines = Vec::with_capacity(items.len());
    let mut rejections = Vec::new();
    for (item, product) in &items {
        let variant = item.variant_id.and_then(|id| variants.get(&id));
        match validate_line(item, product.as_ref(), variant) {
            Ok(line) => lines.push(line),
            Err(rejection) => rejections.push(rejection),
        }
    }

    if !rejections.is_empty() {
        warn!(
            cart_id = %cart.id,
            rejected = rejections.len(),
            "cart failed validation"
        );
        return Err(rejection_error(rejections));
    }

    let currency = lines
        .first()
        .map(|line| line.currency.clone())
        .unwrap_or_default();
    if lines.iter().any(|line| line.currency != currency) {
        warn!(cart_id = %cart.id, %currency, "cart mixes currencies; first line's currency applies");
    }

    Ok(ValidatedCart {
        cart_id: cart.id,
        currency,
        lines,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::Utc;

    fn product(stock: i32) -> product::Model {
        let now = Utc::now();
        product::Model {
            id: Uuid::new_v4(),
            store_id: Uuid::new_v4(),
            name: "Kettle".into(),
            price: 1000,
            currency: "NGN".into(),
            stock_quantity: stock,
            is_active: true,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn variant(product: &product::Model, stock: i32) -> product_variant::Model {
        let now = Utc::now();
        product_variant::Model {
            id: Uuid::new_v4(),
            product_id: product.id,
            name: "XL".into(),
            price: 1500,
            stock_quantity: stock,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn line(product_id: Uuid, variant_id: Option<Uuid>, quantity: i32) -> cart_item::Model {
        let now = Utc::now();
        cart_item::Model {
            id: Uuid::new_v4(),
            cart_id: Uuid::new_v4(),
            product_id,
            variant_id,
            quantity,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn product_line_uses_product_price_and_stock() {
        let p = product(5);
        let validated = validate_line(&line(p.id, None, 2), Some(&p), None).unwrap();
        assert_eq!(validated.unit_price, 1000);
        assert_eq!(validated.total_price(), 2000);
        assert_eq!(validated.store_id, p.store_id);
        assert_eq!(validated.stock_target(), StockTarget::Product(p.id));
    }

    #[test]
    fn variant_line_overrides_price_and_stock() {
        let p = product(0);
        let v = variant(&p, 3);
        let validated = validate_line(&line(p.id, Some(v.id), 3), Some(&p), Some(&v)).unwrap();
        assert_eq!(validated.unit_price, 1500);
        assert_eq!(validated.available_stock, 3);
        assert_eq!(validated.stock_target(), StockTarget::Variant(v.id));
    }

    #[test]
    fn inactive_or_deleted_products_are_refused() {
        let mut p = product(5);
        p.is_active = false;
        assert_matches!(
            validate_line(&line(p.id, None, 1), Some(&p), None),
            Err(LineRejection::ProductUnavailable { .. })
        );

        let mut p = product(5);
        p.deleted_at = Some(Utc::now());
        assert_matches!(
            validate_line(&line(p.id, None, 1), Some(&p), None),
            Err(LineRejection::ProductUnavailable { .. })
        );

        assert_matches!(
            validate_line(&line(Uuid::new_v4(), None, 1), None, None),
            Err(LineRejection::ProductUnavailable { name: None })
        );
    }

    #[test]
    fn deleted_or_foreign_variants_are_refused() {
        let p = product(5);
        let mut v = variant(&p, 5);
        v.deleted_at = Some(Utc::now());
        assert_matches!(
            validate_line(&line(p.id, Some(v.id), 1), Some(&p), Some(&v)),
            Err(LineRejection::VariantUnavailable { .. })
        );

        let other = product(5);
        let foreign = variant(&other, 5);
        assert_matches!(
            validate_line(&line(p.id, Some(foreign.id), 1), Some(&p), Some(&foreign)),
            Err(LineRejection::VariantUnavailable { .. })
        );
    }

    #[test]
    fn shortage_reports_available_and_requested() {
        let p = product(1);
        let rejection = validate_line(&line(p.id, None, 3), Some(&p), None).unwrap_err();
        assert_eq!(
            rejection.to_string(),
            "Kettle: insufficient stock (available 1, requested 3)"
        );
    }

    #[test]
    fn lone_shortage_becomes_insufficient_stock() {
        let p = product(1);
        let rejection = validate_line(&line(p.id, None, 3), Some(&p), None).unwrap_err();
        assert_matches!(
            rejection_error(vec![rejection]),
            ServiceError::InsufficientStock {
                available: 1,
                requested: 3,
                ..
            }
        );
    }

    #[test]
    fn several_rejections_are_all_reported() {
        let error = rejection_error(vec![
            LineRejection::ProductUnavailable { name: None },
            LineRejection::VariantUnavailable {
                name: "Kettle".into(),
            },
        ]);
        assert_matches!(error, ServiceError::ValidationFailure(reasons) if reasons.len() == 2);
    }
}
