//! Buyer cart maintenance.

use chrono::Utc;
use sea_orm::{
    sea_query::OnConflict, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::auth::Buyer;
use crate::db;
use crate::entities::{cart, cart_item, product, product_variant};
use crate::errors::ServiceError;

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct AddCartItem {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    #[validate(range(min = 1, max = 10000))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct UpdateCartItem {
    #[validate(range(min = 1, max = 10000))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CartLineView {
    pub id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub name: String,
    pub quantity: i32,
    pub unit_price: i64,
    pub line_total: i64,
    pub currency: String,
    /// False when the product or variant has since been withdrawn
    pub available: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CartView {
    /// Absent until the buyer first adds an item
    pub id: Option<Uuid>,
    pub buyer_id: Uuid,
    pub items: Vec<CartLineView>,
    pub subtotal: i64,
}

impl CartView {
    fn empty(buyer_id: Uuid) -> Self {
        Self {
            id: None,
            buyer_id,
            items: Vec::new(),
            subtotal: 0,
        }
    }
}

#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    async fn find_cart<C: ConnectionTrait>(
        conn: &C,
        buyer_id: Uuid,
    ) -> Result<Option<cart::Model>, ServiceError> {
        Ok(cart::Entity::find()
            .filter(cart::Column::BuyerId.eq(buyer_id))
            .one(conn)
            .await?)
    }

    /// Returns the buyer's cart, creating it on first use.
    async fn ensure_cart<C: ConnectionTrait>(
        conn: &C,
        buyer_id: Uuid,
    ) -> Result<cart::Model, ServiceError> {
        if let Some(existing) = Self::find_cart(conn, buyer_id).await? {
            return Ok(existing);
        }

        let now = Utc::now();
        let model = cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            buyer_id: Set(buyer_id),
            created_at: Set(now),
            updated_at: Set(now),
        };
        // A concurrent first add may have created it already.
        cart::Entity::insert(model)
            .on_conflict(
                OnConflict::column(cart::Column::BuyerId)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(conn)
            .await?;

        Self::find_cart(conn, buyer_id)
            .await?
            .ok_or_else(|| ServiceError::InternalError("cart creation failed".to_string()))
    }

    async fn owned_item<C: ConnectionTrait>(
        conn: &C,
        buyer_id: Uuid,
        item_id: Uuid,
    ) -> Result<cart_item::Model, ServiceError> {
        let item = cart_item::Entity::find_by_id(item_id)
            .find_also_related(cart::Entity)
            .one(conn)
            .await?;
        match item {
            Some((item, Some(cart))) if cart.buyer_id == buyer_id => Ok(item),
            _ => Err(ServiceError::NotFound(format!(
                "Cart item {} not found",
                item_id
            ))),
        }
    }

    async fn view<C: ConnectionTrait>(conn: &C, buyer_id: Uuid) -> Result<CartView, ServiceError> {
        let Some(cart) = Self::find_cart(conn, buyer_id).await? else {
            return Ok(CartView::empty(buyer_id));
        };

        let items = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .order_by_asc(cart_item::Column::Id)
            .find_also_related(product::Entity)
            .all(conn)
            .await?;

        let mut lines = Vec::with_capacity(items.len());
        for (item, product) in items {
            let variant = match item.variant_id {
                Some(id) => product_variant::Entity::find_by_id(id).one(conn).await?,
                None => None,
            };
            let (name, unit_price, currency, available) = match (&product, &variant) {
                (Some(p), Some(v)) => (
                    format!("{} ({})", p.name, v.name),
                    v.price,
                    p.currency.clone(),
                    p.is_available() && v.deleted_at.is_none(),
                ),
                (Some(p), None) => (
                    p.name.clone(),
                    p.price,
                    p.currency.clone(),
                    p.is_available() && item.variant_id.is_none(),
                ),
                (None, _) => (String::new(), 0, String::new(), false),
            };
            lines.push(CartLineView {
                id: item.id,
                product_id: item.product_id,
                variant_id: item.variant_id,
                name,
                quantity: item.quantity,
                unit_price,
                line_total: unit_price * i64::from(item.quantity),
                currency,
                available,
            });
        }

        let subtotal = lines
            .iter()
            .filter(|line| line.available)
            .map(|line| line.line_total)
            .sum();

        Ok(CartView {
            id: Some(cart.id),
            buyer_id,
            items: lines,
            subtotal,
        })
    }

    #[instrument(skip(self))]
    pub async fn get_cart(&self, buyer: Buyer) -> Result<CartView, ServiceError> {
        Self::view(&*self.db, buyer.user_id).await
    }

    /// Adds a line, merging quantity into an existing line for the same product/variant.
    #[instrument(skip(self))]
    pub async fn add_item(&self, buyer: Buyer, input: AddCartItem) -> Result<CartView, ServiceError> {
        input.validate()?;

        let txn = self.db.begin().await?;

        let product = product::Entity::find_by_id(input.product_id)
            .one(&txn)
            .await?
            .filter(product::Model::is_available)
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} not found", input.product_id))
            })?;

        if let Some(variant_id) = input.variant_id {
            let belongs = product_variant::Entity::find_by_id(variant_id)
                .one(&txn)
                .await?
                .map(|v| v.product_id == product.id && v.deleted_at.is_none())
                .unwrap_or(false);
            if !belongs {
                return Err(ServiceError::ValidationError(format!(
                    "Variant {} does not belong to product {}",
                    variant_id, product.id
                )));
            }
        }

        let cart = Self::ensure_cart(&txn, buyer.user_id).await?;
        let now = Utc::now();

        let existing = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(product.id))
            .filter(match input.variant_id {
                Some(variant_id) => cart_item::Column::VariantId.eq(variant_id),
                None => cart_item::Column::VariantId.is_null(),
            })
            .one(&txn)
            .await?;

        match existing {
            Some(line) => {
                let quantity = line.quantity.saturating_add(input.quantity);
                let mut active: cart_item::ActiveModel = line.into();
                active.quantity = Set(quantity);
                active.updated_at = Set(now);
                active.update(&txn).await?;
            }
            None => {
                cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    cart_id: Set(cart.id),
                    product_id: Set(product.id),
                    variant_id: Set(input.variant_id),
                    quantity: Set(input.quantity),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&txn)
                .await?;
            }
        }

        let view = Self::view(&txn, buyer.user_id).await?;
        db::commit(txn).await?;

        info!(buyer_id = %buyer.user_id, product_id = %input.product_id, "cart item added");
        Ok(view)
    }

    #[instrument(skip(self))]
    pub async fn update_item_quantity(
        &self,
        buyer: Buyer,
        item_id: Uuid,
        input: UpdateCartItem,
    ) -> Result<CartView, ServiceError> {
        input.validate()?;

        let txn = self.db.begin().await?;
        let item = Self::owned_item(&txn, buyer.user_id, item_id).await?;
        let mut active: cart_item::ActiveModel = item.into();
        active.quantity = Set(input.quantity);
        active.updated_at = Set(Utc::now());
        active.update(&txn).await?;

        let view = Self::view(&txn, buyer.user_id).await?;
        db::commit(txn).await?;
        Ok(view)
    }

    #[instrument(skip(self))]
    pub async fn remove_item(&self, buyer: Buyer, item_id: Uuid) -> Result<CartView, ServiceError> {
        let txn = self.db.begin().await?;
        let item = Self::owned_item(&txn, buyer.user_id, item_id).await?;
        cart_item::Entity::delete_by_id(item.id).exec(&txn).await?;

        let view = Self::view(&txn, buyer.user_id).await?;
        db::commit(txn).await?;
        Ok(view)
    }

    #[instrument(skip(self))]
    pub async fn clear(&self, buyer: Buyer) -> Result<(), ServiceError> {
        clear_cart(&*self.db, buyer.user_id).await?;
        info!(buyer_id = %buyer.user_id, "cart cleared");
        Ok(())
    }
}

/// Deletes every line of the buyer's cart. Used by checkout inside its transaction.
pub async fn clear_cart<C: ConnectionTrait>(conn: &C, buyer_id: Uuid) -> Result<u64, ServiceError> {
    let Some(cart) = CartService::find_cart(conn, buyer_id).await? else {
        return Ok(0);
    };
    let result = cart_item::Entity::delete_many()
        .filter(cart_item::Column::CartId.eq(cart.id))
        .exec(conn)
        .await?;
    Ok(result.rows_affected)
}
