//! Order Assembler
//!
//! Turns a validated cart into an order: prices every line, splits the
//! lines by owning store, reserves stock and clears the cart in one
//! transaction, then hands the order to the payment planner.

use chrono::{DateTime, Utc};
use metrics::counter;
use rand::Rng;
use sea_orm::{ActiveModelTrait, ConnectionTrait, DatabaseConnection, EntityTrait, Set, TransactionTrait};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::auth::Buyer;
use crate::db;
use crate::entities::{
    order, order_item, shipping_method, FulfillmentStatus, PaymentStatus,
};
use crate::errors::ServiceError;
use crate::events::Event;
use crate::services::cart::clear_cart;
use crate::services::cart_validator::{ensure_cart_not_empty, validate_cart, ValidatedLine};
use crate::services::notifications::OrderNotifier;
use crate::services::payment_split::{PaymentInit, PaymentService};
use crate::services::stock_ledger;

const ORDER_NUMBER_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const ORDER_NUMBER_SUFFIX_LEN: usize = 9;

/// Tax charged on the order subtotal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaxPolicy {
    /// Basis points: 750 is 7.5%
    pub rate_bps: u32,
}

impl TaxPolicy {
    pub fn new(rate_bps: u32) -> Self {
        Self { rate_bps }
    }

    /// Tax on `subtotal`, rounded half up to the nearest minor unit.
    pub fn tax_on(&self, subtotal: i64) -> i64 {
        let scaled = i128::from(subtotal) * i128::from(self.rate_bps);
        let rounded = (scaled + 5_000).div_euclid(10_000);
        i64::try_from(rounded).unwrap_or(i64::MAX)
    }
}

/// Money fields of an order, all in minor units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct OrderTotals {
    pub subtotal: i64,
    pub tax: i64,
    pub shipping: i64,
    pub total: i64,
}

/// `total == subtotal + tax + shipping` and `subtotal` is the sum of line totals.
pub fn compute_totals(lines: &[ValidatedLine], shipping: i64, tax: TaxPolicy) -> OrderTotals {
    let subtotal: i64 = lines.iter().map(ValidatedLine::total_price).sum();
    let tax = tax.tax_on(subtotal);
    OrderTotals {
        subtotal,
        tax,
        shipping,
        total: subtotal + tax + shipping,
    }
}

/// `ORD-<unix millis>-<9 base36 chars>`. Uniqueness is enforced by the
/// `orders.order_number` constraint.
pub fn generate_order_number<R: Rng + ?Sized>(now: DateTime<Utc>, rng: &mut R) -> String {
    let suffix: String = (0..ORDER_NUMBER_SUFFIX_LEN)
        .map(|_| ORDER_NUMBER_ALPHABET[rng.gen_range(0..ORDER_NUMBER_ALPHABET.len())] as char)
        .collect();
    format!("ORD-{}-{}", now.timestamp_millis(), suffix)
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct Address {
    #[validate(length(min = 1, max = 255))]
    pub line1: String,
    #[serde(default)]
    pub line2: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub city: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[validate(length(min = 2, max = 64))]
    pub country: String,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CheckoutRequest {
    #[validate(length(min = 1, max = 255))]
    pub customer_name: String,
    #[validate(email)]
    pub email: String,
    #[serde(default)]
    #[validate(length(max = 32))]
    pub phone: Option<String>,
    #[validate]
    pub shipping_address: Address,
    #[serde(default)]
    #[validate]
    pub billing_address: Option<Address>,
    #[serde(default)]
    pub shipping_method_id: Option<Uuid>,
    #[serde(default)]
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
    /// Defaults to the configured payment method
    #[serde(default)]
    pub payment_method: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CheckoutResponse {
    pub order_id: Uuid,
    pub order_number: String,
    pub authorization_url: String,
    pub reference: String,
    pub total: i64,
    pub currency: String,
    pub is_multi_vendor: bool,
}

/// An order and its items as they were committed.
#[derive(Debug, Clone)]
pub struct AssembledOrder {
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
}

#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    payments: PaymentService,
    notifier: Arc<dyn OrderNotifier>,
    tax: TaxPolicy,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        payments: PaymentService,
        notifier: Arc<dyn OrderNotifier>,
        tax: TaxPolicy,
    ) -> Self {
        Self {
            db,
            payments,
            notifier,
            tax,
        }
    }

    /// Flat shipping price: zero unless an active method is chosen.
    async fn resolve_shipping<C: ConnectionTrait>(
        conn: &C,
        shipping_method_id: Option<Uuid>,
    ) -> Result<i64, ServiceError> {
        let Some(id) = shipping_method_id else {
            return Ok(0);
        };
        match shipping_method::Entity::find_by_id(id).one(conn).await? {
            Some(method) if method.is_active => Ok(method.price),
            _ => {
                warn!(shipping_method_id = %id, "shipping method unknown or inactive; charging no shipping");
                Ok(0)
            }
        }
    }

    /// Validates the buyer's cart and commits the order, its items, the
    /// stock reservations and the emptied cart together.
    #[instrument(skip(self, request), fields(buyer_id = %buyer.user_id))]
    pub async fn assemble(
        &self,
        buyer: Buyer,
        request: &CheckoutRequest,
    ) -> Result<AssembledOrder, ServiceError> {
        ensure_cart_not_empty(&*self.db, buyer.user_id).await?;

        let txn = self.db.begin().await?;

        let cart = validate_cart(&txn, buyer.user_id).await?;
        let shipping = Self::resolve_shipping(&txn, request.shipping_method_id).await?;
        let totals = compute_totals(&cart.lines, shipping, self.tax);

        let stores: BTreeSet<Uuid> = cart.lines.iter().map(|line| line.store_id).collect();
        let now = Utc::now();
        let order_number = generate_order_number(now, &mut rand::thread_rng());

        let shipping_address = serde_json::to_value(&request.shipping_address)
            .map_err(|e| ServiceError::InternalError(e.to_string()))?;
        let billing_address = request
            .billing_address
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| ServiceError::InternalError(e.to_string()))?;

        let order = order::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_number: Set(order_number),
            buyer_id: Set(buyer.user_id),
            currency: Set(cart.currency.clone()),
            status: Set(FulfillmentStatus::Pending),
            payment_status: Set(PaymentStatus::Pending),
            subtotal: Set(totals.subtotal),
            tax: Set(totals.tax),
            shipping: Set(totals.shipping),
            total: Set(totals.total),
            customer_name: Set(request.customer_name.clone()),
            email: Set(request.email.clone()),
            phone: Set(request.phone.clone()),
            shipping_address: Set(shipping_address),
            billing_address: Set(billing_address),
            notes: Set(request.notes.clone()),
            shipping_method_id: Set(request.shipping_method_id),
            is_multi_vendor: Set(stores.len() > 1),
            authorization_url: Set(None),
            authorization_reference: Set(None),
            confirmed_at: Set(None),
            processing_at: Set(None),
            dispatched_at: Set(None),
            delivered_at: Set(None),
            cancelled_at: Set(None),
            refunded_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let mut items = Vec::with_capacity(cart.lines.len());
        for line in &cart.lines {
            stock_ledger::reserve(&txn, line.stock_target(), line.quantity).await?;

            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order.id),
                store_id: Set(line.store_id),
                product_id: Set(line.product_id),
                variant_id: Set(line.variant_id),
                quantity: Set(line.quantity),
                unit_price: Set(line.unit_price),
                total_price: Set(line.total_price()),
                status: Set(FulfillmentStatus::Pending),
                stock_released: Set(false),
                confirmed_at: Set(None),
                processing_at: Set(None),
                shipped_at: Set(None),
                delivered_at: Set(None),
                cancelled_at: Set(None),
                refunded_at: Set(None),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(&txn)
            .await?;
            items.push(item);
        }

        clear_cart(&txn, buyer.user_id).await?;
        db::commit(txn).await?;

        info!(
            order_id = %order.id,
            order_number = %order.order_number,
            items = items.len(),
            stores = stores.len(),
            total = order.total,
            "order assembled"
        );

        Ok(AssembledOrder { order, items })
    }

    /// Full checkout: assemble, announce, then initialize payment.
    ///
    /// A gateway failure leaves the order pending with its stock reserved;
    /// the buyer retries through payment initialization.
    #[instrument(skip(self, request), fields(buyer_id = %buyer.user_id))]
    pub async fn checkout(
        &self,
        buyer: Buyer,
        request: CheckoutRequest,
    ) -> Result<CheckoutResponse, ServiceError> {
        request.validate()?;
        counter!("marketplace.checkout.started", 1);

        let assembled = match self.assemble(buyer, &request).await {
            Ok(assembled) => assembled,
            Err(e) => {
                counter!("marketplace.checkout.rejected", 1);
                warn!(error = %e, "checkout rejected");
                return Err(e);
            }
        };
        counter!("marketplace.checkout.completed", 1);

        let order = &assembled.order;
        self.notifier
            .notify(Event::OrderPlaced {
                order_id: order.id,
                order_number: order.order_number.clone(),
                buyer_id: order.buyer_id,
                total: order.total,
                currency: order.currency.clone(),
            })
            .await;

        let PaymentInit {
            authorization_url,
            reference,
            ..
        } = self
            .payments
            .initialize_for_order(order, &assembled.items, request.payment_method.as_deref())
            .await
            .map_err(|e| match e {
                ServiceError::GatewayError(msg) => ServiceError::GatewayError(format!(
                    "{}; order {} was saved and payment can be retried",
                    msg, order.id
                )),
                other => other,
            })?;

        Ok(CheckoutResponse {
            order_id: order.id,
            order_number: order.order_number.clone(),
            authorization_url,
            reference,
            total: order.total,
            currency: order.currency.clone(),
            is_multi_vendor: order.is_multi_vendor,
        })
    }
}
