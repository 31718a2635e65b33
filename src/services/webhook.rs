//! Webhook Reconciler
//!
//! Applies gateway charge notifications to payments and orders. Delivery is
//! at-least-once, so every write is conditional on the state it moves away
//! from and a replayed event changes nothing.

use chrono::Utc;
use hmac::{Hmac, Mac};
use metrics::counter;
use sea_orm::{
    sea_query::Expr, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QuerySelect,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;

use crate::db;
use crate::entities::{order, payment_details, FulfillmentStatus, PaymentStatus};
use crate::errors::ServiceError;
use crate::events::Event;
use crate::services::notifications::OrderNotifier;

type HmacSha512 = Hmac<Sha512>;

/// Header carrying the hex HMAC-SHA512 of the raw body.
pub const SIGNATURE_HEADER: &str = "x-signature";
/// Header name used by Paystack itself.
pub const PAYSTACK_SIGNATURE_HEADER: &str = "x-paystack-signature";

/// Checks `signature` (hex) against the HMAC-SHA512 of `payload`.
pub fn verify_signature(secret: &str, payload: &[u8], signature: &str) -> Result<(), ServiceError> {
    let expected = hex::decode(signature.trim()).map_err(|_| ServiceError::InvalidSignature)?;
    let mut mac = HmacSha512::new_from_slice(secret.as_bytes())
        .map_err(|e| ServiceError::InternalError(format!("hmac key: {}", e)))?;
    mac.update(payload);
    mac.verify_slice(&expected)
        .map_err(|_| ServiceError::InvalidSignature)
}

/// Hex HMAC-SHA512 of `payload`, as the gateway would send it.
pub fn sign(secret: &str, payload: &[u8]) -> Result<String, ServiceError> {
    let mut mac = HmacSha512::new_from_slice(secret.as_bytes())
        .map_err(|e| ServiceError::InternalError(format!("hmac key: {}", e)))?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ChargeData {
    reference: String,
    /// Gateway transaction id; numeric at Paystack
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    gateway_response: Option<String>,
    #[serde(default)]
    fees: Option<i64>,
}

impl ChargeData {
    fn transaction_id(&self) -> Option<String> {
        match &self.id {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// What a delivery did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    Applied,
    /// Settled, but the order had been cancelled; the money must go back.
    AppliedToCancelledOrder,
    AlreadyApplied,
    UnknownReference,
    Ignored,
}

impl WebhookOutcome {
    fn label(self) -> &'static str {
        match self {
            WebhookOutcome::Applied => "applied",
            WebhookOutcome::AppliedToCancelledOrder => "applied_to_cancelled_order",
            WebhookOutcome::AlreadyApplied => "already_applied",
            WebhookOutcome::UnknownReference => "unknown_reference",
            WebhookOutcome::Ignored => "ignored",
        }
    }
}

#[derive(Clone)]
pub struct WebhookService {
    db: Arc<DatabaseConnection>,
    notifier: Arc<dyn OrderNotifier>,
    secret: String,
}

impl WebhookService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        notifier: Arc<dyn OrderNotifier>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            db,
            notifier,
            secret: secret.into(),
        }
    }

    /// Verifies and applies one delivery.
    ///
    /// Only a bad or missing signature is an error; anything else is
    /// acknowledged so the gateway stops retrying.
    #[instrument(skip(self, payload, signature), fields(bytes = payload.len()))]
    pub async fn handle(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome, ServiceError> {
        let Some(signature) = signature else {
            warn!("webhook delivered without signature");
            counter!("marketplace.webhook.rejected", 1);
            return Err(ServiceError::InvalidSignature);
        };
        if let Err(e) = verify_signature(&self.secret, payload, signature) {
            warn!("webhook signature mismatch");
            counter!("marketplace.webhook.rejected", 1);
            return Err(e);
        }

        let envelope: Envelope = match serde_json::from_slice(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "unreadable webhook payload");
                return Ok(self.record(WebhookOutcome::Ignored, "unparsed"));
            }
        };

        let outcome = match envelope.event.as_str() {
            "charge.success" | "charge.failed" => {
                match serde_json::from_value::<ChargeData>(envelope.data) {
                    Ok(data) if envelope.event == "charge.success" => {
                        self.apply_success(&data).await?
                    }
                    Ok(data) => self.apply_failure(&data).await?,
                    Err(e) => {
                        warn!(event = %envelope.event, error = %e, "charge event without reference");
                        WebhookOutcome::Ignored
                    }
                }
            }
            other => {
                info!(event = %other, "unhandled webhook event");
                WebhookOutcome::Ignored
            }
        };

        Ok(self.record(outcome, &envelope.event))
    }

    fn record(&self, outcome: WebhookOutcome, event: &str) -> WebhookOutcome {
        counter!(
            "marketplace.webhook.events",
            1,
            "outcome" => outcome.label(),
            "event" => event.to_string()
        );
        outcome
    }

    async fn find_payment(
        &self,
        reference: &str,
    ) -> Result<Option<payment_details::Model>, ServiceError> {
        Ok(payment_details::Entity::find()
            .filter(payment_details::Column::ExternalReference.eq(reference))
            .one(&*self.db)
            .await?)
    }

    #[instrument(skip(self, data), fields(reference = %data.reference))]
    async fn apply_success(&self, data: &ChargeData) -> Result<WebhookOutcome, ServiceError> {
        let Some(payment) = self.find_payment(&data.reference).await? else {
            warn!("charge.success for unknown reference");
            return Ok(WebhookOutcome::UnknownReference);
        };

        let now = Utc::now();
        let txn = self.db.begin().await?;

        // Locked so the expiry sweep cannot cancel the order underneath us.
        let order = order::Entity::find_by_id(payment.order_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", payment.order_id)))?;
        let order_cancelled = order.status == FulfillmentStatus::Cancelled;

        let mut update = payment_details::Entity::update_many()
            .col_expr(payment_details::Column::Status, Expr::value(PaymentStatus::Paid))
            .col_expr(payment_details::Column::UpdatedAt, Expr::value(now));
        if let Some(id) = data.transaction_id() {
            update = update.col_expr(
                payment_details::Column::ExternalTransactionId,
                Expr::value(Some(id)),
            );
        }
        if let Some(response) = &data.gateway_response {
            update = update.col_expr(
                payment_details::Column::GatewayResponse,
                Expr::value(Some(response.clone())),
            );
        }
        if let Some(fees) = data.fees.filter(|fees| *fees >= 0) {
            update = update
                .col_expr(payment_details::Column::Fees, Expr::value(fees))
                .col_expr(
                    payment_details::Column::NetAmount,
                    Expr::value(payment.amount - fees),
                );
        }
        let result = update
            .filter(payment_details::Column::Id.eq(payment.id))
            .filter(payment_details::Column::Status.ne(PaymentStatus::Paid))
            .filter(payment_details::Column::Status.ne(PaymentStatus::Refunded))
            .exec(&txn)
            .await?;

        if result.rows_affected == 0 {
            info!(payment_id = %payment.id, "charge.success already applied");
            return Ok(WebhookOutcome::AlreadyApplied);
        }

        order::Entity::update_many()
            .col_expr(order::Column::PaymentStatus, Expr::value(PaymentStatus::Paid))
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::Id.eq(payment.order_id))
            .filter(order::Column::PaymentStatus.ne(PaymentStatus::Paid))
            .filter(order::Column::PaymentStatus.ne(PaymentStatus::Refunded))
            .exec(&txn)
            .await?;

        db::commit(txn).await?;

        // The order stays cancelled; its stock has already been released.
        if order_cancelled {
            error!(
                payment_id = %payment.id,
                order_id = %payment.order_id,
                amount = payment.amount,
                "payment settled for a cancelled order; refund required"
            );
            counter!("marketplace.webhook.refund_required", 1);
            self.notifier
                .notify(Event::RefundRequired {
                    order_id: payment.order_id,
                    payment_id: payment.id,
                    reference: payment.external_reference,
                    amount: payment.amount,
                })
                .await;
            return Ok(WebhookOutcome::AppliedToCancelledOrder);
        }

        info!(payment_id = %payment.id, order_id = %payment.order_id, "payment settled");
        self.notifier
            .notify(Event::PaymentSucceeded {
                order_id: payment.order_id,
                payment_id: payment.id,
                reference: payment.external_reference,
            })
            .await;
        Ok(WebhookOutcome::Applied)
    }

    #[instrument(skip(self, data), fields(reference = %data.reference))]
    async fn apply_failure(&self, data: &ChargeData) -> Result<WebhookOutcome, ServiceError> {
        let Some(payment) = self.find_payment(&data.reference).await? else {
            warn!("charge.failed for unknown reference");
            return Ok(WebhookOutcome::UnknownReference);
        };

        let now = Utc::now();
        let txn = self.db.begin().await?;

        let mut update = payment_details::Entity::update_many()
            .col_expr(payment_details::Column::Status, Expr::value(PaymentStatus::Failed))
            .col_expr(payment_details::Column::UpdatedAt, Expr::value(now));
        if let Some(response) = &data.gateway_response {
            update = update.col_expr(
                payment_details::Column::GatewayResponse,
                Expr::value(Some(response.clone())),
            );
        }
        // A late failure never overrides a settled payment.
        let result = update
            .filter(payment_details::Column::Id.eq(payment.id))
            .filter(payment_details::Column::Status.eq(PaymentStatus::Pending))
            .exec(&txn)
            .await?;

        if result.rows_affected == 0 {
            info!(payment_id = %payment.id, status = %payment.status, "charge.failed not applicable");
            return Ok(WebhookOutcome::AlreadyApplied);
        }

        order::Entity::update_many()
            .col_expr(order::Column::PaymentStatus, Expr::value(PaymentStatus::Failed))
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::Id.eq(payment.order_id))
            .filter(order::Column::PaymentStatus.eq(PaymentStatus::Pending))
            .exec(&txn)
            .await?;

        db::commit(txn).await?;
        warn!(payment_id = %payment.id, order_id = %payment.order_id, "payment failed");

        self.notifier
            .notify(Event::PaymentFailed {
                order_id: payment.order_id,
                payment_id: payment.id,
                reference: payment.external_reference,
            })
            .await;
        Ok(WebhookOutcome::Applied)
    }
}
