use axum::{extract::State, http::HeaderMap, Json};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::webhook::{WebhookOutcome, PAYSTACK_SIGNATURE_HEADER, SIGNATURE_HEADER};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WebhookAck {
    pub status: String,
    pub outcome: WebhookOutcome,
}

fn signature(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(SIGNATURE_HEADER)
        .or_else(|| headers.get(PAYSTACK_SIGNATURE_HEADER))
        .and_then(|value| value.to_str().ok())
}

// POST /api/v1/webhook/payment
#[utoipa::path(
    post,
    path = "/api/v1/webhook/payment",
    request_body = String,
    responses(
        (status = 200, description = "Webhook accepted", body = WebhookAck),
        (status = 401, description = "Missing or invalid signature", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ServiceError> {
    let outcome = state
        .services
        .webhook
        .handle(&body, signature(&headers))
        .await?;
    Ok(Json(WebhookAck {
        status: "success".to_string(),
        outcome,
    }))
}
