use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::handlers::AppState;
use crate::services::fulfillment::FulfillmentUpdate;
use crate::{ApiResponse, ApiResult};

/// Vendor accepts a pending item
#[utoipa::path(
    put,
    path = "/api/v1/order-items/{id}/accept",
    params(("id" = Uuid, Path, description = "Order item ID")),
    responses(
        (status = 200, description = "Item confirmed", body = ApiResponse<FulfillmentUpdate>),
        (status = 403, description = "Item belongs to another store", body = crate::errors::ErrorResponse),
        (status = 409, description = "Item is not pending", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Fulfillment"
)]
pub async fn accept_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(item_id): Path<Uuid>,
) -> ApiResult<FulfillmentUpdate> {
    let update = state
        .services
        .fulfillment
        .accept(user.vendor()?, item_id)
        .await?;
    Ok(Json(ApiResponse::success(update)))
}

/// Vendor rejects a pending or confirmed item; its stock is released
#[utoipa::path(
    put,
    path = "/api/v1/order-items/{id}/reject",
    params(("id" = Uuid, Path, description = "Order item ID")),
    responses(
        (status = 200, description = "Item cancelled", body = ApiResponse<FulfillmentUpdate>),
        (status = 403, description = "Item belongs to another store", body = crate::errors::ErrorResponse),
        (status = 409, description = "Item can no longer be rejected", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Fulfillment"
)]
pub async fn reject_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(item_id): Path<Uuid>,
) -> ApiResult<FulfillmentUpdate> {
    let update = state
        .services
        .fulfillment
        .reject(user.vendor()?, item_id)
        .await?;
    Ok(Json(ApiResponse::success(update)))
}

/// Vendor starts preparing a confirmed item
#[utoipa::path(
    put,
    path = "/api/v1/order-items/{id}/process",
    params(("id" = Uuid, Path, description = "Order item ID")),
    responses(
        (status = 200, description = "Item processing", body = ApiResponse<FulfillmentUpdate>),
        (status = 409, description = "Item is not confirmed", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Fulfillment"
)]
pub async fn process_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(item_id): Path<Uuid>,
) -> ApiResult<FulfillmentUpdate> {
    let update = state
        .services
        .fulfillment
        .start_processing(user.vendor()?, item_id)
        .await?;
    Ok(Json(ApiResponse::success(update)))
}

/// Vendor ships a confirmed or processing item
#[utoipa::path(
    put,
    path = "/api/v1/order-items/{id}/dispatch",
    params(("id" = Uuid, Path, description = "Order item ID")),
    responses(
        (status = 200, description = "Item shipped", body = ApiResponse<FulfillmentUpdate>),
        (status = 409, description = "Item cannot ship from its current status", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Fulfillment"
)]
pub async fn dispatch_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(item_id): Path<Uuid>,
) -> ApiResult<FulfillmentUpdate> {
    let update = state
        .services
        .fulfillment
        .dispatch(user.vendor()?, item_id)
        .await?;
    Ok(Json(ApiResponse::success(update)))
}

/// Buyer confirms a shipped item arrived
#[utoipa::path(
    put,
    path = "/api/v1/order-items/{id}/delivered",
    params(("id" = Uuid, Path, description = "Order item ID")),
    responses(
        (status = 200, description = "Item delivered", body = ApiResponse<FulfillmentUpdate>),
        (status = 403, description = "Order belongs to another buyer", body = crate::errors::ErrorResponse),
        (status = 409, description = "Item is not shipped", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Fulfillment"
)]
pub async fn mark_delivered(
    State(state): State<AppState>,
    user: AuthUser,
    Path(item_id): Path<Uuid>,
) -> ApiResult<FulfillmentUpdate> {
    let update = state
        .services
        .fulfillment
        .mark_delivered(user.buyer(), item_id)
        .await?;
    Ok(Json(ApiResponse::success(update)))
}

/// Platform refunds a shipped, delivered or cancelled item
#[utoipa::path(
    put,
    path = "/api/v1/order-items/{id}/refund",
    params(("id" = Uuid, Path, description = "Order item ID")),
    responses(
        (status = 200, description = "Item refunded", body = ApiResponse<FulfillmentUpdate>),
        (status = 403, description = "Platform capability required", body = crate::errors::ErrorResponse),
        (status = 409, description = "Item cannot be refunded from its current status", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Fulfillment"
)]
pub async fn refund_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(item_id): Path<Uuid>,
) -> ApiResult<FulfillmentUpdate> {
    let update = state
        .services
        .fulfillment
        .refund_item(user.platform()?, item_id)
        .await?;
    Ok(Json(ApiResponse::success(update)))
}
