use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::handlers::AppState;
use crate::services::fulfillment::FulfillmentUpdate;
use crate::services::orders::{OrderFilter, OrderSummary, OrderView, Page, TimelineEntry};
use crate::services::payment_split::PaymentInit;
use crate::{ApiResponse, ApiResult};

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct RetryPaymentRequest {
    /// Payment method to record; defaults to the configured one
    pub payment_method: Option<String>,
}

/// List the buyer's orders
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    params(OrderFilter),
    responses(
        (status = 200, description = "Orders, newest first", body = ApiResponse<Page<OrderSummary>>),
        (status = 401, description = "Missing or invalid token", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(filter): Query<OrderFilter>,
) -> ApiResult<Page<OrderSummary>> {
    let page = state
        .services
        .orders
        .list_buyer_orders(user.buyer(), filter)
        .await?;
    Ok(Json(ApiResponse::success(page)))
}

/// Get an order as its buyer, or as a vendor with items on it
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order details", body = ApiResponse<OrderView>),
        (status = 403, description = "Not the buyer or a vendor on the order", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
) -> ApiResult<OrderView> {
    let order = state
        .services
        .orders
        .get_order(user.viewer(), order_id)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

/// Status history of an order
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}/timeline",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Stamped statuses, oldest first", body = ApiResponse<Vec<TimelineEntry>>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn order_timeline(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
) -> ApiResult<Vec<TimelineEntry>> {
    let timeline = state
        .services
        .orders
        .order_timeline(user.viewer(), order_id)
        .await?;
    Ok(Json(ApiResponse::success(timeline)))
}

/// Cancel an order before any of it is processed
#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}/cancel",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order cancelled and stock released", body = ApiResponse<FulfillmentUpdate>),
        (status = 403, description = "Order belongs to another buyer", body = crate::errors::ErrorResponse),
        (status = 409, description = "An item has already moved past confirmation", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
) -> ApiResult<FulfillmentUpdate> {
    let update = state
        .services
        .fulfillment
        .cancel_order(user.buyer(), order_id)
        .await?;
    Ok(Json(ApiResponse::success(update)))
}

/// Start a new payment attempt for an unpaid order
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/payment",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body(content = Option<RetryPaymentRequest>, description = "Optional payment method"),
    responses(
        (status = 200, description = "Payment initialized", body = ApiResponse<PaymentInit>),
        (status = 409, description = "Order is cancelled or already paid", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment gateway failed", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn initialize_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
    body: Option<Json<RetryPaymentRequest>>,
) -> ApiResult<PaymentInit> {
    let Json(request) = body.unwrap_or_default();
    let init = state
        .services
        .payments
        .initialize_payment(user.buyer(), order_id, request.payment_method)
        .await?;
    Ok(Json(ApiResponse::success(init)))
}
