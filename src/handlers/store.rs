use axum::{
    extract::{Path, Query, State},
    Json,
};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::handlers::AppState;
use crate::services::fulfillment::FulfillmentUpdate;
use crate::services::orders::{OrderItemView, Page, StoreItemFilter};
use crate::{ApiResponse, ApiResult};

/// Accept every pending item of an order that belongs to the caller's store
#[utoipa::path(
    put,
    path = "/api/v1/store/orders/{id}/accept",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Store items confirmed", body = ApiResponse<FulfillmentUpdate>),
        (status = 404, description = "Store has no items on this order", body = crate::errors::ErrorResponse),
        (status = 409, description = "No store item can be accepted", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Store"
)]
pub async fn accept_store_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
) -> ApiResult<FulfillmentUpdate> {
    let update = state
        .services
        .fulfillment
        .accept_store_order(user.vendor()?, order_id)
        .await?;
    Ok(Json(ApiResponse::success(update)))
}

/// Reject every open item of an order that belongs to the caller's store
#[utoipa::path(
    put,
    path = "/api/v1/store/orders/{id}/reject",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Store items cancelled", body = ApiResponse<FulfillmentUpdate>),
        (status = 404, description = "Store has no items on this order", body = crate::errors::ErrorResponse),
        (status = 409, description = "No store item can be rejected", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Store"
)]
pub async fn reject_store_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
) -> ApiResult<FulfillmentUpdate> {
    let update = state
        .services
        .fulfillment
        .reject_store_order(user.vendor()?, order_id)
        .await?;
    Ok(Json(ApiResponse::success(update)))
}

/// Items sold by the caller's store
#[utoipa::path(
    get,
    path = "/api/v1/store/order-items",
    params(StoreItemFilter),
    responses(
        (status = 200, description = "Store items, newest first", body = ApiResponse<Page<OrderItemView>>),
        (status = 403, description = "User does not operate a store", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Store"
)]
pub async fn list_store_items(
    State(state): State<AppState>,
    user: AuthUser,
    Query(filter): Query<StoreItemFilter>,
) -> ApiResult<Page<OrderItemView>> {
    let page = state
        .services
        .orders
        .list_store_items(user.vendor()?, filter)
        .await?;
    Ok(Json(ApiResponse::success(page)))
}

/// One item sold by the caller's store
#[utoipa::path(
    get,
    path = "/api/v1/store/order-items/{id}",
    params(("id" = Uuid, Path, description = "Order item ID")),
    responses(
        (status = 200, description = "Store item", body = ApiResponse<OrderItemView>),
        (status = 403, description = "Item belongs to another store", body = crate::errors::ErrorResponse),
        (status = 404, description = "Item not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Store"
)]
pub async fn get_store_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(item_id): Path<Uuid>,
) -> ApiResult<OrderItemView> {
    let item = state
        .services
        .orders
        .get_store_item(user.vendor()?, item_id)
        .await?;
    Ok(Json(ApiResponse::success(item)))
}
