use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::cart::{AddCartItem, CartView, UpdateCartItem};
use crate::{ApiResponse, ApiResult};

/// Get the buyer's cart
#[utoipa::path(
    get,
    path = "/api/v1/cart",
    responses(
        (status = 200, description = "Current cart", body = ApiResponse<CartView>),
        (status = 401, description = "Missing or invalid token", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn get_cart(State(state): State<AppState>, user: AuthUser) -> ApiResult<CartView> {
    let cart = state.services.cart.get_cart(user.buyer()).await?;
    Ok(Json(ApiResponse::success(cart)))
}

/// Add a product (or one of its variants) to the cart
#[utoipa::path(
    post,
    path = "/api/v1/cart/items",
    request_body = AddCartItem,
    responses(
        (status = 201, description = "Item added", body = ApiResponse<CartView>),
        (status = 400, description = "Invalid quantity or variant", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown product", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn add_item(
    State(state): State<AppState>,
    user: AuthUser,
    Json(input): Json<AddCartItem>,
) -> Result<(StatusCode, Json<ApiResponse<CartView>>), ServiceError> {
    let cart = state.services.cart.add_item(user.buyer(), input).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(cart))))
}

/// Change the quantity of a cart line
#[utoipa::path(
    put,
    path = "/api/v1/cart/items/{id}",
    params(("id" = Uuid, Path, description = "Cart item ID")),
    request_body = UpdateCartItem,
    responses(
        (status = 200, description = "Quantity updated", body = ApiResponse<CartView>),
        (status = 404, description = "Not in this buyer's cart", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn update_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(item_id): Path<Uuid>,
    Json(input): Json<UpdateCartItem>,
) -> ApiResult<CartView> {
    let cart = state
        .services
        .cart
        .update_item_quantity(user.buyer(), item_id, input)
        .await?;
    Ok(Json(ApiResponse::success(cart)))
}

/// Remove a cart line
#[utoipa::path(
    delete,
    path = "/api/v1/cart/items/{id}",
    params(("id" = Uuid, Path, description = "Cart item ID")),
    responses(
        (status = 200, description = "Item removed", body = ApiResponse<CartView>),
        (status = 404, description = "Not in this buyer's cart", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn remove_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(item_id): Path<Uuid>,
) -> ApiResult<CartView> {
    let cart = state
        .services
        .cart
        .remove_item(user.buyer(), item_id)
        .await?;
    Ok(Json(ApiResponse::success(cart)))
}

/// Empty the cart
#[utoipa::path(
    delete,
    path = "/api/v1/cart",
    responses((status = 204, description = "Cart emptied")),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn clear_cart(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<StatusCode, ServiceError> {
    state.services.cart.clear(user.buyer()).await?;
    Ok(StatusCode::NO_CONTENT)
}
