use axum::{extract::State, http::StatusCode, Json};

use crate::auth::AuthUser;
use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::checkout::{CheckoutRequest, CheckoutResponse};
use crate::ApiResponse;

/// Turn the buyer's cart into an order and start payment
#[utoipa::path(
    post,
    path = "/api/v1/checkout",
    request_body = CheckoutRequest,
    responses(
        (status = 201, description = "Order placed; redirect the buyer to authorization_url", body = ApiResponse<CheckoutResponse>),
        (status = 400, description = "Malformed request", body = crate::errors::ErrorResponse),
        (status = 409, description = "Insufficient stock", body = crate::errors::ErrorResponse),
        (status = 422, description = "Cart lines rejected; every reason is listed", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment gateway failed; the order was kept", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Checkout"
)]
pub async fn checkout(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CheckoutResponse>>), ServiceError> {
    let response = state
        .services
        .checkout
        .checkout(user.buyer(), request)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(response))))
}
