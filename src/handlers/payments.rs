use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::handlers::AppState;
use crate::services::payment_split::EscrowRelease;
use crate::{ApiResponse, ApiResult};

/// Release a settled escrow payment to its vendors
#[utoipa::path(
    put,
    path = "/api/v1/payments/{id}/release-escrow",
    params(("id" = Uuid, Path, description = "Payment ID")),
    responses(
        (status = 200, description = "Escrow released", body = ApiResponse<EscrowRelease>),
        (status = 403, description = "Platform capability required", body = crate::errors::ErrorResponse),
        (status = 404, description = "Payment not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Payment unpaid, not escrowed or already released", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn release_escrow(
    State(state): State<AppState>,
    user: AuthUser,
    Path(payment_id): Path<Uuid>,
) -> ApiResult<EscrowRelease> {
    let release = state
        .services
        .payments
        .release_escrow(user.platform()?, payment_id)
        .await?;
    Ok(Json(ApiResponse::success(release)))
}
