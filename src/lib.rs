//! Marketplace API Library
//!
//! Multi-vendor checkout, split payment and per-item fulfillment over
//! axum and sea-orm.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod openapi;
pub mod services;
pub mod tracing;

use axum::{
    extract::FromRef,
    middleware,
    response::Json,
    routing::{get, post, put},
    Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::sync::Arc;
use tower_http::{compression::CompressionLayer, cors::CorsLayer};
use utoipa::ToSchema;

use crate::auth::AuthService;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<config::AppConfig>,
    pub event_sender: events::EventSender,
    pub auth: Arc<AuthService>,
    pub services: handlers::AppServices,
}

impl FromRef<AppState> for Arc<AuthService> {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            meta: Some(ResponseMeta::capture()),
        }
    }
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

/// Routes served under `/api/v1`
pub fn api_v1_routes() -> Router<AppState> {
    let cart = Router::new()
        .route(
            "/cart",
            get(handlers::cart::get_cart).delete(handlers::cart::clear_cart),
        )
        .route("/cart/items", post(handlers::cart::add_item))
        .route(
            "/cart/items/:id",
            put(handlers::cart::update_item).delete(handlers::cart::remove_item),
        );

    let orders = Router::new()
        .route("/checkout", post(handlers::checkout::checkout))
        .route("/orders", get(handlers::orders::list_orders))
        .route("/orders/:id", get(handlers::orders::get_order))
        .route("/orders/:id/timeline", get(handlers::orders::order_timeline))
        .route("/orders/:id/cancel", put(handlers::orders::cancel_order))
        .route(
            "/orders/:id/payment",
            post(handlers::orders::initialize_payment),
        );

    let order_items = Router::new()
        .route(
            "/order-items/:id/accept",
            put(handlers::order_items::accept_item),
        )
        .route(
            "/order-items/:id/reject",
            put(handlers::order_items::reject_item),
        )
        .route(
            "/order-items/:id/process",
            put(handlers::order_items::process_item),
        )
        .route(
            "/order-items/:id/dispatch",
            put(handlers::order_items::dispatch_item),
        )
        .route(
            "/order-items/:id/delivered",
            put(handlers::order_items::mark_delivered),
        )
        .route(
            "/order-items/:id/refund",
            put(handlers::order_items::refund_item),
        );

    let store = Router::new()
        .route(
            "/store/orders/:id/accept",
            put(handlers::store::accept_store_order),
        )
        .route(
            "/store/orders/:id/reject",
            put(handlers::store::reject_store_order),
        )
        .route(
            "/store/order-items",
            get(handlers::store::list_store_items),
        )
        .route(
            "/store/order-items/:id",
            get(handlers::store::get_store_item),
        );

    let payments = Router::new().route(
        "/payments/:id/release-escrow",
        put(handlers::payments::release_escrow),
    );

    // Payment webhook (does not require auth, but signature-verified)
    let payment_webhook = Router::new().route(
        "/webhook/payment",
        post(handlers::webhook::payment_webhook),
    );

    Router::new()
        .merge(cart)
        .merge(orders)
        .merge(order_items)
        .merge(store)
        .merge(payments)
        .merge(payment_webhook)
}

/// The full application: probes, versioned API, docs and the HTTP layers.
pub fn app_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);

    Router::new()
        .merge(handlers::health::health_routes())
        .nest("/api/v1", api_v1_routes())
        .merge(openapi::swagger_ui())
        .layer(crate::tracing::configure_http_tracing())
        .layer(middleware::from_fn(
            middleware_helpers::request_id_middleware,
        ))
        .layer(CompressionLayer::new())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(config: &config::AppConfig) -> CorsLayer {
    let origins: Vec<axum::http::HeaderValue> = config
        .cors_origins()
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    if origins.is_empty() {
        // Only reachable outside production; validation rejects it there.
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([
                axum::http::Method::GET,
                axum::http::Method::POST,
                axum::http::Method::PUT,
                axum::http::Method::DELETE,
            ])
            .allow_headers([
                axum::http::header::AUTHORIZATION,
                axum::http::header::CONTENT_TYPE,
            ])
    }
}

#[cfg(test)]
mod response_tests {
    use super::*;
    use chrono::DateTime;

    #[tokio::test]
    async fn success_response_includes_request_metadata() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("meta-123"), async {
                ApiResponse::success("ok")
            })
            .await;

        let meta = response.meta.expect("metadata expected");
        assert_eq!(meta.request_id.as_deref(), Some("meta-123"));
        DateTime::parse_from_rfc3339(&meta.timestamp).expect("timestamp should parse");
    }

    #[test]
    fn response_outside_a_request_has_no_request_id() {
        let response = ApiResponse::success(1);
        assert!(response.meta.and_then(|m| m.request_id).is_none());
    }
}
