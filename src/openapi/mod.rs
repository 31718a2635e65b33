use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

/// Registers the bearer JWT scheme referenced by `security(("bearer_auth" = []))`.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Marketplace API",
        version = "0.1.0",
        description = r#"
# Marketplace Checkout & Fulfillment API

Multi-vendor checkout with split payments and per-item fulfillment.

## Flow

1. Buyers fill a cart and check out. Stock for every line is reserved in the same
   transaction that creates the order.
2. The response carries a gateway `authorization_url`; payment settles through the
   signed `/webhook/payment` callback.
3. Each vendor moves its own items through `pending → confirmed → processing →
   shipped`; the buyer confirms delivery. The order status is always derived from
   its items.

## Authentication

Send a bearer JWT. `sub` is the user id, `store_id` identifies a vendor's store and
the `admin` role grants platform operations (escrow release and refunds).

```
Authorization: Bearer <your-jwt-token>
```

## Money

All amounts are integer minor currency units (kobo, cents).
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Cart", description = "Buyer cart maintenance"),
        (name = "Checkout", description = "Order placement"),
        (name = "Orders", description = "Buyer order reads, cancellation and payment retry"),
        (name = "Fulfillment", description = "Per-item lifecycle transitions"),
        (name = "Store", description = "Vendor views and bulk actions"),
        (name = "Payments", description = "Escrow and gateway callbacks"),
        (name = "Health", description = "Health check endpoints")
    ),
    paths(
        // Cart
        crate::handlers::cart::get_cart,
        crate::handlers::cart::add_item,
        crate::handlers::cart::update_item,
        crate::handlers::cart::remove_item,
        crate::handlers::cart::clear_cart,

        // Checkout
        crate::handlers::checkout::checkout,

        // Orders
        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::order_timeline,
        crate::handlers::orders::cancel_order,
        crate::handlers::orders::initialize_payment,

        // Fulfillment
        crate::handlers::order_items::accept_item,
        crate::handlers::order_items::reject_item,
        crate::handlers::order_items::process_item,
        crate::handlers::order_items::dispatch_item,
        crate::handlers::order_items::mark_delivered,
        crate::handlers::order_items::refund_item,

        // Store
        crate::handlers::store::accept_store_order,
        crate::handlers::store::reject_store_order,
        crate::handlers::store::list_store_items,
        crate::handlers::store::get_store_item,

        // Payments
        crate::handlers::payments::release_escrow,
        crate::handlers::webhook::payment_webhook,

        // Health
        crate::handlers::health::liveness_check,
        crate::handlers::health::status_check,
    ),
    components(
        schemas(
            crate::ResponseMeta,
            crate::entities::FulfillmentStatus,
            crate::entities::PaymentStatus,
            crate::services::checkout::Address,
            crate::services::checkout::CheckoutRequest,
            crate::services::checkout::CheckoutResponse,
            crate::services::cart::AddCartItem,
            crate::services::cart::UpdateCartItem,
            crate::services::cart::CartView,
            crate::services::cart::CartLineView,
            crate::services::fulfillment::FulfillmentUpdate,
            crate::services::fulfillment::ItemChange,
            crate::services::orders::OrderSummary,
            crate::services::orders::OrderView,
            crate::services::orders::OrderItemView,
            crate::services::orders::PaymentView,
            crate::services::orders::TimelineEntry,
            crate::services::payment_split::PaymentInit,
            crate::services::payment_split::EscrowRelease,
            crate::services::webhook::WebhookOutcome,
            crate::handlers::orders::RetryPaymentRequest,
            crate::handlers::webhook::WebhookAck,
            crate::handlers::health::StatusResponse,
            crate::handlers::health::ComponentHealth,
            crate::handlers::health::ComponentStatus,
            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDocV1;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_generation() {
        let openapi = ApiDocV1::openapi();
        let json = serde_json::to_string_pretty(&openapi).unwrap();
        assert!(json.contains("Marketplace API"));
        assert!(json.contains("/api/v1/checkout"));
        assert!(json.contains("/api/v1/order-items/{id}/dispatch"));
        assert!(json.contains("bearer_auth"));
    }
}
