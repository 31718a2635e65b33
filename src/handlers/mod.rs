pub mod cart;
pub mod checkout;
pub mod health;
pub mod order_items;
pub mod orders;
pub mod payments;
pub mod store;
pub mod webhook;

use sea_orm::DatabaseConnection;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::services::{
    cart::CartService,
    checkout::{CheckoutService, TaxPolicy},
    fulfillment::FulfillmentService,
    notifications::OrderNotifier,
    orders::OrderQueryService,
    payment_split::{PaymentGateway, PaymentService},
    webhook::WebhookService,
};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub cart: Arc<CartService>,
    pub checkout: Arc<CheckoutService>,
    pub payments: Arc<PaymentService>,
    pub fulfillment: Arc<FulfillmentService>,
    pub webhook: Arc<WebhookService>,
    pub orders: Arc<OrderQueryService>,
}

impl AppServices {
    /// Wires every service over one connection pool, payment gateway and notifier.
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: &AppConfig,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn OrderNotifier>,
    ) -> Self {
        let payments = PaymentService::new(
            db.clone(),
            gateway,
            notifier.clone(),
            config.default_payment_method.clone(),
            config.payment_gateway.callback_url.clone(),
        );
        let checkout = CheckoutService::new(
            db.clone(),
            payments.clone(),
            notifier.clone(),
            TaxPolicy::new(config.tax_rate_bps),
        );
        let webhook = WebhookService::new(
            db.clone(),
            notifier.clone(),
            config.payment_gateway.webhook_signing_secret(),
        );

        Self {
            cart: Arc::new(CartService::new(db.clone())),
            checkout: Arc::new(checkout),
            payments: Arc::new(payments),
            fulfillment: Arc::new(FulfillmentService::new(db.clone(), notifier)),
            webhook: Arc::new(webhook),
            orders: Arc::new(OrderQueryService::new(db)),
        }
    }
}
