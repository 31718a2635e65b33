// Catalog-side primitives
pub mod cart;
pub mod cart_validator;
pub mod stock_ledger;

// Order placement and payment
pub mod checkout;
pub mod gateway;
pub mod payment_split;
pub mod webhook;

// Post-placement lifecycle
pub mod fulfillment;
pub mod orders;

pub mod notifications;
