use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::entities::FulfillmentStatus;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Things that happened to an order that someone may want to hear about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    OrderPlaced {
        order_id: Uuid,
        order_number: String,
        buyer_id: Uuid,
        total: i64,
        currency: String,
    },
    PaymentSucceeded {
        order_id: Uuid,
        payment_id: Uuid,
        reference: String,
    },
    PaymentFailed {
        order_id: Uuid,
        payment_id: Uuid,
        reference: String,
    },
    OrderItemStatusChanged {
        order_id: Uuid,
        item_id: Uuid,
        store_id: Uuid,
        old_status: FulfillmentStatus,
        new_status: FulfillmentStatus,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: FulfillmentStatus,
        new_status: FulfillmentStatus,
    },
    EscrowReleased {
        order_id: Uuid,
        payment_id: Uuid,
        amount: i64,
    },
    /// Money was collected for an order that had already been cancelled.
    RefundRequired {
        order_id: Uuid,
        payment_id: Uuid,
        reference: String,
        amount: i64,
    },
}

impl Event {
    pub fn order_id(&self) -> Uuid {
        match self {
            Event::OrderPlaced { order_id, .. }
            | Event::PaymentSucceeded { order_id, .. }
            | Event::PaymentFailed { order_id, .. }
            | Event::OrderItemStatusChanged { order_id, .. }
            | Event::OrderStatusChanged { order_id, .. }
            | Event::EscrowReleased { order_id, .. }
            | Event::RefundRequired { order_id, .. } => *order_id,
        }
    }

    /// Short notification title
    pub fn title(&self) -> &'static str {
        match self {
            Event::OrderPlaced { .. } => "Order placed",
            Event::PaymentSucceeded { .. } => "Payment received",
            Event::PaymentFailed { .. } => "Payment failed",
            Event::OrderItemStatusChanged { new_status, .. }
            | Event::OrderStatusChanged { new_status, .. } => status_title(*new_status),
            Event::EscrowReleased { .. } => "Funds released",
            Event::RefundRequired { .. } => "Refund required",
        }
    }

    /// Human-readable notification body
    pub fn message(&self) -> String {
        match self {
            Event::OrderPlaced {
                order_number,
                total,
                currency,
                ..
            } => format!(
                "Order {} for {} {} has been placed",
                order_number, total, currency
            ),
            Event::PaymentSucceeded { reference, .. } => {
                format!("Payment {} was successful", reference)
            }
            Event::PaymentFailed { reference, .. } => {
                format!("Payment {} failed; you can retry from your order", reference)
            }
            Event::OrderItemStatusChanged { new_status, .. } => {
                format!("An item in your order {}", status_phrase(*new_status))
            }
            Event::OrderStatusChanged { new_status, .. } => {
                format!("Your order {}", status_phrase(*new_status))
            }
            Event::EscrowReleased { amount, .. } => {
                format!("Escrowed funds of {} have been released", amount)
            }
            Event::RefundRequired {
                reference, amount, ..
            } => format!(
                "Payment {} of {} arrived after the order was cancelled and must be refunded",
                reference, amount
            ),
        }
    }
}

fn status_title(status: FulfillmentStatus) -> &'static str {
    match status {
        FulfillmentStatus::Pending => "Order pending",
        FulfillmentStatus::Confirmed => "Order confirmed",
        FulfillmentStatus::Processing => "Order processing",
        FulfillmentStatus::Shipped => "Order shipped",
        FulfillmentStatus::Delivered => "Order delivered",
        FulfillmentStatus::Cancelled => "Order cancelled",
        FulfillmentStatus::Refunded => "Order refunded",
    }
}

fn status_phrase(status: FulfillmentStatus) -> &'static str {
    match status {
        FulfillmentStatus::Pending => "is awaiting confirmation",
        FulfillmentStatus::Confirmed => "has been confirmed by the seller",
        FulfillmentStatus::Processing => "is being prepared",
        FulfillmentStatus::Shipped => "has been shipped",
        FulfillmentStatus::Delivered => "has been delivered",
        FulfillmentStatus::Cancelled => "has been cancelled",
        FulfillmentStatus::Refunded => "has been refunded",
    }
}

/// Drains the event channel, handing each event to the notification log.
/// Delivery to push/email providers happens outside this service.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match serde_json::to_value(&event) {
            Ok(payload) => info!(
                order_id = %event.order_id(),
                title = event.title(),
                message = %event.message(),
                payload = %payload,
                "notification"
            ),
            Err(e) => warn!(order_id = %event.order_id(), error = %e, "failed to serialize event"),
        }
    }

    info!("Event processing loop stopped");
}
