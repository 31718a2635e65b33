use async_trait::async_trait;
use tracing::warn;

use crate::events::{Event, EventSender};

/// Receives order lifecycle events after the state change has committed.
///
/// Delivery is best-effort: a notifier never fails the operation that
/// triggered it.
#[async_trait]
pub trait OrderNotifier: Send + Sync {
    async fn notify(&self, event: Event);
}

/// Forwards events to the in-process event channel.
#[derive(Debug, Clone)]
pub struct EventNotifier {
    sender: EventSender,
}

impl EventNotifier {
    pub fn new(sender: EventSender) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl OrderNotifier for EventNotifier {
    async fn notify(&self, event: Event) {
        let order_id = event.order_id();
        if let Err(e) = self.sender.send(event).await {
            warn!(%order_id, error = %e, "notification dropped");
        }
    }
}

/// Sends each event in order, ignoring failures.
pub async fn notify_all(notifier: &dyn OrderNotifier, events: Vec<Event>) {
    for event in events {
        notifier.notify(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    #[tokio::test]
    async fn closed_channel_does_not_fail_the_caller() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let notifier = EventNotifier::new(EventSender::new(tx));
        notifier
            .notify(Event::PaymentFailed {
                order_id: Uuid::nil(),
                payment_id: Uuid::nil(),
                reference: "r".into(),
            })
            .await;
    }
}
