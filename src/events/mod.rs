use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

/// Events emitted by the services after a state change commits. Consumers
/// (notification fan-out, analytics) subscribe through the receiver half;
/// event delivery is best effort and never gates the originating operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Order events
    OrderCreated(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    OrderPaymentStatusUpdated {
        order_id: Uuid,
        payment_status: String,
        reference: Option<String>,
    },

    // Payment events
    PaymentInitialized(Uuid),
    PaymentSucceeded {
        payment_id: Uuid,
        reference: String,
    },
    PaymentFailed {
        payment_id: Uuid,
        reference: String,
    },

    // Entitlement events
    EntitlementGranted {
        user_id: Uuid,
        credits: i32,
    },
    /// Hostel bookings are fulfilled by an external system; the payment core
    /// only announces that a paid booking request exists.
    HostelBookingRequested {
        payment_id: Uuid,
        user_id: Uuid,
        reference: String,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Creates the event channel pair used to wire services to the processor.
pub fn channel(buffer: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(buffer);
    (EventSender::new(tx), rx)
}

/// Drains the event queue, logging each event. Runs until every sender is
/// dropped.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        info!(?event, "processing event");
    }
    info!("event channel closed, processor exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_and_receive_round_trip() {
        let (sender, mut receiver) = channel(8);
        let order_id = Uuid::new_v4();

        sender.send(Event::OrderCreated(order_id)).await.unwrap();

        match receiver.recv().await.unwrap() {
            Event::OrderCreated(id) => assert_eq!(id, order_id),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn send_fails_after_receiver_dropped() {
        let (sender, receiver) = channel(1);
        drop(receiver);

        assert!(sender.send(Event::PaymentInitialized(Uuid::new_v4())).await.is_err());
    }
}
