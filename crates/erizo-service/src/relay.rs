//! Event Relay.
//!
//! Endpoints publish lifecycle events and the dispatcher publishes
//! acknowledgements through the [`EventRelay`] capability. The relay forwards
//! payloads unchanged; ordering is whatever the transport provides.

use crate::observability::metrics;
use crate::protocol::OutboundMessage;
use tokio::sync::mpsc;
use tracing::warn;

/// Default capacity of the outbound queue.
pub const RELAY_CHANNEL_BUFFER: usize = 1024;

/// Single-method "publish event" capability.
pub trait EventRelay: Send + Sync + 'static {
    fn publish(&self, message: OutboundMessage);
}

/// Relay that queues messages for the bus publisher task.
///
/// `publish` never blocks: when the queue is full the message is dropped and
/// counted.
#[derive(Debug, Clone)]
pub struct ChannelRelay {
    sender: mpsc::Sender<OutboundMessage>,
}

impl ChannelRelay {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<OutboundMessage>) {
        let (sender, receiver) = mpsc::channel(buffer);
        (Self { sender }, receiver)
    }
}

impl EventRelay for ChannelRelay {
    fn publish(&self, message: OutboundMessage) {
        match self.sender.try_send(message) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(message)) => {
                warn!(
                    target: "erizo.relay",
                    reply_to = %message.reply_to,
                    "Outbound queue full, dropping message"
                );
                metrics::record_event_dropped("queue_full");
            }
            Err(mpsc::error::TrySendError::Closed(message)) => {
                warn!(
                    target: "erizo.relay",
                    reply_to = %message.reply_to,
                    "Outbound queue closed, dropping message"
                );
                metrics::record_event_dropped("closed");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn message(n: u32) -> OutboundMessage {
        OutboundMessage {
            reply_to: "r1".to_string(),
            payload: format!("{{\"n\":{n}}}"),
        }
    }

    #[tokio::test]
    async fn test_publish_preserves_order() {
        let (relay, mut receiver) = ChannelRelay::new(8);

        relay.publish(message(1));
        relay.publish(message(2));

        assert_eq!(receiver.recv().await.unwrap(), message(1));
        assert_eq!(receiver.recv().await.unwrap(), message(2));
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let (relay, mut receiver) = ChannelRelay::new(1);

        relay.publish(message(1));
        relay.publish(message(2));

        assert_eq!(receiver.recv().await.unwrap(), message(1));
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_queue_drops() {
        let (relay, receiver) = ChannelRelay::new(1);
        drop(receiver);

        relay.publish(message(1));
    }
}
