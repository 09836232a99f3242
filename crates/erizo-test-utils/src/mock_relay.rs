//! Event relay that records every outbound message.
//!
//! Tests use [`RecordingRelay::wait_for`] to await events published from
//! endpoint actors running on other tasks.

use erizo_service::protocol::OutboundMessage;
use erizo_service::relay::EventRelay;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct RelayInner {
    messages: Mutex<Vec<OutboundMessage>>,
    notify: Notify,
}

/// Recording relay; clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct RecordingRelay {
    inner: Arc<RelayInner>,
}

impl RecordingRelay {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<OutboundMessage> {
        self.inner.messages.lock().unwrap().clone()
    }

    /// Parsed payloads sent to `reply_to`, in publish order.
    pub fn payloads_to(&self, reply_to: &str) -> Vec<Value> {
        self.inner
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.reply_to == reply_to)
            .map(|m| serde_json::from_str(&m.payload).unwrap())
            .collect()
    }

    /// `data.type` of every payload sent to `reply_to`.
    pub fn types_to(&self, reply_to: &str) -> Vec<String> {
        self.payloads_to(reply_to)
            .iter()
            .map(|p| p["data"]["type"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.messages.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner.messages.lock().unwrap().clear();
    }

    /// Wait until at least `count` payloads were sent to `reply_to`.
    ///
    /// # Panics
    ///
    /// Panics if they do not arrive within `timeout`.
    pub async fn wait_for(&self, reply_to: &str, count: usize, timeout: Duration) -> Vec<Value> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let payloads = self.payloads_to(reply_to);
            if payloads.len() >= count {
                return payloads;
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                panic!(
                    "timed out waiting for {count} messages to {reply_to}, got {}",
                    payloads.len()
                );
            }
        }
    }
}

impl EventRelay for RecordingRelay {
    fn publish(&self, message: OutboundMessage) {
        self.inner.messages.lock().unwrap().push(message);
        self.inner.notify.notify_waiters();
    }
}
