//! Command Dispatcher.
//!
//! Single entry point for inbound bus messages. Each raw payload is parsed
//! into an [`Envelope`], decoded into a typed [`Command`] and routed to the
//! session actor. Failures never cross the transport boundary: they are
//! logged, counted and, for correlated envelopes, answered with an error
//! acknowledgement.

use crate::actors::SessionActorHandle;
use crate::errors::{ErizoError, ErrorKind};
use crate::observability::metrics;
use crate::protocol::command::METHODS;
use crate::protocol::{
    Command, CommandReply, Correlation, Envelope, OutboundMessage, RejectedEnvelope,
};
use crate::relay::EventRelay;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Metric label for methods outside the supported set.
const UNKNOWN_METHOD: &str = "unknown";

#[derive(Clone)]
pub struct CommandDispatcher {
    session: SessionActorHandle,
    relay: Arc<dyn EventRelay>,
}

impl CommandDispatcher {
    #[must_use]
    pub fn new(session: SessionActorHandle, relay: Arc<dyn EventRelay>) -> Self {
        Self { session, relay }
    }

    /// Handle one raw inbound payload.
    ///
    /// Returns the command's outcome for the caller's logging; the bus loop
    /// ignores it and moves on to the next message.
    #[instrument(skip_all, name = "erizo.dispatcher")]
    pub async fn dispatch(&self, raw: &str) -> Result<(), ErizoError> {
        let start = Instant::now();

        let envelope = match Envelope::parse(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(target: "erizo.dispatcher", error = %e, "Discarding unparseable message");
                metrics::record_command(UNKNOWN_METHOD, e.kind().as_str());
                if let Some(rejected) = RejectedEnvelope::recover(raw) {
                    self.reject(&rejected, &e);
                }
                return Err(e);
            }
        };

        let corr_id = envelope.correlation.as_ref().map(|c| c.corr_id);
        let (label, result) = match Command::decode(&envelope.method, &envelope.args) {
            Ok(command) => {
                let label = command.method();
                (label, self.execute(command, corr_id).await)
            }
            Err(e) => (method_label(&envelope.method), Err(e)),
        };

        let outcome = match &result {
            Ok(()) => "ok",
            Err(e) => e.kind().as_str(),
        };
        metrics::record_command(label, outcome);
        metrics::record_command_duration(label, start.elapsed());

        if let Err(e) = &result {
            log_failure(&envelope.method, e);
        }

        if let Some(correlation) = &envelope.correlation {
            self.acknowledge(correlation, &envelope.method, &result);
        }

        result
    }

    async fn execute(&self, command: Command, corr_id: Option<i64>) -> Result<(), ErizoError> {
        match command {
            Command::AddPublisher(request) => self.session.add_publisher(request, corr_id).await,
            Command::AddSubscriber(request) => self.session.add_subscriber(request, corr_id).await,
            Command::RemovePublisher {
                client_id,
                stream_id,
            } => {
                let removed = self.session.remove_publisher(client_id, stream_id).await?;
                log_noop("removePublisher", removed);
                Ok(())
            }
            Command::RemoveSubscriber {
                client_id,
                stream_id,
            } => {
                let removed = self.session.remove_subscriber(client_id, stream_id).await?;
                log_noop("removeSubscriber", removed);
                Ok(())
            }
            Command::AddVirtualPublisher(request) => {
                self.session.add_virtual_publisher(request).await
            }
            Command::RemoveVirtualPublisher { bridge_stream_id } => {
                let removed = self
                    .session
                    .remove_virtual_publisher(bridge_stream_id)
                    .await?;
                log_noop("removeVirtualPublisher", removed);
                Ok(())
            }
            Command::AddVirtualSubscriber(request) => {
                self.session.add_virtual_subscriber(request).await
            }
            Command::RemoveVirtualSubscriber {
                bridge_stream_id,
                src_stream_id,
            } => {
                let removed = self
                    .session
                    .remove_virtual_subscriber(bridge_stream_id, src_stream_id)
                    .await?;
                log_noop("removeVirtualSubscriber", removed);
                Ok(())
            }
            Command::ProcessSignaling {
                client_id,
                stream_id,
                message,
            } => {
                self.session
                    .process_signaling(client_id, stream_id, message)
                    .await
            }
            Command::KeepAlive => Ok(()),
        }
    }

    fn acknowledge(&self, correlation: &Correlation, method: &str, result: &Result<(), ErizoError>) {
        let Some(reply_to) = correlation.reply_to.as_deref() else {
            debug!(
                target: "erizo.dispatcher",
                corr_id = correlation.corr_id,
                "Correlated command without replyTo, no acknowledgement sent"
            );
            return;
        };

        let reply = match result {
            Ok(()) => CommandReply::ack(correlation.corr_id, method),
            Err(e) => CommandReply::error(correlation.corr_id, method, e),
        };

        match OutboundMessage::encode(reply_to, &reply) {
            Ok(message) => self.relay.publish(message),
            Err(e) => error!(
                target: "erizo.dispatcher",
                corr_id = correlation.corr_id,
                error = %e,
                "Failed to encode acknowledgement"
            ),
        }
    }

    /// Error reply for an envelope that never reached command decoding.
    fn reject(&self, rejected: &RejectedEnvelope, error: &ErizoError) {
        let reply = CommandReply::error(rejected.corr_id.clone(), &rejected.method, error);
        match OutboundMessage::encode(&rejected.reply_to, &reply) {
            Ok(message) => self.relay.publish(message),
            Err(e) => error!(
                target: "erizo.dispatcher",
                corr_id = %rejected.corr_id,
                error = %e,
                "Failed to encode rejection"
            ),
        }
    }
}

fn method_label(method: &str) -> &'static str {
    METHODS
        .iter()
        .find(|known| **known == method)
        .copied()
        .unwrap_or(UNKNOWN_METHOD)
}

fn log_noop(method: &'static str, removed: bool) {
    if !removed {
        debug!(target: "erizo.dispatcher", method = method, "Nothing to remove");
    }
}

fn log_failure(method: &str, e: &ErizoError) {
    match e.kind() {
        ErrorKind::Malformed => {
            warn!(target: "erizo.dispatcher", method = %method, error = %e, "Discarding malformed command");
        }
        ErrorKind::Precondition => {
            info!(target: "erizo.dispatcher", method = %method, error = %e, "Command rejected");
        }
        ErrorKind::EngineRejection | ErrorKind::ResourceExhaustion => {
            warn!(target: "erizo.dispatcher", method = %method, error = %e, "Command failed");
        }
        ErrorKind::Internal => {
            error!(target: "erizo.dispatcher", method = %method, error = %e, "Command failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_label_is_bounded() {
        assert_eq!(method_label("addPublisher"), "addPublisher");
        assert_eq!(method_label("keepAlive"), "keepAlive");
        assert_eq!(method_label("dropTables"), "unknown");
        assert_eq!(method_label(""), "unknown");
    }
}
