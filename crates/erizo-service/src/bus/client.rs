//! Redis bus client and the inbound/outbound transport tasks.
//!
//! The `MultiplexedConnection` used for publishing is cheap to clone and safe
//! to use concurrently, so the client itself is `Clone`. Subscriptions need a
//! dedicated connection and are opened separately with [`BusClient::subscribe`].

use crate::dispatcher::CommandDispatcher;
use crate::errors::ErizoError;
use crate::observability::{metrics, HealthState};
use crate::protocol::OutboundMessage;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

#[derive(Clone)]
pub struct BusClient {
    client: Client,
    connection: MultiplexedConnection,
}

impl BusClient {
    /// Open the bus and a publishing connection.
    ///
    /// # Errors
    ///
    /// Returns `ErizoError::Bus` if the URL is invalid or the server is unreachable.
    pub async fn connect(bus_url: &SecretString) -> Result<Self, ErizoError> {
        let client = Client::open(bus_url.expose_secret()).map_err(|e| {
            // The URL may carry credentials; never log it.
            error!(target: "erizo.bus", error = %e, "Failed to open bus client");
            ErizoError::Bus(format!("Failed to open bus client: {e}"))
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                error!(target: "erizo.bus", error = %e, "Failed to connect to bus");
                ErizoError::Bus(format!("Failed to connect to bus: {e}"))
            })?;

        Ok(Self { client, connection })
    }

    /// Publish one payload on `channel`.
    pub async fn publish(&self, channel: &str, payload: &str) -> Result<(), ErizoError> {
        let mut conn = self.connection.clone();
        let _receivers: i64 = conn.publish(channel, payload).await.map_err(|e| {
            warn!(target: "erizo.bus", channel = %channel, error = %e, "Publish failed");
            ErizoError::Bus(format!("Publish failed: {e}"))
        })?;
        Ok(())
    }

    /// Subscribe to `channel` and return its payloads as a stream.
    ///
    /// The subscription is live when this returns.
    pub async fn subscribe(
        &self,
        channel: &str,
    ) -> Result<impl Stream<Item = Result<String, ErizoError>>, ErizoError> {
        let mut pubsub = self.client.get_async_pubsub().await.map_err(|e| {
            error!(target: "erizo.bus", error = %e, "Failed to open subscription connection");
            ErizoError::Bus(format!("Failed to open subscription connection: {e}"))
        })?;

        pubsub.subscribe(channel).await.map_err(|e| {
            error!(target: "erizo.bus", channel = %channel, error = %e, "Subscribe failed");
            ErizoError::Bus(format!("Subscribe failed: {e}"))
        })?;

        info!(target: "erizo.bus", channel = %channel, "Subscribed to command channel");

        Ok(pubsub.into_on_message().map(|msg| {
            msg.get_payload::<String>()
                .map_err(|e| ErizoError::MalformedCommand(format!("non-text payload: {e}")))
        }))
    }
}

/// Why [`run_inbound`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundExit {
    Cancelled,
    /// The subscription stream ended; the erizo can no longer take commands.
    StreamEnded,
}

/// Feed inbound payloads to the dispatcher until cancelled or the stream ends.
///
/// Each dispatch is awaited before the next payload is read, preserving the
/// channel's arrival order. Readiness is marked consuming on entry and lost
/// if the stream ends.
#[instrument(skip_all, name = "erizo.bus.inbound")]
pub async fn run_inbound<S>(
    messages: S,
    dispatcher: CommandDispatcher,
    health: Arc<HealthState>,
    cancel_token: CancellationToken,
) -> InboundExit
where
    S: Stream<Item = Result<String, ErizoError>>,
{
    tokio::pin!(messages);
    let mut received: u64 = 0;
    health.consuming();

    let exit = loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                debug!(target: "erizo.bus", "Inbound task cancelled");
                break InboundExit::Cancelled;
            }

            next = messages.next() => {
                match next {
                    Some(Ok(payload)) => {
                        received += 1;
                        // Outcome is logged and counted by the dispatcher.
                        let _ = dispatcher.dispatch(&payload).await;
                    }
                    Some(Err(e)) => {
                        warn!(target: "erizo.bus", error = %e, "Discarding inbound message");
                        metrics::record_command("unknown", e.kind().as_str());
                    }
                    None => {
                        error!(target: "erizo.bus", "Inbound subscription ended");
                        health.bus_lost();
                        break InboundExit::StreamEnded;
                    }
                }
            }
        }
    };

    info!(target: "erizo.bus", messages_received = received, ?exit, "Inbound task stopped");
    exit
}

/// Publish queued outbound messages until cancelled or the queue closes.
///
/// On cancellation, messages already queued are still published.
#[instrument(skip_all, name = "erizo.bus.outbound")]
pub async fn run_outbound(
    bus: BusClient,
    mut receiver: mpsc::Receiver<OutboundMessage>,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                receiver.close();
                while let Some(message) = receiver.recv().await {
                    publish_one(&bus, &message).await;
                }
                break;
            }

            msg = receiver.recv() => {
                match msg {
                    Some(message) => publish_one(&bus, &message).await,
                    None => break,
                }
            }
        }
    }

    info!(target: "erizo.bus", "Outbound task stopped");
}

async fn publish_one(bus: &BusClient, message: &OutboundMessage) {
    if bus
        .publish(&message.reply_to, &message.payload)
        .await
        .is_err()
    {
        metrics::record_event_dropped("publish_failed");
    }
}
