//! Media engine collaborator boundary.
//!
//! The WebRTC engine (ICE, DTLS, SRTP, RTP processing) and the packet fan-out
//! live outside this crate. The orchestration layer only sees these traits:
//! it creates connections, feeds them SDP and candidates, wires sinks into
//! fan-outs, and receives state reports through an [`EngineEventSink`].
//!
//! Engine objects are owned by exactly one endpoint actor and are only ever
//! touched from that actor's worker, so the traits require `Send` but not
//! `Sync`.

pub mod unlinked;
pub mod workers;

use crate::config::{IceConfig, MediaConfig};
use serde::Deserialize;
use std::fmt;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::sync::mpsc;

pub use unlinked::UnlinkedEngine;
pub use workers::{LeastLoadedPool, WorkerHandle, WorkerLease, WorkerPool};

/// Engine-side failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    /// The engine refused the input (bad SDP, bad candidate, unknown sink).
    #[error("rejected: {0}")]
    Rejected(String),

    /// The engine cannot host another connection.
    #[error("unavailable: {0}")]
    Unavailable(String),
}

/// Opaque reference to a media receiving sink inside the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaSink(String);

impl MediaSink {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MediaSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key under which a downstream sink is attached to a fan-out.
///
/// WebRTC subscribers and bridge sinks live in separate namespaces so a client
/// id can never shadow a bridge-stream id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SubscriberKey {
    Client(String),
    Bridge(String),
}

impl fmt::Display for SubscriberKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriberKey::Client(id) => write!(f, "sub:{id}"),
            SubscriberKey::Bridge(id) => write!(f, "bridge:{id}"),
        }
    }
}

/// Remote ICE candidate as carried by `processSignaling`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IceCandidate {
    #[serde(rename = "sdpMid")]
    pub sdp_mid: String,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_m_line_index: u32,
    pub candidate: String,
}

/// Connection state reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Negotiation started.
    Initial,
    /// Local candidates gathered.
    Gathered,
    /// Remote offer applied and a local answer produced.
    SdpProcessed,
    /// ICE and DTLS complete.
    Ready,
    /// Transport failed.
    Failed,
    /// Transport finished.
    Finished,
}

/// One state report, with the local SDP attached for `SdpProcessed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineEvent {
    pub state: EngineState,
    pub message: Option<String>,
}

/// Callback capability handed to the engine at connection creation.
///
/// Safe to call from any engine thread. Reports sent after the owning
/// endpoint has closed are silently dropped.
#[derive(Debug, Clone)]
pub struct EngineEventSink {
    sender: mpsc::UnboundedSender<EngineEvent>,
}

impl EngineEventSink {
    /// Create a sink and the receiver the endpoint actor drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Report a state change. Returns false once the endpoint is gone.
    pub fn notify(&self, state: EngineState, message: Option<String>) -> bool {
        self.sender.send(EngineEvent { state, message }).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Parameters for a new WebRTC connection.
pub struct ConnectionRequest<'a> {
    pub connection_id: &'a str,
    pub stream_id: &'a str,
    pub label: &'a str,
    pub is_publisher: bool,
    pub worker: &'a WorkerHandle,
    pub io_worker: &'a WorkerHandle,
    pub ice: &'a IceConfig,
    pub media: &'a MediaConfig,
    pub events: EngineEventSink,
}

/// Direction of a plain-RTP bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeDirection {
    /// Media arrives from the external peer and is fanned out locally.
    Inbound { video_ssrc: u32, audio_ssrc: u32 },
    /// Media from a local publisher is forwarded to the external peer.
    Outbound,
}

/// Parameters for a new RTP bridge link.
pub struct BridgeRequest<'a> {
    pub bridge_stream_id: &'a str,
    pub src_stream_id: &'a str,
    pub target: SocketAddr,
    pub direction: BridgeDirection,
    pub io_worker: &'a WorkerHandle,
}

/// Factory for engine objects.
pub trait MediaEngine: Send + Sync + 'static {
    /// Create a WebRTC connection. State reports flow through `request.events`.
    fn create_connection(
        &self,
        request: ConnectionRequest<'_>,
    ) -> Result<Box<dyn EngineConnection>, EngineError>;

    /// Open a plain-RTP link to an external peer.
    fn create_bridge(
        &self,
        request: BridgeRequest<'_>,
    ) -> Result<Box<dyn BridgeConnection>, EngineError>;

    /// Create a fan-out that distributes media arriving at `source`.
    fn create_fan_out(&self, source: &MediaSink) -> Result<Box<dyn FanOut>, EngineError>;
}

/// A WebRTC connection inside the engine.
pub trait EngineConnection: Send {
    fn set_remote_sdp(&mut self, sdp: &str) -> Result<(), EngineError>;

    fn add_remote_candidate(&mut self, candidate: &IceCandidate) -> Result<(), EngineError>;

    /// Sink through which this connection sends or receives media.
    fn media_sink(&self) -> MediaSink;

    /// Release the connection. Must be idempotent.
    fn close(&mut self);
}

/// A plain-RTP link to an external peer.
pub trait BridgeConnection: Send {
    fn media_sink(&self) -> MediaSink;

    fn close(&mut self);
}

/// Publish-to-many distribution owned by a publisher or bridge source.
pub trait FanOut: Send {
    fn add_subscriber(&mut self, key: &SubscriberKey, sink: MediaSink) -> Result<(), EngineError>;

    fn remove_subscriber(&mut self, key: &SubscriberKey);

    fn close(&mut self);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_subscriber_keys_do_not_collide() {
        let client = SubscriberKey::Client("x1".to_string());
        let bridge = SubscriberKey::Bridge("x1".to_string());

        assert_ne!(client, bridge);
        assert_eq!(client.to_string(), "sub:x1");
        assert_eq!(bridge.to_string(), "bridge:x1");
    }

    #[test]
    fn test_candidate_deserializes_from_wire_names() {
        let candidate: IceCandidate = serde_json::from_value(serde_json::json!({
            "sdpMid": "audio",
            "sdpMLineIndex": 0,
            "candidate": "a=candidate:1 1 udp 2122260223 10.0.0.1 54400 typ host"
        }))
        .unwrap();

        assert_eq!(candidate.sdp_mid, "audio");
        assert_eq!(candidate.sdp_m_line_index, 0);
    }

    #[tokio::test]
    async fn test_event_sink_reports_closed_receiver() {
        let (sink, mut receiver) = EngineEventSink::channel();

        assert!(sink.notify(EngineState::Initial, None));
        let event = receiver.recv().await.unwrap();
        assert_eq!(event.state, EngineState::Initial);

        drop(receiver);
        assert!(sink.is_closed());
        assert!(!sink.notify(EngineState::Ready, None));
    }
}
