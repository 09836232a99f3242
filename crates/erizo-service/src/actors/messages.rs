//! Message types for actor communication.
//!
//! All inter-actor communication uses strongly-typed message passing via `tokio::sync::mpsc`.
//! Response patterns use `tokio::sync::oneshot` for request-reply semantics.

use crate::engine::{IceCandidate, MediaSink, SubscriberKey};
use crate::errors::ErizoError;
use crate::protocol::{
    AddPublisher, AddSubscriber, AddVirtualPublisher, AddVirtualSubscriber, SignalingMessage,
};
use std::net::SocketAddr;
use tokio::sync::oneshot;

/// Messages sent to `SessionActor`.
#[derive(Debug)]
pub enum SessionMessage {
    AddPublisher {
        request: AddPublisher,
        /// Correlation id echoed in this endpoint's events.
        corr_id: Option<i64>,
        respond_to: oneshot::Sender<Result<(), ErizoError>>,
    },

    AddSubscriber {
        request: AddSubscriber,
        corr_id: Option<i64>,
        respond_to: oneshot::Sender<Result<(), ErizoError>>,
    },

    /// Responds `Ok(false)` when there was nothing to remove.
    RemovePublisher {
        client_id: String,
        stream_id: String,
        respond_to: oneshot::Sender<Result<bool, ErizoError>>,
    },

    RemoveSubscriber {
        client_id: String,
        stream_id: String,
        respond_to: oneshot::Sender<Result<bool, ErizoError>>,
    },

    AddVirtualPublisher {
        request: AddVirtualPublisher,
        respond_to: oneshot::Sender<Result<(), ErizoError>>,
    },

    RemoveVirtualPublisher {
        bridge_stream_id: String,
        respond_to: oneshot::Sender<Result<bool, ErizoError>>,
    },

    AddVirtualSubscriber {
        request: AddVirtualSubscriber,
        respond_to: oneshot::Sender<Result<(), ErizoError>>,
    },

    RemoveVirtualSubscriber {
        bridge_stream_id: String,
        src_stream_id: Option<String>,
        respond_to: oneshot::Sender<Result<bool, ErizoError>>,
    },

    /// Forward an offer or candidate to the (client, stream) endpoint.
    ProcessSignaling {
        client_id: String,
        stream_id: String,
        message: SignalingMessage,
        respond_to: oneshot::Sender<Result<(), ErizoError>>,
    },

    GetClient {
        client_id: String,
        respond_to: oneshot::Sender<Option<ClientInfo>>,
    },

    GetBridge {
        bridge_stream_id: String,
        respond_to: oneshot::Sender<Option<BridgeInfo>>,
    },

    GetStatus {
        respond_to: oneshot::Sender<SessionStatus>,
    },

    /// Close every endpoint and stop the actor.
    Shutdown { respond_to: oneshot::Sender<()> },
}

/// Messages sent to `EndpointActor`.
#[derive(Debug)]
pub enum EndpointMessage {
    SetRemoteSdp {
        sdp: String,
        respond_to: oneshot::Sender<Result<(), ErizoError>>,
    },

    AddRemoteCandidate {
        candidate: IceCandidate,
        respond_to: oneshot::Sender<Result<(), ErizoError>>,
    },

    /// Add a downstream sink to this endpoint's fan-out.
    AttachSubscriber {
        key: SubscriberKey,
        sink: MediaSink,
        respond_to: oneshot::Sender<Result<(), ErizoError>>,
    },

    DetachSubscriber {
        key: SubscriberKey,
        respond_to: oneshot::Sender<()>,
    },

    /// Release engine resources. Responds once they are released.
    Close { respond_to: oneshot::Sender<()> },
}

// ----------------------------------------------------------------------------
// Supporting Types
// ----------------------------------------------------------------------------

/// What an endpoint does in the media graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointRole {
    Publisher,
    Subscriber,
    BridgeSource,
    BridgeSink,
}

impl EndpointRole {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            EndpointRole::Publisher => "publisher",
            EndpointRole::Subscriber => "subscriber",
            EndpointRole::BridgeSource => "bridge_source",
            EndpointRole::BridgeSink => "bridge_sink",
        }
    }

    /// True for roles that own a fan-out and can accept subscribers.
    #[must_use]
    pub const fn is_source(&self) -> bool {
        matches!(self, EndpointRole::Publisher | EndpointRole::BridgeSource)
    }

    #[must_use]
    pub const fn is_bridge(&self) -> bool {
        matches!(self, EndpointRole::BridgeSource | EndpointRole::BridgeSink)
    }
}

/// Endpoint lifecycle. Variants are ordered; transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EndpointState {
    Created,
    Negotiating,
    SdpExchanged,
    Ready,
    Closed,
}

impl EndpointState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            EndpointState::Created => "created",
            EndpointState::Negotiating => "negotiating",
            EndpointState::SdpExchanged => "sdp_exchanged",
            EndpointState::Ready => "ready",
            EndpointState::Closed => "closed",
        }
    }
}

/// One endpoint as reported by status queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSummary {
    pub stream_id: String,
    pub role: EndpointRole,
    pub state: EndpointState,
}

/// A client's endpoints, sorted by stream id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub client_id: String,
    pub publishers: Vec<EndpointSummary>,
    pub subscribers: Vec<EndpointSummary>,
}

/// A registered bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeInfo {
    pub bridge_stream_id: String,
    pub src_stream_id: String,
    pub target: SocketAddr,
    pub role: EndpointRole,
    pub state: EndpointState,
}

/// Registry sizes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStatus {
    pub clients: usize,
    pub publishers: usize,
    pub subscribers: usize,
    pub bridges: usize,
}
