//! Scriptable in-memory media engine.
//!
//! Records every connection, bridge and fan-out the session layer creates,
//! lets tests inject engine state reports, and can be told to reject any
//! engine call.
//!
//! # Example
//!
//! ```rust,ignore
//! use erizo_test_utils::MockEngine;
//!
//! let engine = MockEngine::new().with_rejected_sdp();
//!
//! // ... addPublisher for "s1" ...
//! engine.emit_publisher("s1", EngineState::Ready, None);
//! assert_eq!(engine.open_connections(), 1);
//! ```

use erizo_service::engine::{
    BridgeConnection, BridgeDirection, BridgeRequest, ConnectionRequest, EngineConnection,
    EngineError, EngineEventSink, EngineState, FanOut, IceCandidate, MediaEngine, MediaSink,
    SubscriberKey,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

/// One WebRTC connection created through the mock.
#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    pub connection_id: String,
    pub stream_id: String,
    pub label: String,
    pub is_publisher: bool,
    pub worker_id: String,
    pub io_worker_id: String,
    pub sdps: Vec<String>,
    pub candidates: Vec<IceCandidate>,
    pub closed: bool,
    events: EngineEventSink,
}

impl ConnectionRecord {
    #[must_use]
    pub fn media_sink(&self) -> String {
        format!("sink-{}", self.connection_id)
    }
}

/// One RTP bridge created through the mock.
#[derive(Debug, Clone)]
pub struct BridgeRecord {
    pub bridge_stream_id: String,
    pub src_stream_id: String,
    pub target: std::net::SocketAddr,
    pub direction: BridgeDirection,
    pub io_worker_id: String,
    pub closed: bool,
}

impl BridgeRecord {
    #[must_use]
    pub fn media_sink(&self) -> String {
        format!("bridge-{}", self.bridge_stream_id)
    }
}

#[derive(Debug, Default)]
struct FanOutRecord {
    /// Subscriber key -> attached sink.
    subscribers: BTreeMap<String, String>,
    closed: bool,
}

#[derive(Debug, Default)]
struct MockEngineInner {
    connections: Vec<ConnectionRecord>,
    bridges: Vec<BridgeRecord>,
    /// Source sink id -> fan-out.
    fan_outs: HashMap<String, FanOutRecord>,
    reject_connections: bool,
    reject_bridges: bool,
    reject_fan_outs: bool,
    reject_sdp: bool,
    reject_candidates: bool,
    reject_attach: bool,
}

/// Mock media engine for session tests.
#[derive(Debug, Clone, Default)]
pub struct MockEngine {
    inner: Arc<Mutex<MockEngineInner>>,
}

impl MockEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every `create_connection`.
    #[must_use]
    pub fn with_rejected_connections(self) -> Self {
        self.inner.lock().unwrap().reject_connections = true;
        self
    }

    #[must_use]
    pub fn with_rejected_bridges(self) -> Self {
        self.inner.lock().unwrap().reject_bridges = true;
        self
    }

    #[must_use]
    pub fn with_rejected_fan_outs(self) -> Self {
        self.inner.lock().unwrap().reject_fan_outs = true;
        self
    }

    #[must_use]
    pub fn with_rejected_sdp(self) -> Self {
        self.set_reject_sdp(true);
        self
    }

    #[must_use]
    pub fn with_rejected_candidates(self) -> Self {
        self.inner.lock().unwrap().reject_candidates = true;
        self
    }

    #[must_use]
    pub fn with_rejected_attach(self) -> Self {
        self.inner.lock().unwrap().reject_attach = true;
        self
    }

    /// Toggle SDP rejection mid-test.
    pub fn set_reject_sdp(&self, reject: bool) {
        self.inner.lock().unwrap().reject_sdp = reject;
    }

    /// All connections ever created, in creation order.
    pub fn connections(&self) -> Vec<ConnectionRecord> {
        self.inner.lock().unwrap().connections.clone()
    }

    pub fn bridges(&self) -> Vec<BridgeRecord> {
        self.inner.lock().unwrap().bridges.clone()
    }

    /// Connections not yet closed.
    pub fn open_connections(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .connections
            .iter()
            .filter(|c| !c.closed)
            .count()
    }

    pub fn open_bridges(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .bridges
            .iter()
            .filter(|b| !b.closed)
            .count()
    }

    /// The open publisher connection for `stream_id`.
    pub fn publisher(&self, stream_id: &str) -> Option<ConnectionRecord> {
        self.find(|c| c.is_publisher && c.stream_id == stream_id)
    }

    /// The open subscriber connection of `client_id` for `stream_id`.
    pub fn subscriber(&self, client_id: &str, stream_id: &str) -> Option<ConnectionRecord> {
        let prefix = format!("{client_id}_");
        self.find(|c| {
            !c.is_publisher && c.stream_id == stream_id && c.connection_id.starts_with(&prefix)
        })
    }

    fn find(&self, predicate: impl Fn(&ConnectionRecord) -> bool) -> Option<ConnectionRecord> {
        self.inner
            .lock()
            .unwrap()
            .connections
            .iter()
            .rev()
            .find(|c| !c.closed && predicate(c))
            .cloned()
    }

    /// Inject a state report for the publisher of `stream_id`.
    ///
    /// Returns false if there is no such connection or its endpoint is gone.
    pub fn emit_publisher(&self, stream_id: &str, state: EngineState, message: Option<&str>) -> bool {
        self.publisher(stream_id)
            .is_some_and(|c| c.events.notify(state, message.map(str::to_string)))
    }

    pub fn emit_subscriber(
        &self,
        client_id: &str,
        stream_id: &str,
        state: EngineState,
        message: Option<&str>,
    ) -> bool {
        self.subscriber(client_id, stream_id)
            .is_some_and(|c| c.events.notify(state, message.map(str::to_string)))
    }

    /// Inject a report on a specific connection, open or closed.
    pub fn emit_to(&self, connection_id: &str, state: EngineState) -> bool {
        let inner = self.inner.lock().unwrap();
        inner
            .connections
            .iter()
            .find(|c| c.connection_id == connection_id)
            .is_some_and(|c| c.events.notify(state, None))
    }

    /// Subscriber keys attached to the fan-out owned by `source_sink`.
    pub fn fan_out_subscribers(&self, source_sink: &str) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .fan_outs
            .get(source_sink)
            .map(|f| f.subscribers.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Subscriber keys attached to the publisher of `stream_id`.
    pub fn publisher_fan_out(&self, stream_id: &str) -> Vec<String> {
        self.publisher(stream_id)
            .map(|c| self.fan_out_subscribers(&c.media_sink()))
            .unwrap_or_default()
    }

    pub fn is_fan_out_closed(&self, source_sink: &str) -> bool {
        self.inner
            .lock()
            .unwrap()
            .fan_outs
            .get(source_sink)
            .is_some_and(|f| f.closed)
    }
}

struct MockConnection {
    id: String,
    inner: Arc<Mutex<MockEngineInner>>,
}

impl MockConnection {
    fn with_record<T>(&self, f: impl FnOnce(&mut ConnectionRecord) -> T) -> Option<T> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .connections
            .iter_mut()
            .find(|c| c.connection_id == self.id)
            .map(f)
    }
}

impl EngineConnection for MockConnection {
    fn set_remote_sdp(&mut self, sdp: &str) -> Result<(), EngineError> {
        if self.inner.lock().unwrap().reject_sdp {
            return Err(EngineError::Rejected("malformed SDP".to_string()));
        }
        self.with_record(|c| c.sdps.push(sdp.to_string()));
        Ok(())
    }

    fn add_remote_candidate(&mut self, candidate: &IceCandidate) -> Result<(), EngineError> {
        if self.inner.lock().unwrap().reject_candidates {
            return Err(EngineError::Rejected("malformed candidate".to_string()));
        }
        self.with_record(|c| c.candidates.push(candidate.clone()));
        Ok(())
    }

    fn media_sink(&self) -> MediaSink {
        MediaSink::new(format!("sink-{}", self.id))
    }

    fn close(&mut self) {
        self.with_record(|c| c.closed = true);
    }
}

struct MockBridge {
    id: String,
    inner: Arc<Mutex<MockEngineInner>>,
}

impl BridgeConnection for MockBridge {
    fn media_sink(&self) -> MediaSink {
        MediaSink::new(format!("bridge-{}", self.id))
    }

    fn close(&mut self) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(bridge) = inner
            .bridges
            .iter_mut()
            .find(|b| b.bridge_stream_id == self.id && !b.closed)
        {
            bridge.closed = true;
        }
    }
}

struct MockFanOut {
    source: String,
    inner: Arc<Mutex<MockEngineInner>>,
}

impl FanOut for MockFanOut {
    fn add_subscriber(&mut self, key: &SubscriberKey, sink: MediaSink) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.reject_attach {
            return Err(EngineError::Rejected("attach refused".to_string()));
        }
        inner
            .fan_outs
            .entry(self.source.clone())
            .or_default()
            .subscribers
            .insert(key.to_string(), sink.as_str().to_string());
        Ok(())
    }

    fn remove_subscriber(&mut self, key: &SubscriberKey) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(fan_out) = inner.fan_outs.get_mut(&self.source) {
            fan_out.subscribers.remove(&key.to_string());
        }
    }

    fn close(&mut self) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(fan_out) = inner.fan_outs.get_mut(&self.source) {
            fan_out.closed = true;
        }
    }
}

impl MediaEngine for MockEngine {
    fn create_connection(
        &self,
        request: ConnectionRequest<'_>,
    ) -> Result<Box<dyn EngineConnection>, EngineError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.reject_connections {
            return Err(EngineError::Unavailable("connection refused".to_string()));
        }
        inner.connections.push(ConnectionRecord {
            connection_id: request.connection_id.to_string(),
            stream_id: request.stream_id.to_string(),
            label: request.label.to_string(),
            is_publisher: request.is_publisher,
            worker_id: request.worker.id(),
            io_worker_id: request.io_worker.id(),
            sdps: Vec::new(),
            candidates: Vec::new(),
            closed: false,
            events: request.events,
        });
        Ok(Box::new(MockConnection {
            id: request.connection_id.to_string(),
            inner: Arc::clone(&self.inner),
        }))
    }

    fn create_bridge(
        &self,
        request: BridgeRequest<'_>,
    ) -> Result<Box<dyn BridgeConnection>, EngineError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.reject_bridges {
            return Err(EngineError::Unavailable("bridge refused".to_string()));
        }
        inner.bridges.push(BridgeRecord {
            bridge_stream_id: request.bridge_stream_id.to_string(),
            src_stream_id: request.src_stream_id.to_string(),
            target: request.target,
            direction: request.direction,
            io_worker_id: request.io_worker.id(),
            closed: false,
        });
        Ok(Box::new(MockBridge {
            id: request.bridge_stream_id.to_string(),
            inner: Arc::clone(&self.inner),
        }))
    }

    fn create_fan_out(&self, source: &MediaSink) -> Result<Box<dyn FanOut>, EngineError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.reject_fan_outs {
            return Err(EngineError::Unavailable("fan-out refused".to_string()));
        }
        inner
            .fan_outs
            .insert(source.as_str().to_string(), FanOutRecord::default());
        Ok(Box::new(MockFanOut {
            source: source.as_str().to_string(),
            inner: Arc::clone(&self.inner),
        }))
    }
}
