//! `EndpointActor` - one actor per stream endpoint.
//!
//! Each `EndpointActor`:
//! - Exclusively owns one engine connection (WebRTC) or bridge link (plain RTP)
//! - Owns the fan-out for publisher and bridge-source roles
//! - Runs on the worker it was placed on, so every engine call for this
//!   endpoint happens on the same execution context
//! - Turns engine state reports into lifecycle transitions and outbound events
//!
//! # Lifecycle
//!
//! `Created → Negotiating → SdpExchanged → Ready → Closed`. Bridges have no
//! negotiation and start `Ready`. `Closed` is entered on an explicit close, on
//! cancellation, or when every handle is dropped. Closing clears the event
//! target before releasing the fan-out and the engine connection, so a closed
//! endpoint never reaches the relay.

use super::messages::{EndpointMessage, EndpointRole, EndpointState};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use crate::context::ErizoContext;
use crate::engine::{
    BridgeConnection, BridgeDirection, BridgeRequest, ConnectionRequest, EngineConnection,
    EngineEvent, EngineEventSink, EngineState, FanOut, IceCandidate, MediaSink, SubscriberKey,
    WorkerHandle, WorkerLease,
};
use crate::errors::ErizoError;
use crate::observability::metrics;
use crate::protocol::{EventData, EventEnvelope, EventType, OutboundMessage};
use crate::relay::EventRelay;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the endpoint mailbox.
const ENDPOINT_CHANNEL_BUFFER: usize = 64;

/// Destination and envelope fields for one endpoint's lifecycle events.
#[derive(Clone)]
pub struct EventTarget {
    pub relay: Arc<dyn EventRelay>,
    pub reply_to: String,
    pub corr_id: Option<i64>,
    pub agent_id: String,
    pub erizo_id: String,
    pub room_id: Option<String>,
}

impl std::fmt::Debug for EventTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventTarget")
            .field("reply_to", &self.reply_to)
            .field("corr_id", &self.corr_id)
            .finish_non_exhaustive()
    }
}

/// Parameters for a publisher or subscriber endpoint.
#[derive(Debug)]
pub struct WebRtcEndpointSpec {
    pub endpoint_id: String,
    pub client_id: String,
    pub stream_id: String,
    pub label: String,
    pub role: EndpointRole,
    pub events: EventTarget,
}

/// Parameters for a bridge endpoint.
#[derive(Debug)]
pub struct BridgeEndpointSpec {
    pub bridge_stream_id: String,
    pub src_stream_id: String,
    pub target: SocketAddr,
    pub direction: BridgeDirection,
}

#[derive(Debug)]
struct EndpointIdentity {
    endpoint_id: String,
    stream_id: String,
    client_id: Option<String>,
    role: EndpointRole,
    media_sink: MediaSink,
    worker_id: String,
}

/// Handle to an `EndpointActor`.
#[derive(Clone, Debug)]
pub struct EndpointHandle {
    sender: mpsc::Sender<EndpointMessage>,
    state: watch::Receiver<EndpointState>,
    identity: Arc<EndpointIdentity>,
}

impl EndpointHandle {
    #[must_use]
    pub fn endpoint_id(&self) -> &str {
        &self.identity.endpoint_id
    }

    /// Stream id for WebRTC endpoints, bridge-stream id for bridges.
    #[must_use]
    pub fn stream_id(&self) -> &str {
        &self.identity.stream_id
    }

    /// Owning client; `None` for bridges.
    #[must_use]
    pub fn client_id(&self) -> Option<&str> {
        self.identity.client_id.as_deref()
    }

    #[must_use]
    pub fn role(&self) -> EndpointRole {
        self.identity.role
    }

    #[must_use]
    pub fn media_sink(&self) -> &MediaSink {
        &self.identity.media_sink
    }

    #[must_use]
    pub fn worker_id(&self) -> &str {
        &self.identity.worker_id
    }

    #[must_use]
    pub fn state(&self) -> EndpointState {
        *self.state.borrow()
    }

    /// True iff the endpoint is `Ready` and owns a fan-out.
    #[must_use]
    pub fn is_ready_to_subscribe(&self) -> bool {
        self.role().is_source() && self.state() == EndpointState::Ready
    }

    /// Wait until the endpoint reaches `target` (or any later state).
    pub async fn wait_for_state(&self, target: EndpointState) -> Result<EndpointState, ErizoError> {
        let mut state = self.state.clone();
        let reached = state
            .wait_for(|current| *current >= target)
            .await
            .map_err(|_| ErizoError::EndpointClosed)?;
        Ok(*reached)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> EndpointMessage,
    ) -> Result<T, ErizoError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| ErizoError::EndpointClosed)?;
        rx.await.map_err(|_| ErizoError::EndpointClosed)
    }

    /// Apply a remote SDP offer. Engine rejection leaves the state unchanged.
    pub async fn set_remote_sdp(&self, sdp: String) -> Result<(), ErizoError> {
        self.request(|respond_to| EndpointMessage::SetRemoteSdp { sdp, respond_to })
            .await?
    }

    pub async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), ErizoError> {
        self.request(|respond_to| EndpointMessage::AddRemoteCandidate {
            candidate,
            respond_to,
        })
        .await?
    }

    /// Attach a downstream sink to this endpoint's fan-out.
    pub async fn attach(&self, key: SubscriberKey, sink: MediaSink) -> Result<(), ErizoError> {
        self.request(|respond_to| EndpointMessage::AttachSubscriber {
            key,
            sink,
            respond_to,
        })
        .await?
    }

    pub async fn detach(&self, key: SubscriberKey) -> Result<(), ErizoError> {
        self.request(|respond_to| EndpointMessage::DetachSubscriber { key, respond_to })
            .await
    }

    /// Close the endpoint. Returns once engine resources are released.
    pub async fn close(&self) -> Result<(), ErizoError> {
        self.request(|respond_to| EndpointMessage::Close { respond_to })
            .await
    }
}

enum EndpointMedia {
    WebRtc(Box<dyn EngineConnection>),
    Bridge(Box<dyn BridgeConnection>),
}

impl EndpointMedia {
    fn close(&mut self) {
        match self {
            EndpointMedia::WebRtc(connection) => connection.close(),
            EndpointMedia::Bridge(bridge) => bridge.close(),
        }
    }
}

/// The `EndpointActor` implementation.
pub struct EndpointActor {
    identity: Arc<EndpointIdentity>,
    receiver: mpsc::Receiver<EndpointMessage>,
    /// Engine state reports; `None` for bridges and after close.
    engine_events: Option<mpsc::UnboundedReceiver<EngineEvent>>,
    media: Option<EndpointMedia>,
    fan_out: Option<Box<dyn FanOut>>,
    /// Cleared as the first step of closing.
    events: Option<EventTarget>,
    state: watch::Sender<EndpointState>,
    cancel_token: CancellationToken,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
    leases: Vec<WorkerLease>,
}

impl EndpointActor {
    /// Create a publisher or subscriber endpoint and spawn its actor.
    ///
    /// Picks a worker and an I/O worker, creates the engine connection (and
    /// the fan-out for publishers). On any failure nothing is left running.
    pub fn spawn_webrtc(
        ctx: &ErizoContext,
        spec: WebRtcEndpointSpec,
        cancel_token: CancellationToken,
    ) -> Result<EndpointHandle, ErizoError> {
        let worker = ctx.workers.pick_worker()?;
        let io_worker = ctx.io_workers.pick_worker()?;
        let (event_sink, engine_events) = EngineEventSink::channel();

        let mut connection = ctx
            .engine
            .create_connection(ConnectionRequest {
                connection_id: &spec.endpoint_id,
                stream_id: &spec.stream_id,
                label: &spec.label,
                is_publisher: spec.role == EndpointRole::Publisher,
                worker: &worker,
                io_worker: &io_worker,
                ice: &ctx.ice,
                media: &ctx.media,
                events: event_sink,
            })
            .map_err(|e| {
                metrics::record_engine_rejection("create_connection");
                ErizoError::from(e)
            })?;
        let media_sink = connection.media_sink();

        let fan_out = if spec.role.is_source() {
            match ctx.engine.create_fan_out(&media_sink) {
                Ok(fan_out) => Some(fan_out),
                Err(e) => {
                    metrics::record_engine_rejection("create_fan_out");
                    connection.close();
                    return Err(e.into());
                }
            }
        } else {
            None
        };

        let identity = EndpointIdentity {
            endpoint_id: spec.endpoint_id,
            stream_id: spec.stream_id,
            client_id: Some(spec.client_id),
            role: spec.role,
            media_sink,
            worker_id: worker.id(),
        };
        let leases = vec![worker.lease(), io_worker.lease()];

        Ok(Self::start(
            identity,
            EndpointMedia::WebRtc(connection),
            fan_out,
            Some(engine_events),
            Some(spec.events),
            EndpointState::Created,
            &worker,
            leases,
            cancel_token,
            Arc::clone(&ctx.metrics),
        ))
    }

    /// Open a bridge endpoint and spawn its actor on an I/O worker.
    ///
    /// An opened bridge is immediately `Ready`; it has no reply address and
    /// emits no events.
    pub fn spawn_bridge(
        ctx: &ErizoContext,
        spec: BridgeEndpointSpec,
        cancel_token: CancellationToken,
    ) -> Result<EndpointHandle, ErizoError> {
        let io_worker = ctx.io_workers.pick_worker()?;
        let role = match spec.direction {
            BridgeDirection::Inbound { .. } => EndpointRole::BridgeSource,
            BridgeDirection::Outbound => EndpointRole::BridgeSink,
        };

        let mut bridge = ctx
            .engine
            .create_bridge(BridgeRequest {
                bridge_stream_id: &spec.bridge_stream_id,
                src_stream_id: &spec.src_stream_id,
                target: spec.target,
                direction: spec.direction,
                io_worker: &io_worker,
            })
            .map_err(|e| {
                metrics::record_engine_rejection("create_bridge");
                ErizoError::from(e)
            })?;
        let media_sink = bridge.media_sink();

        let fan_out = if role.is_source() {
            match ctx.engine.create_fan_out(&media_sink) {
                Ok(fan_out) => Some(fan_out),
                Err(e) => {
                    metrics::record_engine_rejection("create_fan_out");
                    bridge.close();
                    return Err(e.into());
                }
            }
        } else {
            None
        };

        let identity = EndpointIdentity {
            endpoint_id: spec.bridge_stream_id.clone(),
            stream_id: spec.bridge_stream_id,
            client_id: None,
            role,
            media_sink,
            worker_id: io_worker.id(),
        };
        let leases = vec![io_worker.lease()];

        Ok(Self::start(
            identity,
            EndpointMedia::Bridge(bridge),
            fan_out,
            None,
            None,
            EndpointState::Ready,
            &io_worker,
            leases,
            cancel_token,
            Arc::clone(&ctx.metrics),
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn start(
        identity: EndpointIdentity,
        media: EndpointMedia,
        fan_out: Option<Box<dyn FanOut>>,
        engine_events: Option<mpsc::UnboundedReceiver<EngineEvent>>,
        events: Option<EventTarget>,
        initial_state: EndpointState,
        worker: &WorkerHandle,
        leases: Vec<WorkerLease>,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> EndpointHandle {
        let (sender, receiver) = mpsc::channel(ENDPOINT_CHANNEL_BUFFER);
        let (state_tx, state_rx) = watch::channel(initial_state);
        let identity = Arc::new(identity);
        let role = identity.role;

        metrics.endpoint_created(role);

        let actor = Self {
            identity: Arc::clone(&identity),
            receiver,
            engine_events,
            media: Some(media),
            fan_out,
            events,
            state: state_tx,
            cancel_token,
            metrics: Arc::clone(&metrics),
            mailbox: MailboxMonitor::new(ActorType::Endpoint, &identity.endpoint_id),
            leases,
        };

        let task = worker.spawn(actor.run());
        let endpoint_id = identity.endpoint_id.clone();
        worker.spawn(async move {
            if let Err(e) = task.await {
                if e.is_panic() {
                    error!(
                        target: "erizo.actor.endpoint",
                        endpoint_id = %endpoint_id,
                        "EndpointActor panicked"
                    );
                    metrics.record_panic();
                    metrics.endpoint_closed(role);
                }
            }
        });

        EndpointHandle {
            sender,
            state: state_rx,
            identity,
        }
    }

    #[instrument(
        skip_all,
        name = "erizo.actor.endpoint",
        fields(
            endpoint_id = %self.identity.endpoint_id,
            stream_id = %self.identity.stream_id,
            role = self.identity.role.as_str(),
            worker = %self.identity.worker_id
        )
    )]
    async fn run(mut self) {
        debug!(
            target: "erizo.actor.endpoint",
            endpoint_id = %self.identity.endpoint_id,
            "EndpointActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    self.release("cancelled");
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            let should_exit = self.handle_message(message);
                            self.mailbox.record_dequeue();

                            if should_exit {
                                break;
                            }
                        }
                        None => {
                            self.release("all handles dropped");
                            break;
                        }
                    }
                }

                event = next_engine_event(&mut self.engine_events) => {
                    match event {
                        Some(event) => self.handle_engine_event(event),
                        // Engine dropped its sink; keep serving commands.
                        None => self.engine_events = None,
                    }
                }
            }
        }

        debug!(
            target: "erizo.actor.endpoint",
            endpoint_id = %self.identity.endpoint_id,
            messages_processed = self.mailbox.messages_processed(),
            "EndpointActor stopped"
        );
    }

    /// Handle a single message. Returns true if the actor should exit.
    fn handle_message(&mut self, message: EndpointMessage) -> bool {
        match message {
            EndpointMessage::SetRemoteSdp { sdp, respond_to } => {
                let _ = respond_to.send(self.handle_set_remote_sdp(&sdp));
                false
            }

            EndpointMessage::AddRemoteCandidate {
                candidate,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_add_candidate(&candidate));
                false
            }

            EndpointMessage::AttachSubscriber {
                key,
                sink,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_attach(&key, sink));
                false
            }

            EndpointMessage::DetachSubscriber { key, respond_to } => {
                if let Some(fan_out) = self.fan_out.as_mut() {
                    fan_out.remove_subscriber(&key);
                    debug!(
                        target: "erizo.actor.endpoint",
                        endpoint_id = %self.identity.endpoint_id,
                        subscriber = %key,
                        "Subscriber detached"
                    );
                }
                let _ = respond_to.send(());
                false
            }

            EndpointMessage::Close { respond_to } => {
                self.release("removed");
                let _ = respond_to.send(());
                true
            }
        }
    }

    fn webrtc_connection(&mut self) -> Result<&mut dyn EngineConnection, ErizoError> {
        match self.media.as_mut() {
            Some(EndpointMedia::WebRtc(connection)) => Ok(connection.as_mut()),
            Some(EndpointMedia::Bridge(_)) => Err(ErizoError::EngineRejected(
                "bridge endpoints do not take signaling".to_string(),
            )),
            None => Err(ErizoError::EndpointClosed),
        }
    }

    fn handle_set_remote_sdp(&mut self, sdp: &str) -> Result<(), ErizoError> {
        let endpoint_id = self.identity.endpoint_id.clone();
        self.webrtc_connection()?.set_remote_sdp(sdp).map_err(|e| {
            warn!(
                target: "erizo.actor.endpoint",
                endpoint_id = %endpoint_id,
                error = %e,
                "Engine rejected remote SDP"
            );
            metrics::record_engine_rejection("set_remote_sdp");
            ErizoError::from(e)
        })
    }

    fn handle_add_candidate(&mut self, candidate: &IceCandidate) -> Result<(), ErizoError> {
        let endpoint_id = self.identity.endpoint_id.clone();
        self.webrtc_connection()?
            .add_remote_candidate(candidate)
            .map_err(|e| {
                warn!(
                    target: "erizo.actor.endpoint",
                    endpoint_id = %endpoint_id,
                    sdp_mid = %candidate.sdp_mid,
                    error = %e,
                    "Engine rejected remote candidate"
                );
                metrics::record_engine_rejection("add_remote_candidate");
                ErizoError::from(e)
            })
    }

    fn handle_attach(&mut self, key: &SubscriberKey, sink: MediaSink) -> Result<(), ErizoError> {
        let Some(fan_out) = self.fan_out.as_mut() else {
            return Err(ErizoError::Internal(format!(
                "endpoint {} has no fan-out",
                self.identity.endpoint_id
            )));
        };
        fan_out.add_subscriber(key, sink).map_err(|e| {
            metrics::record_engine_rejection("attach");
            ErizoError::from(e)
        })?;
        debug!(
            target: "erizo.actor.endpoint",
            endpoint_id = %self.identity.endpoint_id,
            subscriber = %key,
            "Subscriber attached"
        );
        Ok(())
    }

    fn handle_engine_event(&mut self, event: EngineEvent) {
        let current = *self.state.borrow();
        match event.state {
            EngineState::Initial => {
                if current == EndpointState::Created {
                    self.transition(EndpointState::Negotiating);
                    self.emit(EventType::Started, None);
                }
            }
            EngineState::SdpProcessed => {
                if current < EndpointState::SdpExchanged {
                    self.transition(EndpointState::SdpExchanged);
                }
                let answer = if self.identity.role == EndpointRole::Publisher {
                    EventType::PublisherAnswer
                } else {
                    EventType::SubscriberAnswer
                };
                self.emit(answer, event.message);
            }
            EngineState::Ready => {
                if current < EndpointState::Ready {
                    self.transition(EndpointState::Ready);
                    self.emit(EventType::Ready, None);
                }
            }
            EngineState::Failed => {
                warn!(
                    target: "erizo.actor.endpoint",
                    endpoint_id = %self.identity.endpoint_id,
                    state = current.as_str(),
                    "Engine reported transport failure"
                );
            }
            EngineState::Gathered | EngineState::Finished => {
                debug!(
                    target: "erizo.actor.endpoint",
                    endpoint_id = %self.identity.endpoint_id,
                    engine_state = ?event.state,
                    "Engine state ignored"
                );
            }
        }
    }

    fn transition(&self, next: EndpointState) {
        let previous = self.state.send_replace(next);
        debug!(
            target: "erizo.actor.endpoint",
            endpoint_id = %self.identity.endpoint_id,
            from = previous.as_str(),
            to = next.as_str(),
            "Endpoint state changed"
        );
    }

    fn emit(&self, event_type: EventType, sdp: Option<String>) {
        let Some(target) = self.events.as_ref() else {
            return;
        };

        let data = EventData {
            event_type,
            agent_id: target.agent_id.clone(),
            erizo_id: target.erizo_id.clone(),
            stream_id: self.identity.stream_id.clone(),
            client_id: self.identity.client_id.clone().unwrap_or_default(),
            sdp,
            room_id: target.room_id.clone(),
        };
        let envelope = EventEnvelope::new(data, target.corr_id);

        match OutboundMessage::encode(&target.reply_to, &envelope) {
            Ok(message) => {
                target.relay.publish(message);
                metrics::record_event_published(event_type.as_str());
                debug!(
                    target: "erizo.actor.endpoint",
                    endpoint_id = %self.identity.endpoint_id,
                    event_type = event_type.as_str(),
                    reply_to = %target.reply_to,
                    "Event relayed"
                );
            }
            Err(e) => {
                warn!(
                    target: "erizo.actor.endpoint",
                    endpoint_id = %self.identity.endpoint_id,
                    error = %e,
                    "Failed to encode event"
                );
            }
        }
    }

    /// Release everything this endpoint owns and enter `Closed`.
    fn release(&mut self, reason: &str) {
        // Listener first: nothing below may reach the relay.
        self.events = None;
        self.engine_events = None;

        if let Some(mut fan_out) = self.fan_out.take() {
            fan_out.close();
        }
        if let Some(mut media) = self.media.take() {
            media.close();
        }
        self.leases.clear();
        self.state.send_replace(EndpointState::Closed);
        self.metrics.endpoint_closed(self.identity.role);

        info!(
            target: "erizo.actor.endpoint",
            endpoint_id = %self.identity.endpoint_id,
            stream_id = %self.identity.stream_id,
            role = self.identity.role.as_str(),
            reason = reason,
            "Endpoint closed"
        );
    }
}

async fn next_engine_event(
    events: &mut Option<mpsc::UnboundedReceiver<EngineEvent>>,
) -> Option<EngineEvent> {
    match events {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::{IceConfig, MediaConfig};
    use crate::engine::{EngineError, LeastLoadedPool, MediaEngine};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeState {
        sinks: Vec<EngineEventSink>,
        closed: Vec<String>,
        sdps: Vec<String>,
        attached: Vec<String>,
        reject_sdp: bool,
    }

    #[derive(Clone, Default)]
    struct FakeEngine {
        state: Arc<Mutex<FakeState>>,
    }

    struct FakeConnection {
        id: String,
        state: Arc<Mutex<FakeState>>,
    }

    impl EngineConnection for FakeConnection {
        fn set_remote_sdp(&mut self, sdp: &str) -> Result<(), EngineError> {
            let mut state = self.state.lock().unwrap();
            if state.reject_sdp {
                return Err(EngineError::Rejected("bad sdp".to_string()));
            }
            state.sdps.push(sdp.to_string());
            Ok(())
        }

        fn add_remote_candidate(&mut self, _candidate: &IceCandidate) -> Result<(), EngineError> {
            Ok(())
        }

        fn media_sink(&self) -> MediaSink {
            MediaSink::new(format!("sink-{}", self.id))
        }

        fn close(&mut self) {
            self.state.lock().unwrap().closed.push(self.id.clone());
        }
    }

    struct FakeBridge {
        id: String,
        state: Arc<Mutex<FakeState>>,
    }

    impl BridgeConnection for FakeBridge {
        fn media_sink(&self) -> MediaSink {
            MediaSink::new(format!("sink-{}", self.id))
        }

        fn close(&mut self) {
            self.state.lock().unwrap().closed.push(self.id.clone());
        }
    }

    struct FakeFanOut {
        source: String,
        state: Arc<Mutex<FakeState>>,
    }

    impl FanOut for FakeFanOut {
        fn add_subscriber(&mut self, key: &SubscriberKey, _sink: MediaSink) -> Result<(), EngineError> {
            self.state.lock().unwrap().attached.push(key.to_string());
            Ok(())
        }

        fn remove_subscriber(&mut self, key: &SubscriberKey) {
            let key = key.to_string();
            self.state.lock().unwrap().attached.retain(|k| *k != key);
        }

        fn close(&mut self) {
            self.state
                .lock()
                .unwrap()
                .closed
                .push(format!("fanout-{}", self.source));
        }
    }

    impl MediaEngine for FakeEngine {
        fn create_connection(
            &self,
            request: ConnectionRequest<'_>,
        ) -> Result<Box<dyn EngineConnection>, EngineError> {
            self.state.lock().unwrap().sinks.push(request.events);
            Ok(Box::new(FakeConnection {
                id: request.connection_id.to_string(),
                state: Arc::clone(&self.state),
            }))
        }

        fn create_bridge(
            &self,
            request: BridgeRequest<'_>,
        ) -> Result<Box<dyn BridgeConnection>, EngineError> {
            Ok(Box::new(FakeBridge {
                id: request.bridge_stream_id.to_string(),
                state: Arc::clone(&self.state),
            }))
        }

        fn create_fan_out(&self, source: &MediaSink) -> Result<Box<dyn FanOut>, EngineError> {
            Ok(Box::new(FakeFanOut {
                source: source.to_string(),
                state: Arc::clone(&self.state),
            }))
        }
    }

    #[derive(Default)]
    struct VecRelay {
        messages: Mutex<Vec<OutboundMessage>>,
    }

    impl EventRelay for VecRelay {
        fn publish(&self, message: OutboundMessage) {
            self.messages.lock().unwrap().push(message);
        }
    }

    fn context(engine: &FakeEngine, relay: &Arc<VecRelay>) -> ErizoContext {
        ErizoContext {
            agent_id: "agent-1".to_string(),
            erizo_id: "erizo-1".to_string(),
            ice: Arc::new(IceConfig::default()),
            media: Arc::new(MediaConfig::with_codecs("opus", "vp8")),
            engine: Arc::new(engine.clone()),
            workers: Arc::new(LeastLoadedPool::on_current_runtime("worker", 2).unwrap()),
            io_workers: Arc::new(LeastLoadedPool::on_current_runtime("io", 2).unwrap()),
            relay: Arc::clone(relay) as Arc<dyn EventRelay>,
            metrics: ActorMetrics::new(),
        }
    }

    fn publisher_spec(ctx: &ErizoContext, corr_id: Option<i64>) -> WebRtcEndpointSpec {
        WebRtcEndpointSpec {
            endpoint_id: "c1_0".to_string(),
            client_id: "c1".to_string(),
            stream_id: "s1".to_string(),
            label: "cam".to_string(),
            role: EndpointRole::Publisher,
            events: EventTarget {
                relay: Arc::clone(&ctx.relay),
                reply_to: "r1".to_string(),
                corr_id,
                agent_id: ctx.agent_id.clone(),
                erizo_id: ctx.erizo_id.clone(),
                room_id: None,
            },
        }
    }

    fn engine_sink(engine: &FakeEngine) -> EngineEventSink {
        engine.state.lock().unwrap().sinks.last().cloned().unwrap()
    }

    fn event_types(relay: &VecRelay) -> Vec<String> {
        relay
            .messages
            .lock()
            .unwrap()
            .iter()
            .map(|m| {
                let value: serde_json::Value = serde_json::from_str(&m.payload).unwrap();
                value["data"]["type"].as_str().unwrap().to_string()
            })
            .collect()
    }

    #[tokio::test]
    async fn test_publisher_lifecycle_and_events() {
        let engine = FakeEngine::default();
        let relay = Arc::new(VecRelay::default());
        let ctx = context(&engine, &relay);

        let handle =
            EndpointActor::spawn_webrtc(&ctx, publisher_spec(&ctx, None), CancellationToken::new())
                .unwrap();
        assert_eq!(handle.state(), EndpointState::Created);
        assert!(!handle.is_ready_to_subscribe());
        assert_eq!(ctx.metrics.snapshot().publishers, 1);

        let sink = engine_sink(&engine);
        sink.notify(EngineState::Initial, None);
        sink.notify(EngineState::SdpProcessed, Some("v=0 answer".to_string()));
        sink.notify(EngineState::Ready, None);

        let reached = handle.wait_for_state(EndpointState::Ready).await.unwrap();
        assert_eq!(reached, EndpointState::Ready);
        assert!(handle.is_ready_to_subscribe());
        assert_eq!(
            event_types(&relay),
            vec!["started", "publisher_answer", "ready"]
        );

        let messages = relay.messages.lock().unwrap();
        let answer: serde_json::Value =
            serde_json::from_str(&messages.get(1).unwrap().payload).unwrap();
        assert_eq!(answer["data"]["sdp"], "v=0 answer");
        assert_eq!(answer["data"]["clientId"], "c1");
        assert!(answer.get("corrID").is_none());
    }

    #[tokio::test]
    async fn test_correlated_events_carry_corr_id() {
        let engine = FakeEngine::default();
        let relay = Arc::new(VecRelay::default());
        let ctx = context(&engine, &relay);

        let handle = EndpointActor::spawn_webrtc(
            &ctx,
            publisher_spec(&ctx, Some(77)),
            CancellationToken::new(),
        )
        .unwrap();
        engine_sink(&engine).notify(EngineState::Ready, None);
        handle.wait_for_state(EndpointState::Ready).await.unwrap();

        let messages = relay.messages.lock().unwrap();
        let ready: serde_json::Value =
            serde_json::from_str(&messages.first().unwrap().payload).unwrap();
        assert_eq!(ready["corrID"], 77);
        assert_eq!(ready["type"], "callback");
    }

    #[tokio::test]
    async fn test_duplicate_engine_reports_do_not_repeat_events() {
        let engine = FakeEngine::default();
        let relay = Arc::new(VecRelay::default());
        let ctx = context(&engine, &relay);

        let handle =
            EndpointActor::spawn_webrtc(&ctx, publisher_spec(&ctx, None), CancellationToken::new())
                .unwrap();
        let sink = engine_sink(&engine);
        sink.notify(EngineState::Ready, None);
        sink.notify(EngineState::Initial, None);
        sink.notify(EngineState::Ready, None);
        sink.notify(EngineState::Failed, None);
        handle.wait_for_state(EndpointState::Ready).await.unwrap();

        // Drain the mailbox so every report has been handled.
        handle.detach(SubscriberKey::Client("nobody".to_string())).await.unwrap();

        assert_eq!(event_types(&relay), vec!["ready"]);
        assert_eq!(handle.state(), EndpointState::Ready);
    }

    #[tokio::test]
    async fn test_rejected_sdp_leaves_state_unchanged() {
        let engine = FakeEngine::default();
        let relay = Arc::new(VecRelay::default());
        let ctx = context(&engine, &relay);
        engine.state.lock().unwrap().reject_sdp = true;

        let handle =
            EndpointActor::spawn_webrtc(&ctx, publisher_spec(&ctx, None), CancellationToken::new())
                .unwrap();

        let result = handle.set_remote_sdp("garbage".to_string()).await;
        assert!(matches!(result, Err(ErizoError::EngineRejected(_))));
        assert_eq!(handle.state(), EndpointState::Created);

        engine.state.lock().unwrap().reject_sdp = false;
        handle.set_remote_sdp("v=0".to_string()).await.unwrap();
        assert_eq!(engine.state.lock().unwrap().sdps, vec!["v=0".to_string()]);
    }

    #[tokio::test]
    async fn test_close_releases_and_silences_endpoint() {
        let engine = FakeEngine::default();
        let relay = Arc::new(VecRelay::default());
        let ctx = context(&engine, &relay);

        let handle =
            EndpointActor::spawn_webrtc(&ctx, publisher_spec(&ctx, None), CancellationToken::new())
                .unwrap();
        let sink = engine_sink(&engine);

        handle.close().await.unwrap();

        assert_eq!(handle.state(), EndpointState::Closed);
        let closed = engine.state.lock().unwrap().closed.clone();
        assert_eq!(closed, vec!["fanout-sink-c1_0".to_string(), "c1_0".to_string()]);

        // Late engine reports are dropped and never reach the relay.
        assert!(!sink.notify(EngineState::Ready, None));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(relay.messages.lock().unwrap().is_empty());

        // Further requests fail cleanly.
        let result = handle.set_remote_sdp("v=0".to_string()).await;
        assert!(matches!(result, Err(ErizoError::EndpointClosed)));
        assert_eq!(ctx.metrics.snapshot().publishers, 0);
    }

    #[tokio::test]
    async fn test_cancellation_closes_endpoint() {
        let engine = FakeEngine::default();
        let relay = Arc::new(VecRelay::default());
        let ctx = context(&engine, &relay);
        let token = CancellationToken::new();

        let handle =
            EndpointActor::spawn_webrtc(&ctx, publisher_spec(&ctx, None), token.child_token())
                .unwrap();
        token.cancel();

        let state = handle.wait_for_state(EndpointState::Closed).await.unwrap();
        assert_eq!(state, EndpointState::Closed);
    }

    #[tokio::test]
    async fn test_bridge_source_is_ready_and_silent() {
        let engine = FakeEngine::default();
        let relay = Arc::new(VecRelay::default());
        let ctx = context(&engine, &relay);

        let handle = EndpointActor::spawn_bridge(
            &ctx,
            BridgeEndpointSpec {
                bridge_stream_id: "b1".to_string(),
                src_stream_id: "s9".to_string(),
                target: "10.0.0.5:5004".parse().unwrap(),
                direction: BridgeDirection::Inbound {
                    video_ssrc: 1,
                    audio_ssrc: 2,
                },
            },
            CancellationToken::new(),
        )
        .unwrap();

        assert_eq!(handle.role(), EndpointRole::BridgeSource);
        assert!(handle.is_ready_to_subscribe());
        assert_eq!(handle.client_id(), None);

        handle
            .attach(SubscriberKey::Client("c2".to_string()), MediaSink::new("sink-c2"))
            .await
            .unwrap();
        assert_eq!(engine.state.lock().unwrap().attached, vec!["sub:c2".to_string()]);

        let result = handle.set_remote_sdp("v=0".to_string()).await;
        assert!(matches!(result, Err(ErizoError::EngineRejected(_))));
        assert!(relay.messages.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_subscriber_cannot_accept_attachments() {
        let engine = FakeEngine::default();
        let relay = Arc::new(VecRelay::default());
        let ctx = context(&engine, &relay);
        let mut spec = publisher_spec(&ctx, None);
        spec.role = EndpointRole::Subscriber;

        let handle = EndpointActor::spawn_webrtc(&ctx, spec, CancellationToken::new()).unwrap();
        engine_sink(&engine).notify(EngineState::Ready, None);
        handle.wait_for_state(EndpointState::Ready).await.unwrap();

        assert!(!handle.is_ready_to_subscribe());
        let result = handle
            .attach(SubscriberKey::Client("c3".to_string()), MediaSink::new("x"))
            .await;
        assert!(matches!(result, Err(ErizoError::Internal(_))));
    }

    #[tokio::test]
    async fn test_placement_uses_least_loaded_workers() {
        let engine = FakeEngine::default();
        let relay = Arc::new(VecRelay::default());
        let ctx = context(&engine, &relay);

        let first =
            EndpointActor::spawn_webrtc(&ctx, publisher_spec(&ctx, None), CancellationToken::new())
                .unwrap();
        let mut spec = publisher_spec(&ctx, None);
        spec.endpoint_id = "c1_1".to_string();
        spec.stream_id = "s2".to_string();
        let second = EndpointActor::spawn_webrtc(&ctx, spec, CancellationToken::new()).unwrap();

        assert_eq!(first.worker_id(), "worker-0");
        assert_eq!(second.worker_id(), "worker-1");

        first.close().await.unwrap();
        let mut spec = publisher_spec(&ctx, None);
        spec.endpoint_id = "c1_2".to_string();
        spec.stream_id = "s3".to_string();
        let third = EndpointActor::spawn_webrtc(&ctx, spec, CancellationToken::new()).unwrap();
        assert_eq!(third.worker_id(), "worker-0");
    }
}
