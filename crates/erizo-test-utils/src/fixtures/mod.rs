//! Pre-configured contexts and command payloads for erizo tests.
//!
//! - [`TestErizo`] wires a session actor and dispatcher to a [`MockEngine`]
//!   and a [`RecordingRelay`]
//! - `*_command` builders produce raw bus payloads in the canonical schema

use crate::{MockEngine, RecordingRelay};
use erizo_service::actors::{ActorMetrics, SessionActorHandle};
use erizo_service::config::{IceConfig, MediaConfig};
use erizo_service::context::ErizoContext;
use erizo_service::dispatcher::CommandDispatcher;
use erizo_service::engine::LeastLoadedPool;
use erizo_service::relay::EventRelay;
use serde_json::{json, Value};
use std::sync::Arc;

pub const TEST_AGENT_ID: &str = "agent-test";
pub const TEST_ERIZO_ID: &str = "erizo-test";

/// Build a context around the given mocks, with pools on the current runtime.
///
/// Must be called from within a tokio runtime.
pub fn test_context(
    engine: &MockEngine,
    relay: &RecordingRelay,
    workers: usize,
    io_workers: usize,
) -> ErizoContext {
    ErizoContext {
        agent_id: TEST_AGENT_ID.to_string(),
        erizo_id: TEST_ERIZO_ID.to_string(),
        ice: Arc::new(IceConfig::default()),
        media: Arc::new(MediaConfig::with_codecs("opus", "vp8")),
        engine: Arc::new(engine.clone()),
        workers: Arc::new(LeastLoadedPool::on_current_runtime("worker", workers).unwrap()),
        io_workers: Arc::new(LeastLoadedPool::on_current_runtime("io", io_workers).unwrap()),
        relay: Arc::new(relay.clone()),
        metrics: ActorMetrics::new(),
    }
}

/// A running session layer over mocks.
pub struct TestErizo {
    pub engine: MockEngine,
    pub relay: RecordingRelay,
    pub metrics: Arc<ActorMetrics>,
    pub session: SessionActorHandle,
    pub dispatcher: CommandDispatcher,
}

impl TestErizo {
    /// Start with a default engine and two workers per pool.
    pub fn start() -> Self {
        Self::with_engine(MockEngine::new())
    }

    pub fn with_engine(engine: MockEngine) -> Self {
        Self::build(engine, 2, 2)
    }

    pub fn build(engine: MockEngine, workers: usize, io_workers: usize) -> Self {
        let relay = RecordingRelay::new();
        let ctx = test_context(&engine, &relay, workers, io_workers);
        let metrics = Arc::clone(&ctx.metrics);
        let session = SessionActorHandle::new(ctx);
        let relay_cap: Arc<dyn EventRelay> = Arc::new(relay.clone());
        let dispatcher = CommandDispatcher::new(session.clone(), relay_cap);

        Self {
            engine,
            relay,
            metrics,
            session,
            dispatcher,
        }
    }
}

/// Bare `{method, args}` payload.
pub fn command(method: &str, args: Value) -> String {
    json!({ "method": method, "args": args }).to_string()
}

/// Correlated `{corrID, replyTo, data: {method, args}}` payload.
pub fn correlated(corr_id: i64, reply_to: &str, method: &str, args: Value) -> String {
    json!({
        "corrID": corr_id,
        "replyTo": reply_to,
        "data": { "method": method, "args": args },
    })
    .to_string()
}

/// Args of the minimal 4-field `addPublisher` form.
pub fn add_publisher_args(client_id: &str, stream_id: &str, reply_to: &str) -> Value {
    json!([client_id, stream_id, "cam", reply_to])
}

pub fn add_publisher_command(client_id: &str, stream_id: &str, reply_to: &str) -> String {
    command("addPublisher", add_publisher_args(client_id, stream_id, reply_to))
}

pub fn add_subscriber_args(client_id: &str, stream_id: &str, reply_to: &str) -> Value {
    json!([client_id, stream_id, "view", reply_to])
}

pub fn add_subscriber_command(client_id: &str, stream_id: &str, reply_to: &str) -> String {
    command("addSubscriber", add_subscriber_args(client_id, stream_id, reply_to))
}

pub fn remove_publisher_command(client_id: &str, stream_id: &str) -> String {
    command("removePublisher", json!([client_id, stream_id]))
}

pub fn remove_subscriber_command(client_id: &str, stream_id: &str) -> String {
    command("removeSubscriber", json!([client_id, stream_id]))
}

pub fn add_virtual_publisher_command(bridge_stream_id: &str, src_stream_id: &str) -> String {
    command(
        "addVirtualPublisher",
        json!([bridge_stream_id, src_stream_id, "10.0.0.5", 5004, 1111, 2222]),
    )
}

pub fn add_virtual_subscriber_command(bridge_stream_id: &str, src_stream_id: &str) -> String {
    command(
        "addVirtualSubscriber",
        json!([bridge_stream_id, src_stream_id, "10.0.0.6", 6004]),
    )
}

pub fn offer_command(client_id: &str, stream_id: &str, sdp: &str) -> String {
    command(
        "processSignaling",
        json!([client_id, stream_id, { "type": "offer", "sdp": sdp }]),
    )
}

pub fn candidate_command(client_id: &str, stream_id: &str, candidate: &str) -> String {
    command(
        "processSignaling",
        json!([
            client_id,
            stream_id,
            {
                "type": "candidate",
                "candidate": { "sdpMid": "0", "sdpMLineIndex": 0, "candidate": candidate },
            }
        ]),
    )
}
