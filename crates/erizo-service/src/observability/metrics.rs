//! Metrics definitions for the erizo orchestration layer.
//!
//! All metrics follow Prometheus naming conventions:
//! - `erizo_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `method`: the 10 supported command methods plus `unknown`
//! - `outcome`: `ok` plus one value per error kind (6 values)
//! - `role`: publisher, subscriber, bridge_source, bridge_sink
//! - `event_type`: started, publisher_answer, subscriber_answer, ready
//! - `actor_type`: session, endpoint
//!
//! Client, stream and bridge ids are never used as labels.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded. Command handling is an
/// in-process operation plus at most one engine call, so buckets concentrate
/// below 100ms.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("erizo_command".to_string()),
            &[
                0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set command latency buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Registry Metrics (Gauges)
// ============================================================================

/// Set the number of clients owning at least one endpoint.
///
/// Metric: `erizo_clients_active`
pub fn set_clients_active(count: usize) {
    // usize to f64 conversion is safe for realistic client counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("erizo_clients_active").set(count as f64);
}

/// Set the number of registered bridge endpoints.
///
/// Metric: `erizo_bridges_active`
pub fn set_bridges_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("erizo_bridges_active").set(count as f64);
}

/// Set the number of live endpoints for one role.
///
/// Metric: `erizo_endpoints_active`
/// Labels: `role`
pub fn set_endpoints_active(role: &'static str, count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("erizo_endpoints_active", "role" => role).set(count as f64);
}

/// Set the mailbox depth for an actor type.
///
/// Metric: `erizo_actor_mailbox_depth`
/// Labels: `actor_type`
pub fn set_actor_mailbox_depth(actor_type: &'static str, depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("erizo_actor_mailbox_depth", "actor_type" => actor_type).set(depth as f64);
}

// ============================================================================
// Command Metrics
// ============================================================================

/// Record one dispatched command and its outcome.
///
/// Metric: `erizo_commands_total`
/// Labels: `method`, `outcome`
pub fn record_command(method: &'static str, outcome: &'static str) {
    counter!("erizo_commands_total", "method" => method, "outcome" => outcome).increment(1);
}

/// Record command handling latency, from decode to registry update.
///
/// Metric: `erizo_command_duration_seconds`
/// Labels: `method`
pub fn record_command_duration(method: &'static str, duration: Duration) {
    histogram!("erizo_command_duration_seconds", "method" => method)
        .record(duration.as_secs_f64());
}

// ============================================================================
// Event Metrics (Counters)
// ============================================================================

/// Record one lifecycle event handed to the relay.
///
/// Metric: `erizo_events_published_total`
/// Labels: `event_type`
pub fn record_event_published(event_type: &'static str) {
    counter!("erizo_events_published_total", "event_type" => event_type).increment(1);
}

/// Record an outbound message dropped before reaching the bus.
///
/// Metric: `erizo_events_dropped_total`
/// Labels: `reason` (queue_full, closed, publish_failed)
pub fn record_event_dropped(reason: &'static str) {
    counter!("erizo_events_dropped_total", "reason" => reason).increment(1);
}

/// Record an engine rejection.
///
/// Metric: `erizo_engine_rejections_total`
/// Labels: `operation` (create_connection, create_bridge, create_fan_out,
/// set_remote_sdp, add_remote_candidate, attach)
pub fn record_engine_rejection(operation: &'static str) {
    counter!("erizo_engine_rejections_total", "operation" => operation).increment(1);
}

/// Record an actor task that ended abnormally.
///
/// Metric: `erizo_actor_panics_total`
/// Labels: `actor_type`
pub fn record_actor_panic(actor_type: &'static str) {
    counter!("erizo_actor_panics_total", "actor_type" => actor_type).increment(1);
}
