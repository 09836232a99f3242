//! Actor metrics and mailbox monitoring.
//!
//! | Actor Type | Normal | Warning | Critical |
//! |------------|--------|---------|----------|
//! | Session    | < 100  | 100-500 | > 500    |
//! | Endpoint   | < 20   | 20-100  | > 100    |

use super::messages::EndpointRole;
use crate::observability::metrics;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Mailbox depth thresholds for the session actor.
pub const SESSION_MAILBOX_NORMAL: usize = 100;
pub const SESSION_MAILBOX_WARNING: usize = 500;

/// Mailbox depth thresholds for endpoint actors.
pub const ENDPOINT_MAILBOX_NORMAL: usize = 20;
pub const ENDPOINT_MAILBOX_WARNING: usize = 100;

/// Actor type for metrics labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    /// SessionActor (singleton, owns the registries).
    Session,
    /// EndpointActor (one per stream endpoint).
    Endpoint,
}

impl ActorType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActorType::Session => "session",
            ActorType::Endpoint => "endpoint",
        }
    }

    #[must_use]
    pub const fn warning_threshold(&self) -> usize {
        match self {
            ActorType::Session => SESSION_MAILBOX_WARNING,
            ActorType::Endpoint => ENDPOINT_MAILBOX_WARNING,
        }
    }

    #[must_use]
    pub const fn normal_threshold(&self) -> usize {
        match self {
            ActorType::Session => SESSION_MAILBOX_NORMAL,
            ActorType::Endpoint => ENDPOINT_MAILBOX_NORMAL,
        }
    }
}

/// Mailbox depth level for alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxLevel {
    Normal,
    Warning,
    Critical,
}

/// Mailbox monitor for tracking queue depth.
#[derive(Debug)]
pub struct MailboxMonitor {
    actor_type: ActorType,
    /// Actor identifier (erizo id, endpoint id).
    actor_id: String,
    depth: AtomicUsize,
    peak_depth: AtomicUsize,
    messages_processed: AtomicU64,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new(actor_type: ActorType, actor_id: impl Into<String>) -> Self {
        Self {
            actor_type,
            actor_id: actor_id.into(),
            depth: AtomicUsize::new(0),
            peak_depth: AtomicUsize::new(0),
            messages_processed: AtomicU64::new(0),
        }
    }

    /// Record a message being added to the mailbox.
    pub fn record_enqueue(&self) {
        let new_depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_depth.fetch_max(new_depth, Ordering::Relaxed);

        let level = self.level_for_depth(new_depth);
        if level == MailboxLevel::Critical {
            warn!(
                target: "erizo.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                depth = new_depth,
                threshold = self.actor_type.warning_threshold(),
                "Mailbox depth critical"
            );
        } else if level == MailboxLevel::Warning
            && new_depth == self.actor_type.normal_threshold() + 1
        {
            // Log once when crossing into warning
            debug!(
                target: "erizo.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                depth = new_depth,
                "Mailbox depth elevated"
            );
        }
    }

    /// Record a message being removed from the mailbox (processed).
    pub fn record_dequeue(&self) {
        let previous = self.depth.fetch_sub(1, Ordering::Relaxed);
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
        if self.actor_type == ActorType::Session {
            metrics::set_actor_mailbox_depth(self.actor_type.as_str(), previous.saturating_sub(1));
        }
    }

    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn current_level(&self) -> MailboxLevel {
        self.level_for_depth(self.current_depth())
    }

    fn level_for_depth(&self, depth: usize) -> MailboxLevel {
        if depth > self.actor_type.warning_threshold() {
            MailboxLevel::Critical
        } else if depth > self.actor_type.normal_threshold() {
            MailboxLevel::Warning
        } else {
            MailboxLevel::Normal
        }
    }
}

/// Live endpoint counts shared by every actor of one erizo.
#[derive(Debug, Default)]
pub struct ActorMetrics {
    pub publishers: AtomicUsize,
    pub subscribers: AtomicUsize,
    pub bridge_sources: AtomicUsize,
    pub bridge_sinks: AtomicUsize,
    /// Endpoint actors that ended without an orderly close (indicates bugs).
    pub actor_panics: AtomicU64,
}

/// Point-in-time copy of [`ActorMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActorMetricsSnapshot {
    pub publishers: usize,
    pub subscribers: usize,
    pub bridge_sources: usize,
    pub bridge_sinks: usize,
}

impl ActorMetrics {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn counter(&self, role: EndpointRole) -> &AtomicUsize {
        match role {
            EndpointRole::Publisher => &self.publishers,
            EndpointRole::Subscriber => &self.subscribers,
            EndpointRole::BridgeSource => &self.bridge_sources,
            EndpointRole::BridgeSink => &self.bridge_sinks,
        }
    }

    pub fn endpoint_created(&self, role: EndpointRole) {
        let count = self.counter(role).fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_endpoints_active(role.as_str(), count);
    }

    pub fn endpoint_closed(&self, role: EndpointRole) {
        let count = self
            .counter(role)
            .fetch_sub(1, Ordering::SeqCst)
            .saturating_sub(1);
        metrics::set_endpoints_active(role.as_str(), count);
    }

    pub fn record_panic(&self) {
        self.actor_panics.fetch_add(1, Ordering::Relaxed);
        metrics::record_actor_panic(ActorType::Endpoint.as_str());
    }

    #[must_use]
    pub fn snapshot(&self) -> ActorMetricsSnapshot {
        ActorMetricsSnapshot {
            publishers: self.publishers.load(Ordering::SeqCst),
            subscribers: self.subscribers.load(Ordering::SeqCst),
            bridge_sources: self.bridge_sources.load(Ordering::SeqCst),
            bridge_sinks: self.bridge_sinks.load(Ordering::SeqCst),
        }
    }
}
