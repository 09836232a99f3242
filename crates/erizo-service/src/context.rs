//! Process-wide context.
//!
//! Built once at startup and passed explicitly to the session actor and the
//! endpoint factory. Everything an endpoint needs to come into existence
//! (identity, ICE and codec settings, the engine, the worker pools and the
//! relay) lives here.

use crate::actors::metrics::ActorMetrics;
use crate::config::{Config, IceConfig, MediaConfig};
use crate::engine::{MediaEngine, WorkerPool};
use crate::relay::EventRelay;
use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
pub struct ErizoContext {
    pub agent_id: String,
    pub erizo_id: String,
    pub ice: Arc<IceConfig>,
    pub media: Arc<MediaConfig>,
    pub engine: Arc<dyn MediaEngine>,
    pub workers: Arc<dyn WorkerPool>,
    pub io_workers: Arc<dyn WorkerPool>,
    pub relay: Arc<dyn EventRelay>,
    pub metrics: Arc<ActorMetrics>,
}

impl fmt::Debug for ErizoContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErizoContext")
            .field("agent_id", &self.agent_id)
            .field("erizo_id", &self.erizo_id)
            .field("workers", &self.workers.name())
            .field("io_workers", &self.io_workers.name())
            .finish_non_exhaustive()
    }
}

impl ErizoContext {
    /// Assemble the context from loaded configuration and the collaborators
    /// chosen at startup.
    pub fn from_config(
        config: &Config,
        engine: Arc<dyn MediaEngine>,
        workers: Arc<dyn WorkerPool>,
        io_workers: Arc<dyn WorkerPool>,
        relay: Arc<dyn EventRelay>,
    ) -> Self {
        Self {
            agent_id: config.agent_id.clone(),
            erizo_id: config.erizo_id.clone(),
            ice: Arc::new(config.ice.clone()),
            media: Arc::new(config.media.clone()),
            engine,
            workers,
            io_workers,
            relay,
            metrics: ActorMetrics::new(),
        }
    }
}
