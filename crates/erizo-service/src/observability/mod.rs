//! Observability: health endpoints and Prometheus metrics.

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState, Readiness};
