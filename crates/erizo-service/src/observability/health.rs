//! Health endpoints for the erizo process.
//!
//! - `GET /health` - Liveness (the process is serving HTTP)
//! - `GET /ready` - Readiness, with the reason as `{"status": ...}`
//!
//! Readiness tracks the command subscription. The inbound bus task marks it
//! consuming when it starts reading and marks it lost when the subscription
//! stream ends; the binary marks it shutting down on a signal.
//!
//! The `/metrics` endpoint is merged in by the binary and rendered by
//! `metrics-exporter-prometheus`.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Where the erizo stands with respect to taking commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    /// Startup, before the command subscription is consumed.
    Starting,
    Consuming,
    /// The subscription stream ended; no further commands will arrive.
    BusLost,
    ShuttingDown,
}

impl Readiness {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Readiness::Starting => "starting",
            Readiness::Consuming => "consuming",
            Readiness::BusLost => "bus_lost",
            Readiness::ShuttingDown => "shutting_down",
        }
    }
}

/// Shared readiness, written by the bus task and the binary.
#[derive(Debug)]
pub struct HealthState {
    readiness: watch::Sender<Readiness>,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    #[must_use]
    pub fn new() -> Self {
        let (readiness, _) = watch::channel(Readiness::Starting);
        Self { readiness }
    }

    pub fn consuming(&self) {
        self.transition(Readiness::Consuming);
    }

    pub fn bus_lost(&self) {
        self.transition(Readiness::BusLost);
    }

    pub fn shutting_down(&self) {
        self.transition(Readiness::ShuttingDown);
    }

    #[must_use]
    pub fn readiness(&self) -> Readiness {
        *self.readiness.borrow()
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.readiness() == Readiness::Consuming
    }

    fn transition(&self, next: Readiness) {
        let previous = self.readiness.send_replace(next);
        if previous != next {
            info!(
                target: "erizo.health",
                from = previous.as_str(),
                to = next.as_str(),
                "Readiness changed"
            );
        }
    }
}

#[derive(Debug, Serialize)]
struct ReadinessBody {
    status: Readiness,
}

/// Create the health router with liveness and readiness endpoints.
pub fn health_router(health_state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .with_state(health_state)
}

async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

async fn readiness_handler(
    State(state): State<Arc<HealthState>>,
) -> (StatusCode, Json<ReadinessBody>) {
    let readiness = state.readiness();
    let code = if readiness == Readiness::Consuming {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(ReadinessBody { status: readiness }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::util::ServiceExt;

    async fn get_ready(state: &Arc<HealthState>) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .uri("/ready")
            .body(Body::empty())
            .expect("Failed to build request");

        let response = health_router(Arc::clone(state))
            .oneshot(request)
            .await
            .expect("Failed to execute request");
        let status = response.status();
        let body = to_bytes(response.into_body(), 1024).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    async fn status_of(app: Router, uri: &str) -> StatusCode {
        let request = Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("Failed to build request");

        app.oneshot(request)
            .await
            .expect("Failed to execute request")
            .status()
    }

    #[test]
    fn test_readiness_transitions() {
        let state = HealthState::new();
        assert_eq!(state.readiness(), Readiness::Starting);
        assert!(!state.is_ready());

        state.consuming();
        assert!(state.is_ready());

        state.bus_lost();
        assert_eq!(state.readiness(), Readiness::BusLost);
        assert!(!state.is_ready());
    }

    #[tokio::test]
    async fn test_liveness_endpoint() {
        let app = health_router(Arc::new(HealthState::new()));
        assert_eq!(status_of(app, "/health").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_readiness_reports_subscription_state() {
        let state = Arc::new(HealthState::new());

        let (code, body) = get_ready(&state).await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "starting");

        state.consuming();
        let (code, body) = get_ready(&state).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["status"], "consuming");

        state.bus_lost();
        let (code, body) = get_ready(&state).await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "bus_lost");

        state.shutting_down();
        let (_, body) = get_ready(&state).await;
        assert_eq!(body["status"], "shutting_down");
    }

    #[tokio::test]
    async fn test_unknown_path_returns_404() {
        let app = health_router(Arc::new(HealthState::new()));
        assert_eq!(status_of(app, "/unknown").await, StatusCode::NOT_FOUND);
    }
}
