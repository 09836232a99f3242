//! Erizo
//!
//! Session orchestration service for one WebRTC media relay worker.
//!
//! # Servers
//!
//! - Redis pub/sub subscription for inbound commands
//! - HTTP server for health endpoints and metrics (default: 0.0.0.0:8090)
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Start health HTTP server (liveness, readiness, metrics)
//! 4. Start worker and I/O worker pools
//! 5. Connect to the message bus
//! 6. Build the context, session actor and dispatcher
//! 7. Start outbound publisher and inbound command tasks; the inbound task
//!    marks the erizo ready once it consumes commands
//! 8. Wait for a shutdown signal or loss of the command subscription; the
//!    latter exits with an error after the same ordered shutdown

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)] // main.rs orchestrates startup, naturally longer

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use erizo_service::actors::SessionActorHandle;
use erizo_service::bus::{run_inbound, run_outbound, BusClient, InboundExit};
use erizo_service::config::Config;
use erizo_service::context::ErizoContext;
use erizo_service::dispatcher::CommandDispatcher;
use erizo_service::engine::{LeastLoadedPool, MediaEngine, UnlinkedEngine, WorkerPool};
use erizo_service::observability::metrics::init_metrics_recorder;
use erizo_service::observability::{health_router, HealthState};
use erizo_service::relay::{ChannelRelay, EventRelay, RELAY_CHANNEL_BUFFER};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "erizo_service=debug,erizo=debug".into());
    let json_logs = std::env::var("ERIZO_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    info!("Starting Erizo");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        agent_id = %config.agent_id,
        erizo_id = %config.erizo_id,
        inbound_channel = %config.inbound_channel,
        health_bind_address = %config.health_bind_address,
        worker_count = config.worker_count,
        io_worker_count = config.io_worker_count,
        audio_codec = %config.media.audio_codec,
        video_codec = %config.media.video_codec,
        "Configuration loaded successfully"
    );

    // This must happen before any metrics are recorded
    info!("Initializing Prometheus metrics recorder...");
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;
    info!("Prometheus metrics recorder initialized");

    let health_state = Arc::new(HealthState::new());
    let shutdown_token = CancellationToken::new();

    // Start health HTTP server (MUST succeed - fail startup if it doesn't)
    let health_addr: SocketAddr = config.health_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.health_bind_address, "Invalid health bind address");
        format!("Invalid health bind address: {e}")
    })?;

    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );
    let app = health_router(Arc::clone(&health_state)).merge(metrics_router);

    // Bind listener BEFORE spawning to fail fast on bind errors
    let listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %health_addr, "Failed to bind health server");
            format!("Failed to bind health server to {health_addr}: {e}")
        })?;

    let health_shutdown_token = shutdown_token.child_token();
    tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    // Worker pools
    let workers = Arc::new(LeastLoadedPool::start("worker", config.worker_count)?);
    let io_workers = Arc::new(LeastLoadedPool::start("io", config.io_worker_count)?);
    info!(
        workers = workers.size(),
        io_workers = io_workers.size(),
        "Worker pools started"
    );

    // Message bus
    info!("Connecting to message bus...");
    let bus = BusClient::connect(&config.bus_url).await.map_err(|e| {
        error!(error = %e, "Failed to connect to message bus");
        e
    })?;
    info!("Message bus connection established");

    let engine: Arc<dyn MediaEngine> = Arc::new(UnlinkedEngine);
    warn!("No media engine linked; endpoint creation will be refused");

    let (relay, outbound) = ChannelRelay::new(RELAY_CHANNEL_BUFFER);
    let relay: Arc<dyn EventRelay> = Arc::new(relay);

    let ctx = ErizoContext::from_config(
        &config,
        engine,
        Arc::clone(&workers) as Arc<dyn WorkerPool>,
        Arc::clone(&io_workers) as Arc<dyn WorkerPool>,
        Arc::clone(&relay),
    );
    let session = SessionActorHandle::new(ctx);
    let dispatcher = CommandDispatcher::new(session.clone(), relay);

    let outbound_task = tokio::spawn(run_outbound(
        bus.clone(),
        outbound,
        shutdown_token.child_token(),
    ));

    let commands = bus.subscribe(&config.inbound_channel).await.map_err(|e| {
        error!(error = %e, "Failed to subscribe to command channel");
        e
    })?;
    let mut inbound_task = tokio::spawn(run_inbound(
        commands,
        dispatcher,
        Arc::clone(&health_state),
        shutdown_token.child_token(),
    ));

    info!(erizo_id = %config.erizo_id, "Erizo running - press Ctrl+C to shutdown");

    let inbound_exit = tokio::select! {
        () = shutdown_signal() => {
            info!("Shutdown signal received, initiating graceful shutdown...");
            // Mark as not ready immediately so no new work is routed here
            health_state.shutting_down();
            shutdown_token.cancel();
            (&mut inbound_task).await
        }
        exit = &mut inbound_task => {
            error!("Command subscription lost, shutting down");
            shutdown_token.cancel();
            exit
        }
    };

    let bus_lost = match inbound_exit {
        Ok(InboundExit::Cancelled) => false,
        Ok(InboundExit::StreamEnded) => true,
        Err(e) => {
            error!(error = %e, "Inbound task ended abnormally");
            health_state.bus_lost();
            true
        }
    };

    // Close every endpoint before the outbound queue is flushed
    if let Err(e) = session.shutdown().await {
        warn!(error = %e, "Session shutdown error, cancelling");
        session.cancel();
    }
    if let Err(e) = outbound_task.await {
        warn!(error = %e, "Outbound task ended abnormally");
    }

    workers.shutdown();
    io_workers.shutdown();

    if bus_lost {
        error!("Erizo stopped after losing the command subscription");
        return Err("command subscription ended".into());
    }

    info!("Erizo shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This is acceptable because
/// without signal handlers, we cannot gracefully shut down the service.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
