//! Media Node Manager
//!
//! Lifecycle manager for media-server compute nodes.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Create the infra provisioner client
//! 4. Create the `MediaNodeManager`
//! 5. Spawn the idle reaper task and mark the service ready
//! 6. Serve health, metrics and the internal API over HTTP
//! 7. Wait for shutdown signal, then stop the reaper and every node actor

#![warn(clippy::pedantic)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use media_node_manager::config::Config;
use media_node_manager::manager::MediaNodeManager;
use media_node_manager::observability::{init_metrics_recorder, HealthState};
use media_node_manager::provisioner::HttpProvisioner;
use media_node_manager::reaper::IdleReaper;
use media_node_manager::routes::{self, AppState};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Time allowed for the reaper task to exit after cancellation.
const REAPER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "media_node_manager=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Media Node Manager");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        mnm_id = %config.mnm_id,
        bind_address = %config.bind_address,
        idle_grace_period_seconds = config.idle_grace_period_seconds,
        escalation_grace_period_seconds = config.escalation_grace_period_seconds,
        reaper_interval_seconds = config.reaper_interval_seconds,
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

    let provisioner = HttpProvisioner::new(
        config.infra_provisioner_url.clone(),
        config.provisioner_timeout(),
    )
    .map_err(|e| {
        error!(error = %e, "Failed to create infra provisioner client");
        e
    })?;

    // All background work hangs off this token
    let shutdown_token = CancellationToken::new();

    let manager = MediaNodeManager::with_cancel_token(
        Arc::new(provisioner),
        config.idle_policy(),
        shutdown_token.child_token(),
    );

    // Start idle reaper
    let reaper = IdleReaper::new(manager.clone(), config.reaper_interval());
    let reaper_token = shutdown_token.child_token();
    let reaper_handle = tokio::spawn(async move {
        reaper.run(reaper_token).await;
    });
    info!("Idle reaper task started");

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.bind_address, "Invalid bind address");
        format!("Invalid bind address: {e}")
    })?;

    let app = routes::build_routes(
        Arc::new(AppState {
            manager: manager.clone(),
        }),
        Arc::clone(&health_state),
        prometheus_handle,
    );

    // Bind listener before reporting ready to fail fast on bind errors
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!(error = %e, addr = %addr, "Failed to bind HTTP server");
        format!("Failed to bind HTTP server to {addr}: {e}")
    })?;
    info!(addr = %addr, "HTTP server bound successfully");

    health_state.set_ready();

    let server_health = Arc::clone(&health_state);
    let server_token = shutdown_token.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("Shutdown signal received, initiating graceful shutdown...");
            // Mark as not ready immediately so k8s stops sending traffic
            server_health.set_not_ready();
            server_token.cancel();
        })
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            e
        })?;

    // Covers exits that did not go through the signal path
    shutdown_token.cancel();

    if tokio::time::timeout(REAPER_SHUTDOWN_TIMEOUT, reaper_handle)
        .await
        .is_err()
    {
        warn!("Idle reaper did not stop within timeout");
    }

    manager.shutdown().await;

    info!("Media Node Manager shutdown complete");
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
