//! Ledger Bridge
//!
//! Backend bridge between the room registry contract and the session broker.
//!
//! # Servers
//!
//! One HTTP server (default: 0.0.0.0:8080) serves:
//! - `/ws` client relay to the session broker
//! - `/health` and `/ready` probes
//! - `/metrics` Prometheus exposition
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Load the signing identity
//! 4. Create the ledger gateway client
//! 5. Start the transaction coordinator (worker + safety timer)
//! 6. Create the session broker client and the event bridge
//! 7. Spawn the event watcher (marks the service ready once subscribed)
//! 8. Start the HTTP server
//! 9. Wait for shutdown signal

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)] // main.rs orchestrates startup, naturally longer

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use ledger_bridge::bridge::EventBridge;
use ledger_bridge::broker::{BrokerClient, SessionBroker};
use ledger_bridge::config::Config;
use ledger_bridge::coordinator::TransactionCoordinator;
use ledger_bridge::ledger::{LedgerClient, RpcLedgerClient, SigningIdentity};
use ledger_bridge::observability::{health_router, init_metrics_recorder, HealthState};
use ledger_bridge::relay::relay_router;
use ledger_bridge::tasks::start_event_watcher;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Time allowed for the coordinator worker to stop.
const COORDINATOR_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ledger_bridge=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Ledger Bridge");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        ledger_rpc_url = %config.ledger_rpc_url,
        contract = %config.coordinator.contract_address,
        broker_base_url = %config.broker_base_url,
        broker_app_id = %config.broker_app_id,
        bind_address = %config.bind_address,
        "Configuration loaded successfully"
    );

    // Must happen before any metrics are recorded
    info!("Initializing Prometheus metrics recorder...");
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;
    info!("Prometheus metrics recorder initialized");

    let health_state = Arc::new(HealthState::new());

    let identity = SigningIdentity::from_hex_seed(&config.signing_key).map_err(|e| {
        error!(error = %e, "Failed to load signing identity");
        e
    })?;
    info!(signer = %identity.address(), "Signing identity loaded");

    let ledger: Arc<dyn LedgerClient> = Arc::new(
        RpcLedgerClient::new(
            config.ledger_rpc_url.clone(),
            config.coordinator.contract_address.clone(),
            config.event_poll_interval,
        )
        .map_err(|e| {
            error!(error = %e, "Failed to create ledger client");
            e
        })?,
    );

    let coordinator = TransactionCoordinator::start(
        Arc::clone(&ledger),
        identity,
        config.coordinator.clone(),
    );

    // Cancelled when the coordinator closes, so every task stops with it
    let shutdown_token = coordinator.child_token();

    let broker: Arc<dyn SessionBroker> = Arc::new(
        BrokerClient::new(
            config.broker_base_url.clone(),
            config.broker_app_id.clone(),
            config.broker_app_secret.clone(),
            config.broker_request_timeout,
        )
        .map_err(|e| {
            error!(error = %e, "Failed to create session broker client");
            e
        })?,
    );

    let bridge = EventBridge::new(Arc::clone(&broker), coordinator.clone());

    // Spawn event watcher
    let watcher_token = shutdown_token.child_token();
    let watcher_ledger = Arc::clone(&ledger);
    let watcher_health = Arc::clone(&health_state);
    tokio::spawn(async move {
        if let Err(e) =
            start_event_watcher(watcher_ledger, bridge, watcher_health, watcher_token).await
        {
            error!(error = %e, "Event watcher stopped");
        }
    });
    info!("Event watcher started");

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.bind_address, "Invalid bind address");
        format!("Invalid bind address: {e}")
    })?;

    // Add /metrics endpoint served by Prometheus exporter
    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );

    let app = relay_router(Arc::clone(&broker))
        .merge(health_router(Arc::clone(&health_state)))
        .merge(metrics_router)
        .layer(TraceLayer::new_for_http());

    // Bind listener BEFORE spawning to fail fast on bind errors
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!(error = %e, addr = %addr, "Failed to bind HTTP server");
        format!("Failed to bind HTTP server to {addr}: {e}")
    })?;
    info!(addr = %addr, "HTTP server bound successfully");

    let server_token = shutdown_token.child_token();
    tokio::spawn(async move {
        info!(addr = %addr, "HTTP server starting");
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            server_token.cancelled().await;
            info!("HTTP server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "HTTP server failed");
        }
    });

    info!("Ledger Bridge running - press Ctrl+C to shutdown");
    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");

    // Mark as not ready immediately so traffic stops
    health_state.set_not_ready();

    shutdown_token.cancel();

    // Stops the worker; queued writes resolve as abandoned
    if let Err(e) = coordinator.shutdown(COORDINATOR_SHUTDOWN_TIMEOUT).await {
        warn!(error = %e, "Coordinator shutdown error");
    }

    info!("Ledger Bridge shutdown complete");
    Ok(())
}

/// Wait for SIGTERM or Ctrl+C.
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
