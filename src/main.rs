//! Axiom Sync Server - authoritative movement server
//!
//! This is the main entry point for the server. It runs:
//! - the UDP session manager (connect/heartbeat/input, fixed-rate snapshot broadcast)
//! - an optional HTTP surface for health and operator stats

use std::sync::Arc;

use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use axiom_sync::app::AppState;
use axiom_sync::config::Config;
use axiom_sync::http::build_router;
use axiom_sync::util::time::init_server_time;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level);

    // Initialize server time tracking
    init_server_time();

    info!("Starting Axiom Sync Server");
    info!(
        game_addr = %config.game_addr,
        tick_rate = config.tick_rate,
        heartbeat_timeout_secs = config.heartbeat_timeout.as_secs(),
        max_clients = config.max_clients,
        "Configuration loaded"
    );

    let state = AppState::new(config.clone());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Game transport
    let socket = Arc::new(UdpSocket::bind(config.game_addr).await?);
    info!("Game server listening on udp://{}", socket.local_addr()?);

    let sessions = state.sessions.clone();
    let game_task = tokio::spawn(sessions.run(socket, shutdown_rx.clone()));

    // Operator HTTP
    let http_task = match config.http_addr {
        Some(addr) => {
            let listener = TcpListener::bind(addr).await?;
            info!("Health check: http://{}/health", listener.local_addr()?);

            let router = build_router(state.clone());
            let mut http_shutdown = shutdown_rx.clone();
            Some(tokio::spawn(async move {
                axum::serve(listener, router)
                    .with_graceful_shutdown(async move {
                        while http_shutdown.changed().await.is_ok() {
                            if *http_shutdown.borrow() {
                                break;
                            }
                        }
                    })
                    .await
            }))
        }
        None => {
            info!("HTTP surface disabled");
            None
        }
    };

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    match game_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Session manager failed"),
        Err(e) => error!(error = %e, "Session manager task panicked"),
    }

    if let Some(task) = http_task {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "HTTP server failed"),
            Err(e) => error!(error = %e, "HTTP server task panicked"),
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
