//! sp-server - Central session telemetry service

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use session_pulse_core::config;
use session_pulse_server::http::{AppState, build_router};
use session_pulse_server::registry::sweep::{heartbeat_sweep_loop, retention_sweep_loop};
use session_pulse_server::registry::SessionRegistry;
use session_pulse_server::store::SessionStore;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Central session telemetry service
#[derive(Parser, Debug)]
#[command(name = "sp-server")]
#[command(about = "Central session telemetry service")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override the listening port
    #[arg(long, value_name = "PORT")]
    port: Option<u16>,

    /// Override the store directory
    #[arg(long, value_name = "PATH")]
    data_path: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    session_pulse_core::logging::init(args.verbose);

    info!("sp-server starting...");

    let mut cfg = config::resolve_config(args.config.as_deref())
        .context("Failed to resolve configuration")?;
    if let Some(port) = args.port {
        cfg.server.server_port = port;
    }
    if let Some(path) = args.data_path {
        cfg.server.data_path = Some(path);
    }

    let data_path = cfg.server.data_path();
    std::fs::create_dir_all(&data_path)
        .with_context(|| format!("Failed to create data directory {}", data_path.display()))?;
    info!("Store directory: {}", data_path.display());

    let store = SessionStore::open(&data_path)
        .map_err(|e| anyhow::anyhow!("Failed to open session store: {e}"))?;
    let registry = Arc::new(
        SessionRegistry::open(store.clone(), &cfg.server)
            .map_err(|e| anyhow::anyhow!("Failed to rebuild session registry: {e}"))?,
    );

    // Create cancellation token for graceful shutdown
    let cancel_token = CancellationToken::new();

    // Set up signal handlers
    let cancel_for_signals = cancel_token.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("Failed to create SIGTERM handler");

            tokio::select! {
                _ = ctrl_c => {
                    info!("Received SIGINT (Ctrl+C)");
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM");
                }
            }
        }

        #[cfg(not(unix))]
        {
            ctrl_c.await.expect("Failed to listen for Ctrl+C");
            info!("Received Ctrl+C");
        }

        cancel_for_signals.cancel();
    });

    // Spawn the sweepers
    let heartbeat_task = tokio::spawn(heartbeat_sweep_loop(
        Arc::clone(&registry),
        Duration::from_secs(cfg.server.sweep_interval_seconds),
        cancel_token.clone(),
    ));
    let retention_task = tokio::spawn(retention_sweep_loop(
        Arc::clone(&registry),
        Duration::from_secs(cfg.server.cleanup_interval_hours * 3600),
        cancel_token.clone(),
    ));

    // Serve the HTTP API until cancelled
    let state = AppState::new(Arc::clone(&registry), &cfg.server);
    let app = build_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], cfg.server.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(
        "Listening on {addr} (auth: {})",
        if cfg.server.require_api_key { "bearer" } else { "disabled" }
    );

    let serve_cancel = cancel_token.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { serve_cancel.cancelled().await })
        .await
        .context("HTTP server failed")?;

    info!("HTTP server stopped. Draining background tasks...");
    cancel_token.cancel();

    if let Err(e) = tokio::time::timeout(Duration::from_secs(5), heartbeat_task).await {
        error!("Heartbeat sweeper did not complete in time: {e}");
    }
    if let Err(e) = tokio::time::timeout(Duration::from_secs(5), retention_task).await {
        error!("Retention sweeper did not complete in time: {e}");
    }

    if let Err(e) = store.flush() {
        error!("Final store flush failed: {e}");
    }

    info!("sp-server shutdown complete");
    Ok(())
}
