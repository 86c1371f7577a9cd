//! sp-agent - Per-application session telemetry sidecar

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use session_pulse_agent::buffers::AgentBuffers;
use session_pulse_agent::client::ServiceClient;
use session_pulse_agent::flush::flush_loop;
use session_pulse_agent::local::{LocalState, build_router};
use session_pulse_agent::monitor::{heartbeat_watchdog_loop, parent_monitor_loop};
use session_pulse_core::config;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Per-application session telemetry sidecar
#[derive(Parser, Debug)]
#[command(name = "sp-agent")]
#[command(about = "Per-application session telemetry sidecar")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// Override the central service URL
    #[arg(long, value_name = "URL")]
    server_url: Option<String>,

    /// Override the loopback port
    #[arg(long, value_name = "PORT")]
    port: Option<u16>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    session_pulse_core::logging::init(args.verbose);

    info!("sp-agent starting...");

    let mut cfg = config::resolve_config(args.config.as_deref())
        .context("Failed to resolve configuration")?;
    if let Some(url) = args.server_url {
        cfg.agent.server_url = url;
    }
    if let Some(port) = args.port {
        cfg.agent.daemon_port = port;
    }

    let client = Arc::new(ServiceClient::new(&cfg.agent).context("Failed to build service client")?);
    let buffers = Arc::new(AgentBuffers::new(cfg.agent.max_buffered_items));
    let kick = Arc::new(Notify::new());

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

    // Flush cycle: the one task that talks to the service for buffered traffic
    let flush_task = tokio::spawn(flush_loop(
        Arc::clone(&buffers),
        Arc::clone(&client),
        Duration::from_secs(cfg.agent.batch_interval_seconds),
        cfg.agent.max_batch_size,
        Arc::clone(&kick),
        cancel_token.clone(),
    ));

    // Monitors: parent process liveness and client heartbeat age
    let parent_task = tokio::spawn(parent_monitor_loop(
        Arc::clone(&buffers),
        Duration::from_secs(cfg.agent.parent_poll_seconds),
        Duration::from_secs(cfg.agent.crash_grace_seconds),
        Arc::clone(&kick),
        cancel_token.clone(),
    ));
    let watchdog_task = tokio::spawn(heartbeat_watchdog_loop(
        Arc::clone(&buffers),
        Duration::from_secs(cfg.agent.parent_poll_seconds),
        Duration::from_secs(cfg.agent.heartbeat_timeout_seconds),
        cancel_token.clone(),
    ));

    // Loopback surface for the client library
    let state = LocalState {
        buffers: Arc::clone(&buffers),
        client: Arc::clone(&client),
        kick: Arc::clone(&kick),
    };
    let app = build_router(state);
    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], cfg.agent.daemon_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(
        "Listening on {addr}, forwarding to {}",
        cfg.agent.server_url
    );

    let serve_cancel = cancel_token.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { serve_cancel.cancelled().await })
        .await
        .context("Loopback server failed")?;

    info!("Loopback server stopped. Draining buffers...");
    cancel_token.cancel();

    // The flush loop drains once more after cancellation; give it room.
    if let Err(e) = tokio::time::timeout(Duration::from_secs(10), flush_task).await {
        error!("Flush loop did not complete in time: {e}");
    }
    if let Err(e) = tokio::time::timeout(Duration::from_secs(5), parent_task).await {
        error!("Parent monitor did not complete in time: {e}");
    }
    if let Err(e) = tokio::time::timeout(Duration::from_secs(5), watchdog_task).await {
        error!("Heartbeat watchdog did not complete in time: {e}");
    }

    info!("sp-agent shutdown complete");
    Ok(())
}
