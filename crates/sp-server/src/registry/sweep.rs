//! Background sweeper loops for the session registry.
//!
//! Two cadences: a fine-grained heartbeat sweep that stamps the
//! suspended/hung flags, and a coarse retention sweep that deletes expired
//! terminal sessions. Both respect the shared cancellation token and run the
//! actual sweep on the blocking pool so handler latency is unaffected.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::registry::SessionRegistry;

/// Run the heartbeat sweeper until cancelled.
pub async fn heartbeat_sweep_loop(
    registry: Arc<SessionRegistry>,
    period: Duration,
    cancel: CancellationToken,
) {
    info!("Heartbeat sweeper started (interval: {:?})", period);
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Heartbeat sweeper cancelled");
                break;
            }
            _ = ticker.tick() => {
                let registry = Arc::clone(&registry);
                let result = tokio::task::spawn_blocking(move || {
                    registry.heartbeat_sweep(Utc::now())
                })
                .await;
                match result {
                    Ok(stamped) if stamped > 0 => {
                        debug!("Heartbeat sweep flagged {stamped} session(s)");
                    }
                    Ok(_) => {}
                    Err(e) => error!("Heartbeat sweep panicked: {e}"),
                }
            }
        }
    }
}

/// Run the retention sweeper until cancelled.
pub async fn retention_sweep_loop(
    registry: Arc<SessionRegistry>,
    period: Duration,
    cancel: CancellationToken,
) {
    info!("Retention sweeper started (interval: {:?})", period);
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Retention sweeper cancelled");
                break;
            }
            _ = ticker.tick() => {
                let registry = Arc::clone(&registry);
                let result = tokio::task::spawn_blocking(move || {
                    registry.retention_sweep(Utc::now())
                })
                .await;
                if let Err(e) = result {
                    error!("Retention sweep panicked: {e}");
                }
            }
        }
    }
}
