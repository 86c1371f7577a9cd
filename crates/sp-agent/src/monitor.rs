//! Application monitors: parent process liveness and client heartbeat age.
//!
//! ## Parent monitoring
//!
//! Registration captures the application's process id. A background task
//! probes it with `kill(pid, 0)` on Unix — an existence check that sends no
//! signal. If the process disappears without a clean end, a crash-mark is
//! queued, the flush task is kicked so the report goes out (or starts its
//! retry cycle) immediately, and after a bounded grace period the whole
//! agent shuts down. On non-Unix platforms the probe is unavailable and
//! parent monitoring is disabled rather than reporting false crashes.
//!
//! ## Heartbeat watchdog
//!
//! Independently of the service-side sweeper, the agent tracks the age of
//! the last client heartbeat per session. Crossing the threshold buffers one
//! `application_appears_hung` event, so a hung client that also lost
//! connectivity still produces the event once the agent reconnects.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use session_pulse_core::schema::event::EVENT_APPEARS_HUNG;
use session_pulse_core::wire::EventBody;
use tokio::sync::Notify;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::buffers::{AgentBuffers, lock_buffer};

/// Crash reason reported when the parent process disappears.
pub const PARENT_CRASH_REASON: &str = "parent_process_terminated";

/// Check whether an OS process with the given PID is alive.
///
/// On Unix this uses `kill(pid, 0)` — a read-only existence probe that sends
/// no signal. On non-Unix platforms this always returns `false`.
pub fn is_pid_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        pid_alive_unix(pid)
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

#[cfg(unix)]
fn pid_alive_unix(pid: u32) -> bool {
    let pid_t = pid as libc::pid_t;
    // SAFETY: kill with sig=0 never sends a signal; it only checks PID existence.
    let result = unsafe { libc::kill(pid_t, 0) };
    result == 0
}

/// Poll the parent process of every registered session until cancelled.
///
/// When a parent vanishes, its session gets a queued crash-mark and an
/// immediate flush kick; once every monitored parent is gone the agent is
/// cancelled after `grace` (one retry opportunity for the queued report).
pub async fn parent_monitor_loop(
    buffers: Arc<AgentBuffers>,
    period: Duration,
    grace: Duration,
    kick: Arc<Notify>,
    cancel: CancellationToken,
) {
    if cfg!(not(unix)) {
        info!("Parent monitoring unavailable on this platform");
        return;
    }
    info!("Parent monitor started (interval: {:?})", period);
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Parent monitor cancelled");
                return;
            }
            _ = ticker.tick() => {
                let mut monitored = 0usize;
                let mut newly_dead = 0usize;
                let mut alive = 0usize;

                for buffer in buffers.all() {
                    let mut buf = lock_buffer(&buffer);
                    let Some(pid) = buf.parent_pid else { continue };
                    if buf.ended || buf.closed {
                        continue;
                    }
                    monitored += 1;
                    if is_pid_alive(pid) {
                        alive += 1;
                    } else if buf.crash_pending.is_none() {
                        warn!(
                            "Parent process {pid} of session {} disappeared; queueing crash report",
                            buf.session_id
                        );
                        buf.crash_pending = Some(PARENT_CRASH_REASON.to_string());
                        newly_dead += 1;
                    }
                }

                if newly_dead > 0 {
                    kick.notify_one();
                }
                if monitored > 0 && alive == 0 {
                    // Every watched application is gone. Give the queued
                    // crash-marks one retry opportunity, then exit.
                    info!(
                        "All monitored parents exited; shutting down in {:?}",
                        grace
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = tokio::time::sleep(grace) => {}
                    }
                    cancel.cancel();
                    return;
                }
            }
        }
    }
}

/// Watch client heartbeat age per session until cancelled.
///
/// Crossing `threshold` buffers one `application_appears_hung` event per
/// silence episode; a fresh heartbeat re-arms the watchdog.
pub async fn heartbeat_watchdog_loop(
    buffers: Arc<AgentBuffers>,
    period: Duration,
    threshold: Duration,
    cancel: CancellationToken,
) {
    info!(
        "Heartbeat watchdog started (interval: {:?}, threshold: {:?})",
        period, threshold
    );
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Heartbeat watchdog cancelled");
                return;
            }
            _ = ticker.tick() => {
                let bound = buffers.bound();
                for buffer in buffers.all() {
                    let mut buf = lock_buffer(&buffer);
                    if buf.ended || buf.closed || buf.hung_reported {
                        continue;
                    }
                    let age = buf.last_client_heartbeat.elapsed();
                    if age < threshold {
                        continue;
                    }
                    warn!(
                        "Session {} heartbeat is {}s old; reporting as hung",
                        buf.session_id,
                        age.as_secs()
                    );
                    let mut event = EventBody::named(EVENT_APPEARS_HUNG);
                    let mut data = Map::new();
                    data.insert("age_seconds".to_string(), Value::from(age.as_secs()));
                    event.data = Some(data);
                    buf.push_event(event, bound);
                    buf.hung_reported = true;
                }
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
