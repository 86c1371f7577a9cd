//! The flush cycle: snapshot buffers under the lock, forward outside it.
//!
//! On each tick (and on demand, via the kick channel, for ends, crashes, and
//! shutdown) every session buffer is drained in order: state diff, events,
//! metrics, heartbeat, then a pending end or crash-mark. A retryable failure
//! restores the unsent remainder at the head of its buffer and backs off
//! exponentially up to [`BACKOFF_CAP`]. Non-retryable failures drop only the
//! offending item — except a terminal/not-found answer, which closes the
//! whole session locally because the service will never accept it again.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use session_pulse_core::ApiError;
use session_pulse_core::merge::{deep_merge, deep_merged, minimal_delta};
use session_pulse_core::schema::event::EVENT_BACKPRESSURE;
use session_pulse_core::wire::{EventBody, MetricBody};
use tokio::sync::Notify;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::buffers::{AgentBuffers, SessionBuffer, lock_buffer};
use crate::client::ServiceClient;

/// Upper bound on the exponential retry delay.
pub const BACKOFF_CAP: Duration = Duration::from_secs(60);

/// Terminal operation queued behind the buffered traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finish {
    End,
    Crash(String),
}

/// Snapshot of one session's buffers, taken under the lock.
#[derive(Debug)]
pub struct FlushBatch {
    pub session_id: String,
    /// Pending state taken out of the buffer; restored on failure.
    pub taken_pending: Map<String, Value>,
    /// Minimal delta against the last transmitted state.
    pub diff: Map<String, Value>,
    /// State after applying the pending accumulator; becomes the new
    /// `last_sent_state` once the diff is acknowledged.
    pub post_state: Map<String, Value>,
    pub events: VecDeque<EventBody>,
    pub metrics: VecDeque<MetricBody>,
    pub heartbeat: bool,
    pub finish: Option<Finish>,
}

/// Result of one per-session flush attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing buffered.
    Idle,
    /// Still inside the backoff window.
    Skipped,
    /// Everything forwarded.
    Completed,
    /// The session is finished (ended, crashed, or rejected as terminal);
    /// the caller removes the buffer.
    Closed,
    /// A transient failure; the remainder was re-queued.
    Retrying,
}

/// Take a batch out of the buffer. Returns `None` when there is nothing to
/// forward. The end/crash intents stay set on the buffer until acknowledged.
pub fn take_batch(buf: &mut SessionBuffer, max_batch: Option<usize>) -> Option<FlushBatch> {
    if !buf.has_work() {
        return None;
    }

    let taken_pending = std::mem::take(&mut buf.pending_state);
    let post_state = deep_merged(&buf.last_sent_state, &taken_pending);
    let diff = minimal_delta(&buf.last_sent_state, &post_state);

    let mut events = drain_up_to(&mut buf.events, max_batch);
    let metrics = drain_up_to(&mut buf.metrics, max_batch);

    let dropped = std::mem::take(&mut buf.dropped_items);
    if dropped > 0 {
        let mut event = EventBody::named(EVENT_BACKPRESSURE);
        let mut data = Map::new();
        data.insert("dropped".to_string(), Value::from(dropped));
        event.data = Some(data);
        events.push_front(event);
    }

    let heartbeat = std::mem::take(&mut buf.heartbeat_pending);
    let finish = if buf.end_pending {
        Some(Finish::End)
    } else {
        buf.crash_pending.clone().map(Finish::Crash)
    };

    if diff.is_empty() && events.is_empty() && metrics.is_empty() && !heartbeat && finish.is_none()
    {
        // The accumulated deltas cancelled out against the last sent state;
        // nothing needs to travel.
        return None;
    }

    Some(FlushBatch {
        session_id: buf.session_id.clone(),
        taken_pending,
        diff,
        post_state,
        events,
        metrics,
        heartbeat,
        finish,
    })
}

fn drain_up_to<T>(queue: &mut VecDeque<T>, max_batch: Option<usize>) -> VecDeque<T> {
    match max_batch {
        Some(max) => queue.drain(..queue.len().min(max)).collect(),
        None => std::mem::take(queue),
    }
}

/// Put the unsent remainder of a batch back at the head of its buffers and
/// extend the backoff window.
pub fn restore_batch(buf: &mut SessionBuffer, batch: FlushBatch, base: Duration) {
    if !batch.taken_pending.is_empty() {
        // Deltas that arrived during the failed attempt win over the
        // restored ones: restore first, then replay the newer pending.
        let newer = std::mem::take(&mut buf.pending_state);
        buf.pending_state = batch.taken_pending;
        deep_merge(&mut buf.pending_state, newer);
    }
    let mut events = batch.events;
    while let Some(event) = events.pop_back() {
        buf.events.push_front(event);
    }
    let mut metrics = batch.metrics;
    while let Some(metric) = metrics.pop_back() {
        buf.metrics.push_front(metric);
    }
    if batch.heartbeat {
        buf.heartbeat_pending = true;
    }

    let next = match buf.backoff {
        Some(current) => (current * 2).min(BACKOFF_CAP),
        None => base.min(BACKOFF_CAP),
    };
    buf.backoff = Some(next);
    buf.next_attempt = Some(Instant::now() + next);
}

/// Forward one session's batch, in order, outside the buffer lock.
pub async fn flush_session(
    client: &ServiceClient,
    buffer: &Arc<Mutex<SessionBuffer>>,
    max_batch: Option<usize>,
    base: Duration,
) -> FlushOutcome {
    let mut batch = {
        let mut buf = lock_buffer(buffer);
        if buf.closed {
            return FlushOutcome::Closed;
        }
        if let Some(at) = buf.next_attempt
            && Instant::now() < at
        {
            return FlushOutcome::Skipped;
        }
        match take_batch(&mut buf, max_batch) {
            Some(batch) => batch,
            None => return FlushOutcome::Idle,
        }
    };
    let sid = batch.session_id.clone();

    // 1. State diff
    if !batch.diff.is_empty() {
        match client.update_state(&sid, &batch.diff).await {
            Ok(()) => {
                let mut buf = lock_buffer(buffer);
                buf.last_sent_state = batch.post_state.clone();
                batch.taken_pending = Map::new();
                batch.diff = Map::new();
            }
            Err(e) => return settle_failure(buffer, batch, e, base, "state update"),
        }
    } else {
        batch.taken_pending = Map::new();
    }

    // 2. Events, in order
    while let Some(event) = batch.events.front().cloned() {
        match client.log_event(&sid, &event).await {
            Ok(()) => {
                batch.events.pop_front();
            }
            Err(e) if !e.is_retryable() && !is_session_gone(&e) => {
                warn!("Dropping rejected event '{}' for {sid}: {e}", event.name);
                batch.events.pop_front();
            }
            Err(e) => return settle_failure(buffer, batch, e, base, "event"),
        }
    }

    // 3. Metrics, in order
    while let Some(metric) = batch.metrics.front().cloned() {
        match client.log_metric(&sid, &metric).await {
            Ok(()) => {
                batch.metrics.pop_front();
            }
            Err(e) if !e.is_retryable() && !is_session_gone(&e) => {
                warn!("Dropping rejected metric '{}' for {sid}: {e}", metric.name);
                batch.metrics.pop_front();
            }
            Err(e) => return settle_failure(buffer, batch, e, base, "metric"),
        }
    }

    // 4. One heartbeat per interval
    if batch.heartbeat {
        match client.heartbeat(&sid).await {
            Ok(()) => batch.heartbeat = false,
            Err(e) if !e.is_retryable() && !is_session_gone(&e) => {
                warn!("Heartbeat rejected for {sid}: {e}");
                batch.heartbeat = false;
            }
            Err(e) => return settle_failure(buffer, batch, e, base, "heartbeat"),
        }
    }

    // 5. End or crash-mark, last so it never overtakes buffered traffic
    if let Some(finish) = batch.finish.clone() {
        let result = match &finish {
            Finish::End => client.end(&sid).await,
            Finish::Crash(reason) => client.mark_crashed(&sid, reason).await,
        };
        match result {
            Ok(()) => {
                let mut buf = lock_buffer(buffer);
                buf.end_pending = false;
                buf.crash_pending = None;
                buf.backoff = None;
                buf.next_attempt = None;
                buf.closed = true;
                info!("Session {sid} closed ({:?})", finish);
                return FlushOutcome::Closed;
            }
            Err(e) if !e.is_retryable() => {
                // The service already considers the session terminal (or the
                // request is unacceptable); nothing more can be forwarded.
                warn!("Closing {sid} after rejected finish: {e}");
                let mut buf = lock_buffer(buffer);
                buf.end_pending = false;
                buf.crash_pending = None;
                buf.closed = true;
                return FlushOutcome::Closed;
            }
            Err(e) => return settle_failure(buffer, batch, e, base, "finish"),
        }
    }

    let mut buf = lock_buffer(buffer);
    buf.backoff = None;
    buf.next_attempt = None;
    FlushOutcome::Completed
}

/// A terminal or not-found answer means the service will never accept more
/// traffic for this session.
fn is_session_gone(e: &ApiError) -> bool {
    matches!(e, ApiError::Terminal(_) | ApiError::NotFound(_))
}

fn settle_failure(
    buffer: &Arc<Mutex<SessionBuffer>>,
    batch: FlushBatch,
    error: ApiError,
    base: Duration,
    stage: &str,
) -> FlushOutcome {
    let sid = batch.session_id.clone();
    let mut buf = lock_buffer(buffer);
    if is_session_gone(&error) {
        error!("Session {sid} is gone on the service ({error}); dropping its buffers");
        buf.end_pending = false;
        buf.crash_pending = None;
        buf.closed = true;
        return FlushOutcome::Closed;
    }
    debug!("Flush of {sid} failed at {stage}: {error}; will retry");
    restore_batch(&mut buf, batch, base);
    FlushOutcome::Retrying
}

/// Flush every tracked session once; closed sessions are dropped from the
/// map afterwards.
pub async fn flush_all(
    buffers: &AgentBuffers,
    client: &ServiceClient,
    max_batch: Option<usize>,
    base: Duration,
) {
    for buffer in buffers.all() {
        let outcome = flush_session(client, &buffer, max_batch, base).await;
        if outcome == FlushOutcome::Closed {
            let sid = lock_buffer(&buffer).session_id.clone();
            buffers.remove(&sid);
        }
    }
}

/// Run the flush cycle until cancelled; a kick forwards immediately (ends,
/// crash-marks, shutdown). One final drain runs after cancellation.
pub async fn flush_loop(
    buffers: Arc<AgentBuffers>,
    client: Arc<ServiceClient>,
    period: Duration,
    max_batch: Option<usize>,
    kick: Arc<Notify>,
    cancel: CancellationToken,
) {
    info!("Flush loop started (interval: {:?})", period);
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Flush loop cancelled; draining once more");
                flush_all(&buffers, &client, max_batch, period).await;
                break;
            }
            _ = ticker.tick() => {
                flush_all(&buffers, &client, max_batch, period).await;
            }
            _ = kick.notified() => {
                flush_all(&buffers, &client, max_batch, period).await;
            }
        }
    }
    info!("Flush loop stopped");
}

// ── Tests ────────────────────────────────────────────────────────────────────
