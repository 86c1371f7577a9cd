//! Per-session buffers between the local surface and the flush cycle.
//!
//! The receiving side (loopback handlers, monitors) appends under the
//! per-session lock and returns immediately. The flush task takes the same
//! lock only long enough to snapshot a batch; network I/O happens outside
//! the lock, and a failed batch is restored at the head of the buffers.
//!
//! Counter samples with identical `(name, tags)` coalesce into the earliest
//! buffered sample within the flush window; all other metric kinds append
//! verbatim. When a per-session bound is configured, the oldest entries are
//! dropped first and the drop count is carried into a `telemetry_backpressure`
//! event on the next successful flush.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use serde_json::{Map, Value};
use session_pulse_core::merge::deep_merge;
use session_pulse_core::schema::MetricKind;
use session_pulse_core::wire::{EventBody, MetricBody};

/// Buffered traffic for one session, guarded by a per-session lock.
pub struct SessionBuffer {
    pub session_id: String,
    /// Application process id; enables the parent monitor.
    pub parent_pid: Option<u32>,
    /// Deep-merged accumulator of deltas received since the last flush.
    pub pending_state: Map<String, Value>,
    /// State as last transmitted successfully; the diff base.
    pub last_sent_state: Map<String, Value>,
    pub events: VecDeque<EventBody>,
    pub metrics: VecDeque<MetricBody>,
    /// One heartbeat per flush interval is enough.
    pub heartbeat_pending: bool,
    /// Clean end requested locally; forwarded on the next flush.
    pub end_pending: bool,
    /// Crash reason queued by the parent monitor.
    pub crash_pending: Option<String>,
    /// The application ended cleanly; monitors skip this session.
    pub ended: bool,
    /// The session is terminal on the service side; the flush task removes
    /// the buffer once this is set.
    pub closed: bool,
    /// Last client-side heartbeat, for the agent's own hung watchdog.
    pub last_client_heartbeat: Instant,
    /// The watchdog fired for the current silence episode.
    pub hung_reported: bool,
    /// Items dropped under backpressure since the last successful flush.
    pub dropped_items: u64,
    /// Earliest instant the next flush attempt may run (exponential backoff).
    pub next_attempt: Option<Instant>,
    /// Current backoff delay; `None` when the last flush succeeded.
    pub backoff: Option<std::time::Duration>,
}

impl SessionBuffer {
    fn new(session_id: String, parent_pid: Option<u32>) -> Self {
        Self {
            session_id,
            parent_pid,
            pending_state: Map::new(),
            last_sent_state: Map::new(),
            events: VecDeque::new(),
            metrics: VecDeque::new(),
            heartbeat_pending: false,
            end_pending: false,
            crash_pending: None,
            ended: false,
            closed: false,
            last_client_heartbeat: Instant::now(),
            hung_reported: false,
            dropped_items: 0,
            next_attempt: None,
            backoff: None,
        }
    }

    /// Merge a state delta into the pending accumulator.
    pub fn push_state(&mut self, delta: Map<String, Value>) {
        deep_merge(&mut self.pending_state, delta);
    }

    /// Append an event, dropping the oldest entry when the bound is hit.
    pub fn push_event(&mut self, event: EventBody, bound: Option<usize>) {
        if let Some(max) = bound
            && self.events.len() >= max
        {
            self.events.pop_front();
            self.dropped_items += 1;
        }
        self.events.push_back(event);
    }

    /// Append a metric, coalescing counters by `(name, tags)` within the
    /// current flush window.
    pub fn push_metric(&mut self, metric: MetricBody, bound: Option<usize>) {
        if metric.kind == MetricKind::Counter {
            let increments = metric.count.unwrap_or(1);
            if let Some(existing) = self.metrics.iter_mut().find(|m| {
                m.kind == MetricKind::Counter && m.name == metric.name && m.tags == metric.tags
            }) {
                existing.value += metric.value;
                existing.count = Some(existing.count.unwrap_or(1) + increments);
                return;
            }
            let mut first = metric;
            first.count = Some(increments);
            self.push_metric_bounded(first, bound);
            return;
        }
        self.push_metric_bounded(metric, bound);
    }

    fn push_metric_bounded(&mut self, metric: MetricBody, bound: Option<usize>) {
        if let Some(max) = bound
            && self.metrics.len() >= max
        {
            self.metrics.pop_front();
            self.dropped_items += 1;
        }
        self.metrics.push_back(metric);
    }

    /// Record a client heartbeat: one wire heartbeat per interval, and the
    /// hung watchdog resets.
    pub fn record_heartbeat(&mut self) {
        self.heartbeat_pending = true;
        self.last_client_heartbeat = Instant::now();
        self.hung_reported = false;
    }

    /// Whether anything is waiting to be forwarded.
    pub fn has_work(&self) -> bool {
        !self.pending_state.is_empty()
            || !self.events.is_empty()
            || !self.metrics.is_empty()
            || self.heartbeat_pending
            || self.end_pending
            || self.crash_pending.is_some()
    }
}

/// Shared map of per-session buffers. The agent is the only writer.
pub struct AgentBuffers {
    sessions: Mutex<HashMap<String, Arc<Mutex<SessionBuffer>>>>,
    max_buffered_items: Option<usize>,
}

impl AgentBuffers {
    pub fn new(max_buffered_items: Option<usize>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            max_buffered_items,
        }
    }

    /// Per-session bound applied to the event and metric queues.
    pub fn bound(&self) -> Option<usize> {
        self.max_buffered_items
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<Mutex<SessionBuffer>>>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Track a freshly registered session.
    pub fn register(&self, session_id: &str, parent_pid: Option<u32>) -> Arc<Mutex<SessionBuffer>> {
        let buffer = Arc::new(Mutex::new(SessionBuffer::new(
            session_id.to_string(),
            parent_pid,
        )));
        self.lock()
            .insert(session_id.to_string(), Arc::clone(&buffer));
        buffer
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<Mutex<SessionBuffer>>> {
        self.lock().get(session_id).cloned()
    }

    /// Snapshot of all tracked buffers, for the flush task and monitors.
    pub fn all(&self) -> Vec<Arc<Mutex<SessionBuffer>>> {
        self.lock().values().cloned().collect()
    }

    pub fn remove(&self, session_id: &str) {
        self.lock().remove(session_id);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Lock a session buffer, recovering from a poisoned lock (the buffer state
/// is append-only between snapshots, so it stays usable).
pub fn lock_buffer(buffer: &Arc<Mutex<SessionBuffer>>) -> MutexGuard<'_, SessionBuffer> {
    buffer.lock().unwrap_or_else(|e| e.into_inner())
}

// ── Tests ────────────────────────────────────────────────────────────────────
