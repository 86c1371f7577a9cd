//! The session record: one logical run of one application on one host.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::merge::deep_merge;
use crate::schema::event::EventRecord;
use crate::schema::metric::MetricSample;

/// Persisted status flags. `active` and `ended` are mutually exclusive;
/// `suspended` and `hung` are modifiers on a session that has not ended;
/// `crashed` implies `ended` and is terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionFlags {
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub suspended: bool,
    #[serde(default)]
    pub hung: bool,
    #[serde(default)]
    pub crashed: bool,
    #[serde(default)]
    pub ended: bool,
}

/// Projection of the flags onto a single liveness state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LivenessState {
    Active,
    Suspended,
    Hung,
    Ended,
    Crashed,
}

impl LivenessState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LivenessState::Active => "active",
            LivenessState::Suspended => "suspended",
            LivenessState::Hung => "hung",
            LivenessState::Ended => "ended",
            LivenessState::Crashed => "crashed",
        }
    }
}

/// One entry of the state history: the full state as it stood after an
/// accepted update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub timestamp: DateTime<Utc>,
    pub state: Map<String, Value>,
}

/// A session record. Owned by the registry; reads hand out deep copies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub product: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_fingerprint: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub state: Map<String, Value>,
    #[serde(default)]
    pub state_history: Vec<StateSnapshot>,
    #[serde(default)]
    pub events: Vec<EventRecord>,
    #[serde(default)]
    pub metrics: Vec<MetricSample>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<DateTime<Utc>>,
    #[serde(default)]
    pub flags: SessionFlags,
}

impl SessionRecord {
    /// Create a fresh, active session. The caller supplies the id; the
    /// service is the only id issuer.
    pub fn new(
        id: String,
        product: String,
        version: String,
        host_name: Option<String>,
        host_fingerprint: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            product,
            version,
            host_name,
            host_fingerprint,
            created_at: now,
            updated_at: now,
            ended_at: None,
            state: Map::new(),
            state_history: Vec::new(),
            events: Vec::new(),
            metrics: Vec::new(),
            last_heartbeat: None,
            flags: SessionFlags {
                active: true,
                ..SessionFlags::default()
            },
        }
    }

    /// Project the flags onto a single state. Crashed outranks Ended; Hung
    /// outranks Suspended.
    pub fn liveness(&self) -> LivenessState {
        if self.flags.crashed {
            LivenessState::Crashed
        } else if self.flags.ended {
            LivenessState::Ended
        } else if self.flags.hung {
            LivenessState::Hung
        } else if self.flags.suspended {
            LivenessState::Suspended
        } else {
            LivenessState::Active
        }
    }

    /// Terminal sessions reject every mutation except retention deletion.
    pub fn is_terminal(&self) -> bool {
        self.flags.ended || self.flags.crashed
    }

    /// Age of the last liveness proof. Sessions that never heartbeated are
    /// measured from creation.
    pub fn heartbeat_age(&self, now: DateTime<Utc>) -> Duration {
        now - self.last_heartbeat.unwrap_or(self.created_at)
    }

    /// Deep-merge an update into the state, snapshot the result into the
    /// history, and stamp `updated_at`.
    pub fn apply_state_update(&mut self, update: Map<String, Value>, now: DateTime<Utc>) {
        deep_merge(&mut self.state, update);
        self.state_history.push(StateSnapshot {
            timestamp: now,
            state: self.state.clone(),
        });
        self.updated_at = now;
    }

    /// Append an event and stamp `updated_at`.
    pub fn push_event(&mut self, event: EventRecord, now: DateTime<Utc>) {
        self.events.push(event);
        self.updated_at = now;
    }

    /// Append a metric sample and stamp `updated_at`.
    pub fn push_metric(&mut self, sample: MetricSample, now: DateTime<Utc>) {
        self.metrics.push(sample);
        self.updated_at = now;
    }

    /// Clear the silent-failure flags after a mutation arrived.
    ///
    /// Returns `true` when either flag was set, in which case the caller
    /// appends one `application_recovered` event. `last_heartbeat` is only
    /// advanced on recovery; ordinary traffic does not count as a liveness
    /// proof (a client that streams state but never heartbeats is exactly
    /// the hung-with-traffic case).
    pub fn clear_silence(&mut self, now: DateTime<Utc>) -> bool {
        let was_silent = self.flags.suspended || self.flags.hung;
        if was_silent {
            self.flags.suspended = false;
            self.flags.hung = false;
            self.last_heartbeat = Some(now);
        }
        was_silent
    }

    /// Record an explicit heartbeat. Always advances `last_heartbeat`;
    /// returns `true` when a silence episode was cleared.
    pub fn record_heartbeat(&mut self, now: DateTime<Utc>) -> bool {
        let recovered = self.clear_silence(now);
        self.last_heartbeat = Some(now);
        self.updated_at = now;
        recovered
    }

    /// Transition to Ended. Idempotent at the registry layer; this helper
    /// assumes the session is not yet terminal.
    pub fn mark_ended(&mut self, now: DateTime<Utc>) {
        self.flags.active = false;
        self.flags.suspended = false;
        self.flags.hung = false;
        self.flags.ended = true;
        self.ended_at = Some(now);
        self.updated_at = now;
    }

    /// Transition to Crashed. Sets `ended` as well so that exactly one of
    /// {active, ended} stays true; the projection keeps Crashed on top.
    pub fn mark_crashed(&mut self, now: DateTime<Utc>) {
        self.mark_ended(now);
        self.flags.crashed = true;
    }
}
