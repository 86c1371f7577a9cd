//! Discrete event records appended to a session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Appended when a silent session resumes sending traffic or heartbeats.
pub const EVENT_RECOVERED: &str = "application_recovered";
/// Appended when a session's heartbeat age crosses the hung threshold.
pub const EVENT_APPEARS_HUNG: &str = "application_appears_hung";
/// Appended when crash inference closes a silent session.
pub const EVENT_CRASH_DETECTED: &str = "session_crashed_detected";
/// Appended by the agent after buffered items were dropped during an outage.
pub const EVENT_BACKPRESSURE: &str = "telemetry_backpressure";

/// Severity of an event. The set is closed; downstream consumers filter on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

/// A single event in a session's append-only event stream.
///
/// The timestamp is stamped by the service when the event is accepted; any
/// client-supplied timestamp is informational only and never stored here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub timestamp: DateTime<Utc>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<EventLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
}

impl EventRecord {
    /// Build a service-synthesized event (liveness transitions, crash
    /// inference). Synthetic events carry no level, category, or labels.
    pub fn synthetic(name: &str, data: Option<Map<String, Value>>, now: DateTime<Utc>) -> Self {
        Self {
            timestamp: now,
            name: name.to_string(),
            level: None,
            category: None,
            labels: Vec::new(),
            message: None,
            data,
        }
    }
}
