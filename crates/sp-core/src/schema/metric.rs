//! Numeric metric samples appended to a session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metric kind. The set is closed; counter samples are the only kind the
/// agent coalesces before forwarding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Gauge,
    Counter,
    Histogram,
    Timer,
}

/// A single sample in a session's append-only metric stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub timestamp: DateTime<Utc>,
    pub name: String,
    pub value: f64,
    pub kind: MetricKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Sorted finite boundaries; only meaningful for histograms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_boundaries: Option<Vec<f64>>,
    /// Number of source samples folded into this one (counter aggregation).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
}
