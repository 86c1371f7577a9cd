//! Request and response bodies for the HTTP API and the agent's local surface.
//!
//! Mutating requests to the central service carry the session id in the URL
//! path; the agent's loopback surface carries `session_id` in the body
//! instead. Client-supplied timestamps are accepted but informational — the
//! service stamps every stored record with its own clock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ApiError;
use crate::schema::{EventLevel, EventRecord, MetricKind, MetricSample};

// ── Service API bodies ───────────────────────────────────────────────────────

/// Body of `POST /api/sessions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    pub product: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_fingerprint: Option<String>,
}

/// Response of `POST /api/sessions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    pub success: bool,
    pub id: String,
}

/// Minimal acknowledgment for mutating operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ack {
    pub success: bool,
}

impl Ack {
    pub fn ok() -> Self {
        Self { success: true }
    }
}

/// Body of `POST /api/sessions/{id}/events`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventBody {
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
    /// Informational client timestamp; the service stamps its own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl EventBody {
    /// Materialize the stored record with the service's clock.
    pub fn into_record(self, now: DateTime<Utc>) -> EventRecord {
        EventRecord {
            timestamp: now,
            name: self.name,
            level: self.level,
            category: self.category,
            labels: self.labels,
            message: self.message,
            data: self.data,
        }
    }

    /// A bare named event, used by the agent for its synthesized events.
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            level: None,
            category: None,
            labels: Vec::new(),
            message: None,
            data: None,
            timestamp: None,
        }
    }
}

/// Body of `POST /api/sessions/{id}/metrics`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricBody {
    pub name: String,
    pub value: f64,
    pub kind: MetricKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_boundaries: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    /// Informational client timestamp; the service stamps its own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl MetricBody {
    /// Materialize the stored sample with the service's clock.
    pub fn into_sample(self, now: DateTime<Utc>) -> MetricSample {
        MetricSample {
            timestamp: now,
            name: self.name,
            value: self.value,
            kind: self.kind,
            unit: self.unit,
            tags: self.tags,
            bucket_boundaries: self.bucket_boundaries,
            count: self.count,
        }
    }
}

/// Body of `POST /api/sessions/{id}/crash`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrashRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Body of `GET /health`. Unauthenticated liveness probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub sessions: usize,
}

/// Error body rendered for every failed request:
/// `{"error":{"code":"NOT_FOUND","message":"..."}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl ErrorBody {
    pub fn from_api_error(err: &ApiError) -> Self {
        Self {
            error: ErrorDetail {
                code: err.code().to_string(),
                message: err.to_string(),
            },
        }
    }

    /// Rebuild the taxonomy kind on the client side.
    pub fn into_api_error(self) -> ApiError {
        ApiError::from_code(&self.error.code, &self.error.message)
    }
}

// ── Agent local surface bodies ───────────────────────────────────────────────

/// Body of the agent's `POST /register`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub product: String,
    pub version: String,
    /// Process id of the application; enables parent monitoring.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_fingerprint: Option<String>,
}

/// Response of the agent's `POST /register`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub success: bool,
    pub session_id: String,
}

/// Body of the agent's `POST /state`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalStateRequest {
    pub session_id: String,
    pub state: Map<String, Value>,
}

/// Body of the agent's `POST /event`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalEventRequest {
    pub session_id: String,
    #[serde(flatten)]
    pub event: EventBody,
}

/// Body of the agent's `POST /metric`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalMetricRequest {
    pub session_id: String,
    #[serde(flatten)]
    pub metric: MetricBody,
}

/// Body of the agent's `POST /heartbeat` and `POST /end`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalSessionRequest {
    pub session_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_request_minimal_body() {
        let req: CreateSessionRequest =
            serde_json::from_value(json!({"product": "editor", "version": "1.0"})).unwrap();
        assert_eq!(req.product, "editor");
        assert!(req.host_fingerprint.is_none());
    }

    #[test]
    fn test_event_body_timestamp_is_not_authoritative() {
        let client_stamp = Utc::now() - chrono::Duration::hours(5);
        let body: EventBody = serde_json::from_value(json!({
            "name": "saved",
            "timestamp": client_stamp.to_rfc3339(),
        }))
        .unwrap();
        let now = Utc::now();
        let record = body.into_record(now);
        assert_eq!(record.timestamp, now);
    }

    #[test]
    fn test_local_event_flattens_payload() {
        let req: LocalEventRequest = serde_json::from_value(json!({
            "session_id": "sess-1",
            "name": "clicked",
            "level": "info",
        }))
        .unwrap();
        assert_eq!(req.session_id, "sess-1");
        assert_eq!(req.event.name, "clicked");
        assert_eq!(req.event.level, Some(crate::schema::EventLevel::Info));
    }

    #[test]
    fn test_error_body_round_trip() {
        let err = ApiError::NotFound("sess-9".into());
        let body = ErrorBody::from_api_error(&err);
        let json = serde_json::to_string(&body).unwrap();
        let decoded: ErrorBody = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.into_api_error().code(), "NOT_FOUND");
    }
}
