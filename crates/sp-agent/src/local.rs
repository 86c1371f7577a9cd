//! The agent's loopback surface for the client library.
//!
//! Same shapes as the service API, but mutating requests carry `session_id`
//! in the body and every buffered operation answers immediately — acceptance
//! means "queued", not "persisted". `register` is the one call that must
//! round-trip to the central service, because only the service issues ids.
//! The two read endpoints proxy straight through so local tooling can browse
//! without knowing the central address.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use session_pulse_core::wire::{
    Ack, CreateSessionRequest, ErrorBody, LocalEventRequest, LocalMetricRequest,
    LocalSessionRequest, LocalStateRequest, RegisterRequest, RegisterResponse,
};
use session_pulse_core::{ApiError, SessionRecord, host};
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::buffers::{AgentBuffers, lock_buffer};
use crate::client::ServiceClient;

/// Shared state of the loopback router.
#[derive(Clone)]
pub struct LocalState {
    pub buffers: Arc<AgentBuffers>,
    pub client: Arc<ServiceClient>,
    /// Wakes the flush task for operations that should not wait a full
    /// interval (ends, explicit flushes).
    pub kick: Arc<Notify>,
}

/// Build the loopback router.
pub fn build_router(state: LocalState) -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/state", post(push_state))
        .route("/event", post(push_event))
        .route("/metric", post(push_metric))
        .route("/heartbeat", post(push_heartbeat))
        .route("/end", post(push_end))
        .route("/session/:id", get(get_session))
        .route("/sessions", get(list_sessions))
        .route("/health", get(health))
        .with_state(state)
}

/// Local error envelope; same wire shape as the service.
struct LocalError(ApiError);

impl From<ApiError> for LocalError {
    fn from(err: ApiError) -> Self {
        Self(err)
    }
}

impl IntoResponse for LocalError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Terminal(_) => StatusCode::CONFLICT,
            ApiError::StoreUnavailable(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(ErrorBody::from_api_error(&self.0))).into_response()
    }
}

/// `POST /register` — create the session at the service and start tracking
/// it locally. Host identity is filled in when the caller leaves it out.
async fn register(
    State(state): State<LocalState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, LocalError> {
    let create = CreateSessionRequest {
        product: req.product,
        version: req.version,
        host_name: req.host_name.or_else(host::host_name),
        host_fingerprint: req.host_fingerprint.or_else(host::host_fingerprint),
    };
    let session_id = state.client.create_session(&create).await?;
    state.buffers.register(&session_id, req.parent_pid);
    info!(
        "Registered session {session_id} (parent pid: {:?})",
        req.parent_pid
    );
    Ok(Json(RegisterResponse {
        success: true,
        session_id,
    }))
}

/// `POST /state` — merge a delta into the pending accumulator.
async fn push_state(
    State(state): State<LocalState>,
    Json(req): Json<LocalStateRequest>,
) -> Result<Json<Ack>, LocalError> {
    let buffer = state
        .buffers
        .get(&req.session_id)
        .ok_or_else(|| ApiError::NotFound(req.session_id.clone()))?;
    lock_buffer(&buffer).push_state(req.state);
    Ok(Json(Ack::ok()))
}

/// `POST /event` — append to the event buffer.
async fn push_event(
    State(state): State<LocalState>,
    Json(req): Json<LocalEventRequest>,
) -> Result<Json<Ack>, LocalError> {
    if req.event.name.trim().is_empty() {
        return Err(ApiError::InvalidInput("event name must not be empty".into()).into());
    }
    let buffer = state
        .buffers
        .get(&req.session_id)
        .ok_or_else(|| ApiError::NotFound(req.session_id.clone()))?;
    let bound = state.buffers.bound();
    lock_buffer(&buffer).push_event(req.event, bound);
    Ok(Json(Ack::ok()))
}

/// `POST /metric` — append to the metric buffer; counters coalesce.
async fn push_metric(
    State(state): State<LocalState>,
    Json(req): Json<LocalMetricRequest>,
) -> Result<Json<Ack>, LocalError> {
    if req.metric.name.trim().is_empty() {
        return Err(ApiError::InvalidInput("metric name must not be empty".into()).into());
    }
    let buffer = state
        .buffers
        .get(&req.session_id)
        .ok_or_else(|| ApiError::NotFound(req.session_id.clone()))?;
    let bound = state.buffers.bound();
    lock_buffer(&buffer).push_metric(req.metric, bound);
    Ok(Json(Ack::ok()))
}

/// `POST /heartbeat` — one wire heartbeat per flush interval.
async fn push_heartbeat(
    State(state): State<LocalState>,
    Json(req): Json<LocalSessionRequest>,
) -> Result<Json<Ack>, LocalError> {
    let buffer = state
        .buffers
        .get(&req.session_id)
        .ok_or_else(|| ApiError::NotFound(req.session_id.clone()))?;
    lock_buffer(&buffer).record_heartbeat();
    Ok(Json(Ack::ok()))
}

/// `POST /end` — queue the clean end and flush promptly.
async fn push_end(
    State(state): State<LocalState>,
    Json(req): Json<LocalSessionRequest>,
) -> Result<Json<Ack>, LocalError> {
    let buffer = state
        .buffers
        .get(&req.session_id)
        .ok_or_else(|| ApiError::NotFound(req.session_id.clone()))?;
    {
        let mut buf = lock_buffer(&buffer);
        buf.end_pending = true;
        buf.ended = true;
    }
    debug!("Session {} end queued", req.session_id);
    state.kick.notify_one();
    Ok(Json(Ack::ok()))
}

/// `GET /session/:id` — read-through to the service.
async fn get_session(
    State(state): State<LocalState>,
    Path(id): Path<String>,
) -> Result<Json<SessionRecord>, LocalError> {
    let record = state.client.get_session(&id).await?;
    Ok(Json(record))
}

/// `GET /sessions` — read-through to the service.
async fn list_sessions(
    State(state): State<LocalState>,
) -> Result<Json<Vec<SessionRecord>>, LocalError> {
    let records = state.client.list_sessions().await?;
    Ok(Json(records))
}

/// `GET /health` — agent-local liveness.
async fn health(State(state): State<LocalState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.buffers.len(),
    }))
}

// ── Tests ────────────────────────────────────────────────────────────────────
