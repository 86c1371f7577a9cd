//! Request handlers over the session registry.
//!
//! Handlers stay thin: decode the body, hop to the blocking pool (registry
//! mutations hold a lock across a store write), translate the result. The
//! service clock is stamped here with `Utc::now()` — client timestamps are
//! never authoritative.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use chrono::Utc;
use serde_json::{Map, Value};
use session_pulse_core::ApiError;
use session_pulse_core::wire::{
    Ack, CrashRequest, CreateSessionRequest, CreateSessionResponse, EventBody, HealthResponse,
    MetricBody,
};
use session_pulse_core::SessionRecord;

use crate::http::AppState;
use crate::http::body::decode_json;
use crate::http::error::HttpError;

async fn run_blocking<T, F>(op: F) -> Result<T, HttpError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| HttpError(ApiError::Internal(format!("registry task failed: {e}"))))?
        .map_err(HttpError)
}

/// `POST /api/sessions`
pub async fn create_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<CreateSessionResponse>, HttpError> {
    let req: CreateSessionRequest = decode_json(&headers, &body)?;
    let registry = state.registry.clone();
    let record = run_blocking(move || registry.create_session(req, Utc::now())).await?;
    Ok(Json(CreateSessionResponse {
        success: true,
        id: record.id,
    }))
}

/// `GET /api/sessions/:id`
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionRecord>, HttpError> {
    let registry = state.registry.clone();
    let record = run_blocking(move || registry.get_session(&id)).await?;
    Ok(Json(record))
}

/// `GET /api/data/sessions`
pub async fn list_sessions(
    State(state): State<AppState>,
) -> Result<Json<Vec<SessionRecord>>, HttpError> {
    let registry = state.registry.clone();
    let records = run_blocking(move || Ok(registry.list_sessions())).await?;
    Ok(Json(records))
}

/// `POST /api/sessions/:id/state`
pub async fn update_state(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Ack>, HttpError> {
    let update: Map<String, Value> = decode_json(&headers, &body)?;
    let registry = state.registry.clone();
    run_blocking(move || registry.update_state(&id, update, Utc::now())).await?;
    Ok(Json(Ack::ok()))
}

/// `POST /api/sessions/:id/events`
pub async fn log_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Ack>, HttpError> {
    let event: EventBody = decode_json(&headers, &body)?;
    let registry = state.registry.clone();
    run_blocking(move || registry.log_event(&id, event, Utc::now())).await?;
    Ok(Json(Ack::ok()))
}

/// `POST /api/sessions/:id/metrics`
pub async fn log_metric(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Ack>, HttpError> {
    let metric: MetricBody = decode_json(&headers, &body)?;
    let registry = state.registry.clone();
    run_blocking(move || registry.log_metric(&id, metric, Utc::now())).await?;
    Ok(Json(Ack::ok()))
}

/// `POST /api/sessions/:id/heartbeat`
pub async fn heartbeat(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Ack>, HttpError> {
    let registry = state.registry.clone();
    run_blocking(move || registry.heartbeat(&id, Utc::now())).await?;
    Ok(Json(Ack::ok()))
}

/// `POST /api/sessions/:id/end`
pub async fn end_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Ack>, HttpError> {
    let registry = state.registry.clone();
    run_blocking(move || registry.end(&id, Utc::now())).await?;
    Ok(Json(Ack::ok()))
}

/// `POST /api/sessions/:id/crash`
///
/// The body is optional; an absent or empty body records the default reason.
pub async fn mark_crashed(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Ack>, HttpError> {
    let req: CrashRequest = if body.is_empty() {
        CrashRequest { reason: None }
    } else {
        decode_json(&headers, &body)?
    };
    let registry = state.registry.clone();
    run_blocking(move || registry.mark_crashed(&id, req.reason, Utc::now())).await?;
    Ok(Json(Ack::ok()))
}

/// `GET /health` — unauthenticated, undecompressed, always cheap.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        sessions: state.registry.session_count(),
    })
}
