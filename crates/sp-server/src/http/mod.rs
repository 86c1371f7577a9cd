//! HTTP surface of the central service.
//!
//! The endpoint grammar:
//!
//! ```text
//! POST /api/sessions                  create
//! GET  /api/sessions/:id              snapshot read
//! POST /api/sessions/:id/state        deep-merge state update
//! POST /api/sessions/:id/events       append event
//! POST /api/sessions/:id/metrics      append metric
//! POST /api/sessions/:id/heartbeat    liveness proof
//! POST /api/sessions/:id/end          explicit end
//! POST /api/sessions/:id/crash        agent-reported crash
//! GET  /api/data/sessions             enumerate
//! GET  /health                        unauthenticated liveness
//! ```
//!
//! Everything under `/api` sits behind the bearer gate; `/health` does not.

pub mod auth;
pub mod body;
pub mod error;
pub mod handlers;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::{Router, middleware};
use session_pulse_core::config::ServerConfig;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::registry::SessionRegistry;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    /// Expected bearer token; `None` disables the gate.
    pub api_key: Option<String>,
}

impl AppState {
    pub fn new(registry: Arc<SessionRegistry>, config: &ServerConfig) -> Self {
        let api_key = match (config.require_api_key, config.api_key.clone()) {
            (true, Some(key)) if !key.is_empty() => Some(key),
            (true, _) => {
                warn!("require_api_key is set but no api_key is configured; auth disabled");
                None
            }
            (false, _) => None,
        };
        Self { registry, api_key }
    }
}

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/sessions", post(handlers::create_session))
        .route("/sessions/:id", get(handlers::get_session))
        .route("/sessions/:id/state", post(handlers::update_state))
        .route("/sessions/:id/events", post(handlers::log_event))
        .route("/sessions/:id/metrics", post(handlers::log_metric))
        .route("/sessions/:id/heartbeat", post(handlers::heartbeat))
        .route("/sessions/:id/end", post(handlers::end_session))
        .route("/sessions/:id/crash", post(handlers::mark_crashed))
        .route("/data/sessions", get(handlers::list_sessions))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer,
        ));

    Router::new()
        .nest("/api", api)
        .route("/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
