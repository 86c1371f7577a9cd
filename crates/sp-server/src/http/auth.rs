//! Bearer token gate for the `/api` routes.
//!
//! When a token is configured, every request through this layer must carry
//! `Authorization: Bearer <token>`. The comparison is constant-time so the
//! token cannot be probed byte by byte. `/health` is mounted outside this
//! layer and needs no credentials.

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use session_pulse_core::ApiError;
use subtle::ConstantTimeEq;

use crate::http::AppState;
use crate::http::error::HttpError;

/// Middleware enforcing the shared bearer token.
pub async fn require_bearer(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(expected) = state.api_key.as_deref() else {
        return next.run(request).await;
    };

    let provided = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    match provided {
        Some(token) if token_matches(token, expected) => next.run(request).await,
        _ => HttpError(ApiError::Unauthorized).into_response(),
    }
}

/// Constant-time equality; slices of different lengths compare unequal
/// without leaking where they diverge.
fn token_matches(provided: &str, expected: &str) -> bool {
    provided.as_bytes().ct_eq(expected.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_matches_exact_only() {
        assert!(token_matches("secret", "secret"));
        assert!(!token_matches("secret", "secreT"));
        assert!(!token_matches("secre", "secret"));
        assert!(!token_matches("", "secret"));
    }
}
