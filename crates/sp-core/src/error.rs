//! Transport-neutral error taxonomy shared by service and agent.
//!
//! Every failure that crosses the wire maps onto one of these kinds. The HTTP
//! layer translates kinds to status codes; the agent uses [`ApiError::is_retryable`]
//! to decide between re-queueing an operation and surfacing it to the caller.

use thiserror::Error;

/// Errors surfaced by the service API and mirrored by the agent's forwarder.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Missing required field, malformed payload, or unsupported encoding.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Missing or mismatched bearer token.
    #[error("unauthorized")]
    Unauthorized,

    /// No session with the given id.
    #[error("session not found: {0}")]
    NotFound(String),

    /// Mutation attempted on an ended or crashed session.
    #[error("session is terminal: {0}")]
    Terminal(String),

    /// The persistence layer failed.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Unexpected failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Machine-readable error code carried in wire error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidInput(_) => "INVALID_INPUT",
            ApiError::Unauthorized => "UNAUTHORIZED",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Terminal(_) => "TERMINAL",
            ApiError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            ApiError::Internal(_) => "INTERNAL",
        }
    }

    /// Rebuild an error kind from a wire code plus message.
    ///
    /// Unknown codes collapse to [`ApiError::Internal`] so the agent still
    /// classifies them (internal errors are retryable).
    pub fn from_code(code: &str, message: &str) -> Self {
        match code {
            "INVALID_INPUT" => ApiError::InvalidInput(message.to_string()),
            "UNAUTHORIZED" => ApiError::Unauthorized,
            "NOT_FOUND" => ApiError::NotFound(message.to_string()),
            "TERMINAL" => ApiError::Terminal(message.to_string()),
            "STORE_UNAVAILABLE" => ApiError::StoreUnavailable(message.to_string()),
            _ => ApiError::Internal(message.to_string()),
        }
    }

    /// Whether repeating the same request later can succeed.
    ///
    /// Store and internal failures are transient; everything else is a
    /// property of the request itself and must not be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::StoreUnavailable(_) | ApiError::Internal(_)
        )
    }
}
