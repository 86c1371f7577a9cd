//! Mapping of the error taxonomy onto HTTP responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use session_pulse_core::ApiError;
use session_pulse_core::wire::ErrorBody;

/// Newtype so the taxonomy can implement axum's response conversion.
#[derive(Debug)]
pub struct HttpError(pub ApiError);

impl From<ApiError> for HttpError {
    fn from(err: ApiError) -> Self {
        Self(err)
    }
}

impl HttpError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Terminal(_) => StatusCode::CONFLICT,
            ApiError::StoreUnavailable(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody::from_api_error(&self.0);
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            HttpError(ApiError::InvalidInput("x".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            HttpError(ApiError::Unauthorized).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            HttpError(ApiError::NotFound("x".into())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            HttpError(ApiError::Terminal("x".into())).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            HttpError(ApiError::StoreUnavailable("x".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
