//! Error types for kitchen-allergens
//!
//! Handlers return [`ApiError`]; the body is always
//! `{"success": false, "error": {"code", "message"}}`.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use kitchen_common::api::ApiAuthError;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Missing or invalid request signature (401)
    #[error("Unauthorized: {0}")]
    Unauthorized(#[from] ApiAuthError),

    /// Conflict (409), e.g. a re-aggregation is already running
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Caller exhausted its request budget (429)
    #[error("Too many requests, retry after {}s", retry_after.as_secs())]
    TooManyRequests { retry_after: Duration },

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// kitchen-common error, mapped by kind
    #[error("{0}")]
    Common(#[from] kitchen_common::Error),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str) {
        use kitchen_common::Error as E;
        match self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            ApiError::TooManyRequests { .. } => (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            ApiError::Common(err) => match err {
                E::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                E::InvalidInput(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
                E::DatastoreUnavailable(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATASTORE_UNAVAILABLE"),
                E::CorruptRecord(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CORRUPT_RECORD"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code) = self.parts();

        if status.is_server_error() {
            tracing::error!(code = error_code, error = %self, "Request failed");
        }

        let body = Json(json!({
            "success": false,
            "error": {
                "code": error_code,
                "message": self.to_string(),
            }
        }));

        let mut response = (status, body).into_response();
        if let ApiError::TooManyRequests { retry_after } = &self {
            // Round up so clients never retry early
            let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            if let Ok(value) = HeaderValue::from_str(&secs.max(1).to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_errors_map_by_kind() {
        let err = ApiError::from(kitchen_common::Error::not_found("recipe", "r-1"));
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);

        let err = ApiError::from(kitchen_common::Error::from(sqlx::Error::PoolTimedOut));
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);

        let err = ApiError::from(kitchen_common::Error::InvalidInput("bad".to_string()));
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_rate_limited_sets_retry_after() {
        let response = ApiError::TooManyRequests {
            retry_after: Duration::from_millis(2500),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "3");
    }

    #[test]
    fn test_auth_errors_are_unauthorized() {
        let err = ApiError::from(ApiAuthError::InvalidSignature);
        assert_eq!(err.into_response().status(), StatusCode::UNAUTHORIZED);
    }
}
