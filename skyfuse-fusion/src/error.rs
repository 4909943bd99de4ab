//! Error types for skyfuse-fusion
//!
//! [`Error`] is what the pipeline, stores and backends return. Most of it
//! never reaches an HTTP caller: cache and queue failures degrade to the
//! next tier and are only logged. [`ApiError`] is what handlers return.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Main error type for the fusion service
#[derive(Error, Debug)]
pub enum Error {
    /// Durable store query or connection error
    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),

    /// Redis cache or queue backend error
    #[error("Backend error: {0}")]
    Backend(#[from] redis::RedisError),

    /// Backend disabled or not answering in time
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// Snapshot or message (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Collaborator (route resolver, position provider) failure
    #[error("Collaborator error: {0}")]
    Collaborator(String),

    /// Error from skyfuse-common
    #[error(transparent)]
    Common(#[from] skyfuse_common::Error),
}

/// Convenience Result type using the fusion Error
pub type Result<T> = std::result::Result<T, Error>;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Fusion error surfaced to the caller
    #[error(transparent)]
    Fusion(#[from] Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Fusion(Error::Common(skyfuse_common::Error::InvalidInput(msg))) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg)
            }
            ApiError::Fusion(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                err.to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

impl From<skyfuse_common::Error> for ApiError {
    fn from(err: skyfuse_common::Error) -> Self {
        ApiError::Fusion(Error::Common(err))
    }
}

/// Result type for API handlers
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_input_maps_to_bad_request() {
        let err: ApiError = skyfuse_common::Error::InvalidInput("south > north".to_string()).into();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_backend_failures_map_to_internal_error() {
        let err = ApiError::from(Error::Unavailable("store offline".to_string()));
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);

        let err = ApiError::NotFound("aircraft abc123".to_string());
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }
}
