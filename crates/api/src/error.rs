//! API error types with HTTP response mapping.

use allocator::AllocatorError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use store::StoreError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// The request conflicts with the resource's current state.
    Conflict(String),
    /// The caller may not act on this resource.
    Forbidden(String),
    /// Allocation failure.
    Allocator(AllocatorError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::Allocator(err) => allocator_error_to_response(err),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn allocator_error_to_response(err: AllocatorError) -> (StatusCode, String) {
    match &err {
        // The store kept losing races past the retry budget; the
        // client can simply try again.
        AllocatorError::RetriesExhausted { .. } => {
            tracing::warn!(error = %err, "allocation retries exhausted");
            (StatusCode::SERVICE_UNAVAILABLE, err.to_string())
        }
        AllocatorError::Store(StoreError::InvariantViolation { .. }) => {
            tracing::error!(error = %err, "capacity invariant violated");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error".to_string(),
            )
        }
        AllocatorError::Store(_) => {
            tracing::error!(error = %err, "store error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error".to_string(),
            )
        }
    }
}

impl From<AllocatorError> for ApiError {
    fn from(err: AllocatorError) -> Self {
        ApiError::Allocator(err)
    }
}
