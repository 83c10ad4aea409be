//! API error handling.
//!
//! Every failure is returned as JSON `{code, message}` with a matching status.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use mixtape::{MixtapeError, QueueError, ResolveError};

/// API error response body.
#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    /// Error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
}

/// API error type that can be converted to HTTP responses.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    /// 422, for playlists that could not be turned into a job.
    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, "UNPROCESSABLE", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorResponse {
            code: self.code,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::JobNotFound(id) => ApiError::not_found(format!("Job '{}' not found", id)),
            QueueError::ArchiveNotAvailable(id) => {
                ApiError::not_found(format!("No archive available for job '{}'", id))
            }
            QueueError::WorkDirectory { .. } => {
                tracing::error!("Work directory error: {}", err);
                ApiError::internal("Work directory unavailable")
            }
        }
    }
}

impl From<ResolveError> for ApiError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::UnsupportedLocator(_) => ApiError::bad_request(err.to_string()),
            ResolveError::Empty | ResolveError::Failed { .. } | ResolveError::Parse(_) => {
                ApiError::unprocessable(err.to_string())
            }
            ResolveError::Spawn { .. } => {
                tracing::error!("Resolver unavailable: {}", err);
                ApiError::internal("Playlist resolver unavailable")
            }
        }
    }
}

impl From<MixtapeError> for ApiError {
    fn from(err: MixtapeError) -> Self {
        match err {
            MixtapeError::Resolve(e) => e.into(),
            MixtapeError::Queue(e) => e.into(),
            other => {
                tracing::error!("Internal error: {}", other);
                ApiError::internal(other.to_string())
            }
        }
    }
}
