//! HTTP error mapping.

use actors::{ResolveError, SubmitError};
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use jobs_core::AdmissionError;

/// Errors returned by the HTTP handlers, rendered as `{"error": "..."}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Admission(#[from] AdmissionError),

    #[error("{0}")]
    BadRequest(String),

    #[error("Pdf file not found")]
    JobNotFound,

    /// A terminal job whose artifact cannot be read.
    #[error("{0}")]
    ArtifactMissing(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Admission(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::JobNotFound | ApiError::ArtifactMissing(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<SubmitError> for ApiError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::Admission(e) => ApiError::Admission(e),
            SubmitError::DuplicateIdentifier(_) => ApiError::Conflict(err.to_string()),
            SubmitError::QueueUnavailable(_) => ApiError::Unavailable(err.to_string()),
            SubmitError::Storage(_) | SubmitError::Database(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<ResolveError> for ApiError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::NotFound(_) => ApiError::JobNotFound,
            ResolveError::ArtifactMissing { .. } => ApiError::ArtifactMissing(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
