use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::services::status::StatusError;
use crate::services::submission::SubmitError;

/// Error returned by API handlers, rendered as `{"error", "message"}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Publish(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::Publish(_) => (StatusCode::BAD_GATEWAY, "publish_error"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        (
            status,
            Json(json!({
                "error": code,
                "message": self.to_string(),
            })),
        )
            .into_response()
    }
}

impl From<SubmitError> for ApiError {
    fn from(err: SubmitError) -> Self {
        tracing::error!(error = %err, "Job submission failed");
        match err {
            SubmitError::Publish(_) => ApiError::Publish("failed to enqueue job".to_string()),
            SubmitError::Repository(_) => ApiError::Internal("failed to record job".to_string()),
        }
    }
}

impl From<StatusError> for ApiError {
    fn from(err: StatusError) -> Self {
        match err {
            StatusError::NotFound(job_id) => ApiError::NotFound(format!("job not found: {job_id}")),
            StatusError::Repository(e) => {
                tracing::error!(error = %e, "Job status lookup failed");
                ApiError::Internal("error retrieving job status".to_string())
            }
        }
    }
}
