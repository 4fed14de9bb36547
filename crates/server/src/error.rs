// crates/server/src/error.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::jobs::JobError;

/// Structured JSON error response for API errors
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}

/// API error types that map to HTTP status codes
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Job(#[from] JobError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Missing or invalid API token")]
    Unauthorized,

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = match &self {
            ApiError::Job(job_err) => match job_err {
                JobError::NotFound(id) => {
                    tracing::debug!(job_id = %id, "Job not found");
                    (
                        StatusCode::NOT_FOUND,
                        ErrorResponse::with_details("Job not found", format!("Job ID: {id}")),
                    )
                }
                JobError::InvalidInput(msg) => {
                    tracing::warn!(message = %msg, "Invalid job request");
                    (
                        StatusCode::BAD_REQUEST,
                        ErrorResponse::with_details("Invalid input", msg.clone()),
                    )
                }
                JobError::InvalidState { id, status, action } => {
                    tracing::warn!(job_id = %id, status = %status, action, "Operation not allowed in current state");
                    (
                        StatusCode::CONFLICT,
                        ErrorResponse::with_details("Invalid job state", job_err.to_string()),
                    )
                }
                JobError::CapacityExceeded { limit } => {
                    tracing::warn!(limit, "Concurrent job limit reached");
                    (
                        StatusCode::TOO_MANY_REQUESTS,
                        ErrorResponse::with_details("Capacity exceeded", job_err.to_string()),
                    )
                }
                JobError::NotImplemented(what) => (
                    StatusCode::NOT_IMPLEMENTED,
                    ErrorResponse::with_details("Not implemented", format!("{what} is not supported")),
                ),
                JobError::RunnerFailure(msg) => {
                    tracing::error!(error = %msg, "Training runner failed to launch");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        ErrorResponse::with_details("Training runner failed", msg.clone()),
                    )
                }
                JobError::PersistenceFailure(store_err) => {
                    tracing::error!(error = %store_err, "Job store failure");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        ErrorResponse::new("Internal server error"),
                    )
                }
            },
            ApiError::BadRequest(msg) => {
                tracing::warn!(message = %msg, "Bad request");
                (
                    StatusCode::BAD_REQUEST,
                    ErrorResponse::with_details("Bad request", msg.clone()),
                )
            }
            ApiError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                ErrorResponse::with_details("Not found", msg.clone()),
            ),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                ErrorResponse::new("Unauthorized"),
            ),
            ApiError::Internal(msg) => {
                tracing::error!(message = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new("Internal server error"),
                )
            }
        };

        (status, Json(error_response)).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
