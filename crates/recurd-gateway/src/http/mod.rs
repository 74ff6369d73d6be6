pub mod executions;
pub mod health;
pub mod jobs;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use recurd_scheduler::SchedulerError;
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

/// Error response: `{ "error": { "code", "message" } }`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorBody,
}

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            body: ErrorBody {
                code: "NOT_FOUND",
                message: message.into(),
            },
        }
    }
}

impl From<SchedulerError> for ApiError {
    fn from(e: SchedulerError) -> Self {
        let status = match &e {
            SchedulerError::JobNotFound { .. } => StatusCode::NOT_FOUND,
            SchedulerError::DuplicateName { .. } | SchedulerError::InvalidState(_) => {
                StatusCode::CONFLICT
            }
            SchedulerError::InvalidFunction { .. } | SchedulerError::InvalidSchedule(_) => {
                StatusCode::BAD_REQUEST
            }
            SchedulerError::Database(_) | SchedulerError::Serialization(_) => {
                warn!(error = %e, "scheduler operation failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            body: ErrorBody {
                code: e.code(),
                message: e.to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.body })),
        )
            .into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
