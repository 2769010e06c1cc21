//! HTTP error mapping. Every error body is `{"detail": "..."}`.

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

use crate::domain::TaskError;

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    pub fn unprocessable(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, detail)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }
}

impl From<TaskError> for ApiError {
    fn from(err: TaskError) -> Self {
        match err {
            TaskError::Validation(msg) => Self::unprocessable(msg),
            TaskError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, "Task not found"),
            TaskError::NotCancellable { .. } => Self::new(
                StatusCode::BAD_REQUEST,
                "Cannot cancel task in current status",
            ),
            TaskError::InvalidTransition(e) => Self::new(StatusCode::CONFLICT, e.to_string()),
            TaskError::Broker(e) => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to publish task: {e}"))
            }
            TaskError::Storage(e) => {
                error!(error = %e, "storage failure while serving request");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            JsonRejection::MissingJsonContentType(_) => {
                Self::new(rejection.status(), rejection.body_text())
            }
            _ => Self::unprocessable(rejection.body_text()),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::unprocessable(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BrokerError, InvalidTransition, StorageError, TaskId, TaskStatus};
    use rstest::rstest;

    #[rstest]
    #[case::validation(TaskError::Validation("name".into()), StatusCode::UNPROCESSABLE_ENTITY)]
    #[case::not_found(TaskError::NotFound(TaskId::random()), StatusCode::NOT_FOUND)]
    #[case::not_cancellable(
        TaskError::NotCancellable { id: TaskId::random(), status: TaskStatus::Completed },
        StatusCode::BAD_REQUEST
    )]
    #[case::race(
        TaskError::InvalidTransition(InvalidTransition { from: TaskStatus::InProgress, to: TaskStatus::Cancelled }),
        StatusCode::CONFLICT
    )]
    #[case::broker(TaskError::Broker(BrokerError::ConnectionLost), StatusCode::INTERNAL_SERVER_ERROR)]
    #[case::storage(
        TaskError::Storage(StorageError::Unavailable("down".into())),
        StatusCode::INTERNAL_SERVER_ERROR
    )]
    fn task_errors_map_to_status(#[case] err: TaskError, #[case] status: StatusCode) {
        assert_eq!(ApiError::from(err).status(), status);
    }

    #[test]
    fn broker_failure_detail_names_publish() {
        let err = ApiError::from(TaskError::Broker(BrokerError::Unavailable("down".into())));
        assert!(err.detail().starts_with("Failed to publish task: "));
    }
}
