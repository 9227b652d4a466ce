use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::engine::EngineError;
use crate::observability::error_code;

/// Error type for HTTP handlers.
///
/// Engine errors map onto a status and a stable `code`; the body is always
/// `{ "error": message, "code": CODE }`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

fn status_for(err: &EngineError) -> StatusCode {
    match err {
        EngineError::SlotNotFound(_) | EngineError::NotFound(_) => StatusCode::NOT_FOUND,
        EngineError::DateRangeOutOfBounds { .. } | EngineError::MinimumStayViolation { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        EngineError::SlotClosed(_)
        | EngineError::CapacityRecordMissing(_)
        | EngineError::CapacityExceeded(_)
        | EngineError::AlreadyExists(_)
        | EngineError::DuplicateApplication { .. }
        | EngineError::InvalidTransition { .. }
        | EngineError::CapacityBelowBooked { .. } => StatusCode::CONFLICT,
        EngineError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        EngineError::NotPermitted(_) => StatusCode::FORBIDDEN,
        EngineError::InvalidInput(_) | EngineError::LimitExceeded(_) => StatusCode::BAD_REQUEST,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Engine(err) => {
                if err.is_retryable() {
                    tracing::warn!(error = %err, "storage unavailable");
                }
                (status_for(err), error_code(err), err.to_string())
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "INVALID_INPUT", msg.clone()),
        };

        let body = json!({
            "error": message,
            "code": code,
        });
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn capacity_exceeded_is_conflict_with_date() {
        let day = NaiveDate::from_ymd_opt(2025, 7, 14).unwrap();
        let err = AppError::from(EngineError::CapacityExceeded(day));
        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn statuses_follow_error_kind() {
        let id = ulid::Ulid::new();
        let cases = [
            (EngineError::SlotNotFound(id), StatusCode::NOT_FOUND),
            (EngineError::SlotClosed(id), StatusCode::CONFLICT),
            (
                EngineError::MinimumStayViolation {
                    requested_days: 3,
                    minimum_days: 7,
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (EngineError::StorageUnavailable("x".into()), StatusCode::SERVICE_UNAVAILABLE),
            (EngineError::NotPermitted("no"), StatusCode::FORBIDDEN),
            (EngineError::LimitExceeded("big"), StatusCode::BAD_REQUEST),
        ];
        for (err, status) in cases {
            assert_eq!(status_for(&err), status, "{err}");
        }
    }
}
