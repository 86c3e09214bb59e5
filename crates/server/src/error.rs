use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use transq_core::error::ApiError;
use transq_scheduler::SchedulerError;

/// `ApiError` as an axum response.
#[derive(Debug)]
pub struct AppError(pub ApiError);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.0.envelope())).into_response()
    }
}

impl From<ApiError> for AppError {
    fn from(e: ApiError) -> Self {
        Self(e)
    }
}

impl From<SchedulerError> for AppError {
    fn from(e: SchedulerError) -> Self {
        let message = e.to_string();
        Self(match e {
            SchedulerError::SubmissionRejected => ApiError::Unavailable(message),
            SchedulerError::JobNotFound(_) => ApiError::NotFound(message),
            SchedulerError::InvalidJob(_) => ApiError::BadRequest(message),
            SchedulerError::InvalidTransition { .. } => ApiError::Conflict(message),
        })
    }
}
