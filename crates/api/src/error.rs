use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use scheduler_core::SchedulerError;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("调度器错误: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("请求参数错误: {0}")]
    BadRequest(String),

    #[error("未找到资源")]
    NotFound,
}

impl ApiError {
    fn status_and_type(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Scheduler(err) => match err {
                SchedulerError::JobNotFound { .. } => (StatusCode::NOT_FOUND, "JOB_NOT_FOUND"),
                SchedulerError::ScheduleNotFound { .. } => {
                    (StatusCode::NOT_FOUND, "SCHEDULE_NOT_FOUND")
                }
                SchedulerError::ExecutionNotFound { .. } => {
                    (StatusCode::NOT_FOUND, "EXECUTION_NOT_FOUND")
                }
                SchedulerError::WorkerNotFound { .. } => {
                    (StatusCode::NOT_FOUND, "WORKER_NOT_FOUND")
                }
                SchedulerError::InvalidCron { .. } => {
                    (StatusCode::BAD_REQUEST, "INVALID_CRON_EXPRESSION")
                }
                SchedulerError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
                SchedulerError::InvalidStateTransition { .. } => {
                    (StatusCode::BAD_REQUEST, "INVALID_STATE_TRANSITION")
                }
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            },
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.status_and_type();
        if status.is_server_error() {
            tracing::error!("请求处理失败: {}", self);
        }

        let message = match &self {
            ApiError::Scheduler(err) => err.to_string(),
            other => other.to_string(),
        };
        let body = Json(json!({
            "success": false,
            "data": null,
            "message": message,
            "error": {
                "type": error_type,
                "code": status.as_u16(),
            },
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
