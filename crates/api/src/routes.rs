use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use scheduler_core::traits::CoordinatorApi;
use scheduler_dispatcher::TaskController;

use crate::handlers::{
    health::health_check,
    jobs::{
        create_job, delete_job, get_job, job_status, list_executions, list_jobs, pause_job,
        resume_job, trigger_job, update_job,
    },
    workers::{get_task, heartbeat, list_workers, register_worker, report_task_result},
};

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<dyn CoordinatorApi>,
    pub controller: Arc<TaskController>,
}

/// 创建API路由
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        // 健康检查
        .route("/health", get(health_check))
        // Worker协议
        .route("/api/v1/workers/register", post(register_worker))
        .route("/api/v1/workers/{id}/heartbeat", post(heartbeat))
        .route("/api/v1/workers/{id}/tasks", post(get_task))
        .route("/api/v1/tasks/{id}/result", post(report_task_result))
        // 任务管理
        .route("/api/v1/jobs", get(list_jobs).post(create_job))
        .route(
            "/api/v1/jobs/{id}",
            get(get_job).put(update_job).delete(delete_job),
        )
        .route("/api/v1/jobs/{id}/pause", post(pause_job))
        .route("/api/v1/jobs/{id}/resume", post(resume_job))
        .route("/api/v1/jobs/{id}/trigger", post(trigger_job))
        .route("/api/v1/jobs/{id}/status", get(job_status))
        .route("/api/v1/jobs/{id}/executions", get(list_executions))
        // Worker查询
        .route("/api/v1/workers", get(list_workers))
        .with_state(state)
}
