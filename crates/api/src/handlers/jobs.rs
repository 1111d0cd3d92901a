use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use tracing::info;

use scheduler_core::models::{Job, JobTarget, DEFAULT_JOB_TIMEOUT_SECONDS};

use crate::{
    error::ApiResult,
    response::{created, done, success},
    routes::AppState,
};

/// 执行记录查询默认返回的条数
const DEFAULT_EXECUTION_LIMIT: usize = 20;
const MAX_EXECUTION_LIMIT: usize = 200;

/// 任务创建和更新请求
#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub name: String,
    pub cron_expression: String,
    pub target: JobTarget,
    #[serde(default)]
    pub fallback: Option<JobTarget>,
    #[serde(default)]
    pub params: HashMap<String, String>,
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub retry_interval_seconds: u64,
    pub enabled: Option<bool>,
}

impl From<CreateJobRequest> for Job {
    fn from(request: CreateJobRequest) -> Self {
        let mut job = Job::new(request.name, request.cron_expression, request.target)
            .with_retry(request.retry_count, request.retry_interval_seconds)
            .with_timeout(request.timeout_seconds.unwrap_or(DEFAULT_JOB_TIMEOUT_SECONDS));
        job.fallback = request.fallback;
        job.params = request.params;
        job.enabled = request.enabled.unwrap_or(true);
        job
    }
}

pub async fn create_job(
    State(state): State<AppState>,
    Json(request): Json<CreateJobRequest>,
) -> ApiResult<impl IntoResponse> {
    let job = state.controller.create_job(request.into()).await?;
    info!("通过API创建任务 {} ({})", job.id, job.name);
    Ok(created(job))
}

/// 整体替换任务定义，CRON表达式变化后按新表达式调度
pub async fn update_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<CreateJobRequest>,
) -> ApiResult<impl IntoResponse> {
    let job = state.controller.update_job(id, request.into()).await?;
    info!("通过API更新任务 {} ({})", job.id, job.name);
    Ok(success(job))
}

pub async fn list_jobs(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(success(state.controller.list_jobs().await?))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    Ok(success(state.controller.get_job(id).await?))
}

pub async fn delete_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    state.controller.delete_job(id).await?;
    Ok(done(format!("任务 {id} 已删除")))
}

pub async fn pause_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    state.controller.pause_task(id).await?;
    Ok(done(format!("任务 {id} 已暂停")))
}

pub async fn resume_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    state.controller.resume_task(id).await?;
    Ok(done(format!("任务 {id} 已恢复")))
}

/// 立即触发一次，返回创建的调度实例和分发结果
pub async fn trigger_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    Ok(success(state.controller.trigger_job(id).await?))
}

pub async fn job_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    Ok(success(state.controller.task_status(id).await?))
}

#[derive(Debug, Deserialize)]
pub struct ExecutionQuery {
    pub limit: Option<usize>,
}

/// 任务最近的执行记录
pub async fn list_executions(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<ExecutionQuery>,
) -> ApiResult<impl IntoResponse> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_EXECUTION_LIMIT)
        .clamp(1, MAX_EXECUTION_LIMIT);
    Ok(success(state.controller.list_executions(id, limit).await?))
}
