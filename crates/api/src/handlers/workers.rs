//! Worker协议接口
//!
//! Worker代理通过这些接口注册、发送心跳、拉取任务和上报结果。
//! 心跳和结果上报对未知Worker返回 `success: false` 的确认而不是错误码，
//! 代理据此重新注册。

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use scheduler_core::models::{
    GetTaskRequest, HeartbeatRequest, RegisterWorkerRequest, ReportTaskResultRequest,
};

use crate::{error::ApiResult, response::success, routes::AppState};

pub async fn register_worker(
    State(state): State<AppState>,
    Json(request): Json<RegisterWorkerRequest>,
) -> ApiResult<impl IntoResponse> {
    let response = state.coordinator.register_worker(request).await?;
    Ok(success(response))
}

pub async fn heartbeat(
    State(state): State<AppState>,
    Path(worker_id): Path<String>,
    Json(request): Json<HeartbeatRequest>,
) -> ApiResult<impl IntoResponse> {
    let ack = state.coordinator.heartbeat(&worker_id, request).await?;
    Ok(success(ack))
}

/// 未知Worker返回404
pub async fn get_task(
    State(state): State<AppState>,
    Path(worker_id): Path<String>,
    Json(request): Json<GetTaskRequest>,
) -> ApiResult<impl IntoResponse> {
    let tasks = state
        .coordinator
        .get_task(&worker_id, request.available_capacity)
        .await?;
    Ok(success(tasks))
}

pub async fn report_task_result(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    Json(request): Json<ReportTaskResultRequest>,
) -> ApiResult<impl IntoResponse> {
    let ack = state.coordinator.report_task_result(&task_id, request).await?;
    Ok(success(ack))
}

pub async fn list_workers(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(success(state.controller.list_workers().await))
}
