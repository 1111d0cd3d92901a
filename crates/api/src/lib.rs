//! # Scheduler API
//!
//! 调度中心的HTTP接口，基于Axum构建，分为两部分：
//! - Worker协议：注册、心跳、拉取任务、上报结果
//! - 任务管理：创建、删除、暂停、恢复、手动触发任务，查询调度状态和Worker列表
//!
//! ## API 端点
//!
//! ### Worker协议
//! - `POST /api/v1/workers/register` - 注册Worker，返回分配的ID
//! - `POST /api/v1/workers/{id}/heartbeat` - 心跳，未知Worker返回 `success: false` 的确认
//! - `POST /api/v1/workers/{id}/tasks` - 拉取已分配的任务，未知Worker返回404
//! - `POST /api/v1/tasks/{task_id}/result` - 上报执行结果
//!
//! ### 任务管理
//! - `GET /api/v1/jobs` / `POST /api/v1/jobs`
//! - `GET /api/v1/jobs/{id}` / `DELETE /api/v1/jobs/{id}`
//! - `POST /api/v1/jobs/{id}/pause|resume|trigger`
//! - `GET /api/v1/jobs/{id}/status`
//! - `GET /api/v1/workers`
//! - `GET /health`
//!
//! ## 响应格式
//!
//! ```json
//! {
//!   "success": true,
//!   "data": { "worker_id": "..." },
//!   "message": null,
//!   "timestamp": "2024-01-01T00:00:00Z"
//! }
//! ```
//!
//! 出错时 `success` 为 `false`，`message` 携带错误描述，`error.type` 为错误类型。
//! 参数和CRON表达式错误返回400，资源不存在返回404，其余返回500。

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;

use axum::Router;
use tower::ServiceBuilder;

use middleware::{cors_layer, request_logging, timeout_layer, trace_layer};
use scheduler_core::ApiConfig;

pub use routes::{create_routes, AppState};

/// 创建带中间件的完整API应用
pub fn create_app(state: AppState, api_config: &ApiConfig) -> Router {
    let router = create_routes(state).layer(
        ServiceBuilder::new()
            .layer(trace_layer())
            .layer(timeout_layer(api_config.request_timeout_seconds))
            .layer(axum::middleware::from_fn(request_logging)),
    );

    if api_config.cors_enabled {
        router.layer(cors_layer())
    } else {
        router
    }
}
