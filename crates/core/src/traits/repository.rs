//! 数据仓储层接口定义
//!
//! 此模块定义了调度核心依赖的持久化抽象：
//! - 任务仓储接口 (JobRepository)
//! - 调度实例仓储接口 (ScheduleRepository)
//! - 执行记录仓储接口 (ExecutionRepository)
//! - Worker仓储接口 (WorkerRepository)
//!
//! ## 设计原则
//!
//! 每个仓储接口只负责一种实体，所有操作都是异步的并返回 `SchedulerResult<T>`。
//! 调度核心只通过这些接口访问存储，具体实现（内存、数据库）由基础设施层提供。
//!
//! ## 使用示例
//!
//! ```rust,ignore
//! use scheduler_core::traits::ScheduleRepository;
//!
//! async fn due(repo: &dyn ScheduleRepository) -> SchedulerResult<()> {
//!     let schedules = repo.get_due_pending(Utc::now(), 100).await?;
//!     println!("待投递调度实例: {}", schedules.len());
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    Execution, ExecutionStatus, Job, Schedule, ScheduleStatus, WorkerInfo, WorkerStatus,
};
use crate::SchedulerResult;

/// 任务定义仓储
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// 创建任务，返回分配了ID的任务
    async fn create(&self, job: &Job) -> SchedulerResult<Job>;

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Job>>;

    async fn list(&self) -> SchedulerResult<Vec<Job>>;

    async fn update(&self, job: &Job) -> SchedulerResult<()>;

    async fn delete(&self, id: i64) -> SchedulerResult<()>;

    /// 更新启用标志，任务不存在时返回 `JobNotFound`
    async fn update_enabled(&self, id: i64, enabled: bool) -> SchedulerResult<()>;
}

/// 调度实例仓储
#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    async fn create(&self, schedule: &Schedule) -> SchedulerResult<Schedule>;

    async fn get_by_id(&self, id: &str) -> SchedulerResult<Option<Schedule>>;

    async fn update(&self, schedule: &Schedule) -> SchedulerResult<()>;

    /// 按分配时间顺序返回某个Worker指定状态的调度实例
    async fn get_by_worker_and_status(
        &self,
        worker_id: &str,
        status: ScheduleStatus,
        limit: usize,
    ) -> SchedulerResult<Vec<Schedule>>;

    /// 返回 `next_attempt_at <= now` 的PENDING调度实例
    async fn get_due_pending(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> SchedulerResult<Vec<Schedule>>;

    async fn get_by_execution_id(&self, execution_id: &str) -> SchedulerResult<Option<Schedule>>;

    /// 原子地领取一个到期的PENDING调度实例
    ///
    /// 领取成功时把 `next_attempt_at` 推到 `lease_until` 并返回领取后的实例，
    /// 期间其他扫描不会再看到它；实例不存在、不是PENDING或尚未到期时返回 `None`。
    /// 领取方在租约到期前没有推进状态的话，实例会重新变为可领取。
    async fn claim_pending(
        &self,
        id: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> SchedulerResult<Option<Schedule>>;

    /// 删除 `created_at < cutoff` 且已终结的调度实例，返回删除数量
    async fn delete_finished_before(&self, cutoff: DateTime<Utc>) -> SchedulerResult<u64>;
}

/// 执行记录仓储
#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    async fn create(&self, execution: &Execution) -> SchedulerResult<Execution>;

    async fn get_by_id(&self, id: &str) -> SchedulerResult<Option<Execution>>;

    async fn update(&self, execution: &Execution) -> SchedulerResult<()>;

    /// 统计某任务处于给定状态的执行记录数量，可排除指定记录
    async fn count_by_job_and_status(
        &self,
        job_id: i64,
        statuses: &[ExecutionStatus],
        exclude_id: Option<&str>,
    ) -> SchedulerResult<u32>;

    /// 某任务最近的执行记录，按创建时间倒序，最多 `limit` 条
    async fn list_by_job(&self, job_id: i64, limit: usize) -> SchedulerResult<Vec<Execution>>;

    /// 删除 `created_at < cutoff` 且已终结的执行记录，返回删除数量
    async fn delete_finished_before(&self, cutoff: DateTime<Utc>) -> SchedulerResult<u64>;
}

/// Worker仓储
#[async_trait]
pub trait WorkerRepository: Send + Sync {
    async fn create(&self, worker: &WorkerInfo) -> SchedulerResult<WorkerInfo>;

    async fn get_by_id(&self, id: &str) -> SchedulerResult<Option<WorkerInfo>>;

    async fn update_status(&self, id: &str, status: WorkerStatus) -> SchedulerResult<()>;

    async fn update_heartbeat(
        &self,
        id: &str,
        heartbeat_time: DateTime<Utc>,
        current_load: u32,
    ) -> SchedulerResult<()>;

    async fn list(&self) -> SchedulerResult<Vec<WorkerInfo>>;
}

/// 仓储集合，方便在组件之间传递
#[derive(Clone)]
pub struct Repositories {
    pub jobs: Arc<dyn JobRepository>,
    pub schedules: Arc<dyn ScheduleRepository>,
    pub executions: Arc<dyn ExecutionRepository>,
    pub workers: Arc<dyn WorkerRepository>,
}
