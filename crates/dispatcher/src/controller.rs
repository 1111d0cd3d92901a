use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::info;

use scheduler_core::{
    models::{Execution, Job, Schedule, WorkerInfo},
    traits::Repositories,
    SchedulerError, SchedulerResult,
};

use crate::cron_engine::{CronEngine, TaskStatus};
use crate::cron_utils::CronScheduler;
use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::registry::WorkerRegistry;

/// 手动触发的结果
#[derive(Debug, Clone, Serialize)]
pub struct TriggerResult {
    pub schedule: Schedule,
    pub outcome: DispatchOutcome,
}

/// 任务管理入口，供API层调用
pub struct TaskController {
    repos: Repositories,
    engine: Arc<CronEngine>,
    dispatcher: Arc<Dispatcher>,
    registry: Arc<WorkerRegistry>,
}

impl TaskController {
    pub fn new(
        repos: Repositories,
        engine: Arc<CronEngine>,
        dispatcher: Arc<Dispatcher>,
        registry: Arc<WorkerRegistry>,
    ) -> Self {
        Self {
            repos,
            engine,
            dispatcher,
            registry,
        }
    }

    /// 校验并保存任务，启用的任务立即加入调度引擎
    pub async fn create_job(&self, job: Job) -> SchedulerResult<Job> {
        job.validate()?;
        CronScheduler::validate_cron_expression(&job.cron_expression)?;

        let created = self.repos.jobs.create(&job).await?;
        if created.enabled {
            self.engine.add_task(created.clone()).await?;
        }
        info!("创建任务 {} ({})", created.id, created.name);
        Ok(created)
    }

    /// 用新定义替换任务；启用的任务按新CRON表达式重新注册，禁用的从调度引擎移除。
    /// 已创建的调度实例不受影响
    pub async fn update_job(&self, job_id: i64, mut job: Job) -> SchedulerResult<Job> {
        let current = self.get_job(job_id).await?;
        job.id = job_id;
        job.created_at = current.created_at;
        job.validate()?;
        CronScheduler::validate_cron_expression(&job.cron_expression)?;

        self.repos.jobs.update(&job).await?;
        let updated = self.get_job(job_id).await?;
        if updated.enabled {
            self.engine.add_task(updated.clone()).await?;
        } else {
            self.engine.remove_task(job_id).await;
        }
        info!("更新任务 {} ({})", updated.id, updated.name);
        Ok(updated)
    }

    pub async fn get_job(&self, job_id: i64) -> SchedulerResult<Job> {
        self.repos
            .jobs
            .get_by_id(job_id)
            .await?
            .ok_or(SchedulerError::JobNotFound { id: job_id })
    }

    pub async fn list_jobs(&self) -> SchedulerResult<Vec<Job>> {
        self.repos.jobs.list().await
    }

    /// 任务最近的执行记录，最新的在前
    pub async fn list_executions(
        &self,
        job_id: i64,
        limit: usize,
    ) -> SchedulerResult<Vec<Execution>> {
        self.get_job(job_id).await?;
        self.repos.executions.list_by_job(job_id, limit).await
    }

    pub async fn add_task(&self, job: Job) -> SchedulerResult<()> {
        self.engine.add_task(job).await
    }

    pub async fn remove_task(&self, job_id: i64) -> bool {
        self.engine.remove_task(job_id).await
    }

    /// 删除任务并从调度引擎移除，已创建的调度实例保留
    pub async fn delete_job(&self, job_id: i64) -> SchedulerResult<()> {
        self.get_job(job_id).await?;
        self.engine.remove_task(job_id).await;
        self.repos.jobs.delete(job_id).await?;
        info!("删除任务 {}", job_id);
        Ok(())
    }

    pub async fn pause_task(&self, job_id: i64) -> SchedulerResult<()> {
        self.get_job(job_id).await?;
        self.engine.pause_task(job_id).await
    }

    pub async fn resume_task(&self, job_id: i64) -> SchedulerResult<()> {
        self.engine.resume_task(job_id).await
    }

    pub async fn task_status(&self, job_id: i64) -> SchedulerResult<TaskStatus> {
        self.engine.task_status(job_id).await
    }

    /// 手动触发一次，不影响CRON计划
    pub async fn trigger_job(&self, job_id: i64) -> SchedulerResult<TriggerResult> {
        let job = self.get_job(job_id).await?;
        let schedule = Schedule::new(job.id, Utc::now());
        let schedule_id = schedule.id.clone();
        info!("手动触发任务 {} ({})", job.id, job.name);

        let outcome = self.dispatcher.dispatch_schedule(schedule, job).await?;
        let schedule = self
            .repos
            .schedules
            .get_by_id(&schedule_id)
            .await?
            .ok_or(SchedulerError::ScheduleNotFound { id: schedule_id })?;
        Ok(TriggerResult { schedule, outcome })
    }

    pub async fn list_workers(&self) -> Vec<WorkerInfo> {
        self.registry.list().await
    }
}
