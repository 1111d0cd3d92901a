use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use scheduler_core::{
    models::{Execution, ExecutionStatus, Job, Schedule},
    traits::Repositories,
    DispatcherConfig, RetryDelivery, SchedulerResult,
};

use crate::queue::{try_enqueue, DispatchItem, DispatchSender};

/// 重试策略配置
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// 失败后到重试实例可被投递的间隔（秒）
    pub retry_delay_seconds: u64,
    pub delivery: RetryDelivery,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retry_delay_seconds: 30,
            delivery: RetryDelivery::AtLeastOnce,
        }
    }
}

impl From<&DispatcherConfig> for RetryConfig {
    fn from(config: &DispatcherConfig) -> Self {
        Self {
            retry_delay_seconds: config.retry_delay_seconds,
            delivery: config.retry_delivery,
        }
    }
}

/// 重试服务接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RetryService: Send + Sync {
    /// 处理失败的远程执行，需要重试时返回新建的调度实例
    async fn handle_failed_execution(
        &self,
        execution: &Execution,
    ) -> SchedulerResult<Option<Schedule>>;
}

/// 远程执行失败后的重试服务
///
/// 统计同一任务此前失败（FAILED/TIMEOUT）的执行次数，不含当前这次，
/// 小于任务的重试次数时创建一个延后的PENDING调度实例。
pub struct TaskRetryService {
    repos: Repositories,
    queue: DispatchSender,
    config: RetryConfig,
    timers: CancellationToken,
}

impl TaskRetryService {
    pub fn new(
        repos: Repositories,
        queue: DispatchSender,
        config: RetryConfig,
        timers: CancellationToken,
    ) -> Self {
        Self {
            repos,
            queue,
            config,
            timers,
        }
    }

    fn schedule_delivery(&self, schedule: Schedule, job: Job) {
        let queue = self.queue.clone();
        let timers = self.timers.clone();
        let delay = Duration::from_secs(self.config.retry_delay_seconds);
        tokio::spawn(async move {
            tokio::select! {
                _ = timers.cancelled() => {
                    debug!("停机，放弃重试实例 {} 的延时投递", schedule.id);
                }
                _ = tokio::time::sleep(delay) => {
                    if !try_enqueue(&queue, DispatchItem::stored(schedule, job), "retry") {
                        metrics::counter!("scheduler_retries_dropped_total").increment(1);
                    }
                }
            }
        });
    }
}

#[async_trait]
impl RetryService for TaskRetryService {
    async fn handle_failed_execution(
        &self,
        execution: &Execution,
    ) -> SchedulerResult<Option<Schedule>> {
        if !execution.status.counts_as_failure() {
            return Ok(None);
        }

        let job = match self.repos.jobs.get_by_id(execution.job_id).await? {
            Some(job) => job,
            None => {
                warn!("任务 {} 已不存在，执行 {} 不再重试", execution.job_id, execution.id);
                return Ok(None);
            }
        };

        let prior_failures = self
            .repos
            .executions
            .count_by_job_and_status(
                job.id,
                &[ExecutionStatus::Failed, ExecutionStatus::Timeout],
                Some(&execution.id),
            )
            .await?;

        if prior_failures >= job.retry_count {
            debug!(
                "任务 {} 已失败 {} 次，达到重试上限 {}，不再重试",
                job.id,
                prior_failures + 1,
                job.retry_count
            );
            return Ok(None);
        }

        let run_at = Utc::now() + chrono::Duration::seconds(self.config.retry_delay_seconds as i64);
        let schedule = Schedule::retry_of(job.id, prior_failures + 1, run_at);
        let created = self.repos.schedules.create(&schedule).await?;
        metrics::counter!("scheduler_retries_scheduled_total").increment(1);

        info!(
            "为任务 {} 创建重试实例 {}，第 {} 次重试，投递时间: {}",
            job.id,
            created.id,
            created.attempt,
            run_at.format("%Y-%m-%d %H:%M:%S UTC")
        );

        if self.config.delivery == RetryDelivery::BestEffort {
            self.schedule_delivery(created.clone(), job);
        }

        Ok(Some(created))
    }
}
