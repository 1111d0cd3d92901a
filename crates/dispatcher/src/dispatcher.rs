//! 任务分发器
//!
//! 分发器消费调度队列，按任务类型把调度实例交给本地执行池（HTTP/RPC）
//! 或远程Worker（shell）。没有可用容量时调度实例保持PENDING，
//! 推迟 `requeue_delay_seconds` 后再次投递：
//! - `at_least_once`：推迟时间落库，由到期扫描重新投递；
//! - `best_effort`：启动延时器写回调度队列，队列满时丢弃。
//!
//! 分发前先通过 `ScheduleRepository::claim_pending` 领取调度实例，
//! 领取带有 `claim_lease_seconds` 的租约，到期扫描与手动触发不会重复投递同一实例。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use scheduler_core::{
    models::{
        CallbackProtocol, DispatchTarget, Execution, Job, Schedule, ScheduleStatus,
    },
    traits::Repositories,
    DispatcherConfig, RetryDelivery, SchedulerResult,
};

use crate::pool::{LocalPools, PoolTask};
use crate::queue::{try_enqueue, DispatchItem, DispatchReceiver, DispatchSender};
use crate::registry::WorkerRegistry;

/// 单次分发的结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOutcome {
    Local(CallbackProtocol),
    Remote { worker_id: String },
    Deferred { until: DateTime<Utc> },
    /// 调度实例已被处理或任务已不存在
    Skipped,
}

pub struct Dispatcher {
    repos: Repositories,
    registry: Arc<WorkerRegistry>,
    pools: Arc<LocalPools>,
    queue: DispatchSender,
    config: DispatcherConfig,
    timers: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        repos: Repositories,
        registry: Arc<WorkerRegistry>,
        pools: Arc<LocalPools>,
        queue: DispatchSender,
        config: DispatcherConfig,
        timers: CancellationToken,
    ) -> Self {
        Self {
            repos,
            registry,
            pools,
            queue,
            config,
            timers,
        }
    }

    /// 直接分发一个新的调度实例（手动触发）
    pub async fn dispatch_schedule(
        &self,
        schedule: Schedule,
        job: Job,
    ) -> SchedulerResult<DispatchOutcome> {
        self.dispatch(DispatchItem::fresh(schedule, job)).await
    }

    pub async fn dispatch(&self, item: DispatchItem) -> SchedulerResult<DispatchOutcome> {
        let DispatchItem {
            mut schedule,
            job,
            persisted,
        } = item;
        let lease = chrono::Duration::seconds(self.config.claim_lease_seconds as i64);

        let schedule = if persisted {
            // 调用方已判定该实例到期，领取只需排除已被他人领取或推进的情况
            let now = Utc::now().max(schedule.next_attempt_at);
            match self
                .repos
                .schedules
                .claim_pending(&schedule.id, now, now + lease)
                .await?
            {
                Some(claimed) => claimed,
                None => {
                    debug!("调度实例 {} 已被领取或不是PENDING状态，跳过", schedule.id);
                    return Ok(DispatchOutcome::Skipped);
                }
            }
        } else {
            // 新实例落库时即处于领取状态
            schedule.defer_until(Utc::now() + lease);
            self.repos.schedules.create(&schedule).await?
        };

        let outcome = match job.dispatch_target() {
            DispatchTarget::LocalPool(protocol) => {
                self.dispatch_local(protocol, schedule, job).await?
            }
            DispatchTarget::RemoteAgent => self.dispatch_remote(schedule, job).await?,
        };

        match &outcome {
            DispatchOutcome::Local(protocol) => {
                metrics::counter!("scheduler_dispatch_total", "target" => protocol.to_string())
                    .increment(1);
            }
            DispatchOutcome::Remote { .. } => {
                metrics::counter!("scheduler_dispatch_total", "target" => "remote").increment(1);
            }
            DispatchOutcome::Deferred { .. } => {
                metrics::counter!("scheduler_dispatch_deferred_total").increment(1);
            }
            DispatchOutcome::Skipped => {}
        }
        Ok(outcome)
    }

    async fn dispatch_local(
        &self,
        protocol: CallbackProtocol,
        mut schedule: Schedule,
        job: Job,
    ) -> SchedulerResult<DispatchOutcome> {
        let Some(permit) = self.pools.pool(protocol).try_reserve() else {
            debug!("{} 执行池已满，推迟调度实例 {}", protocol, schedule.id);
            return self.defer(schedule, job).await;
        };

        let mut execution = Execution::new(&schedule.id, job.id, None);
        execution.mark_running()?;
        self.repos.executions.create(&execution).await?;
        schedule.assign(None, execution.id.clone())?;
        self.repos.schedules.update(&schedule).await?;

        debug!("调度实例 {} 交给 {} 执行池", schedule.id, protocol);
        permit.send(PoolTask { schedule, job });
        Ok(DispatchOutcome::Local(protocol))
    }

    async fn dispatch_remote(
        &self,
        schedule: Schedule,
        job: Job,
    ) -> SchedulerResult<DispatchOutcome> {
        let Some(worker) = self.registry.select_and_reserve().await else {
            info!("没有可用的Worker，推迟任务 {} 的调度实例 {}", job.id, schedule.id);
            return self.defer(schedule, job).await;
        };

        match self.assign_remote(schedule, &job, &worker.id).await {
            Ok(()) => Ok(DispatchOutcome::Remote {
                worker_id: worker.id,
            }),
            Err(e) => {
                self.registry.cancel_reservation(&worker.id).await;
                Err(e)
            }
        }
    }

    async fn assign_remote(
        &self,
        mut schedule: Schedule,
        job: &Job,
        worker_id: &str,
    ) -> SchedulerResult<()> {
        let execution = Execution::new(&schedule.id, job.id, Some(worker_id.to_string()));
        self.repos.executions.create(&execution).await?;
        schedule.assign(Some(worker_id.to_string()), execution.id.clone())?;
        self.repos.schedules.update(&schedule).await?;
        info!(
            "任务 {} 的调度实例 {} 分配给Worker {}",
            job.id, schedule.id, worker_id
        );
        Ok(())
    }

    async fn defer(&self, mut schedule: Schedule, job: Job) -> SchedulerResult<DispatchOutcome> {
        let until = Utc::now() + chrono::Duration::seconds(self.config.requeue_delay_seconds as i64);
        schedule.defer_until(until);
        self.repos.schedules.update(&schedule).await?;

        if self.config.retry_delivery == RetryDelivery::BestEffort {
            let queue = self.queue.clone();
            let timers = self.timers.clone();
            let delay = Duration::from_secs(self.config.requeue_delay_seconds);
            tokio::spawn(async move {
                tokio::select! {
                    _ = timers.cancelled() => {}
                    _ = tokio::time::sleep(delay) => {
                        try_enqueue(&queue, DispatchItem::stored(schedule, job), "requeue");
                    }
                }
            });
        }
        Ok(DispatchOutcome::Deferred { until })
    }

    /// 投递所有到期的PENDING调度实例，返回成功分配的数量
    pub async fn dispatch_due(&self, now: DateTime<Utc>) -> SchedulerResult<usize> {
        let due = self
            .repos
            .schedules
            .get_due_pending(now, self.config.due_scan_batch_size)
            .await?;
        if due.is_empty() {
            return Ok(0);
        }
        debug!("到期扫描发现 {} 个待投递调度实例", due.len());

        let mut dispatched = 0;
        for mut schedule in due {
            let job = match self.repos.jobs.get_by_id(schedule.job_id).await? {
                Some(job) => job,
                None => {
                    warn!("任务 {} 已删除，调度实例 {} 标记为失败", schedule.job_id, schedule.id);
                    schedule.advance(ScheduleStatus::Failed)?;
                    self.repos.schedules.update(&schedule).await?;
                    continue;
                }
            };
            match self.dispatch(DispatchItem::stored(schedule, job)).await? {
                DispatchOutcome::Local(_) | DispatchOutcome::Remote { .. } => dispatched += 1,
                DispatchOutcome::Deferred { .. } | DispatchOutcome::Skipped => {}
            }
        }
        Ok(dispatched)
    }

    async fn handle(&self, item: DispatchItem) {
        let job_id = item.job.id;
        let schedule_id = item.schedule.id.clone();
        if let Err(e) = self.dispatch(item).await {
            error!("分发任务 {} 的调度实例 {} 失败: {}", job_id, schedule_id, e);
        }
    }

    /// 分发循环：消费调度队列，并按间隔扫描到期的调度实例
    pub async fn run(self: Arc<Self>, mut queue: DispatchReceiver, cancel: CancellationToken) {
        let scan_enabled = self.config.retry_delivery == RetryDelivery::AtLeastOnce;
        let mut scan = tokio::time::interval(Duration::from_secs(
            self.config.due_scan_interval_seconds,
        ));
        scan.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("任务分发器启动 (到期扫描: {})", scan_enabled);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                item = queue.recv() => match item {
                    Some(item) => self.handle(item).await,
                    None => break,
                },
                _ = scan.tick(), if scan_enabled => {
                    if let Err(e) = self.dispatch_due(Utc::now()).await {
                        error!("到期扫描失败: {}", e);
                    }
                }
            }
        }
        info!("任务分发器已停止");
    }
}
