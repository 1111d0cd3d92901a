//! CRON调度引擎
//!
//! 引擎维护一组已注册的任务条目，由单个计时循环驱动：
//! 循环休眠到最早的触发时间（最长1秒，注册变更会提前唤醒），
//! 然后把到期任务以非阻塞方式写入有界调度队列。队列已满时本次触发被丢弃，
//! 不会阻塞计时循环，也不会向调用方返回错误。
//!
//! 同一条目的投递都在计时循环中顺序完成，因此不会重叠；
//! 错过的多个触发点只补一次。

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Notify, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use scheduler_core::{
    models::{Job, Schedule},
    traits::JobRepository,
    SchedulerError, SchedulerResult,
};

use crate::cron_utils::CronScheduler;
use crate::queue::{try_enqueue, DispatchItem, DispatchSender};

/// 计时循环的最长休眠时间
const MAX_IDLE: std::time::Duration = std::time::Duration::from_secs(1);

struct CronEntry {
    job: Job,
    cron: CronScheduler,
    next_fire: DateTime<Utc>,
}

/// 任务调度状态
#[derive(Debug, Clone, Serialize)]
pub struct TaskStatus {
    pub job: Job,
    pub scheduled: bool,
    pub next_fire_at: Option<DateTime<Utc>>,
}

pub struct CronEngine {
    entries: RwLock<HashMap<i64, CronEntry>>,
    job_repo: Arc<dyn JobRepository>,
    queue: DispatchSender,
    wakeup: Notify,
}

impl CronEngine {
    pub fn new(job_repo: Arc<dyn JobRepository>, queue: DispatchSender) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            job_repo,
            queue,
            wakeup: Notify::new(),
        }
    }

    /// 注册任务，已存在的同ID条目会被替换
    pub async fn add_task(&self, job: Job) -> SchedulerResult<()> {
        job.validate()?;
        let cron = CronScheduler::new(&job.cron_expression)?;
        let next_fire = cron
            .next_execution_time(Utc::now())
            .ok_or_else(|| SchedulerError::InvalidCron {
                expr: job.cron_expression.clone(),
                message: "没有后续触发时间".to_string(),
            })?;

        let job_id = job.id;
        let name = job.name.clone();
        let replaced = self
            .entries
            .write()
            .await
            .insert(
                job_id,
                CronEntry {
                    job,
                    cron,
                    next_fire,
                },
            )
            .is_some();
        self.wakeup.notify_one();

        if replaced {
            info!("任务 {} ({}) 已重新注册，下次触发: {}", name, job_id, next_fire);
        } else {
            info!("任务 {} ({}) 已注册，下次触发: {}", name, job_id, next_fire);
        }
        Ok(())
    }

    /// 注销任务，条目不存在时什么也不做
    pub async fn remove_task(&self, job_id: i64) -> bool {
        let removed = self.entries.write().await.remove(&job_id).is_some();
        if removed {
            self.wakeup.notify_one();
            info!("任务 {} 已从调度引擎移除", job_id);
        }
        removed
    }

    pub async fn pause_task(&self, job_id: i64) -> SchedulerResult<()> {
        self.job_repo.update_enabled(job_id, false).await?;
        self.remove_task(job_id).await;
        info!("任务 {} 已暂停", job_id);
        Ok(())
    }

    pub async fn resume_task(&self, job_id: i64) -> SchedulerResult<()> {
        let mut job = self
            .job_repo
            .get_by_id(job_id)
            .await?
            .ok_or(SchedulerError::JobNotFound { id: job_id })?;
        job.enabled = true;
        self.add_task(job).await?;
        self.job_repo.update_enabled(job_id, true).await?;
        info!("任务 {} 已恢复", job_id);
        Ok(())
    }

    /// 启动时加载存储中所有启用的任务，单个任务失败只记录日志
    pub async fn load_all_jobs(&self) -> SchedulerResult<usize> {
        let jobs = self.job_repo.list().await?;
        let mut loaded = 0;
        for job in jobs.into_iter().filter(|job| job.enabled) {
            let job_id = job.id;
            match self.add_task(job).await {
                Ok(()) => loaded += 1,
                Err(e) => warn!("加载任务 {} 失败: {}", job_id, e),
            }
        }
        info!("调度引擎加载了 {} 个任务", loaded);
        Ok(loaded)
    }

    pub async fn task_status(&self, job_id: i64) -> SchedulerResult<TaskStatus> {
        let job = self
            .job_repo
            .get_by_id(job_id)
            .await?
            .ok_or(SchedulerError::JobNotFound { id: job_id })?;
        let next_fire_at = self.next_fire_time(job_id).await;
        Ok(TaskStatus {
            job,
            scheduled: next_fire_at.is_some(),
            next_fire_at,
        })
    }

    pub async fn next_fire_time(&self, job_id: i64) -> Option<DateTime<Utc>> {
        self.entries
            .read()
            .await
            .get(&job_id)
            .map(|entry| entry.next_fire)
    }

    /// 当前已注册的任务ID（升序）
    pub async fn active_entries(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.entries.read().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// 触发所有在 `now` 之前到期的条目，返回成功写入队列的数量
    pub async fn fire_due(&self, now: DateTime<Utc>) -> usize {
        let due = {
            let mut entries = self.entries.write().await;
            let mut due = Vec::new();
            let mut exhausted = Vec::new();
            for (job_id, entry) in entries.iter_mut() {
                if entry.next_fire > now {
                    continue;
                }
                due.push(DispatchItem::fresh(
                    Schedule::new(entry.job.id, entry.next_fire),
                    entry.job.clone(),
                ));
                match entry.cron.next_execution_time(now) {
                    Some(next) => entry.next_fire = next,
                    None => exhausted.push(*job_id),
                }
            }
            for job_id in exhausted {
                info!("任务 {} 没有后续触发时间，已移除", job_id);
                entries.remove(&job_id);
            }
            due
        };

        let mut sent = 0;
        for item in due {
            metrics::counter!("scheduler_cron_fires_total").increment(1);
            debug!("任务 {} 到达触发时间 {}", item.job.id, item.schedule.scheduled_at);
            if try_enqueue(&self.queue, item, "cron") {
                sent += 1;
            } else {
                metrics::counter!("scheduler_cron_fires_dropped_total").increment(1);
            }
        }
        sent
    }

    async fn next_wakeup(&self, now: DateTime<Utc>) -> std::time::Duration {
        self.entries
            .read()
            .await
            .values()
            .map(|entry| entry.next_fire)
            .min()
            .and_then(|next| (next - now).to_std().ok())
            .map(|until| until.min(MAX_IDLE))
            .unwrap_or(MAX_IDLE)
    }

    /// 计时循环，取消令牌触发后退出
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!("CRON调度引擎启动");
        loop {
            let now = Utc::now();
            self.fire_due(now).await;
            let sleep_for = self.next_wakeup(now).await;

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.wakeup.notified() => {}
                _ = tokio::time::sleep(sleep_for) => {}
            }
        }
        info!("CRON调度引擎已停止");
    }
}
