use std::time::Duration;

use chrono::{DateTime, Utc};
use scheduler_core::{traits::Repositories, DispatcherConfig, SchedulerResult};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// 过期记录清理配置
#[derive(Debug, Clone)]
pub struct RecordCleanerConfig {
    /// 清理间隔（秒）
    pub interval_seconds: u64,
    /// 执行记录保留天数
    pub execution_retention_days: u32,
    /// 调度实例保留天数
    pub schedule_retention_days: u32,
}

impl Default for RecordCleanerConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 3600,
            execution_retention_days: 7,
            schedule_retention_days: 30,
        }
    }
}

impl From<&DispatcherConfig> for RecordCleanerConfig {
    fn from(config: &DispatcherConfig) -> Self {
        Self {
            interval_seconds: config.cleanup_interval_seconds,
            execution_retention_days: config.execution_retention_days,
            schedule_retention_days: config.schedule_retention_days,
        }
    }
}

/// 一次清理删除的记录数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub executions: u64,
    pub schedules: u64,
}

/// 过期记录清理器
///
/// 周期性删除超过保留期的执行记录和调度实例。只删除已终结的记录，
/// 仍在执行或等待投递的记录不受保留期影响。
pub struct RecordCleaner {
    repos: Repositories,
    config: RecordCleanerConfig,
}

impl RecordCleaner {
    pub fn new(repos: Repositories, config: RecordCleanerConfig) -> Self {
        Self { repos, config }
    }

    pub async fn cleanup(&self, now: DateTime<Utc>) -> SchedulerResult<CleanupReport> {
        debug!("开始清理过期记录");
        let execution_cutoff =
            now - chrono::Duration::days(self.config.execution_retention_days.into());
        let schedule_cutoff =
            now - chrono::Duration::days(self.config.schedule_retention_days.into());

        let executions = self
            .repos
            .executions
            .delete_finished_before(execution_cutoff)
            .await?;
        let schedules = self
            .repos
            .schedules
            .delete_finished_before(schedule_cutoff)
            .await?;

        let report = CleanupReport {
            executions,
            schedules,
        };
        if executions + schedules > 0 {
            metrics::counter!("scheduler_records_purged_total", "kind" => "execution")
                .increment(executions);
            metrics::counter!("scheduler_records_purged_total", "kind" => "schedule")
                .increment(schedules);
            info!(
                "清理过期记录: 执行记录 {} 条, 调度实例 {} 条",
                executions, schedules
            );
        }
        Ok(report)
    }

    pub async fn run(self, cancel: CancellationToken) {
        info!(
            "启动过期记录清理，间隔 {} 秒，执行记录保留 {} 天，调度实例保留 {} 天",
            self.config.interval_seconds,
            self.config.execution_retention_days,
            self.config.schedule_retention_days
        );
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.interval_seconds.max(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.cleanup(Utc::now()).await {
                        error!("清理过期记录失败: {}", e);
                    }
                }
            }
        }
        info!("过期记录清理已停止");
    }
}
