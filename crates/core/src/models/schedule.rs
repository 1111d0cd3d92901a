use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{SchedulerError, SchedulerResult};

/// 一次调度触发实例
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Schedule {
    pub id: String,
    pub job_id: i64,
    pub scheduled_at: DateTime<Utc>,
    /// 最早可被再次投递的时间
    pub next_attempt_at: DateTime<Utc>,
    pub status: ScheduleStatus,
    pub worker_id: Option<String>,
    pub execution_id: Option<String>,
    /// 0 表示正常触发，n 表示第 n 次失败重试
    pub attempt: u32,
    pub executed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScheduleStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "ASSIGNED")]
    Assigned,
    #[serde(rename = "EXECUTING")]
    Executing,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "FAILED")]
    Failed,
}

impl ScheduleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleStatus::Pending => "PENDING",
            ScheduleStatus::Assigned => "ASSIGNED",
            ScheduleStatus::Executing => "EXECUTING",
            ScheduleStatus::Completed => "COMPLETED",
            ScheduleStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ScheduleStatus::Completed | ScheduleStatus::Failed)
    }
}

impl std::fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Schedule {
    pub fn new(job_id: i64, scheduled_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            job_id,
            scheduled_at,
            next_attempt_at: scheduled_at,
            status: ScheduleStatus::Pending,
            worker_id: None,
            execution_id: None,
            attempt: 0,
            executed_at: None,
            created_at: Utc::now(),
        }
    }

    /// 创建失败重试用的调度实例
    pub fn retry_of(job_id: i64, attempt: u32, run_at: DateTime<Utc>) -> Self {
        let mut schedule = Self::new(job_id, run_at);
        schedule.attempt = attempt;
        schedule
    }

    /// 状态只能向前推进，允许跳过中间状态
    pub fn advance(&mut self, to: ScheduleStatus) -> SchedulerResult<()> {
        if self.status.is_terminal() || to <= self.status {
            return Err(SchedulerError::InvalidStateTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        Ok(())
    }

    /// 分配给执行方
    pub fn assign(&mut self, worker_id: Option<String>, execution_id: String) -> SchedulerResult<()> {
        self.advance(ScheduleStatus::Assigned)?;
        self.worker_id = worker_id;
        self.execution_id = Some(execution_id);
        Ok(())
    }

    /// 暂时无法投递，保持PENDING并推迟到指定时间
    pub fn defer_until(&mut self, at: DateTime<Utc>) {
        self.next_attempt_at = at;
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == ScheduleStatus::Pending && self.next_attempt_at <= now
    }
}
