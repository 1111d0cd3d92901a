use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Job, Schedule};
use crate::{SchedulerError, SchedulerResult};

/// 执行记录，调度实例被分配时创建
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Execution {
    pub id: String,
    pub schedule_id: String,
    pub job_id: i64,
    pub worker_id: Option<String>,
    pub status: ExecutionStatus,
    pub output: Option<String>,
    pub error: Option<String>,
    pub exit_code: Option<i32>,
    pub status_code: Option<u16>,
    pub success: bool,
    pub retries_used: u32,
    pub fallback_used: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub elapsed_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ExecutionStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "TIMEOUT")]
    Timeout,
    #[serde(rename = "CANCELLED")]
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "PENDING",
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Success => "SUCCESS",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::Timeout => "TIMEOUT",
            ExecutionStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Pending | ExecutionStatus::Running)
    }

    /// 计入重试次数的失败状态
    pub fn counts_as_failure(&self) -> bool {
        matches!(self, ExecutionStatus::Failed | ExecutionStatus::Timeout)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 执行终态结果
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecutionOutcome {
    pub output: Option<String>,
    pub error: Option<String>,
    pub exit_code: Option<i32>,
    pub status_code: Option<u16>,
    pub retries_used: u32,
    pub fallback_used: bool,
    pub elapsed_ms: Option<u64>,
}

impl Execution {
    pub fn new(schedule_id: impl Into<String>, job_id: i64, worker_id: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            schedule_id: schedule_id.into(),
            job_id,
            worker_id,
            status: ExecutionStatus::Pending,
            output: None,
            error: None,
            exit_code: None,
            status_code: None,
            success: false,
            retries_used: 0,
            fallback_used: false,
            started_at: None,
            finished_at: None,
            elapsed_ms: None,
            created_at: Utc::now(),
        }
    }

    pub fn mark_running(&mut self) -> SchedulerResult<()> {
        if self.status.is_terminal() {
            return Err(SchedulerError::InvalidStateTransition {
                from: self.status.to_string(),
                to: ExecutionStatus::Running.to_string(),
            });
        }
        self.status = ExecutionStatus::Running;
        self.started_at.get_or_insert_with(Utc::now);
        Ok(())
    }

    /// 写入终态结果，只允许一次
    pub fn finish(&mut self, status: ExecutionStatus, outcome: ExecutionOutcome) -> SchedulerResult<()> {
        if self.status.is_terminal() || !status.is_terminal() {
            return Err(SchedulerError::InvalidStateTransition {
                from: self.status.to_string(),
                to: status.to_string(),
            });
        }
        let now = Utc::now();
        self.status = status;
        self.success = status == ExecutionStatus::Success;
        self.output = outcome.output;
        self.error = outcome.error;
        self.exit_code = outcome.exit_code;
        self.status_code = outcome.status_code;
        self.retries_used = outcome.retries_used;
        self.fallback_used = outcome.fallback_used;
        self.elapsed_ms = outcome.elapsed_ms.or_else(|| {
            self.started_at
                .map(|started| (now - started).num_milliseconds().max(0) as u64)
        });
        self.started_at.get_or_insert(now);
        self.finished_at = Some(now);
        Ok(())
    }
}

/// 输出截断标记
pub const TRUNCATED_MARKER: &str = "...[truncated]";

/// 把输出截断到 `max_bytes` 字节以内（按字符边界），超出时追加截断标记
pub fn truncate_output(mut output: String, max_bytes: usize) -> String {
    if output.len() <= max_bytes {
        return output;
    }
    let mut cut = max_bytes;
    while !output.is_char_boundary(cut) {
        cut -= 1;
    }
    output.truncate(cut);
    output.push_str(TRUNCATED_MARKER);
    output
}

/// 本地回调执行的结果
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobResult {
    pub success: bool,
    /// 执行因停机被取消
    #[serde(default)]
    pub cancelled: bool,
    pub status_code: Option<u16>,
    pub response: Option<String>,
    pub error: Option<String>,
    pub elapsed_ms: u64,
    pub retries_used: u32,
    pub fallback_used: bool,
}

impl JobResult {
    pub fn execution_status(&self) -> ExecutionStatus {
        if self.success {
            ExecutionStatus::Success
        } else if self.cancelled {
            ExecutionStatus::Cancelled
        } else {
            ExecutionStatus::Failed
        }
    }

    pub fn into_outcome(self) -> ExecutionOutcome {
        ExecutionOutcome {
            output: self.response,
            error: self.error,
            exit_code: None,
            status_code: self.status_code,
            retries_used: self.retries_used,
            fallback_used: self.fallback_used,
            elapsed_ms: Some(self.elapsed_ms),
        }
    }
}

/// 执行池交给结果处理器的数据，不直接持久化
#[derive(Debug, Clone)]
pub struct WorkResult {
    pub schedule: Schedule,
    pub job: Job,
    pub result: JobResult,
}
