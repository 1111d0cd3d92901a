//! 调度中心与Worker之间的通信消息

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ExecutionStatus, WorkerStatus};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegisterWorkerRequest {
    pub name: String,
    pub address: String,
    pub capacity: u32,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegisterWorkerResponse {
    pub worker_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeartbeatRequest {
    pub current_load: u32,
    pub status: WorkerStatus,
}

/// 通用应答，`success=false` 表示调度中心不认识该Worker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ack {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

impl Ack {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    pub fn reject(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GetTaskRequest {
    pub available_capacity: u32,
}

/// 下发给Worker的任务
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssignedTask {
    /// 执行记录ID
    pub task_id: String,
    pub job_id: i64,
    pub schedule_id: String,
    pub command: String,
    #[serde(default)]
    pub params: HashMap<String, String>,
    pub timeout_seconds: u64,
    pub retry_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportTaskResultRequest {
    pub worker_id: String,
    /// 重新注册后补报结果时携带任务原本所属的Worker ID
    #[serde(default)]
    pub previous_worker_id: Option<String>,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ReportTaskResultRequest {
    pub fn elapsed_ms(&self) -> u64 {
        (self.finished_at - self.started_at).num_milliseconds().max(0) as u64
    }
}
