use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{SchedulerError, SchedulerResult};

/// 默认任务超时时间（秒）
pub const DEFAULT_JOB_TIMEOUT_SECONDS: u64 = 60;

/// 任务超时时间上限（7天）
pub const MAX_JOB_TIMEOUT_SECONDS: u64 = 7 * 24 * 3600;

/// 重试间隔上限（1天）
pub const MAX_RETRY_INTERVAL_SECONDS: u64 = 24 * 3600;

/// 任务定义
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: i64,
    pub name: String,
    pub cron_expression: String,
    pub target: JobTarget,
    #[serde(default)]
    pub fallback: Option<JobTarget>,
    /// 远程shell任务会以环境变量的形式拿到这些参数
    #[serde(default)]
    pub params: HashMap<String, String>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub retry_interval_seconds: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_timeout_seconds() -> u64 {
    DEFAULT_JOB_TIMEOUT_SECONDS
}

fn default_enabled() -> bool {
    true
}

/// 任务执行目标
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobTarget {
    Http(HttpTarget),
    Rpc(RpcTarget),
    Shell(ShellTarget),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpTarget {
    pub url: String,
    #[serde(default = "default_http_method")]
    pub method: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

fn default_http_method() -> String {
    "GET".to_string()
}

/// JSON-RPC 回调目标，`service` 为服务端点地址
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcTarget {
    pub service: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShellTarget {
    pub command: String,
}

/// 本地回调协议
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CallbackProtocol {
    Http,
    Rpc,
}

impl std::fmt::Display for CallbackProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallbackProtocol::Http => write!(f, "http"),
            CallbackProtocol::Rpc => write!(f, "rpc"),
        }
    }
}

/// 调度去向：本地执行池或远程Worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchTarget {
    LocalPool(CallbackProtocol),
    RemoteAgent,
}

impl JobTarget {
    pub fn protocol(&self) -> Option<CallbackProtocol> {
        match self {
            JobTarget::Http(_) => Some(CallbackProtocol::Http),
            JobTarget::Rpc(_) => Some(CallbackProtocol::Rpc),
            JobTarget::Shell(_) => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            JobTarget::Http(_) => "http",
            JobTarget::Rpc(_) => "rpc",
            JobTarget::Shell(_) => "shell",
        }
    }

    fn validate(&self) -> SchedulerResult<()> {
        match self {
            JobTarget::Http(http) => {
                if http.url.trim().is_empty() {
                    return Err(SchedulerError::Validation("HTTP目标URL不能为空".to_string()));
                }
                if http.method.trim().is_empty() {
                    return Err(SchedulerError::Validation("HTTP方法不能为空".to_string()));
                }
            }
            JobTarget::Rpc(rpc) => {
                if rpc.service.trim().is_empty() || rpc.method.trim().is_empty() {
                    return Err(SchedulerError::Validation(
                        "RPC目标的服务地址和方法不能为空".to_string(),
                    ));
                }
            }
            JobTarget::Shell(shell) => {
                if shell.command.trim().is_empty() {
                    return Err(SchedulerError::Validation("命令不能为空".to_string()));
                }
            }
        }
        Ok(())
    }
}

impl Job {
    pub fn new(name: impl Into<String>, cron_expression: impl Into<String>, target: JobTarget) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            name: name.into(),
            cron_expression: cron_expression.into(),
            target,
            fallback: None,
            params: HashMap::new(),
            timeout_seconds: DEFAULT_JOB_TIMEOUT_SECONDS,
            retry_count: 0,
            retry_interval_seconds: 0,
            enabled: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_retry(mut self, retry_count: u32, retry_interval_seconds: u64) -> Self {
        self.retry_count = retry_count;
        self.retry_interval_seconds = retry_interval_seconds;
        self
    }

    pub fn with_fallback(mut self, fallback: JobTarget) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_timeout(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// HTTP/RPC 任务走本地执行池，shell 任务交给远程Worker
    pub fn dispatch_target(&self) -> DispatchTarget {
        match self.target.protocol() {
            Some(protocol) => DispatchTarget::LocalPool(protocol),
            None => DispatchTarget::RemoteAgent,
        }
    }

    /// 远程执行时使用的命令
    pub fn command(&self) -> Option<&str> {
        match &self.target {
            JobTarget::Shell(shell) => Some(shell.command.as_str()),
            _ => None,
        }
    }

    /// 校验任务定义（CRON表达式由调度引擎单独解析）
    pub fn validate(&self) -> SchedulerResult<()> {
        if self.name.trim().is_empty() {
            return Err(SchedulerError::Validation("任务名称不能为空".to_string()));
        }
        if self.cron_expression.trim().is_empty() {
            return Err(SchedulerError::Validation("CRON表达式不能为空".to_string()));
        }
        if self.timeout_seconds == 0 {
            return Err(SchedulerError::Validation("超时时间必须大于0".to_string()));
        }
        if self.timeout_seconds > MAX_JOB_TIMEOUT_SECONDS {
            return Err(SchedulerError::Validation(format!(
                "超时时间不能超过 {} 秒",
                MAX_JOB_TIMEOUT_SECONDS
            )));
        }
        if self.retry_interval_seconds > MAX_RETRY_INTERVAL_SECONDS {
            return Err(SchedulerError::Validation(format!(
                "重试间隔不能超过 {} 秒",
                MAX_RETRY_INTERVAL_SECONDS
            )));
        }
        self.target.validate()?;

        if let Some(fallback) = &self.fallback {
            if self.target.protocol().is_none() {
                return Err(SchedulerError::Validation(
                    "shell任务不支持备用目标".to_string(),
                ));
            }
            if fallback.protocol() != self.target.protocol() {
                return Err(SchedulerError::Validation(format!(
                    "备用目标类型 {} 与主目标类型 {} 不一致",
                    fallback.kind(),
                    self.target.kind()
                )));
            }
            fallback.validate()?;
        }
        Ok(())
    }
}
