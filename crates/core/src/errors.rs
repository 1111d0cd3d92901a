use thiserror::Error;

/// 调度器错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("数据库操作错误: {0}")]
    Database(String),

    #[error("任务未找到: {id}")]
    JobNotFound { id: i64 },

    #[error("调度实例未找到: {id}")]
    ScheduleNotFound { id: String },

    #[error("执行记录未找到: {id}")]
    ExecutionNotFound { id: String },

    #[error("Worker未找到: {id}")]
    WorkerNotFound { id: String },

    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },

    #[error("参数校验失败: {0}")]
    Validation(String),

    #[error("无效的状态转换: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("任务执行超时")]
    ExecutionTimeout,

    #[error("网络错误: {0}")]
    Transport(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl SchedulerError {
    /// 是否属于调用方输入错误，调用方需要修正请求而不是重试
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            SchedulerError::Validation(_)
                | SchedulerError::InvalidCron { .. }
                | SchedulerError::InvalidStateTransition { .. }
        )
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Serialization(err.to_string())
    }
}
