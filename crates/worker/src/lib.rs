//! Worker代理
//!
//! 向调度中心注册、定期心跳、拉取分配给自己的shell任务并在子进程中执行，
//! 结束后上报执行结果。

pub mod components;
pub mod executors;
pub mod service;

pub use components::HttpCoordinatorClient;
pub use executors::{ShellExecutor, ShellOutcome, TaskState};
pub use service::WorkerAgent;
