//! 调度中心
//!
//! CRON调度引擎产生调度实例，分发器把它们交给本地HTTP/RPC执行池
//! 或通过协调服务下发给远程Worker。

pub mod controller;
pub mod coordinator;
pub mod cron_engine;
pub mod cron_utils;
pub mod dispatcher;
pub mod executors;
pub mod pool;
pub mod queue;
pub mod record_cleaner;
pub mod registry;
pub mod result_processor;
pub mod retry_service;
pub mod service;
pub mod worker_failure_detector;

pub use controller::{TaskController, TriggerResult};
pub use coordinator::CoordinatorService;
pub use cron_engine::{CronEngine, TaskStatus};
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use registry::WorkerRegistry;
pub use service::DispatcherService;
