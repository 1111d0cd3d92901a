pub mod config;
pub mod errors;
pub mod logging;
pub mod models;
pub mod traits;

pub use config::{
    ApiConfig, AppConfig, DispatcherConfig, ExecutorConfig, ObservabilityConfig, RetryDelivery,
    WorkerConfig,
};
pub use errors::*;
pub use logging::init_logging;
pub use models::*;
pub use traits::*;

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
