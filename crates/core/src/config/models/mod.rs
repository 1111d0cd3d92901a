pub mod api_observability;
pub mod app_config;
pub mod dispatcher_worker;
pub mod executor;

pub use api_observability::{ApiConfig, ObservabilityConfig};
pub use app_config::AppConfig;
pub use dispatcher_worker::{DispatcherConfig, RetryDelivery, WorkerConfig};
pub use executor::ExecutorConfig;
