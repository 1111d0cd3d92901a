//! 调度中心组装
//!
//! 把调度引擎、分发器、本地执行池、结果处理器、Worker协调服务、失效检测器
//! 和过期记录清理器组装在一起，并按顺序启动和停止。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use scheduler_core::{traits::Repositories, DispatcherConfig, ExecutorConfig, SchedulerResult};

use crate::controller::TaskController;
use crate::coordinator::CoordinatorService;
use crate::cron_engine::CronEngine;
use crate::dispatcher::Dispatcher;
use crate::pool::LocalPools;
use crate::queue::{dispatch_queue, DispatchReceiver};
use crate::record_cleaner::{RecordCleaner, RecordCleanerConfig};
use crate::registry::WorkerRegistry;
use crate::result_processor::ResultProcessor;
use crate::retry_service::{RetryConfig, TaskRetryService};
use crate::worker_failure_detector::{WorkerFailureDetector, WorkerFailureDetectorConfig};

#[derive(Default)]
struct Handles {
    engine: Option<JoinHandle<()>>,
    dispatcher: Option<JoinHandle<()>>,
    results: Option<JoinHandle<()>>,
    detector: Option<JoinHandle<()>>,
    cleaner: Option<JoinHandle<()>>,
}

pub struct DispatcherService {
    config: DispatcherConfig,
    executor_config: ExecutorConfig,
    repos: Repositories,
    registry: Arc<WorkerRegistry>,
    engine: Arc<CronEngine>,
    dispatcher: Arc<Dispatcher>,
    pools: Arc<LocalPools>,
    controller: Arc<TaskController>,
    coordinator: Arc<CoordinatorService>,
    receiver: Mutex<Option<DispatchReceiver>>,
    engine_cancel: CancellationToken,
    dispatcher_cancel: CancellationToken,
    /// 推迟投递和重试的延时器
    timers: CancellationToken,
    handles: Mutex<Handles>,
}

impl DispatcherService {
    /// 使用真实的HTTP/JSON-RPC执行器
    pub fn new(
        config: DispatcherConfig,
        executor_config: ExecutorConfig,
        repos: Repositories,
    ) -> Self {
        let pools = LocalPools::with_default_executors(&executor_config);
        Self::with_pools(config, executor_config, repos, pools)
    }

    pub fn with_pools(
        config: DispatcherConfig,
        executor_config: ExecutorConfig,
        repos: Repositories,
        pools: LocalPools,
    ) -> Self {
        let (sender, receiver) = dispatch_queue(config.queue_capacity);
        let timers = CancellationToken::new();
        let registry = Arc::new(WorkerRegistry::new());
        let pools = Arc::new(pools);

        let engine = Arc::new(CronEngine::new(repos.jobs.clone(), sender.clone()));
        let dispatcher = Arc::new(Dispatcher::new(
            repos.clone(),
            registry.clone(),
            pools.clone(),
            sender.clone(),
            config.clone(),
            timers.clone(),
        ));
        let retry_service = Arc::new(TaskRetryService::new(
            repos.clone(),
            sender,
            RetryConfig::from(&config),
            timers.clone(),
        ));
        let coordinator = Arc::new(CoordinatorService::new(
            repos.clone(),
            registry.clone(),
            retry_service,
        ));
        let controller = Arc::new(TaskController::new(
            repos.clone(),
            engine.clone(),
            dispatcher.clone(),
            registry.clone(),
        ));

        Self {
            config,
            executor_config,
            repos,
            registry,
            engine,
            dispatcher,
            pools,
            controller,
            coordinator,
            receiver: Mutex::new(Some(receiver)),
            engine_cancel: CancellationToken::new(),
            dispatcher_cancel: CancellationToken::new(),
            timers,
            handles: Mutex::new(Handles::default()),
        }
    }

    pub fn controller(&self) -> Arc<TaskController> {
        self.controller.clone()
    }

    pub fn coordinator(&self) -> Arc<CoordinatorService> {
        self.coordinator.clone()
    }

    pub fn registry(&self) -> Arc<WorkerRegistry> {
        self.registry.clone()
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        self.dispatcher.clone()
    }

    pub fn engine(&self) -> Arc<CronEngine> {
        self.engine.clone()
    }

    /// 加载已有任务并启动所有后台循环
    pub async fn start(&self) -> SchedulerResult<()> {
        let Some(receiver) = self.receiver.lock().await.take() else {
            warn!("调度中心已经启动");
            return Ok(());
        };

        let loaded = self.engine.load_all_jobs().await?;

        let capacity = self.executor_config.result_queue_capacity.max(1);
        let (http_tx, http_rx) = mpsc::channel(capacity);
        let (rpc_tx, rpc_rx) = mpsc::channel(capacity);
        self.pools.http.start(http_tx).await;
        self.pools.rpc.start(rpc_tx).await;

        let processor = ResultProcessor::new(self.repos.clone());
        let detector = WorkerFailureDetector::new(
            self.registry.clone(),
            self.repos.workers.clone(),
            WorkerFailureDetectorConfig::from(&self.config),
        );
        let cleaner = RecordCleaner::new(
            self.repos.clone(),
            RecordCleanerConfig::from(&self.config),
        );

        let mut handles = self.handles.lock().await;
        handles.results = Some(tokio::spawn(processor.run(http_rx, rpc_rx)));
        handles.dispatcher = Some(tokio::spawn(
            self.dispatcher
                .clone()
                .run(receiver, self.dispatcher_cancel.clone()),
        ));
        handles.detector = Some(tokio::spawn(
            detector.run(self.dispatcher_cancel.clone()),
        ));
        handles.cleaner = Some(tokio::spawn(
            cleaner.run(self.dispatcher_cancel.clone()),
        ));
        handles.engine = Some(tokio::spawn(
            self.engine.clone().run(self.engine_cancel.clone()),
        ));

        info!("调度中心已启动，加载任务 {} 个", loaded);
        Ok(())
    }

    /// 按顺序停止：调度引擎、分发器、执行池（超时后强制取消）、结果处理器
    pub async fn shutdown(&self) {
        let timeout = Duration::from_secs(self.config.shutdown_timeout_seconds);
        let mut handles = self.handles.lock().await;

        self.engine_cancel.cancel();
        if let Some(handle) = handles.engine.take() {
            let _ = handle.await;
        }

        self.dispatcher_cancel.cancel();
        self.timers.cancel();
        for handle in [
            handles.dispatcher.take(),
            handles.detector.take(),
            handles.cleaner.take(),
        ]
        .into_iter()
        .flatten()
        {
            let _ = handle.await;
        }

        self.pools.shutdown(timeout).await;
        if let Some(handle) = handles.results.take() {
            if tokio::time::timeout(timeout, handle).await.is_err() {
                warn!("结果处理器在 {:?} 内未退出", timeout);
            }
        }
        info!("调度中心已停止");
    }
}
