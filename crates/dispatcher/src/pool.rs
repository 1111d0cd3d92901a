use std::sync::Arc;
use std::time::Duration;

use scheduler_core::models::{CallbackProtocol, Job, JobResult, Schedule, WorkResult};
use scheduler_core::ExecutorConfig;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::executors::{
    execute_with_policy, CallbackExecutor, HttpCallbackExecutor, JsonRpcCallbackExecutor,
};

/// 交给执行池的任务
#[derive(Debug, Clone)]
pub struct PoolTask {
    pub schedule: Schedule,
    pub job: Job,
}

pub type PoolPermit = mpsc::OwnedPermit<PoolTask>;

/// 固定并发数的本地执行池，所有工作协程共享一个有界队列
pub struct ExecutionPool {
    protocol: CallbackProtocol,
    executor: Arc<dyn CallbackExecutor>,
    workers: usize,
    max_response_bytes: usize,
    sender: mpsc::Sender<PoolTask>,
    receiver: Arc<Mutex<mpsc::Receiver<PoolTask>>>,
    /// 停止接收新任务，队列中剩余任务继续执行
    stop: CancellationToken,
    /// 强制取消正在执行的调用
    cancel: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ExecutionPool {
    pub fn new(
        protocol: CallbackProtocol,
        executor: Arc<dyn CallbackExecutor>,
        workers: usize,
        queue_capacity: usize,
        max_response_bytes: usize,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(queue_capacity.max(1));
        Self {
            protocol,
            executor,
            workers: workers.max(1),
            max_response_bytes,
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            stop: CancellationToken::new(),
            cancel: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn protocol(&self) -> CallbackProtocol {
        self.protocol
    }

    /// 预留队列位置，队列已满或执行池已停止时返回 None
    pub fn try_reserve(&self) -> Option<PoolPermit> {
        if self.stop.is_cancelled() {
            return None;
        }
        self.sender.clone().try_reserve_owned().ok()
    }

    /// 启动工作协程，结果写入 `results`
    pub async fn start(&self, results: mpsc::Sender<WorkResult>) {
        let mut handles = self.handles.lock().await;
        for index in 0..self.workers {
            let worker = PoolWorker {
                protocol: self.protocol,
                executor: self.executor.clone(),
                receiver: self.receiver.clone(),
                results: results.clone(),
                stop: self.stop.clone(),
                cancel: self.cancel.clone(),
                max_response_bytes: self.max_response_bytes,
            };
            handles.push(tokio::spawn(worker.run(index)));
        }
        info!("{} 执行池已启动，工作协程数: {}", self.protocol, self.workers);
    }

    /// 停止执行池：先等待队列排空，超时后强制取消
    pub async fn shutdown(&self, timeout: Duration) {
        self.stop.cancel();
        let handles: Vec<JoinHandle<()>> = self.handles.lock().await.drain(..).collect();
        let drain = futures::future::join_all(handles);
        tokio::pin!(drain);

        if tokio::time::timeout(timeout, &mut drain).await.is_err() {
            warn!("{} 执行池在 {:?} 内未排空，强制取消", self.protocol, timeout);
            self.cancel.cancel();
            drain.await;
        }
        info!("{} 执行池已停止", self.protocol);
    }
}

struct PoolWorker {
    protocol: CallbackProtocol,
    executor: Arc<dyn CallbackExecutor>,
    receiver: Arc<Mutex<mpsc::Receiver<PoolTask>>>,
    results: mpsc::Sender<WorkResult>,
    stop: CancellationToken,
    cancel: CancellationToken,
    max_response_bytes: usize,
}

impl PoolWorker {
    async fn next_task(&self) -> Option<PoolTask> {
        let mut receiver = self.receiver.lock().await;
        tokio::select! {
            biased;
            task = receiver.recv() => task,
            _ = self.stop.cancelled() => receiver.try_recv().ok(),
        }
    }

    async fn run(self, index: usize) {
        debug!("{} 执行池工作协程 {} 启动", self.protocol, index);
        while let Some(task) = self.next_task().await {
            let result = if task.job.target.protocol() == Some(self.protocol) {
                execute_with_policy(
                    self.executor.as_ref(),
                    &task.job,
                    &self.cancel,
                    self.max_response_bytes,
                )
                .await
            } else {
                JobResult {
                    error: Some(format!(
                        "任务目标类型 {} 与执行池 {} 不匹配",
                        task.job.target.kind(),
                        self.protocol
                    )),
                    ..Default::default()
                }
            };

            let work = WorkResult {
                schedule: task.schedule,
                job: task.job,
                result,
            };
            if self.results.send(work).await.is_err() {
                warn!("结果通道已关闭，{} 执行池工作协程 {} 退出", self.protocol, index);
                break;
            }
        }
        debug!("{} 执行池工作协程 {} 退出", self.protocol, index);
    }
}

/// HTTP 与 RPC 两个本地执行池
pub struct LocalPools {
    pub http: ExecutionPool,
    pub rpc: ExecutionPool,
}

impl LocalPools {
    pub fn new(
        config: &ExecutorConfig,
        http_executor: Arc<dyn CallbackExecutor>,
        rpc_executor: Arc<dyn CallbackExecutor>,
    ) -> Self {
        Self {
            http: ExecutionPool::new(
                CallbackProtocol::Http,
                http_executor,
                config.http_workers,
                config.pool_queue_capacity,
                config.max_response_bytes,
            ),
            rpc: ExecutionPool::new(
                CallbackProtocol::Rpc,
                rpc_executor,
                config.rpc_workers,
                config.pool_queue_capacity,
                config.max_response_bytes,
            ),
        }
    }

    /// 使用真实的HTTP和JSON-RPC执行器
    pub fn with_default_executors(config: &ExecutorConfig) -> Self {
        let limit = config.max_response_bytes;
        Self::new(
            config,
            Arc::new(HttpCallbackExecutor::new().with_max_body_bytes(limit)),
            Arc::new(JsonRpcCallbackExecutor::new().with_max_body_bytes(limit)),
        )
    }

    pub fn pool(&self, protocol: CallbackProtocol) -> &ExecutionPool {
        match protocol {
            CallbackProtocol::Http => &self.http,
            CallbackProtocol::Rpc => &self.rpc,
        }
    }

    pub async fn shutdown(&self, timeout: Duration) {
        tokio::join!(self.http.shutdown(timeout), self.rpc.shutdown(timeout));
    }
}
