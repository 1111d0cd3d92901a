use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use scheduler_core::{traits::CoordinatorApi, SchedulerError, SchedulerResult, WorkerConfig};

use crate::components::{
    HeartbeatManager, HttpCoordinatorClient, TaskExecutionManager, WorkerLifecycle,
};

/// Worker代理
///
/// 注册到调度中心后运行三个相互独立的循环：心跳、任务拉取和超时清扫。
/// 任务的执行与上报在各自的后台任务中完成，不阻塞这些循环。
pub struct WorkerAgent {
    config: WorkerConfig,
    client: Arc<dyn CoordinatorApi>,
    lifecycle: Arc<WorkerLifecycle>,
    tasks: Arc<TaskExecutionManager>,
    heartbeat: Arc<HeartbeatManager>,
    loops: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerAgent {
    pub fn new(config: WorkerConfig, client: Arc<dyn CoordinatorApi>) -> Self {
        let lifecycle = Arc::new(WorkerLifecycle::new(client.clone(), config.clone()));
        let tasks = Arc::new(TaskExecutionManager::new(
            client.clone(),
            lifecycle.clone(),
            config.clone(),
        ));
        let heartbeat = Arc::new(HeartbeatManager::new(
            client.clone(),
            lifecycle.clone(),
            tasks.clone(),
            config.capacity,
        ));
        Self {
            config,
            client,
            lifecycle,
            tasks,
            heartbeat,
            loops: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// 通过HTTP连接 `dispatcher_url` 指定的调度中心
    pub fn with_http_client(config: WorkerConfig) -> Self {
        let client = Arc::new(HttpCoordinatorClient::new(
            config.dispatcher_url.clone(),
            Duration::from_secs(config.request_timeout_seconds),
        ));
        Self::new(config, client)
    }

    pub async fn worker_id(&self) -> Option<String> {
        self.lifecycle.worker_id().await
    }

    pub fn tasks(&self) -> &Arc<TaskExecutionManager> {
        &self.tasks
    }

    pub async fn register(&self) -> SchedulerResult<String> {
        self.lifecycle.ensure_registered().await
    }

    pub async fn send_heartbeat(&self) -> SchedulerResult<()> {
        self.heartbeat.send_heartbeat().await
    }

    /// 拉取一次任务，返回本次接收的任务数
    pub async fn poll_once(&self) -> SchedulerResult<usize> {
        poll_tasks(&self.client, &self.lifecycle, &self.tasks).await
    }

    /// 注册并启动后台循环
    pub async fn start(&self) -> SchedulerResult<()> {
        let worker_id = self.register().await?;
        info!(
            "Worker {} ({}) 启动，容量 {}，调度中心 {}",
            self.config.name, worker_id, self.config.capacity, self.config.dispatcher_url
        );

        let mut handles = self.handles.lock().await;
        handles.push(self.spawn_heartbeat_loop());
        handles.push(self.spawn_poll_loop());
        handles.push(self.spawn_sweep_loop());
        Ok(())
    }

    fn spawn_heartbeat_loop(&self) -> JoinHandle<()> {
        let heartbeat = self.heartbeat.clone();
        let cancel = self.loops.clone();
        let period = Duration::from_secs(self.config.heartbeat_interval_seconds.max(1));
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = heartbeat.send_heartbeat().await {
                            warn!("发送心跳失败: {}", e);
                        }
                    }
                }
            }
        })
    }

    fn spawn_poll_loop(&self) -> JoinHandle<()> {
        let client = self.client.clone();
        let lifecycle = self.lifecycle.clone();
        let tasks = self.tasks.clone();
        let cancel = self.loops.clone();
        let period = Duration::from_secs(self.config.poll_interval_seconds.max(1));
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = poll_tasks(&client, &lifecycle, &tasks).await {
                            warn!("拉取任务失败: {}", e);
                        }
                    }
                }
            }
        })
    }

    fn spawn_sweep_loop(&self) -> JoinHandle<()> {
        let tasks = self.tasks.clone();
        let cancel = self.loops.clone();
        let period = Duration::from_secs(self.config.sweep_interval_seconds.max(1));
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let cancelled = tasks.sweep(Utc::now()).await;
                        if cancelled > 0 {
                            warn!("清扫取消了 {} 个超时任务", cancelled);
                        }
                    }
                }
            }
        })
    }

    /// 停止循环，取消所有子进程并等待结果上报
    pub async fn stop(&self) {
        info!("Worker {} 正在停止", self.config.name);
        self.loops.cancel();
        for handle in self.handles.lock().await.drain(..) {
            if let Err(e) = handle.await {
                error!("Worker后台循环异常退出: {}", e);
            }
        }
        self.tasks
            .shutdown(Duration::from_secs(self.config.shutdown_timeout_seconds))
            .await;
        info!("Worker {} 已停止", self.config.name);
    }
}

async fn poll_tasks(
    client: &Arc<dyn CoordinatorApi>,
    lifecycle: &Arc<WorkerLifecycle>,
    tasks: &Arc<TaskExecutionManager>,
) -> SchedulerResult<usize> {
    let available = tasks.available_capacity().await;
    if available == 0 {
        return Ok(0);
    }
    let worker_id = lifecycle.ensure_registered().await?;

    match client.get_task(&worker_id, available).await {
        Ok(assigned) => {
            let count = assigned.len();
            for task in assigned {
                tasks.spawn(task, &worker_id).await;
            }
            Ok(count)
        }
        Err(SchedulerError::WorkerNotFound { .. }) => {
            lifecycle.reregister(&worker_id).await?;
            Ok(0)
        }
        Err(e) => Err(e),
    }
}
