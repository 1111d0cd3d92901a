use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use scheduler_core::{
    models::{AssignedTask, ReportTaskResultRequest},
    traits::CoordinatorApi,
    WorkerConfig,
};

use super::WorkerLifecycle;
use crate::executors::{ShellExecutor, ShellOutcome, TaskState};

struct RunningTask {
    job_id: i64,
    state: TaskState,
    deadline: DateTime<Utc>,
    cancel: CancellationToken,
}

/// `start` 之后 `seconds` 秒的时间点，溢出时取最大时间
fn deadline_after(start: DateTime<Utc>, seconds: u64) -> DateTime<Utc> {
    i64::try_from(seconds)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .and_then(|delta| start.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Worker上正在执行的任务
///
/// 每个任务拥有根令牌派生出的子令牌；清扫会取消超过截止时间加宽限期仍未结束的任务，
/// 停机时取消根令牌即可终止所有子进程。
pub struct TaskExecutionManager {
    executor: ShellExecutor,
    client: Arc<dyn CoordinatorApi>,
    lifecycle: Arc<WorkerLifecycle>,
    config: WorkerConfig,
    running: RwLock<HashMap<String, RunningTask>>,
    root: CancellationToken,
    tracker: TaskTracker,
}

impl TaskExecutionManager {
    pub fn new(
        client: Arc<dyn CoordinatorApi>,
        lifecycle: Arc<WorkerLifecycle>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            executor: ShellExecutor::new(config.max_output_bytes),
            client,
            lifecycle,
            config,
            running: RwLock::new(HashMap::new()),
            root: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    pub async fn running_count(&self) -> u32 {
        self.running.read().await.len() as u32
    }

    /// 还能接收的任务数
    pub async fn available_capacity(&self) -> u32 {
        self.config.capacity.saturating_sub(self.running_count().await)
    }

    pub async fn task_state(&self, task_id: &str) -> Option<TaskState> {
        self.running.read().await.get(task_id).map(|task| task.state)
    }

    /// 接收任务并在后台执行，同一任务重复下发时忽略
    pub async fn spawn(self: &Arc<Self>, task: AssignedTask, worker_id: &str) {
        let cancel = self.root.child_token();
        {
            let mut running = self.running.write().await;
            if running.contains_key(&task.task_id) {
                warn!("任务 {} 已在执行，忽略重复下发", task.task_id);
                return;
            }
            running.insert(
                task.task_id.clone(),
                RunningTask {
                    job_id: task.job_id,
                    state: TaskState::Received,
                    deadline: deadline_after(Utc::now(), task.timeout_seconds),
                    cancel: cancel.clone(),
                },
            );
        }
        info!(
            "接收任务 {} (任务 {}): {}",
            task.task_id, task.job_id, task.command
        );

        let manager = Arc::clone(self);
        let worker_id = worker_id.to_string();
        self.tracker.spawn(async move {
            manager.execute(task, worker_id, cancel).await;
        });
    }

    async fn execute(&self, task: AssignedTask, worker_id: String, cancel: CancellationToken) {
        self.set_state(&task.task_id, TaskState::Running).await;

        let mut env = task.params.clone();
        env.insert("WORKER_ID".to_string(), worker_id.clone());
        env.insert("WORKER_NAME".to_string(), self.lifecycle.name().to_string());
        env.insert("TASK_ID".to_string(), task.task_id.clone());
        env.insert("JOB_ID".to_string(), task.job_id.to_string());

        let timeout = Duration::from_secs(task.timeout_seconds.max(1));
        let outcome = self
            .executor
            .run(&task.command, &env, timeout, &cancel)
            .await;
        self.set_state(&task.task_id, outcome.state).await;
        info!(
            "任务 {} 执行结束: {:?}，退出码 {}",
            task.task_id, outcome.state, outcome.exit_code
        );

        self.report(&task.task_id, worker_id, outcome).await;
        self.running.write().await.remove(&task.task_id);
    }

    async fn set_state(&self, task_id: &str, state: TaskState) {
        if let Some(task) = self.running.write().await.get_mut(task_id) {
            debug!("任务 {} (任务 {}) 状态 {:?} -> {:?}", task_id, task.job_id, task.state, state);
            task.state = state;
        }
    }

    /// 上报结果；调度中心不认识当前Worker时重新注册后再上报一次
    async fn report(&self, task_id: &str, worker_id: String, outcome: ShellOutcome) {
        let Some(status) = outcome.state.execution_status() else {
            return;
        };
        let mut request = ReportTaskResultRequest {
            worker_id,
            previous_worker_id: None,
            status,
            output: Some(outcome.output),
            error: outcome.error,
            exit_code: Some(outcome.exit_code),
            started_at: outcome.started_at,
            finished_at: outcome.finished_at,
        };

        match self.client.report_task_result(task_id, request.clone()).await {
            Ok(ack) if ack.success => return,
            Ok(ack) => warn!(
                "任务 {} 的结果被拒绝: {}",
                task_id,
                ack.message.unwrap_or_default()
            ),
            Err(e) => {
                error!("上报任务 {} 结果失败: {}", task_id, e);
                return;
            }
        }

        match self.lifecycle.reregister(&request.worker_id).await {
            Ok(new_id) => {
                let previous = std::mem::replace(&mut request.worker_id, new_id);
                request.previous_worker_id = Some(previous);
                match self.client.report_task_result(task_id, request).await {
                    Ok(ack) if ack.success => {}
                    Ok(_) => warn!("任务 {} 的结果再次被拒绝，放弃上报", task_id),
                    Err(e) => error!("重新上报任务 {} 结果失败: {}", task_id, e),
                }
            }
            Err(e) => error!("重新注册失败，任务 {} 的结果未上报: {}", task_id, e),
        }
    }

    /// 取消超过截止时间加宽限期的任务，返回被取消的数量
    pub async fn sweep(&self, now: DateTime<Utc>) -> usize {
        let running = self.running.read().await;
        let mut cancelled = 0;
        for (task_id, task) in running.iter() {
            let expired = now > deadline_after(task.deadline, self.config.cancel_grace_seconds);
            if expired && !task.cancel.is_cancelled() {
                warn!("任务 {} 超过截止时间仍未结束，强制取消", task_id);
                task.cancel.cancel();
                cancelled += 1;
            }
        }
        cancelled
    }

    /// 取消所有任务并等待结果上报，最多等待 `timeout`
    pub async fn shutdown(&self, timeout: Duration) {
        self.root.cancel();
        self.tracker.close();
        if tokio::time::timeout(timeout, self.tracker.wait()).await.is_err() {
            warn!("等待任务结束超时 ({:?})", timeout);
        }
    }
}
