#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use scheduler_core::models::{
    Ack, AssignedTask, Execution, ExecutionStatus, HeartbeatRequest, Job, JobTarget,
    RegisterWorkerRequest, RegisterWorkerResponse, ReportTaskResultRequest, ScheduleStatus,
    ShellTarget,
};
use scheduler_core::traits::{CoordinatorApi, Repositories};
use scheduler_core::{DispatcherConfig, ExecutorConfig, SchedulerResult, WorkerConfig};
use scheduler_dispatcher::{DispatchOutcome, DispatcherService};
use scheduler_infrastructure::InMemoryStore;
use scheduler_worker::WorkerAgent;

struct Harness {
    repos: Repositories,
    service: DispatcherService,
    agent: WorkerAgent,
}

fn harness(capacity: u32) -> Harness {
    let repos = InMemoryStore::new().repositories();
    let service = DispatcherService::new(
        DispatcherConfig::default(),
        ExecutorConfig::default(),
        repos.clone(),
    );
    let config = WorkerConfig {
        name: "agent-1".into(),
        capacity,
        shutdown_timeout_seconds: 5,
        ..Default::default()
    };
    let agent = WorkerAgent::new(config, service.coordinator());
    Harness {
        repos,
        service,
        agent,
    }
}

fn shell_job(command: &str) -> Job {
    Job::new(
        "shell",
        "0 0 0 1 1 *",
        JobTarget::Shell(ShellTarget {
            command: command.into(),
        }),
    )
}

/// 创建任务并手动触发，返回执行记录ID
async fn trigger(h: &Harness, job: Job) -> (Job, String) {
    let controller = h.service.controller();
    let job = controller.create_job(job).await.unwrap();
    let triggered = controller.trigger_job(job.id).await.unwrap();
    assert!(matches!(triggered.outcome, DispatchOutcome::Remote { .. }));
    let execution_id = triggered.schedule.execution_id.unwrap();
    (job, execution_id)
}

async fn wait_finished(repos: &Repositories, execution_id: &str) -> Execution {
    for _ in 0..200 {
        let execution = repos
            .executions
            .get_by_id(execution_id)
            .await
            .unwrap()
            .unwrap();
        if execution.status.is_terminal() {
            return execution;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("执行 {execution_id} 未结束");
}

#[tokio::test]
async fn test_task_runs_with_environment() {
    let h = harness(2);
    let worker_id = h.agent.register().await.unwrap();
    let (job, execution_id) = trigger(
        &h,
        shell_job(r#"echo "$WORKER_NAME:$JOB_ID:$TASK_ID:$DEPLOY_ENV""#)
            .with_param("DEPLOY_ENV", "prod"),
    )
    .await;

    assert_eq!(h.agent.poll_once().await.unwrap(), 1);
    let execution = wait_finished(&h.repos, &execution_id).await;

    assert_eq!(execution.status, ExecutionStatus::Success);
    assert_eq!(execution.exit_code, Some(0));
    assert_eq!(execution.worker_id.as_deref(), Some(worker_id.as_str()));
    let expected = format!("agent-1:{}:{}:prod", job.id, execution_id);
    assert_eq!(execution.output.as_deref().map(str::trim), Some(expected.as_str()));

    let schedule = h
        .repos
        .schedules
        .get_by_execution_id(&execution_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(schedule.status, ScheduleStatus::Completed);
    assert!(schedule.executed_at.is_some());
    assert_eq!(
        h.service.registry().get(&worker_id).await.unwrap().current_load,
        0
    );
}

#[tokio::test]
async fn test_failed_task_schedules_retry() {
    let h = harness(2);
    h.agent.register().await.unwrap();
    let (job, execution_id) =
        trigger(&h, shell_job("echo broken; exit 3").with_retry(1, 0)).await;

    h.agent.poll_once().await.unwrap();
    let execution = wait_finished(&h.repos, &execution_id).await;
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.exit_code, Some(3));

    let due = h
        .repos
        .schedules
        .get_due_pending(Utc::now() + chrono::Duration::seconds(60), 10)
        .await
        .unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].job_id, job.id);
    assert_eq!(due[0].attempt, 1);
}

#[tokio::test]
async fn test_timeout_is_reported() {
    let h = harness(1);
    h.agent.register().await.unwrap();
    let (_, execution_id) = trigger(&h, shell_job("sleep 30").with_timeout(1)).await;

    h.agent.poll_once().await.unwrap();
    let execution = wait_finished(&h.repos, &execution_id).await;
    assert_eq!(execution.status, ExecutionStatus::Timeout);
    assert_eq!(execution.exit_code, Some(-1));
}

#[tokio::test]
async fn test_poll_respects_capacity() {
    let h = harness(1);
    h.agent.register().await.unwrap();
    trigger(&h, shell_job("sleep 30")).await;

    assert_eq!(h.agent.poll_once().await.unwrap(), 1);
    assert_eq!(h.agent.tasks().available_capacity().await, 0);
    assert_eq!(h.agent.poll_once().await.unwrap(), 0);
    h.agent.stop().await;
}

#[tokio::test]
async fn test_stop_cancels_running_tasks() {
    let h = harness(2);
    h.agent.register().await.unwrap();
    let (_, execution_id) = trigger(&h, shell_job("sleep 30")).await;
    h.agent.poll_once().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    h.agent.stop().await;
    let execution = wait_finished(&h.repos, &execution_id).await;
    assert_eq!(execution.status, ExecutionStatus::Cancelled);
}

/// 可以切换到另一个调度中心实例的协调接口，模拟调度中心重启
struct SwitchableCoordinator {
    inner: RwLock<Arc<dyn CoordinatorApi>>,
}

#[async_trait]
impl CoordinatorApi for SwitchableCoordinator {
    async fn register_worker(
        &self,
        request: RegisterWorkerRequest,
    ) -> SchedulerResult<RegisterWorkerResponse> {
        self.inner.read().await.register_worker(request).await
    }

    async fn heartbeat(&self, worker_id: &str, request: HeartbeatRequest) -> SchedulerResult<Ack> {
        self.inner.read().await.heartbeat(worker_id, request).await
    }

    async fn get_task(
        &self,
        worker_id: &str,
        available_capacity: u32,
    ) -> SchedulerResult<Vec<AssignedTask>> {
        self.inner
            .read()
            .await
            .get_task(worker_id, available_capacity)
            .await
    }

    async fn report_task_result(
        &self,
        task_id: &str,
        request: ReportTaskResultRequest,
    ) -> SchedulerResult<Ack> {
        self.inner
            .read()
            .await
            .report_task_result(task_id, request)
            .await
    }
}

fn fresh_service() -> DispatcherService {
    DispatcherService::new(
        DispatcherConfig::default(),
        ExecutorConfig::default(),
        InMemoryStore::new().repositories(),
    )
}

#[tokio::test]
async fn test_reregisters_after_dispatcher_restart() {
    let first = fresh_service();
    let initial: Arc<dyn CoordinatorApi> = first.coordinator();
    let switchable = Arc::new(SwitchableCoordinator {
        inner: RwLock::new(initial),
    });
    let agent = WorkerAgent::new(WorkerConfig::default(), switchable.clone());
    let old_id = agent.register().await.unwrap();
    agent.send_heartbeat().await.unwrap();
    assert_eq!(agent.worker_id().await, Some(old_id.clone()));

    // 新的调度中心不认识旧ID，心跳被拒绝后重新注册
    let second = fresh_service();
    *switchable.inner.write().await = second.coordinator();
    agent.send_heartbeat().await.unwrap();
    let new_id = agent.worker_id().await.unwrap();
    assert_ne!(new_id, old_id);
    assert!(second.registry().get(&new_id).await.is_some());

    // 拉取时收到 WorkerNotFound 同样重新注册
    let third = fresh_service();
    *switchable.inner.write().await = third.coordinator();
    assert_eq!(agent.poll_once().await.unwrap(), 0);
    let third_id = agent.worker_id().await.unwrap();
    assert_ne!(third_id, new_id);
    assert!(third.registry().get(&third_id).await.is_some());
}
