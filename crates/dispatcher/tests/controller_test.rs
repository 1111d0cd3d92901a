use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use scheduler_core::models::{
    ExecutionStatus, HttpTarget, Job, JobTarget, RpcTarget, ScheduleStatus, ShellTarget,
};
use scheduler_core::traits::Repositories;
use scheduler_core::{DispatcherConfig, ExecutorConfig, SchedulerError};
use scheduler_dispatcher::executors::{CallError, CallResponse, CallbackExecutor};
use scheduler_dispatcher::pool::LocalPools;
use scheduler_dispatcher::{DispatchOutcome, DispatcherService};
use scheduler_infrastructure::InMemoryStore;

/// 主目标失败、备用目标成功的执行器
struct PrimaryDownExecutor {
    primary_calls: AtomicU32,
}

#[async_trait]
impl CallbackExecutor for PrimaryDownExecutor {
    async fn call(&self, target: &JobTarget, _: Duration) -> Result<CallResponse, CallError> {
        match target {
            JobTarget::Http(http) if http.url.contains("primary") => {
                self.primary_calls.fetch_add(1, Ordering::SeqCst);
                Err(CallError::Transport("connection refused".into()))
            }
            _ => Ok(CallResponse {
                status_code: Some(200),
                body: "fallback ok".into(),
            }),
        }
    }
}

fn http_target(url: &str) -> JobTarget {
    JobTarget::Http(HttpTarget {
        url: url.into(),
        method: "GET".into(),
        body: None,
        headers: HashMap::new(),
    })
}

fn service(repos: Repositories, executor: Arc<PrimaryDownExecutor>) -> DispatcherService {
    let executor_config = ExecutorConfig::default();
    let pools = LocalPools::new(&executor_config, executor.clone(), executor);
    DispatcherService::with_pools(DispatcherConfig::default(), executor_config, repos, pools)
}

fn executor() -> Arc<PrimaryDownExecutor> {
    Arc::new(PrimaryDownExecutor {
        primary_calls: AtomicU32::new(0),
    })
}

#[tokio::test]
async fn test_create_job_schedules_enabled_job() {
    let repos = InMemoryStore::new().repositories();
    let service = service(repos.clone(), executor());
    let controller = service.controller();

    let job = controller
        .create_job(Job::new("nightly", "0 0 2 * * *", http_target("http://cb/primary")))
        .await
        .unwrap();
    assert!(job.id > 0);
    let status = controller.task_status(job.id).await.unwrap();
    assert!(status.scheduled);
    assert!(status.next_fire_at.is_some());

    let mut disabled = Job::new("off", "*/5 * * * *", http_target("http://cb"));
    disabled.enabled = false;
    let disabled = controller.create_job(disabled).await.unwrap();
    assert!(!controller.task_status(disabled.id).await.unwrap().scheduled);
}

#[tokio::test]
async fn test_create_job_rejects_invalid_input() {
    let repos = InMemoryStore::new().repositories();
    let service = service(repos.clone(), executor());
    let controller = service.controller();

    let err = controller
        .create_job(Job::new("bad", "not a cron", http_target("http://cb")))
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidCron { .. }));

    let mismatch = Job::new(
        "mismatch",
        "0 * * * * *",
        JobTarget::Shell(ShellTarget {
            command: "true".into(),
        }),
    )
    .with_fallback(JobTarget::Rpc(RpcTarget {
        service: "http://rpc".into(),
        method: "run".into(),
        params: serde_json::Value::Null,
    }));
    assert!(controller.create_job(mismatch).await.is_err());

    // 超时时间过大会让Worker无法计算截止时间
    let huge_timeout = Job::new(
        "huge",
        "0 * * * * *",
        JobTarget::Shell(ShellTarget {
            command: "true".into(),
        }),
    )
    .with_timeout(10_000_000_000_000_000);
    assert!(matches!(
        controller.create_job(huge_timeout).await,
        Err(SchedulerError::Validation(_))
    ));
    assert!(controller.list_jobs().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_update_job_replaces_cron_entry() {
    let repos = InMemoryStore::new().repositories();
    let service = service(repos.clone(), executor());
    let controller = service.controller();
    let job = controller
        .create_job(Job::new("yearly", "0 0 0 1 1 *", http_target("http://cb/old")))
        .await
        .unwrap();
    let before = controller.task_status(job.id).await.unwrap().next_fire_at.unwrap();

    let mut changed = Job::new("every-5s", "*/5 * * * * *", http_target("http://cb/new"));
    changed.retry_count = 1;
    let updated = controller.update_job(job.id, changed).await.unwrap();
    assert_eq!(updated.id, job.id);
    assert_eq!(updated.created_at, job.created_at);

    let status = controller.task_status(job.id).await.unwrap();
    assert!(status.scheduled);
    assert_eq!(status.job.name, "every-5s");
    assert_eq!(status.job.retry_count, 1);
    assert!(status.next_fire_at.unwrap() < before);
    assert_eq!(service.engine().active_entries().await, vec![job.id]);

    // 非法定义不会改动已保存的任务
    let err = controller
        .update_job(job.id, Job::new("bad", "not a cron", http_target("http://cb")))
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidCron { .. }));
    assert_eq!(controller.get_job(job.id).await.unwrap().name, "every-5s");

    let mut disabled = Job::new("off", "*/5 * * * * *", http_target("http://cb/new"));
    disabled.enabled = false;
    controller.update_job(job.id, disabled).await.unwrap();
    assert!(!controller.task_status(job.id).await.unwrap().scheduled);
    assert!(service.engine().active_entries().await.is_empty());

    assert!(matches!(
        controller
            .update_job(999, Job::new("x", "* * * * * *", http_target("http://cb")))
            .await,
        Err(SchedulerError::JobNotFound { id: 999 })
    ));
}

#[tokio::test]
async fn test_pause_resume_and_delete() {
    let repos = InMemoryStore::new().repositories();
    let service = service(repos.clone(), executor());
    let controller = service.controller();
    let job = controller
        .create_job(Job::new("j", "0 * * * * *", http_target("http://cb")))
        .await
        .unwrap();

    controller.pause_task(job.id).await.unwrap();
    let status = controller.task_status(job.id).await.unwrap();
    assert!(!status.scheduled);
    assert!(!status.job.enabled);

    controller.resume_task(job.id).await.unwrap();
    let status = controller.task_status(job.id).await.unwrap();
    assert!(status.scheduled);
    assert!(status.job.enabled);

    controller.delete_job(job.id).await.unwrap();
    assert!(matches!(
        controller.task_status(job.id).await,
        Err(SchedulerError::JobNotFound { .. })
    ));
    assert!(matches!(
        controller.delete_job(job.id).await,
        Err(SchedulerError::JobNotFound { .. })
    ));
    assert!(service.engine().active_entries().await.is_empty());
}

#[tokio::test]
async fn test_trigger_runs_fallback_after_primary_retries() {
    let repos = InMemoryStore::new().repositories();
    let executor = executor();
    let service = service(repos.clone(), executor.clone());
    service.start().await.unwrap();
    let controller = service.controller();

    let job = Job::new("cb", "0 0 0 1 1 *", http_target("http://cb/primary"))
        .with_retry(2, 0)
        .with_fallback(http_target("http://cb/fallback"));
    let job = controller.create_job(job).await.unwrap();

    let triggered = controller.trigger_job(job.id).await.unwrap();
    assert!(matches!(triggered.outcome, DispatchOutcome::Local(_)));

    let mut schedule = triggered.schedule;
    for _ in 0..100 {
        schedule = repos
            .schedules
            .get_by_id(&schedule.id)
            .await
            .unwrap()
            .unwrap();
        if schedule.status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(schedule.status, ScheduleStatus::Completed);

    let execution = repos
        .executions
        .get_by_id(schedule.execution_id.as_deref().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(execution.status, ExecutionStatus::Success);
    assert!(execution.fallback_used);
    assert_eq!(execution.retries_used, 2);
    assert_eq!(execution.output.as_deref(), Some("fallback ok"));
    assert_eq!(executor.primary_calls.load(Ordering::SeqCst), 3);

    service.shutdown().await;
}

#[tokio::test]
async fn test_trigger_unknown_job() {
    let repos = InMemoryStore::new().repositories();
    let service = service(repos, executor());
    assert!(matches!(
        service.controller().trigger_job(42).await,
        Err(SchedulerError::JobNotFound { id: 42 })
    ));
}
