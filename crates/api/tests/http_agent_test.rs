#![cfg(unix)]

use std::time::Duration;

use scheduler_api::{create_app, AppState};
use scheduler_core::models::{ExecutionStatus, Job, JobTarget, ShellTarget};
use scheduler_core::{ApiConfig, DispatcherConfig, ExecutorConfig, WorkerConfig};
use scheduler_dispatcher::DispatcherService;
use scheduler_infrastructure::InMemoryStore;
use scheduler_worker::WorkerAgent;

/// 真实HTTP链路：Worker代理通过接口注册、拉取任务并上报结果
#[tokio::test]
async fn test_agent_over_http() {
    let repos = InMemoryStore::new().repositories();
    let service = DispatcherService::new(
        DispatcherConfig::default(),
        ExecutorConfig::default(),
        repos.clone(),
    );
    let state = AppState {
        coordinator: service.coordinator(),
        controller: service.controller(),
    };
    let app = create_app(state, &ApiConfig::default());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let agent = WorkerAgent::with_http_client(WorkerConfig {
        name: "http-agent".into(),
        dispatcher_url: format!("http://{addr}"),
        capacity: 1,
        ..Default::default()
    });
    let worker_id = agent.register().await.unwrap();
    agent.send_heartbeat().await.unwrap();
    assert_eq!(agent.worker_id().await, Some(worker_id.clone()));

    let job = service
        .controller()
        .create_job(Job::new(
            "echo",
            "0 0 0 1 1 *",
            JobTarget::Shell(ShellTarget {
                command: "echo $WORKER_ID".into(),
            }),
        ))
        .await
        .unwrap();
    let triggered = service.controller().trigger_job(job.id).await.unwrap();
    let execution_id = triggered.schedule.execution_id.unwrap();

    assert_eq!(agent.poll_once().await.unwrap(), 1);

    let mut finished = None;
    for _ in 0..100 {
        let execution = repos
            .executions
            .get_by_id(&execution_id)
            .await
            .unwrap()
            .unwrap();
        if execution.status.is_terminal() {
            finished = Some(execution);
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let execution = finished.expect("执行未在预期时间内结束");
    assert_eq!(execution.status, ExecutionStatus::Success);
    assert_eq!(
        execution.output.as_deref().map(str::trim),
        Some(worker_id.as_str())
    );

    agent.stop().await;
    server.abort();
}
