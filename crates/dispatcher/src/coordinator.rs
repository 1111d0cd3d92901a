//! 调度中心的Worker协调服务
//!
//! 处理Worker注册、心跳、任务拉取与结果上报，是 `CoordinatorApi` 在调度中心的实现。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use scheduler_core::{
    models::{
        Ack, AssignedTask, Execution, ExecutionOutcome, ExecutionStatus, HeartbeatRequest,
        RegisterWorkerRequest, RegisterWorkerResponse, ReportTaskResultRequest, Schedule,
        ScheduleStatus, WorkerInfo,
    },
    traits::{CoordinatorApi, Repositories},
    SchedulerError, SchedulerResult,
};

use crate::registry::WorkerRegistry;
use crate::retry_service::RetryService;

pub struct CoordinatorService {
    repos: Repositories,
    registry: Arc<WorkerRegistry>,
    retry_service: Arc<dyn RetryService>,
}

impl CoordinatorService {
    pub fn new(
        repos: Repositories,
        registry: Arc<WorkerRegistry>,
        retry_service: Arc<dyn RetryService>,
    ) -> Self {
        Self {
            repos,
            registry,
            retry_service,
        }
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    /// 原Worker已经不在注册表中、并且上报方声明了原Worker ID时，允许由上报方接管结果
    async fn can_rebind(&self, execution: &Execution, request: &ReportTaskResultRequest) -> bool {
        let Some(owner) = execution.worker_id.as_deref() else {
            return false;
        };
        request.previous_worker_id.as_deref() == Some(owner)
            && self.registry.get(owner).await.is_none()
    }

    /// 把一个已分配的调度实例转为执行中并生成下发的任务；
    /// 任务已删除、不是shell任务或执行记录缺失时放弃该实例并返回 None
    async fn take_assigned(
        &self,
        worker_id: &str,
        mut schedule: Schedule,
    ) -> SchedulerResult<Option<AssignedTask>> {
        let execution = match &schedule.execution_id {
            Some(id) => self.repos.executions.get_by_id(id).await?,
            None => None,
        };
        let Some(mut execution) = execution else {
            self.abandon(worker_id, schedule, None, "执行记录不存在").await?;
            return Ok(None);
        };
        let Some(job) = self.repos.jobs.get_by_id(schedule.job_id).await? else {
            self.abandon(worker_id, schedule, Some(execution), "任务已删除")
                .await?;
            return Ok(None);
        };
        let Some(command) = job.command() else {
            self.abandon(
                worker_id,
                schedule,
                Some(execution),
                "不是shell任务，不能下发给Worker",
            )
            .await?;
            return Ok(None);
        };

        schedule.advance(ScheduleStatus::Executing)?;
        schedule.executed_at = Some(Utc::now());
        self.repos.schedules.update(&schedule).await?;
        execution.mark_running()?;
        self.repos.executions.update(&execution).await?;

        Ok(Some(AssignedTask {
            task_id: execution.id,
            job_id: job.id,
            schedule_id: schedule.id,
            command: command.to_string(),
            params: job.params.clone(),
            timeout_seconds: job.timeout_seconds,
            retry_attempts: job.retry_count,
        }))
    }

    /// 放弃无法下发的调度实例：实例和执行记录标记为失败，并撤销Worker上的预占
    async fn abandon(
        &self,
        worker_id: &str,
        mut schedule: Schedule,
        execution: Option<Execution>,
        reason: &str,
    ) -> SchedulerResult<()> {
        warn!(
            "放弃任务 {} 的调度实例 {}: {}",
            schedule.job_id, schedule.id, reason
        );
        if let Some(mut execution) = execution {
            if !execution.status.is_terminal() {
                execution.finish(
                    ExecutionStatus::Failed,
                    ExecutionOutcome {
                        error: Some(reason.to_string()),
                        ..Default::default()
                    },
                )?;
                self.repos.executions.update(&execution).await?;
                metrics::counter!(
                    "scheduler_executions_total",
                    "outcome" => ExecutionStatus::Failed.as_str()
                )
                .increment(1);
            }
        }
        schedule.advance(ScheduleStatus::Failed)?;
        self.repos.schedules.update(&schedule).await?;
        self.registry.cancel_reservation(worker_id).await;
        Ok(())
    }
}

#[async_trait]
impl CoordinatorApi for CoordinatorService {
    async fn register_worker(
        &self,
        request: RegisterWorkerRequest,
    ) -> SchedulerResult<RegisterWorkerResponse> {
        if request.name.trim().is_empty() {
            return Err(SchedulerError::Validation("Worker名称不能为空".to_string()));
        }
        if request.capacity == 0 {
            return Err(SchedulerError::Validation("Worker容量必须大于0".to_string()));
        }

        let mut worker = WorkerInfo::new(
            Uuid::new_v4().to_string(),
            request.name,
            request.address,
            request.capacity,
        );
        worker.metadata = request.metadata;

        let worker = self.repos.workers.create(&worker).await?;
        self.registry.register(worker.clone()).await;
        info!(
            "Worker注册成功: {} ({}) 容量 {}",
            worker.name, worker.id, worker.capacity
        );

        Ok(RegisterWorkerResponse {
            worker_id: worker.id,
        })
    }

    async fn heartbeat(&self, worker_id: &str, request: HeartbeatRequest) -> SchedulerResult<Ack> {
        let now = Utc::now();
        let Some(worker) = self
            .registry
            .heartbeat(worker_id, request.current_load, request.status, now)
            .await
        else {
            warn!("收到未注册Worker {} 的心跳", worker_id);
            return Ok(Ack::reject(format!("Worker {} 未注册", worker_id)));
        };

        self.repos
            .workers
            .update_heartbeat(worker_id, now, worker.current_load)
            .await?;
        self.repos
            .workers
            .update_status(worker_id, worker.status)
            .await?;
        debug!(
            "Worker {} 心跳: 负载 {}/{} 状态 {}",
            worker_id, worker.current_load, worker.capacity, worker.status.as_str()
        );
        Ok(Ack::ok())
    }

    async fn get_task(
        &self,
        worker_id: &str,
        available_capacity: u32,
    ) -> SchedulerResult<Vec<AssignedTask>> {
        let limit = self
            .registry
            .pull_limit(worker_id)
            .await
            .ok_or_else(|| SchedulerError::WorkerNotFound {
                id: worker_id.to_string(),
            })?
            .min(available_capacity);
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut tasks = Vec::with_capacity(limit as usize);
        loop {
            let wanted = limit as usize - tasks.len();
            let schedules = self
                .repos
                .schedules
                .get_by_worker_and_status(worker_id, ScheduleStatus::Assigned, wanted)
                .await?;
            if schedules.is_empty() {
                break;
            }

            // 失效的调度实例会被标记为失败，再取一批补足名额
            let mut abandoned = 0;
            for schedule in schedules {
                match self.take_assigned(worker_id, schedule).await? {
                    Some(task) => tasks.push(task),
                    None => abandoned += 1,
                }
            }
            if abandoned == 0 || tasks.len() >= limit as usize {
                break;
            }
        }

        if !tasks.is_empty() {
            self.registry.mark_pulled(worker_id, tasks.len() as u32).await;
            info!("Worker {} 拉取了 {} 个任务", worker_id, tasks.len());
        }
        Ok(tasks)
    }

    async fn report_task_result(
        &self,
        task_id: &str,
        request: ReportTaskResultRequest,
    ) -> SchedulerResult<Ack> {
        if self.registry.get(&request.worker_id).await.is_none() {
            warn!("未注册Worker {} 上报任务 {} 的结果", request.worker_id, task_id);
            return Ok(Ack::reject(format!("Worker {} 未注册", request.worker_id)));
        }
        if !request.status.is_terminal() {
            return Err(SchedulerError::Validation(format!(
                "上报的执行状态必须是终态，收到 {}",
                request.status
            )));
        }

        let mut execution = self
            .repos
            .executions
            .get_by_id(task_id)
            .await?
            .ok_or_else(|| SchedulerError::ExecutionNotFound {
                id: task_id.to_string(),
            })?;
        let owned = execution.worker_id.as_deref() == Some(request.worker_id.as_str());
        if !owned && !self.can_rebind(&execution, &request).await {
            warn!(
                "Worker {} 上报的任务 {} 属于 {:?}，拒绝",
                request.worker_id, task_id, execution.worker_id
            );
            return Err(SchedulerError::Validation(format!(
                "任务 {} 不属于Worker {}",
                task_id, request.worker_id
            )));
        }
        if execution.status.is_terminal() {
            debug!("执行 {} 已是终态 {}，忽略重复上报", task_id, execution.status);
            return Ok(Ack::ok());
        }
        if execution.status != ExecutionStatus::Running {
            return Err(SchedulerError::Validation(format!(
                "任务 {} 尚未被拉取，不能上报结果",
                task_id
            )));
        }

        if !owned {
            info!(
                "任务 {} 从已失联的Worker {:?} 重新绑定到 {}",
                task_id, execution.worker_id, request.worker_id
            );
            execution.worker_id = Some(request.worker_id.clone());
        }
        let elapsed_ms = request.elapsed_ms();
        execution.started_at.get_or_insert(request.started_at);
        execution.finish(
            request.status,
            ExecutionOutcome {
                output: request.output,
                error: request.error,
                exit_code: request.exit_code,
                elapsed_ms: Some(elapsed_ms),
                ..Default::default()
            },
        )?;
        self.repos.executions.update(&execution).await?;

        if let Some(mut schedule) = self.repos.schedules.get_by_execution_id(task_id).await? {
            if !schedule.status.is_terminal() {
                let to = if request.status == ExecutionStatus::Success {
                    ScheduleStatus::Completed
                } else {
                    ScheduleStatus::Failed
                };
                schedule.advance(to)?;
                self.repos.schedules.update(&schedule).await?;
            }
        }

        // 重新绑定时原Worker已不在注册表中，没有可释放的负载
        if owned {
            self.registry.release(&request.worker_id).await;
        }
        metrics::counter!("scheduler_executions_total", "outcome" => request.status.as_str())
            .increment(1);
        info!(
            "Worker {} 上报任务 {} 结果: {}，耗时 {}ms",
            request.worker_id, task_id, request.status, elapsed_ms
        );

        if request.status.counts_as_failure() {
            self.retry_service.handle_failed_execution(&execution).await?;
        }
        Ok(Ack::ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry_service::MockRetryService;
    use scheduler_core::models::{Execution, Job, JobTarget, Schedule, ShellTarget, WorkerStatus};
    use scheduler_infrastructure::InMemoryStore;
    use std::collections::HashMap;

    fn register_request(capacity: u32) -> RegisterWorkerRequest {
        RegisterWorkerRequest {
            name: "w1".into(),
            address: "127.0.0.1".into(),
            capacity,
            metadata: HashMap::new(),
        }
    }

    fn coordinator(repos: Repositories, retry: MockRetryService) -> CoordinatorService {
        CoordinatorService::new(repos, Arc::new(WorkerRegistry::new()), Arc::new(retry))
    }

    fn shell_job(command: &str) -> Job {
        Job::new(
            "sh",
            "0 * * * * *",
            JobTarget::Shell(ShellTarget {
                command: command.into(),
            }),
        )
        .with_param("ENV", "test")
    }

    async fn assign_shell(
        coordinator: &CoordinatorService,
        repos: &Repositories,
        command: &str,
    ) -> String {
        assign_job(coordinator, repos, shell_job(command)).await
    }

    /// 按分发器的方式把任务分配给负载最低的Worker，返回执行记录ID
    async fn assign_job(coordinator: &CoordinatorService, repos: &Repositories, job: Job) -> String {
        let job = repos.jobs.create(&job).await.unwrap();
        let worker = coordinator.registry.select_and_reserve().await.unwrap();
        let mut schedule = repos
            .schedules
            .create(&Schedule::new(job.id, Utc::now()))
            .await
            .unwrap();
        let execution = Execution::new(&schedule.id, job.id, Some(worker.id.clone()));
        repos.executions.create(&execution).await.unwrap();
        schedule.assign(Some(worker.id), execution.id.clone()).unwrap();
        repos.schedules.update(&schedule).await.unwrap();
        execution.id
    }

    fn report(worker_id: &str, status: ExecutionStatus) -> ReportTaskResultRequest {
        let now = Utc::now();
        ReportTaskResultRequest {
            worker_id: worker_id.to_string(),
            previous_worker_id: None,
            status,
            output: Some("out".into()),
            error: None,
            exit_code: Some(0),
            started_at: now - chrono::Duration::milliseconds(250),
            finished_at: now,
        }
    }

    #[tokio::test]
    async fn test_register_rejects_zero_capacity() {
        let repos = InMemoryStore::new().repositories();
        let coordinator = coordinator(repos, MockRetryService::new());
        let err = coordinator
            .register_worker(register_request(0))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Validation(_)));
    }

    #[tokio::test]
    async fn test_heartbeat_unknown_worker_is_rejected() {
        let repos = InMemoryStore::new().repositories();
        let coordinator = coordinator(repos, MockRetryService::new());
        let ack = coordinator
            .heartbeat(
                "ghost",
                HeartbeatRequest {
                    current_load: 0,
                    status: WorkerStatus::Online,
                },
            )
            .await
            .unwrap();
        assert!(!ack.success);
    }

    #[tokio::test]
    async fn test_get_task_respects_capacity_and_request() {
        let repos = InMemoryStore::new().repositories();
        let coordinator = coordinator(repos.clone(), MockRetryService::new());
        let worker_id = coordinator
            .register_worker(register_request(3))
            .await
            .unwrap()
            .worker_id;
        for _ in 0..3 {
            assign_shell(&coordinator, &repos, "echo hi").await;
        }

        // Worker上报已在执行1个任务，最多还能拉取 3 - 1 = 2 个
        coordinator
            .heartbeat(
                &worker_id,
                HeartbeatRequest {
                    current_load: 1,
                    status: WorkerStatus::Online,
                },
            )
            .await
            .unwrap();
        let tasks = coordinator.get_task(&worker_id, 5).await.unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].command, "echo hi");
        assert_eq!(tasks[0].params.get("ENV").map(String::as_str), Some("test"));

        let schedule = repos
            .schedules
            .get_by_execution_id(&tasks[0].task_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(schedule.status, ScheduleStatus::Executing);
        assert!(schedule.executed_at.is_some());

        let rest = coordinator.get_task(&worker_id, 1).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert!(coordinator.get_task(&worker_id, 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_task_unknown_worker() {
        let repos = InMemoryStore::new().repositories();
        let coordinator = coordinator(repos, MockRetryService::new());
        let err = coordinator.get_task("ghost", 1).await.unwrap_err();
        assert!(matches!(err, SchedulerError::WorkerNotFound { .. }));
    }

    #[tokio::test]
    async fn test_report_success_releases_load() {
        let repos = InMemoryStore::new().repositories();
        let mut retry = MockRetryService::new();
        retry.expect_handle_failed_execution().never();
        let coordinator = coordinator(repos.clone(), retry);
        let worker_id = coordinator
            .register_worker(register_request(2))
            .await
            .unwrap()
            .worker_id;
        let task_id = assign_shell(&coordinator, &repos, "true").await;
        assert_eq!(coordinator.registry.get(&worker_id).await.unwrap().current_load, 1);
        coordinator.get_task(&worker_id, 2).await.unwrap();

        let ack = coordinator
            .report_task_result(&task_id, report(&worker_id, ExecutionStatus::Success))
            .await
            .unwrap();
        assert!(ack.success);

        let execution = repos.executions.get_by_id(&task_id).await.unwrap().unwrap();
        assert_eq!(execution.status, ExecutionStatus::Success);
        assert_eq!(execution.elapsed_ms, Some(250));
        assert_eq!(coordinator.registry.get(&worker_id).await.unwrap().current_load, 0);

        // 重复上报不改变状态
        let ack = coordinator
            .report_task_result(&task_id, report(&worker_id, ExecutionStatus::Failed))
            .await
            .unwrap();
        assert!(ack.success);
        let execution = repos.executions.get_by_id(&task_id).await.unwrap().unwrap();
        assert_eq!(execution.status, ExecutionStatus::Success);
    }

    #[tokio::test]
    async fn test_report_failure_triggers_retry() {
        let repos = InMemoryStore::new().repositories();
        let mut retry = MockRetryService::new();
        retry
            .expect_handle_failed_execution()
            .times(1)
            .returning(|_| Ok(None));
        let coordinator = coordinator(repos.clone(), retry);
        let worker_id = coordinator
            .register_worker(register_request(2))
            .await
            .unwrap()
            .worker_id;
        let task_id = assign_shell(&coordinator, &repos, "false").await;
        coordinator.get_task(&worker_id, 1).await.unwrap();

        let mut request = report(&worker_id, ExecutionStatus::Failed);
        request.exit_code = Some(1);
        coordinator
            .report_task_result(&task_id, request)
            .await
            .unwrap();

        let schedule = repos
            .schedules
            .get_by_execution_id(&task_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(schedule.status, ScheduleStatus::Failed);
    }

    #[tokio::test]
    async fn test_report_from_unknown_worker_is_rejected() {
        let repos = InMemoryStore::new().repositories();
        let coordinator = coordinator(repos, MockRetryService::new());
        let ack = coordinator
            .report_task_result("task", report("ghost", ExecutionStatus::Success))
            .await
            .unwrap();
        assert!(!ack.success);
    }

    #[tokio::test]
    async fn test_get_task_fails_stale_assignments_and_frees_capacity() {
        let repos = InMemoryStore::new().repositories();
        let coordinator = coordinator(repos.clone(), MockRetryService::new());
        let worker_id = coordinator
            .register_worker(register_request(1))
            .await
            .unwrap()
            .worker_id;

        let stale_task = assign_shell(&coordinator, &repos, "true").await;
        let stale = repos.executions.get_by_id(&stale_task).await.unwrap().unwrap();
        repos.jobs.delete(stale.job_id).await.unwrap();
        assert!(coordinator.registry.select_and_reserve().await.is_none());

        assert!(coordinator.get_task(&worker_id, 1).await.unwrap().is_empty());
        let execution = repos.executions.get_by_id(&stale_task).await.unwrap().unwrap();
        assert_eq!(execution.status, ExecutionStatus::Failed);
        let schedule = repos
            .schedules
            .get_by_execution_id(&stale_task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(schedule.status, ScheduleStatus::Failed);
        assert_eq!(coordinator.registry.get(&worker_id).await.unwrap().current_load, 0);

        // 非shell任务同样不会占住名额
        let http = Job::new(
            "hook",
            "0 * * * * *",
            JobTarget::Http(scheduler_core::models::HttpTarget {
                url: "http://localhost/hook".into(),
                method: "POST".into(),
                body: None,
                headers: HashMap::new(),
            }),
        );
        let http_task = assign_job(&coordinator, &repos, http).await;
        assert!(coordinator.get_task(&worker_id, 1).await.unwrap().is_empty());
        let execution = repos.executions.get_by_id(&http_task).await.unwrap().unwrap();
        assert_eq!(execution.status, ExecutionStatus::Failed);

        let live_task = assign_shell(&coordinator, &repos, "echo live").await;
        let tasks = coordinator.get_task(&worker_id, 1).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].task_id, live_task);
    }

    #[tokio::test]
    async fn test_report_from_other_worker_is_rejected() {
        let repos = InMemoryStore::new().repositories();
        let mut retry = MockRetryService::new();
        retry.expect_handle_failed_execution().never();
        let coordinator = coordinator(repos.clone(), retry);
        let owner = coordinator
            .register_worker(register_request(1))
            .await
            .unwrap()
            .worker_id;
        let task_id = assign_shell(&coordinator, &repos, "true").await;
        let other = coordinator
            .register_worker(register_request(1))
            .await
            .unwrap()
            .worker_id;

        // 任务尚未被拉取，任何Worker都不能上报
        let err = coordinator
            .report_task_result(&task_id, report(&owner, ExecutionStatus::Success))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Validation(_)));

        coordinator.get_task(&owner, 1).await.unwrap();
        let err = coordinator
            .report_task_result(&task_id, report(&other, ExecutionStatus::Success))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Validation(_)));

        // 原Worker仍在线时不能借重新绑定接管
        let mut request = report(&other, ExecutionStatus::Success);
        request.previous_worker_id = Some(owner.clone());
        assert!(coordinator.report_task_result(&task_id, request).await.is_err());

        let execution = repos.executions.get_by_id(&task_id).await.unwrap().unwrap();
        assert_eq!(execution.status, ExecutionStatus::Running);
        assert_eq!(coordinator.registry.get(&owner).await.unwrap().current_load, 1);
        assert_eq!(coordinator.registry.get(&other).await.unwrap().current_load, 0);
    }

    #[tokio::test]
    async fn test_report_rebinds_task_of_forgotten_worker() {
        let repos = InMemoryStore::new().repositories();
        let coordinator = coordinator(repos.clone(), MockRetryService::new());
        let job = repos.jobs.create(&shell_job("true")).await.unwrap();
        let mut schedule = Schedule::new(job.id, Utc::now());
        let mut execution = Execution::new(&schedule.id, job.id, Some("forgotten".into()));
        execution.mark_running().unwrap();
        repos.executions.create(&execution).await.unwrap();
        schedule
            .assign(Some("forgotten".into()), execution.id.clone())
            .unwrap();
        schedule.advance(ScheduleStatus::Executing).unwrap();
        repos.schedules.create(&schedule).await.unwrap();

        let new_id = coordinator
            .register_worker(register_request(1))
            .await
            .unwrap()
            .worker_id;
        let mut request = report(&new_id, ExecutionStatus::Success);
        request.previous_worker_id = Some("forgotten".into());
        let ack = coordinator
            .report_task_result(&execution.id, request)
            .await
            .unwrap();
        assert!(ack.success);

        let stored = repos.executions.get_by_id(&execution.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Success);
        assert_eq!(stored.worker_id.as_deref(), Some(new_id.as_str()));
        assert_eq!(coordinator.registry.get(&new_id).await.unwrap().current_load, 0);
    }
}
