use scheduler_core::{
    models::{ExecutionStatus, ScheduleStatus, WorkResult},
    traits::Repositories,
    SchedulerError, SchedulerResult,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// 本地执行池的结果处理器
///
/// 把执行池产出的结果写回执行记录，并把调度实例推进到终态。
pub struct ResultProcessor {
    repos: Repositories,
}

impl ResultProcessor {
    pub fn new(repos: Repositories) -> Self {
        Self { repos }
    }

    pub async fn process(&self, work: WorkResult) -> SchedulerResult<()> {
        let WorkResult {
            schedule,
            job,
            result,
        } = work;

        let mut schedule = self
            .repos
            .schedules
            .get_by_id(&schedule.id)
            .await?
            .ok_or_else(|| SchedulerError::ScheduleNotFound {
                id: schedule.id.clone(),
            })?;
        let execution_id = schedule.execution_id.clone().ok_or_else(|| {
            SchedulerError::Internal(format!("调度实例 {} 没有关联执行记录", schedule.id))
        })?;
        let mut execution = self
            .repos
            .executions
            .get_by_id(&execution_id)
            .await?
            .ok_or(SchedulerError::ExecutionNotFound { id: execution_id })?;

        if execution.status.is_terminal() {
            debug!("执行 {} 已是终态 {}，忽略重复结果", execution.id, execution.status);
            return Ok(());
        }

        let status = result.execution_status();
        execution.finish(status, result.into_outcome())?;
        self.repos.executions.update(&execution).await?;

        let schedule_status = if status == ExecutionStatus::Success {
            ScheduleStatus::Completed
        } else {
            ScheduleStatus::Failed
        };
        if !schedule.status.is_terminal() {
            schedule.advance(schedule_status)?;
            self.repos.schedules.update(&schedule).await?;
        }

        metrics::counter!("scheduler_executions_total", "outcome" => status.as_str())
            .increment(1);
        match status {
            ExecutionStatus::Success => info!(
                "任务 {} ({}) 执行成功，耗时 {}ms",
                job.id,
                job.name,
                execution.elapsed_ms.unwrap_or_default()
            ),
            _ => warn!(
                "任务 {} ({}) 执行结束: {}，错误: {}",
                job.id,
                job.name,
                status,
                execution.error.as_deref().unwrap_or("-")
            ),
        }
        Ok(())
    }

    /// 消费HTTP与RPC两个执行池的结果，两个通道都关闭后返回
    pub async fn run(
        self,
        mut http_results: mpsc::Receiver<WorkResult>,
        mut rpc_results: mpsc::Receiver<WorkResult>,
    ) {
        let mut http_open = true;
        let mut rpc_open = true;
        while http_open || rpc_open {
            let work = tokio::select! {
                work = http_results.recv(), if http_open => match work {
                    Some(work) => work,
                    None => {
                        http_open = false;
                        continue;
                    }
                },
                work = rpc_results.recv(), if rpc_open => match work {
                    Some(work) => work,
                    None => {
                        rpc_open = false;
                        continue;
                    }
                },
            };
            let schedule_id = work.schedule.id.clone();
            if let Err(e) = self.process(work).await {
                error!("处理调度实例 {} 的执行结果失败: {}", schedule_id, e);
            }
        }
        info!("结果处理器已停止");
    }
}
