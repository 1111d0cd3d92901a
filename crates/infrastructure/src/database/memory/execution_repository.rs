use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scheduler_core::{
    models::{Execution, ExecutionStatus},
    traits::ExecutionRepository,
    SchedulerError, SchedulerResult,
};
use tokio::sync::RwLock;

#[derive(Default)]
pub struct InMemoryExecutionRepository {
    rows: RwLock<HashMap<String, Execution>>,
}

impl InMemoryExecutionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionRepository for InMemoryExecutionRepository {
    async fn create(&self, execution: &Execution) -> SchedulerResult<Execution> {
        let mut rows = self.rows.write().await;
        if rows.contains_key(&execution.id) {
            return Err(SchedulerError::Database(format!(
                "执行记录已存在: {}",
                execution.id
            )));
        }
        rows.insert(execution.id.clone(), execution.clone());
        Ok(execution.clone())
    }

    async fn get_by_id(&self, id: &str) -> SchedulerResult<Option<Execution>> {
        Ok(self.rows.read().await.get(id).cloned())
    }

    async fn update(&self, execution: &Execution) -> SchedulerResult<()> {
        let mut rows = self.rows.write().await;
        match rows.get_mut(&execution.id) {
            Some(row) => {
                *row = execution.clone();
                Ok(())
            }
            None => Err(SchedulerError::ExecutionNotFound {
                id: execution.id.clone(),
            }),
        }
    }

    async fn count_by_job_and_status(
        &self,
        job_id: i64,
        statuses: &[ExecutionStatus],
        exclude_id: Option<&str>,
    ) -> SchedulerResult<u32> {
        let count = self
            .rows
            .read()
            .await
            .values()
            .filter(|e| e.job_id == job_id && statuses.contains(&e.status))
            .filter(|e| Some(e.id.as_str()) != exclude_id)
            .count();
        Ok(count as u32)
    }

    async fn list_by_job(&self, job_id: i64, limit: usize) -> SchedulerResult<Vec<Execution>> {
        let mut executions: Vec<Execution> = self
            .rows
            .read()
            .await
            .values()
            .filter(|e| e.job_id == job_id)
            .cloned()
            .collect();
        executions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        executions.truncate(limit);
        Ok(executions)
    }

    async fn delete_finished_before(&self, cutoff: DateTime<Utc>) -> SchedulerResult<u64> {
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|_, e| !(e.status.is_terminal() && e.created_at < cutoff));
        Ok((before - rows.len()) as u64)
    }
}
