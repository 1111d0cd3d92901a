use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use scheduler_core::{models::Job, traits::JobRepository, SchedulerError, SchedulerResult};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Default)]
pub struct InMemoryJobRepository {
    inner: RwLock<JobTable>,
}

#[derive(Default)]
struct JobTable {
    next_id: i64,
    rows: BTreeMap<i64, Job>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn create(&self, job: &Job) -> SchedulerResult<Job> {
        let mut table = self.inner.write().await;
        let mut created = job.clone();
        if created.id <= 0 {
            table.next_id += 1;
            created.id = table.next_id;
        } else {
            table.next_id = table.next_id.max(created.id);
        }
        if table.rows.contains_key(&created.id) {
            return Err(SchedulerError::Database(format!(
                "任务ID已存在: {}",
                created.id
            )));
        }
        table.rows.insert(created.id, created.clone());
        debug!("创建任务成功: {} ({})", created.name, created.id);
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Job>> {
        Ok(self.inner.read().await.rows.get(&id).cloned())
    }

    async fn list(&self) -> SchedulerResult<Vec<Job>> {
        Ok(self.inner.read().await.rows.values().cloned().collect())
    }

    async fn update(&self, job: &Job) -> SchedulerResult<()> {
        let mut table = self.inner.write().await;
        match table.rows.get_mut(&job.id) {
            Some(row) => {
                *row = job.clone();
                row.updated_at = Utc::now();
                Ok(())
            }
            None => Err(SchedulerError::JobNotFound { id: job.id }),
        }
    }

    async fn delete(&self, id: i64) -> SchedulerResult<()> {
        match self.inner.write().await.rows.remove(&id) {
            Some(_) => Ok(()),
            None => Err(SchedulerError::JobNotFound { id }),
        }
    }

    async fn update_enabled(&self, id: i64, enabled: bool) -> SchedulerResult<()> {
        let mut table = self.inner.write().await;
        let row = table
            .rows
            .get_mut(&id)
            .ok_or(SchedulerError::JobNotFound { id })?;
        row.enabled = enabled;
        row.updated_at = Utc::now();
        Ok(())
    }
}
