use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scheduler_core::{
    models::{WorkerInfo, WorkerStatus},
    traits::WorkerRepository,
    SchedulerError, SchedulerResult,
};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Default)]
pub struct InMemoryWorkerRepository {
    rows: RwLock<HashMap<String, WorkerInfo>>,
}

impl InMemoryWorkerRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkerRepository for InMemoryWorkerRepository {
    async fn create(&self, worker: &WorkerInfo) -> SchedulerResult<WorkerInfo> {
        self.rows
            .write()
            .await
            .insert(worker.id.clone(), worker.clone());
        debug!("注册Worker成功: {}", worker.id);
        Ok(worker.clone())
    }

    async fn get_by_id(&self, id: &str) -> SchedulerResult<Option<WorkerInfo>> {
        Ok(self.rows.read().await.get(id).cloned())
    }

    async fn update_status(&self, id: &str, status: WorkerStatus) -> SchedulerResult<()> {
        let mut rows = self.rows.write().await;
        let row = rows
            .get_mut(id)
            .ok_or_else(|| SchedulerError::WorkerNotFound { id: id.to_string() })?;
        row.status = status;
        Ok(())
    }

    async fn update_heartbeat(
        &self,
        id: &str,
        heartbeat_time: DateTime<Utc>,
        current_load: u32,
    ) -> SchedulerResult<()> {
        let mut rows = self.rows.write().await;
        let row = rows
            .get_mut(id)
            .ok_or_else(|| SchedulerError::WorkerNotFound { id: id.to_string() })?;
        row.last_heartbeat = heartbeat_time;
        row.current_load = current_load.min(row.capacity);
        Ok(())
    }

    async fn list(&self) -> SchedulerResult<Vec<WorkerInfo>> {
        let mut workers: Vec<WorkerInfo> = self.rows.read().await.values().cloned().collect();
        workers.sort_by(|a, b| a.registered_at.cmp(&b.registered_at));
        Ok(workers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_heartbeat_clamps_load() {
        let repo = InMemoryWorkerRepository::new();
        repo.create(&WorkerInfo::new("w1", "n", "a", 3)).await.unwrap();
        repo.update_heartbeat("w1", Utc::now(), 10).await.unwrap();
        assert_eq!(repo.get_by_id("w1").await.unwrap().unwrap().current_load, 3);

        assert!(repo.update_heartbeat("nope", Utc::now(), 1).await.is_err());
    }

    #[tokio::test]
    async fn test_update_status() {
        let repo = InMemoryWorkerRepository::new();
        repo.create(&WorkerInfo::new("w1", "n", "a", 3)).await.unwrap();
        repo.update_status("w1", WorkerStatus::Offline).await.unwrap();
        let worker = repo.get_by_id("w1").await.unwrap().unwrap();
        assert_eq!(worker.status, WorkerStatus::Offline);
    }
}
