use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scheduler_core::{
    models::{Schedule, ScheduleStatus},
    traits::ScheduleRepository,
    SchedulerError, SchedulerResult,
};
use tokio::sync::RwLock;

#[derive(Default)]
pub struct InMemoryScheduleRepository {
    rows: RwLock<HashMap<String, Schedule>>,
}

impl InMemoryScheduleRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前保存的全部调度实例
    pub async fn all(&self) -> Vec<Schedule> {
        let mut schedules: Vec<Schedule> = self.rows.read().await.values().cloned().collect();
        sort_by_time(&mut schedules);
        schedules
    }
}

fn sort_by_time(schedules: &mut [Schedule]) {
    schedules.sort_by(|a, b| {
        a.next_attempt_at
            .cmp(&b.next_attempt_at)
            .then(a.created_at.cmp(&b.created_at))
    });
}

#[async_trait]
impl ScheduleRepository for InMemoryScheduleRepository {
    async fn create(&self, schedule: &Schedule) -> SchedulerResult<Schedule> {
        let mut rows = self.rows.write().await;
        if rows.contains_key(&schedule.id) {
            return Err(SchedulerError::Database(format!(
                "调度实例已存在: {}",
                schedule.id
            )));
        }
        rows.insert(schedule.id.clone(), schedule.clone());
        Ok(schedule.clone())
    }

    async fn get_by_id(&self, id: &str) -> SchedulerResult<Option<Schedule>> {
        Ok(self.rows.read().await.get(id).cloned())
    }

    async fn update(&self, schedule: &Schedule) -> SchedulerResult<()> {
        let mut rows = self.rows.write().await;
        match rows.get_mut(&schedule.id) {
            Some(row) => {
                *row = schedule.clone();
                Ok(())
            }
            None => Err(SchedulerError::ScheduleNotFound {
                id: schedule.id.clone(),
            }),
        }
    }

    async fn get_by_worker_and_status(
        &self,
        worker_id: &str,
        status: ScheduleStatus,
        limit: usize,
    ) -> SchedulerResult<Vec<Schedule>> {
        let mut schedules: Vec<Schedule> = self
            .rows
            .read()
            .await
            .values()
            .filter(|s| s.status == status && s.worker_id.as_deref() == Some(worker_id))
            .cloned()
            .collect();
        sort_by_time(&mut schedules);
        schedules.truncate(limit);
        Ok(schedules)
    }

    async fn get_due_pending(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> SchedulerResult<Vec<Schedule>> {
        let mut schedules: Vec<Schedule> = self
            .rows
            .read()
            .await
            .values()
            .filter(|s| s.is_due(now))
            .cloned()
            .collect();
        sort_by_time(&mut schedules);
        schedules.truncate(limit);
        Ok(schedules)
    }

    async fn get_by_execution_id(&self, execution_id: &str) -> SchedulerResult<Option<Schedule>> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .find(|s| s.execution_id.as_deref() == Some(execution_id))
            .cloned())
    }

    async fn claim_pending(
        &self,
        id: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> SchedulerResult<Option<Schedule>> {
        let mut rows = self.rows.write().await;
        match rows.get_mut(id) {
            Some(row) if row.is_due(now) => {
                row.defer_until(lease_until);
                Ok(Some(row.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn delete_finished_before(&self, cutoff: DateTime<Utc>) -> SchedulerResult<u64> {
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|_, s| !(s.status.is_terminal() && s.created_at < cutoff));
        Ok((before - rows.len()) as u64)
    }
}
