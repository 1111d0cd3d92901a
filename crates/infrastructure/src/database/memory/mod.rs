mod execution_repository;
mod job_repository;
mod schedule_repository;
mod worker_repository;

use std::sync::Arc;

use scheduler_core::traits::Repositories;

pub use execution_repository::InMemoryExecutionRepository;
pub use job_repository::InMemoryJobRepository;
pub use schedule_repository::InMemoryScheduleRepository;
pub use worker_repository::InMemoryWorkerRepository;

/// 内存存储，持有四个仓储的共享实例
#[derive(Clone, Default)]
pub struct InMemoryStore {
    pub jobs: Arc<InMemoryJobRepository>,
    pub schedules: Arc<InMemoryScheduleRepository>,
    pub executions: Arc<InMemoryExecutionRepository>,
    pub workers: Arc<InMemoryWorkerRepository>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn repositories(&self) -> Repositories {
        Repositories {
            jobs: self.jobs.clone(),
            schedules: self.schedules.clone(),
            executions: self.executions.clone(),
            workers: self.workers.clone(),
        }
    }
}
