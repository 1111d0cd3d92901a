pub mod coordinator;
pub mod repository;

pub use coordinator::CoordinatorApi;
pub use repository::{
    ExecutionRepository, JobRepository, Repositories, ScheduleRepository, WorkerRepository,
};
