pub mod database;

pub use database::memory::{
    InMemoryExecutionRepository, InMemoryJobRepository, InMemoryScheduleRepository,
    InMemoryStore, InMemoryWorkerRepository,
};
