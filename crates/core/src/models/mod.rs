pub mod execution;
pub mod job;
pub mod protocol;
pub mod schedule;
pub mod worker;

pub use execution::{
    truncate_output, Execution, ExecutionOutcome, ExecutionStatus, JobResult, WorkResult,
    TRUNCATED_MARKER,
};
pub use job::{
    CallbackProtocol, DispatchTarget, HttpTarget, Job, JobTarget, RpcTarget, ShellTarget,
    DEFAULT_JOB_TIMEOUT_SECONDS, MAX_JOB_TIMEOUT_SECONDS, MAX_RETRY_INTERVAL_SECONDS,
};
pub use protocol::{
    Ack, AssignedTask, GetTaskRequest, HeartbeatRequest, RegisterWorkerRequest,
    RegisterWorkerResponse, ReportTaskResultRequest,
};
pub use schedule::{Schedule, ScheduleStatus};
pub use worker::{WorkerInfo, WorkerStatus};
