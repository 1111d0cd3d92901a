use async_trait::async_trait;

use crate::models::{
    Ack, AssignedTask, HeartbeatRequest, RegisterWorkerRequest, RegisterWorkerResponse,
    ReportTaskResultRequest,
};
use crate::SchedulerResult;

/// 调度中心面向Worker的接口
///
/// 调度中心进程内直接实现，Worker侧通过HTTP客户端实现，
/// 两端因此可以在测试中直接对接。
#[async_trait]
pub trait CoordinatorApi: Send + Sync {
    async fn register_worker(
        &self,
        request: RegisterWorkerRequest,
    ) -> SchedulerResult<RegisterWorkerResponse>;

    /// 未知Worker返回 `Ack { success: false }`
    async fn heartbeat(&self, worker_id: &str, request: HeartbeatRequest) -> SchedulerResult<Ack>;

    /// 拉取分配给该Worker的任务，未知Worker返回 `WorkerNotFound`
    async fn get_task(
        &self,
        worker_id: &str,
        available_capacity: u32,
    ) -> SchedulerResult<Vec<AssignedTask>>;

    async fn report_task_result(
        &self,
        task_id: &str,
        request: ReportTaskResultRequest,
    ) -> SchedulerResult<Ack>;
}
