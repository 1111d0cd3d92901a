use std::sync::Arc;

use scheduler_core::{
    models::{HeartbeatRequest, WorkerStatus},
    traits::CoordinatorApi,
    SchedulerResult,
};
use tracing::{debug, warn};

use super::{TaskExecutionManager, WorkerLifecycle};

pub struct HeartbeatManager {
    client: Arc<dyn CoordinatorApi>,
    lifecycle: Arc<WorkerLifecycle>,
    tasks: Arc<TaskExecutionManager>,
    capacity: u32,
}

impl HeartbeatManager {
    pub fn new(
        client: Arc<dyn CoordinatorApi>,
        lifecycle: Arc<WorkerLifecycle>,
        tasks: Arc<TaskExecutionManager>,
        capacity: u32,
    ) -> Self {
        Self {
            client,
            lifecycle,
            tasks,
            capacity,
        }
    }

    /// 发送一次心跳，调度中心不认识当前Worker时重新注册
    pub async fn send_heartbeat(&self) -> SchedulerResult<()> {
        let worker_id = self.lifecycle.ensure_registered().await?;
        let current_load = self.tasks.running_count().await;
        let status = if current_load >= self.capacity {
            WorkerStatus::Busy
        } else {
            WorkerStatus::Online
        };

        let ack = self
            .client
            .heartbeat(
                &worker_id,
                HeartbeatRequest {
                    current_load,
                    status,
                },
            )
            .await?;
        if ack.success {
            debug!("心跳发送成功: 负载 {}/{}", current_load, self.capacity);
        } else {
            warn!(
                "心跳被拒绝: {}",
                ack.message.as_deref().unwrap_or("未注册")
            );
            self.lifecycle.reregister(&worker_id).await?;
        }
        Ok(())
    }
}
