use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use scheduler_core::{
    models::RegisterWorkerRequest, traits::CoordinatorApi, SchedulerResult, WorkerConfig,
};

/// Worker在调度中心的注册状态
///
/// 调度中心重启或把Worker清理后，心跳和拉取会收到“未注册”应答，
/// 此时通过 `reregister` 重新注册并换用新的Worker ID。
pub struct WorkerLifecycle {
    client: Arc<dyn CoordinatorApi>,
    config: WorkerConfig,
    worker_id: RwLock<Option<String>>,
    register_lock: Mutex<()>,
}

impl WorkerLifecycle {
    pub fn new(client: Arc<dyn CoordinatorApi>, config: WorkerConfig) -> Self {
        Self {
            client,
            config,
            worker_id: RwLock::new(None),
            register_lock: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub async fn worker_id(&self) -> Option<String> {
        self.worker_id.read().await.clone()
    }

    /// 当前的Worker ID，尚未注册时先注册
    pub async fn ensure_registered(&self) -> SchedulerResult<String> {
        if let Some(id) = self.worker_id().await {
            return Ok(id);
        }
        let _guard = self.register_lock.lock().await;
        if let Some(id) = self.worker_id().await {
            return Ok(id);
        }
        self.register_locked().await
    }

    /// 调度中心不认识 `stale_id` 时重新注册；其他协程已完成重新注册则直接返回新ID
    pub async fn reregister(&self, stale_id: &str) -> SchedulerResult<String> {
        let _guard = self.register_lock.lock().await;
        if let Some(id) = self.worker_id().await {
            if id != stale_id {
                return Ok(id);
            }
        }
        warn!("Worker {} 未被调度中心识别，重新注册", stale_id);
        self.register_locked().await
    }

    async fn register_locked(&self) -> SchedulerResult<String> {
        let response = self.client.register_worker(self.register_request()).await?;
        info!(
            "Worker {} 注册成功，ID: {}，容量: {}",
            self.config.name, response.worker_id, self.config.capacity
        );
        *self.worker_id.write().await = Some(response.worker_id.clone());
        Ok(response.worker_id)
    }

    fn register_request(&self) -> RegisterWorkerRequest {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());
        let address = if self.config.address.is_empty() {
            hostname.clone()
        } else {
            self.config.address.clone()
        };

        let mut metadata = HashMap::new();
        metadata.insert("hostname".to_string(), hostname);
        metadata.insert("version".to_string(), env!("CARGO_PKG_VERSION").to_string());

        RegisterWorkerRequest {
            name: self.config.name.clone(),
            address,
            capacity: self.config.capacity,
            metadata,
        }
    }
}
