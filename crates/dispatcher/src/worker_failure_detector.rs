use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use scheduler_core::{models::WorkerStatus, traits::WorkerRepository, DispatcherConfig};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::registry::WorkerRegistry;

/// Worker失效检测配置
#[derive(Debug, Clone)]
pub struct WorkerFailureDetectorConfig {
    /// 心跳超时时间（秒）
    pub heartbeat_timeout_seconds: i64,
    /// 检测间隔（秒）
    pub detection_interval_seconds: u64,
}

impl Default for WorkerFailureDetectorConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_seconds: 20,
            detection_interval_seconds: 10,
        }
    }
}

impl From<&DispatcherConfig> for WorkerFailureDetectorConfig {
    fn from(config: &DispatcherConfig) -> Self {
        Self {
            heartbeat_timeout_seconds: config.heartbeat_timeout_seconds(),
            detection_interval_seconds: config.heartbeat_interval_seconds,
        }
    }
}

/// Worker失效检测器
///
/// 每个心跳周期扫描一次注册表，心跳超时的Worker标记为OFFLINE，
/// 之后不会再被选中，直到它重新发送心跳。
pub struct WorkerFailureDetector {
    registry: Arc<WorkerRegistry>,
    worker_repo: Arc<dyn WorkerRepository>,
    config: WorkerFailureDetectorConfig,
}

impl WorkerFailureDetector {
    pub fn new(
        registry: Arc<WorkerRegistry>,
        worker_repo: Arc<dyn WorkerRepository>,
        config: WorkerFailureDetectorConfig,
    ) -> Self {
        Self {
            registry,
            worker_repo,
            config,
        }
    }

    /// 检测一次失效的Worker，返回本次被标记为离线的Worker ID
    pub async fn detect_failed_workers(&self, now: DateTime<Utc>) -> Vec<String> {
        debug!("开始检测失效的Worker");
        let offline = self
            .registry
            .mark_stale_offline(now, self.config.heartbeat_timeout_seconds)
            .await;

        for worker_id in &offline {
            warn!(
                "Worker {} 心跳超过 {} 秒，标记为离线",
                worker_id, self.config.heartbeat_timeout_seconds
            );
            if let Err(e) = self
                .worker_repo
                .update_status(worker_id, WorkerStatus::Offline)
                .await
            {
                error!("更新失效Worker {} 状态失败: {}", worker_id, e);
            }
        }

        if !offline.is_empty() {
            metrics::counter!("scheduler_workers_offline_total").increment(offline.len() as u64);
            info!("检测到 {} 个失效Worker", offline.len());
        }
        offline
    }

    pub async fn run(self, cancel: CancellationToken) {
        info!(
            "启动Worker失效检测，间隔 {} 秒，超时 {} 秒",
            self.config.detection_interval_seconds, self.config.heartbeat_timeout_seconds
        );
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.detection_interval_seconds.max(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    self.detect_failed_workers(Utc::now()).await;
                }
            }
        }
        info!("Worker失效检测已停止");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scheduler_core::models::WorkerInfo;
    use scheduler_infrastructure::InMemoryStore;

    #[test]
    fn test_config_follows_heartbeat_interval() {
        let config = WorkerFailureDetectorConfig::from(&DispatcherConfig {
            heartbeat_interval_seconds: 15,
            ..Default::default()
        });
        assert_eq!(config.detection_interval_seconds, 15);
        assert_eq!(config.heartbeat_timeout_seconds, 30);
    }

    #[tokio::test]
    async fn test_detect_marks_store_offline() {
        let store = InMemoryStore::new();
        let repos = store.repositories();
        let registry = Arc::new(WorkerRegistry::new());
        let now = Utc::now();

        let mut stale = WorkerInfo::new("stale", "stale", "127.0.0.1", 2);
        stale.last_heartbeat = now - chrono::Duration::seconds(25);
        let live = WorkerInfo::new("live", "live", "127.0.0.1", 2);
        for worker in [stale, live] {
            repos.workers.create(&worker).await.unwrap();
            registry.register(worker).await;
        }

        let detector = WorkerFailureDetector::new(
            registry.clone(),
            repos.workers.clone(),
            WorkerFailureDetectorConfig::default(),
        );
        assert_eq!(detector.detect_failed_workers(now).await, vec!["stale".to_string()]);

        let stored = repos.workers.get_by_id("stale").await.unwrap().unwrap();
        assert_eq!(stored.status, WorkerStatus::Offline);
        assert_eq!(
            registry.get("live").await.unwrap().status,
            WorkerStatus::Online
        );
        assert!(detector.detect_failed_workers(now).await.is_empty());
    }
}
