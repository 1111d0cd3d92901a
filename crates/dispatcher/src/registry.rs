//! Worker注册表
//!
//! 注册表是内存中Worker状态的唯一持有者，所有修改都通过下面的原子操作完成。
//! 选择与负载预占在同一个写锁内完成，因此并发调度不会让负载超过容量。
//!
//! `current_load` = 最近上报的负载 + 已分配但Worker尚未拉取的预占数。
//! 心跳只覆盖前者，未拉取的预占在拉取或取消之前一直计入负载。

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use scheduler_core::models::{WorkerInfo, WorkerStatus};
use tokio::sync::RwLock;
use tracing::debug;

struct RegistryEntry {
    info: WorkerInfo,
    /// 注册顺序，负载相同时先注册者优先
    seq: u64,
    /// 最近一次心跳上报的负载
    reported_load: u32,
    /// 已分配但尚未被Worker拉取的任务数
    unpulled: u32,
}

#[derive(Default)]
struct RegistryState {
    workers: HashMap<String, RegistryEntry>,
    next_seq: u64,
}

#[derive(Default)]
pub struct WorkerRegistry {
    state: RwLock<RegistryState>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, mut worker: WorkerInfo) {
        worker.current_load = worker.current_load.min(worker.capacity);
        let mut state = self.state.write().await;
        state.next_seq += 1;
        let seq = state.next_seq;
        debug!("Worker {} 加入注册表 (容量 {})", worker.id, worker.capacity);
        state.workers.insert(
            worker.id.clone(),
            RegistryEntry {
                reported_load: worker.current_load,
                info: worker,
                seq,
                unpulled: 0,
            },
        );
    }

    /// 记录心跳，返回更新后的Worker；未知Worker返回 None
    pub async fn heartbeat(
        &self,
        worker_id: &str,
        current_load: u32,
        status: WorkerStatus,
        now: DateTime<Utc>,
    ) -> Option<WorkerInfo> {
        let mut state = self.state.write().await;
        let entry = state.workers.get_mut(worker_id)?;
        let capacity = entry.info.capacity;
        entry.reported_load = current_load.min(capacity);
        entry.info.current_load = (entry.reported_load + entry.unpulled).min(capacity);
        entry.info.last_heartbeat = now;
        if entry.info.status != WorkerStatus::Maintenance {
            entry.info.status = match status {
                WorkerStatus::Offline => WorkerStatus::Offline,
                _ if entry.info.current_load >= capacity => WorkerStatus::Busy,
                _ => WorkerStatus::Online,
            };
        }
        Some(entry.info.clone())
    }

    /// 选择负载最低的在线Worker并预占一个负载
    pub async fn select_and_reserve(&self) -> Option<WorkerInfo> {
        let mut state = self.state.write().await;
        let entry = state
            .workers
            .values_mut()
            .filter(|entry| entry.info.can_accept_task())
            .min_by_key(|entry| (entry.info.current_load, entry.seq))?;
        entry.info.current_load += 1;
        entry.unpulled += 1;
        debug!(
            "选择Worker {} (负载 {}/{})",
            entry.info.id, entry.info.current_load, entry.info.capacity
        );
        Some(entry.info.clone())
    }

    /// Worker拉取了 `count` 个已分配的任务，之后由心跳上报负责这部分负载
    pub async fn mark_pulled(&self, worker_id: &str, count: u32) {
        let mut state = self.state.write().await;
        if let Some(entry) = state.workers.get_mut(worker_id) {
            entry.unpulled = entry.unpulled.saturating_sub(count);
        }
    }

    /// 撤销一个尚未被拉取的预占
    pub async fn cancel_reservation(&self, worker_id: &str) {
        let mut state = self.state.write().await;
        if let Some(entry) = state.workers.get_mut(worker_id) {
            entry.unpulled = entry.unpulled.saturating_sub(1);
            entry.info.current_load = entry.info.current_load.saturating_sub(1);
            entry.reported_load = entry.reported_load.min(entry.info.current_load);
        }
    }

    /// 已拉取的任务结束，释放一个负载，不会低于0
    pub async fn release(&self, worker_id: &str) {
        let mut state = self.state.write().await;
        if let Some(entry) = state.workers.get_mut(worker_id) {
            entry.info.current_load = entry.info.current_load.saturating_sub(1);
            entry.reported_load = entry.reported_load.min(entry.info.current_load);
        }
    }

    /// 把心跳超时的在线Worker标记为离线，返回被标记的Worker ID
    pub async fn mark_stale_offline(&self, now: DateTime<Utc>, timeout_seconds: i64) -> Vec<String> {
        let mut state = self.state.write().await;
        let mut stale = Vec::new();
        for entry in state.workers.values_mut() {
            if entry.info.is_alive() && entry.info.is_heartbeat_expired(now, timeout_seconds) {
                entry.info.status = WorkerStatus::Offline;
                stale.push(entry.info.id.clone());
            }
        }
        stale
    }

    pub async fn get(&self, worker_id: &str) -> Option<WorkerInfo> {
        self.state
            .read()
            .await
            .workers
            .get(worker_id)
            .map(|entry| entry.info.clone())
    }

    /// 按注册顺序列出所有Worker
    pub async fn list(&self) -> Vec<WorkerInfo> {
        let state = self.state.read().await;
        let mut entries: Vec<&RegistryEntry> = state.workers.values().collect();
        entries.sort_by_key(|entry| entry.seq);
        entries.into_iter().map(|entry| entry.info.clone()).collect()
    }

    /// Worker本次最多还能拉取的任务数：容量减去最近上报的负载
    pub async fn pull_limit(&self, worker_id: &str) -> Option<u32> {
        self.state
            .read()
            .await
            .workers
            .get(worker_id)
            .map(|entry| entry.info.capacity.saturating_sub(entry.reported_load))
    }
}
