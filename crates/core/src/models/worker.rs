use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Worker节点信息
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerInfo {
    pub id: String,
    pub name: String,
    pub address: String,
    pub capacity: u32,
    pub current_load: u32,
    pub status: WorkerStatus,
    pub last_heartbeat: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Worker状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum WorkerStatus {
    #[serde(rename = "ONLINE")]
    Online,
    #[serde(rename = "BUSY")]
    Busy,
    #[serde(rename = "OFFLINE")]
    Offline,
    #[serde(rename = "MAINTENANCE")]
    Maintenance,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Online => "ONLINE",
            WorkerStatus::Busy => "BUSY",
            WorkerStatus::Offline => "OFFLINE",
            WorkerStatus::Maintenance => "MAINTENANCE",
        }
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl WorkerInfo {
    /// 创建新的Worker信息
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        address: impl Into<String>,
        capacity: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            address: address.into(),
            capacity,
            current_load: 0,
            status: WorkerStatus::Online,
            last_heartbeat: now,
            registered_at: now,
            metadata: HashMap::new(),
        }
    }

    /// 检查Worker是否在线（忙碌也算在线）
    pub fn is_alive(&self) -> bool {
        matches!(self.status, WorkerStatus::Online | WorkerStatus::Busy)
    }

    /// 检查Worker是否可以接受新任务
    pub fn can_accept_task(&self) -> bool {
        self.is_alive() && self.current_load < self.capacity
    }

    /// 获取Worker负载率
    pub fn load_percentage(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            (self.current_load as f64 / self.capacity as f64) * 100.0
        }
    }

    /// 检查心跳是否超时
    pub fn is_heartbeat_expired(&self, now: DateTime<Utc>, timeout_seconds: i64) -> bool {
        (now - self.last_heartbeat).num_seconds() > timeout_seconds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_can_accept_task() {
        let mut worker = WorkerInfo::new("w1", "node-1", "10.0.0.1:9000", 2);
        assert!(worker.can_accept_task());

        worker.current_load = 2;
        assert!(!worker.can_accept_task());

        worker.current_load = 0;
        worker.status = WorkerStatus::Offline;
        assert!(!worker.can_accept_task());

        worker.status = WorkerStatus::Busy;
        assert!(worker.can_accept_task());
    }

    #[test]
    fn test_heartbeat_expired() {
        let worker = WorkerInfo::new("w1", "node-1", "", 1);
        let now = worker.last_heartbeat;
        assert!(!worker.is_heartbeat_expired(now + Duration::seconds(20), 20));
        assert!(worker.is_heartbeat_expired(now + Duration::seconds(21), 20));
    }

    #[test]
    fn test_load_percentage() {
        let mut worker = WorkerInfo::new("w1", "node-1", "", 4);
        worker.current_load = 1;
        assert_eq!(worker.load_percentage(), 25.0);
        worker.capacity = 0;
        assert_eq!(worker.load_percentage(), 0.0);
    }
}
