use serde::{Deserialize, Serialize};

/// 失败重试的投递方式
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RetryDelivery {
    /// 重试实例落库，由到期扫描投递，不会因队列满而丢失
    AtLeastOnce,
    /// 延时后尝试写入调度队列，队列满时丢弃
    BestEffort,
}

impl Default for RetryDelivery {
    fn default() -> Self {
        RetryDelivery::AtLeastOnce
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub enabled: bool,
    pub queue_capacity: usize,
    pub heartbeat_interval_seconds: u64,
    pub requeue_delay_seconds: u64,
    pub retry_delay_seconds: u64,
    pub retry_delivery: RetryDelivery,
    pub due_scan_interval_seconds: u64,
    pub due_scan_batch_size: usize,
    /// 领取PENDING实例后的租约时长，租约内其他扫描不会重复投递
    pub claim_lease_seconds: u64,
    pub cleanup_interval_seconds: u64,
    pub execution_retention_days: u32,
    pub schedule_retention_days: u32,
    pub shutdown_timeout_seconds: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            queue_capacity: 1000,
            heartbeat_interval_seconds: 10, // 超过2倍间隔未收到心跳视为离线
            requeue_delay_seconds: 30,
            retry_delay_seconds: 30,
            retry_delivery: RetryDelivery::AtLeastOnce,
            due_scan_interval_seconds: 5,
            due_scan_batch_size: 100,
            claim_lease_seconds: 60,
            cleanup_interval_seconds: 3600,
            execution_retention_days: 7,
            schedule_retention_days: 30,
            shutdown_timeout_seconds: 30,
        }
    }
}

impl DispatcherConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.queue_capacity == 0 {
            return Err(anyhow::anyhow!("调度队列容量必须大于0"));
        }

        if self.heartbeat_interval_seconds == 0 {
            return Err(anyhow::anyhow!("心跳间隔必须大于0"));
        }

        if self.due_scan_interval_seconds == 0 {
            return Err(anyhow::anyhow!("到期扫描间隔必须大于0"));
        }

        if self.due_scan_batch_size == 0 {
            return Err(anyhow::anyhow!("到期扫描批量必须大于0"));
        }

        if self.claim_lease_seconds == 0 || self.claim_lease_seconds > 86_400 {
            return Err(anyhow::anyhow!("领取租约时长必须在1到86400秒之间"));
        }

        if self.cleanup_interval_seconds == 0 {
            return Err(anyhow::anyhow!("过期记录清理间隔必须大于0"));
        }

        if self.execution_retention_days == 0 || self.schedule_retention_days == 0 {
            return Err(anyhow::anyhow!("记录保留天数必须大于0"));
        }

        Ok(())
    }

    /// 心跳超时阈值（秒）
    pub fn heartbeat_timeout_seconds(&self) -> i64 {
        (self.heartbeat_interval_seconds * 2) as i64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub enabled: bool,
    pub name: String,
    pub address: String,
    pub dispatcher_url: String,
    pub capacity: u32,
    pub heartbeat_interval_seconds: u64,
    pub poll_interval_seconds: u64,
    pub sweep_interval_seconds: u64,
    pub cancel_grace_seconds: u64,
    pub request_timeout_seconds: u64,
    pub shutdown_timeout_seconds: u64,
    pub max_output_bytes: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            name: "worker-001".to_string(),
            address: "127.0.0.1".to_string(),
            dispatcher_url: "http://127.0.0.1:8080".to_string(),
            capacity: 10,
            heartbeat_interval_seconds: 10,
            poll_interval_seconds: 5,
            sweep_interval_seconds: 60,
            cancel_grace_seconds: 60,
            request_timeout_seconds: 10,
            shutdown_timeout_seconds: 30,
            max_output_bytes: 1024 * 1024,
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.name.is_empty() {
            return Err(anyhow::anyhow!("Worker名称不能为空"));
        }

        if !self.dispatcher_url.starts_with("http://") && !self.dispatcher_url.starts_with("https://")
        {
            return Err(anyhow::anyhow!(
                "调度中心地址格式无效: {}",
                self.dispatcher_url
            ));
        }

        if self.capacity == 0 {
            return Err(anyhow::anyhow!("Worker容量必须大于0"));
        }

        if self.heartbeat_interval_seconds == 0 {
            return Err(anyhow::anyhow!("心跳间隔必须大于0"));
        }

        if self.poll_interval_seconds == 0 {
            return Err(anyhow::anyhow!("任务轮询间隔必须大于0"));
        }

        if self.sweep_interval_seconds == 0 {
            return Err(anyhow::anyhow!("清理间隔必须大于0"));
        }

        Ok(())
    }
}
