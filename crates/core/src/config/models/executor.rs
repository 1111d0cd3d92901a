use serde::{Deserialize, Serialize};

/// 本地执行池配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub http_workers: usize,
    pub rpc_workers: usize,
    pub pool_queue_capacity: usize,
    pub result_queue_capacity: usize,
    /// 回调响应体保留的最大字节数
    pub max_response_bytes: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            http_workers: 10,
            rpc_workers: 10,
            pool_queue_capacity: 100,
            result_queue_capacity: 100,
            max_response_bytes: 1024 * 1024,
        }
    }
}

impl ExecutorConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.http_workers == 0 || self.rpc_workers == 0 {
            return Err(anyhow::anyhow!("执行池并发数必须大于0"));
        }

        if self.pool_queue_capacity == 0 || self.result_queue_capacity == 0 {
            return Err(anyhow::anyhow!("执行池队列容量必须大于0"));
        }

        if self.max_response_bytes == 0 {
            return Err(anyhow::anyhow!("响应体上限必须大于0"));
        }

        Ok(())
    }
}
