use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use scheduler_core::models::{truncate_output, HttpTarget, Job, JobResult, JobTarget, RpcTarget};
use serde_json::{json, Value};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 单次回调调用的失败原因
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CallError {
    #[error("调用超时 ({0}秒)")]
    Timeout(u64),

    #[error("调用已取消")]
    Cancelled,

    #[error("传输错误: {0}")]
    Transport(String),

    #[error("远端返回失败: {message}")]
    Rejected {
        status_code: Option<u16>,
        message: String,
        body: Option<String>,
    },

    #[error("不支持的目标: {0}")]
    Unsupported(String),
}

/// 回调成功时的响应
#[derive(Debug, Clone, PartialEq)]
pub struct CallResponse {
    pub status_code: Option<u16>,
    pub body: String,
}

/// 回调执行器，负责对单个目标发起一次调用
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CallbackExecutor: Send + Sync {
    async fn call(&self, target: &JobTarget, timeout: Duration) -> Result<CallResponse, CallError>;
}

/// 响应体默认最多保留的字节数
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

fn map_reqwest_error(err: reqwest::Error, timeout: Duration) -> CallError {
    if err.is_timeout() {
        CallError::Timeout(timeout.as_secs())
    } else {
        CallError::Transport(err.to_string())
    }
}

/// 分块读取响应体，读满 `limit + 1` 字节后停止，剩余部分不再接收
async fn read_body(
    mut response: reqwest::Response,
    limit: usize,
) -> Result<String, reqwest::Error> {
    let mut buffer = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        let room = (limit + 1).saturating_sub(buffer.len());
        buffer.extend_from_slice(&chunk[..chunk.len().min(room)]);
        if buffer.len() > limit {
            debug!("响应体超过 {} 字节，停止读取", limit);
            break;
        }
    }
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

/// HTTP回调执行器
pub struct HttpCallbackExecutor {
    client: reqwest::Client,
    max_body_bytes: usize,
}

impl HttpCallbackExecutor {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    async fn send(&self, http: &HttpTarget, timeout: Duration) -> Result<CallResponse, CallError> {
        let method = reqwest::Method::from_bytes(http.method.to_uppercase().as_bytes())
            .map_err(|_| CallError::Unsupported(format!("HTTP方法 {}", http.method)))?;

        let mut request = self.client.request(method, &http.url).timeout(timeout);
        for (key, value) in &http.headers {
            request = request.header(key, value);
        }
        if let Some(body) = &http.body {
            let has_content_type = http
                .headers
                .keys()
                .any(|key| key.eq_ignore_ascii_case("content-type"));
            if !has_content_type {
                request = request.header("Content-Type", "application/json");
            }
            request = request.body(body.clone());
        }

        let response = request
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, timeout))?;
        let status = response.status();
        let body = read_body(response, self.max_body_bytes)
            .await
            .map_err(|e| map_reqwest_error(e, timeout))?;
        let body = truncate_output(body, self.max_body_bytes);

        if status.is_success() {
            Ok(CallResponse {
                status_code: Some(status.as_u16()),
                body,
            })
        } else {
            Err(CallError::Rejected {
                status_code: Some(status.as_u16()),
                message: format!("HTTP状态码 {}", status.as_u16()),
                body: Some(body),
            })
        }
    }
}

impl Default for HttpCallbackExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CallbackExecutor for HttpCallbackExecutor {
    async fn call(&self, target: &JobTarget, timeout: Duration) -> Result<CallResponse, CallError> {
        match target {
            JobTarget::Http(http) => self.send(http, timeout).await,
            other => Err(CallError::Unsupported(other.kind().to_string())),
        }
    }
}

/// JSON-RPC 2.0 回调执行器，通过HTTP POST调用服务端点
pub struct JsonRpcCallbackExecutor {
    client: reqwest::Client,
    next_id: AtomicU64,
    max_body_bytes: usize,
}

impl JsonRpcCallbackExecutor {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            next_id: AtomicU64::new(1),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    fn request_body(&self, rpc: &RpcTarget) -> Value {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": rpc.method,
        });
        if !rpc.params.is_null() {
            body["params"] = rpc.params.clone();
        }
        body
    }

    async fn send(&self, rpc: &RpcTarget, timeout: Duration) -> Result<CallResponse, CallError> {
        let response = self
            .client
            .post(&rpc.service)
            .timeout(timeout)
            .json(&self.request_body(rpc))
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, timeout))?;
        let status = response.status();
        let text = read_body(response, self.max_body_bytes)
            .await
            .map_err(|e| map_reqwest_error(e, timeout))?;

        if !status.is_success() {
            return Err(CallError::Rejected {
                status_code: Some(status.as_u16()),
                message: format!("HTTP状态码 {}", status.as_u16()),
                body: Some(truncate_output(text, self.max_body_bytes)),
            });
        }

        // 不完整的JSON无法解析
        if text.len() > self.max_body_bytes {
            return Err(CallError::Rejected {
                status_code: Some(status.as_u16()),
                message: format!("JSON-RPC响应超过 {} 字节", self.max_body_bytes),
                body: Some(truncate_output(text, self.max_body_bytes)),
            });
        }

        let reply: Value = serde_json::from_str(&text).map_err(|e| CallError::Rejected {
            status_code: Some(status.as_u16()),
            message: format!("无效的JSON-RPC响应: {e}"),
            body: Some(text.clone()),
        })?;

        if let Some(error) = reply.get("error").filter(|e| !e.is_null()) {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            return Err(CallError::Rejected {
                status_code: Some(status.as_u16()),
                message: format!("JSON-RPC错误: {message}"),
                body: Some(text),
            });
        }

        let body = match reply.get("result") {
            Some(Value::String(s)) => s.clone(),
            Some(result) => result.to_string(),
            None => String::new(),
        };
        Ok(CallResponse {
            status_code: Some(status.as_u16()),
            body,
        })
    }
}

impl Default for JsonRpcCallbackExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CallbackExecutor for JsonRpcCallbackExecutor {
    async fn call(&self, target: &JobTarget, timeout: Duration) -> Result<CallResponse, CallError> {
        match target {
            JobTarget::Rpc(rpc) => self.send(rpc, timeout).await,
            other => Err(CallError::Unsupported(other.kind().to_string())),
        }
    }
}

async fn attempt(
    executor: &dyn CallbackExecutor,
    target: &JobTarget,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<CallResponse, CallError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(CallError::Cancelled),
        result = tokio::time::timeout(timeout, executor.call(target, timeout)) => {
            result.unwrap_or(Err(CallError::Timeout(timeout.as_secs())))
        }
    }
}

/// 按任务的重试与备用目标策略执行一次调度
///
/// 主目标最多调用 `retry_count + 1` 次，两次之间间隔 `retry_interval_seconds`；
/// 全部失败且配置了备用目标时再调用备用目标一次，其结果决定最终成败。
pub async fn execute_with_policy(
    executor: &dyn CallbackExecutor,
    job: &Job,
    cancel: &CancellationToken,
    max_response_bytes: usize,
) -> JobResult {
    let started = Instant::now();
    let timeout = Duration::from_secs(job.timeout_seconds);
    let interval = Duration::from_secs(job.retry_interval_seconds);

    let mut retries_used = 0;
    let mut outcome = attempt(executor, &job.target, timeout, cancel).await;

    while let Err(e) = &outcome {
        if retries_used >= job.retry_count || *e == CallError::Cancelled {
            break;
        }
        warn!(
            "任务 {} 第 {} 次调用失败: {}，{}秒后重试",
            job.id,
            retries_used + 1,
            e,
            job.retry_interval_seconds
        );
        tokio::select! {
            _ = cancel.cancelled() => {
                outcome = Err(CallError::Cancelled);
                break;
            }
            _ = tokio::time::sleep(interval) => {}
        }
        retries_used += 1;
        outcome = attempt(executor, &job.target, timeout, cancel).await;
    }

    let fallback = match (&outcome, &job.fallback) {
        (Err(e), Some(fallback)) if *e != CallError::Cancelled => {
            info!("任务 {} 主目标全部失败 ({})，调用备用目标", job.id, e);
            Some(fallback)
        }
        _ => None,
    };
    let fallback_used = fallback.is_some();
    if let Some(fallback) = fallback {
        outcome = attempt(executor, fallback, timeout, cancel).await;
    }

    let elapsed_ms = started.elapsed().as_millis() as u64;
    match outcome {
        Ok(response) => {
            debug!("任务 {} 调用成功，耗时 {}ms", job.id, elapsed_ms);
            JobResult {
                success: true,
                cancelled: false,
                status_code: response.status_code,
                response: Some(truncate_output(response.body, max_response_bytes)),
                error: None,
                elapsed_ms,
                retries_used,
                fallback_used,
            }
        }
        Err(e) => {
            let (status_code, body) = match &e {
                CallError::Rejected {
                    status_code, body, ..
                } => (*status_code, body.clone()),
                _ => (None, None),
            };
            JobResult {
                success: false,
                cancelled: e == CallError::Cancelled,
                status_code,
                response: body.map(|b| truncate_output(b, max_response_bytes)),
                error: Some(e.to_string()),
                elapsed_ms,
                retries_used,
                fallback_used,
            }
        }
    }
}
