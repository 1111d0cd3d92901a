use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use scheduler_core::{
    models::{
        Ack, AssignedTask, GetTaskRequest, HeartbeatRequest, RegisterWorkerRequest,
        RegisterWorkerResponse, ReportTaskResultRequest,
    },
    traits::CoordinatorApi,
    SchedulerError, SchedulerResult,
};

/// 调度中心API的响应信封
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    data: Option<T>,
    message: Option<String>,
}

/// 非2xx响应
struct Rejection {
    status: StatusCode,
    message: String,
}

/// 通过HTTP访问调度中心的客户端
pub struct HttpCoordinatorClient {
    base_url: String,
    http_client: reqwest::Client,
    timeout: Duration,
}

impl HttpCoordinatorClient {
    pub fn new(dispatcher_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: dispatcher_url.into().trim_end_matches('/').to_string(),
            http_client: reqwest::Client::new(),
            timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> SchedulerResult<Result<T, Rejection>>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http_client
            .post(&url)
            .timeout(self.timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| SchedulerError::Transport(format!("请求 {url} 失败: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| SchedulerError::Transport(format!("读取 {url} 响应失败: {e}")))?;

        if !status.is_success() {
            let message = serde_json::from_str::<Envelope<serde_json::Value>>(&text)
                .ok()
                .and_then(|envelope| envelope.message)
                .unwrap_or(text);
            debug!("{} 返回 {}: {}", url, status, message);
            return Ok(Err(Rejection { status, message }));
        }

        let envelope: Envelope<T> = serde_json::from_str(&text)?;
        match envelope.data {
            Some(data) if envelope.success => Ok(Ok(data)),
            _ => Err(SchedulerError::Transport(format!(
                "{url} 返回无效响应: {}",
                envelope.message.unwrap_or_default()
            ))),
        }
    }
}

fn rejection_error(rejection: Rejection) -> SchedulerError {
    match rejection.status {
        StatusCode::BAD_REQUEST => SchedulerError::Validation(rejection.message),
        status => SchedulerError::Transport(format!("HTTP {}: {}", status, rejection.message)),
    }
}

#[async_trait]
impl CoordinatorApi for HttpCoordinatorClient {
    async fn register_worker(
        &self,
        request: RegisterWorkerRequest,
    ) -> SchedulerResult<RegisterWorkerResponse> {
        self.post("/api/v1/workers/register", &request)
            .await?
            .map_err(rejection_error)
    }

    async fn heartbeat(&self, worker_id: &str, request: HeartbeatRequest) -> SchedulerResult<Ack> {
        self.post(&format!("/api/v1/workers/{worker_id}/heartbeat"), &request)
            .await?
            .map_err(rejection_error)
    }

    async fn get_task(
        &self,
        worker_id: &str,
        available_capacity: u32,
    ) -> SchedulerResult<Vec<AssignedTask>> {
        let request = GetTaskRequest { available_capacity };
        match self
            .post(&format!("/api/v1/workers/{worker_id}/tasks"), &request)
            .await?
        {
            Ok(tasks) => Ok(tasks),
            Err(rejection) if rejection.status == StatusCode::NOT_FOUND => {
                warn!("调度中心不认识Worker {}", worker_id);
                Err(SchedulerError::WorkerNotFound {
                    id: worker_id.to_string(),
                })
            }
            Err(rejection) => Err(rejection_error(rejection)),
        }
    }

    async fn report_task_result(
        &self,
        task_id: &str,
        request: ReportTaskResultRequest,
    ) -> SchedulerResult<Ack> {
        match self
            .post(&format!("/api/v1/tasks/{task_id}/result"), &request)
            .await?
        {
            Ok(ack) => Ok(ack),
            Err(rejection) if rejection.status == StatusCode::NOT_FOUND => {
                Err(SchedulerError::ExecutionNotFound {
                    id: task_id.to_string(),
                })
            }
            Err(rejection) => Err(rejection_error(rejection)),
        }
    }
}
