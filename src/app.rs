use anyhow::{Context, Result};
use scheduler_api::{create_app, AppState};
use scheduler_core::AppConfig;
use scheduler_dispatcher::DispatcherService;
use scheduler_infrastructure::InMemoryStore;
use scheduler_worker::WorkerAgent;
use tokio::{net::TcpListener, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::shutdown::ShutdownManager;

/// 应用运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// 调度中心及其HTTP接口
    Dispatcher,
    /// 仅运行Worker代理，通过HTTP连接远程调度中心
    Worker,
    /// 同一进程内运行调度中心和Worker代理
    All,
}

impl AppMode {
    /// 解析运行模式并检查对应组件是否在配置中启用
    pub fn parse(mode: &str, config: &AppConfig) -> Result<Self> {
        match mode {
            "dispatcher" => {
                if !config.dispatcher.enabled {
                    return Err(anyhow::anyhow!("Dispatcher模式被禁用，请检查配置"));
                }
                Ok(AppMode::Dispatcher)
            }
            "worker" => {
                if !config.worker.enabled {
                    return Err(anyhow::anyhow!("Worker模式被禁用，请检查配置"));
                }
                Ok(AppMode::Worker)
            }
            "all" => Ok(AppMode::All),
            _ => Err(anyhow::anyhow!("不支持的运行模式: {mode}")),
        }
    }
}

/// 主应用程序
pub struct Application {
    config: AppConfig,
    mode: AppMode,
    dispatcher: Option<DispatcherService>,
    agent: Option<WorkerAgent>,
}

impl Application {
    pub fn new(config: AppConfig, mode: AppMode) -> Self {
        info!("初始化应用程序，模式: {:?}", mode);

        let dispatcher = match mode {
            AppMode::Dispatcher | AppMode::All if config.dispatcher.enabled => {
                Some(DispatcherService::new(
                    config.dispatcher.clone(),
                    config.executor.clone(),
                    InMemoryStore::new().repositories(),
                ))
            }
            _ => None,
        };

        let agent = match (mode, &dispatcher) {
            (AppMode::Worker, _) => Some(WorkerAgent::with_http_client(config.worker.clone())),
            // 同进程内直接调用调度中心，不经过HTTP
            (AppMode::All, Some(service)) if config.worker.enabled => {
                Some(WorkerAgent::new(config.worker.clone(), service.coordinator()))
            }
            (AppMode::All, None) if config.worker.enabled => {
                Some(WorkerAgent::with_http_client(config.worker.clone()))
            }
            _ => None,
        };

        Self {
            config,
            mode,
            dispatcher,
            agent,
        }
    }

    pub fn mode(&self) -> AppMode {
        self.mode
    }

    /// 启动所有组件并等待关闭信号，随后按Worker、API、调度中心的顺序停止
    pub async fn run(&self, shutdown: ShutdownManager) -> Result<()> {
        let token = shutdown.token();
        let mut server = None;

        if let Some(service) = &self.dispatcher {
            service.start().await.context("启动调度中心失败")?;
            if self.config.api.enabled {
                server = Some(self.spawn_api(service, token.clone()).await?);
            }
        }

        if let Some(agent) = &self.agent {
            agent.start().await.context("启动Worker失败")?;
        }

        info!("应用程序已启动，模式: {:?}", self.mode);
        token.cancelled().await;
        info!("应用程序收到关闭信号");

        if let Some(agent) = &self.agent {
            shutdown.run_step("停止Worker", agent.stop()).await;
        }
        if let Some(handle) = server {
            shutdown
                .run_step("停止API服务器", async {
                    if let Err(e) = handle.await {
                        error!("API服务器任务异常退出: {}", e);
                    }
                })
                .await;
        }
        if let Some(service) = &self.dispatcher {
            shutdown.run_step("停止调度中心", service.shutdown()).await;
        }

        info!("应用程序已停止");
        Ok(())
    }

    async fn spawn_api(
        &self,
        service: &DispatcherService,
        token: CancellationToken,
    ) -> Result<JoinHandle<()>> {
        let state = AppState {
            coordinator: service.coordinator(),
            controller: service.controller(),
        };
        let app = create_app(state, &self.config.api);

        let listener = TcpListener::bind(&self.config.api.bind_address)
            .await
            .with_context(|| format!("绑定地址失败: {}", self.config.api.bind_address))?;
        info!("API服务器启动在 http://{}", self.config.api.bind_address);

        Ok(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!("API服务器运行失败: {}", e);
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_parse_app_mode() {
        let config = AppConfig::default();
        assert_eq!(AppMode::parse("dispatcher", &config).unwrap(), AppMode::Dispatcher);
        assert_eq!(AppMode::parse("worker", &config).unwrap(), AppMode::Worker);
        assert_eq!(AppMode::parse("all", &config).unwrap(), AppMode::All);
        assert!(AppMode::parse("api", &config).is_err());
    }

    #[test]
    fn test_disabled_component_is_rejected() {
        let mut config = AppConfig::default();
        config.worker.enabled = false;
        assert!(AppMode::parse("worker", &config).is_err());

        config.dispatcher.enabled = false;
        assert!(AppMode::parse("dispatcher", &config).is_err());
    }

    #[tokio::test]
    async fn test_all_mode_starts_and_stops() {
        let mut config = AppConfig::default();
        config.api.bind_address = "127.0.0.1:0".to_string();
        let app = Application::new(config, AppMode::All);
        let shutdown = ShutdownManager::new(Duration::from_secs(5));

        let runner = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { app.run(shutdown).await })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown.shutdown();

        let result = tokio::time::timeout(Duration::from_secs(10), runner)
            .await
            .expect("应用应在超时前停止")
            .unwrap();
        assert!(result.is_ok());
    }
}
