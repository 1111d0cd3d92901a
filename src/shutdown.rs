use std::time::Duration;

use tokio::signal;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 优雅关闭管理器
///
/// 所有组件共享同一个取消令牌；触发关闭后按顺序停止各组件，
/// 每一步都受关闭超时约束。
#[derive(Clone)]
pub struct ShutdownManager {
    token: CancellationToken,
    shutdown_timeout: Duration,
}

impl ShutdownManager {
    pub fn new(shutdown_timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            shutdown_timeout,
        }
    }

    /// 获取关闭令牌，关闭后立即就绪
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// 触发关闭，重复调用无副作用
    pub fn shutdown(&self) {
        if self.token.is_cancelled() {
            debug!("关闭管理器已经触发过关闭");
            return;
        }
        info!("触发系统关闭");
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    /// 在超时限制内执行一个关闭步骤，超时只记录日志
    pub async fn run_step<F>(&self, name: &str, step: F) -> bool
    where
        F: std::future::Future<Output = ()>,
    {
        match timeout(self.shutdown_timeout, step).await {
            Ok(()) => {
                debug!("关闭步骤完成: {}", name);
                true
            }
            Err(_) => {
                warn!("关闭步骤超时（{:?}）: {}", self.shutdown_timeout, name);
                false
            }
        }
    }
}

/// 等待 Ctrl+C 或 SIGTERM
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("安装Ctrl+C信号处理器失败: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}
