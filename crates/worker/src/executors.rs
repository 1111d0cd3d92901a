//! Shell任务执行器
//!
//! 每个命令通过平台shell在独立的进程组中运行，超时或取消时整个进程组被杀掉，
//! 包括命令派生出的子进程。

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use chrono::{DateTime, Utc};
use scheduler_core::models::{truncate_output, ExecutionStatus};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 进程被杀掉后等待输出管道关闭的最长时间
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Worker上单个任务的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Received,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

impl TaskState {
    pub fn is_finished(&self) -> bool {
        !matches!(self, TaskState::Received | TaskState::Running)
    }

    /// 上报给调度中心的执行状态，未结束的任务返回 None
    pub fn execution_status(&self) -> Option<ExecutionStatus> {
        match self {
            TaskState::Received | TaskState::Running => None,
            TaskState::Succeeded => Some(ExecutionStatus::Success),
            TaskState::Failed => Some(ExecutionStatus::Failed),
            TaskState::TimedOut => Some(ExecutionStatus::Timeout),
            TaskState::Cancelled => Some(ExecutionStatus::Cancelled),
        }
    }
}

/// 一次命令执行的结果
#[derive(Debug, Clone)]
pub struct ShellOutcome {
    pub state: TaskState,
    /// stdout 与 stderr 合并后的输出
    pub output: String,
    pub error: Option<String>,
    /// 超时、取消或被信号终止时为 -1，启动失败时为 1
    pub exit_code: i32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

pub struct ShellExecutor {
    max_output_bytes: usize,
}

impl ShellExecutor {
    pub fn new(max_output_bytes: usize) -> Self {
        Self { max_output_bytes }
    }

    /// 运行命令直到结束、超时或被取消
    pub async fn run(
        &self,
        command: &str,
        env: &HashMap<String, String>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> ShellOutcome {
        let started_at = Utc::now();
        let mut cmd = shell_command(command);
        cmd.envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("启动命令失败: {}", e);
                return ShellOutcome {
                    state: TaskState::Failed,
                    output: String::new(),
                    error: Some(format!("启动命令失败: {e}")),
                    exit_code: 1,
                    started_at,
                    finished_at: Utc::now(),
                };
            }
        };
        let pid = child.id();
        debug!("命令已启动, pid={:?}: {}", pid, command);

        let limit = self.max_output_bytes;
        let stdout = tokio::spawn(read_capped(child.stdout.take(), limit));
        let stderr = tokio::spawn(read_capped(child.stderr.take(), limit));

        let (state, exit_code, error) = tokio::select! {
            status = child.wait() => match status {
                Ok(status) if status.success() => (TaskState::Succeeded, 0, None),
                Ok(status) => {
                    let code = status.code().unwrap_or(-1);
                    (TaskState::Failed, code, Some(format!("命令退出码 {code}")))
                }
                Err(e) => (TaskState::Failed, -1, Some(format!("等待进程失败: {e}"))),
            },
            _ = tokio::time::sleep(timeout) => {
                info!("命令执行超过 {:?}，终止进程组", timeout);
                terminate(&mut child, pid).await;
                (TaskState::TimedOut, -1, Some(format!("执行超时 ({}秒)", timeout.as_secs())))
            }
            _ = cancel.cancelled() => {
                info!("命令被取消，终止进程组");
                terminate(&mut child, pid).await;
                (TaskState::Cancelled, -1, Some("执行被取消".to_string()))
            }
        };

        let mut combined = collect(stdout).await;
        combined.extend_from_slice(&collect(stderr).await);
        let output = truncate_output(String::from_utf8_lossy(&combined).into_owned(), limit);

        ShellOutcome {
            state,
            output,
            error,
            exit_code,
            started_at,
            finished_at: Utc::now(),
        }
    }
}

#[cfg(unix)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

async fn terminate(child: &mut tokio::process::Child, pid: Option<u32>) {
    if let Some(pid) = pid {
        kill_process_group(pid);
    }
    if let Err(e) = child.kill().await {
        debug!("终止进程失败: {}", e);
    }
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        debug!("终止进程组 {} 失败: {}", pid, e);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

/// 读取全部输出，只保留前 `limit + 1` 字节用于截断判断
async fn read_capped<R>(reader: Option<R>, limit: usize) -> Vec<u8>
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return Vec::new();
    };
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = (limit + 1).saturating_sub(buffer.len());
                buffer.extend_from_slice(&chunk[..n.min(room)]);
            }
        }
    }
    buffer
}

async fn collect(handle: tokio::task::JoinHandle<Vec<u8>>) -> Vec<u8> {
    match tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, handle).await {
        Ok(Ok(bytes)) => bytes,
        _ => Vec::new(),
    }
}
