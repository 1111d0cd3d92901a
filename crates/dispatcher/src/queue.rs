use scheduler_core::models::{Job, Schedule};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// 调度队列中的一项
#[derive(Debug, Clone)]
pub struct DispatchItem {
    pub schedule: Schedule,
    pub job: Job,
    /// 调度实例是否已经落库
    pub persisted: bool,
}

impl DispatchItem {
    /// 新触发的调度实例，尚未落库
    pub fn fresh(schedule: Schedule, job: Job) -> Self {
        Self {
            schedule,
            job,
            persisted: false,
        }
    }

    pub fn stored(schedule: Schedule, job: Job) -> Self {
        Self {
            schedule,
            job,
            persisted: true,
        }
    }
}

pub type DispatchSender = mpsc::Sender<DispatchItem>;
pub type DispatchReceiver = mpsc::Receiver<DispatchItem>;

/// 创建有界调度队列
pub fn dispatch_queue(capacity: usize) -> (DispatchSender, DispatchReceiver) {
    mpsc::channel(capacity.max(1))
}

/// 非阻塞投递，队列满或已关闭时丢弃并返回 false
pub fn try_enqueue(sender: &DispatchSender, item: DispatchItem, source: &'static str) -> bool {
    let job_id = item.job.id;
    match sender.try_send(item) {
        Ok(()) => {
            debug!("任务 {} 已进入调度队列 (来源: {})", job_id, source);
            true
        }
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!("调度队列已满，丢弃任务 {} 的本次投递 (来源: {})", job_id, source);
            metrics::counter!("scheduler_dispatch_dropped_total", "source" => source).increment(1);
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            warn!("调度队列已关闭，丢弃任务 {} 的本次投递 (来源: {})", job_id, source);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use scheduler_core::models::{JobTarget, ShellTarget};

    fn item(id: i64) -> DispatchItem {
        let mut job = Job::new(
            "job",
            "* * * * * *",
            JobTarget::Shell(ShellTarget {
                command: "true".into(),
            }),
        );
        job.id = id;
        DispatchItem::fresh(Schedule::new(id, Utc::now()), job)
    }

    #[tokio::test]
    async fn test_full_queue_drops() {
        let (tx, mut rx) = dispatch_queue(1);
        assert!(try_enqueue(&tx, item(1), "test"));
        assert!(!try_enqueue(&tx, item(2), "test"));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.job.id, 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_queue_drops() {
        let (tx, rx) = dispatch_queue(4);
        drop(rx);
        assert!(!try_enqueue(&tx, item(1), "test"));
    }
}
