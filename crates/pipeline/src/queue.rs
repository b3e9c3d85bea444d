//! In-process job queues.

use std::collections::{HashMap, VecDeque};

use taskline_core::types::JobGuid;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;

/// FIFO of job GUIDs for the local runner loops.
#[derive(Default)]
pub struct LocalQueue {
    jobs: Mutex<VecDeque<JobGuid>>,
    notify: Notify,
}

impl LocalQueue {
    pub async fn push(&self, guid: JobGuid) {
        self.jobs.lock().await.push_back(guid);
        self.notify.notify_one();
    }

    /// Wait for the next job. Returns `None` once `cancel` fires.
    pub async fn pop(&self, cancel: &CancellationToken) -> Option<JobGuid> {
        loop {
            if let Some(guid) = self.jobs.lock().await.pop_front() {
                return Some(guid);
            }
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = self.notify.notified() => {}
            }
        }
    }

    /// Remove a job that has not been picked up yet.
    pub async fn remove(&self, guid: JobGuid) -> bool {
        let mut jobs = self.jobs.lock().await;
        let before = jobs.len();
        jobs.retain(|g| *g != guid);
        jobs.len() != before
    }

    pub async fn contains(&self, guid: JobGuid) -> bool {
        self.jobs.lock().await.contains(&guid)
    }

    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }
}

/// One FIFO per polling location, drained by remote workers via claim.
#[derive(Default)]
pub struct PollingQueues {
    queues: Mutex<HashMap<String, VecDeque<JobGuid>>>,
}

impl PollingQueues {
    pub async fn push(&self, location: &str, guid: JobGuid) {
        self.queues
            .lock()
            .await
            .entry(location.to_string())
            .or_default()
            .push_back(guid);
    }

    pub async fn pop(&self, location: &str) -> Option<JobGuid> {
        self.queues
            .lock()
            .await
            .get_mut(location)
            .and_then(VecDeque::pop_front)
    }

    pub async fn remove(&self, guid: JobGuid) -> bool {
        let mut queues = self.queues.lock().await;
        let mut removed = false;
        for queue in queues.values_mut() {
            let before = queue.len();
            queue.retain(|g| *g != guid);
            removed |= queue.len() != before;
        }
        removed
    }

    pub async fn contains(&self, guid: JobGuid) -> bool {
        self.queues
            .lock()
            .await
            .values()
            .any(|q| q.contains(&guid))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn local_queue_is_fifo() {
        let queue = LocalQueue::default();
        let (a, b) = (uuid(), uuid());
        queue.push(a).await;
        queue.push(b).await;

        let cancel = CancellationToken::new();
        assert_eq!(queue.pop(&cancel).await, Some(a));
        assert_eq!(queue.pop(&cancel).await, Some(b));
    }

    #[tokio::test]
    async fn pop_wakes_on_push() {
        let queue = std::sync::Arc::new(LocalQueue::default());
        let cancel = CancellationToken::new();
        let waiter = {
            let queue = queue.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { queue.pop(&cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let guid = uuid();
        queue.push(guid).await;
        assert_eq!(waiter.await.unwrap(), Some(guid));
    }

    #[tokio::test]
    async fn pop_returns_none_when_cancelled() {
        let queue = LocalQueue::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(queue.pop(&cancel).await, None);
    }

    #[tokio::test]
    async fn removed_jobs_are_not_handed_out() {
        let queue = PollingQueues::default();
        let (a, b) = (uuid(), uuid());
        queue.push("cluster", a).await;
        queue.push("cluster", b).await;

        assert!(queue.remove(a).await);
        assert!(!queue.remove(a).await);
        assert_eq!(queue.pop("cluster").await, Some(b));
        assert_eq!(queue.pop("cluster").await, None);
        assert_eq!(queue.pop("elsewhere").await, None);
    }

    fn uuid() -> JobGuid {
        JobGuid::new_v4()
    }
}
