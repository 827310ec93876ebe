//! Durable FIFO work queue of job ids.
//!
//! The queue rows live in the store so enqueued work survives restarts;
//! this wrapper adds the in-process wakeup that lets workers block without
//! polling. Delivery is at-least-once: duplicates are safe because the
//! stage dispatcher is idempotent per (job, status) pair.

use std::sync::Arc;
use tokio::sync::Notify;

use crate::store::SqliteStore;
use crate::types::{JobId, QueueError};

pub struct JobQueue {
    store: Arc<SqliteStore>,
    wakeup: Notify,
    shutdown: parking_lot::Mutex<bool>,
}

impl JobQueue {
    pub fn new(store: Arc<SqliteStore>) -> Self {
        Self {
            store,
            wakeup: Notify::new(),
            shutdown: parking_lot::Mutex::new(false),
        }
    }

    /// Push a job id onto the queue and wake one waiting worker.
    pub async fn enqueue(&self, job_id: JobId) -> Result<(), QueueError> {
        if *self.shutdown.lock() {
            return Err(QueueError::ShuttingDown);
        }
        self.store
            .queue_push(job_id)
            .await
            .map_err(|e| QueueError::EnqueueFailed(e.to_string()))?;
        self.wakeup.notify_one();
        Ok(())
    }

    /// Pop the next job id, waiting until one is available or the queue
    /// shuts down. Returns `None` on shutdown.
    pub async fn pop(&self) -> Option<JobId> {
        loop {
            if *self.shutdown.lock() {
                return None;
            }
            match self.store.queue_pop().await {
                Ok(Some(job_id)) => {
                    // Pass the wakeup along in case more work is queued
                    // behind this item.
                    self.wakeup.notify_one();
                    return Some(job_id);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("Queue pop failed, retrying: {e}");
                }
            }
            // Re-check shutdown after every wakeup; notify_waiters on
            // shutdown releases all blocked workers.
            self.wakeup.notified().await;
        }
    }

    /// Non-blocking pop, used by tests and drain loops.
    pub async fn try_pop(&self) -> Option<JobId> {
        self.store.queue_pop().await.ok().flatten()
    }

    pub async fn len(&self) -> usize {
        self.store.queue_len().await.unwrap_or(0)
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn shutdown(&self) {
        *self.shutdown.lock() = true;
        self.wakeup.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enqueue_then_pop() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let queue = JobQueue::new(store);
        queue.enqueue(JobId(7)).await.unwrap();
        assert_eq!(queue.pop().await, Some(JobId(7)));
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn pop_blocks_until_enqueue() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let queue = Arc::new(JobQueue::new(store));
        let q = queue.clone();
        let waiter = tokio::spawn(async move { q.pop().await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        queue.enqueue(JobId(3)).await.unwrap();
        assert_eq!(waiter.await.unwrap(), Some(JobId(3)));
    }

    #[tokio::test]
    async fn shutdown_releases_waiters_and_rejects_enqueue() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let queue = Arc::new(JobQueue::new(store));
        let q = queue.clone();
        let waiter = tokio::spawn(async move { q.pop().await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        queue.shutdown();
        assert_eq!(waiter.await.unwrap(), None);
        assert!(matches!(
            queue.enqueue(JobId(1)).await,
            Err(QueueError::ShuttingDown)
        ));
    }
}
