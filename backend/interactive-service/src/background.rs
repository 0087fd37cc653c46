//! Detached background work
//!
//! Cache write-backs issued after a request has returned run here, each under
//! its own timeout so they never inherit the caller's deadline or cancellation.
//! Tasks are tracked by a `TaskTracker` so shutdown can drain them.

use std::future::Future;
use std::time::Duration;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

/// Default timeout for a single background task
pub const DEFAULT_BACKGROUND_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct BackgroundTasks {
    tracker: TaskTracker,
    timeout: Duration,
}

impl Default for BackgroundTasks {
    fn default() -> Self {
        Self::new(DEFAULT_BACKGROUND_TIMEOUT)
    }
}

impl BackgroundTasks {
    pub fn new(timeout: Duration) -> Self {
        Self {
            tracker: TaskTracker::new(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Spawn `task` detached from the caller, bounded by the tracker's timeout.
    ///
    /// The task is counted before this returns, so a concurrent `shutdown`
    /// either waits for it or had already finished draining.
    pub fn spawn<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.tracker.is_closed() {
            debug!(task = name, "Spawning background task during shutdown");
        }

        let timeout = self.timeout;
        self.tracker.spawn(async move {
            if tokio::time::timeout(timeout, task).await.is_err() {
                warn!(
                    task = name,
                    timeout_ms = timeout.as_millis() as u64,
                    "Background task timed out"
                );
            }
        });
    }

    /// Wait until every task spawned so far has finished, then keep accepting work
    #[cfg(test)]
    pub(crate) async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Close and drain
    pub async fn shutdown(&self) {
        self.tracker.close();
        debug!(in_flight = self.in_flight(), "Draining background tasks");
        self.tracker.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_spawned_tasks_complete_and_drain() {
        let tasks = BackgroundTasks::new(Duration::from_secs(1));
        let done = Arc::new(AtomicU32::new(0));

        for _ in 0..5 {
            let done = done.clone();
            tasks.spawn("test", async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                done.fetch_add(1, Ordering::SeqCst);
            });
        }

        tasks.wait_idle().await;
        assert_eq!(done.load(Ordering::SeqCst), 5);
        assert_eq!(tasks.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_task_is_cut_off_by_its_own_timeout() {
        let tasks = BackgroundTasks::new(Duration::from_millis(20));
        let finished = Arc::new(AtomicBool::new(false));

        let flag = finished.clone();
        tasks.spawn("slow", async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            flag.store(true, Ordering::SeqCst);
        });

        tokio::time::timeout(Duration::from_secs(1), tasks.wait_idle())
            .await
            .expect("timed-out task should release the tracker");
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_shutdown_drains_in_flight_task() {
        let tasks = BackgroundTasks::default();
        let done = Arc::new(AtomicBool::new(false));

        let flag = done.clone();
        tasks.spawn("in_flight", async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            flag.store(true, Ordering::SeqCst);
        });
        tasks.shutdown().await;

        assert!(done.load(Ordering::SeqCst));
        assert_eq!(tasks.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_wait_idle_keeps_tracker_open() {
        let tasks = BackgroundTasks::default();
        tasks.wait_idle().await;

        let done = Arc::new(AtomicBool::new(false));
        let flag = done.clone();
        tasks.spawn("after_idle", async move {
            flag.store(true, Ordering::SeqCst);
        });
        tasks.wait_idle().await;

        assert!(done.load(Ordering::SeqCst));
    }
}
