use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Counts spawned background tasks so shutdown can wait for them.
#[derive(Clone, Default)]
pub struct TaskTracker {
    inner: Arc<TrackerInner>,
}

#[derive(Default)]
struct TrackerInner {
    inflight: AtomicUsize,
    idle: Notify,
}

/// Decrements the in-flight count however the task ends (completion, panic
/// or abort).
struct InflightGuard(Arc<TrackerInner>);

impl Drop for InflightGuard {
    fn drop(&mut self) {
        if self.0.inflight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.inflight.fetch_add(1, Ordering::AcqRel);
        let guard = InflightGuard(Arc::clone(&self.inner));

        tokio::spawn(async move {
            let _guard = guard;
            task.await;
        });
    }

    pub fn inflight(&self) -> usize {
        self.inner.inflight.load(Ordering::Acquire)
    }

    /// Wait until no tracked task is running. Returns false if `limit`
    /// elapsed first.
    pub async fn wait_idle(&self, limit: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.inner.idle.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                if self.inflight() == 0 {
                    return;
                }
                notified.await;
            }
        };

        tokio::time::timeout(limit, wait).await.is_ok()
    }
}
