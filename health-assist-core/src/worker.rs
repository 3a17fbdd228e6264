//! Background worker for best-effort persistence and cache-invalidation work.
//!
//! The orchestrator enqueues work after responding to the client so request
//! latency never includes message persistence or cache bookkeeping. Loss is
//! acceptable on shutdown — there is no at-least-once guarantee — but the
//! worker drains whatever is already queued before its channel closes.
//!
//! Work is queued as a boxed future rather than a fixed enum of task kinds:
//! the orchestrator already has the [`crate::state::AppState`] clone it needs
//! to touch the database or cache, so the simplest contract is "run this
//! async block later" rather than re-threading gateway handles through the
//! worker itself.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;

/// Bound on the queue depth; once full, `try_send` drops the task and logs
/// rather than applying backpressure to the request path.
const QUEUE_CAPACITY: usize = 1024;

type BoxedTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Handle used by the orchestrator to enqueue work; cloneable and cheap.
#[derive(Clone)]
pub struct WorkerHandle {
    sender: mpsc::Sender<BoxedTask>,
}

impl WorkerHandle {
    /// Enqueue an async task to run on the background worker. Drops it with
    /// a warning if the queue is full rather than blocking the caller.
    pub fn enqueue<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if let Err(e) = self.sender.try_send(Box::pin(task)) {
            tracing::warn!(error = %e, "background work queue full, dropping task");
        }
    }
}

/// Spawn the background worker loop and return a handle to enqueue work.
/// When the last [`WorkerHandle`] is dropped the channel closes and the loop
/// drains remaining items before exiting.
pub fn spawn() -> WorkerHandle {
    let (sender, receiver) = mpsc::channel(QUEUE_CAPACITY);
    tokio::spawn(run(receiver));
    WorkerHandle { sender }
}

async fn run(mut receiver: mpsc::Receiver<BoxedTask>) {
    while let Some(task) = receiver.recv().await {
        task.await;
    }
    tracing::info!("background worker channel closed, drained remaining work");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn enqueued_tasks_run_on_the_worker() {
        let handle = spawn();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let counter = counter.clone();
            handle.enqueue(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        // Yield repeatedly so the worker task gets scheduled before we assert.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }
}
