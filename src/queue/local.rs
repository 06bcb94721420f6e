//! In-process worker pool.
//!
//! # Bounded Queue Pattern
//!
//! Tasks wait in a bounded channel drained by a fixed number of workers that
//! share the receiver. Submission never blocks: when the backlog is full the
//! task is rejected and the caller records the failure. This bounds memory
//! during traffic spikes instead of spawning without limit.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::queue::{Counters, QueueAdapter, QueueEngine, Task, WorkerStats};

/// Fixed-size worker pool over a bounded backlog.
pub struct LocalQueue {
    sender: mpsc::Sender<Task>,
    receiver: Arc<Mutex<mpsc::Receiver<Task>>>,
    counters: Arc<Counters>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    closed: AtomicBool,
    capacity: usize,
}

impl LocalQueue {
    /// Start `worker_num` workers over a backlog of `capacity` tasks.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(worker_num: usize, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let counters = Arc::new(Counters::default());
        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();

        let workers = worker_num.max(1);
        for worker_id in 0..workers {
            tracker.spawn(worker(
                worker_id,
                receiver.clone(),
                counters.clone(),
                shutdown.clone(),
            ));
        }

        info!(workers, capacity, "Local worker pool started");

        Self {
            sender,
            receiver,
            counters,
            shutdown,
            tracker,
            closed: AtomicBool::new(false),
            capacity,
        }
    }
}

async fn worker(
    worker_id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<Task>>>,
    counters: Arc<Counters>,
    shutdown: CancellationToken,
) {
    loop {
        let task = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                debug!(worker_id, "Worker detected shutdown, exiting");
                break;
            }
            task = async {
                let mut rx = receiver.lock().await;
                rx.recv().await
            } => task,
        };

        let Some(task) = task else {
            debug!(worker_id, "Task channel closed, worker exiting");
            break;
        };

        let platform = task.notification().platform;
        let outcome = {
            let _busy = counters.busy();
            AssertUnwindSafe(task.run(shutdown.clone()))
                .catch_unwind()
                .await
        };

        match outcome {
            Ok(Ok(())) => counters.finished(true),
            Ok(Err(e)) => {
                debug!(worker_id, %platform, error = %e, "Task failed");
                counters.finished(false);
            }
            Err(_) => {
                warn!(worker_id, %platform, "Task panicked");
                counters.finished(false);
            }
        }
    }
}

#[async_trait]
impl QueueAdapter for LocalQueue {
    fn engine(&self) -> QueueEngine {
        QueueEngine::Local
    }

    fn submit(&self, task: Task) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::QueueClosed);
        }

        match self.sender.try_send(task) {
            Ok(()) => {
                self.counters.submitted();
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(task)) => {
                warn!(
                    platform = %task.notification().platform,
                    capacity = self.capacity,
                    "Task queue full, rejecting task"
                );
                Err(Error::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Task queue closed, rejecting task");
                Err(Error::QueueClosed)
            }
        }
    }

    fn stats(&self) -> WorkerStats {
        self.counters.snapshot()
    }

    async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("Stopping local worker pool");
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;

        // Release whatever never started.
        let mut rx = self.receiver.lock().await;
        rx.close();
        let mut dropped = 0usize;
        while rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            warn!(dropped, "Discarded queued tasks at shutdown");
        }

        info!("Local worker pool stopped");
    }
}
