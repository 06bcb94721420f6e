//! Task queue adapters.
//!
//! The dispatch core submits one [`Task`] per notification to a
//! [`QueueAdapter`]. Two engines exist:
//!
//! - [`LocalQueue`]: a bounded in-process backlog drained by a fixed worker
//!   pool. Tasks run their closure, so completion reaches the caller.
//! - [`ExternalQueue`]: publishes the serialized notification to a
//!   [`Broker`]. The task closure is discarded; delivery happens in whatever
//!   consumes the broker.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::push::PushNotification;

pub mod external;
pub mod local;

pub use external::{Broker, ChannelBroker, ExternalQueue};
pub use local::LocalQueue;

/// Which queue backs dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueEngine {
    #[default]
    Local,
    External,
}

impl QueueEngine {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            QueueEngine::Local => "local",
            QueueEngine::External => "external",
        }
    }
}

impl fmt::Display for QueueEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type TaskFn = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, Result<()>> + Send>;

/// A unit of work bound to one notification.
///
/// Everything the closure captures is released when the task is dropped,
/// whether it ran, was rejected at submission, or was discarded at shutdown.
pub struct Task {
    notification: Arc<PushNotification>,
    run: TaskFn,
}

impl Task {
    pub fn new<F, Fut>(notification: Arc<PushNotification>, run: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            notification,
            run: Box::new(move |ctx| Box::pin(run(ctx))),
        }
    }

    #[must_use]
    pub fn notification(&self) -> &PushNotification {
        &self.notification
    }

    /// Consume the task and run its closure.
    pub async fn run(self, ctx: CancellationToken) -> Result<()> {
        (self.run)(ctx).await
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("platform", &self.notification.platform)
            .field("targets", &self.notification.target_count())
            .finish_non_exhaustive()
    }
}

/// Snapshot of queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub busy_workers: usize,
    pub submitted_tasks: u64,
    pub success_tasks: u64,
    pub failure_tasks: u64,
}

/// Live counters shared between a queue and its workers.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    busy: AtomicUsize,
    submitted: AtomicU64,
    success: AtomicU64,
    failure: AtomicU64,
}

impl Counters {
    pub(crate) fn submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn busy(&self) -> BusyGuard<'_> {
        self.busy.fetch_add(1, Ordering::Relaxed);
        BusyGuard(self)
    }

    pub(crate) fn finished(&self, ok: bool) {
        if ok {
            self.success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failure.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn snapshot(&self) -> WorkerStats {
        WorkerStats {
            busy_workers: self.busy.load(Ordering::Relaxed),
            submitted_tasks: self.submitted.load(Ordering::Relaxed),
            success_tasks: self.success.load(Ordering::Relaxed),
            failure_tasks: self.failure.load(Ordering::Relaxed),
        }
    }
}

/// Marks a worker busy until dropped.
pub(crate) struct BusyGuard<'a>(&'a Counters);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.busy.fetch_sub(1, Ordering::Relaxed);
    }
}

/// A queue the dispatch core can submit tasks to.
#[async_trait]
pub trait QueueAdapter: Send + Sync {
    fn engine(&self) -> QueueEngine;

    /// Whether submitted tasks run in this process and can report back.
    fn is_local(&self) -> bool {
        self.engine() == QueueEngine::Local
    }

    /// Enqueue `task` without blocking.
    ///
    /// Fails with [`Error::QueueFull`](crate::error::Error::QueueFull) at
    /// capacity and [`Error::QueueClosed`](crate::error::Error::QueueClosed)
    /// after shutdown. A rejected task is dropped.
    fn submit(&self, task: Task) -> Result<()>;

    fn stats(&self) -> WorkerStats;

    /// Stop accepting tasks and wait for running ones to finish.
    async fn shutdown(&self);
}
