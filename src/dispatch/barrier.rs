//! Completion barrier for synchronous dispatch.
//!
//! The barrier is released by whichever comes first: every registered unit
//! finishing, or a forced release when the client goes away. A forced
//! release fires once and leaves the pending count alone, so units finishing
//! afterwards cannot underflow or release twice.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    pending: AtomicUsize,
    forced: AtomicBool,
    notify: Notify,
}

impl Inner {
    fn is_released(&self) -> bool {
        self.forced.load(Ordering::Acquire) || self.pending.load(Ordering::Acquire) == 0
    }
}

/// Waits for a set of units to finish.
#[derive(Debug, Clone, Default)]
pub struct CompletionBarrier {
    inner: Arc<Inner>,
}

impl CompletionBarrier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one more unit of work. Dropping the unit marks it done.
    #[must_use]
    pub fn register(&self) -> BarrierUnit {
        self.inner.pending.fetch_add(1, Ordering::AcqRel);
        BarrierUnit {
            inner: self.inner.clone(),
        }
    }

    /// Units registered and not yet done.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::Acquire)
    }

    /// Release waiters regardless of pending units.
    ///
    /// Returns `false` if the barrier was already forced.
    pub fn force_release(&self) -> bool {
        let fired = self
            .inner
            .forced
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if fired {
            self.inner.notify.notify_waiters();
        }
        fired
    }

    #[must_use]
    pub fn is_forced(&self) -> bool {
        self.inner.forced.load(Ordering::Acquire)
    }

    /// Wait until every unit is done or the barrier is forced.
    pub async fn wait(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.inner.is_released() {
                return;
            }
            notified.await;
        }
    }
}

/// One outstanding unit. Completes when dropped.
#[derive(Debug)]
pub struct BarrierUnit {
    inner: Arc<Inner>,
}

impl Drop for BarrierUnit {
    fn drop(&mut self) {
        if self.inner.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.notify.notify_waiters();
        }
    }
}
