//! Per-request log aggregation.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::push::LogPushEntry;

/// Append-only log list shared between a request and its tasks.
#[derive(Debug, Clone, Default)]
pub struct LogCollector {
    entries: Arc<Mutex<Vec<LogPushEntry>>>,
}

impl LogCollector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `entries` as one contiguous run.
    pub fn extend<I>(&self, entries: I)
    where
        I: IntoIterator<Item = LogPushEntry>,
    {
        self.entries.lock().extend(entries);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Copy of everything collected so far.
    #[must_use]
    pub fn snapshot(&self) -> Vec<LogPushEntry> {
        self.entries.lock().clone()
    }
}
