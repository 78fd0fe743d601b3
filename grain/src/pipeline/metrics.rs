use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free production line counters.
#[derive(Debug, Default)]
pub(crate) struct LineMetricsStorage {
    submitted: AtomicU64,
    started: AtomicU64,
    completed: AtomicU64,
    cleared: AtomicU64,
}

impl LineMetricsStorage {
    pub(crate) fn record_submitted(&self, count: u64) {
        self.submitted.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_started(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cleared(&self, count: u64) {
        self.cleared.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> LineMetrics {
        LineMetrics {
            submitted: self.submitted.load(Ordering::Relaxed),
            started: self.started.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            cleared: self.cleared.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of a line's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LineMetrics {
    pub submitted: u64,
    pub started: u64,
    pub completed: u64,
    pub cleared: u64,
}

impl LineMetrics {
    /// Stages started but not yet completed.
    pub fn in_flight(&self) -> u64 {
        self.started.saturating_sub(self.completed)
    }
}
