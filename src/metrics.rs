use std::sync::atomic::{AtomicU64, Ordering};

/// Lifetime counters for a [`CleanerRuntime`](crate::CleanerRuntime).
#[derive(Debug, Default)]
pub struct CleanerStats {
    /// Handles constructed
    pub created: AtomicU64,
    /// Payloads refused by the shareability gate
    pub rejected: AtomicU64,
    /// Triggers that reached the worker queue
    pub scheduled: AtomicU64,
    /// Cleanup callbacks that ran to completion
    pub executed: AtomicU64,
    /// Triggers discarded because teardown had already happened
    pub dropped_after_teardown: AtomicU64,
}

/// A point-in-time copy of [`CleanerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub created: u64,
    pub rejected: u64,
    pub scheduled: u64,
    pub executed: u64,
    pub dropped_after_teardown: u64,
}

impl StatsSnapshot {
    /// Handles created but not yet triggered by any path.
    pub fn live(&self) -> u64 {
        self.created
            .saturating_sub(self.scheduled)
            .saturating_sub(self.dropped_after_teardown)
    }
}

impl CleanerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_created(&self) {
        self.created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_scheduled(&self) {
        self.scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_executed(&self) {
        self.executed.fetch_add(1, Ordering::AcqRel);
    }

    pub fn record_dropped(&self) {
        self.dropped_after_teardown.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            created: self.created.load(Ordering::Acquire),
            rejected: self.rejected.load(Ordering::Acquire),
            scheduled: self.scheduled.load(Ordering::Acquire),
            executed: self.executed.load(Ordering::Acquire),
            dropped_after_teardown: self.dropped_after_teardown.load(Ordering::Acquire),
        }
    }
}
