use crate::{
    config::TeardownPolicy,
    metrics::CleanerStats,
    worker::CleanerWorker,
};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// Outcome of [`TeardownCoordinator::disable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TeardownReport {
    pub policy: TeardownPolicy,
    /// Handles created but never triggered when the flag flipped.
    pub live_handles: u64,
    /// Whether this call flipped the flag.
    pub first_call: bool,
}

/// The monotonic "scheduling disabled" flag and the routine that flips it.
#[derive(Debug)]
pub struct TeardownCoordinator {
    disabled: AtomicBool,
    policy: TeardownPolicy,
    leak_checker: bool,
}

impl TeardownCoordinator {
    pub fn new(policy: TeardownPolicy, leak_checker: bool) -> Self {
        Self {
            disabled: AtomicBool::new(false),
            policy,
            leak_checker,
        }
    }

    pub fn policy(&self) -> TeardownPolicy {
        self.policy
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Acquire)
    }

    /// Flips the flag, then stops the worker after it has run everything
    /// already queued.
    ///
    /// Every call stops the worker, so a second caller returns only once
    /// the thread is gone. Only the first call reports leaks.
    pub fn disable(&self, worker: &CleanerWorker, stats: &CleanerStats) -> TeardownReport {
        let first_call = !self.disabled.swap(true, Ordering::AcqRel);
        let live_handles = stats.snapshot().live();

        if first_call {
            debug!(
                "disabling cleaners ({}, {} live handle(s))",
                self.policy, live_handles
            );
            if self.leak_checker && live_handles > 0 {
                warn!(
                    "{} cleaner(s) still alive at teardown; their callbacks will never run",
                    live_handles
                );
            }
        }

        worker.shutdown();

        TeardownReport {
            policy: self.policy,
            live_handles,
            first_call,
        }
    }
}
