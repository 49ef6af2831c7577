//! The cleaner service object.
//!
//! A [`CleanerRuntime`] owns the cleanup thread, the teardown flag and the
//! statistics. Handles are created against a runtime, and the host tears it
//! down once at exit with [`CleanerRuntime::shutdown`]. Hosts that want a
//! single process-wide instance use [`CleanerRuntime::global`].
use crate::{
    cleaner::{Cleaner, CleanerId},
    collector::CollectorHook,
    config::{CleanerConfig, TeardownPolicy},
    error::{CleanerError, Result},
    metrics::{CleanerStats, StatsSnapshot},
    shareable::Shareable,
    teardown::{TeardownCoordinator, TeardownReport},
    worker::{CleanerWorker, CleanupJob, Completion, WorkerState},
};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, OnceLock,
};
use tracing::{debug, trace};

static GLOBAL: OnceLock<CleanerRuntime> = OnceLock::new();

pub(crate) struct RuntimeShared {
    pub(crate) config: CleanerConfig,
    pub(crate) stats: Arc<CleanerStats>,
    pub(crate) worker: CleanerWorker,
    pub(crate) teardown: TeardownCoordinator,
    next_id: AtomicU64,
}

impl RuntimeShared {
    pub(crate) fn next_id(&self) -> CleanerId {
        CleanerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// The trigger path shared by `Drop`, [`Cleaner::trigger`] and the
    /// collector hook. Never blocks beyond the enqueue.
    pub(crate) fn schedule(&self, job: CleanupJob) {
        let id = job.id();
        if self.teardown.is_disabled() {
            trace!("cleaner {} triggered after teardown; dropping", id);
            self.stats.record_dropped();
            drop(job);
            return;
        }

        match self.worker.submit(job.into()) {
            Ok(()) => {
                self.stats.record_scheduled();
                trace!("scheduled cleaner {}", id);
            }
            Err(_) => {
                // Lost the race with teardown.
                trace!("cleaner {} triggered while stopping; dropping", id);
                self.stats.record_dropped();
            }
        }
    }

    fn disable(&self) -> TeardownReport {
        self.teardown.disable(&self.worker, &self.stats)
    }
}

impl Drop for RuntimeShared {
    fn drop(&mut self) {
        self.disable();
    }
}

/// Handle to a cleaner service. Cloning shares the same service.
#[derive(Clone)]
pub struct CleanerRuntime {
    shared: Arc<RuntimeShared>,
}

impl CleanerRuntime {
    /// Builds a runtime. The cleanup thread is not started until the first
    /// handle is created.
    pub fn new(config: CleanerConfig) -> Self {
        let stats = Arc::new(CleanerStats::new());
        let worker = CleanerWorker::new(config.worker_name.clone(), stats.clone());
        let teardown = TeardownCoordinator::new(config.teardown_policy, config.leak_checker);
        Self {
            shared: Arc::new(RuntimeShared {
                config,
                stats,
                worker,
                teardown,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// The process-wide runtime, configured from the environment on first
    /// use.
    pub fn global() -> &'static CleanerRuntime {
        GLOBAL.get_or_init(|| CleanerRuntime::new(CleanerConfig::from_env()))
    }

    pub(crate) fn shared(&self) -> &Arc<RuntimeShared> {
        &self.shared
    }

    pub fn config(&self) -> &CleanerConfig {
        &self.shared.config
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn worker(&self) -> &CleanerWorker {
        &self.shared.worker
    }

    /// A front for collectors reporting unreachable handles.
    pub fn hook(&self) -> CollectorHook {
        CollectorHook::new(self.clone())
    }

    pub fn is_disabled(&self) -> bool {
        self.shared.teardown.is_disabled()
    }

    /// Creates a handle on this runtime. See [`Cleaner::new`].
    pub fn create<T>(&self, payload: T, callback: fn(T)) -> Result<Cleaner>
    where
        T: Shareable + Send + 'static,
    {
        Cleaner::new(self, payload, callback)
    }

    /// See [`Cleaner::with_state`].
    pub fn create_with_state<T, S>(&self, payload: T, state: S, callback: fn(T, S)) -> Result<Cleaner>
    where
        T: Shareable + Send + 'static,
        S: Shareable + Send + 'static,
    {
        Cleaner::with_state(self, payload, state, callback)
    }

    /// Runs `f` on the cleanup thread, starting it if needed.
    pub fn execute<R, F>(&self, f: F) -> Result<Completion<R>>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        if !self.is_disabled() {
            self.shared.worker.start()?;
        }
        self.shared.worker.execute(f)
    }

    /// Blocks until every cleanup scheduled before this call has finished.
    ///
    /// With no thread started there is nothing to wait for. During teardown
    /// this waits for the thread to stop instead.
    pub fn run_synchronous_probe(&self) -> Result<()> {
        let worker = &self.shared.worker;
        match worker.run_synchronous_probe() {
            Err(CleanerError::WorkerStopped) => {
                if worker.state() != WorkerState::NotStarted {
                    worker.wait_stopped();
                }
                Ok(())
            }
            other => other,
        }
    }

    /// Disables scheduling, then stops the cleanup thread once everything
    /// already queued has run. Idempotent.
    pub fn disable(&self) -> TeardownReport {
        self.shared.disable()
    }

    /// Process-teardown entry point. Hosts call this once at exit.
    ///
    /// `final_pass` is the host's last collection, such as a
    /// [`TrackedHeap::collect`](crate::TrackedHeap::collect) or dropping the
    /// handles it still owns. Under [`TeardownPolicy::Drain`] it runs before
    /// scheduling is disabled, so whatever it collects is still cleaned up.
    /// Under [`TeardownPolicy::HardStop`] it runs after, and whatever it
    /// collects is released without running. Cleanups queued before the flag
    /// flipped run before this returns under both policies.
    pub fn shutdown<F: FnOnce()>(&self, final_pass: F) -> TeardownReport {
        let report = match self.shared.teardown.policy() {
            TeardownPolicy::Drain => {
                final_pass();
                self.disable()
            }
            TeardownPolicy::HardStop => {
                let report = self.disable();
                final_pass();
                report
            }
        };
        debug!("cleaner runtime shut down: {:?}", report);
        report
    }
}

impl std::fmt::Debug for CleanerRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanerRuntime")
            .field("config", &self.shared.config)
            .field("worker", &self.shared.worker)
            .field("disabled", &self.is_disabled())
            .finish()
    }
}

/// Creates a handle on the [global](CleanerRuntime::global) runtime.
pub fn create_cleaner<T>(payload: T, callback: fn(T)) -> Result<Cleaner>
where
    T: Shareable + Send + 'static,
{
    Cleaner::new(CleanerRuntime::global(), payload, callback)
}

/// Tears down the [global](CleanerRuntime::global) runtime. See
/// [`CleanerRuntime::shutdown`].
pub fn shutdown_global<F: FnOnce()>(final_pass: F) -> TeardownReport {
    CleanerRuntime::global().shutdown(final_pass)
}
