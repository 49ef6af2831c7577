use crate::{
    error::{CleanerError, Result},
    runtime::{CleanerRuntime, RuntimeShared},
    shareable::Shareable,
    worker::CleanupJob,
};
use std::{any, fmt, sync::Arc};
use tracing::trace;

/// Identity of a [`Cleaner`], unique within its runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CleanerId(pub(crate) u64);

impl CleanerId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CleanerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A cleanup action bound to a payload.
///
/// The handle owns the payload and never hands it back. It is move-only:
/// whoever holds it last decides when it becomes unreachable. Dropping it, or
/// calling [`Cleaner::trigger`], schedules the callback on the runtime's
/// cleanup thread exactly once. If the runtime has already been torn down the
/// payload is released without running the callback.
///
/// Callbacks are plain function pointers, so nothing reaches the cleanup
/// thread without passing the [`Shareable`] gate: state the callback needs is
/// passed explicitly through [`Cleaner::with_state`]. Non-capturing closures
/// coerce to the pointer types.
///
/// A callback that panics aborts the process.
pub struct Cleaner {
    id: CleanerId,
    job: Option<CleanupJob>,
    runtime: Arc<RuntimeShared>,
}

impl Cleaner {
    /// Creates a handle that runs `callback(payload)`.
    ///
    /// Fails with [`CleanerError::InvalidArgument`] if the payload is not
    /// [`Shareable`]; the cleanup thread is not started in that case.
    /// Otherwise the cleanup thread is started (once per runtime) before this
    /// returns.
    pub fn new<T>(runtime: &CleanerRuntime, payload: T, callback: fn(T)) -> Result<Self>
    where
        T: Shareable + Send + 'static,
    {
        Self::with_state(runtime, payload, callback, |payload, callback| {
            callback(payload)
        })
    }

    /// Creates a handle that runs `callback(payload, state)`.
    ///
    /// Both the payload and the state must be [`Shareable`].
    pub fn with_state<T, S>(
        runtime: &CleanerRuntime,
        payload: T,
        state: S,
        callback: fn(T, S),
    ) -> Result<Self>
    where
        T: Shareable + Send + 'static,
        S: Shareable + Send + 'static,
    {
        let shared = runtime.shared();
        if !payload.is_shareable() {
            return Err(reject::<T>(shared, "payload"));
        }
        if !state.is_shareable() {
            return Err(reject::<S>(shared, "callback state"));
        }

        if !shared.teardown.is_disabled() {
            shared.worker.start()?;
        }

        let id = shared.next_id();
        shared.stats.record_created();
        trace!("created cleaner {}", id);

        let job = CleanupJob::new(id, (payload, state), move |(payload, state)| {
            callback(payload, state)
        });
        Ok(Self {
            id,
            job: Some(job),
            runtime: Arc::clone(shared),
        })
    }

    pub fn id(&self) -> CleanerId {
        self.id
    }

    /// Schedules the cleanup now instead of waiting for the handle to be
    /// dropped.
    pub fn trigger(mut self) {
        self.schedule();
    }

    /// Whether this handle belongs to `runtime`.
    pub fn belongs_to(&self, runtime: &CleanerRuntime) -> bool {
        Arc::ptr_eq(&self.runtime, runtime.shared())
    }

    fn schedule(&mut self) {
        if let Some(job) = self.job.take() {
            self.runtime.schedule(job);
        }
    }
}

fn reject<V>(shared: &RuntimeShared, what: &str) -> CleanerError {
    shared.stats.record_rejected();
    CleanerError::InvalidArgument(format!(
        "{} of type `{}` must be shareable",
        what,
        any::type_name::<V>()
    ))
}

impl Drop for Cleaner {
    fn drop(&mut self) {
        self.schedule();
    }
}

impl fmt::Debug for Cleaner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cleaner")
            .field("id", &self.id)
            .field("pending", &self.job.is_some())
            .finish()
    }
}
