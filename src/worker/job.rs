use crate::{
    error::{CleanerError, Result},
    metrics::CleanerStats,
    CleanerId,
};
use crossbeam_channel::{bounded, Receiver, Sender};
use enum_dispatch::enum_dispatch;
use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    process,
    sync::Arc,
};
use tracing::{error, trace, warn};

/// State the worker thread hands to every job it runs.
#[derive(Debug, Default)]
pub(crate) struct JobContext {
    pub(crate) stats: Arc<CleanerStats>,
}

impl JobContext {
    pub(crate) fn new(stats: Arc<CleanerStats>) -> Self {
        Self { stats }
    }
}

#[enum_dispatch]
pub(crate) trait Run {
    fn run(self, ctx: &JobContext);
}

/// A unit of work queued on the cleanup thread.
#[enum_dispatch(Run)]
pub(crate) enum Job {
    CleanupJob,
    TaskJob,
    ProbeJob,
}

/// A packaged cleanup: the callback with its payload already moved in.
pub(crate) struct CleanupJob {
    id: CleanerId,
    action: Box<dyn FnOnce() + Send>,
}

impl CleanupJob {
    pub(crate) fn new<T, F>(id: CleanerId, payload: T, callback: F) -> Self
    where
        T: Send + 'static,
        F: FnOnce(T) + Send + 'static,
    {
        Self {
            id,
            action: Box::new(move || callback(payload)),
        }
    }

    pub(crate) fn id(&self) -> CleanerId {
        self.id
    }
}

impl Run for CleanupJob {
    fn run(self, ctx: &JobContext) {
        trace!("running cleaner {}", self.id);
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(self.action)) {
            // The tracked resource may be half released; continuing would hide it.
            error!(
                "cleaner {} callback faulted: {}; terminating",
                self.id,
                panic_message(payload.as_ref())
            );
            process::abort();
        }
        ctx.stats.record_executed();
    }
}

/// An arbitrary closure run on the cleanup thread, reporting back through a
/// [`Completion`].
pub(crate) struct TaskJob {
    action: Box<dyn FnOnce() + Send>,
}

impl TaskJob {
    pub(crate) fn new<R, F>(f: F) -> (Self, Completion<R>)
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        let (tx, rx) = bounded(1);
        let job = Self {
            action: Box::new(move || {
                let _ = tx.send(f());
            }),
        };
        (job, Completion { receiver: rx })
    }
}

impl Run for TaskJob {
    fn run(self, _ctx: &JobContext) {
        // A panicking task only fails its own completion.
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(self.action)) {
            warn!(
                "task on cleaner worker panicked: {}",
                panic_message(payload.as_ref())
            );
        }
    }
}

/// A no-op whose only effect is to signal that the queue reached it.
pub(crate) struct ProbeJob {
    done: Sender<()>,
}

impl ProbeJob {
    pub(crate) fn new() -> (Self, Completion<()>) {
        let (tx, rx) = bounded(1);
        (Self { done: tx }, Completion { receiver: rx })
    }
}

impl Run for ProbeJob {
    fn run(self, _ctx: &JobContext) {
        let _ = self.done.send(());
    }
}

/// The pending result of work submitted to the cleanup thread.
#[must_use = "a completion does nothing unless waited on"]
pub struct Completion<R> {
    receiver: Receiver<R>,
}

impl<R> Completion<R> {
    /// Blocks until the work has run.
    ///
    /// Fails if the worker dropped the work without running it, either
    /// because it panicked or because the worker stopped first.
    pub fn wait(self) -> Result<R> {
        self.receiver
            .recv()
            .map_err(|_| CleanerError::WorkerDisconnected)
    }

    /// Returns the result if the work has already run.
    pub fn try_wait(&self) -> Option<R> {
        self.receiver.try_recv().ok()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "<non-string panic payload>"
    }
}
