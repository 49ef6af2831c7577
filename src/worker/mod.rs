//! The background cleanup context.
//!
//! A single named thread drains a FIFO queue of jobs. Nothing else in the
//! crate ever runs a cleanup callback.
//!
//! ```text
//!  mutators / collector              cleanup thread
//!  ────────────────────              ──────────────
//!  submit(job) ──► unbounded queue ──► job.run()   (one at a time, in order)
//!  probe()     ──►       │          ──► signal waiter
//!  shutdown()  ──► Shutdown marker  ──► exit, state = Stopped
//! ```
//!
//! The thread is started lazily by [`CleanerWorker::start`], which does not
//! return until a handshake probe has run on the new thread.
mod job;

pub use job::Completion;
pub(crate) use job::{CleanupJob, Job};

use crate::{
    error::{CleanerError, Result},
    metrics::CleanerStats,
};
use crossbeam_channel::{unbounded, Receiver, Sender};
use job::{JobContext, ProbeJob, Run, TaskJob};
use parking_lot::{Condvar, Mutex};
use std::{
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc, OnceLock,
    },
    thread::{self, JoinHandle, ThreadId},
};
use tracing::{debug, trace, warn};

/// Lifecycle of the cleanup thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    NotStarted,
    Running,
    ShuttingDown,
    Stopped,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerState::NotStarted,
            1 => WorkerState::Running,
            2 => WorkerState::ShuttingDown,
            _ => WorkerState::Stopped,
        }
    }
}

enum WorkerMessage {
    Run(Job),
    Shutdown,
}

#[derive(Default)]
struct Lifecycle {
    sender: Option<Sender<WorkerMessage>>,
    thread: Option<JoinHandle<()>>,
}

struct WorkerInner {
    name: String,
    state: AtomicU8,
    thread_id: OnceLock<ThreadId>,
    lifecycle: Mutex<Lifecycle>,
    stopped: Condvar,
    context: JobContext,
}

impl WorkerInner {
    fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn run(self: Arc<Self>, receiver: Receiver<WorkerMessage>) {
        debug!("cleaner worker '{}' started", self.name);

        while let Ok(message) = receiver.recv() {
            match message {
                WorkerMessage::Run(job) => job.run(&self.context),
                WorkerMessage::Shutdown => break,
            }
        }

        let _lifecycle = self.lifecycle.lock();
        self.set_state(WorkerState::Stopped);
        self.stopped.notify_all();
        debug!("cleaner worker '{}' stopped", self.name);
    }
}

/// Handle to the single cleanup thread.
pub struct CleanerWorker {
    inner: Arc<WorkerInner>,
}

impl CleanerWorker {
    pub fn new(name: impl Into<String>, stats: Arc<CleanerStats>) -> Self {
        Self {
            inner: Arc::new(WorkerInner {
                name: name.into(),
                state: AtomicU8::new(WorkerState::NotStarted as u8),
                thread_id: OnceLock::new(),
                lifecycle: Mutex::new(Lifecycle::default()),
                stopped: Condvar::new(),
                context: JobContext::new(stats),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn state(&self) -> WorkerState {
        self.inner.state()
    }

    /// Whether the calling thread is the cleanup thread.
    pub fn is_worker_thread(&self) -> bool {
        self.inner
            .thread_id
            .get()
            .is_some_and(|id| *id == thread::current().id())
    }

    /// Starts the cleanup thread if it has never been started.
    ///
    /// Concurrent callers block until the first one has observed a handshake
    /// probe running on the new thread. A worker that has been shut down is
    /// never restarted.
    pub fn start(&self) -> Result<()> {
        if self.state() != WorkerState::NotStarted {
            return Ok(());
        }

        let mut lifecycle = self.inner.lifecycle.lock();
        if self.state() != WorkerState::NotStarted {
            return Ok(());
        }

        let (sender, receiver) = unbounded();
        let inner = Arc::clone(&self.inner);
        let handle = thread::Builder::new()
            .name(self.inner.name.clone())
            .spawn(move || inner.run(receiver))?;
        let _ = self.inner.thread_id.set(handle.thread().id());

        let (probe, handshake) = ProbeJob::new();
        sender
            .send(WorkerMessage::Run(probe.into()))
            .map_err(|_| CleanerError::WorkerDisconnected)?;
        lifecycle.sender = Some(sender);
        lifecycle.thread = Some(handle);

        handshake.wait()?;
        self.inner.set_state(WorkerState::Running);
        trace!("cleaner worker '{}' is ready", self.inner.name);
        Ok(())
    }

    /// Queues a job behind everything submitted before it. Never blocks on
    /// the job itself.
    pub(crate) fn submit(&self, job: Job) -> Result<()> {
        let rejected = {
            let lifecycle = self.inner.lifecycle.lock();
            match (&lifecycle.sender, self.state()) {
                (Some(sender), WorkerState::Running) => {
                    sender.send(WorkerMessage::Run(job)).err().map(|e| e.0)
                }
                _ => Some(WorkerMessage::Run(job)),
            }
        };

        // Dropped outside the lock: releasing a payload may trigger other
        // cleaners, which submit again.
        match rejected {
            None => Ok(()),
            Some(message) => {
                drop(message);
                Err(CleanerError::WorkerStopped)
            }
        }
    }

    /// Runs `f` on the cleanup thread after all previously queued work.
    pub fn execute<R, F>(&self, f: F) -> Result<Completion<R>>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        let (job, completion) = TaskJob::new(f);
        self.submit(job.into())?;
        Ok(completion)
    }

    /// Blocks until every job submitted before this call has finished.
    ///
    /// Calling this from the cleanup thread would wait on itself, so it
    /// returns immediately there.
    pub fn run_synchronous_probe(&self) -> Result<()> {
        if self.is_worker_thread() {
            warn!("synchronous probe requested from the cleaner worker itself");
            return Ok(());
        }
        let (probe, completion) = ProbeJob::new();
        self.submit(probe.into())?;
        completion.wait()
    }

    /// Blocks while a shutdown started elsewhere is still in progress.
    pub fn wait_stopped(&self) {
        if self.is_worker_thread() {
            return;
        }
        let mut lifecycle = self.inner.lifecycle.lock();
        while self.state() == WorkerState::ShuttingDown {
            self.inner.stopped.wait(&mut lifecycle);
        }
    }

    /// Stops accepting work, runs everything already queued, and joins the
    /// thread. Queued work is never retracted.
    ///
    /// Idempotent. Callers arriving while another shutdown is in progress
    /// wait for the thread to stop. On the cleanup thread itself the request
    /// is recorded but nothing is joined.
    pub fn shutdown(&self) {
        let on_worker = self.is_worker_thread();
        let handle = {
            let mut lifecycle = self.inner.lifecycle.lock();
            match self.state() {
                WorkerState::NotStarted => {
                    self.inner.set_state(WorkerState::Stopped);
                    self.inner.stopped.notify_all();
                    return;
                }
                WorkerState::Stopped => return,
                WorkerState::ShuttingDown => {
                    if !on_worker {
                        while self.state() != WorkerState::Stopped {
                            self.inner.stopped.wait(&mut lifecycle);
                        }
                    }
                    return;
                }
                WorkerState::Running => {}
            }

            self.inner.set_state(WorkerState::ShuttingDown);
            if let Some(sender) = lifecycle.sender.take() {
                let _ = sender.send(WorkerMessage::Shutdown);
            }
            lifecycle.thread.take()
        };

        debug!("cleaner worker '{}' shutting down", self.inner.name);

        if on_worker {
            // Joining here would wait on ourselves; the loop exits once the
            // current job returns.
            return;
        }

        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("cleaner worker '{}' panicked", self.inner.name);
                let _lifecycle = self.inner.lifecycle.lock();
                self.inner.set_state(WorkerState::Stopped);
                self.inner.stopped.notify_all();
            }
        }
    }
}

impl Drop for CleanerWorker {
    fn drop(&mut self) {
        // The thread holds its own reference to the shared state, so it
        // would otherwise outlive this handle.
        self.shutdown();
    }
}

impl std::fmt::Debug for CleanerWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanerWorker")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .finish()
    }
}
