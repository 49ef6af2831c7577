//! The boundary between a collector and the cleanup machinery.
//!
//! A collector that decides a handle is unreachable hands it over as an
//! [`UnreachableEvent`]. Delivering the event only enqueues work; the callback
//! itself always runs on the cleanup thread.
use crate::{cleaner::Cleaner, runtime::CleanerRuntime};
use tracing::trace;

/// A handle reported dead by a collector.
///
/// Owning the handle is what makes the report at-most-once: a collector
/// cannot report the same handle twice.
#[derive(Debug)]
pub struct UnreachableEvent {
    cleaner: Cleaner,
}

impl UnreachableEvent {
    pub fn new(cleaner: Cleaner) -> Self {
        Self { cleaner }
    }

    pub fn cleaner(&self) -> &Cleaner {
        &self.cleaner
    }
}

impl From<Cleaner> for UnreachableEvent {
    fn from(cleaner: Cleaner) -> Self {
        Self::new(cleaner)
    }
}

#[derive(Debug, Clone)]
pub struct CollectorHook {
    runtime: CleanerRuntime,
}

impl CollectorHook {
    pub fn new(runtime: CleanerRuntime) -> Self {
        Self { runtime }
    }

    /// Triggers a single handle. Returns as soon as the cleanup is queued,
    /// or immediately if scheduling has been disabled.
    pub fn on_unreachable(&self, cleaner: Cleaner) {
        if !cleaner.belongs_to(&self.runtime) {
            trace!(
                "cleaner {} reported to a hook of another runtime",
                cleaner.id()
            );
        }
        cleaner.trigger();
    }

    /// Delivers a batch in order. Returns the number of events delivered.
    pub fn deliver<I>(&self, events: I) -> usize
    where
        I: IntoIterator<Item = UnreachableEvent>,
    {
        let mut delivered = 0;
        for event in events {
            self.on_unreachable(event.cleaner);
            delivered += 1;
        }
        delivered
    }
}
