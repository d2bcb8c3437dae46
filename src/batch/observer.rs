//! Batch progress reporting.
//!
//! Observers receive progress and per-batch outcomes. Every callback runs
//! behind a catch-and-log boundary, so a panicking observer never aborts the
//! batch loop.

use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::warn;

use crate::batch::ItemError;

/// Progress counters reported at start and after every completed batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchProgress {
    pub processed: usize,
    pub total: usize,
    pub batches_completed: usize,
    pub total_batches: usize,
}

/// Summary of the failed items of one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchFailure {
    pub failed: usize,
    /// Original input indices of the failed items
    pub indices: Vec<usize>,
    /// Message of the first failure
    pub message: String,
}

/// Receives batch lifecycle callbacks. All methods default to no-ops.
pub trait BatchObserver<T>: Send + Sync {
    fn on_progress(&self, _progress: &BatchProgress) {}

    /// `results` holds `(input index, value)` pairs of the batch's successes.
    fn on_batch_complete(&self, _batch_index: usize, _results: &[(usize, T)], _errors: &[ItemError]) {}

    /// Fires after `on_batch_complete` for batches with at least one failure.
    fn on_batch_error(&self, _batch_index: usize, _failure: &BatchFailure) {}
}

/// Observer that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl<T> BatchObserver<T> for NoopObserver {}

// == Event Stream ==
/// Typed batch event, as delivered by [`ChannelObserver`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchEvent {
    Progress(BatchProgress),
    BatchCompleted {
        batch_index: usize,
        succeeded: Vec<usize>,
        failed: Vec<usize>,
    },
    BatchFailed {
        batch_index: usize,
        failure: BatchFailure,
    },
}

/// Forwards events to an unbounded channel.
///
/// Send errors (receiver dropped) are ignored.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<BatchEvent>,
}

impl ChannelObserver {
    pub fn new(tx: mpsc::UnboundedSender<BatchEvent>) -> Self {
        Self { tx }
    }

    /// Creates an observer together with the receiving end of its stream.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<BatchEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl<T> BatchObserver<T> for ChannelObserver {
    fn on_progress(&self, progress: &BatchProgress) {
        let _ = self.tx.send(BatchEvent::Progress(*progress));
    }

    fn on_batch_complete(&self, batch_index: usize, results: &[(usize, T)], errors: &[ItemError]) {
        let _ = self.tx.send(BatchEvent::BatchCompleted {
            batch_index,
            succeeded: results.iter().map(|(index, _)| *index).collect(),
            failed: errors.iter().map(|e| e.index).collect(),
        });
    }

    fn on_batch_error(&self, batch_index: usize, failure: &BatchFailure) {
        let _ = self.tx.send(BatchEvent::BatchFailed {
            batch_index,
            failure: failure.clone(),
        });
    }
}

/// Runs an observer callback, logging instead of propagating a panic.
pub(crate) fn guarded(callback: &str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        warn!("Batch observer panicked in {}; continuing", callback);
    }
}
