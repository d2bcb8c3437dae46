//! Aggregated outcome of a batch job.

use std::time::Duration;

use crate::error::ResilienceError;

/// Failure of a single input item, keyed by its original index.
#[derive(Debug)]
pub struct ItemError {
    pub index: usize,
    pub error: ResilienceError,
}

/// Outcome of [`BatchExecutor::process_batch`](crate::batch::BatchExecutor::process_batch).
///
/// `results` is aligned with the input: slot `i` holds the value of item `i`
/// when it succeeded, `None` when it failed or never ran.
#[derive(Debug)]
pub struct BatchResult<T> {
    pub results: Vec<Option<T>>,
    /// Failures in ascending index order
    pub errors: Vec<ItemError>,
    pub total_items: usize,
    /// Items whose operation ran to a final outcome
    pub total_processed: usize,
    pub total_batches: usize,
    pub batches_completed: usize,
    pub cancelled: bool,
    /// No failures and not cancelled
    pub success: bool,
    pub elapsed: Duration,
}

impl<T> BatchResult<T> {
    /// Successful values with their input index.
    pub fn successes(&self) -> impl Iterator<Item = (usize, &T)> {
        self.results
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|value| (index, value)))
    }

    pub fn success_count(&self) -> usize {
        self.results.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn error_for(&self, index: usize) -> Option<&ResilienceError> {
        self.errors.iter().find(|e| e.index == index).map(|e| &e.error)
    }
}
