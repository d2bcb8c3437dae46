//! Cancellable, concurrency-bounded batch processing.
//!
//! Items are split into fixed-size batches. Up to `max_concurrent_batches`
//! batches are in flight at once, and inside each batch up to
//! `max_concurrent_items` item operations run concurrently. Every item goes
//! through the shared [`RetryExecutor`], so its retries (and the breaker
//! behind it) are independent of its siblings.
//!
//! Everything is driven on the caller's task with `buffer_unordered`; no
//! work is spawned.

use std::future::Future;
use std::pin::pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::stream::{self, StreamExt};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::batch::observer::{guarded, BatchFailure, BatchObserver, BatchProgress, NoopObserver};
use crate::batch::result::{BatchResult, ItemError};
use crate::config::{BatchConfig, RetryPolicy};
use crate::error::{OperationError, ResilienceError};
use crate::resilience::{RetryExecutor, RetryOptions};

/// Per-job overrides.
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Replaces the executor's batch sizing for this job
    pub batch: Option<BatchConfig>,
    /// Hook and policy override passed to every item's retry loop
    pub retry: RetryOptions,
    /// Key under which item retries are bucketed in the retry stats
    pub key: Option<String>,
}

impl BatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch(mut self, batch: BatchConfig) -> Self {
        self.batch = Some(batch);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = self.retry.with_policy(policy);
        self
    }

    pub fn with_retry(mut self, retry: RetryOptions) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

/// What one batch produced.
struct BatchOutcome<T> {
    batch_index: usize,
    successes: Vec<(usize, T)>,
    errors: Vec<ItemError>,
    processed: usize,
}

/// Counts a running job; the count drops even if the job future is
/// dropped early.
struct ProcessingGuard<'a>(&'a AtomicUsize);

impl<'a> ProcessingGuard<'a> {
    fn enter(jobs: &'a AtomicUsize) -> Self {
        jobs.fetch_add(1, Ordering::SeqCst);
        Self(jobs)
    }
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

// == Batch Executor ==
pub struct BatchExecutor {
    config: BatchConfig,
    retry: Arc<RetryExecutor>,
    /// Cancellation flag of the most recently started job
    cancel: Mutex<Arc<AtomicBool>>,
    /// Jobs currently inside `process_batch`
    running_jobs: AtomicUsize,
}

impl BatchExecutor {
    pub fn new(config: BatchConfig, retry: Arc<RetryExecutor>) -> Self {
        Self {
            config,
            retry,
            cancel: Mutex::new(Arc::new(AtomicBool::new(false))),
            running_jobs: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn retry_executor(&self) -> &Arc<RetryExecutor> {
        &self.retry
    }

    /// Requests cancellation of the running job.
    ///
    /// Items and batches not yet started are skipped; operations already
    /// dispatched run to completion.
    pub fn cancel_processing(&self) {
        info!("Batch cancellation requested");
        lock(&self.cancel).store(true, Ordering::SeqCst);
    }

    /// True while at least one job is running on this executor.
    pub fn is_processing(&self) -> bool {
        self.running_jobs.load(Ordering::SeqCst) > 0
    }

    /// Processes `items` with default options and no observer.
    pub async fn process<I, T, F, Fut>(&self, items: Vec<I>, operation: F) -> BatchResult<T>
    where
        I: Clone,
        F: Fn(I, usize) -> Fut,
        Fut: Future<Output = Result<T, OperationError>>,
    {
        self.process_batch(items, operation, &BatchOptions::default(), &NoopObserver)
            .await
    }

    // == Process Batch ==
    /// Runs `operation(item, index)` for every item and aggregates the outcomes.
    ///
    /// Never fails as a whole: item failures land in `BatchResult::errors`.
    pub async fn process_batch<I, T, F, Fut>(
        &self,
        items: Vec<I>,
        operation: F,
        options: &BatchOptions,
        observer: &dyn BatchObserver<T>,
    ) -> BatchResult<T>
    where
        I: Clone,
        F: Fn(I, usize) -> Fut,
        Fut: Future<Output = Result<T, OperationError>>,
    {
        let started = Instant::now();
        let config = options.batch.as_ref().unwrap_or(&self.config);
        let batch_size = config.batch_size.max(1);
        let max_batches = config.max_concurrent_batches.max(1);
        let item_concurrency = config.max_concurrent_items.unwrap_or(batch_size).max(1);

        let total_items = items.len();
        let total_batches = total_items.div_ceil(batch_size);

        let cancel = Arc::new(AtomicBool::new(false));
        *lock(&self.cancel) = Arc::clone(&cancel);
        let _guard = ProcessingGuard::enter(&self.running_jobs);

        info!(
            "Batch job started: {} items in {} batches of {}",
            total_items, total_batches, batch_size
        );

        let mut progress = BatchProgress {
            processed: 0,
            total: total_items,
            batches_completed: 0,
            total_batches,
        };
        guarded("on_progress", || observer.on_progress(&progress));

        let mut batches = Vec::with_capacity(total_batches);
        let mut indexed = items.into_iter().enumerate().peekable();
        while indexed.peek().is_some() {
            batches.push(indexed.by_ref().take(batch_size).collect::<Vec<_>>());
        }

        let mut results: Vec<Option<T>> = (0..total_items).map(|_| None).collect();
        let mut errors = Vec::new();
        let key = options.key.as_deref();
        let retry_options = &options.retry;
        let operation = &operation;
        let cancel_flag = cancel.as_ref();

        let mut outcomes = pin!(stream::iter(batches.into_iter().enumerate())
            .map(move |(batch_index, batch)| {
                self.run_batch(
                    batch_index,
                    batch,
                    operation,
                    retry_options,
                    key,
                    item_concurrency,
                    cancel_flag,
                )
            })
            .buffer_unordered(max_batches));

        while let Some(outcome) = outcomes.next().await {
            let Some(outcome) = outcome else {
                continue;
            };
            let BatchOutcome {
                batch_index,
                successes,
                errors: batch_errors,
                processed,
            } = outcome;

            guarded("on_batch_complete", || {
                observer.on_batch_complete(batch_index, &successes, &batch_errors)
            });

            if let Some(first) = batch_errors.first() {
                let failure = BatchFailure {
                    failed: batch_errors.len(),
                    indices: batch_errors.iter().map(|e| e.index).collect(),
                    message: first.error.to_string(),
                };
                warn!(
                    "Batch {} finished with {} failed items",
                    batch_index, failure.failed
                );
                guarded("on_batch_error", || observer.on_batch_error(batch_index, &failure));
            }

            for (index, value) in successes {
                results[index] = Some(value);
            }
            errors.extend(batch_errors);

            progress.processed += processed;
            progress.batches_completed += 1;
            guarded("on_progress", || observer.on_progress(&progress));

            tokio::task::yield_now().await;
        }

        errors.sort_by_key(|e| e.index);
        let cancelled = cancel.load(Ordering::SeqCst);
        let success = errors.is_empty() && !cancelled;
        let elapsed = started.elapsed();

        info!(
            "Batch job finished: {}/{} processed, {} failed, cancelled={}, elapsed={:?}",
            progress.processed,
            total_items,
            errors.len(),
            cancelled,
            elapsed
        );

        BatchResult {
            results,
            errors,
            total_items,
            total_processed: progress.processed,
            total_batches,
            batches_completed: progress.batches_completed,
            cancelled,
            success,
            elapsed,
        }
    }

    /// Runs one batch. Returns `None` when cancellation was requested before
    /// the batch started.
    #[allow(clippy::too_many_arguments)]
    async fn run_batch<I, T, F, Fut>(
        &self,
        batch_index: usize,
        batch: Vec<(usize, I)>,
        operation: &F,
        retry_options: &RetryOptions,
        key: Option<&str>,
        concurrency: usize,
        cancel: &AtomicBool,
    ) -> Option<BatchOutcome<T>>
    where
        I: Clone,
        F: Fn(I, usize) -> Fut,
        Fut: Future<Output = Result<T, OperationError>>,
    {
        if cancel.load(Ordering::SeqCst) {
            debug!("Skipping batch {}: job cancelled", batch_index);
            return None;
        }
        debug!("Starting batch {} ({} items)", batch_index, batch.len());

        let finished: Vec<(usize, Option<Result<T, ResilienceError>>)> = stream::iter(batch)
            .map(move |(index, item)| async move {
                if cancel.load(Ordering::SeqCst) {
                    return (index, None);
                }
                let result = self
                    .retry
                    .execute(|| operation(item.clone(), index), retry_options, key)
                    .await;
                (index, Some(result))
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut successes = Vec::new();
        let mut errors = Vec::new();
        for (index, result) in finished {
            match result {
                Some(Ok(value)) => successes.push((index, value)),
                Some(Err(error)) => errors.push(ItemError { index, error }),
                None => {}
            }
        }
        successes.sort_by_key(|(index, _)| *index);
        errors.sort_by_key(|e| e.index);

        Some(BatchOutcome {
            batch_index,
            processed: successes.len() + errors.len(),
            successes,
            errors,
        })
    }
}

impl Default for BatchExecutor {
    fn default() -> Self {
        Self::new(BatchConfig::default(), Arc::new(RetryExecutor::default()))
    }
}

impl std::fmt::Debug for BatchExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchExecutor")
            .field("config", &self.config)
            .field("processing", &self.is_processing())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
