//! Retry logic.
//!
//! # Responsibilities
//! - Re-invoke an idempotent operation with exponential backoff + jitter
//! - Stop at once on non-retryable errors
//! - Consult an optional circuit breaker before every attempt
//! - Accumulate attempt/retry/delay statistics, globally and per key
//!
//! A breaker rejection is returned as [`ResilienceError::CircuitOpen`], is
//! never retried within the same execution and does not consume an attempt.
//! A failure that opens the circuit ends the execution the same way, without
//! a backoff wait.
//! When attempts run out the operation's final error is returned unchanged.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::error::{OperationError, ResilienceError};
use crate::resilience::backoff::calculate_backoff;
use crate::resilience::CircuitBreaker;

// == Retry Attempt ==
/// Details of a failed attempt that is about to be retried.
#[derive(Debug)]
pub struct RetryAttempt<'a> {
    /// 1-based number of the attempt that just failed
    pub attempt: u32,
    pub error: &'a OperationError,
    /// Wait before the next attempt
    pub delay: Duration,
    pub key: Option<&'a str>,
}

/// Callback fired before each retry wait.
pub type RetryHook = Arc<dyn Fn(&RetryAttempt<'_>) + Send + Sync>;

// == Retry Options ==
/// Per-call overrides.
#[derive(Clone, Default)]
pub struct RetryOptions {
    /// Replaces the executor's policy for this call
    pub policy: Option<RetryPolicy>,
    pub on_retry: Option<RetryHook>,
}

impl RetryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn on_retry<F>(mut self, hook: F) -> Self
    where
        F: Fn(&RetryAttempt<'_>) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for RetryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOptions")
            .field("policy", &self.policy)
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

// == Retry Stats ==
/// Running counters of an executor.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetryStats {
    /// Calls to `execute`
    pub total_executions: u64,
    /// Operation invocations
    pub total_attempts: u64,
    /// Waits performed before re-invoking
    pub total_retries: u64,
    /// Executions that still failed after at least one retry
    pub failed_retries: u64,
    /// Attempts refused by the circuit breaker
    pub circuit_rejections: u64,
    pub total_delay_ms: u64,
    pub average_delay_ms: f64,
}

impl RetryStats {
    fn record_delay(&mut self, delay: Duration) {
        self.total_retries += 1;
        self.total_delay_ms += delay.as_millis() as u64;
        self.average_delay_ms = self.total_delay_ms as f64 / self.total_retries as f64;
    }

    pub fn average_delay(&self) -> Duration {
        Duration::from_secs_f64(self.average_delay_ms / 1000.0)
    }
}

// == Retry Executor ==
/// Backoff-driven retry wrapper with an optional circuit breaker.
pub struct RetryExecutor {
    policy: RetryPolicy,
    breaker: Option<Arc<CircuitBreaker>>,
    stats: Mutex<RetryStats>,
    per_key: Mutex<HashMap<String, RetryStats>>,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            breaker: None,
            stats: Mutex::new(RetryStats::default()),
            per_key: Mutex::new(HashMap::new()),
        }
    }

    /// Guards every attempt with `breaker`.
    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.breaker.as_ref()
    }

    /// Runs `operation` with the executor's policy and no hook.
    pub async fn run<T, F, Fut>(&self, operation: F) -> Result<T, ResilienceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OperationError>>,
    {
        self.execute(operation, &RetryOptions::default(), None).await
    }

    // == Execute ==
    /// Invokes `operation` until it succeeds, fails non-retryably, the
    /// breaker refuses, or the attempt budget is spent.
    ///
    /// `key` labels the call in logs and per-key statistics. Each distinct
    /// key keeps a stats bucket until `reset_stats`, so pass low-cardinality
    /// labels such as an operation or endpoint name, never a message id.
    pub async fn execute<T, F, Fut>(
        &self,
        mut operation: F,
        options: &RetryOptions,
        key: Option<&str>,
    ) -> Result<T, ResilienceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OperationError>>,
    {
        let policy = options.policy.as_ref().unwrap_or(&self.policy);
        let max_attempts = policy.max_attempts.max(1);
        let label = key.unwrap_or("-");
        let mut attempt: u32 = 0;

        self.record(key, |s| s.total_executions += 1);

        loop {
            let permit = match &self.breaker {
                Some(breaker) => match breaker.try_acquire() {
                    Ok(permit) => Some(permit),
                    Err(rejection) => {
                        self.record(key, |s| s.circuit_rejections += 1);
                        debug!(
                            key = label,
                            breaker = breaker.name(),
                            "Attempt {} refused: {}",
                            attempt + 1,
                            rejection
                        );
                        return Err(rejection);
                    }
                },
                None => None,
            };

            attempt += 1;
            self.record(key, |s| s.total_attempts += 1);

            let err = match operation().await {
                Ok(value) => {
                    if let Some(permit) = permit {
                        permit.success();
                    }
                    if attempt > 1 {
                        debug!(key = label, "Succeeded on attempt {}", attempt);
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if let Some(permit) = permit {
                if !err.is_retryable() {
                    permit.release();
                } else if err.trips_breaker() {
                    permit.trip();
                } else {
                    permit.failure();
                }
            }

            if !err.is_retryable() {
                debug!(key = label, "Attempt {} failed permanently: {}", attempt, err);
                if attempt > 1 {
                    self.record(key, |s| s.failed_retries += 1);
                }
                return Err(err.into());
            }

            if attempt >= max_attempts {
                warn!(
                    key = label,
                    "Giving up after {} attempts: {}", attempt, err
                );
                if attempt > 1 {
                    self.record(key, |s| s.failed_retries += 1);
                }
                return Err(err.into());
            }

            // The failure just recorded may have opened the circuit; the next
            // attempt would be refused, so do not wait for it.
            if let Some(retry_after) = self.breaker.as_ref().and_then(|b| b.open_remaining()) {
                debug!(
                    key = label,
                    "Attempt {} left the circuit open, not retrying: {}", attempt, err
                );
                if attempt > 1 {
                    self.record(key, |s| s.failed_retries += 1);
                }
                return Err(ResilienceError::CircuitOpen { retry_after });
            }

            let delay = calculate_backoff(policy, attempt);
            if let Some(hook) = &options.on_retry {
                notify(
                    hook,
                    &RetryAttempt {
                        attempt,
                        error: &err,
                        delay,
                        key,
                    },
                );
            }
            self.record(key, |s| s.record_delay(delay));
            debug!(
                key = label,
                "Attempt {}/{} failed, retrying in {:?}: {}",
                attempt,
                max_attempts,
                delay,
                err
            );

            tokio::time::sleep(delay).await;
        }
    }

    pub fn stats(&self) -> RetryStats {
        lock(&self.stats).clone()
    }

    /// Statistics of calls made with `key`, if any.
    ///
    /// Buckets are never evicted; `reset_stats` is the only way to drop them.
    pub fn stats_for(&self, key: &str) -> Option<RetryStats> {
        lock(&self.per_key).get(key).cloned()
    }

    pub fn reset_stats(&self) {
        *lock(&self.stats) = RetryStats::default();
        lock(&self.per_key).clear();
    }

    fn record(&self, key: Option<&str>, update: impl Fn(&mut RetryStats)) {
        update(&mut *lock(&self.stats));
        if let Some(key) = key {
            update(lock(&self.per_key).entry(key.to_string()).or_default());
        }
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("policy", &self.policy)
            .field("breaker", &self.breaker.as_ref().map(|b| b.name().to_string()))
            .finish()
    }
}

/// Runs the hook, absorbing any panic so the retry loop continues.
fn notify(hook: &RetryHook, attempt: &RetryAttempt<'_>) {
    if catch_unwind(AssertUnwindSafe(|| (**hook)(attempt))).is_err() {
        warn!(
            "on_retry hook panicked on attempt {}; continuing",
            attempt.attempt
        );
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
