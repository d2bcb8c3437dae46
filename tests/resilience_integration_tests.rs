//! Integration Tests for the resilience core
//!
//! Exercises cache, retry, breaker and batch together through the public
//! library API, the way a triage pipeline wires them.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_test::{assert_err, assert_ok};
use triage_resilience::{
    batch::{BatchEvent, ChannelObserver},
    config::{BatchConfig, BreakerConfig, CacheConfig, RetryPolicy},
    BatchExecutor, BatchOptions, BoundedCache, CircuitBreaker, CircuitState, OperationError,
    ResilienceError, RetryExecutor, RetryOptions, SharedCache,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Triage {
    message_id: String,
    priority: u8,
}

fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(80),
        backoff_factor: 2.0,
        jitter: Duration::ZERO,
    }
}

/// Cache-aside lookup: serve from cache, otherwise classify through the
/// retry executor and store the result.
async fn classify_cached(
    cache: &SharedCache<Triage>,
    retry: &RetryExecutor,
    calls: &AtomicUsize,
    message_id: &str,
) -> Result<Triage, ResilienceError> {
    let key = format!("triage:{}", message_id);
    if let Some(hit) = cache.write().await.get(&key) {
        return Ok(hit);
    }

    let result = retry
        .execute(
            move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    return Err(OperationError::retryable(anyhow::anyhow!("429 Too Many Requests")));
                }
                Ok(Triage {
                    message_id: message_id.to_string(),
                    priority: 2,
                })
            },
            &RetryOptions::default(),
            Some("classify"),
        )
        .await?;

    cache
        .write()
        .await
        .set(key, result.clone(), None)
        .map_err(|e| ResilienceError::from(OperationError::non_retryable(e)))?;
    Ok(result)
}

#[tokio::test(start_paused = true)]
async fn test_second_call_is_served_from_cache() {
    let cache = BoundedCache::new(CacheConfig::default()).into_shared();
    let retry = RetryExecutor::new(fast_policy(3));
    let calls = AtomicUsize::new(0);

    let first = assert_ok!(classify_cached(&cache, &retry, &calls, "m-1").await);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let second = assert_ok!(classify_cached(&cache, &retry, &calls, "m-1").await);
    assert_eq!(second, first);
    assert_eq!(calls.load(Ordering::SeqCst), 2, "cache hit must not invoke the operation");

    let stats = cache.read().await.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(retry.stats_for("classify").unwrap().total_retries, 1);
}

#[tokio::test(start_paused = true)]
async fn test_breaker_opens_then_recovers_after_timeout() {
    let breaker = Arc::new(CircuitBreaker::new(BreakerConfig {
        failure_threshold: 3,
        recovery_timeout: Duration::from_secs(5),
    }));
    let retry = RetryExecutor::new(RetryPolicy::immediate(1)).with_breaker(breaker.clone());
    let calls = AtomicUsize::new(0);
    let calls_ref = &calls;

    for _ in 0..3 {
        let result: Result<(), _> = retry
            .run(move || async move {
                calls_ref.fetch_add(1, Ordering::SeqCst);
                Err(OperationError::retryable(anyhow::anyhow!("connection reset")))
            })
            .await;
        assert_err!(result);
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    let rejected: Result<(), _> = retry
        .run(move || async move {
            calls_ref.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await;
    assert!(assert_err!(rejected).is_circuit_open());
    assert_eq!(calls.load(Ordering::SeqCst), 3, "open breaker must not invoke");

    tokio::time::advance(Duration::from_secs(6)).await;

    let recovered = retry
        .run(move || async move {
            calls_ref.fetch_add(1, Ordering::SeqCst);
            Ok::<_, OperationError>("ok")
        })
        .await;
    assert_eq!(assert_ok!(recovered), "ok");
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(retry.stats().circuit_rejections, 1);
}

#[tokio::test(start_paused = true)]
async fn test_batch_isolates_failures_and_reports_progress() {
    let retry = Arc::new(RetryExecutor::new(fast_policy(2)));
    let executor = BatchExecutor::new(BatchConfig::default().with_batch_size(10), retry.clone());
    let (observer, mut events) = ChannelObserver::channel();
    let attempts = AtomicUsize::new(0);
    let attempts_ref = &attempts;

    let messages: Vec<String> = (0..25).map(|i| format!("m-{}", i)).collect();
    let result = executor
        .process_batch(
            messages,
            move |message, index| async move {
                attempts_ref.fetch_add(1, Ordering::SeqCst);
                if index == 17 {
                    return Err(OperationError::retryable(anyhow::anyhow!("timeout on {}", message)));
                }
                Ok(Triage {
                    message_id: message,
                    priority: (index % 3) as u8,
                })
            },
            &BatchOptions::new().with_key("triage-batch"),
            &observer,
        )
        .await;

    assert_eq!(result.total_batches, 3);
    assert_eq!(result.total_processed, 25);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].index, 17);
    assert!(result.results[17].is_none());
    assert_eq!(result.results[3].as_ref().unwrap().message_id, "m-3");
    assert!(!result.success);
    // 24 single attempts plus two for the failing item
    assert_eq!(attempts.load(Ordering::SeqCst), 26);

    let mut saw_start = false;
    let mut failed_batches = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event {
            BatchEvent::Progress(p) if p.processed == 0 => saw_start = true,
            BatchEvent::BatchFailed { batch_index, failure } => {
                assert_eq!(failure.indices, vec![17]);
                failed_batches.push(batch_index);
            }
            _ => {}
        }
    }
    assert!(saw_start);
    assert_eq!(failed_batches, vec![1]);
}

#[tokio::test]
async fn test_batch_behind_open_breaker_fails_fast() {
    let breaker = Arc::new(CircuitBreaker::new(BreakerConfig::default()));
    breaker.force_open();
    let retry = Arc::new(RetryExecutor::new(RetryPolicy::immediate(3)).with_breaker(breaker));
    let executor = BatchExecutor::new(BatchConfig::default(), retry);
    let calls = AtomicUsize::new(0);
    let calls_ref = &calls;

    let result = executor
        .process((0..5u32).collect(), move |item, _| async move {
            calls_ref.fetch_add(1, Ordering::SeqCst);
            Ok::<_, OperationError>(item)
        })
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(result.errors.len(), 5);
    assert!(result.errors.iter().all(|e| e.error.is_circuit_open()));
    assert!(!result.success);
}
