//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryPolicy;

/// Deterministic part of the delay after failed attempt `attempt` (1-based):
/// `min(max_delay, base_delay * backoff_factor^(attempt - 1))`.
pub fn capped_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let max_ms = policy.max_delay.as_millis() as f64;
    let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
    let delay_ms = policy.base_delay.as_millis() as f64 * policy.backoff_factor.powi(exponent);

    if !delay_ms.is_finite() || delay_ms >= max_ms {
        policy.max_delay
    } else {
        Duration::from_millis(delay_ms.max(0.0) as u64)
    }
}

/// Calculate exponential backoff delay with jitter uniformly sampled from
/// `[0, policy.jitter]`.
pub fn calculate_backoff(policy: &RetryPolicy, attempt: u32) -> Duration {
    capped_delay(policy, attempt) + sample_jitter(policy.jitter)
}

fn sample_jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}
