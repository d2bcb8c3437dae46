//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to an unreliable service:
//!     → circuit_breaker.rs (ask permission, fail fast while open)
//!     → operation (the caller's network call)
//!     → On failure: retry.rs (classify, wait with backoff.rs, re-invoke)
//!     → circuit_breaker.rs (record outcome, open on repeated failure)
//! ```

pub mod backoff;
pub mod circuit_breaker;
pub mod retry;

pub use backoff::{calculate_backoff, capped_delay};
pub use circuit_breaker::{BreakerPermit, BreakerSnapshot, CircuitBreaker, CircuitState};
pub use retry::{RetryAttempt, RetryExecutor, RetryHook, RetryOptions, RetryStats};
