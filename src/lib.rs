//! Triage Resilience - resilient execution core for an email-triage service
//!
//! Bounded caching with TTL and policy-driven eviction, retries with
//! exponential backoff behind a circuit breaker, and cancellable batch
//! processing with bounded concurrency.

pub mod api;
pub mod batch;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod resilience;
pub mod tasks;

pub use api::{create_router, AppState};
pub use batch::{BatchExecutor, BatchObserver, BatchOptions, BatchResult};
pub use cache::{BoundedCache, EvictionPolicy, SharedCache};
pub use config::Config;
pub use error::{CacheError, OperationError, ResilienceError};
pub use resilience::{CircuitBreaker, CircuitState, RetryExecutor, RetryOptions};
pub use tasks::spawn_cleanup_task;
