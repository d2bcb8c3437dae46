//! Batch subsystem.
//!
//! # Data Flow
//! ```text
//! process_batch(items):
//!     → executor.rs (split into batches, bounded concurrency)
//!     → resilience::RetryExecutor (per item, breaker-guarded)
//!     → observer.rs (progress and per-batch callbacks)
//!     → result.rs (index-aligned aggregate)
//! ```

pub mod executor;
pub mod observer;
pub mod result;

pub use executor::{BatchExecutor, BatchOptions};
pub use observer::{
    BatchEvent, BatchFailure, BatchObserver, BatchProgress, ChannelObserver, NoopObserver,
};
pub use result::{BatchResult, ItemError};
