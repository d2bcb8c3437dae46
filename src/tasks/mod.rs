//! Background Tasks Module
//!
//! Long-running maintenance tasks spawned next to the diagnostics server.
//!
//! # Tasks
//! - TTL Cleanup: purges expired cache entries at the configured interval

mod cleanup;

pub use cleanup::spawn_cleanup_task;
