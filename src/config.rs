//! Configuration Module
//!
//! Handles loading and managing configuration for every component from
//! environment variables. All values are optional and fall back to defaults.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

use crate::cache::EvictionPolicy;

/// Floor for the TTL sweep interval; shorter intervals thrash the cache lock.
pub const MIN_CLEANUP_INTERVAL: Duration = Duration::from_secs(1);

/// Reads an environment variable and parses it, falling back to `default`.
fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_ms_or(name: &str, default: Duration) -> Duration {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

// == Cache Config ==
/// Bounded cache parameters.
#[derive(Debug, Clone, Serialize)]
pub struct CacheConfig {
    /// Maximum number of entries the cache can hold
    pub max_entries: usize,
    /// Maximum estimated bytes held by all entries
    pub max_memory_usage: usize,
    /// TTL for entries stored without an explicit TTL
    pub default_ttl: Duration,
    pub eviction_policy: EvictionPolicy,
    /// Interval of the background TTL sweep
    pub cleanup_interval: Duration,
}

impl CacheConfig {
    /// Loads cache settings.
    ///
    /// # Environment Variables
    /// - `MAX_ENTRIES` (default: 1000)
    /// - `MAX_MEMORY_USAGE` in bytes (default: 50 MiB)
    /// - `DEFAULT_TTL_MS` (default: 300000)
    /// - `EVICTION_POLICY` one of lru, lfu, fifo (default: lru)
    /// - `CLEANUP_INTERVAL_MS` (default: 60000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_entries: env_or("MAX_ENTRIES", defaults.max_entries),
            max_memory_usage: env_or("MAX_MEMORY_USAGE", defaults.max_memory_usage),
            default_ttl: env_ms_or("DEFAULT_TTL_MS", defaults.default_ttl),
            eviction_policy: env_or("EVICTION_POLICY", defaults.eviction_policy),
            cleanup_interval: env_ms_or("CLEANUP_INTERVAL_MS", defaults.cleanup_interval),
        }
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn with_max_memory_usage(mut self, bytes: usize) -> Self {
        self.max_memory_usage = bytes;
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.eviction_policy = policy;
        self
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            max_memory_usage: 50 * 1024 * 1024,
            default_ttl: Duration::from_secs(300),
            eviction_policy: EvictionPolicy::Lru,
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

// == Retry Policy ==
/// Backoff parameters for retried operations.
#[derive(Debug, Clone, Serialize)]
pub struct RetryPolicy {
    /// Total invocations allowed, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// Upper bound of the uniform jitter added to each delay
    pub jitter: Duration,
}

impl RetryPolicy {
    /// Loads retry settings.
    ///
    /// # Environment Variables
    /// - `MAX_ATTEMPTS` (default: 3)
    /// - `BASE_DELAY_MS` (default: 1000)
    /// - `MAX_DELAY_MS` (default: 30000)
    /// - `BACKOFF_FACTOR` (default: 2.0)
    /// - `JITTER_MS` (default: 250)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_attempts: env_or("MAX_ATTEMPTS", defaults.max_attempts),
            base_delay: env_ms_or("BASE_DELAY_MS", defaults.base_delay),
            max_delay: env_ms_or("MAX_DELAY_MS", defaults.max_delay),
            backoff_factor: env_or("BACKOFF_FACTOR", defaults.backoff_factor),
            jitter: env_ms_or("JITTER_MS", defaults.jitter),
        }
    }

    /// Policy with no waits, for callers that only want the attempt budget.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_factor: 1.0,
            jitter: Duration::ZERO,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            backoff_factor: 2.0,
            jitter: Duration::from_millis(250),
        }
    }
}

// == Breaker Config ==
/// Circuit breaker thresholds.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Time the circuit stays open before a probe is allowed
    pub recovery_timeout: Duration,
}

impl BreakerConfig {
    /// Loads breaker settings.
    ///
    /// # Environment Variables
    /// - `FAILURE_THRESHOLD` (default: 5)
    /// - `RECOVERY_TIMEOUT_MS` (default: 30000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            failure_threshold: env_or("FAILURE_THRESHOLD", defaults.failure_threshold),
            recovery_timeout: env_ms_or("RECOVERY_TIMEOUT_MS", defaults.recovery_timeout),
        }
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_millis(30_000),
        }
    }
}

// == Batch Config ==
/// Batch partitioning and concurrency limits.
#[derive(Debug, Clone, Serialize)]
pub struct BatchConfig {
    pub batch_size: usize,
    pub max_concurrent_batches: usize,
    /// In-flight items per batch; None means the whole batch at once
    pub max_concurrent_items: Option<usize>,
}

impl BatchConfig {
    /// Loads batch settings.
    ///
    /// # Environment Variables
    /// - `BATCH_SIZE` (default: 10)
    /// - `MAX_CONCURRENT_BATCHES` (default: 3)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            batch_size: env_or("BATCH_SIZE", defaults.batch_size),
            max_concurrent_batches: env_or(
                "MAX_CONCURRENT_BATCHES",
                defaults.max_concurrent_batches,
            ),
            max_concurrent_items: None,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_max_concurrent_batches(mut self, max: usize) -> Self {
        self.max_concurrent_batches = max;
        self
    }

    pub fn with_max_concurrent_items(mut self, max: usize) -> Self {
        self.max_concurrent_items = Some(max);
        self
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_concurrent_batches: 3,
            max_concurrent_items: None,
        }
    }
}

// == Config ==
/// Full configuration for the diagnostics server binary.
#[derive(Debug, Clone)]
pub struct Config {
    pub cache: CacheConfig,
    pub retry: RetryPolicy,
    pub breaker: BreakerConfig,
    pub batch: BatchConfig,
    /// HTTP server port
    pub server_port: u16,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// `SERVER_PORT` defaults to 3000; see the component configs for the rest.
    pub fn from_env() -> Self {
        Self {
            cache: CacheConfig::from_env(),
            retry: RetryPolicy::from_env(),
            breaker: BreakerConfig::from_env(),
            batch: BatchConfig::from_env(),
            server_port: env_or("SERVER_PORT", 3000),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            retry: RetryPolicy::default(),
            breaker: BreakerConfig::default(),
            batch: BatchConfig::default(),
            server_port: 3000,
        }
    }
}
