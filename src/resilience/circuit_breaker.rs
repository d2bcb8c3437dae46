//! Circuit breaker for downstream protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: dependency assumed down, calls fail fast
//! - Half-Open: a single probe tests whether the dependency recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= threshold (or a tripping failure)
//! Open → Half-Open: first call attempt after the recovery timeout
//! Half-Open → Closed: probe succeeds
//! Half-Open → Open: probe fails
//! ```
//!
//! The Open → Half-Open check happens lazily inside [`CircuitBreaker::try_acquire`];
//! there is no background timer. While the probe is in flight every other
//! caller is rejected as if the circuit were still open.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::BreakerConfig;
use crate::error::ResilienceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    last_transition: Instant,
    probe_in_flight: bool,
    total_successes: u64,
    total_failures: u64,
    total_rejections: u64,
    transitions: u64,
}

/// Point-in-time view of a breaker, for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    pub since_transition_ms: u64,
    pub probe_in_flight: bool,
    pub total_successes: u64,
    pub total_failures: u64,
    pub total_rejections: u64,
    pub transitions: u64,
}

/// Failure-driven state machine guarding one downstream dependency.
///
/// Share it as `Arc<CircuitBreaker>`; every holder observes the same state.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self::named("default", config)
    }

    /// Creates a breaker whose name appears in logs and snapshots.
    pub fn named(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            failure_threshold: config.failure_threshold.max(1),
            recovery_timeout: config.recovery_timeout,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_transition: Instant::now(),
                probe_in_flight: false,
                total_successes: 0,
                total_failures: 0,
                total_rejections: 0,
                transitions: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Asks permission for one call.
    ///
    /// Returns [`ResilienceError::CircuitOpen`] when the call must not be made.
    /// The returned permit must be resolved with the call's outcome.
    pub fn try_acquire(&self) -> Result<BreakerPermit<'_>, ResilienceError> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Ok(BreakerPermit::new(self, false)),
            CircuitState::Open => {
                let elapsed = inner.last_transition.elapsed();
                if elapsed >= self.recovery_timeout {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    inner.probe_in_flight = true;
                    Ok(BreakerPermit::new(self, true))
                } else {
                    inner.total_rejections += 1;
                    Err(ResilienceError::CircuitOpen {
                        retry_after: self.recovery_timeout - elapsed,
                    })
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    inner.total_rejections += 1;
                    Err(ResilienceError::CircuitOpen {
                        retry_after: Duration::ZERO,
                    })
                } else {
                    inner.probe_in_flight = true;
                    Ok(BreakerPermit::new(self, true))
                }
            }
        }
    }

    /// Current state. Does not perform the lazy Open → Half-Open transition.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Time left before an open circuit admits a probe, or None when the
    /// circuit is not open.
    pub fn open_remaining(&self) -> Option<Duration> {
        let inner = self.lock();
        match inner.state {
            CircuitState::Open => Some(
                self.recovery_timeout
                    .saturating_sub(inner.last_transition.elapsed()),
            ),
            _ => None,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// Opens the circuit immediately, restarting the recovery timer.
    pub fn force_open(&self) {
        let mut inner = self.lock();
        inner.probe_in_flight = false;
        self.transition(&mut inner, CircuitState::Open);
    }

    /// Returns to Closed with counters cleared.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = 0;
        inner.probe_in_flight = false;
        if inner.state != CircuitState::Closed {
            self.transition(&mut inner, CircuitState::Closed);
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            failure_threshold: self.failure_threshold,
            since_transition_ms: inner.last_transition.elapsed().as_millis() as u64,
            probe_in_flight: inner.probe_in_flight,
            total_successes: inner.total_successes,
            total_failures: inner.total_failures,
            total_rejections: inner.total_rejections,
            transitions: inner.transitions,
        }
    }

    fn on_success(&self, probe: bool) {
        let mut inner = self.lock();
        inner.total_successes += 1;
        match inner.state {
            CircuitState::Closed => inner.consecutive_failures = 0,
            CircuitState::HalfOpen if probe => {
                inner.probe_in_flight = false;
                inner.consecutive_failures = 0;
                self.transition(&mut inner, CircuitState::Closed);
            }
            // Calls admitted before the circuit opened say nothing about recovery.
            _ => {}
        }
    }

    fn on_failure(&self, probe: bool) {
        let mut inner = self.lock();
        inner.total_failures += 1;
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen if probe => {
                inner.probe_in_flight = false;
                self.transition(&mut inner, CircuitState::Open);
            }
            _ => {}
        }
    }

    fn on_trip(&self) {
        let mut inner = self.lock();
        inner.total_failures += 1;
        inner.consecutive_failures += 1;
        inner.probe_in_flight = false;
        self.transition(&mut inner, CircuitState::Open);
    }

    fn on_release(&self, probe: bool) {
        if probe {
            let mut inner = self.lock();
            if inner.state == CircuitState::HalfOpen {
                inner.probe_in_flight = false;
            }
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        inner.last_transition = Instant::now();
        inner.transitions += 1;

        match to {
            CircuitState::Open => warn!(
                breaker = %self.name,
                failures = inner.consecutive_failures,
                "Circuit {:?} -> Open, rejecting calls for {:?}",
                from,
                self.recovery_timeout
            ),
            _ => info!(breaker = %self.name, "Circuit {:?} -> {:?}", from, to),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

// == Breaker Permit ==
/// Permission to make one guarded call.
///
/// Resolve it with the call's outcome. A permit dropped without an outcome
/// frees the probe slot but records nothing.
#[must_use = "resolve the permit with the call outcome"]
#[derive(Debug)]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    resolved: bool,
}

impl<'a> BreakerPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, probe: bool) -> Self {
        Self {
            breaker,
            probe,
            resolved: false,
        }
    }

    /// Whether this permit is the single Half-Open probe.
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn success(mut self) {
        self.resolved = true;
        self.breaker.on_success(self.probe);
    }

    pub fn failure(mut self) {
        self.resolved = true;
        self.breaker.on_failure(self.probe);
    }

    /// Records a failure that opens the circuit regardless of the threshold.
    pub fn trip(mut self) {
        self.resolved = true;
        self.breaker.on_trip();
    }

    /// Ends the call without judging the dependency's health.
    pub fn release(mut self) {
        self.resolved = true;
        self.breaker.on_release(self.probe);
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            self.breaker.on_release(self.probe);
        }
    }
}
