// =============================================================================
// circuit_breaker.rs - ONE BREAKER PER AI PLATFORM
// =============================================================================
//
// When a platform starts failing every call (expired key, outage, a rate
// limit that won't lift), there is no point spending the rest of the roster
// on it. After N consecutive failures the breaker trips and calls to that
// platform fail fast as `CircuitOpen` results. After the cooldown one trial
// call is let through; enough successes close it again.
//
// Tripping never aborts the run. Each refused call still becomes its own
// zero-score ScanResult, exactly like any other per-call failure.
//
// State sits behind a parking_lot RwLock and is shared by every worker of
// the platform.
// =============================================================================

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// - Closed: calls flow.
/// - Open: calls are refused until the reset timeout passes.
/// - HalfOpen: trial calls are allowed to find out if the platform is back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

struct CircuitBreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<Instant>,
    total_trips: u64,
}

pub struct CircuitBreaker {
    /// Platform name, for logs.
    name: String,
    inner: RwLock<CircuitBreakerInner>,
    failure_threshold: u32,
    reset_timeout: Duration,
    success_threshold: u32,
}

impl CircuitBreaker {
    pub fn new(
        name: impl Into<String>,
        failure_threshold: u32,
        reset_timeout: Duration,
        success_threshold: u32,
    ) -> Self {
        let name = name.into();
        info!(
            platform = %name,
            failure_threshold = failure_threshold,
            reset_timeout_secs = reset_timeout.as_secs(),
            success_threshold = success_threshold,
            "Circuit breaker initialized"
        );

        Self {
            name,
            inner: RwLock::new(CircuitBreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_time: None,
                total_trips: 0,
            }),
            failure_threshold: failure_threshold.max(1),
            reset_timeout,
            success_threshold: success_threshold.max(1),
        }
    }

    /// Whether a call may go out right now. An expired Open breaker moves to
    /// HalfOpen here and lets the call through as a trial call.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.write();

        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => match inner.last_failure_time {
                Some(last_failure) if last_failure.elapsed() >= self.reset_timeout => {
                    info!(platform = %self.name, "Circuit breaker OPEN -> HALF_OPEN, probing platform");
                    inner.state = CircuitState::HalfOpen;
                    inner.success_count = 0;
                    true
                }
                Some(_) => false,
                None => true,
            },
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.write();

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.success_threshold {
                    info!(
                        platform = %self.name,
                        successes = inner.success_count,
                        "Circuit breaker HALF_OPEN -> CLOSED, platform healthy again"
                    );
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                }
            }
            // A call that was already in flight when the breaker tripped.
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.write();

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                inner.last_failure_time = Some(Instant::now());

                if inner.failure_count >= self.failure_threshold {
                    warn!(
                        platform = %self.name,
                        failures = inner.failure_count,
                        "Circuit breaker TRIPPED, CLOSED -> OPEN"
                    );
                    inner.state = CircuitState::Open;
                    inner.total_trips += 1;
                }
            }
            CircuitState::HalfOpen => {
                warn!(platform = %self.name, "Probe failed, HALF_OPEN -> OPEN");
                inner.state = CircuitState::Open;
                inner.failure_count = self.failure_threshold;
                inner.last_failure_time = Some(Instant::now());
                inner.total_trips += 1;
            }
            CircuitState::Open => {
                inner.last_failure_time = Some(Instant::now());
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.read().state
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn total_trips(&self) -> u64 {
        self.inner.read().total_trips
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_closed() {
        let cb = CircuitBreaker::new("chatgpt", 3, Duration::from_secs(5), 2);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.allow_request());
    }

    #[test]
    fn test_trips_after_threshold_failures() {
        let cb = CircuitBreaker::new("chatgpt", 3, Duration::from_secs(5), 2);
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow_request());
        assert_eq!(cb.total_trips(), 1);
    }

    #[test]
    fn test_success_resets_failure_count() {
        let cb = CircuitBreaker::new("claude", 3, Duration::from_secs(5), 2);
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_trial_closes_after_successes() {
        let cb = CircuitBreaker::new("gemini", 1, Duration::ZERO, 2);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        assert!(cb.allow_request());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let cb = CircuitBreaker::new("grok", 1, Duration::ZERO, 2);
        cb.record_failure();
        assert!(cb.allow_request());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.total_trips(), 2);
    }
}
