// ═══════════════════════════════════════════════════════════════
// METRICS - per-platform call accounting for one scan run
// ═══════════════════════════════════════════════════════════════
//
// Atomic counters, one set per platform, shared by that platform's workers.
// The same counters decide whether a failure gets logged: the first few
// failures of a platform are logged, then only every Nth, so a platform
// that is down for the whole run doesn't bury the log.

use portable_atomic::{AtomicU64, Ordering};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorCategory, PlatformError};

/// What to do with the log line for a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureLog {
    Emit,
    /// Emit, and mention how many were swallowed since the last one.
    EmitWithSuppressed(u64),
    Suppress,
}

#[derive(Debug, Clone, Copy)]
pub struct FailureLogPolicy {
    pub burst: u64,
    pub every: u64,
}

impl Default for FailureLogPolicy {
    fn default() -> Self {
        Self { burst: 3, every: 25 }
    }
}

pub struct PlatformMetrics {
    calls_attempted: AtomicU64,
    calls_succeeded: AtomicU64,
    calls_failed: AtomicU64,
    config_errors: AtomicU64,
    transient_errors: AtomicU64,
    parse_errors: AtomicU64,
    mentions_found: AtomicU64,
    total_latency_ms: AtomicU64,
    suppressed_since_last_log: AtomicU64,
    log_policy: FailureLogPolicy,
}

impl PlatformMetrics {
    pub fn new(log_policy: FailureLogPolicy) -> Self {
        Self {
            calls_attempted: AtomicU64::new(0),
            calls_succeeded: AtomicU64::new(0),
            calls_failed: AtomicU64::new(0),
            config_errors: AtomicU64::new(0),
            transient_errors: AtomicU64::new(0),
            parse_errors: AtomicU64::new(0),
            mentions_found: AtomicU64::new(0),
            total_latency_ms: AtomicU64::new(0),
            suppressed_since_last_log: AtomicU64::new(0),
            log_policy,
        }
    }

    pub fn record_success(&self, latency_ms: u64, mentions: u32) {
        self.calls_attempted.fetch_add(1, Ordering::Relaxed);
        self.calls_succeeded.fetch_add(1, Ordering::Relaxed);
        self.mentions_found.fetch_add(u64::from(mentions), Ordering::Relaxed);
        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);
    }

    /// Count the failure and decide whether it deserves a log line.
    pub fn record_failure(&self, err: &PlatformError, latency_ms: u64) -> FailureLog {
        self.calls_attempted.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);
        let nth = self.calls_failed.fetch_add(1, Ordering::Relaxed) + 1;

        match err.category() {
            ErrorCategory::Config => self.config_errors.fetch_add(1, Ordering::Relaxed),
            ErrorCategory::TransientCall => self.transient_errors.fetch_add(1, Ordering::Relaxed),
            ErrorCategory::Parse => self.parse_errors.fetch_add(1, Ordering::Relaxed),
        };

        let policy = self.log_policy;
        if nth <= policy.burst {
            return FailureLog::Emit;
        }
        if policy.every > 0 && (nth - policy.burst) % policy.every == 0 {
            let swallowed = self.suppressed_since_last_log.swap(0, Ordering::Relaxed);
            return if swallowed > 0 {
                FailureLog::EmitWithSuppressed(swallowed)
            } else {
                FailureLog::Emit
            };
        }
        self.suppressed_since_last_log.fetch_add(1, Ordering::Relaxed);
        FailureLog::Suppress
    }

    pub fn snapshot(&self, circuit_trips: u64) -> PlatformMetricsSnapshot {
        let attempted = self.calls_attempted.load(Ordering::Relaxed);
        let total_latency = self.total_latency_ms.load(Ordering::Relaxed);
        PlatformMetricsSnapshot {
            calls_attempted: attempted,
            calls_succeeded: self.calls_succeeded.load(Ordering::Relaxed),
            calls_failed: self.calls_failed.load(Ordering::Relaxed),
            config_errors: self.config_errors.load(Ordering::Relaxed),
            transient_errors: self.transient_errors.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            mentions_found: self.mentions_found.load(Ordering::Relaxed),
            average_latency_ms: if attempted > 0 {
                total_latency as f64 / attempted as f64
            } else {
                0.0
            },
            circuit_trips,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PlatformMetricsSnapshot {
    pub calls_attempted: u64,
    pub calls_succeeded: u64,
    pub calls_failed: u64,
    pub config_errors: u64,
    pub transient_errors: u64,
    pub parse_errors: u64,
    pub mentions_found: u64,
    pub average_latency_ms: f64,
    pub circuit_trips: u64,
}
