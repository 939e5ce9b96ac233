// =============================================================================
// error.rs - EVERYTHING THAT CAN GO WRONG, SORTED BY HOW MUCH IT HURTS
// =============================================================================
//
// Three tiers of pain:
//
// 1. PlatformError: one call to one AI platform went sideways. Captured into
//    the ScanResult and never propagated. The scan shrugs and moves on.
// 2. StoreError: a report couldn't be written or read.
// 3. RunFatalError: the only thing allowed to stop a scan. Roster gone,
//    no platforms configured, or somebody hit Ctrl+C.
// =============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A failed call to a single platform.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlatformError {
    #[error("API key not configured for {platform}; set {env_var}")]
    AuthMissing { platform: String, env_var: String },

    #[error("{platform} rate limited the request (HTTP {status})")]
    RateLimited { platform: String, status: u16 },

    #[error("{platform} did not answer within {timeout_secs}s")]
    Timeout { platform: String, timeout_secs: u64 },

    #[error("{platform} returned a response we could not parse: {reason}")]
    Unparseable { platform: String, reason: String },

    #[error("{platform} circuit breaker is open; call skipped")]
    CircuitOpen { platform: String },

    #[error("{platform} call failed: {message}")]
    Other { platform: String, message: String },
}

/// The error taxonomy used for metrics and for deciding who gets blamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Missing credentials. The platform is skipped, the run continues.
    Config,
    /// Timeout, network, rate limit, open breaker.
    TransientCall,
    /// The platform answered in a shape we don't understand.
    Parse,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Config => write!(f, "config"),
            ErrorCategory::TransientCall => write!(f, "transient_call"),
            ErrorCategory::Parse => write!(f, "parse"),
        }
    }
}

impl PlatformError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            PlatformError::AuthMissing { .. } => ErrorCategory::Config,
            PlatformError::Unparseable { .. } => ErrorCategory::Parse,
            PlatformError::RateLimited { .. }
            | PlatformError::Timeout { .. }
            | PlatformError::CircuitOpen { .. }
            | PlatformError::Other { .. } => ErrorCategory::TransientCall,
        }
    }

    /// Short machine-friendly tag stored next to the message in a ScanResult.
    pub fn kind(&self) -> &'static str {
        match self {
            PlatformError::AuthMissing { .. } => "auth_missing",
            PlatformError::RateLimited { .. } => "rate_limited",
            PlatformError::Timeout { .. } => "timeout",
            PlatformError::Unparseable { .. } => "unparseable",
            PlatformError::CircuitOpen { .. } => "circuit_open",
            PlatformError::Other { .. } => "other",
        }
    }

    /// Whether this failure should count against the platform's circuit breaker.
    /// An open breaker refusing a call is not new evidence the platform is down.
    pub fn trips_breaker(&self) -> bool {
        !matches!(self, PlatformError::CircuitOpen { .. })
    }
}

/// Report store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("report store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("report serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("report store backend error: {0}")]
    Backend(String),

    #[error("report not found: {0}")]
    NotFound(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// The serializable kind of a run-level failure, as recorded on a ScanRun.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunFailureKind {
    RosterUnavailable,
    NoPlatformsConfigured,
    Cancelled,
    Store,
}

/// Failures that abort a whole scan run.
#[derive(Debug, Error)]
pub enum RunFatalError {
    #[error("dealer roster unavailable: {0}")]
    RosterUnavailable(String),

    #[error("no AI platform is configured; missing keys: {}", missing.join(", "))]
    NoPlatformsConfigured { missing: Vec<String> },

    #[error("scan cancelled before completion")]
    Cancelled,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RunFatalError {
    pub fn kind(&self) -> RunFailureKind {
        match self {
            RunFatalError::RosterUnavailable(_) => RunFailureKind::RosterUnavailable,
            RunFatalError::NoPlatformsConfigured { .. } => RunFailureKind::NoPlatformsConfigured,
            RunFatalError::Cancelled => RunFailureKind::Cancelled,
            RunFatalError::Store(_) => RunFailureKind::Store,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        let auth = PlatformError::AuthMissing {
            platform: "claude".into(),
            env_var: "ANTHROPIC_API_KEY".into(),
        };
        assert_eq!(auth.category(), ErrorCategory::Config);

        let parse = PlatformError::Unparseable {
            platform: "gemini".into(),
            reason: "no candidates".into(),
        };
        assert_eq!(parse.category(), ErrorCategory::Parse);

        let limited = PlatformError::RateLimited {
            platform: "grok".into(),
            status: 429,
        };
        assert_eq!(limited.category(), ErrorCategory::TransientCall);
        assert_eq!(limited.kind(), "rate_limited");
    }

    #[test]
    fn test_open_breaker_does_not_count_against_itself() {
        let open = PlatformError::CircuitOpen { platform: "chatgpt".into() };
        assert!(!open.trips_breaker());
        let timeout = PlatformError::Timeout { platform: "chatgpt".into(), timeout_secs: 30 };
        assert!(timeout.trips_breaker());
    }

    #[test]
    fn test_fatal_error_message_lists_missing_keys() {
        let err = RunFatalError::NoPlatformsConfigured {
            missing: vec!["OPENAI_API_KEY".into(), "XAI_API_KEY".into()],
        };
        assert!(err.to_string().contains("OPENAI_API_KEY, XAI_API_KEY"));
        assert_eq!(err.kind(), RunFailureKind::NoPlatformsConfigured);
    }
}
