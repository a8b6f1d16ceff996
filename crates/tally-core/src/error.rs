//! Shared error type across tally crates.

use thiserror::Error;

/// When an error is allowed to happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPhase {
    /// Registration / config mistake. Fatal at startup.
    Startup,
    /// Individual instrumentation call. Reported to diagnostics, call is a no-op.
    HotPath,
}

impl ErrorPhase {
    /// String representation used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorPhase::Startup => "startup",
            ErrorPhase::HotPath => "hot_path",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, TallyError>;

/// Unified error type used by core and agent.
#[derive(Debug, Error)]
pub enum TallyError {
    #[error("configuration: {0}")]
    Configuration(String),
    #[error("unsafe label key `{key}` for metric `{metric}` (unbounded value domain)")]
    UnsafeLabel { metric: String, key: String },
    #[error("unknown metric: {0}")]
    UnknownMetric(String),
    #[error("no histogram buckets registered for metric: {0}")]
    UnregisteredMetric(String),
    #[error("metric `{metric}` is not a {expected}")]
    WrongKind { metric: String, expected: &'static str },
    #[error("invalid counter amount {0} (counters are monotonic)")]
    InvalidAmount(i64),
    #[error("invalid histogram observation: {0}")]
    InvalidObservation(f64),
    #[error("invalid buckets for metric `{metric}`: {reason}")]
    InvalidBuckets { metric: String, reason: String },
    #[error("series limit {limit} reached for metric `{metric}`")]
    SeriesLimitExceeded { metric: String, limit: usize },
    #[error("internal: {0}")]
    Internal(String),
}

impl TallyError {
    /// Classify the error by the phase it belongs to.
    pub fn phase(&self) -> ErrorPhase {
        match self {
            TallyError::Configuration(_)
            | TallyError::UnsafeLabel { .. }
            | TallyError::InvalidBuckets { .. }
            | TallyError::Internal(_) => ErrorPhase::Startup,
            TallyError::UnknownMetric(_)
            | TallyError::UnregisteredMetric(_)
            | TallyError::WrongKind { .. }
            | TallyError::InvalidAmount(_)
            | TallyError::InvalidObservation(_)
            | TallyError::SeriesLimitExceeded { .. } => ErrorPhase::HotPath,
        }
    }

    /// True for errors that must abort startup.
    pub fn is_fatal(&self) -> bool {
        self.phase() == ErrorPhase::Startup
    }
}
