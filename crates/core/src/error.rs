use std::fmt;

/// Failure taxonomy for the engine. Call sites return `anyhow::Result` and
/// attach one of these as the root cause so callers can classify a failure
/// with `downcast_ref::<EngineError>()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Upstream has no data for the requested date/stock.
    DataUnavailable { detail: String },

    /// Upstream throttling signal.
    RateLimitExceeded { detail: String },

    /// Malformed or missing logic-library fields at load time. The run must
    /// abort; a partially loaded logic library is never used.
    ConfigInvalid {
        entry: Option<String>,
        detail: String,
    },

    /// A pattern group fell below the minimum sample threshold. Not a run
    /// failure: a visible "no conclusion" state, never a silent zero.
    InsufficientSample {
        key: String,
        samples: usize,
        minimum: usize,
    },
}

impl EngineError {
    pub fn data_unavailable(detail: impl Into<String>) -> Self {
        Self::DataUnavailable {
            detail: detail.into(),
        }
    }

    pub fn rate_limited(detail: impl Into<String>) -> Self {
        Self::RateLimitExceeded {
            detail: detail.into(),
        }
    }

    pub fn config_invalid(entry: Option<&str>, detail: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            entry: entry.map(str::to_string),
            detail: detail.into(),
        }
    }

    /// Per-sample upstream failures are retried with bounded backoff;
    /// everything else fails fast.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DataUnavailable { .. } | Self::RateLimitExceeded { .. }
        )
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DataUnavailable { detail } => write!(f, "data unavailable: {detail}"),
            Self::RateLimitExceeded { detail } => write!(f, "rate limit exceeded: {detail}"),
            Self::ConfigInvalid { entry, detail } => match entry {
                Some(entry) => write!(f, "invalid logic library (entry {entry:?}): {detail}"),
                None => write!(f, "invalid logic library: {detail}"),
            },
            Self::InsufficientSample {
                key,
                samples,
                minimum,
            } => write!(
                f,
                "insufficient sample for {key}: {samples} < minimum {minimum}"
            ),
        }
    }
}

impl std::error::Error for EngineError {}

/// True when the root cause is a retryable upstream condition.
pub fn is_retryable(err: &anyhow::Error) -> bool {
    err.downcast_ref::<EngineError>()
        .is_some_and(EngineError::is_retryable)
}
