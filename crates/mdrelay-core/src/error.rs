//! Error types for mdrelay-core.

use thiserror::Error;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid subscription key: {0}")]
    InvalidKey(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Failure of a push or pull feed operation.
///
/// `Clone` because a single coalesced fetch hands the same outcome to
/// every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    /// Channel-level failure, recoverable via reconnect.
    #[error("Transport failure: {0}")]
    TransportFailure(String),

    /// Pull request did not complete within the configured timeout.
    #[error("Fetch timed out after {timeout_ms}ms")]
    FetchTimeout { timeout_ms: u64 },

    /// Reconnect attempts exhausted; no automatic retry until resumed.
    #[error("Channel exhausted after {attempts} attempts")]
    ChannelExhausted { attempts: u32 },

    /// Upstream answered with an error.
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Upstream answered with a body that could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The feed or session was closed locally.
    #[error("Feed closed")]
    Closed,
}

impl FeedError {
    /// Timeout helper taking a `Duration`.
    pub fn timeout(after: std::time::Duration) -> Self {
        Self::FetchTimeout {
            timeout_ms: after.as_millis() as u64,
        }
    }

    /// Short label for metrics and log context.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TransportFailure(_) => "transport",
            Self::FetchTimeout { .. } => "timeout",
            Self::ChannelExhausted { .. } => "exhausted",
            Self::Upstream(_) => "upstream",
            Self::Decode(_) => "decode",
            Self::Closed => "closed",
        }
    }
}

/// Result alias for feed operations.
pub type FeedResult<T> = std::result::Result<T, FeedError>;
