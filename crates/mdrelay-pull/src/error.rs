//! Pull feed error types.

use mdrelay_core::FeedError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PullError {
    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Response decode error: {0}")]
    Decode(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type PullResult<T> = Result<T, PullError>;

impl From<PullError> for FeedError {
    fn from(e: PullError) -> Self {
        match e {
            PullError::HttpClient(msg) => FeedError::TransportFailure(msg),
            PullError::Status { .. } => FeedError::Upstream(e.to_string()),
            PullError::Timeout { timeout_ms } => FeedError::FetchTimeout { timeout_ms },
            PullError::Decode(msg) => FeedError::Decode(msg),
            PullError::Json(e) => FeedError::Decode(e.to_string()),
        }
    }
}
