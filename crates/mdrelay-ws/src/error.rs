//! WebSocket error types.

use mdrelay_core::FeedError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WsError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed: code={code}, reason={reason}")]
    ConnectionClosed { code: u16, reason: String },

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Message parse error: {0}")]
    ParseError(String),

    #[error("Heartbeat timeout")]
    HeartbeatTimeout,

    #[error("Tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type WsResult<T> = Result<T, WsError>;

impl From<WsError> for FeedError {
    fn from(e: WsError) -> Self {
        match e {
            WsError::ParseError(msg) => FeedError::Decode(msg),
            WsError::Json(e) => FeedError::Decode(e.to_string()),
            other => FeedError::TransportFailure(other.to_string()),
        }
    }
}
