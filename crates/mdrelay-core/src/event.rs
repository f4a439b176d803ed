//! Sequenced update events.

use crate::key::SubscriptionKey;
use serde::{Deserialize, Serialize};

/// A single update for one subscription key.
///
/// `sequence` is strictly increasing per key. Consumers use it to discard
/// out-of-order and duplicate deliveries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateEvent {
    pub key: SubscriptionKey,
    /// Opaque payload (candle, ticker, ...). Never interpreted by the core.
    pub payload: serde_json::Value,
    /// Server timestamp in milliseconds since Unix epoch.
    #[serde(rename = "serverTime")]
    pub server_time_ms: i64,
    #[serde(rename = "seq")]
    pub sequence: u64,
}

impl UpdateEvent {
    pub fn new(
        key: SubscriptionKey,
        payload: serde_json::Value,
        server_time_ms: i64,
        sequence: u64,
    ) -> Self {
        Self {
            key,
            payload,
            server_time_ms,
            sequence,
        }
    }

    /// True if this event supersedes `other` (same key, higher sequence).
    pub fn is_newer_than(&self, other: &UpdateEvent) -> bool {
        self.key == other.key && self.sequence > other.sequence
    }
}
