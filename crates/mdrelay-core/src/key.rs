//! Subscription key type.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::Arc;

/// Opaque identifier for a subscribed stream.
///
/// Typically symbol + interval (e.g. "BTCUSDT-1m"). Cloning is cheap:
/// the text is shared behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionKey(Arc<str>);

impl SubscriptionKey {
    /// Create a key from raw text. Empty or whitespace-only text is rejected.
    pub fn new(raw: impl AsRef<str>) -> Result<Self> {
        let raw = raw.as_ref().trim();
        if raw.is_empty() {
            return Err(CoreError::InvalidKey("key must not be empty".to_string()));
        }
        Ok(Self(Arc::from(raw)))
    }

    /// Build a key from a symbol and an interval ("BTCUSDT", "1m" -> "BTCUSDT-1m").
    pub fn from_parts(symbol: &str, interval: &str) -> Result<Self> {
        if symbol.trim().is_empty() || interval.trim().is_empty() {
            return Err(CoreError::InvalidKey(format!(
                "symbol and interval required, got {symbol:?}/{interval:?}"
            )));
        }
        Self::new(format!(
            "{}-{}",
            symbol.trim().to_uppercase(),
            interval.trim()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SubscriptionKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for SubscriptionKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for SubscriptionKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::new(raw).map_err(serde::de::Error::custom)
    }
}
