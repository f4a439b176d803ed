//! Push feed wire envelope.
//!
//! Outbound: `{"method":"subscribe","keys":["BTCUSDT-1m"]}`, `unsubscribe`
//! likewise, and `{"method":"ping"}`.
//!
//! Inbound: `{"channel":"update","data":{...UpdateEvent...}}`,
//! `{"channel":"pong"}`, `{"channel":"subscriptionResponse","data":{...}}`
//! and `{"channel":"error","data":...}`.

use crate::error::{WsError, WsResult};
use mdrelay_core::{SubscriptionKey, UpdateEvent};
use serde::{Deserialize, Serialize};

/// Outgoing request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WsRequest {
    pub method: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<SubscriptionKey>,
}

impl WsRequest {
    pub fn ping() -> Self {
        Self {
            method: "ping".to_string(),
            keys: Vec::new(),
        }
    }

    pub fn subscribe(keys: &[SubscriptionKey]) -> Self {
        Self {
            method: "subscribe".to_string(),
            keys: keys.to_vec(),
        }
    }

    pub fn unsubscribe(keys: &[SubscriptionKey]) -> Self {
        Self {
            method: "unsubscribe".to_string(),
            keys: keys.to_vec(),
        }
    }

    pub fn to_text(&self) -> WsResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Raw inbound envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelMessage {
    pub channel: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum WsMessage {
    Update(UpdateEvent),
    Pong,
    SubscriptionResponse(serde_json::Value),
    Error(String),
    /// Unrecognized channel; ignored by the session.
    Other(String),
}

impl WsMessage {
    pub fn parse(text: &str) -> WsResult<Self> {
        let envelope: ChannelMessage = serde_json::from_str(text)?;
        let message = match envelope.channel.as_str() {
            "update" => {
                let event = serde_json::from_value(envelope.data)
                    .map_err(|e| WsError::ParseError(format!("update payload: {e}")))?;
                Self::Update(event)
            }
            "pong" => Self::Pong,
            "subscriptionResponse" => Self::SubscriptionResponse(envelope.data),
            "error" => Self::Error(match envelope.data {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            }),
            _ => Self::Other(envelope.channel),
        };
        Ok(message)
    }
}
