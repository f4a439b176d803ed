//! Push subscription channel for mdrelay.
//!
//! Keeps a push feed connected while keys are subscribed:
//! - `SubscriptionChannel`: key set, supervised reconnect with exponential
//!   backoff and jitter, stability reset and attempt exhaustion
//! - `ChannelState`: total transition function over channel inputs
//! - `PushFeed`: session abstraction, with `WsPushFeed` over tokio-tungstenite
//! - Heartbeat monitoring (ping when idle, pong timeout detection)

pub mod backoff;
pub mod channel;
pub mod connection;
pub mod error;
pub mod feed;
pub mod heartbeat;
pub mod message;
pub mod state;

pub use backoff::BackoffPolicy;
pub use channel::{ChannelConfig, ChannelNotice, SubscriptionChannel};
pub use connection::{WsFeedConfig, WsPushFeed};
pub use error::{WsError, WsResult};
pub use feed::{PushControl, PushFeed, PushMessage, PushSession};
pub use heartbeat::HeartbeatMonitor;
pub use message::{ChannelMessage, WsMessage, WsRequest};
pub use state::{ChannelInput, ChannelState};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Called before the first connection; safe to call repeatedly.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
