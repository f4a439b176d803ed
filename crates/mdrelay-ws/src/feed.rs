//! Push feed abstraction.
//!
//! A `PushFeed` opens sessions; each `PushSession` delivers messages on a
//! channel and accepts subscription changes through its `PushControl`.
//! Sessions carry no retry logic; reconnecting is the channel's job.

use mdrelay_core::{BoxFuture, FeedError, FeedResult, SubscriptionKey, UpdateEvent};
use tokio::sync::mpsc;

/// Message delivered by a live push session.
#[derive(Debug, Clone, PartialEq)]
pub enum PushMessage {
    Event(UpdateEvent),
    /// The transport is gone. No further messages follow.
    Disconnected { reason: String },
}

/// Subscription control for a live session.
///
/// Calls never block; they queue the request for the session task.
pub trait PushControl: Send + Sync {
    fn subscribe(&self, keys: &[SubscriptionKey]) -> Result<(), FeedError>;

    fn unsubscribe(&self, keys: &[SubscriptionKey]) -> Result<(), FeedError>;

    /// Close the session. Idempotent.
    fn close(&self);
}

/// An open push session.
///
/// A closed `events` receiver counts as a disconnect.
pub struct PushSession {
    pub events: mpsc::Receiver<PushMessage>,
    pub control: Box<dyn PushControl>,
}

impl std::fmt::Debug for PushSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushSession").finish_non_exhaustive()
    }
}

/// Source of push sessions.
pub trait PushFeed: Send + Sync {
    /// Open a new session. The caller applies its own timeout.
    fn connect(&self) -> BoxFuture<'_, FeedResult<PushSession>>;
}
