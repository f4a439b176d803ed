//! Pull feed abstraction.

use mdrelay_core::{BoxFuture, FeedResult, SubscriptionKey, UpdateEvent};

/// Source of one-shot "latest value" fetches.
///
/// The returned future owns everything it needs, so it can be shared
/// between coalesced callers and outlive the borrow of `self`.
pub trait PullFeed: Send + Sync {
    fn fetch(&self, key: &SubscriptionKey) -> BoxFuture<'static, FeedResult<UpdateEvent>>;
}
