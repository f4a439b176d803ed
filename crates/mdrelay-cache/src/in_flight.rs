//! Request coalescing.
//!
//! At most one fetch per key is in flight. Callers arriving while a fetch
//! is pending await the same shared future and observe the same result,
//! success or failure.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{FutureExt, Shared};
use mdrelay_core::{BoxFuture, FeedResult, SubscriptionKey, UpdateEvent};
use mdrelay_telemetry::Metrics;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

type SharedFetch = Shared<BoxFuture<'static, FeedResult<UpdateEvent>>>;

/// Registry of pending fetches keyed by subscription key.
#[derive(Default)]
pub struct InFlight {
    pending: DashMap<SubscriptionKey, SharedFetch>,
    coalesced: AtomicU64,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `producer` for `key` unless a fetch is already pending, in which
    /// case join it.
    ///
    /// `producer` is invoked while the key's slot is reserved and must only
    /// build the future; it must not call back into this registry.
    /// The slot is released as soon as the fetch resolves, so a later call
    /// starts a new fetch.
    pub async fn run<F, Fut>(&self, key: &SubscriptionKey, producer: F) -> FeedResult<UpdateEvent>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FeedResult<UpdateEvent>> + Send + 'static,
    {
        let shared = match self.pending.entry(key.clone()) {
            Entry::Occupied(slot) => {
                self.coalesced.fetch_add(1, Ordering::Relaxed);
                Metrics::coalesced();
                trace!(key = %key, "Joining in-flight fetch");
                slot.get().clone()
            }
            Entry::Vacant(slot) => {
                let fetch: BoxFuture<'static, FeedResult<UpdateEvent>> = Box::pin(producer());
                let shared = fetch.shared();
                slot.insert(shared.clone());
                shared
            }
        };

        let result = shared.clone().await;

        // Only the fetch we awaited may be cleared; a newer one may already
        // occupy the slot.
        self.pending
            .remove_if(key, |_, current| current.ptr_eq(&shared));

        result
    }

    /// Number of keys with a pending fetch.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn contains(&self, key: &SubscriptionKey) -> bool {
        self.pending.contains_key(key)
    }

    /// Callers served by joining a pending fetch.
    pub fn coalesced(&self) -> u64 {
        self.coalesced.load(Ordering::Relaxed)
    }
}
