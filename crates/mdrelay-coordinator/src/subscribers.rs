//! Subscriber callbacks keyed by subscription key.

use crate::coordinator::Notification;
use dashmap::DashMap;
use mdrelay_core::SubscriptionKey;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Callback invoked for every notification on a key.
///
/// Runs on the coordinator's pump task and must not block.
pub type Callback = Arc<dyn Fn(&Notification) + Send + Sync>;

/// Handle returned by `Coordinator::subscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

#[derive(Default)]
pub struct SubscriberRegistry {
    by_key: DashMap<SubscriptionKey, Vec<(SubscriberId, Callback)>>,
    next_id: AtomicU64,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `key`. Returns the id and whether this is
    /// the key's first subscriber.
    pub fn add(&self, key: &SubscriptionKey, callback: Callback) -> (SubscriberId, bool) {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let mut slot = self.by_key.entry(key.clone()).or_default();
        let first = slot.is_empty();
        slot.push((id, callback));
        (id, first)
    }

    /// Drop every subscriber of `key`. Returns how many were removed.
    pub fn remove_key(&self, key: &SubscriptionKey) -> usize {
        self.by_key
            .remove(key)
            .map(|(_, subs)| subs.len())
            .unwrap_or(0)
    }

    /// Drop one subscriber. Returns its key if it was the key's last one.
    pub fn remove(&self, id: SubscriberId) -> Option<SubscriptionKey> {
        let key = self
            .by_key
            .iter()
            .find(|entry| entry.value().iter().any(|(sid, _)| *sid == id))
            .map(|entry| entry.key().clone())?;

        let emptied = match self.by_key.get_mut(&key) {
            Some(mut subs) => {
                subs.retain(|(sid, _)| *sid != id);
                subs.is_empty()
            }
            None => false,
        };
        if emptied {
            self.by_key.remove_if(&key, |_, subs| subs.is_empty());
            Some(key)
        } else {
            None
        }
    }

    /// Snapshot of the callbacks for `key`, so they run without holding the map.
    pub fn callbacks(&self, key: &SubscriptionKey) -> Vec<Callback> {
        self.by_key
            .get(key)
            .map(|subs| subs.iter().map(|(_, cb)| cb.clone()).collect())
            .unwrap_or_default()
    }

    pub fn has_subscribers(&self, key: &SubscriptionKey) -> bool {
        self.by_key.get(key).is_some_and(|subs| !subs.is_empty())
    }

    /// Keys with at least one subscriber, sorted.
    pub fn keys(&self) -> Vec<SubscriptionKey> {
        let mut keys: Vec<_> = self
            .by_key
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }

    /// Total number of subscribers.
    pub fn len(&self) -> usize {
        self.by_key.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.by_key.clear();
    }
}
