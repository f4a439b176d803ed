//! Cache entries and operation outcomes.

use mdrelay_core::{SubscriptionKey, UpdateEvent};
use std::time::Duration;
use tokio::time::Instant;

/// Latest known value for one key.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub(crate) event: UpdateEvent,
    pub(crate) last_access: Instant,
    pub(crate) last_write: Instant,
}

impl CacheEntry {
    pub(crate) fn new(event: UpdateEvent, now: Instant) -> Self {
        Self {
            event,
            last_access: now,
            last_write: now,
        }
    }

    pub fn key(&self) -> &SubscriptionKey {
        &self.event.key
    }

    pub fn event(&self) -> &UpdateEvent {
        &self.event
    }

    pub fn into_event(self) -> UpdateEvent {
        self.event
    }

    pub fn sequence(&self) -> u64 {
        self.event.sequence
    }

    pub fn last_access(&self) -> Instant {
        self.last_access
    }

    pub fn last_write(&self) -> Instant {
        self.last_write
    }

    /// Time since the last accepted write.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_write)
    }
}

/// Result of a cache read.
///
/// `Stale` is a miss that still carries the old value; `Unknown` means the
/// key was never cached (or was evicted).
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Fresh(CacheEntry),
    Stale(CacheEntry),
    Unknown,
}

impl CacheLookup {
    pub fn fresh(self) -> Option<CacheEntry> {
        match self {
            Self::Fresh(entry) => Some(entry),
            _ => None,
        }
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fresh(_) => "fresh",
            Self::Stale(_) => "stale",
            Self::Unknown => "unknown",
        }
    }
}

/// What a `put` did to the stored entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutStatus {
    Inserted,
    Updated,
    /// Sequence not newer than the stored one. Not an error.
    Rejected { stored_sequence: u64 },
}

impl PutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inserted => "inserted",
            Self::Updated => "updated",
            Self::Rejected { .. } => "rejected",
        }
    }
}

/// Outcome of a `put`, including keys evicted to make room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOutcome {
    pub status: PutStatus,
    pub evicted: Vec<Eviction>,
}

impl PutOutcome {
    pub fn is_accepted(&self) -> bool {
        !matches!(self.status, PutStatus::Rejected { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvictionReason {
    /// Least recently accessed key removed to stay within capacity.
    Capacity,
    /// Key unused for longer than the idle window.
    Idle,
}

impl EvictionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Capacity => "capacity",
            Self::Idle => "idle",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eviction {
    pub key: SubscriptionKey,
    pub reason: EvictionReason,
}
