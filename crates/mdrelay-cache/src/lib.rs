//! Freshness cache for mdrelay.
//!
//! Holds the latest known `UpdateEvent` per subscription key:
//! - `FreshnessCache`: capacity-bounded, monotonic by sequence, LRU + idle eviction
//! - `InFlight`: at-most-one concurrent fetch per key, result shared with every waiter

pub mod entry;
pub mod freshness;
pub mod in_flight;

pub use entry::{CacheEntry, CacheLookup, Eviction, EvictionReason, PutOutcome, PutStatus};
pub use freshness::{CacheConfig, CacheStats, FreshnessCache};
pub use in_flight::InFlight;
