//! Capacity-bounded freshness cache.
//!
//! One entry per subscription key holding the latest accepted event.
//! Writes are monotonic by sequence. Capacity is enforced on insert: idle
//! keys go first, then the least recently accessed key.

use crate::entry::{CacheEntry, CacheLookup, Eviction, EvictionReason, PutOutcome, PutStatus};
use crate::in_flight::InFlight;
use mdrelay_core::{CoreError, FeedResult, SubscriptionKey, UpdateEvent};
use mdrelay_telemetry::Metrics;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Freshness cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of keys. Default: 100.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Entries written longer ago than this are stale (ms). Default: 30000.
    #[serde(default = "default_staleness_threshold_ms")]
    pub staleness_threshold_ms: u64,
    /// Stale entries remain usable for cached-only serving up to this age (ms).
    /// Default: 300000.
    #[serde(default = "default_expiry_ms")]
    pub expiry_ms: u64,
    /// Keys not accessed for this long are purged on the next insert (ms).
    /// Default: 600000.
    #[serde(default = "default_idle_ms")]
    pub idle_ms: u64,
}

fn default_capacity() -> usize {
    100
}

fn default_staleness_threshold_ms() -> u64 {
    30_000
}

fn default_expiry_ms() -> u64 {
    300_000
}

fn default_idle_ms() -> u64 {
    600_000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            staleness_threshold_ms: default_staleness_threshold_ms(),
            expiry_ms: default_expiry_ms(),
            idle_ms: default_idle_ms(),
        }
    }
}

impl CacheConfig {
    pub fn staleness_threshold(&self) -> Duration {
        Duration::from_millis(self.staleness_threshold_ms)
    }

    pub fn expiry(&self) -> Duration {
        Duration::from_millis(self.expiry_ms)
    }

    pub fn idle(&self) -> Duration {
        Duration::from_millis(self.idle_ms)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.capacity == 0 {
            return Err(CoreError::InvalidConfig(
                "cache capacity must be at least 1".to_string(),
            ));
        }
        if self.expiry_ms < self.staleness_threshold_ms {
            return Err(CoreError::InvalidConfig(format!(
                "cache expiry ({}ms) must not be shorter than staleness threshold ({}ms)",
                self.expiry_ms, self.staleness_threshold_ms
            )));
        }
        Ok(())
    }
}

/// Cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub rejected: u64,
    pub evictions: u64,
    pub coalesced: u64,
    /// hits / (hits + misses), 0.0 before the first lookup.
    pub hit_rate: f64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: u64,
    misses: u64,
    writes: u64,
    rejected: u64,
    evictions: u64,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<SubscriptionKey, CacheEntry>,
    counters: Counters,
}

impl Inner {
    fn purge_idle(&mut self, now: Instant, idle: Duration) -> Vec<Eviction> {
        let expired: Vec<SubscriptionKey> = self
            .entries
            .values()
            .filter(|entry| now.saturating_duration_since(entry.last_access) > idle)
            .map(|entry| entry.key().clone())
            .collect();

        expired
            .into_iter()
            .map(|key| self.evict(key, EvictionReason::Idle))
            .collect()
    }

    /// Least recently accessed key; ties broken by key order.
    fn lru_key(&self) -> Option<SubscriptionKey> {
        self.entries
            .values()
            .min_by(|a, b| {
                a.last_access
                    .cmp(&b.last_access)
                    .then_with(|| a.key().cmp(b.key()))
            })
            .map(|entry| entry.key().clone())
    }

    fn evict(&mut self, key: SubscriptionKey, reason: EvictionReason) -> Eviction {
        self.entries.remove(&key);
        self.counters.evictions += 1;
        Metrics::cache_eviction(reason.as_str());
        debug!(key = %key, reason = reason.as_str(), "Cache entry evicted");
        Eviction { key, reason }
    }
}

/// Latest-value cache keyed by subscription key.
pub struct FreshnessCache {
    config: CacheConfig,
    inner: Mutex<Inner>,
    in_flight: InFlight,
}

impl FreshnessCache {
    pub fn new(config: CacheConfig) -> Result<Self, CoreError> {
        config.validate()?;
        Ok(Self {
            config,
            inner: Mutex::new(Inner::default()),
            in_flight: InFlight::new(),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up `key`, refreshing its access time.
    ///
    /// Fresh when written within the staleness threshold. A stale entry is
    /// returned as `Stale` so callers can tell "old value" from "never seen".
    pub fn get(&self, key: &SubscriptionKey) -> CacheLookup {
        let now = Instant::now();
        let threshold = self.config.staleness_threshold();
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let lookup = match inner.entries.get_mut(key) {
            Some(entry) => {
                entry.last_access = now;
                if entry.age(now) <= threshold {
                    inner.counters.hits += 1;
                    CacheLookup::Fresh(entry.clone())
                } else {
                    inner.counters.misses += 1;
                    CacheLookup::Stale(entry.clone())
                }
            }
            None => {
                inner.counters.misses += 1;
                CacheLookup::Unknown
            }
        };

        Metrics::cache_lookup(lookup.as_str());
        lookup
    }

    /// Entry still usable for cached-only serving (age within expiry).
    ///
    /// Does not touch access time or hit counters.
    pub fn peek_usable(&self, key: &SubscriptionKey) -> Option<CacheEntry> {
        let now = Instant::now();
        let inner = self.inner.lock();
        inner
            .entries
            .get(key)
            .filter(|entry| entry.age(now) <= self.config.expiry())
            .cloned()
    }

    pub fn has_usable(&self, key: &SubscriptionKey) -> bool {
        self.peek_usable(key).is_some()
    }

    /// Store `event` under its key if its sequence is newer than the stored one.
    ///
    /// Inserting a new key first purges idle keys, then evicts least
    /// recently accessed keys until there is room. Evicted keys are reported
    /// to the caller; subscribers are not notified here.
    pub fn put(&self, event: UpdateEvent) -> PutOutcome {
        let now = Instant::now();
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        if let Some(entry) = inner.entries.get_mut(&event.key) {
            if event.sequence <= entry.sequence() {
                let stored_sequence = entry.sequence();
                inner.counters.rejected += 1;
                Metrics::cache_write("rejected");
                debug!(
                    key = %event.key,
                    incoming = event.sequence,
                    stored = stored_sequence,
                    "Rejected out-of-order update"
                );
                return PutOutcome {
                    status: PutStatus::Rejected { stored_sequence },
                    evicted: Vec::new(),
                };
            }

            entry.event = event;
            entry.last_write = now;
            entry.last_access = now;
            inner.counters.writes += 1;
            Metrics::cache_write("updated");
            return PutOutcome {
                status: PutStatus::Updated,
                evicted: Vec::new(),
            };
        }

        let mut evicted = inner.purge_idle(now, self.config.idle());
        while inner.entries.len() >= self.config.capacity {
            match inner.lru_key() {
                Some(key) => evicted.push(inner.evict(key, EvictionReason::Capacity)),
                None => break,
            }
        }

        inner
            .entries
            .insert(event.key.clone(), CacheEntry::new(event, now));
        inner.counters.writes += 1;
        Metrics::cache_write("inserted");

        PutOutcome {
            status: PutStatus::Inserted,
            evicted,
        }
    }

    /// Purge keys idle beyond the idle window without inserting.
    pub fn purge_idle(&self) -> Vec<Eviction> {
        let now = Instant::now();
        self.inner.lock().purge_idle(now, self.config.idle())
    }

    /// Fetch `key` through `producer`, sharing one pending fetch between all
    /// concurrent callers. See [`InFlight::run`].
    pub async fn coalesce<F, Fut>(&self, key: &SubscriptionKey, producer: F) -> FeedResult<UpdateEvent>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FeedResult<UpdateEvent>> + Send + 'static,
    {
        self.in_flight.run(key, producer).await
    }

    pub fn remove(&self, key: &SubscriptionKey) -> Option<CacheEntry> {
        self.inner.lock().entries.remove(key)
    }

    pub fn keys(&self) -> Vec<SubscriptionKey> {
        let mut keys: Vec<_> = self.inner.lock().entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn contains(&self, key: &SubscriptionKey) -> bool {
        self.inner.lock().entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys with a pending coalesced fetch.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        let c = &inner.counters;
        let lookups = c.hits + c.misses;
        CacheStats {
            entries: inner.entries.len(),
            hits: c.hits,
            misses: c.misses,
            writes: c.writes,
            rejected: c.rejected,
            evictions: c.evictions,
            coalesced: self.in_flight.coalesced(),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                c.hits as f64 / lookups as f64
            },
        }
    }
}
