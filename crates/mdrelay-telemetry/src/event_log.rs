//! Bounded operational event log.
//!
//! Fixed-capacity store for errors and telemetry that must survive
//! multi-week uptime without growing. Capacity is a hard invariant owned by
//! the log itself: `record` evicts before it inserts.
//!
//! Eviction is severity-weighted. Entries live in two FIFO lanes (critical
//! and non-critical) tagged with a global insertion sequence. At capacity the
//! oldest non-critical entry goes first; the oldest critical entry is evicted
//! only when no non-critical entry remains. This is equivalent to "evict the
//! oldest entry, unless it is critical and a younger non-critical entry
//! exists", and keeps `record` O(1).

use crate::error::{TelemetryError, TelemetryResult};
use crate::metrics::Metrics;
use chrono::{DateTime, Utc};
use mdrelay_core::{LogEntry, Severity};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Event log configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogConfig {
    /// Maximum number of retained entries. Default: 1000.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Entries older than this are dropped (seconds). Default: 86400 (24h).
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
}

fn default_capacity() -> usize {
    1000
}

fn default_retention_secs() -> u64 {
    24 * 60 * 60
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            retention_secs: default_retention_secs(),
        }
    }
}

impl EventLogConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

/// Counters describing what happened to recorded entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EventLogStats {
    pub recorded: u64,
    pub evicted_critical: u64,
    pub evicted_non_critical: u64,
    pub expired: u64,
}

#[derive(Debug, Clone)]
struct Slot {
    seq: u64,
    entry: Arc<LogEntry>,
}

#[derive(Debug, Default)]
struct Lanes {
    critical: VecDeque<Slot>,
    non_critical: VecDeque<Slot>,
    next_seq: u64,
    stats: EventLogStats,
}

impl Lanes {
    fn len(&self) -> usize {
        self.critical.len() + self.non_critical.len()
    }

    fn evict_one(&mut self) {
        if self.non_critical.pop_front().is_some() {
            self.stats.evicted_non_critical += 1;
            Metrics::event_log_eviction("non_critical");
        } else if self.critical.pop_front().is_some() {
            self.stats.evicted_critical += 1;
            Metrics::event_log_eviction("critical");
        }
    }

    fn prune_before(&mut self, cutoff: DateTime<Utc>) {
        for lane in [&mut self.critical, &mut self.non_critical] {
            while lane
                .front()
                .is_some_and(|slot| slot.entry.timestamp() < cutoff)
            {
                lane.pop_front();
                self.stats.expired += 1;
                Metrics::event_log_eviction("expired");
            }
        }
    }
}

/// Fixed-capacity, severity-weighted event log.
///
/// Purely in-memory; each instance is independent.
pub struct BoundedEventLog {
    config: EventLogConfig,
    lanes: Mutex<Lanes>,
}

impl BoundedEventLog {
    /// Create a new log. Capacity and retention must be non-zero.
    pub fn new(config: EventLogConfig) -> TelemetryResult<Self> {
        if config.capacity == 0 {
            return Err(TelemetryError::InvalidConfig(
                "capacity must be at least 1".to_string(),
            ));
        }
        if config.retention_secs == 0 {
            return Err(TelemetryError::InvalidConfig(
                "retention must be non-zero".to_string(),
            ));
        }
        Ok(Self {
            config,
            lanes: Mutex::new(Lanes::default()),
        })
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Append an entry, evicting first if at capacity.
    pub fn record(&self, entry: LogEntry) {
        mirror_to_tracing(&entry);

        let cutoff = cutoff(Utc::now(), self.config.retention());
        let mut lanes = self.lanes.lock();

        // Expired entries make room before any live entry is evicted.
        lanes.prune_before(cutoff);
        while lanes.len() >= self.config.capacity {
            lanes.evict_one();
        }

        let slot = Slot {
            seq: lanes.next_seq,
            entry: Arc::new(entry),
        };
        lanes.next_seq += 1;
        lanes.stats.recorded += 1;

        if slot.entry.severity().is_critical() {
            lanes.critical.push_back(slot);
        } else {
            lanes.non_critical.push_back(slot);
        }

        lanes.prune_before(cutoff);
    }

    /// Number of retained entries.
    pub fn count(&self) -> usize {
        self.lanes.lock().len()
    }

    pub fn stats(&self) -> EventLogStats {
        self.lanes.lock().stats
    }

    /// Entries newer than `now - window` with severity >= `min_severity`,
    /// most recent first.
    pub fn recent_by_severity(&self, min_severity: Severity, window: Duration) -> RecentEvents {
        self.recent_by_severity_at(min_severity, window, Utc::now())
    }

    /// Same as [`recent_by_severity`](Self::recent_by_severity) with an explicit `now`.
    pub fn recent_by_severity_at(
        &self,
        min_severity: Severity,
        window: Duration,
        now: DateTime<Utc>,
    ) -> RecentEvents {
        let lanes = self.lanes.lock();
        RecentEvents {
            critical: lanes.critical.iter().cloned().collect(),
            non_critical: lanes.non_critical.iter().cloned().collect(),
            min_severity,
            since: cutoff(now, window),
        }
    }

    /// Drop all entries. Stats are kept.
    pub fn clear(&self) {
        let mut lanes = self.lanes.lock();
        lanes.critical.clear();
        lanes.non_critical.clear();
    }
}

fn cutoff(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|w| now.checked_sub_signed(w))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn mirror_to_tracing(entry: &LogEntry) {
    let key = entry.context_key().map(|k| k.as_str()).unwrap_or("-");
    let route = entry.route().map(|r| r.as_str()).unwrap_or("-");
    let category = entry.category().as_str();
    let message = entry.message();
    match entry.severity() {
        Severity::Critical => error!(category, key, route, "{message}"),
        Severity::High => warn!(category, key, route, "{message}"),
        Severity::Medium => info!(category, key, route, "{message}"),
        Severity::Low => debug!(category, key, route, "{message}"),
    }
}

/// Snapshot of the log filtered lazily at iteration time.
///
/// Finite and restartable: every call to [`iter`](Self::iter) starts again
/// from the newest entry.
#[derive(Debug, Clone)]
pub struct RecentEvents {
    critical: Vec<Slot>,
    non_critical: Vec<Slot>,
    min_severity: Severity,
    since: DateTime<Utc>,
}

impl RecentEvents {
    pub fn iter(&self) -> RecentIter<'_> {
        RecentIter {
            events: self,
            critical_left: self.critical.len(),
            non_critical_left: self.non_critical.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// Materialize into owned entries.
    pub fn to_vec(&self) -> Vec<LogEntry> {
        self.iter().cloned().collect()
    }
}

impl<'a> IntoIterator for &'a RecentEvents {
    type Item = &'a LogEntry;
    type IntoIter = RecentIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Newest-first merge of both lanes.
pub struct RecentIter<'a> {
    events: &'a RecentEvents,
    critical_left: usize,
    non_critical_left: usize,
}

impl<'a> RecentIter<'a> {
    fn next_slot(&mut self) -> Option<&'a Slot> {
        let critical = self
            .critical_left
            .checked_sub(1)
            .map(|i| &self.events.critical[i]);
        let non_critical = self
            .non_critical_left
            .checked_sub(1)
            .map(|i| &self.events.non_critical[i]);

        match (critical, non_critical) {
            (Some(c), Some(n)) if c.seq > n.seq => {
                self.critical_left -= 1;
                Some(c)
            }
            (_, Some(n)) => {
                self.non_critical_left -= 1;
                Some(n)
            }
            (Some(c), None) => {
                self.critical_left -= 1;
                Some(c)
            }
            (None, None) => None,
        }
    }
}

impl<'a> Iterator for RecentIter<'a> {
    type Item = &'a LogEntry;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(slot) = self.next_slot() {
            let entry = slot.entry.as_ref();
            if entry.severity() >= self.events.min_severity
                && entry.timestamp() >= self.events.since
            {
                return Some(entry);
            }
        }
        None
    }
}
