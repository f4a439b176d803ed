//! Prometheus metrics for mdrelay.
//!
//! Covers:
//! - Push channel state, reconnects and exhaustion
//! - Freshness cache lookups, writes and evictions
//! - Fallback strategy selection and per-route failure streaks
//! - Event log evictions
//! - Pull fetch latency and caller request outcomes
//!
//! Metrics are process-wide counters and gauges keyed by labels. They never
//! hold component state, so independent coordinators can share them.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. If registration fails,
//! it indicates a fatal configuration error (e.g., duplicate metric names)
//! that should cause an immediate crash at startup rather than silent failure.
//! These panics only occur during static initialization, never at runtime.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, register_int_counter,
    CounterVec, GaugeVec, HistogramVec, IntCounter,
};

/// Push channel state machine current state.
/// Labels: channel, state (disconnected/connecting/connected/backoff)
pub static CHANNEL_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "mdrelay_channel_state",
        "Push channel state machine current state (1=active, 0=inactive)",
        &["channel", "state"]
    )
    .unwrap()
});

/// Total reconnect attempts scheduled.
pub static CHANNEL_RECONNECT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "mdrelay_channel_reconnect_total",
        "Total push channel reconnect attempts",
        &["channel", "reason"]
    )
    .unwrap()
});

/// Total times a channel gave up reconnecting.
pub static CHANNEL_EXHAUSTED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "mdrelay_channel_exhausted_total",
        "Total push channel exhaustion events",
        &["channel"]
    )
    .unwrap()
});

/// Total push updates received.
pub static PUSH_UPDATES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "mdrelay_push_updates_total",
        "Total updates received from the push feed",
        &["channel"]
    )
    .unwrap()
});

/// Cache lookups by result (fresh/stale/unknown).
pub static CACHE_LOOKUPS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "mdrelay_cache_lookups_total",
        "Freshness cache lookups by result",
        &["result"]
    )
    .unwrap()
});

/// Cache writes by outcome (inserted/updated/rejected).
pub static CACHE_WRITES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "mdrelay_cache_writes_total",
        "Freshness cache writes by outcome",
        &["outcome"]
    )
    .unwrap()
});

/// Cache evictions by reason (capacity/idle).
pub static CACHE_EVICTIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "mdrelay_cache_evictions_total",
        "Freshness cache evictions by reason",
        &["reason"]
    )
    .unwrap()
});

/// Callers that joined an in-flight fetch instead of starting one.
pub static COALESCED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "mdrelay_coalesced_total",
        "Requests served by joining an in-flight fetch"
    )
    .unwrap()
});

/// Selected fallback strategy (1=last selected).
pub static STRATEGY: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "mdrelay_strategy",
        "Last selected fallback strategy (1=active, 0=inactive)",
        &["strategy"]
    )
    .unwrap()
});

/// Consecutive failures per route.
pub static ROUTE_CONSECUTIVE_FAILURES: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "mdrelay_route_consecutive_failures",
        "Consecutive failures per fallback route",
        &["route"]
    )
    .unwrap()
});

/// Event log evictions by class (critical/non_critical/expired).
pub static EVENT_LOG_EVICTIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "mdrelay_event_log_evictions_total",
        "Bounded event log evictions by class",
        &["class"]
    )
    .unwrap()
});

/// Pull fetch latency in milliseconds.
pub static PULL_LATENCY_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "mdrelay_pull_latency_ms",
        "Pull fetch latency in milliseconds",
        &["outcome"],
        vec![5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0]
    )
    .unwrap()
});

/// Caller request outcomes.
pub static REQUESTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "mdrelay_requests_total",
        "Caller requests by outcome",
        &["outcome"]
    )
    .unwrap()
});

/// Metrics facade.
pub struct Metrics;

impl Metrics {
    /// Set channel state machine state.
    /// Only the active state is set to 1, all others to 0.
    pub fn channel_state_set(channel: &str, state: &str) {
        for s in &["disconnected", "connecting", "connected", "backoff"] {
            CHANNEL_STATE.with_label_values(&[channel, s]).set(0.0);
        }
        CHANNEL_STATE.with_label_values(&[channel, state]).set(1.0);
    }

    /// Record a scheduled reconnect.
    pub fn channel_reconnect(channel: &str, reason: &str) {
        CHANNEL_RECONNECT_TOTAL
            .with_label_values(&[channel, reason])
            .inc();
    }

    /// Record channel exhaustion.
    pub fn channel_exhausted(channel: &str) {
        CHANNEL_EXHAUSTED_TOTAL.with_label_values(&[channel]).inc();
    }

    /// Record a push update.
    pub fn push_update(channel: &str) {
        PUSH_UPDATES_TOTAL.with_label_values(&[channel]).inc();
    }

    /// Record a cache lookup result.
    pub fn cache_lookup(result: &str) {
        CACHE_LOOKUPS_TOTAL.with_label_values(&[result]).inc();
    }

    /// Record a cache write outcome.
    pub fn cache_write(outcome: &str) {
        CACHE_WRITES_TOTAL.with_label_values(&[outcome]).inc();
    }

    /// Record a cache eviction.
    pub fn cache_eviction(reason: &str) {
        CACHE_EVICTIONS_TOTAL.with_label_values(&[reason]).inc();
    }

    /// Record a coalesced request.
    pub fn coalesced() {
        COALESCED_TOTAL.inc();
    }

    /// Set the active strategy.
    pub fn strategy_set(strategy: &str) {
        for s in &["use_push", "use_pull_fallback", "cached_only", "offline"] {
            STRATEGY.with_label_values(&[s]).set(0.0);
        }
        STRATEGY.with_label_values(&[strategy]).set(1.0);
    }

    /// Update the consecutive failure count of a route.
    pub fn route_failures(route: &str, consecutive: u32) {
        ROUTE_CONSECUTIVE_FAILURES
            .with_label_values(&[route])
            .set(f64::from(consecutive));
    }

    /// Record an event log eviction.
    pub fn event_log_eviction(class: &str) {
        EVENT_LOG_EVICTIONS_TOTAL.with_label_values(&[class]).inc();
    }

    /// Record pull fetch latency.
    pub fn pull_latency(outcome: &str, latency_ms: f64) {
        PULL_LATENCY_MS
            .with_label_values(&[outcome])
            .observe(latency_ms);
    }

    /// Record a caller request outcome.
    pub fn request(outcome: &str) {
        REQUESTS_TOTAL.with_label_values(&[outcome]).inc();
    }
}
