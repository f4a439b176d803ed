//! Strategy selection over per-route failure records.

use chrono::{DateTime, Utc};
use mdrelay_core::{CoreError, Route};
use mdrelay_telemetry::Metrics;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{info, warn};

/// Router configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Consecutive failures before a route is considered unhealthy. Default: 3.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

fn default_failure_threshold() -> u32 {
    3
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
        }
    }
}

/// How a request should be served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    UsePush,
    UsePullFallback,
    CachedOnly,
    Offline,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UsePush => "use_push",
            Self::UsePullFallback => "use_pull_fallback",
            Self::CachedOnly => "cached_only",
            Self::Offline => "offline",
        }
    }

    /// True for anything other than `UsePush`.
    pub fn is_degraded(&self) -> bool {
        !matches!(self, Self::UsePush)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure history of one route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    pub route: Route,
    pub consecutive_failures: u32,
    pub total_failures: u64,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    /// Set when the route gave up retrying; cleared by a success.
    pub exhausted: bool,
}

impl FailureRecord {
    fn new(route: Route) -> Self {
        Self {
            route,
            consecutive_failures: 0,
            total_failures: 0,
            last_failure: None,
            last_success: None,
            exhausted: false,
        }
    }

    pub fn is_healthy(&self, threshold: u32) -> bool {
        !self.exhausted && self.consecutive_failures < threshold
    }
}

/// Result of one strategy selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub strategy: Strategy,
    /// Previous strategy if this selection changed it.
    pub changed_from: Option<Strategy>,
}

struct RouterState {
    records: BTreeMap<Route, FailureRecord>,
    last_strategy: Option<Strategy>,
}

/// Fallback router.
///
/// All records sit behind one lock, so a selection always sees a
/// consistent snapshot and outcomes for one route never interleave.
pub struct FallbackRouter {
    threshold: u32,
    state: Mutex<RouterState>,
}

impl FallbackRouter {
    pub fn new(config: RouterConfig) -> Result<Self, CoreError> {
        if config.failure_threshold == 0 {
            return Err(CoreError::InvalidConfig(
                "failure_threshold must be at least 1".to_string(),
            ));
        }

        let records = Route::ALL
            .iter()
            .map(|route| (*route, FailureRecord::new(*route)))
            .collect();

        Ok(Self {
            threshold: config.failure_threshold,
            state: Mutex::new(RouterState {
                records,
                last_strategy: None,
            }),
        })
    }

    pub fn failure_threshold(&self) -> u32 {
        self.threshold
    }

    /// Pick a strategy starting from `route` and degrading
    /// push -> pull -> cache -> offline.
    pub fn select_strategy(&self, route: Route, cache_usable: bool) -> Strategy {
        self.decide(route, cache_usable).strategy
    }

    /// Strategy `select_strategy` would pick, without recording it as the
    /// last strategy or touching metrics.
    pub fn peek_strategy(&self, route: Route, cache_usable: bool) -> Strategy {
        let state = self.state.lock();
        self.evaluate(&state, route, cache_usable)
    }

    /// Same as [`select_strategy`](Self::select_strategy), also reporting
    /// whether the selected strategy differs from the previous one.
    ///
    /// Before the first selection the previous strategy counts as
    /// `UsePush`, so a router that starts degraded still reports the change.
    pub fn decide(&self, route: Route, cache_usable: bool) -> Decision {
        let mut state = self.state.lock();
        let strategy = self.evaluate(&state, route, cache_usable);

        let previous = state
            .last_strategy
            .replace(strategy)
            .unwrap_or(Strategy::UsePush);
        let changed_from = (previous != strategy).then_some(previous);
        drop(state);

        if let Some(previous) = changed_from {
            if strategy.is_degraded() {
                warn!(from = %previous, to = %strategy, "Strategy degraded");
            } else {
                info!(from = %previous, to = %strategy, "Strategy recovered");
            }
        }
        Metrics::strategy_set(strategy.as_str());

        Decision {
            strategy,
            changed_from,
        }
    }

    fn evaluate(&self, state: &RouterState, route: Route, cache_usable: bool) -> Strategy {
        let healthy = |r: Route| {
            state
                .records
                .get(&r)
                .is_some_and(|record| record.is_healthy(self.threshold))
        };

        match route {
            Route::Push if healthy(Route::Push) => Strategy::UsePush,
            Route::Push | Route::Pull if healthy(Route::Pull) => Strategy::UsePullFallback,
            _ if cache_usable => Strategy::CachedOnly,
            _ => Strategy::Offline,
        }
    }

    /// Record an outcome for `route` only.
    ///
    /// Success resets the streak to zero and clears exhaustion; failure
    /// increments it.
    pub fn record_outcome(&self, route: Route, success: bool) -> FailureRecord {
        let now = Utc::now();
        let mut state = self.state.lock();
        let record = state
            .records
            .entry(route)
            .or_insert_with(|| FailureRecord::new(route));

        let was_healthy = record.is_healthy(self.threshold);
        if success {
            record.consecutive_failures = 0;
            record.exhausted = false;
            record.last_success = Some(now);
        } else {
            record.consecutive_failures = record.consecutive_failures.saturating_add(1);
            record.total_failures += 1;
            record.last_failure = Some(now);
        }
        let is_healthy = record.is_healthy(self.threshold);
        let snapshot = record.clone();
        drop(state);

        if was_healthy && !is_healthy {
            warn!(
                route = %route,
                consecutive_failures = snapshot.consecutive_failures,
                "Route unhealthy"
            );
        } else if !was_healthy && is_healthy {
            info!(route = %route, "Route recovered");
        }
        Metrics::route_failures(route.as_str(), snapshot.consecutive_failures);
        snapshot
    }

    /// Mark `route` unhealthy regardless of its streak.
    pub fn mark_exhausted(&self, route: Route) {
        let mut state = self.state.lock();
        if let Some(record) = state.records.get_mut(&route) {
            if !record.exhausted {
                record.exhausted = true;
                warn!(route = %route, "Route exhausted");
            }
        }
    }

    pub fn clear_exhausted(&self, route: Route) {
        let mut state = self.state.lock();
        if let Some(record) = state.records.get_mut(&route) {
            record.exhausted = false;
        }
    }

    pub fn is_healthy(&self, route: Route) -> bool {
        self.record(route).is_healthy(self.threshold)
    }

    pub fn record(&self, route: Route) -> FailureRecord {
        self.state
            .lock()
            .records
            .get(&route)
            .cloned()
            .unwrap_or_else(|| FailureRecord::new(route))
    }

    /// All records ordered by route.
    pub fn records(&self) -> Vec<FailureRecord> {
        self.state.lock().records.values().cloned().collect()
    }

    pub fn last_strategy(&self) -> Option<Strategy> {
        self.state.lock().last_strategy
    }
}
