//! Coordinator.
//!
//! Ties the freshness cache, the push subscription channel, the pull feed,
//! the fallback router and the event log together:
//! - `request` serves fresh cache hits, otherwise follows the router's
//!   strategy (push snapshot, coalesced pull, stale cache, offline)
//! - a pump task consumes channel notices, writes the cache and fans out
//!   notifications; it feeds every push failure into the router and the log
//! - after a reconnect every subscribed key is refreshed through the pull
//!   feed, since events sent during the outage are not replayed
//!
//! Cache writes always complete before the matching notification is sent.

use crate::config::CoordinatorConfig;
use crate::error::AppResult;
use crate::subscribers::{SubscriberId, SubscriberRegistry};
use futures_util::future::join_all;
use mdrelay_cache::{CacheEntry, CacheLookup, CacheStats, Eviction, FreshnessCache, PutOutcome};
use mdrelay_core::{
    FeedError, FeedResult, LogCategory, LogEntry, Route, Severity, SubscriptionKey, UpdateEvent,
};
use mdrelay_pull::PullFeed;
use mdrelay_router::{FallbackRouter, Strategy};
use mdrelay_telemetry::{BoundedEventLog, EventLogStats, Metrics, RecentEvents};
use mdrelay_ws::{ChannelNotice, ChannelState, PushFeed, SubscriptionChannel};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::slice;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How often the pump purges idle cache keys.
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(30);

/// Where a request's value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// Fresh cache hit.
    Cache,
    /// First push update after subscribing.
    Push,
    /// Pull feed fetch.
    Pull,
    /// Stale but unexpired cache entry.
    CachedOnly,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Push => "push",
            Self::Pull => "pull",
            Self::CachedOnly => "cached_only",
        }
    }
}

/// Result of `Coordinator::request`.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    Value { event: UpdateEvent, source: Source },
    /// Nothing could be fetched and no usable value is cached.
    Miss,
    /// Every route is down and nothing usable is cached.
    Offline,
}

impl RequestOutcome {
    pub fn event(&self) -> Option<&UpdateEvent> {
        match self {
            Self::Value { event, .. } => Some(event),
            _ => None,
        }
    }

    pub fn source(&self) -> Option<Source> {
        match self {
            Self::Value { source, .. } => Some(*source),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Value { source, .. } => source.as_str(),
            Self::Miss => "miss",
            Self::Offline => "offline",
        }
    }
}

/// Service level as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Live,
    PullFallback,
    CachedOnly,
    Offline,
}

impl From<Strategy> for ServiceStatus {
    fn from(strategy: Strategy) -> Self {
        match strategy {
            Strategy::UsePush => Self::Live,
            Strategy::UsePullFallback => Self::PullFallback,
            Strategy::CachedOnly => Self::CachedOnly,
            Strategy::Offline => Self::Offline,
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Live => "live",
            Self::PullFallback => "pull_fallback",
            Self::CachedOnly => "cached_only",
            Self::Offline => "offline",
        };
        f.write_str(s)
    }
}

/// Delivered to subscriber callbacks.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// A newer value was written to the cache.
    Update(UpdateEvent),
    /// The push channel gave up; updates stop until `resume`.
    Degraded {
        key: SubscriptionKey,
        status: ServiceStatus,
    },
}

impl Notification {
    pub fn key(&self) -> &SubscriptionKey {
        match self {
            Self::Update(event) => &event.key,
            Self::Degraded { key, .. } => key,
        }
    }
}

/// Snapshot of coordinator counters and component stats.
#[derive(Debug, Clone)]
pub struct CoordinatorStats {
    pub requests: u64,
    pub served_from_cache: u64,
    pub served_from_push: u64,
    pub served_from_pull: u64,
    pub served_cached_only: u64,
    pub misses: u64,
    pub offline: u64,
    /// Updates delivered to waiting requests and subscriber callbacks.
    pub notifications: u64,
    /// Post-reconnect refresh rounds started.
    pub refreshes: u64,
    pub subscribers: usize,
    pub subscribed_keys: usize,
    pub channel_state: ChannelState,
    pub channel_attempt: u32,
    pub strategy: Option<Strategy>,
    pub cache: CacheStats,
    pub event_log: EventLogStats,
}

#[derive(Debug, Default)]
struct Counters {
    requests: AtomicU64,
    from_cache: AtomicU64,
    from_push: AtomicU64,
    from_pull: AtomicU64,
    cached_only: AtomicU64,
    misses: AtomicU64,
    offline: AtomicU64,
    notifications: AtomicU64,
    refreshes: AtomicU64,
}

impl Counters {
    fn record(&self, outcome: &RequestOutcome) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            RequestOutcome::Value { source, .. } => match source {
                Source::Cache => &self.from_cache,
                Source::Push => &self.from_push,
                Source::Pull => &self.from_pull,
                Source::CachedOnly => &self.cached_only,
            },
            RequestOutcome::Miss => &self.misses,
            RequestOutcome::Offline => &self.offline,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

type Waiters = HashMap<SubscriptionKey, Vec<oneshot::Sender<UpdateEvent>>>;

struct Inner {
    channel_name: String,
    fetch_timeout: Duration,
    cache: FreshnessCache,
    router: FallbackRouter,
    log: BoundedEventLog,
    channel: SubscriptionChannel,
    pull: Arc<dyn PullFeed>,
    subscribers: SubscriberRegistry,
    /// Requests waiting for the first push update of a key.
    waiters: Mutex<Waiters>,
    /// Serializes cache write + notification so notifications follow
    /// sequence order.
    write_order: Mutex<()>,
    counters: Counters,
    shutdown: CancellationToken,
}

/// Market-data coordinator.
///
/// Independent instances share nothing but the process-wide metric
/// registry. Must be created inside a tokio runtime.
pub struct Coordinator {
    inner: Arc<Inner>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl Coordinator {
    pub fn new(
        config: CoordinatorConfig,
        push: Arc<dyn PushFeed>,
        pull: Arc<dyn PullFeed>,
    ) -> AppResult<Self> {
        let cache = FreshnessCache::new(config.cache.clone())?;
        let router = FallbackRouter::new(config.router.clone())?;
        let log = BoundedEventLog::new(config.event_log.clone())?;
        let (channel, notices) =
            SubscriptionChannel::new(config.channel_name.clone(), push, config.channel.clone());

        let inner = Arc::new(Inner {
            channel_name: config.channel_name.clone(),
            fetch_timeout: config.fetch_timeout(),
            cache,
            router,
            log,
            channel,
            pull,
            subscribers: SubscriberRegistry::new(),
            waiters: Mutex::new(HashMap::new()),
            write_order: Mutex::new(()),
            counters: Counters::default(),
            shutdown: CancellationToken::new(),
        });

        let pump = tokio::spawn(Arc::clone(&inner).pump(notices));
        info!(
            channel = %config.channel_name,
            cache_capacity = config.cache.capacity,
            failure_threshold = config.router.failure_threshold,
            fetch_timeout_ms = config.fetch_timeout_ms,
            "Coordinator started"
        );

        Ok(Self {
            inner,
            pump: Mutex::new(Some(pump)),
        })
    }

    /// Latest value for `key`.
    ///
    /// Never fails: transport and fetch failures are absorbed into router
    /// state and the event log, and surface only as `Miss` or `Offline`.
    pub async fn request(&self, key: &SubscriptionKey) -> RequestOutcome {
        let outcome = if self.inner.shutdown.is_cancelled() {
            RequestOutcome::Offline
        } else {
            self.inner.request(key).await
        };

        self.inner.counters.record(&outcome);
        Metrics::request(outcome.as_str());
        debug!(key = %key, outcome = outcome.as_str(), "Request served");
        outcome
    }

    /// Register `callback` for updates on `key` and subscribe the key on
    /// the push channel.
    ///
    /// Callbacks run on the pump task and must not block.
    pub fn subscribe<F>(&self, key: &SubscriptionKey, callback: F) -> SubscriberId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        let (id, first) = self.inner.subscribers.add(key, Arc::new(callback));
        self.inner.channel.subscribe(slice::from_ref(key));
        info!(key = %key, subscriber = %id, first, "Subscriber added");
        id
    }

    /// Drop every subscriber of `key` and unsubscribe it from the channel.
    /// Returns the number of subscribers removed.
    pub fn unsubscribe(&self, key: &SubscriptionKey) -> usize {
        let removed = self.inner.subscribers.remove_key(key);
        self.inner.channel.unsubscribe(slice::from_ref(key));
        info!(key = %key, removed, "Key unsubscribed");
        removed
    }

    /// Drop one subscriber. The key leaves the channel with its last subscriber.
    pub fn remove_subscriber(&self, id: SubscriberId) -> bool {
        match self.inner.subscribers.remove(id) {
            Some(key) => {
                self.inner.channel.unsubscribe(slice::from_ref(&key));
                info!(key = %key, subscriber = %id, "Last subscriber removed");
                true
            }
            None => false,
        }
    }

    /// Logged events with severity >= `min_severity` from the last `window`,
    /// newest first.
    pub fn get_recent_events(&self, min_severity: Severity, window: Duration) -> RecentEvents {
        self.inner.log.recent_by_severity(min_severity, window)
    }

    /// Restart the push channel after exhaustion.
    ///
    /// Returns true if a reconnect was started.
    pub fn resume(&self) -> bool {
        self.inner.router.clear_exhausted(Route::Push);
        let started = self.inner.channel.reconnect();
        self.inner.log.record(
            LogEntry::new(
                LogCategory::Coordinator,
                Severity::Low,
                format!("Resume requested (reconnect started: {started})"),
            )
            .with_route(Route::Push),
        );
        started
    }

    /// Overall service level.
    pub fn status(&self) -> ServiceStatus {
        let cache = &self.inner.cache;
        let cache_usable = cache.keys().iter().any(|key| cache.has_usable(key));
        self.inner
            .router
            .peek_strategy(Route::Push, cache_usable)
            .into()
    }

    /// Strategy a request for `key` would follow on a cache miss.
    pub fn strategy_for(&self, key: &SubscriptionKey) -> Strategy {
        self.inner
            .router
            .peek_strategy(Route::Push, self.inner.cache.has_usable(key))
    }

    pub fn stats(&self) -> CoordinatorStats {
        let inner = &self.inner;
        let c = &inner.counters;
        CoordinatorStats {
            requests: c.requests.load(Ordering::Relaxed),
            served_from_cache: c.from_cache.load(Ordering::Relaxed),
            served_from_push: c.from_push.load(Ordering::Relaxed),
            served_from_pull: c.from_pull.load(Ordering::Relaxed),
            served_cached_only: c.cached_only.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            offline: c.offline.load(Ordering::Relaxed),
            notifications: c.notifications.load(Ordering::Relaxed),
            refreshes: c.refreshes.load(Ordering::Relaxed),
            subscribers: inner.subscribers.len(),
            subscribed_keys: inner.channel.active_keys().len(),
            channel_state: inner.channel.state(),
            channel_attempt: inner.channel.attempt(),
            strategy: inner.router.last_strategy(),
            cache: inner.cache.stats(),
            event_log: inner.log.stats(),
        }
    }

    pub fn channel_state(&self) -> ChannelState {
        self.inner.channel.state()
    }

    pub fn is_subscribed(&self, key: &SubscriptionKey) -> bool {
        self.inner.channel.is_subscribed(key)
    }

    /// Stop the channel and the pump. Pending requests resolve through
    /// their fallback path.
    pub async fn shutdown(&self) {
        info!(channel = %self.inner.channel_name, "Coordinator shutting down");
        self.inner.shutdown.cancel();
        self.inner.channel.shutdown();
        self.inner.waiters.lock().clear();

        let pump = self.pump.lock().take();
        if let Some(pump) = pump {
            if let Err(e) = pump.await {
                warn!(error = %e, "Notice pump ended abnormally");
            }
        }
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

impl Inner {
    async fn request(self: &Arc<Self>, key: &SubscriptionKey) -> RequestOutcome {
        if let CacheLookup::Fresh(entry) = self.cache.get(key) {
            return RequestOutcome::Value {
                event: entry.into_event(),
                source: Source::Cache,
            };
        }

        let decision = self.router.decide(Route::Push, self.cache.has_usable(key));
        if let Some(previous) = decision.changed_from {
            let severity = if decision.strategy.is_degraded() {
                Severity::Medium
            } else {
                Severity::Low
            };
            self.log.record(
                LogEntry::new(
                    LogCategory::Router,
                    severity,
                    format!("Strategy {previous} -> {}", decision.strategy),
                )
                .with_key(key.clone()),
            );
        }

        match decision.strategy {
            Strategy::UsePush => self.request_push(key).await,
            Strategy::UsePullFallback => self.request_pull(key).await,
            Strategy::CachedOnly => self.serve_stale(key).unwrap_or(RequestOutcome::Offline),
            Strategy::Offline => RequestOutcome::Offline,
        }
    }

    /// Subscribe `key` and wait for its first push update.
    async fn request_push(self: &Arc<Self>, key: &SubscriptionKey) -> RequestOutcome {
        // A live subscription gets no new snapshot; refresh through pull.
        if self.channel.is_subscribed(key) && self.channel.state() == ChannelState::Connected {
            return self.request_pull(key).await;
        }

        let (tx, rx) = oneshot::channel();
        self.waiters.lock().entry(key.clone()).or_default().push(tx);
        self.channel.subscribe(slice::from_ref(key));

        match tokio::time::timeout(self.fetch_timeout, rx).await {
            Ok(Ok(event)) => RequestOutcome::Value {
                event,
                source: Source::Push,
            },
            Ok(Err(_)) | Err(_) => {
                self.prune_waiters(key);
                if self.shutdown.is_cancelled() {
                    return RequestOutcome::Offline;
                }
                self.router.record_outcome(Route::Push, false);
                self.log.record(
                    LogEntry::new(
                        LogCategory::Fetch,
                        Severity::High,
                        format!(
                            "No push update within {}ms",
                            self.fetch_timeout.as_millis()
                        ),
                    )
                    .with_key(key.clone())
                    .with_route(Route::Push),
                );
                let outcome = self.request_pull(key).await;
                self.release_unused(key);
                outcome
            }
        }
    }

    /// Drop a channel subscription made only for a request that got
    /// nothing to cache.
    fn release_unused(&self, key: &SubscriptionKey) {
        if self.subscribers.has_subscribers(key) || self.cache.contains(key) {
            return;
        }
        if self.waiters.lock().contains_key(key) {
            return;
        }
        debug!(key = %key, "Releasing push subscription of failed request");
        self.channel.unsubscribe(slice::from_ref(key));
    }

    async fn request_pull(self: &Arc<Self>, key: &SubscriptionKey) -> RequestOutcome {
        match self.pull_through(key).await {
            Ok(event) => RequestOutcome::Value {
                event,
                source: Source::Pull,
            },
            Err(_) => self.serve_stale(key).unwrap_or(RequestOutcome::Miss),
        }
    }

    fn serve_stale(&self, key: &SubscriptionKey) -> Option<RequestOutcome> {
        self.cache
            .peek_usable(key)
            .map(|entry| RequestOutcome::Value {
                event: entry.into_event(),
                source: Source::CachedOnly,
            })
    }

    /// Coalesced pull fetch that writes the cache and notifies before
    /// resolving.
    async fn pull_through(self: &Arc<Self>, key: &SubscriptionKey) -> FeedResult<UpdateEvent> {
        let inner = Arc::clone(self);
        let owned_key = key.clone();
        self.cache
            .coalesce(key, move || {
                // Detached: the write completes even if every waiter is dropped.
                let task = tokio::spawn(inner.fetch_and_store(owned_key));
                async move {
                    task.await.unwrap_or_else(|e| {
                        Err(FeedError::TransportFailure(format!("pull task failed: {e}")))
                    })
                }
            })
            .await
    }

    async fn fetch_and_store(self: Arc<Self>, key: SubscriptionKey) -> FeedResult<UpdateEvent> {
        let fetch = self.pull.fetch(&key);
        let result = match tokio::time::timeout(self.fetch_timeout, fetch).await {
            Ok(result) => result,
            Err(_) => Err(FeedError::timeout(self.fetch_timeout)),
        };

        match result {
            Ok(event) => {
                self.router.record_outcome(Route::Pull, true);
                let outcome = self.apply_update(event.clone());
                if outcome.is_accepted() {
                    Ok(event)
                } else {
                    // The cache already holds something newer.
                    Ok(self
                        .cache
                        .peek_usable(&key)
                        .map(CacheEntry::into_event)
                        .unwrap_or(event))
                }
            }
            Err(e) => {
                self.router.record_outcome(Route::Pull, false);
                self.log.record(
                    LogEntry::new(
                        LogCategory::Fetch,
                        Severity::High,
                        format!("Pull fetch failed: {e}"),
                    )
                    .with_key(key)
                    .with_route(Route::Pull),
                );
                Err(e)
            }
        }
    }

    /// Write `event` and, if accepted, notify waiters and subscribers.
    fn apply_update(&self, event: UpdateEvent) -> PutOutcome {
        let _order = self.write_order.lock();
        let outcome = self.cache.put(event.clone());
        self.release_evicted(&outcome.evicted);
        if outcome.is_accepted() {
            self.notify(&event);
        }
        outcome
    }

    /// Evicted keys nobody subscribed to leave the push channel too.
    fn release_evicted(&self, evicted: &[Eviction]) {
        for eviction in evicted {
            self.log.record(
                LogEntry::new(
                    LogCategory::Cache,
                    Severity::Low,
                    format!("Cache entry evicted ({})", eviction.reason.as_str()),
                )
                .with_key(eviction.key.clone()),
            );
            if !self.subscribers.has_subscribers(&eviction.key) {
                self.channel.unsubscribe(slice::from_ref(&eviction.key));
            }
        }
    }

    fn notify(&self, event: &UpdateEvent) {
        let waiters = self.waiters.lock().remove(&event.key).unwrap_or_default();
        let mut delivered = 0u64;
        for waiter in waiters {
            if waiter.send(event.clone()).is_ok() {
                delivered += 1;
            }
        }

        let callbacks = self.subscribers.callbacks(&event.key);
        if !callbacks.is_empty() {
            let notification = Notification::Update(event.clone());
            for callback in &callbacks {
                callback(&notification);
            }
            delivered += callbacks.len() as u64;
        }

        self.counters
            .notifications
            .fetch_add(delivered, Ordering::Relaxed);
    }

    fn prune_waiters(&self, key: &SubscriptionKey) {
        let mut waiters = self.waiters.lock();
        if let Some(list) = waiters.get_mut(key) {
            list.retain(|tx| !tx.is_closed());
            if list.is_empty() {
                waiters.remove(key);
            }
        }
    }

    async fn pump(self: Arc<Self>, mut notices: mpsc::Receiver<ChannelNotice>) {
        let mut maintenance = tokio::time::interval(MAINTENANCE_INTERVAL);
        maintenance.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                notice = notices.recv() => match notice {
                    Some(notice) => self.handle_notice(notice),
                    None => {
                        debug!(channel = %self.channel_name, "Notice channel closed");
                        break;
                    }
                },
                _ = maintenance.tick() => {
                    let evicted = self.cache.purge_idle();
                    self.release_evicted(&evicted);
                }
            }
        }
        debug!(channel = %self.channel_name, "Notice pump stopped");
    }

    fn handle_notice(self: &Arc<Self>, notice: ChannelNotice) {
        match notice {
            ChannelNotice::Update(event) => {
                self.apply_update(event);
            }
            ChannelNotice::Connected { reconnected } => {
                self.router.record_outcome(Route::Push, true);
                if reconnected {
                    let keys = self.channel.active_keys();
                    self.log.record(
                        LogEntry::new(
                            LogCategory::Channel,
                            Severity::Medium,
                            format!("Push channel reconnected, refreshing {} keys", keys.len()),
                        )
                        .with_route(Route::Push),
                    );
                    self.spawn_refresh(keys);
                } else {
                    self.log.record(
                        LogEntry::new(LogCategory::Channel, Severity::Low, "Push channel connected")
                            .with_route(Route::Push),
                    );
                }
            }
            ChannelNotice::Disconnected { reason } => {
                self.push_failure(format!("Push session lost: {reason}"));
            }
            ChannelNotice::ConnectFailed { attempt, reason } => {
                self.push_failure(format!("Push connect attempt {attempt} failed: {reason}"));
            }
            ChannelNotice::ReconnectScheduled { attempt, delay } => {
                debug!(
                    channel = %self.channel_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Reconnect scheduled"
                );
            }
            ChannelNotice::Exhausted { attempts } => self.on_exhausted(attempts),
            ChannelNotice::Stable => {
                debug!(channel = %self.channel_name, "Push channel stable");
            }
        }
    }

    fn push_failure(&self, message: String) {
        let record = self.router.record_outcome(Route::Push, false);
        debug!(
            channel = %self.channel_name,
            consecutive_failures = record.consecutive_failures,
            "Push failure recorded"
        );
        self.log.record(
            LogEntry::new(LogCategory::Transport, Severity::High, message).with_route(Route::Push),
        );
    }

    fn on_exhausted(&self, attempts: u32) {
        self.router.mark_exhausted(Route::Push);
        self.log.record(
            LogEntry::new(
                LogCategory::Channel,
                Severity::Critical,
                format!("Push channel exhausted after {attempts} attempts"),
            )
            .with_route(Route::Push),
        );

        // Pending push waits fall through to the pull path right away.
        self.waiters.lock().clear();

        let status = ServiceStatus::Offline;
        for key in self.subscribers.keys() {
            let notification = Notification::Degraded {
                key: key.clone(),
                status,
            };
            for callback in self.subscribers.callbacks(&key) {
                callback(&notification);
            }
        }
    }

    /// Refresh `keys` through the pull feed after a reconnect.
    fn spawn_refresh(self: &Arc<Self>, keys: Vec<SubscriptionKey>) {
        if keys.is_empty() {
            return;
        }
        self.counters.refreshes.fetch_add(1, Ordering::Relaxed);

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let refresh = join_all(keys.iter().map(|key| inner.pull_through(key)));
            tokio::select! {
                () = inner.shutdown.cancelled() => {}
                results = refresh => {
                    let failed = results.iter().filter(|r| r.is_err()).count();
                    info!(
                        channel = %inner.channel_name,
                        keys = keys.len(),
                        failed,
                        "Reconnect refresh complete"
                    );
                }
            }
        });
    }
}
