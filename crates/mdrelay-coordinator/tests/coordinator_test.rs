//! Coordinator end-to-end tests.
//!
//! Drives the full request/notify pipeline against a scripted push feed and
//! a mocked pull feed on a paused clock:
//! - Healthy push serves a cold key with one subscribe, write and notification
//! - Router threshold boundaries (push -> pull -> cached-only -> offline)
//! - Pull refresh of subscribed keys after a reconnect
//! - Coalescing of concurrent requests into one pull fetch
//! - Cache eviction releasing unsubscribed push keys
//! - Status queries leaving the strategy transition log intact

mod integration;
use integration::common::fakes::{
    key, test_config, update, wait_for, ControlCall, FakePushFeed, MockPull, Step,
};

use futures_util::future::join_all;
use mdrelay_coordinator::{
    Coordinator, CoordinatorConfig, Notification, RequestOutcome, ServiceStatus, Source,
};
use mdrelay_core::{FeedError, LogCategory, Severity};
use mdrelay_router::Strategy;
use mdrelay_ws::{ChannelConfig, ChannelState};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const HOUR: Duration = Duration::from_secs(3600);

fn count_at_least(coordinator: &Coordinator, severity: Severity) -> usize {
    coordinator
        .get_recent_events(severity, HOUR)
        .iter()
        .count()
}

#[tokio::test(start_paused = true)]
async fn test_cold_request_served_by_healthy_push() {
    let push = FakePushFeed::new(vec![Step::Accept]);
    let mut pull = MockPull::new();
    pull.expect_fetch().never();
    let coordinator = Coordinator::new(test_config(), push.clone(), Arc::new(pull)).unwrap();
    let k = key("BTCUSDT-1m");

    let outcome = coordinator.request(&k).await;

    assert_eq!(outcome.source(), Some(Source::Push));
    assert_eq!(outcome.event().unwrap().sequence, 1);
    assert_eq!(push.subscribe_calls(), vec![vec![k.clone()]]);

    let stats = coordinator.stats();
    assert_eq!(stats.cache.writes, 1);
    assert_eq!(stats.notifications, 1);
    assert_eq!(stats.served_from_push, 1);
    assert_eq!(count_at_least(&coordinator, Severity::Medium), 0);

    // Second request is a fresh cache hit.
    let again = coordinator.request(&k).await;
    assert_eq!(again.source(), Some(Source::Cache));
    assert_eq!(push.subscribe_calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_threshold_boundaries_from_push_to_cached_only() {
    let push = FakePushFeed::new(vec![Step::Accept]);
    let mut pull = MockPull::new();
    pull.expect_fetch()
        .times(3)
        .returning(|_| Box::pin(async { Err(FeedError::Upstream("HTTP 503".into())) }));
    let coordinator = Coordinator::new(test_config(), push.clone(), Arc::new(pull)).unwrap();
    let k = key("BTCUSDT-1m");

    assert_eq!(coordinator.request(&k).await.source(), Some(Source::Push));
    tokio::time::advance(Duration::from_secs(7)).await;

    // Session loss, then refused reconnects at +1s and +3s.
    push.disconnect("reset by peer").await;
    wait_for(|| count_at_least(&coordinator, Severity::High) == 2).await;
    assert_eq!(coordinator.strategy_for(&k), Strategy::UsePush);

    wait_for(|| count_at_least(&coordinator, Severity::High) == 3).await;
    assert_eq!(coordinator.strategy_for(&k), Strategy::UsePullFallback);

    // The entry is about 10s old: still fresh, and pull is still preferred
    // over cached-only while it is healthy.
    assert_eq!(coordinator.request(&k).await.source(), Some(Source::Cache));
    assert_eq!(coordinator.strategy_for(&k), Strategy::UsePullFallback);

    // Past the staleness threshold, within expiry.
    tokio::time::sleep(Duration::from_secs(25)).await;

    for failures in 1..=3 {
        let outcome = coordinator.request(&k).await;
        assert_eq!(outcome.source(), Some(Source::CachedOnly));
        assert_eq!(outcome.event().unwrap().sequence, 1);

        let expected = if failures < 3 {
            Strategy::UsePullFallback
        } else {
            Strategy::CachedOnly
        };
        assert_eq!(coordinator.strategy_for(&k), expected, "after {failures} pull failures");
    }

    // Cached-only serves without touching the pull feed.
    let outcome = coordinator.request(&k).await;
    assert_eq!(outcome.source(), Some(Source::CachedOnly));
    assert_eq!(coordinator.status(), ServiceStatus::CachedOnly);
}

#[tokio::test(start_paused = true)]
async fn test_exhaustion_degrades_subscribers_then_goes_offline() {
    let push = FakePushFeed::new(vec![]);
    let mut pull = MockPull::new();
    pull.expect_fetch()
        .times(3)
        .returning(|_| Box::pin(async { Err(FeedError::timeout(Duration::from_secs(5))) }));

    let config = CoordinatorConfig {
        channel: ChannelConfig {
            max_attempts: 1,
            jitter_ms: 0,
            ..Default::default()
        },
        ..Default::default()
    };
    let coordinator = Coordinator::new(config, push.clone(), Arc::new(pull)).unwrap();
    let k = key("BTCUSDT-1m");

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    coordinator.subscribe(&k, move |notification| sink.lock().push(notification.clone()));

    wait_for(|| !seen.lock().is_empty()).await;
    assert_eq!(
        seen.lock().clone(),
        vec![Notification::Degraded {
            key: k.clone(),
            status: ServiceStatus::Offline,
        }]
    );
    assert_eq!(count_at_least(&coordinator, Severity::Critical), 1);
    assert_eq!(coordinator.strategy_for(&k), Strategy::UsePullFallback);

    // Pull fails three times with nothing cached.
    for _ in 0..3 {
        assert_eq!(coordinator.request(&k).await, RequestOutcome::Miss);
    }
    assert_eq!(coordinator.request(&k).await, RequestOutcome::Offline);
    assert_eq!(coordinator.status(), ServiceStatus::Offline);

    let stats = coordinator.stats();
    assert_eq!(stats.misses, 3);
    assert_eq!(stats.offline, 1);

    // Explicit resume retries the push channel once more.
    assert!(coordinator.resume());
    wait_for(|| seen.lock().len() == 2).await;
    assert_eq!(push.connects(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_refreshes_subscribed_keys_through_pull() {
    let push = FakePushFeed::new(vec![Step::Accept, Step::Accept]);
    let pulls = Arc::new(AtomicUsize::new(0));
    let counter = pulls.clone();
    let mut pull = MockPull::new();
    pull.expect_fetch().times(1).returning(move |key| {
        counter.fetch_add(1, Ordering::SeqCst);
        let event = update(key, 10);
        Box::pin(async move { Ok(event) })
    });
    let coordinator = Coordinator::new(test_config(), push.clone(), Arc::new(pull)).unwrap();
    let k = key("BTCUSDT-1m");

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    coordinator.subscribe(&k, move |notification| {
        if let Notification::Update(event) = notification {
            sink.lock().push(event.sequence);
        }
    });
    wait_for(|| *seen.lock() == vec![1]).await;

    push.disconnect("server restart").await;
    wait_for(|| seen.lock().contains(&10)).await;

    assert_eq!(pulls.load(Ordering::SeqCst), 1);
    assert_eq!(push.connects(), 2);
    assert_eq!(coordinator.stats().refreshes, 1);
    assert_eq!(coordinator.channel_state(), ChannelState::Connected);

    // Notifications only ever move forward.
    let sequences = seen.lock().clone();
    assert!(sequences.windows(2).all(|w| w[0] < w[1]), "{sequences:?}");

    let outcome = coordinator.request(&k).await;
    assert_eq!(outcome.source(), Some(Source::Cache));
    assert_eq!(outcome.event().unwrap().sequence, 10);

    // One success after the drop brings push straight back.
    assert_eq!(coordinator.strategy_for(&k), Strategy::UsePush);
    let recent: Vec<String> = coordinator
        .get_recent_events(Severity::Medium, HOUR)
        .iter()
        .map(|entry| entry.message().to_string())
        .collect();
    assert!(recent.iter().any(|m| m.contains("reconnected")), "{recent:?}");
    assert!(recent.iter().any(|m| m.contains("server restart")), "{recent:?}");
}

/// Push exhausted after one refused connect, so requests go to pull.
async fn pull_only_coordinator(pull: MockPull) -> Coordinator {
    let push = FakePushFeed::new(vec![]);
    let config = CoordinatorConfig {
        channel: ChannelConfig {
            max_attempts: 1,
            ..Default::default()
        },
        ..Default::default()
    };
    let coordinator = Coordinator::new(config, push, Arc::new(pull)).unwrap();
    let other = key("ETHUSDT-1m");
    coordinator.subscribe(&other, |_| {});
    wait_for(|| coordinator.strategy_for(&other) == Strategy::UsePullFallback).await;
    coordinator
}

fn router_transitions(coordinator: &Coordinator) -> Vec<String> {
    coordinator
        .get_recent_events(Severity::Low, HOUR)
        .iter()
        .filter(|entry| entry.category() == LogCategory::Router)
        .map(|entry| entry.message().to_string())
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_status_queries_do_not_hide_strategy_transitions() {
    let mut pull = MockPull::new();
    pull.expect_fetch()
        .times(3)
        .returning(|_| Box::pin(async { Err(FeedError::Upstream("HTTP 503".into())) }));
    let coordinator = pull_only_coordinator(pull).await;
    let k = key("BTCUSDT-1m");

    assert_eq!(coordinator.status(), ServiceStatus::PullFallback);
    assert_eq!(coordinator.request(&k).await, RequestOutcome::Miss);

    for _ in 0..2 {
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(coordinator.status(), ServiceStatus::PullFallback);
        assert_eq!(coordinator.request(&k).await, RequestOutcome::Miss);
    }

    // Three pull failures and nothing cached.
    assert_eq!(coordinator.status(), ServiceStatus::Offline);
    assert_eq!(coordinator.strategy_for(&k), Strategy::Offline);
    assert_eq!(coordinator.request(&k).await, RequestOutcome::Offline);

    assert_eq!(
        router_transitions(&coordinator),
        vec![
            "Strategy use_pull_fallback -> offline",
            "Strategy use_push -> use_pull_fallback",
        ]
    );
    assert_eq!(coordinator.stats().strategy, Some(Strategy::Offline));
}

#[tokio::test(start_paused = true)]
async fn test_failed_push_request_releases_its_subscription() {
    let push = FakePushFeed::new(vec![]);
    let mut pull = MockPull::new();
    pull.expect_fetch()
        .times(1)
        .returning(|_| Box::pin(async { Err(FeedError::Upstream("HTTP 404".into())) }));
    let coordinator = Coordinator::new(test_config(), push.clone(), Arc::new(pull)).unwrap();
    let k = key("BTCUSDT-1m");

    assert_eq!(coordinator.request(&k).await, RequestOutcome::Miss);

    assert!(!coordinator.is_subscribed(&k));
    assert_eq!(coordinator.stats().subscribed_keys, 0);
    assert_eq!(coordinator.channel_state(), ChannelState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_requests_share_one_fetch() {
    let fetches = Arc::new(AtomicUsize::new(0));
    let counter = fetches.clone();
    let mut pull = MockPull::new();
    pull.expect_fetch().returning(move |key| {
        counter.fetch_add(1, Ordering::SeqCst);
        let event = update(key, 7);
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(event)
        })
    });
    let coordinator = pull_only_coordinator(pull).await;
    let k = key("BTCUSDT-1m");

    let outcomes = join_all((0..8).map(|_| coordinator.request(&k))).await;

    assert_eq!(fetches.load(Ordering::SeqCst), 1);
    for outcome in &outcomes {
        assert_eq!(outcome.source(), Some(Source::Pull));
        assert_eq!(outcome.event().unwrap().sequence, 7);
    }
    let stats = coordinator.stats();
    assert_eq!(stats.cache.coalesced, 7);
    assert_eq!(stats.cache.writes, 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_requests_share_one_failure() {
    let fetches = Arc::new(AtomicUsize::new(0));
    let counter = fetches.clone();
    let mut pull = MockPull::new();
    pull.expect_fetch().returning(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Box::pin(async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Err(FeedError::Upstream("HTTP 502".into()))
        })
    });
    let coordinator = pull_only_coordinator(pull).await;
    let k = key("BTCUSDT-1m");

    let outcomes = join_all((0..5).map(|_| coordinator.request(&k))).await;

    assert_eq!(fetches.load(Ordering::SeqCst), 1);
    assert!(outcomes.iter().all(|o| *o == RequestOutcome::Miss));
    // One shared failure counts once against the pull route.
    assert_eq!(coordinator.strategy_for(&k), Strategy::UsePullFallback);
}

#[tokio::test(start_paused = true)]
async fn test_pull_fetch_timeout_is_a_failure() {
    let mut pull = MockPull::new();
    pull.expect_fetch()
        .returning(|_| Box::pin(std::future::pending()));
    let coordinator = pull_only_coordinator(pull).await;
    let k = key("BTCUSDT-1m");

    assert_eq!(coordinator.request(&k).await, RequestOutcome::Miss);
    let timeouts = coordinator
        .get_recent_events(Severity::High, HOUR)
        .iter()
        .filter(|entry| entry.message().contains("timed out"))
        .count();
    assert_eq!(timeouts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_stale_subscribed_key_refreshes_without_push_penalty() {
    let push = FakePushFeed::new(vec![Step::Accept]);
    let mut pull = MockPull::new();
    pull.expect_fetch().times(1).returning(|key| {
        let event = update(key, 5);
        Box::pin(async move { Ok(event) })
    });
    let coordinator = Coordinator::new(test_config(), push.clone(), Arc::new(pull)).unwrap();
    let k = key("BTCUSDT-1m");

    coordinator.subscribe(&k, |_| {});
    wait_for(|| coordinator.stats().cache.writes == 1).await;
    tokio::time::sleep(Duration::from_secs(31)).await;

    let outcome = coordinator.request(&k).await;
    assert_eq!(outcome.source(), Some(Source::Pull));
    assert_eq!(outcome.event().unwrap().sequence, 5);
    assert_eq!(push.subscribe_calls().len(), 1);
    assert_eq!(count_at_least(&coordinator, Severity::High), 0);
    assert_eq!(coordinator.strategy_for(&k), Strategy::UsePush);
}

#[tokio::test(start_paused = true)]
async fn test_eviction_releases_keys_without_subscribers() {
    let push = FakePushFeed::new(vec![Step::Accept]);
    let mut pull = MockPull::new();
    pull.expect_fetch().never();
    let mut config = test_config();
    config.cache.capacity = 2;
    let coordinator = Coordinator::new(config, push.clone(), Arc::new(pull)).unwrap();
    let (a, b, c, d) = (
        key("AAAUSDT-1m"),
        key("BBBUSDT-1m"),
        key("CCCUSDT-1m"),
        key("DDDUSDT-1m"),
    );

    coordinator.subscribe(&a, |_| {});
    wait_for(|| coordinator.stats().cache.writes == 1).await;
    for k in [&b, &c, &d] {
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(coordinator.request(k).await.source(), Some(Source::Push));
    }

    // `a` was evicted first but keeps its subscriber; `b` had none.
    assert!(coordinator.is_subscribed(&a));
    assert!(!coordinator.is_subscribed(&b));
    assert!(coordinator.is_subscribed(&c));
    assert!(coordinator.is_subscribed(&d));
    assert!(push.calls().contains(&ControlCall::Unsubscribe(vec![b.clone()])));
    assert_eq!(coordinator.stats().cache.evictions, 2);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_channel_and_requests() {
    let push = FakePushFeed::new(vec![Step::Accept]);
    let pull = MockPull::new();
    let coordinator = Coordinator::new(test_config(), push.clone(), Arc::new(pull)).unwrap();
    let k = key("BTCUSDT-1m");

    coordinator.subscribe(&k, |_| {});
    wait_for(|| coordinator.channel_state() == ChannelState::Connected).await;

    coordinator.shutdown().await;
    assert_eq!(coordinator.channel_state(), ChannelState::Disconnected);
    assert!(push.calls().contains(&ControlCall::Close));
    assert_eq!(coordinator.request(&k).await, RequestOutcome::Offline);
}

#[tokio::test(start_paused = true)]
async fn test_independent_coordinators_do_not_interfere() {
    let healthy = FakePushFeed::new(vec![Step::Accept]);
    let broken = FakePushFeed::new(vec![]);
    let mut pull_a = MockPull::new();
    pull_a.expect_fetch().never();
    let pull_b = MockPull::new();

    let mut broken_config = test_config();
    broken_config.channel_name = "broken".to_string();
    broken_config.channel.max_attempts = 1;

    let a = Coordinator::new(test_config(), healthy, Arc::new(pull_a)).unwrap();
    let b = Coordinator::new(broken_config, broken, Arc::new(pull_b)).unwrap();
    let k = key("BTCUSDT-1m");

    b.subscribe(&k, |_| {});
    wait_for(|| b.strategy_for(&k) == Strategy::UsePullFallback).await;

    assert_eq!(a.strategy_for(&k), Strategy::UsePush);
    assert_eq!(a.request(&k).await.source(), Some(Source::Push));
    assert_eq!(count_at_least(&a, Severity::High), 0);
}
