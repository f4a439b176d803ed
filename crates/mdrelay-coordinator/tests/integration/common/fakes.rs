//! Test doubles for the coordinator.
//!
//! - `FakePushFeed`: scripted push feed whose sessions answer every
//!   subscribe with one snapshot update per key
//! - `MockPull`: mockall pull feed
//! - helpers for keys, events, configs and waiting on conditions

#![allow(dead_code)]

use mdrelay_coordinator::CoordinatorConfig;
use mdrelay_core::{BoxFuture, FeedError, FeedResult, SubscriptionKey, UpdateEvent};
use mdrelay_pull::PullFeed;
use mdrelay_ws::{ChannelConfig, PushControl, PushFeed, PushMessage, PushSession};
use mockall::mock;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

mock! {
    pub Pull {}

    impl PullFeed for Pull {
        fn fetch(&self, key: &SubscriptionKey) -> BoxFuture<'static, FeedResult<UpdateEvent>>;
    }
}

pub fn key(raw: &str) -> SubscriptionKey {
    SubscriptionKey::new(raw).unwrap()
}

pub fn update(key: &SubscriptionKey, sequence: u64) -> UpdateEvent {
    UpdateEvent::new(
        key.clone(),
        json!({"close": 42_000.0 + sequence as f64}),
        1_700_000_000_000 + sequence as i64,
        sequence,
    )
}

/// Fast, jitter-free backoff: 1s, 2s, 4s, 4s, ...
pub fn test_config() -> CoordinatorConfig {
    CoordinatorConfig {
        channel: ChannelConfig {
            base_delay_ms: 1000,
            max_delay_ms: 4000,
            jitter_ms: 0,
            max_attempts: 10,
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Poll `cond` every virtual millisecond.
pub async fn wait_for(mut cond: impl FnMut() -> bool) {
    for _ in 0..120_000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not met within two virtual minutes");
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControlCall {
    Subscribe(Vec<SubscriptionKey>),
    Unsubscribe(Vec<SubscriptionKey>),
    Close,
}

pub enum Step {
    Accept,
    Refuse,
}

#[derive(Default)]
struct FeedState {
    calls: Mutex<Vec<ControlCall>>,
    sequence: AtomicU64,
}

/// Scripted push feed. Connects beyond the script are refused.
#[derive(Default)]
pub struct FakePushFeed {
    script: Mutex<VecDeque<Step>>,
    connects: AtomicU64,
    sessions: Mutex<Vec<mpsc::Sender<PushMessage>>>,
    state: Arc<FeedState>,
}

impl FakePushFeed {
    pub fn new(script: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            ..Default::default()
        })
    }

    pub fn connects(&self) -> u64 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<ControlCall> {
        self.state.calls.lock().clone()
    }

    pub fn subscribe_calls(&self) -> Vec<Vec<SubscriptionKey>> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ControlCall::Subscribe(keys) => Some(keys),
                _ => None,
            })
            .collect()
    }

    /// Drop the latest session from the server side.
    pub async fn disconnect(&self, reason: &str) {
        let session = self.sessions.lock().last().cloned().unwrap();
        session
            .send(PushMessage::Disconnected {
                reason: reason.to_string(),
            })
            .await
            .unwrap();
    }
}

impl PushFeed for FakePushFeed {
    fn connect(&self) -> BoxFuture<'_, FeedResult<PushSession>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let step = self.script.lock().pop_front().unwrap_or(Step::Refuse);
        Box::pin(async move {
            match step {
                Step::Accept => {
                    let (tx, rx) = mpsc::channel(64);
                    self.sessions.lock().push(tx.clone());
                    Ok(PushSession {
                        events: rx,
                        control: Box::new(FakeControl {
                            state: self.state.clone(),
                            events: tx,
                        }),
                    })
                }
                Step::Refuse => Err(FeedError::TransportFailure("connection refused".into())),
            }
        })
    }
}

struct FakeControl {
    state: Arc<FeedState>,
    events: mpsc::Sender<PushMessage>,
}

impl PushControl for FakeControl {
    fn subscribe(&self, keys: &[SubscriptionKey]) -> Result<(), FeedError> {
        self.state.calls.lock().push(ControlCall::Subscribe(keys.to_vec()));
        for key in keys {
            let sequence = self.state.sequence.fetch_add(1, Ordering::SeqCst) + 1;
            self.events
                .try_send(PushMessage::Event(update(key, sequence)))
                .map_err(|e| FeedError::TransportFailure(e.to_string()))?;
        }
        Ok(())
    }

    fn unsubscribe(&self, keys: &[SubscriptionKey]) -> Result<(), FeedError> {
        self.state
            .calls
            .lock()
            .push(ControlCall::Unsubscribe(keys.to_vec()));
        Ok(())
    }

    fn close(&self) {
        self.state.calls.lock().push(ControlCall::Close);
    }
}
