//! Subscription channel.
//!
//! Owns the set of active keys for one push feed and a supervisor task that
//! keeps a session open while the set is non-empty:
//! connect (with timeout) -> run session -> backoff -> connect ...
//!
//! The supervisor reports everything it observes as `ChannelNotice`s on a
//! bounded channel. Events lost while disconnected are not replayed; the
//! consumer is told through `Connected { reconnected: true }` so it can
//! refresh by other means.
//!
//! Lifecycle fields (state, attempts, keys, live control) sit behind one
//! lock so subscription changes and state transitions never interleave.

use crate::backoff::BackoffPolicy;
use crate::feed::{PushControl, PushFeed, PushMessage, PushSession};
use crate::state::{ChannelInput, ChannelState};
use mdrelay_core::{FeedError, SubscriptionKey, UpdateEvent};
use mdrelay_telemetry::Metrics;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Base reconnect delay (ms). Default: 1000.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Reconnect delay cap (ms). Default: 60000.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Jitter amplitude (ms), applied as +/-. Default: 500.
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
    /// Consecutive failed cycles before giving up. Default: 10.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Connected time that resets the attempt counter (ms). Default: 30000.
    #[serde(default = "default_stability_window_ms")]
    pub stability_window_ms: u64,
    /// Timeout for a single connect (ms). Default: 10000.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Notice channel capacity. Default: 1024.
    #[serde(default = "default_notice_buffer")]
    pub notice_buffer: usize,
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_jitter_ms() -> u64 {
    500
}

fn default_max_attempts() -> u32 {
    10
}

fn default_stability_window_ms() -> u64 {
    30_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_notice_buffer() -> usize {
    1024
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ms: default_jitter_ms(),
            max_attempts: default_max_attempts(),
            stability_window_ms: default_stability_window_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            notice_buffer: default_notice_buffer(),
        }
    }
}

impl ChannelConfig {
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter: Duration::from_millis(self.jitter_ms),
            max_attempts: self.max_attempts.max(1),
            stability_window: Duration::from_millis(self.stability_window_ms),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// What the supervisor observed.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelNotice {
    /// Session open. `reconnected` is true for every session after the first.
    Connected { reconnected: bool },
    Update(UpdateEvent),
    /// A live session ended.
    Disconnected { reason: String },
    /// A connect attempt failed or timed out.
    ConnectFailed { attempt: u32, reason: String },
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// Attempt budget spent; no retries until `reconnect()`.
    Exhausted { attempts: u32 },
    /// Connected for the stability window; attempt counter reset.
    Stable,
}

struct Lifecycle {
    state: ChannelState,
    attempt: u32,
    exhausted: bool,
    ever_connected: bool,
    keys: BTreeSet<SubscriptionKey>,
    /// Token of the running supervisor, if any.
    run: Option<CancellationToken>,
    /// Control of the live session, if any.
    control: Option<Arc<dyn PushControl>>,
}

struct ChannelInner {
    name: String,
    lifecycle: Mutex<Lifecycle>,
}

impl ChannelInner {
    fn apply(&self, lc: &mut Lifecycle, input: ChannelInput) {
        let next = lc.state.on(input);
        if next != lc.state {
            debug!(
                channel = %self.name,
                from = lc.state.as_str(),
                to = next.as_str(),
                ?input,
                "Channel state transition"
            );
            lc.state = next;
            Metrics::channel_state_set(&self.name, next.as_str());
        }
    }

    /// Apply `input` unless `token` was cancelled. Returns false if cancelled.
    fn transition(&self, token: &CancellationToken, input: ChannelInput) -> bool {
        let mut lc = self.lifecycle.lock();
        if token.is_cancelled() {
            return false;
        }
        self.apply(&mut lc, input);
        true
    }

    /// Stop the supervisor and close the live session.
    fn stop(&self, lc: &mut Lifecycle) {
        if let Some(token) = lc.run.take() {
            token.cancel();
        }
        if let Some(control) = lc.control.take() {
            control.close();
        }
        self.apply(lc, ChannelInput::Disconnected);
    }
}

/// Push subscription channel with supervised reconnects.
pub struct SubscriptionChannel {
    inner: Arc<ChannelInner>,
    feed: Arc<dyn PushFeed>,
    policy: BackoffPolicy,
    connect_timeout: Duration,
    notices: mpsc::Sender<ChannelNotice>,
    shutdown_token: CancellationToken,
}

impl SubscriptionChannel {
    /// Create a channel and the receiver for its notices.
    ///
    /// No connection is made until the first key is subscribed.
    pub fn new(
        name: impl Into<String>,
        feed: Arc<dyn PushFeed>,
        config: ChannelConfig,
    ) -> (Self, mpsc::Receiver<ChannelNotice>) {
        let (notices, notices_rx) = mpsc::channel(config.notice_buffer.max(1));
        let name = name.into();
        Metrics::channel_state_set(&name, ChannelState::Disconnected.as_str());

        let channel = Self {
            inner: Arc::new(ChannelInner {
                name,
                lifecycle: Mutex::new(Lifecycle {
                    state: ChannelState::Disconnected,
                    attempt: 0,
                    exhausted: false,
                    ever_connected: false,
                    keys: BTreeSet::new(),
                    run: None,
                    control: None,
                }),
            }),
            feed,
            policy: config.backoff_policy(),
            connect_timeout: config.connect_timeout(),
            notices,
            shutdown_token: CancellationToken::new(),
        };
        (channel, notices_rx)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn state(&self) -> ChannelState {
        self.inner.lifecycle.lock().state
    }

    /// Consecutive failed cycles since the last stable session.
    pub fn attempt(&self) -> u32 {
        self.inner.lifecycle.lock().attempt
    }

    pub fn is_exhausted(&self) -> bool {
        self.inner.lifecycle.lock().exhausted
    }

    pub fn active_keys(&self) -> Vec<SubscriptionKey> {
        self.inner.lifecycle.lock().keys.iter().cloned().collect()
    }

    pub fn is_subscribed(&self, key: &SubscriptionKey) -> bool {
        self.inner.lifecycle.lock().keys.contains(key)
    }

    /// Add keys. Returns the keys that were not already active.
    ///
    /// Already-active keys cause no network traffic. The first key starts
    /// the supervisor. Must be called from within a tokio runtime.
    pub fn subscribe(&self, keys: &[SubscriptionKey]) -> Vec<SubscriptionKey> {
        let mut lc = self.inner.lifecycle.lock();
        let added: Vec<SubscriptionKey> = keys
            .iter()
            .filter(|key| lc.keys.insert((*key).clone()))
            .cloned()
            .collect();

        if added.is_empty() {
            return added;
        }
        debug!(channel = %self.inner.name, count = added.len(), "Keys subscribed");

        if let Some(control) = &lc.control {
            if let Err(e) = control.subscribe(&added) {
                // The session is failing; the next session resubscribes all keys.
                warn!(channel = %self.inner.name, error = %e, "Live subscribe failed");
            }
        }
        self.ensure_supervisor(&mut lc);
        added
    }

    /// Remove keys. Emptying the set closes the session and abandons any
    /// pending reconnect without counting another attempt.
    pub fn unsubscribe(&self, keys: &[SubscriptionKey]) -> Vec<SubscriptionKey> {
        let mut lc = self.inner.lifecycle.lock();
        let removed: Vec<SubscriptionKey> = keys
            .iter()
            .filter(|key| lc.keys.remove(*key))
            .cloned()
            .collect();

        if removed.is_empty() {
            return removed;
        }

        if lc.keys.is_empty() {
            info!(channel = %self.inner.name, "No active keys, stopping channel");
            self.inner.stop(&mut lc);
            lc.attempt = 0;
        } else if let Some(control) = &lc.control {
            if let Err(e) = control.unsubscribe(&removed) {
                warn!(channel = %self.inner.name, error = %e, "Live unsubscribe failed");
            }
        }
        removed
    }

    /// Restart after exhaustion (or after any stop) if keys are active.
    ///
    /// Returns true if a supervisor was started.
    pub fn reconnect(&self) -> bool {
        let mut lc = self.inner.lifecycle.lock();
        if lc.exhausted {
            info!(channel = %self.inner.name, "Explicit reconnect after exhaustion");
            lc.exhausted = false;
            lc.attempt = 0;
        }
        self.ensure_supervisor(&mut lc)
    }

    /// Stop permanently. Subsequent subscribes only record keys.
    pub fn shutdown(&self) {
        info!(channel = %self.inner.name, "Channel shutdown requested");
        self.shutdown_token.cancel();
        let mut lc = self.inner.lifecycle.lock();
        self.inner.stop(&mut lc);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    fn ensure_supervisor(&self, lc: &mut Lifecycle) -> bool {
        if lc.run.is_some() || lc.exhausted || lc.keys.is_empty() || self.is_shutdown() {
            return false;
        }

        let token = self.shutdown_token.child_token();
        lc.run = Some(token.clone());

        let supervisor = Supervisor {
            inner: self.inner.clone(),
            feed: self.feed.clone(),
            policy: self.policy.clone(),
            connect_timeout: self.connect_timeout,
            notices: self.notices.clone(),
            token,
        };
        tokio::spawn(supervisor.run());
        true
    }
}

impl Drop for SubscriptionChannel {
    fn drop(&mut self) {
        self.shutdown_token.cancel();
    }
}

/// Outcome of one connect-and-run cycle.
enum Cycle {
    Failed { reason: String, kind: &'static str },
    Cancelled,
}

struct Supervisor {
    inner: Arc<ChannelInner>,
    feed: Arc<dyn PushFeed>,
    policy: BackoffPolicy,
    connect_timeout: Duration,
    notices: mpsc::Sender<ChannelNotice>,
    token: CancellationToken,
}

impl Supervisor {
    async fn run(self) {
        let name = self.inner.name.clone();
        debug!(channel = %name, "Supervisor started");

        loop {
            if !self.inner.transition(&self.token, ChannelInput::ConnectRequested) {
                break;
            }

            let (reason, kind) = match self.cycle().await {
                Cycle::Cancelled => break,
                Cycle::Failed { reason, kind } => (reason, kind),
            };

            let Some(attempt) = self.record_failure() else {
                break;
            };

            if self.policy.is_exhausted(attempt) {
                self.exhaust(attempt).await;
                break;
            }

            let delay = self.policy.delay(attempt - 1);
            if !self.inner.transition(&self.token, ChannelInput::BackoffStarted) {
                break;
            }
            warn!(
                channel = %name,
                attempt,
                delay_ms = delay.as_millis() as u64,
                %reason,
                "Reconnecting"
            );
            Metrics::channel_reconnect(&name, kind);
            self.emit(ChannelNotice::ReconnectScheduled { attempt, delay })
                .await;

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.token.cancelled() => {
                    debug!(channel = %name, "Backoff abandoned");
                    break;
                }
            }

            if !self.inner.transition(&self.token, ChannelInput::BackoffElapsed) {
                break;
            }
        }

        debug!(channel = %name, "Supervisor stopped");
    }

    async fn cycle(&self) -> Cycle {
        info!(channel = %self.inner.name, "Connecting push feed");

        let connect = tokio::select! {
            () = self.token.cancelled() => return Cycle::Cancelled,
            result = tokio::time::timeout(self.connect_timeout, self.feed.connect()) => result,
        };

        match connect {
            Ok(Ok(session)) => self.run_session(session).await,
            Ok(Err(e)) => self.connect_failed(e).await,
            Err(_) => self.connect_failed(FeedError::timeout(self.connect_timeout)).await,
        }
    }

    async fn connect_failed(&self, error: FeedError) -> Cycle {
        let reason = error.to_string();
        warn!(channel = %self.inner.name, error = %reason, "Push connect failed");
        if !self.inner.transition(&self.token, ChannelInput::Disconnected) {
            return Cycle::Cancelled;
        }
        let attempt = self.inner.lifecycle.lock().attempt + 1;
        self.emit(ChannelNotice::ConnectFailed {
            attempt,
            reason: reason.clone(),
        })
        .await;
        Cycle::Failed {
            reason,
            kind: error.kind(),
        }
    }

    async fn run_session(&self, session: PushSession) -> Cycle {
        let PushSession {
            mut events,
            control,
        } = session;
        let control: Arc<dyn PushControl> = Arc::from(control);

        // Install the control and snapshot keys under one lock so no
        // concurrent subscribe is missed or sent twice.
        let (keys, reconnected) = {
            let mut lc = self.inner.lifecycle.lock();
            if self.token.is_cancelled() {
                control.close();
                return Cycle::Cancelled;
            }
            self.inner.apply(&mut lc, ChannelInput::ConnectSucceeded);
            lc.control = Some(control.clone());
            let reconnected = lc.ever_connected;
            lc.ever_connected = true;
            (lc.keys.iter().cloned().collect::<Vec<_>>(), reconnected)
        };

        if let Err(e) = control.subscribe(&keys) {
            return self.session_ended(&control, e.to_string()).await;
        }

        info!(
            channel = %self.inner.name,
            keys = keys.len(),
            reconnected,
            "Push session established"
        );
        self.emit(ChannelNotice::Connected { reconnected }).await;

        let stability = tokio::time::sleep(self.policy.stability_window);
        tokio::pin!(stability);
        let mut stable = false;

        loop {
            tokio::select! {
                () = self.token.cancelled() => {
                    control.close();
                    return Cycle::Cancelled;
                }

                () = &mut stability, if !stable => {
                    stable = true;
                    let reset = {
                        let mut lc = self.inner.lifecycle.lock();
                        if self.token.is_cancelled() {
                            false
                        } else {
                            lc.attempt = 0;
                            true
                        }
                    };
                    if reset {
                        debug!(channel = %self.inner.name, "Session stable, attempts reset");
                        self.emit(ChannelNotice::Stable).await;
                    }
                }

                msg = events.recv() => match msg {
                    Some(PushMessage::Event(event)) => {
                        if !self.inner.transition(&self.token, ChannelInput::PushReceived) {
                            control.close();
                            return Cycle::Cancelled;
                        }
                        Metrics::push_update(&self.inner.name);
                        self.emit(ChannelNotice::Update(event)).await;
                    }
                    Some(PushMessage::Disconnected { reason }) => {
                        return self.session_ended(&control, reason).await;
                    }
                    None => {
                        return self
                            .session_ended(&control, "push session closed".to_string())
                            .await;
                    }
                }
            }
        }
    }

    async fn session_ended(&self, control: &Arc<dyn PushControl>, reason: String) -> Cycle {
        control.close();
        {
            let mut lc = self.inner.lifecycle.lock();
            if self.token.is_cancelled() {
                return Cycle::Cancelled;
            }
            if lc
                .control
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, control))
            {
                lc.control = None;
            }
            self.inner.apply(&mut lc, ChannelInput::Disconnected);
        }
        warn!(channel = %self.inner.name, %reason, "Push session lost");
        self.emit(ChannelNotice::Disconnected {
            reason: reason.clone(),
        })
        .await;
        Cycle::Failed {
            reason,
            kind: "disconnected",
        }
    }

    /// Count a failed cycle. None if cancelled meanwhile.
    fn record_failure(&self) -> Option<u32> {
        let mut lc = self.inner.lifecycle.lock();
        if self.token.is_cancelled() {
            return None;
        }
        lc.attempt += 1;
        Some(lc.attempt)
    }

    async fn exhaust(&self, attempts: u32) {
        {
            let mut lc = self.inner.lifecycle.lock();
            if self.token.is_cancelled() {
                return;
            }
            lc.exhausted = true;
            lc.run = None;
            self.inner.apply(&mut lc, ChannelInput::Disconnected);
        }
        error!(
            channel = %self.inner.name,
            attempts,
            "Reconnect attempts exhausted, channel offline until explicit reconnect"
        );
        Metrics::channel_exhausted(&self.inner.name);
        self.emit(ChannelNotice::Exhausted { attempts }).await;
    }

    async fn emit(&self, notice: ChannelNotice) {
        if self.notices.send(notice).await.is_err() {
            debug!(channel = %self.inner.name, "Notice receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdrelay_core::BoxFuture;
    use serde_json::json;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, PartialEq)]
    enum ControlCall {
        Subscribe(Vec<SubscriptionKey>),
        Unsubscribe(Vec<SubscriptionKey>),
        Close,
    }

    enum Script {
        Accept,
        Fail(FeedError),
        Hang,
    }

    #[derive(Default)]
    struct ScriptedFeed {
        script: Mutex<VecDeque<Script>>,
        connects: Mutex<u32>,
        sessions: Mutex<Vec<mpsc::Sender<PushMessage>>>,
        calls: Arc<Mutex<Vec<ControlCall>>>,
    }

    struct RecordingControl {
        calls: Arc<Mutex<Vec<ControlCall>>>,
    }

    impl PushControl for RecordingControl {
        fn subscribe(&self, keys: &[SubscriptionKey]) -> Result<(), FeedError> {
            self.calls.lock().push(ControlCall::Subscribe(keys.to_vec()));
            Ok(())
        }

        fn unsubscribe(&self, keys: &[SubscriptionKey]) -> Result<(), FeedError> {
            self.calls
                .lock()
                .push(ControlCall::Unsubscribe(keys.to_vec()));
            Ok(())
        }

        fn close(&self) {
            self.calls.lock().push(ControlCall::Close);
        }
    }

    impl ScriptedFeed {
        fn new(script: Vec<Script>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                ..Default::default()
            })
        }

        fn connects(&self) -> u32 {
            *self.connects.lock()
        }

        fn calls(&self) -> Vec<ControlCall> {
            self.calls.lock().clone()
        }

        async fn push(&self, message: PushMessage) {
            let sender = self.sessions.lock().last().cloned().unwrap();
            sender.send(message).await.unwrap();
        }
    }

    impl PushFeed for ScriptedFeed {
        fn connect(&self) -> BoxFuture<'_, mdrelay_core::FeedResult<PushSession>> {
            *self.connects.lock() += 1;
            let step = self
                .script
                .lock()
                .pop_front()
                .unwrap_or(Script::Fail(FeedError::TransportFailure("script ended".into())));
            Box::pin(async move {
                match step {
                    Script::Accept => {
                        let (tx, rx) = mpsc::channel(16);
                        self.sessions.lock().push(tx);
                        Ok(PushSession {
                            events: rx,
                            control: Box::new(RecordingControl {
                                calls: self.calls.clone(),
                            }),
                        })
                    }
                    Script::Fail(e) => Err(e),
                    Script::Hang => std::future::pending().await,
                }
            })
        }
    }

    fn key(raw: &str) -> SubscriptionKey {
        SubscriptionKey::new(raw).unwrap()
    }

    fn refused() -> Script {
        Script::Fail(FeedError::TransportFailure("connection refused".into()))
    }

    fn config(max_attempts: u32) -> ChannelConfig {
        ChannelConfig {
            base_delay_ms: 1000,
            max_delay_ms: 4000,
            jitter_ms: 0,
            max_attempts,
            ..Default::default()
        }
    }

    async fn next(rx: &mut mpsc::Receiver<ChannelNotice>) -> ChannelNotice {
        tokio::time::timeout(Duration::from_secs(3600), rx.recv())
            .await
            .expect("notice within an hour")
            .expect("notice channel open")
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_is_idempotent() {
        let feed = ScriptedFeed::new(vec![Script::Accept]);
        let (channel, mut rx) = SubscriptionChannel::new("test", feed.clone(), config(3));
        let k = key("BTCUSDT-1m");

        assert_eq!(channel.subscribe(&[k.clone()]), vec![k.clone()]);
        assert!(channel.subscribe(&[k.clone()]).is_empty());
        assert_eq!(next(&mut rx).await, ChannelNotice::Connected { reconnected: false });
        assert!(channel.subscribe(&[k.clone()]).is_empty());

        assert_eq!(feed.connects(), 1);
        assert_eq!(feed.calls(), vec![ControlCall::Subscribe(vec![k])]);
        assert_eq!(channel.state(), ChannelState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_while_connected_sends_only_new_keys() {
        let feed = ScriptedFeed::new(vec![Script::Accept]);
        let (channel, mut rx) = SubscriptionChannel::new("test", feed.clone(), config(3));
        let (a, b) = (key("BTCUSDT-1m"), key("ETHUSDT-1m"));

        channel.subscribe(&[a.clone()]);
        next(&mut rx).await;
        assert_eq!(channel.subscribe(&[a.clone(), b.clone()]), vec![b.clone()]);
        channel.unsubscribe(&[a.clone()]);

        assert_eq!(
            feed.calls(),
            vec![
                ControlCall::Subscribe(vec![a.clone()]),
                ControlCall::Subscribe(vec![b.clone()]),
                ControlCall::Unsubscribe(vec![a]),
            ]
        );
        assert_eq!(channel.active_keys(), vec![b]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_grows_caps_and_exhausts() {
        let feed = ScriptedFeed::new((0..6).map(|_| refused()).collect());
        let (channel, mut rx) = SubscriptionChannel::new("test", feed.clone(), config(6));
        channel.subscribe(&[key("BTCUSDT-1m")]);

        let mut delays = Vec::new();
        loop {
            match next(&mut rx).await {
                ChannelNotice::ReconnectScheduled { attempt, delay } => {
                    assert_eq!(attempt as usize, delays.len() + 1);
                    delays.push(delay.as_millis() as u64);
                }
                ChannelNotice::ConnectFailed { .. } => {}
                ChannelNotice::Exhausted { attempts } => {
                    assert_eq!(attempts, 6);
                    break;
                }
                other => panic!("unexpected notice {other:?}"),
            }
        }

        assert_eq!(delays, vec![1000, 2000, 4000, 4000, 4000]);
        assert_eq!(feed.connects(), 6);
        assert!(channel.is_exhausted());
        assert_eq!(channel.state(), ChannelState::Disconnected);

        // No further attempts without an explicit trigger.
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(feed.connects(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stability_window_resets_attempts() {
        let feed = ScriptedFeed::new(vec![refused(), refused(), Script::Accept]);
        let (channel, mut rx) = SubscriptionChannel::new("test", feed.clone(), config(5));
        channel.subscribe(&[key("BTCUSDT-1m")]);

        loop {
            if let ChannelNotice::Connected { reconnected } = next(&mut rx).await {
                assert!(!reconnected, "first successful session");
                break;
            }
        }
        assert_eq!(channel.attempt(), 2);

        assert_eq!(next(&mut rx).await, ChannelNotice::Stable);
        assert_eq!(channel.attempt(), 0);

        feed.push(PushMessage::Disconnected {
            reason: "server reset".into(),
        })
        .await;
        assert_eq!(
            next(&mut rx).await,
            ChannelNotice::Disconnected {
                reason: "server reset".into()
            }
        );
        assert_eq!(
            next(&mut rx).await,
            ChannelNotice::ReconnectScheduled {
                attempt: 1,
                delay: Duration::from_millis(1000)
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_all_cancels_pending_backoff() {
        let feed = ScriptedFeed::new(vec![refused(), Script::Accept]);
        let (channel, mut rx) = SubscriptionChannel::new("test", feed.clone(), config(5));
        let k = key("BTCUSDT-1m");
        channel.subscribe(&[k.clone()]);

        assert!(matches!(
            next(&mut rx).await,
            ChannelNotice::ConnectFailed { attempt: 1, .. }
        ));
        assert!(matches!(
            next(&mut rx).await,
            ChannelNotice::ReconnectScheduled { attempt: 1, .. }
        ));
        assert_eq!(channel.state(), ChannelState::Backoff);

        channel.unsubscribe(&[k]);
        assert_eq!(channel.state(), ChannelState::Disconnected);
        assert_eq!(channel.attempt(), 0);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(feed.connects(), 1, "abandoned backoff never fires");
        assert_eq!(channel.attempt(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_all_closes_live_session() {
        let feed = ScriptedFeed::new(vec![Script::Accept]);
        let (channel, mut rx) = SubscriptionChannel::new("test", feed.clone(), config(5));
        let k = key("BTCUSDT-1m");
        channel.subscribe(&[k.clone()]);
        next(&mut rx).await;

        channel.unsubscribe(&[k.clone()]);
        assert_eq!(channel.state(), ChannelState::Disconnected);
        assert_eq!(
            feed.calls(),
            vec![ControlCall::Subscribe(vec![k]), ControlCall::Close]
        );

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(feed.connects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_counts_as_failure() {
        let feed = ScriptedFeed::new(vec![Script::Hang]);
        let (channel, mut rx) = SubscriptionChannel::new("test", feed.clone(), config(5));
        channel.subscribe(&[key("BTCUSDT-1m")]);

        let started = tokio::time::Instant::now();
        match next(&mut rx).await {
            ChannelNotice::ConnectFailed { attempt, reason } => {
                assert_eq!(attempt, 1);
                assert!(reason.contains("timed out"), "{reason}");
            }
            other => panic!("unexpected notice {other:?}"),
        }
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_updates_forwarded_and_reconnect_resubscribes() {
        let feed = ScriptedFeed::new(vec![Script::Accept, Script::Accept]);
        let (channel, mut rx) = SubscriptionChannel::new("test", feed.clone(), config(5));
        let k = key("BTCUSDT-1m");
        channel.subscribe(&[k.clone()]);
        next(&mut rx).await;

        let event = UpdateEvent::new(k.clone(), json!({"close": 42000.5}), 1_700_000_000_000, 1);
        feed.push(PushMessage::Event(event.clone())).await;
        assert_eq!(next(&mut rx).await, ChannelNotice::Update(event));

        feed.push(PushMessage::Disconnected {
            reason: "reset".into(),
        })
        .await;
        assert!(matches!(next(&mut rx).await, ChannelNotice::Disconnected { .. }));
        assert!(matches!(
            next(&mut rx).await,
            ChannelNotice::ReconnectScheduled { .. }
        ));
        assert_eq!(next(&mut rx).await, ChannelNotice::Connected { reconnected: true });

        let subscribes = feed
            .calls()
            .into_iter()
            .filter(|c| matches!(c, ControlCall::Subscribe(_)))
            .count();
        assert_eq!(subscribes, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_after_exhaustion() {
        let feed = ScriptedFeed::new(vec![refused(), refused(), Script::Accept]);
        let (channel, mut rx) = SubscriptionChannel::new("test", feed.clone(), config(2));
        channel.subscribe(&[key("BTCUSDT-1m")]);

        loop {
            if let ChannelNotice::Exhausted { attempts } = next(&mut rx).await {
                assert_eq!(attempts, 2);
                break;
            }
        }
        assert!(channel.reconnect());
        assert_eq!(next(&mut rx).await, ChannelNotice::Connected { reconnected: false });
        assert_eq!(channel.attempt(), 0);
        assert!(!channel.is_exhausted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_supervisor() {
        let feed = ScriptedFeed::new(vec![refused(), Script::Accept]);
        let (channel, mut rx) = SubscriptionChannel::new("test", feed.clone(), config(5));
        channel.subscribe(&[key("BTCUSDT-1m")]);
        next(&mut rx).await;

        channel.shutdown();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(feed.connects(), 1);
        assert_eq!(channel.state(), ChannelState::Disconnected);
        assert!(!channel.reconnect());
    }
}
