//! Heartbeat monitoring for push sessions.
//!
//! Tracks message activity and ping/pong timing for one session. Owned by
//! the session task, so no interior locking.

use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Heartbeat monitor for a single session.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    /// Idle time after which a ping is sent.
    interval: Duration,
    /// How long to wait for the pong.
    timeout: Duration,
    last_ping: Option<Instant>,
    last_message: Instant,
    waiting_for_pong: bool,
}

impl HeartbeatMonitor {
    pub fn new(interval_ms: u64, timeout_ms: u64) -> Self {
        Self {
            interval: Duration::from_millis(interval_ms),
            timeout: Duration::from_millis(timeout_ms),
            last_ping: None,
            last_message: Instant::now(),
            waiting_for_pong: false,
        }
    }

    /// Reset state (called when a session opens).
    pub fn reset(&mut self) {
        self.last_ping = None;
        self.last_message = Instant::now();
        self.waiting_for_pong = false;
    }

    pub fn record_ping(&mut self) {
        self.last_ping = Some(Instant::now());
        self.waiting_for_pong = true;
    }

    pub fn record_pong(&mut self) {
        self.waiting_for_pong = false;
        if let Some(ping) = self.last_ping {
            debug!(rtt_ms = ping.elapsed().as_millis() as u64, "Received pong");
        }
    }

    /// Any inbound message counts as activity.
    pub fn record_message(&mut self) {
        self.last_message = Instant::now();
    }

    pub fn is_waiting_for_pong(&self) -> bool {
        self.waiting_for_pong
    }

    /// True once a ping has gone unanswered for longer than the timeout.
    pub fn is_timed_out(&self) -> bool {
        match (self.waiting_for_pong, self.last_ping) {
            (true, Some(ping)) => ping.elapsed() > self.timeout,
            _ => false,
        }
    }

    /// Ping only when idle for the full interval and no ping is outstanding.
    pub fn should_send_ping(&self) -> bool {
        !self.waiting_for_pong && self.last_message.elapsed() >= self.interval
    }

    /// Time between checks.
    pub fn check_period(&self) -> Duration {
        (self.interval / 2).min(self.timeout).max(Duration::from_millis(1))
    }
}
