//! Reconnect backoff policy.

use rand::Rng;
use std::time::Duration;

/// Exponential backoff with symmetric jitter and an attempt budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max_delay: Duration,
    /// Jitter amplitude; samples fall in `[-jitter, +jitter]`.
    pub jitter: Duration,
    /// Consecutive failed cycles before the channel gives up.
    pub max_attempts: u32,
    /// Connected time after which the attempt counter resets.
    pub stability_window: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1000),
            max_delay: Duration::from_millis(60_000),
            jitter: Duration::from_millis(500),
            max_attempts: 10,
            stability_window: Duration::from_millis(30_000),
        }
    }
}

impl BackoffPolicy {
    /// `min(base * 2^n, max_delay)` without jitter.
    pub fn base_delay(&self, n: u32) -> Duration {
        // 2^20 * base already exceeds any sane cap.
        let factor = 1u32 << n.min(20);
        self.base.saturating_mul(factor).min(self.max_delay)
    }

    /// Delay before retry `n` (0-based), jittered and clamped at zero.
    pub fn delay(&self, n: u32) -> Duration {
        let base = self.base_delay(n);
        let jitter_ms = self.jitter.as_millis() as i64;
        if jitter_ms == 0 {
            return base;
        }

        let offset = rand_jitter(jitter_ms);
        let delay_ms = (base.as_millis() as i64 + offset).max(0);
        Duration::from_millis(delay_ms as u64)
    }

    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

/// Random offset in `[-amplitude, +amplitude]` ms.
fn rand_jitter(amplitude: i64) -> i64 {
    rand::thread_rng().gen_range(-amplitude..=amplitude)
}
