use std::time::Duration;

use rand::Rng;

use crate::types::SyncConfig;

/// Exponential backoff with an upper bound and optional downward jitter.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_ratio: f64,
}

impl RetryPolicy {
    pub fn new(base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms,
            jitter_ratio: 0.0,
        }
    }

    /// Allow up to `ratio` of each delay to be removed at random. Clamped to `0.0..=1.0`.
    pub fn with_jitter(mut self, ratio: f64) -> Self {
        self.jitter_ratio = if ratio.is_finite() {
            ratio.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }

    pub fn base_delay_ms(&self) -> u64 {
        self.base_delay_ms
    }

    pub fn max_delay_ms(&self) -> u64 {
        self.max_delay_ms
    }

    pub fn jitter_ratio(&self) -> f64 {
        self.jitter_ratio
    }

    /// Un-jittered delay for the given zero-based attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let shift = attempt.min(20);
        let multiplier = 1_u64 << shift;
        let calculated = self.base_delay_ms.saturating_mul(multiplier);
        Duration::from_millis(calculated.min(self.max_delay_ms))
    }

    /// Apply jitter to a delay using the supplied random source.
    pub fn jittered<R: Rng + ?Sized>(&self, delay: Duration, rng: &mut R) -> Duration {
        if self.jitter_ratio <= 0.0 {
            return delay;
        }
        let millis = delay.as_millis() as u64;
        let sample: f64 = rng.r#gen();
        let shaved = (millis as f64 * self.jitter_ratio * sample) as u64;
        Duration::from_millis(millis.saturating_sub(shaved))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

impl From<&SyncConfig> for RetryPolicy {
    fn from(config: &SyncConfig) -> Self {
        Self::new(config.reconnect_base_delay_ms, config.reconnect_max_delay_ms)
            .with_jitter(config.reconnect_jitter_ratio)
    }
}

/// Reconnect bookkeeping for one push channel: consecutive failures and the next delay.
#[derive(Debug, Clone)]
pub struct ReconnectState {
    policy: RetryPolicy,
    attempt: u32,
}

impl ReconnectState {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Consecutive closes since the last successful open.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// A connection opened; the next failure starts from the base delay again.
    pub fn on_open(&mut self) {
        self.attempt = 0;
    }

    /// Record a close and return how long to wait before reconnecting.
    pub fn next_delay<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Duration {
        let delay = self.policy.delay_for_attempt(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        self.policy.jittered(delay, rng)
    }
}
