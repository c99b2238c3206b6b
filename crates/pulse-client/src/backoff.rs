//! Bounded exponential backoff for reconnect attempts.

use std::time::Duration;

use tracing::debug;

/// Reconnect timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay after the first failed or closed attempt.
    pub base_delay: Duration,
    /// Ceiling the delay never exceeds.
    pub max_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Delay doubles on every consecutive failure up to the ceiling and returns to
/// the base delay after a successful open.
#[derive(Debug)]
pub struct Backoff {
    config: ReconnectConfig,
    attempt: u32,
    current: Duration,
}

impl Backoff {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempt: 0,
            current: config.base_delay,
        }
    }

    /// Consecutive failures since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay to wait before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt += 1;
        let delay = self.current.min(self.config.max_delay);
        self.current = self.current.saturating_mul(2).min(self.config.max_delay);
        delay
    }

    /// Connection opened; start over from the base delay.
    pub fn reset(&mut self) {
        if self.attempt > 0 {
            debug!(attempts = self.attempt, "Connection established, resetting backoff");
        }
        self.attempt = 0;
        self.current = self.config.base_delay;
    }
}
