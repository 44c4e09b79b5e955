//! Exponential backoff schedule for broker reconnection
//!
//! The schedule is 1s, 2s, 4s, ... capped, with a bounded number of attempts
//! before the caller gives up, and a small jitter stretch on every delay.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// First delay in milliseconds
    pub base_delay_ms: u64,
    /// Delay ceiling in milliseconds
    pub max_delay_ms: u64,
    /// Attempts before the connection is considered fatally lost
    pub max_attempts: u32,
    /// Maximum jitter as a fraction of the delay
    pub max_jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_attempts: 10,
            max_jitter: 0.1,
        }
    }
}

impl BackoffConfig {
    /// Delay before the given 1-based attempt, or None once attempts are
    /// exhausted
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let exp = attempt.saturating_sub(1).min(31);
        let raw = self
            .base_delay_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_delay_ms);
        Some(add_jitter(
            Duration::from_millis(raw),
            attempt,
            self.max_jitter,
        ))
    }
}

/// Stretch a delay by up to `max_jitter` so a fleet of agents restarting
/// together does not reconnect in lockstep. The spread comes from a
/// per-process salt mixed with the attempt number; no RNG state needed.
fn add_jitter(delay: Duration, attempt: u32, max_jitter: f64) -> Duration {
    let salt = u64::from(std::process::id());
    // splitmix64 finalizer over salt and attempt
    let mut mixed = salt ^ (u64::from(attempt) << 32);
    mixed = (mixed ^ (mixed >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    mixed = (mixed ^ (mixed >> 27)).wrapping_mul(0x94d049bb133111eb);
    mixed ^= mixed >> 31;

    let fraction = (mixed % 1_000) as f64 / 1_000.0;
    let delay_ms = delay.as_millis() as f64;
    Duration::from_millis((delay_ms * (1.0 + fraction * max_jitter)) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> BackoffConfig {
        BackoffConfig {
            max_jitter: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn schedule_doubles_and_caps() {
        let config = no_jitter();
        assert_eq!(config.delay_for_attempt(1), Some(Duration::from_secs(1)));
        assert_eq!(config.delay_for_attempt(2), Some(Duration::from_secs(2)));
        assert_eq!(config.delay_for_attempt(3), Some(Duration::from_secs(4)));
        assert_eq!(config.delay_for_attempt(7), Some(Duration::from_secs(30)));
        assert_eq!(config.delay_for_attempt(10), Some(Duration::from_secs(30)));
    }

    #[test]
    fn attempts_are_bounded() {
        let config = no_jitter();
        assert_eq!(config.delay_for_attempt(0), None);
        assert_eq!(config.delay_for_attempt(11), None);
    }

    #[test]
    fn jitter_stays_within_bound() {
        let delay = Duration::from_millis(1_000);
        for attempt in 1..=10 {
            let jittered = add_jitter(delay, attempt, 0.1);
            assert!(jittered >= delay);
            assert!(jittered <= Duration::from_millis(1_100));
        }
    }

    #[test]
    fn jitter_varies_across_attempts() {
        let delay = Duration::from_millis(10_000);
        let spread: std::collections::HashSet<u128> = (1..=10)
            .map(|attempt| add_jitter(delay, attempt, 0.5).as_millis())
            .collect();
        assert!(spread.len() > 1);
    }
}
