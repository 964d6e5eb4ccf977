//! Exponential backoff state.

use crate::config::BackoffConfig;
use std::time::Duration;

/// Backoff state of one coordinator.
///
/// Process-local and never persisted. `on_failure` hands out the delay to
/// wait before the next attempt and then grows it; `reset` returns to the
/// initial delay. There is no jitter.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    current: Duration,
}

impl Backoff {
    /// Creates a backoff at its initial delay.
    pub fn new(config: BackoffConfig) -> Self {
        let current = config.initial_delay.min(config.max_delay);
        Self { config, current }
    }

    /// The delay the next failure will schedule.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Records a failed attempt and returns the delay to schedule.
    pub fn on_failure(&mut self) -> Duration {
        let delay = self.current;
        let grown = self.current.mul_f64(self.config.multiplier.max(1.0));
        self.current = grown.min(self.config.max_delay);
        delay
    }

    /// Returns to the initial delay.
    pub fn reset(&mut self) {
        self.current = self.config.initial_delay.min(self.config.max_delay);
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn doubles_from_one_second() {
        let mut backoff = Backoff::default();
        assert_eq!(backoff.on_failure(), ms(1_000));
        assert_eq!(backoff.on_failure(), ms(2_000));
        assert_eq!(backoff.on_failure(), ms(4_000));
        assert_eq!(backoff.current(), ms(8_000));
    }

    #[test]
    fn reset_returns_to_initial() {
        let mut backoff = Backoff::default();
        for _ in 0..3 {
            backoff.on_failure();
        }
        backoff.reset();
        assert_eq!(backoff.on_failure(), ms(1_000));
    }

    #[test]
    fn never_exceeds_cap() {
        let mut backoff = Backoff::default();
        let delays: Vec<Duration> = (0..40).map(|_| backoff.on_failure()).collect();
        assert!(delays.iter().all(|d| *d <= ms(60_000)));
        assert_eq!(delays[6], ms(60_000));
        assert_eq!(*delays.last().unwrap(), ms(60_000));
    }

    #[test]
    fn initial_above_cap_is_clamped() {
        let config = BackoffConfig::default()
            .with_initial_delay(ms(90_000))
            .with_max_delay(ms(5_000));
        let mut backoff = Backoff::new(config);
        assert_eq!(backoff.on_failure(), ms(5_000));
    }
}
