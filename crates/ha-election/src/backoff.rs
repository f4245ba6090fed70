//! Exponential backoff with jitter for store connectivity errors

use std::time::Duration;

use ha_config::BackoffSettings;
use rand::Rng;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
    /// Spread each delay uniformly over `[delay / 2, delay]`
    pub jitter: bool,
    /// Outage length after which failures are reported as errors
    pub max_retry_window: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::from(&BackoffSettings::default())
    }
}

impl From<&BackoffSettings> for BackoffConfig {
    fn from(settings: &BackoffSettings) -> Self {
        Self {
            initial: Duration::from_millis(settings.initial_ms),
            max: Duration::from_millis(settings.max_ms),
            multiplier: settings.multiplier,
            jitter: settings.jitter,
            max_retry_window: Duration::from_millis(settings.max_retry_window_ms),
        }
    }
}

/// Delay sequence for one outage; `reset` once the store answers again
#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
    outage_started: Option<Instant>,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            attempt: 0,
            outage_started: None,
        }
    }

    /// Delay before the next retry
    pub fn next_delay(&mut self) -> Duration {
        self.outage_started.get_or_insert_with(Instant::now);

        let base = self.base_delay(self.attempt);
        self.attempt = self.attempt.saturating_add(1);

        if self.config.jitter {
            jittered(base)
        } else {
            base
        }
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
        self.outage_started = None;
    }

    /// Failed attempts in the current outage
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn outage_duration(&self) -> Duration {
        self.outage_started
            .map(|started| started.elapsed())
            .unwrap_or_default()
    }

    pub fn window_exceeded(&self) -> bool {
        self.outage_duration() >= self.config.max_retry_window
    }

    fn base_delay(&self, attempt: u32) -> Duration {
        let initial = self.config.initial.as_millis() as f64;
        let max = self.config.max.as_millis() as f64;
        let exponent = attempt.min(63) as i32;
        let millis = (initial * self.config.multiplier.powi(exponent)).min(max);
        Duration::from_millis(millis as u64)
    }
}

fn jittered(base: Duration) -> Duration {
    let millis = base.as_millis() as u64;
    if millis < 2 {
        return base;
    }
    Duration::from_millis(rand::rng().random_range(millis / 2..=millis))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(jitter: bool) -> BackoffConfig {
        BackoffConfig {
            initial: Duration::from_millis(100),
            max: Duration::from_millis(1000),
            multiplier: 2.0,
            jitter,
            max_retry_window: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_delays_grow_and_cap() {
        let mut backoff = Backoff::new(config(false));
        let delays: Vec<u64> = (0..6).map(|_| backoff.next_delay().as_millis() as u64).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000, 1000]);
        assert_eq!(backoff.attempts(), 6);
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let mut backoff = Backoff::new(config(true));
        for expected in [100u64, 200, 400, 800, 1000, 1000, 1000] {
            let delay = backoff.next_delay().as_millis() as u64;
            assert!(delay >= expected / 2 && delay <= expected, "{delay} outside [{}, {expected}]", expected / 2);
        }
    }

    #[test]
    fn test_reset_starts_over() {
        let mut backoff = Backoff::new(config(false));
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_window() {
        let mut backoff = Backoff::new(config(false));
        assert!(!backoff.window_exceeded());

        backoff.next_delay();
        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(!backoff.window_exceeded());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(backoff.window_exceeded());

        backoff.reset();
        assert!(!backoff.window_exceeded());
    }
}
