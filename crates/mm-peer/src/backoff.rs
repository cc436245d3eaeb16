//! Reconnect backoff (§4.6, §6 `[peer.reconnect]`): exponential delay with
//! jitter, applied between a dropped connection and the next dial attempt.
//! Grounded on the retry-tracking shape other mesh agents in the corpus use
//! (record a failure, compute the next delay, reset on success) generalized
//! here with jitter and a float multiplier per the configured reconnect
//! policy rather than a fixed integer factor.

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
    pub jitter: f64,
    pub max_retries: Option<u32>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.20,
            max_retries: None,
        }
    }
}

/// Tracks the attempt count for one peer's reconnect loop and computes the
/// next delay. `max_retries: None` means retry forever.
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Backoff { config, attempt: 0 }
    }

    /// `None` once `max_retries` attempts have been exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(max) = self.config.max_retries {
            if self.attempt >= max {
                return None;
            }
        }

        let base_secs = self.config.initial.as_secs_f64() * self.config.multiplier.powi(self.attempt as i32);
        let base_secs = base_secs.min(self.config.max.as_secs_f64());
        self.attempt += 1;

        let jitter_span = base_secs * self.config.jitter;
        let jittered = rand::thread_rng().gen_range((base_secs - jitter_span)..=(base_secs + jitter_span));
        Some(Duration::from_secs_f64(jittered.max(0.0)))
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_then_caps_at_max() {
        let config = BackoffConfig {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: 0.0,
            max_retries: None,
        };
        let mut backoff = Backoff::new(config);
        let first = backoff.next_delay().unwrap();
        let second = backoff.next_delay().unwrap();
        let third = backoff.next_delay().unwrap();
        assert!(first.as_millis() >= 99 && first.as_millis() <= 101);
        assert!(second > first);
        assert!(third >= second);
        for _ in 0..10 {
            assert!(backoff.next_delay().unwrap() <= Duration::from_secs(1));
        }
    }

    #[test]
    fn reset_restarts_from_initial() {
        let config = BackoffConfig {
            initial: Duration::from_millis(50),
            max: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: 0.0,
            max_retries: None,
        };
        let mut backoff = Backoff::new(config);
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        let after_reset = backoff.next_delay().unwrap();
        assert!(after_reset.as_millis() >= 49 && after_reset.as_millis() <= 51);
    }

    #[test]
    fn max_retries_eventually_exhausts() {
        let config = BackoffConfig {
            initial: Duration::from_millis(10),
            max: Duration::from_millis(100),
            multiplier: 2.0,
            jitter: 0.0,
            max_retries: Some(2),
        };
        let mut backoff = Backoff::new(config);
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_none());
    }
}
