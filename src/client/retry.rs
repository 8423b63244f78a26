use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `attempt * base_delay`
    Linear,
    /// `base_delay * 2^(attempt - 1)`, capped at `max_delay`, then jittered
    /// uniformly into its upper half
    ExponentialJitter,
}

/// How a failed chunk transfer is retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per chunk, including the first
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            backoff: Backoff::Linear,
        }
    }
}

impl RetryPolicy {
    pub fn linear(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            backoff: Backoff::Linear,
            ..Self::default()
        }
    }

    pub fn exponential(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            backoff: Backoff::ExponentialJitter,
        }
    }

    /// Attempts allowed per chunk; never less than one.
    pub fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// Delay before the attempt following failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Linear => self.base_delay.saturating_mul(attempt),
            Backoff::ExponentialJitter => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                let capped = self.base_delay.saturating_mul(factor).min(self.max_delay);
                let half = capped / 2;
                let jitter_ms = (capped - half).as_millis() as u64;
                if jitter_ms == 0 {
                    return capped;
                }
                half + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
            }
        }
    }
}
