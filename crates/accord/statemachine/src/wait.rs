//! Delay between retries of a failed dispatch.

use std::time::Duration;

/// How long to wait before the `attempt`-th retry.
///
/// `attempt` is the entity's `state_count`; zero means first try and never
/// waits.
pub trait WaitStrategy: Send + Sync {
    fn retry_delay(&self, attempt: u32) -> Duration;
}

/// `min(base * 2^(attempt - 1), max)`
#[derive(Debug, Clone, Copy)]
pub struct ExponentialWaitStrategy {
    base: Duration,
    max: Duration,
}

impl ExponentialWaitStrategy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }
}

impl WaitStrategy for ExponentialWaitStrategy {
    fn retry_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        2u32.checked_pow(attempt - 1)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

/// Same delay for every retry.
#[derive(Debug, Clone, Copy)]
pub struct FixedWaitStrategy(pub Duration);

impl WaitStrategy for FixedWaitStrategy {
    fn retry_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            Duration::ZERO
        } else {
            self.0
        }
    }
}

/// Retry on the next tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoWaitStrategy;

impl WaitStrategy for NoWaitStrategy {
    fn retry_delay(&self, _attempt: u32) -> Duration {
        Duration::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_doubles_up_to_max() {
        let strategy =
            ExponentialWaitStrategy::new(Duration::from_millis(100), Duration::from_millis(1000));
        assert_eq!(strategy.retry_delay(0), Duration::ZERO);
        assert_eq!(strategy.retry_delay(1), Duration::from_millis(100));
        assert_eq!(strategy.retry_delay(2), Duration::from_millis(200));
        assert_eq!(strategy.retry_delay(4), Duration::from_millis(800));
        assert_eq!(strategy.retry_delay(5), Duration::from_millis(1000));
        assert_eq!(strategy.retry_delay(64), Duration::from_millis(1000));
    }

    #[test]
    fn fixed_and_none() {
        assert_eq!(FixedWaitStrategy(Duration::from_secs(2)).retry_delay(3), Duration::from_secs(2));
        assert_eq!(NoWaitStrategy.retry_delay(3), Duration::ZERO);
    }
}
