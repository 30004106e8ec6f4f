use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum BackoffType {
    Fixed,
    Linear,
    Exponential,
}

/// Reconnect delay schedule.
///
/// Without jitter every schedule is monotonically non-decreasing, which the
/// stream controller relies on; jitter exists for callers that spread
/// simultaneous reconnects instead.
#[derive(Debug, Clone)]
pub struct BackoffStrategy {
    backoff_type: BackoffType,
    base_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter: bool,
    attempt: u32,
}

impl BackoffStrategy {
    pub fn new(backoff_type: BackoffType, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            backoff_type,
            base_delay,
            max_delay,
            multiplier: 2.0,
            jitter: false,
            attempt: 0,
        }
    }

    pub fn fixed(delay: Duration) -> Self {
        Self::new(BackoffType::Fixed, delay, delay)
    }

    pub fn linear(base_delay: Duration, max_delay: Duration) -> Self {
        Self::new(BackoffType::Linear, base_delay, max_delay)
    }

    pub fn exponential(base_delay: Duration, max_delay: Duration) -> Self {
        Self::new(BackoffType::Exponential, base_delay, max_delay)
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn next_delay(&mut self) -> Duration {
        self.attempt += 1;

        let delay = match self.backoff_type {
            BackoffType::Fixed => self.base_delay,
            BackoffType::Linear => self.base_delay * self.attempt,
            BackoffType::Exponential => {
                let multiplier = self.multiplier.powi(self.attempt.saturating_sub(1) as i32);
                Duration::from_millis((self.base_delay.as_millis() as f64 * multiplier) as u64)
            }
        };

        let delay = delay.min(self.max_delay);
        if self.jitter {
            self.apply_jitter(delay)
        } else {
            delay
        }
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        let mut rng = rand::rng();
        let factor = rng.random_range(0.5..=1.5);
        let millis = (delay.as_millis() as f64 * factor) as u64;
        Duration::from_millis(millis).min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_backoff() {
        let mut strategy = BackoffStrategy::fixed(Duration::from_secs(5));

        assert_eq!(strategy.next_delay(), Duration::from_secs(5));
        assert_eq!(strategy.next_delay(), Duration::from_secs(5));
        assert_eq!(strategy.next_delay(), Duration::from_secs(5));
    }

    #[test]
    fn test_linear_backoff() {
        let mut strategy =
            BackoffStrategy::linear(Duration::from_secs(1), Duration::from_secs(10));

        assert_eq!(strategy.next_delay(), Duration::from_secs(1));
        assert_eq!(strategy.next_delay(), Duration::from_secs(2));
        assert_eq!(strategy.next_delay(), Duration::from_secs(3));
    }

    #[test]
    fn test_exponential_backoff() {
        let mut strategy =
            BackoffStrategy::exponential(Duration::from_secs(1), Duration::from_secs(100));

        assert_eq!(strategy.next_delay(), Duration::from_secs(1));
        assert_eq!(strategy.next_delay(), Duration::from_secs(2));
        assert_eq!(strategy.next_delay(), Duration::from_secs(4));
        assert_eq!(strategy.next_delay(), Duration::from_secs(8));
    }

    #[test]
    fn test_max_delay_limit() {
        let mut strategy =
            BackoffStrategy::exponential(Duration::from_secs(1), Duration::from_secs(5));

        assert_eq!(strategy.next_delay(), Duration::from_secs(1));
        assert_eq!(strategy.next_delay(), Duration::from_secs(2));
        assert_eq!(strategy.next_delay(), Duration::from_secs(4));
        assert_eq!(strategy.next_delay(), Duration::from_secs(5));
        assert_eq!(strategy.next_delay(), Duration::from_secs(5));
    }

    #[test]
    fn test_monotonic_without_jitter() {
        for mut strategy in [
            BackoffStrategy::fixed(Duration::from_millis(500)),
            BackoffStrategy::linear(Duration::from_millis(500), Duration::from_secs(30)),
            BackoffStrategy::exponential(Duration::from_millis(500), Duration::from_secs(30)),
        ] {
            let mut previous = Duration::ZERO;
            for _ in 0..20 {
                let delay = strategy.next_delay();
                assert!(delay >= previous, "delay decreased: {:?} < {:?}", delay, previous);
                previous = delay;
            }
        }
    }

    #[test]
    fn test_backoff_reset() {
        let mut strategy =
            BackoffStrategy::exponential(Duration::from_secs(1), Duration::from_secs(100));

        assert_eq!(strategy.next_delay(), Duration::from_secs(1));
        assert_eq!(strategy.next_delay(), Duration::from_secs(2));
        assert_eq!(strategy.attempt(), 2);

        strategy.reset();
        assert_eq!(strategy.attempt(), 0);
        assert_eq!(strategy.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_stays_bounded() {
        let mut strategy =
            BackoffStrategy::fixed(Duration::from_secs(10)).with_jitter(true);

        let delay = strategy.next_delay();
        assert!(delay >= Duration::from_secs(5));
        assert!(delay <= Duration::from_secs(10));
    }

    #[test]
    fn test_custom_multiplier() {
        let mut strategy =
            BackoffStrategy::exponential(Duration::from_secs(1), Duration::from_secs(100))
                .with_multiplier(3.0);

        assert_eq!(strategy.next_delay(), Duration::from_secs(1));
        assert_eq!(strategy.next_delay(), Duration::from_secs(3));
        assert_eq!(strategy.next_delay(), Duration::from_secs(9));
    }
}
