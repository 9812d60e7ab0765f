//! Bounded exponential backoff.

use std::time::Duration;

/// `delay(n) = min(base * multiplier^n, max_delay)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Delay before the first retry.
    pub base: Duration,
    /// Growth factor per consecutive failure.
    pub multiplier: u32,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Backoff {
    /// Delay before retry number `attempt` (zero based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1).checked_pow(attempt).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff() -> Backoff {
        Backoff {
            base: Duration::from_secs(5),
            multiplier: 2,
            max_delay: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_backoff_starts_at_base() {
        assert_eq!(backoff().delay(0), Duration::from_secs(5));
        assert_eq!(backoff().delay(1), Duration::from_secs(10));
        assert_eq!(backoff().delay(3), Duration::from_secs(40));
    }

    #[test]
    fn test_backoff_is_monotonic_and_capped() {
        let policy = backoff();
        let delays: Vec<Duration> = (0..64).map(|n| policy.delay(n)).collect();

        assert!(delays.windows(2).all(|w| w[1] >= w[0]));
        assert!(delays.iter().all(|d| *d <= policy.max_delay));
        assert_eq!(delays[63], policy.max_delay);
    }

    #[test]
    fn test_multiplier_of_one_is_constant() {
        let policy = Backoff {
            multiplier: 1,
            ..backoff()
        };
        assert_eq!(policy.delay(9), policy.base);
    }
}
