//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// Delay before retry `n` (0-based) is `base * 2^n` plus a random jitter of
/// up to `jitter_ratio` of that, capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_ratio: f64,
}

impl BackoffPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, jitter_ratio: f64) -> Self {
        Self {
            base_delay,
            max_delay,
            jitter_ratio: jitter_ratio.clamp(0.0, 1.0),
        }
    }

    /// Randomized delay before retry `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let unit: f64 = rand::rng().random();
        self.delay_with(attempt, unit)
    }

    /// Delay before retry `attempt` with the jitter fraction fixed at `unit`
    /// (clamped to `[0, 1]`).
    pub fn delay_with(&self, attempt: u32, unit: f64) -> Duration {
        let exponential = self.exponential(attempt);
        if exponential >= self.max_delay {
            return self.max_delay;
        }
        let jitter = exponential.mul_f64(self.jitter_ratio * unit.clamp(0.0, 1.0));
        exponential.saturating_add(jitter).min(self.max_delay)
    }

    /// Largest delay `delay_for(attempt)` can return.
    pub fn ceiling(&self, attempt: u32) -> Duration {
        self.delay_with(attempt, 1.0)
    }

    fn exponential(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy::new(Duration::from_millis(2000), Duration::from_millis(30_000), 0.5)
    }

    #[test]
    fn test_exponential_growth_without_jitter() {
        let p = policy();
        assert_eq!(p.delay_with(0, 0.0), Duration::from_millis(2000));
        assert_eq!(p.delay_with(1, 0.0), Duration::from_millis(4000));
        assert_eq!(p.delay_with(2, 0.0), Duration::from_millis(8000));
    }

    #[test]
    fn test_jitter_and_cap() {
        let p = policy();
        assert_eq!(p.delay_with(1, 1.0), Duration::from_millis(6000));
        assert_eq!(p.delay_with(4, 0.0), Duration::from_millis(30_000));
        assert_eq!(p.delay_with(40, 1.0), Duration::from_millis(30_000));
    }

    #[test]
    fn test_ratio_is_clamped() {
        let p = BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(10), 7.0);
        assert_eq!(p.jitter_ratio, 1.0);
        assert_eq!(p.ceiling(0), Duration::from_millis(200));
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn prop_delay_within_bounds(
            base_ms in 1u64..5_000,
            max_ms in 1u64..120_000,
            ratio in 0.0f64..=1.0,
            attempt in 0u32..12,
        ) {
            let p = BackoffPolicy::new(
                Duration::from_millis(base_ms),
                Duration::from_millis(max_ms),
                ratio,
            );
            let floor = p.delay_with(attempt, 0.0);
            let delay = p.delay_for(attempt);
            prop_assert!(delay >= floor);
            prop_assert!(delay <= p.ceiling(attempt));
            prop_assert!(delay <= Duration::from_millis(max_ms));
        }

        #[test]
        fn prop_floor_is_monotonic(base_ms in 1u64..5_000, attempt in 0u32..20) {
            let p = BackoffPolicy::new(
                Duration::from_millis(base_ms),
                Duration::from_secs(3600),
                0.5,
            );
            prop_assert!(p.delay_with(attempt + 1, 0.0) >= p.delay_with(attempt, 0.0));
        }
    }
}
