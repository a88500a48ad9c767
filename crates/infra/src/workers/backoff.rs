//! Cooldown policy after consecutive store failures.

use std::time::Duration;

use rand::Rng;

/// Bounded exponential backoff with downward jitter.
///
/// The n-th consecutive failure waits `min(max, base * 2^(n-1))`, reduced by
/// a random share of up to `jitter` of that value.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
    /// Jitter factor (0.0-1.0).
    pub jitter: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(30),
            jitter: 0.2,
        }
    }
}

impl Backoff {
    /// Same delay after every failure, no jitter.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            base: delay,
            max: delay,
            jitter: 0.0,
        }
    }

    pub fn exponential(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            ..Self::default()
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Upper bound of the delay after `failures` consecutive failures.
    pub fn ceiling(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let exp = failures.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exp)
            .map_or(self.max, |delay| delay.min(self.max))
    }

    /// Delay to sleep after `failures` consecutive failures (1-indexed).
    pub fn delay_for(&self, failures: u32) -> Duration {
        let ceiling = self.ceiling(failures);
        if self.jitter <= 0.0 || ceiling.is_zero() {
            return ceiling;
        }
        let cut: f64 = rand::rng().random::<f64>() * self.jitter.min(1.0);
        ceiling.mul_f64(1.0 - cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceiling_doubles_then_caps() {
        let backoff = Backoff::exponential(Duration::from_millis(100), Duration::from_millis(1000));

        assert_eq!(backoff.ceiling(0), Duration::ZERO);
        assert_eq!(backoff.ceiling(1), Duration::from_millis(100));
        assert_eq!(backoff.ceiling(2), Duration::from_millis(200));
        assert_eq!(backoff.ceiling(4), Duration::from_millis(800));
        assert_eq!(backoff.ceiling(5), Duration::from_millis(1000));
        assert_eq!(backoff.ceiling(u32::MAX), Duration::from_millis(1000));
    }

    #[test]
    fn jitter_only_shortens_the_delay() {
        let backoff = Backoff::default();
        for failures in 1..10 {
            let ceiling = backoff.ceiling(failures);
            let delay = backoff.delay_for(failures);
            assert!(delay <= ceiling, "{delay:?} > {ceiling:?}");
            assert!(delay >= ceiling.mul_f64(0.8), "{delay:?} too short");
        }
    }

    #[test]
    fn fixed_is_constant() {
        let backoff = Backoff::fixed(Duration::from_secs(1));
        for failures in [1, 2, 10, 100] {
            assert_eq!(backoff.delay_for(failures), Duration::from_secs(1));
        }
    }

    #[test]
    fn cap_below_base_is_raised_to_base() {
        let backoff = Backoff::exponential(Duration::from_secs(2), Duration::from_secs(1));
        assert_eq!(backoff.ceiling(3), Duration::from_secs(2));
    }
}
