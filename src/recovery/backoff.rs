//! Backoff curves for recovery retries

use super::policy::BackoffKind;
use std::time::Duration;

/// Computes pre-attempt delays, capped at a maximum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffCalculator {
    base: Duration,
    max: Duration,
}

impl BackoffCalculator {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
        }
    }

    /// Curve value at zero-based `step`
    ///
    /// - exponential: `base * 2^step`
    /// - linear: `base * (step + 1)`
    /// - fixed: `base`
    /// - fibonacci: `base * fib(step + 1)`
    pub fn delay(&self, kind: BackoffKind, step: u32) -> Duration {
        let factor: u64 = match kind {
            BackoffKind::Exponential => 2u64.checked_pow(step).unwrap_or(u64::MAX),
            BackoffKind::Linear => u64::from(step) + 1,
            BackoffKind::Fixed => 1,
            BackoffKind::Fibonacci => fibonacci(step.saturating_add(1)),
        };
        let millis = (self.base.as_millis() as u64).saturating_mul(factor);
        Duration::from_millis(millis).min(self.max)
    }

    /// Delay associated with 1-based `attempt`: the curve at `attempt - 1`
    ///
    /// The retry loop sleeps this long before every attempt after the first.
    pub fn delay_for_attempt(&self, kind: BackoffKind, attempt: u32) -> Duration {
        self.delay(kind, attempt.saturating_sub(1))
    }
}

/// `fib(0) = 0`, `fib(1) = fib(2) = 1`, saturating
pub fn fibonacci(n: u32) -> u64 {
    let (mut previous, mut current) = (0u64, 1u64);
    if n == 0 {
        return 0;
    }
    for _ in 1..n {
        let next = previous.saturating_add(current);
        previous = current;
        current = next;
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calculator() -> BackoffCalculator {
        BackoffCalculator::new(Duration::from_millis(1000), Duration::from_secs(60))
    }

    fn millis(kind: BackoffKind) -> Vec<u128> {
        (1..=5)
            .map(|attempt| calculator().delay_for_attempt(kind, attempt).as_millis())
            .collect()
    }

    #[test]
    fn test_exponential_doubles() {
        assert_eq!(&millis(BackoffKind::Exponential)[..3], &[1000, 2000, 4000]);
    }

    #[test]
    fn test_curves() {
        assert_eq!(millis(BackoffKind::Linear), vec![1000, 2000, 3000, 4000, 5000]);
        assert_eq!(millis(BackoffKind::Fixed), vec![1000; 5]);
        assert_eq!(millis(BackoffKind::Fibonacci), vec![1000, 1000, 2000, 3000, 5000]);
    }

    #[test]
    fn test_delay_is_capped() {
        let capped = BackoffCalculator::new(Duration::from_millis(1000), Duration::from_millis(5000));
        assert_eq!(
            capped.delay_for_attempt(BackoffKind::Exponential, 10),
            Duration::from_millis(5000)
        );
        assert_eq!(
            capped.delay_for_attempt(BackoffKind::Exponential, 200),
            Duration::from_millis(5000)
        );
    }

    #[test]
    fn test_fibonacci_sequence() {
        let sequence: Vec<u64> = (0..8).map(fibonacci).collect();
        assert_eq!(sequence, vec![0, 1, 1, 2, 3, 5, 8, 13]);
        assert_eq!(fibonacci(200), u64::MAX);
    }
}
