//! Exponential backoff retry policy.

use std::time::Duration;

use crate::SchedulerError;

/// Pure, deterministic backoff policy for failed executions.
///
/// The delay before retry `r` (zero-based) is `min(initial · 2^r, max)`;
/// a retry is permitted while `r < max_retries`. All three parameters are
/// required inputs: retry timing is part of the scheduler's observable
/// contract, so nothing here is defaulted or guessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    initial_backoff_ms: u64,
    max_backoff_ms: u64,
    max_retries: Option<u32>,
}

impl RetryPolicy {
    /// Create a policy from an initial backoff, a backoff cap, and a retry
    /// ceiling (`None` = retry forever).
    pub fn new(
        initial_backoff_ms: u64,
        max_backoff_ms: u64,
        max_retries: Option<u32>,
    ) -> Result<Self, SchedulerError> {
        if initial_backoff_ms == 0 {
            return Err(SchedulerError::InvalidConfig(
                "initial backoff must be at least 1ms".to_string(),
            ));
        }
        if max_backoff_ms < initial_backoff_ms {
            return Err(SchedulerError::InvalidConfig(format!(
                "max backoff ({max_backoff_ms}ms) must not be below initial backoff ({initial_backoff_ms}ms)"
            )));
        }
        Ok(Self {
            initial_backoff_ms,
            max_backoff_ms,
            max_retries,
        })
    }

    /// Delay before retry `retry_count` (zero-based): `min(initial · 2^r, max)`.
    ///
    /// The doubling saturates, so a huge retry count still yields the cap.
    pub fn next_delay(&self, retry_count: u32) -> Duration {
        let factor = 1u64.checked_shl(retry_count).unwrap_or(u64::MAX);
        let delay_ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(delay_ms)
    }

    /// Whether another retry is permitted after `retry_count` failures.
    pub fn permits(&self, retry_count: u32) -> bool {
        match self.max_retries {
            Some(max) => retry_count < max,
            None => true,
        }
    }

    /// The configured retry ceiling, if bounded.
    pub fn max_retries(&self) -> Option<u32> {
        self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    fn policy(initial: u64, max: u64, retries: Option<u32>) -> RetryPolicy {
        RetryPolicy::new(initial, max, retries).unwrap()
    }

    // === Unit Tests ===

    #[test_case(0, 1_000 ; "first retry uses initial backoff")]
    #[test_case(1, 2_000 ; "second retry doubles")]
    #[test_case(2, 4_000 ; "third retry doubles again")]
    #[test_case(3, 8_000 ; "fourth retry")]
    #[test_case(4, 16_000 ; "fifth retry")]
    #[test_case(5, 30_000 ; "sixth retry hits the cap")]
    #[test_case(6, 30_000 ; "seventh retry stays capped")]
    fn test_next_delay_table(retry_count: u32, expected_ms: u64) {
        let policy = policy(1_000, 30_000, None);
        assert_eq!(
            policy.next_delay(retry_count),
            Duration::from_millis(expected_ms)
        );
    }

    #[test]
    fn test_permits_bounded() {
        let policy = policy(100, 1_000, Some(3));
        assert!(policy.permits(0));
        assert!(policy.permits(2));
        assert!(!policy.permits(3));
        assert!(!policy.permits(10));
    }

    #[test]
    fn test_permits_unbounded() {
        let policy = policy(100, 1_000, None);
        assert!(policy.permits(0));
        assert!(policy.permits(u32::MAX));
    }

    #[test]
    fn test_huge_retry_count_saturates_to_cap() {
        let policy = policy(1_000, 30_000, None);
        assert_eq!(policy.next_delay(63), Duration::from_millis(30_000));
        assert_eq!(policy.next_delay(64), Duration::from_millis(30_000));
        assert_eq!(policy.next_delay(u32::MAX), Duration::from_millis(30_000));
    }

    #[test]
    fn test_zero_initial_backoff_rejected() {
        assert!(matches!(
            RetryPolicy::new(0, 1_000, None),
            Err(SchedulerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_cap_below_initial_rejected() {
        assert!(matches!(
            RetryPolicy::new(5_000, 1_000, None),
            Err(SchedulerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_cap_equal_to_initial_allowed() {
        let policy = policy(5_000, 5_000, None);
        assert_eq!(policy.next_delay(0), Duration::from_millis(5_000));
        assert_eq!(policy.next_delay(10), Duration::from_millis(5_000));
    }

    // === Property-Based Tests ===

    proptest! {
        // Delay is always within [initial, max]
        #[test]
        fn delay_is_bounded(
            initial in 1u64..10_000,
            extra in 0u64..1_000_000,
            retry_count in 0u32..200,
        ) {
            let max = initial + extra;
            let policy = policy(initial, max, None);
            let delay_ms = policy.next_delay(retry_count).as_millis() as u64;

            prop_assert!(delay_ms >= initial);
            prop_assert!(delay_ms <= max);
        }

        // Delay is monotone non-decreasing in the retry count
        #[test]
        fn delay_non_decreasing(
            initial in 1u64..10_000,
            extra in 0u64..1_000_000,
            r_a in 0u32..100,
            r_b in 0u32..100,
        ) {
            let policy = policy(initial, initial + extra, None);
            if r_a <= r_b {
                prop_assert!(policy.next_delay(r_a) <= policy.next_delay(r_b));
            }
        }

        // Below the cap the delay doubles exactly
        #[test]
        fn delay_doubles_below_cap(
            initial in 1u64..1_000,
            retry_count in 0u32..20,
        ) {
            let policy = policy(initial, u64::MAX, None);
            let current = policy.next_delay(retry_count).as_millis() as u64;
            let next = policy.next_delay(retry_count + 1).as_millis() as u64;

            prop_assert_eq!(next, current * 2);
        }

        // Exactly max_retries attempts are permitted
        #[test]
        fn permits_exactly_max_retries(max in 0u32..100) {
            let policy = policy(100, 1_000, Some(max));
            let permitted = (0..200u32).filter(|r| policy.permits(*r)).count();
            prop_assert_eq!(permitted as u32, max);
        }
    }
}
