//! Backend-side retry policy applied when a job fails.

use std::collections::HashMap;
use std::time::Duration;

use crate::jobs::HandlerError;
use crate::queue::FailOutcome;

/// Retry settings for one queue
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub backoff_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_secs(3600),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry that follows `attempts_made` failed attempts.
    pub fn delay_for(&self, attempts_made: u32) -> Duration {
        let exponent = attempts_made.saturating_sub(1).min(64) as i32;
        let secs = self.backoff_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_backoff.as_secs_f64() {
            return self.max_backoff;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Retry or dead-letter a job that failed with `error` after
    /// `previous_attempts` earlier attempts.
    pub fn decide(&self, previous_attempts: u32, error: &HandlerError) -> FailOutcome {
        let attempts_made = previous_attempts.saturating_add(1);
        if !error.is_retryable() || attempts_made >= self.max_attempts {
            FailOutcome::DeadLettered { attempts_made }
        } else {
            FailOutcome::Retrying {
                attempts_made,
                delay: self.delay_for(attempts_made),
            }
        }
    }
}

/// Policies per queue name with a fallback for unlisted queues
#[derive(Debug, Clone, Default)]
pub struct RetryPolicies {
    default: RetryPolicy,
    per_queue: HashMap<String, RetryPolicy>,
}

impl RetryPolicies {
    pub fn new(default: RetryPolicy, per_queue: HashMap<String, RetryPolicy>) -> Self {
        Self { default, per_queue }
    }

    pub fn for_queue(&self, queue: &str) -> &RetryPolicy {
        self.per_queue.get(queue).unwrap_or(&self.default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            backoff_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_delay_grows_exponentially_and_caps() {
        let policy = policy();
        assert_eq!(policy.delay_for(1), Duration::from_secs(10));
        assert_eq!(policy.delay_for(2), Duration::from_secs(20));
        assert_eq!(policy.delay_for(3), Duration::from_secs(40));
        assert_eq!(policy.delay_for(4), Duration::from_secs(60));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn test_decide_retries_until_max_attempts() {
        let policy = policy();
        let err = HandlerError::retryable("boom");

        assert_eq!(
            policy.decide(0, &err),
            FailOutcome::Retrying {
                attempts_made: 1,
                delay: Duration::from_secs(10)
            }
        );
        assert_eq!(
            policy.decide(2, &err),
            FailOutcome::Retrying {
                attempts_made: 3,
                delay: Duration::from_secs(40)
            }
        );
        assert_eq!(policy.decide(3, &err), FailOutcome::DeadLettered { attempts_made: 4 });
    }

    #[test]
    fn test_fatal_error_dead_letters_immediately() {
        let outcome = policy().decide(0, &HandlerError::fatal("bad payload"));
        assert_eq!(outcome, FailOutcome::DeadLettered { attempts_made: 1 });
    }

    #[test]
    fn test_policies_fall_back_to_default() {
        let mut per_queue = HashMap::new();
        per_queue.insert("webhook-relay".to_string(), policy());
        let policies = RetryPolicies::new(RetryPolicy::default(), per_queue);

        assert_eq!(policies.for_queue("webhook-relay").max_attempts, 4);
        assert_eq!(policies.for_queue("other"), &RetryPolicy::default());
    }

    proptest! {
        #[test]
        fn prop_delay_is_monotonic_and_bounded(
            base in 1u64..120,
            multiplier in 1.0f64..4.0,
            cap in 1u64..7200,
            attempts in 1u32..40,
        ) {
            let policy = RetryPolicy {
                max_attempts: 100,
                backoff_delay: Duration::from_secs(base),
                backoff_multiplier: multiplier,
                max_backoff: Duration::from_secs(cap),
            };
            let current = policy.delay_for(attempts);
            let next = policy.delay_for(attempts + 1);
            prop_assert!(current <= policy.max_backoff);
            prop_assert!(next >= current);
        }
    }
}
