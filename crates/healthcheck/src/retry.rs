//! Retry budget for probes.
//!
//! A probe is a bounded sequence of attempts. Intermediate failures are only
//! recorded; the caller sees a single [`ProbeOutcome`] once the probe either
//! succeeded or exhausted its budget.

use crate::checkers::HealthChecker;
use crate::types::{ProbeOutcome, ProbeTarget, RetryPolicy};
use tokio::time::sleep;
use tracing::debug;

/// Probe `target` with up to `policy.attempts` attempts.
///
/// Stops at the first healthy attempt and sleeps `policy.delay` between
/// failed attempts. A zero attempt budget is treated as one attempt.
pub async fn check_with_retry(
    checker: &dyn HealthChecker,
    target: &ProbeTarget,
    policy: &RetryPolicy,
) -> ProbeOutcome {
    let budget = policy.attempts.max(1);
    let mut attempts = Vec::with_capacity(budget as usize);

    for attempt in 1..=budget {
        let result = checker.check(target).await;
        let healthy = result.is_healthy();

        debug!(
            service = %target.name,
            attempt,
            budget,
            status = %result.status,
            "Probe attempt finished"
        );

        attempts.push(result);

        if healthy {
            break;
        }
        if attempt < budget {
            sleep(policy.delay).await;
        }
    }

    ProbeOutcome { attempts }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HealthCheckResult;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Fails the first `failures` attempts, then succeeds.
    struct Scripted {
        failures: u32,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl HealthChecker for Scripted {
        async fn check(&self, _target: &ProbeTarget) -> HealthCheckResult {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                HealthCheckResult::unhealthy(Duration::from_millis(1), "scripted failure")
            } else {
                HealthCheckResult::healthy(Duration::from_millis(1))
            }
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn target() -> ProbeTarget {
        ProbeTarget::new("svc", "http://127.0.0.1:1/health")
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_attempt() {
        let checker = Scripted::new(0);
        let outcome = check_with_retry(&checker, &target(), &RetryPolicy::default()).await;

        assert!(outcome.is_healthy());
        assert_eq!(outcome.attempt_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_one_failure() {
        let checker = Scripted::new(1);
        let outcome = check_with_retry(&checker, &target(), &RetryPolicy::default()).await;

        assert!(outcome.is_healthy());
        assert_eq!(outcome.attempt_count(), 2);
        assert!(!outcome.attempts[0].is_healthy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_budget() {
        let checker = Scripted::new(u32::MAX);
        let outcome = check_with_retry(&checker, &target(), &RetryPolicy::default()).await;

        assert!(!outcome.is_healthy());
        assert_eq!(outcome.attempt_count(), 3);
        assert_eq!(checker.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_only_between_attempts() {
        let checker = Scripted::new(u32::MAX);
        let policy = RetryPolicy {
            attempts: 3,
            delay: Duration::from_secs(1),
        };

        let start = tokio::time::Instant::now();
        check_with_retry(&checker, &target(), &policy).await;

        // Two gaps between three attempts, no trailing sleep
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_budget_makes_one_attempt() {
        let checker = Scripted::new(u32::MAX);
        let policy = RetryPolicy {
            attempts: 0,
            delay: Duration::from_secs(1),
        };

        let outcome = check_with_retry(&checker, &target(), &policy).await;
        assert_eq!(outcome.attempt_count(), 1);
    }

    #[tokio::test]
    async fn test_targets_are_passed_through() {
        struct Recording(Mutex<Vec<String>>);

        #[async_trait]
        impl HealthChecker for Recording {
            async fn check(&self, target: &ProbeTarget) -> HealthCheckResult {
                self.0.lock().unwrap().push(target.url.clone());
                HealthCheckResult::healthy(Duration::ZERO)
            }

            fn name(&self) -> &str {
                "recording"
            }
        }

        let checker = Recording(Mutex::new(Vec::new()));
        check_with_retry(&checker, &target(), &RetryPolicy::default()).await;

        assert_eq!(
            *checker.0.lock().unwrap(),
            vec!["http://127.0.0.1:1/health".to_string()]
        );
    }
}
