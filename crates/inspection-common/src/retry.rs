//! Bounded exponential backoff for cloud calls.
//!
//! Every cloud call goes through [`retry_with_backoff`]. Transient failures
//! ([`InspectionError::is_retryable`]) are retried with exponential backoff
//! and jitter up to [`RetryPolicy::max_attempts`]; everything else returns
//! immediately. The worst-case time a policy can spend sleeping is exposed
//! through [`RetryPolicy::worst_case_budget`] so configuration can check it
//! against the invoking system's timeout.
//!
//! # Example
//!
//! ```ignore
//! let routes = retry_with_backoff(&policy, "DescribeRouteTables", || async {
//!     cloud.describe_routes("rtb-1").await.map_err(InspectionError::from)
//! })
//! .await?;
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

use crate::error::{InspectionError, InspectionResult};

/// Upper bound of the jitter factor applied to each delay.
const JITTER_MAX: f64 = 1.5;

/// Lower bound of the jitter factor applied to each delay.
const JITTER_MIN: f64 = 0.5;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Always >= 1.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Ceiling for any single delay.
    pub max_delay: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
    /// Randomise each delay between 0.5x and 1.5x.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(4),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that retries `max_attempts` times without sleeping.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            jitter: false,
        }
    }

    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self::immediate(1)
    }

    /// Un-jittered delay before attempt `attempt + 1` (1-based `attempt`).
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// Longest total time the policy can spend sleeping between attempts.
    pub fn worst_case_budget(&self) -> Duration {
        let factor = if self.jitter { JITTER_MAX } else { 1.0 };
        (1..self.max_attempts)
            .map(|attempt| self.base_delay(attempt).mul_f64(factor))
            .sum()
    }

    fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if !self.jitter || base.is_zero() {
            return base;
        }
        let factor = rand::thread_rng().gen_range(JITTER_MIN..JITTER_MAX);
        base.mul_f64(factor)
    }
}

/// Runs `operation` until it succeeds, fails permanently, or the policy's
/// attempts are exhausted.
///
/// Exhausting the budget on a transient failure yields
/// [`InspectionError::Retryable`] carrying the attempt count.
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    operation_name: &str,
    operation: F,
) -> InspectionResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = InspectionResult<T>>,
{
    retry_with_backoff_if(policy, operation_name, InspectionError::is_retryable, operation).await
}

/// Like [`retry_with_backoff`] but with a caller-supplied notion of which
/// errors are worth retrying.
///
/// Errors that match `should_retry` but are not themselves transient (for
/// example a firewall endpoint that has not appeared yet) keep their kind when
/// the budget runs out.
pub async fn retry_with_backoff_if<F, Fut, T, P>(
    policy: &RetryPolicy,
    operation_name: &str,
    should_retry: P,
    mut operation: F,
) -> InspectionResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = InspectionResult<T>>,
    P: Fn(&InspectionError) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !should_retry(&err) {
            return Err(err);
        }

        if attempt >= max_attempts {
            error!(
                operation = %operation_name,
                attempt,
                error = %err,
                "Operation failed after max retries"
            );
            return Err(exhausted(err, operation_name, attempt));
        }

        let delay = policy.delay(attempt);
        warn!(
            operation = %operation_name,
            attempt,
            error = %err,
            delay_ms = delay.as_millis() as u64,
            "Operation failed, retrying"
        );
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

fn exhausted(err: InspectionError, operation_name: &str, attempts: u32) -> InspectionError {
    match err {
        InspectionError::Retryable { message, .. } => InspectionError::Retryable {
            operation: operation_name.to_string(),
            attempts,
            message,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::ResourceKind;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_base_delay_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 6,
            initial_delay: Duration::from_millis(125),
            max_delay: Duration::from_millis(600),
            multiplier: 2.0,
            jitter: false,
        };
        assert_eq!(policy.base_delay(1), Duration::from_millis(125));
        assert_eq!(policy.base_delay(2), Duration::from_millis(250));
        assert_eq!(policy.base_delay(3), Duration::from_millis(500));
        assert_eq!(policy.base_delay(4), Duration::from_millis(600));
    }

    #[test]
    fn test_worst_case_budget() {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(125),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: false,
        };
        // Two sleeps: 125ms + 250ms.
        assert_eq!(policy.worst_case_budget(), Duration::from_millis(375));

        let jittered = RetryPolicy {
            jitter: true,
            ..policy
        };
        assert_eq!(jittered.worst_case_budget(), Duration::from_micros(562_500));
        assert_eq!(RetryPolicy::no_retry().worst_case_budget(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(&RetryPolicy::immediate(5), "CreateRoute", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(InspectionError::retryable("CreateRoute", "Rate exceeded"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_attempts() {
        let calls = AtomicU32::new(0);
        let result: InspectionResult<()> =
            retry_with_backoff(&RetryPolicy::immediate(3), "CreateRoute", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(InspectionError::retryable("CreateRoute", "Rate exceeded")) }
            })
            .await;

        assert_eq!(
            result,
            Err(InspectionError::Retryable {
                operation: "CreateRoute".to_string(),
                attempts: 3,
                message: "Rate exceeded".to_string(),
            })
        );
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: InspectionResult<()> =
            retry_with_backoff(&RetryPolicy::immediate(5), "CreateRoute", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(InspectionError::resource_gone(ResourceKind::RouteTable, "rtb-1")) }
            })
            .await;

        assert_eq!(result.unwrap_err().kind(), "ResourceGone");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_custom_predicate_keeps_error_kind() {
        let result: InspectionResult<()> = retry_with_backoff_if(
            &RetryPolicy::immediate(2),
            "ResolveEndpoint",
            |err| matches!(err, InspectionError::NoMatchingEndpoint { .. }),
            || async {
                Err(InspectionError::NoMatchingEndpoint {
                    subnet_id: "subnet-1".to_string(),
                    az: "us-east-1a".into(),
                })
            },
        )
        .await;

        assert_eq!(result.unwrap_err().kind(), "NoMatchingEndpoint");
    }
}
