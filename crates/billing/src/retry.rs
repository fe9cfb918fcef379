//! Bounded retries with exponential backoff
//!
//! Reconciliation steps that race provider delivery (the referenced rows may
//! not be committed yet when the event arrives) run under a retry policy.
//! Only errors classified retryable are retried; fatal errors propagate after
//! the first attempt. No jitter, no circuit breaker.

use std::future::Future;
use std::time::Duration;

use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::RetryIf;

use crate::error::{BillingError, BillingResult};

/// Retry schedule: up to `max_attempts` total attempts, sleeping
/// `initial_delay * backoff_factor^(attempt - 1)` between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub initial_delay: Duration,
    pub backoff_factor: u32,
}

impl RetryPolicy {
    pub const fn new(max_attempts: usize, initial_delay: Duration, backoff_factor: u32) -> Self {
        Self {
            max_attempts,
            initial_delay,
            backoff_factor,
        }
    }

    /// Invoice creation waits on subscription/account rows from earlier events
    pub const INVOICE_CREATED: RetryPolicy = RetryPolicy::new(3, Duration::from_secs(15), 2);

    /// Payment recording waits on the invoice row
    pub const INVOICE_PAYMENT: RetryPolicy = RetryPolicy::new(3, Duration::from_secs(20), 2);

    /// Outbound checkout-link creation (fire-and-forget path)
    pub const CHECKOUT_LINK: RetryPolicy = RetryPolicy::new(3, Duration::from_secs(10), 2);

    fn delays(&self) -> impl Iterator<Item = Duration> {
        // ExponentialBackoff yields factor^1, factor^2, ... milliseconds; the
        // scale multiplier turns that into initial_delay * factor^(n-1).
        let base = u64::from(self.backoff_factor.max(1));
        let scale = (self.initial_delay.as_millis() as u64) / base;
        ExponentialBackoff::from_millis(base)
            .factor(scale)
            .take(self.max_attempts.saturating_sub(1))
    }
}

/// Run `action` under `policy`, retrying only errors that
/// [`BillingError::is_retryable`] classifies as transient.
///
/// After the final attempt the original error propagates to the caller.
pub async fn retry_if_transient<F, Fut, T>(policy: &RetryPolicy, action: F) -> BillingResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = BillingResult<T>>,
{
    RetryIf::spawn(policy.delays(), action, |err: &BillingError| {
        err.is_retryable()
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_policy(max_attempts: usize) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(2), 2)
    }

    #[test]
    fn test_delay_schedule() {
        let policy = RetryPolicy::new(4, Duration::from_secs(15), 2);
        let delays: Vec<Duration> = policy.delays().collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(15),
                Duration::from_secs(30),
                Duration::from_secs(60),
            ]
        );
    }

    #[tokio::test]
    async fn test_transient_error_exhausts_attempts() {
        let attempts = AtomicUsize::new(0);
        let result: BillingResult<()> = retry_if_transient(&fast_policy(3), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(BillingError::Database("connection reset".into())) }
        })
        .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(matches!(result, Err(BillingError::Database(_))));
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_retried() {
        let attempts = AtomicUsize::new(0);
        let result: BillingResult<()> = retry_if_transient(&fast_policy(3), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(BillingError::MissingField("customer email")) }
        })
        .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(BillingError::MissingField(_))));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let attempts = AtomicUsize::new(0);
        let result = retry_if_transient(&fast_policy(3), || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err(BillingError::InvoiceNotFound("in_123".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(result.ok(), Some(42));
    }
}
