//! # Shared Retry Wrapper
//!
//! Bounded retries with exponential backoff around any outbound call,
//! gated by the dependency's circuit breaker.
//!
//! Retried: transient transport failures (connection errors, timeouts,
//! 5xx) and gateway payment rejections, each within its configured budget.
//! Not retried: validation and workflow errors, 4xx responses, and
//! deserialization failures — repeating the identical request cannot
//! change the outcome.

use std::future::Future;

use ecx_core::{EscrowError, IntegrationError, RetrySettings};

use crate::breaker::CircuitBreaker;

/// Call `f` through `breaker` with the given retry budget.
///
/// The first attempt counts against `settings.max_attempts`; the delay
/// before retry `n` is `base_delay * 2^(n-1)`. Every attempt asks the
/// breaker for admission and reports its outcome back, so consecutive
/// failures across operations accumulate toward the breaker threshold.
///
/// # Errors
///
/// A non-retryable error from `f` is returned as-is. When the budget is
/// exhausted, the last payment rejection is surfaced unchanged, and
/// exhausted transport failures become
/// [`IntegrationError::RetriesExhausted`].
pub async fn call_with_retry<T, F, Fut>(
    breaker: &CircuitBreaker,
    settings: RetrySettings,
    operation: &'static str,
    f: F,
) -> Result<T, EscrowError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, EscrowError>>,
{
    let max_attempts = settings.max_attempts.max(1);
    let mut last_error: Option<EscrowError> = None;

    for attempt in 1..=max_attempts {
        if attempt > 1 {
            let delay = settings.base_delay * 2u32.saturating_pow(attempt - 2);
            tracing::warn!(
                dependency = breaker.dependency(),
                operation,
                attempt,
                max_attempts,
                "retrying in {delay:?}"
            );
            tokio::time::sleep(delay).await;
        }

        breaker.admit()?;
        match f().await {
            Ok(value) => {
                breaker.record_success();
                return Ok(value);
            }
            Err(err) => {
                breaker.record_failure();
                if !is_retryable(&err) {
                    return Err(err);
                }
                tracing::warn!(
                    dependency = breaker.dependency(),
                    operation,
                    attempt,
                    "attempt failed: {err}"
                );
                last_error = Some(err);
            }
        }
    }

    match last_error {
        // A payment rejection keeps its type so callers see PaymentError
        // after the budget, not a generic outage.
        Some(EscrowError::Payment(err)) => Err(EscrowError::Payment(err)),
        Some(err) => Err(EscrowError::Integration(IntegrationError::RetriesExhausted {
            dependency: breaker.dependency(),
            operation,
            attempts: max_attempts,
            last_error: err.to_string(),
        })),
        // max_attempts >= 1, so the loop ran at least once.
        None => Err(EscrowError::Integration(IntegrationError::RetriesExhausted {
            dependency: breaker.dependency(),
            operation,
            attempts: max_attempts,
            last_error: "no attempt recorded".to_string(),
        })),
    }
}

fn is_retryable(err: &EscrowError) -> bool {
    match err {
        EscrowError::Payment(_) => true,
        EscrowError::Integration(e) => e.is_transient(),
        EscrowError::Validation(_) | EscrowError::Workflow(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecx_core::{PaymentError, ValidationError};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn settings(max_attempts: u32) -> RetrySettings {
        RetrySettings {
            max_attempts,
            base_delay: Duration::from_millis(1),
        }
    }

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new("wallet_gateway", 100, Duration::from_secs(30))
    }

    fn transport_failure() -> EscrowError {
        EscrowError::Integration(IntegrationError::Transport {
            endpoint: "http://wallet.test".to_string(),
            reason: "connection refused".to_string(),
        })
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let b = breaker();
        let result: Result<u32, EscrowError> =
            call_with_retry(&b, settings(3), "release_milestone", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(transport_failure())
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;
        assert_eq!(result.expect("third attempt succeeds"), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_transport_failures_become_retries_exhausted() {
        let calls = AtomicU32::new(0);
        let b = breaker();
        let result: Result<u32, EscrowError> =
            call_with_retry(&b, settings(3), "log_event", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(transport_failure()) }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(
            result,
            Err(EscrowError::Integration(
                IntegrationError::RetriesExhausted { attempts: 3, .. }
            ))
        ));
    }

    #[tokio::test]
    async fn payment_rejection_is_retried_then_surfaced_as_payment_error() {
        let calls = AtomicU32::new(0);
        let b = breaker();
        let result: Result<u32, EscrowError> =
            call_with_retry(&b, settings(3), "release_milestone", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(EscrowError::Payment(PaymentError::Rejected {
                        operation: "release_milestone",
                        reason: "processor declined".to_string(),
                    }))
                }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(result, Err(EscrowError::Payment(_))));
    }

    #[tokio::test]
    async fn validation_errors_are_never_retried() {
        let calls = AtomicU32::new(0);
        let b = breaker();
        let result: Result<u32, EscrowError> =
            call_with_retry(&b, settings(5), "create_wallet", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(EscrowError::Validation(ValidationError::EmptyWalletId)) }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(EscrowError::Validation(_))));
    }

    #[tokio::test]
    async fn open_breaker_short_circuits_without_calling() {
        let calls = AtomicU32::new(0);
        let b = CircuitBreaker::new("ledger", 1, Duration::from_secs(60));
        b.record_failure();

        let result: Result<u32, EscrowError> = call_with_retry(&b, settings(3), "log_event", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(1) }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(matches!(
            result,
            Err(EscrowError::Integration(IntegrationError::CircuitOpen { .. }))
        ));
    }
}
