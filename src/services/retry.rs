//! Bounded retry of admission refusals at the request boundary.
//!
//! The orchestrator refuses immediately when another attempt holds the gate;
//! a previous attempt usually finishes within seconds, so the boundary
//! re-invokes a few times rather than making callers aware of admission
//! control. Only the admission-conflict error is ever suppressed, and only
//! between retries; every other error propagates on first occurrence.

use std::future::Future;
use std::time::Duration;

use crate::errors::LinkError;

pub const MAX_ADMISSION_ATTEMPTS: u32 = 5;
pub const ADMISSION_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Run `op` with the standard admission retry policy.
pub async fn with_admission_retry<T, F, Fut>(op: F) -> Result<T, LinkError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LinkError>>,
{
    retry_admission(op, MAX_ADMISSION_ATTEMPTS, ADMISSION_RETRY_DELAY).await
}

pub async fn retry_admission<T, F, Fut>(
    mut op: F,
    max_attempts: u32,
    delay: Duration,
) -> Result<T, LinkError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LinkError>>,
{
    let mut last_refusal = None;
    for attempt in 1..=max_attempts {
        match op().await {
            Err(err) if err.is_retryable() => {
                log::info!(
                    "[Link] Admission refused ({}), attempt {}/{}",
                    err,
                    attempt,
                    max_attempts
                );
                last_refusal = Some(err);
                if attempt < max_attempts {
                    tokio::time::sleep(delay).await;
                }
            }
            other => return other,
        }
    }
    // max_attempts >= 1, so a refusal was recorded.
    Err(last_refusal.expect("retry loop ran at least once"))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test]
    async fn test_retries_admission_conflicts_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_admission(
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(LinkError::AttemptInProgress { default_user_id: 5 })
                    } else {
                        Ok(42)
                    }
                }
            },
            5,
            Duration::from_millis(1),
        )
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_admission(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(LinkError::AttemptInProgress { default_user_id: 5 }) }
            },
            5,
            Duration::from_millis(1),
        )
        .await;
        assert!(matches!(
            result,
            Err(LinkError::AttemptInProgress { default_user_id: 5 })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_other_errors_propagate_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_admission(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(LinkError::PolicyViolation("nope".to_string())) }
            },
            5,
            Duration::from_millis(1),
        )
        .await;
        assert!(matches!(result, Err(LinkError::PolicyViolation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
