//! Provider Retry Logic
//!
//! Exponential backoff for transient provider failures. Only errors classified
//! as retryable (`ProviderUnavailable`) are retried; everything else returns
//! immediately. Cancellation is checked before every attempt and interrupts
//! the backoff sleep.

use crate::error::ProviderError;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Retry policy for one provider client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first (minimum 1)
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }
}

/// Retry a provider operation with exponential backoff
///
/// **Algorithm:**
/// 1. If cancelled: return `ProviderError::Cancelled`
/// 2. Attempt operation
/// 3. If retryable error and attempts remain: log WARN, backoff, retry
/// 4. Otherwise return the result
///
/// # Arguments
/// * `operation_name` - Name for logging (e.g., "structured extraction")
/// * `policy` - Attempt count and backoff bounds
/// * `cancel` - Cancellation token observed between attempts
/// * `operation` - Async closure performing one attempt
pub async fn retry_transient<F, Fut, T>(
    operation_name: &str,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, ProviderError>>,
{
    let start_time = Instant::now();
    let max_attempts = policy.max_attempts.max(1);
    let mut backoff = policy.initial_backoff;
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }

        attempt += 1;

        if attempt > 1 {
            tracing::debug!(operation = operation_name, attempt, "Retrying provider call");
        }

        let err = match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis(),
                        "Provider call succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) => err,
        };

        if !err.is_retryable() {
            return Err(err);
        }

        if attempt >= max_attempts {
            tracing::warn!(
                operation = operation_name,
                attempt,
                elapsed_ms = start_time.elapsed().as_millis(),
                error = %err,
                "Provider call failed: attempts exhausted"
            );
            return Err(err);
        }

        let delay = backoff.min(policy.max_backoff);

        tracing::warn!(
            operation = operation_name,
            attempt,
            backoff_ms = delay.as_millis(),
            error = %err,
            "Provider unavailable, will retry after backoff"
        );

        tokio::select! {
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }

        backoff = (backoff * 2).min(policy.max_backoff);
    }
}
