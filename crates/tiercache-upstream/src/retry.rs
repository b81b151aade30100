//! Bounded retry for transient upstream failures.
//!
//! Connection errors, request timeouts and 5xx responses are retried with
//! exponential backoff (`base_backoff * 2^attempt`, capped at `max_backoff`).
//! Anything else, 4xx responses in particular, is returned immediately.

use std::future::Future;
use std::time::Duration;

use tiercache_core::CacheError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_backoff(mut self, backoff: Duration) -> Self {
        self.base_backoff = backoff;
        self
    }

    /// Delay before retry number `attempt + 1`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Whether an upstream error is worth another attempt.
pub fn is_transient(err: &CacheError) -> bool {
    match err {
        CacheError::Timeout { .. } => true,
        CacheError::UpstreamUnavailable { status: None, .. } => true,
        CacheError::UpstreamUnavailable {
            status: Some(status),
            ..
        } => *status >= 500,
        _ => false,
    }
}

/// Run `operation` until it succeeds, fails permanently, or the retry
/// budget is spent. The last error is returned on exhaustion.
pub async fn with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, CacheError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CacheError>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        "upstream call succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) if is_transient(&err) && attempt < policy.max_retries => {
                let delay = policy.backoff(attempt);
                tracing::warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max_attempts = policy.max_retries + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient upstream error, retrying after backoff"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
