use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::LLMError;

/// Bounded retry with a fixed delay, applied to transient overload errors only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Wait between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// A single attempt, no retries.
    pub const fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or the attempt
/// budget is spent.
///
/// The wait between attempts returns [`LLMError::Cancelled`] as soon as `cancel` fires.
pub(crate) async fn run_with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    vendor: &'static str,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, LLMError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LLMError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        if cancel.is_cancelled() {
            return Err(LLMError::Cancelled);
        }
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                warn!(
                    vendor,
                    attempt,
                    max_attempts,
                    delay_ms = policy.delay.as_millis() as u64,
                    error = %err,
                    "transient vendor error, retrying"
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(LLMError::Cancelled),
                    _ = tokio::time::sleep(policy.delay) => {}
                }
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
