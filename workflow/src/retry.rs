use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::WorkflowError;

/// Retry-to-completion policy for multi-write operations.
///
/// Only retryable errors (timeouts, unreachable services) trigger another
/// attempt. Backoff grows linearly with the attempt number.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. `op` receives the zero-based attempt number.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, WorkflowError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, WorkflowError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt + 1 < max_attempts => {
                    attempt += 1;
                    warn!(operation, attempt, max_attempts, error = %e, "retrying");
                    tokio::time::sleep(self.backoff * attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
