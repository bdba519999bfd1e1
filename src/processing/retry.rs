//! Bounded exponential-backoff retry applied explicitly at storage call sites.

use super::errors::{ChunkingError, ErrorKind};
use std::future::Future;
use std::time::Duration;

/// Retry configuration for one class of operations.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Additional attempts after the first one.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay (before jitter).
    pub max_delay: Duration,
    /// Scale each delay by a random factor in `[0.5, 1.0)`.
    pub use_jitter: bool,
    /// Kinds worth retrying.
    pub retryable_kinds: Vec<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            use_jitter: true,
            retryable_kinds: vec![ErrorKind::StorageThrottled, ErrorKind::StorageWriteFailure],
        }
    }
}

impl RetryPolicy {
    /// Policy used for chunk writes: two retries, three attempts in total.
    pub fn storage_writes() -> Self {
        Self {
            max_retries: 2,
            ..Self::default()
        }
    }

    /// Override the retry count.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Override both delay bounds.
    pub fn with_delays(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    /// Disable random jitter, mostly for deterministic tests.
    pub fn without_jitter(mut self) -> Self {
        self.use_jitter = false;
        self
    }

    /// Whether `error` should be retried under this policy.
    pub fn is_retryable(&self, error: &ChunkingError) -> bool {
        self.retryable_kinds.contains(&error.kind)
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        let delay = self
            .base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);
        if self.use_jitter {
            delay.mul_f64(0.5 + rand::random::<f64>() * 0.5)
        } else {
            delay
        }
    }

    /// Run `operation` until it succeeds, fails with a non-retryable kind, or the retry budget
    /// is spent. The last error is returned unchanged.
    pub async fn run<T, F, Fut>(
        &self,
        operation_name: &str,
        mut operation: F,
    ) -> Result<T, ChunkingError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ChunkingError>>,
    {
        let mut attempt = 0u32;
        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::info!(
                            operation = operation_name,
                            attempts = attempt + 1,
                            "Operation succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(error) if !self.is_retryable(&error) => {
                    tracing::debug!(
                        operation = operation_name,
                        kind = %error.kind,
                        "Non-retryable failure"
                    );
                    return Err(error);
                }
                Err(error) if attempt >= self.max_retries => {
                    tracing::error!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        kind = %error.kind,
                        error = %error.message,
                        "Retry budget exhausted"
                    );
                    return Err(error);
                }
                Err(error) => {
                    let delay = self.backoff_delay(attempt);
                    tracing::warn!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        max_attempts = self.max_retries + 1,
                        delay_ms = delay.as_millis() as u64,
                        kind = %error.kind,
                        "Retrying after recoverable failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_retries(max_retries)
            .with_delays(Duration::from_millis(1), Duration::from_millis(4))
            .without_jitter()
    }

    #[test]
    fn backoff_doubles_until_capped() {
        let policy = RetryPolicy::default().without_jitter();
        assert_eq!(policy.backoff_delay(0), Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(3), Duration::from_secs(8));
        assert_eq!(policy.backoff_delay(10), Duration::from_secs(30));
        assert_eq!(policy.backoff_delay(64), Duration::from_secs(30));
    }

    #[test]
    fn jitter_stays_within_half_to_full_delay() {
        let policy = RetryPolicy::default();
        for _ in 0..100 {
            let delay = policy.backoff_delay(2);
            assert!(delay >= Duration::from_secs(2));
            assert!(delay < Duration::from_secs(4));
        }
    }

    #[tokio::test]
    async fn succeeds_on_third_attempt_with_two_retries() {
        let calls = AtomicU32::new(0);
        let result = fast_policy(2)
            .run("flaky", || {
                let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if call < 3 {
                        Err(ChunkingError::new(ErrorKind::StorageThrottled, "slow down"))
                    } else {
                        Ok(call)
                    }
                }
            })
            .await;
        assert_eq!(result.expect("success"), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_kind_runs_once() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast_policy(5)
            .run("denied", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ChunkingError::new(ErrorKind::StorageAccessDenied, "no")) }
            })
            .await;
        assert_eq!(result.expect_err("fails").kind, ErrorKind::StorageAccessDenied);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_budget_returns_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast_policy(2)
            .run("always", || {
                let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    Err(ChunkingError::new(
                        ErrorKind::StorageWriteFailure,
                        format!("attempt {call}"),
                    ))
                }
            })
            .await;
        assert_eq!(result.expect_err("fails").message, "attempt 3");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
