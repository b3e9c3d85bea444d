//! Bounded exponential-backoff retry for infrastructure operations.
//!
//! Checkpoint writes and remote submissions go through here. Only errors
//! classified as retryable ([`CoreError::is_retryable`]) are retried; once the
//! attempts are exhausted the last error is returned and the caller degrades
//! into the task error path.

use std::future::Future;
use std::time::Duration;

use taskline_core::error::CoreError;

/// Default number of attempts, including the first one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Tunable parameters for the backoff strategy.
#[derive(Debug, Clone)]
pub struct InfraRetryConfig {
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
    pub max_attempts: u32,
}

impl Default for InfraRetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl InfraRetryConfig {
    /// No waiting between attempts.
    pub fn immediate() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// Calculate the next backoff delay, clamped to `max_delay`.
pub fn next_delay(current: Duration, config: &InfraRetryConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Attempt bookkeeping for one retried operation.
pub struct Backoff<'a> {
    config: &'a InfraRetryConfig,
    attempt: u32,
    delay: Duration,
}

impl<'a> Backoff<'a> {
    pub fn new(config: &'a InfraRetryConfig) -> Self {
        Self {
            config,
            attempt: 1,
            delay: config.initial_delay,
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Sleep before the next attempt if `err` is retryable and attempts
    /// remain. Returns `false` when the caller should give up.
    pub async fn retry_after(&mut self, operation: &str, err: &CoreError) -> bool {
        if !err.is_retryable() || self.attempt >= self.config.max_attempts.max(1) {
            return false;
        }
        tracing::warn!(
            operation,
            attempt = self.attempt,
            max_attempts = self.config.max_attempts,
            delay_ms = self.delay.as_millis() as u64,
            error = %err,
            "Infrastructure operation failed, retrying"
        );
        tokio::time::sleep(self.delay).await;
        self.delay = next_delay(self.delay, self.config);
        self.attempt += 1;
        true
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// attempts run out.
pub async fn with_retry<T, F, Fut>(config: &InfraRetryConfig, operation: &str, mut op: F) -> Result<T, CoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CoreError>>,
{
    let mut backoff = Backoff::new(config);
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !backoff.retry_after(operation, &err).await {
                    return Err(err);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn next_delay_doubles() {
        let config = InfraRetryConfig::default();
        assert_eq!(
            next_delay(Duration::from_millis(200), &config),
            Duration::from_millis(400)
        );
    }

    #[test]
    fn next_delay_clamps_at_max() {
        let config = InfraRetryConfig {
            max_delay: Duration::from_secs(1),
            ..Default::default()
        };
        assert_eq!(next_delay(Duration::from_millis(800), &config), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn retryable_errors_are_retried_until_success() {
        let calls = &AtomicU32::new(0);
        let result = with_retry(&InfraRetryConfig::immediate(), "test", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(CoreError::Infrastructure("flaky".into()))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn attempts_are_bounded() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&InfraRetryConfig::immediate(), "test", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CoreError::Infrastructure("down".into()))
        })
        .await;
        assert_matches!(result, Err(CoreError::Infrastructure(_)));
        assert_eq!(calls.load(Ordering::SeqCst), DEFAULT_MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn other_errors_fail_immediately() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&InfraRetryConfig::immediate(), "test", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CoreError::Conflict("stale".into()))
        })
        .await;
        assert_matches!(result, Err(CoreError::Conflict(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
