//! Bounded retry with a fixed delay for upstream calls.
//!
//! Tushare drops connections and throttles under load; a short fixed pause
//! clears most of it. The pause goes through [`Sleeper`] so tests run
//! without wall-clock waits.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, warn};

use crate::error::ProviderError;

/// Default number of attempts per logical request.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default pause between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(3);

/// Something that can pause the current task.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeper backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}

/// Retry policy: how many attempts, how long to wait between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Run `op` until it succeeds or the attempts are used up.
    ///
    /// `op` is invoked at most `max_attempts` times. Every error counts
    /// against the budget, including auth and decode failures. On exhaustion
    /// the last error is returned.
    pub async fn run<T, F, Fut>(
        &self,
        sleeper: &dyn Sleeper,
        label: &str,
        mut op: F,
    ) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= max_attempts => {
                    error!(
                        request = label,
                        attempts = attempt,
                        error = %e,
                        "Request failed, retries exhausted"
                    );
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        request = label,
                        attempt,
                        max_attempts,
                        delay_ms = self.delay.as_millis() as u64,
                        recoverable = e.is_recoverable(),
                        error = %e,
                        "Request failed, retrying"
                    );
                    sleeper.sleep(self.delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSleeper {
        naps: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.naps.lock().unwrap().push(duration);
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_secs(3))
    }

    #[tokio::test]
    async fn test_first_attempt_succeeds() {
        let sleeper = RecordingSleeper::default();
        let calls = AtomicU32::new(0);

        let result = policy()
            .run(&sleeper, "daily_basic", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ProviderError>(42)
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(sleeper.naps.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let sleeper = RecordingSleeper::default();
        let calls = AtomicU32::new(0);

        let result = policy()
            .run(&sleeper, "daily_basic", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(ProviderError::Network(format!("reset #{}", n)))
                } else {
                    Ok("rows")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "rows");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            *sleeper.naps.lock().unwrap(),
            vec![Duration::from_secs(3), Duration::from_secs(3)]
        );
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let sleeper = RecordingSleeper::default();
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = policy()
            .run(&sleeper, "daily_basic", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Err(ProviderError::Network(format!("attempt {}", n)))
            })
            .await;

        match result {
            Err(ProviderError::Network(msg)) => assert_eq!(msg, "attempt 3"),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // No pause after the final attempt
        assert_eq!(sleeper.naps.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_decode_error_is_retried() {
        let sleeper = RecordingSleeper::default();
        let calls = AtomicU32::new(0);

        let result = policy()
            .run(&sleeper, "fina_indicator", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n == 1 {
                    Err(ProviderError::Parse("truncated body".into()))
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(*sleeper.naps.lock().unwrap(), vec![Duration::from_secs(3)]);
    }

    #[tokio::test]
    async fn test_auth_error_uses_full_budget() {
        let sleeper = RecordingSleeper::default();
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = policy()
            .run(&sleeper, "fina_indicator", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::Auth("token invalid".into()))
            })
            .await;

        assert!(matches!(result, Err(ProviderError::Auth(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(sleeper.naps.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_zero_attempts_clamped_to_one() {
        let policy = RetryPolicy::new(0, Duration::ZERO);
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(RetryPolicy::default().max_attempts, 3);
        assert_eq!(RetryPolicy::default().delay, Duration::from_secs(3));
    }
}
