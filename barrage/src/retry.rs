//! Retry with optional exponential backoff.
//!
//! A [`RetryPolicy`] wraps an async operation returning `Result<T, E>`. Failed
//! attempts are retried while attempts remain and the caller's predicate says
//! the failure is worth another try. The failure of the last attempt is the
//! one handed back.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use typed_builder::TypedBuilder;

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TypedBuilder)]
pub struct RetryConfig {
    /// Retries after the first attempt. `0` disables retrying.
    #[builder(default = 0)]
    pub max_retries: u32,
    /// Backoff before the first retry.
    #[builder(default = Duration::from_secs(1))]
    pub initial_delay: Duration,
    /// Upper bound for any single backoff.
    #[builder(default = Duration::from_secs(10))]
    pub max_delay: Duration,
    /// Double the delay after every failed attempt. When `false` every
    /// retry waits `initial_delay`.
    #[builder(default = true)]
    pub exponential: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_delay.is_zero() {
            return Err(ConfigError::ZeroInitialDelay);
        }
        if self.max_delay < self.initial_delay {
            return Err(ConfigError::MaxDelayBelowInitial {
                initial: self.initial_delay,
                max: self.max_delay,
            });
        }
        Ok(())
    }

    /// Backoff before the retry that follows attempt `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        if !self.exponential {
            return self.initial_delay;
        }
        2u32.checked_pow(attempt)
            .and_then(|factor| self.initial_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// Final result of a retried operation plus how many attempts it took.
#[derive(Debug)]
pub struct Attempted<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    cancel: Option<CancellationToken>,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            cancel: None,
        }
    }

    /// Stop retrying (and cut backoff short) once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        self.config.delay(attempt)
    }

    pub async fn execute<T, E, F, Fut, P>(&self, operation: F, is_retryable: P) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        self.execute_tracked(operation, is_retryable).await.result
    }

    pub async fn execute_tracked<T, E, F, Fut, P>(
        &self,
        mut operation: F,
        is_retryable: P,
    ) -> Attempted<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut attempt = 0;
        loop {
            let err = match operation().await {
                Ok(value) => {
                    return Attempted {
                        result: Ok(value),
                        attempts: attempt + 1,
                    };
                }
                Err(err) => err,
            };

            let last = attempt >= self.config.max_retries;
            if last || self.is_cancelled() || !is_retryable(&err) {
                return Attempted {
                    result: Err(err),
                    attempts: attempt + 1,
                };
            }

            let delay = self.config.delay(attempt);
            tracing::warn!(
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                "Attempt {} failed: {}. Retrying in {}ms...",
                attempt + 1,
                err,
                delay.as_millis()
            );

            if !self.backoff(delay).await {
                return Attempted {
                    result: Err(err),
                    attempts: attempt + 1,
                };
            }
            attempt += 1;
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }

    /// Sleep for `delay`; `false` if cancelled first.
    async fn backoff(&self, delay: Duration) -> bool {
        match &self.cancel {
            Some(token) => tokio::select! {
                _ = tokio::time::sleep(delay) => true,
                _ = token.cancelled() => false,
            },
            None => {
                tokio::time::sleep(delay).await;
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };

    fn config(max_retries: u32) -> RetryConfig {
        RetryConfig::builder()
            .max_retries(max_retries)
            .initial_delay(Duration::from_millis(100))
            .max_delay(Duration::from_millis(500))
            .build()
    }

    #[test]
    fn exponential_delays_are_capped() {
        let cfg = config(3);
        assert_eq!(cfg.delay(0), Duration::from_millis(100));
        assert_eq!(cfg.delay(1), Duration::from_millis(200));
        assert_eq!(cfg.delay(2), Duration::from_millis(400));
        assert_eq!(cfg.delay(3), Duration::from_millis(500));
        assert_eq!(cfg.delay(40), Duration::from_millis(500));
    }

    #[test]
    fn linear_delay_is_constant() {
        let cfg = RetryConfig {
            exponential: false,
            ..config(3)
        };
        assert_eq!(cfg.delay(0), Duration::from_millis(100));
        assert_eq!(cfg.delay(5), Duration::from_millis(100));
    }

    #[test]
    fn validation_rejects_bad_delays() {
        let zero = RetryConfig {
            initial_delay: Duration::ZERO,
            ..config(1)
        };
        assert!(matches!(zero.validate(), Err(ConfigError::ZeroInitialDelay)));

        let inverted = RetryConfig {
            max_delay: Duration::from_millis(50),
            ..config(1)
        };
        assert!(matches!(
            inverted.validate(),
            Err(ConfigError::MaxDelayBelowInitial { .. })
        ));
        assert!(config(1).validate().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(config(3));
        let start = tokio::time::Instant::now();

        let counter = calls.clone();
        let outcome = policy
            .execute_tracked(
                || {
                    let counter = counter.clone();
                    async move {
                        let n = counter.fetch_add(1, Ordering::SeqCst);
                        Err::<(), _>(format!("failure #{n}"))
                    }
                },
                |_| true,
            )
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(outcome.attempts, 4);
        assert_eq!(outcome.result.unwrap_err(), "failure #3");
        // 100 + 200 + 400
        assert_eq!(start.elapsed(), Duration::from_millis(700));
    }

    #[tokio::test(start_paused = true)]
    async fn stops_on_non_retryable_failure() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(config(3));

        let counter = calls.clone();
        let result = policy
            .execute(
                || {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err::<(), _>("fatal")
                    }
                },
                |err: &&str| *err != "fatal",
            )
            .await;

        assert_eq!(result, Err("fatal"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_a_later_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(config(3));

        let counter = calls.clone();
        let outcome = policy
            .execute_tracked(
                || {
                    let counter = counter.clone();
                    async move {
                        if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                            Err("flaky")
                        } else {
                            Ok(7)
                        }
                    }
                },
                |_| true,
            )
            .await;

        assert_eq!(outcome.result, Ok(7));
        assert_eq!(outcome.attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_backoff() {
        let token = CancellationToken::new();
        token.cancel();
        let policy = RetryPolicy::new(config(3)).with_cancellation(token);
        let outcome = policy
            .execute_tracked(|| async { Err::<(), _>("down") }, |_| true)
            .await;
        assert_eq!(outcome.attempts, 1);
    }
}
