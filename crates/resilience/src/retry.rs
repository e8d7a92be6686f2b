//! Retry with Exponential Backoff
//!
//! Resilient execution of async operations with automatic retries,
//! exponential backoff, and jitter to prevent thundering herd. Which errors
//! are worth retrying is decided by the [`Transience`] classification from
//! the core error taxonomy.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info};

use helpdesk_rag_core::Transience;

/// Configuration for retried execution
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,
    /// Initial backoff duration
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Whether to add jitter to backoff
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Policy for LLM completions: at most 2 retries, 250 ms base, 2 s cap
    pub fn for_llm() -> Self {
        Self {
            max_retries: 2,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(2),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    /// Policy for vector-store searches, kept tight because the fan-out
    /// already has per-task timeouts
    pub fn for_search() -> Self {
        Self {
            max_retries: 1,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self.backoff_multiplier.powi(attempt as i32);
        let raw = self.initial_backoff.mul_f64(exp).min(self.max_backoff);
        if self.jitter {
            // Uniform in [raw/2, raw]
            let factor = rand::thread_rng().gen_range(0.5..=1.0);
            raw.mul_f64(factor)
        } else {
            raw
        }
    }
}

/// Error returned when retrying gave up
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("retries exhausted after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: E },

    #[error(transparent)]
    NonRetryable(E),
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last_error, .. } => last_error,
            RetryError::NonRetryable(e) => e,
        }
    }

    pub fn inner(&self) -> &E {
        match self {
            RetryError::Exhausted { last_error, .. } => last_error,
            RetryError::NonRetryable(e) => e,
        }
    }
}

/// An exhausted retry carries its last error's classification, so a
/// retried call can sit directly behind a circuit breaker.
impl<E: Transience> Transience for RetryError<E> {
    fn is_transient(&self) -> bool {
        self.inner().is_transient()
    }

    fn failure_weight(&self) -> f32 {
        self.inner().failure_weight()
    }

    fn retry_after_hint(&self) -> Option<std::time::Duration> {
        self.inner().retry_after_hint()
    }
}

/// Execute `operation`, retrying transient failures per `config`.
///
/// `context` names the operation in logs.
pub async fn retry<F, Fut, T, E>(
    config: &RetryConfig,
    context: &str,
    operation: F,
) -> Result<T, RetryError<E>>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Transience + std::fmt::Display,
{
    let mut attempt: u32 = 0;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(context = %context, attempt = %(attempt + 1), "succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => {
                if !e.is_transient() {
                    return Err(RetryError::NonRetryable(e));
                }
                if attempt >= config.max_retries {
                    return Err(RetryError::Exhausted {
                        attempts: attempt + 1,
                        last_error: e,
                    });
                }

                let backoff = e
                    .retry_after_hint()
                    .unwrap_or_else(|| config.backoff_for_attempt(attempt));
                debug!(
                    context = %context,
                    attempt = %(attempt + 1),
                    backoff_ms = %backoff.as_millis(),
                    error = %e,
                    "transient failure, backing off"
                );
                sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use helpdesk_rag_core::LlmError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> LlmError {
        LlmError::Network("connection reset".into())
    }

    fn permanent() -> LlmError {
        LlmError::Api {
            status: 400,
            message: "bad request".into(),
        }
    }

    fn fast() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn succeeds_first_try() {
        let result = retry(&fast(), "test", || async { Ok::<_, LlmError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry(&fast(), "test", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(transient())
            } else {
                Ok(99)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 99);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry(&fast(), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(transient())
        })
        .await;
        match result.unwrap_err() {
            RetryError::Exhausted { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_caller_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry(&fast(), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(permanent())
        })
        .await;
        assert!(matches!(result.unwrap_err(), RetryError::NonRetryable(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let config = fast();
        assert_eq!(config.backoff_for_attempt(0), Duration::from_millis(1));
        assert_eq!(config.backoff_for_attempt(1), Duration::from_millis(2));
        assert_eq!(config.backoff_for_attempt(5), Duration::from_millis(4));
    }
}
