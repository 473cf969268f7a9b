//! Bounded retry with an injectable backoff policy.
//!
//! [`RetryingInvoker`] wraps one fallible async operation. Errors that report
//! themselves as transient (see [`Retryable`]) are retried until
//! `max_attempts` is reached; anything else fails immediately. The driver
//! uses it around model calls and the batch classifier around each item.

use std::future::Future;
use std::time::Duration;

use crate::error::{ClassifyError, ServiceError};

/// Delay schedule between attempts.
#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    /// Retry immediately.
    None,
    /// Same delay before every retry.
    Fixed(Duration),
    /// `initial * multiplier^n`, capped at `max`.
    Exponential {
        initial: Duration,
        max: Duration,
        multiplier: f64,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Exponential {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(8),
            multiplier: 2.0,
        }
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts including the first. Values below 1 behave as 1.
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// Scale each delay by a deterministic factor to spread out retries.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::default(),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Exponential backoff with jitter and the given attempt budget.
    pub fn with_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Fixed delay between attempts, no jitter.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed(delay),
            jitter: false,
        }
    }

    /// A single attempt, never retried.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            backoff: Backoff::None,
            jitter: false,
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Attempt budget with the floor applied.
    pub fn effective_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay before retry number `retry` (0-indexed: `0` is the wait after
    /// the first failed attempt).
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let base = match &self.backoff {
            Backoff::None => return Duration::ZERO,
            Backoff::Fixed(d) => d.as_secs_f64(),
            Backoff::Exponential {
                initial,
                max,
                multiplier,
            } => {
                let exp = initial.as_secs_f64() * multiplier.powi(retry.min(i32::MAX as u32) as i32);
                exp.min(max.as_secs_f64())
            }
        };

        if self.jitter {
            // Deterministic so tests can assert on timing.
            let jitter_factor = match retry % 4 {
                0 => 0.75,
                1 => 0.90,
                2 => 0.60,
                _ => 0.85,
            };
            Duration::from_secs_f64(base * jitter_factor)
        } else {
            Duration::from_secs_f64(base)
        }
    }
}

/// Errors that know whether retrying could help.
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

impl Retryable for ServiceError {
    fn is_transient(&self) -> bool {
        matches!(self, ServiceError::Transient(_))
    }
}

impl Retryable for ClassifyError {
    fn is_transient(&self) -> bool {
        self.transient
    }
}

/// Whether an HTTP status code indicates a transient (retryable) failure.
pub fn is_transient_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}

/// Final result of a retried operation plus how many attempts it took.
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
}

/// Runs an operation under a [`RetryConfig`].
#[derive(Debug, Clone)]
pub struct RetryingInvoker {
    config: RetryConfig,
    label: String,
}

impl RetryingInvoker {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            label: "operation".into(),
        }
    }

    /// Name used in retry log lines.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `op` until it succeeds, fails permanently, or the attempt budget
    /// is spent.
    pub async fn invoke<F, Fut, T, E>(&self, op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + std::fmt::Display,
    {
        self.invoke_counted(op).await.result
    }

    /// Like [`invoke`](Self::invoke), also reporting the number of attempts.
    pub async fn invoke_counted<F, Fut, T, E>(&self, mut op: F) -> RetryOutcome<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + std::fmt::Display,
    {
        let max_attempts = self.config.effective_attempts();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match op().await {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                    };
                }
                Err(e) => {
                    if !e.is_transient() || attempt >= max_attempts {
                        if e.is_transient() && max_attempts > 1 {
                            tracing::warn!(
                                "{} failed after {attempt} attempt(s): {e}",
                                self.label
                            );
                        }
                        return RetryOutcome {
                            result: Err(e),
                            attempts: attempt,
                        };
                    }

                    let delay = self.config.delay_for_attempt(attempt - 1);
                    tracing::warn!(
                        "{} attempt {attempt}/{max_attempts} failed ({e}), retrying in {:.1}s",
                        self.label,
                        delay.as_secs_f64(),
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counting_op(
        calls: &AtomicU32,
        fail_first: u32,
        err: ServiceError,
    ) -> impl FnMut() -> std::future::Ready<Result<u32, ServiceError>> + '_ {
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= fail_first {
                std::future::ready(Err(err.clone()))
            } else {
                std::future::ready(Ok(n))
            }
        }
    }

    #[test]
    fn delay_increases_exponentially() {
        let config = RetryConfig::with_attempts(5).with_jitter(false);
        let d0 = config.delay_for_attempt(0);
        let d1 = config.delay_for_attempt(1);
        let d2 = config.delay_for_attempt(2);

        assert!(d1 > d0, "d1={d1:?} should be > d0={d0:?}");
        assert!(d2 > d1, "d2={d2:?} should be > d1={d1:?}");
    }

    #[test]
    fn delay_capped_at_max() {
        let config = RetryConfig::with_attempts(10)
            .with_jitter(false)
            .with_backoff(Backoff::Exponential {
                initial: Duration::from_millis(500),
                max: Duration::from_secs(2),
                multiplier: 2.0,
            });
        assert!(config.delay_for_attempt(10) <= Duration::from_secs(2));
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let config = RetryConfig::fixed(3, Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(5), Duration::from_secs(1));
    }

    #[test]
    fn jitter_reduces_delay() {
        let jittered = RetryConfig::with_attempts(3);
        let plain = RetryConfig::with_attempts(3).with_jitter(false);
        assert!(jittered.delay_for_attempt(2) <= plain.delay_for_attempt(2));
    }

    #[test]
    fn transient_statuses() {
        assert!(is_transient_status(429));
        assert!(is_transient_status(502));
        assert!(!is_transient_status(400));
        assert!(!is_transient_status(401));
    }

    #[tokio::test(start_paused = true)]
    async fn always_transient_uses_exact_attempt_budget() {
        let calls = AtomicU32::new(0);
        let invoker = RetryingInvoker::new(RetryConfig::fixed(3, Duration::from_secs(1)));

        let start = tokio::time::Instant::now();
        let outcome = invoker
            .invoke_counted(counting_op(&calls, u32::MAX, ServiceError::transient("503")))
            .await;

        assert!(outcome.result.is_err());
        assert_eq!(outcome.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Two waits between three attempts.
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_error_fails_immediately() {
        let calls = AtomicU32::new(0);
        let invoker = RetryingInvoker::new(RetryConfig::fixed(5, Duration::from_secs(1)));

        let outcome = invoker
            .invoke_counted(counting_op(&calls, u32::MAX, ServiceError::fatal("HTTP 401")))
            .await;

        assert_eq!(outcome.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.result, Err(ServiceError::fatal("HTTP 401")));
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let invoker = RetryingInvoker::new(RetryConfig::with_attempts(4).with_jitter(false));

        let value = invoker
            .invoke(counting_op(&calls, 2, ServiceError::transient("reset")))
            .await;

        assert_eq!(value, Ok(3));
    }

    #[tokio::test]
    async fn zero_attempts_behaves_as_one() {
        let calls = AtomicU32::new(0);
        let invoker = RetryingInvoker::new(RetryConfig::fixed(0, Duration::ZERO));

        let outcome = invoker
            .invoke_counted(counting_op(&calls, u32::MAX, ServiceError::transient("x")))
            .await;

        assert_eq!(outcome.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
