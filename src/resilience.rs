//! Retry with exponential backoff around hardware and network operations
//!
//! Every subprocess and HTTP call goes through [`ResilientExecutor::run`];
//! nothing else in the crate loops on failure.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::{Error, Result};

/// Jitter spread applied to each backoff delay (plus or minus)
const JITTER_FRACTION: f64 = 0.2;

/// Retry policy for one call site
///
/// Invariants: `max_attempts >= 1`, `base_delay > 0`, `multiplier >= 1`.
/// Construct through [`RetryPolicy::new`] or validate with
/// [`RetryPolicy::validate`] when built field-by-field.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total invocations allowed, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Growth factor between consecutive delays
    pub multiplier: f64,
    /// Cap applied before jitter
    pub max_delay: Duration,
    /// Spread each delay by up to 20% either way
    pub jitter: bool,
    /// Bound on a single attempt; `None` leaves the attempt unbounded
    pub timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: true,
            timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl RetryPolicy {
    /// Create a validated policy
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationInvalid` if an invariant is violated
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        multiplier: f64,
        max_delay: Duration,
        jitter: bool,
    ) -> Result<Self> {
        let policy = Self {
            max_attempts,
            base_delay,
            multiplier,
            max_delay,
            jitter,
            timeout: None,
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Policy that never retries
    #[must_use]
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Set the per-attempt bound
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Check the policy invariants
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationInvalid` naming the first violated invariant
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts < 1 {
            return Err(Error::ConfigurationInvalid(
                "retry max_attempts must be at least 1".to_string(),
            ));
        }
        if self.base_delay.is_zero() {
            return Err(Error::ConfigurationInvalid(
                "retry base_delay must be greater than zero".to_string(),
            ));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(Error::ConfigurationInvalid(format!(
                "retry multiplier must be >= 1, got {}",
                self.multiplier
            )));
        }
        Ok(())
    }

    /// Un-jittered delay slept before retry number `retry` (1-based)
    ///
    /// `min(base * multiplier^(retry-1), max_delay)`
    #[must_use]
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.multiplier.powi(exponent);
        let max_secs = self.max_delay.as_secs_f64();
        let secs = (self.base_delay.as_secs_f64() * factor).min(max_secs);

        if secs.is_finite() {
            Duration::from_secs_f64(secs)
        } else {
            self.max_delay
        }
    }

    /// Delay actually slept before retry number `retry`, jitter applied
    #[must_use]
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let delay = self.backoff(retry);
        if !self.jitter {
            return delay;
        }

        let spread = rand::thread_rng().gen_range(-JITTER_FRACTION..=JITTER_FRACTION);
        delay.mul_f64(1.0 + spread)
    }

    /// Bounds on the total time slept when every attempt fails
    ///
    /// Returns `(min, max)`; equal when jitter is off
    #[must_use]
    pub fn total_delay_bounds(&self) -> (Duration, Duration) {
        let total: Duration = (1..self.max_attempts).map(|r| self.backoff(r)).sum();
        if self.jitter {
            (
                total.mul_f64(1.0 - JITTER_FRACTION),
                total.mul_f64(1.0 + JITTER_FRACTION),
            )
        } else {
            (total, total)
        }
    }
}

/// Runs fallible operations under a [`RetryPolicy`]
#[derive(Debug, Clone, Copy, Default)]
pub struct ResilientExecutor;

impl ResilientExecutor {
    /// Create an executor
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Run `op` until it succeeds, fails non-transiently, or runs out of attempts
    ///
    /// Each attempt is bounded by `policy.timeout`; an attempt that overruns
    /// is dropped and counted as a transient `Timeout`.
    ///
    /// # Errors
    ///
    /// Non-transient failures are returned as-is on first occurrence.
    /// Exhausted transient failures come back as `RetriesExhausted` carrying
    /// the attempt count and the last error.
    pub async fn run<T, F, Fut>(&self, operation: &str, policy: &RetryPolicy, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run_retrying(operation, policy, Error::is_transient, op).await
    }

    /// Like [`run`](Self::run), but only failures accepted by `retryable`
    /// are retried
    ///
    /// Used where a caller recovers from some transient classes itself,
    /// e.g. a busy speaker that gets its holder released instead of a backoff.
    ///
    /// # Errors
    ///
    /// Failures rejected by `retryable` are returned as-is on first occurrence.
    pub async fn run_retrying<T, F, Fut, R>(
        &self,
        operation: &str,
        policy: &RetryPolicy,
        retryable: R,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        R: Fn(&Error) -> bool,
    {
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let outcome = match policy.timeout {
                Some(limit) => tokio::time::timeout(limit, op())
                    .await
                    .unwrap_or_else(|_| {
                        Err(Error::Timeout(format!("{operation} exceeded {limit:?}")))
                    }),
                None => op().await,
            };

            match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(operation, attempt, "recovered after retry");
                    }
                    return Ok(value);
                }
                Err(e) if !retryable(&e) => {
                    tracing::debug!(operation, attempt, error = %e, "non-transient failure");
                    return Err(e);
                }
                Err(e) if attempt >= policy.max_attempts => {
                    tracing::warn!(operation, attempts = attempt, error = %e, "retries exhausted");
                    return Err(Error::RetriesExhausted {
                        operation: operation.to_string(),
                        attempts: attempt,
                        source: Box::new(e),
                    });
                }
                Err(e) => {
                    let delay = policy.delay_for_retry(attempt);
                    tracing::warn!(
                        operation,
                        attempt,
                        max_attempts = policy.max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
