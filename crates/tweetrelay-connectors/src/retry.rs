//! Backoff policies and bounded retry drivers.
//!
//! Startup against an eventually-consistent broker uses two growth
//! disciplines that are kept apart on purpose:
//!
//! - [`Growth::Capped`]: `interval *= multiplier`, clamped to
//!   `max_interval`. Drives [`with_retry`] around topic creation, topic
//!   listing and rule reconciliation.
//! - [`Growth::Unbounded`]: `interval *= multiplier` with no ceiling. Drives
//!   [`poll_until`] for topic visibility and schema-registry health.
//!
//! Every sleep races a [`CancellationToken`], so a shutdown signal ends a
//! long wait with [`ConnectorError::Cancelled`] instead of surfacing as a
//! failure of the operation.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ConnectorError;

/// How the wait interval grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Growth {
    /// Multiply, then clamp to the policy's maximum interval.
    Capped,
    /// Multiply without a ceiling until attempts run out.
    Unbounded,
}

/// Backoff configuration shared by the retry and poll drivers.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub initial_interval: Duration,
    /// Ceiling for [`Growth::Capped`]; ignored by [`Growth::Unbounded`].
    pub max_interval: Duration,
    /// Growth factor applied after each sleep. Must be greater than 1.0.
    pub multiplier: f64,
    /// Attempt budget. See [`with_retry`] and [`poll_until`] for how each
    /// driver spends it.
    pub max_attempts: u32,
    /// Growth discipline.
    pub growth: Growth,
}

impl BackoffPolicy {
    /// Creates a capped exponential policy.
    #[must_use]
    pub fn capped(
        initial_interval: Duration,
        max_interval: Duration,
        multiplier: f64,
        max_attempts: u32,
    ) -> Self {
        Self {
            initial_interval,
            max_interval,
            multiplier,
            max_attempts,
            growth: Growth::Capped,
        }
    }

    /// Creates an unbounded multiplicative policy.
    #[must_use]
    pub fn unbounded(initial_interval: Duration, multiplier: f64, max_attempts: u32) -> Self {
        Self {
            initial_interval,
            max_interval: Duration::MAX,
            multiplier,
            max_attempts,
            growth: Growth::Unbounded,
        }
    }

    /// Starts a fresh interval sequence for this policy.
    #[must_use]
    pub fn backoff(&self) -> Backoff {
        Backoff {
            current: self.initial_interval,
            policy: self.clone(),
        }
    }

    fn grow(&self, current: Duration) -> Duration {
        let next = Duration::try_from_secs_f64(current.as_secs_f64() * self.multiplier)
            .unwrap_or(Duration::MAX);
        match self.growth {
            Growth::Capped => next.min(self.max_interval),
            Growth::Unbounded => next,
        }
    }
}

/// Mutable interval state for one retry or poll loop.
///
/// Yields the current sleep and then grows it. The iterator never ends;
/// the drivers bound it with the policy's attempt budget.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    current: Duration,
}

impl Backoff {
    /// Returns the current sleep and advances the interval.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.policy.grow(self.current);
        delay
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        Some(self.next_delay())
    }
}

/// Outcome of a single attempt inside [`with_retry_and_handler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The operation succeeded.
    Success,
    /// The operation failed transiently and will be retried.
    RetryableFailure,
    /// The operation failed and no attempts remain, or the failure was not
    /// retryable.
    Exhausted,
}

/// One attempt of a retried operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryAttempt {
    /// Attempt ordinal, starting at 1.
    pub ordinal: u32,
    /// What happened on this attempt.
    pub outcome: AttemptOutcome,
}

/// Sleeps for `delay` unless `cancel` fires first.
///
/// # Errors
///
/// Returns [`ConnectorError::Cancelled`] if the token is cancelled before
/// the delay elapses.
pub async fn sleep_or_cancel(
    delay: Duration,
    cancel: &CancellationToken,
) -> Result<(), ConnectorError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(ConnectorError::Cancelled),
        () = tokio::time::sleep(delay) => Ok(()),
    }
}

/// Executes an async operation under a bounded retry policy.
///
/// `policy.max_attempts` is the total number of invocations. The attempt
/// ordinal (1-based) is passed to `op` for logging. Non-transient errors
/// propagate immediately without spending attempts.
///
/// # Errors
///
/// Returns [`ConnectorError::RetryExhausted`] carrying the last error once
/// the budget is spent, any non-transient error from `op`, or
/// [`ConnectorError::Cancelled`] if a sleep is interrupted.
pub async fn with_retry<F, T, Fut>(
    operation: &str,
    policy: &BackoffPolicy,
    cancel: &CancellationToken,
    op: F,
) -> Result<T, ConnectorError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ConnectorError>>,
{
    with_retry_and_handler(operation, policy, cancel, op, |_| {}).await
}

/// Like [`with_retry`], calling `on_attempt` after every attempt.
///
/// # Errors
///
/// See [`with_retry`].
pub async fn with_retry_and_handler<F, T, Fut, H>(
    operation: &str,
    policy: &BackoffPolicy,
    cancel: &CancellationToken,
    mut op: F,
    mut on_attempt: H,
) -> Result<T, ConnectorError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ConnectorError>>,
    H: FnMut(RetryAttempt),
{
    let mut backoff = policy.backoff();
    let mut ordinal = 1;

    loop {
        match op(ordinal).await {
            Ok(value) => {
                on_attempt(RetryAttempt {
                    ordinal,
                    outcome: AttemptOutcome::Success,
                });
                return Ok(value);
            }
            Err(e) if !e.is_transient() => {
                on_attempt(RetryAttempt {
                    ordinal,
                    outcome: AttemptOutcome::Exhausted,
                });
                return Err(e);
            }
            Err(e) if ordinal >= policy.max_attempts => {
                on_attempt(RetryAttempt {
                    ordinal,
                    outcome: AttemptOutcome::Exhausted,
                });
                warn!(operation, attempts = ordinal, error = %e, "retries exhausted");
                return Err(ConnectorError::RetryExhausted {
                    operation: operation.to_string(),
                    attempts: ordinal,
                    last_error: Box::new(e),
                });
            }
            Err(e) => {
                on_attempt(RetryAttempt {
                    ordinal,
                    outcome: AttemptOutcome::RetryableFailure,
                });
                let delay = backoff.next_delay();
                #[allow(clippy::cast_possible_truncation)]
                let delay_ms = delay.as_millis() as u64;
                info!(
                    operation,
                    attempt = ordinal,
                    max_attempts = policy.max_attempts,
                    delay_ms,
                    error = %e,
                    "attempt failed, retrying"
                );
                sleep_or_cancel(delay, cancel).await?;
                ordinal += 1;
            }
        }
    }
}

/// Polls `probe` until it succeeds.
///
/// A transient error from the probe means "not ready yet": the loop checks
/// the budget, sleeps, grows the interval and probes again. One initial
/// probe is followed by at most `policy.max_attempts` sleep-and-probe
/// cycles. Non-transient errors end the loop immediately.
///
/// # Errors
///
/// Returns [`ConnectorError::RetryExhausted`] when the budget is spent,
/// any non-transient probe error, or [`ConnectorError::Cancelled`].
pub async fn poll_until<F, T, Fut>(
    operation: &str,
    policy: &BackoffPolicy,
    cancel: &CancellationToken,
    mut probe: F,
) -> Result<T, ConnectorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ConnectorError>>,
{
    let mut backoff = policy.backoff();
    let mut retries: u32 = 0;

    loop {
        match probe().await {
            Ok(value) => {
                debug!(operation, retries, "poll satisfied");
                return Ok(value);
            }
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) => {
                retries += 1;
                if retries > policy.max_attempts {
                    warn!(operation, max_attempts = policy.max_attempts, "polling exhausted");
                    return Err(ConnectorError::RetryExhausted {
                        operation: operation.to_string(),
                        attempts: policy.max_attempts,
                        last_error: Box::new(e),
                    });
                }
                let delay = backoff.next_delay();
                #[allow(clippy::cast_possible_truncation)]
                let delay_ms = delay.as_millis() as u64;
                info!(
                    operation,
                    retry = retries,
                    max_attempts = policy.max_attempts,
                    delay_ms,
                    reason = %e,
                    "not ready yet, waiting"
                );
                sleep_or_cancel(delay, cancel).await?;
            }
        }
    }
}
