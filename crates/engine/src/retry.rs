//! Bounded retry with exponential backoff and jitter for remote operations.
//!
//! The runner wraps any async operation whose error type can classify itself
//! as transient or permanent. Transient faults (network, timeout, rate limit,
//! server errors) are retried with growing, jittered delays; permanent
//! failures and logical conflicts propagate immediately.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tracing::{debug, warn};

use tasksync_storage::FaultClass;

/// Multiplicative jitter band applied to every backoff delay, so a fleet of
/// clients hitting the same outage does not retry in lockstep.
pub const JITTER_BAND: f64 = 0.25;

/// Backoff configuration for one logical operation.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; 0 means exactly one attempt.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(10),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Exponential delay for a 1-based attempt number, before jitter,
    /// clamped to `max_delay`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let millis = self.initial_delay.as_millis() as f64 * self.backoff_factor.powi(exponent as i32);
        let clamped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(clamped.max(0.0) as u64)
    }

    /// Applies the ±25% jitter, clamped to `max_delay`. The multiplier keeps
    /// the result non-negative.
    pub fn jittered(&self, base: Duration) -> Duration {
        let factor = rand::thread_rng().gen_range(1.0 - JITTER_BAND..=1.0 + JITTER_BAND);
        base.mul_f64(factor).min(self.max_delay)
    }
}

/// Observation and veto hooks for one retry run.
pub struct RetryHooks<'a, E> {
    /// Called before each backoff sleep with (attempt, error, chosen delay).
    pub on_retry: Option<&'a (dyn Fn(u32, &E, Duration) + Send + Sync)>,
    /// Extra veto ANDed with the fault classifier; both must agree to retry.
    pub should_retry: Option<&'a (dyn Fn(&E) -> bool + Send + Sync)>,
}

impl<E> Default for RetryHooks<'_, E> {
    fn default() -> Self {
        Self {
            on_retry: None,
            should_retry: None,
        }
    }
}

/// Why a retry run stopped without success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiveUpReason {
    /// The error class can never be fixed by retrying.
    NonRetryable,
    /// Retries were allowed but the attempt budget ran out.
    Exhausted,
}

impl fmt::Display for GiveUpReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GiveUpReason::NonRetryable => write!(f, "non-retryable"),
            GiveUpReason::Exhausted => write!(f, "exhausted"),
        }
    }
}

/// Terminal outcome of a retry run, carrying the last error observed and how
/// many attempts were made.
#[derive(Debug, Error)]
#[error("{op} gave up after {attempts} attempt(s), {reason}: {source}")]
pub struct GaveUp<E: std::error::Error + 'static> {
    pub op: &'static str,
    pub attempts: u32,
    pub reason: GiveUpReason,
    pub source: E,
}

/// Runs `attempt_fn` until it succeeds, fails permanently, or exhausts the
/// attempt budget (`max_retries + 1` attempts in total).
///
/// Backoff delays suspend only this call chain; concurrent operations keep
/// making progress.
pub async fn run_with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    op: &'static str,
    hooks: RetryHooks<'_, E>,
    mut attempt_fn: F,
) -> Result<T, GaveUp<E>>
where
    E: std::error::Error + FaultClass + 'static,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt: u32 = 1;
    loop {
        match attempt_fn().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(op, attempt, "operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) => {
                let retryable =
                    error.is_transient() && hooks.should_retry.is_none_or(|veto| veto(&error));
                if !retryable {
                    return Err(GaveUp {
                        op,
                        attempts: attempt,
                        reason: GiveUpReason::NonRetryable,
                        source: error,
                    });
                }
                if attempt > policy.max_retries {
                    warn!(op, attempts = attempt, error = %error, "retries exhausted");
                    return Err(GaveUp {
                        op,
                        attempts: attempt,
                        reason: GiveUpReason::Exhausted,
                        source: error,
                    });
                }
                let delay = policy.jittered(policy.base_delay(attempt));
                if let Some(observe) = hooks.on_retry {
                    observe(attempt, &error, delay);
                }
                warn!(
                    op,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "transient fault, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
