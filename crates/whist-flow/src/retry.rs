//! # Bounded retry
//!
//! Runs an operation under a [`RetryPolicy`]. The operation classifies each
//! attempt itself: [`AttemptOutcome::Retry`] schedules another attempt,
//! [`AttemptOutcome::Fail`] stops immediately.
//!
//! The attempt counter is local to one [`retry`] call, so concurrent callers
//! never share state. Cancelling the token aborts the in-flight attempt and
//! any pending delay; no request is issued after cancellation or exhaustion.

use std::future::Future;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use whist_core::RetryPolicy;

/// How one attempt ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttemptOutcome<T, E> {
    Done(T),
    /// Transient failure, worth another attempt.
    Retry(E),
    /// Permanent failure, never retried.
    Fail(E),
}

/// Why [`retry`] gave up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RetryFailure<E> {
    /// Every attempt failed transiently; carries the last error.
    Exhausted(E),
    /// An attempt failed permanently.
    Rejected(E),
    /// The token was cancelled; carries the last error, if any attempt finished.
    Cancelled(Option<E>),
    /// The policy's wall-clock ceiling would be exceeded by waiting again.
    DeadlineExceeded(E),
}

impl<E> RetryFailure<E> {
    /// The last error observed.
    pub fn into_error(self) -> Option<E> {
        match self {
            Self::Exhausted(e) | Self::Rejected(e) | Self::DeadlineExceeded(e) => Some(e),
            Self::Cancelled(e) => e,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

/// Result of a [`retry`] run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, RetryFailure<E>>,
    /// Attempts started (1-based).
    pub attempts: u32,
}

/// Run `op` until it succeeds, fails permanently, or the policy gives up.
///
/// `op` receives the 1-based attempt number.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> RetryOutcome<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = AttemptOutcome<T, E>>,
    E: std::fmt::Display,
{
    let started = Instant::now();
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;
    let mut last: Option<E> = None;

    let give_up = |result, attempts| RetryOutcome { result: Err(result), attempts };

    loop {
        if cancel.is_cancelled() {
            return give_up(RetryFailure::Cancelled(last), attempt);
        }
        attempt += 1;

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(attempt, "retry cancelled mid-attempt");
                return give_up(RetryFailure::Cancelled(last), attempt);
            }
            outcome = op(attempt) => outcome,
        };

        let err = match outcome {
            AttemptOutcome::Done(value) => {
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt,
                };
            }
            AttemptOutcome::Fail(err) => {
                debug!(attempt, error = %err, "attempt rejected, not retrying");
                return give_up(RetryFailure::Rejected(err), attempt);
            }
            AttemptOutcome::Retry(err) => err,
        };

        if attempt >= max_attempts {
            warn!(attempts = attempt, error = %err, "retry attempts exhausted");
            return give_up(RetryFailure::Exhausted(err), attempt);
        }

        let delay = policy.delay_for(attempt);
        if let Some(ceiling) = policy.max_elapsed() {
            if started.elapsed() + delay > ceiling {
                warn!(attempts = attempt, error = %err, "retry deadline exceeded");
                return give_up(RetryFailure::DeadlineExceeded(err), attempt);
            }
        }

        debug!(
            attempt,
            max_attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %err,
            "attempt failed, retrying"
        );
        last = Some(err);

        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = cancel.cancelled() => {
                debug!(attempt, "retry cancelled during backoff");
                return give_up(RetryFailure::Cancelled(last), attempt);
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
