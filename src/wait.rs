//! Deadline-bounded polling shared by every asynchronous CloudControl action.
//!
//! Deployment, power changes and deletion all complete asynchronously on the
//! provider side. Each wait site supplies a fetch closure and a terminal-state
//! predicate; the loop re-fetches on a fixed interval until the predicate holds
//! or the deadline passes.

use std::future::Future;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::time::sleep;

/// Default interval between polls.
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Interval and deadline for a single wait.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WaitPolicy {
    /// Delay between successive fetches.
    pub interval: Duration,
    /// Total time allowed before the wait expires.
    pub timeout: Duration,
}

impl WaitPolicy {
    /// Builds a policy polling at [`POLL_INTERVAL`].
    #[must_use]
    pub const fn with_timeout(timeout: Duration) -> Self {
        Self {
            interval: POLL_INTERVAL,
            timeout,
        }
    }
}

/// Outcome of a wait that did not reach its terminal state.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum WaitError<E> {
    /// The fetch itself failed; the error is passed through unchanged.
    #[error(transparent)]
    Fetch(E),
    /// The deadline passed before the predicate held.
    #[error("deadline of {timeout:?} expired")]
    Expired {
        /// Timeout that elapsed.
        timeout: Duration,
    },
}

/// Polls `fetch` until `is_terminal` accepts its value or the policy expires.
///
/// The first fetch happens immediately. A final fetch is attempted at the
/// deadline so a state reached during the last sleep is still observed.
///
/// # Errors
///
/// Returns [`WaitError::Fetch`] as soon as `fetch` fails and
/// [`WaitError::Expired`] when the deadline passes first.
pub async fn poll_until<T, E, F, Fut, P>(
    policy: WaitPolicy,
    mut fetch: F,
    is_terminal: P,
) -> Result<T, WaitError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&T) -> bool,
{
    let deadline = Instant::now() + policy.timeout;
    loop {
        let value = fetch().await.map_err(WaitError::Fetch)?;
        if is_terminal(&value) {
            return Ok(value);
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(WaitError::Expired {
                timeout: policy.timeout,
            });
        }
        sleep(policy.interval.min(deadline - now)).await;
    }
}
