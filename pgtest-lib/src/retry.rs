//! The readiness/connect retry loop, ported from
//! `examples/original_source/database.go`'s `connect()` and generalized
//! over [`Pinger`] so it can be driven by a fake in tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::collaborators::Pinger;

const MAX_ATTEMPTS: usize = 100;

#[derive(thiserror::Error, Debug)]
pub enum RetryError {
    #[error("server did not become ready after {attempts} attempts")]
    Exhausted { attempts: usize, #[source] source: Box<dyn std::error::Error + Send + Sync> },
    #[error("wait for readiness was cancelled after {attempts} attempts")]
    Cancelled { attempts: usize },
}

/// A shared flag a caller can set from another thread to abort a
/// [`wait_until_ready`] loop early, e.g. when the server process has
/// already been observed to exit.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The sleep duration before attempt number `attempt` (1-indexed): 25ms for
/// the first 19 retries, 25ms again for the next 19, then 100ms for the
/// rest, up to [`MAX_ATTEMPTS`] attempts total.
fn backoff_for_attempt(attempt: usize) -> Duration {
    if attempt <= 38 {
        Duration::from_millis(25)
    } else {
        Duration::from_millis(100)
    }
}

/// Repeatedly ping `dsn` until it succeeds, the attempt budget is
/// exhausted, or `cancel` is set. The first attempt happens immediately,
/// with no sleep beforehand.
pub fn wait_until_ready(
    pinger: &dyn Pinger,
    dsn: &str,
    cancel: &CancelToken,
) -> Result<(), RetryError> {
    retry_with_backoff(|| pinger.ping(dsn), cancel)
}

/// Repeatedly call `attempt` until it succeeds, the attempt budget is
/// exhausted, or `cancel` is set, on the same backoff ramp
/// [`wait_until_ready`] uses. The first attempt happens immediately, with
/// no sleep beforehand.
pub fn retry_with_backoff<T, E, F>(mut attempt_fn: F, cancel: &CancelToken) -> Result<T, RetryError>
where
    F: FnMut() -> Result<T, E>,
    E: std::error::Error + Send + Sync + 'static,
{
    let mut last_error: Option<Box<dyn std::error::Error + Send + Sync>> = None;
    for attempt in 1..=MAX_ATTEMPTS {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled { attempts: attempt - 1 });
        }
        match attempt_fn() {
            Ok(value) => return Ok(value),
            Err(err) => last_error = Some(Box::new(err)),
        }
        if attempt == MAX_ATTEMPTS {
            break;
        }
        std::thread::sleep(backoff_for_attempt(attempt));
    }
    Err(RetryError::Exhausted {
        attempts: MAX_ATTEMPTS,
        source: last_error.unwrap_or_else(|| "no attempts were made".into()),
    })
}
