//! Cancellation-aware time helpers.
//!
//! Background loops in this crate suspend on [`delay`] instead of a bare
//! sleep: the wait races the cancellation token, and cancellation surfaces
//! as [`WorkError::Canceled`] so a loop body can exit with `?` at any
//! suspension point.
//!
//! [`wait_until`] is a polling helper for conditions that have no waitable
//! handle of their own (also handy in tests).

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::WorkError;

/// Sleeps for `duration` unless `token` is cancelled first.
///
/// Returns `Err(WorkError::Canceled)` when the token wins the race, so the
/// caller's `?` unwinds the surrounding loop cooperatively.
pub async fn delay(duration: Duration, token: &CancellationToken) -> Result<(), WorkError> {
    tokio::select! {
        _ = tokio::time::sleep(duration) => Ok(()),
        _ = token.cancelled() => Err(WorkError::Canceled),
    }
}

/// Polls `condition` every `check_interval` until it returns true or
/// `timeout` expires.
///
/// Returns true when the condition was observed true, false on expiry.
pub async fn wait_until<F>(mut condition: F, timeout: Duration, check_interval: Duration) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(check_interval).await;
    }
}
