//! # Signal: async auto-reset event with FIFO waiters.
//!
//! A [`Signal`] is either signaled or it has queued waiters, never both:
//! [`Signal::set`] hands the signal to the oldest waiter, or remembers a
//! single pending signal when nobody is waiting.
//!
//! ## Rules
//! - Each `set` releases at most one waiter (auto-reset).
//! - A waiter that loses the timeout race *after* `set` already claimed it
//!   still reports signaled; a handed-off signal is never reported lost,
//!   even if that means reporting success past the nominal timeout.
//! - Completion goes through the waiter's own executor queue; `set` never
//!   runs waiter continuations inline on its own stack.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::WorkError;

struct Waiter {
    id: u64,
    tx: oneshot::Sender<()>,
}

#[derive(Default)]
struct SignalInner {
    signaled: bool,
    next_id: u64,
    waiters: VecDeque<Waiter>,
}

/// Async condition-variable primitive (auto-reset event).
pub struct Signal {
    inner: Mutex<SignalInner>,
}

impl Signal {
    /// Creates a signal, optionally already signaled.
    pub fn new(signaled: bool) -> Self {
        Self {
            inner: Mutex::new(SignalInner {
                signaled,
                ..SignalInner::default()
            }),
        }
    }

    /// Waits until signaled, the timeout expires, or the token fires.
    ///
    /// Returns `Ok(true)` when the signal was consumed, `Ok(false)` on a
    /// true timeout (`None` = wait forever; a zero timeout probes without
    /// queueing). Cancellation yields `Err(WorkError::Canceled)` unless the
    /// signal had already been handed to this waiter, in which case the
    /// hand-off wins and `Ok(true)` is returned.
    pub async fn wait(
        &self,
        timeout: Option<Duration>,
        token: &CancellationToken,
    ) -> Result<bool, WorkError> {
        let (id, rx) = {
            let mut inner = self.inner.lock();
            if inner.signaled {
                inner.signaled = false;
                return Ok(true);
            }
            if timeout == Some(Duration::ZERO) {
                return Ok(false);
            }
            let (tx, rx) = oneshot::channel();
            inner.next_id += 1;
            let id = inner.next_id;
            inner.waiters.push_back(Waiter { id, tx });
            (id, rx)
        };

        tokio::select! {
            _ = rx => Ok(true),
            _ = sleep_opt(timeout) => {
                // Failed removal means `set` claimed this waiter while the
                // timeout was firing: the signal was handed off.
                Ok(!self.remove_waiter(id))
            }
            _ = token.cancelled() => {
                if self.remove_waiter(id) {
                    Err(WorkError::Canceled)
                } else {
                    Ok(true)
                }
            }
        }
    }

    /// Releases the oldest waiter, or remembers a single pending signal.
    pub fn set(&self) {
        let claimed = {
            let mut inner = self.inner.lock();
            match inner.waiters.pop_front() {
                Some(waiter) => Some(waiter),
                None => {
                    if !inner.signaled {
                        inner.signaled = true;
                    }
                    None
                }
            }
        };
        if let Some(waiter) = claimed {
            // The send wakes the waiter task on its executor; nothing of
            // the waiter's continuation runs on this stack.
            let _ = waiter.tx.send(());
        }
    }

    /// Forces the pending signal off without touching queued waiters.
    pub fn reset(&self) {
        self.inner.lock().signaled = false;
    }

    /// True when a signal is pending (best-effort read).
    pub fn is_signaled(&self) -> bool {
        self.inner.lock().signaled
    }

    fn remove_waiter(&self, id: u64) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.waiters.len();
        inner.waiters.retain(|waiter| waiter.id != id);
        inner.waiters.len() != before
    }
}

async fn sleep_opt(timeout: Option<Duration>) {
    match timeout {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}
