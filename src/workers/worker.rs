//! # Worker: cancellable background execution with idempotent start.
//!
//! A [`Worker`] wraps one [`Work`](crate::Work) body with a cancellation
//! token and an
//! optional completion callback. Starting an already-busy worker returns
//! the existing in-flight handle instead of running the body twice.
//!
//! ## Execution flow
//! ```text
//! run(args)
//!   ├─► busy?     → return current WorkHandle (no second execution)
//!   ├─► disposed? → Err(RuntimeError::WorkerDisposed)
//!   └─► spawn body with fresh CancellationToken
//!           │
//!           └─► on finish (Ok / Err / panic / canceled):
//!                 ├─► clear busy (same generation only)
//!                 └─► completion callback ← WorkOutcome { error, was_canceled }
//! ```
//!
//! ## Rules
//! - The busy-flag transition is serialized under a short lock; the body
//!   runs off the caller's path via `tokio::spawn`.
//! - `cancel` is advisory: it requests cooperative cancellation and clears
//!   the busy flag immediately, without waiting for the body.
//! - Body failures and panics are captured into the [`WorkOutcome`]; the
//!   starter never sees them.
//! - `is_busy` reads are best-effort.

use std::any::Any;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{RuntimeError, WorkError};
use crate::workers::work::{CompletionFn, WorkArgs, WorkOutcome, WorkRef};

/// Multi-awaitable handle to a worker's in-flight execution.
///
/// Cloneable and safe to await from several places; resolves once the
/// current execution (including its completion callback) has finished.
pub type WorkHandle = Shared<BoxFuture<'static, ()>>;

/// Cancellable unit-of-work wrapper with at-most-one-concurrent-execution
/// semantics.
///
/// Workers are created through a
/// [`WorkerRegistry`](crate::WorkerRegistry), which tracks them for
/// shutdown.
pub struct Worker {
    work: WorkRef,
    on_complete: Option<CompletionFn>,
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    busy: bool,
    disposed: bool,
    /// Generation counter: a superseded execution (started before a
    /// cancel + restart) must not clear its successor's busy flag.
    epoch: u64,
    token: Option<CancellationToken>,
    handle: Option<WorkHandle>,
}

impl Worker {
    pub(crate) fn new(work: WorkRef, on_complete: Option<CompletionFn>) -> Self {
        Self {
            work,
            on_complete,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Starts the body if idle; returns the in-flight handle either way.
    ///
    /// Idempotent start: while an execution is in flight, further calls
    /// return the same handle and the body is not run again.
    ///
    /// Must be called within a Tokio runtime.
    ///
    /// # Errors
    /// [`RuntimeError::WorkerDisposed`] once [`Worker::dispose`] has been
    /// called.
    pub fn run(&self, args: Option<WorkArgs>) -> Result<WorkHandle, RuntimeError> {
        let mut inner = self.inner.lock();
        if inner.disposed {
            return Err(RuntimeError::WorkerDisposed);
        }
        if inner.busy {
            if let Some(handle) = inner.handle.clone() {
                return Ok(handle);
            }
        }
        inner.busy = true;
        inner.epoch += 1;
        let epoch = inner.epoch;

        let token = CancellationToken::new();
        inner.token = Some(token.clone());

        let work = Arc::clone(&self.work);
        let on_complete = self.on_complete.clone();
        let state = Arc::clone(&self.inner);
        let join = tokio::spawn(async move {
            let result = std::panic::AssertUnwindSafe(work.run(args, token.clone()))
                .catch_unwind()
                .await;
            let error = match result {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(err),
                Err(panic) => Some(WorkError::Failed {
                    error: panic_message(panic.as_ref()),
                }),
            };
            let was_canceled = token.is_cancelled();
            {
                let mut inner = state.lock();
                if inner.epoch == epoch {
                    inner.busy = false;
                }
            }
            if let Some(callback) = on_complete {
                callback(WorkOutcome { error, was_canceled });
            }
        });

        let handle: WorkHandle = async move {
            let _ = join.await;
        }
        .boxed()
        .shared();
        inner.handle = Some(handle.clone());
        Ok(handle)
    }

    /// Requests cooperative cancellation of the current execution.
    ///
    /// Clears the busy flag immediately whether or not the body observes
    /// the token; callers that need the body gone must [`Worker::wait`].
    pub fn cancel(&self) {
        let mut inner = self.inner.lock();
        if let Some(token) = &inner.token {
            token.cancel();
        }
        inner.busy = false;
    }

    /// True while an execution is in flight (best-effort read).
    pub fn is_busy(&self) -> bool {
        self.inner.lock().busy
    }

    /// True when cancellation was requested, or the worker never started.
    pub fn is_canceled(&self) -> bool {
        match &self.inner.lock().token {
            Some(token) => token.is_cancelled(),
            None => true,
        }
    }

    /// Permanently disables future [`Worker::run`] calls.
    pub fn dispose(&self) {
        self.inner.lock().disposed = true;
    }

    /// Handle to the current (or last) execution, if any.
    pub fn handle(&self) -> Option<WorkHandle> {
        self.inner.lock().handle.clone()
    }

    /// Resolves when the current execution completes; no-op if the worker
    /// was never started.
    pub async fn wait(&self) {
        let handle = self.handle();
        if let Some(handle) = handle {
            handle.await;
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "work body panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workers::work::WorkFn;
    use parking_lot::Mutex as PlMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn counting_body(counter: Arc<AtomicUsize>) -> WorkRef {
        WorkFn::arc(move |_args: Option<WorkArgs>, _token: CancellationToken| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    }

    #[tokio::test]
    async fn test_run_while_busy_executes_body_once() {
        let executions = Arc::new(AtomicUsize::new(0));
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let release_rx = Arc::new(PlMutex::new(Some(release_rx)));

        let executions_in_body = Arc::clone(&executions);
        let worker = Worker::new(
            WorkFn::arc(move |_args: Option<WorkArgs>, _token: CancellationToken| {
                let executions = Arc::clone(&executions_in_body);
                let release = release_rx.lock().take();
                async move {
                    executions.fetch_add(1, Ordering::SeqCst);
                    if let Some(release) = release {
                        let _ = release.await;
                    }
                    Ok(())
                }
            }),
            None,
        );

        let first = worker.run(None).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(worker.is_busy());
        let second = worker.run(None).unwrap();

        let _ = release_tx.send(());
        first.await;
        second.await;

        assert_eq!(executions.load(Ordering::SeqCst), 1);
        assert!(!worker.is_busy());
    }

    #[tokio::test]
    async fn test_completion_callback_receives_captured_error() {
        let outcome = Arc::new(PlMutex::new(None));
        let sink = Arc::clone(&outcome);
        let worker = Worker::new(
            WorkFn::arc(|_args: Option<WorkArgs>, _token: CancellationToken| async move {
                Err(WorkError::failed("boom"))
            }),
            Some(Arc::new(move |result: WorkOutcome| {
                *sink.lock() = Some(result);
            })),
        );

        worker.run(None).unwrap().await;

        let outcome = outcome.lock().take().unwrap();
        assert!(matches!(outcome.error, Some(WorkError::Failed { .. })));
        assert!(!outcome.was_canceled);
    }

    #[tokio::test]
    async fn test_completion_callback_captures_panic() {
        let outcome = Arc::new(PlMutex::new(None));
        let sink = Arc::clone(&outcome);
        let worker = Worker::new(
            WorkFn::arc(|_args: Option<WorkArgs>, _token: CancellationToken| async move {
                if true {
                    panic!("blew up");
                }
                Ok(())
            }),
            Some(Arc::new(move |result: WorkOutcome| {
                *sink.lock() = Some(result);
            })),
        );

        worker.run(None).unwrap().await;

        let outcome = outcome.lock().take().unwrap();
        match outcome.error {
            Some(WorkError::Failed { error }) => assert!(error.contains("blew up")),
            other => panic!("expected captured panic, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancel_reports_canceled_outcome() {
        let outcome = Arc::new(PlMutex::new(None));
        let sink = Arc::clone(&outcome);
        let worker = Worker::new(
            WorkFn::arc(|_args: Option<WorkArgs>, token: CancellationToken| async move {
                loop {
                    crate::time::delay(Duration::from_millis(5), &token).await?;
                }
            }),
            Some(Arc::new(move |result: WorkOutcome| {
                *sink.lock() = Some(result);
            })),
        );

        let handle = worker.run(None).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        worker.cancel();
        assert!(!worker.is_busy());
        handle.await;

        let outcome = outcome.lock().take().unwrap();
        assert!(outcome.was_canceled);
    }

    #[tokio::test]
    async fn test_run_after_dispose_fails() {
        let counter = Arc::new(AtomicUsize::new(0));
        let worker = Worker::new(counting_body(Arc::clone(&counter)), None);
        worker.dispose();

        let result = worker.run(None);
        assert!(matches!(result, Err(RuntimeError::WorkerDisposed)));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_wait_is_noop_when_never_started() {
        let worker = Worker::new(counting_body(Arc::new(AtomicUsize::new(0))), None);
        worker.wait().await;
        assert!(!worker.is_busy());
        assert!(worker.is_canceled());
    }
}
