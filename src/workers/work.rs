//! # Work abstraction and function-backed implementation.
//!
//! This module defines the [`Work`] trait (async, cancelable) and a
//! convenient function-backed implementation [`WorkFn`]. The common handle
//! type is [`WorkRef`], an `Arc<dyn Work>` suitable for sharing across the
//! runtime.
//!
//! A work body receives an optional type-erased argument and a
//! [`CancellationToken`], and should check the token at its suspension
//! points to stop cooperatively.

use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::WorkError;

/// Type-erased argument passed through [`Worker::run`](crate::Worker::run)
/// to the work body.
pub type WorkArgs = Arc<dyn Any + Send + Sync>;

/// Shared handle to a work body (`Arc<dyn Work>`).
pub type WorkRef = Arc<dyn Work>;

/// Callback invoked after every execution, regardless of outcome.
pub type CompletionFn = Arc<dyn Fn(WorkOutcome) + Send + Sync>;

/// Outcome of one work execution, delivered to the completion callback.
///
/// `was_canceled` reflects the execution's own cancellation token at
/// completion time; it is a flag, not an error. `error` carries a captured
/// body failure (an `Err` return or a panic), never rethrown to the caller
/// that started the run.
#[derive(Debug)]
pub struct WorkOutcome {
    /// Captured body failure, if any.
    pub error: Option<WorkError>,
    /// True when cancellation was requested before the body finished.
    pub was_canceled: bool,
}

/// # Asynchronous, cancelable unit of work.
///
/// Implementors should regularly check the token and exit promptly during
/// shutdown; cancellation is cooperative.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use tokio_util::sync::CancellationToken;
/// use taskbus::{Work, WorkArgs, WorkError};
///
/// struct Demo;
///
/// #[async_trait]
/// impl Work for Demo {
///     async fn run(
///         &self,
///         _args: Option<WorkArgs>,
///         token: CancellationToken,
///     ) -> Result<(), WorkError> {
///         if token.is_cancelled() {
///             return Err(WorkError::Canceled);
///         }
///         // do work...
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Work: Send + Sync + 'static {
    /// Executes the body until completion or cancellation.
    async fn run(&self, args: Option<WorkArgs>, token: CancellationToken) -> Result<(), WorkError>;
}

/// Function-backed work implementation.
///
/// Wraps a closure that *creates* a new future per execution, so there is no
/// hidden state shared between runs; if shared state is needed, move an
/// `Arc<...>` into the closure explicitly.
///
/// ## Example
/// ```
/// use tokio_util::sync::CancellationToken;
/// use taskbus::{WorkArgs, WorkError, WorkFn, WorkRef};
///
/// let body: WorkRef = WorkFn::arc(|_args: Option<WorkArgs>, token: CancellationToken| async move {
///     if token.is_cancelled() {
///         return Err(WorkError::Canceled);
///     }
///     // do work...
///     Ok(())
/// });
/// # let _ = body;
/// ```
#[derive(Debug)]
pub struct WorkFn<F> {
    f: F,
}

impl<F> WorkFn<F> {
    /// Creates a new function-backed work body.
    ///
    /// Prefer [`WorkFn::arc`] when you immediately need a [`WorkRef`].
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Creates the body and returns it as a shared handle (`Arc<dyn Work>`).
    pub fn arc(f: F) -> Arc<Self> {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl<F, Fut> Work for WorkFn<F>
where
    F: Fn(Option<WorkArgs>, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), WorkError>> + Send + 'static,
{
    async fn run(&self, args: Option<WorkArgs>, token: CancellationToken) -> Result<(), WorkError> {
        (self.f)(args, token).await
    }
}
