//! Error types used by the taskbus runtime and work bodies.
//!
//! This module defines the error surface of the crate:
//!
//! - [`WorkError`] — failures raised by individual work executions.
//! - [`RuntimeError`] — failures raised by the lifecycle runtime itself.
//! - [`PublishError`] — aggregate of handler failures from one publish call.
//!
//! The enums provide helper methods (`as_label`, `as_message`) for
//! logging/metrics.
//!
//! ## Rules
//! - A [`WorkError`] never escapes a worker's `run` call; it is delivered
//!   through the completion callback instead.
//! - [`RuntimeError::CleanupTimeout`] is the only error in this crate that is
//!   allowed to escalate out of a shutdown sequence.

use std::time::Duration;

use thiserror::Error;

/// Boxed failure produced by a single event handler.
///
/// Handlers return whatever error type they like; the bus only needs to
/// carry it across the dispatch sweep.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// # Errors produced by work execution.
///
/// These represent outcomes of a single work body. They are captured by the
/// worker and reported through [`WorkOutcome`](crate::WorkOutcome), never
/// rethrown to whoever started the run.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum WorkError {
    /// The body observed cancellation and stopped cooperatively.
    #[error("work canceled")]
    Canceled,

    /// The body failed (returned an error or panicked).
    #[error("execution failed: {error}")]
    Failed {
        /// The underlying error message.
        error: String,
    },
}

impl WorkError {
    /// Creates a [`WorkError::Failed`] from any displayable error.
    pub fn failed(error: impl ToString) -> Self {
        WorkError::Failed {
            error: error.to_string(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use taskbus::WorkError;
    ///
    /// assert_eq!(WorkError::Canceled.as_label(), "work_canceled");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            WorkError::Canceled => "work_canceled",
            WorkError::Failed { .. } => "work_failed",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            WorkError::Canceled => "work canceled".to_string(),
            WorkError::Failed { error } => format!("error: {error}"),
        }
    }
}

/// # Errors produced by the taskbus runtime.
///
/// These represent failures in the lifecycle machinery itself, as opposed to
/// failures of the work bodies it runs.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// `run` was called on a worker after `dispose`.
    #[error("worker has been disposed")]
    WorkerDisposed,

    /// Registry shutdown found workers that did not finish within the
    /// cleanup timeout. A background loop that ignores cancellation cannot
    /// be safely ignored, so this propagates out of `shutdown`.
    #[error("{lingering} worker(s) did not finish within cleanup timeout {timeout:?}")]
    CleanupTimeout {
        /// The configured cleanup timeout.
        timeout: Duration,
        /// Number of workers still running when the timeout expired.
        lingering: usize,
    },
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use taskbus::RuntimeError;
    ///
    /// assert_eq!(RuntimeError::WorkerDisposed.as_label(), "worker_disposed");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::WorkerDisposed => "worker_disposed",
            RuntimeError::CleanupTimeout { .. } => "cleanup_timeout",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            RuntimeError::WorkerDisposed => "worker has been disposed".to_string(),
            RuntimeError::CleanupTimeout { timeout, lingering } => {
                format!("{lingering} lingering worker(s) after {timeout:?}")
            }
        }
    }
}

/// # Aggregate of handler failures from one publish call.
///
/// Raised only after every matching handler has been attempted, so one
/// failing subscriber never starves the rest.
#[derive(Error, Debug)]
#[error("{} handler(s) failed during publish", .failures.len())]
pub struct PublishError {
    /// One entry per failed handler, in dispatch order.
    pub failures: Vec<HandlerError>,
}
