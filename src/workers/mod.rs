//! # Worker abstractions and lifecycle tracking.
//!
//! This module provides the core execution types:
//! - [`Work`] - trait for implementing async cancelable work bodies
//! - [`WorkFn`] - function-backed implementation
//! - [`WorkRef`] - shared reference to a body (`Arc<dyn Work>`)
//! - [`Worker`] - cancellable wrapper with idempotent start
//! - [`WorkerRegistry`] - weak-reference tracking and shutdown

mod registry;
mod work;
mod worker;

pub use registry::WorkerRegistry;
pub use work::{CompletionFn, Work, WorkArgs, WorkFn, WorkOutcome, WorkRef};
pub use worker::{WorkHandle, Worker};
