//! # taskbus
//!
//! **Taskbus** is a lightweight task-lifecycle and event-dispatch library
//! for async Rust.
//!
//! It provides cancellable background workers, periodic scheduling with
//! safe restart, async coordination primitives, and a weak-reference
//! publish/subscribe bus. The crate is designed as a building block for
//! applications that run many small background loops and need them gone,
//! verifiably, at shutdown.
//!
//! ## Architecture
//! ```text
//!   ┌─────────────────┐      creates / tracks (weak)      ┌──────────────┐
//!   │ WorkerRegistry  │ ────────────────────────────────► │    Worker    │
//!   │  - owner ids    │                                   │  - Work body │
//!   │  - shutdown()   │                                   │  - token     │
//!   └────────┬────────┘                                   │  - callback  │
//!            │                                            └──────▲───────┘
//!            │ shutdown: dispose + cancel,                       │ hosts loop
//!            │ race handle vs cleanup timeout            ┌───────┴───────┐
//!            ▼                                           │   Scheduler   │
//!   Err(CleanupTimeout) when a loop ignores its token    │ due/interval  │
//!                                                        │ restart/pause │
//!                                                        └───────────────┘
//!
//!   ┌──────────────┐   publish(msg)   ┌───────────────────────────────────┐
//!   │  application │ ───────────────► │ EventBus                          │
//!   │     code     │                  │  - Weak<subscriber> + TypeId map  │
//!   └──────────────┘                  │  - sync handlers: inline sweep    │
//!                                     │  - async handlers: await / spawn  │
//!                                     └───────────────────────────────────┘
//!
//!   Signal (auto-reset event) and DeferredValue (re-armable promise) are
//!   independent coordination primitives used inside workers and handlers.
//! ```
//!
//! ## Features
//! | Area           | Description                                                    | Key types                        |
//! |----------------|----------------------------------------------------------------|----------------------------------|
//! | **Workers**    | Cancellable one-at-a-time background execution.                | [`Worker`], [`Work`], [`WorkFn`] |
//! | **Lifecycle**  | Weak-reference tracking, owner ids, shutdown with timeout.     | [`WorkerRegistry`]               |
//! | **Scheduling** | Due-time + interval ticks, pause, coalesced restart.           | [`Scheduler`]                    |
//! | **Dispatch**   | Weak-subscriber pub/sub, sync/async handlers, base-type routes.| [`EventBus`], [`Message`]        |
//! | **Sync**       | Auto-reset event and single-slot promise.                      | [`Signal`], [`DeferredValue`]    |
//! | **Errors**     | Typed errors for bodies, lifecycle, and publishing.            | [`WorkError`], [`RuntimeError`]  |
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use taskbus::{EventBus, HandlerError, Message, WorkArgs, WorkFn, WorkerRegistry};
//!
//! struct BackupDone;
//! impl Message for BackupDone {}
//!
//! struct Console;
//! fn on_backup(_console: &Console, _message: &BackupDone) -> Result<(), HandlerError> {
//!     println!("backup finished");
//!     Ok(())
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = Arc::new(WorkerRegistry::new());
//!     let bus = Arc::new(EventBus::new());
//!
//!     let console = Arc::new(Console);
//!     bus.subscribe(&console, on_backup);
//!
//!     let publish_bus = Arc::clone(&bus);
//!     let worker = registry.create_worker(
//!         WorkFn::arc(move |_args: Option<WorkArgs>, token: CancellationToken| {
//!             let bus = Arc::clone(&publish_bus);
//!             async move {
//!                 taskbus::delay(Duration::from_millis(10), &token).await?;
//!                 let _ = bus.publish(BackupDone);
//!                 Ok(())
//!             }
//!         }),
//!         None,
//!         "backup",
//!     );
//!
//!     worker.run(None)?.await;
//!     registry.shutdown().await?;
//!     Ok(())
//! }
//! ```

mod error;
mod events;
mod scheduler;
mod sync;
mod time;
mod workers;

// ---- Public re-exports ----

pub use error::{HandlerError, PublishError, RuntimeError, WorkError};
pub use events::{EventBus, Marshaller, Message, Route, SpawnHook};
pub use scheduler::Scheduler;
pub use sync::{DeferredValue, Signal};
pub use time::{delay, wait_until};
pub use workers::{
    CompletionFn, Work, WorkArgs, WorkFn, WorkHandle, WorkOutcome, WorkRef, Worker, WorkerRegistry,
};
