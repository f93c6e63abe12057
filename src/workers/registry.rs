//! # Worker registry: weak-reference lifecycle tracking and shutdown.
//!
//! The [`WorkerRegistry`] creates workers, remembers them through weak
//! references tagged with an owner id, and tears them down at shutdown.
//!
//! ## Architecture
//! ```text
//! create_worker(work, on_complete, owner)
//!     ├─► Arc<Worker> returned to the caller (the only strong reference)
//!     ├─► Weak<Worker> + owner recorded
//!     └─► dead entries swept opportunistically (O(n))
//!
//! shutdown()
//!     ├─► snapshot + clear the registry
//!     ├─► per live worker: dispose + cancel (unless already canceled)
//!     ├─► race its handle against cleanup_timeout
//!     └─► any worker over the timeout → Err(CleanupTimeout { .. })
//! ```
//!
//! ## Rules
//! - The registry never extends a worker's lifetime; dropping the returned
//!   `Arc<Worker>` is enough to retire an idle worker.
//! - Workers already canceled before shutdown are not reported as cleaned
//!   up.
//! - The cleanup timeout escalating out of `shutdown` is intentional: a
//!   loop that ignores its token past the timeout cannot be safely ignored.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::RuntimeError;
use crate::workers::work::{CompletionFn, WorkRef};
use crate::workers::worker::Worker;

/// Default wait for each worker to finish during shutdown.
const CLEANUP_TIMEOUT: Duration = Duration::from_millis(1500);

struct WorkerEntry {
    worker: Weak<Worker>,
    owner: String,
}

impl WorkerEntry {
    fn is_dead(&self) -> bool {
        self.worker.strong_count() == 0
    }
}

/// Creates and tracks [`Worker`]s for orderly shutdown.
///
/// The registry holds only weak references; entries whose worker has been
/// dropped are pruned lazily on each [`WorkerRegistry::create_worker`]
/// call.
pub struct WorkerRegistry {
    workers: Mutex<Vec<WorkerEntry>>,
    cleanup_timeout: Duration,
}

impl WorkerRegistry {
    /// Creates a registry with the default cleanup timeout (1.5 s).
    pub fn new() -> Self {
        Self {
            workers: Mutex::new(Vec::new()),
            cleanup_timeout: CLEANUP_TIMEOUT,
        }
    }

    /// Overrides how long [`WorkerRegistry::shutdown`] waits per worker.
    pub fn with_cleanup_timeout(mut self, timeout: Duration) -> Self {
        self.cleanup_timeout = timeout;
        self
    }

    /// Builds a worker, registers it under `owner`, and sweeps dead
    /// entries.
    ///
    /// `owner` is an opaque diagnostic string naming whoever requested the
    /// worker; it shows up in [`WorkerRegistry::alive_owners`] and in
    /// shutdown logs.
    pub fn create_worker(
        &self,
        work: WorkRef,
        on_complete: Option<CompletionFn>,
        owner: impl Into<String>,
    ) -> Arc<Worker> {
        let worker = Arc::new(Worker::new(work, on_complete));
        let mut workers = self.workers.lock();
        workers.push(WorkerEntry {
            worker: Arc::downgrade(&worker),
            owner: owner.into(),
        });
        workers.retain(|entry| !entry.is_dead());
        worker
    }

    /// Builds a worker with no completion callback and starts it
    /// immediately.
    ///
    /// Convenience for fire-and-forget background loops; the returned
    /// handle is the only strong reference keeping the worker alive.
    pub fn start_worker(&self, work: WorkRef, owner: impl Into<String>) -> Arc<Worker> {
        let worker = self.create_worker(work, None, owner);
        // A freshly created worker cannot be disposed yet.
        let _ = worker.run(None);
        worker
    }

    /// Owner ids of workers that are still alive, for diagnostics/tests.
    pub fn alive_owners(&self) -> Vec<String> {
        self.workers
            .lock()
            .iter()
            .filter(|entry| !entry.is_dead())
            .map(|entry| entry.owner.clone())
            .collect()
    }

    /// Disposes and cancels every tracked worker, waiting up to the
    /// cleanup timeout for each.
    ///
    /// The registry is cleared first, so workers created after this call
    /// belong to a fresh generation.
    ///
    /// # Errors
    /// [`RuntimeError::CleanupTimeout`] when at least one worker was still
    /// running after its timeout; every worker is swept before the error
    /// is raised.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        let entries: Vec<WorkerEntry> = {
            let mut workers = self.workers.lock();
            std::mem::take(&mut *workers)
        };

        let mut lingering = 0usize;
        for entry in entries {
            let Some(worker) = entry.worker.upgrade() else {
                continue;
            };

            let was_canceled = worker.is_canceled();
            if !was_canceled {
                worker.dispose();
                worker.cancel();
            }

            let Some(handle) = worker.handle() else {
                continue;
            };
            if tokio::time::timeout(self.cleanup_timeout, handle).await.is_err() {
                tracing::error!(
                    owner = %entry.owner,
                    timeout = ?self.cleanup_timeout,
                    "worker did not finish within the cleanup timeout"
                );
                lingering += 1;
            }
            if !was_canceled {
                tracing::warn!(owner = %entry.owner, "cleaned up worker");
            }
        }

        if lingering > 0 {
            return Err(RuntimeError::CleanupTimeout {
                timeout: self.cleanup_timeout,
                lingering,
            });
        }
        Ok(())
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workers::work::{WorkArgs, WorkFn};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn cooperative_loop() -> WorkRef {
        WorkFn::arc(|_args: Option<WorkArgs>, token: CancellationToken| async move {
            loop {
                crate::time::delay(Duration::from_millis(5), &token).await?;
            }
        })
    }

    #[tokio::test]
    async fn test_alive_owners_tracks_live_workers() {
        let registry = WorkerRegistry::new();
        let _keep = registry.create_worker(cooperative_loop(), None, "kept");
        {
            let dropped = registry.create_worker(cooperative_loop(), None, "dropped");
            drop(dropped);
        }
        // The dead entry is swept on the next create.
        let _other = registry.create_worker(cooperative_loop(), None, "other");

        let owners = registry.alive_owners();
        assert!(owners.contains(&"kept".to_string()));
        assert!(owners.contains(&"other".to_string()));
        assert!(!owners.contains(&"dropped".to_string()));
    }

    #[tokio::test]
    async fn test_shutdown_stops_cooperative_worker() {
        let registry = WorkerRegistry::new();
        let worker = registry.create_worker(cooperative_loop(), None, "loop");
        worker.run(None).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        registry.shutdown().await.unwrap();
        assert!(!worker.is_busy());
        assert!(worker.run(None).is_err());
    }

    #[tokio::test]
    async fn test_shutdown_raises_for_worker_ignoring_cancellation() {
        let registry = WorkerRegistry::new().with_cleanup_timeout(Duration::from_millis(50));
        let stuck = WorkFn::arc(|_args: Option<WorkArgs>, _token: CancellationToken| async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        });
        let worker = registry.create_worker(stuck, None, "stuck");
        worker.run(None).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        match registry.shutdown().await {
            Err(RuntimeError::CleanupTimeout { lingering, .. }) => assert_eq!(lingering, 1),
            other => panic!("expected cleanup timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_shutdown_is_clean_when_body_finishes_in_time() {
        let registry = WorkerRegistry::new();
        let body = WorkFn::arc(|_args: Option<WorkArgs>, _token: CancellationToken| async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok(())
        });
        let worker = registry.create_worker(body, None, "quick");
        worker.run(None).unwrap();

        registry.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_worker_runs_body_once() {
        let registry = WorkerRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let in_body = Arc::clone(&counter);
        let worker = registry.start_worker(
            WorkFn::arc(move |_args: Option<WorkArgs>, _token: CancellationToken| {
                let counter = Arc::clone(&in_body);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
            "one-shot",
        );

        worker.wait().await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(registry.alive_owners(), vec!["one-shot".to_string()]);
    }
}
