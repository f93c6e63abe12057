//! # Scheduler: due-time + interval periodic execution over a worker.
//!
//! The [`Scheduler`] drives a handler on a timer loop hosted in a
//! [`Worker`]: wait the due time (or one interval when only the interval is
//! configured), then tick until canceled. `None` timing means infinite; an
//! infinite interval makes the loop one-shot.
//!
//! ## State machine
//! ```text
//! Stopped ──start()──► Scheduled(enabled)
//!    ▲                      │  ▲
//!    │                   pause()│ start()
//!  stop()                   ▼  │
//!    └───────────── Scheduled(disabled)
//! ```
//!
//! ## Rules
//! - A tick body is never invoked concurrently with itself: the loop awaits
//!   one invocation before scheduling the next delay.
//! - `pause` is cooperative: the loop keeps running and skips invocations.
//! - `restart` stops the current worker, updates the timing fields, then
//!   hands the rest to a separate scheduling task (awaiting inline could
//!   deadlock when called from inside the tick handler). Concurrent
//!   restarts coalesce: the pending task picks up the freshest fields, and
//!   no second task is scheduled.
//! - Handler failures are logged as an unexpected stop; a stop caused by
//!   cancellation is expected and stays quiet.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::WorkError;
use crate::time::delay;
use crate::workers::{CompletionFn, Work, WorkArgs, WorkOutcome, Worker, WorkerRegistry};

/// Default wait for the previous run to finish during a restart.
const RESTART_GRACE: Duration = Duration::from_secs(60);

type TickFn = Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, Result<(), WorkError>> + Send + Sync>;

#[derive(Clone, Copy)]
struct Timing {
    due: Option<Duration>,
    interval: Option<Duration>,
}

impl Timing {
    fn is_finite(&self) -> bool {
        self.due.is_some() || self.interval.is_some()
    }
}

struct TickShared {
    enabled: AtomicBool,
    timing: Mutex<Timing>,
    handler: TickFn,
}

/// The loop body hosted in the scheduler's worker.
///
/// Re-reads the timing fields on every lap so a restart's updates take
/// effect without rebuilding the closure.
struct TickLoop {
    shared: Arc<TickShared>,
}

#[async_trait]
impl Work for TickLoop {
    async fn run(&self, _args: Option<WorkArgs>, token: CancellationToken) -> Result<(), WorkError> {
        let Timing { due, interval } = *self.shared.timing.lock();
        if let Some(due) = due {
            delay(due, &token).await?;
        } else if let Some(interval) = interval {
            // No due time: wait one interval before the first tick instead
            // of firing immediately.
            delay(interval, &token).await?;
        }

        while !token.is_cancelled() {
            if self.shared.enabled.load(Ordering::Acquire) {
                (self.shared.handler)(token.clone()).await?;
            }
            let interval = self.shared.timing.lock().interval;
            let Some(interval) = interval else {
                // Infinite interval: one-shot.
                break;
            };
            delay(interval, &token).await?;
        }
        Ok(())
    }
}

/// Periodic/delayed re-invocation driver built atop a [`Worker`].
///
/// The scheduler owns one worker created from the registry it was given;
/// restarts replace that worker rather than mutating it. Dropping the
/// scheduler stops it.
pub struct Scheduler {
    shared: Arc<TickShared>,
    registry: Arc<WorkerRegistry>,
    worker: Arc<Mutex<Arc<Worker>>>,
    pending_restart: Arc<AtomicBool>,
    restart_grace: Duration,
    owner: String,
}

impl Scheduler {
    /// Creates a scheduler for `handler` with the given timing.
    ///
    /// `None` for either duration means infinite: no due time falls back to
    /// the interval for the initial wait, and no interval makes the loop
    /// one-shot. The backing worker is registered under `owner`.
    pub fn new<F, Fut>(
        registry: &Arc<WorkerRegistry>,
        handler: F,
        due: Option<Duration>,
        interval: Option<Duration>,
        owner: impl Into<String>,
    ) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), WorkError>> + Send + 'static,
    {
        let handler: TickFn = Arc::new(move |token| handler(token).boxed());
        let shared = Arc::new(TickShared {
            enabled: AtomicBool::new(false),
            timing: Mutex::new(Timing { due, interval }),
            handler,
        });
        let owner = owner.into();
        let worker = build_worker(registry, &shared, &owner);
        Self {
            shared,
            registry: Arc::clone(registry),
            worker: Arc::new(Mutex::new(worker)),
            pending_restart: Arc::new(AtomicBool::new(false)),
            restart_grace: RESTART_GRACE,
            owner,
        }
    }

    /// Overrides how long a restart waits for the previous run (60 s
    /// default).
    pub fn with_restart_grace(mut self, grace: Duration) -> Self {
        self.restart_grace = grace;
        self
    }

    /// Enables the scheduler and launches the loop if it is not already
    /// running and at least one of due/interval is finite.
    pub fn start(&self) {
        spin_up(&self.shared, &self.worker, &self.owner);
    }

    /// Disables invocations; the loop keeps running and skips ticks.
    pub fn pause(&self) {
        self.shared.enabled.store(false, Ordering::Release);
    }

    /// Pauses and cancels the backing worker.
    pub fn stop(&self) {
        self.pause();
        self.worker.lock().cancel();
    }

    /// True if the scheduler should invoke the handler when a tick elapses.
    pub fn is_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::Acquire)
    }

    /// The currently configured due time (`None` = infinite).
    pub fn due(&self) -> Option<Duration> {
        self.shared.timing.lock().due
    }

    /// The currently configured interval (`None` = infinite/one-shot).
    pub fn interval(&self) -> Option<Duration> {
        self.shared.timing.lock().interval
    }

    /// Stops the scheduler, applies new timing, and starts it again.
    ///
    /// The stop and the field updates happen inline; waiting for the
    /// previous run (up to the restart grace) and the subsequent start run
    /// on a separate scheduling task, which the returned handle joins.
    ///
    /// A restart arriving while another is pending only applies its field
    /// updates; the already-pending task performs the single start with
    /// whatever fields it observes (last writer wins).
    pub fn restart(&self, due: Option<Duration>, interval: Option<Duration>) -> JoinHandle<()> {
        self.stop();
        {
            let mut timing = self.shared.timing.lock();
            timing.due = due;
            timing.interval = interval;
        }

        if self.pending_restart.swap(true, Ordering::AcqRel) {
            return tokio::spawn(async {});
        }

        let shared = Arc::clone(&self.shared);
        let registry = Arc::clone(&self.registry);
        let slot = Arc::clone(&self.worker);
        let pending = Arc::clone(&self.pending_restart);
        let grace = self.restart_grace;
        let owner = self.owner.clone();
        tokio::spawn(async move {
            let previous = slot.lock().handle();
            if let Some(handle) = previous {
                if tokio::time::timeout(grace, handle).await.is_err() {
                    tracing::warn!(owner = %owner, "timed out waiting for the previous run during restart");
                }
            }

            let fresh = build_worker(&registry, &shared, &owner);
            *slot.lock() = fresh;
            spin_up(&shared, &slot, &owner);
            pending.store(false, Ordering::Release);
        })
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_worker(
    registry: &Arc<WorkerRegistry>,
    shared: &Arc<TickShared>,
    owner: &str,
) -> Arc<Worker> {
    let tick = Arc::new(TickLoop {
        shared: Arc::clone(shared),
    });
    let on_complete: CompletionFn = {
        let owner = owner.to_string();
        Arc::new(move |outcome: WorkOutcome| {
            if outcome.was_canceled {
                return;
            }
            if let Some(error) = outcome.error {
                tracing::error!(owner = %owner, error = %error, "scheduler stopped unexpectedly");
            }
        })
    };
    registry.create_worker(tick, Some(on_complete), owner.to_string())
}

fn spin_up(shared: &Arc<TickShared>, slot: &Arc<Mutex<Arc<Worker>>>, owner: &str) {
    shared.enabled.store(true, Ordering::Release);
    let worker = slot.lock().clone();
    let timing = *shared.timing.lock();
    if !worker.is_busy() && timing.is_finite() {
        if let Err(error) = worker.run(None) {
            tracing::warn!(owner = %owner, error = %error, "scheduler worker could not start");
        }
    }
}
