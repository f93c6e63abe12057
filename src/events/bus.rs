//! # EventBus: weak-reference publish/subscribe with typed routing.
//!
//! The bus routes published messages to handlers registered by subscriber
//! objects it only holds weakly, so a subscription never keeps its owner
//! alive.
//!
//! ## Dispatch
//! ```text
//! publish(message)
//!   ├─► snapshot subscriptions (short lock, released before any handler)
//!   ├─► marshaller(dispatch):
//!   │     for each live subscriber, for each route of the message
//!   │       (concrete type first, declared base types after):
//!   │         ├─► sync handler  → invoked inline, Err/panic collected
//!   │         └─► async handler → future handed to the spawn hook
//!   ├─► prune dead subscriptions (short lock)
//!   └─► Err(PublishError) if any handler failed (after the full sweep)
//! ```
//!
//! ## Rules
//! - No lock is ever held across user code; handlers run against an
//!   immutable snapshot taken outside the lock.
//! - Within one publish, handlers run sequentially in subscription order;
//!   ordering across independent publish calls is not guaranteed under a
//!   custom marshaller.
//! - A subscriber removed before the snapshot never receives that publish;
//!   an unsubscribe racing a publish in flight is best-effort.
//! - One failing handler never aborts the sweep: failures are aggregated
//!   and raised after every handler has been attempted.

use std::any::TypeId;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;

use crate::error::{HandlerError, PublishError};
use crate::events::message::{Message, Route};
use crate::events::subscription::{
    AnyMessage, AnyTarget, HandlerEntry, Invoke, Subscription, target_key,
};

/// Selects which thread/context executes a publish's handler invocations.
///
/// The marshaller must run the dispatch closure to completion before
/// returning; the identity default runs it on the publishing thread.
pub type Marshaller = Arc<dyn Fn(&mut dyn FnMut()) + Send + Sync>;

/// Receives the futures of async handlers reached from the synchronous
/// [`EventBus::publish`] path.
///
/// The default hook spawns them onto the current Tokio runtime (logging
/// failures), or drops them with a warning when no runtime is available.
pub type SpawnHook = Arc<dyn Fn(BoxFuture<'static, Result<(), HandlerError>>) + Send + Sync>;

/// Loosely-coupled publication of and subscription to typed messages.
///
/// The bus is cheap to share behind an `Arc`; independent buses are fully
/// isolated, which is the recommended setup for tests.
pub struct EventBus {
    subs: Mutex<Vec<Arc<Subscription>>>,
    marshaller: Mutex<Marshaller>,
    spawn_hook: Mutex<SpawnHook>,
}

impl EventBus {
    /// Creates a bus with the identity marshaller and the default spawn
    /// hook.
    pub fn new() -> Self {
        Self {
            subs: Mutex::new(Vec::new()),
            marshaller: Mutex::new(Arc::new(|dispatch| dispatch())),
            spawn_hook: Mutex::new(Arc::new(default_spawn_hook)),
        }
    }

    /// Replaces the default publication marshaller.
    pub fn set_marshaller(&self, marshaller: Marshaller) {
        *self.marshaller.lock() = marshaller;
    }

    /// Replaces the hook that receives async-handler futures during
    /// synchronous publishes.
    pub fn set_spawn_hook(&self, hook: SpawnHook) {
        *self.spawn_hook.lock() = hook;
    }

    /// Registers `handler` for messages of type `M` on `target`.
    ///
    /// Re-registering the identical (target, handler) pair is a no-op; a
    /// new handler for an already-registered target merges into its
    /// existing subscription. The bus holds `target` weakly.
    pub fn subscribe<S, M>(&self, target: &Arc<S>, handler: fn(&S, &M) -> Result<(), HandlerError>)
    where
        S: Send + Sync + 'static,
        M: Message,
    {
        let cloned_target: Arc<S> = Arc::clone(target);
        let any_target: AnyTarget = cloned_target;
        let method_key = handler as usize;
        let invoke = Arc::new(
            move |target: &(dyn std::any::Any + Send + Sync),
                  message: &(dyn std::any::Any + Send + Sync)| {
                match (target.downcast_ref::<S>(), message.downcast_ref::<M>()) {
                    (Some(target), Some(message)) => handler(target, message),
                    _ => Ok(()),
                }
            },
        );
        self.register(
            &any_target,
            TypeId::of::<M>(),
            HandlerEntry {
                method_key,
                invoke: Invoke::Sync(invoke),
            },
        );
    }

    /// Registers an async `handler` for messages of type `M` on `target`.
    ///
    /// The handler receives owned `Arc`s so its future is `'static`:
    /// awaited in subscription order by [`EventBus::publish_async`], or
    /// handed to the spawn hook by [`EventBus::publish`]. Dedup and merge
    /// semantics match [`EventBus::subscribe`].
    pub fn subscribe_async<S, M>(
        &self,
        target: &Arc<S>,
        handler: fn(Arc<S>, Arc<M>) -> BoxFuture<'static, Result<(), HandlerError>>,
    ) where
        S: Send + Sync + 'static,
        M: Message,
    {
        let cloned_target: Arc<S> = Arc::clone(target);
        let any_target: AnyTarget = cloned_target;
        let method_key = handler as usize;
        let invoke = Arc::new(move |target: AnyTarget, message: AnyMessage| {
            match (target.downcast::<S>(), message.downcast::<M>()) {
                (Ok(target), Ok(message)) => handler(target, message),
                _ => std::future::ready(Ok(())).boxed(),
            }
        });
        self.register(
            &any_target,
            TypeId::of::<M>(),
            HandlerEntry {
                method_key,
                invoke: Invoke::Async(invoke),
            },
        );
    }

    /// Removes every registration made by `target`.
    pub fn unsubscribe<S>(&self, target: &Arc<S>)
    where
        S: Send + Sync + 'static,
    {
        let cloned_target: Arc<S> = Arc::clone(target);
        let any_target: AnyTarget = cloned_target;
        let key = target_key(&any_target);
        self.subs.lock().retain(|sub| !sub.matches(key));
    }

    /// Drops every subscription; intended for test isolation on a shared
    /// bus.
    pub fn clear(&self) {
        self.subs.lock().clear();
    }

    /// True when a live subscriber registered a handler for exactly `M`.
    pub fn has_handler_for<M: Message>(&self) -> bool {
        let type_id = TypeId::of::<M>();
        self.subs
            .lock()
            .iter()
            .any(|sub| !sub.is_dead() && sub.handles(&type_id))
    }

    /// Publishes a message through the marshaller.
    ///
    /// Sync handlers run inline (inside the marshalled dispatch); async
    /// handlers go to the spawn hook. Handler failures and panics are
    /// collected without aborting the sweep and returned as one aggregate
    /// after every handler was attempted.
    pub fn publish<M: Message>(&self, message: M) -> Result<(), PublishError> {
        let message = Arc::new(message);
        let routes = routes_of(&message);
        let snapshot = self.snapshot();
        let marshal = self.marshaller.lock().clone();
        let hook = self.spawn_hook.lock().clone();

        let mut failures: Vec<HandlerError> = Vec::new();
        {
            let mut dispatch = || {
                for sub in &snapshot {
                    let Some(target) = sub.upgrade() else {
                        continue;
                    };
                    for route in &routes {
                        for entry in sub.handlers_for(&route.type_id) {
                            match entry.invoke {
                                Invoke::Sync(invoke) => {
                                    let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
                                        invoke(target.as_ref(), route.message.as_ref())
                                    }));
                                    match result {
                                        Ok(Ok(())) => {}
                                        Ok(Err(error)) => failures.push(error),
                                        Err(panic) => failures.push(panic_error(panic)),
                                    }
                                }
                                Invoke::Async(invoke) => {
                                    hook(invoke(Arc::clone(&target), Arc::clone(&route.message)));
                                }
                            }
                        }
                    }
                }
            };
            marshal(&mut dispatch);
        }

        self.prune_dead();
        self.raise(failures)
    }

    /// Publishes a message, awaiting handlers sequentially in subscription
    /// order.
    ///
    /// Each handler's failure (or panic) is isolated and collected; the
    /// aggregate is returned after the full sweep.
    pub async fn publish_async<M: Message>(&self, message: M) -> Result<(), PublishError> {
        let message = Arc::new(message);
        let routes = routes_of(&message);
        let snapshot = self.snapshot();

        let mut failures: Vec<HandlerError> = Vec::new();
        for sub in &snapshot {
            let Some(target) = sub.upgrade() else {
                continue;
            };
            for route in &routes {
                for entry in sub.handlers_for(&route.type_id) {
                    match entry.invoke {
                        Invoke::Sync(invoke) => {
                            let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
                                invoke(target.as_ref(), route.message.as_ref())
                            }));
                            match result {
                                Ok(Ok(())) => {}
                                Ok(Err(error)) => failures.push(error),
                                Err(panic) => failures.push(panic_error(panic)),
                            }
                        }
                        Invoke::Async(invoke) => {
                            let future = invoke(Arc::clone(&target), Arc::clone(&route.message));
                            match AssertUnwindSafe(future).catch_unwind().await {
                                Ok(Ok(())) => {}
                                Ok(Err(error)) => failures.push(error),
                                Err(panic) => failures.push(panic_error(panic)),
                            }
                        }
                    }
                }
            }
        }

        self.prune_dead();
        self.raise(failures)
    }

    fn register(&self, target: &AnyTarget, type_id: TypeId, entry: HandlerEntry) {
        let key = target_key(target);
        let mut subs = self.subs.lock();
        if let Some(sub) = subs.iter().find(|sub| sub.matches(key) && !sub.is_dead()) {
            if !sub.has_method(entry.method_key) {
                sub.add(type_id, entry);
            }
            return;
        }
        let sub = Subscription::new(target);
        sub.add(type_id, entry);
        subs.push(Arc::new(sub));
    }

    fn snapshot(&self) -> Vec<Arc<Subscription>> {
        self.subs.lock().clone()
    }

    fn prune_dead(&self) {
        self.subs.lock().retain(|sub| !sub.is_dead());
    }

    fn raise(&self, failures: Vec<HandlerError>) -> Result<(), PublishError> {
        if failures.is_empty() {
            return Ok(());
        }
        tracing::error!(count = failures.len(), "handler failure(s) during publish");
        Err(PublishError { failures })
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

fn routes_of<M: Message>(message: &Arc<M>) -> Vec<Route> {
    let cloned_message: Arc<M> = Arc::clone(message);
    let concrete: AnyMessage = cloned_message;
    let mut routes = vec![Route {
        type_id: TypeId::of::<M>(),
        message: concrete,
    }];
    routes.extend(message.base_routes());
    routes
}

fn default_spawn_hook(future: BoxFuture<'static, Result<(), HandlerError>>) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            let _ = handle.spawn(async move {
                if let Err(error) = future.await {
                    tracing::error!(error = %error, "async handler failed");
                }
            });
        }
        Err(_) => {
            tracing::warn!("async handler dropped: no runtime available for synchronous publish");
        }
    }
}

fn panic_error(panic: Box<dyn std::any::Any + Send>) -> HandlerError {
    let message = if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "handler panicked".to_string()
    };
    message.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Probe {
        calls: AtomicUsize,
    }

    impl Probe {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[derive(Clone)]
    struct Ping;
    impl Message for Ping {}

    #[derive(Clone)]
    struct Saved;
    impl Message for Saved {}

    struct AutoSaved {
        saved: Saved,
    }
    impl Message for AutoSaved {
        fn base_routes(&self) -> Vec<Route> {
            vec![Route::new(self.saved.clone())]
        }
    }

    fn on_ping(probe: &Probe, _message: &Ping) -> Result<(), HandlerError> {
        probe.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn on_saved(probe: &Probe, _message: &Saved) -> Result<(), HandlerError> {
        probe.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn failing_ping(_probe: &Probe, _message: &Ping) -> Result<(), HandlerError> {
        Err("boom".into())
    }

    fn on_ping_async(
        probe: Arc<Probe>,
        _message: Arc<Ping>,
    ) -> BoxFuture<'static, Result<(), HandlerError>> {
        Box::pin(async move {
            probe.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[tokio::test]
    async fn test_duplicate_subscribe_invokes_handler_once() {
        let bus = EventBus::new();
        let probe = Probe::new();
        bus.subscribe(&probe, on_ping);
        bus.subscribe(&probe, on_ping);

        bus.publish(Ping).unwrap();
        assert_eq!(probe.calls(), 1);
    }

    #[tokio::test]
    async fn test_unsubscribed_target_receives_nothing() {
        let bus = EventBus::new();
        let probe = Probe::new();
        bus.subscribe(&probe, on_ping);
        bus.unsubscribe(&probe);

        bus.publish(Ping).unwrap();
        assert_eq!(probe.calls(), 0);
        assert!(!bus.has_handler_for::<Ping>());
    }

    #[tokio::test]
    async fn test_base_type_handler_receives_derived_message() {
        let bus = EventBus::new();
        let probe = Probe::new();
        bus.subscribe(&probe, on_saved);

        bus.publish(AutoSaved { saved: Saved }).unwrap();
        assert_eq!(probe.calls(), 1);
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_starve_the_rest() {
        let bus = EventBus::new();
        let failing = Probe::new();
        let healthy = Probe::new();
        bus.subscribe(&failing, failing_ping);
        bus.subscribe(&healthy, on_ping);

        let error = bus.publish(Ping).unwrap_err();
        assert_eq!(error.failures.len(), 1);
        assert_eq!(healthy.calls(), 1);
    }

    #[tokio::test]
    async fn test_panicking_handler_is_captured() {
        fn panicking(_probe: &Probe, _message: &Ping) -> Result<(), HandlerError> {
            panic!("handler blew up");
        }

        let bus = EventBus::new();
        let bad = Probe::new();
        let healthy = Probe::new();
        bus.subscribe(&bad, panicking);
        bus.subscribe(&healthy, on_ping);

        let error = bus.publish(Ping).unwrap_err();
        assert_eq!(error.failures.len(), 1);
        assert_eq!(healthy.calls(), 1);
    }

    #[tokio::test]
    async fn test_new_handler_merges_into_existing_subscription() {
        let bus = EventBus::new();
        let probe = Probe::new();
        bus.subscribe(&probe, on_ping);
        bus.subscribe(&probe, on_saved);

        bus.publish(Ping).unwrap();
        bus.publish(Saved).unwrap();
        assert_eq!(probe.calls(), 2);
    }

    #[tokio::test]
    async fn test_publish_async_awaits_handlers() {
        let bus = EventBus::new();
        let probe = Probe::new();
        bus.subscribe_async(&probe, on_ping_async);

        bus.publish_async(Ping).await.unwrap();
        assert_eq!(probe.calls(), 1);
    }

    #[tokio::test]
    async fn test_sync_publish_spawns_async_handler() {
        let bus = EventBus::new();
        let probe = Probe::new();
        bus.subscribe_async(&probe, on_ping_async);

        bus.publish(Ping).unwrap();

        let delivered = crate::time::wait_until(
            || probe.calls() == 1,
            Duration::from_secs(2),
            Duration::from_millis(5),
        )
        .await;
        assert!(delivered);
    }

    #[tokio::test]
    async fn test_dead_subscriber_is_skipped_and_pruned() {
        let bus = EventBus::new();
        let probe = Probe::new();
        bus.subscribe(&probe, on_ping);
        drop(probe);

        assert!(!bus.has_handler_for::<Ping>());
        bus.publish(Ping).unwrap();
        assert!(!bus.has_handler_for::<Ping>());
    }

    #[tokio::test]
    async fn test_custom_marshaller_runs_dispatch() {
        let bus = EventBus::new();
        let probe = Probe::new();
        bus.subscribe(&probe, on_ping);

        let marshalled = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&marshalled);
        bus.set_marshaller(Arc::new(move |dispatch| {
            counter.fetch_add(1, Ordering::SeqCst);
            dispatch();
        }));

        bus.publish(Ping).unwrap();
        assert_eq!(probe.calls(), 1);
        assert_eq!(marshalled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_clear_resets_the_bus() {
        let bus = EventBus::new();
        let probe = Probe::new();
        bus.subscribe(&probe, on_ping);
        bus.clear();

        bus.publish(Ping).unwrap();
        assert_eq!(probe.calls(), 0);
    }

    #[tokio::test]
    async fn test_async_handler_failure_is_aggregated() {
        fn failing_async(
            _probe: Arc<Probe>,
            _message: Arc<Ping>,
        ) -> BoxFuture<'static, Result<(), HandlerError>> {
            Box::pin(async move { Err("async boom".into()) })
        }

        let bus = EventBus::new();
        let failing = Probe::new();
        let healthy = Probe::new();
        bus.subscribe_async(&failing, failing_async);
        bus.subscribe_async(&healthy, on_ping_async);

        let error = bus.publish_async(Ping).await.unwrap_err();
        assert_eq!(error.failures.len(), 1);
        assert_eq!(healthy.calls(), 1);
    }
}
