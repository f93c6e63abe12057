//! # Subscriptions: weak targets and their type-keyed handlers.
//!
//! A [`Subscription`] pairs a weak reference to a subscriber object with
//! the handlers it registered, keyed by message type. Handlers are stored
//! as type-erased adapters that downcast target and message back to their
//! concrete types at dispatch.
//!
//! ## Rules
//! - The subscription never extends the subscriber's lifetime; it is dead
//!   once the weak upgrade fails.
//! - Method identity is the registered `fn` item's address: re-registering
//!   the identical (target, fn) pair is a no-op upstream.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use futures::future::BoxFuture;
use parking_lot::Mutex;

use crate::error::HandlerError;

/// Type-erased subscriber object.
pub(crate) type AnyTarget = Arc<dyn std::any::Any + Send + Sync>;
/// Type-erased published payload.
pub(crate) type AnyMessage = Arc<dyn std::any::Any + Send + Sync>;

type SyncInvoke = Arc<
    dyn Fn(&(dyn std::any::Any + Send + Sync), &(dyn std::any::Any + Send + Sync)) -> Result<(), HandlerError>
        + Send
        + Sync,
>;
type AsyncInvoke =
    Arc<dyn Fn(AnyTarget, AnyMessage) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync>;

/// Dispatch adapter for one registered handler.
#[derive(Clone)]
pub(crate) enum Invoke {
    Sync(SyncInvoke),
    Async(AsyncInvoke),
}

#[derive(Clone)]
pub(crate) struct HandlerEntry {
    /// Address of the registered `fn` item, for (target, method) dedup.
    pub(crate) method_key: usize,
    pub(crate) invoke: Invoke,
}

/// One subscriber's registration: weak target + message-type → handlers.
pub(crate) struct Subscription {
    target: Weak<dyn std::any::Any + Send + Sync>,
    target_key: usize,
    handlers: Mutex<HashMap<TypeId, Vec<HandlerEntry>>>,
}

impl Subscription {
    pub(crate) fn new(target: &AnyTarget) -> Self {
        Self {
            target: Arc::downgrade(target),
            target_key: target_key(target),
            handlers: Mutex::new(HashMap::new()),
        }
    }

    /// Identity match against a subscriber address.
    pub(crate) fn matches(&self, key: usize) -> bool {
        self.target_key == key
    }

    /// True once the subscriber has been dropped.
    pub(crate) fn is_dead(&self) -> bool {
        self.target.strong_count() == 0
    }

    pub(crate) fn upgrade(&self) -> Option<AnyTarget> {
        self.target.upgrade()
    }

    pub(crate) fn has_method(&self, method_key: usize) -> bool {
        self.handlers
            .lock()
            .values()
            .any(|entries| entries.iter().any(|entry| entry.method_key == method_key))
    }

    pub(crate) fn add(&self, type_id: TypeId, entry: HandlerEntry) {
        self.handlers.lock().entry(type_id).or_default().push(entry);
    }

    /// Handlers registered for `type_id`, cloned out so no lock is held
    /// while they run.
    pub(crate) fn handlers_for(&self, type_id: &TypeId) -> Vec<HandlerEntry> {
        self.handlers
            .lock()
            .get(type_id)
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn handles(&self, type_id: &TypeId) -> bool {
        self.handlers.lock().contains_key(type_id)
    }
}

/// Address identity of a subscriber allocation (the reference-equality
/// analog for `Arc` targets).
pub(crate) fn target_key(target: &AnyTarget) -> usize {
    Arc::as_ptr(target) as *const () as usize
}
