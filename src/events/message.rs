//! # Messages and routing declarations.
//!
//! Dispatch is keyed by `TypeId`: a published message is delivered under
//! its own concrete type, plus every base type it declares through
//! [`Message::base_routes`]. The route set is declared on the message type
//! once, so publish-time dispatch is a map lookup, not a type-hierarchy
//! walk.

use std::any::{Any, TypeId};
use std::sync::Arc;

/// A payload together with the type id it is routed under.
///
/// Built via [`Route::new`] from a base-type view of a message.
pub struct Route {
    pub(crate) type_id: TypeId,
    pub(crate) message: Arc<dyn Any + Send + Sync>,
}

impl Route {
    /// Routes `view` under its own type.
    pub fn new<M: Message>(view: M) -> Self {
        Self {
            type_id: TypeId::of::<M>(),
            message: Arc::new(view),
        }
    }
}

/// # A publishable message.
///
/// Plain event types implement this with an empty body:
///
/// ```
/// use taskbus::Message;
///
/// struct ProjectSaved;
/// impl Message for ProjectSaved {}
/// ```
///
/// A message that refines another one declares the base view, so handlers
/// subscribed to the base type also receive it:
///
/// ```
/// use taskbus::{Message, Route};
///
/// #[derive(Clone)]
/// struct ProjectSaved;
/// impl Message for ProjectSaved {}
///
/// struct ProjectAutoSaved {
///     saved: ProjectSaved,
/// }
///
/// impl Message for ProjectAutoSaved {
///     fn base_routes(&self) -> Vec<Route> {
///         vec![Route::new(self.saved.clone())]
///     }
/// }
/// ```
pub trait Message: Any + Send + Sync {
    /// Base message types this message should also be delivered as.
    ///
    /// Checked after the concrete type itself, in declaration order.
    fn base_routes(&self) -> Vec<Route> {
        Vec::new()
    }
}
