//! # Typed publish/subscribe over weakly-held subscribers.
//!
//! This module groups the message **data model** and the **bus** used to
//! publish/subscribe to application messages:
//! - [`Message`], [`Route`] message typing and covariant routing
//! - [`EventBus`] weak-reference dispatch with sync/async handlers

mod bus;
mod message;
mod subscription;

pub use bus::{EventBus, Marshaller, SpawnHook};
pub use message::{Message, Route};
