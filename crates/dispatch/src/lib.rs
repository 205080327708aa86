//! Consumer side of persistent subscriptions.
//!
//! This crate provides:
//! - [`EventTypeResolver`] mapping stored type names to payload types
//! - [`EventHandlerRouter`] invoking handlers registered per payload type
//! - [`EventDispatcher`] turning each delivered event into an acknowledge,
//!   retry, park or skip decision

pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod resolver;
pub mod router;

pub use dispatcher::{DeliveryOutcome, DispatcherHandle, EventDispatcher};
pub use envelope::EventEnvelope;
pub use error::{DispatchError, HandlerError};
pub use resolver::{EventPayload, EventTypeResolver, PayloadType};
pub use router::EventHandlerRouter;
