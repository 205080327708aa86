//! Identifier types shared across the event-sourcing layers.

mod types;

pub use types::{CorrelationId, EntityId, InvalidIdentifier, StreamName};
