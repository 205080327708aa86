//! Append-only event log with per-entity streams and persistent subscriptions.

pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod store;
pub mod subscription;

pub use common::{EntityId, StreamName};
pub use error::{EventStoreError, Result};
pub use event::{EventData, EventId, GlobalPosition, Metadata, RecordedEvent, Version};
pub use memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use store::{EventStore, EventStoreExt, ExpectedVersion};
pub use subscription::{
    Delivery, NakAction, ParkedEvent, PersistentSubscription, SubscriptionSettings,
    SubscriptionStore,
};
