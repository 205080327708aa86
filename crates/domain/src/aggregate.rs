//! Core event, aggregate and process traits.

use std::fmt::Debug;

use event_store::EventData;
use serde::{Serialize, de::DeserializeOwned};

/// Trait for domain events.
///
/// Domain events represent facts that have happened in the domain.
/// They are immutable and should be named in past tense.
///
/// Event enums are expected to use adjacent tagging
/// (`#[serde(tag = "type", content = "data")]`). The stored event type is the
/// tag and the stored data is the variant's payload alone, so consumers can
/// decode a payload without knowing the enum it came from.
pub trait DomainEvent: Serialize + DeserializeOwned + Debug + Clone + Send + Sync + 'static {
    /// Returns the event type name.
    fn event_type(&self) -> &'static str;

    /// Converts the event into its storable form.
    fn to_event_data(&self) -> Result<EventData, serde_json::Error> {
        let mut value = serde_json::to_value(self)?;
        let data = value
            .get_mut("data")
            .map(serde_json::Value::take)
            .unwrap_or(serde_json::Value::Null);
        Ok(EventData::new(self.event_type(), data))
    }

    /// Rebuilds an event from its stored type name and data.
    fn from_event_data(event_type: &str, data: &serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::json!({
            "type": event_type,
            "data": data,
        }))
    }
}

/// Trait for aggregates in an event-sourced system.
///
/// An aggregate is rebuilt by replaying its events and decides which new
/// events a command produces. Identity, version and uncommitted events are
/// tracked by [`AggregateRoot`](crate::AggregateRoot), not by the aggregate.
pub trait Aggregate: Default + Debug + Send + Sync + 'static {
    /// The type of events this aggregate produces and consumes.
    type Event: DomainEvent;

    /// Stream name prefix for instances of this aggregate.
    const KIND: &'static str;

    /// Applies an event to the aggregate, updating its state.
    ///
    /// This method must be pure and deterministic:
    /// - Given the same state and event, it must always produce the same new state
    /// - It must not have side effects
    /// - It must not fail (events represent facts that have happened)
    fn apply(&mut self, event: &Self::Event);
}

/// A long-running process: an aggregate whose transitions also produce
/// outbound messages.
///
/// Messages are collected while events are applied and handed to a
/// [`MessageDispatcher`](crate::MessageDispatcher) only after the events that
/// produced them have been committed.
pub trait Process: Default + Debug + Send + Sync + 'static {
    /// The type of events this process produces and consumes.
    type Event: DomainEvent;

    /// Outbound messages, e.g. commands for other aggregates.
    type Message: Debug + Send + Sync + 'static;

    /// Stream name prefix for instances of this process.
    const KIND: &'static str;

    /// Applies an event, pushing any resulting messages.
    fn apply(&mut self, event: &Self::Event, messages: &mut Vec<Self::Message>);
}
