//! Mapping from stored event type names to payload types.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use event_store::RecordedEvent;
use serde::de::DeserializeOwned;

use crate::envelope::EventEnvelope;
use crate::error::DispatchError;

/// A payload that can be decoded from a stored event.
pub trait EventPayload: DeserializeOwned + Send + Sync + 'static {
    /// The stored type name this payload is decoded from.
    const EVENT_TYPE: &'static str;
}

type Decoder = fn(&serde_json::Value) -> Result<Arc<dyn Any + Send + Sync>, serde_json::Error>;

fn decode_as<T: EventPayload>(
    data: &serde_json::Value,
) -> Result<Arc<dyn Any + Send + Sync>, serde_json::Error> {
    Ok(Arc::new(T::deserialize(data)?))
}

/// A registered payload type.
#[derive(Clone, Copy)]
pub struct PayloadType {
    event_type: &'static str,
    type_id: TypeId,
    type_name: &'static str,
    decode: Decoder,
}

impl PayloadType {
    fn of<T: EventPayload>() -> Self {
        Self {
            event_type: T::EVENT_TYPE,
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            decode: decode_as::<T>,
        }
    }

    /// The stored type name.
    pub fn event_type(&self) -> &'static str {
        self.event_type
    }

    /// The Rust type the payload decodes to.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Name of the Rust type, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl std::fmt::Debug for PayloadType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadType")
            .field("event_type", &self.event_type)
            .field("type_name", &self.type_name)
            .finish()
    }
}

/// Static registry of payload types, keyed by stored type name.
///
/// Built once with [`register`](Self::register) and read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct EventTypeResolver {
    types: HashMap<&'static str, PayloadType>,
}

impl EventTypeResolver {
    /// Creates an empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T` under its stored type name.
    ///
    /// A later registration for the same name replaces the earlier one.
    pub fn register<T: EventPayload>(mut self) -> Self {
        self.types.insert(T::EVENT_TYPE, PayloadType::of::<T>());
        self
    }

    /// Looks up the payload type for a stored type name.
    pub fn resolve(&self, event_type: &str) -> Result<PayloadType, DispatchError> {
        self.types
            .get(event_type)
            .copied()
            .ok_or_else(|| DispatchError::UnknownEventType(event_type.to_string()))
    }

    /// Decodes a stored event into an envelope with a typed payload.
    pub fn decode(&self, event: &RecordedEvent) -> Result<EventEnvelope, DispatchError> {
        let payload_type = self.resolve(&event.event_type)?;
        let payload =
            (payload_type.decode)(&event.data).map_err(|source| DispatchError::Deserialization {
                event_type: event.event_type.clone(),
                source,
            })?;

        Ok(EventEnvelope::from_parts(
            event.stream_name.clone(),
            event.event_type.clone(),
            event.position,
            event.global_position,
            event.metadata.clone(),
            payload,
            payload_type.type_name,
        ))
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::StreamName;
    use event_store::{EventId, GlobalPosition, Metadata, Version};
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Opened {
        owner: String,
    }

    impl EventPayload for Opened {
        const EVENT_TYPE: &'static str = "Opened";
    }

    fn recorded(event_type: &str, data: serde_json::Value) -> RecordedEvent {
        RecordedEvent {
            event_id: EventId::new(),
            stream_name: StreamName::new("account-1"),
            event_type: event_type.to_string(),
            position: Version::new(2),
            global_position: GlobalPosition::new(9),
            timestamp: Utc::now(),
            data,
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn resolves_registered_types() {
        let resolver = EventTypeResolver::new().register::<Opened>();

        let payload_type = resolver.resolve("Opened").unwrap();
        assert_eq!(payload_type.event_type(), "Opened");
        assert_eq!(payload_type.type_id(), TypeId::of::<Opened>());
        assert_eq!(resolver.len(), 1);
    }

    #[test]
    fn unknown_type_is_an_error() {
        let resolver = EventTypeResolver::new().register::<Opened>();

        assert!(matches!(
            resolver.resolve("Closed"),
            Err(DispatchError::UnknownEventType(name)) if name == "Closed"
        ));
    }

    #[test]
    fn decode_builds_a_typed_envelope() {
        let resolver = EventTypeResolver::new().register::<Opened>();

        let envelope = resolver
            .decode(&recorded("Opened", serde_json::json!({"owner": "alice"})))
            .unwrap();

        assert_eq!(envelope.payload::<Opened>().unwrap().owner, "alice");
        assert_eq!(envelope.stream_id().as_str(), "account-1");
        assert_eq!(envelope.position(), Version::new(2));
        assert_eq!(envelope.global_position(), GlobalPosition::new(9));
    }

    #[test]
    fn malformed_payload_is_a_deserialization_error() {
        let resolver = EventTypeResolver::new().register::<Opened>();

        let result = resolver.decode(&recorded("Opened", serde_json::json!({"owner": 5})));
        assert!(matches!(
            result,
            Err(DispatchError::Deserialization { .. })
        ));
    }
}
