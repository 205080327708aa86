//! Decoded form of a delivered event.

use std::any::{Any, TypeId};
use std::sync::Arc;

use common::{CorrelationId, StreamName};
use event_store::{GlobalPosition, Metadata, Version};

/// Immutable record of one stored event with its payload decoded.
///
/// Cloning is cheap; the payload and metadata are shared.
#[derive(Clone)]
pub struct EventEnvelope {
    stream_id: StreamName,
    event_type: String,
    position: Version,
    global_position: GlobalPosition,
    metadata: Arc<Metadata>,
    payload: Arc<dyn Any + Send + Sync>,
    payload_type: &'static str,
}

impl EventEnvelope {
    /// Creates an envelope around an already decoded payload.
    pub fn new<T: Any + Send + Sync>(
        stream_id: StreamName,
        event_type: impl Into<String>,
        position: Version,
        payload: T,
    ) -> Self {
        Self::from_parts(
            stream_id,
            event_type.into(),
            position,
            GlobalPosition::default(),
            Metadata::new(),
            Arc::new(payload),
            std::any::type_name::<T>(),
        )
    }

    pub(crate) fn from_parts(
        stream_id: StreamName,
        event_type: String,
        position: Version,
        global_position: GlobalPosition,
        metadata: Metadata,
        payload: Arc<dyn Any + Send + Sync>,
        payload_type: &'static str,
    ) -> Self {
        Self {
            stream_id,
            event_type,
            position,
            global_position,
            metadata: Arc::new(metadata),
            payload,
            payload_type,
        }
    }

    /// Sets the position in the global log.
    pub fn with_global_position(mut self, global_position: GlobalPosition) -> Self {
        self.global_position = global_position;
        self
    }

    /// Adds a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        Arc::make_mut(&mut self.metadata).insert(key.into(), value);
        self
    }

    /// The stream the event was appended to.
    pub fn stream_id(&self) -> &StreamName {
        &self.stream_id
    }

    /// The stored type name.
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Position of the event within its stream.
    pub fn position(&self) -> Version {
        self.position
    }

    /// Position of the event in the global log.
    pub fn global_position(&self) -> GlobalPosition {
        self.global_position
    }

    /// Metadata stored with the event.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// The correlation id header, if the writer attached a valid one.
    pub fn correlation_id(&self) -> Option<CorrelationId> {
        self.metadata
            .get(CorrelationId::HEADER)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// Runtime type of the payload.
    pub fn payload_type_id(&self) -> TypeId {
        (*self.payload).type_id()
    }

    /// Name of the payload's Rust type, for diagnostics.
    pub fn payload_type_name(&self) -> &'static str {
        self.payload_type
    }

    /// Borrows the payload if it is a `T`.
    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }

    /// Shares the payload if it is a `T`.
    pub fn payload_arc<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.payload).downcast::<T>().ok()
    }
}

impl std::fmt::Debug for EventEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEnvelope")
            .field("stream_id", &self.stream_id)
            .field("event_type", &self.event_type)
            .field("position", &self.position)
            .field("global_position", &self.global_position)
            .field("payload_type", &self.payload_type)
            .finish_non_exhaustive()
    }
}
