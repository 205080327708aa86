use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::StreamName;

/// Extra headers stored next to each event.
pub type Metadata = HashMap<String, serde_json::Value>;

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an event ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EventId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Position of an event within its stream, used for optimistic concurrency.
///
/// Positions are 0-based: the first event of a stream is at `0`. A stream
/// (or entity) that holds no events is at [`Version::initial`], which is `-1`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Creates a new version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the sentinel version (-1) of a stream with no events.
    pub fn initial() -> Self {
        Self(-1)
    }

    /// Returns the position (0) of the first event in a stream.
    pub fn first() -> Self {
        Self(0)
    }

    /// Returns true for the "no events" sentinel.
    pub fn is_initial(&self) -> bool {
        self.0 < 0
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the version `count` events earlier.
    pub fn rewind(&self, count: usize) -> Self {
        let count = i64::try_from(count).unwrap_or(i64::MAX);
        Self(self.0.saturating_sub(count))
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl Default for Version {
    fn default() -> Self {
        Self::initial()
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Version> for i64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

/// Position of an event in the log as a whole, across all streams.
///
/// Subscriptions checkpoint against this value.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct GlobalPosition(i64);

impl GlobalPosition {
    /// Creates a global position from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the raw position value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for GlobalPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An event proposed for appending to a stream.
///
/// The stream position is not part of the proposal: the store assigns it
/// when the batch is accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    /// Unique identifier for this event.
    pub event_id: EventId,

    /// The stored type name (e.g., "TradeRequested").
    pub event_type: String,

    /// The event payload as JSON.
    pub data: serde_json::Value,

    /// Additional metadata about the event.
    pub metadata: Metadata,
}

impl EventData {
    /// Creates a proposal from a raw JSON payload.
    pub fn new(event_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event_id: EventId::new(),
            event_type: event_type.into(),
            data,
            metadata: Metadata::new(),
        }
    }

    /// Creates a proposal from a serializable payload.
    pub fn json<T: Serialize>(
        event_type: impl Into<String>,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(event_type, serde_json::to_value(payload)?))
    }

    /// Sets the event ID.
    pub fn with_event_id(mut self, id: EventId) -> Self {
        self.event_id = id;
        self
    }

    /// Adds a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Merges a set of metadata entries, overwriting existing keys.
    pub fn with_metadata_map(mut self, metadata: &Metadata) -> Self {
        self.metadata
            .extend(metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }
}

/// An event as stored in the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedEvent {
    /// Unique identifier for this event.
    pub event_id: EventId,

    /// The stream this event belongs to.
    pub stream_name: StreamName,

    /// The stored type name.
    pub event_type: String,

    /// Position of this event in its stream.
    pub position: Version,

    /// Position of this event in the whole log.
    pub global_position: GlobalPosition,

    /// When the event was appended.
    pub timestamp: DateTime<Utc>,

    /// The event payload as JSON.
    pub data: serde_json::Value,

    /// Additional metadata about the event.
    pub metadata: Metadata,
}
