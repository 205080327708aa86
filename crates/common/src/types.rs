use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Returned when an identifier string is empty or only whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("identifier must not be empty")]
pub struct InvalidIdentifier;

/// Identifier of one stream-backed entity instance.
///
/// Identifiers come from an external sequence provider and are opaque
/// strings; the only rule enforced here is that they are non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId(String);

impl EntityId {
    /// Creates an identifier, rejecting empty or whitespace-only input.
    pub fn new(value: impl Into<String>) -> Result<Self, InvalidIdentifier> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(InvalidIdentifier);
        }
        Ok(Self(value))
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for EntityId {
    type Error = InvalidIdentifier;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for EntityId {
    type Error = InvalidIdentifier;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> Self {
        id.0
    }
}

/// Name of a stream in the event log.
///
/// Entity streams are named `"{kind}-{id}"`, so every instance of an entity
/// kind lives in its own stream and the name can be rebuilt from the id alone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamName(String);

impl StreamName {
    /// Wraps an arbitrary stream name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Builds the stream name for one entity instance.
    pub fn for_entity(kind: &str, id: &EntityId) -> Self {
        Self(format!("{kind}-{id}"))
    }

    /// Returns the entity kind prefix (everything before the first `-`).
    pub fn kind(&self) -> &str {
        self.0.split_once('-').map_or(&self.0, |(kind, _)| kind)
    }

    /// Returns the stream name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StreamName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Correlates every event written on behalf of one inbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Metadata header under which the correlation id is stored.
    pub const HEADER: &'static str = "correlation_id";

    /// Creates a new random correlation ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for CorrelationId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_id_rejects_blank_values() {
        assert_eq!(EntityId::new(""), Err(InvalidIdentifier));
        assert_eq!(EntityId::new("   "), Err(InvalidIdentifier));
        assert_eq!(EntityId::new("42").unwrap().as_str(), "42");
    }

    #[test]
    fn entity_id_deserialization_validates() {
        let id: EntityId = serde_json::from_str("\"T-1\"").unwrap();
        assert_eq!(id.as_str(), "T-1");
        assert!(serde_json::from_str::<EntityId>("\"\"").is_err());
    }

    #[test]
    fn stream_name_is_kind_prefixed() {
        let id = EntityId::new("1001").unwrap();
        let stream = StreamName::for_entity("trade", &id);
        assert_eq!(stream.as_str(), "trade-1001");
        assert_eq!(stream.kind(), "trade");
    }

    #[test]
    fn correlation_ids_are_unique() {
        assert_ne!(CorrelationId::new(), CorrelationId::new());
    }
}
