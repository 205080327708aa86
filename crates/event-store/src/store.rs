use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{EventData, GlobalPosition, RecordedEvent, Result, StreamName, Version};

/// Optimistic-concurrency precondition for writing to a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpectedVersion {
    /// No version check is performed (use with caution).
    Any,
    /// The stream must not exist yet.
    NoStream,
    /// The stream's last event must be at exactly this position.
    Exact(Version),
}

impl ExpectedVersion {
    /// Maps an entity version to a precondition; the sentinel means "no stream".
    pub fn from_version(version: Version) -> Self {
        if version.is_initial() {
            ExpectedVersion::NoStream
        } else {
            ExpectedVersion::Exact(version)
        }
    }

    /// Checks the precondition against the stream's current last position.
    pub fn is_satisfied_by(&self, current: Option<Version>) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::NoStream => current.is_none(),
            ExpectedVersion::Exact(expected) => current == Some(*expected),
        }
    }
}

impl std::fmt::Display for ExpectedVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExpectedVersion::Any => f.write_str("any"),
            ExpectedVersion::NoStream => f.write_str("no stream"),
            ExpectedVersion::Exact(version) => write!(f, "{version}"),
        }
    }
}

/// Client-side protocol of the append-only log.
///
/// One stream per entity instance; events within a stream carry contiguous
/// 0-based positions. All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Reads every event of a stream in ascending position order.
    ///
    /// Fails with `StreamNotFound` if the stream was never written and
    /// `StreamDeleted` if it was deleted.
    async fn read_stream_forward(&self, stream: &StreamName) -> Result<Vec<RecordedEvent>>;

    /// Appends a batch of events to a stream.
    ///
    /// Events are appended atomically - either all succeed or none do.
    /// Fails with `WrongExpectedVersion` if the stream is not at `expected`.
    ///
    /// Returns the position of the last appended event.
    async fn append_to_stream(
        &self,
        stream: &StreamName,
        expected: ExpectedVersion,
        events: Vec<EventData>,
    ) -> Result<Version>;

    /// Marks a stream as deleted.
    ///
    /// Subsequent reads fail with `StreamDeleted`; already recorded events stay
    /// visible to subscriptions.
    async fn delete_stream(&self, stream: &StreamName, expected: ExpectedVersion) -> Result<()>;

    /// Reads events across all streams in global order, strictly after `after`.
    async fn read_all_forward(
        &self,
        after: Option<GlobalPosition>,
        limit: usize,
    ) -> Result<Vec<RecordedEvent>>;

    /// Gets the position of the last event in a stream.
    ///
    /// Returns None if the stream doesn't exist.
    async fn stream_version(&self, stream: &StreamName) -> Result<Option<Version>>;
}

/// Extension trait providing convenience methods for event stores.
#[async_trait]
pub trait EventStoreExt: EventStore {
    /// Appends a single event to a stream.
    async fn append_event(
        &self,
        stream: &StreamName,
        expected: ExpectedVersion,
        event: EventData,
    ) -> Result<Version> {
        self.append_to_stream(stream, expected, vec![event]).await
    }

    /// Checks if a stream exists (has any events).
    async fn stream_exists(&self, stream: &StreamName) -> Result<bool> {
        Ok(self.stream_version(stream).await?.is_some())
    }
}

// Blanket implementation for all EventStore implementations
impl<T: EventStore + ?Sized> EventStoreExt for T {}

/// Validates a batch before appending.
pub fn validate_events_for_append(events: &[EventData]) -> std::result::Result<(), String> {
    if events.is_empty() {
        return Err("Cannot append empty event list".to_string());
    }

    if let Some(event) = events.iter().find(|e| e.event_type.trim().is_empty()) {
        return Err(format!("Event {} has an empty event type", event.event_id));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_version_from_sentinel_is_no_stream() {
        assert_eq!(
            ExpectedVersion::from_version(Version::initial()),
            ExpectedVersion::NoStream
        );
        assert_eq!(
            ExpectedVersion::from_version(Version::new(3)),
            ExpectedVersion::Exact(Version::new(3))
        );
    }

    #[test]
    fn expected_version_checks() {
        assert!(ExpectedVersion::Any.is_satisfied_by(None));
        assert!(ExpectedVersion::Any.is_satisfied_by(Some(Version::new(7))));
        assert!(ExpectedVersion::NoStream.is_satisfied_by(None));
        assert!(!ExpectedVersion::NoStream.is_satisfied_by(Some(Version::first())));
        assert!(ExpectedVersion::Exact(Version::first()).is_satisfied_by(Some(Version::first())));
        assert!(!ExpectedVersion::Exact(Version::first()).is_satisfied_by(None));
        assert!(!ExpectedVersion::Exact(Version::first()).is_satisfied_by(Some(Version::new(1))));
    }

    #[test]
    fn validation_rejects_empty_batches_and_types() {
        assert!(validate_events_for_append(&[]).is_err());
        assert!(validate_events_for_append(&[EventData::new(" ", serde_json::json!({}))]).is_err());
        assert!(
            validate_events_for_append(&[EventData::new("Opened", serde_json::json!({}))]).is_ok()
        );
    }
}
