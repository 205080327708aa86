//! Domain error types.

use common::StreamName;
use event_store::{EventStoreError, Version};
use thiserror::Error;

/// Errors that can occur while loading or saving stream-backed entities.
#[derive(Debug, Error)]
pub enum DomainError {
    /// The entity's stream has never been written.
    #[error("Not found: {stream}")]
    NotFound { stream: StreamName },

    /// The entity's stream was explicitly deleted.
    #[error("Deleted: {stream}")]
    Deleted { stream: StreamName },

    /// Another writer appended to the stream since the entity was loaded.
    #[error("Concurrency conflict on {stream}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        stream: StreamName,
        expected: Version,
        actual: Version,
    },

    /// The store returned a stream with a gap or a repeated position.
    #[error("Stream {stream} is not contiguous: expected position {expected}, found {actual}")]
    NonContiguousStream {
        stream: StreamName,
        expected: Version,
        actual: Version,
    },

    /// A stored event could not be decoded during replay.
    #[error("Cannot decode event at {stream}@{position}: {source}")]
    Deserialization {
        stream: StreamName,
        position: Version,
        #[source]
        source: serde_json::Error,
    },

    /// A new event could not be encoded for storage.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Events were committed, but handing on their messages failed.
    #[error("Events committed at version {version}, but message dispatch failed: {source}")]
    MessageDispatch {
        version: Version,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// An error occurred in the event store.
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),
}

impl DomainError {
    /// Returns true if the caller should reload and retry the command.
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, DomainError::ConcurrencyConflict { .. })
    }

    /// Returns true if the entity's stream does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DomainError::NotFound { .. })
    }
}
