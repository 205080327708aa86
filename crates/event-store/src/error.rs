use thiserror::Error;

use crate::{ExpectedVersion, StreamName, Version};

/// Errors that can occur when interacting with the event store.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// The stream has never been written.
    #[error("Stream not found: {0}")]
    StreamNotFound(StreamName),

    /// The stream existed and was explicitly deleted.
    #[error("Stream deleted: {0}")]
    StreamDeleted(StreamName),

    /// The expected-version precondition of an append or delete failed.
    #[error("Wrong expected version for stream {stream}: expected {expected}, found {actual}")]
    WrongExpectedVersion {
        stream: StreamName,
        expected: ExpectedVersion,
        actual: Version,
    },

    /// The batch handed to an append was rejected before reaching storage.
    #[error("Invalid append: {0}")]
    InvalidAppend(String),

    /// The persistent subscription stopped delivering events.
    #[error("Subscription dropped: {0}")]
    SubscriptionDropped(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EventStoreError {
    /// Returns true when the error is an optimistic-concurrency rejection.
    pub fn is_wrong_expected_version(&self) -> bool {
        matches!(self, EventStoreError::WrongExpectedVersion { .. })
    }
}

/// Result type for event store operations.
pub type Result<T> = std::result::Result<T, EventStoreError>;
