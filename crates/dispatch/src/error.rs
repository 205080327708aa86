//! Dispatch error types.

use domain::DomainError;
use thiserror::Error;

/// Errors raised while turning a stored event into a typed envelope.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No payload type is registered for the stored type name.
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    /// The stored data does not match the registered payload type.
    #[error("Cannot deserialize {event_type}: {source}")]
    Deserialization {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors returned by event handlers.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// A repository save inside the handler lost an optimistic-concurrency race.
    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    /// The handler was invoked with a payload of another type.
    #[error("Handler for {expected} received a {event_type} payload")]
    PayloadMismatch {
        expected: &'static str,
        event_type: String,
    },

    /// Any other handler failure.
    #[error(transparent)]
    Failed(Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    /// Wraps an arbitrary error as a handler failure.
    pub fn failed(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        HandlerError::Failed(error.into())
    }

    /// Returns true if redelivering the event may succeed.
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, HandlerError::ConcurrencyConflict(_))
    }
}

impl From<DomainError> for HandlerError {
    fn from(error: DomainError) -> Self {
        if error.is_concurrency_conflict() {
            HandlerError::ConcurrencyConflict(error.to_string())
        } else {
            HandlerError::Failed(Box::new(error))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::StreamName;
    use event_store::Version;

    #[test]
    fn conflicts_stay_distinguishable() {
        let error: HandlerError = DomainError::ConcurrencyConflict {
            stream: StreamName::new("trade-1"),
            expected: Version::first(),
            actual: Version::new(1),
        }
        .into();
        assert!(error.is_concurrency_conflict());

        let error: HandlerError = DomainError::NotFound {
            stream: StreamName::new("trade-1"),
        }
        .into();
        assert!(!error.is_concurrency_conflict());
        assert_eq!(error.to_string(), "Not found: trade-1");
    }
}
