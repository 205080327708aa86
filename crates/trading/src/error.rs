//! Trading error types.

use common::{EntityId, InvalidIdentifier};
use dispatch::HandlerError;
use domain::DomainError;
use event_store::EventStoreError;
use thiserror::Error;

use crate::trade::TradeStatus;

/// Errors that can occur during trading operations.
#[derive(Debug, Error)]
pub enum TradingError {
    /// The trade request failed validation.
    #[error("Invalid trade request: {0}")]
    InvalidRequest(String),

    /// The trade is not in a state that allows the requested action.
    #[error("Cannot {action} trade {trade_id} in status {status}")]
    InvalidTransition {
        trade_id: EntityId,
        status: TradeStatus,
        action: &'static str,
    },

    /// The credit account was already opened.
    #[error("Credit account already open: {0}")]
    AccountAlreadyOpen(EntityId),

    /// The credit account has not been opened.
    #[error("Credit account not open: {0}")]
    AccountNotOpen(EntityId),

    /// The sequence provider could not hand out an identifier.
    #[error("Sequence error: {0}")]
    Sequence(String),

    /// Domain error.
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Event store error.
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),
}

impl TradingError {
    /// Returns true if the error is a lost optimistic-concurrency race.
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, TradingError::Domain(e) if e.is_concurrency_conflict())
    }

    /// Returns true if the requested entity does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, TradingError::Domain(e) if e.is_not_found())
    }
}

impl From<InvalidIdentifier> for TradingError {
    fn from(error: InvalidIdentifier) -> Self {
        TradingError::InvalidRequest(error.to_string())
    }
}

impl From<TradingError> for HandlerError {
    fn from(error: TradingError) -> Self {
        match error {
            TradingError::Domain(e) => HandlerError::from(e),
            other => HandlerError::failed(other),
        }
    }
}

/// Result type for trading operations.
pub type Result<T> = std::result::Result<T, TradingError>;

#[cfg(test)]
mod tests {
    use super::*;
    use common::StreamName;
    use event_store::Version;

    #[test]
    fn domain_conflicts_become_retryable_handler_errors() {
        let error = TradingError::from(DomainError::ConcurrencyConflict {
            stream: StreamName::new("trade-1"),
            expected: Version::first(),
            actual: Version::new(1),
        });
        assert!(error.is_concurrency_conflict());
        assert!(HandlerError::from(error).is_concurrency_conflict());
    }

    #[test]
    fn business_errors_are_plain_handler_failures() {
        let id = EntityId::new("1").unwrap();
        let handler_error = HandlerError::from(TradingError::AccountNotOpen(id));
        assert!(!handler_error.is_concurrency_conflict());
        assert_eq!(handler_error.to_string(), "Credit account not open: 1");
    }

    #[test]
    fn not_found_is_detected_through_the_domain_error() {
        let error = TradingError::from(DomainError::NotFound {
            stream: StreamName::new("trade-9"),
        });
        assert!(error.is_not_found());
        assert!(!error.is_concurrency_conflict());
    }
}
