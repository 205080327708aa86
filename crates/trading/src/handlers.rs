//! Event handlers that carry trades through their credit decision.

use std::sync::Arc;

use common::CorrelationId;
use dispatch::{EventEnvelope, EventHandlerRouter, EventTypeResolver, HandlerError};
use event_store::{EventStore, Metadata};

use crate::credit::{CreditAccountOpened, CreditReservationRejected, CreditReserved};
use crate::sequence::SequenceAdvanced;
use crate::service::{CreditService, TradeService};
use crate::trade::{ReserveCredit, TradeCompleted, TradeRejected, TradeRequested};

/// Every payload type the trading streams write.
///
/// Types without a handler still have to be known so the dispatcher skips
/// them instead of parking them as unknown.
pub fn trading_resolver() -> EventTypeResolver {
    EventTypeResolver::new()
        .register::<TradeRequested>()
        .register::<TradeCompleted>()
        .register::<TradeRejected>()
        .register::<CreditAccountOpened>()
        .register::<CreditReserved>()
        .register::<CreditReservationRejected>()
        .register::<SequenceAdvanced>()
}

/// Routes trade requests to credit reservation and credit outcomes to trade
/// completion and rejection.
///
/// Reservation from the log backs up the command bus: a `ReserveCredit` lost
/// with the process is re-derived from its `TradeRequested`, and the account
/// ignores a trade it has already decided.
pub fn trading_router<S>(
    trades: Arc<TradeService<S>>,
    credit: Arc<CreditService<S>>,
) -> EventHandlerRouter
where
    S: EventStore + 'static,
{
    let on_reserved = Arc::clone(&trades);
    let on_rejected = trades;

    EventHandlerRouter::new()
        .on(move |event: Arc<TradeRequested>, envelope: EventEnvelope| {
            trade_requested(Arc::clone(&credit), event, envelope)
        })
        .on(move |event: Arc<CreditReserved>, envelope: EventEnvelope| {
            credit_reserved(Arc::clone(&on_reserved), event, envelope)
        })
        .on(move |event: Arc<CreditReservationRejected>, envelope: EventEnvelope| {
            credit_rejected(Arc::clone(&on_rejected), event, envelope)
        })
}

async fn trade_requested<S: EventStore>(
    credit: Arc<CreditService<S>>,
    event: Arc<TradeRequested>,
    envelope: EventEnvelope,
) -> Result<(), HandlerError> {
    credit
        .reserve_credit(&ReserveCredit::from(event.as_ref()), &caused_by(&envelope))
        .await?;
    Ok(())
}

async fn credit_reserved<S: EventStore>(
    trades: Arc<TradeService<S>>,
    event: Arc<CreditReserved>,
    envelope: EventEnvelope,
) -> Result<(), HandlerError> {
    trades
        .complete_trade(&event.trade_id, &caused_by(&envelope))
        .await?;
    Ok(())
}

async fn credit_rejected<S: EventStore>(
    trades: Arc<TradeService<S>>,
    event: Arc<CreditReservationRejected>,
    envelope: EventEnvelope,
) -> Result<(), HandlerError> {
    trades
        .reject_trade(&event.trade_id, &event.reason, &caused_by(&envelope))
        .await?;
    Ok(())
}

/// Metadata linking a follow-up write to the event that caused it.
fn caused_by(envelope: &EventEnvelope) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert(
        "causation".to_string(),
        serde_json::json!(format!("{}@{}", envelope.stream_id(), envelope.position())),
    );
    if let Some(correlation_id) = envelope.correlation_id() {
        metadata.insert(CorrelationId::HEADER.to_string(), serde_json::json!(correlation_id));
    }
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::StreamName;
    use event_store::Version;

    #[test]
    fn resolver_knows_every_trading_event() {
        let resolver = trading_resolver();
        for name in [
            "TradeRequested",
            "TradeCompleted",
            "TradeRejected",
            "CreditAccountOpened",
            "CreditReserved",
            "CreditReservationRejected",
            "SequenceAdvanced",
        ] {
            assert!(resolver.resolve(name).is_ok(), "{name} is not registered");
        }
    }

    #[test]
    fn follow_up_metadata_points_at_the_cause() {
        let correlation_id = CorrelationId::new();
        let envelope = EventEnvelope::new(
            StreamName::new("credit_account-acc-1"),
            "CreditReserved",
            Version::new(2),
            (),
        )
        .with_metadata(CorrelationId::HEADER, serde_json::json!(correlation_id));

        let metadata = caused_by(&envelope);
        assert_eq!(metadata["causation"], serde_json::json!("credit_account-acc-1@2"));
        assert_eq!(metadata[CorrelationId::HEADER], serde_json::json!(correlation_id));
    }
}
