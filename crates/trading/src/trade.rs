//! The trade execution process.

use chrono::{DateTime, Utc};
use common::EntityId;
use dispatch::EventPayload;
use domain::{DomainEvent, Process, ProcessRoot, StreamBacked};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TradingError};

/// Direction of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    Buy,
    Sell,
}

/// The lifecycle of a trade.
///
/// ```text
/// New ──► Requested ──┬──► Completed
///                     └──► Rejected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeStatus {
    /// No request has been recorded.
    #[default]
    New,
    /// Waiting for the credit decision.
    Requested,
    /// Credit was reserved (terminal state).
    Completed,
    /// Credit was refused (terminal state).
    Rejected,
}

impl TradeStatus {
    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TradeStatus::Completed | TradeStatus::Rejected)
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::New => "NEW",
            TradeStatus::Requested => "REQUESTED",
            TradeStatus::Completed => "COMPLETED",
            TradeStatus::Rejected => "REJECTED",
        }
    }
}

impl std::fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An inbound request to execute a trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRequest {
    pub account_id: String,
    pub instrument: String,
    pub side: Side,
    pub quantity: u32,
    pub price_cents: i64,
}

impl TradeRequest {
    /// Checks the request and returns the amount of credit it needs.
    pub fn validate(&self) -> Result<i64> {
        if self.account_id.trim().is_empty() {
            return Err(TradingError::InvalidRequest("account_id must not be empty".into()));
        }
        if self.instrument.trim().is_empty() {
            return Err(TradingError::InvalidRequest("instrument must not be empty".into()));
        }
        if self.quantity == 0 {
            return Err(TradingError::InvalidRequest("quantity must be positive".into()));
        }
        if self.price_cents <= 0 {
            return Err(TradingError::InvalidRequest("price_cents must be positive".into()));
        }
        self.price_cents
            .checked_mul(i64::from(self.quantity))
            .ok_or_else(|| TradingError::InvalidRequest("trade amount overflows".into()))
    }
}

/// A trade was requested and is waiting for credit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRequested {
    pub trade_id: EntityId,
    pub account_id: EntityId,
    pub instrument: String,
    pub side: Side,
    pub quantity: u32,
    pub price_cents: i64,
    pub requested_at: DateTime<Utc>,
}

impl TradeRequested {
    /// Credit needed to settle the trade.
    pub fn amount_cents(&self) -> i64 {
        self.price_cents.saturating_mul(i64::from(self.quantity))
    }
}

/// Credit was reserved and the trade is done.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeCompleted {
    pub trade_id: EntityId,
    pub completed_at: DateTime<Utc>,
}

/// Credit was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRejected {
    pub trade_id: EntityId,
    pub reason: String,
    pub rejected_at: DateTime<Utc>,
}

impl EventPayload for TradeRequested {
    const EVENT_TYPE: &'static str = "TradeRequested";
}

impl EventPayload for TradeCompleted {
    const EVENT_TYPE: &'static str = "TradeCompleted";
}

impl EventPayload for TradeRejected {
    const EVENT_TYPE: &'static str = "TradeRejected";
}

/// Events in a trade's stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum TradeEvent {
    TradeRequested(TradeRequested),
    TradeCompleted(TradeCompleted),
    TradeRejected(TradeRejected),
}

impl DomainEvent for TradeEvent {
    fn event_type(&self) -> &'static str {
        match self {
            TradeEvent::TradeRequested(_) => TradeRequested::EVENT_TYPE,
            TradeEvent::TradeCompleted(_) => TradeCompleted::EVENT_TYPE,
            TradeEvent::TradeRejected(_) => TradeRejected::EVENT_TYPE,
        }
    }
}

/// Ask the credit side to reserve funds for a trade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReserveCredit {
    pub account_id: EntityId,
    pub trade_id: EntityId,
    pub amount_cents: i64,
}

impl From<&TradeRequested> for ReserveCredit {
    fn from(requested: &TradeRequested) -> Self {
        Self {
            account_id: requested.account_id.clone(),
            trade_id: requested.trade_id.clone(),
            amount_cents: requested.amount_cents(),
        }
    }
}

/// Commands a trade emits once its events are committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TradingCommand {
    ReserveCredit(ReserveCredit),
}

/// State of one trade, rebuilt from its stream.
#[derive(Debug, Default, Clone)]
pub struct TradeExecution {
    status: TradeStatus,
    request: Option<TradeRequested>,
    rejection_reason: Option<String>,
}

impl TradeExecution {
    pub fn status(&self) -> TradeStatus {
        self.status
    }

    /// The recorded request, once there is one.
    pub fn request(&self) -> Option<&TradeRequested> {
        self.request.as_ref()
    }

    pub fn rejection_reason(&self) -> Option<&str> {
        self.rejection_reason.as_deref()
    }

    /// Records the trade request.
    pub fn start(&self, trade_id: &EntityId, request: &TradeRequest) -> Result<Vec<TradeEvent>> {
        if self.status != TradeStatus::New {
            return Err(TradingError::InvalidTransition {
                trade_id: trade_id.clone(),
                status: self.status,
                action: "request",
            });
        }
        request.validate()?;

        Ok(vec![TradeEvent::TradeRequested(TradeRequested {
            trade_id: trade_id.clone(),
            account_id: EntityId::new(request.account_id.trim())?,
            instrument: request.instrument.trim().to_string(),
            side: request.side,
            quantity: request.quantity,
            price_cents: request.price_cents,
            requested_at: Utc::now(),
        })])
    }

    /// Completes a requested trade. Completing a completed trade is a no-op.
    pub fn complete(&self, trade_id: &EntityId) -> Result<Vec<TradeEvent>> {
        match self.status {
            TradeStatus::Requested => Ok(vec![TradeEvent::TradeCompleted(TradeCompleted {
                trade_id: trade_id.clone(),
                completed_at: Utc::now(),
            })]),
            TradeStatus::Completed => Ok(Vec::new()),
            status => Err(TradingError::InvalidTransition {
                trade_id: trade_id.clone(),
                status,
                action: "complete",
            }),
        }
    }

    /// Rejects a requested trade. Rejecting a rejected trade is a no-op.
    pub fn reject(&self, trade_id: &EntityId, reason: &str) -> Result<Vec<TradeEvent>> {
        match self.status {
            TradeStatus::Requested => Ok(vec![TradeEvent::TradeRejected(TradeRejected {
                trade_id: trade_id.clone(),
                reason: reason.to_string(),
                rejected_at: Utc::now(),
            })]),
            TradeStatus::Rejected => Ok(Vec::new()),
            status => Err(TradingError::InvalidTransition {
                trade_id: trade_id.clone(),
                status,
                action: "reject",
            }),
        }
    }
}

impl Process for TradeExecution {
    type Event = TradeEvent;
    type Message = TradingCommand;

    const KIND: &'static str = "trade";

    fn apply(&mut self, event: &TradeEvent, messages: &mut Vec<TradingCommand>) {
        match event {
            TradeEvent::TradeRequested(requested) => {
                self.status = TradeStatus::Requested;
                messages.push(TradingCommand::ReserveCredit(ReserveCredit::from(requested)));
                self.request = Some(requested.clone());
            }
            TradeEvent::TradeCompleted(_) => {
                self.status = TradeStatus::Completed;
            }
            TradeEvent::TradeRejected(rejected) => {
                self.status = TradeStatus::Rejected;
                self.rejection_reason = Some(rejected.reason.clone());
            }
        }
    }
}

/// Externally visible fields of a trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeSummary {
    pub trade_id: String,
    pub status: TradeStatus,
    pub account_id: Option<String>,
    pub instrument: Option<String>,
    pub side: Option<Side>,
    pub quantity: Option<u32>,
    pub price_cents: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    pub version: i64,
}

impl From<&ProcessRoot<TradeExecution>> for TradeSummary {
    fn from(trade: &ProcessRoot<TradeExecution>) -> Self {
        let state = trade.state();
        let request = state.request();
        Self {
            trade_id: trade.id().to_string(),
            status: state.status(),
            account_id: request.map(|r| r.account_id.to_string()),
            instrument: request.map(|r| r.instrument.clone()),
            side: request.map(|r| r.side),
            quantity: request.map(|r| r.quantity),
            price_cents: request.map(|r| r.price_cents),
            rejection_reason: state.rejection_reason().map(str::to_string),
            version: trade.version().as_i64(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_store::Version;

    fn id(value: &str) -> EntityId {
        EntityId::new(value).unwrap()
    }

    fn request() -> TradeRequest {
        TradeRequest {
            account_id: "acc-1".to_string(),
            instrument: "ACME".to_string(),
            side: Side::Buy,
            quantity: 10,
            price_cents: 1_250,
        }
    }

    fn requested_trade() -> ProcessRoot<TradeExecution> {
        let mut trade = ProcessRoot::<TradeExecution>::new(id("1"));
        trade.execute(|t| t.start(&id("1"), &request())).unwrap();
        trade
    }

    #[test]
    fn request_emits_reserve_credit_for_the_full_amount() {
        let trade = requested_trade();

        assert_eq!(trade.state().status(), TradeStatus::Requested);
        assert_eq!(trade.version(), Version::first());
        assert_eq!(
            trade.pending_messages(),
            &[TradingCommand::ReserveCredit(ReserveCredit {
                account_id: id("acc-1"),
                trade_id: id("1"),
                amount_cents: 12_500,
            })]
        );
    }

    #[test]
    fn invalid_requests_record_nothing() {
        let mut trade = ProcessRoot::<TradeExecution>::new(id("1"));
        let bad = TradeRequest {
            quantity: 0,
            ..request()
        };

        let result = trade.execute(|t| t.start(&id("1"), &bad));
        assert!(matches!(result, Err(TradingError::InvalidRequest(_))));
        assert!(trade.uncommitted_events().is_empty());
        assert!(trade.is_new());
    }

    #[test]
    fn overflowing_amount_is_rejected() {
        let huge = TradeRequest {
            quantity: u32::MAX,
            price_cents: i64::MAX,
            ..request()
        };
        assert!(matches!(huge.validate(), Err(TradingError::InvalidRequest(_))));
    }

    #[test]
    fn trade_cannot_be_requested_twice() {
        let trade = requested_trade();
        let result = trade.state().start(&id("1"), &request());
        assert!(matches!(
            result,
            Err(TradingError::InvalidTransition { action: "request", .. })
        ));
    }

    #[test]
    fn completion_is_idempotent() {
        let mut trade = requested_trade();
        assert_eq!(trade.execute(|t| t.complete(&id("1"))).unwrap(), 1);
        assert_eq!(trade.state().status(), TradeStatus::Completed);
        assert_eq!(trade.execute(|t| t.complete(&id("1"))).unwrap(), 0);
    }

    #[test]
    fn completed_trade_cannot_be_rejected() {
        let mut trade = requested_trade();
        trade.execute(|t| t.complete(&id("1"))).unwrap();

        let result = trade.state().reject(&id("1"), "late");
        assert!(matches!(
            result,
            Err(TradingError::InvalidTransition {
                status: TradeStatus::Completed,
                ..
            })
        ));
    }

    #[test]
    fn rejection_keeps_the_reason() {
        let mut trade = requested_trade();
        trade.execute(|t| t.reject(&id("1"), "limit exceeded")).unwrap();

        let summary = TradeSummary::from(&trade);
        assert_eq!(summary.status, TradeStatus::Rejected);
        assert_eq!(summary.rejection_reason.as_deref(), Some("limit exceeded"));
        assert_eq!(summary.version, 1);
    }

    #[test]
    fn stored_data_is_the_bare_payload() {
        let trade = requested_trade();
        let data = trade.uncommitted_events()[0].to_event_data().unwrap();

        assert_eq!(data.event_type, "TradeRequested");
        let payload: TradeRequested = serde_json::from_value(data.data).unwrap();
        assert_eq!(payload.quantity, 10);
        assert_eq!(payload.side, Side::Buy);
    }
}
