//! Credit accounts and the reservation limit.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use common::EntityId;
use dispatch::EventPayload;
use domain::{Aggregate, AggregateRoot, DomainEvent, StreamBacked};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TradingError};

/// The account was opened with a credit limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditAccountOpened {
    pub account_id: EntityId,
    pub limit_cents: i64,
    pub opened_at: DateTime<Utc>,
}

/// Credit was set aside for a trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditReserved {
    pub account_id: EntityId,
    pub trade_id: EntityId,
    pub amount_cents: i64,
    pub reserved_at: DateTime<Utc>,
}

/// A reservation was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditReservationRejected {
    pub account_id: EntityId,
    pub trade_id: EntityId,
    pub amount_cents: i64,
    pub reason: String,
    pub rejected_at: DateTime<Utc>,
}

impl EventPayload for CreditAccountOpened {
    const EVENT_TYPE: &'static str = "CreditAccountOpened";
}

impl EventPayload for CreditReserved {
    const EVENT_TYPE: &'static str = "CreditReserved";
}

impl EventPayload for CreditReservationRejected {
    const EVENT_TYPE: &'static str = "CreditReservationRejected";
}

/// Events in a credit account's stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum CreditEvent {
    CreditAccountOpened(CreditAccountOpened),
    CreditReserved(CreditReserved),
    CreditReservationRejected(CreditReservationRejected),
}

impl DomainEvent for CreditEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CreditEvent::CreditAccountOpened(_) => CreditAccountOpened::EVENT_TYPE,
            CreditEvent::CreditReserved(_) => CreditReserved::EVENT_TYPE,
            CreditEvent::CreditReservationRejected(_) => CreditReservationRejected::EVENT_TYPE,
        }
    }
}

/// A trading account's credit line.
#[derive(Debug, Default, Clone)]
pub struct CreditAccount {
    opened: bool,
    limit_cents: i64,
    reserved_cents: i64,
    decided: HashSet<EntityId>,
}

impl CreditAccount {
    pub fn is_open(&self) -> bool {
        self.opened
    }

    pub fn limit_cents(&self) -> i64 {
        self.limit_cents
    }

    pub fn reserved_cents(&self) -> i64 {
        self.reserved_cents
    }

    /// Credit still available for new reservations.
    pub fn available_cents(&self) -> i64 {
        self.limit_cents - self.reserved_cents
    }

    /// Returns true if a reservation for the trade was already decided.
    pub fn has_decided(&self, trade_id: &EntityId) -> bool {
        self.decided.contains(trade_id)
    }

    /// Opens the account.
    pub fn open(&self, account_id: &EntityId, limit_cents: i64) -> Result<Vec<CreditEvent>> {
        if self.opened {
            return Err(TradingError::AccountAlreadyOpen(account_id.clone()));
        }
        if limit_cents < 0 {
            return Err(TradingError::InvalidRequest("credit limit must not be negative".into()));
        }
        Ok(vec![CreditEvent::CreditAccountOpened(CreditAccountOpened {
            account_id: account_id.clone(),
            limit_cents,
            opened_at: Utc::now(),
        })])
    }

    /// Reserves credit for a trade, or records why it cannot.
    ///
    /// A trade that was already decided produces no events, so a redelivered
    /// command does not reserve twice.
    pub fn reserve(
        &self,
        account_id: &EntityId,
        trade_id: &EntityId,
        amount_cents: i64,
    ) -> Result<Vec<CreditEvent>> {
        if !self.opened {
            return Err(TradingError::AccountNotOpen(account_id.clone()));
        }
        if self.has_decided(trade_id) {
            return Ok(Vec::new());
        }

        let event = if amount_cents <= 0 {
            self.rejection(account_id, trade_id, amount_cents, "amount must be positive".into())
        } else if amount_cents > self.available_cents() {
            let reason = format!(
                "credit limit exceeded: requested {amount_cents}, available {}",
                self.available_cents()
            );
            self.rejection(account_id, trade_id, amount_cents, reason)
        } else {
            CreditEvent::CreditReserved(CreditReserved {
                account_id: account_id.clone(),
                trade_id: trade_id.clone(),
                amount_cents,
                reserved_at: Utc::now(),
            })
        };
        Ok(vec![event])
    }

    fn rejection(
        &self,
        account_id: &EntityId,
        trade_id: &EntityId,
        amount_cents: i64,
        reason: String,
    ) -> CreditEvent {
        CreditEvent::CreditReservationRejected(CreditReservationRejected {
            account_id: account_id.clone(),
            trade_id: trade_id.clone(),
            amount_cents,
            reason,
            rejected_at: Utc::now(),
        })
    }
}

impl Aggregate for CreditAccount {
    type Event = CreditEvent;

    const KIND: &'static str = "credit_account";

    fn apply(&mut self, event: &CreditEvent) {
        match event {
            CreditEvent::CreditAccountOpened(opened) => {
                self.opened = true;
                self.limit_cents = opened.limit_cents;
            }
            CreditEvent::CreditReserved(reserved) => {
                self.reserved_cents += reserved.amount_cents;
                self.decided.insert(reserved.trade_id.clone());
            }
            CreditEvent::CreditReservationRejected(rejected) => {
                self.decided.insert(rejected.trade_id.clone());
            }
        }
    }
}

/// Externally visible fields of a credit account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub account_id: String,
    pub limit_cents: i64,
    pub reserved_cents: i64,
    pub available_cents: i64,
    pub version: i64,
}

impl From<&AggregateRoot<CreditAccount>> for AccountSummary {
    fn from(account: &AggregateRoot<CreditAccount>) -> Self {
        let state = account.state();
        Self {
            account_id: account.id().to_string(),
            limit_cents: state.limit_cents(),
            reserved_cents: state.reserved_cents(),
            available_cents: state.available_cents(),
            version: account.version().as_i64(),
        }
    }
}
