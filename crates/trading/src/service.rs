//! Application services for trades and credit accounts.

use std::sync::Arc;

use common::EntityId;
use domain::{
    AggregateRepository, AggregateRoot, Process, ProcessRepository, ProcessRoot, SaveOutcome,
    StreamBacked,
};
use event_store::{EventStore, Metadata};

use crate::bus::ChannelCommandBus;
use crate::credit::{AccountSummary, CreditAccount};
use crate::error::Result;
use crate::sequence::SequenceProvider;
use crate::trade::{ReserveCredit, TradeExecution, TradeRequest, TradeSummary};

/// Default credit line given to an account on its first reservation.
pub const DEFAULT_CREDIT_LIMIT_CENTS: i64 = 1_000_000;

/// Starts trades and moves them to their terminal states.
pub struct TradeService<S> {
    repository: ProcessRepository<S, TradeExecution, ChannelCommandBus>,
    sequence: Arc<dyn SequenceProvider>,
}

impl<S> TradeService<S>
where
    S: EventStore,
{
    /// Creates a trade service.
    ///
    /// Commands emitted by trades are sent on `bus` once the trade's events
    /// are committed.
    pub fn new(store: S, bus: ChannelCommandBus, sequence: Arc<dyn SequenceProvider>) -> Self {
        Self {
            repository: ProcessRepository::new(store, bus),
            sequence,
        }
    }

    /// Executes a trade request.
    ///
    /// A new trade id is taken from the sequence provider and the trade is
    /// committed as requested. The credit decision arrives asynchronously.
    #[tracing::instrument(skip_all, fields(account_id = %request.account_id, instrument = %request.instrument))]
    pub async fn execute_trade(
        &self,
        request: TradeRequest,
        metadata: &Metadata,
    ) -> Result<TradeSummary> {
        request.validate()?;

        let trade_id = self.sequence.next_id(TradeExecution::KIND).await?;
        let mut trade = ProcessRoot::<TradeExecution>::new(trade_id.clone());
        trade.execute(|t| t.start(&trade_id, &request))?;
        self.repository.save(&mut trade, metadata).await?;

        metrics::counter!("trades_requested_total").increment(1);
        tracing::info!(trade_id = %trade_id, "trade requested");
        Ok(TradeSummary::from(&trade))
    }

    /// Completes a requested trade.
    #[tracing::instrument(skip(self, metadata))]
    pub async fn complete_trade(&self, trade_id: &EntityId, metadata: &Metadata) -> Result<SaveOutcome> {
        let mut trade = self.repository.load(trade_id).await?;
        trade.execute(|t| t.complete(trade_id))?;
        let outcome = self.repository.save(&mut trade, metadata).await?;

        if outcome.version().is_some() {
            metrics::counter!("trades_finished_total", "status" => "completed").increment(1);
            tracing::info!(trade_id = %trade_id, "trade completed");
        }
        Ok(outcome)
    }

    /// Rejects a requested trade.
    #[tracing::instrument(skip(self, metadata))]
    pub async fn reject_trade(
        &self,
        trade_id: &EntityId,
        reason: &str,
        metadata: &Metadata,
    ) -> Result<SaveOutcome> {
        let mut trade = self.repository.load(trade_id).await?;
        trade.execute(|t| t.reject(trade_id, reason))?;
        let outcome = self.repository.save(&mut trade, metadata).await?;

        if outcome.version().is_some() {
            metrics::counter!("trades_finished_total", "status" => "rejected").increment(1);
            tracing::info!(trade_id = %trade_id, %reason, "trade rejected");
        }
        Ok(outcome)
    }

    /// Current view of a trade.
    pub async fn get_trade(&self, trade_id: &EntityId) -> Result<TradeSummary> {
        let trade = self.repository.load(trade_id).await?;
        Ok(TradeSummary::from(&trade))
    }
}

/// Reserves credit on trading accounts.
pub struct CreditService<S> {
    repository: AggregateRepository<S, CreditAccount>,
    default_limit_cents: i64,
}

impl<S> CreditService<S>
where
    S: EventStore,
{
    /// Creates a credit service; new accounts open with `default_limit_cents`.
    pub fn new(store: S, default_limit_cents: i64) -> Self {
        Self {
            repository: AggregateRepository::new(store),
            default_limit_cents,
        }
    }

    /// Applies a reservation to the account, opening the account first if
    /// it has never been used.
    #[tracing::instrument(skip_all, fields(account_id = %command.account_id, trade_id = %command.trade_id))]
    pub async fn reserve_credit(&self, command: &ReserveCredit, metadata: &Metadata) -> Result<SaveOutcome> {
        let mut account: AggregateRoot<CreditAccount> =
            self.repository.load_or_create(&command.account_id).await?;

        if account.is_new() {
            account.execute(|a| a.open(&command.account_id, self.default_limit_cents))?;
        }
        account.execute(|a| {
            a.reserve(&command.account_id, &command.trade_id, command.amount_cents)
        })?;

        let outcome = self.repository.save(&mut account, metadata).await?;
        tracing::debug!(
            available_cents = account.state().available_cents(),
            "credit reservation decided"
        );
        Ok(outcome)
    }

    /// Current view of an account.
    pub async fn get_account(&self, account_id: &EntityId) -> Result<AccountSummary> {
        let account = self.repository.load(account_id).await?;
        Ok(AccountSummary::from(&account))
    }
}
