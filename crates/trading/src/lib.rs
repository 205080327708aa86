//! Trade execution on top of the event-sourcing layers.
//!
//! A trade request starts a [`TradeExecution`] process. Committing its first
//! event emits a `ReserveCredit` command, which the command loop applies to the
//! account's [`CreditAccount`]. The event dispatcher re-derives the same
//! reservation from `TradeRequested`, so a command lost on the bus is still
//! applied. The credit outcome comes back through the dispatcher and completes
//! or rejects the trade:
//!
//! ```text
//! POST /trades ─► TradeRequested ─► ReserveCredit ─► CreditReserved ───────────► TradeCompleted
//!                                                 └► CreditReservationRejected ─► TradeRejected
//! ```

pub mod bus;
pub mod credit;
pub mod error;
pub mod handlers;
pub mod sequence;
pub mod service;
pub mod trade;

pub use bus::{
    ChannelCommandBus, CommandBusClosed, CommandLoopHandle, QueuedCommand, run_command_loop,
    spawn_command_loop,
};
pub use credit::{
    AccountSummary, CreditAccount, CreditAccountOpened, CreditEvent, CreditReservationRejected,
    CreditReserved,
};
pub use error::{Result, TradingError};
pub use handlers::{trading_resolver, trading_router};
pub use sequence::{InMemorySequenceProvider, SequenceAdvanced, SequenceProvider, StoreSequenceProvider};
pub use service::{CreditService, DEFAULT_CREDIT_LIMIT_CENTS, TradeService};
pub use trade::{
    ReserveCredit, Side, TradeCompleted, TradeEvent, TradeExecution, TradeRejected, TradeRequest,
    TradeRequested, TradeStatus, TradeSummary, TradingCommand,
};
