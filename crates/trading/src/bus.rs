//! In-process delivery of trading commands.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::CorrelationId;
use domain::MessageDispatcher;
use event_store::{EventStore, Metadata};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::service::CreditService;
use crate::trade::TradingCommand;

/// Attempts per command when the target account keeps changing underneath.
const MAX_CONFLICT_ATTEMPTS: usize = 3;

/// Returned when the command loop has gone away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("command bus is closed")]
pub struct CommandBusClosed;

/// A command and the metadata of the commit that emitted it.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedCommand {
    pub command: TradingCommand,
    pub metadata: Metadata,
}

/// Sends trading commands to the command loop over a bounded channel.
#[derive(Debug, Clone)]
pub struct ChannelCommandBus {
    sender: mpsc::Sender<QueuedCommand>,
}

impl ChannelCommandBus {
    /// Creates a bus and the receiver the command loop reads from.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<QueuedCommand>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl MessageDispatcher<TradingCommand> for ChannelCommandBus {
    type Error = CommandBusClosed;

    async fn dispatch(&self, command: TradingCommand, metadata: &Metadata) -> Result<(), CommandBusClosed> {
        self.sender
            .send(QueuedCommand {
                command,
                metadata: metadata.clone(),
            })
            .await
            .map_err(|_| CommandBusClosed)
    }
}

/// Applies commands from the bus until every sender is dropped or shutdown
/// is requested.
///
/// On shutdown the bus is closed and the commands already queued are still
/// applied before the loop returns. A command that loses a concurrency race
/// is re-applied against a fresh load of the account, up to a fixed number of
/// attempts. Other failures are logged and the loop moves on.
pub async fn run_command_loop<S>(
    mut receiver: mpsc::Receiver<QueuedCommand>,
    credit: Arc<CreditService<S>>,
    mut shutdown: watch::Receiver<bool>,
) where
    S: EventStore,
{
    tracing::info!("command loop started");

    loop {
        let stopping = tokio::select! {
            biased;
            _ = shutdown.changed() => true,
            queued = receiver.recv() => match queued {
                Some(queued) => {
                    apply(&credit, queued).await;
                    false
                }
                None => break,
            },
        };
        if stopping {
            receiver.close();
            let mut drained = 0usize;
            while let Some(queued) = receiver.recv().await {
                apply(&credit, queued).await;
                drained += 1;
            }
            tracing::info!(drained, "command bus closed");
            break;
        }
    }

    tracing::info!("command loop stopped");
}

async fn apply<S: EventStore>(credit: &CreditService<S>, queued: QueuedCommand) {
    match queued.command {
        TradingCommand::ReserveCredit(reserve) => {
            let mut metadata = Metadata::new();
            metadata.insert("command".to_string(), serde_json::json!("ReserveCredit"));
            if let Some(correlation_id) = queued.metadata.get(CorrelationId::HEADER) {
                metadata.insert(CorrelationId::HEADER.to_string(), correlation_id.clone());
            }

            for attempt in 1..=MAX_CONFLICT_ATTEMPTS {
                match credit.reserve_credit(&reserve, &metadata).await {
                    Ok(_) => {
                        metrics::counter!("commands_handled_total", "outcome" => "ok").increment(1);
                        break;
                    }
                    Err(e) if e.is_concurrency_conflict() && attempt < MAX_CONFLICT_ATTEMPTS => {
                        tracing::debug!(trade_id = %reserve.trade_id, attempt, "reservation conflicted, retrying");
                    }
                    Err(e) => {
                        metrics::counter!("commands_handled_total", "outcome" => "failed")
                            .increment(1);
                        tracing::error!(
                            trade_id = %reserve.trade_id,
                            account_id = %reserve.account_id,
                            error = %e,
                            "credit reservation failed"
                        );
                        break;
                    }
                }
            }
        }
    }
}

/// Starts the command loop on its own task.
pub fn spawn_command_loop<S>(
    receiver: mpsc::Receiver<QueuedCommand>,
    credit: Arc<CreditService<S>>,
    grace: Duration,
) -> CommandLoopHandle
where
    S: EventStore + 'static,
{
    let (shutdown, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(run_command_loop(receiver, credit, shutdown_rx));
    CommandLoopHandle {
        shutdown,
        task: Some(task),
        grace,
    }
}

/// Handle to a running command loop.
pub struct CommandLoopHandle {
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
    grace: Duration,
}

impl CommandLoopHandle {
    /// Closes the bus and waits for the queued commands to be applied.
    ///
    /// The loop gets up to the grace period to drain; after that it is
    /// aborted.
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        let Some(mut task) = self.task.take() else {
            return;
        };

        match tokio::time::timeout(self.grace, &mut task).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => tracing::error!(%error, "command loop task failed"),
            Err(_) => {
                tracing::warn!(
                    grace_secs = self.grace.as_secs_f64(),
                    "command loop did not drain in time, aborting"
                );
                task.abort();
            }
        }
    }
}

impl Drop for CommandLoopHandle {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}
