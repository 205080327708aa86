//! Durable, at-least-once subscriptions over the global log.
//!
//! A [`PersistentSubscription`] belongs to a consumer group. A feeder task
//! reads the log after the group's checkpoint and hands events to a single
//! consumer one at a time; the next event is not delivered until the current
//! one has been acknowledged or nacked. Checkpoints and parked events are kept
//! by the [`SubscriptionStore`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::{EventStore, EventStoreError, GlobalPosition, RecordedEvent, Result};

/// What the consumer wants done with an event it did not acknowledge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NakAction {
    /// Redeliver the same event later.
    Retry,
    /// Set the event aside for manual inspection and move on.
    Park,
    /// Move on without processing; the event is not interesting here.
    Skip,
}

impl NakAction {
    /// Returns the action name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            NakAction::Retry => "retry",
            NakAction::Park => "park",
            NakAction::Skip => "skip",
        }
    }
}

/// Configuration of one persistent subscription.
#[derive(Debug, Clone)]
pub struct SubscriptionSettings {
    /// Consumer group; checkpoints and parked events are kept per group.
    pub group: String,

    /// How many events the feeder reads from the log per round trip.
    pub batch_size: usize,

    /// Redeliveries allowed before a retried event is parked.
    pub max_retry_count: u32,

    /// Pause before a retried event is redelivered.
    pub retry_delay: Duration,

    /// Longest wait for new events when the feeder has caught up.
    pub idle_wait: Duration,
}

impl SubscriptionSettings {
    /// Creates settings for a group with default limits.
    pub fn new(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            batch_size: 100,
            max_retry_count: 10,
            retry_delay: Duration::from_millis(100),
            idle_wait: Duration::from_millis(250),
        }
    }

    /// Sets the redelivery limit.
    pub fn max_retry_count(mut self, max_retry_count: u32) -> Self {
        self.max_retry_count = max_retry_count;
        self
    }

    /// Sets the pause before a retried event is redelivered.
    pub fn retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Sets the idle wait.
    pub fn idle_wait(mut self, idle_wait: Duration) -> Self {
        self.idle_wait = idle_wait;
        self
    }

    /// Sets the read batch size.
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}

/// An event set aside by a consumer group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParkedEvent {
    /// The group that parked the event.
    pub group: String,

    /// The parked event.
    pub event: RecordedEvent,

    /// Why the event was parked.
    pub reason: String,

    /// When the event was parked.
    pub parked_at: DateTime<Utc>,
}

/// Storage side of persistent subscriptions.
#[async_trait]
pub trait SubscriptionStore: EventStore {
    /// Returns the last global position the group has finished with.
    async fn load_checkpoint(&self, group: &str) -> Result<Option<GlobalPosition>>;

    /// Records that the group has finished with everything up to `position`.
    async fn store_checkpoint(&self, group: &str, position: GlobalPosition) -> Result<()>;

    /// Adds an event to the group's parked set.
    async fn park_event(&self, group: &str, event: &RecordedEvent, reason: &str) -> Result<()>;

    /// Lists the group's parked events, oldest first.
    async fn parked_events(&self, group: &str) -> Result<Vec<ParkedEvent>>;

    /// Waits until events after `after` may be available, or `timeout` passes.
    ///
    /// This is only a wake-up hint; the feeder always re-reads the log.
    async fn wait_for_events(&self, after: Option<GlobalPosition>, timeout: Duration) {
        let _ = after;
        tokio::time::sleep(timeout).await;
    }
}

#[derive(Debug)]
enum Decision {
    Ack,
    Nak(NakAction, String),
}

/// One event handed to the consumer, awaiting its decision.
///
/// Dropping a delivery without deciding leaves the group's checkpoint where
/// it was, so the event is delivered again on the next connection.
#[derive(Debug)]
pub struct Delivery {
    event: RecordedEvent,
    retry_count: u32,
    reply: oneshot::Sender<Decision>,
}

impl Delivery {
    /// The delivered event.
    pub fn event(&self) -> &RecordedEvent {
        &self.event
    }

    /// How many times this event has been redelivered after a retry.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Marks the event as processed.
    pub fn ack(self) {
        let _ = self.reply.send(Decision::Ack);
    }

    /// Declines the event with the given action.
    pub fn nack(self, action: NakAction, reason: impl Into<String>) {
        let _ = self.reply.send(Decision::Nak(action, reason.into()));
    }
}

/// Consumer end of a persistent subscription.
pub struct PersistentSubscription {
    group: String,
    deliveries: mpsc::Receiver<Result<Delivery>>,
    shutdown: watch::Sender<bool>,
    feeder: Option<JoinHandle<()>>,
}

impl PersistentSubscription {
    /// Connects to the group's subscription, resuming after its checkpoint.
    pub async fn connect<S>(store: Arc<S>, settings: SubscriptionSettings) -> Result<Self>
    where
        S: SubscriptionStore + 'static,
    {
        let checkpoint = store.load_checkpoint(&settings.group).await?;
        let (deliveries_tx, deliveries) = mpsc::channel(1);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let group = settings.group.clone();

        tracing::info!(group = %group, checkpoint = ?checkpoint, "persistent subscription connected");

        let feeder = Feeder {
            store,
            settings,
            deliveries: deliveries_tx,
            shutdown: shutdown_rx,
        };
        let feeder = tokio::spawn(feeder.run(checkpoint));

        Ok(Self {
            group,
            deliveries,
            shutdown,
            feeder: Some(feeder),
        })
    }

    /// The consumer group of this subscription.
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Waits for the next delivery.
    ///
    /// Returns `Some(Err(SubscriptionDropped))` once if the feeder failed, and
    /// `None` after the subscription has ended.
    pub async fn next(&mut self) -> Option<Result<Delivery>> {
        self.deliveries.recv().await
    }

    /// Stops the feeder and waits for it to finish.
    pub async fn close(mut self) {
        let _ = self.shutdown.send(true);
        self.deliveries.close();
        if let Some(feeder) = self.feeder.take()
            && let Err(error) = feeder.await
        {
            tracing::warn!(group = %self.group, %error, "subscription feeder ended abnormally");
        }
        tracing::info!(group = %self.group, "persistent subscription closed");
    }
}

impl Drop for PersistentSubscription {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

struct Feeder<S> {
    store: Arc<S>,
    settings: SubscriptionSettings,
    deliveries: mpsc::Sender<Result<Delivery>>,
    shutdown: watch::Receiver<bool>,
}

impl<S: SubscriptionStore> Feeder<S> {
    async fn run(mut self, checkpoint: Option<GlobalPosition>) {
        if let Err(error) = self.feed(checkpoint).await {
            tracing::error!(group = %self.settings.group, %error, "persistent subscription dropped");
            let _ = self
                .deliveries
                .send(Err(EventStoreError::SubscriptionDropped(error.to_string())))
                .await;
        }
    }

    async fn feed(&mut self, mut checkpoint: Option<GlobalPosition>) -> Result<()> {
        loop {
            if *self.shutdown.borrow() {
                return Ok(());
            }

            let batch = self
                .store
                .read_all_forward(checkpoint, self.settings.batch_size)
                .await?;

            if batch.is_empty() {
                tokio::select! {
                    changed = self.shutdown.changed() => {
                        if changed.is_err() {
                            return Ok(());
                        }
                    }
                    () = self.store.wait_for_events(checkpoint, self.settings.idle_wait) => {}
                }
                continue;
            }

            for event in batch {
                let position = event.global_position;
                if !self.deliver(event).await? {
                    return Ok(());
                }
                self.store
                    .store_checkpoint(&self.settings.group, position)
                    .await?;
                checkpoint = Some(position);
            }
        }
    }

    /// Delivers one event until the consumer settles it.
    ///
    /// Returns `Ok(false)` if the consumer went away or the subscription was
    /// closed before a decision was made.
    async fn deliver(&mut self, event: RecordedEvent) -> Result<bool> {
        let mut retry_count = 0;

        loop {
            let (reply, decision) = oneshot::channel();
            let delivery = Delivery {
                event: event.clone(),
                retry_count,
                reply,
            };

            tokio::select! {
                sent = self.deliveries.send(Ok(delivery)) => {
                    if sent.is_err() {
                        return Ok(false);
                    }
                }
                _ = self.shutdown.changed() => return Ok(false),
            }

            // A decision that is already made wins over a concurrent close
            let decision = tokio::select! {
                biased;
                decision = decision => match decision {
                    Ok(decision) => decision,
                    Err(_) => return Ok(false),
                },
                _ = self.shutdown.changed() => return Ok(false),
            };

            match decision {
                Decision::Ack => return Ok(true),
                Decision::Nak(NakAction::Skip, reason) => {
                    tracing::debug!(
                        group = %self.settings.group,
                        stream = %event.stream_name,
                        position = %event.position,
                        %reason,
                        "event skipped"
                    );
                    return Ok(true);
                }
                Decision::Nak(NakAction::Park, reason) => {
                    self.park(&event, &reason).await?;
                    return Ok(true);
                }
                Decision::Nak(NakAction::Retry, reason) => {
                    metrics::counter!("subscription_retries_total").increment(1);
                    if retry_count >= self.settings.max_retry_count {
                        let reason = format!(
                            "retry limit of {} exceeded: {reason}",
                            self.settings.max_retry_count
                        );
                        self.park(&event, &reason).await?;
                        return Ok(true);
                    }
                    retry_count += 1;
                    tracing::debug!(
                        group = %self.settings.group,
                        stream = %event.stream_name,
                        position = %event.position,
                        retry_count,
                        %reason,
                        "event scheduled for redelivery"
                    );

                    if !self.settings.retry_delay.is_zero() {
                        tokio::select! {
                            () = tokio::time::sleep(self.settings.retry_delay) => {}
                            _ = self.shutdown.changed() => return Ok(false),
                        }
                    }
                }
            }
        }
    }

    async fn park(&self, event: &RecordedEvent, reason: &str) -> Result<()> {
        self.store
            .park_event(&self.settings.group, event, reason)
            .await?;
        metrics::counter!("subscription_parked_total").increment(1);
        tracing::warn!(
            group = %self.settings.group,
            stream = %event.stream_name,
            position = %event.position,
            event_type = %event.event_type,
            %reason,
            "event parked"
        );
        Ok(())
    }
}
