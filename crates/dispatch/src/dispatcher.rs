//! Persistent subscription consumer.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use event_store::{
    Delivery, EventStoreError, NakAction, PersistentSubscription, RecordedEvent,
    SubscriptionSettings, SubscriptionStore,
};
use futures_util::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::resolver::EventTypeResolver;
use crate::router::EventHandlerRouter;

/// Default time a stopping dispatcher gets to finish the event in flight.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// The decision taken for one delivered event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The event was handled; it will not be delivered to this group again.
    Acknowledge,
    /// A handler lost a concurrency race; the event should be redelivered.
    Retry { reason: String },
    /// The event needs operator attention.
    Park { reason: String },
    /// Nothing here handles the event.
    Skip { reason: String },
}

impl DeliveryOutcome {
    /// Returns the outcome name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryOutcome::Acknowledge => "acknowledge",
            DeliveryOutcome::Retry { .. } => "retry",
            DeliveryOutcome::Park { .. } => "park",
            DeliveryOutcome::Skip { .. } => "skip",
        }
    }

    fn settle(self, delivery: Delivery) {
        match self {
            DeliveryOutcome::Acknowledge => delivery.ack(),
            DeliveryOutcome::Retry { reason } => delivery.nack(NakAction::Retry, reason),
            DeliveryOutcome::Park { reason } => delivery.nack(NakAction::Park, reason),
            DeliveryOutcome::Skip { reason } => delivery.nack(NakAction::Skip, reason),
        }
    }
}

/// Drives a persistent subscription, routing each event to its handlers.
///
/// Events are handled one at a time in delivery order; the next event is not
/// pulled until the current one has been settled.
pub struct EventDispatcher<S> {
    store: Arc<S>,
    settings: SubscriptionSettings,
    resolver: Arc<EventTypeResolver>,
    router: Arc<EventHandlerRouter>,
    shutdown_grace: Duration,
}

impl<S> EventDispatcher<S>
where
    S: SubscriptionStore + 'static,
{
    /// Creates a dispatcher for the group named in `settings`.
    pub fn new(
        store: Arc<S>,
        settings: SubscriptionSettings,
        resolver: EventTypeResolver,
        router: EventHandlerRouter,
    ) -> Self {
        Self {
            store,
            settings,
            resolver: Arc::new(resolver),
            router: Arc::new(router),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    /// Sets how long [`DispatcherHandle::stop`] waits before aborting.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Decides what happens to one delivered event.
    ///
    /// Undecodable events are parked, events without a handler are skipped,
    /// handler concurrency conflicts are retried and any other handler failure
    /// parks the event.
    pub async fn handle(&self, event: &RecordedEvent) -> DeliveryOutcome {
        let outcome = match self.resolver.decode(event) {
            Err(error) => DeliveryOutcome::Park {
                reason: error.to_string(),
            },
            Ok(envelope) if !self.router.can_route(&envelope) => DeliveryOutcome::Skip {
                reason: format!("no handler for {}", envelope.event_type()),
            },
            Ok(envelope) => {
                let routed = AssertUnwindSafe(self.router.route(&envelope))
                    .catch_unwind()
                    .await;
                match routed {
                    Ok(Ok(())) => DeliveryOutcome::Acknowledge,
                    Ok(Err(error)) if error.is_concurrency_conflict() => DeliveryOutcome::Retry {
                        reason: error.to_string(),
                    },
                    Ok(Err(error)) => DeliveryOutcome::Park {
                        reason: error.to_string(),
                    },
                    Err(_) => DeliveryOutcome::Park {
                        reason: format!("handler for {} panicked", envelope.event_type()),
                    },
                }
            }
        };

        metrics::counter!("dispatcher_deliveries_total", "outcome" => outcome.as_str())
            .increment(1);
        self.log_outcome(event, &outcome);
        outcome
    }

    fn log_outcome(&self, event: &RecordedEvent, outcome: &DeliveryOutcome) {
        let group = self.settings.group.as_str();
        let stream = event.stream_name.as_str();
        let event_type = event.event_type.as_str();
        let position = event.position.as_i64();

        match outcome {
            DeliveryOutcome::Acknowledge => {
                tracing::debug!(group, stream, event_type, position, "event acknowledged");
            }
            DeliveryOutcome::Retry { reason } => {
                tracing::info!(group, stream, event_type, position, %reason, "event retried");
            }
            DeliveryOutcome::Park { reason } => {
                tracing::error!(group, stream, event_type, position, %reason, "event parked");
            }
            DeliveryOutcome::Skip { reason } => {
                tracing::debug!(group, stream, event_type, position, %reason, "event skipped");
            }
        }
    }

    /// Connects the subscription and starts consuming in a background task.
    pub async fn start(self) -> Result<DispatcherHandle, EventStoreError> {
        let subscription =
            PersistentSubscription::connect(Arc::clone(&self.store), self.settings.clone())
                .await?;
        let (shutdown, shutdown_rx) = watch::channel(false);
        let group = self.settings.group.clone();
        let grace = self.shutdown_grace;

        tracing::info!(
            group = %group,
            event_types = self.resolver.len(),
            handlers = self.router.handler_count(),
            "event dispatcher started"
        );
        let task = tokio::spawn(self.run(subscription, shutdown_rx));

        Ok(DispatcherHandle {
            group,
            shutdown,
            task: Some(task),
            grace,
        })
    }

    async fn run(self, mut subscription: PersistentSubscription, mut shutdown: watch::Receiver<bool>) {
        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                next = subscription.next() => next,
            };

            match next {
                Some(Ok(delivery)) => {
                    let outcome = self.handle(delivery.event()).await;
                    outcome.settle(delivery);
                }
                Some(Err(error)) => {
                    // Reconnecting is left to whoever owns the process
                    tracing::error!(group = %self.settings.group, %error, "subscription dropped");
                    break;
                }
                None => {
                    tracing::warn!(group = %self.settings.group, "subscription ended");
                    break;
                }
            }
        }

        subscription.close().await;
    }
}

/// Owner of a running dispatcher.
///
/// Dropping the handle asks the dispatcher to stop after the event in flight.
pub struct DispatcherHandle {
    group: String,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
    grace: Duration,
}

impl DispatcherHandle {
    /// The consumer group being served.
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Returns true once the consume loop has ended.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Stops the dispatcher.
    ///
    /// The event in flight gets up to the grace period to finish; after that
    /// the task is aborted and the event is redelivered on the next start.
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        let Some(mut task) = self.task.take() else {
            return;
        };

        match tokio::time::timeout(self.grace, &mut task).await {
            Ok(Ok(())) => tracing::info!(group = %self.group, "event dispatcher stopped"),
            Ok(Err(error)) => {
                tracing::error!(group = %self.group, %error, "event dispatcher task failed");
            }
            Err(_) => {
                tracing::warn!(
                    group = %self.group,
                    grace_secs = self.grace.as_secs_f64(),
                    "event dispatcher did not stop in time, aborting"
                );
                task.abort();
            }
        }
    }
}

impl Drop for DispatcherHandle {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}
