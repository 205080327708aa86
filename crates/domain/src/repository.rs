//! Loading and saving stream-backed entities.

use std::marker::PhantomData;

use async_trait::async_trait;
use common::{EntityId, StreamName};
use event_store::{EventData, EventStore, EventStoreError, ExpectedVersion, Metadata, Version};
use uuid::Uuid;

use crate::aggregate::{DomainEvent, Process};
use crate::entity::{AggregateRoot, ProcessRoot, StreamBacked};
use crate::error::DomainError;

/// Result of a save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The uncommitted events were appended; the stream is now at `version`.
    Committed { version: Version },

    /// There was nothing to append and no write was issued.
    NothingToCommit,
}

impl SaveOutcome {
    /// The new stream version, if anything was written.
    pub fn version(&self) -> Option<Version> {
        match self {
            SaveOutcome::Committed { version } => Some(*version),
            SaveOutcome::NothingToCommit => None,
        }
    }
}

/// Reads and writes one kind of stream-backed entity.
///
/// Every load re-reads the stream; nothing is cached between calls.
pub struct Repository<S, T> {
    store: S,
    _entity: PhantomData<fn() -> T>,
}

/// Repository for aggregates.
pub type AggregateRepository<S, A> = Repository<S, AggregateRoot<A>>;

impl<S: Clone, T> Clone for Repository<S, T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            _entity: PhantomData,
        }
    }
}

impl<S, T> Repository<S, T>
where
    S: EventStore,
    T: StreamBacked,
{
    /// Creates a new repository over the given event store.
    pub fn new(store: S) -> Self {
        Self {
            store,
            _entity: PhantomData,
        }
    }

    /// Returns a reference to the underlying event store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Loads an entity by replaying its stream.
    ///
    /// Fails with `NotFound` if the stream was never written and `Deleted` if
    /// it was deleted.
    #[tracing::instrument(skip_all, fields(kind = T::kind(), id = %id))]
    pub async fn load(&self, id: &EntityId) -> Result<T, DomainError> {
        self.read(id).await?.ok_or_else(|| DomainError::NotFound {
            stream: StreamName::for_entity(T::kind(), id),
        })
    }

    /// Loads an entity, or returns a fresh one if its stream was never written.
    ///
    /// Still fails with `Deleted` for a deleted stream.
    #[tracing::instrument(skip_all, fields(kind = T::kind(), id = %id))]
    pub async fn load_or_create(&self, id: &EntityId) -> Result<T, DomainError> {
        match self.read(id).await? {
            Some(entity) => Ok(entity),
            None => {
                tracing::debug!("stream not found, starting fresh entity");
                Ok(T::fresh(id.clone()))
            }
        }
    }

    /// Appends the entity's uncommitted events.
    ///
    /// The stream must still be at the version the entity had before those
    /// events were recorded. On a conflict the entity is left untouched so the
    /// caller can reload and retry. `metadata` is attached to every event of
    /// the batch.
    #[tracing::instrument(skip_all, fields(kind = T::kind(), id = %entity.id()))]
    pub async fn save(&self, entity: &mut T, metadata: &Metadata) -> Result<SaveOutcome, DomainError> {
        let pending = entity.uncommitted_events();
        if pending.is_empty() {
            tracing::debug!("nothing to commit");
            return Ok(SaveOutcome::NothingToCommit);
        }

        let stream = entity.stream_name();
        let expected = entity.expected_version();
        let events = Self::build_events(entity.id(), pending, metadata)?;
        let count = events.len();

        match self
            .store
            .append_to_stream(&stream, ExpectedVersion::from_version(expected), events)
            .await
        {
            Ok(version) => {
                entity.mark_committed();
                metrics::counter!("repository_saves_total", "kind" => T::kind()).increment(1);
                tracing::info!(stream = %stream, %version, events = count, "events committed");
                Ok(SaveOutcome::Committed { version })
            }
            Err(EventStoreError::WrongExpectedVersion { actual, .. }) => {
                metrics::counter!("repository_conflicts_total", "kind" => T::kind()).increment(1);
                tracing::warn!(stream = %stream, %expected, %actual, "concurrency conflict");
                Err(DomainError::ConcurrencyConflict {
                    stream,
                    expected,
                    actual,
                })
            }
            Err(EventStoreError::StreamDeleted(stream)) => Err(DomainError::Deleted { stream }),
            Err(e) => Err(e.into()),
        }
    }

    async fn read(&self, id: &EntityId) -> Result<Option<T>, DomainError> {
        let stream = StreamName::for_entity(T::kind(), id);
        let recorded = match self.store.read_stream_forward(&stream).await {
            Ok(recorded) => recorded,
            Err(EventStoreError::StreamNotFound(_)) => return Ok(None),
            Err(EventStoreError::StreamDeleted(stream)) => {
                return Err(DomainError::Deleted { stream });
            }
            Err(e) => return Err(e.into()),
        };

        let mut entity = T::fresh(id.clone());
        for event in &recorded {
            let expected = entity.version().next();
            if event.position != expected {
                return Err(DomainError::NonContiguousStream {
                    stream,
                    expected,
                    actual: event.position,
                });
            }

            let decoded = T::Event::from_event_data(&event.event_type, &event.data).map_err(
                |source| DomainError::Deserialization {
                    stream: stream.clone(),
                    position: event.position,
                    source,
                },
            )?;
            entity.replay(decoded);
        }
        entity.reset_pending();

        metrics::counter!("repository_loads_total", "kind" => T::kind()).increment(1);
        metrics::histogram!("repository_events_replayed").record(recorded.len() as f64);
        tracing::debug!(stream = %stream, version = %entity.version(), "entity loaded");

        Ok(Some(entity))
    }

    fn build_events(
        id: &EntityId,
        events: &[T::Event],
        metadata: &Metadata,
    ) -> Result<Vec<EventData>, DomainError> {
        let commit_id = Uuid::new_v4();

        events
            .iter()
            .map(|event| {
                Ok(event
                    .to_event_data()?
                    .with_metadata_map(metadata)
                    .with_metadata("entity_kind", serde_json::json!(T::kind()))
                    .with_metadata("entity_id", serde_json::json!(id.as_str()))
                    .with_metadata("commit_id", serde_json::json!(commit_id)))
            })
            .collect()
    }
}

/// Destination for messages produced by processes.
#[async_trait]
pub trait MessageDispatcher<M>: Send + Sync {
    /// Error returned when a message cannot be handed on.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Hands one message to its destination.
    ///
    /// `metadata` is the caller metadata of the commit that produced the
    /// message, so headers such as the correlation id can travel with it.
    async fn dispatch(&self, message: M, metadata: &Metadata) -> Result<(), Self::Error>;
}

/// Repository for processes.
///
/// Saving commits the process's events and then dispatches the messages those
/// events produced. Messages are never dispatched for a failed append.
pub struct ProcessRepository<S, P: Process, D> {
    inner: Repository<S, ProcessRoot<P>>,
    dispatcher: D,
}

impl<S: Clone, P: Process, D: Clone> Clone for ProcessRepository<S, P, D> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            dispatcher: self.dispatcher.clone(),
        }
    }
}

impl<S, P, D> ProcessRepository<S, P, D>
where
    S: EventStore,
    P: Process,
    D: MessageDispatcher<P::Message>,
{
    /// Creates a new process repository.
    pub fn new(store: S, dispatcher: D) -> Self {
        Self {
            inner: Repository::new(store),
            dispatcher,
        }
    }

    /// Returns a reference to the underlying event store.
    pub fn store(&self) -> &S {
        self.inner.store()
    }

    /// Loads a process by replaying its stream.
    pub async fn load(&self, id: &EntityId) -> Result<ProcessRoot<P>, DomainError> {
        self.inner.load(id).await
    }

    /// Loads a process, or returns a fresh one if its stream was never written.
    pub async fn load_or_create(&self, id: &EntityId) -> Result<ProcessRoot<P>, DomainError> {
        self.inner.load_or_create(id).await
    }

    /// Commits the process's events, then dispatches its pending messages.
    ///
    /// A dispatch failure is reported as `MessageDispatch`; the events stay
    /// committed and the remaining messages of the batch are dropped.
    pub async fn save(
        &self,
        process: &mut ProcessRoot<P>,
        metadata: &Metadata,
    ) -> Result<SaveOutcome, DomainError> {
        let outcome = self.inner.save(process, metadata).await?;
        let SaveOutcome::Committed { version } = outcome else {
            return Ok(outcome);
        };

        let messages = process.take_messages();
        let total = messages.len();
        for message in messages {
            if let Err(error) = self.dispatcher.dispatch(message, metadata).await {
                tracing::error!(
                    kind = P::KIND,
                    id = %process.id(),
                    %version,
                    %error,
                    "message dispatch failed after commit"
                );
                return Err(DomainError::MessageDispatch {
                    version,
                    source: Box::new(error),
                });
            }
        }

        if total > 0 {
            tracing::debug!(kind = P::KIND, id = %process.id(), messages = total, "messages dispatched");
        }
        Ok(outcome)
    }
}
