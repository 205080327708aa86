//! Identifier sequences for new entities.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::{EntityId, StreamName};
use dispatch::EventPayload;
use event_store::{EventData, EventStore, EventStoreError, EventStoreExt, ExpectedVersion, Version};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TradingError};

/// Hands out identifiers for new entity instances.
#[async_trait]
pub trait SequenceProvider: Send + Sync {
    /// Returns the next identifier for the given entity kind.
    async fn next_id(&self, kind: &str) -> Result<EntityId>;
}

/// Per-kind counters held in memory, starting at 1.
#[derive(Debug, Clone, Default)]
pub struct InMemorySequenceProvider {
    counters: Arc<Mutex<HashMap<String, u64>>>,
}

impl InMemorySequenceProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SequenceProvider for InMemorySequenceProvider {
    async fn next_id(&self, kind: &str) -> Result<EntityId> {
        let next = {
            let mut counters = self
                .counters
                .lock()
                .map_err(|_| TradingError::Sequence("sequence lock poisoned".into()))?;
            let counter = counters.entry(kind.to_string()).or_insert(0);
            *counter += 1;
            *counter
        };
        Ok(EntityId::new(next.to_string())?)
    }
}

/// Marker event written to a sequence stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceAdvanced {}

impl EventPayload for SequenceAdvanced {
    const EVENT_TYPE: &'static str = "SequenceAdvanced";
}

/// Sequence kept in the event log, one stream per kind.
///
/// Each identifier is claimed by appending a marker event under optimistic
/// concurrency, so identifiers survive restarts and are never handed out twice
/// even with several writers.
#[derive(Debug, Clone)]
pub struct StoreSequenceProvider<S> {
    store: S,
    max_attempts: usize,
}

impl<S> StoreSequenceProvider<S> {
    /// Stream prefix of sequence streams.
    pub const STREAM_PREFIX: &'static str = "sequence";

    pub fn new(store: S) -> Self {
        Self {
            store,
            max_attempts: 16,
        }
    }
}

#[async_trait]
impl<S> SequenceProvider for StoreSequenceProvider<S>
where
    S: EventStore,
{
    #[tracing::instrument(skip(self))]
    async fn next_id(&self, kind: &str) -> Result<EntityId> {
        let stream = StreamName::new(format!("{}-{kind}", Self::STREAM_PREFIX));

        for _ in 0..self.max_attempts {
            let current = self
                .store
                .stream_version(&stream)
                .await?
                .unwrap_or_else(Version::initial);
            let marker = EventData::new(SequenceAdvanced::EVENT_TYPE, serde_json::json!({}));

            match self
                .store
                .append_event(&stream, ExpectedVersion::from_version(current), marker)
                .await
            {
                Ok(version) => return Ok(EntityId::new((version.as_i64() + 1).to_string())?),
                Err(EventStoreError::WrongExpectedVersion { .. }) => {
                    tracing::debug!(stream = %stream, "sequence contended, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(TradingError::Sequence(format!(
            "could not claim an identifier on {stream} after {} attempts",
            self.max_attempts
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_store::InMemoryEventStore;

    #[tokio::test]
    async fn in_memory_counters_are_per_kind() {
        let sequence = InMemorySequenceProvider::new();

        assert_eq!(sequence.next_id("trade").await.unwrap().as_str(), "1");
        assert_eq!(sequence.next_id("trade").await.unwrap().as_str(), "2");
        assert_eq!(sequence.next_id("account").await.unwrap().as_str(), "1");
    }

    #[tokio::test]
    async fn store_sequence_continues_after_a_new_provider() {
        let store = InMemoryEventStore::new();
        let first = StoreSequenceProvider::new(store.clone());
        first.next_id("trade").await.unwrap();
        first.next_id("trade").await.unwrap();

        let second = StoreSequenceProvider::new(store);
        assert_eq!(second.next_id("trade").await.unwrap().as_str(), "3");
    }

    #[tokio::test]
    async fn concurrent_claims_never_collide() {
        let sequence = Arc::new(StoreSequenceProvider::new(InMemoryEventStore::new()));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let sequence = Arc::clone(&sequence);
            tasks.push(tokio::spawn(async move { sequence.next_id("trade").await.unwrap() }));
        }

        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.unwrap().as_str().parse::<u32>().unwrap());
        }
        ids.sort_unstable();
        assert_eq!(ids, (1..=8).collect::<Vec<_>>());
    }
}
