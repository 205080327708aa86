use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Notify, RwLock};

use crate::{
    EventData, EventStoreError, GlobalPosition, RecordedEvent, Result, StreamName, Version,
    store::{EventStore, ExpectedVersion, validate_events_for_append},
    subscription::{ParkedEvent, SubscriptionStore},
};

#[derive(Default)]
struct StreamRecord {
    events: Vec<RecordedEvent>,
    deleted: bool,
}

impl StreamRecord {
    fn last_position(&self) -> Option<Version> {
        self.events.last().map(|e| e.position)
    }
}

#[derive(Default)]
struct Log {
    streams: HashMap<StreamName, StreamRecord>,
    all: Vec<RecordedEvent>,
    checkpoints: HashMap<String, GlobalPosition>,
    parked: HashMap<String, Vec<ParkedEvent>>,
}

/// In-memory event store implementation for testing.
///
/// This implementation keeps streams, the global log, subscription
/// checkpoints and parked events in memory and provides the same interface
/// as the PostgreSQL implementation.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    log: Arc<RwLock<Log>>,
    appended: Arc<Notify>,
    append_calls: Arc<AtomicUsize>,
}

impl InMemoryEventStore {
    /// Creates a new empty in-memory event store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of events stored.
    pub async fn event_count(&self) -> usize {
        self.log.read().await.all.len()
    }

    /// Returns how many times `append_to_stream` has been called.
    pub fn append_calls(&self) -> usize {
        self.append_calls.load(Ordering::SeqCst)
    }

    /// Clears all streams, checkpoints and parked events.
    pub async fn clear(&self) {
        let mut log = self.log.write().await;
        *log = Log::default();
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn read_stream_forward(&self, stream: &StreamName) -> Result<Vec<RecordedEvent>> {
        let log = self.log.read().await;
        match log.streams.get(stream) {
            Some(record) if record.deleted => Err(EventStoreError::StreamDeleted(stream.clone())),
            Some(record) if !record.events.is_empty() => Ok(record.events.clone()),
            _ => Err(EventStoreError::StreamNotFound(stream.clone())),
        }
    }

    async fn append_to_stream(
        &self,
        stream: &StreamName,
        expected: ExpectedVersion,
        events: Vec<EventData>,
    ) -> Result<Version> {
        self.append_calls.fetch_add(1, Ordering::SeqCst);
        validate_events_for_append(&events).map_err(EventStoreError::InvalidAppend)?;

        let mut log = self.log.write().await;
        let Log { streams, all, .. } = &mut *log;

        let record = streams.entry(stream.clone()).or_default();
        if record.deleted {
            return Err(EventStoreError::StreamDeleted(stream.clone()));
        }

        let current = record.last_position();
        if !expected.is_satisfied_by(current) {
            return Err(EventStoreError::WrongExpectedVersion {
                stream: stream.clone(),
                expected,
                actual: current.unwrap_or_else(Version::initial),
            });
        }

        let mut position = current.unwrap_or_else(Version::initial);
        let timestamp = Utc::now();
        for event in events {
            position = position.next();
            let global_position = GlobalPosition::new(all.len() as i64 + 1);
            let recorded = RecordedEvent {
                event_id: event.event_id,
                stream_name: stream.clone(),
                event_type: event.event_type,
                position,
                global_position,
                timestamp,
                data: event.data,
                metadata: event.metadata,
            };
            record.events.push(recorded.clone());
            all.push(recorded);
        }

        drop(log);
        self.appended.notify_waiters();

        Ok(position)
    }

    async fn delete_stream(&self, stream: &StreamName, expected: ExpectedVersion) -> Result<()> {
        let mut log = self.log.write().await;
        let record = match log.streams.get_mut(stream) {
            Some(record) if record.deleted => {
                return Err(EventStoreError::StreamDeleted(stream.clone()));
            }
            Some(record) if !record.events.is_empty() => record,
            _ => return Err(EventStoreError::StreamNotFound(stream.clone())),
        };

        let current = record.last_position();
        if !expected.is_satisfied_by(current) {
            return Err(EventStoreError::WrongExpectedVersion {
                stream: stream.clone(),
                expected,
                actual: current.unwrap_or_else(Version::initial),
            });
        }

        record.deleted = true;
        Ok(())
    }

    async fn read_all_forward(
        &self,
        after: Option<GlobalPosition>,
        limit: usize,
    ) -> Result<Vec<RecordedEvent>> {
        let log = self.log.read().await;
        // Global positions are 1-based indexes into `all`.
        let start = after.map_or(0, |p| usize::try_from(p.as_i64()).unwrap_or(0));
        Ok(log.all.iter().skip(start).take(limit).cloned().collect())
    }

    async fn stream_version(&self, stream: &StreamName) -> Result<Option<Version>> {
        let log = self.log.read().await;
        Ok(log
            .streams
            .get(stream)
            .filter(|record| !record.deleted)
            .and_then(StreamRecord::last_position))
    }
}

#[async_trait]
impl SubscriptionStore for InMemoryEventStore {
    async fn load_checkpoint(&self, group: &str) -> Result<Option<GlobalPosition>> {
        Ok(self.log.read().await.checkpoints.get(group).copied())
    }

    async fn store_checkpoint(&self, group: &str, position: GlobalPosition) -> Result<()> {
        self.log
            .write()
            .await
            .checkpoints
            .insert(group.to_string(), position);
        Ok(())
    }

    async fn park_event(&self, group: &str, event: &RecordedEvent, reason: &str) -> Result<()> {
        self.log
            .write()
            .await
            .parked
            .entry(group.to_string())
            .or_default()
            .push(ParkedEvent {
                group: group.to_string(),
                event: event.clone(),
                reason: reason.to_string(),
                parked_at: Utc::now(),
            });
        Ok(())
    }

    async fn parked_events(&self, group: &str) -> Result<Vec<ParkedEvent>> {
        Ok(self
            .log
            .read()
            .await
            .parked
            .get(group)
            .cloned()
            .unwrap_or_default())
    }

    async fn wait_for_events(&self, after: Option<GlobalPosition>, timeout: Duration) {
        let notified = self.appended.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let head = self.log.read().await.all.len() as i64;
        if head > after.map_or(0, |p| p.as_i64()) {
            return;
        }

        let _ = tokio::time::timeout(timeout, notified).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::EventStoreExt;

    fn stream(name: &str) -> StreamName {
        StreamName::new(name)
    }

    fn create_test_event(event_type: &str) -> EventData {
        EventData::new(event_type, serde_json::json!({"test": true}))
    }

    #[tokio::test]
    async fn append_single_event() {
        let store = InMemoryEventStore::new();
        let stream = stream("trade-1");

        let result = store
            .append_to_stream(&stream, ExpectedVersion::NoStream, vec![create_test_event("TestEvent")])
            .await;
        assert_eq!(result.unwrap(), Version::first());

        let events = store.read_stream_forward(&stream).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].position, Version::first());
        assert_eq!(events[0].global_position, GlobalPosition::new(1));
    }

    #[tokio::test]
    async fn append_multiple_events_assigns_contiguous_positions() {
        let store = InMemoryEventStore::new();
        let stream = stream("trade-1");

        let events = vec![
            create_test_event("Event1"),
            create_test_event("Event2"),
            create_test_event("Event3"),
        ];

        let result = store
            .append_to_stream(&stream, ExpectedVersion::NoStream, events)
            .await;
        assert_eq!(result.unwrap(), Version::new(2));

        let stored = store.read_stream_forward(&stream).await.unwrap();
        let positions: Vec<i64> = stored.iter().map(|e| e.position.as_i64()).collect();
        assert_eq!(positions, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn wrong_expected_version_is_rejected() {
        let store = InMemoryEventStore::new();
        let stream = stream("trade-1");

        store
            .append_event(&stream, ExpectedVersion::NoStream, create_test_event("Event1"))
            .await
            .unwrap();

        let result = store
            .append_event(&stream, ExpectedVersion::NoStream, create_test_event("Event2"))
            .await;

        match result {
            Err(EventStoreError::WrongExpectedVersion {
                expected, actual, ..
            }) => {
                assert_eq!(expected, ExpectedVersion::NoStream);
                assert_eq!(actual, Version::first());
            }
            other => panic!("expected WrongExpectedVersion, got {other:?}"),
        }
        assert_eq!(store.event_count().await, 1);
    }

    #[tokio::test]
    async fn exact_expected_version_succeeds() {
        let store = InMemoryEventStore::new();
        let stream = stream("trade-1");

        store
            .append_event(&stream, ExpectedVersion::NoStream, create_test_event("Event1"))
            .await
            .unwrap();

        let result = store
            .append_event(
                &stream,
                ExpectedVersion::Exact(Version::first()),
                create_test_event("Event2"),
            )
            .await;

        assert_eq!(result.unwrap(), Version::new(1));
    }

    #[tokio::test]
    async fn read_unknown_stream_is_not_found() {
        let store = InMemoryEventStore::new();
        let result = store.read_stream_forward(&stream("trade-404")).await;
        assert!(matches!(result, Err(EventStoreError::StreamNotFound(_))));
    }

    #[tokio::test]
    async fn deleted_stream_is_distinguishable_from_missing() {
        let store = InMemoryEventStore::new();
        let stream = stream("trade-1");
        store
            .append_event(&stream, ExpectedVersion::NoStream, create_test_event("Event1"))
            .await
            .unwrap();

        store
            .delete_stream(&stream, ExpectedVersion::Any)
            .await
            .unwrap();

        assert!(matches!(
            store.read_stream_forward(&stream).await,
            Err(EventStoreError::StreamDeleted(_))
        ));
        assert!(matches!(
            store
                .append_event(&stream, ExpectedVersion::Any, create_test_event("Event2"))
                .await,
            Err(EventStoreError::StreamDeleted(_))
        ));
        assert!(!store.stream_exists(&stream).await.unwrap());
    }

    #[tokio::test]
    async fn empty_batch_is_invalid() {
        let store = InMemoryEventStore::new();
        let result = store
            .append_to_stream(&stream("trade-1"), ExpectedVersion::Any, vec![])
            .await;
        assert!(matches!(result, Err(EventStoreError::InvalidAppend(_))));
        assert_eq!(store.append_calls(), 1);
    }

    #[tokio::test]
    async fn read_all_forward_pages_in_global_order() {
        let store = InMemoryEventStore::new();
        store
            .append_event(&stream("a-1"), ExpectedVersion::Any, create_test_event("E1"))
            .await
            .unwrap();
        store
            .append_event(&stream("b-1"), ExpectedVersion::Any, create_test_event("E2"))
            .await
            .unwrap();
        store
            .append_event(&stream("a-1"), ExpectedVersion::Any, create_test_event("E3"))
            .await
            .unwrap();

        let first_page = store.read_all_forward(None, 2).await.unwrap();
        let types: Vec<&str> = first_page.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, vec!["E1", "E2"]);

        let rest = store
            .read_all_forward(Some(first_page[1].global_position), 10)
            .await
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].event_type, "E3");
        assert_eq!(rest[0].position, Version::new(1));
    }

    #[tokio::test]
    async fn stream_version_tracks_last_position() {
        let store = InMemoryEventStore::new();
        let stream = stream("trade-1");

        assert!(store.stream_version(&stream).await.unwrap().is_none());

        store
            .append_to_stream(
                &stream,
                ExpectedVersion::NoStream,
                vec![create_test_event("Event1"), create_test_event("Event2")],
            )
            .await
            .unwrap();

        assert_eq!(
            store.stream_version(&stream).await.unwrap(),
            Some(Version::new(1))
        );
    }

    #[tokio::test]
    async fn checkpoints_and_parked_events_are_per_group() {
        let store = InMemoryEventStore::new();
        store
            .append_event(&stream("a-1"), ExpectedVersion::Any, create_test_event("E1"))
            .await
            .unwrap();
        let event = store.read_all_forward(None, 1).await.unwrap().remove(0);

        store
            .store_checkpoint("g1", event.global_position)
            .await
            .unwrap();
        store.park_event("g1", &event, "bad payload").await.unwrap();

        assert_eq!(
            store.load_checkpoint("g1").await.unwrap(),
            Some(event.global_position)
        );
        assert!(store.load_checkpoint("g2").await.unwrap().is_none());

        let parked = store.parked_events("g1").await.unwrap();
        assert_eq!(parked.len(), 1);
        assert_eq!(parked[0].reason, "bad payload");
        assert!(store.parked_events("g2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn wait_for_events_returns_early_when_behind() {
        let store = InMemoryEventStore::new();
        store
            .append_event(&stream("a-1"), ExpectedVersion::Any, create_test_event("E1"))
            .await
            .unwrap();

        let waited = tokio::time::timeout(
            Duration::from_secs(1),
            store.wait_for_events(None, Duration::from_secs(30)),
        )
        .await;
        assert!(waited.is_ok());
    }
}
