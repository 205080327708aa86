use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    EventData, EventId, EventStoreError, GlobalPosition, Metadata, RecordedEvent, Result,
    StreamName, Version,
    store::{EventStore, ExpectedVersion, validate_events_for_append},
    subscription::{ParkedEvent, SubscriptionStore},
};

/// Serializes appends so global positions become visible in commit order.
const APPEND_LOCK_KEY: i64 = 0x5452_4144_4553;

const EVENT_COLUMNS: &str =
    "global_position, event_id, stream_name, event_type, position, timestamp, data, metadata";

/// PostgreSQL-backed event store implementation.
#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    /// Creates a new PostgreSQL event store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects to the database at `url`.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_event(row: PgRow) -> Result<RecordedEvent> {
        let metadata_json: serde_json::Value = row.try_get("metadata")?;
        let metadata: Metadata = serde_json::from_value(metadata_json)?;

        Ok(RecordedEvent {
            event_id: EventId::from_uuid(row.try_get::<Uuid, _>("event_id")?),
            stream_name: StreamName::new(row.try_get::<String, _>("stream_name")?),
            event_type: row.try_get("event_type")?,
            position: Version::new(row.try_get("position")?),
            global_position: GlobalPosition::new(row.try_get("global_position")?),
            timestamp: row.try_get::<DateTime<Utc>, _>("timestamp")?,
            data: row.try_get("data")?,
            metadata,
        })
    }

    async fn stream_state(
        executor: impl sqlx::PgExecutor<'_>,
        stream: &StreamName,
    ) -> Result<Option<(Version, bool)>> {
        let row: Option<PgRow> =
            sqlx::query("SELECT version, deleted FROM streams WHERE stream_name = $1")
                .bind(stream.as_str())
                .fetch_optional(executor)
                .await?;

        row.map(|row| -> Result<(Version, bool)> {
            Ok((
                Version::new(row.try_get("version")?),
                row.try_get("deleted")?,
            ))
        })
        .transpose()
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    async fn read_stream_forward(&self, stream: &StreamName) -> Result<Vec<RecordedEvent>> {
        match Self::stream_state(&self.pool, stream).await? {
            None => return Err(EventStoreError::StreamNotFound(stream.clone())),
            Some((_, true)) => return Err(EventStoreError::StreamDeleted(stream.clone())),
            Some(_) => {}
        }

        let rows = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE stream_name = $1 ORDER BY position ASC"
        ))
        .bind(stream.as_str())
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Err(EventStoreError::StreamNotFound(stream.clone()));
        }

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn append_to_stream(
        &self,
        stream: &StreamName,
        expected: ExpectedVersion,
        events: Vec<EventData>,
    ) -> Result<Version> {
        validate_events_for_append(&events).map_err(EventStoreError::InvalidAppend)?;

        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(APPEND_LOCK_KEY)
            .execute(&mut *tx)
            .await?;

        let state = Self::stream_state(&mut *tx, stream).await?;
        if let Some((_, true)) = state {
            return Err(EventStoreError::StreamDeleted(stream.clone()));
        }

        let current = state.map(|(version, _)| version);
        if !expected.is_satisfied_by(current) {
            return Err(EventStoreError::WrongExpectedVersion {
                stream: stream.clone(),
                expected,
                actual: current.unwrap_or_else(Version::initial),
            });
        }

        let last_version = current.unwrap_or_else(Version::initial).as_i64() + events.len() as i64;

        sqlx::query(
            r#"
            INSERT INTO streams (stream_name, version, deleted)
            VALUES ($1, $2, FALSE)
            ON CONFLICT (stream_name) DO UPDATE SET version = EXCLUDED.version
            "#,
        )
        .bind(stream.as_str())
        .bind(last_version)
        .execute(&mut *tx)
        .await?;

        let timestamp = Utc::now();
        let mut position = current.unwrap_or_else(Version::initial);
        for event in &events {
            position = position.next();
            let metadata_json = serde_json::to_value(&event.metadata)?;

            sqlx::query(
                r#"
                INSERT INTO events (event_id, stream_name, event_type, position, timestamp, data, metadata)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(event.event_id.as_uuid())
            .bind(stream.as_str())
            .bind(&event.event_type)
            .bind(position.as_i64())
            .bind(timestamp)
            .bind(&event.data)
            .bind(metadata_json)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                // A racing writer that slipped past the version check
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.constraint() == Some("unique_stream_position")
                {
                    return EventStoreError::WrongExpectedVersion {
                        stream: stream.clone(),
                        expected,
                        actual: position,
                    };
                }
                EventStoreError::Database(e)
            })?;
        }

        tx.commit().await?;
        Ok(position)
    }

    async fn delete_stream(&self, stream: &StreamName, expected: ExpectedVersion) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let current = match Self::stream_state(&mut *tx, stream).await? {
            None => return Err(EventStoreError::StreamNotFound(stream.clone())),
            Some((_, true)) => return Err(EventStoreError::StreamDeleted(stream.clone())),
            Some((version, false)) => version,
        };

        if !expected.is_satisfied_by(Some(current)) {
            return Err(EventStoreError::WrongExpectedVersion {
                stream: stream.clone(),
                expected,
                actual: current,
            });
        }

        sqlx::query("UPDATE streams SET deleted = TRUE WHERE stream_name = $1")
            .bind(stream.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn read_all_forward(
        &self,
        after: Option<GlobalPosition>,
        limit: usize,
    ) -> Result<Vec<RecordedEvent>> {
        let rows = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE global_position > $1 ORDER BY global_position ASC LIMIT $2"
        ))
        .bind(after.map_or(0, |p| p.as_i64()))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn stream_version(&self, stream: &StreamName) -> Result<Option<Version>> {
        Ok(match Self::stream_state(&self.pool, stream).await? {
            Some((version, false)) => Some(version),
            _ => None,
        })
    }
}

#[async_trait]
impl SubscriptionStore for PostgresEventStore {
    async fn load_checkpoint(&self, group: &str) -> Result<Option<GlobalPosition>> {
        let position: Option<i64> = sqlx::query_scalar(
            "SELECT global_position FROM subscription_checkpoints WHERE group_name = $1",
        )
        .bind(group)
        .fetch_optional(&self.pool)
        .await?;

        Ok(position.map(GlobalPosition::new))
    }

    async fn store_checkpoint(&self, group: &str, position: GlobalPosition) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO subscription_checkpoints (group_name, global_position, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (group_name) DO UPDATE SET
                global_position = EXCLUDED.global_position,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(group)
        .bind(position.as_i64())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn park_event(&self, group: &str, event: &RecordedEvent, reason: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO parked_events (group_name, global_position, reason) VALUES ($1, $2, $3)",
        )
        .bind(group)
        .bind(event.global_position.as_i64())
        .bind(reason)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn parked_events(&self, group: &str) -> Result<Vec<ParkedEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT p.group_name, p.reason, p.parked_at,
                   e.global_position, e.event_id, e.stream_name, e.event_type,
                   e.position, e.timestamp, e.data, e.metadata
            FROM parked_events p
            JOIN events e ON e.global_position = p.global_position
            WHERE p.group_name = $1
            ORDER BY p.id ASC
            "#,
        )
        .bind(group)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let group = row.try_get("group_name")?;
                let reason = row.try_get("reason")?;
                let parked_at = row.try_get::<DateTime<Utc>, _>("parked_at")?;
                Ok(ParkedEvent {
                    group,
                    reason,
                    parked_at,
                    event: Self::row_to_event(row)?,
                })
            })
            .collect()
    }

    async fn wait_for_events(&self, _after: Option<GlobalPosition>, timeout: Duration) {
        // Polling; the feeder re-reads after every wait.
        tokio::time::sleep(timeout).await;
    }
}
