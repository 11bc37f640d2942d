use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row, postgres::PgRow};
use tokio::sync::watch;
use uuid::Uuid;

use crate::{
    EventData, EventId, EventNumber, EventStoreError, RecordedEvent, Result, Snapshot, StartFrom,
    StreamId, Subscription, SubscriptionHandle, Version,
    store::{AppendOptions, EventStore, check_expected_version, validate_append},
    subscription::{ActiveSubscriptions, DeliveryOptions},
};

/// Advisory lock taken by every append so event numbers become visible in
/// commit order. Subscribers reading by event number never skip a row that
/// commits late.
const APPEND_LOCK_KEY: i64 = 0x6576_656e_7473;

const EVENT_COLUMNS: &str = "event_number, event_id, stream_id, stream_version, event_type, \
     data, metadata, causation_id, correlation_id, created_at";

/// PostgreSQL-backed event store implementation.
#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
    head: Arc<watch::Sender<EventNumber>>,
    subscriptions: ActiveSubscriptions,
    delivery: DeliveryOptions,
}

impl PostgresEventStore {
    /// Creates a new PostgreSQL event store.
    ///
    /// Subscriptions poll for events written by other processes every 500ms.
    pub fn new(pool: PgPool) -> Self {
        Self::with_delivery_options(
            pool,
            DeliveryOptions {
                poll_interval: Some(Duration::from_millis(500)),
                ..DeliveryOptions::default()
            },
        )
    }

    /// Creates a store with custom subscription delivery tuning.
    pub fn with_delivery_options(pool: PgPool, delivery: DeliveryOptions) -> Self {
        let (head, _) = watch::channel(EventNumber::origin());
        Self {
            pool,
            head: Arc::new(head),
            subscriptions: ActiveSubscriptions::default(),
            delivery,
        }
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

    /// Returns the last acknowledged event number of a subscription.
    pub async fn checkpoint(&self, name: &str) -> Result<Option<EventNumber>> {
        let last_seen: Option<i64> = sqlx::query_scalar(
            "SELECT last_seen FROM subscriptions WHERE subscription_name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(last_seen.map(EventNumber::new))
    }

    async fn head_position(&self) -> Result<EventNumber> {
        let head: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(event_number), 0) FROM events")
            .fetch_one(&self.pool)
            .await?;
        Ok(EventNumber::new(head))
    }

    fn row_to_event(row: PgRow) -> Result<RecordedEvent> {
        let metadata_json: serde_json::Value = row.try_get("metadata")?;
        let metadata: HashMap<String, serde_json::Value> = serde_json::from_value(metadata_json)?;

        Ok(RecordedEvent {
            event_id: EventId::from_uuid(row.try_get::<Uuid, _>("event_id")?),
            event_number: EventNumber::new(row.try_get("event_number")?),
            stream_id: StreamId::new(row.try_get::<String, _>("stream_id")?),
            stream_version: Version::new(row.try_get("stream_version")?),
            event_type: row.try_get("event_type")?,
            data: row.try_get("data")?,
            metadata,
            causation_id: row.try_get("causation_id")?,
            correlation_id: row.try_get("correlation_id")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    #[tracing::instrument(skip(self, events), fields(count = events.len()))]
    async fn append_to_stream(
        &self,
        stream_id: &StreamId,
        options: AppendOptions,
        events: Vec<EventData>,
    ) -> Result<Version> {
        validate_append(stream_id, &events)?;

        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(APPEND_LOCK_KEY)
            .execute(&mut *tx)
            .await?;

        let current: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(stream_version), 0) FROM events WHERE stream_id = $1",
        )
        .bind(stream_id.as_str())
        .fetch_one(&mut *tx)
        .await?;
        let current_version = Version::new(current);
        check_expected_version(stream_id, &options, current_version)?;

        let created_at = Utc::now();
        let mut version = current_version;
        let mut last_event_number = EventNumber::origin();
        for event in &events {
            version = version.next();
            let metadata_json = serde_json::to_value(&event.metadata)?;

            let event_number: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO events (event_id, stream_id, stream_version, event_type, data, metadata, causation_id, correlation_id, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                RETURNING event_number
                "#,
            )
            .bind(event.event_id.as_uuid())
            .bind(stream_id.as_str())
            .bind(version.as_i64())
            .bind(&event.event_type)
            .bind(&event.data)
            .bind(metadata_json)
            .bind(event.causation_id)
            .bind(event.correlation_id)
            .bind(created_at)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                // A unique violation means another writer got there first.
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.constraint() == Some("unique_stream_version")
                {
                    return EventStoreError::WrongExpectedVersion {
                        stream_id: stream_id.clone(),
                        expected: options.expected_version.unwrap_or(current_version),
                        actual: version,
                    };
                }
                EventStoreError::Database(e)
            })?;

            last_event_number = EventNumber::new(event_number);
        }

        tx.commit().await?;
        self.head.send_replace(last_event_number);
        Ok(version)
    }

    async fn read_stream_forward(
        &self,
        stream_id: &StreamId,
        from_version: Version,
        batch_size: usize,
    ) -> Result<Vec<RecordedEvent>> {
        let rows = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM events \
             WHERE stream_id = $1 AND stream_version >= $2 \
             ORDER BY stream_version ASC LIMIT $3"
        ))
        .bind(stream_id.as_str())
        .bind(from_version.as_i64())
        .bind(batch_size as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn read_all_forward(
        &self,
        after: EventNumber,
        batch_size: usize,
    ) -> Result<Vec<RecordedEvent>> {
        let rows = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM events \
             WHERE event_number > $1 \
             ORDER BY event_number ASC LIMIT $2"
        ))
        .bind(after.as_i64())
        .bind(batch_size as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn stream_version(&self, stream_id: &StreamId) -> Result<Version> {
        let version: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(stream_version), 0) FROM events WHERE stream_id = $1",
        )
        .bind(stream_id.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(Version::new(version))
    }

    #[tracing::instrument(skip(self))]
    async fn subscribe_to_all_streams(
        &self,
        name: &str,
        start_from: StartFrom,
    ) -> Result<Subscription> {
        self.subscriptions.ensure_available(name).await?;

        let initial = match start_from {
            StartFrom::Origin => EventNumber::origin(),
            StartFrom::Current => self.head_position().await?,
            StartFrom::Position(position) => position,
        };

        sqlx::query(
            r#"
            INSERT INTO subscriptions (subscription_name, last_seen)
            VALUES ($1, $2)
            ON CONFLICT (subscription_name) DO NOTHING
            "#,
        )
        .bind(name)
        .bind(initial.as_i64())
        .execute(&self.pool)
        .await?;

        let start_after = self
            .checkpoint(name)
            .await?
            .ok_or_else(|| EventStoreError::SubscriptionNotFound(name.to_owned()))?;

        self.subscriptions
            .attach(
                self.clone(),
                name,
                start_after,
                self.head.subscribe(),
                &self.delivery,
            )
            .await
    }

    async fn ack(&self, handle: &SubscriptionHandle, event_number: EventNumber) -> Result<()> {
        if !self.subscriptions.is_current(handle).await {
            return Err(EventStoreError::SubscriptionNotFound(
                handle.name().to_owned(),
            ));
        }

        sqlx::query(
            r#"
            UPDATE subscriptions SET last_seen = GREATEST(last_seen, $2)
            WHERE subscription_name = $1
            "#,
        )
        .bind(handle.name())
        .bind(event_number.as_i64())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn unsubscribe(&self, name: &str) -> Result<()> {
        self.subscriptions.detach(name).await;
        Ok(())
    }

    async fn delete_subscription(&self, name: &str) -> Result<()> {
        self.subscriptions.detach(name).await;
        sqlx::query("DELETE FROM subscriptions WHERE subscription_name = $1")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_snapshot(&self, snapshot: Snapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO snapshots (stream_id, aggregate_type, schema_version, stream_version, state, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (stream_id) DO UPDATE SET
                aggregate_type = EXCLUDED.aggregate_type,
                schema_version = EXCLUDED.schema_version,
                stream_version = EXCLUDED.stream_version,
                state = EXCLUDED.state,
                created_at = EXCLUDED.created_at
            "#,
        )
        .bind(snapshot.stream_id.as_str())
        .bind(&snapshot.aggregate_type)
        .bind(snapshot.schema_version as i32)
        .bind(snapshot.version.as_i64())
        .bind(&snapshot.state)
        .bind(snapshot.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn read_snapshot(&self, stream_id: &StreamId) -> Result<Option<Snapshot>> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT stream_id, aggregate_type, schema_version, stream_version, state, created_at
            FROM snapshots
            WHERE stream_id = $1
            "#,
        )
        .bind(stream_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Snapshot {
                stream_id: StreamId::new(row.try_get::<String, _>("stream_id")?),
                aggregate_type: row.try_get("aggregate_type")?,
                schema_version: row.try_get::<i32, _>("schema_version")? as u32,
                version: Version::new(row.try_get("stream_version")?),
                created_at: row.try_get("created_at")?,
                state: row.try_get("state")?,
            })),
            None => Ok(None),
        }
    }
}
