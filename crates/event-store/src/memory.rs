use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{RwLock, watch};

use crate::{
    EventData, EventNumber, EventStoreError, RecordedEvent, Result, Snapshot, StartFrom,
    StreamId, Subscription, SubscriptionHandle, Version,
    store::{AppendOptions, EventStore, check_expected_version, validate_append},
    subscription::{ActiveSubscriptions, DeliveryOptions},
};

#[derive(Default)]
struct Log {
    /// All recorded events; the event at index `i` has event number `i + 1`.
    events: Vec<RecordedEvent>,
    /// Indexes into `events`, per stream, in version order.
    streams: HashMap<StreamId, Vec<usize>>,
    checkpoints: HashMap<String, EventNumber>,
    snapshots: HashMap<StreamId, Snapshot>,
}

impl Log {
    fn head(&self) -> EventNumber {
        EventNumber::new(self.events.len() as i64)
    }

    fn stream_version(&self, stream_id: &StreamId) -> Version {
        Version::new(self.streams.get(stream_id).map_or(0, Vec::len) as i64)
    }
}

/// In-memory event store implementation for testing.
///
/// This implementation keeps the log, subscription checkpoints and
/// snapshots in memory and provides the same interface as the PostgreSQL
/// implementation. Checkpoints live as long as the store, so a subscriber
/// re-attaching after a crash resumes from its last acknowledgment.
#[derive(Clone)]
pub struct InMemoryEventStore {
    log: Arc<RwLock<Log>>,
    head: Arc<watch::Sender<EventNumber>>,
    subscriptions: ActiveSubscriptions,
    delivery: DeliveryOptions,
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::with_delivery_options(DeliveryOptions::default())
    }
}

impl InMemoryEventStore {
    /// Creates a new empty in-memory event store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store with custom subscription delivery tuning.
    pub fn with_delivery_options(delivery: DeliveryOptions) -> Self {
        let (head, _) = watch::channel(EventNumber::origin());
        Self {
            log: Arc::new(RwLock::new(Log::default())),
            head: Arc::new(head),
            subscriptions: ActiveSubscriptions::default(),
            delivery,
        }
    }

    /// Returns the total number of events stored.
    pub async fn event_count(&self) -> usize {
        self.log.read().await.events.len()
    }

    /// Returns the last acknowledged event number of a subscription.
    pub async fn checkpoint(&self, name: &str) -> Option<EventNumber> {
        self.log.read().await.checkpoints.get(name).copied()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append_to_stream(
        &self,
        stream_id: &StreamId,
        options: AppendOptions,
        events: Vec<EventData>,
    ) -> Result<Version> {
        validate_append(stream_id, &events)?;

        let mut log = self.log.write().await;
        let current_version = log.stream_version(stream_id);
        check_expected_version(stream_id, &options, current_version)?;

        let created_at = Utc::now();
        let mut version = current_version;
        let mut indexes = Vec::with_capacity(events.len());
        for data in events {
            version = version.next();
            let event_number = log.head().next();
            indexes.push(log.events.len());
            log.events.push(RecordedEvent::record(
                data,
                stream_id.clone(),
                version,
                event_number,
                created_at,
            ));
        }
        log.streams
            .entry(stream_id.clone())
            .or_default()
            .extend(indexes);

        let head = log.head();
        drop(log);
        self.head.send_replace(head);

        tracing::trace!(%stream_id, %version, %head, "events appended");
        Ok(version)
    }

    async fn read_stream_forward(
        &self,
        stream_id: &StreamId,
        from_version: Version,
        batch_size: usize,
    ) -> Result<Vec<RecordedEvent>> {
        let log = self.log.read().await;
        let Some(indexes) = log.streams.get(stream_id) else {
            return Ok(Vec::new());
        };
        let skip = (from_version.as_i64().max(1) - 1) as usize;
        Ok(indexes
            .iter()
            .skip(skip)
            .take(batch_size)
            .map(|&index| log.events[index].clone())
            .collect())
    }

    async fn read_all_forward(
        &self,
        after: EventNumber,
        batch_size: usize,
    ) -> Result<Vec<RecordedEvent>> {
        let log = self.log.read().await;
        let skip = after.as_i64().max(0) as usize;
        Ok(log
            .events
            .iter()
            .skip(skip)
            .take(batch_size)
            .cloned()
            .collect())
    }

    async fn stream_version(&self, stream_id: &StreamId) -> Result<Version> {
        Ok(self.log.read().await.stream_version(stream_id))
    }

    async fn subscribe_to_all_streams(
        &self,
        name: &str,
        start_from: StartFrom,
    ) -> Result<Subscription> {
        self.subscriptions.ensure_available(name).await?;

        let start_after = {
            let mut log = self.log.write().await;
            let head = log.head();
            *log.checkpoints
                .entry(name.to_owned())
                .or_insert_with(|| match start_from {
                    StartFrom::Origin => EventNumber::origin(),
                    StartFrom::Current => head,
                    StartFrom::Position(position) => position,
                })
        };

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

        let mut log = self.log.write().await;
        let checkpoint = log
            .checkpoints
            .entry(handle.name().to_owned())
            .or_default();
        if event_number > *checkpoint {
            *checkpoint = event_number;
        }
        Ok(())
    }

    async fn unsubscribe(&self, name: &str) -> Result<()> {
        self.subscriptions.detach(name).await;
        Ok(())
    }

    async fn delete_subscription(&self, name: &str) -> Result<()> {
        self.subscriptions.detach(name).await;
        self.log.write().await.checkpoints.remove(name);
        Ok(())
    }

    async fn record_snapshot(&self, snapshot: Snapshot) -> Result<()> {
        let mut log = self.log.write().await;
        log.snapshots.insert(snapshot.stream_id.clone(), snapshot);
        Ok(())
    }

    async fn read_snapshot(&self, stream_id: &StreamId) -> Result<Option<Snapshot>> {
        Ok(self.log.read().await.snapshots.get(stream_id).cloned())
    }
}
