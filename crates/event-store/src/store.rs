use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;
use futures_util::{TryStreamExt, stream};

use crate::{
    EventData, EventNumber, EventStoreError, RecordedEvent, Result, Snapshot, StartFrom, StreamId,
    Subscription, SubscriptionHandle, Version,
};

/// Options for appending events to a stream.
#[derive(Debug, Clone, Default)]
pub struct AppendOptions {
    /// Expected version of the stream for optimistic concurrency control.
    /// If None, no version check is performed (use with caution).
    pub expected_version: Option<Version>,
}

impl AppendOptions {
    /// Creates options with no version check.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates options expecting the stream to be at a specific version.
    pub fn expect_version(version: Version) -> Self {
        Self {
            expected_version: Some(version),
        }
    }

    /// Creates options expecting the stream to be empty.
    pub fn expect_new() -> Self {
        Self {
            expected_version: Some(Version::initial()),
        }
    }
}

/// A stream of recorded events.
pub type EventStream<'a> = Pin<Box<dyn Stream<Item = Result<RecordedEvent>> + Send + 'a>>;

/// Contract between the aggregate runtime and a durable event log.
///
/// The log is append-only, organised in streams with per-stream versions, and
/// globally ordered by event number. All implementations must be thread-safe
/// (Send + Sync).
#[async_trait]
pub trait EventStore: Send + Sync + 'static {
    /// Appends events to a stream.
    ///
    /// Events are appended atomically - either all succeed or none do.
    /// If `options.expected_version` is set, the operation fails with
    /// `WrongExpectedVersion` when the stream is at any other version and the
    /// stream is left untouched.
    ///
    /// Returns the new version of the stream after appending.
    async fn append_to_stream(
        &self,
        stream_id: &StreamId,
        options: AppendOptions,
        events: Vec<EventData>,
    ) -> Result<Version>;

    /// Reads at most `batch_size` events of a stream, starting at
    /// `from_version` (inclusive), in version order.
    async fn read_stream_forward(
        &self,
        stream_id: &StreamId,
        from_version: Version,
        batch_size: usize,
    ) -> Result<Vec<RecordedEvent>>;

    /// Reads at most `batch_size` events of the all-streams log with an event
    /// number strictly greater than `after`, in event number order.
    async fn read_all_forward(
        &self,
        after: EventNumber,
        batch_size: usize,
    ) -> Result<Vec<RecordedEvent>>;

    /// Returns the current version of a stream (0 when it has no events).
    async fn stream_version(&self, stream_id: &StreamId) -> Result<Version>;

    /// Attaches a subscriber to the all-streams log under `name`.
    ///
    /// If the name has a stored checkpoint, delivery resumes after the last
    /// acknowledged event and `start_from` is ignored. Fails with
    /// `SubscriptionAlreadyExists` while another subscriber is attached.
    async fn subscribe_to_all_streams(
        &self,
        name: &str,
        start_from: StartFrom,
    ) -> Result<Subscription>;

    /// Acknowledges receipt of an event, advancing the subscription's
    /// checkpoint. Checkpoints never move backwards.
    async fn ack(&self, handle: &SubscriptionHandle, event_number: EventNumber) -> Result<()>;

    /// Detaches the subscriber for `name`. The checkpoint is kept.
    async fn unsubscribe(&self, name: &str) -> Result<()>;

    /// Detaches any subscriber for `name` and forgets its checkpoint.
    async fn delete_subscription(&self, name: &str) -> Result<()>;

    /// Saves a snapshot, replacing any previous snapshot of the stream.
    async fn record_snapshot(&self, snapshot: Snapshot) -> Result<()>;

    /// Retrieves the latest snapshot of a stream.
    async fn read_snapshot(&self, stream_id: &StreamId) -> Result<Option<Snapshot>>;
}

/// Extension trait providing convenience methods for event stores.
#[async_trait]
pub trait EventStoreExt: EventStore {
    /// Appends a single event to a stream.
    async fn append_event(
        &self,
        stream_id: &StreamId,
        options: AppendOptions,
        event: EventData,
    ) -> Result<Version> {
        self.append_to_stream(stream_id, options, vec![event]).await
    }

    /// Checks if a stream exists (has any events).
    async fn stream_exists(&self, stream_id: &StreamId) -> Result<bool> {
        Ok(self.stream_version(stream_id).await? > Version::initial())
    }

    /// Streams every event of a stream from `from_version`, fetching
    /// `batch_size` events per read so memory stays bounded for long streams.
    fn stream_forward<'a>(
        &'a self,
        stream_id: &'a StreamId,
        from_version: Version,
        batch_size: usize,
    ) -> EventStream<'a> {
        let batch_size = batch_size.max(1);
        let batches = stream::try_unfold(Some(from_version), move |next| async move {
            let Some(from) = next else {
                return Ok(None);
            };
            let batch = self.read_stream_forward(stream_id, from, batch_size).await?;
            let next = match batch.last() {
                Some(last) if batch.len() == batch_size => Some(last.stream_version.next()),
                Some(_) => None,
                None => return Ok(None),
            };
            let events = stream::iter(batch.into_iter().map(Ok::<_, EventStoreError>));
            Ok::<_, EventStoreError>(Some((events, next)))
        });
        Box::pin(batches.try_flatten())
    }
}

// Blanket implementation for all EventStore implementations
impl<T: EventStore + ?Sized> EventStoreExt for T {}

/// Rejects appends that cannot be recorded.
pub(crate) fn validate_append(stream_id: &StreamId, events: &[EventData]) -> Result<()> {
    if events.is_empty() {
        return Err(EventStoreError::EmptyAppend(stream_id.clone()));
    }
    Ok(())
}

/// Fails with `WrongExpectedVersion` when `actual` differs from the expected
/// version in `options`.
pub(crate) fn check_expected_version(
    stream_id: &StreamId,
    options: &AppendOptions,
    actual: Version,
) -> Result<()> {
    match options.expected_version {
        Some(expected) if expected != actual => Err(EventStoreError::WrongExpectedVersion {
            stream_id: stream_id.clone(),
            expected,
            actual,
        }),
        _ => Ok(()),
    }
}
