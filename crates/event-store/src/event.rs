use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::AggregateId;

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an event ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EventId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Per-stream version, used for optimistic concurrency control.
///
/// A stream with no events is at version 0; the first event is recorded at
/// version 1 and each subsequent event increments the version by one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Creates a new version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the initial version (0) of an empty stream.
    pub fn initial() -> Self {
        Self(0)
    }

    /// Returns the first version (1) for the first event.
    pub fn first() -> Self {
        Self(1)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns this version advanced by `count` events.
    pub fn advance(&self, count: usize) -> Self {
        Self(self.0 + count as i64)
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Version> for i64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

/// Position of an event in the global, all-streams log.
///
/// Event numbers start at 1 and increase monotonically across every stream.
/// Position 0 means "before the first event".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct EventNumber(i64);

impl EventNumber {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// The position before the first event.
    pub fn origin() -> Self {
        Self(0)
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for EventNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for EventNumber {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// Identifier of a single event stream.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(String);

impl StreamId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Stream holding the events of one aggregate instance.
    ///
    /// The aggregate type is used as a prefix so identities only need to be
    /// unique within their type.
    pub fn for_aggregate(aggregate_type: &str, id: &AggregateId) -> Self {
        Self(format!("{aggregate_type}-{id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StreamId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// An event proposed for appending to a stream.
///
/// The store assigns the stream version, the global event number and the
/// creation time when the event is recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    /// Unique identifier for this event.
    pub event_id: EventId,

    /// The type of the event (e.g., "MoneyDeposited").
    pub event_type: String,

    /// The event payload as JSON.
    pub data: serde_json::Value,

    /// Additional user metadata about the event.
    pub metadata: HashMap<String, serde_json::Value>,

    /// The command or event that caused this event.
    pub causation_id: Option<Uuid>,

    /// Identifier shared by every message of one logical workflow.
    pub correlation_id: Option<Uuid>,
}

impl EventData {
    /// Creates event data from a raw JSON payload.
    pub fn new(event_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event_id: EventId::new(),
            event_type: event_type.into(),
            data,
            metadata: HashMap::new(),
            causation_id: None,
            correlation_id: None,
        }
    }

    /// Creates event data by serializing a domain event.
    pub fn from_event<T: Serialize>(
        event_type: impl Into<String>,
        event: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(event_type, serde_json::to_value(event)?))
    }

    /// Adds a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_causation_id(mut self, causation_id: Option<Uuid>) -> Self {
        self.causation_id = causation_id;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: Option<Uuid>) -> Self {
        self.correlation_id = correlation_id;
        self
    }
}

/// An event as persisted by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedEvent {
    /// Unique identifier for this event.
    pub event_id: EventId,

    /// Global position across all streams; basis for subscription checkpoints.
    pub event_number: EventNumber,

    /// The stream this event belongs to.
    pub stream_id: StreamId,

    /// Position within its stream; basis for optimistic concurrency.
    pub stream_version: Version,

    /// The type of the event.
    pub event_type: String,

    /// The event payload as JSON.
    pub data: serde_json::Value,

    /// User metadata supplied when the event was appended.
    pub metadata: HashMap<String, serde_json::Value>,

    pub causation_id: Option<Uuid>,

    pub correlation_id: Option<Uuid>,

    /// When the event was recorded.
    pub created_at: DateTime<Utc>,
}

impl RecordedEvent {
    /// Builds the recorded form of a proposed event.
    pub(crate) fn record(
        data: EventData,
        stream_id: StreamId,
        stream_version: Version,
        event_number: EventNumber,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: data.event_id,
            event_number,
            stream_id,
            stream_version,
            event_type: data.event_type,
            data: data.data,
            metadata: data.metadata,
            causation_id: data.causation_id,
            correlation_id: data.correlation_id,
            created_at,
        }
    }

    /// Deserializes the payload into a concrete event type.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.data.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_id_new_creates_unique_ids() {
        let id1 = EventId::new();
        let id2 = EventId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn version_ordering() {
        let v1 = Version::new(1);
        let v2 = Version::new(2);
        assert!(v1 < v2);
        assert_eq!(v1.next(), v2);
        assert_eq!(v1.advance(9), Version::new(10));
    }

    #[test]
    fn version_initial_and_first() {
        assert_eq!(Version::initial().as_i64(), 0);
        assert_eq!(Version::first().as_i64(), 1);
        assert_eq!(Version::initial().next(), Version::first());
    }

    #[test]
    fn stream_id_for_aggregate_prefixes_type() {
        let stream = StreamId::for_aggregate("BankAccount", &AggregateId::from("acc-1"));
        assert_eq!(stream.as_str(), "BankAccount-acc-1");

        let stream = StreamId::for_aggregate("Counter", &AggregateId::from(7));
        assert_eq!(stream.as_str(), "Counter-7");
    }

    #[test]
    fn event_data_carries_metadata_and_ids() {
        let causation = Uuid::new_v4();
        let data = EventData::new("TestEvent", serde_json::json!({"n": 1}))
            .with_metadata("user", serde_json::json!("alice"))
            .with_causation_id(Some(causation));

        assert_eq!(data.event_type, "TestEvent");
        assert_eq!(data.metadata.get("user"), Some(&serde_json::json!("alice")));
        assert_eq!(data.causation_id, Some(causation));
        assert_eq!(data.correlation_id, None);
    }

    #[test]
    fn recorded_event_deserializes_payload() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Payload {
            n: u32,
        }

        let recorded = RecordedEvent::record(
            EventData::new("TestEvent", serde_json::json!({"n": 3})),
            StreamId::new("s"),
            Version::first(),
            EventNumber::new(1),
            Utc::now(),
        );

        assert_eq!(recorded.deserialize::<Payload>().unwrap(), Payload { n: 3 });
    }
}
