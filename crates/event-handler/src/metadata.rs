//! Metadata envelope handed to event handlers.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use event_store::{EventId, EventNumber, RecordedEvent, StreamId, Version};
use serde_json::{Map, Value, json};
use uuid::Uuid;

/// Keys computed by the store. They always take precedence over user
/// metadata with the same name.
pub const RESERVED_KEYS: [&str; 8] = [
    "event_id",
    "event_number",
    "stream_id",
    "stream_version",
    "event_type",
    "causation_id",
    "correlation_id",
    "created_at",
];

/// Store-computed fields of a recorded event merged with the metadata
/// supplied when it was appended.
#[derive(Debug, Clone, PartialEq)]
pub struct EventMetadata {
    pub event_id: EventId,
    pub event_number: EventNumber,
    pub stream_id: StreamId,
    pub stream_version: Version,
    pub event_type: String,
    pub causation_id: Option<Uuid>,
    pub correlation_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    user: HashMap<String, Value>,
}

impl EventMetadata {
    /// Builds the envelope for `event`, dropping user keys that collide with
    /// store-computed ones.
    pub fn from_recorded(event: &RecordedEvent) -> Self {
        let user = event
            .metadata
            .iter()
            .filter(|(key, _)| !RESERVED_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Self {
            event_id: event.event_id,
            event_number: event.event_number,
            stream_id: event.stream_id.clone(),
            stream_version: event.stream_version,
            event_type: event.event_type.clone(),
            causation_id: event.causation_id,
            correlation_id: event.correlation_id,
            created_at: event.created_at,
            user,
        }
    }

    /// User metadata without the reserved keys.
    pub fn user(&self) -> &HashMap<String, Value> {
        &self.user
    }

    /// Looks up a key in the flattened envelope.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.structural(key).or_else(|| self.user.get(key).cloned())
    }

    /// Flattens the envelope into a single JSON object.
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map: Map<String, Value> = self
            .user
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        for key in RESERVED_KEYS {
            if let Some(value) = self.structural(key) {
                map.insert(key.to_string(), value);
            }
        }
        map
    }

    fn structural(&self, key: &str) -> Option<Value> {
        let value = match key {
            "event_id" => json!(self.event_id),
            "event_number" => json!(self.event_number),
            "stream_id" => json!(self.stream_id),
            "stream_version" => json!(self.stream_version),
            "event_type" => json!(self.event_type),
            "causation_id" => json!(self.causation_id),
            "correlation_id" => json!(self.correlation_id),
            "created_at" => json!(self.created_at),
            _ => return None,
        };
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_store::{AggregateId, AppendOptions, EventData, EventStore, InMemoryEventStore};

    async fn recorded_with(metadata: &[(&str, Value)]) -> RecordedEvent {
        let store = InMemoryEventStore::new();
        let stream = StreamId::for_aggregate("account", &AggregateId::from(1));
        let mut data = EventData::new("MoneyDeposited", json!({"amount": 5}));
        for (key, value) in metadata {
            data = data.with_metadata(*key, value.clone());
        }
        store
            .append_to_stream(&stream, AppendOptions::new(), vec![data])
            .await
            .unwrap();
        store
            .read_all_forward(EventNumber::origin(), 1)
            .await
            .unwrap()
            .remove(0)
    }

    #[tokio::test]
    async fn store_fields_win_over_user_metadata() {
        let event = recorded_with(&[
            ("stream_version", json!(999)),
            ("event_number", json!("spoofed")),
            ("user", json!("alice")),
        ])
        .await;

        let metadata = EventMetadata::from_recorded(&event);

        assert_eq!(metadata.get("stream_version"), Some(json!(1)));
        assert_eq!(metadata.get("event_number"), Some(json!(1)));
        assert_eq!(metadata.get("user"), Some(json!("alice")));
        assert!(!metadata.user().contains_key("stream_version"));

        let map = metadata.to_map();
        assert_eq!(map["stream_version"], json!(1));
        assert_eq!(map["stream_id"], json!("account-1"));
        assert_eq!(map["user"], json!("alice"));
    }

    #[tokio::test]
    async fn unknown_key_is_absent() {
        let metadata = EventMetadata::from_recorded(&recorded_with(&[]).await);
        assert_eq!(metadata.get("missing"), None);
        assert_eq!(metadata.get("event_type"), Some(json!("MoneyDeposited")));
        assert_eq!(metadata.get("correlation_id"), Some(Value::Null));
    }
}
