use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{StreamId, Version};

/// A snapshot of an aggregate's state at a specific stream version.
///
/// Snapshots give hydration a starting point so only the events recorded
/// after `version` have to be replayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// The stream this snapshot was taken from.
    pub stream_id: StreamId,

    /// The type of aggregate (e.g., "BankAccount").
    pub aggregate_type: String,

    /// Version of the serialized state layout. Snapshots with a different
    /// schema version are ignored during hydration.
    pub schema_version: u32,

    /// The stream version folded into `state`.
    pub version: Version,

    /// When the snapshot was created.
    pub created_at: DateTime<Utc>,

    /// The serialized aggregate state.
    pub state: serde_json::Value,
}

impl Snapshot {
    /// Creates a snapshot from a serializable state.
    pub fn from_state<T: Serialize>(
        stream_id: StreamId,
        aggregate_type: impl Into<String>,
        schema_version: u32,
        version: Version,
        state: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            stream_id,
            aggregate_type: aggregate_type.into(),
            schema_version,
            version,
            created_at: Utc::now(),
            state: serde_json::to_value(state)?,
        })
    }

    /// Deserializes the snapshot state into a concrete type.
    pub fn into_state<T: for<'de> Deserialize<'de>>(self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.state)
    }

    /// Returns whether the snapshot was taken from the given aggregate layout.
    pub fn matches(&self, aggregate_type: &str, schema_version: u32) -> bool {
        self.aggregate_type == aggregate_type && self.schema_version == schema_version
    }
}
