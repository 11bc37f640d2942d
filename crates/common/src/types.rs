use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of an aggregate instance.
///
/// The value is opaque to the runtime: it is only required to be unique within
/// an aggregate type and stable for the lifetime of the entity. Text and
/// integer identities are supported; UUIDs are carried as their hyphenated
/// text form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AggregateId {
    Integer(i64),
    Text(String),
}

impl AggregateId {
    /// Creates a new random identity backed by a v4 UUID.
    pub fn new() -> Self {
        Self::from_uuid(Uuid::new_v4())
    }

    /// Creates an identity from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self::Text(uuid.to_string())
    }

    /// Returns the identity as a UUID when it holds one.
    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Self::Text(text) => Uuid::parse_str(text).ok(),
            Self::Integer(_) => None,
        }
    }
}

impl Default for AggregateId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AggregateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

impl From<Uuid> for AggregateId {
    fn from(uuid: Uuid) -> Self {
        Self::from_uuid(uuid)
    }
}

impl From<String> for AggregateId {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for AggregateId {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<i64> for AggregateId {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_id_new_creates_unique_ids() {
        let id1 = AggregateId::new();
        let id2 = AggregateId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn aggregate_id_from_uuid_preserves_value() {
        let uuid = Uuid::new_v4();
        let id = AggregateId::from_uuid(uuid);
        assert_eq!(id.as_uuid(), Some(uuid));
    }

    #[test]
    fn integer_and_text_identities_display_plainly() {
        assert_eq!(AggregateId::from(42).to_string(), "42");
        assert_eq!(AggregateId::from("account-1").to_string(), "account-1");
        assert_eq!(AggregateId::from(42).as_uuid(), None);
    }

    #[test]
    fn aggregate_id_serializes_untagged() {
        let text = serde_json::to_value(AggregateId::from("abc")).unwrap();
        assert_eq!(text, serde_json::json!("abc"));

        let number: AggregateId = serde_json::from_value(serde_json::json!(7)).unwrap();
        assert_eq!(number, AggregateId::Integer(7));
    }
}
