use thiserror::Error;

use crate::{StreamId, Version};

/// Errors that can occur when interacting with the event store.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// The stream is not at the version the writer expected.
    #[error(
        "Wrong expected version for stream {stream_id}: expected {expected}, found {actual}"
    )]
    WrongExpectedVersion {
        stream_id: StreamId,
        expected: Version,
        actual: Version,
    },

    /// An append was attempted with no events.
    #[error("Cannot append an empty event list to stream {0}")]
    EmptyAppend(StreamId),

    /// Another subscriber is already attached to this subscription name.
    #[error("Subscription already exists: {0}")]
    SubscriptionAlreadyExists(String),

    /// No active subscription matches the given name or handle.
    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(String),

    /// The store could not be reached or refused the request.
    #[error("Event store unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EventStoreError {
    /// Returns `true` for optimistic concurrency failures.
    pub fn is_wrong_expected_version(&self) -> bool {
        matches!(self, EventStoreError::WrongExpectedVersion { .. })
    }
}

/// Result type for event store operations.
pub type Result<T> = std::result::Result<T, EventStoreError>;
