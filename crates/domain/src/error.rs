//! Aggregate runtime error types.

use std::time::Duration;

use event_store::EventStoreError;
use thiserror::Error;

/// Errors raised by a process registry.
///
/// Cloneable so a failed start can be reported to every caller that was
/// waiting on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The start function of a process failed.
    #[error("failed to start process {name}: {reason}")]
    StartFailed { name: String, reason: String },
}

/// Errors that can occur while opening, querying or stopping aggregates.
#[derive(Debug, Error)]
pub enum AggregateError {
    /// An error occurred in the event store.
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    /// An event or state could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The aggregate process did not answer in time.
    #[error("{aggregate_type} {aggregate_id} did not respond within {after:?}")]
    Timeout {
        aggregate_type: &'static str,
        aggregate_id: String,
        after: Duration,
    },

    /// The aggregate process stopped before replying.
    #[error("{aggregate_type} {aggregate_id} is not running")]
    ProcessGone {
        aggregate_type: &'static str,
        aggregate_id: String,
    },

    /// The registry holds a process of another type under the same name.
    #[error("process registered as {name} is not a {aggregate_type}")]
    TypeMismatch {
        name: String,
        aggregate_type: &'static str,
    },
}

impl AggregateError {
    /// Returns true when the command lost an optimistic concurrency race.
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, Self::EventStore(e) if e.is_wrong_expected_version())
    }
}

/// Errors returned when executing a command.
#[derive(Debug, Error)]
pub enum ExecuteError<E> {
    /// The aggregate rejected the command; nothing was appended.
    #[error("Command rejected: {0}")]
    Rejected(E),

    #[error(transparent)]
    Aggregate(#[from] AggregateError),
}

impl<E> ExecuteError<E> {
    /// Returns the domain error if the command was rejected.
    pub fn rejection(&self) -> Option<&E> {
        match self {
            Self::Rejected(e) => Some(e),
            Self::Aggregate(_) => None,
        }
    }
}

impl<E> From<EventStoreError> for ExecuteError<E> {
    fn from(e: EventStoreError) -> Self {
        Self::Aggregate(AggregateError::EventStore(e))
    }
}

impl<E> From<serde_json::Error> for ExecuteError<E> {
    fn from(e: serde_json::Error) -> Self {
        Self::Aggregate(AggregateError::Serialization(e))
    }
}

/// Result type for aggregate runtime operations.
pub type Result<T> = std::result::Result<T, AggregateError>;
