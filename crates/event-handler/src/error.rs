//! Event handler error types.

use event_store::EventNumber;
use thiserror::Error;

/// Outcome of a handler that did not process an event.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandleError {
    /// The handler already applied this event. It is acknowledged like a
    /// success.
    #[error("event already seen")]
    AlreadySeen,

    /// Processing failed. The event is not acknowledged and is redelivered
    /// after the handler restarts.
    #[error("handler failed: {0}")]
    Failed(String),
}

impl HandleError {
    pub fn failed(reason: impl std::fmt::Display) -> Self {
        Self::Failed(reason.to_string())
    }
}

/// Returned by a handler's `init` hook to stop before subscribing.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("handler refused to start: {reason}")]
pub struct InitError {
    pub reason: String,
}

impl InitError {
    pub fn stop(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Errors that end a handler run.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// An error occurred in the event store.
    #[error("Event store error: {0}")]
    EventStore(#[from] event_store::EventStoreError),

    #[error(transparent)]
    Init(#[from] InitError),

    /// The handler failed on an event; the subscription stalls at it.
    #[error("handler {name} failed on event {event_number}: {reason}")]
    HandleFailed {
        name: String,
        event_number: EventNumber,
        reason: String,
    },

    /// The store closed the subscription.
    #[error("subscription {0} was closed by the store")]
    SubscriptionClosed(String),
}

/// Result type for handler runtime operations.
pub type Result<T> = std::result::Result<T, HandlerError>;
