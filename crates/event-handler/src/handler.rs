use async_trait::async_trait;
use serde_json::Value;

use crate::error::{HandleError, InitError};
use crate::metadata::EventMetadata;

/// User logic reacting to recorded events.
///
/// A handler must be idempotent: after a restart the runtime redelivers every
/// event that was not acknowledged, including the one a failed `handle` call
/// stalled on. An event that always fails is retried forever; route such
/// events somewhere else and return `Ok` if that is not acceptable.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// Runs before subscribing. Returning an error stops the handler for
    /// good, without subscribing and without restarts.
    async fn init(&self) -> Result<(), InitError> {
        Ok(())
    }

    /// Handles one event. `data` is the event payload; the event type and
    /// positions are in `metadata`.
    async fn handle(&self, _data: &Value, _metadata: &EventMetadata) -> Result<(), HandleError> {
        Ok(())
    }
}

#[async_trait]
impl<H: EventHandler> EventHandler for std::sync::Arc<H> {
    async fn init(&self) -> Result<(), InitError> {
        (**self).init().await
    }

    async fn handle(&self, data: &Value, metadata: &EventMetadata) -> Result<(), HandleError> {
        (**self).handle(data, metadata).await
    }
}
