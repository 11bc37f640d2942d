//! Event handler that writes account activity to the log.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use event_handler::{EventHandler, EventMetadata, HandleError, InitError};
use serde_json::Value;

/// Subscription name of the activity log.
pub const ACTIVITY_LOG: &str = "account-activity-log";

/// Logs every event recorded on an account stream.
#[derive(Debug, Default)]
pub struct ActivityLog {
    logged: AtomicU64,
}

impl ActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of account events logged since start.
    pub fn logged(&self) -> u64 {
        self.logged.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl EventHandler for ActivityLog {
    async fn init(&self) -> Result<(), InitError> {
        tracing::info!(handler = ACTIVITY_LOG, "activity log starting");
        Ok(())
    }

    async fn handle(&self, data: &Value, metadata: &EventMetadata) -> Result<(), HandleError> {
        let Some(account) = metadata.stream_id.as_str().strip_prefix("account-") else {
            return Ok(());
        };

        tracing::info!(
            account,
            event_type = %metadata.event_type,
            version = %metadata.stream_version,
            payload = %data,
            correlation_id = ?metadata.correlation_id,
            "account activity"
        );
        metrics::counter!("account_activity_events", "event_type" => metadata.event_type.clone())
            .increment(1);
        self.logged.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
