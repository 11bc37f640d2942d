//! Assertions for tests that observe the global event stream.
//!
//! Each helper opens a throwaway subscription, acknowledges everything it
//! receives so delivery never stalls, and deletes the subscription when done.

use std::time::Duration;

use event_store::{EventStore, RecordedEvent, StartFrom};
use thiserror::Error;
use tokio::time::Instant;
use uuid::Uuid;

/// Environment variable overriding the default receive timeout, in ms.
pub const TIMEOUT_ENV: &str = "EVENT_ASSERTION_TIMEOUT_MS";

const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Settings for the event assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssertionConfig {
    /// How long to wait for a matching event.
    pub timeout: Duration,

    /// Where the throwaway subscription starts.
    pub start_from: StartFrom,
}

impl Default for AssertionConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            start_from: StartFrom::Origin,
        }
    }
}

impl AssertionConfig {
    /// Defaults, with the timeout taken from `EVENT_ASSERTION_TIMEOUT_MS`
    /// when set.
    pub fn from_env() -> Self {
        let timeout = std::env::var(TIMEOUT_ENV)
            .ok()
            .and_then(|ms| ms.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_TIMEOUT);
        Self {
            timeout,
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn start_from(mut self, start_from: StartFrom) -> Self {
        self.start_from = start_from;
        self
    }
}

#[derive(Debug, Error)]
pub enum AssertionError {
    #[error("no {event_type} event matched within {after:?}")]
    Timeout {
        event_type: String,
        after: Duration,
    },

    #[error("subscription closed before a {0} event matched")]
    Closed(String),

    #[error("Event store error: {0}")]
    EventStore(#[from] event_store::EventStoreError),
}

/// Waits for the first `event_type` event matching `predicate`.
pub async fn wait_for_event<S, F>(
    store: &S,
    event_type: &str,
    predicate: F,
) -> Result<RecordedEvent, AssertionError>
where
    S: EventStore,
    F: Fn(&RecordedEvent) -> bool,
{
    wait_for_event_with(store, AssertionConfig::from_env(), event_type, predicate).await
}

/// [`wait_for_event`] with explicit settings.
pub async fn wait_for_event_with<S, F>(
    store: &S,
    config: AssertionConfig,
    event_type: &str,
    predicate: F,
) -> Result<RecordedEvent, AssertionError>
where
    S: EventStore,
    F: Fn(&RecordedEvent) -> bool,
{
    let name = format!("event-assertion-{}", Uuid::new_v4());
    let outcome = receive_matching(store, &name, config, event_type, &predicate).await;
    if let Err(error) = store.delete_subscription(&name).await {
        tracing::warn!(%error, subscription = %name, "failed to delete assertion subscription");
    }
    outcome
}

async fn receive_matching<S, F>(
    store: &S,
    name: &str,
    config: AssertionConfig,
    event_type: &str,
    predicate: &F,
) -> Result<RecordedEvent, AssertionError>
where
    S: EventStore,
    F: Fn(&RecordedEvent) -> bool,
{
    let mut subscription = store
        .subscribe_to_all_streams(name, config.start_from)
        .await?;
    let deadline = Instant::now() + config.timeout;

    loop {
        let batch = match tokio::time::timeout_at(deadline, subscription.next_batch()).await {
            Ok(Some(batch)) => batch,
            Ok(None) => return Err(AssertionError::Closed(event_type.to_string())),
            Err(_) => {
                return Err(AssertionError::Timeout {
                    event_type: event_type.to_string(),
                    after: config.timeout,
                });
            }
        };

        let mut found = None;
        for event in batch {
            store.ack(subscription.handle(), event.event_number).await?;
            if found.is_none() && event.event_type == event_type && predicate(&event) {
                found = Some(event);
            }
        }
        if let Some(event) = found {
            return Ok(event);
        }
    }
}

/// Panics unless an `event_type` event matching `predicate` is received
/// within the configured timeout. Returns the matching event.
pub async fn assert_receive_event<S, F>(store: &S, event_type: &str, predicate: F) -> RecordedEvent
where
    S: EventStore,
    F: Fn(&RecordedEvent) -> bool,
{
    match wait_for_event(store, event_type, predicate).await {
        Ok(event) => event,
        Err(error) => panic!("expected to receive a {event_type} event: {error}"),
    }
}

/// Panics if an `event_type` event matching `predicate` is received within
/// the configured timeout.
pub async fn refute_receive_event<S, F>(store: &S, event_type: &str, predicate: F)
where
    S: EventStore,
    F: Fn(&RecordedEvent) -> bool,
{
    match wait_for_event(store, event_type, predicate).await {
        Ok(event) => panic!(
            "unexpectedly received {event_type} event {} on {}",
            event.event_number, event.stream_id
        ),
        Err(AssertionError::Timeout { .. }) => {}
        Err(error) => panic!("could not observe {event_type} events: {error}"),
    }
}
