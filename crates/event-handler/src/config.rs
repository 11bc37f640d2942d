use std::time::Duration;

use event_store::StartFrom;
use serde::{Deserialize, Serialize};

/// Configuration of an event handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerConfig {
    /// Stable identity of the handler's subscription. Renaming a handler
    /// starts a fresh subscription and replays from `start_from`.
    pub name: String,

    /// Where a brand-new subscription starts. Ignored once the store holds a
    /// checkpoint for `name`.
    #[serde(default)]
    pub start_from: StartFrom,
}

impl HandlerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start_from: StartFrom::default(),
        }
    }

    /// Overrides the start position.
    pub fn start_from(mut self, start_from: StartFrom) -> Self {
        self.start_from = start_from;
        self
    }
}

/// How a supervisor restarts a failed handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Delay before the first restart; doubled after every consecutive
    /// failure.
    pub restart_delay: Duration,

    /// Upper bound of the restart delay.
    pub max_restart_delay: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            restart_delay: Duration::from_millis(100),
            max_restart_delay: Duration::from_secs(30),
        }
    }
}

impl RestartPolicy {
    /// Delay to use after `delay`.
    pub(crate) fn next_delay(&self, delay: Duration) -> Duration {
        delay.saturating_mul(2).min(self.max_restart_delay)
    }
}
