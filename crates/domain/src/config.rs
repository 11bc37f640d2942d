use std::time::Duration;

/// Tuning shared by every aggregate process a supervisor starts.
#[derive(Debug, Clone)]
pub struct AggregateConfig {
    /// Events read per round trip while hydrating.
    pub read_batch_size: usize,

    /// Upper bound for opening an aggregate or executing a command.
    pub command_timeout: Duration,

    /// Stop a process after this long without messages. `None` keeps
    /// processes alive until stopped.
    pub idle_timeout: Option<Duration>,

    /// Record a snapshot whenever the stream version crosses a multiple of
    /// this interval. `None` disables snapshots.
    pub snapshot_every: Option<u64>,

    /// Capacity of each process mailbox.
    pub mailbox_capacity: usize,
}

impl Default for AggregateConfig {
    fn default() -> Self {
        Self {
            read_batch_size: 1000,
            command_timeout: Duration::from_secs(5),
            idle_timeout: None,
            snapshot_every: None,
            mailbox_capacity: 64,
        }
    }
}

impl AggregateConfig {
    /// Returns whether moving from `from` to `to` crosses a snapshot boundary.
    pub(crate) fn crosses_snapshot(&self, from: i64, to: i64) -> bool {
        match self.snapshot_every {
            Some(every) if every > 0 => {
                let every = every as i64;
                to / every > from / every
            }
            _ => false,
        }
    }
}
