//! Durable subscriptions to the all-streams log.
//!
//! A subscription is a named cursor. The store delivers recorded events to
//! the subscriber in batches, strictly increasing by event number, and keeps
//! the last acknowledged event number per name so a new subscriber attaching
//! under the same name resumes where the previous one stopped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use uuid::Uuid;

use crate::store::EventStore;
use crate::{EventNumber, EventStoreError, RecordedEvent, Result};

/// Where a new subscription starts reading the all-streams log.
///
/// Only used when the subscription name has no stored checkpoint yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartFrom {
    /// Every event ever recorded.
    #[default]
    Origin,
    /// Only events recorded after the subscription is created.
    Current,
    /// Events with an event number strictly greater than the given one.
    Position(EventNumber),
}

/// Identifies one attached subscriber.
///
/// The `id` changes every time a subscriber attaches, so acknowledgments
/// from a detached subscriber are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    name: String,
    id: Uuid,
}

impl SubscriptionHandle {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: Uuid::new_v4(),
        }
    }

    /// The subscription name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

/// An attached subscription: the handle used to acknowledge events and the
/// channel on which batches are delivered.
///
/// The channel closes when the subscription is removed from the store or
/// delivery fails; dropping the `Subscription` detaches the subscriber.
#[derive(Debug)]
pub struct Subscription {
    handle: SubscriptionHandle,
    batches: mpsc::Receiver<Vec<RecordedEvent>>,
}

impl Subscription {
    pub fn handle(&self) -> &SubscriptionHandle {
        &self.handle
    }

    /// Waits for the next batch. Returns `None` once the subscription ended.
    pub async fn next_batch(&mut self) -> Option<Vec<RecordedEvent>> {
        self.batches.recv().await
    }
}

/// Tuning for subscription delivery.
#[derive(Debug, Clone)]
pub struct DeliveryOptions {
    /// Maximum number of events per delivered batch.
    pub batch_size: usize,

    /// Number of undelivered batches buffered per subscriber.
    pub buffer_batches: usize,

    /// How often to look for new events written by other processes.
    /// `None` relies on local append notifications only.
    pub poll_interval: Option<Duration>,
}

impl Default for DeliveryOptions {
    fn default() -> Self {
        Self {
            batch_size: 100,
            buffer_batches: 1,
            poll_interval: None,
        }
    }
}

struct ActiveSubscription {
    handle: SubscriptionHandle,
    sender: mpsc::WeakSender<Vec<RecordedEvent>>,
    task: JoinHandle<()>,
}

impl ActiveSubscription {
    fn is_alive(&self) -> bool {
        self.sender
            .upgrade()
            .is_some_and(|sender| !sender.is_closed())
    }
}

/// Subscribers currently attached to a store, keyed by subscription name.
#[derive(Clone, Default)]
pub(crate) struct ActiveSubscriptions {
    inner: Arc<Mutex<HashMap<String, ActiveSubscription>>>,
}

impl ActiveSubscriptions {
    /// Fails if a live subscriber is attached under `name`.
    pub(crate) async fn ensure_available(&self, name: &str) -> Result<()> {
        let active = self.inner.lock().await;
        match active.get(name) {
            Some(existing) if existing.is_alive() => {
                Err(EventStoreError::SubscriptionAlreadyExists(name.to_owned()))
            }
            _ => Ok(()),
        }
    }

    /// Attaches a subscriber and starts delivering events recorded after
    /// `start_after`.
    pub(crate) async fn attach<S>(
        &self,
        store: S,
        name: &str,
        start_after: EventNumber,
        head: watch::Receiver<EventNumber>,
        options: &DeliveryOptions,
    ) -> Result<Subscription>
    where
        S: EventStore + Clone,
    {
        let mut active = self.inner.lock().await;
        if let Some(existing) = active.get(name) {
            if existing.is_alive() {
                return Err(EventStoreError::SubscriptionAlreadyExists(name.to_owned()));
            }
            existing.task.abort();
        }

        let handle = SubscriptionHandle::new(name);
        let (sender, batches) = mpsc::channel(options.buffer_batches.max(1));
        let weak = sender.downgrade();
        let task = spawn_delivery(
            store,
            handle.clone(),
            start_after,
            head,
            options.clone(),
            sender,
        );

        tracing::debug!(subscription = %name, %start_after, "subscriber attached");
        active.insert(
            name.to_owned(),
            ActiveSubscription {
                handle: handle.clone(),
                sender: weak,
                task,
            },
        );

        Ok(Subscription { handle, batches })
    }

    /// Returns whether `handle` belongs to the currently attached subscriber.
    pub(crate) async fn is_current(&self, handle: &SubscriptionHandle) -> bool {
        self.inner
            .lock()
            .await
            .get(handle.name())
            .is_some_and(|active| active.handle == *handle)
    }

    /// Detaches the subscriber for `name`, closing its delivery channel.
    pub(crate) async fn detach(&self, name: &str) -> bool {
        match self.inner.lock().await.remove(name) {
            Some(active) => {
                active.task.abort();
                true
            }
            None => false,
        }
    }
}

fn spawn_delivery<S>(
    store: S,
    handle: SubscriptionHandle,
    start_after: EventNumber,
    head: watch::Receiver<EventNumber>,
    options: DeliveryOptions,
    sender: mpsc::Sender<Vec<RecordedEvent>>,
) -> JoinHandle<()>
where
    S: EventStore + Clone,
{
    tokio::spawn(async move {
        if let Err(error) = deliver(store, start_after, head, &options, sender).await {
            tracing::error!(
                subscription = %handle.name(),
                %error,
                "subscription delivery failed"
            );
        }
    })
}

/// Delivery loop shared by every store implementation.
///
/// Reads the all-streams log forward from `position` and pushes batches to
/// the subscriber until the subscriber goes away. When caught up it waits
/// for a head notification or, if configured, the next poll tick.
async fn deliver<S>(
    store: S,
    mut position: EventNumber,
    mut head: watch::Receiver<EventNumber>,
    options: &DeliveryOptions,
    sender: mpsc::Sender<Vec<RecordedEvent>>,
) -> Result<()>
where
    S: EventStore,
{
    let batch_size = options.batch_size.max(1);
    let mut poll = options.poll_interval.map(|period| {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    loop {
        // Mark the head as seen before reading so an append racing with the
        // read below still wakes the wait at the bottom of the loop.
        head.mark_unchanged();

        loop {
            let batch = store.read_all_forward(position, batch_size).await?;
            let Some(last) = batch.last() else {
                break;
            };
            position = last.event_number;
            let full = batch.len() == batch_size;

            metrics::counter!("event_store_events_delivered").increment(batch.len() as u64);
            if sender.send(batch).await.is_err() {
                return Ok(());
            }
            if !full {
                break;
            }
        }

        tokio::select! {
            () = sender.closed() => return Ok(()),
            changed = head.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
            }
            () = tick(&mut poll) => {}
        }
    }
}

async fn tick(poll: &mut Option<Interval>) {
    match poll {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
