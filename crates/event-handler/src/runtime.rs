//! One run of an event handler: initialize, subscribe, consume.

use std::sync::Arc;

use event_store::{EventNumber, EventStore, RecordedEvent, Subscription};

use crate::config::HandlerConfig;
use crate::error::{HandleError, HandlerError, Result};
use crate::handler::EventHandler;
use crate::metadata::EventMetadata;

/// Lifecycle phase of a handler run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Initializing,
    Subscribing,
    Consuming,
}

/// Drives one handler over its subscription.
///
/// A run ends with an error when the handler fails on an event or the store
/// fails; its supervisor then starts a new run, which resumes after the last
/// acknowledged event.
pub struct HandlerRuntime<S, H> {
    store: S,
    handler: Arc<H>,
    config: HandlerConfig,
    phase: Phase,
    last_seen: Option<EventNumber>,
}

impl<S, H> HandlerRuntime<S, H>
where
    S: EventStore,
    H: EventHandler,
{
    pub fn new(store: S, handler: Arc<H>, config: HandlerConfig) -> Self {
        Self {
            store,
            handler,
            config,
            phase: Phase::Initializing,
            last_seen: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The last event handled or declared already seen during this run.
    pub fn last_seen(&self) -> Option<EventNumber> {
        self.last_seen
    }

    /// Runs until the subscription ends or processing fails.
    #[tracing::instrument(skip(self), fields(handler = %self.config.name))]
    pub async fn run(&mut self) -> Result<()> {
        self.phase = Phase::Initializing;
        if let Err(stop) = self.handler.init().await {
            tracing::warn!(reason = %stop.reason, "handler stopped during init");
            return Err(stop.into());
        }

        self.phase = Phase::Subscribing;
        let mut subscription = self
            .store
            .subscribe_to_all_streams(&self.config.name, self.config.start_from)
            .await?;
        tracing::info!(start_from = ?self.config.start_from, "handler subscribed");

        self.phase = Phase::Consuming;
        let outcome = self.consume(&mut subscription).await;
        drop(subscription);
        outcome
    }

    async fn consume(&mut self, subscription: &mut Subscription) -> Result<()> {
        while let Some(batch) = subscription.next_batch().await {
            self.process_batch(subscription, batch).await?;
        }
        Err(HandlerError::SubscriptionClosed(self.config.name.clone()))
    }

    /// Processes a batch in order, acknowledging every event that was
    /// handled, declared already seen, or skipped as a duplicate.
    pub async fn process_batch(
        &mut self,
        subscription: &Subscription,
        batch: Vec<RecordedEvent>,
    ) -> Result<()> {
        for event in batch {
            let event_number = event.event_number;

            if self.last_seen.is_some_and(|seen| event_number <= seen) {
                tracing::debug!(%event_number, "skipping duplicate event");
                metrics::counter!("event_handler_events_skipped", "handler" => self.config.name.clone())
                    .increment(1);
                self.store.ack(subscription.handle(), event_number).await?;
                continue;
            }

            let metadata = EventMetadata::from_recorded(&event);
            match self.handler.handle(&event.data, &metadata).await {
                Ok(()) => {
                    metrics::counter!("event_handler_events_handled", "handler" => self.config.name.clone())
                        .increment(1);
                }
                Err(HandleError::AlreadySeen) => {
                    tracing::debug!(%event_number, "handler reported event as already seen");
                    metrics::counter!("event_handler_events_skipped", "handler" => self.config.name.clone())
                        .increment(1);
                }
                Err(HandleError::Failed(reason)) => {
                    metrics::counter!("event_handler_events_failed", "handler" => self.config.name.clone())
                        .increment(1);
                    return Err(HandlerError::HandleFailed {
                        name: self.config.name.clone(),
                        event_number,
                        reason,
                    });
                }
            }

            self.store.ack(subscription.handle(), event_number).await?;
            self.last_seen = Some(event_number);
        }
        Ok(())
    }
}
