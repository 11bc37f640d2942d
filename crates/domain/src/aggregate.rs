//! Core aggregate and domain event traits.

use serde::{Serialize, de::DeserializeOwned};

/// Trait for domain events.
///
/// Domain events represent facts that have happened in the domain.
/// They are immutable and should be named in past tense.
pub trait DomainEvent:
    Serialize + DeserializeOwned + std::fmt::Debug + Send + Sync + Clone + 'static
{
    /// Returns the event type name recorded alongside the payload.
    fn event_type(&self) -> &'static str;
}

/// Trait for aggregates in an event-sourced system.
///
/// An aggregate's state is the fold of every event recorded on its stream.
/// The runtime owns the stream version; the aggregate only folds events and
/// decides which events a command produces.
///
/// `apply` must be pure and deterministic:
/// - Given the same state and event, it must always produce the same new state
/// - It must not have side effects
/// - It must not fail (events represent facts that have happened)
pub trait Aggregate:
    Default + Clone + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// The type of events this aggregate produces and consumes.
    type Event: DomainEvent;

    /// The type of errors returned when a command is rejected.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Returns the aggregate type name.
    ///
    /// Together with the identity it names the event stream and the live
    /// process of an aggregate instance.
    fn aggregate_type() -> &'static str;

    /// Applies an event to the aggregate, updating its state.
    fn apply(&mut self, event: Self::Event);

    /// Applies multiple events in sequence.
    fn apply_events(&mut self, events: impl IntoIterator<Item = Self::Event>) {
        for event in events {
            self.apply(event);
        }
    }

    /// Layout version of the serialized state. Bump it when the state's
    /// shape changes so stale snapshots are ignored during hydration.
    fn snapshot_schema_version() -> u32 {
        1
    }
}
