//! Commands and the context they execute in.

use std::collections::HashMap;
use std::marker::PhantomData;

use event_store::{EventData, Version};
use uuid::Uuid;

use crate::aggregate::{Aggregate, DomainEvent};

/// Result of command execution.
#[derive(Debug, Clone)]
pub struct CommandResult<A: Aggregate> {
    /// The events that were generated and persisted.
    pub events: Vec<A::Event>,

    /// The stream version after the command. Unchanged when the command
    /// produced no events.
    pub version: Version,
}

/// A command handler bound to an aggregate type.
///
/// Commands represent an intention to perform an action. Given the current
/// state they either produce zero or more events or reject the action.
pub trait Command: Send + 'static {
    /// The type of aggregate this command targets.
    type Aggregate: Aggregate;

    /// Decides which events the command produces against `state`.
    fn handle(self, state: &Self::Aggregate) -> CommandOutcome<Self::Aggregate>;
}

/// Events produced by a command, or the reason it was rejected.
pub type CommandOutcome<A> = Result<Vec<<A as Aggregate>::Event>, <A as Aggregate>::Error>;

/// A command backed by a closure. See [`from_fn`].
pub struct FnCommand<A, F> {
    handler: F,
    _aggregate: PhantomData<fn() -> A>,
}

/// Wraps a closure as a command.
pub fn from_fn<A, F>(handler: F) -> FnCommand<A, F>
where
    A: Aggregate,
    F: FnOnce(&A) -> CommandOutcome<A> + Send + 'static,
{
    FnCommand {
        handler,
        _aggregate: PhantomData,
    }
}

impl<A, F> Command for FnCommand<A, F>
where
    A: Aggregate,
    F: FnOnce(&A) -> CommandOutcome<A> + Send + 'static,
{
    type Aggregate = A;

    fn handle(self, state: &A) -> CommandOutcome<A> {
        (self.handler)(state)
    }
}

/// Causation, correlation and metadata stamped onto every event a command
/// appends.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionContext {
    pub correlation_id: Option<Uuid>,
    pub causation_id: Option<Uuid>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn with_causation_id(mut self, causation_id: Uuid) -> Self {
        self.causation_id = Some(causation_id);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Serializes a domain event into the form appended to the store.
    pub(crate) fn event_data<E: DomainEvent>(
        &self,
        event: &E,
    ) -> Result<EventData, serde_json::Error> {
        let mut data = EventData::from_event(event.event_type(), event)?
            .with_causation_id(self.causation_id)
            .with_correlation_id(self.correlation_id);
        data.metadata = self.metadata.clone();
        Ok(data)
    }
}
