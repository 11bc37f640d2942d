//! Opens aggregates on demand and routes commands to their processes.

use std::future::Future;
use std::sync::Arc;

use common::AggregateId;
use event_store::{EventStore, Version};
use futures_util::FutureExt;

use crate::aggregate::Aggregate;
use crate::command::{Command, CommandResult, ExecutionContext};
use crate::config::AggregateConfig;
use crate::error::{AggregateError, ExecuteError, RegistryError, Result};
use crate::process::{gone, AggregateHandle, Request};
use crate::registry::{LocalRegistry, ProcessName, ProcessRef, Registry, StartFn};

/// Reply to a command: the appended events, or why nothing was appended.
pub type CommandReply<C> = std::result::Result<
    CommandResult<<C as Command>::Aggregate>,
    ExecuteError<<<C as Command>::Aggregate as Aggregate>::Error>,
>;

/// Starts aggregate processes on demand and keeps at most one live process
/// per aggregate identity.
///
/// Processes are not restarted when they stop; the next call for the same
/// identity opens (and hydrates) a fresh one.
pub struct AggregateSupervisor<S> {
    store: S,
    registry: Arc<dyn Registry>,
    config: AggregateConfig,
}

impl<S> Clone for AggregateSupervisor<S>
where
    S: Clone,
{
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            registry: self.registry.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S> AggregateSupervisor<S>
where
    S: EventStore + Clone,
{
    /// Creates a supervisor with a local registry and default tuning.
    pub fn new(store: S) -> Self {
        Self::with_registry(store, Arc::new(LocalRegistry::new()), AggregateConfig::default())
    }

    pub fn with_config(store: S, config: AggregateConfig) -> Self {
        Self::with_registry(store, Arc::new(LocalRegistry::new()), config)
    }

    pub fn with_registry(store: S, registry: Arc<dyn Registry>, config: AggregateConfig) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &AggregateConfig {
        &self.config
    }

    /// Ensures a live process exists for the aggregate and returns its
    /// identity. Opening an already open aggregate is free.
    #[tracing::instrument(skip(self), fields(aggregate_type = A::aggregate_type(), aggregate_id = %id))]
    pub async fn open_aggregate<A: Aggregate>(&self, id: AggregateId) -> Result<AggregateId> {
        let _handle = self.bounded::<A, _, _>(&id, self.handle::<A>(&id)).await??;
        Ok(id)
    }

    /// Executes a command against the aggregate, opening it first if needed.
    pub async fn execute<C: Command>(
        &self,
        id: &AggregateId,
        command: C,
    ) -> CommandReply<C> {
        self.execute_with_context(id, command, ExecutionContext::default())
            .await
    }

    /// Executes a command, stamping `context` onto the appended events.
    ///
    /// A timed out command may still be applied by the process later; the
    /// caller has to re-read the aggregate to find out.
    #[tracing::instrument(
        skip(self, command, context),
        fields(aggregate_type = <C::Aggregate as Aggregate>::aggregate_type(), aggregate_id = %id)
    )]
    pub async fn execute_with_context<C: Command>(
        &self,
        id: &AggregateId,
        command: C,
        context: ExecutionContext,
    ) -> CommandReply<C> {
        let work = self.execute_on_process(id, command, context);
        self.bounded::<C::Aggregate, _, _>(id, work).await?
    }

    /// Returns a copy of the aggregate's current state.
    pub async fn aggregate_state<A: Aggregate>(&self, id: &AggregateId) -> Result<A> {
        Ok(self.snapshot_of::<A>(id).await?.0)
    }

    /// Returns the aggregate's current stream version.
    pub async fn aggregate_version<A: Aggregate>(&self, id: &AggregateId) -> Result<Version> {
        Ok(self.snapshot_of::<A>(id).await?.1)
    }

    /// Returns the state together with the version it was read at.
    pub async fn aggregate_state_with_version<A: Aggregate>(
        &self,
        id: &AggregateId,
    ) -> Result<(A, Version)> {
        self.snapshot_of::<A>(id).await
    }

    /// Stops the aggregate's process if it is running. Returns whether a
    /// process was stopped.
    #[tracing::instrument(skip(self), fields(aggregate_type = A::aggregate_type(), aggregate_id = %id))]
    pub async fn stop_aggregate<A: Aggregate>(&self, id: &AggregateId) -> Result<bool> {
        let name = ProcessName::new(A::aggregate_type(), id.clone());
        let Some(process) = self.registry.lookup(&name).await else {
            return Ok(false);
        };
        let handle = downcast::<A>(&name, &process)?;
        self.registry.unregister(&name).await;

        match self.bounded::<A, _, _>(id, handle.shutdown()).await? {
            Ok(()) => Ok(true),
            // Stopped on its own in the meantime.
            Err(AggregateError::ProcessGone { .. }) => Ok(false),
            Err(error) => Err(error),
        }
    }

    async fn snapshot_of<A: Aggregate>(&self, id: &AggregateId) -> Result<(A, Version)> {
        self.bounded::<A, _, _>(id, self.call::<A, _>(id, Request::state()))
            .await?
    }

    async fn execute_on_process<C: Command>(
        &self,
        id: &AggregateId,
        command: C,
        context: ExecutionContext,
    ) -> CommandReply<C> {
        self.call::<C::Aggregate, _>(id, Request::execute(command, context))
            .await?
    }

    /// Delivers `request` to the aggregate's process and waits for the reply.
    ///
    /// A process can close its mailbox (idle timeout, failed append) between
    /// the registry lookup and the send. The request was then never received,
    /// so it is handed to a freshly opened process once. A reply dropped after
    /// delivery is reported as `ProcessGone`.
    async fn call<A: Aggregate, R>(&self, id: &AggregateId, request: Request<A, R>) -> Result<R> {
        let reply = match self.handle::<A>(id).await?.submit(request).await {
            Ok(reply) => reply,
            Err(undelivered) => {
                tracing::debug!(aggregate_id = %id, "process closed before delivery, reopening");
                self.handle::<A>(id)
                    .await?
                    .submit(undelivered)
                    .await
                    .map_err(|_| gone::<A>(id))?
            }
        };
        reply.await.map_err(|_| gone::<A>(id))
    }

    /// Finds the live process for `id` or registers a new one.
    async fn handle<A: Aggregate>(&self, id: &AggregateId) -> Result<AggregateHandle<A>> {
        let name = ProcessName::new(A::aggregate_type(), id.clone());
        if let Some(process) = self.registry.lookup(&name).await {
            return downcast::<A>(&name, &process);
        }

        let (process, created) = self
            .registry
            .register_if_absent(name.clone(), self.start_fn::<A>(&name))
            .await?;
        if created {
            tracing::debug!(%name, "aggregate process started");
        }
        downcast::<A>(&name, &process)
    }

    fn start_fn<A: Aggregate>(&self, name: &ProcessName) -> StartFn {
        let store = self.store.clone();
        let config = self.config.clone();
        let name = name.clone();
        Box::new(move || {
            async move {
                let display = name.to_string();
                match AggregateHandle::<A>::start(store, name.id, config).await {
                    Ok(handle) => Ok(Arc::new(handle) as ProcessRef),
                    Err(error) => Err(RegistryError::StartFailed {
                        name: display,
                        reason: error.to_string(),
                    }),
                }
            }
            .boxed()
        })
    }

    /// Bounds `work` by the command timeout.
    async fn bounded<A, F, T>(&self, id: &AggregateId, work: F) -> Result<T>
    where
        A: Aggregate,
        F: Future<Output = T>,
    {
        tokio::time::timeout(self.config.command_timeout, work)
            .await
            .map_err(|_| AggregateError::Timeout {
                aggregate_type: A::aggregate_type(),
                aggregate_id: id.to_string(),
                after: self.config.command_timeout,
            })
    }
}

fn downcast<A: Aggregate>(name: &ProcessName, process: &ProcessRef) -> Result<AggregateHandle<A>> {
    process
        .as_any()
        .downcast_ref::<AggregateHandle<A>>()
        .cloned()
        .ok_or_else(|| AggregateError::TypeMismatch {
            name: name.to_string(),
            aggregate_type: A::aggregate_type(),
        })
}
