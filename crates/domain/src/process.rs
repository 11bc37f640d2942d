//! Aggregate process: one task per live aggregate identity.
//!
//! The process owns the aggregate state and its stream version. It hydrates
//! by replaying its stream in batches, then handles one message at a time
//! from its mailbox, so commands against one aggregate never run
//! concurrently and the expected version of every append is exact.

use std::any::Any;
use std::time::Instant;

use common::AggregateId;
use event_store::{AppendOptions, EventStore, EventStoreExt, Snapshot, StreamId, Version};
use futures_util::future::{BoxFuture, FutureExt};
use futures_util::TryStreamExt;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::Instrument;

use crate::aggregate::Aggregate;
use crate::command::{Command, CommandOutcome, CommandResult, ExecutionContext};
use crate::config::AggregateConfig;
use crate::error::{AggregateError, ExecuteError, Result};
use crate::registry::Process;

type BoxedCommand<A> = Box<dyn FnOnce(&A) -> CommandOutcome<A> + Send>;

/// What a process answers to a command.
pub(crate) type ExecuteOutcome<A> =
    std::result::Result<CommandResult<A>, ExecuteError<<A as Aggregate>::Error>>;

pub(crate) enum Message<A: Aggregate> {
    Execute {
        command: BoxedCommand<A>,
        context: ExecutionContext,
        reply: oneshot::Sender<ExecuteOutcome<A>>,
    },
    State {
        reply: oneshot::Sender<(A, Version)>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Lifecycle phase of an aggregate process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    /// Replaying the stream, at start or after a concurrency conflict.
    Hydrating,
    /// Accepting commands.
    Ready,
    Stopped,
}

/// A message for a process together with the receiver of its reply.
///
/// A request the process never received can be taken back and sent to
/// another process.
pub(crate) struct Request<A: Aggregate, R> {
    message: Message<A>,
    reply: oneshot::Receiver<R>,
}

impl<A: Aggregate> Request<A, ExecuteOutcome<A>> {
    pub(crate) fn execute<C>(command: C, context: ExecutionContext) -> Self
    where
        C: Command<Aggregate = A>,
    {
        let (reply, response) = oneshot::channel();
        Self {
            message: Message::Execute {
                command: Box::new(move |state: &A| command.handle(state)),
                context,
                reply,
            },
            reply: response,
        }
    }
}

impl<A: Aggregate> Request<A, (A, Version)> {
    pub(crate) fn state() -> Self {
        let (reply, response) = oneshot::channel();
        Self {
            message: Message::State { reply },
            reply: response,
        }
    }
}

impl<A: Aggregate> Request<A, ()> {
    fn shutdown() -> Self {
        let (reply, response) = oneshot::channel();
        Self {
            message: Message::Shutdown { reply },
            reply: response,
        }
    }
}

enum Control {
    Continue,
    Shutdown(oneshot::Sender<()>),
    Fail,
}

/// Handle to a running aggregate process.
///
/// Cloning the handle is cheap; all clones talk to the same process.
pub struct AggregateHandle<A: Aggregate> {
    id: AggregateId,
    sender: mpsc::Sender<Message<A>>,
    phase: watch::Receiver<Phase>,
}

impl<A: Aggregate> Clone for AggregateHandle<A> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            sender: self.sender.clone(),
            phase: self.phase.clone(),
        }
    }
}

impl<A: Aggregate> AggregateHandle<A> {
    /// Spawns a process for `id` and waits until it has hydrated.
    pub async fn start<S>(store: S, id: AggregateId, config: AggregateConfig) -> Result<Self>
    where
        S: EventStore,
    {
        let (sender, receiver) = mpsc::channel(config.mailbox_capacity.max(1));
        let (ready_tx, ready_rx) = oneshot::channel();
        let (phase_tx, phase) = watch::channel(Phase::Uninitialized);

        let span = tracing::info_span!(
            "aggregate",
            aggregate_type = A::aggregate_type(),
            aggregate_id = %id
        );
        let mut process = AggregateProcess::<S, A>::new(store, id.clone(), config, phase_tx);
        tokio::spawn(
            async move {
                match process.hydrate().await {
                    Ok(()) => {
                        if ready_tx.send(Ok(())).is_ok() {
                            process.run(receiver).await;
                        }
                    }
                    Err(error) => {
                        tracing::error!(%error, "hydration failed");
                        let _ = ready_tx.send(Err(error));
                    }
                }
                process.phase.send_replace(Phase::Stopped);
            }
            .instrument(span),
        );

        match ready_rx.await {
            Ok(Ok(())) => {
                metrics::counter!("aggregate_processes_started", "aggregate_type" => A::aggregate_type())
                    .increment(1);
                Ok(Self { id, sender, phase })
            }
            Ok(Err(error)) => Err(error),
            Err(_) => Err(gone::<A>(&id)),
        }
    }

    pub fn id(&self) -> &AggregateId {
        &self.id
    }

    /// Current lifecycle phase. A process that exited without reporting it
    /// is `Stopped`.
    pub fn phase(&self) -> Phase {
        match self.phase.has_changed() {
            Ok(_) => *self.phase.borrow(),
            Err(_) => Phase::Stopped,
        }
    }

    /// Executes a command, returning the events it appended and the new
    /// stream version.
    pub async fn execute<C>(&self, command: C, context: ExecutionContext) -> ExecuteOutcome<A>
    where
        C: Command<Aggregate = A>,
    {
        self.call(Request::execute(command, context)).await?
    }

    /// Returns a copy of the current state together with its version.
    pub async fn state(&self) -> Result<(A, Version)> {
        self.call(Request::state()).await
    }

    pub async fn version(&self) -> Result<Version> {
        Ok(self.state().await?.1)
    }

    /// Stops the process after the messages already queued were handled.
    pub async fn shutdown(&self) -> Result<()> {
        self.call(Request::shutdown()).await
    }

    /// Queues a request. Gives it back untouched when the process no longer
    /// accepts messages.
    pub(crate) async fn submit<R>(
        &self,
        request: Request<A, R>,
    ) -> std::result::Result<oneshot::Receiver<R>, Request<A, R>> {
        let Request { message, reply } = request;
        match self.sender.send(message).await {
            Ok(()) => Ok(reply),
            Err(mpsc::error::SendError(message)) => Err(Request { message, reply }),
        }
    }

    async fn call<R>(&self, request: Request<A, R>) -> Result<R> {
        let reply = self
            .submit(request)
            .await
            .map_err(|_| gone::<A>(&self.id))?;
        reply.await.map_err(|_| gone::<A>(&self.id))
    }
}

impl<A: Aggregate> Process for AggregateHandle<A> {
    fn is_alive(&self) -> bool {
        !self.sender.is_closed()
    }

    fn stopped(&self) -> BoxFuture<'static, ()> {
        let mut phase = self.phase.clone();
        async move {
            // Resolves once the process task dropped its end of the channel.
            while phase.changed().await.is_ok() {}
        }
        .boxed()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(crate) fn gone<A: Aggregate>(id: &AggregateId) -> AggregateError {
    AggregateError::ProcessGone {
        aggregate_type: A::aggregate_type(),
        aggregate_id: id.to_string(),
    }
}

struct AggregateProcess<S, A> {
    store: S,
    stream_id: StreamId,
    config: AggregateConfig,
    phase: watch::Sender<Phase>,
    state: A,
    version: Version,
}

impl<S, A> AggregateProcess<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    fn new(store: S, id: AggregateId, config: AggregateConfig, phase: watch::Sender<Phase>) -> Self {
        Self {
            store,
            stream_id: StreamId::for_aggregate(A::aggregate_type(), &id),
            config,
            phase,
            state: A::default(),
            version: Version::initial(),
        }
    }

    /// Rebuilds state from the latest usable snapshot plus the events after it.
    async fn hydrate(&mut self) -> Result<()> {
        self.phase.send_replace(Phase::Hydrating);
        let started = Instant::now();

        let (mut state, mut version) = (A::default(), Version::initial());
        if self.config.snapshot_every.is_some()
            && let Some(snapshot) = self.store.read_snapshot(&self.stream_id).await?
            && snapshot.matches(A::aggregate_type(), A::snapshot_schema_version())
        {
            version = snapshot.version;
            state = snapshot.into_state()?;
        }

        let replayed = {
            let mut events = self.store.stream_forward(
                &self.stream_id,
                version.next(),
                self.config.read_batch_size,
            );
            let mut replayed = 0usize;
            while let Some(recorded) = events.try_next().await? {
                state.apply(recorded.deserialize::<A::Event>()?);
                version = recorded.stream_version;
                replayed += 1;
            }
            replayed
        };

        self.state = state;
        self.version = version;
        self.phase.send_replace(Phase::Ready);

        metrics::histogram!("aggregate_hydration_seconds", "aggregate_type" => A::aggregate_type())
            .record(started.elapsed().as_secs_f64());
        tracing::debug!(%version, replayed, "hydrated");
        Ok(())
    }

    async fn run(&mut self, mut mailbox: mpsc::Receiver<Message<A>>) {
        let mut stop_replies = Vec::new();

        loop {
            let Some(message) = self.next_message(&mut mailbox).await else {
                break;
            };
            match self.handle(message).await {
                Control::Continue => {}
                Control::Shutdown(reply) => {
                    stop_replies.push(reply);
                    break;
                }
                Control::Fail => return,
            }
        }

        // Refuse new messages but finish the ones already queued.
        mailbox.close();
        while let Some(message) = mailbox.recv().await {
            match self.handle(message).await {
                Control::Continue => {}
                Control::Shutdown(reply) => stop_replies.push(reply),
                Control::Fail => return,
            }
        }

        tracing::debug!(version = %self.version, "aggregate stopped");
        for reply in stop_replies {
            let _ = reply.send(());
        }
    }

    /// Waits for the next message. Returns `None` when every handle was
    /// dropped or the idle timeout elapsed.
    async fn next_message(&self, mailbox: &mut mpsc::Receiver<Message<A>>) -> Option<Message<A>> {
        match self.config.idle_timeout {
            Some(idle) => match tokio::time::timeout(idle, mailbox.recv()).await {
                Ok(message) => message,
                Err(_) => {
                    tracing::debug!(?idle, "idle timeout elapsed");
                    None
                }
            },
            None => mailbox.recv().await,
        }
    }

    async fn handle(&mut self, message: Message<A>) -> Control {
        match message {
            Message::Execute {
                command,
                context,
                reply,
            } => {
                let (result, control) = self.execute(command, &context).await;
                let _ = reply.send(result);
                control
            }
            Message::State { reply } => {
                let _ = reply.send((self.state.clone(), self.version));
                Control::Continue
            }
            Message::Shutdown { reply } => Control::Shutdown(reply),
        }
    }

    #[tracing::instrument(skip_all, fields(version = %self.version))]
    async fn execute(
        &mut self,
        command: BoxedCommand<A>,
        context: &ExecutionContext,
    ) -> (
        std::result::Result<CommandResult<A>, ExecuteError<A::Error>>,
        Control,
    ) {
        let aggregate_type = A::aggregate_type();

        let pending = match command(&self.state) {
            Ok(events) => events,
            Err(rejection) => {
                metrics::counter!("aggregate_commands_rejected", "aggregate_type" => aggregate_type)
                    .increment(1);
                return (Err(ExecuteError::Rejected(rejection)), Control::Continue);
            }
        };

        if pending.is_empty() {
            metrics::counter!("aggregate_commands_executed", "aggregate_type" => aggregate_type)
                .increment(1);
            let result = CommandResult {
                events: pending,
                version: self.version,
            };
            return (Ok(result), Control::Continue);
        }

        let data = match pending
            .iter()
            .map(|event| context.event_data(event))
            .collect::<std::result::Result<Vec<_>, _>>()
        {
            Ok(data) => data,
            Err(error) => return (Err(error.into()), Control::Continue),
        };

        let options = AppendOptions::expect_version(self.version);
        match self
            .store
            .append_to_stream(&self.stream_id, options, data)
            .await
        {
            Ok(version) => {
                let previous = self.version;
                self.state.apply_events(pending.iter().cloned());
                self.version = version;

                metrics::counter!("aggregate_commands_executed", "aggregate_type" => aggregate_type)
                    .increment(1);
                metrics::counter!("aggregate_events_appended", "aggregate_type" => aggregate_type)
                    .increment(pending.len() as u64);
                tracing::debug!(%version, events = pending.len(), "command executed");

                if self
                    .config
                    .crosses_snapshot(previous.as_i64(), version.as_i64())
                {
                    self.record_snapshot().await;
                }

                let result = CommandResult {
                    events: pending,
                    version,
                };
                (Ok(result), Control::Continue)
            }
            Err(error) if error.is_wrong_expected_version() => {
                metrics::counter!("aggregate_concurrency_conflicts", "aggregate_type" => aggregate_type)
                    .increment(1);
                tracing::warn!(%error, "stream moved ahead; rehydrating");
                match self.hydrate().await {
                    Ok(()) => (Err(error.into()), Control::Continue),
                    Err(hydrate_error) => {
                        tracing::error!(error = %hydrate_error, "rehydration failed; stopping");
                        (Err(error.into()), Control::Fail)
                    }
                }
            }
            Err(error) => {
                // The outcome of the append is unknown; only a fresh
                // hydration can tell, so the process stops.
                tracing::error!(%error, "append failed; stopping");
                (Err(error.into()), Control::Fail)
            }
        }
    }

    async fn record_snapshot(&self) {
        let snapshot = match Snapshot::from_state(
            self.stream_id.clone(),
            A::aggregate_type(),
            A::snapshot_schema_version(),
            self.version,
            &self.state,
        ) {
            Ok(snapshot) => snapshot,
            Err(error) => {
                tracing::warn!(%error, "failed to serialize snapshot");
                return;
            }
        };

        if let Err(error) = self.store.record_snapshot(snapshot).await {
            tracing::warn!(%error, "failed to record snapshot");
        }
    }
}
