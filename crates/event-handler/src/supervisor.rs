//! Restarts event handlers that fail.
//!
//! Restarting is the only retry mechanism: a new run re-subscribes under the
//! same name and the store redelivers everything after the last acknowledged
//! event.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use event_store::EventStore;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::{HandlerConfig, RestartPolicy};
use crate::error::HandlerError;
use crate::handler::EventHandler;
use crate::runtime::HandlerRuntime;

/// Why a supervised handler stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerExit {
    /// `stop` was called.
    Stopped,
    /// The handler's `init` hook refused to start.
    InitStopped(String),
}

/// Handle to a supervised handler.
pub struct HandlerHandle {
    name: String,
    shutdown: watch::Sender<bool>,
    restarts: Arc<AtomicU64>,
    task: JoinHandle<HandlerExit>,
}

impl HandlerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of times the handler was restarted after a failure.
    pub fn restarts(&self) -> u64 {
        self.restarts.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stops the handler and waits for it to exit. The subscription's
    /// checkpoint is kept.
    pub async fn stop(self) -> HandlerExit {
        let _ = self.shutdown.send(true);
        self.wait().await
    }

    /// Waits for the handler to exit on its own.
    pub async fn wait(self) -> HandlerExit {
        match self.task.await {
            Ok(exit) => exit,
            Err(error) => {
                tracing::error!(handler = %self.name, %error, "handler supervisor panicked");
                HandlerExit::Stopped
            }
        }
    }
}

/// Runs event handlers and restarts them after failures.
pub struct HandlerSupervisor<S> {
    store: S,
    policy: RestartPolicy,
}

impl<S> HandlerSupervisor<S>
where
    S: EventStore + Clone,
{
    pub fn new(store: S) -> Self {
        Self::with_policy(store, RestartPolicy::default())
    }

    pub fn with_policy(store: S, policy: RestartPolicy) -> Self {
        Self { store, policy }
    }

    /// Starts `handler` under supervision.
    pub fn start<H: EventHandler>(&self, handler: H, config: HandlerConfig) -> HandlerHandle {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let restarts = Arc::new(AtomicU64::new(0));
        let name = config.name.clone();

        let task = tokio::spawn(supervise(
            self.store.clone(),
            Arc::new(handler),
            config,
            self.policy,
            shutdown_rx,
            restarts.clone(),
        ));

        HandlerHandle {
            name,
            shutdown,
            restarts,
            task,
        }
    }
}

#[tracing::instrument(skip_all, fields(handler = %config.name))]
async fn supervise<S, H>(
    store: S,
    handler: Arc<H>,
    config: HandlerConfig,
    policy: RestartPolicy,
    mut shutdown: watch::Receiver<bool>,
    restarts: Arc<AtomicU64>,
) -> HandlerExit
where
    S: EventStore + Clone,
    H: EventHandler,
{
    let mut delay = policy.restart_delay;

    loop {
        let started = Instant::now();
        let mut runtime = HandlerRuntime::new(store.clone(), handler.clone(), config.clone());

        let error = tokio::select! {
            result = runtime.run() => match result {
                Ok(()) => return HandlerExit::Stopped,
                Err(error) => error,
            },
            () = stop_requested(&mut shutdown) => {
                drop(runtime);
                if let Err(error) = store.unsubscribe(&config.name).await {
                    tracing::warn!(%error, "failed to unsubscribe on stop");
                }
                tracing::info!("handler stopped");
                return HandlerExit::Stopped;
            }
        };

        if let HandlerError::Init(stop) = error {
            return HandlerExit::InitStopped(stop.reason);
        }

        // A run that survived longer than the backoff cap is not part of a
        // crash loop.
        if started.elapsed() >= policy.max_restart_delay {
            delay = policy.restart_delay;
        }

        tracing::error!(%error, ?delay, "handler crashed; restarting");
        restarts.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("event_handler_restarts", "handler" => config.name.clone()).increment(1);

        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = stop_requested(&mut shutdown) => return HandlerExit::Stopped,
        }
        delay = policy.next_delay(delay);
    }
}

/// Resolves once `stop` was called. A dropped handle leaves the handler
/// running, like a detached task.
async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}
