//! Process registry: maps an aggregate identity to exactly one live process.
//!
//! Registration is a single linearization point. Concurrent callers
//! registering the same name share one start future, so exactly one process
//! is started and every caller observes the same handle, or the same start
//! failure.
//!
//! A registered process is forgotten as soon as it exits, and a start whose
//! caller gave up waiting is forgotten too, so later callers start afresh.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use common::AggregateId;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::Mutex;

use crate::error::RegistryError;

/// A live process that can be stored in a registry.
pub trait Process: Send + Sync + 'static {
    /// Returns false once the process stopped accepting messages.
    fn is_alive(&self) -> bool;

    /// Resolves once the process has exited.
    fn stopped(&self) -> BoxFuture<'static, ()>;

    /// Gives access to the concrete handle for downcasting.
    fn as_any(&self) -> &dyn Any;
}

/// Shared reference to a registered process.
pub type ProcessRef = Arc<dyn Process>;

/// Future that starts a process.
pub type StartFuture = BoxFuture<'static, Result<ProcessRef, RegistryError>>;

/// Deferred start of a process; only invoked when the name is absent.
pub type StartFn = Box<dyn FnOnce() -> StartFuture + Send>;

/// Registry key: an aggregate type paired with an identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcessName {
    pub aggregate_type: &'static str,
    pub id: AggregateId,
}

impl ProcessName {
    pub fn new(aggregate_type: &'static str, id: AggregateId) -> Self {
        Self { aggregate_type, id }
    }
}

impl fmt::Display for ProcessName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.aggregate_type, self.id)
    }
}

/// Maps names to live processes.
///
/// Implementations may be local to a node or distributed; callers never
/// assume locality.
#[async_trait]
pub trait Registry: Send + Sync + 'static {
    /// Returns the process registered under `name`, starting one with
    /// `start` when there is none. The flag is true only for the caller whose
    /// start function ran.
    async fn register_if_absent(
        &self,
        name: ProcessName,
        start: StartFn,
    ) -> Result<(ProcessRef, bool), RegistryError>;

    /// Returns the live process registered under `name`.
    async fn lookup(&self, name: &ProcessName) -> Option<ProcessRef>;

    /// Forgets `name`. Does not stop the process.
    async fn unregister(&self, name: &ProcessName);
}

type SharedStart = Shared<StartFuture>;

enum Entry {
    Starting(SharedStart),
    Running(ProcessRef),
}

type Entries = Mutex<HashMap<ProcessName, Entry>>;

/// Single-node registry backed by a mutex-guarded table.
///
/// Each running entry is watched and evicted when its process exits. Lookups
/// also skip and evict entries whose process no longer accepts messages.
#[derive(Clone, Default)]
pub struct LocalRegistry {
    entries: Arc<Entries>,
}

/// Held by the caller whose start function runs. Dropping it before the start
/// settles, for instance when that caller times out, removes the `Starting`
/// entry so a hung start does not capture the name.
struct PendingStart {
    entries: Weak<Entries>,
    name: ProcessName,
    start: SharedStart,
    armed: bool,
}

impl Drop for PendingStart {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let (Some(entries), Ok(runtime)) = (
            self.entries.upgrade(),
            tokio::runtime::Handle::try_current(),
        ) else {
            return;
        };
        let name = self.name.clone();
        let start = self.start.clone();
        runtime.spawn(async move {
            let mut entries = entries.lock().await;
            if matches!(entries.get(&name), Some(Entry::Starting(current)) if current.ptr_eq(&start))
            {
                entries.remove(&name);
                tracing::debug!(%name, "abandoned start evicted");
            }
        });
    }
}

impl LocalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of names currently registered, including starting ones.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Replaces the `Starting` entry for `name` with the outcome of its start,
    /// unless another registration replaced the entry in the meantime.
    async fn settle(
        &self,
        name: &ProcessName,
        start: &SharedStart,
        outcome: &Result<ProcessRef, RegistryError>,
    ) {
        let mut entries = self.entries.lock().await;
        let ours = matches!(
            entries.get(name),
            Some(Entry::Starting(current)) if current.ptr_eq(start)
        );
        if !ours {
            return;
        }
        match outcome {
            Ok(process) => {
                entries.insert(name.clone(), Entry::Running(process.clone()));
                self.evict_when_stopped(name.clone(), process);
            }
            Err(_) => {
                entries.remove(name);
            }
        }
    }

    /// Removes the entry for `name` once `process` exits, unless the name has
    /// been registered to another process by then.
    fn evict_when_stopped(&self, name: ProcessName, process: &ProcessRef) {
        let entries = Arc::downgrade(&self.entries);
        let stopped = process.stopped();
        // Weak, so the watcher never keeps a handle (and its mailbox) alive.
        let process = Arc::downgrade(process);
        tokio::spawn(async move {
            stopped.await;
            let Some(entries) = entries.upgrade() else {
                return;
            };
            let mut entries = entries.lock().await;
            if matches!(
                entries.get(&name),
                Some(Entry::Running(current)) if Arc::downgrade(current).ptr_eq(&process)
            ) {
                entries.remove(&name);
                tracing::debug!(%name, "stopped process evicted");
            }
        });
    }
}

#[async_trait]
impl Registry for LocalRegistry {
    #[tracing::instrument(skip(self, start), fields(name = %name))]
    async fn register_if_absent(
        &self,
        name: ProcessName,
        start: StartFn,
    ) -> Result<(ProcessRef, bool), RegistryError> {
        let (pending, mut guard) = {
            let mut entries = self.entries.lock().await;
            match entries.get(&name) {
                Some(Entry::Running(process)) if process.is_alive() => {
                    return Ok((process.clone(), false));
                }
                Some(Entry::Starting(pending)) => (pending.clone(), None),
                _ => {
                    let pending = start().shared();
                    entries.insert(name.clone(), Entry::Starting(pending.clone()));
                    let guard = PendingStart {
                        entries: Arc::downgrade(&self.entries),
                        name: name.clone(),
                        start: pending.clone(),
                        armed: true,
                    };
                    (pending, Some(guard))
                }
            }
        };
        let created = guard.is_some();

        let outcome = pending.clone().await;
        self.settle(&name, &pending, &outcome).await;
        if let Some(guard) = guard.as_mut() {
            guard.armed = false;
        }

        if let Err(error) = &outcome {
            tracing::warn!(%error, "process start failed");
        }
        outcome.map(|process| (process, created))
    }

    async fn lookup(&self, name: &ProcessName) -> Option<ProcessRef> {
        let mut entries = self.entries.lock().await;
        match entries.get(name) {
            Some(Entry::Running(process)) if process.is_alive() => Some(process.clone()),
            Some(Entry::Running(_)) => {
                entries.remove(name);
                None
            }
            Some(Entry::Starting(_)) | None => None,
        }
    }

    async fn unregister(&self, name: &ProcessName) {
        self.entries.lock().await.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::sync::watch;

    use super::*;

    struct FakeProcess {
        alive: watch::Sender<bool>,
    }

    impl FakeProcess {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                alive: watch::Sender::new(true),
            })
        }

        fn stop(&self) {
            self.alive.send_replace(false);
        }
    }

    impl Process for FakeProcess {
        fn is_alive(&self) -> bool {
            *self.alive.borrow()
        }

        fn stopped(&self) -> BoxFuture<'static, ()> {
            let mut alive = self.alive.subscribe();
            async move {
                let _ = alive.wait_for(|alive| !alive).await;
            }
            .boxed()
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn name(id: i64) -> ProcessName {
        ProcessName::new("account", AggregateId::from(id))
    }

    fn counting_start(starts: Arc<AtomicUsize>, process: Arc<FakeProcess>) -> StartFn {
        Box::new(move || {
            async move {
                starts.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(process as ProcessRef)
            }
            .boxed()
        })
    }

    fn failing_start(starts: Arc<AtomicUsize>) -> StartFn {
        Box::new(move || {
            async move {
                starts.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Err(RegistryError::StartFailed {
                    name: "account-1".to_string(),
                    reason: "store unavailable".to_string(),
                })
            }
            .boxed()
        })
    }

    async fn eventually_empty(registry: &LocalRegistry) -> bool {
        for _ in 0..50 {
            if registry.is_empty().await {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[test]
    fn process_name_display() {
        assert_eq!(name(7).to_string(), "account-7");
    }

    #[tokio::test]
    async fn register_starts_once_and_lookup_finds_it() {
        let registry = LocalRegistry::new();
        let starts = Arc::new(AtomicUsize::new(0));

        let (first, created) = registry
            .register_if_absent(name(1), counting_start(starts.clone(), FakeProcess::new()))
            .await
            .unwrap();
        assert!(created);

        let (second, created) = registry
            .register_if_absent(name(1), counting_start(starts.clone(), FakeProcess::new()))
            .await
            .unwrap();
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(starts.load(Ordering::SeqCst), 1);

        let found = registry.lookup(&name(1)).await.unwrap();
        assert!(Arc::ptr_eq(&first, &found));
        assert!(registry.lookup(&name(2)).await.is_none());
    }

    #[tokio::test]
    async fn concurrent_registrations_share_one_start() {
        let registry = LocalRegistry::new();
        let starts = Arc::new(AtomicUsize::new(0));

        let attempts = (0..10).map(|_| {
            let registry = registry.clone();
            let start = counting_start(starts.clone(), FakeProcess::new());
            tokio::spawn(async move { registry.register_if_absent(name(1), start).await })
        });
        let results = futures_util::future::join_all(attempts).await;

        let handles: Vec<_> = results
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert_eq!(handles.iter().filter(|(_, created)| *created).count(), 1);
        assert!(
            handles
                .iter()
                .all(|(process, _)| Arc::ptr_eq(process, &handles[0].0))
        );
    }

    #[tokio::test]
    async fn start_failure_reaches_every_waiter_and_allows_retry() {
        let registry = LocalRegistry::new();
        let starts = Arc::new(AtomicUsize::new(0));

        let first = registry.register_if_absent(name(1), failing_start(starts.clone()));
        let second = registry.register_if_absent(name(1), failing_start(starts.clone()));
        let (first, second) = tokio::join!(first, second);

        assert!(matches!(first, Err(RegistryError::StartFailed { .. })));
        assert_eq!(first.err(), second.err());
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty().await);

        let (_, created) = registry
            .register_if_absent(name(1), counting_start(starts.clone(), FakeProcess::new()))
            .await
            .unwrap();
        assert!(created);
    }

    #[tokio::test]
    async fn dead_process_is_replaced() {
        let registry = LocalRegistry::new();
        let starts = Arc::new(AtomicUsize::new(0));
        let process = FakeProcess::new();

        registry
            .register_if_absent(name(1), counting_start(starts.clone(), process.clone()))
            .await
            .unwrap();
        process.stop();

        assert!(registry.lookup(&name(1)).await.is_none());
        let (_, created) = registry
            .register_if_absent(name(1), counting_start(starts.clone(), FakeProcess::new()))
            .await
            .unwrap();
        assert!(created);
        assert_eq!(starts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unregister_forgets_name() {
        let registry = LocalRegistry::new();
        let starts = Arc::new(AtomicUsize::new(0));

        registry
            .register_if_absent(name(1), counting_start(starts, FakeProcess::new()))
            .await
            .unwrap();
        registry.unregister(&name(1)).await;

        assert!(registry.lookup(&name(1)).await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn stopped_process_is_evicted_without_lookup() {
        let registry = LocalRegistry::new();
        let process = FakeProcess::new();

        registry
            .register_if_absent(
                name(1),
                counting_start(Arc::new(AtomicUsize::new(0)), process.clone()),
            )
            .await
            .unwrap();
        assert_eq!(registry.len().await, 1);

        process.stop();
        assert!(eventually_empty(&registry).await);
    }

    #[tokio::test]
    async fn stale_watcher_keeps_replacement() {
        let registry = LocalRegistry::new();
        let starts = Arc::new(AtomicUsize::new(0));
        let old = FakeProcess::new();

        registry
            .register_if_absent(name(1), counting_start(starts.clone(), old.clone()))
            .await
            .unwrap();
        registry.unregister(&name(1)).await;
        let (replacement, _) = registry
            .register_if_absent(name(1), counting_start(starts, FakeProcess::new()))
            .await
            .unwrap();

        old.stop();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let found = registry.lookup(&name(1)).await.unwrap();
        assert!(Arc::ptr_eq(&found, &replacement));
    }

    #[tokio::test]
    async fn abandoned_start_is_evicted() {
        let registry = LocalRegistry::new();
        let hung: StartFn =
            Box::new(|| std::future::pending::<Result<ProcessRef, RegistryError>>().boxed());

        let attempt = tokio::time::timeout(
            Duration::from_millis(20),
            registry.register_if_absent(name(1), hung),
        )
        .await;
        assert!(attempt.is_err());
        assert!(eventually_empty(&registry).await);

        let (_, created) = registry
            .register_if_absent(
                name(1),
                counting_start(Arc::new(AtomicUsize::new(0)), FakeProcess::new()),
            )
            .await
            .unwrap();
        assert!(created);
    }
}
