use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use criterion::{Criterion, criterion_group, criterion_main};
use event_handler::{
    EventHandler, EventMetadata, HandleError, HandlerConfig, HandlerSupervisor,
};
use event_store::{
    AggregateId, AppendOptions, EventData, EventStore, InMemoryEventStore, StreamId,
};
use serde_json::{Value, json};
use tokio::sync::Notify;

struct Counter {
    handled: AtomicUsize,
    target: usize,
    done: Notify,
}

#[async_trait]
impl EventHandler for Counter {
    async fn handle(&self, _data: &Value, _metadata: &EventMetadata) -> Result<(), HandleError> {
        if self.handled.fetch_add(1, Ordering::Relaxed) + 1 == self.target {
            self.done.notify_one();
        }
        Ok(())
    }
}

fn seeded_store(rt: &tokio::runtime::Runtime, events: usize) -> InMemoryEventStore {
    let store = InMemoryEventStore::new();
    rt.block_on(async {
        let stream = StreamId::for_aggregate("account", &AggregateId::new());
        let batch = (0..events)
            .map(|n| {
                EventData::new("MoneyDeposited", json!({ "amount": n }))
                    .with_metadata("source", json!("bench"))
            })
            .collect();
        store
            .append_to_stream(&stream, AppendOptions::new(), batch)
            .await
            .unwrap();
    });
    store
}

fn bench_catch_up_1000(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = seeded_store(&rt, 1000);
    let supervisor = HandlerSupervisor::new(store);
    let mut run = 0u64;

    c.bench_function("event_handler/catch_up_1000", |b| {
        b.iter(|| {
            run += 1;
            rt.block_on(async {
                let counter = Arc::new(Counter {
                    handled: AtomicUsize::new(0),
                    target: 1000,
                    done: Notify::new(),
                });
                let handle = supervisor.start(
                    counter.clone(),
                    HandlerConfig::new(format!("bench-{run}")),
                );
                counter.done.notified().await;
                handle.stop().await;
            });
        });
    });
}

fn bench_metadata_envelope(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = seeded_store(&rt, 1);
    let event = rt
        .block_on(store.read_all_forward(event_store::EventNumber::origin(), 1))
        .unwrap()
        .remove(0);

    c.bench_function("event_handler/metadata_envelope", |b| {
        b.iter(|| EventMetadata::from_recorded(&event).to_map());
    });
}

criterion_group!(benches, bench_catch_up_1000, bench_metadata_envelope);
criterion_main!(benches);
