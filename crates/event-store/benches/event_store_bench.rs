use criterion::{Criterion, criterion_group, criterion_main};
use event_store::{
    AggregateId, AppendOptions, EventData, EventNumber, EventStore, EventStoreExt,
    InMemoryEventStore, StreamId, Version,
};
use futures_util::TryStreamExt;

fn make_event(sequence: i64) -> EventData {
    EventData::new(
        "MoneyDeposited",
        serde_json::json!({ "amount": 100, "sequence": sequence }),
    )
}

fn bench_append_single_event(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("event_store/append_single_event", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryEventStore::new();
                let stream = StreamId::for_aggregate("account", &AggregateId::new());
                store
                    .append_to_stream(&stream, AppendOptions::expect_new(), vec![make_event(1)])
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_append_batch_10(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("event_store/append_batch_10", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryEventStore::new();
                let stream = StreamId::for_aggregate("account", &AggregateId::new());
                let events = (1..=10).map(make_event).collect();
                store
                    .append_to_stream(&stream, AppendOptions::new(), events)
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_stream_forward_1000(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryEventStore::new();
    let stream = StreamId::for_aggregate("account", &AggregateId::new());
    rt.block_on(async {
        let events = (1..=1000).map(make_event).collect();
        store
            .append_to_stream(&stream, AppendOptions::new(), events)
            .await
            .unwrap();
    });

    c.bench_function("event_store/stream_forward_1000", |b| {
        b.iter(|| {
            rt.block_on(async {
                let events: Vec<_> = store
                    .stream_forward(&stream, Version::first(), 100)
                    .try_collect()
                    .await
                    .unwrap();
                assert_eq!(events.len(), 1000);
            });
        });
    });
}

fn bench_read_all_forward(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryEventStore::new();
    rt.block_on(async {
        for _ in 0..100 {
            let stream = StreamId::for_aggregate("account", &AggregateId::new());
            let events = (1..=10).map(make_event).collect();
            store
                .append_to_stream(&stream, AppendOptions::new(), events)
                .await
                .unwrap();
        }
    });

    c.bench_function("event_store/read_all_forward_100", |b| {
        b.iter(|| {
            rt.block_on(async {
                store
                    .read_all_forward(EventNumber::new(500), 100)
                    .await
                    .unwrap()
            })
        });
    });
}

criterion_group!(
    benches,
    bench_append_single_event,
    bench_append_batch_10,
    bench_stream_forward_1000,
    bench_read_all_forward
);
criterion_main!(benches);
