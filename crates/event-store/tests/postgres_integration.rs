//! PostgreSQL integration tests
//!
//! These tests share one PostgreSQL container and truncate the tables before
//! each test, so they run serially. They need a Docker daemon:
//!
//! ```bash
//! cargo test -p event-store --test postgres_integration -- --ignored
//! ```

use std::sync::Arc;
use std::time::Duration;

use event_store::{
    AggregateId, AppendOptions, DeliveryOptions, EventData, EventNumber, EventStore,
    EventStoreError, EventStoreExt, PostgresEventStore, RecordedEvent, Snapshot, StartFrom,
    StreamId, Subscription, Version,
};
use futures_util::TryStreamExt;
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use uuid::Uuid;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let pool = PgPool::connect(&connection_string).await.unwrap();
            PostgresEventStore::new(pool.clone())
                .run_migrations()
                .await
                .unwrap();
            pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn get_test_store() -> PostgresEventStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE events, subscriptions, snapshots RESTART IDENTITY")
        .execute(&pool)
        .await
        .unwrap();

    PostgresEventStore::with_delivery_options(
        pool,
        DeliveryOptions {
            poll_interval: Some(Duration::from_millis(50)),
            ..DeliveryOptions::default()
        },
    )
}

fn create_test_event(event_type: &str) -> EventData {
    EventData::new(event_type, serde_json::json!({"test": true}))
}

fn account_stream() -> StreamId {
    StreamId::for_aggregate("account", &AggregateId::new())
}

async fn next_batch(subscription: &mut Subscription) -> Vec<RecordedEvent> {
    tokio::time::timeout(Duration::from_secs(5), subscription.next_batch())
        .await
        .expect("timed out waiting for a batch")
        .expect("subscription closed")
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn append_and_read_back() {
    let store = get_test_store().await;
    let stream = account_stream();

    let version = store
        .append_to_stream(
            &stream,
            AppendOptions::expect_new(),
            vec![
                create_test_event("Event1"),
                create_test_event("Event2"),
                create_test_event("Event3"),
            ],
        )
        .await
        .unwrap();
    assert_eq!(version, Version::new(3));

    let events = store
        .read_stream_forward(&stream, Version::first(), 100)
        .await
        .unwrap();
    assert_eq!(events.len(), 3);
    assert_eq!(events[0].event_type, "Event1");
    assert_eq!(events[2].stream_version, Version::new(3));
    assert!(events[0].event_number < events[1].event_number);
    assert_eq!(store.stream_version(&stream).await.unwrap(), Version::new(3));
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn wrong_expected_version_is_rejected() {
    let store = get_test_store().await;
    let stream = account_stream();

    store
        .append_event(&stream, AppendOptions::expect_new(), create_test_event("Event1"))
        .await
        .unwrap();

    let err = store
        .append_event(
            &stream,
            AppendOptions::expect_version(Version::initial()),
            create_test_event("Event2"),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        EventStoreError::WrongExpectedVersion { actual, .. } if actual == Version::first()
    ));
    assert_eq!(store.stream_version(&stream).await.unwrap(), Version::first());
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn concurrent_appends_at_same_version_admit_one_writer() {
    let store = get_test_store().await;
    let stream = account_stream();

    let first = store.append_event(
        &stream,
        AppendOptions::expect_new(),
        create_test_event("A"),
    );
    let second = store.append_event(
        &stream,
        AppendOptions::expect_new(),
        create_test_event("B"),
    );
    let (first, second) = tokio::join!(first, second);

    assert!(first.is_ok() ^ second.is_ok());
    assert_eq!(store.stream_version(&stream).await.unwrap(), Version::first());
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn stream_forward_reads_in_batches() {
    let store = get_test_store().await;
    let stream = account_stream();

    let events = (0..25).map(|i| create_test_event(&format!("Event{i}"))).collect();
    store
        .append_to_stream(&stream, AppendOptions::new(), events)
        .await
        .unwrap();

    let all: Vec<_> = store
        .stream_forward(&stream, Version::first(), 10)
        .try_collect()
        .await
        .unwrap();
    assert_eq!(all.len(), 25);
    assert_eq!(all[24].stream_version, Version::new(25));
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn subscription_resumes_after_acknowledged_event() {
    let store = get_test_store().await;
    let stream = account_stream();
    store
        .append_to_stream(
            &stream,
            AppendOptions::new(),
            vec![create_test_event("Event1"), create_test_event("Event2")],
        )
        .await
        .unwrap();

    let mut subscription = store
        .subscribe_to_all_streams("audit", StartFrom::Origin)
        .await
        .unwrap();
    let batch = next_batch(&mut subscription).await;
    assert_eq!(batch.len(), 2);
    store
        .ack(subscription.handle(), batch[0].event_number)
        .await
        .unwrap();
    drop(subscription);

    let mut subscription = store
        .subscribe_to_all_streams("audit", StartFrom::Origin)
        .await
        .unwrap();
    let batch = next_batch(&mut subscription).await;
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].event_type, "Event2");
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn subscription_from_current_sees_only_new_events() {
    let store = get_test_store().await;
    let stream = account_stream();
    store
        .append_event(&stream, AppendOptions::new(), create_test_event("Old"))
        .await
        .unwrap();

    let mut subscription = store
        .subscribe_to_all_streams("live", StartFrom::Current)
        .await
        .unwrap();
    store
        .append_event(&stream, AppendOptions::new(), create_test_event("New"))
        .await
        .unwrap();

    let batch = next_batch(&mut subscription).await;
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].event_type, "New");
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn checkpoint_is_monotonic_and_deletable() {
    let store = get_test_store().await;
    let subscription = store
        .subscribe_to_all_streams("audit", StartFrom::Origin)
        .await
        .unwrap();

    store
        .ack(subscription.handle(), EventNumber::new(5))
        .await
        .unwrap();
    store
        .ack(subscription.handle(), EventNumber::new(3))
        .await
        .unwrap();
    assert_eq!(
        store.checkpoint("audit").await.unwrap(),
        Some(EventNumber::new(5))
    );

    store.delete_subscription("audit").await.unwrap();
    assert_eq!(store.checkpoint("audit").await.unwrap(), None);
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn snapshot_upsert_replaces_existing() {
    let store = get_test_store().await;
    let stream = account_stream();

    let first = Snapshot::from_state(
        stream.clone(),
        "account",
        1,
        Version::new(5),
        &serde_json::json!({"balance": 50}),
    )
    .unwrap();
    store.record_snapshot(first).await.unwrap();

    let second = Snapshot::from_state(
        stream.clone(),
        "account",
        1,
        Version::new(10),
        &serde_json::json!({"balance": 100}),
    )
    .unwrap();
    store.record_snapshot(second).await.unwrap();

    let loaded = store.read_snapshot(&stream).await.unwrap().unwrap();
    assert_eq!(loaded.version, Version::new(10));
    assert_eq!(loaded.state["balance"], 100);
    assert!(store.read_snapshot(&account_stream()).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn event_metadata_preserved() {
    let store = get_test_store().await;
    let stream = account_stream();
    let correlation_id = Uuid::new_v4();

    let event = create_test_event("Event1")
        .with_metadata("user", serde_json::json!("alice"))
        .with_correlation_id(Some(correlation_id));
    store
        .append_event(&stream, AppendOptions::new(), event)
        .await
        .unwrap();

    let events = store
        .read_all_forward(EventNumber::origin(), 10)
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].metadata["user"], "alice");
    assert_eq!(events[0].correlation_id, Some(correlation_id));
    assert_eq!(events[0].stream_id, stream);
}
