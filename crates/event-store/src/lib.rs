//! Append-only event log with per-stream optimistic concurrency and durable,
//! named subscriptions over the global log.

pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod snapshot;
pub mod store;
pub mod subscription;

pub use common::AggregateId;
pub use error::{EventStoreError, Result};
pub use event::{EventData, EventId, EventNumber, RecordedEvent, StreamId, Version};
pub use memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use snapshot::Snapshot;
pub use store::{AppendOptions, EventStore, EventStoreExt, EventStream};
pub use subscription::{DeliveryOptions, StartFrom, Subscription, SubscriptionHandle};
