//! Shared types for the aggregate runtime.

mod types;

pub use types::AggregateId;
