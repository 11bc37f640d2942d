//! Event handlers fed from durable all-streams subscriptions.
//!
//! A handler implements [`EventHandler`]. [`HandlerSupervisor`] runs it over
//! a named subscription, acknowledges each processed event, and restarts it
//! with backoff when it fails; the store redelivers from the last
//! acknowledged event.

pub mod config;
pub mod error;
pub mod handler;
pub mod metadata;
pub mod runtime;
pub mod supervisor;
pub mod testing;

pub use config::{HandlerConfig, RestartPolicy};
pub use error::{HandleError, HandlerError, InitError, Result};
pub use handler::EventHandler;
pub use metadata::{EventMetadata, RESERVED_KEYS};
pub use runtime::{HandlerRuntime, Phase};
pub use supervisor::{HandlerExit, HandlerHandle, HandlerSupervisor};
