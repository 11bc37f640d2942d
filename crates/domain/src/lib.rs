//! Aggregate runtime for the event-sourcing system.
//!
//! This crate provides:
//! - Aggregate and DomainEvent traits for event-sourced entities
//! - A process registry with single-winner registration
//! - Aggregate processes that hydrate from the event store and execute
//!   commands one at a time
//! - AggregateSupervisor, which opens aggregates on demand
//! - BankAccount, a reference aggregate

pub mod aggregate;
pub mod bank_account;
pub mod command;
pub mod config;
pub mod error;
pub mod process;
pub mod registry;
pub mod supervisor;

pub use aggregate::{Aggregate, DomainEvent};
pub use bank_account::{
    AccountError, AccountEvent, AccountStatus, BankAccount, CloseAccount, Deposit, OpenAccount,
    Withdraw,
};
pub use command::{Command, CommandOutcome, CommandResult, ExecutionContext, FnCommand, from_fn};
pub use config::AggregateConfig;
pub use error::{AggregateError, ExecuteError, RegistryError};
pub use process::{AggregateHandle, Phase};
pub use registry::{LocalRegistry, Process, ProcessName, ProcessRef, Registry, StartFn, StartFuture};
pub use supervisor::{AggregateSupervisor, CommandReply};
