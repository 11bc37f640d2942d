//! Bank account aggregate used by the demo server and the runtime tests.

mod aggregate;
mod commands;
mod events;

pub use aggregate::{AccountStatus, BankAccount};
pub use commands::{CloseAccount, Deposit, OpenAccount, Withdraw};
pub use events::AccountEvent;

use thiserror::Error;

/// Reasons a bank account command is rejected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AccountError {
    #[error("Account is already open")]
    AlreadyOpen,

    #[error("Account is not open")]
    NotOpen,

    #[error("Account is closed")]
    Closed,

    #[error("Owner name is required")]
    OwnerRequired,

    #[error("Invalid amount: {0} (must be greater than 0)")]
    InvalidAmount(u64),

    #[error("Insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds { balance: u64, requested: u64 },

    #[error("Deposit of {amount} would overflow balance {balance}")]
    BalanceOverflow { balance: u64, amount: u64 },

    #[error("Account still holds {0}; withdraw it before closing")]
    NonZeroBalance(u64),
}
