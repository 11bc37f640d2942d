use serde::{Deserialize, Serialize};

use crate::command::Command;

use super::{AccountError, AccountEvent, BankAccount};

/// Opens an account for `owner`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAccount {
    pub owner: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Deposit {
    pub amount: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Withdraw {
    pub amount: u64,
}

/// Closes an account with a zero balance.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CloseAccount;

impl Command for OpenAccount {
    type Aggregate = BankAccount;

    fn handle(self, state: &BankAccount) -> Result<Vec<AccountEvent>, AccountError> {
        state.open(&self.owner)
    }
}

impl Command for Deposit {
    type Aggregate = BankAccount;

    fn handle(self, state: &BankAccount) -> Result<Vec<AccountEvent>, AccountError> {
        state.deposit(self.amount)
    }
}

impl Command for Withdraw {
    type Aggregate = BankAccount;

    fn handle(self, state: &BankAccount) -> Result<Vec<AccountEvent>, AccountError> {
        state.withdraw(self.amount)
    }
}

impl Command for CloseAccount {
    type Aggregate = BankAccount;

    fn handle(self, state: &BankAccount) -> Result<Vec<AccountEvent>, AccountError> {
        state.close()
    }
}
