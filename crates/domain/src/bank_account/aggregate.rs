use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;

use super::{AccountError, AccountEvent};

/// Lifecycle of an account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountStatus {
    #[default]
    Unopened,
    Open,
    Closed,
}

/// A bank account whose balance is the fold of its deposits and withdrawals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankAccount {
    owner: Option<String>,
    status: AccountStatus,
    balance: u64,
    transactions: u64,
}

impl Aggregate for BankAccount {
    type Event = AccountEvent;
    type Error = AccountError;

    fn aggregate_type() -> &'static str {
        "account"
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            AccountEvent::AccountOpened { owner } => {
                self.owner = Some(owner);
                self.status = AccountStatus::Open;
            }
            AccountEvent::MoneyDeposited { amount } => {
                self.balance = self.balance.saturating_add(amount);
                self.transactions += 1;
            }
            AccountEvent::MoneyWithdrawn { amount } => {
                self.balance = self.balance.saturating_sub(amount);
                self.transactions += 1;
            }
            AccountEvent::AccountClosed => self.status = AccountStatus::Closed,
        }
    }
}

// Query methods
impl BankAccount {
    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    pub fn status(&self) -> AccountStatus {
        self.status
    }

    pub fn balance(&self) -> u64 {
        self.balance
    }

    /// Number of deposits and withdrawals applied.
    pub fn transactions(&self) -> u64 {
        self.transactions
    }
}

// Command methods (return events)
impl BankAccount {
    pub fn open(&self, owner: &str) -> Result<Vec<AccountEvent>, AccountError> {
        if self.status != AccountStatus::Unopened {
            return Err(AccountError::AlreadyOpen);
        }
        let owner = owner.trim();
        if owner.is_empty() {
            return Err(AccountError::OwnerRequired);
        }
        Ok(vec![AccountEvent::AccountOpened {
            owner: owner.to_string(),
        }])
    }

    pub fn deposit(&self, amount: u64) -> Result<Vec<AccountEvent>, AccountError> {
        self.ensure_open()?;
        if amount == 0 {
            return Err(AccountError::InvalidAmount(amount));
        }
        if self.balance.checked_add(amount).is_none() {
            return Err(AccountError::BalanceOverflow {
                balance: self.balance,
                amount,
            });
        }
        Ok(vec![AccountEvent::MoneyDeposited { amount }])
    }

    pub fn withdraw(&self, amount: u64) -> Result<Vec<AccountEvent>, AccountError> {
        self.ensure_open()?;
        if amount == 0 {
            return Err(AccountError::InvalidAmount(amount));
        }
        if amount > self.balance {
            return Err(AccountError::InsufficientFunds {
                balance: self.balance,
                requested: amount,
            });
        }
        Ok(vec![AccountEvent::MoneyWithdrawn { amount }])
    }

    pub fn close(&self) -> Result<Vec<AccountEvent>, AccountError> {
        self.ensure_open()?;
        if self.balance > 0 {
            return Err(AccountError::NonZeroBalance(self.balance));
        }
        Ok(vec![AccountEvent::AccountClosed])
    }

    fn ensure_open(&self) -> Result<(), AccountError> {
        match self.status {
            AccountStatus::Open => Ok(()),
            AccountStatus::Unopened => Err(AccountError::NotOpen),
            AccountStatus::Closed => Err(AccountError::Closed),
        }
    }
}
