//! Ledger errors

use crate::account::AccountStatus;
use edalab_core::Amount;
use thiserror::Error;

/// Failures of the persistence layer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Account {account_id} changed since it was read (expected balance {expected}, status {status})")]
    Conflict {
        account_id: String,
        expected: Amount,
        status: AccountStatus,
    },

    #[error("Account {0} not found in store")]
    NotFound(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

/// Errors that can occur in ledger operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Account {0} already exists")]
    DuplicateAccount(String),

    #[error("Account {0} not found")]
    AccountNotFound(String),

    #[error("Insufficient funds on {account_id}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        account_id: String,
        balance: Amount,
        requested: Amount,
    },

    #[error("Account {account_id} is {status}")]
    AccountInactive {
        account_id: String,
        status: AccountStatus,
    },

    #[error("Account {account_id} cannot go from {from} to {to}")]
    InvalidTransition {
        account_id: String,
        from: AccountStatus,
        to: AccountStatus,
    },

    #[error("Balance overflow on {0}")]
    Overflow(String),

    #[error("Concurrent balance update on {0}")]
    BalanceConflict(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl LedgerError {
    /// Domain rejections are final for the event that caused them: the event
    /// is marked processed and never retried.
    pub fn is_domain(&self) -> bool {
        matches!(
            self,
            LedgerError::DuplicateAccount(_)
                | LedgerError::AccountNotFound(_)
                | LedgerError::InsufficientFunds { .. }
                | LedgerError::AccountInactive { .. }
                | LedgerError::InvalidTransition { .. }
                | LedgerError::Overflow(_)
        )
    }

    /// Infrastructure failures that may succeed on redelivery
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::BalanceConflict(_) | LedgerError::Store(StoreError::Database(_))
        )
    }
}
