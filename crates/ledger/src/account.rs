//! Account aggregate
//!
//! Status machine: `ACTIVE <-> BLOCKED`, `ACTIVE -> CLOSED` (terminal).
//! The balance never drops below zero while the account is active.

use crate::error::LedgerError;
use chrono::{DateTime, Utc};
use edalab_core::{Amount, Currency};
use edalab_events::AccountType;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    Active,
    Blocked,
    Closed,
}

impl AccountStatus {
    pub fn can_transition_to(self, to: AccountStatus) -> bool {
        matches!(
            (self, to),
            (AccountStatus::Active, AccountStatus::Blocked)
                | (AccountStatus::Blocked, AccountStatus::Active)
                | (AccountStatus::Active, AccountStatus::Closed)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub client_id: String,
    pub account_type: AccountType,
    pub balance: Amount,
    pub currency: Currency,
    pub status: AccountStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// A new active account
    pub fn open(
        id: impl Into<String>,
        client_id: impl Into<String>,
        account_type: AccountType,
        initial_balance: Amount,
        currency: Currency,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            client_id: client_id.into(),
            account_type,
            balance: initial_balance,
            currency,
            status: AccountStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }

    /// Copy with `amount` added. Closed accounts take no money.
    pub fn credited(&self, amount: &Amount) -> Result<Account, LedgerError> {
        if self.status == AccountStatus::Closed {
            return Err(LedgerError::AccountInactive {
                account_id: self.id.clone(),
                status: self.status,
            });
        }
        let balance = self
            .balance
            .checked_add(amount)
            .ok_or_else(|| LedgerError::Overflow(self.id.clone()))?;
        Ok(self.with_balance(balance))
    }

    /// Copy with `amount` removed. Only active accounts with enough funds.
    pub fn debited(&self, amount: &Amount) -> Result<Account, LedgerError> {
        if !self.is_active() {
            return Err(LedgerError::AccountInactive {
                account_id: self.id.clone(),
                status: self.status,
            });
        }
        let balance =
            self.balance
                .checked_sub(amount)
                .ok_or_else(|| LedgerError::InsufficientFunds {
                    account_id: self.id.clone(),
                    balance: self.balance,
                    requested: *amount,
                })?;
        Ok(self.with_balance(balance))
    }

    /// Copy moved to `status`, if the status machine allows it
    pub fn transitioned(&self, status: AccountStatus) -> Result<Account, LedgerError> {
        if !self.status.can_transition_to(status) {
            return Err(LedgerError::InvalidTransition {
                account_id: self.id.clone(),
                from: self.status,
                to: status,
            });
        }
        Ok(Account {
            status,
            updated_at: Utc::now(),
            ..self.clone()
        })
    }

    fn with_balance(&self, balance: Amount) -> Account {
        Account {
            balance,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn account(balance: u64) -> Account {
        Account::open(
            "ACC-1",
            "CLI-1",
            AccountType::Checking,
            Amount::from_units(balance),
            Currency::Eur,
        )
    }

    #[test]
    fn test_credit_and_debit() {
        let acc = account(100);
        let credited = acc.credited(&Amount::from_units(50)).unwrap();
        assert_eq!(credited.balance.value(), dec!(150));
        // Original untouched
        assert_eq!(acc.balance.value(), dec!(100));

        let debited = credited.debited(&Amount::from_units(150)).unwrap();
        assert!(debited.balance.is_zero());
    }

    #[test]
    fn test_debit_insufficient() {
        let err = account(10).debited(&Amount::from_units(11)).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
    }

    #[test]
    fn test_status_machine() {
        let acc = account(0);
        let blocked = acc.transitioned(AccountStatus::Blocked).unwrap();
        assert!(matches!(
            blocked.debited(&Amount::ZERO),
            Err(LedgerError::AccountInactive { .. })
        ));
        // Blocked accounts still receive credits
        assert!(blocked.credited(&Amount::from_units(5)).is_ok());

        assert!(matches!(
            blocked.transitioned(AccountStatus::Closed),
            Err(LedgerError::InvalidTransition { .. })
        ));

        let closed = blocked
            .transitioned(AccountStatus::Active)
            .unwrap()
            .transitioned(AccountStatus::Closed)
            .unwrap();
        assert!(closed.credited(&Amount::from_units(1)).is_err());
        assert!(closed.transitioned(AccountStatus::Active).is_err());
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(AccountStatus::Blocked.to_string(), "BLOCKED");
        assert_eq!("CLOSED".parse::<AccountStatus>().unwrap(), AccountStatus::Closed);
    }
}
