//! Append-only ledger entries

use chrono::{DateTime, Utc};
use edalab_core::{Amount, Currency};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerEntryKind {
    Open,
    Credit,
    Debit,
}

/// One balance effect on one account.
///
/// `amount` is signed: positive for OPEN/CREDIT, negative for DEBIT. A
/// transfer yields one DEBIT and one CREDIT entry sharing `source_event_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: String,
    pub account_id: String,
    pub source_event_id: String,
    pub kind: LedgerEntryKind,
    pub amount: Decimal,
    pub balance_after: Amount,
    pub currency: Currency,
    pub reference: String,
    pub description: String,
    pub counterparty_account_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Entry for a positive or negative effect of `amount`, depending on `kind`
    pub fn new(
        kind: LedgerEntryKind,
        account_id: impl Into<String>,
        source_event_id: impl Into<String>,
        amount: &Amount,
        balance_after: Amount,
        currency: Currency,
    ) -> Self {
        let amount = match kind {
            LedgerEntryKind::Debit => amount.negated(),
            LedgerEntryKind::Open | LedgerEntryKind::Credit => amount.value(),
        };
        Self {
            id: Uuid::new_v4().to_string(),
            account_id: account_id.into(),
            source_event_id: source_event_id.into(),
            kind,
            amount,
            balance_after,
            currency,
            reference: String::new(),
            description: String::new(),
            counterparty_account_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = reference.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_counterparty(mut self, account_id: impl Into<String>) -> Self {
        self.counterparty_account_id = Some(account_id.into());
        self
    }
}
