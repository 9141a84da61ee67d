//! Ledger persistence port and adapters
//!
//! Each method is individually atomic. Multi-step sequences (check, apply,
//! mark) are orchestrated by the engine, never pushed into the store.

mod memory;
mod sqlite;

pub use memory::InMemoryLedgerStore;
pub use sqlite::SqliteLedgerStore;

use crate::account::Account;
use crate::entry::LedgerEntry;
use crate::error::StoreError;
use async_trait::async_trait;

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn get_account(&self, id: &str) -> Result<Option<Account>, StoreError>;

    /// Write `account`.
    ///
    /// Without `expected_prior` the row is inserted or replaced
    /// unconditionally. With it, the write is a single conditional update
    /// that only lands if the stored balance and status still equal those
    /// of `expected_prior`; otherwise it fails with [`StoreError::Conflict`]
    /// (or [`StoreError::NotFound`] if the row is gone).
    async fn upsert_account(
        &self,
        account: &Account,
        expected_prior: Option<&Account>,
    ) -> Result<(), StoreError>;

    async fn append_ledger_entry(&self, entry: &LedgerEntry) -> Result<(), StoreError>;

    async fn exists_processed_marker(&self, event_id: &str) -> Result<bool, StoreError>;

    /// Insert the marker unless present; returns whether it was inserted
    async fn insert_processed_marker_if_absent(&self, event_id: &str) -> Result<bool, StoreError>;

    async fn accounts_by_client(&self, client_id: &str) -> Result<Vec<Account>, StoreError>;

    /// Entries written for `source_event_id`, oldest first
    async fn entries_for_event(&self, source_event_id: &str)
        -> Result<Vec<LedgerEntry>, StoreError>;

    /// Entries of `account_id`, newest first
    async fn ledger_entries(
        &self,
        account_id: &str,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>, StoreError>;

    async fn processed_marker_count(&self) -> Result<u64, StoreError>;
}
