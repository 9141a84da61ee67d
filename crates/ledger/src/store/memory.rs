//! In-memory ledger store

use super::LedgerStore;
use crate::account::Account;
use crate::entry::LedgerEntry;
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Default)]
struct State {
    accounts: HashMap<String, Account>,
    entries: HashMap<String, Vec<LedgerEntry>>,
    markers: HashMap<String, DateTime<Utc>>,
}

/// Ledger store held in process memory
#[derive(Default)]
pub struct InMemoryLedgerStore {
    state: RwLock<State>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// When the marker for `event_id` was written
    pub fn processed_at(&self, event_id: &str) -> Option<DateTime<Utc>> {
        self.state.read().markers.get(event_id).copied()
    }

    /// Total entries across all accounts
    pub fn entry_count(&self) -> usize {
        self.state.read().entries.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn get_account(&self, id: &str) -> Result<Option<Account>, StoreError> {
        Ok(self.state.read().accounts.get(id).cloned())
    }

    async fn upsert_account(
        &self,
        account: &Account,
        expected_prior: Option<&Account>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write();

        if let Some(expected) = expected_prior {
            let current = state
                .accounts
                .get(&account.id)
                .ok_or_else(|| StoreError::NotFound(account.id.clone()))?;
            if current.balance != expected.balance || current.status != expected.status {
                return Err(StoreError::Conflict {
                    account_id: account.id.clone(),
                    expected: expected.balance,
                    status: expected.status,
                });
            }
        }

        state.accounts.insert(account.id.clone(), account.clone());
        Ok(())
    }

    async fn append_ledger_entry(&self, entry: &LedgerEntry) -> Result<(), StoreError> {
        self.state
            .write()
            .entries
            .entry(entry.account_id.clone())
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    async fn exists_processed_marker(&self, event_id: &str) -> Result<bool, StoreError> {
        Ok(self.state.read().markers.contains_key(event_id))
    }

    async fn insert_processed_marker_if_absent(&self, event_id: &str) -> Result<bool, StoreError> {
        let mut state = self.state.write();
        if state.markers.contains_key(event_id) {
            return Ok(false);
        }
        state.markers.insert(event_id.to_string(), Utc::now());
        Ok(true)
    }

    async fn accounts_by_client(&self, client_id: &str) -> Result<Vec<Account>, StoreError> {
        let mut accounts: Vec<Account> = self
            .state
            .read()
            .accounts
            .values()
            .filter(|a| a.client_id == client_id)
            .cloned()
            .collect();
        accounts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(accounts)
    }

    async fn entries_for_event(
        &self,
        source_event_id: &str,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let state = self.state.read();
        let mut entries: Vec<LedgerEntry> = state
            .entries
            .values()
            .flatten()
            .filter(|e| e.source_event_id == source_event_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.created_at);
        Ok(entries)
    }

    async fn ledger_entries(
        &self,
        account_id: &str,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        Ok(self
            .state
            .read()
            .entries
            .get(account_id)
            .map(|entries| entries.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn processed_marker_count(&self) -> Result<u64, StoreError> {
        Ok(self.state.read().markers.len() as u64)
    }
}
