//! Ledger engine - applies banking events to accounts
//!
//! Flow per event: Idempotency check -> Apply effects -> Mark processed
//!
//! Domain rejections (insufficient funds, unknown or inactive account,
//! illegal status change) are final: the event is marked processed and the
//! error returned. Store failures and balance conflicts leave the event
//! unmarked so a redelivery applies it again.

use crate::account::{Account, AccountStatus};
use crate::entry::{LedgerEntry, LedgerEntryKind};
use crate::error::{LedgerError, StoreError};
use crate::guard::IdempotencyGuard;
use crate::store::LedgerStore;
use edalab_core::{Amount, Currency};
use edalab_events::{AccountClosed, AccountOpened, Deposited, Event, TransferInitiated, Withdrawn};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default page size of [`LedgerEngine::transactions`]
pub const DEFAULT_TRANSACTION_LIMIT: usize = 50;

/// What applying an event did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Effects written and event marked
    Applied,
    /// The event id was already marked; nothing touched
    AlreadyProcessed,
    /// The desired end state already held (account already open or closed)
    Unchanged,
    /// Transfer debited the source but the destination is not held here, so
    /// no credit leg was written
    CreditLegSkipped { dest_account_id: String },
}

/// One side of a balance movement
struct Movement<'a> {
    account_id: &'a str,
    event_id: &'a str,
    amount: &'a Amount,
    reference: &'a str,
    description: String,
    counterparty: Option<&'a str>,
}

pub struct LedgerEngine {
    store: Arc<dyn LedgerStore>,
    guard: IdempotencyGuard,
}

impl LedgerEngine {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        let guard = IdempotencyGuard::new(Arc::clone(&store));
        Self { store, guard }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Apply one event exactly once per event id
    pub async fn apply(&self, event: &Event) -> Result<ApplyOutcome, LedgerError> {
        let event_id = event.event_id();
        if self.guard.already_processed(event_id).await? {
            debug!(event_id, kind = %event.kind(), "event already processed");
            return Ok(ApplyOutcome::AlreadyProcessed);
        }

        let result = match event {
            Event::AccountOpened(e) => self.apply_open(e).await,
            Event::AccountClosed(e) => self.apply_close(e).await,
            Event::Deposited(e) => self.apply_deposit(e).await,
            Event::Withdrawn(e) => self.apply_withdrawal(e).await,
            Event::TransferInitiated(e) => self.apply_transfer(e).await,
        };

        match result {
            Ok(outcome) => {
                self.guard.mark_processed(event_id).await?;
                Ok(outcome)
            }
            Err(err) if err.is_domain() => {
                warn!(event_id, kind = %event.kind(), error = %err, "event rejected");
                self.guard.mark_processed(event_id).await?;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    async fn apply_open(&self, event: &AccountOpened) -> Result<ApplyOutcome, LedgerError> {
        match self
            .open_account(
                &event.event_id,
                &event.account_id,
                &event.client_id,
                event.account_type,
                event.initial_balance,
                event.currency.clone(),
            )
            .await
        {
            Ok(_) => Ok(ApplyOutcome::Applied),
            Err(LedgerError::DuplicateAccount(id)) => {
                warn!(account_id = %id, "account already exists");
                Ok(ApplyOutcome::Unchanged)
            }
            Err(err) => Err(err),
        }
    }

    /// Create an account, with an OPEN entry when it starts funded
    async fn open_account(
        &self,
        event_id: &str,
        account_id: &str,
        client_id: &str,
        account_type: edalab_events::AccountType,
        initial_balance: Amount,
        currency: Currency,
    ) -> Result<Account, LedgerError> {
        if self.store.get_account(account_id).await?.is_some() {
            return Err(LedgerError::DuplicateAccount(account_id.to_string()));
        }

        let account = Account::open(account_id, client_id, account_type, initial_balance, currency);
        self.store.upsert_account(&account, None).await?;

        if initial_balance.is_positive() {
            let entry = LedgerEntry::new(
                LedgerEntryKind::Open,
                account_id,
                event_id,
                &initial_balance,
                initial_balance,
                account.currency.clone(),
            )
            .with_description("Account opening");
            self.store.append_ledger_entry(&entry).await?;
        }

        info!(
            event_id,
            account_id,
            client_id,
            initial_balance = %initial_balance,
            "account opened"
        );
        Ok(account)
    }

    async fn apply_close(&self, event: &AccountClosed) -> Result<ApplyOutcome, LedgerError> {
        let account = self.load(&event.account_id).await?;
        if account.status == AccountStatus::Closed {
            return Ok(ApplyOutcome::Unchanged);
        }
        self.set_status(&account, AccountStatus::Closed).await?;
        info!(event_id = %event.event_id, account_id = %event.account_id, reason = %event.reason, "account closed");
        Ok(ApplyOutcome::Applied)
    }

    async fn apply_deposit(&self, event: &Deposited) -> Result<ApplyOutcome, LedgerError> {
        if self
            .leg_written(&event.event_id, LedgerEntryKind::Credit, &event.account_id)
            .await?
        {
            debug!(event_id = %event.event_id, "deposit already written, marking only");
            return Ok(ApplyOutcome::Applied);
        }
        let account = self
            .credit(Movement {
                account_id: &event.account_id,
                event_id: &event.event_id,
                amount: &event.amount,
                reference: &event.reference,
                description: format!("Deposit {}", event.channel),
                counterparty: None,
            })
            .await?;
        info!(event_id = %event.event_id, account_id = %account.id, amount = %event.amount, new_balance = %account.balance, "deposit processed");
        Ok(ApplyOutcome::Applied)
    }

    async fn apply_withdrawal(&self, event: &Withdrawn) -> Result<ApplyOutcome, LedgerError> {
        if self
            .leg_written(&event.event_id, LedgerEntryKind::Debit, &event.account_id)
            .await?
        {
            debug!(event_id = %event.event_id, "withdrawal already written, marking only");
            return Ok(ApplyOutcome::Applied);
        }
        let account = self
            .debit(Movement {
                account_id: &event.account_id,
                event_id: &event.event_id,
                amount: &event.amount,
                reference: &event.reference,
                description: format!("Withdrawal {}", event.channel),
                counterparty: None,
            })
            .await?;
        info!(event_id = %event.event_id, account_id = %account.id, amount = %event.amount, new_balance = %account.balance, "withdrawal processed");
        Ok(ApplyOutcome::Applied)
    }

    /// Debit then credit. A redelivery after a failure between the two legs
    /// resumes at the first leg that has no entry for this event.
    async fn apply_transfer(&self, event: &TransferInitiated) -> Result<ApplyOutcome, LedgerError> {
        let source = &event.source_account_id;
        let dest = &event.dest_account_id;

        let written = self.store.entries_for_event(&event.event_id).await?;
        let has_leg = |kind: LedgerEntryKind, account_id: &str| {
            written
                .iter()
                .any(|e| e.kind == kind && e.account_id == account_id)
        };

        if has_leg(LedgerEntryKind::Credit, dest) {
            debug!(event_id = %event.event_id, "transfer already written, marking only");
            return Ok(ApplyOutcome::Applied);
        }

        if has_leg(LedgerEntryKind::Debit, source) {
            info!(event_id = %event.event_id, source = %source, "debit leg already written, resuming at credit");
        } else {
            // A local destination must be able to take the credit before
            // the source is touched
            if let Some(dest_account) = self.store.get_account(dest).await? {
                dest_account.credited(&event.amount)?;
            }

            // A rejected debit leaves the whole transfer a no-op
            self.debit(Movement {
                account_id: source,
                event_id: &event.event_id,
                amount: &event.amount,
                reference: &event.reference,
                description: format!("Transfer to {}: {}", dest, event.reason),
                counterparty: Some(dest),
            })
            .await?;
        }

        // TODO: a debit whose destination lives in another service has no
        // compensating credit; needs an outbox or saga across services
        let credited = self
            .credit(Movement {
                account_id: dest,
                event_id: &event.event_id,
                amount: &event.amount,
                reference: &event.reference,
                description: format!("Transfer from {}: {}", source, event.reason),
                counterparty: Some(source),
            })
            .await;

        match credited {
            Ok(_) => {
                info!(event_id = %event.event_id, source = %source, dest = %dest, amount = %event.amount, "transfer processed");
                Ok(ApplyOutcome::Applied)
            }
            Err(LedgerError::AccountNotFound(_)) => {
                warn!(
                    event_id = %event.event_id,
                    dest = %dest,
                    "destination not held locally, credit leg skipped"
                );
                Ok(ApplyOutcome::CreditLegSkipped {
                    dest_account_id: dest.clone(),
                })
            }
            Err(err) => Err(err),
        }
    }

    async fn leg_written(
        &self,
        event_id: &str,
        kind: LedgerEntryKind,
        account_id: &str,
    ) -> Result<bool, LedgerError> {
        Ok(self
            .store
            .entries_for_event(event_id)
            .await?
            .iter()
            .any(|e| e.kind == kind && e.account_id == account_id))
    }

    async fn credit(&self, movement: Movement<'_>) -> Result<Account, LedgerError> {
        let account = self.load(movement.account_id).await?;
        let updated = account.credited(movement.amount)?;
        self.write_movement(&account, &updated, LedgerEntryKind::Credit, movement)
            .await?;
        Ok(updated)
    }

    async fn debit(&self, movement: Movement<'_>) -> Result<Account, LedgerError> {
        let account = self.load(movement.account_id).await?;
        let updated = account.debited(movement.amount)?;
        self.write_movement(&account, &updated, LedgerEntryKind::Debit, movement)
            .await?;
        Ok(updated)
    }

    /// Conditional balance write, then the entry
    async fn write_movement(
        &self,
        before: &Account,
        after: &Account,
        kind: LedgerEntryKind,
        movement: Movement<'_>,
    ) -> Result<(), LedgerError> {
        self.store
            .upsert_account(after, Some(before))
            .await
            .map_err(|err| match err {
                StoreError::Conflict { account_id, .. } => LedgerError::BalanceConflict(account_id),
                StoreError::NotFound(id) => LedgerError::AccountNotFound(id),
                other => LedgerError::Store(other),
            })?;

        let mut entry = LedgerEntry::new(
            kind,
            movement.account_id,
            movement.event_id,
            movement.amount,
            after.balance,
            after.currency.clone(),
        )
        .with_reference(movement.reference)
        .with_description(movement.description);
        if let Some(counterparty) = movement.counterparty {
            entry = entry.with_counterparty(counterparty);
        }
        self.store.append_ledger_entry(&entry).await?;
        Ok(())
    }

    async fn load(&self, account_id: &str) -> Result<Account, LedgerError> {
        self.store
            .get_account(account_id)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(account_id.to_string()))
    }

    async fn set_status(&self, account: &Account, status: AccountStatus) -> Result<Account, LedgerError> {
        let updated = account.transitioned(status)?;
        self.store
            .upsert_account(&updated, Some(account))
            .await
            .map_err(|err| match err {
                StoreError::Conflict { account_id, .. } => LedgerError::BalanceConflict(account_id),
                other => LedgerError::Store(other),
            })?;
        info!(account_id = %account.id, from = %account.status, to = %status, "account status changed");
        Ok(updated)
    }

    // === Status operations ===

    /// ACTIVE -> BLOCKED
    pub async fn block(&self, account_id: &str) -> Result<Account, LedgerError> {
        let account = self.load(account_id).await?;
        self.set_status(&account, AccountStatus::Blocked).await
    }

    /// BLOCKED -> ACTIVE
    pub async fn unblock(&self, account_id: &str) -> Result<Account, LedgerError> {
        let account = self.load(account_id).await?;
        self.set_status(&account, AccountStatus::Active).await
    }

    /// ACTIVE -> CLOSED; closing a closed account changes nothing
    pub async fn close(&self, account_id: &str) -> Result<Account, LedgerError> {
        let account = self.load(account_id).await?;
        if account.status == AccountStatus::Closed {
            return Ok(account);
        }
        self.set_status(&account, AccountStatus::Closed).await
    }

    // === Queries ===

    pub async fn account(&self, account_id: &str) -> Result<Account, LedgerError> {
        self.load(account_id).await
    }

    pub async fn accounts_by_client(&self, client_id: &str) -> Result<Vec<Account>, LedgerError> {
        Ok(self.store.accounts_by_client(client_id).await?)
    }

    /// Newest entries first, [`DEFAULT_TRANSACTION_LIMIT`] when `limit` is `None`
    pub async fn transactions(
        &self,
        account_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        let limit = limit.unwrap_or(DEFAULT_TRANSACTION_LIMIT);
        Ok(self.store.ledger_entries(account_id, limit).await?)
    }

    pub async fn processed_events(&self) -> Result<u64, LedgerError> {
        Ok(self.store.processed_marker_count().await?)
    }
}
