//! SQLite ledger store (sqlx)

use super::LedgerStore;
use crate::account::{Account, AccountStatus};
use crate::entry::{LedgerEntry, LedgerEntryKind};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use edalab_core::{Amount, Currency};
use edalab_events::AccountType;
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;

/// Ledger store backed by a SQLite database
pub struct SqliteLedgerStore {
    pool: SqlitePool,
}

impl SqliteLedgerStore {
    /// Open (or create) the database at `db_path` and initialise the schema
    pub async fn connect(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.as_ref().display());
        let pool = SqlitePool::connect(&db_url).await?;
        let store = Self::new(pool);
        store.init().await?;
        Ok(store)
    }

    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the schema
    pub async fn init(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                client_id TEXT NOT NULL,
                account_type TEXT NOT NULL,
                balance TEXT NOT NULL,
                currency TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_accounts_client ON accounts(client_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ledger_entries (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                account_id TEXT NOT NULL,
                source_event_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                amount TEXT NOT NULL,
                balance_after TEXT NOT NULL,
                currency TEXT NOT NULL,
                reference TEXT NOT NULL,
                description TEXT NOT NULL,
                counterparty_account_id TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_entries_account ON ledger_entries(account_id, seq)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_entries_event ON ledger_entries(source_event_id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS processed_events (
                event_id TEXT PRIMARY KEY,
                processed_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Balances are stored normalised so the conditional update compares like with like
fn amount_text(amount: &Amount) -> String {
    amount.value().normalize().to_string()
}

fn parse_column<T: FromStr>(row: &SqliteRow, column: &str) -> Result<T, StoreError>
where
    T::Err: std::fmt::Display,
{
    let raw: String = row.try_get(column)?;
    raw.parse()
        .map_err(|e: T::Err| StoreError::Corrupt(format!("{column}={raw:?}: {e}")))
}

fn parse_time(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>, StoreError> {
    let raw: String = row.try_get(column)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("{column}={raw:?}: {e}")))
}

fn account_from_row(row: &SqliteRow) -> Result<Account, StoreError> {
    Ok(Account {
        id: row.try_get("id")?,
        client_id: row.try_get("client_id")?,
        account_type: parse_column::<AccountType>(row, "account_type")?,
        balance: parse_column::<Amount>(row, "balance")?,
        currency: parse_column::<Currency>(row, "currency")?,
        status: parse_column::<AccountStatus>(row, "status")?,
        created_at: parse_time(row, "created_at")?,
        updated_at: parse_time(row, "updated_at")?,
    })
}

fn entry_from_row(row: &SqliteRow) -> Result<LedgerEntry, StoreError> {
    Ok(LedgerEntry {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        source_event_id: row.try_get("source_event_id")?,
        kind: parse_column::<LedgerEntryKind>(row, "kind")?,
        amount: parse_column::<Decimal>(row, "amount")?,
        balance_after: parse_column::<Amount>(row, "balance_after")?,
        currency: parse_column::<Currency>(row, "currency")?,
        reference: row.try_get("reference")?,
        description: row.try_get("description")?,
        counterparty_account_id: row.try_get("counterparty_account_id")?,
        created_at: parse_time(row, "created_at")?,
    })
}

#[async_trait]
impl LedgerStore for SqliteLedgerStore {
    async fn get_account(&self, id: &str) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query("SELECT * FROM accounts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn upsert_account(
        &self,
        account: &Account,
        expected_prior: Option<&Account>,
    ) -> Result<(), StoreError> {
        let Some(expected) = expected_prior else {
            sqlx::query(
                r#"
                INSERT INTO accounts (id, client_id, account_type, balance, currency, status, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    client_id = excluded.client_id,
                    account_type = excluded.account_type,
                    balance = excluded.balance,
                    currency = excluded.currency,
                    status = excluded.status,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&account.id)
            .bind(&account.client_id)
            .bind(account.account_type.to_string())
            .bind(amount_text(&account.balance))
            .bind(account.currency.code())
            .bind(account.status.to_string())
            .bind(account.created_at.to_rfc3339())
            .bind(account.updated_at.to_rfc3339())
            .execute(&self.pool)
            .await?;
            return Ok(());
        };

        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET balance = ?, status = ?, updated_at = ?
            WHERE id = ? AND balance = ? AND status = ?
            "#,
        )
        .bind(amount_text(&account.balance))
        .bind(account.status.to_string())
        .bind(account.updated_at.to_rfc3339())
        .bind(&account.id)
        .bind(amount_text(&expected.balance))
        .bind(expected.status.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        match self.get_account(&account.id).await? {
            Some(_) => Err(StoreError::Conflict {
                account_id: account.id.clone(),
                expected: expected.balance,
                status: expected.status,
            }),
            None => Err(StoreError::NotFound(account.id.clone())),
        }
    }

    async fn append_ledger_entry(&self, entry: &LedgerEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO ledger_entries (id, account_id, source_event_id, kind, amount, balance_after,
                                        currency, reference, description, counterparty_account_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.account_id)
        .bind(&entry.source_event_id)
        .bind(entry.kind.to_string())
        .bind(entry.amount.to_string())
        .bind(amount_text(&entry.balance_after))
        .bind(entry.currency.code())
        .bind(&entry.reference)
        .bind(&entry.description)
        .bind(entry.counterparty_account_id.as_deref())
        .bind(entry.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn exists_processed_marker(&self, event_id: &str) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM processed_events WHERE event_id = ?")
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn insert_processed_marker_if_absent(&self, event_id: &str) -> Result<bool, StoreError> {
        let result =
            sqlx::query("INSERT OR IGNORE INTO processed_events (event_id, processed_at) VALUES (?, ?)")
                .bind(event_id)
                .bind(Utc::now().to_rfc3339())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn accounts_by_client(&self, client_id: &str) -> Result<Vec<Account>, StoreError> {
        let rows = sqlx::query("SELECT * FROM accounts WHERE client_id = ? ORDER BY created_at, id")
            .bind(client_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(account_from_row).collect()
    }

    async fn entries_for_event(
        &self,
        source_event_id: &str,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let rows = sqlx::query("SELECT * FROM ledger_entries WHERE source_event_id = ? ORDER BY seq")
            .bind(source_event_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(entry_from_row).collect()
    }

    async fn ledger_entries(
        &self,
        account_id: &str,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM ledger_entries WHERE account_id = ? ORDER BY seq DESC LIMIT ?",
        )
        .bind(account_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(entry_from_row).collect()
    }

    async fn processed_marker_count(&self) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM processed_events")
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.try_get("n")?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn store() -> (TempDir, SqliteLedgerStore) {
        let dir = TempDir::new().unwrap();
        let store = SqliteLedgerStore::connect(dir.path().join("ledger.db"))
            .await
            .unwrap();
        (dir, store)
    }

    fn account(balance: &str) -> Account {
        Account::open(
            "ACC-1",
            "CLI-1",
            AccountType::Joint,
            balance.parse().unwrap(),
            Currency::Chf,
        )
    }

    #[tokio::test]
    async fn test_account_round_trip() {
        let (_dir, store) = store().await;
        let acc = account("1000.50");
        store.upsert_account(&acc, None).await.unwrap();

        let loaded = store.get_account("ACC-1").await.unwrap().unwrap();
        assert_eq!(loaded.balance, acc.balance);
        assert_eq!(loaded.currency, Currency::Chf);
        assert_eq!(loaded.account_type, AccountType::Joint);
        assert_eq!(loaded.status, AccountStatus::Active);
        assert!(store.get_account("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_conditional_update_ignores_scale() {
        let (_dir, store) = store().await;
        let acc = account("1000.00");
        store.upsert_account(&acc, None).await.unwrap();

        // 1000 and 1000.00 are the same balance
        let mut prior = acc.clone();
        prior.balance = "1000".parse().unwrap();
        let credited = acc.credited(&"1".parse().unwrap()).unwrap();
        store.upsert_account(&credited, Some(&prior)).await.unwrap();

        let stale = acc.credited(&"5".parse().unwrap()).unwrap();
        let err = store
            .upsert_account(&stale, Some(&acc))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
        let loaded = store.get_account("ACC-1").await.unwrap().unwrap();
        assert_eq!(loaded.balance, "1001".parse().unwrap());
    }

    #[tokio::test]
    async fn test_entries_and_markers() {
        let (_dir, store) = store().await;
        for i in 1..=3u64 {
            let entry = LedgerEntry::new(
                LedgerEntryKind::Debit,
                "ACC-1",
                format!("e{i}"),
                &Amount::from_units(i),
                Amount::from_units(100 - i),
                Currency::Eur,
            )
            .with_counterparty("ACC-2");
            store.append_ledger_entry(&entry).await.unwrap();
        }

        let entries = store.ledger_entries("ACC-1", 50).await.unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].source_event_id, "e3");
        assert_eq!(entries[0].amount, Decimal::from(-3));
        assert_eq!(entries[0].counterparty_account_id.as_deref(), Some("ACC-2"));

        let for_event = store.entries_for_event("e2").await.unwrap();
        assert_eq!(for_event.len(), 1);
        assert_eq!(for_event[0].amount, Decimal::from(-2));

        assert!(store.insert_processed_marker_if_absent("e1").await.unwrap());
        assert!(!store.insert_processed_marker_if_absent("e1").await.unwrap());
        assert!(store.exists_processed_marker("e1").await.unwrap());
        assert_eq!(store.processed_marker_count().await.unwrap(), 1);
    }
}
