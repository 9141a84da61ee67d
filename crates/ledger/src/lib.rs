//! EDA-Lab Ledger - account aggregates driven by banking events
//!
//! Every balance change goes through [`LedgerEngine`], which brackets each
//! event with the [`IdempotencyGuard`]: check the marker, apply the effects,
//! then write the marker. A redelivered event is recognised before anything
//! is mutated.
//!
//! # Key Types
//! - `Account`: balance, status and ownership of one account
//! - `LedgerEntry`: append-only record of one effect on one account
//! - `LedgerStore`: persistence port (in-memory and SQLite adapters)

pub mod account;
pub mod engine;
pub mod entry;
pub mod error;
pub mod guard;
pub mod handler;
pub mod store;

pub use account::{Account, AccountStatus};
pub use engine::{ApplyOutcome, LedgerEngine, DEFAULT_TRANSACTION_LIMIT};
pub use entry::{LedgerEntry, LedgerEntryKind};
pub use error::{LedgerError, StoreError};
pub use guard::IdempotencyGuard;
pub use handler::LedgerEventHandler;
pub use store::{InMemoryLedgerStore, LedgerStore, SqliteLedgerStore};
