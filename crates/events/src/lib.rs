//! EDA-Lab Events - the banking event model
//!
//! Every message that travels through the transport is one variant of the
//! closed [`Event`] union. Each variant maps to one topic, one schema
//! subject (`{topic}-value`) and one bundled record schema.

pub mod error;
pub mod event;
pub mod schemas;
pub mod topics;
pub mod types;

pub use error::EventError;
pub use event::{
    AccountClosed, AccountOpened, Deposited, Event, EventKind, TransferInitiated, Withdrawn,
};
pub use schemas::{schema_definition, RECORD_NAMESPACE};
pub use topics::{banking_topics, value_subject};
pub use types::{AccountType, Channel, TransferStatus};
