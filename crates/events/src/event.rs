//! Banking events
//!
//! Payload structs are plain data: produced once by a generator (or any
//! other producer) and never mutated afterwards.

use crate::error::EventError;
use crate::topics;
use crate::types::{AccountType, Channel, TransferStatus};
use chrono::{DateTime, Utc};
use edalab_core::{Amount, Currency};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use strum::{Display, EnumIter, EnumString};
use uuid::Uuid;

/// Free-form key/value annotations attached by producers
pub type Metadata = BTreeMap<String, String>;

fn new_event_id() -> String {
    Uuid::new_v4().to_string()
}

/// A bank account was opened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountOpened {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub account_id: String,
    pub client_id: String,
    pub account_type: AccountType,
    pub currency: Currency,
    pub initial_balance: Amount,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: Metadata,
}

impl AccountOpened {
    pub fn new(
        account_id: impl Into<String>,
        client_id: impl Into<String>,
        account_type: AccountType,
        initial_balance: Amount,
    ) -> Self {
        Self {
            event_id: new_event_id(),
            timestamp: Utc::now(),
            account_id: account_id.into(),
            client_id: client_id.into(),
            account_type,
            currency: Currency::default(),
            initial_balance,
            metadata: Metadata::new(),
        }
    }

    pub fn with_currency(mut self, currency: Currency) -> Self {
        self.currency = currency;
        self
    }
}

/// A bank account was closed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountClosed {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub account_id: String,
    pub client_id: String,
    pub final_balance: Amount,
    pub reason: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: Metadata,
}

impl AccountClosed {
    pub fn new(
        account_id: impl Into<String>,
        client_id: impl Into<String>,
        final_balance: Amount,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            event_id: new_event_id(),
            timestamp: Utc::now(),
            account_id: account_id.into(),
            client_id: client_id.into(),
            final_balance,
            reason: reason.into(),
            metadata: Metadata::new(),
        }
    }
}

/// Money was paid into an account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deposited {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub account_id: String,
    pub amount: Amount,
    pub currency: Currency,
    pub reference: String,
    pub channel: Channel,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: Metadata,
}

impl Deposited {
    pub fn new(
        account_id: impl Into<String>,
        amount: Amount,
        channel: Channel,
        reference: impl Into<String>,
    ) -> Self {
        Self {
            event_id: new_event_id(),
            timestamp: Utc::now(),
            account_id: account_id.into(),
            amount,
            currency: Currency::default(),
            reference: reference.into(),
            channel,
            metadata: Metadata::new(),
        }
    }
}

/// Money was taken out of an account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Withdrawn {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub account_id: String,
    pub amount: Amount,
    pub currency: Currency,
    pub reference: String,
    pub channel: Channel,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: Metadata,
}

impl Withdrawn {
    pub fn new(
        account_id: impl Into<String>,
        amount: Amount,
        channel: Channel,
        reference: impl Into<String>,
    ) -> Self {
        Self {
            event_id: new_event_id(),
            timestamp: Utc::now(),
            account_id: account_id.into(),
            amount,
            currency: Currency::default(),
            reference: reference.into(),
            channel,
            metadata: Metadata::new(),
        }
    }
}

/// A transfer between two accounts was issued by the source bank
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferInitiated {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub source_account_id: String,
    pub dest_account_id: String,
    pub amount: Amount,
    pub currency: Currency,
    pub reason: String,
    pub reference: String,
    #[serde(default)]
    pub status: TransferStatus,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: Metadata,
}

impl TransferInitiated {
    pub fn new(
        source_account_id: impl Into<String>,
        dest_account_id: impl Into<String>,
        amount: Amount,
        reason: impl Into<String>,
        reference: impl Into<String>,
    ) -> Self {
        Self {
            event_id: new_event_id(),
            timestamp: Utc::now(),
            source_account_id: source_account_id.into(),
            dest_account_id: dest_account_id.into(),
            amount,
            currency: Currency::default(),
            reason: reason.into(),
            reference: reference.into(),
            status: TransferStatus::Initiated,
            metadata: Metadata::new(),
        }
    }
}

/// Discriminant of [`Event`], also the schema record name
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, Serialize, Deserialize,
)]
pub enum EventKind {
    AccountOpened,
    AccountClosed,
    Deposited,
    Withdrawn,
    TransferInitiated,
}

impl EventKind {
    pub fn topic(&self) -> &'static str {
        match self {
            EventKind::AccountOpened => topics::ACCOUNT_OPENED,
            EventKind::AccountClosed => topics::ACCOUNT_CLOSED,
            EventKind::Deposited => topics::DEPOSIT_COMPLETED,
            EventKind::Withdrawn => topics::WITHDRAWAL_COMPLETED,
            EventKind::TransferInitiated => topics::TRANSFER_INITIATED,
        }
    }

    /// Schema registry subject of the kind's topic
    pub fn subject(&self) -> String {
        topics::value_subject(self.topic())
    }

    /// Record name used in the kind's schema
    pub fn record_name(&self) -> &'static str {
        match self {
            EventKind::AccountOpened => "AccountOpened",
            EventKind::AccountClosed => "AccountClosed",
            EventKind::Deposited => "Deposited",
            EventKind::Withdrawn => "Withdrawn",
            EventKind::TransferInitiated => "TransferInitiated",
        }
    }

    pub fn from_record_name(name: &str) -> Result<Self, EventError> {
        // Fully qualified names carry the namespace
        let short = name.rsplit('.').next().unwrap_or(name);
        EventKind::from_str(short).map_err(|_| EventError::UnknownEventType(name.to_string()))
    }

    pub fn from_topic(topic: &str) -> Result<Self, EventError> {
        match topic {
            topics::ACCOUNT_OPENED => Ok(EventKind::AccountOpened),
            topics::ACCOUNT_CLOSED => Ok(EventKind::AccountClosed),
            topics::DEPOSIT_COMPLETED => Ok(EventKind::Deposited),
            topics::WITHDRAWAL_COMPLETED => Ok(EventKind::Withdrawn),
            topics::TRANSFER_INITIATED => Ok(EventKind::TransferInitiated),
            other => Err(EventError::UnknownTopic(other.to_string())),
        }
    }
}

/// Closed set of banking events.
///
/// Resolved once at decode time; downstream code matches exhaustively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", content = "payload")]
pub enum Event {
    AccountOpened(AccountOpened),
    AccountClosed(AccountClosed),
    Deposited(Deposited),
    Withdrawn(Withdrawn),
    TransferInitiated(TransferInitiated),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::AccountOpened(_) => EventKind::AccountOpened,
            Event::AccountClosed(_) => EventKind::AccountClosed,
            Event::Deposited(_) => EventKind::Deposited,
            Event::Withdrawn(_) => EventKind::Withdrawn,
            Event::TransferInitiated(_) => EventKind::TransferInitiated,
        }
    }

    pub fn event_id(&self) -> &str {
        match self {
            Event::AccountOpened(e) => &e.event_id,
            Event::AccountClosed(e) => &e.event_id,
            Event::Deposited(e) => &e.event_id,
            Event::Withdrawn(e) => &e.event_id,
            Event::TransferInitiated(e) => &e.event_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Event::AccountOpened(e) => e.timestamp,
            Event::AccountClosed(e) => e.timestamp,
            Event::Deposited(e) => e.timestamp,
            Event::Withdrawn(e) => e.timestamp,
            Event::TransferInitiated(e) => e.timestamp,
        }
    }

    pub fn topic(&self) -> &'static str {
        self.kind().topic()
    }

    /// Partition key: the affected account, or the source account of a transfer
    pub fn partition_key(&self) -> &str {
        match self {
            Event::AccountOpened(e) => &e.account_id,
            Event::AccountClosed(e) => &e.account_id,
            Event::Deposited(e) => &e.account_id,
            Event::Withdrawn(e) => &e.account_id,
            Event::TransferInitiated(e) => &e.source_account_id,
        }
    }

    /// The payload alone, without the variant tag
    pub fn payload_json(&self) -> Result<serde_json::Value, EventError> {
        let value = match self {
            Event::AccountOpened(e) => serde_json::to_value(e),
            Event::AccountClosed(e) => serde_json::to_value(e),
            Event::Deposited(e) => serde_json::to_value(e),
            Event::Withdrawn(e) => serde_json::to_value(e),
            Event::TransferInitiated(e) => serde_json::to_value(e),
        };
        value.map_err(|e| EventError::InvalidPayload(e.to_string()))
    }

    /// Rebuild an event from a bare payload of a known kind
    pub fn from_payload(kind: EventKind, payload: serde_json::Value) -> Result<Self, EventError> {
        let invalid = |e: serde_json::Error| EventError::InvalidPayload(e.to_string());
        Ok(match kind {
            EventKind::AccountOpened => {
                Event::AccountOpened(serde_json::from_value(payload).map_err(invalid)?)
            }
            EventKind::AccountClosed => {
                Event::AccountClosed(serde_json::from_value(payload).map_err(invalid)?)
            }
            EventKind::Deposited => {
                Event::Deposited(serde_json::from_value(payload).map_err(invalid)?)
            }
            EventKind::Withdrawn => {
                Event::Withdrawn(serde_json::from_value(payload).map_err(invalid)?)
            }
            EventKind::TransferInitiated => {
                Event::TransferInitiated(serde_json::from_value(payload).map_err(invalid)?)
            }
        })
    }
}

impl From<AccountOpened> for Event {
    fn from(e: AccountOpened) -> Self {
        Event::AccountOpened(e)
    }
}

impl From<AccountClosed> for Event {
    fn from(e: AccountClosed) -> Self {
        Event::AccountClosed(e)
    }
}

impl From<Deposited> for Event {
    fn from(e: Deposited) -> Self {
        Event::Deposited(e)
    }
}

impl From<Withdrawn> for Event {
    fn from(e: Withdrawn) -> Self {
        Event::Withdrawn(e)
    }
}

impl From<TransferInitiated> for Event {
    fn from(e: TransferInitiated) -> Self {
        Event::TransferInitiated(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    fn opened() -> AccountOpened {
        AccountOpened::new("ACC-1", "CLI-1", AccountType::Checking, Amount::from_units(1000))
    }

    #[test]
    fn test_new_event_defaults() {
        let event = opened();
        assert_eq!(event.currency, Currency::Eur);
        assert!(Uuid::parse_str(&event.event_id).is_ok());
        assert!(event.metadata.is_empty());
    }

    #[test]
    fn test_event_ids_are_unique() {
        assert_ne!(opened().event_id, opened().event_id);
    }

    #[test]
    fn test_kind_topic_mapping_is_bijective() {
        for kind in EventKind::iter() {
            assert_eq!(EventKind::from_topic(kind.topic()).unwrap(), kind);
            assert_eq!(EventKind::from_record_name(kind.record_name()).unwrap(), kind);
        }
        assert!(EventKind::from_topic(topics::DEAD_LETTER).is_err());
    }

    #[test]
    fn test_record_name_with_namespace() {
        let kind = EventKind::from_record_name("edalab.banking.Deposited").unwrap();
        assert_eq!(kind, EventKind::Deposited);
        assert!(matches!(
            EventKind::from_record_name("Refunded"),
            Err(EventError::UnknownEventType(_))
        ));
    }

    #[test]
    fn test_transfer_partition_key_is_source() {
        let event: Event =
            TransferInitiated::new("SRC", "DST", Amount::from_units(10), "rent", "REF-1").into();
        assert_eq!(event.partition_key(), "SRC");
        assert_eq!(event.topic(), topics::TRANSFER_INITIATED);
    }

    #[test]
    fn test_payload_json_omits_empty_metadata() {
        let event: Event = opened().into();
        let payload = event.payload_json().unwrap();
        assert!(payload.get("metadata").is_none());
        assert_eq!(payload["account_type"], "COURANT");
        assert_eq!(payload["initial_balance"], "1000");
    }

    #[test]
    fn test_from_payload_restores_variant() {
        let event: Event =
            Deposited::new("ACC-1", Amount::from_units(500), Channel::Wire, "REF-2").into();
        let payload = event.payload_json().unwrap();
        let restored = Event::from_payload(EventKind::Deposited, payload).unwrap();
        assert_eq!(restored, event);
    }

    #[test]
    fn test_from_payload_wrong_kind_fails() {
        let event: Event =
            Deposited::new("ACC-1", Amount::from_units(500), Channel::Wire, "REF-2").into();
        let payload = event.payload_json().unwrap();
        let result = Event::from_payload(EventKind::TransferInitiated, payload);
        assert!(matches!(result, Err(EventError::InvalidPayload(_))));
    }
}
