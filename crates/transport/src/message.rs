//! Records exchanged with the broker

use chrono::{DateTime, Utc};
use edalab_events::Event;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Message headers (string key/value pairs)
pub type Headers = BTreeMap<String, String>;

/// Header carrying the event kind of a published message
pub const EVENT_TYPE_HEADER: &str = "event_type";

/// A message handed to the broker for delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRecord {
    pub topic: String,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub headers: Headers,
}

/// Broker acknowledgment of a delivered message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReport {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    pub timestamp: DateTime<Utc>,
}

/// A raw message read back from the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerRecord {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub headers: Headers,
    pub timestamp: DateTime<Utc>,
}

/// A decoded event together with where it came from
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumedEvent {
    pub event: Event,
    pub schema_id: u32,
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    pub key: Option<String>,
    pub headers: Headers,
    pub timestamp: DateTime<Utc>,
}
