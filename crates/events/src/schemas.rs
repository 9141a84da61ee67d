//! Bundled record schemas, one per event kind
//!
//! These are the definitions registered under `{topic}-value` at startup.
//! They are JSON record schemas understood by `edalab-codec`.

use crate::event::EventKind;
use crate::types::{AccountType, Channel, TransferStatus};
use serde_json::{json, Value};
use strum::IntoEnumIterator;

pub const RECORD_NAMESPACE: &str = "edalab.banking";

fn symbols<T: IntoEnumIterator + ToString>() -> Vec<String> {
    T::iter().map(|v| v.to_string()).collect()
}

fn field(name: &str, ty: Value) -> Value {
    json!({ "name": name, "type": ty })
}

fn decimal() -> Value {
    json!({ "type": "string", "logicalType": "decimal" })
}

fn timestamp() -> Value {
    json!({ "type": "string", "logicalType": "timestamp" })
}

fn enumeration(name: &str, symbols: Vec<String>) -> Value {
    json!({ "type": "enum", "name": name, "symbols": symbols })
}

fn optional_metadata() -> Value {
    field("metadata", json!(["null", { "type": "map", "values": "string" }]))
}

fn record(kind: EventKind, mut fields: Vec<Value>) -> Value {
    let mut all = vec![
        field("event_id", json!("string")),
        field("timestamp", timestamp()),
    ];
    all.append(&mut fields);
    all.push(optional_metadata());

    json!({
        "type": "record",
        "name": kind.record_name(),
        "namespace": RECORD_NAMESPACE,
        "fields": all,
    })
}

/// Raw schema definition for an event kind
pub fn schema_definition(kind: EventKind) -> String {
    let schema = match kind {
        EventKind::AccountOpened => record(
            kind,
            vec![
                field("account_id", json!("string")),
                field("client_id", json!("string")),
                field(
                    "account_type",
                    enumeration("AccountType", symbols::<AccountType>()),
                ),
                field("currency", json!("string")),
                field("initial_balance", decimal()),
            ],
        ),
        EventKind::AccountClosed => record(
            kind,
            vec![
                field("account_id", json!("string")),
                field("client_id", json!("string")),
                field("final_balance", decimal()),
                field("reason", json!("string")),
            ],
        ),
        EventKind::Deposited | EventKind::Withdrawn => record(
            kind,
            vec![
                field("account_id", json!("string")),
                field("amount", decimal()),
                field("currency", json!("string")),
                field("reference", json!("string")),
                field("channel", enumeration("Channel", symbols::<Channel>())),
            ],
        ),
        EventKind::TransferInitiated => record(
            kind,
            vec![
                field("source_account_id", json!("string")),
                field("dest_account_id", json!("string")),
                field("amount", decimal()),
                field("currency", json!("string")),
                field("reason", json!("string")),
                field("reference", json!("string")),
                field(
                    "status",
                    enumeration("TransferStatus", symbols::<TransferStatus>()),
                ),
            ],
        ),
    };

    schema.to_string()
}
