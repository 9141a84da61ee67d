//! Messages exchanged with live clients

use crate::error::HubError;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Outbound hub message, serialised as one JSON object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub timestamp: String,
}

impl HubMessage {
    pub fn new(kind: impl Into<String>, topic: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            kind: kind.into(),
            topic: topic.into(),
            data,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true),
        }
    }

    /// An event published on `topic`
    pub fn event(topic: impl Into<String>, data: Value) -> Self {
        Self::new("event", topic, Some(data))
    }

    /// Greeting sent to each client right after it registers
    pub fn connected(client_id: &str) -> Self {
        Self::new(
            "connected",
            "",
            Some(json!({
                "client_id": client_id,
                "message": "Connected to EDA-Lab stream hub",
            })),
        )
    }

    /// Acknowledgment of a control frame (`subscribed`, `unsubscribed`, `pong`)
    pub fn ack(kind: &str, topic: &str) -> Self {
        Self::new(kind, topic, None)
    }

    pub fn to_json(&self) -> Result<String, HubError> {
        serde_json::to_string(self).map_err(|e| HubError::Serialize(e.to_string()))
    }
}

/// Control frame sent by a client: `{"action": "subscribe", "topic": "..."}`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientAction {
    pub action: String,
    #[serde(default)]
    pub topic: String,
}
