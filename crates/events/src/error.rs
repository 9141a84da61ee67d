//! Event model errors

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    #[error("Invalid event payload: {0}")]
    InvalidPayload(String),
}
