//! Transport errors

use edalab_codec::CodecError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Delivery to '{topic}' not acknowledged within {timeout_ms} ms")]
    DeliveryTimeout { topic: String, timeout_ms: u64 },

    #[error("Delivery to '{topic}' failed: {reason}")]
    DeliveryFailed { topic: String, reason: String },

    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(String),

    #[error("Consumer has no subscription")]
    NotSubscribed,

    #[error("Commit failed: {0}")]
    CommitFailed(String),

    #[error("Client closed")]
    Closed,

    #[error("Operation cancelled")]
    Cancelled,
}

impl TransportError {
    /// Whether the caller may reasonably try the same operation again
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::DeliveryTimeout { .. } | TransportError::BrokerUnavailable(_) => true,
            TransportError::Codec(codec) => codec.is_transient(),
            _ => false,
        }
    }
}
