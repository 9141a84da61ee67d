//! Codec and registry errors

use thiserror::Error;

/// Failures talking to the schema registry
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Schema {0} not found")]
    IdNotFound(u32),

    #[error("Subject '{0}' not found")]
    SubjectNotFound(String),

    #[error("Registry request failed: {0}")]
    Request(String),

    #[error("Registry returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed registry response: {0}")]
    Response(String),
}

/// Errors raised while framing, resolving or (de)serialising payloads
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Payload too short: {len} bytes, header needs 5")]
    ShortPayload { len: usize },

    #[error("Bad magic byte: 0x{0:02x}")]
    BadMagic(u8),

    #[error("Schema unavailable: {0}")]
    SchemaUnavailable(#[from] RegistryError),

    #[error("Invalid schema {id}: {reason}")]
    InvalidSchema { id: u32, reason: String },

    #[error("Serialization failed: {0}")]
    Serialize(String),

    #[error("Deserialization failed: {0}")]
    Deserialize(String),
}

impl CodecError {
    /// Registry outages heal on their own; framing and payload errors do not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CodecError::SchemaUnavailable(RegistryError::Request(_))
                | CodecError::SchemaUnavailable(RegistryError::Status { .. })
        )
    }
}
