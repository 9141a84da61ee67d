//! Wire header framing

use crate::error::CodecError;

/// Format marker in byte 0 of every frame
pub const MAGIC_BYTE: u8 = 0x00;

/// Magic byte plus big-endian u32 schema id
pub const HEADER_LEN: usize = 5;

/// A payload tagged with the id of the schema it was written with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMessage {
    pub schema_id: u32,
    pub payload: Vec<u8>,
}

impl WireMessage {
    pub fn new(schema_id: u32, payload: Vec<u8>) -> Self {
        Self { schema_id, payload }
    }

    /// Frame as `[magic][schema id BE][payload]`
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.payload.len());
        bytes.push(MAGIC_BYTE);
        bytes.extend_from_slice(&self.schema_id.to_be_bytes());
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    /// Split a frame into schema id and body.
    pub fn parse(bytes: &[u8]) -> Result<(u32, &[u8]), CodecError> {
        if bytes.len() < HEADER_LEN {
            return Err(CodecError::ShortPayload { len: bytes.len() });
        }
        if bytes[0] != MAGIC_BYTE {
            return Err(CodecError::BadMagic(bytes[0]));
        }
        let schema_id = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
        Ok((schema_id, &bytes[HEADER_LEN..]))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let (schema_id, body) = Self::parse(bytes)?;
        Ok(Self::new(schema_id, body.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let bytes = WireMessage::new(0x0102_0304, b"{}".to_vec()).to_bytes();
        assert_eq!(bytes, vec![0x00, 0x01, 0x02, 0x03, 0x04, b'{', b'}']);
    }

    #[test]
    fn test_parse_header_only() {
        let (id, body) = WireMessage::parse(&[0, 0, 0, 0, 7]).unwrap();
        assert_eq!(id, 7);
        assert!(body.is_empty());
    }

    #[test]
    fn test_short_payload() {
        assert_eq!(
            WireMessage::parse(&[0, 0, 0, 1]),
            Err(CodecError::ShortPayload { len: 4 })
        );
        assert_eq!(
            WireMessage::parse(&[]),
            Err(CodecError::ShortPayload { len: 0 })
        );
    }

    #[test]
    fn test_bad_magic() {
        assert_eq!(
            WireMessage::parse(&[0x7b, 0, 0, 0, 1, b'}']),
            Err(CodecError::BadMagic(0x7b))
        );
    }
}
