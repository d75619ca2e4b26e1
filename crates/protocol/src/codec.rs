//! Hex framing of endpoint payloads
//!
//! Inbound reports leave the host as upper-case hex strings and outbound
//! payloads arrive as hex strings. Decoding accepts either case but rejects
//! odd lengths and non-hex characters instead of guessing.

use crate::error::CodecError;

/// Encode bytes as an upper-case hex string, two characters per byte
pub fn encode_hex(bytes: &[u8]) -> String {
    hex::encode_upper(bytes)
}

/// Decode a hex string into bytes
pub fn decode_hex(data: &str) -> Result<Vec<u8>, CodecError> {
    hex::decode(data).map_err(|e| match e {
        hex::FromHexError::OddLength => CodecError::OddLength { length: data.len() },
        hex::FromHexError::InvalidHexCharacter { c, index } => {
            CodecError::InvalidCharacter { character: c, index }
        }
        other => CodecError::Malformed(other.to_string()),
    })
}
