//! Envelope codec
//!
//! Serialized form of an envelope-encrypted payload:
//!
//! ```text
//! base64(wrapped_key) ']' base64(iv) ']' base64(ciphertext) ']' base64(tag)
//! ```
//!
//! Standard base64 alphabet with padding. `]` never occurs in that alphabet, so
//! splitting is unambiguous. Decoding is strict: any field-count, encoding or
//! length mismatch is an error, never a truncated result.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use thiserror::Error;

use crate::crypto::{IV_LEN, TAG_LEN};

/// Separator between encoded fields
pub const FIELD_SEPARATOR: char = ']';

const FIELD_COUNT: usize = 4;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("Malformed payload: {0}")]
    Malformed(String),
}

/// Wrapped symmetric key, IV, ciphertext and tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub wrapped_key: Vec<u8>,
    pub iv: [u8; IV_LEN],
    pub ciphertext: Vec<u8>,
    pub tag: [u8; TAG_LEN],
}

impl Envelope {
    pub fn new(
        wrapped_key: Vec<u8>,
        iv: [u8; IV_LEN],
        ciphertext: Vec<u8>,
        tag: [u8; TAG_LEN],
    ) -> Self {
        Self {
            wrapped_key,
            iv,
            ciphertext,
            tag,
        }
    }

    pub fn encode(&self) -> String {
        [
            BASE64.encode(&self.wrapped_key),
            BASE64.encode(self.iv),
            BASE64.encode(&self.ciphertext),
            BASE64.encode(self.tag),
        ]
        .join(&FIELD_SEPARATOR.to_string())
    }

    pub fn decode(payload: &str) -> Result<Self, EnvelopeError> {
        let fields: Vec<&str> = payload.split(FIELD_SEPARATOR).collect();
        if fields.len() != FIELD_COUNT {
            return Err(EnvelopeError::Malformed(format!(
                "expected {} fields, found {}",
                FIELD_COUNT,
                fields.len()
            )));
        }

        let wrapped_key = decode_field("wrapped key", fields[0])?;
        if wrapped_key.is_empty() {
            return Err(EnvelopeError::Malformed("empty wrapped key".to_string()));
        }
        let iv = fixed_field::<IV_LEN>("iv", fields[1])?;
        let ciphertext = decode_field("ciphertext", fields[2])?;
        let tag = fixed_field::<TAG_LEN>("tag", fields[3])?;

        Ok(Self {
            wrapped_key,
            iv,
            ciphertext,
            tag,
        })
    }
}

fn decode_field(name: &str, field: &str) -> Result<Vec<u8>, EnvelopeError> {
    BASE64
        .decode(field)
        .map_err(|e| EnvelopeError::Malformed(format!("{}: {}", name, e)))
}

fn fixed_field<const N: usize>(name: &str, field: &str) -> Result<[u8; N], EnvelopeError> {
    let bytes = decode_field(name, field)?;
    bytes.try_into().map_err(|b: Vec<u8>| {
        EnvelopeError::Malformed(format!("{}: expected {} bytes, found {}", name, N, b.len()))
    })
}
