//! Recoverable secp256k1 signatures
//!
//! All schemes share one signing step and differ only in how the payload is
//! hashed before it and in the offset applied to the recovery id.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use bitcoin::secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use bitcoin::secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::keys::keccak256;

/// Prefix for EIP-191 personal messages
pub const PERSONAL_MESSAGE_PREFIX: &str = "\x19Ethereum Signed Message:\n";

#[derive(Error, Debug)]
pub enum SignError {
    #[error("Invalid recovery id: {0}")]
    InvalidRecoveryId(u8),
    #[error("Signature error: {0}")]
    Secp(#[from] bitcoin::secp256k1::Error),
}

/// How a payload is framed and hashed before signing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SigningScheme {
    /// Keccak-256 of the raw (RLP-encoded) transaction bytes
    Transaction,
    /// EIP-191 `personal_sign`
    PersonalMessage,
    /// SHA-256 of the JWT signing input (ES256K-R)
    Jwt,
}

impl SigningScheme {
    pub fn digest(self, payload: &[u8]) -> [u8; 32] {
        match self {
            Self::Transaction => keccak256(payload),
            Self::PersonalMessage => personal_message_hash(payload),
            Self::Jwt => Sha256::digest(payload).into(),
        }
    }

    fn v_offset(self) -> u8 {
        match self {
            Self::Transaction | Self::PersonalMessage => 27,
            Self::Jwt => 0,
        }
    }
}

/// Keccak-256 of the EIP-191 framed message.
pub fn personal_message_hash(message: &[u8]) -> [u8; 32] {
    let mut framed = Vec::with_capacity(PERSONAL_MESSAGE_PREFIX.len() + 20 + message.len());
    framed.extend_from_slice(PERSONAL_MESSAGE_PREFIX.as_bytes());
    framed.extend_from_slice(message.len().to_string().as_bytes());
    framed.extend_from_slice(message);
    keccak256(&framed)
}

/// (r, s, v) signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureData {
    pub r: [u8; 32],
    pub s: [u8; 32],
    pub v: u8,
}

impl SignatureData {
    /// `r || s || v`
    pub fn to_bytes(&self) -> [u8; 65] {
        let mut out = [0u8; 65];
        out[..32].copy_from_slice(&self.r);
        out[32..64].copy_from_slice(&self.s);
        out[64] = self.v;
        out
    }

    /// `0x`-prefixed hex of `r || s || v`
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.to_bytes()))
    }

    /// base64url (unpadded) of `r || s || v`, the ES256K-R JOSE form
    pub fn to_jose(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.to_bytes())
    }

    fn recovery_id(&self, scheme: SigningScheme) -> Result<RecoveryId, SignError> {
        let raw = self
            .v
            .checked_sub(scheme.v_offset())
            .ok_or(SignError::InvalidRecoveryId(self.v))?;
        RecoveryId::from_i32(raw as i32).map_err(|_| SignError::InvalidRecoveryId(self.v))
    }
}

/// Sign `payload` with `key` under `scheme`.
pub fn sign(
    key: &SecretKey,
    payload: &[u8],
    scheme: SigningScheme,
) -> Result<SignatureData, SignError> {
    let secp = Secp256k1::signing_only();
    let message = Message::from_digest(scheme.digest(payload));
    let (recovery_id, compact) = secp
        .sign_ecdsa_recoverable(&message, key)
        .serialize_compact();

    let mut r = [0u8; 32];
    let mut s = [0u8; 32];
    r.copy_from_slice(&compact[..32]);
    s.copy_from_slice(&compact[32..]);

    Ok(SignatureData {
        r,
        s,
        v: recovery_id.to_i32() as u8 + scheme.v_offset(),
    })
}

/// Recover the public key that produced `signature` over `payload`.
pub fn recover_public_key(
    payload: &[u8],
    scheme: SigningScheme,
    signature: &SignatureData,
) -> Result<PublicKey, SignError> {
    let mut compact = [0u8; 64];
    compact[..32].copy_from_slice(&signature.r);
    compact[32..].copy_from_slice(&signature.s);

    let recoverable =
        RecoverableSignature::from_compact(&compact, signature.recovery_id(scheme)?)?;
    let message = Message::from_digest(scheme.digest(payload));
    Ok(Secp256k1::verification_only().recover_ecdsa(&message, &recoverable)?)
}
