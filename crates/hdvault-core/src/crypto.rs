//! Symmetric half of envelope encryption
//!
//! AES-256-GCM under a fresh random key per call. The key never outlives the
//! returned [`SealedData`]; wrapping it for storage is the caller's job.
//!
//! # Security Notes
//!
//! - Every seal draws a new 256-bit key and a new 96-bit nonce from the OS CSPRNG
//! - GCM authenticates the ciphertext; tampering fails `open`
//! - Key material lives in zeroizing containers

use aes_gcm::{
    aead::{rand_core::RngCore, Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use thiserror::Error;
use zeroize::Zeroizing;

/// AES-256 key length
pub const KEY_LEN: usize = 32;

/// GCM nonce length
pub const IV_LEN: usize = 12;

/// GCM authentication tag length
pub const TAG_LEN: usize = 16;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("Invalid key length: {0} bytes")]
    InvalidKeyLength(usize),
}

/// Output of [`seal`]: the one-off key plus IV, ciphertext and detached tag.
pub struct SealedData {
    pub key: Zeroizing<[u8; KEY_LEN]>,
    pub iv: [u8; IV_LEN],
    pub ciphertext: Vec<u8>,
    pub tag: [u8; TAG_LEN],
}

/// Encrypt `plaintext` under a freshly generated key.
pub fn seal(plaintext: &[u8]) -> Result<SealedData, CryptoError> {
    // Drawn straight into the zeroizing buffer, no intermediate copy
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    OsRng.fill_bytes(key.as_mut_slice());

    let (iv, ciphertext, tag) = seal_with_key(&key, plaintext)?;
    Ok(SealedData {
        key,
        iv,
        ciphertext,
        tag,
    })
}

/// Encrypt `plaintext` under `key` with a random nonce, detaching the tag.
pub fn seal_with_key(
    key: &[u8; KEY_LEN],
    plaintext: &[u8],
) -> Result<([u8; IV_LEN], Vec<u8>, [u8; TAG_LEN]), CryptoError> {
    let nonce_arr = Aes256Gcm::generate_nonce(&mut OsRng);
    let mut iv = [0u8; IV_LEN];
    iv.copy_from_slice(&nonce_arr);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let mut sealed = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    // aes-gcm appends the tag to the ciphertext
    let split = sealed.len() - TAG_LEN;
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&sealed[split..]);
    sealed.truncate(split);

    Ok((iv, sealed, tag))
}

/// Decrypt and authenticate. The plaintext is returned in a zeroizing buffer.
pub fn open(
    key: &[u8],
    iv: &[u8; IV_LEN],
    ciphertext: &[u8],
    tag: &[u8; TAG_LEN],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if key.len() != KEY_LEN {
        return Err(CryptoError::InvalidKeyLength(key.len()));
    }

    let mut combined = Vec::with_capacity(ciphertext.len() + TAG_LEN);
    combined.extend_from_slice(ciphertext);
    combined.extend_from_slice(tag);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(iv), combined.as_slice())
        .map(Zeroizing::new)
        .map_err(|_| {
            CryptoError::DecryptionFailed("Wrong key or corrupted data".to_string())
        })
}
