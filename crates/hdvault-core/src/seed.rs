//! BIP-39 seed management
//!
//! Entropy generation, mnemonic validation and the entropy ⇄ mnemonic ⇄ seed
//! conversions. Only entropy is ever persisted; mnemonics and seeds are
//! rebuilt on demand and wiped when dropped.

use bip39::{Language, Mnemonic};
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::memory::SecretBytes;

/// Entropy length for generated seeds (128 bits, 12 words)
pub const GENERATED_ENTROPY_LEN: usize = 16;

/// Passphrase applied when stretching a mnemonic into a seed
pub const SEED_PASSPHRASE: &str = "";

/// A mnemonic that is wiped when dropped.
pub type SecretMnemonic = Zeroizing<Mnemonic>;

#[derive(Error, Debug)]
pub enum SeedError {
    #[error("Invalid mnemonic: {0}")]
    InvalidMnemonic(String),
    #[error("Invalid entropy: {0}")]
    InvalidEntropy(String),
}

/// Fill a fresh locked buffer with 128 bits from the OS CSPRNG.
pub fn generate_entropy() -> SecretBytes {
    let mut entropy = SecretBytes::zeroed(GENERATED_ENTROPY_LEN);
    OsRng.fill_bytes(entropy.as_mut_slice());
    entropy
}

/// Lowercase the phrase and collapse runs of whitespace to single spaces.
pub fn normalize_phrase(phrase: &str) -> Zeroizing<String> {
    let lowered = Zeroizing::new(phrase.to_lowercase());
    Zeroizing::new(lowered.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// Parse an English mnemonic, checking word list membership and checksum.
pub fn parse_mnemonic(phrase: &str) -> Result<SecretMnemonic, SeedError> {
    let normalized = normalize_phrase(phrase);
    Mnemonic::parse_in(Language::English, normalized.as_str())
        .map(Zeroizing::new)
        .map_err(|e| SeedError::InvalidMnemonic(e.to_string()))
}

/// Whether `phrase` is a valid English BIP-39 mnemonic.
pub fn validate_mnemonic(phrase: &str) -> bool {
    parse_mnemonic(phrase).is_ok()
}

/// Encode entropy (16–32 bytes, multiple of 4) as a mnemonic.
pub fn entropy_to_mnemonic(entropy: &[u8]) -> Result<SecretMnemonic, SeedError> {
    Mnemonic::from_entropy_in(Language::English, entropy)
        .map(Zeroizing::new)
        .map_err(|e| SeedError::InvalidEntropy(e.to_string()))
}

/// Recover the entropy a mnemonic encodes.
pub fn mnemonic_to_entropy(mnemonic: &Mnemonic) -> SecretBytes {
    SecretBytes::from_vec(mnemonic.to_entropy())
}

/// The mnemonic as a space-separated phrase.
pub fn mnemonic_phrase(mnemonic: &Mnemonic) -> Zeroizing<String> {
    Zeroizing::new(mnemonic.to_string())
}

/// Derive seed bytes from mnemonic (with optional passphrase)
pub fn derive_seed(mnemonic: &Mnemonic, passphrase: &str) -> Zeroizing<[u8; 64]> {
    Zeroizing::new(mnemonic.to_seed(passphrase))
}

/// entropy → mnemonic → seed, with the intermediate mnemonic wiped.
pub fn entropy_to_seed(entropy: &[u8]) -> Result<Zeroizing<[u8; 64]>, SeedError> {
    let mnemonic = entropy_to_mnemonic(entropy)?;
    Ok(derive_seed(&mnemonic, SEED_PASSPHRASE))
}
