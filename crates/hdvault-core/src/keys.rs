//! Key derivation from BIP-39 entropy
//!
//! BIP-32 derivation over secp256k1, plus the Ethereum-style presentation of
//! derived keys: EIP-55 checksum addresses and base64 uncompressed public keys.

use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bitcoin::bip32::{DerivationPath, Xpriv};
use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};
use bitcoin::Network;
use sha3::{Digest, Keccak256};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::seed::{self, SeedError};

/// Root derivation path; the address at this path labels the seed
pub const ROOT_DERIVATION_PATH: &str = "m/7696500'/0'/0'/0'";

#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Derivation failed: {0}")]
    DerivationFailed(String),
    #[error("Invalid path: {0}")]
    InvalidPath(String),
    #[error(transparent)]
    Seed(#[from] SeedError),
}

/// Parse a BIP-32 path such as `m/44'/60'/0'/0/0`.
pub fn parse_path(path: &str) -> Result<DerivationPath, KeyError> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(KeyError::InvalidPath("empty path".to_string()));
    }
    DerivationPath::from_str(trimmed)
        .map_err(|e: bitcoin::bip32::Error| KeyError::InvalidPath(format!("{}: {}", path, e)))
}

/// An extended private key owned by a single operation.
///
/// The secret scalar is erased when the value is dropped.
pub struct DerivedKey {
    xpriv: Xpriv,
}

impl DerivedKey {
    pub fn secret_key(&self) -> &SecretKey {
        &self.xpriv.private_key
    }

    pub fn public_key(&self) -> PublicKey {
        self.xpriv.private_key.public_key(&Secp256k1::signing_only())
    }

    /// 65-byte SEC1 encoding, `0x04 || X || Y`
    pub fn uncompressed_public_key(&self) -> [u8; 65] {
        self.public_key().serialize_uncompressed()
    }

    /// Base64 of the uncompressed public key.
    pub fn encoded_public_key(&self) -> String {
        encode_public_key(&self.public_key())
    }

    /// EIP-55 checksum address of this key.
    pub fn address(&self) -> String {
        address_from_public_key(&self.public_key())
    }

    /// Base58 `xprv` serialization.
    pub fn to_xpriv_string(&self) -> Zeroizing<String> {
        Zeroizing::new(self.xpriv.to_string())
    }
}

impl Drop for DerivedKey {
    fn drop(&mut self) {
        self.xpriv.private_key.non_secure_erase();
    }
}

/// BIP-32 master key for a 64-byte seed.
pub fn master_key(seed: &[u8; 64]) -> Result<DerivedKey, KeyError> {
    let xpriv = Xpriv::new_master(Network::Bitcoin, seed)
        .map_err(|e| KeyError::DerivationFailed(e.to_string()))?;
    Ok(DerivedKey { xpriv })
}

/// Derive the key at `path` below the master key of `seed`.
pub fn derive_key(seed: &[u8; 64], path: &DerivationPath) -> Result<DerivedKey, KeyError> {
    let master = master_key(seed)?;
    let xpriv = master
        .xpriv
        .derive_priv(&Secp256k1::new(), path)
        .map_err(|e| KeyError::DerivationFailed(e.to_string()))?;
    Ok(DerivedKey { xpriv })
}

/// entropy → mnemonic → seed → key at `path`.
///
/// The intermediate mnemonic and seed are wiped before returning.
pub fn derive_from_entropy(entropy: &[u8], path: &DerivationPath) -> Result<DerivedKey, KeyError> {
    let seed = seed::entropy_to_seed(entropy)?;
    derive_key(&seed, path)
}

/// The root key for `entropy`, whose address is the seed label.
pub fn derive_root(entropy: &[u8]) -> Result<DerivedKey, KeyError> {
    derive_from_entropy(entropy, &parse_path(ROOT_DERIVATION_PATH)?)
}

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

/// Last 20 bytes of Keccak-256 over the uncompressed point, EIP-55 encoded.
pub fn address_from_public_key(public_key: &PublicKey) -> String {
    let uncompressed = public_key.serialize_uncompressed();
    let hash = keccak256(&uncompressed[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..]);
    to_checksum_address(&address)
}

/// EIP-55 mixed-case checksum encoding of a 20-byte address.
pub fn to_checksum_address(address: &[u8; 20]) -> String {
    let lower = hex::encode(address);
    let hash = keccak256(lower.as_bytes());

    let mut out = String::with_capacity(2 + lower.len());
    out.push_str("0x");
    for (i, c) in lower.chars().enumerate() {
        let nibble = (hash[i / 2] >> (if i % 2 == 0 { 4 } else { 0 })) & 0x0f;
        if c.is_ascii_alphabetic() && nibble >= 8 {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Base64 of the uncompressed SEC1 point.
pub fn encode_public_key(public_key: &PublicKey) -> String {
    BASE64.encode(public_key.serialize_uncompressed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed::{derive_seed, generate_entropy, parse_mnemonic};

    const ABANDON_ABOUT: &str = "abandon abandon abandon abandon abandon abandon \
                                 abandon abandon abandon abandon abandon about";

    /// BIP-39 reference vector (trezor/python-mnemonic, passphrase "TREZOR")
    #[test]
    fn test_master_xprv_vector() {
        let mnemonic = parse_mnemonic(ABANDON_ABOUT).unwrap();
        let seed = derive_seed(&mnemonic, "TREZOR");
        let master = master_key(&seed).unwrap();
        assert_eq!(
            master.to_xpriv_string().as_str(),
            "xprv9s21ZrQH143K3h3fDYiay8mocZ3afhfULfb5GX8kCBdno77K4HiA15Tg23wpbeF1pLfs1c5SPmYHrEpTuuRhxMwvKDwqdKiGJS9XFKzUsAF"
        );
    }

    /// First account address of the well-known all-abandon wallet
    #[test]
    fn test_ethereum_account_vector() {
        let path = parse_path("m/44'/60'/0'/0/0").unwrap();
        let key = derive_from_entropy(&[0u8; 16], &path).unwrap();
        assert_eq!(key.address(), "0x9858EfFD232B4033E47d90003D41EC34EcaEda94");
    }

    /// EIP-55 reference addresses
    #[test]
    fn test_checksum_encoding() {
        for expected in [
            "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed",
            "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359",
            "0xdbF03B407c01E7cD3CBea99509d93f8DDDC8C6FB",
            "0xD1220A0cf47c7B9Be7A2E6BA89F429762e7b9aDb",
        ] {
            let raw: [u8; 20] = hex::decode(&expected[2..]).unwrap().try_into().unwrap();
            assert_eq!(to_checksum_address(&raw), expected);
        }
    }

    #[test]
    fn test_root_key_is_deterministic() {
        let entropy = generate_entropy();
        let a = derive_root(&entropy).unwrap();
        let b = derive_root(&entropy).unwrap();
        assert_eq!(a.address(), b.address());
        assert_eq!(a.encoded_public_key(), b.encoded_public_key());
    }

    #[test]
    fn test_root_differs_from_account_path() {
        let root = derive_root(&[0u8; 16]).unwrap();
        let account =
            derive_from_entropy(&[0u8; 16], &parse_path("m/44'/60'/0'/0/0").unwrap()).unwrap();
        assert_ne!(root.address(), account.address());
    }

    #[test]
    fn test_public_key_encoding() {
        let key = derive_root(&[7u8; 16]).unwrap();
        let raw = BASE64.decode(key.encoded_public_key()).unwrap();
        assert_eq!(raw.len(), 65);
        assert_eq!(raw[0], 0x04);
        assert_eq!(raw.as_slice(), key.uncompressed_public_key().as_slice());
    }

    #[test]
    fn test_invalid_paths_rejected() {
        for bad in ["", "m/abc", "m/44'/x", "44''/0"] {
            assert!(
                matches!(parse_path(bad), Err(KeyError::InvalidPath(_))),
                "path {:?} should be rejected",
                bad
            );
        }
    }
}
