//! hdvault Core
//!
//! Seed handling, key derivation and signing primitives for hdvault.
//!
//! # Key Derivation
//!
//! From a single BIP-39 entropy buffer:
//! - Seed labels via the root path: m/7696500'/0'/0'/0'
//! - Any caller-chosen BIP-32 path for addresses and signatures
//!
//! # Encrypted Storage
//!
//! Entropy is sealed with AES-256-GCM under a fresh key per encryption. The
//! fresh key is wrapped by a platform key and the pieces are serialized with
//! the [`envelope`] codec.

pub mod crypto;
pub mod envelope;
pub mod keys;
pub mod memory;
pub mod seed;
pub mod signing;

pub use crypto::{open, seal, CryptoError, SealedData};
pub use envelope::{Envelope, EnvelopeError};
pub use keys::*;
pub use memory::SecretBytes;
pub use seed::*;
pub use signing::{sign, recover_public_key, SignError, SignatureData, SigningScheme};
