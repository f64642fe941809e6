//! Signing identity for ledger writes.
//!
//! Exactly one identity is built per process and handed to the
//! transaction coordinator, which owns it for the rest of the process
//! lifetime. It is immutable after construction.

use super::{SignedWrite, UnsignedWrite};
use crate::errors::BridgeError;
use ring::digest::{digest, SHA256};
use ring::signature::{Ed25519KeyPair, KeyPair};
use secrecy::{ExposeSecret, SecretString};
use std::fmt;

/// Ed25519 seed length in bytes.
pub const SEED_LENGTH: usize = 32;

/// Address length in bytes (trailing bytes of the public key digest).
pub const ADDRESS_LENGTH: usize = 20;

/// Key pair plus derived address.
pub struct SigningIdentity {
    key_pair: Ed25519KeyPair,
    address: String,
    public_key_hex: String,
}

impl SigningIdentity {
    /// Build from a hex-encoded 32-byte seed (optional `0x` prefix).
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Identity` if the seed is not valid hex of the right length.
    pub fn from_hex_seed(seed: &SecretString) -> Result<Self, BridgeError> {
        let raw = seed.expose_secret().trim();
        let digits = raw.strip_prefix("0x").unwrap_or(raw);
        let bytes = hex::decode(digits)
            .map_err(|_| BridgeError::Identity("signing key is not valid hex".to_string()))?;
        Self::from_seed(&bytes)
    }

    /// Build from raw seed bytes.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Identity` if the seed is not exactly 32 bytes.
    pub fn from_seed(seed: &[u8]) -> Result<Self, BridgeError> {
        if seed.len() != SEED_LENGTH {
            return Err(BridgeError::Identity(format!(
                "signing key must be {SEED_LENGTH} bytes, got {}",
                seed.len()
            )));
        }

        let key_pair = Ed25519KeyPair::from_seed_unchecked(seed)
            .map_err(|_| BridgeError::Identity("signing key rejected".to_string()))?;

        let public_key = key_pair.public_key().as_ref();
        let hashed = digest(&SHA256, public_key);
        let tail = hashed
            .as_ref()
            .get(hashed.as_ref().len().saturating_sub(ADDRESS_LENGTH)..)
            .unwrap_or_default();

        Ok(Self {
            address: format!("0x{}", hex::encode(tail)),
            public_key_hex: format!("0x{}", hex::encode(public_key)),
            key_pair,
        })
    }

    /// Ledger address writes originate from.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn public_key_hex(&self) -> &str {
        &self.public_key_hex
    }

    /// Sign the canonical JSON bytes of `write`.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Internal` if the write cannot be serialized.
    pub fn sign(&self, write: UnsignedWrite) -> Result<SignedWrite, BridgeError> {
        let payload = serde_json::to_vec(&write)
            .map_err(|e| BridgeError::Internal(format!("failed to serialize write: {e}")))?;
        let signature = self.key_pair.sign(&payload);

        Ok(SignedWrite {
            write,
            public_key: self.public_key_hex.clone(),
            signature: format!("0x{}", hex::encode(signature.as_ref())),
        })
    }
}

/// Only the address is printed.
impl fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningIdentity")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}
