//! Basic ledger types

use crate::{CoreError, CoreResult};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::fmt;

pub use primitive_types::U256;

/// Block number type (64-bit unsigned integer)
pub type BlockNumber = u64;

/// Timestamp in seconds since Unix epoch
pub type Timestamp = u64;

/// Gas amount type
pub type Gas = u64;

/// Nonce type for transactions
pub type Nonce = u64;

/// 32-byte hash type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Hash([u8; 32]);

impl Hash {
    /// Create a new hash from byte array
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Create hash from a slice, rejecting anything that is not 32 bytes
    pub fn from_slice(slice: &[u8]) -> CoreResult<Self> {
        let bytes: [u8; 32] = slice
            .try_into()
            .map_err(|_| CoreError::InvalidHash(hex::encode(slice)))?;
        Ok(Self(bytes))
    }

    /// Keccak256 of arbitrary data
    pub fn keccak(data: &[u8]) -> Self {
        let digest = Keccak256::digest(data);
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(digest.as_slice());
        Self(bytes)
    }

    /// Get the underlying byte array
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Create from hex string
    pub fn from_hex(hex: &str) -> CoreResult<Self> {
        let bytes = hex::decode(hex.trim_start_matches("0x"))?;
        Self::from_slice(&bytes)
    }

    /// Zero hash (all bytes are 0)
    pub fn zero() -> Self {
        Self([0u8; 32])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl Default for Hash {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl From<[u8; 32]> for Hash {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// 20-byte canonical address. Every wallet address is also the root of its
/// own chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address([u8; 20]);

impl Address {
    /// Create a new address from byte array
    pub fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Validate and convert a canonical 20-byte address
    pub fn from_canonical(slice: &[u8]) -> CoreResult<Self> {
        let bytes: [u8; 20] = slice
            .try_into()
            .map_err(|_| CoreError::InvalidAddress(slice.len()))?;
        Ok(Self(bytes))
    }

    /// Derive the address of a contract deployed by `sender` at `nonce`
    pub fn contract_address(sender: &Address, nonce: Nonce) -> Self {
        let mut preimage = Vec::with_capacity(28);
        preimage.extend_from_slice(&sender.0);
        preimage.extend_from_slice(&nonce.to_be_bytes());
        let hash = Hash::keccak(&preimage);
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&hash.as_bytes()[12..]);
        Self(bytes)
    }

    /// Get the underlying byte array
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Create from hex string
    pub fn from_hex(hex: &str) -> CoreResult<Self> {
        let bytes = hex::decode(hex.trim_start_matches("0x"))?;
        Self::from_canonical(&bytes)
    }

    /// Zero address (all bytes are 0)
    pub fn zero() -> Self {
        Self([0u8; 20])
    }
}

impl Default for Address {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl From<[u8; 20]> for Address {
    fn from(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Canonical binary encoding used for hashing and storage
pub fn encode<T: Serialize>(value: &T) -> CoreResult<Vec<u8>> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| CoreError::Bincode(e.to_string()))
}

/// Inverse of [`encode`]
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> CoreResult<T> {
    bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map(|(value, _)| value)
        .map_err(|e| CoreError::Bincode(e.to_string()))
}
