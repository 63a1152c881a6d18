//! Error types for the core crate

use thiserror::Error;

/// Core ledger errors
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Missing signature")]
    MissingSignature,

    #[error("Invalid hash: {0}")]
    InvalidHash(String),

    #[error("Invalid address: expected 20 bytes, got {0}")]
    InvalidAddress(usize),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),

    #[error("Bincode error: {0}")]
    Bincode(String),
}

impl From<anyhow::Error> for CoreError {
    fn from(err: anyhow::Error) -> Self {
        CoreError::Serialization(err.to_string())
    }
}

/// Result type for core operations
pub type CoreResult<T> = Result<T, CoreError>;
