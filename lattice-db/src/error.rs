//! Database error types

use lattice_core::{Address, BlockNumber, CoreError};
use thiserror::Error;

/// Database error type
#[derive(Error, Debug)]
pub enum DbError {
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Key not found
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// Requested block number does not exist on the chain
    #[error("Header not found: block {block_number} on chain {chain_address}")]
    HeaderNotFound {
        chain_address: Address,
        block_number: BlockNumber,
    },

    /// Chain has no blocks at all
    #[error("Canonical head not found for chain {0}")]
    CanonicalHeadNotFound(Address),

    /// Checkpoint id is not (or no longer) part of the journal
    #[error("Unknown checkpoint: {0}")]
    UnknownCheckpoint(u64),

    /// Only the root journal may be flushed to permanent storage
    #[error("Cannot persist with {0} open checkpoint(s)")]
    PersistWithOpenCheckpoints(usize),

    /// Other error
    #[error("Database error: {0}")]
    Other(String),
}

impl From<CoreError> for DbError {
    fn from(err: CoreError) -> Self {
        DbError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for DbError {
    fn from(err: anyhow::Error) -> Self {
        DbError::Other(err.to_string())
    }
}

/// Result type for database operations
pub type DbResult<T> = Result<T, DbError>;
