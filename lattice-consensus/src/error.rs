//! Consensus error types

use lattice_core::{Address, BlockNumber, U256};
use lattice_db::DbError;
use thiserror::Error;

/// Consensus error type
#[derive(Error, Debug)]
pub enum ConsensusError {
    /// Accepted scores do not carry enough stake or are too few
    #[error(
        "Not enough proofs or stake for reward type 2: total stake {total_stake}, required stake {required_stake}, proofs {num_proofs}, required proofs {required_proofs}"
    )]
    NotEnoughProofsOrStakeForRewardType2Proof {
        total_stake: U256,
        required_stake: U256,
        num_proofs: usize,
        required_proofs: usize,
    },

    #[error("Header {block_number} not found on chain {chain_address}")]
    HeaderNotFound {
        chain_address: Address,
        block_number: BlockNumber,
    },

    #[error("No node staking scores supplied")]
    EmptyScoreList,

    #[error("Arithmetic overflow: {0}")]
    Overflow(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Db(DbError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Other error
    #[error("Consensus error: {0}")]
    Other(String),
}

impl ConsensusError {
    /// Expected outcome of a reward cycle rather than a fault
    pub fn is_no_reward_owed(&self) -> bool {
        matches!(
            self,
            ConsensusError::NotEnoughProofsOrStakeForRewardType2Proof { .. }
                | ConsensusError::HeaderNotFound { .. }
                | ConsensusError::EmptyScoreList
        )
    }
}

impl From<DbError> for ConsensusError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::HeaderNotFound {
                chain_address,
                block_number,
            } => ConsensusError::HeaderNotFound {
                chain_address,
                block_number,
            },
            other => ConsensusError::Db(other),
        }
    }
}

impl From<serde_json::Error> for ConsensusError {
    fn from(err: serde_json::Error) -> Self {
        ConsensusError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for ConsensusError {
    fn from(err: anyhow::Error) -> Self {
        ConsensusError::Other(err.to_string())
    }
}

/// Result type for consensus operations
pub type ConsensusResult<T> = Result<T, ConsensusError>;
