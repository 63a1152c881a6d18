//! Per-chain block headers

use crate::{encode, Address, BlockNumber, CoreResult, Hash, Timestamp, U256};
use serde::{Deserialize, Serialize};

/// Block header on a single wallet's chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Wallet address that owns this chain
    pub chain_address: Address,
    /// Hash of the parent block
    pub parent_hash: Hash,
    /// Block number (height within the chain)
    pub block_number: BlockNumber,
    /// Block timestamp in seconds
    pub timestamp: Timestamp,
    /// Hash of the chain's account after this block
    pub account_hash: Hash,
    /// Balance of the chain's account after this block
    pub account_balance: U256,
    /// Gas limit for all transactions in this block
    pub gas_limit: u64,
    /// Gas used by all transactions in this block
    pub gas_used: u64,
    /// Extra data (arbitrary bytes)
    pub extra_data: Vec<u8>,
}

impl BlockHeader {
    /// Header with the fields the reward and stake calculations read
    pub fn new(
        chain_address: Address,
        block_number: BlockNumber,
        timestamp: Timestamp,
        account_balance: U256,
    ) -> Self {
        Self {
            chain_address,
            parent_hash: Hash::zero(),
            block_number,
            timestamp,
            account_hash: Hash::zero(),
            account_balance,
            gas_limit: 0,
            gas_used: 0,
            extra_data: Vec::new(),
        }
    }

    /// Calculate the hash of this block header
    pub fn hash(&self) -> CoreResult<Hash> {
        Ok(Hash::keccak(&encode(self)?))
    }

    pub fn is_genesis(&self) -> bool {
        self.block_number == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_hash_changes_with_balance() {
        let chain = Address::new([1u8; 20]);
        let a = BlockHeader::new(chain, 0, 100, U256::from(10));
        let b = BlockHeader::new(chain, 0, 100, U256::from(11));

        assert!(a.is_genesis());
        assert_eq!(a.hash().unwrap(), a.clone().hash().unwrap());
        assert_ne!(a.hash().unwrap(), b.hash().unwrap());
    }
}
