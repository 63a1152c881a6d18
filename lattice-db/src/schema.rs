//! Logical key layout
//!
//! Every record lives in a single flat keyspace; the prefix identifies the
//! record kind.

use lattice_core::{Address, BlockNumber, Hash};

pub struct Schema;

impl Schema {
    pub fn account_lookup_key(wallet_address: &Address) -> Vec<u8> {
        [b"account:".as_slice(), wallet_address.as_bytes()].concat()
    }

    /// Full account record saved under its own hash, used to revert an
    /// account to an earlier version
    pub fn account_hash_lookup_key(account_hash: &Hash) -> Vec<u8> {
        [b"account-hash-lookup:".as_slice(), account_hash.as_bytes()].concat()
    }

    pub fn canonical_head_hash_lookup_key(wallet_address: &Address) -> Vec<u8> {
        [b"v1:canonical_head_hash:".as_slice(), wallet_address.as_bytes()].concat()
    }

    pub fn block_number_to_hash_lookup_key(
        wallet_address: &Address,
        block_number: BlockNumber,
    ) -> Vec<u8> {
        let mut key = b"block-number-to-hash:".to_vec();
        key.extend_from_slice(wallet_address.as_bytes());
        key.push(b'-');
        key.extend_from_slice(block_number.to_string().as_bytes());
        key
    }

    pub fn block_header_lookup_key(block_hash: &Hash) -> Vec<u8> {
        [b"block-header:".as_slice(), block_hash.as_bytes()].concat()
    }

    pub fn latest_reward_block_number_lookup_key(wallet_address: &Address) -> Vec<u8> {
        [b"latest-reward-block-number:".as_slice(), wallet_address.as_bytes()].concat()
    }

    pub fn historical_minimum_gas_price_lookup_key() -> Vec<u8> {
        b"h_minimum_gas_price".to_vec()
    }

    pub fn historical_network_tpc_capability_lookup_key() -> Vec<u8> {
        b"h_net_tpc_capability".to_vec()
    }

    pub fn historical_tx_per_decisecond_lookup_key() -> Vec<u8> {
        b"h_tx_per_decisecond".to_vec()
    }

    pub fn min_gas_price_pid_last_update_lookup_key() -> Vec<u8> {
        b"min_gas_price_pid_last_update".to_vec()
    }
}
