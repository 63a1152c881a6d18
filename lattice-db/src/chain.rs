//! Per-wallet chain header access
//!
//! Every wallet owns a chain. Headers are stored by hash, indexed by
//! `(wallet, block_number)`, and the newest imported block of each wallet is
//! its canonical head.

use crate::{DbError, DbResult, Schema, SharedDatabase};
use lattice_core::{decode, encode, Address, BlockHeader, BlockNumber, Hash, Timestamp, U256};
use tracing::debug;

/// Read access to canonical chain headers used by reward and stake calculations
pub trait ChainDB: Send + Sync {
    /// Header at `block_number` on `wallet_address`'s chain
    fn get_canonical_block_header_by_number(
        &self,
        block_number: BlockNumber,
        wallet_address: &Address,
    ) -> DbResult<BlockHeader>;

    fn get_canonical_head(&self, wallet_address: &Address) -> DbResult<BlockHeader>;

    /// Number of the newest reward block, 0 if the chain never received one
    fn get_latest_reward_block_number(&self, wallet_address: &Address) -> DbResult<BlockNumber>;

    /// Lowest balance held by `wallet_address` between `at - maturity` and `at`
    fn get_mature_stake(
        &self,
        wallet_address: &Address,
        maturity: u64,
        at: Timestamp,
    ) -> DbResult<U256>;
}

/// [`ChainDB`] over a [`KeyValueDB`](crate::KeyValueDB)
#[derive(Clone)]
pub struct KvChainDB {
    db: SharedDatabase,
}

impl KvChainDB {
    pub fn new(db: SharedDatabase) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &SharedDatabase {
        &self.db
    }

    /// Store a header and make it canonical at its height.
    ///
    /// The head pointer only moves forward, so re-importing an older block
    /// replaces that height without rewinding the chain.
    pub fn import_header(&self, header: &BlockHeader, is_reward_block: bool) -> DbResult<Hash> {
        let block_hash = header.hash()?;
        let wallet_address = &header.chain_address;

        self.db
            .set(&Schema::block_header_lookup_key(&block_hash), &encode(header)?)?;
        self.db.set(
            &Schema::block_number_to_hash_lookup_key(wallet_address, header.block_number),
            block_hash.as_bytes(),
        )?;

        let advance_head = match self.get_canonical_head(wallet_address) {
            Ok(head) => header.block_number >= head.block_number,
            Err(DbError::CanonicalHeadNotFound(_)) => true,
            Err(e) => return Err(e),
        };
        if advance_head {
            self.db.set(
                &Schema::canonical_head_hash_lookup_key(wallet_address),
                block_hash.as_bytes(),
            )?;
        }

        if is_reward_block {
            self.db.set(
                &Schema::latest_reward_block_number_lookup_key(wallet_address),
                &encode(&header.block_number)?,
            )?;
        }

        debug!(
            "Imported block {} on chain {} (reward block: {})",
            header.block_number, wallet_address, is_reward_block
        );
        Ok(block_hash)
    }

    pub fn get_block_header_by_hash(&self, block_hash: &Hash) -> DbResult<BlockHeader> {
        let bytes = self
            .db
            .get(&Schema::block_header_lookup_key(block_hash))?
            .ok_or_else(|| DbError::KeyNotFound(format!("block header {}", block_hash)))?;
        Ok(decode(&bytes)?)
    }
}

impl ChainDB for KvChainDB {
    fn get_canonical_block_header_by_number(
        &self,
        block_number: BlockNumber,
        wallet_address: &Address,
    ) -> DbResult<BlockHeader> {
        let key = Schema::block_number_to_hash_lookup_key(wallet_address, block_number);
        let hash_bytes = self.db.get(&key)?.ok_or(DbError::HeaderNotFound {
            chain_address: *wallet_address,
            block_number,
        })?;
        self.get_block_header_by_hash(&Hash::from_slice(&hash_bytes)?)
    }

    fn get_canonical_head(&self, wallet_address: &Address) -> DbResult<BlockHeader> {
        let hash_bytes = self
            .db
            .get(&Schema::canonical_head_hash_lookup_key(wallet_address))?
            .ok_or(DbError::CanonicalHeadNotFound(*wallet_address))?;
        self.get_block_header_by_hash(&Hash::from_slice(&hash_bytes)?)
    }

    fn get_latest_reward_block_number(&self, wallet_address: &Address) -> DbResult<BlockNumber> {
        match self
            .db
            .get(&Schema::latest_reward_block_number_lookup_key(wallet_address))?
        {
            Some(bytes) => Ok(decode(&bytes)?),
            None => Ok(0),
        }
    }

    fn get_mature_stake(
        &self,
        wallet_address: &Address,
        maturity: u64,
        at: Timestamp,
    ) -> DbResult<U256> {
        let head = match self.get_canonical_head(wallet_address) {
            Ok(head) => head,
            Err(DbError::CanonicalHeadNotFound(_)) => return Ok(U256::zero()),
            Err(e) => return Err(e),
        };
        let mature_before = at.saturating_sub(maturity);

        let mut minimum = U256::MAX;
        for block_number in (0..=head.block_number).rev() {
            let header = self.get_canonical_block_header_by_number(block_number, wallet_address)?;
            if header.timestamp > at {
                continue;
            }
            minimum = minimum.min(header.account_balance);
            if header.timestamp <= mature_before {
                return Ok(minimum);
            }
        }

        // Chain is younger than the maturity window
        Ok(U256::zero())
    }
}
