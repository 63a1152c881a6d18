//! Block-level parameters visible to computation

use lattice_core::{BlockNumber, Timestamp};
use serde::{Deserialize, Serialize};

/// Immutable snapshot of the block being built, created once before any
/// transaction of the block executes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionContext {
    timestamp: Timestamp,
    block_number: BlockNumber,
    gas_limit: u64,
}

impl ExecutionContext {
    pub fn new(timestamp: Timestamp, block_number: BlockNumber, gas_limit: u64) -> Self {
        Self {
            timestamp,
            block_number,
            gas_limit,
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn block_number(&self) -> BlockNumber {
        self.block_number
    }

    pub fn gas_limit(&self) -> u64 {
        self.gas_limit
    }
}
