//! Staking evidence and reward bundles

use crate::{encode, Address, CoreResult, Hash, Timestamp, U256};
use serde::{Deserialize, Serialize};

/// Evidence submitted by a peer about a node's uptime and responsiveness.
/// Scores are parts per million.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStakingScore {
    pub sender: Address,
    pub recipient_node_wallet_address: Address,
    pub score: U256,
    pub timestamp: Timestamp,
}

impl NodeStakingScore {
    pub fn new(
        sender: Address,
        recipient_node_wallet_address: Address,
        score: U256,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            sender,
            recipient_node_wallet_address,
            score,
            timestamp,
        }
    }

    pub fn hash(&self) -> CoreResult<Hash> {
        Ok(Hash::keccak(&encode(self)?))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeRewardType1 {
    pub amount: U256,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeRewardType2 {
    pub amount: U256,
    /// Scores that were accepted to justify the amount
    pub proof: Vec<NodeStakingScore>,
}

/// Rewards issued in a single reward block
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeRewardBundle {
    pub reward_type_1: StakeRewardType1,
    pub reward_type_2: StakeRewardType2,
}

impl StakeRewardBundle {
    pub fn new(reward_type_1: StakeRewardType1, reward_type_2: StakeRewardType2) -> Self {
        Self {
            reward_type_1,
            reward_type_2,
        }
    }

    /// Combined amount credited to the wallet. Saturates instead of wrapping.
    pub fn total_amount(&self) -> U256 {
        self.reward_type_1
            .amount
            .saturating_add(self.reward_type_2.amount)
    }

    pub fn hash(&self) -> CoreResult<Hash> {
        Ok(Hash::keccak(&encode(self)?))
    }
}
