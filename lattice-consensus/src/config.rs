//! Consensus parameters

use crate::{ConsensusError, ConsensusResult};
use lattice_core::{Timestamp, U256};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

const SECONDS_PER_YEAR: i64 = 60 * 60 * 24 * 365;

/// `amount` whole coins in wei
pub fn ether(amount: u64) -> U256 {
    U256::from(amount) * U256::exp10(18)
}

/// Reward and minimum gas price parameters of the network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusParams {
    /// Interest per second paid on stake as reward type 1
    pub reward_type_1_amount_factor: Decimal,
    /// Interest per second paid on stake as reward type 2, before scoring
    pub reward_type_2_amount_factor: Decimal,

    pub masternode_level_1_required_balance: U256,
    pub masternode_level_1_multiplier: Decimal,
    pub masternode_level_2_required_balance: U256,
    pub masternode_level_2_multiplier: Decimal,
    pub masternode_level_3_required_balance: U256,
    pub masternode_level_3_multiplier: Decimal,

    /// Multiplier applied on top of the masternode tier before the cutoff
    pub early_bird_bonus_factor: Decimal,
    pub early_bird_bonus_cutoff_timestamp: Timestamp,

    pub required_stake_for_reward_type_2_proof: U256,
    pub required_number_of_proofs_for_reward_type_2_proof: usize,
    /// Seconds a balance must be held before it counts as stake
    pub coin_mature_time_for_staking: u64,
    pub min_time_between_reward_blocks: u64,
    pub reward_block_creation_attempt_frequency: u64,
    pub reward_proof_timestamp_variability_allowance: u64,

    /// Proportional gain of the min gas price controller
    pub min_gas_price_pid_kp: Decimal,
    /// Integral gain of the min gas price controller
    pub min_gas_price_pid_ki: Decimal,
    /// Minimum seconds between two controller steps
    pub min_gas_price_pid_interval: u64,
    /// Buckets kept for the min gas price and network TPC capability histories
    pub historical_min_gas_price_length: usize,
    /// Buckets kept for the tx per decisecond history
    pub historical_tx_per_decisecond_length: usize,
}

impl Default for ConsensusParams {
    fn default() -> Self {
        let level_3 = ether(150_000);
        Self {
            reward_type_1_amount_factor: Decimal::ZERO,
            // 3% per year
            reward_type_2_amount_factor: Decimal::new(3, 2) / Decimal::from(SECONDS_PER_YEAR),
            masternode_level_1_required_balance: ether(10_000),
            masternode_level_1_multiplier: Decimal::from(4) / Decimal::from(3),
            masternode_level_2_required_balance: ether(75_000),
            masternode_level_2_multiplier: Decimal::from(6) / Decimal::from(3),
            masternode_level_3_required_balance: level_3,
            masternode_level_3_multiplier: Decimal::from(8) / Decimal::from(3),
            early_bird_bonus_factor: Decimal::from(5),
            early_bird_bonus_cutoff_timestamp: 1_593_505_425,
            required_stake_for_reward_type_2_proof: level_3 * U256::from(2),
            required_number_of_proofs_for_reward_type_2_proof: 2,
            coin_mature_time_for_staking: 60 * 60 * 72,
            min_time_between_reward_blocks: 60 * 60 * 24,
            reward_block_creation_attempt_frequency: 60 * 30,
            reward_proof_timestamp_variability_allowance: 300,
            min_gas_price_pid_kp: Decimal::new(5, 1),
            min_gas_price_pid_ki: Decimal::new(1, 1),
            min_gas_price_pid_interval: 10,
            historical_min_gas_price_length: 60,
            historical_tx_per_decisecond_length: 60,
        }
    }
}

impl ConsensusParams {
    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> ConsensusResult<Self> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| ConsensusError::Config(format!("Failed to read config file: {}", e)))?;

        let params: ConsensusParams = serde_json::from_str(&content)?;
        params.validate()?;
        Ok(params)
    }

    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> ConsensusResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), content)
            .map_err(|e| ConsensusError::Config(format!("Failed to write config file: {}", e)))?;
        Ok(())
    }

    pub fn from_toml(toml_str: &str) -> ConsensusResult<Self> {
        let params: ConsensusParams = toml::from_str(toml_str)
            .map_err(|e| ConsensusError::Config(format!("Failed to parse parameters: {}", e)))?;
        params.validate()?;
        Ok(params)
    }

    pub fn to_toml(&self) -> ConsensusResult<String> {
        toml::to_string(self)
            .map_err(|e| ConsensusError::Serialization(format!("Failed to serialize parameters: {}", e)))
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConsensusResult<()> {
        if self.reward_type_1_amount_factor.is_sign_negative()
            || self.reward_type_2_amount_factor.is_sign_negative()
        {
            return Err(ConsensusError::Config(
                "Reward factors must not be negative".to_string(),
            ));
        }

        if !(self.masternode_level_1_required_balance <= self.masternode_level_2_required_balance
            && self.masternode_level_2_required_balance <= self.masternode_level_3_required_balance)
        {
            return Err(ConsensusError::Config(
                "Masternode tiers must be ordered by required balance".to_string(),
            ));
        }

        for multiplier in [
            self.masternode_level_1_multiplier,
            self.masternode_level_2_multiplier,
            self.masternode_level_3_multiplier,
            self.early_bird_bonus_factor,
        ] {
            if multiplier.is_sign_negative() {
                return Err(ConsensusError::Config(format!(
                    "Multiplier {} must not be negative",
                    multiplier
                )));
            }
        }

        if self.required_number_of_proofs_for_reward_type_2_proof == 0 {
            return Err(ConsensusError::Config(
                "At least one proof is required for reward type 2".to_string(),
            ));
        }

        if self.min_gas_price_pid_interval == 0 {
            return Err(ConsensusError::Config(
                "Min gas price PID interval must be greater than 0".to_string(),
            ));
        }

        if self.historical_min_gas_price_length < 2 || self.historical_tx_per_decisecond_length < 3
        {
            return Err(ConsensusError::Config(
                "History lengths are too short for the min gas price controller".to_string(),
            ));
        }

        Ok(())
    }

    pub fn with_required_stake(mut self, stake: U256, proofs: usize) -> Self {
        self.required_stake_for_reward_type_2_proof = stake;
        self.required_number_of_proofs_for_reward_type_2_proof = proofs;
        self
    }
}
