//! Staking rewards
//!
//! Reward type 2 pays interest on the balance a node's wallet has held since
//! its last reward block, scaled by the stake-weighted score peers gave the
//! node. The interest is integrated backwards over the wallet's own chain:
//! every block contributes its balance for the time between its maturity and
//! the maturity of the next block.

use crate::{Clock, ConsensusError, ConsensusParams, ConsensusResult, SystemClock};
use lattice_core::{
    Address, NodeStakingScore, StakeRewardBundle, StakeRewardType1, StakeRewardType2, Timestamp,
    U256,
};
use lattice_db::{ChainDB, DbError};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Scores are expressed in parts per million
const SCORE_SCALE: u64 = 1_000_000;

/// Stake-weighted mean of `(score, stake)` pairs, rounded half up. Falls back
/// to the plain mean when no stake was accepted.
pub fn stake_weighted_average(items: &[(U256, U256)]) -> ConsensusResult<U256> {
    if items.is_empty() {
        return Err(ConsensusError::EmptyScoreList);
    }
    let overflow = || ConsensusError::Overflow("stake weighted average".to_string());

    let mut weighted_sum = U256::zero();
    let mut total_stake = U256::zero();
    for (score, stake) in items {
        weighted_sum = score
            .checked_mul(*stake)
            .and_then(|weighted| weighted_sum.checked_add(weighted))
            .ok_or_else(overflow)?;
        total_stake = total_stake.checked_add(*stake).ok_or_else(overflow)?;
    }

    let (numerator, denominator) = if total_stake.is_zero() {
        let mut sum = U256::zero();
        for (score, _) in items {
            sum = sum.checked_add(*score).ok_or_else(overflow)?;
        }
        (sum, U256::from(items.len()))
    } else {
        (weighted_sum, total_stake)
    };

    // floor((2n + d) / 2d) == round_half_up(n / d)
    let doubled = numerator
        .checked_mul(U256::from(2))
        .and_then(|n| n.checked_add(denominator))
        .ok_or_else(overflow)?;
    Ok(doubled / (denominator * U256::from(2)))
}

/// `trunc(time * balance * rate)` computed exactly from the decimal mantissa
fn interest(time_difference: u64, balance: U256, rate: Decimal) -> ConsensusResult<U256> {
    if rate.is_sign_negative() {
        return Err(ConsensusError::Other(format!(
            "Negative interest rate {}",
            rate
        )));
    }
    let mantissa = U256::from(rate.mantissa().unsigned_abs());
    let scaled = U256::from(time_difference)
        .checked_mul(balance)
        .and_then(|value| value.checked_mul(mantissa))
        .ok_or_else(|| ConsensusError::Overflow("reward amount".to_string()))?;
    Ok(scaled / U256::exp10(rate.scale() as usize))
}

pub struct RewardEngine<C: ChainDB> {
    chaindb: C,
    params: ConsensusParams,
    clock: Arc<dyn Clock>,
}

impl<C: ChainDB> RewardEngine<C> {
    pub fn new(chaindb: C, params: ConsensusParams) -> Self {
        Self::with_clock(chaindb, params, Arc::new(SystemClock))
    }

    pub fn with_clock(chaindb: C, params: ConsensusParams, clock: Arc<dyn Clock>) -> Self {
        Self {
            chaindb,
            params,
            clock,
        }
    }

    pub fn chaindb(&self) -> &C {
        &self.chaindb
    }

    pub fn params(&self) -> &ConsensusParams {
        &self.params
    }

    fn resolve_timestamp(&self, at_timestamp: Option<Timestamp>) -> Timestamp {
        at_timestamp.unwrap_or_else(|| self.clock.now())
    }

    /// Tier multiplier for `balance`, including the early bird bonus
    pub fn masternode_multiplier(&self, balance: U256, at_timestamp: Timestamp) -> Decimal {
        let params = &self.params;
        let multiplier = if balance >= params.masternode_level_3_required_balance {
            params.masternode_level_3_multiplier
        } else if balance >= params.masternode_level_2_required_balance {
            params.masternode_level_2_multiplier
        } else if balance >= params.masternode_level_1_required_balance {
            params.masternode_level_1_multiplier
        } else {
            Decimal::ONE
        };

        if at_timestamp < params.early_bird_bonus_cutoff_timestamp {
            multiplier * params.early_bird_bonus_factor
        } else {
            multiplier
        }
    }

    /// Reward type 2 for the node the scores were given to, with the scores
    /// that were needed to reach the stake and proof thresholds
    pub fn calculate_final_reward_type_2_amount(
        &self,
        node_staking_scores: &[NodeStakingScore],
        at_timestamp: Option<Timestamp>,
    ) -> ConsensusResult<(U256, Vec<NodeStakingScore>)> {
        let first = node_staking_scores
            .first()
            .ok_or(ConsensusError::EmptyScoreList)?;
        let wallet_address = first.recipient_node_wallet_address;
        let at_timestamp = self.resolve_timestamp(at_timestamp);

        let mut sorted = node_staking_scores.to_vec();
        sorted.sort_by(|a, b| b.score.cmp(&a.score));

        let required_stake = self.params.required_stake_for_reward_type_2_proof;
        let required_proofs = self.params.required_number_of_proofs_for_reward_type_2_proof;

        let mut total_stake = U256::zero();
        let mut accepted = Vec::new();
        let mut item_stakes = Vec::new();
        for score in sorted {
            let stake = self.chaindb.get_mature_stake(
                &score.sender,
                self.params.coin_mature_time_for_staking,
                score.timestamp,
            )?;
            item_stakes.push((score.score, stake));
            accepted.push(score);
            total_stake = total_stake.saturating_add(stake);

            if total_stake >= required_stake && accepted.len() >= required_proofs {
                break;
            }
        }

        if total_stake < required_stake || accepted.len() < required_proofs {
            return Err(ConsensusError::NotEnoughProofsOrStakeForRewardType2Proof {
                total_stake,
                required_stake,
                num_proofs: accepted.len(),
                required_proofs,
            });
        }

        let final_score = stake_weighted_average(&item_stakes)?;
        if final_score > U256::from(u64::MAX) {
            return Err(ConsensusError::Overflow(format!(
                "final score {}",
                final_score
            )));
        }
        let fractional_interest = self
            .params
            .reward_type_2_amount_factor
            .checked_mul(Decimal::from(final_score.as_u64()))
            .and_then(|value| value.checked_div(Decimal::from(SCORE_SCALE)))
            .ok_or_else(|| ConsensusError::Overflow("fractional interest".to_string()))?;
        debug!(
            "Calculating type 2 reward for {}: final score {}, fractional interest {}",
            wallet_address, final_score, fractional_interest
        );

        let amount = self.calculate_reward_based_on_fractional_interest(
            &wallet_address,
            fractional_interest,
            Some(at_timestamp),
            true,
        )?;

        if amount.is_zero() {
            Ok((U256::zero(), Vec::new()))
        } else {
            Ok((amount, accepted))
        }
    }

    /// Interest owed to `wallet_address` since its latest reward block.
    /// Zero when the chain has no header to anchor the window to.
    pub fn calculate_reward_based_on_fractional_interest(
        &self,
        wallet_address: &Address,
        fractional_interest: Decimal,
        at_timestamp: Option<Timestamp>,
        include_masternode_bonus: bool,
    ) -> ConsensusResult<U256> {
        let at_timestamp = self.resolve_timestamp(at_timestamp);
        let maturity = self.params.coin_mature_time_for_staking;

        let latest_reward_block_number = self.chaindb.get_latest_reward_block_number(wallet_address)?;
        let since_timestamp = match self
            .chaindb
            .get_canonical_block_header_by_number(latest_reward_block_number, wallet_address)
        {
            Ok(header) => header.timestamp,
            Err(DbError::HeaderNotFound { .. }) => return Ok(U256::zero()),
            Err(e) => return Err(e.into()),
        };
        let head_block_number = self.chaindb.get_canonical_head(wallet_address)?.block_number;

        let mut calc_to_timestamp = at_timestamp;
        let mut amount = U256::zero();
        for block_number in (0..=head_block_number).rev() {
            let header = self
                .chaindb
                .get_canonical_block_header_by_number(block_number, wallet_address)?;
            let mature_timestamp = header.timestamp.saturating_add(maturity);

            if mature_timestamp >= calc_to_timestamp {
                continue;
            }
            if calc_to_timestamp <= since_timestamp {
                break;
            }

            // A block older than the last reward still covers the part of the
            // window between the reward and the next maturity
            let time_difference = if mature_timestamp < since_timestamp {
                calc_to_timestamp - since_timestamp
            } else {
                calc_to_timestamp - mature_timestamp
            };

            let multiplier = if include_masternode_bonus {
                self.masternode_multiplier(header.account_balance, at_timestamp)
            } else {
                Decimal::ONE
            };
            let rate = fractional_interest
                .checked_mul(multiplier)
                .ok_or_else(|| ConsensusError::Overflow("interest rate".to_string()))?;
            let block_amount = interest(time_difference, header.account_balance, rate)?;
            trace!(
                "Block {}: {} s x {} x {} = {}",
                block_number,
                time_difference,
                header.account_balance,
                rate,
                block_amount
            );

            amount = amount
                .checked_add(block_amount)
                .ok_or_else(|| ConsensusError::Overflow("reward amount".to_string()))?;
            calc_to_timestamp = mature_timestamp;
        }

        Ok(amount)
    }

    /// Reward type 1: plain interest without masternode bonus
    pub fn calculate_final_reward_type_1_amount(
        &self,
        wallet_address: &Address,
        at_timestamp: Option<Timestamp>,
    ) -> ConsensusResult<U256> {
        let factor = self.params.reward_type_1_amount_factor;
        if factor.is_zero() {
            return Ok(U256::zero());
        }
        self.calculate_reward_based_on_fractional_interest(
            wallet_address,
            factor,
            at_timestamp,
            false,
        )
    }

    /// Both reward types for `wallet_address`. Scores for other nodes are
    /// ignored; not reaching the proof thresholds yields a zero type 2 reward.
    pub fn calculate_stake_reward_bundle(
        &self,
        wallet_address: &Address,
        node_staking_scores: &[NodeStakingScore],
        at_timestamp: Option<Timestamp>,
    ) -> ConsensusResult<StakeRewardBundle> {
        let at_timestamp = Some(self.resolve_timestamp(at_timestamp));
        let type_1_amount = self.calculate_final_reward_type_1_amount(wallet_address, at_timestamp)?;

        let scores: Vec<NodeStakingScore> = node_staking_scores
            .iter()
            .filter(|score| {
                let matches = score.recipient_node_wallet_address == *wallet_address;
                if !matches {
                    warn!(
                        "Ignoring staking score for {} while rewarding {}",
                        score.recipient_node_wallet_address, wallet_address
                    );
                }
                matches
            })
            .cloned()
            .collect();

        let reward_type_2 = match self.calculate_final_reward_type_2_amount(&scores, at_timestamp) {
            Ok((amount, proof)) => StakeRewardType2 { amount, proof },
            Err(e) if e.is_no_reward_owed() => {
                debug!("No type 2 reward owed to {}: {}", wallet_address, e);
                StakeRewardType2::default()
            }
            Err(e) => return Err(e),
        };

        Ok(StakeRewardBundle::new(
            StakeRewardType1 {
                amount: type_1_amount,
            },
            reward_type_2,
        ))
    }

    /// True once enough time passed since the latest reward block
    pub fn is_reward_block_due(
        &self,
        wallet_address: &Address,
        at_timestamp: Option<Timestamp>,
    ) -> ConsensusResult<bool> {
        let at_timestamp = self.resolve_timestamp(at_timestamp);
        let latest = self.chaindb.get_latest_reward_block_number(wallet_address)?;
        match self
            .chaindb
            .get_canonical_block_header_by_number(latest, wallet_address)
        {
            Ok(header) => Ok(header
                .timestamp
                .saturating_add(self.params.min_time_between_reward_blocks)
                <= at_timestamp),
            Err(DbError::HeaderNotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Scores must have been produced close to the reward block
    pub fn is_score_timestamp_acceptable(
        &self,
        score: &NodeStakingScore,
        at_timestamp: Timestamp,
    ) -> bool {
        score.timestamp.abs_diff(at_timestamp)
            <= self.params.reward_proof_timestamp_variability_allowance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ether;
    use crate::FixedClock;
    use lattice_core::BlockHeader;
    use lattice_db::{KvChainDB, MemoryDB};
    use proptest::prelude::*;

    const AFTER_CUTOFF: Timestamp = 2_000_000_000;

    fn wallet() -> Address {
        Address::new([0xaa; 20])
    }

    fn peer(byte: u8) -> Address {
        Address::new([byte; 20])
    }

    fn import(
        chain: &KvChainDB,
        address: Address,
        blocks: &[(Timestamp, u64)],
        reward_block: Option<u64>,
    ) {
        for (number, (timestamp, balance)) in blocks.iter().enumerate() {
            let header = BlockHeader::new(address, number as u64, *timestamp, U256::from(*balance));
            chain
                .import_header(&header, reward_block == Some(number as u64))
                .unwrap();
        }
    }

    fn params() -> ConsensusParams {
        let mut params = ConsensusParams::default();
        params.reward_type_2_amount_factor = Decimal::ONE;
        params.coin_mature_time_for_staking = 10;
        params.early_bird_bonus_cutoff_timestamp = 0;
        params
    }

    /// Wallet chain worth 298000 at score 100, two peers with stakes 500 and 300
    fn engine(params: ConsensusParams) -> RewardEngine<KvChainDB> {
        let chain = KvChainDB::new(Arc::new(MemoryDB::new()));
        import(&chain, wallet(), &[(1_000, 1_000_000), (2_000, 2_000_000)], None);
        import(&chain, peer(1), &[(0, 500)], None);
        import(&chain, peer(2), &[(0, 300)], None);
        RewardEngine::with_clock(chain, params, Arc::new(FixedClock::new(3_000)))
    }

    fn scores() -> Vec<NodeStakingScore> {
        vec![
            NodeStakingScore::new(peer(2), wallet(), U256::from(50), 2_500),
            NodeStakingScore::new(peer(1), wallet(), U256::from(100), 2_500),
        ]
    }

    #[test]
    fn test_highest_score_alone_meets_threshold() {
        let engine = engine(params().with_required_stake(U256::from(500), 1));
        let (amount, proof) = engine
            .calculate_final_reward_type_2_amount(&scores(), None)
            .unwrap();

        assert_eq!(proof.len(), 1);
        assert_eq!(proof[0].score, U256::from(100));
        // 990 s at 2_000_000 plus 1000 s at 1_000_000, at 100 ppm
        assert_eq!(amount, U256::from(298_000));
    }

    #[test]
    fn test_both_scores_needed() {
        let engine = engine(params().with_required_stake(U256::from(800), 2));
        let (amount, proof) = engine
            .calculate_final_reward_type_2_amount(&scores(), Some(3_000))
            .unwrap();

        assert_eq!(proof.len(), 2);
        // (100 * 500 + 50 * 300) / 800 = 81.25 -> 81 ppm
        assert_eq!(amount, U256::from(160_380 + 81_000));
    }

    #[test]
    fn test_not_enough_stake() {
        let engine = engine(params().with_required_stake(U256::from(10_000), 1));
        let err = engine
            .calculate_final_reward_type_2_amount(&scores(), Some(3_000))
            .unwrap_err();
        assert!(matches!(
            err,
            ConsensusError::NotEnoughProofsOrStakeForRewardType2Proof { num_proofs: 2, .. }
        ));
        assert!(err.is_no_reward_owed());

        assert!(matches!(
            engine.calculate_final_reward_type_2_amount(&[], None),
            Err(ConsensusError::EmptyScoreList)
        ));
    }

    #[test]
    fn test_window_starts_at_latest_reward_block() {
        let chain = KvChainDB::new(Arc::new(MemoryDB::new()));
        import(
            &chain,
            wallet(),
            &[(1_000, 100), (2_000, 200), (2_005, 300)],
            Some(1),
        );
        let engine = RewardEngine::new(chain, params());

        let amount = engine
            .calculate_reward_based_on_fractional_interest(&wallet(), Decimal::ONE, Some(3_000), false)
            .unwrap();
        // 985 s x 300 + 5 s x 200 + 10 s x 100, the last clipped at the reward block
        assert_eq!(amount, U256::from(295_500 + 1_000 + 1_000));
    }

    #[test]
    fn test_no_reward_header_means_no_reward() {
        let engine = engine(params());
        let amount = engine
            .calculate_reward_based_on_fractional_interest(&peer(9), Decimal::ONE, Some(3_000), true)
            .unwrap();
        assert!(amount.is_zero());
        assert!(!engine.is_reward_block_due(&peer(9), Some(3_000)).unwrap());
    }

    #[test]
    fn test_masternode_tier_boundaries() {
        let engine = engine(ConsensusParams::default());
        let params = ConsensusParams::default();

        assert_eq!(
            engine.masternode_multiplier(ether(75_000), AFTER_CUTOFF),
            params.masternode_level_2_multiplier
        );
        assert_eq!(
            engine.masternode_multiplier(ether(75_000) - U256::one(), AFTER_CUTOFF),
            params.masternode_level_1_multiplier
        );
        assert_eq!(
            engine.masternode_multiplier(ether(150_000), AFTER_CUTOFF),
            params.masternode_level_3_multiplier
        );
        assert_eq!(
            engine.masternode_multiplier(ether(1), AFTER_CUTOFF),
            Decimal::ONE
        );
        assert_eq!(
            engine.masternode_multiplier(ether(75_000), 1_500_000_000),
            Decimal::from(10)
        );
    }

    #[test]
    fn test_stake_weighted_average_rounds_half_up() {
        let average = stake_weighted_average(&[
            (U256::from(1), U256::from(1)),
            (U256::from(2), U256::from(1)),
        ])
        .unwrap();
        assert_eq!(average, U256::from(2));

        let unstaked = stake_weighted_average(&[
            (U256::from(10), U256::zero()),
            (U256::from(20), U256::zero()),
        ])
        .unwrap();
        assert_eq!(unstaked, U256::from(15));
    }

    #[test]
    fn test_bundle_without_enough_proofs() {
        let engine = engine(params().with_required_stake(U256::from(10_000), 1));
        let bundle = engine
            .calculate_stake_reward_bundle(&wallet(), &scores(), Some(3_000))
            .unwrap();
        assert_eq!(bundle, StakeRewardBundle::default());
    }

    #[test]
    fn test_bundle_ignores_scores_for_other_nodes() {
        let engine = engine(params().with_required_stake(U256::from(500), 1));
        let mut scores = scores();
        scores.push(NodeStakingScore::new(peer(3), peer(9), U256::from(900), 2_500));

        let bundle = engine
            .calculate_stake_reward_bundle(&wallet(), &scores, Some(3_000))
            .unwrap();
        assert!(bundle.reward_type_1.amount.is_zero());
        assert_eq!(bundle.total_amount(), U256::from(298_000));
        assert_eq!(bundle.reward_type_2.proof.len(), 1);
    }

    #[test]
    fn test_reward_block_timing() {
        let engine = engine(ConsensusParams::default());
        // Genesis at 1_000 anchors the first reward window
        assert!(!engine.is_reward_block_due(&wallet(), Some(1_000 + 86_399)).unwrap());
        assert!(engine.is_reward_block_due(&wallet(), Some(1_000 + 86_400)).unwrap());

        let score = NodeStakingScore::new(peer(1), wallet(), U256::from(1), 1_000);
        assert!(engine.is_score_timestamp_acceptable(&score, 1_300));
        assert!(!engine.is_score_timestamp_acceptable(&score, 1_301));
    }

    proptest! {
        #[test]
        fn prop_weighted_average_within_score_bounds(
            items in proptest::collection::vec((0u64..=1_000_000, 0u64..1_000_000_000), 1..20)
        ) {
            let pairs: Vec<(U256, U256)> = items
                .iter()
                .map(|(score, stake)| (U256::from(*score), U256::from(*stake)))
                .collect();
            let average = stake_weighted_average(&pairs).unwrap();
            let min = items.iter().map(|(score, _)| *score).min().unwrap();
            let max = items.iter().map(|(score, _)| *score).max().unwrap();
            prop_assert!(average >= U256::from(min));
            prop_assert!(average <= U256::from(max));
        }
    }
}
