//! Adaptive minimum gas price
//!
//! Three time-bucketed histories are kept in the key-value store:
//! the network minimum gas price and the network transactions-per-centisecond
//! capability in 100 second buckets, and the number of imported transactions
//! in 10 second buckets. A PID controller moves the minimum gas price so the
//! observed transaction rate approaches the wanted rate.

use crate::{Clock, ConsensusError, ConsensusParams, ConsensusResult, SystemClock};
use lattice_core::Timestamp;
use lattice_db::{Schema, SharedDatabase};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Bucket width of the min gas price and TPC capability histories
pub const MIN_GAS_PRICE_BUCKET_SECONDS: u64 = 100;
/// Bucket width of the transactions per decisecond history
pub const TX_PER_DECISECOND_BUCKET_SECONDS: u64 = 10;

pub type MinGasPriceHistory = Vec<(Timestamp, Decimal)>;
pub type CountHistory = Vec<(Timestamp, u64)>;

fn bucket(timestamp: Timestamp, width: u64) -> Timestamp {
    timestamp - timestamp % width
}

/// Persisted histories backing the min gas price controller
pub struct MinGasDB {
    db: SharedDatabase,
    clock: Arc<dyn Clock>,
    historical_min_gas_price_length: usize,
    historical_tx_per_decisecond_length: usize,
}

impl MinGasDB {
    pub fn new(db: SharedDatabase, params: &ConsensusParams) -> Self {
        Self::with_clock(db, params, Arc::new(SystemClock))
    }

    pub fn with_clock(db: SharedDatabase, params: &ConsensusParams, clock: Arc<dyn Clock>) -> Self {
        Self {
            db,
            clock,
            historical_min_gas_price_length: params.historical_min_gas_price_length,
            historical_tx_per_decisecond_length: params.historical_tx_per_decisecond_length,
        }
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    fn load_series<T: DeserializeOwned>(&self, key: &[u8]) -> ConsensusResult<Vec<(Timestamp, T)>> {
        match self.db.get(key)? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Vec::new()),
        }
    }

    /// Keeps only the newest `length` buckets
    fn save_series<T: Serialize>(
        &self,
        key: &[u8],
        history: &[(Timestamp, T)],
        length: usize,
    ) -> ConsensusResult<()> {
        let start = history.len().saturating_sub(length);
        let bytes = serde_json::to_vec(&history[start..])?;
        self.db.set(key, &bytes)?;
        Ok(())
    }

    //
    // Min gas price
    //

    pub fn save_historical_minimum_gas_price(&self, history: &[(Timestamp, Decimal)]) -> ConsensusResult<()> {
        self.save_series(
            &Schema::historical_minimum_gas_price_lookup_key(),
            history,
            self.historical_min_gas_price_length,
        )
    }

    /// Stored history, with values truncated to integers when `return_int`
    pub fn load_historical_minimum_gas_price(&self, return_int: bool) -> ConsensusResult<MinGasPriceHistory> {
        let history: MinGasPriceHistory =
            self.load_series(&Schema::historical_minimum_gas_price_lookup_key())?;
        if return_int {
            Ok(history
                .into_iter()
                .map(|(timestamp, price)| (timestamp, price.trunc()))
                .collect())
        } else {
            Ok(history)
        }
    }

    /// Replace the current 100 s bucket and anything after it
    pub fn append_historical_min_gas_price_now(&self, min_gas_price: Decimal) -> ConsensusResult<()> {
        let current = bucket(self.now(), MIN_GAS_PRICE_BUCKET_SECONDS);
        let mut history = self.load_historical_minimum_gas_price(false)?;
        history.retain(|(timestamp, _)| *timestamp < current);
        history.push((current, min_gas_price));
        debug!("Min gas price for bucket {}: {}", current, min_gas_price);
        self.save_historical_minimum_gas_price(&history)
    }

    /// Newest min gas price, 1 if none was recorded
    pub fn get_current_min_gas_price(&self) -> ConsensusResult<Decimal> {
        Ok(self
            .load_historical_minimum_gas_price(false)?
            .last()
            .map(|(_, price)| *price)
            .unwrap_or(Decimal::ONE))
    }

    //
    // Network TPC capability
    //

    pub fn save_historical_network_tpc_capability(&self, history: &[(Timestamp, u64)]) -> ConsensusResult<()> {
        self.save_series(
            &Schema::historical_network_tpc_capability_lookup_key(),
            history,
            self.historical_min_gas_price_length,
        )
    }

    pub fn load_historical_network_tpc_capability(&self) -> ConsensusResult<CountHistory> {
        self.load_series(&Schema::historical_network_tpc_capability_lookup_key())
    }

    /// Replace the current 100 s bucket and anything after it
    pub fn append_historical_network_tpc_capability_now(&self, tpc_capability: u64) -> ConsensusResult<()> {
        let current = bucket(self.now(), MIN_GAS_PRICE_BUCKET_SECONDS);
        let mut history = self.load_historical_network_tpc_capability()?;
        history.retain(|(timestamp, _)| *timestamp < current);
        history.push((current, tpc_capability));
        self.save_historical_network_tpc_capability(&history)
    }

    //
    // Transactions per decisecond
    //

    pub fn save_historical_tx_per_decisecond(&self, history: &[(Timestamp, u64)]) -> ConsensusResult<()> {
        self.save_series(
            &Schema::historical_tx_per_decisecond_lookup_key(),
            history,
            self.historical_tx_per_decisecond_length,
        )
    }

    pub fn load_historical_tx_per_decisecond(&self) -> ConsensusResult<CountHistory> {
        self.load_series(&Schema::historical_tx_per_decisecond_lookup_key())
    }

    /// Add imported transactions to the current 10 s bucket. A head bucket
    /// newer than the clock absorbs the count.
    pub fn append_transaction_count_to_historical_tx_per_decisecond_from_imported(
        &self,
        count: u64,
    ) -> ConsensusResult<()> {
        let current = bucket(self.now(), TX_PER_DECISECOND_BUCKET_SECONDS);
        let mut history = self.load_historical_tx_per_decisecond()?;
        match history.last_mut() {
            Some((timestamp, value)) if *timestamp >= current => {
                *value = value.saturating_add(count);
            }
            _ => history.push((current, count)),
        }
        self.save_historical_tx_per_decisecond(&history)
    }

    /// `[second to last, last]` of the completed buckets, zero padded
    pub fn get_tpd_tail(&self) -> ConsensusResult<[u64; 2]> {
        let current = bucket(self.now(), TX_PER_DECISECOND_BUCKET_SECONDS);
        let history = self.load_historical_tx_per_decisecond()?;
        let completed: Vec<u64> = history
            .iter()
            .filter(|(timestamp, _)| *timestamp < current)
            .map(|(_, value)| *value)
            .collect();

        Ok(match completed.as_slice() {
            [] => [0, 0],
            [last] => [0, *last],
            [.., second_to_last, last] => [*second_to_last, *last],
        })
    }

    //
    // PID gate
    //

    pub fn save_now_as_last_min_gas_price_pid_update(&self) -> ConsensusResult<()> {
        let bytes = serde_json::to_vec(&self.now())?;
        self.db
            .set(&Schema::min_gas_price_pid_last_update_lookup_key(), &bytes)?;
        Ok(())
    }

    /// Seconds since the last controller step, or since the epoch if it never ran
    pub fn get_time_since_last_min_gas_price_pid_update(&self) -> ConsensusResult<u64> {
        let last_update: Timestamp =
            match self.db.get(&Schema::min_gas_price_pid_last_update_lookup_key())? {
                Some(bytes) => serde_json::from_slice(&bytes)?,
                None => 0,
            };
        Ok(self.now().saturating_sub(last_update))
    }

    /// Fill both 100 s histories with constant values reaching back over
    /// their whole length
    pub fn initialize_historical_minimum_gas_price_at_genesis(
        &self,
        min_gas_price: Decimal,
        tpc_capability: u64,
    ) -> ConsensusResult<()> {
        let current = bucket(self.now(), MIN_GAS_PRICE_BUCKET_SECONDS);
        let length = self.historical_min_gas_price_length as u64;
        let timestamps: Vec<Timestamp> = (0..length)
            .rev()
            .map(|age| current.saturating_sub(age * MIN_GAS_PRICE_BUCKET_SECONDS))
            .collect();

        let prices: MinGasPriceHistory = timestamps.iter().map(|t| (*t, min_gas_price)).collect();
        let capabilities: CountHistory = timestamps.iter().map(|t| (*t, tpc_capability)).collect();
        self.save_historical_minimum_gas_price(&prices)?;
        self.save_historical_network_tpc_capability(&capabilities)?;

        info!(
            "Initialized min gas price history at {} with price {} and TPC capability {}",
            current, min_gas_price, tpc_capability
        );
        Ok(())
    }
}

/// Moves the minimum gas price towards the wanted transaction rate
pub struct MinGasPriceController {
    min_gas_db: MinGasDB,
    kp: Decimal,
    ki: Decimal,
    interval: u64,
}

impl MinGasPriceController {
    pub fn new(min_gas_db: MinGasDB, params: &ConsensusParams) -> Self {
        Self {
            min_gas_db,
            kp: params.min_gas_price_pid_kp,
            ki: params.min_gas_price_pid_ki,
            interval: params.min_gas_price_pid_interval,
        }
    }

    pub fn min_gas_db(&self) -> &MinGasDB {
        &self.min_gas_db
    }

    /// Incremental PID step on the normalized deviation from `wanted_txpd`:
    /// `last * (1 + ki * e_k + kp * (e_k - e_k-1))`, never below 1
    pub fn calculate_next_min_gas_price_pid(
        &self,
        tpd_tail: [u64; 2],
        last_min_gas_price: Decimal,
        wanted_txpd: u64,
    ) -> ConsensusResult<Decimal> {
        if wanted_txpd == 0 {
            return Err(ConsensusError::Config(
                "Wanted transactions per decisecond must be greater than 0".to_string(),
            ));
        }
        let overflow = || ConsensusError::Overflow("min gas price".to_string());
        let wanted = Decimal::from(wanted_txpd);
        let error = |observed: u64| (Decimal::from(observed) - wanted) / wanted;

        let previous_error = error(tpd_tail[0]);
        let current_error = error(tpd_tail[1]);

        let integral = self.ki.checked_mul(current_error).ok_or_else(overflow)?;
        let proportional = self
            .kp
            .checked_mul(current_error - previous_error)
            .ok_or_else(overflow)?;
        let next = last_min_gas_price
            .checked_mul(Decimal::ONE + integral + proportional)
            .ok_or_else(overflow)?;

        Ok(next.max(Decimal::ONE))
    }

    /// Run one controller step if the last one is at least an interval old.
    /// Returns the new price when a step ran.
    pub fn update_min_gas_price_if_due(&self, wanted_txpd: u64) -> ConsensusResult<Option<Decimal>> {
        let since_last = self.min_gas_db.get_time_since_last_min_gas_price_pid_update()?;
        if since_last < self.interval {
            return Ok(None);
        }

        let tail = self.min_gas_db.get_tpd_tail()?;
        let last_price = self.min_gas_db.get_current_min_gas_price()?;
        let next_price = self.calculate_next_min_gas_price_pid(tail, last_price, wanted_txpd)?;

        self.min_gas_db.append_historical_min_gas_price_now(next_price)?;
        self.min_gas_db.save_now_as_last_min_gas_price_pid_update()?;
        info!(
            "Min gas price {} -> {} (tx per decisecond {:?}, wanted {})",
            last_price, next_price, tail, wanted_txpd
        );
        Ok(Some(next_price))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FixedClock;
    use lattice_db::MemoryDB;

    fn setup(now: Timestamp) -> (MinGasDB, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(now));
        let db = MinGasDB::with_clock(
            Arc::new(MemoryDB::new()),
            &ConsensusParams::default(),
            clock.clone(),
        );
        (db, clock)
    }

    #[test]
    fn test_min_gas_price_append_overwrites_bucket() {
        let (db, clock) = setup(1_050);
        db.append_historical_min_gas_price_now(Decimal::from(5)).unwrap();
        db.append_historical_min_gas_price_now(Decimal::from(7)).unwrap();
        assert_eq!(
            db.load_historical_minimum_gas_price(true).unwrap(),
            vec![(1_000, Decimal::from(7))]
        );

        clock.advance(100);
        db.append_historical_min_gas_price_now(Decimal::from(9)).unwrap();
        assert_eq!(db.load_historical_minimum_gas_price(true).unwrap().len(), 2);

        // Clock moved back: newer buckets are dropped
        clock.set(1_020);
        db.append_historical_min_gas_price_now(Decimal::from(3)).unwrap();
        assert_eq!(
            db.load_historical_minimum_gas_price(true).unwrap(),
            vec![(1_000, Decimal::from(3))]
        );
    }

    #[test]
    fn test_min_gas_price_decimal_values() {
        let (db, _) = setup(1_000);
        db.append_historical_min_gas_price_now(Decimal::new(17, 1)).unwrap();
        assert_eq!(
            db.load_historical_minimum_gas_price(false).unwrap(),
            vec![(1_000, Decimal::new(17, 1))]
        );
        assert_eq!(
            db.load_historical_minimum_gas_price(true).unwrap(),
            vec![(1_000, Decimal::ONE)]
        );
        assert_eq!(db.get_current_min_gas_price().unwrap(), Decimal::new(17, 1));
    }

    #[test]
    fn test_tpd_append_accumulates() {
        let (db, clock) = setup(1_005);
        db.append_transaction_count_to_historical_tx_per_decisecond_from_imported(3)
            .unwrap();
        db.append_transaction_count_to_historical_tx_per_decisecond_from_imported(4)
            .unwrap();
        assert_eq!(db.load_historical_tx_per_decisecond().unwrap(), vec![(1_000, 7)]);

        // Head newer than the clock absorbs the count
        clock.set(995);
        db.append_transaction_count_to_historical_tx_per_decisecond_from_imported(1)
            .unwrap();
        assert_eq!(db.load_historical_tx_per_decisecond().unwrap(), vec![(1_000, 8)]);

        clock.set(1_012);
        db.append_transaction_count_to_historical_tx_per_decisecond_from_imported(2)
            .unwrap();
        assert_eq!(
            db.load_historical_tx_per_decisecond().unwrap(),
            vec![(1_000, 8), (1_010, 2)]
        );
    }

    #[test]
    fn test_tpd_tail() {
        let (db, clock) = setup(1_005);
        assert_eq!(db.get_tpd_tail().unwrap(), [0, 0]);

        db.save_historical_tx_per_decisecond(&[(1_000, 3)]).unwrap();
        assert_eq!(db.get_tpd_tail().unwrap(), [0, 0]);

        db.save_historical_tx_per_decisecond(&[(990, 2), (1_000, 3)])
            .unwrap();
        assert_eq!(db.get_tpd_tail().unwrap(), [0, 2]);

        db.save_historical_tx_per_decisecond(&[(980, 1), (990, 2), (1_000, 3)])
            .unwrap();
        assert_eq!(db.get_tpd_tail().unwrap(), [1, 2]);

        clock.advance(10);
        assert_eq!(db.get_tpd_tail().unwrap(), [2, 3]);
    }

    #[test]
    fn test_tpd_tail_ignores_bucket_still_filling() {
        let (db, clock) = setup(1_003);
        db.save_historical_tx_per_decisecond(&[(990, 10)]).unwrap();
        db.append_transaction_count_to_historical_tx_per_decisecond_from_imported(10)
            .unwrap();
        db.append_transaction_count_to_historical_tx_per_decisecond_from_imported(10)
            .unwrap();
        assert_eq!(
            db.load_historical_tx_per_decisecond().unwrap(),
            vec![(990, 10), (1_000, 20)]
        );
        assert_eq!(db.get_tpd_tail().unwrap(), [0, 10]);

        // Visible once the bucket closes
        clock.set(1_010);
        assert_eq!(db.get_tpd_tail().unwrap(), [10, 20]);
    }

    #[test]
    fn test_histories_are_trimmed() {
        let (db, clock) = setup(0);
        for _ in 0..70 {
            db.append_transaction_count_to_historical_tx_per_decisecond_from_imported(1)
                .unwrap();
            db.append_historical_network_tpc_capability_now(5).unwrap();
            clock.advance(100);
        }
        let params = ConsensusParams::default();
        assert_eq!(
            db.load_historical_tx_per_decisecond().unwrap().len(),
            params.historical_tx_per_decisecond_length
        );
        let capabilities = db.load_historical_network_tpc_capability().unwrap();
        assert_eq!(capabilities.len(), params.historical_min_gas_price_length);
        assert_eq!(capabilities.last(), Some(&(6_900, 5)));
    }

    #[test]
    fn test_initialize_at_genesis() {
        let (db, _) = setup(10_050);
        db.initialize_historical_minimum_gas_price_at_genesis(Decimal::ONE, 40)
            .unwrap();

        let prices = db.load_historical_minimum_gas_price(true).unwrap();
        let capabilities = db.load_historical_network_tpc_capability().unwrap();
        assert_eq!(prices.len(), 60);
        assert_eq!(capabilities.len(), 60);
        assert!(prices.iter().all(|(_, price)| *price == Decimal::ONE));
        assert!(capabilities.iter().all(|(_, cap)| *cap == 40));
        assert_eq!(prices.last().map(|(t, _)| *t), Some(10_000));
        assert_eq!(prices.first().map(|(t, _)| *t), Some(10_000 - 59 * 100));
    }

    #[test]
    fn test_pid_step() {
        let (db, _) = setup(0);
        let controller = MinGasPriceController::new(db, &ConsensusParams::default());

        // Idle network never drops below 1
        assert_eq!(
            controller
                .calculate_next_min_gas_price_pid([0, 0], Decimal::ONE, 1)
                .unwrap(),
            Decimal::ONE
        );
        // e_k = 2, e_k-1 = 0: 10 * (1 + 0.1 * 2 + 0.5 * 2)
        assert_eq!(
            controller
                .calculate_next_min_gas_price_pid([1, 3], Decimal::from(10), 1)
                .unwrap(),
            Decimal::from(22)
        );
        // On target keeps the price
        assert_eq!(
            controller
                .calculate_next_min_gas_price_pid([4, 4], Decimal::from(7), 4)
                .unwrap(),
            Decimal::from(7)
        );
        assert!(matches!(
            controller.calculate_next_min_gas_price_pid([1, 1], Decimal::ONE, 0),
            Err(ConsensusError::Config(_))
        ));
    }

    #[test]
    fn test_update_is_gated_by_interval() {
        let (db, clock) = setup(1_000);
        db.save_historical_tx_per_decisecond(&[(980, 1), (990, 3)])
            .unwrap();
        let controller = MinGasPriceController::new(db, &ConsensusParams::default());

        assert_eq!(
            controller.update_min_gas_price_if_due(1).unwrap(),
            Some(Decimal::new(22, 1))
        );
        assert_eq!(controller.update_min_gas_price_if_due(1).unwrap(), None);

        clock.advance(9);
        assert_eq!(controller.update_min_gas_price_if_due(1).unwrap(), None);

        clock.advance(1);
        assert!(controller.update_min_gas_price_if_due(1).unwrap().is_some());
        assert_eq!(
            controller
                .min_gas_db()
                .load_historical_minimum_gas_price(false)
                .unwrap()
                .len(),
            1
        );
    }
}
