//! Staking rewards and network minimum gas price
//!
//! This crate computes the stake reward bundles nodes claim in reward blocks
//! and runs the controller that adapts the minimum gas price to the observed
//! transaction rate.

pub mod clock;
pub mod config;
pub mod error;
pub mod min_gas;
pub mod reward;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{ether, ConsensusParams};
pub use error::{ConsensusError, ConsensusResult};
pub use min_gas::{
    MinGasDB, MinGasPriceController, MIN_GAS_PRICE_BUCKET_SECONDS,
    TX_PER_DECISECOND_BUCKET_SECONDS,
};
pub use reward::{stake_weighted_average, RewardEngine};
