//! Core ledger data structures
//!
//! This crate provides the fundamental building blocks shared by every layer
//! of the block-lattice ledger:
//! - Basic types (Hash, Address, U256, BlockNumber, etc.)
//! - Send and receive transactions with signing and sender recovery
//! - Per-chain block headers
//! - Staking score and reward bundle types consumed by consensus

pub mod block;
pub mod error;
pub mod staking;
pub mod transaction;
pub mod types;

// Re-export commonly used types
pub use block::*;
pub use error::*;
pub use staking::*;
pub use transaction::*;
pub use types::*;
