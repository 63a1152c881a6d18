//! Ledger database layer
//!
//! This crate provides the storage primitives the VM and consensus layers
//! build on: a permanent key-value store abstraction, a journaled overlay with
//! nested checkpoints, the logical key layout, and per-wallet chain header
//! access.

pub mod chain;
pub mod error;
pub mod journal;
pub mod memory;
pub mod schema;
pub mod traits;

pub use chain::{ChainDB, KvChainDB};
pub use error::{DbError, DbResult};
pub use journal::{CheckpointId, JournalDB};
pub use memory::MemoryDB;
pub use schema::Schema;
pub use traits::{KeyValueDB, Operation, SharedDatabase, WriteBatch};
