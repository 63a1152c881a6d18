//! Transaction execution for the block-lattice ledger
//!
//! This crate provides the execution environment of a single chain:
//! the journaled account store, messages and computations, the
//! fork-indexed strategy table, the transaction executor state machine and
//! the per-block VM state that ties them together.

pub mod account;
pub mod computation;
pub mod error;
pub mod execution_context;
pub mod executor;
pub mod fork;
pub mod gas;
pub mod message;
pub mod state;
pub mod transaction_context;

pub use account::{Account, AccountDB, BalanceDelta};
pub use computation::{Computation, ComputationEngine, TransferEngine};
pub use error::{ComputationError, StateError, ValidationError, VmError, VmResult};
pub use execution_context::ExecutionContext;
pub use executor::{ExecutionPhase, ProcessedTransaction, TransactionExecutor};
pub use fork::{BosonMessageBuilder, ForkConfig, ForkTable, MessageBuilder, PhotonMessageBuilder};
pub use gas::{GasMeter, GasSchedule};
pub use message::{Message, MessageParams, STACK_DEPTH_LIMIT};
pub use state::VmState;
pub use transaction_context::{TransactionContext, TransactionKind};
