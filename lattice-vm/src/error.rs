//! VM error types

use lattice_core::{Address, CoreError, Hash, Nonce, U256};
use lattice_db::DbError;
use thiserror::Error;

/// Transaction rejected before any state was touched
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Transaction is not signed")]
    MissingSignature,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid signature S value")]
    HighS,

    #[error("Invalid nonce: expected {expected}, got {actual}")]
    InvalidNonce { expected: Nonce, actual: Nonce },

    #[error("Insufficient gas: intrinsic cost {intrinsic}, supplied {supplied}")]
    IntrinsicGasTooLow { intrinsic: u64, supplied: u64 },

    #[error("Transaction gas {gas} exceeds block gas limit {gas_limit}")]
    GasLimitExceeded { gas: u64, gas_limit: u64 },

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: U256, available: U256 },

    #[error("Transaction for chain {expected} executed on chain {actual}")]
    WrongChain { expected: Address, actual: Address },

    #[error("Send transaction {0} is not receivable on this chain")]
    NotReceivable(Hash),

    #[error("Receive transaction refers to send {expected}, got {actual}")]
    SendHashMismatch { expected: Hash, actual: Hash },

    #[error("Receive transaction has wrong refund flag")]
    RefundFlagMismatch,

    #[error("Cannot apply a receive and a refund transaction together")]
    ReceiveAndRefund,

    #[error("Computation call origin is not supported by this fork")]
    UnsupportedCallOrigin,

    #[error("{0}")]
    Other(String),
}

/// Failure while mutating account state
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("Balance of {address} would become negative: balance {balance}, debit {amount}")]
    NegativeBalance {
        address: Address,
        balance: U256,
        amount: U256,
    },

    #[error("Balance of {0} overflows")]
    BalanceOverflow(Address),

    #[error("Nonce of {0} overflows")]
    NonceOverflow(Address),

    #[error("Account not found: {0}")]
    AccountNotFound(Address),

    #[error("No account stored under hash {0}")]
    AccountHashNotFound(Hash),
}

/// Failure inside a computation. Recorded on the computation instead of
/// aborting the transaction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ComputationError {
    #[error("Out of gas: required {required}, available {available}")]
    OutOfGas { required: u64, available: u64 },

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: U256, available: U256 },

    #[error("Contract already exists at {0}")]
    ContractCollision(Address),

    #[error("Static call cannot transfer value")]
    WriteProtection,

    #[error("Execution reverted: {0}")]
    Revert(String),
}

/// VM error type
#[derive(Error, Debug)]
pub enum VmError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Missing fork binding or invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Database error: {0}")]
    Db(#[from] DbError),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("VM error: {0}")]
    Other(String),
}

impl VmError {
    pub fn is_validation(&self) -> bool {
        matches!(self, VmError::Validation(_))
    }
}

impl From<anyhow::Error> for VmError {
    fn from(err: anyhow::Error) -> Self {
        VmError::Other(err.to_string())
    }
}

/// Result type for VM operations
pub type VmResult<T> = Result<T, VmError>;
