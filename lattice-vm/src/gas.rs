//! Gas schedule and per-computation gas metering

use crate::{ComputationError, VmError, VmResult};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Gas costs charged outside opcode execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasSchedule {
    /// Base transaction cost
    pub tx_base: u64,
    /// Cost per zero byte of transaction data
    pub tx_data_zero: u64,
    /// Cost per non-zero byte of transaction data
    pub tx_data_nonzero: u64,
    /// Extra cost of a contract creation
    pub tx_create: u64,
    /// Refund per account destroyed during a computation
    pub refund_selfdestruct: u64,
    /// Cost per byte of deployed code
    pub code_deposit_per_byte: u64,
}

impl Default for GasSchedule {
    fn default() -> Self {
        Self {
            tx_base: 21000,
            tx_data_zero: 4,
            tx_data_nonzero: 68,
            tx_create: 32000,
            refund_selfdestruct: 24000,
            code_deposit_per_byte: 200,
        }
    }
}

impl GasSchedule {
    /// Load gas schedule from TOML configuration
    pub fn from_toml(toml_str: &str) -> VmResult<Self> {
        toml::from_str(toml_str)
            .map_err(|e| VmError::Configuration(format!("Failed to parse gas schedule: {}", e)))
    }

    /// Convert to TOML string
    pub fn to_toml(&self) -> VmResult<String> {
        toml::to_string(self)
            .map_err(|e| VmError::Serialization(format!("Failed to serialize gas schedule: {}", e)))
    }

    /// Gas charged before a transaction's message runs
    pub fn intrinsic_gas(&self, data: &[u8], is_create: bool) -> u64 {
        let zero_bytes = data.iter().filter(|byte| **byte == 0).count() as u64;
        let nonzero_bytes = data.len() as u64 - zero_bytes;
        let create_cost = if is_create { self.tx_create } else { 0 };

        self.tx_base
            .saturating_add(zero_bytes.saturating_mul(self.tx_data_zero))
            .saturating_add(nonzero_bytes.saturating_mul(self.tx_data_nonzero))
            .saturating_add(create_cost)
    }

    pub fn code_deposit_cost(&self, code_len: usize) -> u64 {
        (code_len as u64).saturating_mul(self.code_deposit_per_byte)
    }
}

/// Tracks gas left and the refund counter of one computation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GasMeter {
    start_gas: u64,
    gas_remaining: u64,
    gas_refunded: u64,
}

impl GasMeter {
    pub fn new(start_gas: u64) -> Self {
        Self {
            start_gas,
            gas_remaining: start_gas,
            gas_refunded: 0,
        }
    }

    pub fn start_gas(&self) -> u64 {
        self.start_gas
    }

    pub fn gas_remaining(&self) -> u64 {
        self.gas_remaining
    }

    pub fn gas_refunded(&self) -> u64 {
        self.gas_refunded
    }

    pub fn gas_used(&self) -> u64 {
        self.start_gas - self.gas_remaining
    }

    pub fn consume_gas(&mut self, amount: u64, reason: &str) -> Result<(), ComputationError> {
        if amount > self.gas_remaining {
            return Err(ComputationError::OutOfGas {
                required: amount,
                available: self.gas_remaining,
            });
        }
        self.gas_remaining -= amount;
        trace!(
            "GAS CONSUMPTION: {} - {} -> {} ({})",
            self.gas_remaining + amount,
            amount,
            self.gas_remaining,
            reason
        );
        Ok(())
    }

    /// Give back gas that was consumed but not needed
    pub fn return_gas(&mut self, amount: u64) {
        self.gas_remaining = self.gas_remaining.saturating_add(amount).min(self.start_gas);
    }

    /// Increase the refund counter
    pub fn refund_gas(&mut self, amount: u64) {
        self.gas_refunded = self.gas_refunded.saturating_add(amount);
    }

    /// Burn everything that is left, used when a computation fails
    pub fn exhaust(&mut self) {
        self.gas_remaining = 0;
        self.gas_refunded = 0;
    }
}
