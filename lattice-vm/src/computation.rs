//! Computation results and the engine seam
//!
//! Opcode interpretation lives behind [`ComputationEngine`]. The executor only
//! relies on the outcome recorded in a [`Computation`]: gas left, the refund
//! counter, accounts marked for deletion, the error (if any), output bytes and
//! the nested call messages the computation wants to send.

use crate::{
    AccountDB, BalanceDelta, ComputationError, ExecutionContext, GasMeter, GasSchedule, Message,
    TransactionContext, VmResult,
};
use lattice_core::Address;
use tracing::debug;

/// Outcome of running a [`Message`]
#[derive(Debug, Clone)]
pub struct Computation {
    msg: Message,
    transaction_context: TransactionContext,
    gas_meter: GasMeter,
    accounts_for_deletion: Vec<Address>,
    error: Option<ComputationError>,
    output: Vec<u8>,
    external_call_messages: Vec<Message>,
}

impl Computation {
    pub fn new(msg: Message, transaction_context: TransactionContext) -> Self {
        let gas_meter = GasMeter::new(msg.gas());
        Self {
            msg,
            transaction_context,
            gas_meter,
            accounts_for_deletion: Vec::new(),
            error: None,
            output: Vec::new(),
            external_call_messages: Vec::new(),
        }
    }

    pub fn msg(&self) -> &Message {
        &self.msg
    }

    pub fn transaction_context(&self) -> &TransactionContext {
        &self.transaction_context
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn error(&self) -> Option<&ComputationError> {
        self.error.as_ref()
    }

    /// Record a failure; all remaining gas is burned
    pub fn set_error(&mut self, error: ComputationError) {
        debug!("Computation failed: {}", error);
        self.gas_meter.exhaust();
        self.error = Some(error);
    }

    /// Mark all gas as spent without recording an error
    pub fn exhaust_gas(&mut self) {
        self.gas_meter.exhaust();
    }

    pub fn output(&self) -> &[u8] {
        &self.output
    }

    pub fn set_output(&mut self, output: Vec<u8>) {
        self.output = output;
    }

    pub fn consume_gas(&mut self, amount: u64, reason: &str) -> Result<(), ComputationError> {
        self.gas_meter.consume_gas(amount, reason)
    }

    pub fn return_gas(&mut self, amount: u64) {
        self.gas_meter.return_gas(amount);
    }

    /// Add to the refund counter
    pub fn refund_gas(&mut self, amount: u64) {
        self.gas_meter.refund_gas(amount);
    }

    pub fn get_gas_remaining(&self) -> u64 {
        if self.is_error() {
            0
        } else {
            self.gas_meter.gas_remaining()
        }
    }

    /// Refund counter
    pub fn get_gas_refund(&self) -> u64 {
        if self.is_error() {
            0
        } else {
            self.gas_meter.gas_refunded()
        }
    }

    pub fn get_gas_used(&self) -> u64 {
        self.msg.gas() - self.get_gas_remaining()
    }

    /// Gas owed back: what is left plus the refund counter, capped at half
    /// of the gas used
    pub fn get_gas_remaining_including_refunds(&self) -> u64 {
        let refund = self.get_gas_refund().min(self.get_gas_used() / 2);
        self.get_gas_remaining().saturating_add(refund)
    }

    pub fn register_account_for_deletion(&mut self, address: Address) {
        if !self.accounts_for_deletion.contains(&address) {
            self.accounts_for_deletion.push(address);
        }
    }

    pub fn get_accounts_for_deletion(&self) -> &[Address] {
        &self.accounts_for_deletion
    }

    pub fn add_external_call_message(&mut self, message: Message) {
        self.external_call_messages.push(message);
    }

    pub fn external_call_messages(&self) -> &[Message] {
        &self.external_call_messages
    }

    pub fn has_external_call_messages(&self) -> bool {
        !self.external_call_messages.is_empty()
    }
}

/// Interpreter that turns a message into a computation
pub trait ComputationEngine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run `message` against `accounts`. Failures of the code itself are
    /// recorded on the returned computation; `Err` is reserved for storage
    /// faults.
    fn apply_message(
        &self,
        accounts: &mut AccountDB,
        message: Message,
        transaction_context: &TransactionContext,
        execution_context: &ExecutionContext,
        gas_schedule: &GasSchedule,
    ) -> VmResult<Computation>;
}

/// Engine without opcode interpretation: moves value when the message asks
/// for it and deploys the payload of create messages as code
#[derive(Debug, Default, Clone, Copy)]
pub struct TransferEngine;

impl TransferEngine {
    fn transfer_value(
        &self,
        accounts: &mut AccountDB,
        computation: &mut Computation,
    ) -> VmResult<()> {
        let message = computation.msg().clone();
        if !message.should_transfer_value() || message.value().is_zero() {
            return Ok(());
        }
        if message.is_static() {
            computation.set_error(ComputationError::WriteProtection);
            return Ok(());
        }

        let available = accounts.get_balance(&message.sender())?;
        if available < message.value() {
            computation.set_error(ComputationError::InsufficientFunds {
                required: message.value(),
                available,
            });
            return Ok(());
        }

        accounts.delta_balance(&message.sender(), BalanceDelta::Decrease(message.value()))?;
        accounts.delta_balance(
            &message.resolved_to(),
            BalanceDelta::Increase(message.value()),
        )?;
        Ok(())
    }

    fn deploy_code(
        &self,
        accounts: &mut AccountDB,
        computation: &mut Computation,
        gas_schedule: &GasSchedule,
    ) -> VmResult<()> {
        let contract = computation.msg().resolved_to();
        if !accounts.get_code(&contract)?.is_empty() {
            computation.set_error(ComputationError::ContractCollision(contract));
            return Ok(());
        }

        let code = computation.msg().data().to_vec();
        let cost = gas_schedule.code_deposit_cost(code.len());
        if let Err(error) = computation.consume_gas(cost, "code deposit") {
            computation.set_error(error);
            return Ok(());
        }

        debug!("Deploying {} bytes of code to {}", code.len(), contract);
        accounts.set_code(&contract, code)?;
        computation.set_output(contract.as_bytes().to_vec());
        Ok(())
    }
}

impl ComputationEngine for TransferEngine {
    fn name(&self) -> &'static str {
        "transfer"
    }

    fn apply_message(
        &self,
        accounts: &mut AccountDB,
        message: Message,
        transaction_context: &TransactionContext,
        _execution_context: &ExecutionContext,
        gas_schedule: &GasSchedule,
    ) -> VmResult<Computation> {
        let is_create = message.is_create();
        let mut computation = Computation::new(message, transaction_context.clone());

        self.transfer_value(accounts, &mut computation)?;
        if computation.is_success() && is_create {
            self.deploy_code(accounts, &mut computation, gas_schedule)?;
        }
        Ok(computation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MessageParams;
    use lattice_core::{ReceiveTransaction, SendTransaction, U256};
    use lattice_db::MemoryDB;
    use std::sync::Arc;

    const PRIVATE_KEY: [u8; 32] = [0x11; 32];

    fn context() -> TransactionContext {
        let mut tx = SendTransaction::transfer(
            0,
            Address::new([2u8; 20]),
            U256::zero(),
            U256::from(1),
            100_000,
        );
        tx.sign(&PRIVATE_KEY).unwrap();
        let receive = ReceiveTransaction::new(Default::default(), tx.hash().unwrap());
        TransactionContext::resolve(&tx, Address::new([2u8; 20]), Some(&receive), None).unwrap()
    }

    fn message(params: MessageParams) -> Message {
        Message::new(MessageParams {
            sender: Address::new([1u8; 20]),
            gas: 100_000,
            ..params
        })
        .unwrap()
    }

    #[test]
    fn test_gas_accounting_and_refund_cap() {
        let mut computation = Computation::new(
            message(MessageParams {
                to: Some(Address::new([2u8; 20])),
                ..Default::default()
            }),
            context(),
        );
        computation.consume_gas(20_000, "test").unwrap();
        computation.refund_gas(30_000);

        assert_eq!(computation.get_gas_remaining(), 80_000);
        assert_eq!(computation.get_gas_used(), 20_000);
        assert_eq!(computation.get_gas_remaining_including_refunds(), 90_000);

        computation.set_error(ComputationError::Revert("boom".to_string()));
        assert_eq!(computation.get_gas_remaining(), 0);
        assert_eq!(computation.get_gas_refund(), 0);
        assert_eq!(computation.get_gas_remaining_including_refunds(), 0);
    }

    #[test]
    fn test_accounts_for_deletion_are_unique() {
        let mut computation = Computation::new(
            message(MessageParams {
                to: Some(Address::new([2u8; 20])),
                ..Default::default()
            }),
            context(),
        );
        computation.register_account_for_deletion(Address::new([3u8; 20]));
        computation.register_account_for_deletion(Address::new([3u8; 20]));
        assert_eq!(computation.get_accounts_for_deletion().len(), 1);
    }

    #[test]
    fn test_transfer_engine_deploys_code() {
        let mut accounts = AccountDB::new(Arc::new(MemoryDB::new()));
        let contract = Address::new([9u8; 20]);
        let schedule = GasSchedule::default();
        let create = message(MessageParams {
            to: None,
            create_address: Some(contract),
            data: vec![0x60, 0x00],
            ..Default::default()
        });

        let computation = TransferEngine
            .apply_message(
                &mut accounts,
                create.clone(),
                &context(),
                &ExecutionContext::new(0, 0, 1_000_000),
                &schedule,
            )
            .unwrap();
        assert!(computation.is_success());
        assert_eq!(accounts.get_code(&contract).unwrap(), vec![0x60, 0x00]);
        assert_eq!(
            computation.get_gas_remaining(),
            100_000 - schedule.code_deposit_cost(2)
        );

        let collision = TransferEngine
            .apply_message(
                &mut accounts,
                create,
                &context(),
                &ExecutionContext::new(0, 0, 1_000_000),
                &schedule,
            )
            .unwrap();
        assert_eq!(
            collision.error(),
            Some(&ComputationError::ContractCollision(contract))
        );
    }

    #[test]
    fn test_transfer_engine_moves_value() {
        let mut accounts = AccountDB::new(Arc::new(MemoryDB::new()));
        let sender = Address::new([1u8; 20]);
        let recipient = Address::new([2u8; 20]);
        accounts.set_balance(&sender, U256::from(10)).unwrap();

        let transfer = message(MessageParams {
            to: Some(recipient),
            value: U256::from(7),
            should_transfer_value: true,
            ..Default::default()
        });
        let computation = TransferEngine
            .apply_message(
                &mut accounts,
                transfer.clone(),
                &context(),
                &ExecutionContext::new(0, 0, 1_000_000),
                &GasSchedule::default(),
            )
            .unwrap();
        assert!(computation.is_success());
        assert_eq!(accounts.get_balance(&recipient).unwrap(), U256::from(7));

        let overdraft = TransferEngine
            .apply_message(
                &mut accounts,
                transfer,
                &context(),
                &ExecutionContext::new(0, 0, 1_000_000),
                &GasSchedule::default(),
            )
            .unwrap();
        assert!(matches!(
            overdraft.error(),
            Some(ComputationError::InsufficientFunds { .. })
        ));
        assert_eq!(accounts.get_balance(&sender).unwrap(), U256::from(3));
    }
}
