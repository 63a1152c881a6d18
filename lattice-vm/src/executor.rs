//! Transaction execution state machine
//!
//! A transaction moves through [`ExecutionPhase`]s in order:
//! context resolution, message construction, computation, refund accounting
//! and finalization. Validation runs before the first phase and never
//! mutates state.

use crate::{
    AccountDB, BalanceDelta, Computation, ExecutionContext, ForkConfig, Message,
    TransactionContext, TransactionKind, ValidationError, VmError, VmResult,
};
use lattice_core::{Address, ReceiveTransaction, SendTransaction, U256};
use std::fmt;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ExecutionPhase {
    Start,
    ContextResolved,
    MessageBuilt,
    Computed,
    RefundsApplied,
    Finalized,
}

impl fmt::Display for ExecutionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionPhase::Start => "start",
            ExecutionPhase::ContextResolved => "context-resolved",
            ExecutionPhase::MessageBuilt => "message-built",
            ExecutionPhase::Computed => "computed",
            ExecutionPhase::RefundsApplied => "refunds-applied",
            ExecutionPhase::Finalized => "finalized",
        };
        f.write_str(name)
    }
}

/// Transaction as it should be stored in the block after execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessedTransaction {
    Send(SendTransaction),
    Receive(ReceiveTransaction),
    Refund(ReceiveTransaction),
}

/// `gas * gas_price + value`, `None` on overflow
fn upfront_cost(send_transaction: &SendTransaction) -> Option<U256> {
    U256::from(send_transaction.gas)
        .checked_mul(send_transaction.gas_price)?
        .checked_add(send_transaction.value)
}

/// Chain that pays for a send: the emitting contract for sends made during a
/// computation, the signer otherwise
fn paying_chain(send_transaction: &SendTransaction, signer: Address) -> Address {
    send_transaction.caller.unwrap_or(signer)
}

/// Chain that receives a send
fn receiving_chain(send_transaction: &SendTransaction, signer: Address) -> Address {
    send_transaction
        .to
        .unwrap_or_else(|| Address::contract_address(&signer, send_transaction.nonce))
}

/// Executes one transaction against an [`AccountDB`]
pub struct TransactionExecutor<'a> {
    accounts: &'a mut AccountDB,
    execution_context: &'a ExecutionContext,
    fork: &'a ForkConfig,
    phase: ExecutionPhase,
}

impl<'a> TransactionExecutor<'a> {
    pub fn new(
        accounts: &'a mut AccountDB,
        execution_context: &'a ExecutionContext,
        fork: &'a ForkConfig,
    ) -> Self {
        Self {
            accounts,
            execution_context,
            fork,
            phase: ExecutionPhase::Start,
        }
    }

    pub fn phase(&self) -> ExecutionPhase {
        self.phase
    }

    fn advance(&mut self, phase: ExecutionPhase) {
        debug!("Executor phase {} -> {}", self.phase, phase);
        self.phase = phase;
    }

    /// Run the full state machine. Returns the computation and the
    /// transaction to store, which may be a modified copy of the input.
    pub fn execute(
        &mut self,
        send_transaction: &SendTransaction,
        this_chain_address: Address,
        receive_transaction: Option<&ReceiveTransaction>,
        refund_transaction: Option<&ReceiveTransaction>,
        validate: bool,
    ) -> VmResult<(Computation, ProcessedTransaction)> {
        self.phase = ExecutionPhase::Start;

        if validate {
            self.validate_transaction(
                send_transaction,
                this_chain_address,
                receive_transaction,
                refund_transaction,
            )?;
        } else if receive_transaction.is_some() && refund_transaction.is_some() {
            return Err(ValidationError::ReceiveAndRefund.into());
        }

        let transaction_context = self.get_transaction_context(
            send_transaction,
            this_chain_address,
            receive_transaction,
            refund_transaction,
        )?;
        self.advance(ExecutionPhase::ContextResolved);

        let message = self.build_message(
            send_transaction,
            &transaction_context,
            receive_transaction,
            refund_transaction,
        )?;
        self.advance(ExecutionPhase::MessageBuilt);

        let mut computation = self.build_computation(
            message,
            &transaction_context,
            send_transaction,
            receive_transaction,
            refund_transaction,
        )?;
        self.advance(ExecutionPhase::Computed);

        let processed_transaction = self.add_possible_refunds_to_currently_executing_transaction(
            send_transaction,
            &computation,
            receive_transaction,
            refund_transaction,
        )?;
        self.advance(ExecutionPhase::RefundsApplied);

        self.finalize_computation(send_transaction, &mut computation)?;
        self.advance(ExecutionPhase::Finalized);

        Ok((computation, processed_transaction))
    }

    /// Reject malformed transactions before anything is mutated
    pub fn validate_transaction(
        &self,
        send_transaction: &SendTransaction,
        this_chain_address: Address,
        receive_transaction: Option<&ReceiveTransaction>,
        refund_transaction: Option<&ReceiveTransaction>,
    ) -> VmResult<()> {
        if receive_transaction.is_some() && refund_transaction.is_some() {
            return Err(ValidationError::ReceiveAndRefund.into());
        }

        let signature = send_transaction
            .signature
            .as_ref()
            .ok_or(ValidationError::MissingSignature)?;
        if !signature.has_low_s() {
            return Err(ValidationError::HighS.into());
        }
        let signer = send_transaction
            .sender()
            .map_err(|_| ValidationError::InvalidSignature)?;

        match (receive_transaction, refund_transaction) {
            (Some(receive), None) => {
                self.validate_receive(send_transaction, signer, this_chain_address, receive)
            }
            (None, Some(refund)) => {
                self.validate_refund(send_transaction, signer, this_chain_address, refund)
            }
            _ => self.validate_send(send_transaction, signer, this_chain_address),
        }
    }

    fn validate_send(
        &self,
        send_transaction: &SendTransaction,
        signer: Address,
        this_chain_address: Address,
    ) -> VmResult<()> {
        let sender = paying_chain(send_transaction, signer);
        if this_chain_address != sender {
            return Err(ValidationError::WrongChain {
                expected: sender,
                actual: this_chain_address,
            }
            .into());
        }

        let expected_nonce = self.accounts.get_nonce(&sender)?;
        if send_transaction.nonce != expected_nonce {
            return Err(ValidationError::InvalidNonce {
                expected: expected_nonce,
                actual: send_transaction.nonce,
            }
            .into());
        }

        let intrinsic = self
            .fork
            .gas_schedule
            .intrinsic_gas(&send_transaction.data, send_transaction.is_create());
        if send_transaction.gas < intrinsic {
            return Err(ValidationError::IntrinsicGasTooLow {
                intrinsic,
                supplied: send_transaction.gas,
            }
            .into());
        }

        let gas_limit = self.execution_context.gas_limit();
        if send_transaction.gas > gas_limit {
            return Err(ValidationError::GasLimitExceeded {
                gas: send_transaction.gas,
                gas_limit,
            }
            .into());
        }

        let available = self.accounts.get_balance(&sender)?;
        let required = upfront_cost(send_transaction).unwrap_or(U256::MAX);
        if available < required {
            return Err(ValidationError::InsufficientBalance {
                required,
                available,
            }
            .into());
        }

        Ok(())
    }

    fn validate_receive(
        &self,
        send_transaction: &SendTransaction,
        signer: Address,
        this_chain_address: Address,
        receive_transaction: &ReceiveTransaction,
    ) -> VmResult<()> {
        let recipient = receiving_chain(send_transaction, signer);
        if this_chain_address != recipient {
            return Err(ValidationError::WrongChain {
                expected: recipient,
                actual: this_chain_address,
            }
            .into());
        }
        if receive_transaction.is_refund {
            return Err(ValidationError::RefundFlagMismatch.into());
        }
        self.validate_receivable(send_transaction, this_chain_address, receive_transaction)
    }

    fn validate_refund(
        &self,
        send_transaction: &SendTransaction,
        signer: Address,
        this_chain_address: Address,
        refund_transaction: &ReceiveTransaction,
    ) -> VmResult<()> {
        let original_sender = paying_chain(send_transaction, signer);
        if this_chain_address != original_sender {
            return Err(ValidationError::WrongChain {
                expected: original_sender,
                actual: this_chain_address,
            }
            .into());
        }
        if !refund_transaction.is_refund {
            return Err(ValidationError::RefundFlagMismatch.into());
        }
        self.validate_receivable(send_transaction, this_chain_address, refund_transaction)
    }

    fn validate_receivable(
        &self,
        send_transaction: &SendTransaction,
        this_chain_address: Address,
        receive_transaction: &ReceiveTransaction,
    ) -> VmResult<()> {
        let send_hash = send_transaction.hash()?;
        if receive_transaction.send_transaction_hash != send_hash {
            return Err(ValidationError::SendHashMismatch {
                expected: send_hash,
                actual: receive_transaction.send_transaction_hash,
            }
            .into());
        }
        let key = receive_transaction.transaction_key();
        if !self
            .accounts
            .has_receivable_transaction(&this_chain_address, &key)?
        {
            return Err(ValidationError::NotReceivable(key.transaction_hash).into());
        }
        Ok(())
    }

    pub fn get_transaction_context(
        &self,
        send_transaction: &SendTransaction,
        this_chain_address: Address,
        receive_transaction: Option<&ReceiveTransaction>,
        refund_transaction: Option<&ReceiveTransaction>,
    ) -> VmResult<TransactionContext> {
        TransactionContext::resolve(
            send_transaction,
            this_chain_address,
            receive_transaction,
            refund_transaction,
        )
    }

    /// Delegates to the active fork's message builder
    pub fn build_message(
        &self,
        send_transaction: &SendTransaction,
        transaction_context: &TransactionContext,
        receive_transaction: Option<&ReceiveTransaction>,
        refund_transaction: Option<&ReceiveTransaction>,
    ) -> VmResult<Message> {
        self.fork.message_builder.build_message(
            self.accounts,
            send_transaction,
            transaction_context,
            receive_transaction,
            refund_transaction,
            &self.fork.gas_schedule,
        )
    }

    /// Run the fork's engine inside a checkpoint: committed on success,
    /// discarded when the computation records an error
    fn run_engine(
        &mut self,
        message: Message,
        transaction_context: &TransactionContext,
    ) -> VmResult<Computation> {
        let checkpoint = self.accounts.record();
        let result = self.fork.engine.apply_message(
            self.accounts,
            message,
            transaction_context,
            self.execution_context,
            &self.fork.gas_schedule,
        );

        match result {
            Ok(computation) if computation.is_success() => {
                self.accounts.commit(checkpoint)?;
                Ok(computation)
            }
            Ok(computation) => {
                warn!(
                    "Computation for {} failed, discarding its changes: {:?}",
                    transaction_context.send_tx_hash(),
                    computation.error()
                );
                self.accounts.discard(checkpoint)?;
                Ok(computation)
            }
            Err(e) => {
                self.accounts.discard(checkpoint)?;
                Err(e)
            }
        }
    }

    /// Apply the balance effects of the transaction and run the computation
    /// where it belongs
    pub fn build_computation(
        &mut self,
        message: Message,
        transaction_context: &TransactionContext,
        send_transaction: &SendTransaction,
        receive_transaction: Option<&ReceiveTransaction>,
        refund_transaction: Option<&ReceiveTransaction>,
    ) -> VmResult<Computation> {
        let this_chain = transaction_context.this_chain_address();

        match transaction_context.kind() {
            TransactionKind::Send => {
                let cost = upfront_cost(send_transaction).ok_or_else(|| {
                    VmError::Other("transaction cost overflows".to_string())
                })?;
                self.accounts
                    .delta_balance(&this_chain, BalanceDelta::Decrease(cost))?;
                self.accounts.increment_nonce(&this_chain)?;

                if message.execute_on_send() {
                    self.run_engine(message, transaction_context)
                } else {
                    Ok(Computation::new(message, transaction_context.clone()))
                }
            }
            TransactionKind::Receive => {
                let receive = receive_transaction.ok_or_else(|| {
                    VmError::Other("receive context without receive transaction".to_string())
                })?;
                self.accounts
                    .delete_receivable_transaction(&this_chain, &receive.transaction_key())?;
                if !message.value().is_zero() {
                    self.accounts.delta_balance(
                        &message.resolved_to(),
                        BalanceDelta::Increase(message.value()),
                    )?;
                }

                if message.execute_on_send() {
                    // Already computed on the sending chain, leftover gas was
                    // settled there
                    let mut computation = Computation::new(message, transaction_context.clone());
                    computation.exhaust_gas();
                    Ok(computation)
                } else if !message.data().is_empty() || message.is_create() {
                    self.run_engine(message, transaction_context)
                } else {
                    Ok(Computation::new(message, transaction_context.clone()))
                }
            }
            TransactionKind::Refund => {
                let refund = refund_transaction.ok_or_else(|| {
                    VmError::Other("refund context without refund transaction".to_string())
                })?;
                self.accounts
                    .delete_receivable_transaction(&this_chain, &refund.transaction_key())?;
                // remaining_refund is gas, the message value is its price
                let amount = message.value();
                if !amount.is_zero() {
                    debug!(
                        "REFUND: {} gas ({}) -> {}",
                        refund.remaining_refund, amount, this_chain
                    );
                    self.accounts
                        .delta_balance(&this_chain, BalanceDelta::Increase(amount))?;
                }
                Ok(Computation::new(message, transaction_context.clone()))
            }
        }
    }

    fn apply_selfdestruct_refunds(&self, computation: &mut Computation) {
        let deletions = computation.get_accounts_for_deletion().len() as u64;
        if deletions > 0 {
            computation.refund_gas(
                self.fork
                    .gas_schedule
                    .refund_selfdestruct
                    .saturating_mul(deletions),
            );
        }
    }

    /// Attach leftover gas of a receive-side computation to the receive
    /// transaction so it can be refunded to the sender. Never mutates the
    /// input transactions.
    pub fn add_possible_refunds_to_currently_executing_transaction(
        &self,
        send_transaction: &SendTransaction,
        computation: &Computation,
        receive_transaction: Option<&ReceiveTransaction>,
        refund_transaction: Option<&ReceiveTransaction>,
    ) -> VmResult<ProcessedTransaction> {
        let context = computation.transaction_context();

        match context.kind() {
            TransactionKind::Refund => {
                let refund = refund_transaction.ok_or_else(|| {
                    VmError::Other("refund context without refund transaction".to_string())
                })?;
                Ok(ProcessedTransaction::Refund(refund.clone()))
            }
            TransactionKind::Receive => {
                let receive = receive_transaction.ok_or_else(|| {
                    VmError::Other("receive context without receive transaction".to_string())
                })?;
                let message = computation.msg();
                let refund_due = context.is_computation_call_origin()
                    || (!message.data().is_empty() && !message.is_create());
                if !refund_due {
                    return Ok(ProcessedTransaction::Receive(receive.clone()));
                }

                if computation.has_external_call_messages() && computation.is_success() {
                    debug!(
                        "SAVING REFUND FOR CHILD CALLS: tx_hash = {}",
                        context.send_tx_hash()
                    );
                    return Ok(ProcessedTransaction::Receive(receive.clone()));
                }

                let gas = computation.get_gas_remaining_including_refunds();
                debug!(
                    "SAVING REFUND TO RECEIVE TX: {} gas -> {}",
                    gas,
                    message.sender()
                );
                Ok(ProcessedTransaction::Receive(
                    receive.with_remaining_refund(U256::from(gas)),
                ))
            }
            TransactionKind::Send => Ok(ProcessedTransaction::Send(send_transaction.clone())),
        }
    }

    /// Count self-destructs towards the refund counter, then reimburse
    /// leftover gas of sends that will never produce a refund through a
    /// receive. Returns the credited amount.
    pub fn finalize_computation(
        &mut self,
        send_transaction: &SendTransaction,
        computation: &mut Computation,
    ) -> VmResult<U256> {
        self.apply_selfdestruct_refunds(computation);

        let context = computation.transaction_context();
        if context.kind() != TransactionKind::Send || context.is_computation_call_origin() {
            return Ok(U256::zero());
        }

        let message = computation.msg();
        if !(message.is_create() || message.data().is_empty()) {
            return Ok(U256::zero());
        }

        let gas_remaining = computation.get_gas_remaining();
        let gas_refunded = computation.get_gas_refund();
        let gas_used = send_transaction.gas.saturating_sub(gas_remaining);
        let gas_refund = gas_refunded.min(gas_used / 2);
        let amount = U256::from(gas_refund.saturating_add(gas_remaining))
            .saturating_mul(send_transaction.gas_price);

        if !amount.is_zero() {
            info!("GAS REFUND: {} -> {}", amount, message.sender());
            self.accounts
                .delta_balance(&message.sender(), BalanceDelta::Increase(amount))?;
        }
        Ok(amount)
    }

    /// Run a send's message through the engine without validation, debits
    /// or finalization
    pub fn perform_transaction_computation(
        &mut self,
        send_transaction: &SendTransaction,
    ) -> VmResult<Computation> {
        let signer = send_transaction.sender()?;
        let transaction_context = self.get_transaction_context(
            send_transaction,
            paying_chain(send_transaction, signer),
            None,
            None,
        )?;
        let message = self.build_message(send_transaction, &transaction_context, None, None)?;
        self.fork.engine.apply_message(
            self.accounts,
            message,
            &transaction_context,
            self.execution_context,
            &self.fork.gas_schedule,
        )
    }
}
