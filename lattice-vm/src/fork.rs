//! Fork-indexed execution strategies
//!
//! Each fork bundles a gas schedule, a message builder and a computation
//! engine. The table picks the newest fork active at a block's timestamp.

use crate::{
    AccountDB, ComputationEngine, GasSchedule, Message, MessageParams, TransactionContext,
    TransactionKind, TransferEngine, ValidationError, VmError, VmResult,
};
use lattice_core::{Address, ReceiveTransaction, SendTransaction, Timestamp};
use std::fmt;
use std::sync::Arc;

/// Turns a transaction into the message a computation runs
pub trait MessageBuilder: Send + Sync {
    fn name(&self) -> &'static str;

    fn build_message(
        &self,
        accounts: &AccountDB,
        send_transaction: &SendTransaction,
        transaction_context: &TransactionContext,
        receive_transaction: Option<&ReceiveTransaction>,
        refund_transaction: Option<&ReceiveTransaction>,
        gas_schedule: &GasSchedule,
    ) -> VmResult<Message>;
}

fn build_lattice_message(
    accounts: &AccountDB,
    send_transaction: &SendTransaction,
    transaction_context: &TransactionContext,
    refund_transaction: Option<&ReceiveTransaction>,
    gas_schedule: &GasSchedule,
) -> VmResult<Message> {
    if transaction_context.kind() == TransactionKind::Refund {
        let refund = refund_transaction
            .ok_or_else(|| VmError::Other("refund context without refund transaction".into()))?;
        let refunding_chain = send_transaction.to.unwrap_or_else(|| {
            Address::contract_address(&transaction_context.tx_signer(), send_transaction.nonce)
        });
        let value = refund
            .remaining_refund
            .checked_mul(send_transaction.gas_price)
            .ok_or_else(|| VmError::Other("refund amount overflows".into()))?;
        return Message::new(MessageParams {
            gas: 0,
            to: Some(transaction_context.this_chain_address()),
            sender: refunding_chain,
            value,
            refund_amount: refund.remaining_refund,
            nonce: send_transaction.nonce,
            ..MessageParams::default()
        });
    }

    let sender = transaction_context
        .tx_caller()
        .unwrap_or_else(|| transaction_context.tx_signer());
    let intrinsic_gas =
        gas_schedule.intrinsic_gas(&send_transaction.data, send_transaction.is_create());
    let create_address = if send_transaction.is_create() {
        Some(Address::contract_address(
            &transaction_context.tx_signer(),
            send_transaction.nonce,
        ))
    } else {
        None
    };

    let code = match create_address {
        Some(_) => send_transaction.data.clone(),
        None => {
            let code_address = send_transaction.code_address.or(send_transaction.to);
            match code_address {
                Some(address) => accounts.get_code(&address)?,
                None => Vec::new(),
            }
        }
    };

    let mut message = Message::new(MessageParams {
        gas: send_transaction.gas.saturating_sub(intrinsic_gas),
        to: send_transaction.to,
        sender,
        value: send_transaction.value,
        data: send_transaction.data.clone(),
        code,
        depth: 0,
        create_address,
        code_address: None,
        should_transfer_value: false,
        is_static: false,
        refund_amount: Default::default(),
        execute_on_send: send_transaction.execute_on_send,
        nonce: send_transaction.nonce,
    })?;
    if let Some(code_address) = send_transaction.code_address {
        message.set_code_address(code_address);
    }
    Ok(message)
}

/// First fork: sends may not originate from inside a computation
#[derive(Debug, Default, Clone, Copy)]
pub struct BosonMessageBuilder;

impl MessageBuilder for BosonMessageBuilder {
    fn name(&self) -> &'static str {
        "boson"
    }

    fn build_message(
        &self,
        accounts: &AccountDB,
        send_transaction: &SendTransaction,
        transaction_context: &TransactionContext,
        _receive_transaction: Option<&ReceiveTransaction>,
        refund_transaction: Option<&ReceiveTransaction>,
        gas_schedule: &GasSchedule,
    ) -> VmResult<Message> {
        if transaction_context.is_computation_call_origin() {
            return Err(ValidationError::UnsupportedCallOrigin.into());
        }
        build_lattice_message(
            accounts,
            send_transaction,
            transaction_context,
            refund_transaction,
            gas_schedule,
        )
    }
}

/// Adds sends emitted by contracts during a computation
#[derive(Debug, Default, Clone, Copy)]
pub struct PhotonMessageBuilder;

impl MessageBuilder for PhotonMessageBuilder {
    fn name(&self) -> &'static str {
        "photon"
    }

    fn build_message(
        &self,
        accounts: &AccountDB,
        send_transaction: &SendTransaction,
        transaction_context: &TransactionContext,
        _receive_transaction: Option<&ReceiveTransaction>,
        refund_transaction: Option<&ReceiveTransaction>,
        gas_schedule: &GasSchedule,
    ) -> VmResult<Message> {
        build_lattice_message(
            accounts,
            send_transaction,
            transaction_context,
            refund_transaction,
            gas_schedule,
        )
    }
}

/// Strategies of a single fork
#[derive(Clone)]
pub struct ForkConfig {
    pub name: String,
    pub activation_timestamp: Timestamp,
    pub gas_schedule: GasSchedule,
    pub message_builder: Arc<dyn MessageBuilder>,
    pub engine: Arc<dyn ComputationEngine>,
}

impl ForkConfig {
    pub fn boson(activation_timestamp: Timestamp) -> Self {
        Self {
            name: "boson".to_string(),
            activation_timestamp,
            gas_schedule: GasSchedule::default(),
            message_builder: Arc::new(BosonMessageBuilder),
            engine: Arc::new(TransferEngine),
        }
    }

    pub fn photon(activation_timestamp: Timestamp) -> Self {
        Self {
            name: "photon".to_string(),
            activation_timestamp,
            gas_schedule: GasSchedule::default(),
            message_builder: Arc::new(PhotonMessageBuilder),
            engine: Arc::new(TransferEngine),
        }
    }

    pub fn with_gas_schedule(mut self, gas_schedule: GasSchedule) -> Self {
        self.gas_schedule = gas_schedule;
        self
    }

    pub fn with_engine(mut self, engine: Arc<dyn ComputationEngine>) -> Self {
        self.engine = engine;
        self
    }
}

impl fmt::Debug for ForkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForkConfig")
            .field("name", &self.name)
            .field("activation_timestamp", &self.activation_timestamp)
            .field("message_builder", &self.message_builder.name())
            .field("engine", &self.engine.name())
            .finish()
    }
}

/// Forks ordered by activation timestamp
#[derive(Debug, Clone, Default)]
pub struct ForkTable {
    forks: Vec<ForkConfig>,
}

impl ForkTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Boson from genesis, photon from `photon_activation`
    pub fn standard(photon_activation: Timestamp) -> Self {
        Self::new()
            .with_fork(ForkConfig::boson(0))
            .with_fork(ForkConfig::photon(photon_activation))
    }

    /// Add a fork, replacing one with the same activation timestamp
    pub fn with_fork(mut self, fork: ForkConfig) -> Self {
        self.forks
            .retain(|existing| existing.activation_timestamp != fork.activation_timestamp);
        self.forks.push(fork);
        self.forks.sort_by_key(|fork| fork.activation_timestamp);
        self
    }

    /// Newest fork active at `timestamp`
    pub fn select(&self, timestamp: Timestamp) -> VmResult<&ForkConfig> {
        self.forks
            .iter()
            .rev()
            .find(|fork| fork.activation_timestamp <= timestamp)
            .ok_or_else(|| {
                VmError::Configuration(format!("No fork active at timestamp {}", timestamp))
            })
    }

    pub fn len(&self) -> usize {
        self.forks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forks.is_empty()
    }
}
