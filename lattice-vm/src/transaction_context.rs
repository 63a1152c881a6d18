//! Per-transaction context resolved from the send and optional receive/refund

use crate::VmResult;
use lattice_core::{Address, Hash, ReceiveTransaction, SendTransaction, U256};

/// Which half of a transfer is being executed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    Send,
    Receive,
    Refund,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionContext {
    origin: Address,
    gas_price: U256,
    send_tx_hash: Hash,
    this_chain_address: Address,
    is_receive: bool,
    is_refund: bool,
    receive_tx_hash: Option<Hash>,
    tx_caller: Option<Address>,
    tx_origin: Option<Address>,
    tx_code_address: Option<Address>,
    tx_signer: Address,
}

impl TransactionContext {
    /// Resolve the context of `send_transaction` executing on `this_chain_address`
    pub fn resolve(
        send_transaction: &SendTransaction,
        this_chain_address: Address,
        receive_transaction: Option<&ReceiveTransaction>,
        refund_transaction: Option<&ReceiveTransaction>,
    ) -> VmResult<Self> {
        let signer = send_transaction.sender()?;
        let receive_tx_hash = receive_transaction.map(|tx| tx.hash()).transpose()?;

        Ok(Self {
            origin: signer,
            gas_price: send_transaction.gas_price,
            send_tx_hash: send_transaction.hash()?,
            this_chain_address,
            is_receive: receive_transaction.is_some(),
            is_refund: refund_transaction.is_some(),
            receive_tx_hash,
            tx_caller: send_transaction.caller,
            tx_origin: send_transaction.origin,
            tx_code_address: send_transaction.code_address,
            tx_signer: signer,
        })
    }

    pub fn origin(&self) -> Address {
        self.origin
    }

    pub fn gas_price(&self) -> U256 {
        self.gas_price
    }

    pub fn send_tx_hash(&self) -> Hash {
        self.send_tx_hash
    }

    pub fn this_chain_address(&self) -> Address {
        self.this_chain_address
    }

    pub fn is_receive(&self) -> bool {
        self.is_receive
    }

    pub fn is_refund(&self) -> bool {
        self.is_refund
    }

    /// Present iff this is a receive
    pub fn receive_tx_hash(&self) -> Option<Hash> {
        self.receive_tx_hash
    }

    pub fn tx_caller(&self) -> Option<Address> {
        self.tx_caller
    }

    pub fn tx_origin(&self) -> Option<Address> {
        self.tx_origin
    }

    pub fn tx_code_address(&self) -> Option<Address> {
        self.tx_code_address
    }

    pub fn tx_signer(&self) -> Address {
        self.tx_signer
    }

    /// The send was emitted by a contract during another computation
    pub fn is_computation_call_origin(&self) -> bool {
        self.tx_caller.is_some()
    }

    pub fn kind(&self) -> TransactionKind {
        if self.is_refund {
            TransactionKind::Refund
        } else if self.is_receive {
            TransactionKind::Receive
        } else {
            TransactionKind::Send
        }
    }
}
