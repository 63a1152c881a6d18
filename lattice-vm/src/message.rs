//! Call frame description

use crate::{VmError, VmResult};
use lattice_core::{Address, Nonce, U256};

/// Deepest allowed nesting of call frames
pub const STACK_DEPTH_LIMIT: u32 = 1024;

/// Inputs for [`Message::new`]. `to == None` requests a contract creation, in
/// which case `create_address` must be supplied.
#[derive(Debug, Clone, Default)]
pub struct MessageParams {
    pub gas: u64,
    pub to: Option<Address>,
    pub sender: Address,
    pub value: U256,
    pub data: Vec<u8>,
    pub code: Vec<u8>,
    pub depth: u32,
    pub create_address: Option<Address>,
    pub code_address: Option<Address>,
    pub should_transfer_value: bool,
    pub is_static: bool,
    pub refund_amount: U256,
    pub execute_on_send: bool,
    pub nonce: Nonce,
}

/// A single call or transfer. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    gas: u64,
    to: Option<Address>,
    sender: Address,
    value: U256,
    data: Vec<u8>,
    code: Vec<u8>,
    depth: u32,
    create_address: Option<Address>,
    code_address: Option<Address>,
    should_transfer_value: bool,
    is_static: bool,
    refund_amount: U256,
    execute_on_send: bool,
    nonce: Nonce,
}

impl Message {
    pub fn new(params: MessageParams) -> VmResult<Self> {
        if params.to.is_none() && params.create_address.is_none() {
            return Err(VmError::InvalidMessage(
                "contract creation without a create address".to_string(),
            ));
        }
        if params.depth > STACK_DEPTH_LIMIT {
            return Err(VmError::InvalidMessage(format!(
                "call depth {} exceeds limit {}",
                params.depth, STACK_DEPTH_LIMIT
            )));
        }

        Ok(Self {
            gas: params.gas,
            to: params.to,
            sender: params.sender,
            value: params.value,
            data: params.data,
            code: params.code,
            depth: params.depth,
            create_address: params.create_address,
            code_address: params.code_address,
            should_transfer_value: params.should_transfer_value,
            is_static: params.is_static,
            refund_amount: params.refund_amount,
            execute_on_send: params.execute_on_send,
            nonce: params.nonce,
        })
    }

    pub fn gas(&self) -> u64 {
        self.gas
    }

    /// Target, `None` for contract creation
    pub fn to(&self) -> Option<Address> {
        self.to
    }

    pub fn sender(&self) -> Address {
        self.sender
    }

    pub fn value(&self) -> U256 {
        self.value
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn create_address(&self) -> Option<Address> {
        self.create_address
    }

    /// Address whose code runs, defaults to the target
    pub fn code_address(&self) -> Option<Address> {
        self.code_address.or(self.to)
    }

    /// Only used while normalizing a freshly built message
    pub fn set_code_address(&mut self, code_address: Address) {
        self.code_address = Some(code_address);
    }

    pub fn should_transfer_value(&self) -> bool {
        self.should_transfer_value
    }

    pub fn is_static(&self) -> bool {
        self.is_static
    }

    pub fn refund_amount(&self) -> U256 {
        self.refund_amount
    }

    pub fn execute_on_send(&self) -> bool {
        self.execute_on_send
    }

    pub fn nonce(&self) -> Nonce {
        self.nonce
    }

    pub fn is_create(&self) -> bool {
        self.to.is_none() || self.create_address.is_some()
    }

    /// Account the message acts on: the created contract or the target
    pub fn resolved_to(&self) -> Address {
        match (self.create_address, self.to) {
            (Some(create_address), _) => create_address,
            (None, Some(to)) => to,
            // `new` rejects creation without a create address
            (None, None) => Address::zero(),
        }
    }
}
