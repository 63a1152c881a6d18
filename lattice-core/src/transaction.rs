//! Send and receive transactions
//!
//! A value transfer is split in two halves: a [`SendTransaction`] on the
//! sender's chain and a [`ReceiveTransaction`] on the recipient's chain. A
//! refund is a receive transaction flowing back to the original sender.

use crate::{encode, Address, CoreError, CoreResult, Gas, Hash, Nonce, U256};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

/// Half of the secp256k1 group order. Signatures with a larger S value are
/// malleable and rejected.
const SECP256K1_N_HALF: [u8; 32] = [
    0x7f, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0x5d, 0x57, 0x6e, 0x73, 0x57, 0xa4, 0x50, 0x1d, 0xdf, 0xe9, 0x2f, 0x46, 0x68, 0x1b, 0x20, 0xa0,
];

/// Transaction signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub r: [u8; 32],
    pub s: [u8; 32],
    pub v: u8,
}

impl Signature {
    /// Create new signature
    pub fn new(r: [u8; 32], s: [u8; 32], v: u8) -> Self {
        Self { r, s, v }
    }

    /// Convert to bytes (65 bytes total)
    pub fn to_bytes(&self) -> [u8; 65] {
        let mut bytes = [0u8; 65];
        bytes[0..32].copy_from_slice(&self.r);
        bytes[32..64].copy_from_slice(&self.s);
        bytes[64] = self.v;
        bytes
    }

    /// Create from bytes
    pub fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        if bytes.len() != 65 {
            return Err(CoreError::InvalidSignature);
        }

        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[0..32]);
        s.copy_from_slice(&bytes[32..64]);

        Ok(Self { r, s, v: bytes[64] })
    }

    /// S must be non-zero and in the lower half of the curve order
    pub fn has_low_s(&self) -> bool {
        self.s != [0u8; 32] && self.s <= SECP256K1_N_HALF
    }

    fn recover(&self, signing_hash: &Hash) -> CoreResult<Address> {
        let secp = secp256k1::Secp256k1::new();
        let recovery_id = secp256k1::ecdsa::RecoveryId::from_u8_masked(self.v);

        let mut sig_bytes = [0u8; 64];
        sig_bytes[0..32].copy_from_slice(&self.r);
        sig_bytes[32..64].copy_from_slice(&self.s);

        let recoverable_sig =
            secp256k1::ecdsa::RecoverableSignature::from_compact(&sig_bytes, recovery_id)
                .map_err(|e| CoreError::Crypto(e.to_string()))?;

        let message = secp256k1::Message::from_digest(*signing_hash.as_bytes());
        let public_key = secp
            .recover_ecdsa(message, &recoverable_sig)
            .map_err(|e| CoreError::Crypto(e.to_string()))?;

        Ok(public_key_to_address(&public_key))
    }
}

/// Convert a public key to an address (last 20 bytes of its Keccak256 hash)
fn public_key_to_address(public_key: &secp256k1::PublicKey) -> Address {
    let pubkey_bytes = public_key.serialize_uncompressed();
    let pubkey_hash = Keccak256::digest(&pubkey_bytes[1..]);
    let mut addr_bytes = [0u8; 20];
    addr_bytes.copy_from_slice(&pubkey_hash[12..32]);
    Address::new(addr_bytes)
}

/// Address controlled by a raw 32-byte secp256k1 private key
pub fn address_from_private_key(private_key: &[u8]) -> CoreResult<Address> {
    let secp = secp256k1::Secp256k1::new();
    let secret_key = secp256k1::SecretKey::from_slice(private_key)
        .map_err(|e| CoreError::Crypto(e.to_string()))?;
    let public_key = secp256k1::PublicKey::from_secret_key(&secp, &secret_key);
    Ok(public_key_to_address(&public_key))
}

/// Transaction placed on the sender's chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendTransaction {
    /// Transaction nonce (number of transactions sent from this chain)
    pub nonce: Nonce,
    /// Gas price
    pub gas_price: U256,
    /// Maximum gas to use for this transaction
    pub gas: Gas,
    /// Recipient chain (None for contract creation)
    pub to: Option<Address>,
    /// Value to transfer
    pub value: U256,
    /// Transaction data/input
    pub data: Vec<u8>,
    /// Contract that emitted this transaction from inside a computation
    pub caller: Option<Address>,
    /// Origin of the call chain that led to this transaction
    pub origin: Option<Address>,
    /// Address whose code should run on receive
    pub code_address: Option<Address>,
    /// Run the computation on the send side instead of the receive side
    pub execute_on_send: bool,
    /// Transaction signature
    pub signature: Option<Signature>,
}

/// Helper struct for encoding transaction data for signing
#[derive(Serialize)]
struct SendTransactionForSigning<'a> {
    nonce: Nonce,
    gas_price: U256,
    gas: Gas,
    to: Option<Address>,
    value: U256,
    data: &'a [u8],
    caller: Option<Address>,
    origin: Option<Address>,
    code_address: Option<Address>,
    execute_on_send: bool,
}

impl SendTransaction {
    /// Create a new transaction
    pub fn new(
        nonce: Nonce,
        gas_price: U256,
        gas: Gas,
        to: Option<Address>,
        value: U256,
        data: Vec<u8>,
    ) -> Self {
        Self {
            nonce,
            gas_price,
            gas,
            to,
            value,
            data,
            caller: None,
            origin: None,
            code_address: None,
            execute_on_send: false,
            signature: None,
        }
    }

    /// Create a simple transfer transaction
    pub fn transfer(nonce: Nonce, to: Address, value: U256, gas_price: U256, gas: Gas) -> Self {
        Self::new(nonce, gas_price, gas, Some(to), value, Vec::new())
    }

    /// Create a contract creation transaction
    pub fn create_contract(
        nonce: Nonce,
        value: U256,
        gas_price: U256,
        gas: Gas,
        code: Vec<u8>,
    ) -> Self {
        Self::new(nonce, gas_price, gas, None, value, code)
    }

    /// Mark this transaction as emitted by a contract during a computation
    pub fn with_call_origin(
        mut self,
        caller: Address,
        origin: Address,
        code_address: Option<Address>,
    ) -> Self {
        self.caller = Some(caller);
        self.origin = Some(origin);
        self.code_address = code_address;
        self
    }

    pub fn is_create(&self) -> bool {
        self.to.is_none()
    }

    /// Encode transaction for hashing (without signature)
    pub fn encode_for_signing(&self) -> CoreResult<Vec<u8>> {
        encode(&SendTransactionForSigning {
            nonce: self.nonce,
            gas_price: self.gas_price,
            gas: self.gas,
            to: self.to,
            value: self.value,
            data: &self.data,
            caller: self.caller,
            origin: self.origin,
            code_address: self.code_address,
            execute_on_send: self.execute_on_send,
        })
    }

    /// Calculate transaction hash (including signature)
    pub fn hash(&self) -> CoreResult<Hash> {
        Ok(Hash::keccak(&encode(self)?))
    }

    /// Calculate hash for signing (without signature)
    pub fn signing_hash(&self) -> CoreResult<Hash> {
        Ok(Hash::keccak(&self.encode_for_signing()?))
    }

    /// Sign the transaction with a raw private key
    pub fn sign(&mut self, private_key: &[u8]) -> CoreResult<()> {
        let signing_hash = self.signing_hash()?;

        let secp = secp256k1::Secp256k1::new();
        let secret_key = secp256k1::SecretKey::from_slice(private_key)
            .map_err(|e| CoreError::Crypto(e.to_string()))?;

        let message = secp256k1::Message::from_digest(*signing_hash.as_bytes());
        let sig = secp.sign_ecdsa_recoverable(message, &secret_key);
        let (recovery_id, sig_bytes) = sig.serialize_compact();

        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&sig_bytes[0..32]);
        s.copy_from_slice(&sig_bytes[32..64]);
        let v = recovery_id as u8;

        self.signature = Some(Signature::new(r, s, v));
        Ok(())
    }

    /// Verify transaction signature
    pub fn verify_signature(&self) -> CoreResult<bool> {
        let signature = match &self.signature {
            Some(sig) => sig,
            None => return Ok(false),
        };
        if !signature.has_low_s() {
            return Ok(false);
        }
        Ok(signature.recover(&self.signing_hash()?).is_ok())
    }

    /// Get the sender address from signature
    pub fn sender(&self) -> CoreResult<Address> {
        let signature = self.signature.as_ref().ok_or(CoreError::MissingSignature)?;
        signature.recover(&self.signing_hash()?)
    }
}

/// Key of a transaction that a chain can receive
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransactionKey {
    pub transaction_hash: Hash,
    pub sender_block_hash: Hash,
}

impl TransactionKey {
    pub fn new(transaction_hash: Hash, sender_block_hash: Hash) -> Self {
        Self {
            transaction_hash,
            sender_block_hash,
        }
    }
}

/// Transaction placed on the recipient's chain. Immutable: adjustments
/// produce a modified copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveTransaction {
    /// Hash of the block on the sender's chain containing the send
    pub sender_block_hash: Hash,
    /// Hash of the send transaction being received
    pub send_transaction_hash: Hash,
    /// True when this receive returns leftover gas to the original sender
    pub is_refund: bool,
    /// Gas value still owed back to the sender after computation
    pub remaining_refund: U256,
}

impl ReceiveTransaction {
    pub fn new(sender_block_hash: Hash, send_transaction_hash: Hash) -> Self {
        Self {
            sender_block_hash,
            send_transaction_hash,
            is_refund: false,
            remaining_refund: U256::zero(),
        }
    }

    /// Refund transaction carrying `remaining_refund` back to the sender chain
    pub fn refund(
        sender_block_hash: Hash,
        send_transaction_hash: Hash,
        remaining_refund: U256,
    ) -> Self {
        Self {
            sender_block_hash,
            send_transaction_hash,
            is_refund: true,
            remaining_refund,
        }
    }

    /// Copy of this transaction with a new remaining refund
    pub fn with_remaining_refund(&self, remaining_refund: U256) -> Self {
        Self {
            remaining_refund,
            ..self.clone()
        }
    }

    pub fn hash(&self) -> CoreResult<Hash> {
        Ok(Hash::keccak(&encode(self)?))
    }

    /// Key under which the received send transaction was receivable
    pub fn transaction_key(&self) -> TransactionKey {
        TransactionKey::new(self.send_transaction_hash, self.sender_block_hash)
    }
}
