//! VM state of one chain for one block
//!
//! [`VmState`] owns the journaled [`AccountDB`] and the execution context of
//! the block being built or imported. The fork is picked once, when the state
//! is created, from the block timestamp.

use crate::{
    AccountDB, BalanceDelta, Computation, ExecutionContext, ForkConfig, ForkTable,
    ProcessedTransaction, TransactionExecutor, VmResult,
};
use lattice_core::{
    Address, BlockNumber, Hash, ReceiveTransaction, SendTransaction, StakeRewardBundle, Timestamp,
    TransactionKey,
};
use lattice_db::{CheckpointId, SharedDatabase};
use std::collections::BTreeSet;
use tracing::{debug, info};

pub struct VmState {
    account_db: AccountDB,
    execution_context: ExecutionContext,
    fork: ForkConfig,
}

impl VmState {
    pub fn new(
        db: SharedDatabase,
        execution_context: ExecutionContext,
        forks: &ForkTable,
    ) -> VmResult<Self> {
        let fork = forks.select(execution_context.timestamp())?.clone();
        debug!(
            "VM state for block {} at {} uses fork {}",
            execution_context.block_number(),
            execution_context.timestamp(),
            fork.name
        );
        Ok(Self {
            account_db: AccountDB::new(db),
            execution_context,
            fork,
        })
    }

    pub fn account_db(&self) -> &AccountDB {
        &self.account_db
    }

    pub fn account_db_mut(&mut self) -> &mut AccountDB {
        &mut self.account_db
    }

    pub fn execution_context(&self) -> &ExecutionContext {
        &self.execution_context
    }

    pub fn fork(&self) -> &ForkConfig {
        &self.fork
    }

    pub fn timestamp(&self) -> Timestamp {
        self.execution_context.timestamp()
    }

    pub fn block_number(&self) -> BlockNumber {
        self.execution_context.block_number()
    }

    pub fn gas_limit(&self) -> u64 {
        self.execution_context.gas_limit()
    }

    /// Subset of `chain_addresses` with pending receivable transactions
    pub fn filter_accounts_with_receivable_transactions(
        &self,
        chain_addresses: &[Address],
    ) -> VmResult<Vec<Address>> {
        let mut with_receivable = BTreeSet::new();
        for address in chain_addresses {
            if self.account_db.has_receivable_transactions(address)? {
                with_receivable.insert(*address);
            }
        }
        Ok(with_receivable.into_iter().collect())
    }

    //
    // Account resets
    //

    pub fn load_account_from_hash(&mut self, account_hash: &Hash, address: &Address) -> VmResult<()> {
        self.account_db.revert_to_account_from_hash(account_hash, address)
    }

    pub fn revert_account_to_hash_and_persist(
        &mut self,
        account_hash: &Hash,
        address: &Address,
    ) -> VmResult<()> {
        self.account_db.revert_to_account_from_hash(account_hash, address)?;
        self.account_db.persist()
    }

    /// Restore an account from its hash without losing sends that are still
    /// waiting to be received
    pub fn revert_account_to_hash_keep_receivable_transactions_and_persist(
        &mut self,
        account_hash: &Hash,
        address: &Address,
        receivable_transactions: &[TransactionKey],
    ) -> VmResult<()> {
        self.account_db.revert_to_account_from_hash(account_hash, address)?;
        self.account_db
            .add_receivable_transactions(address, receivable_transactions)?;
        self.account_db.persist()
    }

    pub fn clear_account_keep_receivable_transactions_and_persist(
        &mut self,
        address: &Address,
        receivable_transactions: &[TransactionKey],
    ) -> VmResult<()> {
        self.account_db.delete_account(address);
        self.account_db
            .add_receivable_transactions(address, receivable_transactions)?;
        self.account_db.persist()
    }

    //
    // Snapshots
    //

    pub fn snapshot(&mut self) -> CheckpointId {
        self.account_db.record()
    }

    pub fn revert(&mut self, snapshot: CheckpointId) -> VmResult<()> {
        self.account_db.discard(snapshot)
    }

    pub fn commit(&mut self, snapshot: CheckpointId) -> VmResult<()> {
        self.account_db.commit(snapshot)
    }

    pub fn persist(&mut self) -> VmResult<()> {
        self.account_db.persist()
    }

    //
    // Execution
    //

    /// Apply a transaction. A failed transaction leaves no trace in the
    /// account store.
    pub fn apply_transaction(
        &mut self,
        send_transaction: &SendTransaction,
        this_chain_address: Address,
        receive_transaction: Option<&ReceiveTransaction>,
        refund_transaction: Option<&ReceiveTransaction>,
        validate: bool,
    ) -> VmResult<(Computation, ProcessedTransaction)> {
        let snapshot = self.snapshot();
        let result = TransactionExecutor::new(
            &mut self.account_db,
            &self.execution_context,
            &self.fork,
        )
        .execute(
            send_transaction,
            this_chain_address,
            receive_transaction,
            refund_transaction,
            validate,
        );

        match result {
            Ok(outcome) => {
                self.commit(snapshot)?;
                Ok(outcome)
            }
            Err(e) => {
                debug!("Transaction rejected on {}: {}", this_chain_address, e);
                self.revert(snapshot)?;
                Err(e)
            }
        }
    }

    /// Credit both reward types to `address` in one step
    pub fn apply_reward_bundle(
        &mut self,
        reward_bundle: &StakeRewardBundle,
        address: &Address,
    ) -> VmResult<()> {
        let total_amount = reward_bundle.total_amount();
        if total_amount.is_zero() {
            return Ok(());
        }
        info!("Applying reward of {} to {}", total_amount, address);
        self.account_db
            .delta_balance(address, BalanceDelta::Increase(total_amount))
    }

    /// Run a send's computation for estimation; every change it makes is
    /// thrown away
    pub fn compute_single_transaction(
        &mut self,
        send_transaction: &SendTransaction,
    ) -> VmResult<Computation> {
        let snapshot = self.snapshot();
        let result = TransactionExecutor::new(
            &mut self.account_db,
            &self.execution_context,
            &self.fork,
        )
        .perform_transaction_computation(send_transaction);
        self.revert(snapshot)?;
        result
    }
}
