//! Account model and the journaled account store

use crate::{StateError, ValidationError, VmError, VmResult};
use lattice_core::{decode, encode, Address, Hash, Nonce, TransactionKey, U256};
use lattice_db::{CheckpointId, JournalDB, Schema, SharedDatabase};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Account information
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Number of send transactions made from this chain
    pub nonce: Nonce,
    pub balance: U256,
    /// Contract code (empty for wallets)
    pub code: Vec<u8>,
    /// Contract storage, zero values are never stored
    pub storage: BTreeMap<U256, U256>,
    /// Sends from other chains that this chain may receive
    pub receivable_transactions: Vec<TransactionKey>,
}

impl Account {
    pub fn with_balance(balance: U256) -> Self {
        Self {
            balance,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nonce == 0 && self.balance.is_zero() && self.code.is_empty()
    }

    pub fn is_contract(&self) -> bool {
        !self.code.is_empty()
    }

    /// Keccak of the canonical encoding
    pub fn hash(&self) -> VmResult<Hash> {
        Ok(Hash::keccak(&encode(self)?))
    }
}

/// Signed balance adjustment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceDelta {
    Increase(U256),
    Decrease(U256),
}

/// Account API over a [`JournalDB`]. Every mutation lands in the journal and
/// can be rolled back with [`AccountDB::discard`].
#[derive(Debug)]
pub struct AccountDB {
    journal: JournalDB,
}

impl AccountDB {
    pub fn new(db: SharedDatabase) -> Self {
        Self {
            journal: JournalDB::new(db),
        }
    }

    fn read_account(&self, address: &Address) -> VmResult<Option<Account>> {
        match self.journal.get(&Schema::account_lookup_key(address))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Stored account, or an empty one if the address was never touched
    pub fn get_account(&self, address: &Address) -> VmResult<Account> {
        Ok(self.read_account(address)?.unwrap_or_default())
    }

    pub fn set_account(&mut self, address: &Address, account: &Account) -> VmResult<()> {
        self.journal
            .set(&Schema::account_lookup_key(address), &encode(account)?);
        Ok(())
    }

    fn update_account<F>(&mut self, address: &Address, update: F) -> VmResult<()>
    where
        F: FnOnce(&mut Account) -> VmResult<()>,
    {
        let mut account = self.get_account(address)?;
        update(&mut account)?;
        self.set_account(address, &account)
    }

    pub fn account_exists(&self, address: &Address) -> VmResult<bool> {
        Ok(self.journal.exists(&Schema::account_lookup_key(address))?)
    }

    /// Remove the account including its receivable transactions
    pub fn delete_account(&mut self, address: &Address) {
        debug!("Deleting account {}", address);
        self.journal.delete(&Schema::account_lookup_key(address));
    }

    //
    // Balance
    //

    pub fn get_balance(&self, address: &Address) -> VmResult<U256> {
        Ok(self.get_account(address)?.balance)
    }

    pub fn set_balance(&mut self, address: &Address, balance: U256) -> VmResult<()> {
        self.update_account(address, |account| {
            account.balance = balance;
            Ok(())
        })
    }

    pub fn delta_balance(&mut self, address: &Address, delta: BalanceDelta) -> VmResult<()> {
        let address = *address;
        self.update_account(&address, |account| {
            account.balance = match delta {
                BalanceDelta::Increase(amount) => account
                    .balance
                    .checked_add(amount)
                    .ok_or(StateError::BalanceOverflow(address))?,
                BalanceDelta::Decrease(amount) => account.balance.checked_sub(amount).ok_or(
                    StateError::NegativeBalance {
                        address,
                        balance: account.balance,
                        amount,
                    },
                )?,
            };
            Ok(())
        })
    }

    //
    // Nonce
    //

    pub fn get_nonce(&self, address: &Address) -> VmResult<Nonce> {
        Ok(self.get_account(address)?.nonce)
    }

    pub fn set_nonce(&mut self, address: &Address, nonce: Nonce) -> VmResult<()> {
        self.update_account(address, |account| {
            account.nonce = nonce;
            Ok(())
        })
    }

    pub fn increment_nonce(&mut self, address: &Address) -> VmResult<()> {
        let address = *address;
        self.update_account(&address, |account| {
            account.nonce = account
                .nonce
                .checked_add(1)
                .ok_or(StateError::NonceOverflow(address))?;
            Ok(())
        })
    }

    //
    // Code and storage
    //

    pub fn get_code(&self, address: &Address) -> VmResult<Vec<u8>> {
        Ok(self.get_account(address)?.code)
    }

    pub fn set_code(&mut self, address: &Address, code: Vec<u8>) -> VmResult<()> {
        self.update_account(address, |account| {
            account.code = code;
            Ok(())
        })
    }

    pub fn get_storage(&self, address: &Address, slot: U256) -> VmResult<U256> {
        Ok(self
            .get_account(address)?
            .storage
            .get(&slot)
            .copied()
            .unwrap_or_default())
    }

    pub fn set_storage(&mut self, address: &Address, slot: U256, value: U256) -> VmResult<()> {
        self.update_account(address, |account| {
            if value.is_zero() {
                account.storage.remove(&slot);
            } else {
                account.storage.insert(slot, value);
            }
            Ok(())
        })
    }

    //
    // Receivable transactions
    //

    pub fn get_receivable_transactions(&self, address: &Address) -> VmResult<Vec<TransactionKey>> {
        Ok(self.get_account(address)?.receivable_transactions)
    }

    pub fn has_receivable_transactions(&self, address: &Address) -> VmResult<bool> {
        Ok(!self.get_receivable_transactions(address)?.is_empty())
    }

    pub fn has_receivable_transaction(
        &self,
        address: &Address,
        key: &TransactionKey,
    ) -> VmResult<bool> {
        Ok(self.get_receivable_transactions(address)?.contains(key))
    }

    pub fn add_receivable_transaction(
        &mut self,
        address: &Address,
        key: TransactionKey,
    ) -> VmResult<()> {
        self.add_receivable_transactions(address, &[key])
    }

    /// Duplicates are ignored
    pub fn add_receivable_transactions(
        &mut self,
        address: &Address,
        keys: &[TransactionKey],
    ) -> VmResult<()> {
        self.update_account(address, |account| {
            for key in keys {
                if account.receivable_transactions.contains(key) {
                    warn!(
                        "Receivable transaction {} already present on {}",
                        key.transaction_hash, address
                    );
                    continue;
                }
                account.receivable_transactions.push(*key);
            }
            Ok(())
        })
    }

    pub fn delete_receivable_transaction(
        &mut self,
        address: &Address,
        key: &TransactionKey,
    ) -> VmResult<()> {
        self.update_account(address, |account| {
            let position = account
                .receivable_transactions
                .iter()
                .position(|existing| existing == key)
                .ok_or(ValidationError::NotReceivable(key.transaction_hash))?;
            account.receivable_transactions.remove(position);
            Ok(())
        })
    }

    //
    // Account hashes
    //

    pub fn get_account_hash(&self, address: &Address) -> VmResult<Hash> {
        self.get_account(address)?.hash()
    }

    /// Store the current account under its own hash so it can be restored later
    pub fn save_current_account_with_hash_lookup(&mut self, address: &Address) -> VmResult<Hash> {
        let account = self.get_account(address)?;
        let account_hash = account.hash()?;
        self.journal.set(
            &Schema::account_hash_lookup_key(&account_hash),
            &encode(&account)?,
        );
        Ok(account_hash)
    }

    /// Replace the whole account with the version saved under `account_hash`
    pub fn revert_to_account_from_hash(
        &mut self,
        account_hash: &Hash,
        address: &Address,
    ) -> VmResult<()> {
        let bytes = self
            .journal
            .get(&Schema::account_hash_lookup_key(account_hash))?
            .ok_or(StateError::AccountHashNotFound(*account_hash))?;
        let account: Account = decode(&bytes)?;
        debug!("Reverting account {} to {}", address, account_hash);
        self.set_account(address, &account)
    }

    //
    // Journal
    //

    pub fn record(&mut self) -> CheckpointId {
        self.journal.record()
    }

    pub fn discard(&mut self, checkpoint: CheckpointId) -> VmResult<()> {
        Ok(self.journal.discard(checkpoint)?)
    }

    pub fn commit(&mut self, checkpoint: CheckpointId) -> VmResult<()> {
        Ok(self.journal.commit(checkpoint)?)
    }

    pub fn persist(&mut self) -> VmResult<()> {
        self.journal.persist().map_err(VmError::from)
    }

    pub fn has_uncommitted_changes(&self) -> bool {
        self.journal.has_changes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_db::{KeyValueDB, MemoryDB};
    use proptest::prelude::*;
    use std::sync::Arc;

    fn address(byte: u8) -> Address {
        Address::new([byte; 20])
    }

    fn key(byte: u8) -> TransactionKey {
        TransactionKey::new(Hash::new([byte; 32]), Hash::new([byte + 1; 32]))
    }

    fn account_db() -> (Arc<MemoryDB>, AccountDB) {
        let db = Arc::new(MemoryDB::new());
        let account_db = AccountDB::new(db.clone());
        (db, account_db)
    }

    #[test]
    fn test_delta_balance() {
        let (_db, mut accounts) = account_db();
        let wallet = address(1);

        accounts
            .delta_balance(&wallet, BalanceDelta::Increase(U256::from(100)))
            .unwrap();
        accounts
            .delta_balance(&wallet, BalanceDelta::Decrease(U256::from(40)))
            .unwrap();
        assert_eq!(accounts.get_balance(&wallet).unwrap(), U256::from(60));

        let result = accounts.delta_balance(&wallet, BalanceDelta::Decrease(U256::from(61)));
        assert!(matches!(
            result,
            Err(VmError::State(StateError::NegativeBalance { .. }))
        ));
        assert_eq!(accounts.get_balance(&wallet).unwrap(), U256::from(60));
    }

    #[test]
    fn test_increment_nonce() {
        let (_db, mut accounts) = account_db();
        let wallet = address(1);

        accounts.increment_nonce(&wallet).unwrap();
        assert_eq!(accounts.get_nonce(&wallet).unwrap(), 1);

        accounts.set_nonce(&wallet, Nonce::MAX).unwrap();
        assert!(matches!(
            accounts.increment_nonce(&wallet),
            Err(VmError::State(StateError::NonceOverflow(_)))
        ));
        assert_eq!(accounts.get_nonce(&wallet).unwrap(), Nonce::MAX);
    }

    #[test]
    fn test_storage_and_code() {
        let (_db, mut accounts) = account_db();
        let contract = address(2);

        accounts.set_code(&contract, vec![1, 2, 3]).unwrap();
        accounts
            .set_storage(&contract, U256::from(1), U256::from(9))
            .unwrap();
        assert!(accounts.get_account(&contract).unwrap().is_contract());
        assert_eq!(
            accounts.get_storage(&contract, U256::from(1)).unwrap(),
            U256::from(9)
        );

        accounts
            .set_storage(&contract, U256::from(1), U256::zero())
            .unwrap();
        assert!(accounts.get_account(&contract).unwrap().storage.is_empty());
    }

    #[test]
    fn test_receivable_transactions() {
        let (_db, mut accounts) = account_db();
        let wallet = address(1);
        assert!(!accounts.has_receivable_transactions(&wallet).unwrap());

        accounts
            .add_receivable_transactions(&wallet, &[key(1), key(3), key(1)])
            .unwrap();
        assert_eq!(
            accounts.get_receivable_transactions(&wallet).unwrap(),
            vec![key(1), key(3)]
        );

        accounts.delete_receivable_transaction(&wallet, &key(1)).unwrap();
        assert!(!accounts.has_receivable_transaction(&wallet, &key(1)).unwrap());
        assert!(matches!(
            accounts.delete_receivable_transaction(&wallet, &key(1)),
            Err(VmError::Validation(ValidationError::NotReceivable(_)))
        ));
    }

    #[test]
    fn test_revert_to_account_from_hash() {
        let (_db, mut accounts) = account_db();
        let wallet = address(1);

        accounts.set_balance(&wallet, U256::from(10)).unwrap();
        let saved = accounts.save_current_account_with_hash_lookup(&wallet).unwrap();
        assert_eq!(saved, accounts.get_account_hash(&wallet).unwrap());

        accounts.set_balance(&wallet, U256::from(99)).unwrap();
        accounts.increment_nonce(&wallet).unwrap();
        accounts.revert_to_account_from_hash(&saved, &wallet).unwrap();

        assert_eq!(accounts.get_balance(&wallet).unwrap(), U256::from(10));
        assert_eq!(accounts.get_nonce(&wallet).unwrap(), 0);
        assert!(matches!(
            accounts.revert_to_account_from_hash(&Hash::new([0xaa; 32]), &wallet),
            Err(VmError::State(StateError::AccountHashNotFound(_)))
        ));
    }

    #[test]
    fn test_persist_writes_accounts() {
        let (db, mut accounts) = account_db();
        let wallet = address(1);

        accounts.set_balance(&wallet, U256::from(5)).unwrap();
        assert!(db.get(&Schema::account_lookup_key(&wallet)).unwrap().is_none());

        accounts.persist().unwrap();
        assert!(db.get(&Schema::account_lookup_key(&wallet)).unwrap().is_some());
        assert!(accounts.account_exists(&wallet).unwrap());

        accounts.delete_account(&wallet);
        assert!(!accounts.account_exists(&wallet).unwrap());
        assert_eq!(accounts.get_balance(&wallet).unwrap(), U256::zero());
    }

    #[derive(Debug, Clone)]
    enum Mutation {
        Credit(u8, u64),
        Debit(u8, u64),
        BumpNonce(u8),
        Store(u8, u64, u64),
        AddReceivable(u8, u8),
    }

    fn mutation_strategy() -> impl Strategy<Value = Mutation> {
        prop_oneof![
            (0u8..3, 0u64..1_000).prop_map(|(a, v)| Mutation::Credit(a, v)),
            (0u8..3, 0u64..1_000).prop_map(|(a, v)| Mutation::Debit(a, v)),
            (0u8..3).prop_map(Mutation::BumpNonce),
            (0u8..3, 0u64..4, 0u64..4).prop_map(|(a, s, v)| Mutation::Store(a, s, v)),
            (0u8..3, 0u8..4).prop_map(|(a, k)| Mutation::AddReceivable(a, k)),
        ]
    }

    fn apply(accounts: &mut AccountDB, mutations: &[Mutation]) {
        for mutation in mutations {
            // Debits may legitimately fail; the failure must leave no trace
            let _ = match mutation {
                Mutation::Credit(a, v) => {
                    accounts.delta_balance(&address(*a), BalanceDelta::Increase(U256::from(*v)))
                }
                Mutation::Debit(a, v) => {
                    accounts.delta_balance(&address(*a), BalanceDelta::Decrease(U256::from(*v)))
                }
                Mutation::BumpNonce(a) => accounts.increment_nonce(&address(*a)),
                Mutation::Store(a, s, v) => {
                    accounts.set_storage(&address(*a), U256::from(*s), U256::from(*v))
                }
                Mutation::AddReceivable(a, k) => {
                    accounts.add_receivable_transaction(&address(*a), key(*k))
                }
            };
        }
    }

    fn view(accounts: &AccountDB) -> Vec<Account> {
        (0u8..3)
            .map(|a| accounts.get_account(&address(a)).unwrap())
            .collect()
    }

    proptest! {
        #[test]
        fn prop_snapshot_discard_restores_accounts(
            before in prop::collection::vec(mutation_strategy(), 0..10),
            after in prop::collection::vec(mutation_strategy(), 0..10),
        ) {
            let (_db, mut accounts) = account_db();
            apply(&mut accounts, &before);
            let expected = view(&accounts);

            let snapshot = accounts.record();
            apply(&mut accounts, &after);
            accounts.discard(snapshot).unwrap();

            prop_assert_eq!(view(&accounts), expected);
        }

        #[test]
        fn prop_nested_snapshot_keeps_only_outer_effects(
            a in prop::collection::vec(mutation_strategy(), 0..10),
            b in prop::collection::vec(mutation_strategy(), 0..10),
        ) {
            let (_db, mut reference) = account_db();
            apply(&mut reference, &a);

            let (_db, mut accounts) = account_db();
            let s1 = accounts.record();
            apply(&mut accounts, &a);
            let s2 = accounts.record();
            apply(&mut accounts, &b);
            accounts.discard(s2).unwrap();
            accounts.commit(s1).unwrap();

            prop_assert_eq!(view(&accounts), view(&reference));
        }
    }
}
