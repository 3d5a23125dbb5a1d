use std::collections::hash_map::Entry;
use std::collections::HashMap;

use tracing::debug;

use crate::models::{Account, Transaction};
use crate::storage::{Storage, StorageError};
use crate::types::AccountId;

/// Rows that must be persisted together.
#[derive(Debug, Default)]
pub struct WriteBatch {
    pub accounts: Vec<Account>,
    pub transactions: Vec<Transaction>
}

impl WriteBatch {
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty() && self.transactions.is_empty()
    }
}

/// A scoped atomic unit over a [`Storage`].
///
/// Accounts are loaded into private working copies and mutated there; nothing
/// reaches storage until [`UnitOfWork::commit`]. Dropping the unit on any other
/// path, including an early `?` return, discards every staged change.
pub struct UnitOfWork<'a, S: Storage> {
    storage: &'a S,
    accounts: HashMap<AccountId, Account>,
    transactions: Vec<Transaction>,
    finished: bool
}

impl<'a, S: Storage> UnitOfWork<'a, S> {
    pub fn begin(storage: &'a S) -> Self {
        Self {
            storage,
            accounts: HashMap::new(),
            transactions: Vec::new(),
            finished: false
        }
    }

    /// Returns the staged copy of an account, loading it on first use.
    pub fn account(&mut self, account_id: AccountId) -> Result<&mut Account, StorageError> {
        match self.accounts.entry(account_id) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let account = self.storage.load_account(account_id)?
                    .ok_or(StorageError::MissingAccount(account_id))?;

                Ok(entry.insert(account))
            }
        }
    }

    pub fn stage_transaction(&mut self, transaction: Transaction) {
        self.transactions.retain(|staged| staged.transaction_id != transaction.transaction_id);
        self.transactions.push(transaction);
    }

    pub fn commit(mut self) -> Result<(), StorageError> {
        self.finished = true;

        let batch = WriteBatch {
            accounts: self.accounts.drain().map(|(_, account)| account).collect(),
            transactions: std::mem::take(&mut self.transactions)
        };

        if batch.is_empty() {
            return Ok(());
        }

        self.storage.commit(batch)
    }
}

impl<S: Storage> Drop for UnitOfWork<'_, S> {
    fn drop(&mut self) {
        if !self.finished && (!self.accounts.is_empty() || !self.transactions.is_empty()) {
            debug!(
                "Rolled back unit of work with [{}] staged accounts and [{}] staged transactions",
                self.accounts.len(),
                self.transactions.len()
            );
        }
    }
}
