use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use dashmap::DashMap;

use crate::models::{Account, Transaction, TransactionDraft};
use crate::storage::{Storage, StorageError, WriteBatch};
use crate::types::{AccountId, TransactionId};

/// In-process storage backed by concurrent maps.
///
/// A commit holds the write side of `gate` while it applies a batch, and every
/// read holds the read side, so readers see a batch either entirely or not at all.
pub struct MemoryStorage {
    accounts: DashMap<AccountId, Account>,
    transactions: DashMap<TransactionId, Transaction>,
    next_transaction_id: AtomicU64,
    gate: RwLock<()>
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            accounts: DashMap::new(),
            transactions: DashMap::new(),
            next_transaction_id: AtomicU64::new(1),
            gate: RwLock::new(())
        }
    }

    fn read_gate(&self) -> Result<RwLockReadGuard<'_, ()>, StorageError> {
        self.gate.read().map_err(|_| StorageError::Unavailable("commit gate is poisoned".to_string()))
    }

    fn write_gate(&self) -> Result<RwLockWriteGuard<'_, ()>, StorageError> {
        self.gate.write().map_err(|_| StorageError::Unavailable("commit gate is poisoned".to_string()))
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for MemoryStorage {
    fn open_account(&self, account: Account) -> Result<(), StorageError> {
        let _gate = self.write_gate()?;

        if self.accounts.contains_key(&account.account_id) {
            return Err(StorageError::DuplicateAccount(account.account_id));
        }

        self.accounts.insert(account.account_id, account);
        Ok(())
    }

    fn load_account(&self, account_id: AccountId) -> Result<Option<Account>, StorageError> {
        let _gate = self.read_gate()?;
        Ok(self.accounts.get(&account_id).map(|entry| entry.value().clone()))
    }

    fn load_accounts(&self) -> Result<Vec<Account>, StorageError> {
        let _gate = self.read_gate()?;
        Ok(self.accounts.iter().map(|entry| entry.value().clone()).collect())
    }

    fn append_transaction(&self, draft: TransactionDraft) -> Result<Transaction, StorageError> {
        let _gate = self.write_gate()?;
        let transaction_id = self.next_transaction_id.fetch_add(1, Ordering::Relaxed);
        let transaction = Transaction::pending(transaction_id, draft, Utc::now());

        self.transactions.insert(transaction_id, transaction.clone());
        Ok(transaction)
    }

    fn load_transaction(&self, transaction_id: TransactionId) -> Result<Option<Transaction>, StorageError> {
        let _gate = self.read_gate()?;
        Ok(self.transactions.get(&transaction_id).map(|entry| entry.value().clone()))
    }

    fn save_transaction(&self, transaction: Transaction) -> Result<(), StorageError> {
        let _gate = self.write_gate()?;

        if !self.transactions.contains_key(&transaction.transaction_id) {
            return Err(StorageError::MissingTransaction(transaction.transaction_id));
        }

        self.transactions.insert(transaction.transaction_id, transaction);
        Ok(())
    }

    fn transactions_for(&self, account_id: AccountId) -> Result<Vec<Transaction>, StorageError> {
        let _gate = self.read_gate()?;

        Ok(self.transactions.iter()
            .filter(|entry| entry.value().involves(account_id))
            .map(|entry| entry.value().clone())
            .collect())
    }

    fn commit(&self, batch: WriteBatch) -> Result<(), StorageError> {
        let _gate = self.write_gate()?;

        //NOTE: Validate the whole batch before touching anything so a bad row cannot leave half a batch applied
        if let Some(account) = batch.accounts.iter().find(|account| !self.accounts.contains_key(&account.account_id)) {
            return Err(StorageError::MissingAccount(account.account_id));
        }

        if let Some(transaction) = batch.transactions.iter().find(|transaction| !self.transactions.contains_key(&transaction.transaction_id)) {
            return Err(StorageError::MissingTransaction(transaction.transaction_id));
        }

        for account in batch.accounts {
            self.accounts.insert(account.account_id, account);
        }

        for transaction in batch.transactions {
            self.transactions.insert(transaction.transaction_id, transaction);
        }

        Ok(())
    }
}
