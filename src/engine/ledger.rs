use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::LedgerConfig;
use crate::directory::{CachedDirectory, Directory};
use crate::engine::history::{HistoryEntry, HistoryPage};
use crate::engine::locks::AccountLocks;
use crate::models::{Account, BalanceError, DisputeDecision, DisputeStatus, LedgerError, Operation, Transaction, TransactionDraft, TransactionStatus, TransactionType, TransitionError};
use crate::storage::{Storage, StorageError, UnitOfWork};
use crate::types::{AccountId, Amount, TransactionId};

/// Result of a balance-moving operation: the updated log row and the caller's balance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub transaction: Transaction,
    pub new_balance: Decimal
}

/// Anything that can go wrong inside an atomic unit. Never shown to callers.
#[derive(Debug, Error)]
enum UnitError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Balance(#[from] BalanceError),
    #[error(transparent)]
    Transition(#[from] TransitionError)
}

/// The ledger engine.
///
/// Every balance-moving operation follows the same shape: validate, lock the
/// involved accounts in id order, re-check preconditions under the locks, then
/// apply all balance and status changes through one [`UnitOfWork`]. Callers only
/// ever see [`LedgerError`]; storage detail is logged here and dropped.
pub struct Ledger<S: Storage, D: Directory> {
    storage: Arc<S>,
    directory: CachedDirectory<D>,
    locks: AccountLocks,
    config: LedgerConfig
}

impl<S: Storage, D: Directory> Ledger<S, D> {
    pub fn new(storage: Arc<S>, directory: Arc<D>, config: LedgerConfig) -> Self {
        let directory = CachedDirectory::new(directory, config.directory_cache_capacity, config.directory_cache_ttl);

        Self {
            storage,
            directory,
            locks: AccountLocks::new(),
            config
        }
    }

    /// Opens an account with an opening balance, which may be negative to carry
    /// debt over from elsewhere.
    pub fn open_account(&self, account_id: AccountId, opening_balance: Decimal) -> Result<Account, LedgerError> {
        let account = Account::with_balance(account_id, opening_balance);

        match self.storage.open_account(account.clone()) {
            Ok(()) => {
                debug!("Account [{account_id}] opened with balance {opening_balance}");
                Ok(account)
            }
            Err(StorageError::DuplicateAccount(_)) => Err(LedgerError::account_exists()),
            Err(error) => Err(self.storage_failure(Operation::OpenAccount, error))
        }
    }

    pub fn balance(&self, account_id: AccountId) -> Result<Decimal, LedgerError> {
        Ok(self.require_account(Operation::Balance, account_id)?.balance)
    }

    /// All accounts ordered by id.
    pub fn accounts(&self) -> Result<Vec<Account>, LedgerError> {
        let mut accounts = self.storage.load_accounts()
            .map_err(|error| self.storage_failure(Operation::Balance, error))?;

        accounts.sort_by_key(|account| account.account_id);
        Ok(accounts)
    }

    /// Moves `amount` from the sender to the receiver.
    ///
    /// # Errors
    /// - `Validation` if the description is too long.
    /// - `InvalidOperation` for a transfer to self.
    /// - `AccountNotFound` if either party is unknown.
    /// - `InsufficientFunds` if the sender's balance is below `amount`, debt included.
    /// - `OperationFailed` if the atomic unit could not be committed; the log row is then marked `failed`.
    pub async fn transfer(&self, sender_id: AccountId, receiver_id: AccountId, amount: Amount, description: Option<String>) -> Result<Receipt, LedgerError> {
        self.check_text("description", description.as_deref(), self.config.max_description_len)?;

        if sender_id == receiver_id {
            return Err(LedgerError::self_transfer());
        }

        if self.directory.lookup(receiver_id).await.is_none() {
            return Err(LedgerError::AccountNotFound(receiver_id));
        }

        let _guards = self.locks.acquire(&[sender_id, receiver_id]).await;

        let sender = self.require_account(Operation::Transfer, sender_id)?;
        self.require_account(Operation::Transfer, receiver_id)?;

        if !sender.covers(amount) {
            return Err(LedgerError::insufficient_funds(sender_id, sender.balance, amount));
        }

        let transaction = self.storage.append_transaction(TransactionDraft::transfer(sender_id, receiver_id, amount, description))
            .map_err(|error| self.storage_failure(Operation::Transfer, error))?;

        let settled = self.settle(&transaction, |unit, transaction| {
            let sender = unit.account(sender_id)?;
            sender.debit(amount)?;
            let new_balance = sender.balance;

            let credit = unit.account(receiver_id)?.credit(amount)?;
            transaction.complete()?;

            Ok((new_balance, credit))
        });

        match settled {
            Ok((transaction, (new_balance, credit))) => {
                debug!("Transfer [{}] of {amount} from [{sender_id}] to [{receiver_id}] completed", transaction.transaction_id);

                if !credit.debt_repaid.is_zero() {
                    debug!("Transfer [{}] repaid {} of debt on account [{receiver_id}]", transaction.transaction_id, credit.debt_repaid);
                }

                Ok(Receipt { transaction, new_balance })
            }
            Err(error) => Err(self.abort(Operation::Transfer, transaction, error))
        }
    }

    /// Credits `amount` to the account. Outstanding debt is repaid first; the
    /// resulting balance is always the old balance plus `amount`.
    pub async fn deposit(&self, account_id: AccountId, amount: Amount, description: Option<String>) -> Result<Receipt, LedgerError> {
        self.check_text("description", description.as_deref(), self.config.max_description_len)?;

        let _guards = self.locks.acquire(&[account_id]).await;

        self.require_account(Operation::Deposit, account_id)?;

        let transaction = self.storage.append_transaction(TransactionDraft::deposit(account_id, amount, description))
            .map_err(|error| self.storage_failure(Operation::Deposit, error))?;

        let settled = self.settle(&transaction, |unit, transaction| {
            let account = unit.account(account_id)?;
            let credit = account.credit(amount)?;
            let new_balance = account.balance;

            transaction.complete()?;

            Ok((new_balance, credit))
        });

        match settled {
            Ok((transaction, (new_balance, credit))) => {
                debug!(
                    "Deposit [{}] of {amount} on account [{account_id}] completed, debt repaid {}, surplus {}",
                    transaction.transaction_id, credit.debt_repaid, credit.surplus
                );

                Ok(Receipt { transaction, new_balance })
            }
            Err(error) => Err(self.abort(Operation::Deposit, transaction, error))
        }
    }

    /// Applies the exact inverse of a completed transfer. Only its sender may do so.
    ///
    /// The receiver is debited without a funds check, so a receiver that already
    /// spent the money ends up in debt.
    pub async fn reverse(&self, transaction_id: TransactionId, requester_id: AccountId) -> Result<Receipt, LedgerError> {
        let transaction = self.require_transaction(Operation::Reversal, transaction_id)?;
        Self::check_reversible(&transaction, requester_id)?;

        let _guards = self.locks.acquire(&[transaction.sender_id, transaction.receiver_id]).await;

        //NOTE: Another reversal may have committed while we waited on the locks
        let transaction = self.require_transaction(Operation::Reversal, transaction_id)?;
        Self::check_reversible(&transaction, requester_id)?;

        let (sender_id, receiver_id, amount) = (transaction.sender_id, transaction.receiver_id, transaction.amount);
        let reversed_at = Utc::now();

        let settled = self.settle(&transaction, |unit, transaction| {
            transaction.reverse(reversed_at)?;

            let sender = unit.account(sender_id)?;
            sender.credit(amount)?;
            let new_balance = sender.balance;

            unit.account(receiver_id)?.debit(amount)?;

            Ok(new_balance)
        });

        match settled {
            Ok((transaction, new_balance)) => {
                debug!("Transaction [{transaction_id}] reversed by account [{requester_id}]");
                Ok(Receipt { transaction, new_balance })
            }
            Err(error) => Err(self.rollback(Operation::Reversal, transaction_id, error))
        }
    }

    /// Lets the receiver of a reversed transfer contest the reversal.
    pub async fn dispute(&self, transaction_id: TransactionId, caller_id: AccountId, reason: String) -> Result<Transaction, LedgerError> {
        let reason = reason.trim().to_string();

        if reason.is_empty() {
            return Err(LedgerError::text_required("reason"));
        }

        self.check_text("reason", Some(&reason), self.config.max_reason_len)?;

        let transaction = self.require_transaction(Operation::Dispute, transaction_id)?;
        Self::check_disputable(&transaction, caller_id)?;

        let _guards = self.locks.acquire(&[transaction.sender_id, transaction.receiver_id]).await;

        let transaction = self.require_transaction(Operation::Dispute, transaction_id)?;
        Self::check_disputable(&transaction, caller_id)?;

        match self.settle(&transaction, |_, transaction| transaction.open_dispute(reason).map_err(UnitError::from)) {
            Ok((transaction, ())) => {
                info!("Dispute opened on transaction [{transaction_id}] by account [{caller_id}]");
                Ok(transaction)
            }
            Err(error) => Err(self.rollback(Operation::Dispute, transaction_id, error))
        }
    }

    /// Administrative resolution of a pending dispute.
    ///
    /// Approval overturns the reversal by re-applying the original transfer
    /// (no funds check, the sender may go into debt). Rejection changes no balance.
    pub async fn resolve_dispute(&self, transaction_id: TransactionId, decision: DisputeDecision) -> Result<Transaction, LedgerError> {
        let transaction = self.require_transaction(Operation::DisputeResolution, transaction_id)?;
        Self::check_resolvable(&transaction)?;

        let _guards = self.locks.acquire(&[transaction.sender_id, transaction.receiver_id]).await;

        let transaction = self.require_transaction(Operation::DisputeResolution, transaction_id)?;
        Self::check_resolvable(&transaction)?;

        let (sender_id, receiver_id, amount) = (transaction.sender_id, transaction.receiver_id, transaction.amount);
        let resolved_at = Utc::now();

        let settled = self.settle(&transaction, |unit, transaction| {
            transaction.resolve_dispute(decision, resolved_at)?;

            if decision == DisputeDecision::Approve {
                unit.account(sender_id)?.debit(amount)?;
                unit.account(receiver_id)?.credit(amount)?;
            }

            Ok(())
        });

        match settled {
            Ok((transaction, ())) => {
                info!("Dispute on transaction [{transaction_id}] resolved as [{decision:?}]");
                Ok(transaction)
            }
            Err(error) => Err(self.rollback(Operation::DisputeResolution, transaction_id, error))
        }
    }

    /// Transactions where the caller is sender or receiver, newest first, with
    /// both counterparties resolved through the directory. Pages start at 1.
    pub async fn history(&self, caller_id: AccountId, page: usize) -> Result<HistoryPage, LedgerError> {
        self.require_account(Operation::History, caller_id)?;

        let mut transactions = self.storage.transactions_for(caller_id)
            .map_err(|error| self.storage_failure(Operation::History, error))?;

        transactions.sort_by(|left, right| {
            right.created_at.cmp(&left.created_at)
                .then(right.transaction_id.cmp(&left.transaction_id))
        });

        let per_page = self.config.page_size.max(1);
        let total = transactions.len();
        let current_page = page.max(1);
        let skip = (current_page - 1).saturating_mul(per_page);

        let mut data = Vec::with_capacity(per_page.min(total));

        for transaction in transactions.into_iter().skip(skip).take(per_page) {
            let sender = self.directory.lookup(transaction.sender_id).await;
            let receiver = if transaction.receiver_id == transaction.sender_id {
                sender.clone()
            } else {
                self.directory.lookup(transaction.receiver_id).await
            };

            let can_reverse = transaction.sender_id == caller_id
                && transaction.transaction_type == TransactionType::Transfer
                && transaction.status == TransactionStatus::Completed;

            data.push(HistoryEntry { transaction, sender, receiver, can_reverse });
        }

        Ok(HistoryPage {
            data,
            current_page,
            last_page: HistoryPage::last_page_for(total, per_page),
            per_page,
            total
        })
    }

    /// Runs `apply` against a fresh unit of work and a working copy of the
    /// transaction, then commits both together. Nothing is persisted on error.
    fn settle<T, F>(&self, transaction: &Transaction, apply: F) -> Result<(Transaction, T), UnitError>
    where
        F: FnOnce(&mut UnitOfWork<'_, S>, &mut Transaction) -> Result<T, UnitError>
    {
        let mut unit = UnitOfWork::begin(self.storage.as_ref());
        let mut updated = transaction.clone();

        let value = apply(&mut unit, &mut updated)?;

        unit.stage_transaction(updated.clone());
        unit.commit()?;

        Ok((updated, value))
    }

    /// Rolls back a pending operation and records the attempt as `failed`.
    fn abort(&self, operation: Operation, mut transaction: Transaction, error: UnitError) -> LedgerError {
        error!("The {operation} [{}] was rolled back: {error}", transaction.transaction_id);

        match transaction.fail() {
            Ok(()) => {
                if let Err(error) = self.storage.save_transaction(transaction) {
                    error!("Could not mark the {operation} as failed: {error}");
                }
            }
            Err(error) => warn!("{error}")
        }

        LedgerError::OperationFailed(operation)
    }

    fn rollback(&self, operation: Operation, transaction_id: TransactionId, error: UnitError) -> LedgerError {
        error!("The {operation} of transaction [{transaction_id}] was rolled back: {error}");
        LedgerError::OperationFailed(operation)
    }

    fn storage_failure(&self, operation: Operation, error: StorageError) -> LedgerError {
        error!("The {operation} failed at the storage boundary: {error}");
        LedgerError::OperationFailed(operation)
    }

    fn require_account(&self, operation: Operation, account_id: AccountId) -> Result<Account, LedgerError> {
        self.storage.load_account(account_id)
            .map_err(|error| self.storage_failure(operation, error))?
            .ok_or(LedgerError::AccountNotFound(account_id))
    }

    fn require_transaction(&self, operation: Operation, transaction_id: TransactionId) -> Result<Transaction, LedgerError> {
        self.storage.load_transaction(transaction_id)
            .map_err(|error| self.storage_failure(operation, error))?
            .ok_or(LedgerError::TransactionNotFound(transaction_id))
    }

    fn check_text(&self, field: &'static str, value: Option<&str>, max: usize) -> Result<(), LedgerError> {
        match value {
            Some(text) if text.chars().count() > max => Err(LedgerError::text_too_long(field, max)),
            _ => Ok(())
        }
    }

    fn check_reversible(transaction: &Transaction, requester_id: AccountId) -> Result<(), LedgerError> {
        if transaction.status != TransactionStatus::Completed {
            return Err(LedgerError::not_completed());
        }

        if transaction.sender_id != requester_id {
            return Err(LedgerError::not_owner());
        }

        if transaction.transaction_type != TransactionType::Transfer {
            return Err(LedgerError::not_reversible());
        }

        Ok(())
    }

    fn check_disputable(transaction: &Transaction, caller_id: AccountId) -> Result<(), LedgerError> {
        if transaction.dispute_status.is_some() {
            return Err(LedgerError::AlreadyDisputed(transaction.transaction_id));
        }

        if transaction.status != TransactionStatus::Reversed {
            return Err(LedgerError::not_reversed());
        }

        if transaction.receiver_id != caller_id {
            return Err(LedgerError::not_receiver());
        }

        Ok(())
    }

    fn check_resolvable(transaction: &Transaction) -> Result<(), LedgerError> {
        if transaction.dispute_status != Some(DisputeStatus::Pending) {
            return Err(LedgerError::no_pending_dispute());
        }

        Ok(())
    }
}
