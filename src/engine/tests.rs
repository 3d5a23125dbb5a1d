use super::history::HistoryPage;
use super::locks::AccountLocks;
use super::Ledger;

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use futures::future::join_all;
use rust_decimal::Decimal;
use tokio::time::timeout;

use crate::config::LedgerConfig;
use crate::directory::{Counterparty, MemoryDirectory};
use crate::models::{Account, DisputeDecision, DisputeStatus, ErrorKind, LedgerError, Operation, Transaction, TransactionDraft, TransactionStatus};
use crate::storage::{MemoryStorage, Storage, StorageError, WriteBatch};
use crate::types::{AccountId, Amount, TransactionId};

/// Memory storage whose atomic commits can be made to fail on demand.
struct FaultyStorage {
    inner: MemoryStorage,
    fail_commits: AtomicBool
}

impl FaultyStorage {
    fn new() -> Self {
        Self {
            inner: MemoryStorage::new(),
            fail_commits: AtomicBool::new(false)
        }
    }

    fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }
}

impl Storage for FaultyStorage {
    fn open_account(&self, account: Account) -> Result<(), StorageError> {
        self.inner.open_account(account)
    }

    fn load_account(&self, account_id: AccountId) -> Result<Option<Account>, StorageError> {
        self.inner.load_account(account_id)
    }

    fn load_accounts(&self) -> Result<Vec<Account>, StorageError> {
        self.inner.load_accounts()
    }

    fn append_transaction(&self, draft: TransactionDraft) -> Result<Transaction, StorageError> {
        self.inner.append_transaction(draft)
    }

    fn load_transaction(&self, transaction_id: TransactionId) -> Result<Option<Transaction>, StorageError> {
        self.inner.load_transaction(transaction_id)
    }

    fn save_transaction(&self, transaction: Transaction) -> Result<(), StorageError> {
        self.inner.save_transaction(transaction)
    }

    fn transactions_for(&self, account_id: AccountId) -> Result<Vec<Transaction>, StorageError> {
        self.inner.transactions_for(account_id)
    }

    fn commit(&self, batch: WriteBatch) -> Result<(), StorageError> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("disk on fire".to_string()));
        }

        self.inner.commit(batch)
    }
}

type TestLedger = Ledger<FaultyStorage, MemoryDirectory>;

fn setup_with_config(accounts: &[(AccountId, &str)], config: LedgerConfig) -> Result<(Arc<TestLedger>, Arc<FaultyStorage>)> {
    let storage = Arc::new(FaultyStorage::new());
    let directory = Arc::new(MemoryDirectory::new());
    let ledger = Ledger::new(storage.clone(), directory.clone(), config);

    for (account_id, balance) in accounts {
        directory.register(Counterparty {
            id: *account_id,
            name: format!("User {account_id}"),
            email: format!("user{account_id}@example.com")
        });
        ledger.open_account(*account_id, Decimal::from_str(balance)?)?;
    }

    Ok((Arc::new(ledger), storage))
}

fn setup(accounts: &[(AccountId, &str)]) -> Result<(Arc<TestLedger>, Arc<FaultyStorage>)> {
    setup_with_config(accounts, LedgerConfig::default())
}

fn amount(value: &str) -> Result<Amount> {
    Ok(Amount::from_str(value)?)
}

fn decimal(value: &str) -> Result<Decimal> {
    Ok(Decimal::from_str(value)?)
}

fn status_of(storage: &FaultyStorage, transaction_id: TransactionId) -> Result<TransactionStatus> {
    storage.load_transaction(transaction_id)?
        .map(|transaction| transaction.status)
        .ok_or_else(|| anyhow!("Transaction [{transaction_id}] missing from storage"))
}

#[tokio::test]
async fn test_transfer_moves_funds_between_accounts() -> Result<()> {
    let (ledger, storage) = setup(&[(1, "100"), (2, "0")])?;

    let receipt = ledger.transfer(1, 2, amount("40.50")?, Some("rent".to_string())).await?;

    assert_eq!(receipt.new_balance, decimal("59.50")?);
    assert_eq!(receipt.transaction.status, TransactionStatus::Completed);
    assert_eq!(receipt.transaction.description.as_deref(), Some("rent"));
    assert_eq!(ledger.balance(1)?, decimal("59.50")?);
    assert_eq!(ledger.balance(2)?, decimal("40.50")?);
    assert_eq!(status_of(&storage, receipt.transaction.transaction_id)?, TransactionStatus::Completed);

    Ok(())
}

#[tokio::test]
async fn test_transfer_to_a_receiver_in_debt_reduces_the_debt() -> Result<()> {
    let (ledger, _) = setup(&[(1, "200"), (2, "-80")])?;

    ledger.transfer(1, 2, amount("50")?, None).await?;

    assert_eq!(ledger.balance(1)?, decimal("150")?);
    assert_eq!(ledger.balance(2)?, decimal("-30")?);

    Ok(())
}

#[tokio::test]
async fn test_self_transfer_is_rejected_without_side_effects() -> Result<()> {
    let (ledger, storage) = setup(&[(1, "100")])?;

    let result = ledger.transfer(1, 1, amount("10")?, None).await;

    assert_eq!(result, Err(LedgerError::self_transfer()));
    assert_eq!(ledger.balance(1)?, decimal("100")?);
    assert!(storage.transactions_for(1)?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_transfer_with_insufficient_funds_is_rejected() -> Result<()> {
    let (ledger, storage) = setup(&[(1, "10"), (2, "0"), (3, "-10")])?;

    let result = ledger.transfer(1, 2, amount("10.01")?, None).await;

    assert!(matches!(result, Err(LedgerError::InsufficientFunds { account_id: 1, .. })));

    let result = ledger.transfer(3, 2, amount("5")?, None).await;

    assert!(matches!(result, Err(LedgerError::InsufficientFunds { account_id: 3, .. })));
    assert_eq!(ledger.balance(1)?, decimal("10")?);
    assert_eq!(ledger.balance(2)?, decimal("0")?);
    assert_eq!(ledger.balance(3)?, decimal("-10")?);
    assert!(storage.transactions_for(2)?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_transfer_with_exact_funds_succeeds() -> Result<()> {
    let (ledger, _) = setup(&[(1, "10"), (2, "0")])?;

    let receipt = ledger.transfer(1, 2, amount("10")?, None).await?;

    assert!(receipt.new_balance.is_zero());

    Ok(())
}

#[tokio::test]
async fn test_transfer_to_unknown_receiver_is_not_found() -> Result<()> {
    let (ledger, _) = setup(&[(1, "100")])?;

    let result = ledger.transfer(1, 42, amount("10")?, None).await;

    assert_eq!(result, Err(LedgerError::AccountNotFound(42)));
    assert_eq!(result.map_err(|error| error.kind()).err(), Some(ErrorKind::NotFound));
    assert_eq!(ledger.balance(1)?, decimal("100")?);

    Ok(())
}

#[tokio::test]
async fn test_transfer_rejects_overlong_description() -> Result<()> {
    let (ledger, _) = setup_with_config(&[(1, "100"), (2, "0")], LedgerConfig::default().with_max_description_len(5))?;

    let result = ledger.transfer(1, 2, amount("10")?, Some("too long".to_string())).await;

    assert!(matches!(result, Err(LedgerError::Validation { field: "description", .. })));
    assert_eq!(ledger.balance(1)?, decimal("100")?);

    Ok(())
}

#[tokio::test]
async fn test_failed_commit_rolls_back_transfer_and_marks_it_failed() -> Result<()> {
    let (ledger, storage) = setup(&[(1, "100"), (2, "0")])?;
    storage.fail_commits(true);

    let result = ledger.transfer(1, 2, amount("30")?, None).await;

    assert_eq!(result, Err(LedgerError::OperationFailed(Operation::Transfer)));
    assert_eq!(ledger.balance(1)?, decimal("100")?);
    assert_eq!(ledger.balance(2)?, decimal("0")?);

    let rows = storage.transactions_for(1)?;

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, TransactionStatus::Failed);

    Ok(())
}

#[tokio::test]
async fn test_deposit_without_debt_adds_to_balance() -> Result<()> {
    let (ledger, _) = setup(&[(1, "0")])?;

    let receipt = ledger.deposit(1, amount("100")?, None).await?;

    assert_eq!(receipt.new_balance, decimal("100")?);
    assert_eq!(receipt.transaction.sender_id, 1);
    assert_eq!(receipt.transaction.receiver_id, 1);
    assert_eq!(receipt.transaction.status, TransactionStatus::Completed);

    Ok(())
}

#[tokio::test]
async fn test_deposit_clears_debt_and_keeps_surplus() -> Result<()> {
    let (ledger, _) = setup(&[(1, "-50")])?;

    let receipt = ledger.deposit(1, amount("100")?, None).await?;

    assert_eq!(receipt.new_balance, decimal("50")?);
    assert_eq!(receipt.transaction.amount, amount("100")?);

    Ok(())
}

#[tokio::test]
async fn test_deposit_smaller_than_debt_leaves_balance_negative() -> Result<()> {
    let (ledger, _) = setup(&[(1, "-80")])?;

    let receipt = ledger.deposit(1, amount("50")?, None).await?;

    assert_eq!(receipt.new_balance, decimal("-30")?);
    assert_eq!(ledger.balance(1)?, decimal("-30")?);

    Ok(())
}

#[tokio::test]
async fn test_deposit_to_unknown_account_is_not_found() -> Result<()> {
    let (ledger, storage) = setup(&[])?;

    assert_eq!(ledger.deposit(9, amount("1")?, None).await, Err(LedgerError::AccountNotFound(9)));
    assert!(storage.transactions_for(9)?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_failed_commit_rolls_back_deposit_and_marks_it_failed() -> Result<()> {
    let (ledger, storage) = setup(&[(1, "-20")])?;
    storage.fail_commits(true);

    let result = ledger.deposit(1, amount("50")?, None).await;

    assert_eq!(result, Err(LedgerError::OperationFailed(Operation::Deposit)));
    assert_eq!(ledger.balance(1)?, decimal("-20")?);
    assert_eq!(storage.transactions_for(1)?[0].status, TransactionStatus::Failed);

    Ok(())
}

#[tokio::test]
async fn test_reversal_restores_both_balances() -> Result<()> {
    let (ledger, _) = setup(&[(1, "100"), (2, "5")])?;
    let transfer = ledger.transfer(1, 2, amount("60")?, None).await?;
    let transaction_id = transfer.transaction.transaction_id;

    let receipt = ledger.reverse(transaction_id, 1).await?;

    assert_eq!(receipt.transaction.status, TransactionStatus::Reversed);
    assert!(receipt.transaction.reversed_at.is_some());
    assert_eq!(receipt.new_balance, decimal("100")?);
    assert_eq!(ledger.balance(2)?, decimal("5")?);
    assert_eq!(ledger.reverse(transaction_id, 1).await, Err(LedgerError::not_completed()));

    Ok(())
}

#[tokio::test]
async fn test_reversal_can_push_receiver_into_debt() -> Result<()> {
    let (ledger, _) = setup(&[(1, "100"), (2, "0"), (3, "0")])?;
    let transfer = ledger.transfer(1, 2, amount("100")?, None).await?;
    ledger.transfer(2, 3, amount("70")?, None).await?;

    ledger.reverse(transfer.transaction.transaction_id, 1).await?;

    assert_eq!(ledger.balance(1)?, decimal("100")?);
    assert_eq!(ledger.balance(2)?, decimal("-70")?);
    assert_eq!(ledger.balance(3)?, decimal("70")?);

    Ok(())
}

#[tokio::test]
async fn test_only_the_sender_may_reverse() -> Result<()> {
    let (ledger, _) = setup(&[(1, "100"), (2, "0")])?;
    let transfer = ledger.transfer(1, 2, amount("10")?, None).await?;

    let result = ledger.reverse(transfer.transaction.transaction_id, 2).await;

    assert_eq!(result, Err(LedgerError::not_owner()));
    assert_eq!(ledger.balance(2)?, decimal("10")?);

    Ok(())
}

#[tokio::test]
async fn test_deposits_and_unknown_transactions_cannot_be_reversed() -> Result<()> {
    let (ledger, _) = setup(&[(1, "0")])?;
    let deposit = ledger.deposit(1, amount("10")?, None).await?;

    assert_eq!(ledger.reverse(deposit.transaction.transaction_id, 1).await, Err(LedgerError::not_reversible()));
    assert_eq!(ledger.reverse(999, 1).await, Err(LedgerError::TransactionNotFound(999)));
    assert_eq!(ledger.balance(1)?, decimal("10")?);

    Ok(())
}

#[tokio::test]
async fn test_failed_commit_leaves_reversal_completed() -> Result<()> {
    let (ledger, storage) = setup(&[(1, "100"), (2, "0")])?;
    let transfer = ledger.transfer(1, 2, amount("25")?, None).await?;
    let transaction_id = transfer.transaction.transaction_id;
    storage.fail_commits(true);

    let result = ledger.reverse(transaction_id, 1).await;

    assert_eq!(result, Err(LedgerError::OperationFailed(Operation::Reversal)));
    assert_eq!(status_of(&storage, transaction_id)?, TransactionStatus::Completed);
    assert_eq!(ledger.balance(1)?, decimal("75")?);
    assert_eq!(ledger.balance(2)?, decimal("25")?);

    storage.fail_commits(false);
    ledger.reverse(transaction_id, 1).await?;

    assert_eq!(ledger.balance(1)?, decimal("100")?);

    Ok(())
}

#[tokio::test]
async fn test_dispute_is_filed_by_the_receiver_of_a_reversal() -> Result<()> {
    let (ledger, _) = setup(&[(1, "100"), (2, "0")])?;
    let transfer = ledger.transfer(1, 2, amount("30")?, None).await?;
    let transaction_id = transfer.transaction.transaction_id;

    assert_eq!(ledger.dispute(transaction_id, 2, "goods were shipped".to_string()).await, Err(LedgerError::not_reversed()));

    ledger.reverse(transaction_id, 1).await?;

    assert_eq!(ledger.dispute(transaction_id, 1, "mine".to_string()).await, Err(LedgerError::not_receiver()));
    assert!(matches!(
        ledger.dispute(transaction_id, 2, "   ".to_string()).await,
        Err(LedgerError::Validation { field: "reason", .. })
    ));

    let disputed = ledger.dispute(transaction_id, 2, "goods were shipped".to_string()).await?;

    assert_eq!(disputed.status, TransactionStatus::Reversed);
    assert_eq!(disputed.dispute_status, Some(DisputeStatus::Pending));
    assert_eq!(disputed.dispute_reason.as_deref(), Some("goods were shipped"));
    assert_eq!(
        ledger.dispute(transaction_id, 2, "again".to_string()).await,
        Err(LedgerError::AlreadyDisputed(transaction_id))
    );
    assert_eq!(ledger.balance(1)?, decimal("100")?);
    assert_eq!(ledger.balance(2)?, decimal("0")?);

    Ok(())
}

#[tokio::test]
async fn test_dispute_reason_is_limited_by_config() -> Result<()> {
    let (ledger, _) = setup_with_config(&[(1, "100"), (2, "0")], LedgerConfig::default().with_max_reason_len(10))?;
    let transfer = ledger.transfer(1, 2, amount("30")?, None).await?;
    let transaction_id = transfer.transaction.transaction_id;
    ledger.reverse(transaction_id, 1).await?;

    assert!(matches!(
        ledger.dispute(transaction_id, 2, "this reason is too long".to_string()).await,
        Err(LedgerError::Validation { field: "reason", .. })
    ));

    let disputed = ledger.dispute(transaction_id, 2, "  delivered  ".to_string()).await?;

    assert_eq!(disputed.dispute_reason.as_deref(), Some("delivered"));

    Ok(())
}

#[tokio::test]
async fn test_approved_dispute_reapplies_the_transfer() -> Result<()> {
    let (ledger, _) = setup(&[(1, "100"), (2, "0")])?;
    let transfer = ledger.transfer(1, 2, amount("30")?, None).await?;
    let transaction_id = transfer.transaction.transaction_id;
    ledger.reverse(transaction_id, 1).await?;
    ledger.transfer(1, 2, amount("90")?, None).await?;
    ledger.dispute(transaction_id, 2, "delivered".to_string()).await?;

    let resolved = ledger.resolve_dispute(transaction_id, DisputeDecision::Approve).await?;

    assert_eq!(resolved.status, TransactionStatus::Disputed);
    assert_eq!(resolved.dispute_status, Some(DisputeStatus::Approved));
    assert_eq!(ledger.balance(1)?, decimal("-20")?);
    assert_eq!(ledger.balance(2)?, decimal("120")?);
    assert_eq!(
        ledger.resolve_dispute(transaction_id, DisputeDecision::Reject).await,
        Err(LedgerError::no_pending_dispute())
    );
    assert_eq!(ledger.reverse(transaction_id, 1).await, Err(LedgerError::not_completed()));

    Ok(())
}

#[tokio::test]
async fn test_rejected_dispute_changes_no_balance() -> Result<()> {
    let (ledger, _) = setup(&[(1, "100"), (2, "0")])?;
    let transfer = ledger.transfer(1, 2, amount("30")?, None).await?;
    let transaction_id = transfer.transaction.transaction_id;
    ledger.reverse(transaction_id, 1).await?;
    ledger.dispute(transaction_id, 2, "delivered".to_string()).await?;

    let resolved = ledger.resolve_dispute(transaction_id, DisputeDecision::Reject).await?;

    assert_eq!(resolved.status, TransactionStatus::Reversed);
    assert_eq!(resolved.dispute_status, Some(DisputeStatus::Rejected));
    assert!(resolved.resolved_at.is_some());
    assert_eq!(ledger.balance(1)?, decimal("100")?);
    assert_eq!(ledger.balance(2)?, decimal("0")?);

    Ok(())
}

#[tokio::test]
async fn test_resolving_without_a_pending_dispute_fails() -> Result<()> {
    let (ledger, _) = setup(&[(1, "100"), (2, "0")])?;
    let transfer = ledger.transfer(1, 2, amount("30")?, None).await?;

    let result = ledger.resolve_dispute(transfer.transaction.transaction_id, DisputeDecision::Approve).await;

    assert_eq!(result, Err(LedgerError::no_pending_dispute()));
    assert_eq!(ledger.balance(2)?, decimal("30")?);

    Ok(())
}

#[tokio::test]
async fn test_history_is_paginated_newest_first_with_counterparties() -> Result<()> {
    let (ledger, _) = setup_with_config(&[(1, "100"), (2, "0"), (3, "0")], LedgerConfig::default().with_page_size(2))?;
    let first = ledger.transfer(1, 2, amount("10")?, None).await?;
    let second = ledger.transfer(2, 1, amount("5")?, None).await?;
    let third = ledger.deposit(1, amount("1")?, None).await?;
    ledger.transfer(2, 3, amount("1")?, None).await?;

    let page = ledger.history(1, 1).await?;

    assert_eq!(page.total, 3);
    assert_eq!(page.per_page, 2);
    assert_eq!(page.last_page, 2);
    assert_eq!(page.current_page, 1);
    assert_eq!(page.data.len(), 2);
    assert_eq!(page.data[0].transaction.transaction_id, third.transaction.transaction_id);
    assert_eq!(page.data[1].transaction.transaction_id, second.transaction.transaction_id);
    assert!(!page.data[0].can_reverse);
    assert!(!page.data[1].can_reverse);
    assert_eq!(page.data[1].sender.as_ref().map(|user| user.name.as_str()), Some("User 2"));
    assert_eq!(page.data[1].receiver.as_ref().map(|user| user.id), Some(1));

    let page = ledger.history(1, 2).await?;

    assert_eq!(page.data.len(), 1);
    assert_eq!(page.data[0].transaction.transaction_id, first.transaction.transaction_id);
    assert!(page.data[0].can_reverse);

    assert!(ledger.history(1, 3).await?.data.is_empty());
    assert_eq!(ledger.history(1, 0).await?.current_page, 1);

    let quiet = ledger.history(3, 1).await?;

    assert_eq!(quiet.total, 1);
    assert_eq!(quiet.last_page, 1);
    assert_eq!(ledger.history(99, 1).await, Err(LedgerError::AccountNotFound(99)));

    Ok(())
}

#[tokio::test]
async fn test_history_counterparties_are_cached_until_they_expire() -> Result<()> {
    let storage = Arc::new(FaultyStorage::new());
    let directory = Arc::new(MemoryDirectory::new());
    let config = LedgerConfig::default()
        .with_cache_capacity(16)
        .with_cache_timeout(Duration::from_millis(100));
    let ledger = Ledger::new(storage, directory.clone(), config);

    for (account_id, name) in [(1, "Alice"), (2, "Bob")] {
        directory.register(Counterparty { id: account_id, name: name.to_string(), email: format!("{}@example.com", name.to_lowercase()) });
        ledger.open_account(account_id, decimal("50")?)?;
    }

    ledger.transfer(1, 2, amount("5")?, None).await?;

    let receiver_name = |page: &HistoryPage| page.data[0].receiver.as_ref().map(|user| user.name.clone());

    assert_eq!(receiver_name(&ledger.history(1, 1).await?), Some("Bob".to_string()));

    directory.register(Counterparty { id: 2, name: "Robert".to_string(), email: "robert@example.com".to_string() });

    assert_eq!(receiver_name(&ledger.history(1, 1).await?), Some("Bob".to_string()));

    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(receiver_name(&ledger.history(1, 1).await?), Some("Robert".to_string()));

    Ok(())
}

#[tokio::test]
async fn test_opening_a_duplicate_account_is_rejected() -> Result<()> {
    let (ledger, _) = setup(&[(1, "5")])?;

    assert_eq!(ledger.open_account(1, Decimal::ZERO), Err(LedgerError::account_exists()));
    assert_eq!(ledger.balance(1)?, decimal("5")?);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_transfers_never_overdraw_the_sender() -> Result<()> {
    let (ledger, _) = setup(&[(1, "100"), (2, "0"), (3, "0"), (4, "0")])?;

    let tasks = (0..12).map(|index| {
        let ledger = ledger.clone();
        let receiver = 2 + (index % 3);
        tokio::spawn(async move { ledger.transfer(1, receiver, Amount::from_str("30")?, None).await.map_err(anyhow::Error::from) })
    });

    let mut succeeded = 0;
    let mut insufficient = 0;

    for result in join_all(tasks).await {
        match result? {
            Ok(_) => succeeded += 1,
            Err(error) => {
                assert!(matches!(error.downcast_ref::<LedgerError>(), Some(LedgerError::InsufficientFunds { .. })));
                insufficient += 1;
            }
        }
    }

    assert_eq!(succeeded, 3);
    assert_eq!(insufficient, 9);
    assert_eq!(ledger.balance(1)?, decimal("10")?);

    let received: Decimal = [2, 3, 4].iter()
        .map(|account_id| ledger.balance(*account_id))
        .sum::<Result<Decimal, LedgerError>>()?;

    assert_eq!(received, decimal("90")?);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_opposite_transfers_do_not_deadlock_and_conserve_funds() -> Result<()> {
    let (ledger, _) = setup(&[(1, "1000"), (2, "1000")])?;

    let tasks = (0..200).map(|index| {
        let ledger = ledger.clone();
        let (sender, receiver) = if index % 2 == 0 { (1, 2) } else { (2, 1) };
        tokio::spawn(async move { ledger.transfer(sender, receiver, Amount::from_str("3")?, None).await.map_err(anyhow::Error::from) })
    });

    let results = timeout(Duration::from_secs(10), join_all(tasks)).await?;

    for result in results {
        result??;
    }

    assert_eq!(ledger.balance(1)?, decimal("1000")?);
    assert_eq!(ledger.balance(2)?, decimal("1000")?);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_never_see_half_a_transfer() -> Result<()> {
    let (ledger, _) = setup(&[(1, "1000"), (2, "1000"), (3, "1000")])?;
    let total = decimal("3000")?;
    let finished = Arc::new(AtomicBool::new(false));

    let reader = tokio::spawn({
        let ledger = ledger.clone();
        let finished = finished.clone();
        async move {
            let mut snapshots = 0usize;
            let mut torn = 0usize;

            loop {
                let sum: Decimal = ledger.accounts()?.iter().map(|account| account.balance).sum();

                if sum != total {
                    torn += 1;
                }

                snapshots += 1;

                if finished.load(Ordering::SeqCst) {
                    break;
                }

                tokio::task::yield_now().await;
            }

            Ok::<_, LedgerError>((snapshots, torn))
        }
    });

    let tasks = (0..300u64).map(|index| {
        let ledger = ledger.clone();
        let sender = index % 3 + 1;
        let receiver = (index + 1) % 3 + 1;
        tokio::spawn(async move { ledger.transfer(sender, receiver, Amount::from_str("7")?, None).await.map_err(anyhow::Error::from) })
    });

    for result in timeout(Duration::from_secs(10), join_all(tasks)).await? {
        result??;
    }

    finished.store(true, Ordering::SeqCst);

    let (snapshots, torn) = reader.await??;

    assert!(snapshots > 0);
    assert_eq!(torn, 0, "[{torn}] of [{snapshots}] snapshots saw a partial transfer");
    assert_eq!(ledger.accounts()?.iter().map(|account| account.balance).sum::<Decimal>(), total);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reversals_apply_exactly_once() -> Result<()> {
    let (ledger, _) = setup(&[(1, "100"), (2, "0")])?;
    let transfer = ledger.transfer(1, 2, amount("40")?, None).await?;
    let transaction_id = transfer.transaction.transaction_id;

    let tasks = (0..8).map(|_| {
        let ledger = ledger.clone();
        tokio::spawn(async move { ledger.reverse(transaction_id, 1).await })
    });

    let mut reversed = 0;

    for result in join_all(tasks).await {
        match result? {
            Ok(_) => reversed += 1,
            Err(error) => assert_eq!(error, LedgerError::not_completed())
        }
    }

    assert_eq!(reversed, 1);
    assert_eq!(ledger.balance(1)?, decimal("100")?);
    assert_eq!(ledger.balance(2)?, decimal("0")?);

    Ok(())
}

#[tokio::test]
async fn test_balances_match_the_net_effect_of_the_log() -> Result<()> {
    let (ledger, storage) = setup(&[(1, "0"), (2, "0"), (3, "0")])?;
    ledger.deposit(1, amount("500")?, None).await?;
    let first = ledger.transfer(1, 2, amount("120")?, None).await?;
    ledger.transfer(2, 3, amount("20")?, None).await?;
    ledger.transfer(1, 3, amount("80")?, None).await?;
    ledger.reverse(first.transaction.transaction_id, 1).await?;
    ledger.dispute(first.transaction.transaction_id, 2, "paid for work".to_string()).await?;
    ledger.resolve_dispute(first.transaction.transaction_id, DisputeDecision::Approve).await?;
    storage.fail_commits(true);
    let _ = ledger.transfer(3, 1, amount("10")?, None).await;
    storage.fail_commits(false);

    for account in ledger.accounts()? {
        let net = storage.transactions_for(account.account_id)?.iter()
            .filter(|transaction| matches!(transaction.status, TransactionStatus::Completed | TransactionStatus::Disputed))
            .fold(Decimal::ZERO, |net, transaction| {
                let mut net = net;
                if transaction.receiver_id == account.account_id {
                    net += transaction.amount.value();
                }
                if transaction.sender_id == account.account_id && transaction.sender_id != transaction.receiver_id {
                    net -= transaction.amount.value();
                }
                net
            });

        assert_eq!(account.balance, net, "account [{}] drifted from its log", account.account_id);
    }

    Ok(())
}

#[tokio::test]
async fn test_account_locks_are_taken_once_in_ascending_order() {
    let locks = AccountLocks::new();

    let guards = locks.acquire(&[9, 2, 9, 5]).await;

    assert_eq!(guards.account_ids(), &[2, 5, 9]);
    assert_eq!(locks.tracked(), 3);

    let blocked = timeout(Duration::from_millis(50), locks.acquire(&[5])).await;

    assert!(blocked.is_err());

    drop(guards);

    assert!(timeout(Duration::from_millis(50), locks.acquire(&[5, 2])).await.is_ok());
    assert_eq!(locks.tracked(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_account_locks_are_kept_while_someone_waits() -> Result<()> {
    let locks = Arc::new(AccountLocks::new());
    let guards = locks.acquire(&[7]).await;
    let (release, released) = tokio::sync::oneshot::channel::<()>();

    let waiter = tokio::spawn({
        let locks = locks.clone();
        async move {
            let _guards = locks.acquire(&[7]).await;
            let _ = released.await;
        }
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    drop(guards);

    assert_eq!(locks.tracked(), 1);

    let _ = release.send(());
    timeout(Duration::from_secs(1), waiter).await??;

    assert_eq!(locks.tracked(), 0);

    Ok(())
}
