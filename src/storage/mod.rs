mod errors;
mod memory_storage;
mod unit_of_work;

use crate::models::{Account, Transaction, TransactionDraft};
use crate::types::{AccountId, TransactionId};

pub use errors::StorageError;
pub use memory_storage::MemoryStorage;
pub use unit_of_work::{UnitOfWork, WriteBatch};

/// The Account Store and Transaction Log behind the ledger.
///
/// Single-row reads and writes may be served independently; anything that must
/// land together goes through [`Storage::commit`], which applies a whole
/// [`WriteBatch`] or nothing.
pub trait Storage: Send + Sync + 'static {
    fn open_account(&self, account: Account) -> Result<(), StorageError>;
    fn load_account(&self, account_id: AccountId) -> Result<Option<Account>, StorageError>;
    fn load_accounts(&self) -> Result<Vec<Account>, StorageError>;

    /// Appends a new `pending` row and returns it with its assigned id.
    fn append_transaction(&self, draft: TransactionDraft) -> Result<Transaction, StorageError>;
    fn load_transaction(&self, transaction_id: TransactionId) -> Result<Option<Transaction>, StorageError>;
    fn save_transaction(&self, transaction: Transaction) -> Result<(), StorageError>;
    fn transactions_for(&self, account_id: AccountId) -> Result<Vec<Transaction>, StorageError>;

    fn commit(&self, batch: WriteBatch) -> Result<(), StorageError>;
}
