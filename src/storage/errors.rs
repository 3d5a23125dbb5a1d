use thiserror::Error;

use crate::types::{AccountId, TransactionId};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage error: account [{0}] already exists")]
    DuplicateAccount(AccountId),
    #[error("Storage error: account [{0}] does not exist")]
    MissingAccount(AccountId),
    #[error("Storage error: transaction [{0}] does not exist")]
    MissingTransaction(TransactionId),
    #[error("Storage error: {0}")]
    Unavailable(String)
}
