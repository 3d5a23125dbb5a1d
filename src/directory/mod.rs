mod cached_directory;
mod memory_directory;

use std::future::Future;

use crate::types::AccountId;

pub use cached_directory::CachedDirectory;
pub use memory_directory::MemoryDirectory;

/// Public identity of an account holder, as shown next to ledger history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Counterparty {
    pub id: AccountId,
    pub name: String,
    pub email: String
}

/// The external user directory. The ledger only ever looks users up by id.
pub trait Directory: Send + Sync + 'static {
    fn lookup(&self, account_id: AccountId) -> impl Future<Output = Option<Counterparty>> + Send;
}
