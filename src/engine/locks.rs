use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::types::AccountId;

type LockMap = DashMap<AccountId, Arc<Mutex<()>>>;

/// One async mutex per account id, created on first use and dropped again once
/// nobody holds or waits for it.
pub struct AccountLocks {
    locks: Arc<LockMap>
}

/// Exclusive hold over a set of accounts; released on drop.
pub struct AccountGuards {
    locks: Arc<LockMap>,
    account_ids: Vec<AccountId>,
    guards: Vec<OwnedMutexGuard<()>>
}

impl AccountGuards {
    #[cfg(test)]
    pub fn account_ids(&self) -> &[AccountId] {
        &self.account_ids
    }
}

impl Drop for AccountGuards {
    fn drop(&mut self) {
        self.guards.clear();

        //NOTE: Waiters hold a clone of the Arc, so a count of one means the map owns the only handle
        for account_id in &self.account_ids {
            self.locks.remove_if(account_id, |_, lock| Arc::strong_count(lock) == 1);
        }
    }
}

impl AccountLocks {
    pub fn new() -> Self {
        Self {
            locks: Arc::new(DashMap::new())
        }
    }

    /// Locks every listed account, always in ascending id order so two
    /// operations over the same pair can never wait on each other in a cycle.
    /// Duplicate ids are locked once.
    pub async fn acquire(&self, account_ids: &[AccountId]) -> AccountGuards {
        let mut account_ids = account_ids.to_vec();
        account_ids.sort_unstable();
        account_ids.dedup();

        let mut guards = Vec::with_capacity(account_ids.len());

        for account_id in &account_ids {
            //NOTE: Clone the Arc out first, the map shard must not stay borrowed across the await
            let lock = self.locks.entry(*account_id).or_default().value().clone();
            guards.push(lock.lock_owned().await);
        }

        AccountGuards {
            locks: self.locks.clone(),
            account_ids,
            guards
        }
    }

    #[cfg(test)]
    pub fn tracked(&self) -> usize {
        self.locks.len()
    }
}

impl Default for AccountLocks {
    fn default() -> Self {
        Self::new()
    }
}
