use dashmap::DashMap;

use crate::directory::{Counterparty, Directory};
use crate::types::AccountId;

pub struct MemoryDirectory {
    users: DashMap<AccountId, Counterparty>
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self {
            users: DashMap::new()
        }
    }

    pub fn register(&self, counterparty: Counterparty) {
        self.users.insert(counterparty.id, counterparty);
    }
}

impl Default for MemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl Directory for MemoryDirectory {
    async fn lookup(&self, account_id: AccountId) -> Option<Counterparty> {
        self.users.get(&account_id).map(|entry| entry.value().clone())
    }
}
