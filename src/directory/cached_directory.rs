use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;

use crate::directory::{Counterparty, Directory};
use crate::types::AccountId;

/// Read-through cache in front of a [`Directory`].
///
/// Only hits are cached, so a user registered after a failed lookup becomes
/// visible on the next call.
pub struct CachedDirectory<D: Directory> {
    inner: Arc<D>,
    cache: Cache<AccountId, Counterparty>
}

impl<D: Directory> CachedDirectory<D> {
    pub fn new(inner: Arc<D>, capacity: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(capacity)
            .time_to_live(ttl)
            .build();

        Self {
            inner,
            cache
        }
    }
}

impl<D: Directory> Directory for CachedDirectory<D> {
    async fn lookup(&self, account_id: AccountId) -> Option<Counterparty> {
        self.cache
            .optionally_get_with(account_id, self.inner.lookup(account_id))
            .await
    }
}
