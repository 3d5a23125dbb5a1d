use std::time::Duration;

/// Tunables for a [`crate::engine::Ledger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Number of transactions per history page.
    pub page_size: usize,
    pub max_description_len: usize,
    pub max_reason_len: usize,
    pub directory_cache_capacity: u64,
    pub directory_cache_ttl: Duration
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            page_size: 10,
            max_description_len: 255,
            max_reason_len: 255,
            directory_cache_capacity: 10_000,
            directory_cache_ttl: Duration::from_secs(300)
        }
    }
}

impl LedgerConfig {
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_max_description_len(mut self, max_description_len: usize) -> Self {
        self.max_description_len = max_description_len;
        self
    }

    pub fn with_max_reason_len(mut self, max_reason_len: usize) -> Self {
        self.max_reason_len = max_reason_len;
        self
    }

    pub fn with_cache_capacity(mut self, capacity: u64) -> Self {
        self.directory_cache_capacity = capacity;
        self
    }

    pub fn with_cache_timeout(mut self, timeout: Duration) -> Self {
        self.directory_cache_ttl = timeout;
        self
    }
}
