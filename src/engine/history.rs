use crate::directory::Counterparty;
use crate::models::Transaction;

/// A transaction as seen by one of its participants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub transaction: Transaction,
    pub sender: Option<Counterparty>,
    pub receiver: Option<Counterparty>,
    /// Whether the viewer may reverse this transaction right now.
    pub can_reverse: bool
}

/// One page of a participant's history, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryPage {
    pub data: Vec<HistoryEntry>,
    pub current_page: usize,
    pub last_page: usize,
    pub per_page: usize,
    pub total: usize
}

impl HistoryPage {
    pub fn last_page_for(total: usize, per_page: usize) -> usize {
        total.div_ceil(per_page.max(1)).max(1)
    }
}
