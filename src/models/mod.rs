mod account;
mod errors;
mod transaction;

use std::fmt;
use std::fmt::{Display, Formatter};

pub use account::Account;
pub use errors::{BalanceError, ErrorKind, LedgerError, TransitionError};
pub use transaction::{Transaction, TransactionDraft};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TransactionType {
    Transfer,
    Deposit
}

/// Lifecycle of a ledger movement.
///
/// `pending -> {completed, failed}`, `completed -> reversed` for transfers, and
/// `reversed -> disputed` once a dispute on the reversal has been approved.
/// `failed` and `disputed` are terminal.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Reversed,
    Disputed
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DisputeStatus {
    Pending,
    Approved,
    Rejected
}

/// Administrative outcome for a pending dispute.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DisputeDecision {
    Approve,
    Reject
}

/// Caller-facing ledger operations, used to label failures without exposing internals.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Operation {
    OpenAccount,
    Transfer,
    Deposit,
    Reversal,
    Dispute,
    DisputeResolution,
    History,
    Balance
}

impl Display for TransactionStatus {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Reversed => "reversed",
            TransactionStatus::Disputed => "disputed"
        };
        formatter.write_str(name)
    }
}

impl Display for Operation {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::OpenAccount => "account opening",
            Operation::Transfer => "transfer",
            Operation::Deposit => "deposit",
            Operation::Reversal => "reversal",
            Operation::Dispute => "dispute",
            Operation::DisputeResolution => "dispute resolution",
            Operation::History => "history lookup",
            Operation::Balance => "balance lookup"
        };
        formatter.write_str(name)
    }
}
