use chrono::{DateTime, Utc};

use crate::models::errors::TransitionError;
use crate::models::{DisputeDecision, DisputeStatus, TransactionStatus, TransactionType};
use crate::types::{AccountId, Amount, TransactionId};

/// A movement requested by a caller, before the log assigns it an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionDraft {
    pub sender_id: AccountId,
    pub receiver_id: AccountId,
    pub amount: Amount,
    pub transaction_type: TransactionType,
    pub description: Option<String>
}

impl TransactionDraft {
    pub fn transfer(sender_id: AccountId, receiver_id: AccountId, amount: Amount, description: Option<String>) -> Self {
        Self {
            sender_id,
            receiver_id,
            amount,
            transaction_type: TransactionType::Transfer,
            description
        }
    }

    pub fn deposit(account_id: AccountId, amount: Amount, description: Option<String>) -> Self {
        Self {
            sender_id: account_id,
            receiver_id: account_id,
            amount,
            transaction_type: TransactionType::Deposit,
            description
        }
    }
}

/// A row of the transaction log.
///
/// `amount` is always the gross amount requested, even when a deposit was partly
/// or fully absorbed by debt. Status changes go through the transition methods
/// below so no lifecycle step can be skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub transaction_id: TransactionId,
    pub sender_id: AccountId,
    pub receiver_id: AccountId,
    pub amount: Amount,
    pub transaction_type: TransactionType,
    pub status: TransactionStatus,
    pub description: Option<String>,
    pub dispute_status: Option<DisputeStatus>,
    pub dispute_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub reversed_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>
}

impl Transaction {
    pub fn pending(transaction_id: TransactionId, draft: TransactionDraft, created_at: DateTime<Utc>) -> Self {
        Self {
            transaction_id,
            sender_id: draft.sender_id,
            receiver_id: draft.receiver_id,
            amount: draft.amount,
            transaction_type: draft.transaction_type,
            status: TransactionStatus::Pending,
            description: draft.description,
            dispute_status: None,
            dispute_reason: None,
            created_at,
            reversed_at: None,
            resolved_at: None
        }
    }

    pub fn involves(&self, account_id: AccountId) -> bool {
        self.sender_id == account_id || self.receiver_id == account_id
    }

    pub fn complete(&mut self) -> Result<(), TransitionError> {
        self.expect_status(TransactionStatus::Pending, "complete")?;
        self.status = TransactionStatus::Completed;
        Ok(())
    }

    pub fn fail(&mut self) -> Result<(), TransitionError> {
        self.expect_status(TransactionStatus::Pending, "fail")?;
        self.status = TransactionStatus::Failed;
        Ok(())
    }

    pub fn reverse(&mut self, at: DateTime<Utc>) -> Result<(), TransitionError> {
        self.expect_status(TransactionStatus::Completed, "reverse")?;

        if self.transaction_type != TransactionType::Transfer {
            return Err(TransitionError::NotReversible {
                transaction_id: self.transaction_id,
                transaction_type: self.transaction_type
            });
        }

        self.status = TransactionStatus::Reversed;
        self.reversed_at = Some(at);
        Ok(())
    }

    pub fn open_dispute(&mut self, reason: String) -> Result<(), TransitionError> {
        if let Some(status) = self.dispute_status {
            return Err(TransitionError::AlreadyDisputed {
                transaction_id: self.transaction_id,
                status
            });
        }

        self.expect_status(TransactionStatus::Reversed, "dispute")?;
        self.dispute_status = Some(DisputeStatus::Pending);
        self.dispute_reason = Some(reason);
        Ok(())
    }

    /// Closes a pending dispute. Approval overturns the reversal, so the
    /// transaction moves to `disputed`; rejection leaves it `reversed`.
    ///
    /// Status alone tells whether a row moves balances: `completed` and
    /// `disputed` rows are in force, `reversed` rows are not, whatever the
    /// `dispute_status` says.
    pub fn resolve_dispute(&mut self, decision: DisputeDecision, at: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.dispute_status != Some(DisputeStatus::Pending) {
            return Err(TransitionError::NoPendingDispute { transaction_id: self.transaction_id });
        }

        match decision {
            DisputeDecision::Approve => {
                self.status = TransactionStatus::Disputed;
                self.dispute_status = Some(DisputeStatus::Approved);
            }
            DisputeDecision::Reject => {
                self.dispute_status = Some(DisputeStatus::Rejected);
            }
        }

        self.resolved_at = Some(at);
        Ok(())
    }

    fn expect_status(&self, expected: TransactionStatus, action: &'static str) -> Result<(), TransitionError> {
        if self.status != expected {
            return Err(TransitionError::IllegalTransition {
                transaction_id: self.transaction_id,
                from: self.status,
                action
            });
        }

        Ok(())
    }
}
