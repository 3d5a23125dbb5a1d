use rust_decimal::Decimal;
use thiserror::Error;

use crate::models::{DisputeStatus, Operation, TransactionStatus, TransactionType};
use crate::types::{AccountId, Amount, TransactionId};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BalanceError {
    #[error("Numeric overflow occurred on the balance of account [{account_id}]")]
    Overflow {
        account_id: AccountId
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Transaction [{transaction_id}] cannot {action} from status [{from}]")]
    IllegalTransition {
        transaction_id: TransactionId,
        from: TransactionStatus,
        action: &'static str
    },
    #[error("Transaction [{transaction_id}]:[{transaction_type:?}] cannot be reversed")]
    NotReversible {
        transaction_id: TransactionId,
        transaction_type: TransactionType
    },
    #[error("Transaction [{transaction_id}] already has a [{status:?}] dispute")]
    AlreadyDisputed {
        transaction_id: TransactionId,
        status: DisputeStatus
    },
    #[error("Transaction [{transaction_id}] has no pending dispute")]
    NoPendingDispute {
        transaction_id: TransactionId
    }
}

/// Stable classification of a [`LedgerError`] for callers that map errors onto
/// their own surface (status codes, exit codes).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ErrorKind {
    Validation,
    BusinessRule,
    NotFound,
    OperationFailed
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Invalid {field}: {message}")]
    Validation {
        field: &'static str,
        message: String
    },
    #[error("Invalid operation: {0}")]
    InvalidOperation(&'static str),
    #[error("Insufficient funds on account [{account_id}]: balance {balance}, requested {requested}")]
    InsufficientFunds {
        account_id: AccountId,
        balance: Decimal,
        requested: Amount
    },
    #[error("Account [{0}] was not found")]
    AccountNotFound(AccountId),
    #[error("Transaction [{0}] was not found")]
    TransactionNotFound(TransactionId),
    #[error("Invalid state: {0}")]
    InvalidState(&'static str),
    #[error("Forbidden: {0}")]
    Forbidden(&'static str),
    #[error("Transaction [{0}] has already been disputed")]
    AlreadyDisputed(TransactionId),
    #[error("The {0} could not be processed, please try again")]
    OperationFailed(Operation)
}

impl LedgerError {
    //NOTE: Factory functions keep the human readable reasons in one place so every
    //      call site reports the same message for the same rule.

    pub fn text_too_long(field: &'static str, max: usize) -> Self {
        Self::Validation { field, message: format!("must not exceed {max} characters") }
    }

    pub fn text_required(field: &'static str) -> Self {
        Self::Validation { field, message: "is required".to_string() }
    }

    pub fn self_transfer() -> Self {
        Self::InvalidOperation("cannot transfer to self")
    }

    pub fn account_exists() -> Self {
        Self::InvalidOperation("account already exists")
    }

    pub fn not_reversible() -> Self {
        Self::InvalidOperation("only transfers can be reversed")
    }

    pub fn insufficient_funds(account_id: AccountId, balance: Decimal, requested: Amount) -> Self {
        Self::InsufficientFunds { account_id, balance, requested }
    }

    pub fn not_completed() -> Self {
        Self::InvalidState("only completed transactions can be reversed")
    }

    pub fn not_reversed() -> Self {
        Self::InvalidState("only reversed transactions can be disputed")
    }

    pub fn no_pending_dispute() -> Self {
        Self::InvalidState("only pending disputes can be resolved")
    }

    pub fn not_owner() -> Self {
        Self::Forbidden("can only reverse own transactions")
    }

    pub fn not_receiver() -> Self {
        Self::Forbidden("only the receiver can dispute a reversal")
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::AccountNotFound(_) | Self::TransactionNotFound(_) => ErrorKind::NotFound,
            Self::OperationFailed(_) => ErrorKind::OperationFailed,
            Self::InvalidOperation(_)
            | Self::InsufficientFunds { .. }
            | Self::InvalidState(_)
            | Self::Forbidden(_)
            | Self::AlreadyDisputed(_) => ErrorKind::BusinessRule
        }
    }
}
