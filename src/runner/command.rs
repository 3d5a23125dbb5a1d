use std::str::FromStr;

use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;

use crate::models::DisputeDecision;
use crate::types::{AccountId, Amount, AmountError, TransactionId};

#[derive(Debug, Clone, Copy, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Open,
    Deposit,
    Transfer,
    Reverse,
    Dispute,
    Approve,
    Reject,
    Balance,
    History
}

/// A single row from the input CSV file.
///
/// Columns are shared between commands, so every field except `command` is
/// optional here and checked when the row is turned into a [`Command`].
#[derive(Debug, Clone, Deserialize)]
pub struct CommandRecord {
    pub command: CommandKind,
    pub account: Option<AccountId>,
    pub counterparty: Option<AccountId>,
    pub amount: Option<String>,
    pub tx: Option<TransactionId>,
    pub text: Option<String>
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Command [{command:?}] requires the [{field}] column")]
    MissingField {
        command: CommandKind,
        field: &'static str
    },
    #[error("Command [{command:?}] has an invalid amount: {source}")]
    InvalidAmount {
        command: CommandKind,
        source: AmountError
    },
    #[error("Command [{command:?}] has an invalid opening balance [{value}]")]
    InvalidBalance {
        command: CommandKind,
        value: String
    }
}

/// A validated ledger command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Open { account_id: AccountId, opening_balance: Decimal, name: String },
    Deposit { account_id: AccountId, amount: Amount, description: Option<String> },
    Transfer { sender_id: AccountId, receiver_id: AccountId, amount: Amount, description: Option<String> },
    Reverse { account_id: AccountId, transaction_id: TransactionId },
    Dispute { account_id: AccountId, transaction_id: TransactionId, reason: String },
    Resolve { transaction_id: TransactionId, decision: DisputeDecision },
    Balance { account_id: AccountId },
    History { account_id: AccountId, page: usize }
}

impl TryFrom<CommandRecord> for Command {
    type Error = CommandError;

    fn try_from(record: CommandRecord) -> Result<Self, Self::Error> {
        let kind = record.command;

        let command = match kind {
            CommandKind::Open => Command::Open {
                account_id: required(kind, "account", record.account)?,
                opening_balance: opening_balance(kind, record.amount.as_deref())?,
                name: record.text.unwrap_or_default()
            },
            CommandKind::Deposit => Command::Deposit {
                account_id: required(kind, "account", record.account)?,
                amount: amount(kind, record.amount.as_deref())?,
                description: record.text
            },
            CommandKind::Transfer => Command::Transfer {
                sender_id: required(kind, "account", record.account)?,
                receiver_id: required(kind, "counterparty", record.counterparty)?,
                amount: amount(kind, record.amount.as_deref())?,
                description: record.text
            },
            CommandKind::Reverse => Command::Reverse {
                account_id: required(kind, "account", record.account)?,
                transaction_id: required(kind, "tx", record.tx)?
            },
            CommandKind::Dispute => Command::Dispute {
                account_id: required(kind, "account", record.account)?,
                transaction_id: required(kind, "tx", record.tx)?,
                reason: required(kind, "text", record.text)?
            },
            CommandKind::Approve | CommandKind::Reject => Command::Resolve {
                transaction_id: required(kind, "tx", record.tx)?,
                decision: if kind == CommandKind::Approve { DisputeDecision::Approve } else { DisputeDecision::Reject }
            },
            CommandKind::Balance => Command::Balance {
                account_id: required(kind, "account", record.account)?
            },
            CommandKind::History => Command::History {
                account_id: required(kind, "account", record.account)?,
                page: record.tx.map_or(1, |page| usize::try_from(page).unwrap_or(usize::MAX))
            }
        };

        Ok(command)
    }
}

fn required<T>(command: CommandKind, field: &'static str, value: Option<T>) -> Result<T, CommandError> {
    value.ok_or(CommandError::MissingField { command, field })
}

fn amount(command: CommandKind, value: Option<&str>) -> Result<Amount, CommandError> {
    let value = required(command, "amount", value)?;
    Amount::from_str(value).map_err(|source| CommandError::InvalidAmount { command, source })
}

fn opening_balance(command: CommandKind, value: Option<&str>) -> Result<Decimal, CommandError> {
    match value {
        None => Ok(Decimal::ZERO),
        Some(value) => Decimal::from_str(value.trim())
            .map_err(|_| CommandError::InvalidBalance { command, value: value.to_string() })
    }
}
