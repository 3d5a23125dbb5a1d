use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use csv::{ReaderBuilder, Trim};
use tokio::sync::mpsc;
use tokio::task::{spawn_blocking, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::directory::{Counterparty, MemoryDirectory};
use crate::engine::Ledger;
use crate::models::{ErrorKind, LedgerError};
use crate::runner::{Command, CommandRecord};
use crate::storage::Storage;

/// Outcome of a run. Rows that could not be parsed count as rejected.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub applied: usize,
    pub rejected: usize
}

/// Streams ledger commands from a CSV file into a [`Ledger`].
///
/// Rows are parsed on a blocking task and handed over a bounded channel; commands
/// are applied in file order, since later rows refer to transaction ids assigned
/// by earlier ones.
pub struct CommandRunner<S: Storage> {
    ledger: Arc<Ledger<S, MemoryDirectory>>,
    directory: Arc<MemoryDirectory>,
    backpressure: usize
}

impl<S: Storage> CommandRunner<S> {
    pub fn new(ledger: Arc<Ledger<S, MemoryDirectory>>, directory: Arc<MemoryDirectory>) -> Self {
        Self {
            ledger,
            directory,
            backpressure: 256
        }
    }

    /// Orchestrates the end-to-end command pipeline for a CSV file.
    pub async fn run(&self, path: &str) -> anyhow::Result<RunSummary> {
        let (sender, receiver) = mpsc::channel::<csv::Result<CommandRecord>>(self.backpressure);
        let csv_handle = self.spawn_csv_reader(path.to_string(), sender);
        let summary = self.process_commands(receiver).await;

        if let Err(error) = csv_handle.await {
            error!("CSV ingestion failed: {error}");
        }

        Ok(summary)
    }

    fn spawn_csv_reader(&self, path: String, sender: mpsc::Sender<csv::Result<CommandRecord>>) -> JoinHandle<()> {
        spawn_blocking(move || {
            let file = match File::open(&path) {
                Ok(file) => file,
                Err(error) => {
                    error!("Error opening CSV at path: {path} | {error}");
                    return;
                }
            };

            let mut reader = ReaderBuilder::new()
                .trim(Trim::All)
                .flexible(true)
                .from_reader(BufReader::new(file));

            for result in reader.deserialize::<CommandRecord>() {
                if sender.blocking_send(result).is_err() {
                    break;
                }
            }
        })
    }

    async fn process_commands(&self, mut receiver: mpsc::Receiver<csv::Result<CommandRecord>>) -> RunSummary {
        let mut summary = RunSummary::default();

        while let Some(result) = receiver.recv().await {
            let record = match result {
                Ok(record) => record,
                Err(error) => {
                    error!("CSV deserialization error: {error}");
                    summary.rejected += 1;
                    continue;
                }
            };

            let command = match Command::try_from(record) {
                Ok(command) => command,
                Err(error) => {
                    warn!("{error}");
                    summary.rejected += 1;
                    continue;
                }
            };

            match self.apply(command).await {
                Ok(()) => summary.applied += 1,
                Err(error) => {
                    match error.kind() {
                        ErrorKind::OperationFailed => error!("{error}"),
                        kind => warn!("[{kind:?}] {error}")
                    }
                    summary.rejected += 1;
                }
            }
        }

        info!("Applied [{}] commands, rejected [{}]", summary.applied, summary.rejected);

        summary
    }

    async fn apply(&self, command: Command) -> Result<(), LedgerError> {
        match command {
            Command::Open { account_id, opening_balance, name } => {
                self.ledger.open_account(account_id, opening_balance)?;
                self.directory.register(Counterparty {
                    id: account_id,
                    email: format!("account{account_id}@ledger.local"),
                    name
                });
            }
            Command::Deposit { account_id, amount, description } => {
                let receipt = self.ledger.deposit(account_id, amount, description).await?;
                debug!("Deposit [{}] settled, balance of [{account_id}] is {}", receipt.transaction.transaction_id, receipt.new_balance);
            }
            Command::Transfer { sender_id, receiver_id, amount, description } => {
                let receipt = self.ledger.transfer(sender_id, receiver_id, amount, description).await?;
                debug!("Transfer [{}] settled, balance of [{sender_id}] is {}", receipt.transaction.transaction_id, receipt.new_balance);
            }
            Command::Reverse { account_id, transaction_id } => {
                self.ledger.reverse(transaction_id, account_id).await?;
            }
            Command::Dispute { account_id, transaction_id, reason } => {
                self.ledger.dispute(transaction_id, account_id, reason).await?;
            }
            Command::Resolve { transaction_id, decision } => {
                self.ledger.resolve_dispute(transaction_id, decision).await?;
            }
            Command::Balance { account_id } => {
                info!("Balance of [{account_id}] is {:.2}", self.ledger.balance(account_id)?);
            }
            Command::History { account_id, page } => {
                let history = self.ledger.history(account_id, page).await?;

                info!("History of [{account_id}], page {}/{} ({} total)", history.current_page, history.last_page, history.total);

                for entry in history.data {
                    info!(
                        "  [{}] {:?} {} from [{}] to [{}] status [{}]",
                        entry.transaction.transaction_id,
                        entry.transaction.transaction_type,
                        entry.transaction.amount,
                        entry.transaction.sender_id,
                        entry.transaction.receiver_id,
                        entry.transaction.status
                    );
                }
            }
        }

        Ok(())
    }
}
