mod config;
mod directory;
mod engine;
mod models;
mod runner;
mod storage;
mod types;

use std::io::{stderr, stdout, BufWriter, Write};
use std::process::exit;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tracing::info;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, Layer};

use crate::config::LedgerConfig;
use crate::directory::MemoryDirectory;
use crate::engine::Ledger;
use crate::models::Account;
use crate::runner::CommandRunner;
use crate::storage::MemoryStorage;

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: ledger-core [commands].csv [log_level:optional] > [balances].csv");
        eprintln!("Available log levels: error, warn, info, debug, trace (default: error)");
        exit(1);
    }

    let path = &args[1];
    let log_level = args.get(2)
        .map(|s| parse_log_level(s)).unwrap_or(LevelFilter::ERROR);

    setup_logging(log_level);

    let storage = Arc::new(MemoryStorage::new());
    let directory = Arc::new(MemoryDirectory::new());
    let ledger = Arc::new(Ledger::new(storage, directory.clone(), LedgerConfig::default()));
    let runner = CommandRunner::new(ledger.clone(), directory);

    let timer = Instant::now();
    let summary = runner.run(path).await?;
    let duration = timer.elapsed();

    info!("Processed [{}] commands in: {duration:?}", summary.applied + summary.rejected);

    write_results_to_stdout(&ledger.accounts()?)?;

    Ok(())
}

fn parse_log_level(level: &str) -> LevelFilter {
    match level.to_lowercase().as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "info" => LevelFilter::INFO,
        "warn" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        _ => {
            eprintln!("Invalid log level '{}', defaulting to 'error'", level);
            LevelFilter::ERROR
        }
    }
}

fn setup_logging(level: LevelFilter) {
    //NOTE: stdout carries the balances, so logging goes to stderr
    let terminal_log = fmt::layer()
        .with_target(false)
        .with_writer(stderr)
        .with_filter(level);

    tracing_subscriber::registry()
        .with(terminal_log)
        .init();
}

fn write_results_to_stdout(accounts: &[Account]) -> Result<()> {
    let mut output = BufWriter::new(stdout().lock());

    writeln!(output, "account,balance")?;

    for account in accounts {
        writeln!(output, "{},{:.2}", account.account_id, account.balance)?;
    }

    output.flush()?;

    Ok(())
}
