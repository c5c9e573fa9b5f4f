//! Wallet Ledger CLI
//!
//! Command-line interface for applying wallet ledger commands from CSV files.
//!
//! # Usage
//!
//! ```bash
//! cargo run -- commands.csv > wallets.csv
//! cargo run -- --strategy sync --database ledger.db commands.csv > wallets.csv
//! cargo run -- --transactions-out transactions.csv --verify commands.csv > wallets.csv
//! ```
//!
//! Final wallet states go to stdout; logs go to stderr (`RUST_LOG`, default
//! `info`).
//!
//! # Exit Codes
//!
//! - 0: Success
//! - 1: Error (file not found, store unavailable, integrity violation, etc.)

use std::fs::File;
use std::process;

use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use wallet_ledger::cli::{self, CliArgs, StrategyType};
use wallet_ledger::store::TransactionQuery;
use wallet_ledger::strategy;
use wallet_ledger::{write_transactions_csv, BalanceEngine, LedgerError, TransactionOrder};

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn run(args: &CliArgs) -> Result<(), LedgerError> {
    let engine = BalanceEngine::open(&args.to_store_location(), args.to_engine_config())?;

    let strategy = {
        let config = (args.strategy == StrategyType::Async).then(|| args.to_batch_config());
        strategy::create_strategy(args.strategy, config)
    };

    let mut output = std::io::stdout();
    strategy.process(&engine, &args.input_file, &mut output)?;

    if let Some(path) = &args.transactions_out {
        let transactions = engine
            .list_transactions(&TransactionQuery::default().ordered_by(TransactionOrder::Applied))?;
        let mut file = File::create(path)?;
        write_transactions_csv(&transactions, &mut file)?;
        info!(path = %path.display(), count = transactions.len(), "Wrote transactions");
    }

    if args.verify {
        engine.verify_all()?;
    }

    Ok(())
}

fn main() {
    init_tracing();

    let args = cli::parse_args();

    if let Err(e) = run(&args) {
        error!(error = %e, "Fatal error");
        process::exit(1);
    }
}
