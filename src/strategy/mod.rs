//! Processing strategy module for ledger command files
//!
//! This module defines the Strategy pattern for complete processing pipelines,
//! encompassing CSV parsing and running commands through the balance engine.
//! Different implementations (synchronous, asynchronous batch) can be selected
//! at runtime.

use crate::cli::StrategyType;
use crate::core::BalanceEngine;
use crate::io::LedgerCommand;
use crate::types::{LedgerError, TransactionRequest, Wallet};
use std::io::Write;
use std::path::Path;
use tracing::warn;

pub mod r#async;
pub mod sync;

pub use self::r#async::{AsyncProcessingStrategy, BatchConfig};
pub use sync::SyncProcessingStrategy;

/// Counts of what happened to the commands of one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessingSummary {
    /// Commands that succeeded (including idempotent replays)
    pub succeeded: usize,
    /// Commands the engine rejected
    pub rejected: usize,
}

impl ProcessingSummary {
    /// Record the outcome of one command
    pub fn record(&mut self, outcome: &Result<(), LedgerError>) {
        match outcome {
            Ok(()) => self.succeeded += 1,
            Err(_) => self.rejected += 1,
        }
    }

    /// Add the counts of another summary
    pub fn merge(&mut self, other: ProcessingSummary) {
        self.succeeded += other.succeeded;
        self.rejected += other.rejected;
    }
}

/// Processing strategy trait for complete command-file pipelines
pub trait ProcessingStrategy: Send + Sync {
    /// Run the commands in `input_path` through `engine`, then write the
    /// resulting wallets to `output`
    ///
    /// # Arguments
    ///
    /// * `engine` - The balance engine to apply commands to
    /// * `input_path` - Path to the input CSV file of ledger commands
    /// * `output` - Writer receiving the final wallets as CSV
    ///
    /// # Errors
    ///
    /// Returns an error if the input cannot be opened, output cannot be
    /// written or the ledger store fails while listing wallets.
    ///
    /// Rejected commands and malformed rows are logged and skipped; they do
    /// not cause this method to fail.
    fn process(
        &self,
        engine: &BalanceEngine,
        input_path: &Path,
        output: &mut dyn Write,
    ) -> Result<ProcessingSummary, LedgerError>;
}

/// Create a processing strategy based on the specified strategy type
///
/// # Arguments
///
/// * `strategy_type` - The type of processing strategy to create (Sync or Async)
/// * `config` - Optional configuration for async batch processing (ignored for sync)
pub fn create_strategy(
    strategy_type: StrategyType,
    config: Option<BatchConfig>,
) -> Box<dyn ProcessingStrategy> {
    match strategy_type {
        StrategyType::Sync => Box::new(SyncProcessingStrategy),
        StrategyType::Async => Box::new(AsyncProcessingStrategy::new(config.unwrap_or_default())),
    }
}

fn wallet_by_label(engine: &BalanceEngine, label: &str) -> Result<Wallet, LedgerError> {
    engine
        .find_wallet(label)?
        .ok_or_else(|| LedgerError::invalid_label(label, "no wallet has this label"))
}

/// Run one ledger command through the engine
///
/// Wallets are looked up by label.
pub fn execute_command(engine: &BalanceEngine, command: LedgerCommand) -> Result<(), LedgerError> {
    match command {
        LedgerCommand::Open {
            label,
            opening_balance,
        } => engine.create_wallet(&label, opening_balance).map(|_| ()),
        LedgerCommand::Apply {
            label,
            txid,
            amount,
        } => {
            let wallet = wallet_by_label(engine, &label)?;
            engine
                .apply_transaction(TransactionRequest::new(wallet.id, amount, txid))
                .map(|_| ())
        }
        LedgerCommand::Close { label } => {
            let wallet = wallet_by_label(engine, &label)?;
            engine.delete_wallet(wallet.id)
        }
    }
}

/// Run a sequence of commands in order, logging and counting rejections
pub fn run_commands(
    engine: &BalanceEngine,
    commands: impl IntoIterator<Item = LedgerCommand>,
) -> ProcessingSummary {
    let mut summary = ProcessingSummary::default();
    for command in commands {
        let label = command.label().to_string();
        let outcome = execute_command(engine, command);
        if let Err(error) = &outcome {
            warn!(wallet = %label, %error, "Command rejected");
        }
        summary.record(&outcome);
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use rust_decimal::Decimal;

    fn open(label: &str, balance: i64) -> LedgerCommand {
        LedgerCommand::Open {
            label: label.to_string(),
            opening_balance: Decimal::new(balance, 0),
        }
    }

    fn tx(label: &str, txid: &str, amount: i64) -> LedgerCommand {
        LedgerCommand::Apply {
            label: label.to_string(),
            txid: txid.to_string(),
            amount: Decimal::new(amount, 0),
        }
    }

    #[test]
    fn test_run_commands_counts_rejections() {
        let engine = BalanceEngine::in_memory(EngineConfig::default());

        let summary = run_commands(
            &engine,
            vec![
                open("a", 10),
                tx("a", "TX1", -4),
                tx("a", "TX2", -7),
                tx("missing", "TX3", 1),
                tx("a", "TX1", -4),
                LedgerCommand::Close {
                    label: "a".to_string(),
                },
            ],
        );

        assert_eq!(
            summary,
            ProcessingSummary {
                succeeded: 3,
                rejected: 3
            }
        );
        let wallet = engine.find_wallet("a").unwrap().unwrap();
        assert_eq!(wallet.balance, Decimal::new(6, 0));
    }

    #[test]
    fn test_execute_close_deletes_unused_wallet() {
        let engine = BalanceEngine::in_memory(EngineConfig::default());
        execute_command(&engine, open("empty", 0)).unwrap();

        execute_command(
            &engine,
            LedgerCommand::Close {
                label: "empty".to_string(),
            },
        )
        .unwrap();

        assert!(engine.find_wallet("empty").unwrap().is_none());
    }

    #[test]
    fn test_unknown_label_is_rejected() {
        let engine = BalanceEngine::in_memory(EngineConfig::default());

        let result = execute_command(&engine, tx("ghost", "TX1", 1));

        assert!(matches!(result, Err(LedgerError::InvalidLabel { .. })));
    }
}
