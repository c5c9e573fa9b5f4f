//! Synchronous processing strategy
//!
//! This module provides a synchronous, single-threaded implementation of the
//! ProcessingStrategy trait.
//!
//! # Design
//!
//! The SyncProcessingStrategy focuses on orchestration, delegating:
//! - CSV parsing to `SyncReader` (iterator interface)
//! - Command execution to the shared `run_commands` runner
//! - CSV output to `csv_format::write_wallets_csv`
//!
//! Commands are applied strictly in file order, streaming one row at a time.

use crate::core::BalanceEngine;
use crate::io::csv_format::write_wallets_csv;
use crate::io::sync_reader::SyncReader;
use crate::store::WalletQuery;
use crate::strategy::{run_commands, ProcessingStrategy, ProcessingSummary};
use crate::types::LedgerError;
use std::io::Write;
use std::path::Path;
use tracing::{info, warn};

/// Synchronous processing strategy
#[derive(Debug, Clone, Copy)]
pub struct SyncProcessingStrategy;

impl ProcessingStrategy for SyncProcessingStrategy {
    fn process(
        &self,
        engine: &BalanceEngine,
        input_path: &Path,
        output: &mut dyn Write,
    ) -> Result<ProcessingSummary, LedgerError> {
        let reader = SyncReader::new(input_path)?;

        let mut malformed = 0;
        let commands = reader.filter_map(|row| match row {
            Ok(command) => Some(command),
            Err(error) => {
                warn!(%error, "Skipping invalid row");
                malformed += 1;
                None
            }
        });
        let mut summary = run_commands(engine, commands);
        summary.rejected += malformed;

        info!(
            succeeded = summary.succeeded,
            rejected = summary.rejected,
            "Finished processing"
        );

        let wallets = engine.list_wallets(&WalletQuery::default())?;
        write_wallets_csv(&wallets, output)?;

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// Helper function to create a temporary CSV file for testing
    fn create_temp_csv(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("Failed to create temp file");
        file.write_all(content.as_bytes())
            .expect("Failed to write to temp file");
        file.flush().expect("Failed to flush temp file");
        file
    }

    #[test]
    fn test_sync_strategy_processes_commands_in_order() {
        let csv_content = "type,wallet,txid,amount\n\
                          open,main,,100.00\n\
                          tx,main,TX1,-50.00\n\
                          tx,main,TX2,-60.00\n\
                          tx,main,TX3,25.00\n\
                          tx,main,TX3,25.00\n";
        let file = create_temp_csv(csv_content);
        let engine = BalanceEngine::in_memory(EngineConfig::default());
        let mut output = Vec::new();

        let summary = SyncProcessingStrategy
            .process(&engine, file.path(), &mut output)
            .unwrap();

        assert_eq!(summary.succeeded, 4);
        assert_eq!(summary.rejected, 1);
        assert_eq!(
            String::from_utf8(output).unwrap(),
            "id,label,balance\n1,main,75.00000000\n"
        );
    }

    #[test]
    fn test_sync_strategy_counts_malformed_rows() {
        let csv_content = "type,wallet,txid,amount\n\
                          open,a,,1\n\
                          tx,a,TX1,abc\n";
        let file = create_temp_csv(csv_content);
        let engine = BalanceEngine::in_memory(EngineConfig::default());
        let mut output = Vec::new();

        let summary = SyncProcessingStrategy
            .process(&engine, file.path(), &mut output)
            .unwrap();

        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.rejected, 1);
    }

    #[test]
    fn test_sync_strategy_handles_missing_file() {
        let engine = BalanceEngine::in_memory(EngineConfig::default());
        let mut output = Vec::new();

        let result =
            SyncProcessingStrategy.process(&engine, Path::new("nonexistent.csv"), &mut output);

        assert!(matches!(result, Err(LedgerError::FileNotFound { .. })));
        assert!(output.is_empty());
    }
}
