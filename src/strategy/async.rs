//! Asynchronous batch processing strategy
//!
//! This module provides a multi-threaded implementation of the
//! ProcessingStrategy trait. Commands are read in batches and each batch is
//! partitioned by wallet label, so different wallets are processed in parallel.
//!
//! # Architecture
//!
//! ```text
//! AsyncProcessingStrategy
//!     ├── BatchConfig (batch_size, max_concurrent_batches)
//!     ├── AsyncReader (batch CSV reading)
//!     └── partition_by_wallet → spawn_blocking per wallet → BalanceEngine
//! ```
//!
//! # Ordering
//!
//! - Batches are processed one after another, so a wallet's commands that
//!   span several batches keep their file order
//! - Within a batch, each wallet's commands run sequentially on one blocking
//!   task; different wallets run concurrently
//! - The engine's per-wallet locks make concurrent calls safe regardless; the
//!   partitioning only preserves per-wallet file order

use crate::core::BalanceEngine;
use crate::io::async_reader::AsyncReader;
use crate::io::csv_format::{write_wallets_csv, LedgerCommand};
use crate::io::open_error;
use crate::store::WalletQuery;
use crate::strategy::{run_commands, ProcessingStrategy, ProcessingSummary};
use crate::types::LedgerError;
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use tracing::{error, info, warn};

/// Configuration for batch processing
///
/// Controls how commands are batched and how many wallets are processed at
/// the same time within each batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchConfig {
    /// Number of commands per batch
    pub batch_size: usize,
    /// Maximum number of wallet partitions processing concurrently
    pub max_concurrent_batches: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            max_concurrent_batches: num_cpus::get(),
        }
    }
}

impl BatchConfig {
    /// Create a new BatchConfig, replacing zero values with defaults
    pub fn new(batch_size: usize, max_concurrent_batches: usize) -> Self {
        let default = Self::default();

        let batch_size = if batch_size == 0 {
            warn!(
                default = default.batch_size,
                "Invalid batch_size (0), using default"
            );
            default.batch_size
        } else {
            batch_size
        };

        let max_concurrent_batches = if max_concurrent_batches == 0 {
            warn!(
                default = default.max_concurrent_batches,
                "Invalid max_concurrent_batches (0), using default"
            );
            default.max_concurrent_batches
        } else {
            max_concurrent_batches
        };

        Self {
            batch_size,
            max_concurrent_batches,
        }
    }
}

/// Split a batch into per-wallet command lists, keeping each wallet's order
pub fn partition_by_wallet(batch: Vec<LedgerCommand>) -> HashMap<String, Vec<LedgerCommand>> {
    let mut partitions: HashMap<String, Vec<LedgerCommand>> = HashMap::new();

    for command in batch {
        partitions
            .entry(command.label().to_string())
            .or_default()
            .push(command);
    }

    partitions
}

/// Asynchronous batch processing strategy
#[derive(Debug, Clone)]
pub struct AsyncProcessingStrategy {
    config: BatchConfig,
}

impl AsyncProcessingStrategy {
    /// Create a new AsyncProcessingStrategy with the specified configuration
    pub fn new(config: BatchConfig) -> Self {
        Self { config }
    }

    /// Run one batch, one blocking task per wallet, and wait for all of them
    async fn process_batch(
        &self,
        engine: &BalanceEngine,
        batch: Vec<LedgerCommand>,
    ) -> ProcessingSummary {
        let tasks: Vec<_> = partition_by_wallet(batch)
            .into_values()
            .map(|commands| {
                let engine = engine.clone();
                tokio::task::spawn_blocking(move || run_commands(&engine, commands))
            })
            .collect();

        let mut summary = ProcessingSummary::default();
        for result in futures::future::join_all(tasks).await {
            match result {
                Ok(partition) => summary.merge(partition),
                Err(e) => error!(error = %e, "Wallet partition task failed"),
            }
        }
        summary
    }
}

impl ProcessingStrategy for AsyncProcessingStrategy {
    fn process(
        &self,
        engine: &BalanceEngine,
        input_path: &Path,
        output: &mut dyn Write,
    ) -> Result<ProcessingSummary, LedgerError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.config.max_concurrent_batches)
            .max_blocking_threads(self.config.max_concurrent_batches)
            .build()?;

        let summary = runtime.block_on(async {
            let file = tokio::fs::File::open(input_path)
                .await
                .map_err(|e| open_error(input_path, e))?;

            // Wrap tokio file in a compatibility layer for csv-async
            let compat_file = tokio_util::compat::TokioAsyncReadCompatExt::compat(file);
            let mut reader = AsyncReader::new(compat_file);

            let mut summary = ProcessingSummary::default();
            loop {
                let batch = reader.read_batch(self.config.batch_size).await;
                if batch.is_empty() {
                    break;
                }
                summary.merge(self.process_batch(engine, batch).await);
            }

            Ok::<_, LedgerError>(summary)
        })?;

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
