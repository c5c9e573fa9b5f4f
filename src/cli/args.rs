use crate::config::{CacheConfig, EngineConfig, StoreLocation, DEFAULT_LOCK_TIMEOUT};
use crate::strategy::BatchConfig;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

/// Apply wallet ledger commands with balance-integrity guarantees
#[derive(Parser, Debug)]
#[command(name = "wallet-ledger")]
#[command(about = "Apply wallet ledger commands with balance-integrity guarantees", long_about = None)]
pub struct CliArgs {
    /// Input CSV file path containing ledger commands
    #[arg(value_name = "INPUT", help = "Path to the input CSV file")]
    pub input_file: PathBuf,

    /// Processing strategy to use
    #[arg(
        long = "strategy",
        value_name = "STRATEGY",
        default_value = "async",
        help = "Processing strategy: 'sync' for in-order or 'async' for wallet-parallel"
    )]
    pub strategy: StrategyType,

    /// Number of commands per batch (async mode only)
    #[arg(
        long = "batch-size",
        value_name = "SIZE",
        help = "Number of commands per batch (default: 1000)"
    )]
    pub batch_size: Option<usize>,

    /// Maximum number of wallets processed concurrently (async mode only)
    #[arg(
        long = "max-concurrent",
        value_name = "COUNT",
        help = "Maximum number of wallets processed concurrently (default: CPU cores)"
    )]
    pub max_concurrent_batches: Option<usize>,

    /// SQLite database file; the ledger is kept in memory when absent
    #[arg(long = "database", value_name = "PATH", env = "WALLET_LEDGER_DATABASE")]
    pub database: Option<PathBuf>,

    /// How long to wait for a busy wallet, in milliseconds
    #[arg(
        long = "lock-timeout-ms",
        value_name = "MS",
        env = "WALLET_LEDGER_LOCK_TIMEOUT_MS"
    )]
    pub lock_timeout_ms: Option<u64>,

    /// Attempts per command on a version conflict
    #[arg(long = "max-retries", value_name = "N", env = "WALLET_LEDGER_MAX_RETRIES")]
    pub max_retries: Option<u32>,

    /// Lifetime of cached balances, in seconds
    #[arg(
        long = "cache-ttl-secs",
        value_name = "SECS",
        env = "WALLET_LEDGER_CACHE_TTL_SECS"
    )]
    pub cache_ttl_secs: Option<u64>,

    /// Disable the balance cache
    #[arg(long = "no-cache")]
    pub no_cache: bool,

    /// Also write every transaction as CSV to this file
    #[arg(long = "transactions-out", value_name = "PATH")]
    pub transactions_out: Option<PathBuf>,

    /// Check every wallet's balance against its transactions after processing
    #[arg(long = "verify")]
    pub verify: bool,
}

/// Available processing strategies
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum StrategyType {
    Sync,
    Async,
}

impl CliArgs {
    /// Create a BatchConfig from CLI arguments, falling back to defaults
    pub fn to_batch_config(&self) -> BatchConfig {
        if self.batch_size.is_some() || self.max_concurrent_batches.is_some() {
            let default = BatchConfig::default();
            BatchConfig::new(
                self.batch_size.unwrap_or(default.batch_size),
                self.max_concurrent_batches
                    .unwrap_or(default.max_concurrent_batches),
            )
        } else {
            BatchConfig::default()
        }
    }

    /// Create an EngineConfig from CLI arguments, falling back to defaults
    pub fn to_engine_config(&self) -> EngineConfig {
        let default = EngineConfig::default();

        let cache = if self.no_cache {
            CacheConfig::disabled()
        } else {
            CacheConfig {
                enabled: true,
                ttl: self
                    .cache_ttl_secs
                    .map_or(default.cache.ttl, Duration::from_secs),
            }
        };

        EngineConfig::new(
            self.lock_timeout_ms
                .map_or(DEFAULT_LOCK_TIMEOUT, Duration::from_millis),
            self.max_retries.unwrap_or(default.max_retries),
            cache,
        )
    }

    /// Where the ledger should be kept
    pub fn to_store_location(&self) -> StoreLocation {
        StoreLocation::from_path(self.database.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::default_strategy(&["program", "input.csv"], StrategyType::Async)]
    #[case::explicit_sync(&["program", "--strategy", "sync", "input.csv"], StrategyType::Sync)]
    #[case::explicit_async(&["program", "--strategy", "async", "input.csv"], StrategyType::Async)]
    fn test_strategy_parsing(#[case] args: &[&str], #[case] expected: StrategyType) {
        let parsed = CliArgs::try_parse_from(args).unwrap();
        assert_eq!(parsed.strategy, expected);
    }

    #[rstest]
    #[case::all_defaults(&["program", "input.csv"], 1000, num_cpus::get())]
    #[case::custom_batch_size(&["program", "--batch-size", "2000", "input.csv"], 2000, num_cpus::get())]
    #[case::custom_max_concurrent(&["program", "--max-concurrent", "8", "input.csv"], 1000, 8)]
    #[case::zero_batch_size(&["program", "--batch-size", "0", "input.csv"], 1000, num_cpus::get())]
    fn test_batch_config_conversion(
        #[case] args: &[&str],
        #[case] expected_batch_size: usize,
        #[case] expected_max_concurrent: usize,
    ) {
        let config = CliArgs::try_parse_from(args).unwrap().to_batch_config();

        assert_eq!(config.batch_size, expected_batch_size);
        assert_eq!(config.max_concurrent_batches, expected_max_concurrent);
    }

    #[test]
    fn test_engine_config_from_flags() {
        let parsed = CliArgs::try_parse_from([
            "program",
            "--lock-timeout-ms",
            "250",
            "--max-retries",
            "7",
            "--cache-ttl-secs",
            "30",
            "input.csv",
        ])
        .unwrap();

        let config = parsed.to_engine_config();

        assert_eq!(config.lock_timeout, Duration::from_millis(250));
        assert_eq!(config.max_retries, 7);
        assert_eq!(
            config.cache,
            CacheConfig {
                enabled: true,
                ttl: Duration::from_secs(30)
            }
        );
    }

    #[test]
    fn test_no_cache_flag() {
        let parsed = CliArgs::try_parse_from(["program", "--no-cache", "input.csv"]).unwrap();

        assert!(!parsed.to_engine_config().cache.enabled);
    }

    #[test]
    fn test_outputs_and_store() {
        let parsed = CliArgs::try_parse_from([
            "program",
            "--database",
            "ledger.db",
            "--transactions-out",
            "tx.csv",
            "--verify",
            "input.csv",
        ])
        .unwrap();

        assert_eq!(
            parsed.to_store_location(),
            StoreLocation::Sqlite(PathBuf::from("ledger.db"))
        );
        assert_eq!(parsed.transactions_out, Some(PathBuf::from("tx.csv")));
        assert!(parsed.verify);
    }

    #[rstest]
    #[case::missing_input(&["program"])]
    #[case::invalid_strategy(&["program", "--strategy", "invalid", "input.csv"])]
    #[case::negative_retries(&["program", "--max-retries", "-1", "input.csv"])]
    fn test_parsing_errors(#[case] args: &[&str]) {
        assert!(CliArgs::try_parse_from(args).is_err());
    }
}
