//! Wallet Ledger Library
//! # Overview
//!
//! This library keeps wallets and their transactions such that every wallet's
//! balance always equals the sum of its transactions and never goes negative,
//! including under concurrent submissions.
//!
//! # Architecture
//!
//! The system is organized into several key components:
//!
//! - [`types`] - Core data types (Wallet, Transaction, LedgerError, etc.)
//! - [`store`] - Ledger storage behind the `LedgerStore` / `UnitOfWork` traits:
//!   - [`store::memory`] - DashMap-backed store with optimistic commits
//!   - [`store::sqlite`] - SQLite-backed store
//! - [`core`] - Business logic components:
//!   - [`core::engine`] - Balance engine (apply transactions, wallet operations)
//!   - [`core::locks`] - Per-wallet locks with timed acquisition
//!   - [`core::cache`] - Balance read cache with synchronous invalidation
//! - [`config`] - Engine configuration and store selection
//! - [`cli`], [`io`], [`strategy`] - Batch driver reading ledger commands from CSV
//!
//! # Applying a transaction
//!
//! ```
//! use rust_decimal::Decimal;
//! use wallet_ledger::{BalanceEngine, EngineConfig, TransactionRequest};
//!
//! let engine = BalanceEngine::in_memory(EngineConfig::default());
//! let wallet = engine.create_wallet("savings", Decimal::new(10000, 2)).unwrap();
//!
//! let applied = engine
//!     .apply_transaction(TransactionRequest::new(wallet.id, Decimal::new(-5000, 2), "TX1"))
//!     .unwrap();
//! assert_eq!(applied.wallet.balance, Decimal::new(5000, 2));
//! ```

// Module declarations
pub mod cli;
pub mod config;
pub mod core;
pub mod io;
pub mod store;
pub mod strategy;
pub mod types;

pub use config::{CacheConfig, EngineConfig, StoreLocation};
pub use core::BalanceEngine;
pub use io::{write_transactions_csv, write_wallets_csv};
pub use store::{
    LedgerStore, MemoryLedgerStore, SqliteLedgerStore, TransactionOrder, TransactionQuery,
    UnitOfWork, WalletOrder, WalletQuery,
};
pub use types::{
    AppliedTransaction, ApplyOutcome, LedgerError, Transaction, TransactionId,
    TransactionRequest, Wallet, WalletId,
};
