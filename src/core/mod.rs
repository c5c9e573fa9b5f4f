//! Core business logic module
//!
//! This module contains the balance-integrity components:
//! - `engine` - Transaction application and wallet operations
//! - `locks` - Per-wallet mutual exclusion with timed acquisition
//! - `cache` - Invalidation-safe balance read cache

pub mod cache;
pub mod engine;
pub mod locks;

pub use cache::BalanceCache;
pub use engine::BalanceEngine;
pub use locks::{WalletGuard, WalletLocks};
