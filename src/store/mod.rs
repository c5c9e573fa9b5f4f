//! Ledger store module
//!
//! This module defines the storage seam of the ledger: the `LedgerStore` trait
//! for committed reads and for opening units of work, and the `UnitOfWork`
//! trait for the transactional read-modify-write the balance engine performs.
//!
//! Implementations:
//! - `memory` - DashMap-backed store with optimistic commit validation
//! - `sqlite` - rusqlite-backed relational store
//!
//! # Units of work
//!
//! A unit of work spans every read and write of one engine call. Either all of
//! its writes become visible at `commit`, or none do. Dropping a unit of work
//! without committing rolls it back, so release is guaranteed on every exit
//! path including early returns through `?`.
//!
//! Callers must not use committed reads on the same store while holding an open
//! unit of work on the same thread; the SQLite store serializes both on a
//! single connection.

pub mod memory;
pub mod query;
pub mod sqlite;

pub use memory::MemoryLedgerStore;
pub use query::{TransactionOrder, TransactionQuery, WalletOrder, WalletQuery};
pub use sqlite::SqliteLedgerStore;

use crate::types::{LedgerError, NewTransaction, Transaction, Wallet, WalletId};
use rust_decimal::Decimal;

/// Durable storage of wallets and transactions
///
/// Committed reads never observe the writes of an uncommitted unit of work.
pub trait LedgerStore: Send + Sync + std::fmt::Debug {
    /// Open a unit of work
    fn begin(&self) -> Result<Box<dyn UnitOfWork + '_>, LedgerError>;

    /// Read a committed wallet by id
    fn wallet(&self, id: WalletId) -> Result<Option<Wallet>, LedgerError>;

    /// Read a committed wallet by its label
    fn wallet_by_label(&self, label: &str) -> Result<Option<Wallet>, LedgerError>;

    /// Read a committed transaction by txid
    fn transaction(&self, txid: &str) -> Result<Option<Transaction>, LedgerError>;

    /// List committed wallets
    fn wallets(&self, query: &WalletQuery) -> Result<Vec<Wallet>, LedgerError>;

    /// List committed transactions
    fn transactions(&self, query: &TransactionQuery) -> Result<Vec<Transaction>, LedgerError>;

    /// Read a wallet together with the sum of its transaction amounts
    ///
    /// Both values come from the same committed state.
    fn wallet_with_ledger_sum(
        &self,
        id: WalletId,
    ) -> Result<Option<(Wallet, Decimal)>, LedgerError>;
}

/// A transactional read-modify-write session on a ledger store
///
/// Reads inside a unit of work see its own staged writes. Conditional writes
/// take the wallet as the caller last read it and return `None` when the row
/// has moved on since (its version changed), leaving it to the caller to roll
/// back and retry.
pub trait UnitOfWork {
    /// Read a wallet by id
    fn wallet(&self, id: WalletId) -> Result<Option<Wallet>, LedgerError>;

    /// Read a wallet by label
    fn wallet_by_label(&self, label: &str) -> Result<Option<Wallet>, LedgerError>;

    /// Read a transaction by txid
    fn transaction(&self, txid: &str) -> Result<Option<Transaction>, LedgerError>;

    /// Count the transactions referencing a wallet
    fn transaction_count(&self, wallet_id: WalletId) -> Result<u64, LedgerError>;

    /// Insert a wallet with a zero balance
    ///
    /// # Errors
    ///
    /// `DuplicateLabel` if the label is taken.
    fn insert_wallet(&mut self, label: &str) -> Result<Wallet, LedgerError>;

    /// Set the balance of a wallet, conditional on its version
    ///
    /// # Errors
    ///
    /// `InsufficientBalance` if `balance` is negative.
    fn set_balance(
        &mut self,
        wallet: &Wallet,
        balance: Decimal,
    ) -> Result<Option<Wallet>, LedgerError>;

    /// Set the label of a wallet, conditional on its version
    ///
    /// # Errors
    ///
    /// `DuplicateLabel` if another wallet uses the label.
    fn set_label(&mut self, wallet: &Wallet, label: &str) -> Result<Option<Wallet>, LedgerError>;

    /// Insert a transaction row
    ///
    /// # Errors
    ///
    /// - `DuplicateTransaction` if the txid is taken
    /// - `WalletNotFound` if the wallet does not exist
    fn insert_transaction(&mut self, new: NewTransaction) -> Result<Transaction, LedgerError>;

    /// Delete a wallet, conditional on its version
    ///
    /// Returns false when the wallet moved on since it was read.
    ///
    /// # Errors
    ///
    /// `WalletInUse` if transactions still reference the wallet.
    fn delete_wallet(&mut self, wallet: &Wallet) -> Result<bool, LedgerError>;

    /// Make every staged write visible atomically
    ///
    /// # Errors
    ///
    /// `Contention` if a row changed underneath this unit of work; the writes
    /// are discarded in that case.
    fn commit(self: Box<Self>) -> Result<(), LedgerError>;

    /// Discard every staged write
    fn rollback(self: Box<Self>) -> Result<(), LedgerError>;
}

/// Sum transaction amounts with checked arithmetic
pub(crate) fn ledger_sum<'a>(
    wallet_id: WalletId,
    amounts: impl IntoIterator<Item = &'a Decimal>,
) -> Result<Decimal, LedgerError> {
    amounts
        .into_iter()
        .try_fold(Decimal::ZERO, |sum, amount| sum.checked_add(*amount))
        .ok_or_else(|| {
            LedgerError::store_unavailable(format!(
                "ledger sum of wallet {} overflows",
                wallet_id
            ))
        })
}
