//! Error types for the wallet ledger
//!
//! This module defines every error the balance engine, the ledger stores and
//! the batch driver can produce. Each variant carries the offending field so
//! that an outer API layer can map it to a response without string matching.
//!
//! # Error Categories
//!
//! - **Validation Errors**: invalid amount, txid or label
//! - **Ledger Errors**: unknown wallet, duplicate txid/label, insufficient balance
//! - **Concurrency Errors**: contention, lock timeout (both retryable)
//! - **Infrastructure Errors**: store unavailable, file and CSV errors

use crate::types::WalletId;
use rust_decimal::Decimal;
use thiserror::Error;

/// Main error type for the wallet ledger
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    /// The wallet id does not resolve to an existing wallet
    #[error("Wallet {wallet} not found")]
    WalletNotFound {
        /// The wallet id that was looked up
        wallet: WalletId,
    },

    /// The txid is already used by a different transaction
    ///
    /// A resubmission with the same wallet and amount is not an error; it is
    /// replayed. This variant is only returned when the payload differs.
    #[error("Transaction '{txid}' already exists for wallet {wallet}")]
    DuplicateTransaction {
        /// The txid that is already taken
        txid: String,
        /// Wallet the existing transaction belongs to
        wallet: WalletId,
    },

    /// Applying the amount would leave the wallet with a negative balance
    #[error("Insufficient balance in wallet {wallet}: balance {balance}, amount {amount}")]
    InsufficientBalance {
        /// Wallet id
        wallet: WalletId,
        /// Balance read inside the unit of work
        balance: Decimal,
        /// Requested (negative) amount
        amount: Decimal,
    },

    /// Amount is zero, negative where not allowed, or too precise
    #[error("Invalid amount '{amount}': {reason}")]
    InvalidAmount {
        /// The offending amount as given
        amount: String,
        /// Why the amount was rejected
        reason: String,
    },

    /// The txid is empty, too long or padded with whitespace
    #[error("Invalid txid '{txid}': {reason}")]
    InvalidTxid {
        /// The offending txid
        txid: String,
        /// Why the txid was rejected
        reason: String,
    },

    /// The wallet label is empty or too long
    #[error("Invalid label '{label}': {reason}")]
    InvalidLabel {
        /// The offending label
        label: String,
        /// Why the label was rejected
        reason: String,
    },

    /// Another wallet already uses this label
    #[error("Wallet label '{label}' is already in use")]
    DuplicateLabel {
        /// The label that is taken
        label: String,
    },

    /// The wallet cannot be deleted while transactions reference it
    #[error("Wallet {wallet} is referenced by {transactions} transaction(s)")]
    WalletInUse {
        /// Wallet id
        wallet: WalletId,
        /// Number of referencing transactions
        transactions: u64,
    },

    /// Concurrent writers kept invalidating the wallet row
    ///
    /// Retryable. Returned after the engine exhausted its internal retries.
    #[error("Contention on wallet {wallet} after {attempts} attempt(s)")]
    Contention {
        /// Wallet id
        wallet: WalletId,
        /// Number of attempts made
        attempts: u32,
    },

    /// The wallet lock could not be acquired in time
    ///
    /// Retryable. Nothing was mutated.
    #[error("Timed out after {waited_ms}ms waiting for wallet {wallet}")]
    Timeout {
        /// Wallet id
        wallet: WalletId,
        /// How long the call waited
        waited_ms: u64,
    },

    /// The ledger store failed
    ///
    /// Fatal to the request, retryable by the caller.
    #[error("Ledger store unavailable: {message}")]
    StoreUnavailable {
        /// Description of the store failure
        message: String,
    },

    /// A wallet balance disagrees with the sum of its transactions
    #[error("Integrity violation in wallet {wallet}: balance {balance}, ledger sum {ledger_sum}")]
    IntegrityViolation {
        /// Wallet id
        wallet: WalletId,
        /// Stored balance
        balance: Decimal,
        /// Sum of the wallet's transaction amounts
        ledger_sum: Decimal,
    },

    /// Input file not found at the specified path
    #[error("File not found: {path}")]
    FileNotFound {
        /// The path that was not found
        path: String,
    },

    /// I/O error occurred while reading or writing files
    #[error("I/O error: {message}")]
    IoError {
        /// Description of the I/O error
        message: String,
    },

    /// CSV parsing or command conversion error
    #[error("CSV parse error{}: {message}", line.map(|l| format!(" at line {}", l)).unwrap_or_default())]
    ParseError {
        /// Line number where the error occurred (if available)
        line: Option<u64>,
        /// Description of the parsing error
        message: String,
    },
}

impl From<std::io::Error> for LedgerError {
    fn from(error: std::io::Error) -> Self {
        LedgerError::IoError {
            message: error.to_string(),
        }
    }
}

impl From<csv::Error> for LedgerError {
    fn from(error: csv::Error) -> Self {
        let line = error.position().map(|pos| pos.line());

        LedgerError::ParseError {
            line,
            message: error.to_string(),
        }
    }
}

impl LedgerError {
    /// Whether the caller may retry the same request unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::Contention { .. }
                | LedgerError::Timeout { .. }
                | LedgerError::StoreUnavailable { .. }
        )
    }

    /// Name of the request field the error is about, if any
    pub fn field(&self) -> Option<&'static str> {
        match self {
            LedgerError::WalletNotFound { .. }
            | LedgerError::WalletInUse { .. }
            | LedgerError::Contention { .. }
            | LedgerError::Timeout { .. } => Some("wallet_id"),
            LedgerError::DuplicateTransaction { .. } | LedgerError::InvalidTxid { .. } => {
                Some("txid")
            }
            LedgerError::InsufficientBalance { .. } | LedgerError::InvalidAmount { .. } => {
                Some("amount")
            }
            LedgerError::InvalidLabel { .. } | LedgerError::DuplicateLabel { .. } => Some("label"),
            LedgerError::IntegrityViolation { .. } => Some("balance"),
            LedgerError::StoreUnavailable { .. }
            | LedgerError::FileNotFound { .. }
            | LedgerError::IoError { .. }
            | LedgerError::ParseError { .. } => None,
        }
    }

    /// Create a WalletNotFound error
    pub fn wallet_not_found(wallet: WalletId) -> Self {
        LedgerError::WalletNotFound { wallet }
    }

    /// Create a DuplicateTransaction error
    pub fn duplicate_transaction(txid: &str, wallet: WalletId) -> Self {
        LedgerError::DuplicateTransaction {
            txid: txid.to_string(),
            wallet,
        }
    }

    /// Create an InsufficientBalance error
    pub fn insufficient_balance(wallet: WalletId, balance: Decimal, amount: Decimal) -> Self {
        LedgerError::InsufficientBalance {
            wallet,
            balance,
            amount,
        }
    }

    /// Create an InvalidAmount error
    pub fn invalid_amount(amount: impl ToString, reason: &str) -> Self {
        LedgerError::InvalidAmount {
            amount: amount.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create an InvalidTxid error
    pub fn invalid_txid(txid: &str, reason: &str) -> Self {
        LedgerError::InvalidTxid {
            txid: txid.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create an InvalidLabel error
    pub fn invalid_label(label: &str, reason: &str) -> Self {
        LedgerError::InvalidLabel {
            label: label.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create a DuplicateLabel error
    pub fn duplicate_label(label: &str) -> Self {
        LedgerError::DuplicateLabel {
            label: label.to_string(),
        }
    }

    /// Create a WalletInUse error
    pub fn wallet_in_use(wallet: WalletId, transactions: u64) -> Self {
        LedgerError::WalletInUse {
            wallet,
            transactions,
        }
    }

    /// Create a Contention error
    pub fn contention(wallet: WalletId, attempts: u32) -> Self {
        LedgerError::Contention { wallet, attempts }
    }

    /// Create a Timeout error
    pub fn timeout(wallet: WalletId, waited_ms: u64) -> Self {
        LedgerError::Timeout { wallet, waited_ms }
    }

    /// Create a StoreUnavailable error
    pub fn store_unavailable(message: impl ToString) -> Self {
        LedgerError::StoreUnavailable {
            message: message.to_string(),
        }
    }

    /// Create an IntegrityViolation error
    pub fn integrity_violation(wallet: WalletId, balance: Decimal, ledger_sum: Decimal) -> Self {
        LedgerError::IntegrityViolation {
            wallet,
            balance,
            ledger_sum,
        }
    }

    /// Create a ParseError error
    pub fn parse_error(line: Option<u64>, message: impl ToString) -> Self {
        LedgerError::ParseError {
            line,
            message: message.to_string(),
        }
    }
}
