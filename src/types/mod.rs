//! Types module
//!
//! Contains core data structures used throughout the application.
//! This module organizes types into logical submodules:
//! - `wallet`: Wallet type and label validation
//! - `transaction`: Transaction types, requests and amount/txid validation
//! - `error`: Error types for the wallet ledger

pub mod error;
pub mod transaction;
pub mod wallet;

pub use error::LedgerError;
pub use transaction::{
    opening_txid, validate_amount, validate_opening_balance, validate_txid, AppliedTransaction,
    ApplyOutcome, NewTransaction, Transaction, TransactionId, TransactionRequest,
    MAX_AMOUNT_SCALE, MAX_TXID_LEN, OPENING_TXID_PREFIX,
};
pub use wallet::{normalize_label, Wallet, WalletId, MAX_LABEL_LEN};
