//! Wallet-related types for the wallet ledger
//!
//! This module defines the Wallet structure and the validation rules for
//! wallet labels.

use super::LedgerError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Wallet identifier, assigned by the ledger store
pub type WalletId = i64;

/// Maximum length of a wallet label, in characters
pub const MAX_LABEL_LEN: usize = 100;

/// A wallet and its current balance
///
/// The balance is only ever changed by the balance engine, and always
/// equals the sum of the amounts of the wallet's transactions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    /// System-assigned identifier, immutable
    pub id: WalletId,

    /// Human-readable name, unique across all wallets
    pub label: String,

    /// Current balance, never negative
    pub balance: Decimal,

    /// Optimistic-concurrency counter
    ///
    /// Incremented by the store on every write to the wallet row. Writes are
    /// conditional on the version the writer read.
    pub version: u64,

    /// When the wallet was created
    pub created_at: DateTime<Utc>,
}

impl Wallet {
    /// Create a wallet with a zero balance at version 0
    pub fn new(id: WalletId, label: String, created_at: DateTime<Utc>) -> Self {
        Wallet {
            id,
            label,
            balance: Decimal::ZERO,
            version: 0,
            created_at,
        }
    }

    /// Balance after applying `amount`, or None on decimal overflow
    pub fn projected_balance(&self, amount: Decimal) -> Option<Decimal> {
        self.balance.checked_add(amount)
    }
}

/// Validate a wallet label and return it trimmed
///
/// # Errors
///
/// Returns `InvalidLabel` if the trimmed label is empty or longer than
/// [`MAX_LABEL_LEN`] characters.
pub fn normalize_label(label: &str) -> Result<String, LedgerError> {
    let trimmed = label.trim();

    if trimmed.is_empty() {
        return Err(LedgerError::invalid_label(label, "label must not be empty"));
    }

    if trimmed.chars().count() > MAX_LABEL_LEN {
        return Err(LedgerError::invalid_label(
            label,
            &format!("label must be at most {} characters", MAX_LABEL_LEN),
        ));
    }

    Ok(trimmed.to_string())
}
