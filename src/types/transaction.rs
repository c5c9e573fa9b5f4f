//! Transaction-related types for the wallet ledger
//!
//! This module defines stored transactions, incoming transaction requests,
//! the result of applying a request, and the validation rules for amounts
//! and txids.

use super::{LedgerError, Wallet, WalletId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Transaction identifier, assigned by the ledger store
pub type TransactionId = i64;

/// Maximum length of a txid, in characters
pub const MAX_TXID_LEN: usize = 100;

/// Maximum number of fractional digits in an amount
///
/// Matches the scale at which wallet balances are kept, so that the sum of
/// transaction amounts is always exactly representable as a balance.
pub const MAX_AMOUNT_SCALE: u32 = 8;

/// Prefix of the txids the ledger assigns to opening-balance transactions
pub const OPENING_TXID_PREFIX: &str = "opening-";

/// Txid of the opening-balance transaction of a wallet
pub fn opening_txid(wallet_id: WalletId) -> String {
    format!("{}{}", OPENING_TXID_PREFIX, wallet_id)
}

/// A transaction that has been applied to a wallet
///
/// Created exactly once, in the same unit of work as the balance change it
/// caused, and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// System-assigned identifier
    pub id: TransactionId,

    /// External idempotency token, unique across all transactions
    pub txid: String,

    /// The wallet this transaction was applied to
    pub wallet_id: WalletId,

    /// Signed amount: positive is a credit, negative a debit
    pub amount: Decimal,

    /// When the transaction was applied
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Whether this transaction added funds
    pub fn is_credit(&self) -> bool {
        self.amount.is_sign_positive()
    }

    /// Whether this transaction carries the same payload as `request`
    ///
    /// Used to tell an idempotent resubmission apart from a txid collision.
    pub fn matches(&self, request: &TransactionRequest) -> bool {
        self.txid == request.txid
            && self.wallet_id == request.wallet_id
            && self.amount == request.amount
    }
}

/// Data needed to insert a transaction row
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    /// Idempotency token
    pub txid: String,
    /// Target wallet
    pub wallet_id: WalletId,
    /// Signed amount
    pub amount: Decimal,
}

/// A request to apply a signed amount to a wallet
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRequest {
    /// Wallet the amount applies to
    pub wallet_id: WalletId,
    /// Signed, non-zero amount
    pub amount: Decimal,
    /// Idempotency token
    pub txid: String,
}

impl TransactionRequest {
    /// Create a new transaction request
    pub fn new(wallet_id: WalletId, amount: Decimal, txid: impl Into<String>) -> Self {
        TransactionRequest {
            wallet_id,
            amount,
            txid: txid.into(),
        }
    }

    /// Check the amount and the txid without touching the store
    ///
    /// # Errors
    ///
    /// - `InvalidAmount` if the amount is zero or has more than
    ///   [`MAX_AMOUNT_SCALE`] fractional digits
    /// - `InvalidTxid` if the txid is empty, too long, padded or uses the
    ///   reserved opening-balance prefix
    pub fn validate(&self) -> Result<(), LedgerError> {
        validate_amount(self.amount)?;
        validate_txid(&self.txid)?;
        if self.txid.starts_with(OPENING_TXID_PREFIX) {
            return Err(LedgerError::invalid_txid(
                &self.txid,
                "txid prefix is reserved for opening balances",
            ));
        }
        Ok(())
    }

    /// Row to insert when this request is applied
    pub fn to_new_transaction(&self) -> NewTransaction {
        NewTransaction {
            txid: self.txid.clone(),
            wallet_id: self.wallet_id,
            amount: self.amount,
        }
    }
}

/// Whether a call created a transaction or replayed an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyOutcome {
    /// The transaction was applied by this call
    Created,
    /// The txid had already been applied with the same payload; nothing changed
    Replayed,
}

/// Result of a successful `apply_transaction` call
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedTransaction {
    /// The wallet after the call
    pub wallet: Wallet,
    /// The created (or original, when replayed) transaction
    pub transaction: Transaction,
    /// Whether the call changed anything
    pub outcome: ApplyOutcome,
}

impl AppliedTransaction {
    /// Whether this result is an idempotent replay
    pub fn is_replay(&self) -> bool {
        self.outcome == ApplyOutcome::Replayed
    }
}

/// Validate a transaction amount
///
/// # Errors
///
/// Returns `InvalidAmount` if the amount is zero or too precise.
pub fn validate_amount(amount: Decimal) -> Result<(), LedgerError> {
    if amount.is_zero() {
        return Err(LedgerError::invalid_amount(
            amount,
            "amount must be non-zero",
        ));
    }
    validate_scale(amount)
}

/// Validate an opening balance for a new wallet
///
/// Zero is allowed; negative balances are not.
///
/// # Errors
///
/// Returns `InvalidAmount` if the balance is negative or too precise.
pub fn validate_opening_balance(balance: Decimal) -> Result<(), LedgerError> {
    if balance.is_sign_negative() && !balance.is_zero() {
        return Err(LedgerError::invalid_amount(
            balance,
            "opening balance must not be negative",
        ));
    }
    validate_scale(balance)
}

fn validate_scale(amount: Decimal) -> Result<(), LedgerError> {
    if amount.normalize().scale() > MAX_AMOUNT_SCALE {
        return Err(LedgerError::invalid_amount(
            amount,
            &format!(
                "amount must have at most {} decimal places",
                MAX_AMOUNT_SCALE
            ),
        ));
    }
    Ok(())
}

/// Validate a txid
///
/// # Errors
///
/// Returns `InvalidTxid` if the txid is empty, longer than [`MAX_TXID_LEN`]
/// characters, or has leading/trailing whitespace.
pub fn validate_txid(txid: &str) -> Result<(), LedgerError> {
    if txid.is_empty() {
        return Err(LedgerError::invalid_txid(txid, "txid must not be empty"));
    }
    if txid.trim() != txid {
        return Err(LedgerError::invalid_txid(
            txid,
            "txid must not have surrounding whitespace",
        ));
    }
    if txid.chars().count() > MAX_TXID_LEN {
        return Err(LedgerError::invalid_txid(
            txid,
            &format!("txid must be at most {} characters", MAX_TXID_LEN),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn transaction(txid: &str, wallet_id: WalletId, amount: Decimal) -> Transaction {
        Transaction {
            id: 1,
            txid: txid.to_string(),
            wallet_id,
            amount,
            created_at: Utc::now(),
        }
    }

    #[rstest]
    #[case::same_payload(1, Decimal::new(2500, 2), true)]
    #[case::same_value_other_scale(1, Decimal::new(25, 0), true)]
    #[case::other_wallet(2, Decimal::new(2500, 2), false)]
    #[case::other_amount(1, Decimal::new(2600, 2), false)]
    fn test_matches(#[case] wallet_id: WalletId, #[case] amount: Decimal, #[case] expected: bool) {
        let tx = transaction("TX1", 1, Decimal::new(2500, 2));
        let request = TransactionRequest::new(wallet_id, amount, "TX1");

        assert_eq!(tx.matches(&request), expected);
    }

    #[test]
    fn test_is_credit() {
        assert!(transaction("TX1", 1, Decimal::ONE).is_credit());
        assert!(!transaction("TX2", 1, Decimal::NEGATIVE_ONE).is_credit());
    }

    #[rstest]
    #[case(Decimal::new(1, 0))]
    #[case(Decimal::new(-5000, 2))]
    #[case(Decimal::new(1, 8))]
    #[case(Decimal::new(1_000_000_000, 10))] // 0.1 with trailing zeros
    fn test_validate_amount_valid(#[case] amount: Decimal) {
        assert!(validate_amount(amount).is_ok());
    }

    #[rstest]
    #[case::zero(Decimal::ZERO, "non-zero")]
    #[case::zero_with_scale(Decimal::new(0, 2), "non-zero")]
    #[case::too_precise(Decimal::new(1, 9), "at most 8 decimal places")]
    fn test_validate_amount_invalid(#[case] amount: Decimal, #[case] expected_reason: &str) {
        match validate_amount(amount) {
            Err(LedgerError::InvalidAmount { reason, .. }) => {
                assert!(reason.contains(expected_reason), "got: {}", reason)
            }
            other => panic!("Expected InvalidAmount, got {:?}", other),
        }
    }

    #[rstest]
    #[case(Decimal::ZERO, true)]
    #[case(Decimal::new(10000, 2), true)]
    #[case(Decimal::new(-1, 2), false)]
    #[case(Decimal::new(1, 9), false)]
    fn test_validate_opening_balance(#[case] balance: Decimal, #[case] ok: bool) {
        assert_eq!(validate_opening_balance(balance).is_ok(), ok);
    }

    #[rstest]
    #[case::empty("", false)]
    #[case::padded(" TX1", false)]
    #[case::too_long(&"T".repeat(101), false)]
    #[case::max_len(&"T".repeat(100), true)]
    #[case::plain("TX1", true)]
    fn test_validate_txid(#[case] txid: &str, #[case] ok: bool) {
        assert_eq!(validate_txid(txid).is_ok(), ok);
    }

    #[test]
    fn test_request_validate_rejects_reserved_prefix() {
        let request = TransactionRequest::new(1, Decimal::ONE, opening_txid(1));
        assert!(matches!(
            request.validate(),
            Err(LedgerError::InvalidTxid { .. })
        ));
        assert!(validate_txid(&opening_txid(1)).is_ok());
    }

    #[test]
    fn test_request_validate_checks_amount_first() {
        let request = TransactionRequest::new(1, Decimal::ZERO, "");
        assert!(matches!(
            request.validate(),
            Err(LedgerError::InvalidAmount { .. })
        ));
    }
}
