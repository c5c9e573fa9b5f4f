//! CSV format handling for ledger commands and ledger output
//!
//! This module centralizes all CSV format concerns, providing:
//! - CsvRecord structure for deserialization
//! - Conversion from CSV records to ledger commands
//! - Wallet and transaction output serialization
//!
//! Input rows have the columns `type, wallet, txid, amount`:
//!
//! ```text
//! type,wallet,txid,amount
//! open,savings,,100.00
//! tx,savings,TX1,-25.50
//! close,savings,,
//! ```
//!
//! Wallets are referred to by label; the ledger assigns their ids.

use crate::types::{LedgerError, Transaction, Wallet};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Write;
use std::str::FromStr;

/// CSV record structure for deserialization
///
/// `txid` is only used by `tx` rows and `amount` is optional for `open` and
/// unused by `close`.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct CsvRecord {
    #[serde(rename = "type")]
    pub command: String,
    pub wallet: String,
    pub txid: Option<String>,
    pub amount: Option<String>,
}

/// A parsed ledger command
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerCommand {
    /// Create a wallet
    Open {
        label: String,
        opening_balance: Decimal,
    },
    /// Apply a signed amount to a wallet
    Apply {
        label: String,
        txid: String,
        amount: Decimal,
    },
    /// Delete a wallet
    Close { label: String },
}

impl LedgerCommand {
    /// Label of the wallet the command targets
    pub fn label(&self) -> &str {
        match self {
            LedgerCommand::Open { label, .. }
            | LedgerCommand::Apply { label, .. }
            | LedgerCommand::Close { label } => label,
        }
    }
}

/// Present, non-blank field value
fn field(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_amount(raw: &str) -> Result<Decimal, LedgerError> {
    Decimal::from_str(raw).map_err(|_| LedgerError::invalid_amount(raw, "not a decimal number"))
}

/// Convert a CsvRecord to a LedgerCommand
///
/// Command types are matched case-insensitively. Only the shape of the row is
/// checked here; amounts, txids and labels are validated by the engine.
///
/// # Errors
///
/// - `ParseError` for an unknown type or a missing txid/amount on a `tx` row
/// - `InvalidAmount` when the amount is not a decimal number
pub fn convert_csv_record(record: CsvRecord) -> Result<LedgerCommand, LedgerError> {
    let label = record.wallet.trim().to_string();
    let amount = field(record.amount);

    match record.command.trim().to_lowercase().as_str() {
        "open" => Ok(LedgerCommand::Open {
            label,
            opening_balance: match amount {
                Some(raw) => parse_amount(&raw)?,
                None => Decimal::ZERO,
            },
        }),
        "tx" => {
            let txid = field(record.txid).ok_or_else(|| {
                LedgerError::parse_error(None, format!("tx row for wallet '{}' requires a txid", label))
            })?;
            let raw = amount.ok_or_else(|| {
                LedgerError::parse_error(None, format!("tx {} requires an amount", txid))
            })?;
            Ok(LedgerCommand::Apply {
                label,
                txid,
                amount: parse_amount(&raw)?,
            })
        }
        "close" => Ok(LedgerCommand::Close { label }),
        _ => Err(LedgerError::parse_error(
            None,
            format!(
                "Invalid command type: '{}' for wallet '{}'",
                record.command, label
            ),
        )),
    }
}

/// Write wallets as CSV
///
/// Columns: `id, label, balance`. Wallets are sorted by id and balances are
/// written with 8 fractional digits.
pub fn write_wallets_csv(wallets: &[Wallet], output: &mut dyn Write) -> Result<(), LedgerError> {
    let mut writer = csv::Writer::from_writer(output);
    writer.write_record(["id", "label", "balance"])?;

    let mut sorted: Vec<&Wallet> = wallets.iter().collect();
    sorted.sort_by_key(|wallet| wallet.id);

    for wallet in sorted {
        writer.write_record(&[
            wallet.id.to_string(),
            wallet.label.clone(),
            format!("{:.8}", wallet.balance),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

/// Write transactions as CSV
///
/// Columns: `id, txid, wallet, amount, created_at`, in applied order.
pub fn write_transactions_csv(
    transactions: &[Transaction],
    output: &mut dyn Write,
) -> Result<(), LedgerError> {
    let mut writer = csv::Writer::from_writer(output);
    writer.write_record(["id", "txid", "wallet", "amount", "created_at"])?;

    let mut sorted: Vec<&Transaction> = transactions.iter().collect();
    sorted.sort_by_key(|tx| tx.id);

    for tx in sorted {
        writer.write_record(&[
            tx.id.to_string(),
            tx.txid.clone(),
            tx.wallet_id.to_string(),
            format!("{:.8}", tx.amount),
            tx.created_at.to_rfc3339(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}
