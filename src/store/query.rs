//! Listing queries for wallets and transactions
//!
//! Filters and orderings shared by every ledger store. Ordering is applied in
//! Rust so that amounts compare as decimals regardless of how a store keeps
//! them.

use crate::types::{Transaction, Wallet, WalletId};

/// Ordering of wallet listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WalletOrder {
    /// Ascending id (creation order)
    #[default]
    Id,
    /// Ascending label, ties by id
    Label,
}

/// Filter and ordering for wallet listings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WalletQuery {
    /// Exact label match
    pub label: Option<String>,
    /// Result ordering
    pub order: WalletOrder,
}

impl WalletQuery {
    /// Whether a wallet passes the filter
    pub fn accepts(&self, wallet: &Wallet) -> bool {
        self.label
            .as_deref()
            .is_none_or(|label| wallet.label == label)
    }

    /// Sort wallets in place
    pub fn sort(&self, wallets: &mut [Wallet]) {
        match self.order {
            WalletOrder::Id => wallets.sort_by_key(|w| w.id),
            WalletOrder::Label => {
                wallets.sort_by(|a, b| a.label.cmp(&b.label).then(a.id.cmp(&b.id)))
            }
        }
    }
}

/// Ordering of transaction listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionOrder {
    /// Largest amount first, ties by id
    #[default]
    AmountDesc,
    /// Smallest amount first, ties by id
    AmountAsc,
    /// Applied order (ascending id)
    Applied,
    /// Most recently applied first
    AppliedDesc,
}

/// Filter and ordering for transaction listings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionQuery {
    /// Only transactions of this wallet
    pub wallet_id: Option<WalletId>,
    /// Only the transaction with this txid
    pub txid: Option<String>,
    /// Result ordering
    pub order: TransactionOrder,
}

impl TransactionQuery {
    /// All transactions of one wallet in applied order
    pub fn for_wallet(wallet_id: WalletId) -> Self {
        TransactionQuery {
            wallet_id: Some(wallet_id),
            txid: None,
            order: TransactionOrder::Applied,
        }
    }

    /// Replace the ordering
    pub fn ordered_by(mut self, order: TransactionOrder) -> Self {
        self.order = order;
        self
    }

    /// Whether a transaction passes the filter
    pub fn accepts(&self, transaction: &Transaction) -> bool {
        self.wallet_id.is_none_or(|id| transaction.wallet_id == id)
            && self
                .txid
                .as_deref()
                .is_none_or(|txid| transaction.txid == txid)
    }

    /// Sort transactions in place
    pub fn sort(&self, transactions: &mut [Transaction]) {
        match self.order {
            TransactionOrder::AmountDesc => {
                transactions.sort_by(|a, b| b.amount.cmp(&a.amount).then(a.id.cmp(&b.id)))
            }
            TransactionOrder::AmountAsc => {
                transactions.sort_by(|a, b| a.amount.cmp(&b.amount).then(a.id.cmp(&b.id)))
            }
            TransactionOrder::Applied => transactions.sort_by_key(|t| t.id),
            TransactionOrder::AppliedDesc => transactions.sort_by_key(|t| std::cmp::Reverse(t.id)),
        }
    }
}
