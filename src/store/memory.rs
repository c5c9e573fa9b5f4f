//! In-memory ledger store
//!
//! This module provides `MemoryLedgerStore`, a thread-safe ledger store built
//! on `DashMap`. It behaves like a relational store with optimistic
//! concurrency: a unit of work stages its writes privately and publishes them
//! at commit, after checking that every row it wrote is still at the version
//! it read and that labels and txids are still unique.
//!
//! # Thread Safety
//!
//! Single-row reads go straight to the DashMaps. Commits and multi-row reads
//! (listings, ledger sums) go through a `parking_lot::RwLock` gate, so a
//! listing never observes half of a commit. The gate is only held for the
//! validate-and-publish step, never while a unit of work is open.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tracing::debug;

use super::{ledger_sum, LedgerStore, TransactionQuery, UnitOfWork, WalletQuery};
use crate::types::{LedgerError, NewTransaction, Transaction, Wallet, WalletId};

/// Thread-safe in-memory ledger store
#[derive(Debug)]
pub struct MemoryLedgerStore {
    /// Committed wallets by id
    wallets: DashMap<WalletId, Wallet>,

    /// Label index over committed wallets
    labels: DashMap<String, WalletId>,

    /// Committed transactions by txid
    transactions: DashMap<String, Transaction>,

    next_wallet_id: AtomicI64,
    next_transaction_id: AtomicI64,

    /// Held for writing while a commit publishes, for reading by multi-row reads
    gate: RwLock<()>,
}

impl MemoryLedgerStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            wallets: DashMap::new(),
            labels: DashMap::new(),
            transactions: DashMap::new(),
            next_wallet_id: AtomicI64::new(0),
            next_transaction_id: AtomicI64::new(0),
            gate: RwLock::new(()),
        }
    }

    fn committed_wallet(&self, id: WalletId) -> Option<Wallet> {
        self.wallets.get(&id).map(|entry| entry.value().clone())
    }

    fn committed_transaction(&self, txid: &str) -> Option<Transaction> {
        self.transactions
            .get(txid)
            .map(|entry| entry.value().clone())
    }

    fn committed_label_owner(&self, label: &str) -> Option<WalletId> {
        self.labels.get(label).map(|entry| *entry.value())
    }
}

impl Default for MemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LedgerStore for MemoryLedgerStore {
    fn begin(&self) -> Result<Box<dyn UnitOfWork + '_>, LedgerError> {
        Ok(Box::new(MemoryUnitOfWork {
            store: self,
            wallet_writes: BTreeMap::new(),
            transactions: Vec::new(),
        }))
    }

    fn wallet(&self, id: WalletId) -> Result<Option<Wallet>, LedgerError> {
        Ok(self.committed_wallet(id))
    }

    fn wallet_by_label(&self, label: &str) -> Result<Option<Wallet>, LedgerError> {
        let _gate = self.gate.read();
        Ok(self
            .committed_label_owner(label)
            .and_then(|id| self.committed_wallet(id)))
    }

    fn transaction(&self, txid: &str) -> Result<Option<Transaction>, LedgerError> {
        Ok(self.committed_transaction(txid))
    }

    fn wallets(&self, query: &WalletQuery) -> Result<Vec<Wallet>, LedgerError> {
        let _gate = self.gate.read();
        let mut wallets: Vec<Wallet> = self
            .wallets
            .iter()
            .filter(|entry| query.accepts(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        query.sort(&mut wallets);
        Ok(wallets)
    }

    fn transactions(&self, query: &TransactionQuery) -> Result<Vec<Transaction>, LedgerError> {
        let _gate = self.gate.read();
        let mut transactions: Vec<Transaction> = match query.txid.as_deref() {
            Some(txid) => self
                .committed_transaction(txid)
                .filter(|tx| query.accepts(tx))
                .into_iter()
                .collect(),
            None => self
                .transactions
                .iter()
                .filter(|entry| query.accepts(entry.value()))
                .map(|entry| entry.value().clone())
                .collect(),
        };
        query.sort(&mut transactions);
        Ok(transactions)
    }

    fn wallet_with_ledger_sum(
        &self,
        id: WalletId,
    ) -> Result<Option<(Wallet, Decimal)>, LedgerError> {
        let _gate = self.gate.read();
        let Some(wallet) = self.committed_wallet(id) else {
            return Ok(None);
        };
        let amounts: Vec<Decimal> = self
            .transactions
            .iter()
            .filter(|entry| entry.value().wallet_id == id)
            .map(|entry| entry.value().amount)
            .collect();
        let sum = ledger_sum(id, &amounts)?;
        Ok(Some((wallet, sum)))
    }
}

/// A staged write to one wallet row
#[derive(Debug, Clone)]
enum WalletWrite {
    /// The wallet was created in this unit of work
    Insert(Wallet),
    /// The committed wallet at `base_version` was modified
    Update { base_version: u64, wallet: Wallet },
    /// The committed wallet at `base_version` was deleted
    Delete { base_version: u64 },
}

impl WalletWrite {
    fn staged_wallet(&self) -> Option<&Wallet> {
        match self {
            WalletWrite::Insert(wallet) | WalletWrite::Update { wallet, .. } => Some(wallet),
            WalletWrite::Delete { .. } => None,
        }
    }
}

/// Unit of work over a `MemoryLedgerStore`
///
/// Nothing is visible to other callers until `commit`. Dropping it discards
/// the staged writes.
struct MemoryUnitOfWork<'a> {
    store: &'a MemoryLedgerStore,
    wallet_writes: BTreeMap<WalletId, WalletWrite>,
    transactions: Vec<Transaction>,
}

impl MemoryUnitOfWork<'_> {
    /// The wallet as this unit of work sees it
    fn current(&self, id: WalletId) -> Option<Wallet> {
        match self.wallet_writes.get(&id) {
            Some(write) => write.staged_wallet().cloned(),
            None => self.store.committed_wallet(id),
        }
    }

    fn staged_transaction(&self, txid: &str) -> Option<&Transaction> {
        self.transactions.iter().find(|tx| tx.txid == txid)
    }

    /// Id of the wallet this unit of work sees owning `label`
    fn label_owner(&self, label: &str) -> Option<WalletId> {
        let staged = self
            .wallet_writes
            .iter()
            .find(|(_, write)| write.staged_wallet().is_some_and(|w| w.label == label))
            .map(|(id, _)| *id);

        staged.or_else(|| {
            self.store
                .committed_label_owner(label)
                .filter(|id| self.current(*id).is_some_and(|w| w.label == label))
        })
    }

    /// Record a new state for a wallet that `expected` was read from
    fn stage_update(&mut self, expected: &Wallet, updated: Wallet) {
        let write = match self.wallet_writes.remove(&expected.id) {
            Some(WalletWrite::Insert(_)) => WalletWrite::Insert(updated),
            Some(WalletWrite::Update { base_version, .. }) => WalletWrite::Update {
                base_version,
                wallet: updated,
            },
            Some(WalletWrite::Delete { .. }) | None => WalletWrite::Update {
                base_version: expected.version,
                wallet: updated,
            },
        };
        self.wallet_writes.insert(expected.id, write);
    }

    /// Check every staged write against the committed state
    ///
    /// Must be called with the store gate held for writing.
    fn validate(&self) -> Result<(), LedgerError> {
        for (id, write) in &self.wallet_writes {
            match write {
                WalletWrite::Insert(_) => {}
                WalletWrite::Update { base_version, .. } | WalletWrite::Delete { base_version } => {
                    let committed = self
                        .store
                        .committed_wallet(*id)
                        .ok_or_else(|| LedgerError::wallet_not_found(*id))?;
                    if committed.version != *base_version {
                        debug!(
                            wallet = id,
                            expected = base_version,
                            found = committed.version,
                            "Commit rejected, wallet version moved"
                        );
                        return Err(LedgerError::contention(*id, 1));
                    }
                }
            }

            if let Some(wallet) = write.staged_wallet() {
                if let Some(owner) = self.store.committed_label_owner(&wallet.label) {
                    let released = self
                        .wallet_writes
                        .get(&owner)
                        .is_some_and(|w| w.staged_wallet().is_none_or(|w| w.label != wallet.label));
                    if owner != *id && !released {
                        return Err(LedgerError::duplicate_label(&wallet.label));
                    }
                }
            }
        }

        for tx in &self.transactions {
            if let Some(existing) = self.store.committed_transaction(&tx.txid) {
                return Err(LedgerError::duplicate_transaction(
                    &tx.txid,
                    existing.wallet_id,
                ));
            }
        }

        Ok(())
    }

    /// Write every staged change into the store
    ///
    /// Must be called with the store gate held for writing, after `validate`.
    fn publish(self) {
        let store = self.store;

        for (id, write) in self.wallet_writes {
            let previous_label = store.committed_wallet(id).map(|w| w.label);
            if let Some(label) = previous_label {
                store.labels.remove_if(&label, |_, owner| *owner == id);
            }

            match write {
                WalletWrite::Insert(wallet) | WalletWrite::Update { wallet, .. } => {
                    store.labels.insert(wallet.label.clone(), id);
                    store.wallets.insert(id, wallet);
                }
                WalletWrite::Delete { .. } => {
                    store.wallets.remove(&id);
                }
            }
        }

        for tx in self.transactions {
            store.transactions.insert(tx.txid.clone(), tx);
        }
    }
}

impl UnitOfWork for MemoryUnitOfWork<'_> {
    fn wallet(&self, id: WalletId) -> Result<Option<Wallet>, LedgerError> {
        Ok(self.current(id))
    }

    fn wallet_by_label(&self, label: &str) -> Result<Option<Wallet>, LedgerError> {
        Ok(self.label_owner(label).and_then(|id| self.current(id)))
    }

    fn transaction(&self, txid: &str) -> Result<Option<Transaction>, LedgerError> {
        Ok(self
            .staged_transaction(txid)
            .cloned()
            .or_else(|| self.store.committed_transaction(txid)))
    }

    fn transaction_count(&self, wallet_id: WalletId) -> Result<u64, LedgerError> {
        let committed = {
            let _gate = self.store.gate.read();
            self.store
                .transactions
                .iter()
                .filter(|entry| entry.value().wallet_id == wallet_id)
                .count()
        };
        let staged = self
            .transactions
            .iter()
            .filter(|tx| tx.wallet_id == wallet_id)
            .count();
        Ok((committed + staged) as u64)
    }

    fn insert_wallet(&mut self, label: &str) -> Result<Wallet, LedgerError> {
        if self.label_owner(label).is_some() {
            return Err(LedgerError::duplicate_label(label));
        }

        let id = self.store.next_wallet_id.fetch_add(1, Ordering::SeqCst) + 1;
        let wallet = Wallet::new(id, label.to_string(), Utc::now());
        self.wallet_writes
            .insert(id, WalletWrite::Insert(wallet.clone()));
        Ok(wallet)
    }

    fn set_balance(
        &mut self,
        wallet: &Wallet,
        balance: Decimal,
    ) -> Result<Option<Wallet>, LedgerError> {
        let current = self
            .current(wallet.id)
            .ok_or_else(|| LedgerError::wallet_not_found(wallet.id))?;
        if current.version != wallet.version {
            return Ok(None);
        }
        if balance.is_sign_negative() && !balance.is_zero() {
            return Err(LedgerError::insufficient_balance(
                wallet.id,
                current.balance,
                balance - current.balance,
            ));
        }

        let mut updated = current;
        updated.balance = balance;
        updated.version += 1;
        self.stage_update(wallet, updated.clone());
        Ok(Some(updated))
    }

    fn set_label(&mut self, wallet: &Wallet, label: &str) -> Result<Option<Wallet>, LedgerError> {
        let current = self
            .current(wallet.id)
            .ok_or_else(|| LedgerError::wallet_not_found(wallet.id))?;
        if current.version != wallet.version {
            return Ok(None);
        }
        if self.label_owner(label).is_some_and(|owner| owner != wallet.id) {
            return Err(LedgerError::duplicate_label(label));
        }

        let mut updated = current;
        updated.label = label.to_string();
        updated.version += 1;
        self.stage_update(wallet, updated.clone());
        Ok(Some(updated))
    }

    fn insert_transaction(&mut self, new: NewTransaction) -> Result<Transaction, LedgerError> {
        if let Some(existing) = self.transaction(&new.txid)? {
            return Err(LedgerError::duplicate_transaction(
                &new.txid,
                existing.wallet_id,
            ));
        }
        if self.current(new.wallet_id).is_none() {
            return Err(LedgerError::wallet_not_found(new.wallet_id));
        }

        let transaction = Transaction {
            id: self.store.next_transaction_id.fetch_add(1, Ordering::SeqCst) + 1,
            txid: new.txid,
            wallet_id: new.wallet_id,
            amount: new.amount,
            created_at: Utc::now(),
        };
        self.transactions.push(transaction.clone());
        Ok(transaction)
    }

    fn delete_wallet(&mut self, wallet: &Wallet) -> Result<bool, LedgerError> {
        let Some(current) = self.current(wallet.id) else {
            return Err(LedgerError::wallet_not_found(wallet.id));
        };
        if current.version != wallet.version {
            return Ok(false);
        }

        let referencing = self.transaction_count(wallet.id)?;
        if referencing > 0 {
            return Err(LedgerError::wallet_in_use(wallet.id, referencing));
        }

        match self.wallet_writes.remove(&wallet.id) {
            Some(WalletWrite::Insert(_)) => {}
            Some(WalletWrite::Update { base_version, .. }) => {
                self.wallet_writes
                    .insert(wallet.id, WalletWrite::Delete { base_version });
            }
            Some(WalletWrite::Delete { .. }) | None => {
                self.wallet_writes.insert(
                    wallet.id,
                    WalletWrite::Delete {
                        base_version: wallet.version,
                    },
                );
            }
        }
        Ok(true)
    }

    fn commit(self: Box<Self>) -> Result<(), LedgerError> {
        if self.wallet_writes.is_empty() && self.transactions.is_empty() {
            return Ok(());
        }

        let uow = *self;
        let store = uow.store;
        let _gate = store.gate.write();
        uow.validate()?;
        uow.publish();
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<(), LedgerError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{TransactionOrder, WalletOrder};

    fn new_tx(txid: &str, wallet_id: WalletId, amount: Decimal) -> NewTransaction {
        NewTransaction {
            txid: txid.to_string(),
            wallet_id,
            amount,
        }
    }

    /// Create a committed wallet with the given balance recorded as one transaction
    fn funded_wallet(store: &MemoryLedgerStore, label: &str, balance: Decimal) -> Wallet {
        let mut uow = store.begin().unwrap();
        let wallet = uow.insert_wallet(label).unwrap();
        let wallet = if balance.is_zero() {
            wallet
        } else {
            uow.insert_transaction(new_tx(&format!("seed-{}", label), wallet.id, balance))
                .unwrap();
            uow.set_balance(&wallet, balance).unwrap().unwrap()
        };
        uow.commit().unwrap();
        wallet
    }

    #[test]
    fn test_insert_wallet_assigns_sequential_ids() {
        let store = MemoryLedgerStore::new();

        let first = funded_wallet(&store, "first", Decimal::ZERO);
        let second = funded_wallet(&store, "second", Decimal::ZERO);

        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert_eq!(store.wallet(2).unwrap().unwrap().label, "second");
    }

    #[test]
    fn test_uncommitted_writes_are_invisible() {
        let store = MemoryLedgerStore::new();
        let wallet = funded_wallet(&store, "w", Decimal::new(100, 0));

        let mut uow = store.begin().unwrap();
        let updated = uow.set_balance(&wallet, Decimal::new(40, 0)).unwrap().unwrap();
        uow.insert_transaction(new_tx("TX1", wallet.id, Decimal::new(-60, 0)))
            .unwrap();

        // Visible inside the unit of work
        assert_eq!(uow.wallet(wallet.id).unwrap().unwrap(), updated);
        assert!(uow.transaction("TX1").unwrap().is_some());

        // Not visible outside it
        assert_eq!(
            store.wallet(wallet.id).unwrap().unwrap().balance,
            Decimal::new(100, 0)
        );
        assert!(store.transaction("TX1").unwrap().is_none());

        drop(uow);

        assert_eq!(
            store.wallet(wallet.id).unwrap().unwrap().balance,
            Decimal::new(100, 0)
        );
        assert!(store.transaction("TX1").unwrap().is_none());
    }

    #[test]
    fn test_commit_publishes_balance_and_transaction_together() {
        let store = MemoryLedgerStore::new();
        let wallet = funded_wallet(&store, "w", Decimal::new(100, 0));

        let mut uow = store.begin().unwrap();
        uow.set_balance(&wallet, Decimal::new(75, 0)).unwrap().unwrap();
        uow.insert_transaction(new_tx("TX1", wallet.id, Decimal::new(-25, 0)))
            .unwrap();
        uow.commit().unwrap();

        let (committed, sum) = store.wallet_with_ledger_sum(wallet.id).unwrap().unwrap();
        assert_eq!(committed.balance, Decimal::new(75, 0));
        assert_eq!(committed.version, wallet.version + 1);
        assert_eq!(sum, Decimal::new(75, 0));
    }

    #[test]
    fn test_stale_version_is_rejected_in_unit_of_work() {
        let store = MemoryLedgerStore::new();
        let wallet = funded_wallet(&store, "w", Decimal::new(100, 0));

        let mut uow = store.begin().unwrap();
        let mut stale = wallet.clone();
        stale.version += 7;

        assert_eq!(uow.set_balance(&stale, Decimal::ONE).unwrap(), None);
    }

    #[test]
    fn test_concurrent_commit_on_same_wallet_conflicts() {
        let store = MemoryLedgerStore::new();
        let wallet = funded_wallet(&store, "w", Decimal::new(100, 0));

        let mut first = store.begin().unwrap();
        let mut second = store.begin().unwrap();

        first.set_balance(&wallet, Decimal::new(50, 0)).unwrap().unwrap();
        second.set_balance(&wallet, Decimal::new(60, 0)).unwrap().unwrap();

        first.commit().unwrap();
        let result = second.commit();

        assert_eq!(result, Err(LedgerError::contention(wallet.id, 1)));
        assert_eq!(
            store.wallet(wallet.id).unwrap().unwrap().balance,
            Decimal::new(50, 0)
        );
    }

    #[test]
    fn test_duplicate_txid_detected_at_commit() {
        let store = MemoryLedgerStore::new();
        let a = funded_wallet(&store, "a", Decimal::ZERO);
        let b = funded_wallet(&store, "b", Decimal::ZERO);

        let mut first = store.begin().unwrap();
        let mut second = store.begin().unwrap();
        first
            .insert_transaction(new_tx("TX1", a.id, Decimal::ONE))
            .unwrap();
        second
            .insert_transaction(new_tx("TX1", b.id, Decimal::ONE))
            .unwrap();

        first.commit().unwrap();
        assert_eq!(
            second.commit(),
            Err(LedgerError::duplicate_transaction("TX1", a.id))
        );
    }

    #[test]
    fn test_insert_transaction_rejects_known_txid() {
        let store = MemoryLedgerStore::new();
        let wallet = funded_wallet(&store, "w", Decimal::new(10, 0));

        let mut uow = store.begin().unwrap();
        let result = uow.insert_transaction(new_tx("seed-w", wallet.id, Decimal::ONE));

        assert_eq!(
            result,
            Err(LedgerError::duplicate_transaction("seed-w", wallet.id))
        );
    }

    #[test]
    fn test_insert_transaction_requires_wallet() {
        let store = MemoryLedgerStore::new();

        let mut uow = store.begin().unwrap();
        let result = uow.insert_transaction(new_tx("TX1", 99, Decimal::ONE));

        assert_eq!(result, Err(LedgerError::wallet_not_found(99)));
    }

    #[test]
    fn test_negative_balance_is_refused() {
        let store = MemoryLedgerStore::new();
        let wallet = funded_wallet(&store, "w", Decimal::new(10, 0));

        let mut uow = store.begin().unwrap();
        let result = uow.set_balance(&wallet, Decimal::new(-1, 0));

        assert!(matches!(
            result,
            Err(LedgerError::InsufficientBalance { .. })
        ));
    }

    #[test]
    fn test_duplicate_label_rejected() {
        let store = MemoryLedgerStore::new();
        funded_wallet(&store, "savings", Decimal::ZERO);

        let mut uow = store.begin().unwrap();
        assert_eq!(
            uow.insert_wallet("savings"),
            Err(LedgerError::duplicate_label("savings"))
        );
    }

    #[test]
    fn test_label_can_be_reused_after_rename() {
        let store = MemoryLedgerStore::new();
        let wallet = funded_wallet(&store, "savings", Decimal::ZERO);

        let mut uow = store.begin().unwrap();
        uow.set_label(&wallet, "holiday").unwrap().unwrap();
        let fresh = uow.insert_wallet("savings").unwrap();
        uow.commit().unwrap();

        assert_eq!(
            store.wallet_by_label("savings").unwrap().unwrap().id,
            fresh.id
        );
        assert_eq!(
            store.wallet_by_label("holiday").unwrap().unwrap().id,
            wallet.id
        );
    }

    #[test]
    fn test_delete_wallet_rejects_referenced_wallet() {
        let store = MemoryLedgerStore::new();
        let wallet = funded_wallet(&store, "w", Decimal::new(5, 0));

        let mut uow = store.begin().unwrap();
        assert_eq!(
            uow.delete_wallet(&wallet),
            Err(LedgerError::wallet_in_use(wallet.id, 1))
        );
    }

    #[test]
    fn test_delete_wallet_removes_label() {
        let store = MemoryLedgerStore::new();
        let wallet = funded_wallet(&store, "w", Decimal::ZERO);

        let mut uow = store.begin().unwrap();
        assert!(uow.delete_wallet(&wallet).unwrap());
        uow.commit().unwrap();

        assert!(store.wallet(wallet.id).unwrap().is_none());
        assert!(store.wallet_by_label("w").unwrap().is_none());
    }

    #[test]
    fn test_listings_filter_and_order() {
        let store = MemoryLedgerStore::new();
        let a = funded_wallet(&store, "b-wallet", Decimal::new(50, 0));
        let b = funded_wallet(&store, "a-wallet", Decimal::new(75, 0));

        let wallets = store
            .wallets(&WalletQuery {
                label: None,
                order: WalletOrder::Label,
            })
            .unwrap();
        assert_eq!(
            wallets.iter().map(|w| w.id).collect::<Vec<_>>(),
            vec![b.id, a.id]
        );

        let transactions = store.transactions(&TransactionQuery::default()).unwrap();
        assert_eq!(transactions[0].txid, "seed-a-wallet");
        assert_eq!(transactions[1].txid, "seed-b-wallet");

        let for_a = store
            .transactions(&TransactionQuery::for_wallet(a.id).ordered_by(TransactionOrder::Applied))
            .unwrap();
        assert_eq!(for_a.len(), 1);
        assert_eq!(for_a[0].wallet_id, a.id);
    }

    #[test]
    fn test_concurrent_commits_on_different_wallets() {
        use std::sync::Arc;
        use std::thread;

        let store = Arc::new(MemoryLedgerStore::new());
        let wallets: Vec<Wallet> = (0..10)
            .map(|i| funded_wallet(&store, &format!("w{}", i), Decimal::ZERO))
            .collect();

        let mut handles = vec![];
        for wallet in wallets.clone() {
            let store = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                let mut uow = store.begin().unwrap();
                uow.insert_transaction(new_tx(
                    &format!("TX-{}", wallet.id),
                    wallet.id,
                    Decimal::new(wallet.id, 0),
                ))
                .unwrap();
                uow.set_balance(&wallet, Decimal::new(wallet.id, 0))
                    .unwrap()
                    .unwrap();
                uow.commit().unwrap();
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        for wallet in wallets {
            let (committed, sum) = store.wallet_with_ledger_sum(wallet.id).unwrap().unwrap();
            assert_eq!(committed.balance, Decimal::new(wallet.id, 0));
            assert_eq!(sum, committed.balance);
        }
    }
}
