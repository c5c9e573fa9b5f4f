//! Balance engine
//!
//! This module provides the `BalanceEngine`, which applies transactions to
//! wallets so that every wallet's balance always equals the sum of its
//! transactions and never goes negative.
//!
//! # Design
//!
//! Every mutation of a wallet runs under that wallet's lock, acquired with a
//! bounded wait, and inside one unit of work on the ledger store:
//!
//! ```text
//! validate request
//!   -> idempotency fast path (committed txid lookup)
//!   -> lock wallet (timeout)
//!     -> begin unit of work
//!        re-check txid, read wallet, check balance + amount >= 0
//!        set balance (version-conditional) + insert transaction
//!     -> commit, or roll back and retry on a version conflict
//!   -> invalidate cached balance
//! ```
//!
//! The balance that a new transaction is checked against is always read inside
//! the unit of work, never from the balance cache.
//!
//! # Thread Safety
//!
//! `BalanceEngine` is `Clone`; clones share the store, the lock registry and
//! the cache, so one engine can be handed to any number of worker threads.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tracing::{debug, error, info, instrument};

use crate::config::{EngineConfig, StoreLocation};
use crate::core::cache::BalanceCache;
use crate::core::locks::WalletLocks;
use crate::store::{
    LedgerStore, MemoryLedgerStore, SqliteLedgerStore, TransactionQuery, UnitOfWork, WalletQuery,
};
use crate::types::{
    normalize_label, opening_txid, validate_opening_balance, AppliedTransaction, ApplyOutcome,
    LedgerError, NewTransaction, Transaction, TransactionRequest, Wallet, WalletId,
};

/// Outcome of one attempt at a locked read-modify-write
enum Attempt<T> {
    /// The attempt finished; no retry needed
    Done(T),
    /// A row moved underneath the attempt, which was rolled back
    Conflict,
}

/// Balance-integrity engine over a ledger store
#[derive(Debug, Clone)]
pub struct BalanceEngine {
    store: Arc<dyn LedgerStore>,
    locks: Arc<WalletLocks>,
    cache: Arc<BalanceCache>,
    config: EngineConfig,
}

impl BalanceEngine {
    /// Create an engine over an existing store
    ///
    /// # Arguments
    ///
    /// * `store` - The ledger store holding wallets and transactions
    /// * `config` - Lock timeout, retry bound and cache settings
    pub fn new(store: Arc<dyn LedgerStore>, config: EngineConfig) -> Self {
        let cache = Arc::new(BalanceCache::new(config.cache.ttl));
        BalanceEngine {
            store,
            locks: Arc::new(WalletLocks::new()),
            cache,
            config,
        }
    }

    /// Create an engine over a fresh in-memory store
    pub fn in_memory(config: EngineConfig) -> Self {
        Self::new(Arc::new(MemoryLedgerStore::new()), config)
    }

    /// Create an engine over the store at `location`
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if a SQLite database cannot be opened.
    pub fn open(location: &StoreLocation, config: EngineConfig) -> Result<Self, LedgerError> {
        let store: Arc<dyn LedgerStore> = match location {
            StoreLocation::Memory => Arc::new(MemoryLedgerStore::new()),
            StoreLocation::Sqlite(path) => Arc::new(
                SqliteLedgerStore::open(path)?.with_busy_timeout(config.lock_timeout),
            ),
        };
        Ok(Self::new(store, config))
    }

    /// The engine's configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Apply a signed amount to a wallet, waiting at most the configured lock timeout
    ///
    /// See [`BalanceEngine::apply_transaction_with_timeout`].
    pub fn apply_transaction(
        &self,
        request: TransactionRequest,
    ) -> Result<AppliedTransaction, LedgerError> {
        self.apply_transaction_with_timeout(request, self.config.lock_timeout)
    }

    /// Apply a signed amount to a wallet
    ///
    /// The wallet's balance and the new transaction row are written in one
    /// unit of work: either both are committed or neither is.
    ///
    /// Resubmitting a txid with the same wallet and amount is a no-op that
    /// returns the original transaction with `ApplyOutcome::Replayed`.
    ///
    /// # Arguments
    ///
    /// * `request` - Wallet, signed amount and idempotency txid
    /// * `timeout` - Upper bound on the wait for the wallet lock
    ///
    /// # Errors
    ///
    /// - `InvalidAmount` / `InvalidTxid` if the request is malformed
    /// - `WalletNotFound` if the wallet does not exist
    /// - `DuplicateTransaction` if the txid was used with another wallet or amount
    /// - `InsufficientBalance` if the balance would go negative
    /// - `Timeout` if the wallet lock was not acquired in time
    /// - `Contention` if version conflicts persisted through every retry
    /// - `StoreUnavailable` on storage failure
    ///
    /// Nothing is written on any error.
    #[instrument(skip_all, fields(wallet = request.wallet_id, txid = %request.txid))]
    pub fn apply_transaction_with_timeout(
        &self,
        request: TransactionRequest,
        timeout: Duration,
    ) -> Result<AppliedTransaction, LedgerError> {
        request.validate()?;

        // Replays need neither the lock nor a unit of work
        if let Some(existing) = self.store.transaction(&request.txid)? {
            return self.resolve_existing(&request, existing);
        }

        let applied = self.with_wallet_lock(request.wallet_id, timeout, || {
            self.try_apply(&request)
        })?;

        if applied.outcome == ApplyOutcome::Created {
            self.cache.invalidate(applied.wallet.id);
            info!(
                amount = %applied.transaction.amount,
                balance = %applied.wallet.balance,
                "Transaction applied"
            );
        } else {
            debug!("Transaction replayed");
        }

        Ok(applied)
    }

    /// One attempt at applying `request` inside a unit of work
    fn try_apply(
        &self,
        request: &TransactionRequest,
    ) -> Result<Attempt<AppliedTransaction>, LedgerError> {
        let mut uow = self.store.begin()?;

        if let Some(existing) = uow.transaction(&request.txid)? {
            let resolved = resolve_in(&*uow, request, existing);
            uow.rollback()?;
            return resolved.map(Attempt::Done);
        }

        let wallet = uow
            .wallet(request.wallet_id)?
            .ok_or_else(|| LedgerError::wallet_not_found(request.wallet_id))?;

        let balance = wallet
            .projected_balance(request.amount)
            .ok_or_else(|| LedgerError::invalid_amount(request.amount, "balance would overflow"))?;
        if balance < Decimal::ZERO {
            return Err(LedgerError::insufficient_balance(
                wallet.id,
                wallet.balance,
                request.amount,
            ));
        }

        let Some(updated) = uow.set_balance(&wallet, balance)? else {
            uow.rollback()?;
            return Ok(Attempt::Conflict);
        };

        let transaction = match uow.insert_transaction(request.to_new_transaction()) {
            Ok(transaction) => transaction,
            Err(LedgerError::DuplicateTransaction { .. }) => {
                uow.rollback()?;
                return self.replay_committed(request).map(Attempt::Done);
            }
            Err(e) => return Err(e),
        };

        match uow.commit() {
            Ok(()) => Ok(Attempt::Done(AppliedTransaction {
                wallet: updated,
                transaction,
                outcome: ApplyOutcome::Created,
            })),
            Err(LedgerError::Contention { .. }) => Ok(Attempt::Conflict),
            Err(LedgerError::DuplicateTransaction { .. }) => {
                self.replay_committed(request).map(Attempt::Done)
            }
            Err(e) => Err(e),
        }
    }

    /// Resolve a txid that turned out to be committed already
    fn replay_committed(
        &self,
        request: &TransactionRequest,
    ) -> Result<AppliedTransaction, LedgerError> {
        match self.store.transaction(&request.txid)? {
            Some(existing) => self.resolve_existing(request, existing),
            None => Err(LedgerError::duplicate_transaction(
                &request.txid,
                request.wallet_id,
            )),
        }
    }

    fn resolve_existing(
        &self,
        request: &TransactionRequest,
        existing: Transaction,
    ) -> Result<AppliedTransaction, LedgerError> {
        if !existing.matches(request) {
            return Err(LedgerError::duplicate_transaction(
                &existing.txid,
                existing.wallet_id,
            ));
        }
        let wallet = self
            .store
            .wallet(existing.wallet_id)?
            .ok_or_else(|| LedgerError::wallet_not_found(existing.wallet_id))?;
        Ok(replayed(wallet, existing))
    }

    /// Run `attempt` under a wallet's lock until it stops conflicting
    ///
    /// # Errors
    ///
    /// `Timeout` if the lock is not acquired in time, `Contention` once
    /// `max_retries` attempts have conflicted, or whatever `attempt` returns.
    fn with_wallet_lock<T>(
        &self,
        wallet: WalletId,
        timeout: Duration,
        attempt: impl FnMut() -> Result<Attempt<T>, LedgerError>,
    ) -> Result<T, LedgerError> {
        let result = {
            let handle = self.locks.handle(wallet);
            let _guard = WalletLocks::acquire(wallet, &handle, timeout)?;
            retry_conflicts(wallet, self.config.max_retries, attempt)
        };

        // Unknown ids must not leave a mutex behind
        if let Err(LedgerError::WalletNotFound { .. }) = &result {
            self.locks.forget(wallet);
        }
        result
    }

    /// Current balance of a wallet
    ///
    /// Served from the balance cache when enabled. The cache is invalidated
    /// synchronously by every committed write, so the result always reflects
    /// the latest committed transaction.
    ///
    /// # Errors
    ///
    /// `WalletNotFound` if the wallet does not exist.
    pub fn get_balance(&self, wallet_id: WalletId) -> Result<Decimal, LedgerError> {
        if !self.config.cache.enabled {
            return Ok(self.get_wallet(wallet_id)?.balance);
        }

        if let Some(balance) = self.cache.get(wallet_id) {
            debug!(wallet = wallet_id, "Balance cache hit");
            return Ok(balance);
        }

        let ticket = self.cache.ticket(wallet_id);
        let balance = self.get_wallet(wallet_id)?.balance;
        if !self.cache.fill(ticket, balance) {
            debug!(wallet = wallet_id, "Discarded stale balance fill");
        }
        Ok(balance)
    }

    /// Create a wallet
    ///
    /// A positive opening balance is recorded as a transaction with txid
    /// `opening-<id>` in the same unit of work, so the new wallet's balance
    /// already equals the sum of its transactions.
    ///
    /// # Errors
    ///
    /// - `InvalidLabel` if the trimmed label is empty or too long
    /// - `InvalidAmount` if the opening balance is negative or too precise
    /// - `DuplicateLabel` if the label is taken
    pub fn create_wallet(
        &self,
        label: &str,
        opening_balance: Decimal,
    ) -> Result<Wallet, LedgerError> {
        let label = normalize_label(label)?;
        validate_opening_balance(opening_balance)?;

        let mut uow = self.store.begin()?;
        let wallet = uow.insert_wallet(&label)?;
        let wallet = if opening_balance.is_zero() {
            wallet
        } else {
            uow.insert_transaction(NewTransaction {
                txid: opening_txid(wallet.id),
                wallet_id: wallet.id,
                amount: opening_balance,
            })?;
            uow.set_balance(&wallet, opening_balance)?
                .ok_or_else(|| LedgerError::contention(wallet.id, 1))?
        };
        uow.commit()?;

        info!(
            wallet = wallet.id,
            label = %wallet.label,
            balance = %wallet.balance,
            "Wallet created"
        );
        Ok(wallet)
    }

    /// Read a wallet
    ///
    /// # Errors
    ///
    /// `WalletNotFound` if the wallet does not exist.
    pub fn get_wallet(&self, wallet_id: WalletId) -> Result<Wallet, LedgerError> {
        self.store
            .wallet(wallet_id)?
            .ok_or_else(|| LedgerError::wallet_not_found(wallet_id))
    }

    /// Read a wallet by label
    pub fn find_wallet(&self, label: &str) -> Result<Option<Wallet>, LedgerError> {
        self.store.wallet_by_label(label.trim())
    }

    /// Change the label of a wallet
    ///
    /// # Errors
    ///
    /// - `InvalidLabel` if the trimmed label is empty or too long
    /// - `DuplicateLabel` if another wallet uses the label
    /// - `WalletNotFound`, `Timeout`, `Contention` as for transactions
    pub fn rename_wallet(&self, wallet_id: WalletId, label: &str) -> Result<Wallet, LedgerError> {
        let label = normalize_label(label)?;

        let wallet = self.with_wallet_lock(wallet_id, self.config.lock_timeout, || {
            let mut uow = self.store.begin()?;
            let wallet = uow
                .wallet(wallet_id)?
                .ok_or_else(|| LedgerError::wallet_not_found(wallet_id))?;
            if wallet.label == label {
                uow.rollback()?;
                return Ok(Attempt::Done(wallet));
            }

            let Some(renamed) = uow.set_label(&wallet, &label)? else {
                uow.rollback()?;
                return Ok(Attempt::Conflict);
            };
            match uow.commit() {
                Ok(()) => Ok(Attempt::Done(renamed)),
                Err(LedgerError::Contention { .. }) => Ok(Attempt::Conflict),
                Err(e) => Err(e),
            }
        })?;

        info!(wallet = wallet_id, label = %wallet.label, "Wallet renamed");
        Ok(wallet)
    }

    /// Delete a wallet that no transaction references
    ///
    /// # Errors
    ///
    /// - `WalletInUse` if the wallet has transactions
    /// - `WalletNotFound`, `Timeout`, `Contention` as for transactions
    pub fn delete_wallet(&self, wallet_id: WalletId) -> Result<(), LedgerError> {
        self.with_wallet_lock(wallet_id, self.config.lock_timeout, || {
            let mut uow = self.store.begin()?;
            let wallet = uow
                .wallet(wallet_id)?
                .ok_or_else(|| LedgerError::wallet_not_found(wallet_id))?;

            if !uow.delete_wallet(&wallet)? {
                uow.rollback()?;
                return Ok(Attempt::Conflict);
            }
            match uow.commit() {
                Ok(()) => Ok(Attempt::Done(())),
                Err(LedgerError::Contention { .. }) => Ok(Attempt::Conflict),
                Err(e) => Err(e),
            }
        })?;

        self.cache.forget(wallet_id);
        self.locks.forget(wallet_id);
        info!(wallet = wallet_id, "Wallet deleted");
        Ok(())
    }

    /// List wallets
    pub fn list_wallets(&self, query: &WalletQuery) -> Result<Vec<Wallet>, LedgerError> {
        self.store.wallets(query)
    }

    /// Read a transaction by txid
    pub fn get_transaction(&self, txid: &str) -> Result<Option<Transaction>, LedgerError> {
        self.store.transaction(txid)
    }

    /// List transactions, largest amount first unless the query says otherwise
    pub fn list_transactions(
        &self,
        query: &TransactionQuery,
    ) -> Result<Vec<Transaction>, LedgerError> {
        self.store.transactions(query)
    }

    /// Check that a wallet's balance equals the sum of its transactions
    ///
    /// Returns the verified balance.
    ///
    /// # Errors
    ///
    /// `IntegrityViolation` if the balance and the ledger sum disagree or the
    /// balance is negative.
    pub fn verify_wallet(&self, wallet_id: WalletId) -> Result<Decimal, LedgerError> {
        let (wallet, ledger_sum) = self
            .store
            .wallet_with_ledger_sum(wallet_id)?
            .ok_or_else(|| LedgerError::wallet_not_found(wallet_id))?;

        if wallet.balance != ledger_sum || wallet.balance < Decimal::ZERO {
            error!(
                wallet = wallet_id,
                balance = %wallet.balance,
                ledger_sum = %ledger_sum,
                "Wallet balance does not match its transactions"
            );
            return Err(LedgerError::integrity_violation(
                wallet_id,
                wallet.balance,
                ledger_sum,
            ));
        }
        Ok(wallet.balance)
    }

    /// Verify every wallet
    ///
    /// Every wallet is checked and each violation logged; the first violation
    /// found is returned. On success returns the number of wallets verified.
    pub fn verify_all(&self) -> Result<usize, LedgerError> {
        let wallets = self.list_wallets(&WalletQuery::default())?;
        let mut first_violation = None;

        for wallet in &wallets {
            match self.verify_wallet(wallet.id) {
                Ok(_) => {}
                // Deleted since the listing
                Err(LedgerError::WalletNotFound { .. }) => {}
                Err(e) => {
                    first_violation.get_or_insert(e);
                }
            }
        }

        match first_violation {
            Some(e) => Err(e),
            None => {
                info!(wallets = wallets.len(), "Ledger verified");
                Ok(wallets.len())
            }
        }
    }
}

fn retry_conflicts<T>(
    wallet: WalletId,
    max_retries: u32,
    mut attempt: impl FnMut() -> Result<Attempt<T>, LedgerError>,
) -> Result<T, LedgerError> {
    for n in 1..=max_retries {
        match attempt()? {
            Attempt::Done(value) => return Ok(value),
            Attempt::Conflict => debug!(wallet, attempt = n, "Version conflict, retrying"),
        }
    }
    Err(LedgerError::contention(wallet, max_retries))
}

/// Resolve an existing txid from inside a unit of work
fn resolve_in(
    uow: &dyn UnitOfWork,
    request: &TransactionRequest,
    existing: Transaction,
) -> Result<AppliedTransaction, LedgerError> {
    if !existing.matches(request) {
        return Err(LedgerError::duplicate_transaction(
            &existing.txid,
            existing.wallet_id,
        ));
    }
    let wallet = uow
        .wallet(existing.wallet_id)?
        .ok_or_else(|| LedgerError::wallet_not_found(existing.wallet_id))?;
    Ok(replayed(wallet, existing))
}

fn replayed(wallet: Wallet, transaction: Transaction) -> AppliedTransaction {
    AppliedTransaction {
        wallet,
        transaction,
        outcome: ApplyOutcome::Replayed,
    }
}
