//! SQLite ledger store
//!
//! Wallets and transactions live in two tables. Balances and amounts are kept
//! as decimal TEXT so no precision is lost; the database enforces label and
//! txid uniqueness, the wallet foreign key and the non-negative balance.
//!
//! A unit of work is a `BEGIN IMMEDIATE` transaction on the store's single
//! connection. The connection mutex is held for the lifetime of the unit of
//! work, which serializes units of work across all wallets, not only within
//! one. Committed reads wait on the same mutex. Every wait is bounded by the
//! store's busy timeout; past it the call fails with `StoreUnavailable`.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, MutexGuard};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use tracing::{debug, warn};

use super::{ledger_sum, LedgerStore, TransactionQuery, UnitOfWork, WalletQuery};
use crate::config::DEFAULT_LOCK_TIMEOUT;
use crate::types::{LedgerError, NewTransaction, Transaction, Wallet, WalletId};

const SQLITE_CONSTRAINT_FOREIGNKEY: i32 = 787;
const SQLITE_CONSTRAINT_UNIQUE: i32 = 2067;

const WALLET_COLUMNS: &str = "id, label, balance, version, created_at";
const TRANSACTION_COLUMNS: &str = "id, txid, wallet_id, amount, created_at";

/// Ledger store backed by a SQLite database
///
/// All callers share one connection. A unit of work on any wallet blocks
/// units of work and reads on every other wallet until it finishes, for at
/// most the busy timeout (default 5 s, see [`Self::with_busy_timeout`]).
#[derive(Debug, Clone)]
pub struct SqliteLedgerStore {
    connection: Arc<Mutex<Connection>>,
    busy_timeout: Duration,
}

impl SqliteLedgerStore {
    /// Open (or create) a database file
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the file cannot be opened or the schema
    /// cannot be created.
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        let connection = Connection::open(path).map_err(LedgerError::store_unavailable)?;
        debug!(path = %path.display(), "Opened SQLite ledger");
        Self::new(connection)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        let connection = Connection::open_in_memory().map_err(LedgerError::store_unavailable)?;
        Self::new(connection)
    }

    /// Wrap an existing connection, creating the tables if needed
    pub fn new(connection: Connection) -> Result<Self, LedgerError> {
        create_tables(&connection).map_err(LedgerError::store_unavailable)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
            busy_timeout: DEFAULT_LOCK_TIMEOUT,
        })
    }

    /// Bound how long a call waits for the shared connection
    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, LedgerError> {
        self.connection
            .try_lock_for(self.busy_timeout)
            .ok_or_else(|| {
                let waited_ms = self.busy_timeout.as_millis() as u64;
                warn!(waited_ms, "SQLite connection busy");
                LedgerError::store_unavailable(format!(
                    "SQLite connection busy for {}ms",
                    waited_ms
                ))
            })
    }
}

fn create_tables(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute_batch(
        "PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS wallet (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            label TEXT NOT NULL UNIQUE,
            balance TEXT NOT NULL CHECK (CAST(balance AS REAL) >= 0),
            version INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS ledger_transaction (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            txid TEXT NOT NULL UNIQUE,
            wallet_id INTEGER NOT NULL REFERENCES wallet(id) ON DELETE RESTRICT,
            amount TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_ledger_transaction_wallet
            ON ledger_transaction(wallet_id);",
    )
}

fn decimal_column(row: &Row, index: usize) -> Result<Decimal, rusqlite::Error> {
    let text: String = row.get(index)?;
    Decimal::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e)))
}

fn map_wallet_row(row: &Row) -> Result<Wallet, rusqlite::Error> {
    let version: i64 = row.get(3)?;
    Ok(Wallet {
        id: row.get(0)?,
        label: row.get(1)?,
        balance: decimal_column(row, 2)?,
        version: version as u64,
        created_at: row.get(4)?,
    })
}

fn map_transaction_row(row: &Row) -> Result<Transaction, rusqlite::Error> {
    Ok(Transaction {
        id: row.get(0)?,
        txid: row.get(1)?,
        wallet_id: row.get(2)?,
        amount: decimal_column(row, 3)?,
        created_at: row.get(4)?,
    })
}

fn constraint_code(error: &rusqlite::Error) -> Option<i32> {
    match error {
        rusqlite::Error::SqliteFailure(error, Some(_)) => Some(error.extended_code),
        _ => None,
    }
}

fn select_wallet(connection: &Connection, id: WalletId) -> Result<Option<Wallet>, LedgerError> {
    connection
        .query_row(
            &format!("SELECT {} FROM wallet WHERE id = ?1", WALLET_COLUMNS),
            params![id],
            map_wallet_row,
        )
        .optional()
        .map_err(LedgerError::store_unavailable)
}

fn select_wallet_by_label(
    connection: &Connection,
    label: &str,
) -> Result<Option<Wallet>, LedgerError> {
    connection
        .query_row(
            &format!("SELECT {} FROM wallet WHERE label = ?1", WALLET_COLUMNS),
            params![label],
            map_wallet_row,
        )
        .optional()
        .map_err(LedgerError::store_unavailable)
}

fn select_transaction(
    connection: &Connection,
    txid: &str,
) -> Result<Option<Transaction>, LedgerError> {
    connection
        .query_row(
            &format!(
                "SELECT {} FROM ledger_transaction WHERE txid = ?1",
                TRANSACTION_COLUMNS
            ),
            params![txid],
            map_transaction_row,
        )
        .optional()
        .map_err(LedgerError::store_unavailable)
}

fn select_wallets(connection: &Connection, query: &WalletQuery) -> Result<Vec<Wallet>, LedgerError> {
    let mut sql = format!("SELECT {} FROM wallet", WALLET_COLUMNS);
    let mut values = Vec::new();
    if let Some(label) = &query.label {
        sql.push_str(" WHERE label = ?");
        values.push(Value::Text(label.clone()));
    }

    let mut statement = connection
        .prepare(&sql)
        .map_err(LedgerError::store_unavailable)?;
    let mut wallets = statement
        .query_map(params_from_iter(values), map_wallet_row)
        .map_err(LedgerError::store_unavailable)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(LedgerError::store_unavailable)?;

    query.sort(&mut wallets);
    Ok(wallets)
}

fn select_transactions(
    connection: &Connection,
    query: &TransactionQuery,
) -> Result<Vec<Transaction>, LedgerError> {
    let mut clauses = Vec::new();
    let mut values = Vec::new();
    if let Some(wallet_id) = query.wallet_id {
        clauses.push("wallet_id = ?");
        values.push(Value::Integer(wallet_id));
    }
    if let Some(txid) = &query.txid {
        clauses.push("txid = ?");
        values.push(Value::Text(txid.clone()));
    }

    let mut sql = format!("SELECT {} FROM ledger_transaction", TRANSACTION_COLUMNS);
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }

    let mut statement = connection
        .prepare(&sql)
        .map_err(LedgerError::store_unavailable)?;
    let mut transactions = statement
        .query_map(params_from_iter(values), map_transaction_row)
        .map_err(LedgerError::store_unavailable)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(LedgerError::store_unavailable)?;

    query.sort(&mut transactions);
    Ok(transactions)
}

#[allow(clippy::let_and_return)]
fn select_amounts(connection: &Connection, wallet_id: WalletId) -> Result<Vec<Decimal>, LedgerError> {
    let mut statement = connection
        .prepare("SELECT amount FROM ledger_transaction WHERE wallet_id = ?1")
        .map_err(LedgerError::store_unavailable)?;
    let amounts = statement
        .query_map(params![wallet_id], |row| decimal_column(row, 0))
        .map_err(LedgerError::store_unavailable)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(LedgerError::store_unavailable);
    amounts
}

fn count_transactions(connection: &Connection, wallet_id: WalletId) -> Result<u64, LedgerError> {
    let count: i64 = connection
        .query_row(
            "SELECT COUNT(*) FROM ledger_transaction WHERE wallet_id = ?1",
            params![wallet_id],
            |row| row.get(0),
        )
        .map_err(LedgerError::store_unavailable)?;
    Ok(count as u64)
}

impl LedgerStore for SqliteLedgerStore {
    fn begin(&self) -> Result<Box<dyn UnitOfWork + '_>, LedgerError> {
        let connection = self.lock()?;
        connection
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(LedgerError::store_unavailable)?;
        Ok(Box::new(SqliteUnitOfWork {
            connection,
            finished: false,
        }))
    }

    fn wallet(&self, id: WalletId) -> Result<Option<Wallet>, LedgerError> {
        let connection = self.lock()?;
        select_wallet(&connection, id)
    }

    fn wallet_by_label(&self, label: &str) -> Result<Option<Wallet>, LedgerError> {
        let connection = self.lock()?;
        select_wallet_by_label(&connection, label)
    }

    fn transaction(&self, txid: &str) -> Result<Option<Transaction>, LedgerError> {
        let connection = self.lock()?;
        select_transaction(&connection, txid)
    }

    fn wallets(&self, query: &WalletQuery) -> Result<Vec<Wallet>, LedgerError> {
        let connection = self.lock()?;
        select_wallets(&connection, query)
    }

    fn transactions(&self, query: &TransactionQuery) -> Result<Vec<Transaction>, LedgerError> {
        let connection = self.lock()?;
        select_transactions(&connection, query)
    }

    fn wallet_with_ledger_sum(
        &self,
        id: WalletId,
    ) -> Result<Option<(Wallet, Decimal)>, LedgerError> {
        let connection = self.lock()?;
        let Some(wallet) = select_wallet(&connection, id)? else {
            return Ok(None);
        };
        let amounts = select_amounts(&connection, id)?;
        Ok(Some((wallet, ledger_sum(id, &amounts)?)))
    }
}

/// A `BEGIN IMMEDIATE` transaction holding the store connection
///
/// Rolled back on drop unless committed.
struct SqliteUnitOfWork<'a> {
    connection: MutexGuard<'a, Connection>,
    finished: bool,
}

impl SqliteUnitOfWork<'_> {
    fn wallet_or_not_found(&self, id: WalletId) -> Result<Wallet, LedgerError> {
        select_wallet(&self.connection, id)?.ok_or_else(|| LedgerError::wallet_not_found(id))
    }

    /// Resolve an UPDATE that matched no row
    fn missed_update(&self, wallet: &Wallet) -> Result<Option<Wallet>, LedgerError> {
        self.wallet_or_not_found(wallet.id)?;
        debug!(wallet = wallet.id, version = wallet.version, "Stale wallet version");
        Ok(None)
    }
}

impl UnitOfWork for SqliteUnitOfWork<'_> {
    fn wallet(&self, id: WalletId) -> Result<Option<Wallet>, LedgerError> {
        select_wallet(&self.connection, id)
    }

    fn wallet_by_label(&self, label: &str) -> Result<Option<Wallet>, LedgerError> {
        select_wallet_by_label(&self.connection, label)
    }

    fn transaction(&self, txid: &str) -> Result<Option<Transaction>, LedgerError> {
        select_transaction(&self.connection, txid)
    }

    fn transaction_count(&self, wallet_id: WalletId) -> Result<u64, LedgerError> {
        count_transactions(&self.connection, wallet_id)
    }

    fn insert_wallet(&mut self, label: &str) -> Result<Wallet, LedgerError> {
        self.connection
            .query_row(
                &format!(
                    "INSERT INTO wallet (label, balance, version, created_at)
                     VALUES (?1, '0', 0, ?2)
                     RETURNING {}",
                    WALLET_COLUMNS
                ),
                params![label, Utc::now()],
                map_wallet_row,
            )
            .map_err(|error| match constraint_code(&error) {
                Some(SQLITE_CONSTRAINT_UNIQUE) => LedgerError::duplicate_label(label),
                _ => LedgerError::store_unavailable(error),
            })
    }

    fn set_balance(
        &mut self,
        wallet: &Wallet,
        balance: Decimal,
    ) -> Result<Option<Wallet>, LedgerError> {
        if balance.is_sign_negative() && !balance.is_zero() {
            return Err(LedgerError::insufficient_balance(
                wallet.id,
                wallet.balance,
                balance - wallet.balance,
            ));
        }

        let updated = self
            .connection
            .query_row(
                &format!(
                    "UPDATE wallet SET balance = ?1, version = version + 1
                     WHERE id = ?2 AND version = ?3
                     RETURNING {}",
                    WALLET_COLUMNS
                ),
                params![balance.to_string(), wallet.id, wallet.version as i64],
                map_wallet_row,
            )
            .optional()
            .map_err(LedgerError::store_unavailable)?;

        match updated {
            Some(updated) => Ok(Some(updated)),
            None => self.missed_update(wallet),
        }
    }

    fn set_label(&mut self, wallet: &Wallet, label: &str) -> Result<Option<Wallet>, LedgerError> {
        let updated = self
            .connection
            .query_row(
                &format!(
                    "UPDATE wallet SET label = ?1, version = version + 1
                     WHERE id = ?2 AND version = ?3
                     RETURNING {}",
                    WALLET_COLUMNS
                ),
                params![label, wallet.id, wallet.version as i64],
                map_wallet_row,
            )
            .optional()
            .map_err(|error| match constraint_code(&error) {
                Some(SQLITE_CONSTRAINT_UNIQUE) => LedgerError::duplicate_label(label),
                _ => LedgerError::store_unavailable(error),
            })?;

        match updated {
            Some(updated) => Ok(Some(updated)),
            None => self.missed_update(wallet),
        }
    }

    fn insert_transaction(&mut self, new: NewTransaction) -> Result<Transaction, LedgerError> {
        let inserted = self.connection.query_row(
            &format!(
                "INSERT INTO ledger_transaction (txid, wallet_id, amount, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 RETURNING {}",
                TRANSACTION_COLUMNS
            ),
            params![new.txid, new.wallet_id, new.amount.to_string(), Utc::now()],
            map_transaction_row,
        );

        match inserted {
            Ok(transaction) => Ok(transaction),
            Err(error) => match constraint_code(&error) {
                Some(SQLITE_CONSTRAINT_UNIQUE) => {
                    let owner = select_transaction(&self.connection, &new.txid)?
                        .map_or(new.wallet_id, |existing| existing.wallet_id);
                    Err(LedgerError::duplicate_transaction(&new.txid, owner))
                }
                Some(SQLITE_CONSTRAINT_FOREIGNKEY) => {
                    Err(LedgerError::wallet_not_found(new.wallet_id))
                }
                _ => Err(LedgerError::store_unavailable(error)),
            },
        }
    }

    fn delete_wallet(&mut self, wallet: &Wallet) -> Result<bool, LedgerError> {
        self.wallet_or_not_found(wallet.id)?;

        let referencing = count_transactions(&self.connection, wallet.id)?;
        if referencing > 0 {
            return Err(LedgerError::wallet_in_use(wallet.id, referencing));
        }

        let deleted = self
            .connection
            .execute(
                "DELETE FROM wallet WHERE id = ?1 AND version = ?2",
                params![wallet.id, wallet.version as i64],
            )
            .map_err(|error| match constraint_code(&error) {
                Some(SQLITE_CONSTRAINT_FOREIGNKEY) => LedgerError::wallet_in_use(wallet.id, 1),
                _ => LedgerError::store_unavailable(error),
            })?;
        Ok(deleted == 1)
    }

    fn commit(mut self: Box<Self>) -> Result<(), LedgerError> {
        self.connection
            .execute_batch("COMMIT")
            .map_err(LedgerError::store_unavailable)?;
        self.finished = true;
        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> Result<(), LedgerError> {
        self.finished = true;
        self.connection
            .execute_batch("ROLLBACK")
            .map_err(LedgerError::store_unavailable)
    }
}

impl Drop for SqliteUnitOfWork<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(error) = self.connection.execute_batch("ROLLBACK") {
            warn!(%error, "Failed to roll back abandoned unit of work");
        }
    }
}
