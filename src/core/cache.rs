//! Balance read cache
//!
//! `BalanceCache` keeps recently read wallet balances for a bounded time. It
//! serves `get_balance` only; nothing that validates or mutates a balance
//! reads from it.
//!
//! # Stale fills
//!
//! A reader that misses takes a ticket, reads the store, then fills the cache
//! with its ticket. Tickets and invalidations are stamped from one cache-wide
//! clock that only moves forward. A fill is dropped when its wallet was
//! invalidated after the ticket was taken, or when any wallet was forgotten
//! since, so a reader that read the store before a concurrent write committed
//! (or before the wallet was deleted) cannot put the old balance back.
//!
//! Slots exist only for wallets that were written or successfully read;
//! taking a ticket allocates nothing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rust_decimal::Decimal;

use crate::types::WalletId;

/// Permission to fill one wallet's cache slot, valid until the next invalidation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillTicket {
    wallet: WalletId,
    issued_at: u64,
}

#[derive(Debug)]
struct Slot {
    invalidated_at: u64,
    value: Option<(Decimal, Instant)>,
}

/// Time-bounded cache of committed wallet balances
#[derive(Debug)]
pub struct BalanceCache {
    slots: DashMap<WalletId, Slot>,
    clock: AtomicU64,
    last_forget: AtomicU64,
    ttl: Duration,
}

impl BalanceCache {
    /// Create a cache whose entries expire after `ttl`
    pub fn new(ttl: Duration) -> Self {
        Self {
            slots: DashMap::new(),
            clock: AtomicU64::new(0),
            last_forget: AtomicU64::new(0),
            ttl,
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Cached balance of a wallet, if present and fresh
    pub fn get(&self, wallet: WalletId) -> Option<Decimal> {
        let slot = self.slots.get(&wallet)?;
        let (balance, stored_at) = slot.value?;
        (stored_at.elapsed() < self.ttl).then_some(balance)
    }

    /// Take a ticket before reading the store on a miss
    pub fn ticket(&self, wallet: WalletId) -> FillTicket {
        FillTicket {
            wallet,
            issued_at: self.clock.load(Ordering::SeqCst),
        }
    }

    /// Store a balance read after `ticket` was taken
    ///
    /// Returns false, leaving the cache untouched, when the wallet was
    /// invalidated or any wallet was forgotten since.
    pub fn fill(&self, ticket: FillTicket, balance: Decimal) -> bool {
        // Checked under the entry lock so a concurrent forget is ordered with it
        let entry = self.slots.entry(ticket.wallet);
        if self.last_forget.load(Ordering::SeqCst) > ticket.issued_at {
            return false;
        }

        let value = Some((balance, Instant::now()));
        match entry {
            Entry::Occupied(mut occupied) => {
                if occupied.get().invalidated_at > ticket.issued_at {
                    return false;
                }
                occupied.get_mut().value = value;
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Slot {
                    invalidated_at: 0,
                    value,
                });
            }
        }
        true
    }

    /// Drop the cached balance of a wallet whose balance changed
    pub fn invalidate(&self, wallet: WalletId) {
        let mut slot = self.slots.entry(wallet).or_insert(Slot {
            invalidated_at: 0,
            value: None,
        });
        slot.invalidated_at = self.tick();
        slot.value = None;
    }

    /// Drop all state kept for a deleted wallet
    pub fn forget(&self, wallet: WalletId) {
        let entry = self.slots.entry(wallet);
        self.last_forget.fetch_max(self.tick(), Ordering::SeqCst);
        if let Entry::Occupied(occupied) = entry {
            occupied.remove();
        }
    }

    /// Number of wallets with a slot
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no wallet has a slot
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
