//! Per-wallet locks
//!
//! This module provides `WalletLocks`, a registry of one mutex per wallet. The
//! balance engine holds a wallet's mutex for the whole read-check-write of a
//! balance change, so operations on the same wallet run one at a time while
//! operations on different wallets never wait on each other.
//!
//! # Thread Safety
//!
//! The registry is a `DashMap` of `Arc<parking_lot::Mutex<()>>`. A caller
//! clones the `Arc` out of the map before locking, so no DashMap shard lock is
//! held while waiting for a wallet.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use tracing::debug;

use crate::types::{LedgerError, WalletId};

/// Registry of per-wallet mutexes
#[derive(Debug, Default)]
pub struct WalletLocks {
    locks: DashMap<WalletId, Arc<Mutex<()>>>,
}

/// Exclusive hold on one wallet, released on drop
pub struct WalletGuard<'a> {
    wallet: WalletId,
    _guard: MutexGuard<'a, ()>,
}

impl WalletGuard<'_> {
    /// The wallet this guard holds
    pub fn wallet(&self) -> WalletId {
        self.wallet
    }
}

impl WalletLocks {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Mutex of a wallet, created on first use
    pub fn handle(&self, wallet: WalletId) -> Arc<Mutex<()>> {
        Arc::clone(
            self.locks
                .entry(wallet)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }

    /// Lock a wallet, waiting at most `timeout`
    ///
    /// The returned guard borrows `handle`, which the caller obtains from
    /// [`WalletLocks::handle`] and keeps alive for as long as it holds the lock.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if the wallet is still held by another caller when
    /// `timeout` elapses.
    pub fn acquire<'a>(
        wallet: WalletId,
        handle: &'a Mutex<()>,
        timeout: Duration,
    ) -> Result<WalletGuard<'a>, LedgerError> {
        let started = Instant::now();
        match handle.try_lock_for(timeout) {
            Some(guard) => Ok(WalletGuard {
                wallet,
                _guard: guard,
            }),
            None => {
                let waited_ms = started.elapsed().as_millis() as u64;
                debug!(wallet, waited_ms, "Timed out waiting for wallet lock");
                Err(LedgerError::timeout(wallet, waited_ms))
            }
        }
    }

    /// Drop the mutex of a wallet that no longer exists
    ///
    /// The entry is kept while any caller still holds a handle to it, so two
    /// callers can never end up with different mutexes for the same wallet.
    pub fn forget(&self, wallet: WalletId) {
        self.locks
            .remove_if(&wallet, |_, mutex| Arc::strong_count(mutex) == 1);
    }

    /// Number of wallets with a registered mutex
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no mutex has been registered yet
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_handle_is_shared_per_wallet() {
        let locks = WalletLocks::new();

        let a = locks.handle(1);
        let b = locks.handle(1);
        let c = locks.handle(2);

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(locks.len(), 2);
    }

    #[test]
    fn test_acquire_times_out_while_held() {
        let locks = WalletLocks::new();
        let handle = locks.handle(7);
        let _held = WalletLocks::acquire(7, &handle, Duration::from_millis(10)).unwrap();

        let other = locks.handle(7);
        let result = WalletLocks::acquire(7, &other, Duration::from_millis(20));

        match result {
            Err(LedgerError::Timeout { wallet, waited_ms }) => {
                assert_eq!(wallet, 7);
                assert!(waited_ms >= 15, "waited {}ms", waited_ms);
            }
            Err(e) => panic!("Expected Timeout, got {:?}", e),
            Ok(_) => panic!("Expected Timeout, got a guard"),
        }
    }

    #[test]
    fn test_different_wallets_do_not_block() {
        let locks = WalletLocks::new();
        let first = locks.handle(1);
        let second = locks.handle(2);

        let _a = WalletLocks::acquire(1, &first, Duration::from_millis(10)).unwrap();
        let b = WalletLocks::acquire(2, &second, Duration::from_millis(10)).unwrap();

        assert_eq!(b.wallet(), 2);
    }

    #[test]
    fn test_lock_is_released_on_drop() {
        let locks = WalletLocks::new();
        let handle = locks.handle(1);

        drop(WalletLocks::acquire(1, &handle, Duration::from_millis(10)).unwrap());

        assert!(WalletLocks::acquire(1, &handle, Duration::from_millis(10)).is_ok());
    }

    #[test]
    fn test_mutual_exclusion_across_threads() {
        let locks = Arc::new(WalletLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let mut handles = vec![];

        for _ in 0..8 {
            let locks = Arc::clone(&locks);
            let inside = Arc::clone(&inside);
            handles.push(thread::spawn(move || {
                for _ in 0..50 {
                    let handle = locks.handle(1);
                    let _guard =
                        WalletLocks::acquire(1, &handle, Duration::from_secs(5)).unwrap();
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                    inside.fetch_sub(1, Ordering::SeqCst);
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_forget_removes_entry() {
        let locks = WalletLocks::new();
        locks.handle(3);

        locks.forget(3);

        assert!(locks.is_empty());
    }

    #[test]
    fn test_forget_keeps_handles_in_use() {
        let locks = WalletLocks::new();
        let held = locks.handle(9);

        locks.forget(9);
        assert_eq!(locks.len(), 1);
        assert!(Arc::ptr_eq(&held, &locks.handle(9)));

        drop(held);
        locks.forget(9);
        assert!(locks.is_empty());
    }
}
