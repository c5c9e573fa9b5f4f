//! Engine configuration
//!
//! Tunables of the balance engine and the choice of ledger store. Values come
//! from the command line (with environment fallbacks, see `cli::args`); zero
//! values that would make the engine unusable fall back to the defaults with a
//! warning.

use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

/// Default time to wait for a wallet lock
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of attempts on an optimistic-concurrency conflict
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default lifetime of a cached balance
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Balance read cache settings
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Whether `get_balance` may be served from the cache
    pub enabled: bool,
    /// How long a cached balance stays valid
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: DEFAULT_CACHE_TTL,
        }
    }
}

impl CacheConfig {
    /// A cache that is never consulted
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

/// Balance engine settings
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// How long a caller waits for a wallet before giving up with `Timeout`
    pub lock_timeout: Duration,
    /// Attempts per call before a version conflict surfaces as `Contention`
    pub max_retries: u32,
    /// Balance read cache
    pub cache: CacheConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            cache: CacheConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Create a configuration, replacing unusable values with defaults
    ///
    /// # Arguments
    ///
    /// * `lock_timeout` - Wallet lock wait; zero falls back to the default
    /// * `max_retries` - Attempts on conflict; zero falls back to the default
    /// * `cache` - Balance cache settings; a zero TTL disables the cache
    pub fn new(lock_timeout: Duration, max_retries: u32, cache: CacheConfig) -> Self {
        let lock_timeout = if lock_timeout.is_zero() {
            warn!(
                default_ms = DEFAULT_LOCK_TIMEOUT.as_millis() as u64,
                "Invalid lock timeout (0ms), using default"
            );
            DEFAULT_LOCK_TIMEOUT
        } else {
            lock_timeout
        };

        let max_retries = if max_retries == 0 {
            warn!(
                default = DEFAULT_MAX_RETRIES,
                "Invalid max retries (0), using default"
            );
            DEFAULT_MAX_RETRIES
        } else {
            max_retries
        };

        let cache = if cache.enabled && cache.ttl.is_zero() {
            warn!("Cache TTL of 0s disables the balance cache");
            CacheConfig::disabled()
        } else {
            cache
        };

        Self {
            lock_timeout,
            max_retries,
            cache,
        }
    }
}

/// Where the ledger is kept
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StoreLocation {
    /// Process memory, lost on exit
    #[default]
    Memory,
    /// A SQLite database file
    Sqlite(PathBuf),
}

impl StoreLocation {
    /// SQLite when a path is given, memory otherwise
    pub fn from_path(path: Option<PathBuf>) -> Self {
        path.map_or(StoreLocation::Memory, StoreLocation::Sqlite)
    }
}
