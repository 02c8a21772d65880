//! TTL cache with lazy eviction.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::trace;

use loadgrid_state::{Clock, ConfigError};

/// A cached value and the clock reading at which it goes stale.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub value: T,
    pub expires_at: u64,
}

impl<T> CacheEntry<T> {
    fn is_live(&self, now: u64) -> bool {
        now < self.expires_at
    }
}

/// Keyed TTL cache. Values are cloned out on read so cached state cannot be
/// mutated through a returned handle.
pub struct MetricsCache<T> {
    entries: DashMap<String, CacheEntry<T>>,
    default_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<T: Clone> MetricsCache<T> {
    /// Create a cache whose `set` uses `default_ttl`.
    pub fn new(default_ttl: Duration, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        validate_ttl(default_ttl)?;
        Ok(Self {
            entries: DashMap::new(),
            default_ttl,
            clock,
        })
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Store `value` under `key` with the default TTL.
    pub fn set(&self, key: &str, value: T) {
        self.insert(key, value, self.default_ttl);
    }

    /// Store `value` under `key`, overwriting any existing entry.
    pub fn set_with_ttl(&self, key: &str, value: T, ttl: Duration) -> Result<(), ConfigError> {
        validate_ttl(ttl)?;
        self.insert(key, value, ttl);
        Ok(())
    }

    fn insert(&self, key: &str, value: T, ttl: Duration) {
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        let expires_at = self.clock.now_millis().saturating_add(ttl_ms);
        self.entries
            .insert(key.to_string(), CacheEntry { value, expires_at });
        trace!(%key, expires_at, "cache set");
    }

    /// Return the live value for `key`, evicting it if it has expired.
    pub fn get(&self, key: &str) -> Option<T> {
        let now = self.clock.now_millis();
        // The entry lock covers check-and-evict, so a concurrent `set` of a
        // fresh value cannot be removed by a reader that saw the stale one.
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(entry) => {
                if entry.get().is_live(now) {
                    Some(entry.get().value.clone())
                } else {
                    entry.remove();
                    trace!(%key, "cache entry expired");
                    None
                }
            }
            Entry::Vacant(_) => None,
        }
    }

    /// Drop the entry for `key`. Returns true if one was present.
    pub fn delete(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of stored entries, including ones that have expired but not
    /// yet been evicted.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn validate_ttl(ttl: Duration) -> Result<(), ConfigError> {
    if ttl.is_zero() {
        return Err(ConfigError::ZeroTtl);
    }
    Ok(())
}
