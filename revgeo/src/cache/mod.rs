//! Address caches owned by the coordinator.
//!
//! Two caches exist because the same physical point is often visited by many
//! logical rows over time, while a row's own last answer should be served
//! instantly even when nothing else knows it.
//!
//! - [`IdentityCache`] - logical id → last `(LookupKey, address)`, strict LRU
//! - [`CoordinateCache`] - fingerprint → non-empty address, unbounded
//!
//! Read order is identity, then coordinate, then network. On success the
//! coordinate cache is written first, then the identity cache.

mod coordinate;
mod identity;

pub use coordinate::CoordinateCache;
pub use identity::{
    IdentityCache, IdentityEntry, DEFAULT_IDENTITY_CAPACITY, MIN_IDENTITY_CAPACITY,
};

use std::fmt;

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Entries currently held.
    pub entries: usize,
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that fell through.
    pub misses: u64,
    /// Entries dropped to make room.
    pub evictions: u64,
}

impl CacheStats {
    /// Returns the hit ratio (0.0 to 1.0).
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} entries, {} hits, {} misses, {} evictions",
            self.entries, self.hits, self.misses, self.evictions
        )
    }
}
