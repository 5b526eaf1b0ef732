//! Per-id answer cache with strict LRU eviction.
//!
//! Maps a caller-supplied logical id (a table row, say) to the last resolved
//! `(LookupKey, address)` for it. An entry is only trusted while its key still
//! matches what the caller currently wants; otherwise it is a miss.

use std::num::NonZeroUsize;

use lru::LruCache;

use crate::cache::CacheStats;
use crate::coord::LookupKey;

/// Default number of ids remembered.
pub const DEFAULT_IDENTITY_CAPACITY: usize = 400;

/// Smallest capacity accepted from configuration.
pub const MIN_IDENTITY_CAPACITY: usize = 50;

/// The last answer resolved for one logical id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityEntry {
    /// The key the address was resolved for.
    pub key: LookupKey,
    /// Resolved address; may be empty.
    pub address: String,
}

/// Bounded id → answer cache.
///
/// Inserting or hitting an entry moves it to the most-recently-used end;
/// overflowing evicts the least-recently-used entry regardless of content.
pub struct IdentityCache {
    entries: LruCache<String, IdentityEntry>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl IdentityCache {
    /// Creates a cache holding at most `capacity` ids (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    /// Returns the cached address if the entry for `id` was resolved for `key`.
    ///
    /// Only a matching entry is promoted; a stale entry is left where it is.
    pub fn lookup(&mut self, id: &str, key: &LookupKey) -> Option<String> {
        let matches = self.entries.peek(id).is_some_and(|entry| entry.key == *key);
        if !matches {
            self.misses += 1;
            return None;
        }

        self.hits += 1;
        self.entries.get(id).map(|entry| entry.address.clone())
    }

    /// Stores the answer for `id`, returning the id evicted to make room.
    pub fn insert(&mut self, id: &str, entry: IdentityEntry) -> Option<String> {
        match self.entries.push(id.to_string(), entry) {
            Some((evicted, _)) if evicted != id => {
                self.evictions += 1;
                Some(evicted)
            }
            _ => None,
        }
    }

    /// Reads an entry without promoting it or touching statistics.
    pub fn peek(&self, id: &str) -> Option<&IdentityEntry> {
        self.entries.peek(id)
    }

    /// Number of ids currently cached.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of ids.
    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    /// Drops every entry. Statistics are kept.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Returns a snapshot of the statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
        }
    }
}

impl Default for IdentityCache {
    fn default() -> Self {
        Self::new(DEFAULT_IDENTITY_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(lat: f64, ts: i64) -> LookupKey {
        LookupKey::new(lat, -3.0, ts).unwrap()
    }

    fn entry(lat: f64, ts: i64, address: &str) -> IdentityEntry {
        IdentityEntry {
            key: key(lat, ts),
            address: address.to_string(),
        }
    }

    #[test]
    fn test_lookup_requires_matching_key() {
        let mut cache = IdentityCache::new(10);
        cache.insert("row-1", entry(40.0, 1000, "Calle Mayor"));

        assert_eq!(
            cache.lookup("row-1", &key(40.0, 1000)),
            Some("Calle Mayor".to_string())
        );
        // Same id, moved coordinate: stale entry is a miss
        assert_eq!(cache.lookup("row-1", &key(41.0, 1000)), None);
        // Same id, different timestamp
        assert_eq!(cache.lookup("row-1", &key(40.0, 2000)), None);
        assert_eq!(cache.lookup("row-2", &key(40.0, 1000)), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 3);
    }

    #[test]
    fn test_empty_address_is_a_valid_answer() {
        let mut cache = IdentityCache::new(10);
        cache.insert("row-1", entry(0.0, 1, ""));
        assert_eq!(cache.lookup("row-1", &key(0.0, 1)), Some(String::new()));
    }

    #[test]
    fn test_overflow_evicts_least_recently_used() {
        let mut cache = IdentityCache::new(3);
        cache.insert("a", entry(1.0, 1, "A"));
        cache.insert("b", entry(2.0, 1, "B"));
        cache.insert("c", entry(3.0, 1, "C"));

        let evicted = cache.insert("d", entry(4.0, 1, "D"));
        assert_eq!(evicted.as_deref(), Some("a"));
        assert!(cache.peek("a").is_none());
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_hit_promotes_entry() {
        let mut cache = IdentityCache::new(3);
        cache.insert("a", entry(1.0, 1, "A"));
        cache.insert("b", entry(2.0, 1, "B"));
        cache.insert("c", entry(3.0, 1, "C"));

        // Touch "a" so "b" becomes the eviction candidate
        assert!(cache.lookup("a", &key(1.0, 1)).is_some());

        let evicted = cache.insert("d", entry(4.0, 1, "D"));
        assert_eq!(evicted.as_deref(), Some("b"));
        assert!(cache.peek("a").is_some());
    }

    #[test]
    fn test_stale_lookup_does_not_promote() {
        let mut cache = IdentityCache::new(2);
        cache.insert("a", entry(1.0, 1, "A"));
        cache.insert("b", entry(2.0, 1, "B"));

        assert!(cache.lookup("a", &key(9.0, 1)).is_none());

        let evicted = cache.insert("c", entry(3.0, 1, "C"));
        assert_eq!(evicted.as_deref(), Some("a"));
    }

    #[test]
    fn test_reinsert_same_id_is_not_eviction() {
        let mut cache = IdentityCache::new(2);
        cache.insert("a", entry(1.0, 1, "A"));
        cache.insert("b", entry(2.0, 1, "B"));

        assert_eq!(cache.insert("a", entry(1.0, 2, "A2")), None);
        assert_eq!(cache.stats().evictions, 0);
        assert_eq!(cache.peek("a").unwrap().address, "A2");

        // Re-insert promoted "a", so "b" goes next
        assert_eq!(cache.insert("c", entry(3.0, 1, "C")).as_deref(), Some("b"));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let cache = IdentityCache::new(0);
        assert_eq!(cache.capacity(), 1);
        assert_eq!(IdentityCache::default().capacity(), DEFAULT_IDENTITY_CAPACITY);
    }
}
