//! Fingerprint → address cache shared by every logical id.
//!
//! Only non-empty addresses are stored, so a coordinate the provider could
//! not resolve is asked again on the next visit. Growth is unbounded; repeated
//! visits collapse onto the same fingerprint.

use std::collections::HashMap;

use crate::cache::CacheStats;
use crate::coord::Fingerprint;

/// Addresses known for physical points.
#[derive(Debug, Default)]
pub struct CoordinateCache {
    entries: HashMap<Fingerprint, String>,
    hits: u64,
    misses: u64,
}

impl CoordinateCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the address known for `fingerprint`.
    pub fn get(&mut self, fingerprint: &Fingerprint) -> Option<String> {
        match self.entries.get(fingerprint) {
            Some(address) => {
                self.hits += 1;
                Some(address.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Stores an address. Empty addresses are refused and `false` is returned.
    pub fn insert(&mut self, fingerprint: Fingerprint, address: &str) -> bool {
        if address.is_empty() {
            return false;
        }
        self.entries.insert(fingerprint, address.to_string());
        true
    }

    /// Number of fingerprints cached.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
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
            evictions: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(lat: f64, lon: f64) -> Fingerprint {
        Fingerprint::new(lat, lon).unwrap()
    }

    #[test]
    fn test_insert_and_get() {
        let mut cache = CoordinateCache::new();
        assert!(cache.insert(fp(40.0, -3.0), "Calle Mayor"));

        assert_eq!(cache.get(&fp(40.0, -3.0)), Some("Calle Mayor".to_string()));
        // Sub-precision noise hits the same slot
        assert_eq!(
            cache.get(&fp(40.000_000_2, -3.0)),
            Some("Calle Mayor".to_string())
        );
        assert_eq!(cache.get(&fp(40.1, -3.0)), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn test_empty_address_is_never_stored() {
        let mut cache = CoordinateCache::new();
        assert!(!cache.insert(fp(0.0, 0.0), ""));
        assert!(cache.is_empty());
        assert_eq!(cache.get(&fp(0.0, 0.0)), None);
    }

    #[test]
    fn test_later_answer_replaces_earlier() {
        let mut cache = CoordinateCache::new();
        cache.insert(fp(1.0, 1.0), "Old");
        cache.insert(fp(1.0, 1.0), "New");
        assert_eq!(cache.get(&fp(1.0, 1.0)), Some("New".to_string()));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_clear() {
        let mut cache = CoordinateCache::new();
        cache.insert(fp(1.0, 1.0), "A");
        cache.clear();
        assert!(cache.is_empty());
    }
}
