//! Atomic counters for coordinator events.

use std::sync::atomic::{AtomicU64, Ordering};

use super::CoordinatorStats;

/// Event counters shared by every coordinator handle.
#[derive(Debug, Default)]
pub struct CoordinatorMetrics {
    requests: AtomicU64,
    identity_hits: AtomicU64,
    coordinate_hits: AtomicU64,
    coalesced: AtomicU64,
    provider_calls: AtomicU64,
    provider_errors: AtomicU64,
    retries: AtomicU64,
    delivered: AtomicU64,
    empty_deliveries: AtomicU64,
    superseded: AtomicU64,
    cancelled: AtomicU64,
}

impl CoordinatorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_received(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn identity_hit(&self) {
        self.identity_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn coordinate_hit(&self) {
        self.coordinate_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// A lookup joined one already in flight.
    pub fn lookup_coalesced(&self) {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn provider_call_started(&self) {
        self.provider_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn provider_failed(&self) {
        self.provider_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn retry_scheduled(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// An address was handed to a callback. Empty answers count twice: here
    /// and in the empty counter.
    pub fn address_delivered(&self, address: &str) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
        if address.is_empty() {
            self.empty_deliveries.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// A pending desire was replaced by a request for a different key.
    pub fn desire_superseded(&self) {
        self.superseded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn desire_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// Takes a point-in-time copy of every counter.
    pub fn snapshot(&self) -> CoordinatorStats {
        CoordinatorStats {
            requests: self.requests.load(Ordering::Relaxed),
            identity_hits: self.identity_hits.load(Ordering::Relaxed),
            coordinate_hits: self.coordinate_hits.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            provider_calls: self.provider_calls.load(Ordering::Relaxed),
            provider_errors: self.provider_errors.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            empty_deliveries: self.empty_deliveries.load(Ordering::Relaxed),
            superseded: self.superseded.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            ..CoordinatorStats::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = CoordinatorMetrics::new();
        metrics.request_received();
        metrics.request_received();
        metrics.identity_hit();
        metrics.provider_call_started();
        metrics.address_delivered("Calle Mayor");
        metrics.address_delivered("");

        let stats = metrics.snapshot();
        assert_eq!(stats.requests, 2);
        assert_eq!(stats.identity_hits, 1);
        assert_eq!(stats.provider_calls, 1);
        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.empty_deliveries, 1);
        assert_eq!(stats.superseded, 0);
    }
}
