//! Point-in-time coordinator statistics.

use std::fmt;

use crate::cache::CacheStats;
use crate::inflight::CoalescerStats;

/// Snapshot of coordinator activity.
///
/// Event counters come from [`super::CoordinatorMetrics`]; the cache,
/// registry and queue fields are filled in by the coordinator when the
/// snapshot is taken.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CoordinatorStats {
    /// `request_address` calls with valid coordinates.
    pub requests: u64,
    pub identity_hits: u64,
    pub coordinate_hits: u64,
    /// Requests that joined a lookup already in flight.
    pub coalesced: u64,
    /// Provider round trips started.
    pub provider_calls: u64,
    /// Provider round trips that returned an error.
    pub provider_errors: u64,
    pub retries: u64,
    /// Callbacks invoked.
    pub delivered: u64,
    /// Callbacks invoked with an empty address.
    pub empty_deliveries: u64,
    pub superseded: u64,
    pub cancelled: u64,

    /// Identity cache state.
    pub identity_cache: CacheStats,
    /// Coordinate cache state.
    pub coordinate_cache: CacheStats,
    /// Registry coalescing counters.
    pub coalescing: CoalescerStats,
    /// Lookups currently in flight.
    pub in_flight: usize,
    /// Ids with an undelivered desire.
    pub pending: usize,
    /// Provider calls running right now.
    pub active_calls: usize,
    /// Provider calls waiting for a queue slot.
    pub queued_calls: usize,
}

impl CoordinatorStats {
    /// Fraction of requests answered from either cache (0.0 to 1.0).
    pub fn cache_hit_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            (self.identity_hits + self.coordinate_hits) as f64 / self.requests as f64
        }
    }
}

impl fmt::Display for CoordinatorStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "requests={} identity_hits={} coordinate_hits={} coalesced={} provider_calls={} \
             retries={} delivered={} (empty {}) superseded={} cancelled={} in_flight={} pending={}",
            self.requests,
            self.identity_hits,
            self.coordinate_hits,
            self.coalesced,
            self.provider_calls,
            self.retries,
            self.delivered,
            self.empty_deliveries,
            self.superseded,
            self.cancelled,
            self.in_flight,
            self.pending,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_hit_rate() {
        let stats = CoordinatorStats {
            requests: 10,
            identity_hits: 3,
            coordinate_hits: 2,
            ..Default::default()
        };
        assert!((stats.cache_hit_rate() - 0.5).abs() < 0.001);
        assert_eq!(CoordinatorStats::default().cache_hit_rate(), 0.0);
    }

    #[test]
    fn test_display() {
        let stats = CoordinatorStats {
            requests: 2,
            provider_calls: 1,
            ..Default::default()
        };
        let text = stats.to_string();
        assert!(text.starts_with("requests=2 "));
        assert!(text.contains("provider_calls=1"));
    }
}
