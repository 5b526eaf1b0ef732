//! Coordinator telemetry.
//!
//! Lock-free counters recorded on every request path, read back as a
//! point-in-time snapshot.
//!
//! ```text
//! GeocodeCoordinator ─────► CoordinatorMetrics ─────► CoordinatorStats ─────► logs
//!                           (atomic counters)        (point-in-time copy)
//! ```
//!
//! # Example
//!
//! ```ignore
//! let stats = coordinator.stats();
//! println!("Provider calls: {}", stats.provider_calls);
//! println!("Cache hit rate: {:.1}%", stats.cache_hit_rate() * 100.0);
//! ```

mod metrics;
mod snapshot;

pub use metrics::CoordinatorMetrics;
pub use snapshot::CoordinatorStats;
