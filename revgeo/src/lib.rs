//! revgeo - Reverse-geocoding coordinator
//!
//! Resolves `(latitude, longitude, timestamp)` samples owned by logical ids
//! (table rows, map markers) into street addresses while keeping provider
//! traffic low: answers are cached per id and per coordinate, identical
//! in-flight lookups are coalesced, concurrent provider calls are bounded,
//! and failures are retried with jittered backoff.
//!
//! # Modules
//!
//! - [`coordinator`] - the [`GeocodeCoordinator`] façade
//! - [`cache`] - identity (LRU) and coordinate caches
//! - [`inflight`] - coalescing registry
//! - [`queue`] - FIFO concurrency limiter
//! - [`retry`] - retry budgets and delays
//! - [`provider`] - provider trait and the Home Assistant tracker adapter
//! - [`config`] - settings and INI loading
//! - [`telemetry`] - counters and snapshots
//! - [`logging`] - tracing subscriber setup

pub mod cache;
pub mod config;
pub mod coord;
pub mod coordinator;
pub mod inflight;
pub mod logging;
pub mod provider;
pub mod queue;
pub mod retry;
pub mod telemetry;

pub use config::{ConfigError, GeocodeConfig, ProviderSettings};
pub use coord::{CoordError, Fingerprint, LookupKey};
pub use coordinator::{AddressCallback, GeocodeCoordinator};
pub use provider::{GeocodeProvider, LookupResult, ProviderError};
pub use telemetry::CoordinatorStats;
