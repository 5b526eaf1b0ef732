//! Reverse-geocoding coordinator.
//!
//! Turns "address for this logical id at this coordinate and time" requests
//! into as few provider calls as possible, and delivers each answer at most
//! once through the caller's callback.
//!
//! # Request Flow
//!
//! ```text
//! request_address(id, lat, lon, ts, cb)
//!        │
//!        ├─ same key already pending? ──► swap callback, done
//!        │
//!        ├─ IdentityCache hit? ─────────► cb(address)        (synchronous)
//!        ├─ CoordinateCache hit? ───────► cb(address)        (synchronous)
//!        ├─ InFlightRegistry pending? ──► subscribe
//!        └─ register + WorkQueue ───────► Provider
//!                                            │
//!                           settle: for each subscriber, in order
//!                              ├─ desire gone ──────► Cancelled
//!                              ├─ desire changed ───► Superseded
//!                              └─ Delivered(address) or retry after delay
//! ```
//!
//! # Locking
//!
//! All state lives behind one `parking_lot::Mutex`. The lock is never held
//! across an `.await` and callbacks always run after it is released.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{CoordinateCache, IdentityCache, IdentityEntry};
use crate::config::GeocodeConfig;
use crate::coord::{Fingerprint, LookupKey};
use crate::inflight::{InFlightRegistry, Registration, Subscriber};
use crate::provider::{GeocodeProvider, LookupResult, ProviderError};
use crate::queue::WorkQueue;
use crate::retry::{Failure, RetryDecision, RetryScheduler, RetryState};
use crate::telemetry::{CoordinatorMetrics, CoordinatorStats};

/// Callback receiving a resolved address. May receive an empty string.
pub type AddressCallback = Box<dyn FnOnce(String) + Send + 'static>;

/// What an id currently wants. Its presence means a delivery is owed.
struct Desire {
    key: LookupKey,
    lat: f64,
    lon: f64,
    generation: u64,
    callback: Option<AddressCallback>,
}

struct State {
    identity: IdentityCache,
    coordinates: CoordinateCache,
    in_flight: InFlightRegistry,
    wanted: HashMap<String, Desire>,
    retries: HashMap<String, RetryState>,
    next_generation: u64,
    /// Lookup tasks and retry timers not yet finished.
    outstanding: usize,
    shutdown: CancellationToken,
}

impl State {
    fn new(cache_capacity: usize) -> Self {
        Self {
            identity: IdentityCache::new(cache_capacity),
            coordinates: CoordinateCache::new(),
            in_flight: InFlightRegistry::new(),
            wanted: HashMap::new(),
            retries: HashMap::new(),
            next_generation: 0,
            outstanding: 0,
            shutdown: CancellationToken::new(),
        }
    }

    /// Removes the desire for `id` and hands back its callback.
    fn take_delivery(&mut self, id: &str, address: String) -> Option<Delivery> {
        self.retries.remove(id);
        let desire = self.wanted.remove(id)?;
        desire.callback.map(|callback| Delivery {
            id: id.to_string(),
            callback,
            address,
        })
    }
}

/// A callback ready to run outside the lock.
struct Delivery {
    id: String,
    callback: AddressCallback,
    address: String,
}

impl Delivery {
    fn invoke(self, metrics: &CoordinatorMetrics) {
        debug!(id = %self.id, address = %self.address, "Delivering address");
        metrics.address_delivered(&self.address);
        (self.callback)(self.address);
    }
}

/// A provider call to start.
struct Lookup {
    fingerprint: Fingerprint,
    ticket: u64,
    lat: f64,
    lon: f64,
    token: CancellationToken,
}

/// Result of driving a desire one step forward.
enum Step {
    Idle,
    Deliver(Delivery),
    Spawn(Lookup),
}

/// Per-subscriber decision when a lookup settles.
enum Outcome {
    Delivered(Option<Delivery>),
    Retry { delay: Duration, generation: u64 },
    Superseded,
    Cancelled,
}

/// A scheduled re-drive.
struct Timer {
    id: String,
    generation: u64,
    delay: Duration,
    token: CancellationToken,
}

/// Releases one outstanding slot on drop, so a panicking task still lets
/// `drain` finish.
struct OutstandingGuard(Arc<Inner>);

impl Drop for OutstandingGuard {
    fn drop(&mut self) {
        self.0.release_outstanding();
    }
}

/// Aborts the wrapped task when dropped.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

struct Inner {
    state: Mutex<State>,
    provider: Arc<dyn GeocodeProvider>,
    queue: WorkQueue,
    scheduler: RetryScheduler,
    metrics: CoordinatorMetrics,
    idle: Notify,
    config: GeocodeConfig,
}

/// Coalescing, caching, rate-limited reverse-geocoding front end.
///
/// Cheap to clone; clones share the same caches and queue.
///
/// # Example
///
/// ```ignore
/// let coordinator = GeocodeCoordinator::new(provider, GeocodeConfig::default());
///
/// coordinator.request_address("row-7", 40.0, -3.0, 1_700_000_000_000, |address| {
///     println!("row-7 is at {}", address);
/// });
/// coordinator.drain().await;
/// ```
#[derive(Clone)]
pub struct GeocodeCoordinator {
    inner: Arc<Inner>,
}

impl GeocodeCoordinator {
    /// Creates a coordinator over `provider`.
    pub fn new(provider: Arc<dyn GeocodeProvider>, config: GeocodeConfig) -> Self {
        let config = GeocodeConfig::default()
            .with_cache_capacity(config.cache_capacity)
            .with_max_concurrency(config.max_concurrency)
            .with_max_empty_retries(config.max_empty_retries)
            .with_max_transient_retries(config.max_transient_retries)
            .with_max_transport_retries(config.max_transport_retries);

        info!(
            provider = provider.name(),
            cache_capacity = config.cache_capacity,
            max_concurrency = config.max_concurrency,
            max_empty_retries = config.max_empty_retries,
            "Geocode coordinator created"
        );

        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::new(config.cache_capacity)),
                provider,
                queue: WorkQueue::new(config.max_concurrency),
                scheduler: RetryScheduler::new(config.retry_budget()),
                metrics: CoordinatorMetrics::new(),
                idle: Notify::new(),
                config,
            }),
        }
    }

    /// Creates a coordinator with default settings.
    pub fn with_defaults(provider: Arc<dyn GeocodeProvider>) -> Self {
        Self::new(provider, GeocodeConfig::default())
    }

    /// Requests the address for `id` at the given point and time.
    ///
    /// `on_resolved` runs at most once: with the address (possibly empty),
    /// or never if the request is superseded or cancelled first. Cache hits
    /// run it before this method returns. Non-finite coordinates are
    /// ignored.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime and a provider call or retry
    /// has to be scheduled.
    pub fn request_address<F>(&self, id: &str, lat: f64, lon: f64, timestamp_ms: i64, on_resolved: F)
    where
        F: FnOnce(String) + Send + 'static,
    {
        let key = match LookupKey::new(lat, lon, timestamp_ms) {
            Ok(key) => key,
            Err(e) => {
                debug!(id, error = %e, "Ignoring address request");
                return;
            }
        };
        self.inner.metrics.request_received();

        let mut callback: Option<AddressCallback> = Some(Box::new(on_resolved));
        let (step, replaced) = {
            let mut state = self.inner.state.lock();

            if let Some(desire) = state.wanted.get_mut(id) {
                if desire.key == key {
                    debug!(id, key = %key, "Lookup already pending - replacing callback");
                    let old = std::mem::replace(&mut desire.callback, callback.take());
                    drop(state);
                    drop(old);
                    return;
                }
            }

            state.next_generation += 1;
            let generation = state.next_generation;
            let replaced = state.wanted.insert(
                id.to_string(),
                Desire {
                    key,
                    lat,
                    lon,
                    generation,
                    callback: callback.take(),
                },
            );
            if let Some(previous) = &replaced {
                self.inner.metrics.desire_superseded();
                debug!(id, previous = %previous.key, key = %key, "Superseding pending request");
            }
            state.retries.remove(id);

            (self.inner.drive(&mut state, id, generation), replaced)
        };

        drop(replaced);
        self.inner.run_step(step);
    }

    /// Forgets whatever `id` currently wants. Idempotent.
    ///
    /// A provider call shared with other ids keeps running; its answer is
    /// simply not delivered to `id`.
    pub fn cancel_address(&self, id: &str) {
        let removed = {
            let mut state = self.inner.state.lock();
            state.retries.remove(id);
            state.wanted.remove(id)
        };
        if removed.is_some() {
            self.inner.metrics.desire_cancelled();
            debug!(id, "Address request cancelled");
        }
    }

    /// Clears both caches, every pending desire and retry, and cancels
    /// queued work and retry timers.
    pub fn reset(&self) {
        let dropped = {
            let mut state = self.inner.state.lock();
            state.shutdown.cancel();
            state.shutdown = CancellationToken::new();
            state.identity.clear();
            state.coordinates.clear();
            state.in_flight.clear();
            state.retries.clear();
            std::mem::take(&mut state.wanted)
        };
        info!(pending = dropped.len(), "Geocode caches cleared");
    }

    /// Waits until no provider call and no retry timer is outstanding.
    pub async fn drain(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.inner.state.lock().outstanding == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Snapshot of counters and current sizes.
    pub fn stats(&self) -> CoordinatorStats {
        let mut stats = self.inner.metrics.snapshot();
        {
            let state = self.inner.state.lock();
            stats.identity_cache = state.identity.stats();
            stats.coordinate_cache = state.coordinates.stats();
            stats.coalescing = state.in_flight.stats();
            stats.in_flight = state.in_flight.len();
            stats.pending = state.wanted.len();
        }
        stats.active_calls = self.inner.queue.active();
        stats.queued_calls = self.inner.queue.waiting();
        stats
    }

    /// Logs [`stats`](Self::stats) at info level.
    pub fn log_stats(&self) {
        let stats = self.stats();
        info!(
            requests = stats.requests,
            identity_hits = stats.identity_hits,
            coordinate_hits = stats.coordinate_hits,
            coalesced = stats.coalesced,
            provider_calls = stats.provider_calls,
            provider_errors = stats.provider_errors,
            retries = stats.retries,
            delivered = stats.delivered,
            superseded = stats.superseded,
            cancelled = stats.cancelled,
            identity_entries = stats.identity_cache.entries,
            coordinate_entries = stats.coordinate_cache.entries,
            hit_rate = %format!("{:.1}%", stats.cache_hit_rate() * 100.0),
            "Geocode coordinator stats"
        );
    }

    /// Address cached for `id`, if its entry was resolved for this point and time.
    ///
    /// Does not promote the entry.
    pub fn cached_address(&self, id: &str, lat: f64, lon: f64, timestamp_ms: i64) -> Option<String> {
        let key = LookupKey::new(lat, lon, timestamp_ms).ok()?;
        let state = self.inner.state.lock();
        state
            .identity
            .peek(id)
            .filter(|entry| entry.key == key)
            .map(|entry| entry.address.clone())
    }

    /// Ids held by the identity cache.
    pub fn identity_len(&self) -> usize {
        self.inner.state.lock().identity.len()
    }

    /// Fingerprints held by the coordinate cache.
    pub fn coordinate_len(&self) -> usize {
        self.inner.state.lock().coordinates.len()
    }

    /// Lookups currently in flight.
    pub fn in_flight_count(&self) -> usize {
        self.inner.state.lock().in_flight.len()
    }

    /// Ids still owed a delivery.
    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().wanted.len()
    }

    /// Effective configuration after clamping.
    pub fn config(&self) -> &GeocodeConfig {
        &self.inner.config
    }
}

impl Inner {
    /// Moves the desire for `id` forward if it is still at `generation`.
    fn drive(&self, state: &mut State, id: &str, generation: u64) -> Step {
        let Some(desire) = state.wanted.get(id) else {
            return Step::Idle;
        };
        if desire.generation != generation {
            return Step::Idle;
        }
        let (key, lat, lon) = (desire.key, desire.lat, desire.lon);

        if let Some(address) = state.identity.lookup(id, &key) {
            self.metrics.identity_hit();
            debug!(id, key = %key, "Identity cache hit");
            return state
                .take_delivery(id, address)
                .map_or(Step::Idle, Step::Deliver);
        }

        let fingerprint = key.fingerprint;
        if let Some(address) = state.coordinates.get(&fingerprint) {
            self.metrics.coordinate_hit();
            debug!(id, fingerprint = %fingerprint, "Coordinate cache hit");
            state.identity.insert(
                id,
                IdentityEntry {
                    key,
                    address: address.clone(),
                },
            );
            return state
                .take_delivery(id, address)
                .map_or(Step::Idle, Step::Deliver);
        }

        match state
            .in_flight
            .register(fingerprint, Subscriber::new(id, generation))
        {
            Registration::Coalesced { waiters } => {
                self.metrics.lookup_coalesced();
                debug!(id, fingerprint = %fingerprint, waiters, "Joined in-flight lookup");
                Step::Idle
            }
            Registration::New { ticket } => {
                state.outstanding += 1;
                Step::Spawn(Lookup {
                    fingerprint,
                    ticket,
                    lat,
                    lon,
                    token: state.shutdown.clone(),
                })
            }
        }
    }

    fn run_step(self: &Arc<Self>, step: Step) {
        match step {
            Step::Idle => {}
            Step::Deliver(delivery) => delivery.invoke(&self.metrics),
            Step::Spawn(lookup) => self.spawn_lookup(lookup),
        }
    }

    fn spawn_lookup(self: &Arc<Self>, lookup: Lookup) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let _release = OutstandingGuard(Arc::clone(&inner));
            let token = lookup.token.clone();
            let call = inner.queue.run(async {
                inner.metrics.provider_call_started();
                inner.call_provider(lookup.lat, lookup.lon).await
            });

            tokio::select! {
                _ = token.cancelled() => {
                    debug!(fingerprint = %lookup.fingerprint, "Lookup cancelled by reset");
                }
                result = call => inner.settle(&lookup, result),
            }
        });
    }

    /// Runs the provider call in its own task so a panic inside the provider
    /// surfaces as a transport error instead of stranding the lookup.
    async fn call_provider(&self, lat: f64, lon: f64) -> Result<LookupResult, ProviderError> {
        let provider = Arc::clone(&self.provider);
        let mut task = AbortOnDrop(tokio::spawn(async move { provider.resolve(lat, lon).await }));
        match (&mut task.0).await {
            Ok(result) => result,
            Err(e) => Err(ProviderError::Transport(format!("provider task failed: {}", e))),
        }
    }

    /// Fans a provider result out to every subscriber of the lookup.
    fn settle(self: &Arc<Self>, lookup: &Lookup, result: Result<LookupResult, ProviderError>) {
        let resolved = match result {
            Ok(LookupResult::Address(address)) => {
                let address = address.trim();
                if address.is_empty() {
                    Err(Failure::EmptyResult)
                } else {
                    Ok(address.to_string())
                }
            }
            Ok(LookupResult::Transient { retry_after }) => {
                debug!(fingerprint = %lookup.fingerprint, ?retry_after, "Provider busy");
                Err(Failure::TransientBusy { retry_after })
            }
            Err(e) => {
                self.metrics.provider_failed();
                warn!(
                    provider = self.provider.name(),
                    fingerprint = %lookup.fingerprint,
                    error = %e,
                    "Reverse geocode failed"
                );
                Err(Failure::TransportError)
            }
        };

        let mut deliveries = Vec::new();
        let mut timers = Vec::new();
        {
            let mut state = self.state.lock();
            let Some(subscribers) = state.in_flight.settle(&lookup.fingerprint, lookup.ticket)
            else {
                debug!(fingerprint = %lookup.fingerprint, "Discarding stale lookup result");
                return;
            };

            if let Ok(address) = &resolved {
                state.coordinates.insert(lookup.fingerprint, address);
            }

            for subscriber in subscribers {
                match self.outcome(&mut state, &subscriber, &resolved) {
                    Outcome::Delivered(delivery) => deliveries.extend(delivery),
                    Outcome::Retry { delay, generation } => {
                        state.outstanding += 1;
                        timers.push(Timer {
                            id: subscriber.id,
                            generation,
                            delay,
                            token: state.shutdown.clone(),
                        });
                    }
                    Outcome::Superseded => {
                        debug!(id = %subscriber.id, "Result superseded by newer request");
                    }
                    Outcome::Cancelled => {
                        debug!(id = %subscriber.id, "Result dropped, request cancelled");
                    }
                }
            }
        }

        // Timers are already counted as outstanding; spawn them before any
        // callback runs.
        for timer in timers {
            self.spawn_retry(timer);
        }
        for delivery in deliveries {
            delivery.invoke(&self.metrics);
        }
    }

    fn outcome(
        &self,
        state: &mut State,
        subscriber: &Subscriber,
        resolved: &Result<String, Failure>,
    ) -> Outcome {
        let Some(desire) = state.wanted.get(&subscriber.id) else {
            return Outcome::Cancelled;
        };
        if desire.generation != subscriber.generation {
            return Outcome::Superseded;
        }
        let key = desire.key;
        let id = subscriber.id.as_str();

        let failure = match resolved {
            Ok(address) => {
                state.identity.insert(
                    id,
                    IdentityEntry {
                        key,
                        address: address.clone(),
                    },
                );
                return Outcome::Delivered(state.take_delivery(id, address.clone()));
            }
            Err(failure) => *failure,
        };

        let retry = state.retries.entry(id.to_string()).or_default();
        match self.scheduler.decide(retry, failure) {
            RetryDecision::RetryAfter(delay) => {
                self.metrics.retry_scheduled();
                debug!(
                    id,
                    reason = failure.label(),
                    attempt = retry.attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling retry"
                );
                Outcome::Retry {
                    delay,
                    generation: subscriber.generation,
                }
            }
            RetryDecision::GiveUp => {
                warn!(id, key = %key, reason = failure.label(), "Retry budget exhausted, delivering empty address");
                if failure == Failure::EmptyResult {
                    // The id's answer is known to be empty; the coordinate stays unknown.
                    state.identity.insert(
                        id,
                        IdentityEntry {
                            key,
                            address: String::new(),
                        },
                    );
                }
                Outcome::Delivered(state.take_delivery(id, String::new()))
            }
        }
    }

    fn spawn_retry(self: &Arc<Self>, timer: Timer) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let _release = OutstandingGuard(Arc::clone(&inner));
            tokio::select! {
                _ = timer.token.cancelled() => {}
                _ = tokio::time::sleep(timer.delay) => inner.redrive(&timer.id, timer.generation),
            }
        });
    }

    fn redrive(self: &Arc<Self>, id: &str, generation: u64) {
        let step = {
            let mut state = self.state.lock();
            self.drive(&mut state, id, generation)
        };
        self.run_step(step);
    }

    fn release_outstanding(&self) {
        let mut state = self.state.lock();
        state.outstanding = state.outstanding.saturating_sub(1);
        if state.outstanding == 0 {
            self.idle.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::BoxFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedProvider {
        answer: LookupResult,
        calls: AtomicUsize,
    }

    impl FixedProvider {
        fn new(answer: LookupResult) -> Arc<Self> {
            Arc::new(Self {
                answer,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl GeocodeProvider for FixedProvider {
        fn resolve(&self, _lat: f64, _lon: f64) -> BoxFuture<'_, Result<LookupResult, ProviderError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let answer = self.answer.clone();
            Box::pin(async move { Ok(answer) })
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    fn collector() -> (Arc<Mutex<Vec<String>>>, impl Fn() -> AddressCallback) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let make = move || -> AddressCallback {
            let sink = Arc::clone(&sink);
            Box::new(move |address| sink.lock().push(address))
        };
        (seen, make)
    }

    #[tokio::test]
    async fn test_resolves_and_caches() {
        let provider = FixedProvider::new(LookupResult::address(" Calle Mayor "));
        let coordinator = GeocodeCoordinator::with_defaults(provider.clone());
        let (seen, cb) = collector();

        coordinator.request_address("row-1", 40.0, -3.0, 1000, cb());
        coordinator.drain().await;

        assert_eq!(*seen.lock(), vec!["Calle Mayor".to_string()]);
        assert_eq!(coordinator.identity_len(), 1);
        assert_eq!(coordinator.coordinate_len(), 1);
        assert_eq!(
            coordinator.cached_address("row-1", 40.0, -3.0, 1000).as_deref(),
            Some("Calle Mayor")
        );
        assert_eq!(coordinator.pending_count(), 0);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cache_hit_is_synchronous() {
        let provider = FixedProvider::new(LookupResult::address("Calle Mayor"));
        let coordinator = GeocodeCoordinator::with_defaults(provider.clone());
        let (seen, cb) = collector();

        coordinator.request_address("row-1", 40.0, -3.0, 1000, cb());
        coordinator.drain().await;

        coordinator.request_address("row-1", 40.0, -3.0, 1000, cb());
        // No await between the request and the check
        assert_eq!(seen.lock().len(), 2);
        // Another id at the same point hits the coordinate cache
        coordinator.request_address("row-2", 40.0, -3.0, 5000, cb());
        assert_eq!(seen.lock().len(), 3);

        let stats = coordinator.stats();
        assert_eq!(stats.identity_hits, 1);
        assert_eq!(stats.coordinate_hits, 1);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_non_finite_coordinates_ignored() {
        let provider = FixedProvider::new(LookupResult::address("x"));
        let coordinator = GeocodeCoordinator::with_defaults(provider.clone());
        let (seen, cb) = collector();

        coordinator.request_address("row-1", f64::NAN, -3.0, 1000, cb());
        coordinator.request_address("row-1", 40.0, f64::INFINITY, 1000, cb());
        coordinator.drain().await;

        assert!(seen.lock().is_empty());
        assert_eq!(coordinator.stats().requests, 0);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_config_is_clamped() {
        let provider = FixedProvider::new(LookupResult::address("x"));
        let config = GeocodeConfig {
            cache_capacity: 1,
            max_concurrency: 0,
            ..GeocodeConfig::default()
        };
        let coordinator = GeocodeCoordinator::new(provider, config);
        assert_eq!(coordinator.config().cache_capacity, 50);
        assert_eq!(coordinator.config().max_concurrency, 1);
    }

    #[tokio::test]
    async fn test_drain_when_idle_returns_immediately() {
        let provider = FixedProvider::new(LookupResult::address("x"));
        let coordinator = GeocodeCoordinator::with_defaults(provider);
        coordinator.drain().await;
        assert_eq!(coordinator.in_flight_count(), 0);
    }
}
