//! In-flight registry for lookup coalescing.
//!
//! When several logical ids want the same physical point at once, only one
//! provider call runs; everyone else subscribes to its result.
//!
//! ```text
//! row-7  (40.0, -3.0) ─┐
//!                      │                          Provider
//! row-9  (40.0, -3.0) ─┼──► InFlightRegistry ───► one call
//!                      │          │                  │
//! row-12 (40.0, -3.0) ─┘          ▼                  ▼
//!                        [subscribers notified in registration order]
//! ```
//!
//! Unlike a broadcast channel, the registry stores plain subscriber records.
//! It lives inside the coordinator's state lock, and the coordinator decides
//! per subscriber what to do with the settled result.

use std::collections::HashMap;

use tracing::debug;

use crate::coord::Fingerprint;

/// One logical id waiting on a pending lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscriber {
    /// Logical id.
    pub id: String,
    /// Desire generation the subscription was made for.
    pub generation: u64,
}

impl Subscriber {
    /// Creates a subscriber record.
    pub fn new(id: impl Into<String>, generation: u64) -> Self {
        Self {
            id: id.into(),
            generation,
        }
    }
}

/// Result of registering interest in a fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// No lookup was pending; the caller must start one and settle it with
    /// this ticket.
    New { ticket: u64 },
    /// A lookup is already pending; the subscriber was appended.
    Coalesced { waiters: usize },
}

/// Statistics for monitoring coalescing effectiveness.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CoalescerStats {
    /// Registrations received
    pub total_requests: u64,
    /// Registrations that joined a pending lookup
    pub coalesced_requests: u64,
    /// Registrations that started a lookup
    pub new_requests: u64,
}

impl CoalescerStats {
    /// Returns the coalescing ratio (0.0 to 1.0)
    pub fn coalescing_ratio(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.coalesced_requests as f64 / self.total_requests as f64
        }
    }
}

#[derive(Debug)]
struct InFlight {
    ticket: u64,
    subscribers: Vec<Subscriber>,
}

/// Pending lookups keyed by fingerprint.
#[derive(Debug, Default)]
pub struct InFlightRegistry {
    entries: HashMap<Fingerprint, InFlight>,
    next_ticket: u64,
    stats: CoalescerStats,
}

impl InFlightRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `subscriber` for `fingerprint`.
    pub fn register(&mut self, fingerprint: Fingerprint, subscriber: Subscriber) -> Registration {
        self.stats.total_requests += 1;

        if let Some(pending) = self.entries.get_mut(&fingerprint) {
            pending.subscribers.push(subscriber);
            self.stats.coalesced_requests += 1;
            let waiters = pending.subscribers.len();
            debug!(
                fingerprint = %fingerprint,
                waiters,
                "Coalescing lookup - waiting for in-flight resolution"
            );
            return Registration::Coalesced { waiters };
        }

        self.next_ticket += 1;
        let ticket = self.next_ticket;
        self.entries.insert(
            fingerprint,
            InFlight {
                ticket,
                subscribers: vec![subscriber],
            },
        );
        self.stats.new_requests += 1;
        debug!(
            fingerprint = %fingerprint,
            ticket,
            in_flight_count = self.entries.len(),
            "New lookup - starting resolution"
        );
        Registration::New { ticket }
    }

    /// Removes the pending lookup and returns its subscribers in
    /// registration order.
    ///
    /// Returns `None` if nothing is registered under `ticket`, which happens
    /// when the registry was cleared and the fingerprint re-registered while
    /// the old lookup was still running.
    pub fn settle(&mut self, fingerprint: &Fingerprint, ticket: u64) -> Option<Vec<Subscriber>> {
        match self.entries.get(fingerprint) {
            Some(pending) if pending.ticket == ticket => {}
            _ => return None,
        }
        self.entries
            .remove(fingerprint)
            .map(|pending| pending.subscribers)
    }

    /// Number of pending lookups.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forgets every pending lookup. Running lookups settle as stale.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Returns a snapshot of the statistics.
    pub fn stats(&self) -> CoalescerStats {
        self.stats
    }
}
