//! Retry classification and backoff delays.
//!
//! Every failed lookup falls into one of three classes, each with its own
//! budget per logical id:
//!
//! - [`Failure::TransientBusy`]: the provider asked us to come back later.
//!   Waits the provider's hint (or [`DEFAULT_TRANSIENT_DELAY`]), capped at
//!   [`MAX_TRANSIENT_DELAY`].
//! - [`Failure::EmptyResult`]: the provider answered without an address.
//!   Waits a fixed [`EMPTY_RETRY_DELAY`].
//! - [`Failure::TransportError`]: network or provider failure. Exponential
//!   backoff from [`TRANSPORT_BASE_DELAY`], clamped to
//!   [`MIN_BACKOFF_DELAY`]..=[`MAX_BACKOFF_DELAY`].
//!
//! All three add up to [`MAX_JITTER_MS`] of random jitter. The shared
//! `attempts` counter drives the backoff exponent regardless of class.

use std::time::Duration;

use rand::Rng;

// =============================================================================
// Delay Constants
// =============================================================================

/// Delay used when the provider signals "busy" without a hint (1.5 s).
pub const DEFAULT_TRANSIENT_DELAY: Duration = Duration::from_millis(1500);

/// Longest provider hint honoured for a "busy" retry (5 min).
pub const MAX_TRANSIENT_DELAY: Duration = Duration::from_secs(300);

/// Fixed delay before re-asking after an empty answer (600 ms).
pub const EMPTY_RETRY_DELAY: Duration = Duration::from_millis(600);

/// Base delay for transport-failure backoff (1.2 s).
pub const TRANSPORT_BASE_DELAY: Duration = Duration::from_millis(1200);

/// Lower clamp for backoff delays.
pub const MIN_BACKOFF_DELAY: Duration = Duration::from_millis(300);

/// Upper clamp for backoff delays.
pub const MAX_BACKOFF_DELAY: Duration = Duration::from_secs(8);

/// Growth factor per attempt.
pub const BACKOFF_MULTIPLIER: f64 = 1.6;

/// Upper bound (exclusive) of the random jitter added to every delay.
pub const MAX_JITTER_MS: u64 = 250;

// =============================================================================
// Budget Defaults
// =============================================================================

/// Extra attempts after an empty answer.
pub const DEFAULT_MAX_EMPTY_RETRIES: u32 = 2;

/// Extra attempts after "busy" answers.
pub const DEFAULT_MAX_TRANSIENT_RETRIES: u32 = 10;

/// Extra attempts after transport failures.
pub const DEFAULT_MAX_TRANSPORT_RETRIES: u32 = 5;

/// Why a lookup did not produce a deliverable address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// Provider said "try later".
    TransientBusy { retry_after: Option<Duration> },
    /// Provider answered with no usable address.
    EmptyResult,
    /// Network or provider error.
    TransportError,
}

impl Failure {
    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::TransientBusy { .. } => "busy",
            Self::EmptyResult => "empty",
            Self::TransportError => "transport",
        }
    }
}

/// Per-class retry limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    pub max_empty: u32,
    pub max_transient: u32,
    pub max_transport: u32,
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self {
            max_empty: DEFAULT_MAX_EMPTY_RETRIES,
            max_transient: DEFAULT_MAX_TRANSIENT_RETRIES,
            max_transport: DEFAULT_MAX_TRANSPORT_RETRIES,
        }
    }
}

/// Retry bookkeeping for one logical id.
///
/// Reset on delivery and whenever the id's desired key changes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    /// Retries scheduled for any reason.
    pub attempts: u32,
    pub empty: u32,
    pub transient: u32,
    pub transport: u32,
}

/// What to do after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-drive the id after the delay.
    RetryAfter(Duration),
    /// Budget exhausted; deliver an empty answer.
    GiveUp,
}

/// Applies budgets and computes delays.
#[derive(Debug, Clone)]
pub struct RetryScheduler {
    budget: RetryBudget,
    max_jitter_ms: u64,
}

impl RetryScheduler {
    /// Creates a scheduler with the standard jitter.
    pub fn new(budget: RetryBudget) -> Self {
        Self {
            budget,
            max_jitter_ms: MAX_JITTER_MS,
        }
    }

    /// Overrides the jitter bound. Zero disables jitter.
    pub fn with_max_jitter_ms(mut self, max_jitter_ms: u64) -> Self {
        self.max_jitter_ms = max_jitter_ms;
        self
    }

    /// Decides whether to retry after `failure`, updating `state` if so.
    pub fn decide(&self, state: &mut RetryState, failure: Failure) -> RetryDecision {
        let (used, max) = match failure {
            Failure::TransientBusy { .. } => (&mut state.transient, self.budget.max_transient),
            Failure::EmptyResult => (&mut state.empty, self.budget.max_empty),
            Failure::TransportError => (&mut state.transport, self.budget.max_transport),
        };
        if *used >= max {
            return RetryDecision::GiveUp;
        }
        *used += 1;
        state.attempts = state.attempts.saturating_add(1);

        let base = match failure {
            Failure::TransientBusy { retry_after } => retry_after
                .unwrap_or(DEFAULT_TRANSIENT_DELAY)
                .min(MAX_TRANSIENT_DELAY),
            Failure::EmptyResult => EMPTY_RETRY_DELAY,
            Failure::TransportError => backoff_delay(TRANSPORT_BASE_DELAY, state.attempts),
        };
        RetryDecision::RetryAfter(base + self.jitter())
    }

    fn jitter(&self) -> Duration {
        if self.max_jitter_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..self.max_jitter_ms))
    }
}

impl Default for RetryScheduler {
    fn default() -> Self {
        Self::new(RetryBudget::default())
    }
}

/// Computes `clamp(base * 1.6^attempt)` without jitter.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    // Past ~20 attempts the product is far above the cap anyway.
    let exponent = attempt.min(32) as i32;
    let delay_ms = base.as_millis() as f64 * BACKOFF_MULTIPLIER.powi(exponent);
    let min_ms = MIN_BACKOFF_DELAY.as_millis() as f64;
    let max_ms = MAX_BACKOFF_DELAY.as_millis() as f64;
    Duration::from_millis(delay_ms.clamp(min_ms, max_ms) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(budget: RetryBudget) -> RetryScheduler {
        RetryScheduler::new(budget).with_max_jitter_ms(0)
    }

    #[test]
    fn test_backoff_delay_growth_and_clamp() {
        assert_eq!(backoff_delay(TRANSPORT_BASE_DELAY, 0), Duration::from_millis(1200));
        assert_eq!(backoff_delay(TRANSPORT_BASE_DELAY, 1), Duration::from_millis(1920));
        assert_eq!(backoff_delay(TRANSPORT_BASE_DELAY, 2), Duration::from_millis(3072));
        assert_eq!(backoff_delay(TRANSPORT_BASE_DELAY, 5), MAX_BACKOFF_DELAY);
        assert_eq!(backoff_delay(TRANSPORT_BASE_DELAY, u32::MAX), MAX_BACKOFF_DELAY);
        assert_eq!(backoff_delay(Duration::from_millis(10), 0), MIN_BACKOFF_DELAY);
    }

    #[test]
    fn test_transient_uses_hint_or_default() {
        let scheduler = no_jitter(RetryBudget::default());
        let mut state = RetryState::default();

        let hinted = scheduler.decide(
            &mut state,
            Failure::TransientBusy {
                retry_after: Some(Duration::from_secs(3)),
            },
        );
        assert_eq!(hinted, RetryDecision::RetryAfter(Duration::from_secs(3)));

        let default = scheduler.decide(&mut state, Failure::TransientBusy { retry_after: None });
        assert_eq!(default, RetryDecision::RetryAfter(DEFAULT_TRANSIENT_DELAY));

        assert_eq!(state.transient, 2);
        assert_eq!(state.empty, 0);
        assert_eq!(state.attempts, 2);
    }

    #[test]
    fn test_transient_hint_is_capped() {
        let scheduler = RetryScheduler::default();
        let mut state = RetryState::default();

        let RetryDecision::RetryAfter(delay) = scheduler.decide(
            &mut state,
            Failure::TransientBusy {
                retry_after: Some(Duration::MAX),
            },
        ) else {
            panic!("Expected a retry");
        };
        assert!(delay >= MAX_TRANSIENT_DELAY);
        assert!(delay < MAX_TRANSIENT_DELAY + Duration::from_millis(MAX_JITTER_MS));
    }

    #[test]
    fn test_empty_budget_exhausts() {
        let scheduler = no_jitter(RetryBudget::default());
        let mut state = RetryState::default();

        for _ in 0..DEFAULT_MAX_EMPTY_RETRIES {
            assert_eq!(
                scheduler.decide(&mut state, Failure::EmptyResult),
                RetryDecision::RetryAfter(EMPTY_RETRY_DELAY)
            );
        }
        assert_eq!(
            scheduler.decide(&mut state, Failure::EmptyResult),
            RetryDecision::GiveUp
        );
        // Giving up leaves the counters untouched
        assert_eq!(state.empty, DEFAULT_MAX_EMPTY_RETRIES);
    }

    #[test]
    fn test_transient_does_not_consume_empty_budget() {
        let scheduler = no_jitter(RetryBudget::default());
        let mut state = RetryState::default();

        for _ in 0..5 {
            scheduler.decide(&mut state, Failure::TransientBusy { retry_after: None });
        }
        assert!(matches!(
            scheduler.decide(&mut state, Failure::EmptyResult),
            RetryDecision::RetryAfter(_)
        ));
    }

    #[test]
    fn test_transport_backoff_uses_shared_attempts() {
        let scheduler = no_jitter(RetryBudget::default());
        let mut state = RetryState::default();

        // Two busy answers push the shared exponent before the first failure
        scheduler.decide(&mut state, Failure::TransientBusy { retry_after: None });
        scheduler.decide(&mut state, Failure::TransientBusy { retry_after: None });

        assert_eq!(
            scheduler.decide(&mut state, Failure::TransportError),
            RetryDecision::RetryAfter(backoff_delay(TRANSPORT_BASE_DELAY, 3))
        );
    }

    #[test]
    fn test_zero_budget_gives_up_immediately() {
        let scheduler = no_jitter(RetryBudget {
            max_empty: 0,
            max_transient: 0,
            max_transport: 0,
        });
        let mut state = RetryState::default();
        assert_eq!(scheduler.decide(&mut state, Failure::EmptyResult), RetryDecision::GiveUp);
        assert_eq!(
            scheduler.decide(&mut state, Failure::TransportError),
            RetryDecision::GiveUp
        );
        assert_eq!(state, RetryState::default());
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let scheduler = RetryScheduler::default();
        for _ in 0..200 {
            let mut state = RetryState::default();
            let RetryDecision::RetryAfter(delay) = scheduler.decide(&mut state, Failure::EmptyResult)
            else {
                panic!("Expected a retry");
            };
            assert!(delay >= EMPTY_RETRY_DELAY);
            assert!(delay < EMPTY_RETRY_DELAY + Duration::from_millis(MAX_JITTER_MS));
        }
    }
}
