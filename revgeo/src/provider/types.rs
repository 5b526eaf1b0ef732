//! Provider gateway contract.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Outcome of a single provider round trip that reached the provider.
#[derive(Debug, Clone, PartialEq)]
pub enum LookupResult {
    /// The provider answered. The address may be empty when the provider had
    /// nothing usable for the coordinate.
    Address(String),

    /// The provider asked us to come back later, optionally with a hint.
    Transient {
        /// Suggested wait before asking again.
        retry_after: Option<Duration>,
    },
}

impl LookupResult {
    /// Convenience constructor for an address answer.
    pub fn address(address: impl Into<String>) -> Self {
        Self::Address(address.into())
    }

    /// A "try later" answer without a delay hint.
    pub fn busy() -> Self {
        Self::Transient { retry_after: None }
    }

    /// A "try later" answer with a delay hint.
    pub fn retry_after(delay: Duration) -> Self {
        Self::Transient {
            retry_after: Some(delay),
        }
    }
}

/// Errors a provider reports when no usable answer was obtained.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    /// Coordinates were rejected before any request was made.
    #[error("Invalid coordinate: {0}")]
    InvalidCoordinate(String),

    /// No access token is configured.
    #[error("Missing access token")]
    MissingToken,

    /// Network failure, timeout, or connection reset.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The backend answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// The response body could not be decoded.
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// The HTTP client could not be built.
    #[error("HTTP client error: {0}")]
    Client(String),
}

/// Resolves a coordinate to a human-readable address.
///
/// This is the only boundary the coordinator crosses. Implementations perform
/// one round trip per call; timeouts are the implementation's responsibility
/// and surface as [`ProviderError::Transport`].
///
/// Uses [`BoxFuture`] so the coordinator can hold an `Arc<dyn GeocodeProvider>`.
pub trait GeocodeProvider: Send + Sync {
    /// Performs one reverse-geocoding round trip.
    fn resolve(&self, lat: f64, lon: f64) -> BoxFuture<'_, Result<LookupResult, ProviderError>>;

    /// Human-readable provider name for logs.
    fn name(&self) -> &str;
}
