//! Reverse-geocoding provider abstraction
//!
//! The coordinator depends only on the [`GeocodeProvider`] trait. This module
//! also ships an adapter for the Home Assistant tracker backend,
//! built on an [`HttpClient`] seam so it can be tested without a network.
//!
//! ```ignore
//! use revgeo::provider::{HaTrackerProvider, ReqwestClient};
//!
//! let http_client = ReqwestClient::new()?;
//! let provider = HaTrackerProvider::new(http_client, base_url, token);
//! ```

mod ha_tracker;
mod http;
mod types;

pub use ha_tracker::{
    interpret_response, HaTrackerProvider, DEFAULT_QUEUED_RETRY_SECS, REVERSE_GEOCODE_PATH,
};
pub use http::{HttpClient, HttpResponse, ReqwestClient, DEFAULT_TIMEOUT_SECS};
pub use types::{BoxFuture, GeocodeProvider, LookupResult, ProviderError};

#[cfg(test)]
pub use http::tests::MockHttpClient;
