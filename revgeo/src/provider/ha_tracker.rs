//! Home Assistant tracker reverse-geocoding adapter.
//!
//! Talks to the tracker integration's backend, which fronts Nominatim with its
//! own server-side cache and queue. The backend never blocks on a cold miss
//! when asked with `nowait=1`; it answers `202 Accepted` with a retry hint and
//! fills its cache in the background.
//!
//! # Endpoint
//!
//! `GET {base_url}/api/ha_tracker/reverse_geocode?lat={lat}&lon={lon}&nowait=1&brief=1`
//!
//! `GET {base_url}/api/ha_tracker/reverse_geocode?reset=all` (admin only) drops
//! the backend's own cache and queue; see [`HaTrackerProvider::reset_server_cache`].
//!
//! # Response Mapping
//!
//! | Response                                   | Result                         |
//! |--------------------------------------------|--------------------------------|
//! | `202` (any body)                           | `Transient` with hint          |
//! | `204`                                      | `Address("")`                  |
//! | `2xx` `{"error": "queued" \| "busy" ...}`  | `Transient` with hint          |
//! | `2xx` `{"address": {"display_name": ..}}`  | `Address(display_name)`        |
//! | `429`/`503` with a known busy code         | `Transient` with hint          |
//! | any other status                           | `ProviderError::Http`          |

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};

use crate::config::ProviderSettings;
use crate::provider::{
    BoxFuture, GeocodeProvider, HttpClient, HttpResponse, LookupResult, ProviderError,
    ReqwestClient,
};

/// Path of the reverse-geocoding view on the Home Assistant server.
pub const REVERSE_GEOCODE_PATH: &str = "/api/ha_tracker/reverse_geocode";

/// Delay hint used when the backend queues a lookup without saying how long.
pub const DEFAULT_QUEUED_RETRY_SECS: f64 = 1.5;

/// Longest retry hint honoured, in seconds. Larger hints are clamped.
pub const MAX_RETRY_HINT_SECS: f64 = 300.0;

/// Error codes the backend uses for "come back later".
const BUSY_CODES: &[&str] = &["queued", "temporarily_unavailable", "rate_limited", "busy"];

/// Longest error body echoed into a `ProviderError::Http` message.
const MAX_ERROR_BODY_CHARS: usize = 200;

#[derive(Debug, Default, Deserialize)]
struct ReverseGeocodeBody {
    #[serde(default)]
    address: Option<AddressBody>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    retry_after: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct AddressBody {
    #[serde(default)]
    display_name: Option<String>,
}

/// Reverse-geocoding provider backed by the Home Assistant tracker API.
///
/// # Example
///
/// ```no_run
/// use revgeo::provider::{HaTrackerProvider, ReqwestClient};
///
/// let client = ReqwestClient::new().unwrap();
/// let provider = HaTrackerProvider::new(client, "http://homeassistant.local:8123", "TOKEN");
/// // Hand the provider to a GeocodeCoordinator...
/// ```
pub struct HaTrackerProvider<C: HttpClient> {
    http_client: C,
    base_url: String,
    token: String,
}

impl<C: HttpClient> HaTrackerProvider<C> {
    /// Creates a provider for the given Home Assistant base URL.
    ///
    /// # Arguments
    ///
    /// * `http_client` - HTTP client for making requests
    /// * `base_url` - Server root, e.g. `http://homeassistant.local:8123`
    /// * `token` - Long-lived access token
    pub fn new(http_client: C, base_url: impl Into<String>, token: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http_client,
            base_url,
            token: token.into(),
        }
    }

    /// Builds the lookup URL for a coordinate.
    fn build_url(&self, lat: f64, lon: f64) -> String {
        format!(
            "{}{}?lat={}&lon={}&nowait=1&brief=1",
            self.base_url, REVERSE_GEOCODE_PATH, lat, lon
        )
    }

    fn reset_url(&self) -> String {
        format!("{}{}?reset=all", self.base_url, REVERSE_GEOCODE_PATH)
    }

    /// Asks the backend to drop its server-side geocode cache and queue.
    ///
    /// Requires an administrator token. Local caches are untouched; pair this
    /// with [`GeocodeCoordinator::reset`](crate::GeocodeCoordinator::reset)
    /// for a full refresh.
    pub async fn reset_server_cache(&self) -> Result<(), ProviderError> {
        if self.token.trim().is_empty() {
            return Err(ProviderError::MissingToken);
        }

        let response = self.http_client.get(&self.reset_url(), &self.token).await?;
        if !(200..=299).contains(&response.status) {
            return Err(http_error(&response));
        }
        info!(base_url = %self.base_url, "Server geocode cache reset");
        Ok(())
    }
}

impl HaTrackerProvider<ReqwestClient> {
    /// Creates a reqwest-backed provider from loaded settings.
    pub fn from_settings(settings: &ProviderSettings) -> Result<Self, ProviderError> {
        let client = ReqwestClient::with_timeout(settings.timeout_secs)?;
        Ok(Self::new(client, &settings.base_url, &settings.token))
    }
}

impl<C: HttpClient> GeocodeProvider for HaTrackerProvider<C> {
    fn resolve(&self, lat: f64, lon: f64) -> BoxFuture<'_, Result<LookupResult, ProviderError>> {
        Box::pin(async move {
            if !lat.is_finite() || !lon.is_finite() {
                return Err(ProviderError::InvalidCoordinate(format!(
                    "latitude and longitude must be finite numbers ({}, {})",
                    lat, lon
                )));
            }
            if self.token.trim().is_empty() {
                return Err(ProviderError::MissingToken);
            }

            let url = self.build_url(lat, lon);
            let response = self.http_client.get(&url, &self.token).await?;
            debug!(
                lat,
                lon,
                status = response.status,
                bytes = response.body.len(),
                "Reverse geocode response"
            );
            interpret_response(&response)
        })
    }

    fn name(&self) -> &str {
        "Home Assistant tracker"
    }
}

/// Maps a raw backend response to a lookup result.
pub fn interpret_response(response: &HttpResponse) -> Result<LookupResult, ProviderError> {
    match response.status {
        202 => {
            let body = decode_lenient(response);
            let secs = body
                .retry_after
                .or(response.retry_after)
                .unwrap_or(DEFAULT_QUEUED_RETRY_SECS);
            Ok(LookupResult::Transient {
                retry_after: retry_hint(secs),
            })
        }
        204 => Ok(LookupResult::Address(String::new())),
        200..=299 => {
            if response.body.iter().all(u8::is_ascii_whitespace) {
                return Ok(LookupResult::Address(String::new()));
            }
            let body = match serde_json::from_slice::<ReverseGeocodeBody>(&response.body) {
                Ok(body) => body,
                Err(e) if response.is_json() => return Err(ProviderError::Decode(e.to_string())),
                // Plain-text bodies carry no address.
                Err(_) => return Ok(LookupResult::Address(String::new())),
            };
            if let Some(hint) = busy_hint(&body, response) {
                return Ok(hint);
            }
            let address = body
                .address
                .and_then(|a| a.display_name)
                .map(|name| name.trim().to_string())
                .unwrap_or_default();
            Ok(LookupResult::Address(address))
        }
        429 | 503 => {
            let body = decode_lenient(response);
            busy_hint(&body, response).ok_or_else(|| http_error(response))
        }
        _ => Err(http_error(response)),
    }
}

fn busy_hint(body: &ReverseGeocodeBody, response: &HttpResponse) -> Option<LookupResult> {
    let code = body.error.as_deref()?;
    if !BUSY_CODES.contains(&code) {
        return None;
    }
    let secs = body.retry_after.or(response.retry_after);
    Some(LookupResult::Transient {
        retry_after: secs.and_then(retry_hint),
    })
}

fn decode_lenient(response: &HttpResponse) -> ReverseGeocodeBody {
    serde_json::from_slice(&response.body).unwrap_or_default()
}

fn retry_hint(secs: f64) -> Option<Duration> {
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(secs.min(MAX_RETRY_HINT_SECS)).ok()
}

fn http_error(response: &HttpResponse) -> ProviderError {
    let text = String::from_utf8_lossy(&response.body);
    ProviderError::Http {
        status: response.status,
        message: text.chars().take(MAX_ERROR_BODY_CHARS).collect(),
    }
}
