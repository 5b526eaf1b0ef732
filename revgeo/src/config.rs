//! Coordinator and provider configuration.
//!
//! Settings are plain structs with defaults. They can also be read from an
//! INI file:
//!
//! ```ini
//! [geocode]
//! cache_size = 400
//! concurrency = 4
//! empty_retries = 2
//! transient_retries = 10
//! transport_retries = 5
//!
//! [provider]
//! url = http://homeassistant.local:8123
//! token = eyJhbGciOi...
//! timeout_secs = 15
//! ```
//!
//! Missing keys keep their defaults. Values below a minimum are raised to it,
//! the same way the `with_*` builders clamp.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use ini::{Ini, Properties};
use thiserror::Error;

use crate::cache::{DEFAULT_IDENTITY_CAPACITY, MIN_IDENTITY_CAPACITY};
use crate::provider::DEFAULT_TIMEOUT_SECS;
use crate::queue::DEFAULT_MAX_CONCURRENCY;
use crate::retry::{
    RetryBudget, DEFAULT_MAX_EMPTY_RETRIES, DEFAULT_MAX_TRANSIENT_RETRIES,
    DEFAULT_MAX_TRANSPORT_RETRIES,
};

/// INI section holding coordinator settings.
pub const GEOCODE_SECTION: &str = "geocode";

/// INI section holding provider settings.
pub const PROVIDER_SECTION: &str = "provider";

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("Failed to read config file {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    /// The file is not valid INI.
    #[error("Failed to parse config: {0}")]
    Parse(String),

    /// A key holds a value of the wrong type.
    #[error("Invalid value '{value}' for [{section}] {key}")]
    InvalidValue {
        section: &'static str,
        key: &'static str,
        value: String,
    },

    /// A required key is absent.
    #[error("Missing required setting [{section}] {key}")]
    Missing {
        section: &'static str,
        key: &'static str,
    },
}

/// Coordinator tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeocodeConfig {
    /// Identity cache capacity (at least [`MIN_IDENTITY_CAPACITY`]).
    pub cache_capacity: usize,
    /// Simultaneous provider calls (at least 1).
    pub max_concurrency: usize,
    /// Extra attempts after an empty answer.
    pub max_empty_retries: u32,
    /// Extra attempts after a "busy" answer.
    pub max_transient_retries: u32,
    /// Extra attempts after a transport failure.
    pub max_transport_retries: u32,
}

impl Default for GeocodeConfig {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_IDENTITY_CAPACITY,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            max_empty_retries: DEFAULT_MAX_EMPTY_RETRIES,
            max_transient_retries: DEFAULT_MAX_TRANSIENT_RETRIES,
            max_transport_retries: DEFAULT_MAX_TRANSPORT_RETRIES,
        }
    }
}

impl GeocodeConfig {
    /// Sets the identity cache capacity, raised to [`MIN_IDENTITY_CAPACITY`].
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity.max(MIN_IDENTITY_CAPACITY);
        self
    }

    /// Sets the concurrency bound, raised to 1.
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn with_max_empty_retries(mut self, retries: u32) -> Self {
        self.max_empty_retries = retries;
        self
    }

    pub fn with_max_transient_retries(mut self, retries: u32) -> Self {
        self.max_transient_retries = retries;
        self
    }

    pub fn with_max_transport_retries(mut self, retries: u32) -> Self {
        self.max_transport_retries = retries;
        self
    }

    /// Retry limits as a [`RetryBudget`].
    pub fn retry_budget(&self) -> RetryBudget {
        RetryBudget {
            max_empty: self.max_empty_retries,
            max_transient: self.max_transient_retries,
            max_transport: self.max_transport_retries,
        }
    }

    /// Reads the `[geocode]` section. A missing section yields defaults.
    pub fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let Some(section) = ini.section(Some(GEOCODE_SECTION)) else {
            return Ok(config);
        };

        if let Some(v) = parse_key::<usize>(section, GEOCODE_SECTION, "cache_size")? {
            config = config.with_cache_capacity(v);
        }
        if let Some(v) = parse_key::<usize>(section, GEOCODE_SECTION, "concurrency")? {
            config = config.with_max_concurrency(v);
        }
        if let Some(v) = parse_key(section, GEOCODE_SECTION, "empty_retries")? {
            config.max_empty_retries = v;
        }
        if let Some(v) = parse_key(section, GEOCODE_SECTION, "transient_retries")? {
            config.max_transient_retries = v;
        }
        if let Some(v) = parse_key(section, GEOCODE_SECTION, "transport_retries")? {
            config.max_transport_retries = v;
        }
        Ok(config)
    }

    /// Parses INI text.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        Self::from_ini(&parse_ini(text)?)
    }

    /// Loads an INI file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_ini(&load_ini(path.as_ref())?)
    }
}

/// Connection settings for the Home Assistant tracker provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSettings {
    /// Server root URL.
    pub base_url: String,
    /// Long-lived access token.
    pub token: String,
    /// Per-request timeout.
    pub timeout_secs: u64,
}

impl ProviderSettings {
    /// Creates settings with the default timeout.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: token.into(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Reads the `[provider]` section. `url` and `token` are required.
    pub fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let section = ini.section(Some(PROVIDER_SECTION));
        let required = |key: &'static str| {
            section
                .and_then(|s| s.get(key))
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or(ConfigError::Missing {
                    section: PROVIDER_SECTION,
                    key,
                })
        };

        let mut settings = Self::new(required("url")?, required("token")?);
        if let Some(section) = section {
            if let Some(v) = parse_key(section, PROVIDER_SECTION, "timeout_secs")? {
                settings.timeout_secs = v;
            }
        }
        Ok(settings)
    }

    /// Parses INI text.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        Self::from_ini(&parse_ini(text)?)
    }

    /// Loads an INI file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_ini(&load_ini(path.as_ref())?)
    }
}

fn parse_ini(text: &str) -> Result<Ini, ConfigError> {
    Ini::load_from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
}

fn load_ini(path: &Path) -> Result<Ini, ConfigError> {
    Ini::load_from_file(path).map_err(|e| match e {
        ini::Error::Io(io) => ConfigError::Read {
            path: path.to_path_buf(),
            reason: io.to_string(),
        },
        ini::Error::Parse(parse) => ConfigError::Parse(parse.to_string()),
    })
}

fn parse_key<T: FromStr>(
    section: &Properties,
    section_name: &'static str,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    let Some(raw) = section.get(key) else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
        section: section_name,
        key,
        value: raw.to_string(),
    })
}
