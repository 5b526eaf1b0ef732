//! Coordinate fingerprints and lookup keys.
//!
//! Coordinates are quantized to six decimal places (roughly 0.1 m) and stored
//! as integer micro-degrees, so near-identical floating point positions
//! collapse to one cache slot and hash exactly.
//!
//! ```text
//! (40.0000001, -3.0)  ─┐
//!                      ├──► Fingerprint "40.000000,-3.000000"
//! (40.0,       -3.0)  ─┘
//! ```

use std::fmt;

use thiserror::Error;

/// Decimal places kept when quantizing a coordinate.
pub const FINGERPRINT_DECIMALS: u32 = 6;

/// Multiplier from degrees to the quantized integer representation.
const SCALE: f64 = 1_000_000.0;

/// Errors produced when a coordinate cannot be fingerprinted.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum CoordError {
    /// Latitude is NaN or infinite.
    #[error("Latitude is not a finite number: {0}")]
    NonFiniteLatitude(f64),

    /// Longitude is NaN or infinite.
    #[error("Longitude is not a finite number: {0}")]
    NonFiniteLongitude(f64),
}

/// A coordinate rounded to [`FINGERPRINT_DECIMALS`] places.
///
/// Independent of who asked or when; used to deduplicate provider calls for
/// the same physical point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    lat_e6: i64,
    lon_e6: i64,
}

impl Fingerprint {
    /// Quantizes a latitude/longitude pair.
    ///
    /// # Errors
    ///
    /// Returns [`CoordError`] if either component is not finite.
    pub fn new(lat: f64, lon: f64) -> Result<Self, CoordError> {
        if !lat.is_finite() {
            return Err(CoordError::NonFiniteLatitude(lat));
        }
        if !lon.is_finite() {
            return Err(CoordError::NonFiniteLongitude(lon));
        }

        Ok(Self {
            lat_e6: quantize(lat),
            lon_e6: quantize(lon),
        })
    }

    /// Quantized latitude in degrees.
    pub fn lat(&self) -> f64 {
        self.lat_e6 as f64 / SCALE
    }

    /// Quantized longitude in degrees.
    pub fn lon(&self) -> f64 {
        self.lon_e6 as f64 / SCALE
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_fixed(f, self.lat_e6)?;
        f.write_str(",")?;
        write_fixed(f, self.lon_e6)
    }
}

/// What a logical id currently wants resolved: a fingerprint at a timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LookupKey {
    /// Quantized coordinate.
    pub fingerprint: Fingerprint,
    /// Sample timestamp in milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
}

impl LookupKey {
    /// Builds a key from raw coordinates and a timestamp.
    pub fn new(lat: f64, lon: f64, timestamp_ms: i64) -> Result<Self, CoordError> {
        Ok(Self {
            fingerprint: Fingerprint::new(lat, lon)?,
            timestamp_ms,
        })
    }
}

impl fmt::Display for LookupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.fingerprint, self.timestamp_ms)
    }
}

#[inline]
fn quantize(degrees: f64) -> i64 {
    (degrees * SCALE).round() as i64
}

/// Writes micro-degrees as a fixed six-decimal number without float noise.
fn write_fixed(f: &mut fmt::Formatter<'_>, micro: i64) -> fmt::Result {
    let sign = if micro < 0 { "-" } else { "" };
    let abs = micro.unsigned_abs();
    write!(f, "{}{}.{:06}", sign, abs / 1_000_000, abs % 1_000_000)
}
