//! # Sunmoon Tide Core Library
//!
//! Harmonic tide prediction for the Thai coast, plus the packaging, caching and
//! distribution of the model data as compact integrity-verified tiles.
//!
//! ## Computation pipeline
//!
//! 1. [`ephemerides`]: ΔT, leap seconds, Julian Day and the fundamental
//!    astronomical arguments `s, h, p, N, p′, τ`
//! 2. [`constituents`]: the static catalogue of 37 constituents with their
//!    regional calibrations
//! 3. [`nodal`]: per-constituent amplitude factor `f` and phase correction `u`
//! 4. [`harmonic`]: water level synthesis and high/low water detection
//!
//! ## Distribution pipeline
//!
//! 1. [`packager`]: canonical JSON, deflate, SHA-256 checksum, HMAC-signed manifests
//! 2. [`storage`]: quota-bounded LRU tile cache over a pluggable [`store::TileStore`]
//! 3. [`tile_fetch`]: one-shot network retrieval of tiles with verification
//!
//! The two pipelines meet in [`service`], which decides per request whether a
//! packaged tile or a fresh harmonic computation served it. [`lunar`] adds the
//! day's moon phase and [`renderer`] turns a response into terminal text.
//!
//! ## Core Types
//!
//! The values exchanged with presentation layers live here:
//! - [`LocationData`]: where to predict
//! - [`TideExtreme`]: one high or low water event
//! - [`GraphPoint`]: one point of a dense level series
//! - [`DataSource`]: whether a tile or direct computation answered

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Module declarations
pub mod config;
pub mod constituents;
pub mod crypto;
pub mod ephemerides;
pub mod error;
pub mod harmonic;
pub mod logging;
pub mod lunar;
pub mod nodal;
pub mod packager;
pub mod renderer;
pub mod service;
pub mod storage;
pub mod store;
pub mod tile;
pub mod tile_fetch;

pub use error::{Result, TideError};

/// A point on the coast to predict for.
///
/// # Example
/// ```
/// use sunmoon_tide_lib::LocationData;
///
/// let bangkok = LocationData::new(13.7563, 100.5018, "Bangkok");
/// assert!(bangkok.validate().is_ok());
///
/// let nowhere = LocationData::new(f64::NAN, 100.0, "nowhere");
/// assert!(nowhere.validate().is_err());
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocationData {
    /// Latitude in degrees north
    pub lat: f64,
    /// Longitude in degrees east
    pub lon: f64,
    /// Human-readable place name
    pub name: String,
}

impl LocationData {
    pub fn new(lat: f64, lon: f64, name: impl Into<String>) -> Self {
        Self {
            lat,
            lon,
            name: name.into(),
        }
    }

    /// Reject coordinates that are non-finite or off the globe.
    pub fn validate(&self) -> Result<()> {
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err(TideError::InvalidInput(format!(
                "latitude must be within [-90, 90], got {}",
                self.lat
            )));
        }
        if !self.lon.is_finite() || !(-180.0..=180.0).contains(&self.lon) {
            return Err(TideError::InvalidInput(format!(
                "longitude must be within [-180, 180], got {}",
                self.lon
            )));
        }
        Ok(())
    }
}

/// High or low water.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtremeKind {
    High,
    Low,
}

/// A high or low water event within one day.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TideExtreme {
    pub time: DateTime<Utc>,
    /// Water level in metres above chart datum
    pub level: f64,
    #[serde(rename = "type")]
    pub kind: ExtremeKind,
    /// Confidence in percent
    pub confidence: u8,
}

/// One sample of a dense water level series.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphPoint {
    pub time: DateTime<Utc>,
    /// Water level in metres above chart datum
    pub level: f64,
}

/// Which data path answered a prediction request.
///
/// Presentation layers label `Harmonic` answers as estimates when tile-backed
/// precision was expected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Tile,
    Harmonic,
}
