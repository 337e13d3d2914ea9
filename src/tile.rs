//! # Tile Data Model
//!
//! A tile carries the harmonic model for one 1°×1° geographic cell (or one named
//! region) in a form that can be shipped, cached and verified offline.
//!
//! ## Identity
//! - Cells: `cell_{lat}_{lon}` using floored degrees, e.g. `cell_13_100`
//! - Regions: `region_{key}`, e.g. `region_andaman_sea`
//!
//! ## Integrity invariant
//! `TileData::checksum` is always the SHA-256 of the accompanying compressed
//! payload. Records that break it are discarded, never repaired.
//!
//! Field names serialize in camelCase to match the wire and manifest formats.

use crate::constituents::Region;
use crate::error::{Result, TideError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Geographic extent of a tile in degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    /// The 1°×1° cell containing `(lat, lon)`.
    pub fn cell(lat: f64, lon: f64) -> Self {
        let (lat0, lon0) = (lat.floor(), lon.floor());
        Self {
            min_lat: lat0,
            min_lon: lon0,
            max_lat: lat0 + 1.0,
            max_lon: lon0 + 1.0,
        }
    }

    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        (self.min_lat..=self.max_lat).contains(&lat) && (self.min_lon..=self.max_lon).contains(&lon)
    }

    pub fn centroid(&self) -> Centroid {
        Centroid {
            lat: (self.min_lat + self.max_lat) / 2.0,
            lon: (self.min_lon + self.max_lon) / 2.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Centroid {
    pub lat: f64,
    pub lon: f64,
}

/// Packaged form of one constituent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConstituentData {
    pub name: String,
    /// Amplitude in metres, rounded to 4 decimals when packaged
    pub amplitude: f64,
    /// Phase lag in degrees, rounded to 2 decimals when packaged
    pub phase: f64,
    /// Angular speed in degrees per hour
    pub speed: f64,
}

impl ConstituentData {
    pub fn new(name: impl Into<String>, amplitude: f64, phase: f64, speed: f64) -> Self {
        Self {
            name: name.into(),
            amplitude,
            phase,
            speed,
        }
    }

    /// Copy with amplitude rounded to 4 decimals and phase to 2.
    pub fn normalized(&self) -> Self {
        Self {
            name: self.name.clone(),
            amplitude: round_to(self.amplitude, 4),
            phase: round_to(self.phase, 2),
            speed: self.speed,
        }
    }

    /// Whether any numeric field differs from `other` by more than `tolerance`.
    pub fn differs_from(&self, other: &ConstituentData, tolerance: f64) -> bool {
        (self.amplitude - other.amplitude).abs() > tolerance
            || (self.phase - other.phase).abs() > tolerance
            || (self.speed - other.speed).abs() > tolerance
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

/// Inference rule deriving a minor constituent from a major one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinorRule {
    pub name: String,
    pub reference: String,
    pub amplitude_ratio: f64,
    pub phase_offset: f64,
}

/// Station-level adjustment measured against local observations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalCalibration {
    /// Metres added to every predicted level
    pub datum_offset: f64,
    /// Multiplier on every amplitude
    pub amplitude_scale: f64,
    /// Degrees added to every phase lag
    pub phase_shift: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileCorrections {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub minor_rules: Vec<MinorRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_calibration: Option<LocalCalibration>,
}

/// Metadata and content of one tile, plus cache bookkeeping.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileData {
    pub tile_id: String,
    pub bbox: BoundingBox,
    pub centroid: Centroid,
    pub model: String,
    pub datum: String,
    /// Normalized and sorted by name
    pub constituents: Vec<ConstituentData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corrections: Option<TileCorrections>,
    pub version: String,
    /// SHA-256 hex of the compressed payload
    pub checksum: String,
    pub compressed_size: u64,
    pub original_size: u64,
    pub downloaded_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: u64,
}

/// A tile with its compressed payload: the unit that is stored and shipped.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TilePackage {
    pub tile: TileData,
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
}

impl TilePackage {
    pub fn tile_id(&self) -> &str {
        &self.tile.tile_id
    }

    /// Bytes this package occupies against a storage quota.
    pub fn stored_size(&self) -> u64 {
        self.payload.len() as u64
    }
}

/// Per-tile line of a manifest.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub tile_id: String,
    pub checksum: String,
    pub compressed_size: u64,
    pub original_size: u64,
    pub bbox: BoundingBox,
    pub version: String,
}

/// Provenance of the astronomy the tiles were generated with.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EphemeridesInfo {
    pub source: String,
    pub delta_t_table: String,
    pub leap_seconds: i32,
}

/// Index over a set of packaged tiles, optionally HMAC-signed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TilePackageManifest {
    pub version: String,
    pub generated_at: DateTime<Utc>,
    pub ephemerides: EphemeridesInfo,
    pub tiles: Vec<ManifestEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// One step of a delta between two tile versions, keyed by constituent name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOperation {
    Add { constituent: ConstituentData },
    Remove { name: String },
    Replace { from: ConstituentData, to: ConstituentData },
}

/// Delta between two versions of a tile.
///
/// `operations` is an audit trail only; `payload` (the full compressed new
/// version) is what gets applied.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TilePatch {
    pub tile_id: String,
    pub from_version: String,
    pub to_version: String,
    pub operations: Vec<PatchOperation>,
    pub checksum: String,
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
}

/// Tile id of the 1°×1° cell containing `(lat, lon)`.
pub fn tile_id_for(lat: f64, lon: f64) -> Result<String> {
    if !lat.is_finite() || !lon.is_finite() || lat.abs() > 90.0 || lon.abs() > 180.0 {
        return Err(TideError::InvalidInput(format!(
            "cannot derive a tile id for ({lat}, {lon})"
        )));
    }
    Ok(format!("cell_{}_{}", lat.floor() as i32, lon.floor() as i32))
}

/// Tile id of a whole named region.
pub fn region_tile_id(region: Region) -> String {
    format!("region_{}", region.key())
}

/// Tile ids double as file names in filesystem stores.
pub fn is_valid_tile_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        && !id.starts_with('.')
}

/// Serde adapter carrying raw bytes as standard base64 strings.
pub mod base64_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&crate::crypto::encode_base64(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        crate::crypto::decode_base64(&text).map_err(serde::de::Error::custom)
    }
}
