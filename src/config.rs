//! # Configuration Management
//!
//! This module handles loading and parsing configuration from the sunmoon-tide.toml
//! file. It provides a centralized way to configure the default location, the tile
//! cache, the tile server and prediction cadence.
//!
//! Every section and field has a default, so a partial file only overrides what it
//! names.

use crate::storage::StorageOptions;
use crate::LocationData;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Default configuration file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "sunmoon-tide.toml";

/// Application configuration loaded from sunmoon-tide.toml
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Location used when the CLI is given no coordinates
    pub location: LocationConfig,
    /// Tile cache on disk
    pub storage: StorageConfig,
    /// Tile server and packaging settings
    pub tiles: TilesConfig,
    /// Sampling cadences
    pub prediction: PredictionConfig,
}

/// Default prediction location
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LocationConfig {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    /// Offset of local civil time from UTC; day boundaries for extreme sweeps
    pub utc_offset_hours: f64,
}

/// Tile cache configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub dir: PathBuf,
    pub quota_bytes: u64,
    /// Tiles not read for this many days are dropped
    pub max_age_days: i64,
    pub verify_on_read: bool,
}

/// Tile server and packaging configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TilesConfig {
    /// Tile server root; no network fetches when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    pub model: String,
    pub datum: String,
    pub version: String,
    /// Manifest signing secret
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hmac_secret: Option<String>,
}

/// Prediction sampling configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PredictionConfig {
    /// Cadence of the extreme sweep
    pub sample_interval_minutes: i64,
    /// Cadence of graph points
    pub graph_interval_minutes: i64,
}

impl Default for LocationConfig {
    fn default() -> Self {
        LocationConfig {
            name: "Bangkok".to_string(),
            lat: 13.7563,
            lon: 100.5018,
            utc_offset_hours: 7.0, // Indochina Time
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            dir: PathBuf::from("tile-cache"),
            quota_bytes: crate::storage::DEFAULT_QUOTA_BYTES,
            max_age_days: crate::storage::DEFAULT_MAX_AGE_DAYS,
            verify_on_read: true,
        }
    }
}

impl Default for TilesConfig {
    fn default() -> Self {
        TilesConfig {
            base_url: None,
            timeout_secs: 10,
            model: "sunmoon-harmonic-37".to_string(),
            datum: "CD".to_string(),
            version: "1.0.0".to_string(),
            hmac_secret: None,
        }
    }
}

impl Default for PredictionConfig {
    fn default() -> Self {
        PredictionConfig {
            sample_interval_minutes: crate::harmonic::SAMPLE_INTERVAL_MINUTES,
            graph_interval_minutes: 30,
        }
    }
}

impl LocationConfig {
    pub fn to_location(&self) -> LocationData {
        LocationData::new(self.lat, self.lon, self.name.clone())
    }
}

impl StorageConfig {
    pub fn to_options(&self) -> StorageOptions {
        StorageOptions {
            quota_bytes: self.quota_bytes,
            max_age: chrono::Duration::days(self.max_age_days.max(1)),
            verify_on_read: self.verify_on_read,
        }
    }
}

impl Config {
    /// Load configuration from sunmoon-tide.toml file
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load() -> Self {
        Self::load_from_path(CONFIG_FILE)
    }

    /// Load configuration from specified path
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<Config>(&contents) {
                Ok(config) => {
                    tracing::info!(
                        path = %path.display(),
                        location = %config.location.name,
                        "loaded configuration"
                    );
                    config
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "invalid config file format, using defaults (Bangkok)"
                    );
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!(
                    path = %path.display(),
                    "no config file found, using defaults (Bangkok)"
                );
                Self::default()
            }
        }
    }

    /// Save current configuration as pretty TOML
    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path.as_ref(), contents)?;
        tracing::info!(path = %path.as_ref().display(), "configuration saved");
        Ok(())
    }
}
