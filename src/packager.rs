//! # Tile Packager
//!
//! Turns a location's constituent set into a [`TilePackage`] and back.
//!
//! ## Packaging pipeline
//! 1. **Normalize**: amplitude to 4 decimals, phase to 2, sort by name
//! 2. **Canonicalize**: key-sorted JSON of the tile's content fields
//! 3. **Compress**: zlib (deflate) at maximum level
//! 4. **Checksum**: SHA-256 over the *compressed* bytes
//! 5. **Bookkeeping**: sizes, timestamps, zeroed access counter
//!
//! Identical logical tiles therefore always hash identically, regardless of
//! the order their constituents were supplied in.
//!
//! ## Manifests and patches
//! Manifests index many packages and may carry an HMAC-SHA256 signature over
//! their canonical JSON with the signature field removed. Delta patches list
//! add/remove/replace operations for auditing but are always applied from the
//! full compressed payload they embed.

use crate::constituents::{ConstituentDatabase, Region};
use crate::crypto;
use crate::ephemerides;
use crate::error::{Result, TideError};
use crate::tile::{
    region_tile_id, tile_id_for, BoundingBox, Centroid, ConstituentData, EphemeridesInfo,
    ManifestEntry, PatchOperation, TileCorrections, TileData, TilePackage, TilePackageManifest,
    TilePatch,
};
use chrono::{DateTime, Utc};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::io::{Read, Write};

/// Values differing by no more than this are considered unchanged in a patch.
pub const PATCH_TOLERANCE: f64 = 1e-6;

/// Upper bound on inflated payload size; anything larger is treated as corrupt.
const MAX_INFLATED_BYTES: u64 = 16 * 1024 * 1024;

/// Knobs for [`package`].
#[derive(Clone, Debug)]
pub struct PackageOptions {
    pub model: String,
    pub datum: String,
    pub version: String,
    pub corrections: Option<TileCorrections>,
    /// zlib level 0–9
    pub compression_level: u32,
}

impl Default for PackageOptions {
    fn default() -> Self {
        Self {
            model: "sunmoon-harmonic-37".to_string(),
            datum: "CD".to_string(),
            version: "1.0.0".to_string(),
            corrections: None,
            compression_level: 9,
        }
    }
}

/// The content fields of a tile, exactly as hashed and shipped.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalTile {
    pub tile_id: String,
    pub bbox: BoundingBox,
    pub centroid: Centroid,
    pub model: String,
    pub datum: String,
    pub constituents: Vec<ConstituentData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corrections: Option<TileCorrections>,
    pub version: String,
}

impl CanonicalTile {
    fn from_tile(tile: &TileData) -> Self {
        Self {
            tile_id: tile.tile_id.clone(),
            bbox: tile.bbox,
            centroid: tile.centroid,
            model: tile.model.clone(),
            datum: tile.datum.clone(),
            constituents: tile.constituents.clone(),
            corrections: tile.corrections.clone(),
            version: tile.version.clone(),
        }
    }

    fn into_tile_data(self, payload: &[u8], original_size: u64, now: DateTime<Utc>) -> TileData {
        TileData {
            tile_id: self.tile_id,
            bbox: self.bbox,
            centroid: self.centroid,
            model: self.model,
            datum: self.datum,
            constituents: self.constituents,
            corrections: self.corrections,
            version: self.version,
            checksum: crypto::digest(payload),
            compressed_size: payload.len() as u64,
            original_size,
            downloaded_at: now,
            last_accessed_at: now,
            access_count: 0,
        }
    }
}

/// Normalize every constituent and sort by name.
pub fn normalize_constituents(constituents: &[ConstituentData]) -> Vec<ConstituentData> {
    let mut normalized: Vec<_> = constituents.iter().map(ConstituentData::normalized).collect();
    normalized.sort_by(|a, b| {
        a.name
            .cmp(&b.name)
            .then(a.speed.total_cmp(&b.speed))
            .then(a.amplitude.total_cmp(&b.amplitude))
            .then(a.phase.total_cmp(&b.phase))
    });
    normalized
}

/// Serialize any value as JSON with object keys sorted at every level.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let tree = sort_keys(serde_json::to_value(value)?);
    Ok(serde_json::to_vec(&tree)?)
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> =
                map.into_iter().map(|(k, v)| (k, sort_keys(v))).collect();
            Value::Object(sorted.into_iter().collect::<Map<String, Value>>())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// Deflate `bytes` with a zlib wrapper.
pub fn compress(bytes: &[u8], level: u32) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level.min(9)));
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}

/// Inflate a zlib payload. Any failure is reported as a corrupt payload.
pub fn decompress(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    ZlibDecoder::new(bytes)
        .take(MAX_INFLATED_BYTES + 1)
        .read_to_end(&mut out)
        .map_err(|e| TideError::CorruptPayload(format!("inflate failed: {e}")))?;
    if out.len() as u64 > MAX_INFLATED_BYTES {
        return Err(TideError::CorruptPayload("inflated payload too large".into()));
    }
    Ok(out)
}

/// Package a constituent set into a checksummed, compressed tile.
pub fn package(
    tile_id: &str,
    bbox: BoundingBox,
    centroid: Centroid,
    constituents: &[ConstituentData],
    options: &PackageOptions,
) -> Result<TilePackage> {
    if !crate::tile::is_valid_tile_id(tile_id) {
        return Err(TideError::InvalidInput(format!("invalid tile id {tile_id:?}")));
    }

    let canonical = CanonicalTile {
        tile_id: tile_id.to_string(),
        bbox,
        centroid,
        model: options.model.clone(),
        datum: options.datum.clone(),
        constituents: normalize_constituents(constituents),
        corrections: options.corrections.clone(),
        version: options.version.clone(),
    };

    let bytes = canonical_json(&canonical)?;
    let payload = compress(&bytes, options.compression_level)?;
    let tile = canonical.into_tile_data(&payload, bytes.len() as u64, Utc::now());

    tracing::debug!(
        tile_id,
        original = tile.original_size,
        compressed = tile.compressed_size,
        "packaged tile"
    );
    Ok(TilePackage { tile, payload })
}

/// Constituents of the catalogue with their calibration for `region`.
pub fn regional_constituents(region: Region) -> Vec<ConstituentData> {
    ConstituentDatabase::standard()
        .all()
        .iter()
        .map(|c| {
            let cal = c.calibration(region);
            ConstituentData::new(c.name, cal.amplitude, cal.phase, c.speed)
        })
        .collect()
}

/// Package the 1°×1° cell containing `(lat, lon)` from the regional calibration.
pub fn package_cell(lat: f64, lon: f64, options: &PackageOptions) -> Result<TilePackage> {
    let tile_id = tile_id_for(lat, lon)?;
    let bbox = BoundingBox::cell(lat, lon);
    let centroid = bbox.centroid();
    let region = Region::classify(centroid.lat, centroid.lon);
    package(&tile_id, bbox, centroid, &regional_constituents(region), options)
}

/// Package a whole region as one tile.
pub fn package_region(region: Region, options: &PackageOptions) -> Result<TilePackage> {
    let bbox = match region {
        Region::GulfOfThailand => BoundingBox {
            min_lat: 5.0,
            min_lon: 99.0,
            max_lat: 14.0,
            max_lon: 105.0,
        },
        Region::AndamanSea => BoundingBox {
            min_lat: 5.5,
            min_lon: 97.0,
            max_lat: 10.5,
            max_lon: 100.3,
        },
    };
    package(
        &region_tile_id(region),
        bbox,
        bbox.centroid(),
        &regional_constituents(region),
        options,
    )
}

/// Check that a tile's checksum matches its payload.
pub fn verify_tile_integrity(tile: &TileData, payload: &[u8]) -> Result<()> {
    let actual = crypto::digest(payload);
    if actual != tile.checksum {
        return Err(TideError::Integrity {
            tile_id: tile.tile_id.clone(),
            expected: tile.checksum.clone(),
            actual,
        });
    }
    Ok(())
}

/// Verify, inflate and parse a package back into its canonical content.
///
/// Also checks that the payload describes the same tile as its record.
pub fn unpack(package: &TilePackage) -> Result<CanonicalTile> {
    verify_tile_integrity(&package.tile, &package.payload)?;
    let canonical = parse_payload(&package.payload)?;
    if canonical != CanonicalTile::from_tile(&package.tile) {
        return Err(TideError::CorruptPayload(format!(
            "payload of {} does not match its tile record",
            package.tile.tile_id
        )));
    }
    Ok(canonical)
}

fn parse_payload(payload: &[u8]) -> Result<CanonicalTile> {
    let bytes = decompress(payload)?;
    serde_json::from_slice(&bytes)
        .map_err(|e| TideError::CorruptPayload(format!("payload is not a tile: {e}")))
}

/// Rebuild a full package from a compressed payload alone.
pub fn restore_from_payload(payload: Vec<u8>) -> Result<TilePackage> {
    let canonical = parse_payload(&payload)?;
    let original_size = canonical_json(&canonical)?.len() as u64;
    let tile = canonical.into_tile_data(&payload, original_size, Utc::now());
    Ok(TilePackage { tile, payload })
}

/// Options for [`manifest`].
#[derive(Clone, Debug, Default)]
pub struct ManifestOptions<'a> {
    pub version: String,
    pub hmac_secret: Option<&'a str>,
}

/// Index packages and optionally sign the result.
pub fn manifest(packages: &[TilePackage], options: &ManifestOptions<'_>) -> Result<TilePackageManifest> {
    let now = Utc::now();
    let mut tiles: Vec<ManifestEntry> = packages
        .iter()
        .map(|p| ManifestEntry {
            tile_id: p.tile.tile_id.clone(),
            checksum: p.tile.checksum.clone(),
            compressed_size: p.tile.compressed_size,
            original_size: p.tile.original_size,
            bbox: p.tile.bbox,
            version: p.tile.version.clone(),
        })
        .collect();
    tiles.sort_by(|a, b| a.tile_id.cmp(&b.tile_id));

    let mut manifest = TilePackageManifest {
        version: options.version.clone(),
        generated_at: now,
        ephemerides: EphemeridesInfo {
            source: "mean-elements polynomial (J2000), IAU 1980 nutation leading terms"
                .to_string(),
            delta_t_table: "1950-2035 at 5-year spacing".to_string(),
            leap_seconds: ephemerides::leap_second_offset(now),
        },
        tiles,
        signature: None,
    };

    if let Some(secret) = options.hmac_secret {
        let bytes = manifest_signing_bytes(&manifest)?;
        manifest.signature = Some(crypto::hmac(secret.as_bytes(), &bytes)?);
    }
    Ok(manifest)
}

/// Canonical JSON of a manifest with the signature field removed.
pub fn manifest_signing_bytes(manifest: &TilePackageManifest) -> Result<Vec<u8>> {
    let mut value = serde_json::to_value(manifest)?;
    if let Value::Object(map) = &mut value {
        map.remove("signature");
    }
    canonical_json(&value)
}

/// Whether the manifest carries a valid signature under `secret`.
///
/// Unsigned manifests verify as `false`.
pub fn verify_manifest_signature(manifest: &TilePackageManifest, secret: &str) -> Result<bool> {
    let Some(signature) = manifest.signature.as_deref() else {
        return Ok(false);
    };
    let bytes = manifest_signing_bytes(manifest)?;
    Ok(crypto::verify_hmac(secret.as_bytes(), &bytes, signature))
}

/// Check that a package is listed in the manifest with the same checksum and
/// that its payload matches that checksum.
pub fn verify_against_manifest(manifest: &TilePackageManifest, package: &TilePackage) -> Result<()> {
    let entry = manifest
        .tiles
        .iter()
        .find(|e| e.tile_id == package.tile.tile_id)
        .ok_or_else(|| {
            TideError::InvalidInput(format!("{} is not in the manifest", package.tile.tile_id))
        })?;
    if entry.checksum != package.tile.checksum {
        return Err(TideError::Integrity {
            tile_id: entry.tile_id.clone(),
            expected: entry.checksum.clone(),
            actual: package.tile.checksum.clone(),
        });
    }
    verify_tile_integrity(&package.tile, &package.payload)
}

/// Diff two versions of a tile by constituent name.
pub fn create_delta_patch(old: &TilePackage, new: &TilePackage) -> TilePatch {
    let before: BTreeMap<&str, &ConstituentData> = old
        .tile
        .constituents
        .iter()
        .map(|c| (c.name.as_str(), c))
        .collect();
    let after: BTreeMap<&str, &ConstituentData> = new
        .tile
        .constituents
        .iter()
        .map(|c| (c.name.as_str(), c))
        .collect();

    let mut operations = Vec::new();
    for (name, previous) in &before {
        match after.get(name) {
            None => operations.push(PatchOperation::Remove {
                name: name.to_string(),
            }),
            Some(current) if previous.differs_from(current, PATCH_TOLERANCE) => {
                operations.push(PatchOperation::Replace {
                    from: (*previous).clone(),
                    to: (*current).clone(),
                })
            }
            Some(_) => {}
        }
    }
    for (name, current) in &after {
        if !before.contains_key(name) {
            operations.push(PatchOperation::Add {
                constituent: (*current).clone(),
            });
        }
    }

    TilePatch {
        tile_id: new.tile.tile_id.clone(),
        from_version: old.tile.version.clone(),
        to_version: new.tile.version.clone(),
        operations,
        checksum: new.tile.checksum.clone(),
        payload: new.payload.clone(),
    }
}

/// Apply a patch by restoring its embedded payload. Operations are not replayed.
pub fn apply_patch(patch: &TilePatch) -> Result<TilePackage> {
    let actual = crypto::digest(&patch.payload);
    if actual != patch.checksum {
        return Err(TideError::Integrity {
            tile_id: patch.tile_id.clone(),
            expected: patch.checksum.clone(),
            actual,
        });
    }
    let restored = restore_from_payload(patch.payload.clone())?;
    if restored.tile.tile_id != patch.tile_id || restored.tile.version != patch.to_version {
        return Err(TideError::CorruptPayload(format!(
            "patch payload describes {}@{}, expected {}@{}",
            restored.tile.tile_id, restored.tile.version, patch.tile_id, patch.to_version
        )));
    }
    Ok(restored)
}
