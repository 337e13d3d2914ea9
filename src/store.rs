//! # Persistent Tile Stores
//!
//! The storage manager talks to durable storage through the small [`TileStore`]
//! trait. Two logical tables sit behind it:
//!
//! - **tiles**: keyed by tile id, holding the [`TileData`] record and the raw
//!   compressed payload
//! - **metadata**: a singleton [`StorageMetadata`] record
//!
//! Backends:
//! - [`MemoryTileStore`]: process-local, for tests and ephemeral hosts
//! - [`FileTileStore`]: one JSON record plus one raw payload file per tile
//!
//! Stores do not verify checksums or enforce quotas; that is the manager's job.

use crate::error::{Result, TideError};
use crate::tile::{is_valid_tile_id, TileData, TilePackage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// Singleton bookkeeping record of a tile cache.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageMetadata {
    pub total_size: u64,
    pub tile_count: u64,
    pub last_cleanup: Option<DateTime<Utc>>,
    pub quota: u64,
    /// `total_size / quota`
    pub usage: f64,
}

impl StorageMetadata {
    pub fn empty(quota: u64) -> Self {
        Self {
            total_size: 0,
            tile_count: 0,
            last_cleanup: None,
            quota,
            usage: 0.0,
        }
    }
}

/// Durable key/value storage for packaged tiles.
///
/// Absence is not an error: lookups of unknown ids return `Ok(None)`.
pub trait TileStore: Send + Sync + 'static {
    fn get(&self, tile_id: &str) -> impl Future<Output = Result<Option<TilePackage>>> + Send;

    fn put(&self, package: &TilePackage) -> impl Future<Output = Result<()>> + Send;

    /// Rewrite only the record of an existing tile (access bookkeeping).
    fn update_record(&self, tile: &TileData) -> impl Future<Output = Result<()>> + Send;

    /// Returns whether anything was removed.
    fn delete(&self, tile_id: &str) -> impl Future<Output = Result<bool>> + Send;

    fn list_all(&self) -> impl Future<Output = Result<Vec<TileData>>> + Send;

    /// Bytes of payload currently held.
    fn estimate_usage(&self) -> impl Future<Output = Result<u64>> + Send;

    fn load_metadata(&self) -> impl Future<Output = Result<Option<StorageMetadata>>> + Send;

    fn save_metadata(&self, metadata: &StorageMetadata) -> impl Future<Output = Result<()>> + Send;
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryTileStore {
    tiles: RwLock<HashMap<String, TilePackage>>,
    metadata: RwLock<Option<StorageMetadata>>,
}

impl MemoryTileStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TileStore for MemoryTileStore {
    async fn get(&self, tile_id: &str) -> Result<Option<TilePackage>> {
        Ok(self.tiles.read().await.get(tile_id).cloned())
    }

    async fn put(&self, package: &TilePackage) -> Result<()> {
        self.tiles
            .write()
            .await
            .insert(package.tile.tile_id.clone(), package.clone());
        Ok(())
    }

    async fn update_record(&self, tile: &TileData) -> Result<()> {
        if let Some(existing) = self.tiles.write().await.get_mut(&tile.tile_id) {
            existing.tile = tile.clone();
        }
        Ok(())
    }

    async fn delete(&self, tile_id: &str) -> Result<bool> {
        Ok(self.tiles.write().await.remove(tile_id).is_some())
    }

    async fn list_all(&self) -> Result<Vec<TileData>> {
        Ok(self
            .tiles
            .read()
            .await
            .values()
            .map(|p| p.tile.clone())
            .collect())
    }

    async fn estimate_usage(&self) -> Result<u64> {
        Ok(self
            .tiles
            .read()
            .await
            .values()
            .map(TilePackage::stored_size)
            .sum())
    }

    async fn load_metadata(&self) -> Result<Option<StorageMetadata>> {
        Ok(self.metadata.read().await.clone())
    }

    async fn save_metadata(&self, metadata: &StorageMetadata) -> Result<()> {
        *self.metadata.write().await = Some(metadata.clone());
        Ok(())
    }
}

/// Filesystem store rooted at a directory.
///
/// ```text
/// {root}/
/// ├── metadata.json
/// └── tiles/
///     ├── cell_13_100.json   # TileData
///     └── cell_13_100.bin    # compressed payload
/// ```
#[derive(Debug, Clone)]
pub struct FileTileStore {
    root: PathBuf,
}

impl FileTileStore {
    /// Open (and create if needed) a store under `root`.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(root.join("tiles")).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, tile_id: &str) -> Result<PathBuf> {
        Ok(self.root.join("tiles").join(format!("{}.json", checked_id(tile_id)?)))
    }

    fn payload_path(&self, tile_id: &str) -> Result<PathBuf> {
        Ok(self.root.join("tiles").join(format!("{}.bin", checked_id(tile_id)?)))
    }

    fn metadata_path(&self) -> PathBuf {
        self.root.join("metadata.json")
    }
}

fn checked_id(tile_id: &str) -> Result<&str> {
    if is_valid_tile_id(tile_id) {
        Ok(tile_id)
    } else {
        Err(TideError::InvalidInput(format!("invalid tile id {tile_id:?}")))
    }
}

/// Write through a temporary sibling and rename, so readers never see a torn file.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn remove_optional(path: &Path) -> Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

impl TileStore for FileTileStore {
    async fn get(&self, tile_id: &str) -> Result<Option<TilePackage>> {
        let Some(record) = read_optional(&self.record_path(tile_id)?).await? else {
            return Ok(None);
        };
        let tile: TileData = serde_json::from_slice(&record)
            .map_err(|e| TideError::CorruptPayload(format!("unreadable record for {tile_id}: {e}")))?;
        let payload = read_optional(&self.payload_path(tile_id)?)
            .await?
            .ok_or_else(|| TideError::CorruptPayload(format!("payload missing for {tile_id}")))?;
        Ok(Some(TilePackage { tile, payload }))
    }

    async fn put(&self, package: &TilePackage) -> Result<()> {
        let tile_id = package.tile.tile_id.as_str();
        // Payload first: a record never points at a payload that is not there yet
        write_atomic(&self.payload_path(tile_id)?, &package.payload).await?;
        write_atomic(&self.record_path(tile_id)?, &serde_json::to_vec(&package.tile)?).await
    }

    async fn update_record(&self, tile: &TileData) -> Result<()> {
        let path = self.record_path(&tile.tile_id)?;
        if tokio::fs::try_exists(&path).await? {
            write_atomic(&path, &serde_json::to_vec(tile)?).await?;
        }
        Ok(())
    }

    async fn delete(&self, tile_id: &str) -> Result<bool> {
        let record = remove_optional(&self.record_path(tile_id)?).await?;
        let payload = remove_optional(&self.payload_path(tile_id)?).await?;
        Ok(record || payload)
    }

    async fn list_all(&self) -> Result<Vec<TileData>> {
        let mut tiles = Vec::new();
        let mut entries = tokio::fs::read_dir(self.root.join("tiles")).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<TileData>(&bytes) {
                Ok(tile) => tiles.push(tile),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable tile record"),
            }
        }
        Ok(tiles)
    }

    async fn estimate_usage(&self) -> Result<u64> {
        let mut total = 0;
        let mut entries = tokio::fs::read_dir(self.root.join("tiles")).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("bin") {
                total += entry.metadata().await?.len();
            }
        }
        Ok(total)
    }

    /// A damaged metadata file reads as absent; the manager rebuilds it from the tiles.
    async fn load_metadata(&self) -> Result<Option<StorageMetadata>> {
        let Some(bytes) = read_optional(&self.metadata_path()).await? else {
            return Ok(None);
        };
        match serde_json::from_slice(&bytes) {
            Ok(metadata) => Ok(Some(metadata)),
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unreadable storage metadata");
                Ok(None)
            }
        }
    }

    async fn save_metadata(&self, metadata: &StorageMetadata) -> Result<()> {
        write_atomic(&self.metadata_path(), &serde_json::to_vec_pretty(metadata)?).await
    }
}
