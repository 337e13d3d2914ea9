//! # Tile Storage Manager
//!
//! Quota-aware tile cache: an in-memory hot layer in front of a [`TileStore`].
//!
//! ## Guarantees
//! - A lookup that finds nothing is `Ok(None)`, never an error
//! - A tile whose payload no longer matches its checksum is deleted and reported
//!   as absent
//! - Stored payload bytes never exceed the quota once a call returns
//!
//! ## Concurrency
//! Mutations are serialized per tile id through a table of async mutexes, so a
//! read and a write of the same tile never interleave, while unrelated ids
//! proceed concurrently. Size accounting sits behind one more mutex; eviction
//! only `try_lock`s its victims and skips tiles that are busy.

use crate::error::{Result, TideError};
use crate::packager::verify_tile_integrity;
use crate::store::{StorageMetadata, TileStore};
use crate::tile::{is_valid_tile_id, TileData, TilePackage};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// Default quota: 50 MiB.
pub const DEFAULT_QUOTA_BYTES: u64 = 50 * 1024 * 1024;

/// Tiles untouched for this many days are expired.
pub const DEFAULT_MAX_AGE_DAYS: i64 = 30;

#[derive(Clone, Debug)]
pub struct StorageOptions {
    pub quota_bytes: u64,
    pub max_age: Duration,
    /// Re-check the checksum on every read
    pub verify_on_read: bool,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            quota_bytes: DEFAULT_QUOTA_BYTES,
            max_age: Duration::days(DEFAULT_MAX_AGE_DAYS),
            verify_on_read: true,
        }
    }
}

/// Outcome of an eviction or cleanup pass.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvictionReport {
    pub evicted: Vec<String>,
    pub bytes_reclaimed: u64,
    /// Victims skipped because another task held their lock
    pub skipped_busy: usize,
}

impl EvictionReport {
    fn merge(&mut self, other: EvictionReport) {
        self.evicted.extend(other.evicted);
        self.bytes_reclaimed += other.bytes_reclaimed;
        self.skipped_busy += other.skipped_busy;
    }
}

/// Snapshot of cache occupancy.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageUsage {
    pub used_bytes: u64,
    pub quota_bytes: u64,
    pub tile_count: u64,
    /// `used_bytes / quota_bytes`
    pub usage: f64,
}

#[derive(Debug, Default)]
struct Accounting {
    loaded: bool,
    /// Payload size per stored tile id
    sizes: HashMap<String, u64>,
    quota: u64,
    last_cleanup: Option<DateTime<Utc>>,
}

impl Accounting {
    fn total(&self) -> u64 {
        self.sizes.values().sum()
    }

    fn metadata(&self) -> StorageMetadata {
        let total_size = self.total();
        StorageMetadata {
            total_size,
            tile_count: self.sizes.len() as u64,
            last_cleanup: self.last_cleanup,
            quota: self.quota,
            usage: ratio(total_size, self.quota),
        }
    }
}

fn ratio(used: u64, quota: u64) -> f64 {
    if quota == 0 {
        0.0
    } else {
        used as f64 / quota as f64
    }
}

/// One shared tile cache. The host owns an instance and hands out `Arc`s.
pub struct TileStorageManager<S: TileStore> {
    store: S,
    options: StorageOptions,
    hot: RwLock<HashMap<String, TilePackage>>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    accounting: Mutex<Accounting>,
}

impl<S: TileStore> TileStorageManager<S> {
    pub fn new(store: S, options: StorageOptions) -> Self {
        let accounting = Accounting {
            quota: options.quota_bytes,
            ..Accounting::default()
        };
        Self {
            store,
            options,
            hot: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            accounting: Mutex::new(accounting),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Load the size index from the store and drop expired tiles.
    ///
    /// Calling this is optional; every operation loads the index on first use.
    pub async fn init(&self) -> Result<EvictionReport> {
        {
            let mut acc = self.accounting.lock().await;
            self.ensure_loaded(&mut acc).await?;
        }
        let report = self.cleanup_expired().await?;
        tracing::info!(
            evicted = report.evicted.len(),
            reclaimed = report.bytes_reclaimed,
            "tile storage ready"
        );
        Ok(report)
    }

    /// Persist metadata and drop in-memory state.
    pub async fn close(&self) -> Result<()> {
        let mut acc = self.accounting.lock().await;
        if acc.loaded {
            self.store.save_metadata(&acc.metadata()).await?;
        }
        acc.loaded = false;
        acc.sizes.clear();
        self.hot.write().await.clear();
        // Locks still held elsewhere must stay the one lock for their id
        self.locks
            .lock()
            .await
            .retain(|_, lock| Arc::strong_count(lock) > 1);
        tracing::debug!("tile storage closed");
        Ok(())
    }

    /// Look up a tile. Absent and corrupt tiles both come back as `None`.
    ///
    /// With `verify_on_read` the persisted copy is always re-read and checked,
    /// so damage to the store is caught even while the tile sits in the hot layer.
    pub async fn get(&self, tile_id: &str) -> Result<Option<TilePackage>> {
        if !is_valid_tile_id(tile_id) {
            return Ok(None);
        }
        let _guard = self.key_lock(tile_id).await.lock_owned().await;

        let cached = if self.options.verify_on_read {
            None
        } else {
            self.hot.read().await.get(tile_id).cloned()
        };
        let (mut package, from_hot) = match cached {
            Some(package) => (package, true),
            None => match self.store.get(tile_id).await {
                Ok(Some(package)) => (package, false),
                Ok(None) => {
                    tracing::debug!(tile_id, "tile cache miss");
                    return Ok(None);
                }
                Err(e) if e.is_integrity_failure() => {
                    self.discard_corrupt(tile_id, &e).await?;
                    return Ok(None);
                }
                Err(e) => return Err(e),
            },
        };

        if self.options.verify_on_read {
            if let Err(e) = verify_tile_integrity(&package.tile, &package.payload) {
                self.discard_corrupt(tile_id, &e).await?;
                return Ok(None);
            }
        }

        package.tile.last_accessed_at = Utc::now();
        package.tile.access_count += 1;
        self.store.update_record(&package.tile).await?;
        self.hot
            .write()
            .await
            .insert(tile_id.to_string(), package.clone());

        tracing::debug!(tile_id, from_hot, "tile cache hit");
        Ok(Some(package))
    }

    /// Store a tile, evicting least-recently-used tiles first if needed.
    pub async fn put(
        &self,
        tile_id: &str,
        mut tile: TileData,
        payload: Vec<u8>,
    ) -> Result<EvictionReport> {
        if !is_valid_tile_id(tile_id) || tile.tile_id != tile_id {
            return Err(TideError::InvalidInput(format!(
                "tile id {tile_id:?} does not match record {:?}",
                tile.tile_id
            )));
        }
        verify_tile_integrity(&tile, &payload)?;

        let size = payload.len() as u64;
        let _guard = self.key_lock(tile_id).await.lock_owned().await;
        let mut acc = self.accounting.lock().await;
        self.ensure_loaded(&mut acc).await?;

        if size > acc.quota {
            return Err(TideError::StorageCapacity {
                required: size,
                quota: acc.quota,
            });
        }

        let mut report = EvictionReport::default();
        let replaced = acc.sizes.get(tile_id).copied().unwrap_or(0);
        let projected = acc.total() - replaced + size;
        if projected > acc.quota {
            let needed = projected - acc.quota;
            report = self.evict(&mut acc, needed, Some(tile_id)).await?;
            let available = acc.quota.saturating_sub(acc.total() - replaced);
            if size > available {
                tracing::warn!(tile_id, size, available, "eviction could not free enough space");
                return Err(TideError::StorageCapacity {
                    required: size,
                    quota: available,
                });
            }
        }

        tile.compressed_size = size;
        tile.last_accessed_at = Utc::now();
        let package = TilePackage { tile, payload };
        self.store.put(&package).await?;
        acc.sizes.insert(tile_id.to_string(), size);
        self.hot.write().await.insert(tile_id.to_string(), package);
        self.store.save_metadata(&acc.metadata()).await?;

        tracing::debug!(
            tile_id,
            size,
            evicted = report.evicted.len(),
            reclaimed = report.bytes_reclaimed,
            "stored tile"
        );
        Ok(report)
    }

    /// Store a whole package.
    pub async fn put_package(&self, package: TilePackage) -> Result<EvictionReport> {
        let tile_id = package.tile.tile_id.clone();
        self.put(&tile_id, package.tile, package.payload).await
    }

    /// Remove a tile. Returns whether it existed.
    pub async fn delete(&self, tile_id: &str) -> Result<bool> {
        if !is_valid_tile_id(tile_id) {
            return Ok(false);
        }
        let _guard = self.key_lock(tile_id).await.lock_owned().await;
        let mut acc = self.accounting.lock().await;
        self.ensure_loaded(&mut acc).await?;
        let removed = self.remove_locked(&mut acc, tile_id).await?;
        if removed {
            self.store.save_metadata(&acc.metadata()).await?;
        }
        Ok(removed)
    }

    /// Remove every tile.
    pub async fn clear(&self) -> Result<()> {
        let mut acc = self.accounting.lock().await;
        self.ensure_loaded(&mut acc).await?;
        for tile in self.store.list_all().await? {
            self.store.delete(&tile.tile_id).await?;
        }
        acc.sizes.clear();
        self.hot.write().await.clear();
        self.store.save_metadata(&acc.metadata()).await?;
        tracing::info!("tile storage cleared");
        Ok(())
    }

    /// Delete every tile not accessed within the maximum age.
    pub async fn cleanup_expired(&self) -> Result<EvictionReport> {
        let mut acc = self.accounting.lock().await;
        self.ensure_loaded(&mut acc).await?;
        let cutoff = Utc::now() - self.options.max_age;

        let mut report = EvictionReport::default();
        for tile in self.candidates().await? {
            if tile.last_accessed_at >= cutoff {
                continue;
            }
            report.merge(self.try_evict(&mut acc, &tile.tile_id).await?);
        }
        acc.last_cleanup = Some(Utc::now());
        self.store.save_metadata(&acc.metadata()).await?;

        if !report.evicted.is_empty() {
            tracing::info!(
                evicted = report.evicted.len(),
                reclaimed = report.bytes_reclaimed,
                "removed expired tiles"
            );
        }
        Ok(report)
    }

    pub async fn usage(&self) -> Result<StorageUsage> {
        let mut acc = self.accounting.lock().await;
        self.ensure_loaded(&mut acc).await?;
        let used_bytes = acc.total();
        Ok(StorageUsage {
            used_bytes,
            quota_bytes: acc.quota,
            tile_count: acc.sizes.len() as u64,
            usage: ratio(used_bytes, acc.quota),
        })
    }

    /// Change the quota, evicting immediately if usage now exceeds it.
    pub async fn set_quota(&self, quota_bytes: u64) -> Result<EvictionReport> {
        let mut acc = self.accounting.lock().await;
        self.ensure_loaded(&mut acc).await?;
        acc.quota = quota_bytes;
        let total = acc.total();
        let report = if total > quota_bytes {
            self.evict(&mut acc, total - quota_bytes, None).await?
        } else {
            EvictionReport::default()
        };
        self.store.save_metadata(&acc.metadata()).await?;
        Ok(report)
    }

    /// Drop the in-memory layer; the next read goes to the store.
    pub async fn clear_hot_layer(&self) {
        self.hot.write().await.clear();
    }

    async fn ensure_loaded(&self, acc: &mut Accounting) -> Result<()> {
        if acc.loaded {
            return Ok(());
        }
        acc.sizes = self
            .store
            .list_all()
            .await?
            .into_iter()
            .map(|t| (t.tile_id, t.compressed_size))
            .collect();
        if let Some(meta) = self.store.load_metadata().await? {
            acc.last_cleanup = meta.last_cleanup;
        }
        acc.loaded = true;
        tracing::debug!(tiles = acc.sizes.len(), bytes = acc.total(), "loaded tile index");
        Ok(())
    }

    async fn key_lock(&self, tile_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .await
            .entry(tile_id.to_string())
            .or_default()
            .clone()
    }

    /// Store records overlaid with the fresher hot-layer copies, oldest access first.
    async fn candidates(&self) -> Result<Vec<TileData>> {
        let mut by_id: HashMap<String, TileData> = self
            .store
            .list_all()
            .await?
            .into_iter()
            .map(|t| (t.tile_id.clone(), t))
            .collect();
        for (id, package) in self.hot.read().await.iter() {
            by_id.insert(id.clone(), package.tile.clone());
        }
        let mut tiles: Vec<TileData> = by_id.into_values().collect();
        tiles.sort_by(|a, b| {
            a.last_accessed_at
                .cmp(&b.last_accessed_at)
                .then(a.access_count.cmp(&b.access_count))
        });
        Ok(tiles)
    }

    /// Free at least `needed` bytes, oldest first, plus anything expired.
    async fn evict(
        &self,
        acc: &mut Accounting,
        needed: u64,
        keep: Option<&str>,
    ) -> Result<EvictionReport> {
        let cutoff = Utc::now() - self.options.max_age;
        let mut report = EvictionReport::default();

        for tile in self.candidates().await? {
            if Some(tile.tile_id.as_str()) == keep {
                continue;
            }
            let expired = tile.last_accessed_at < cutoff;
            if report.bytes_reclaimed >= needed && !expired {
                break;
            }
            report.merge(self.try_evict(acc, &tile.tile_id).await?);
        }

        tracing::info!(
            needed,
            evicted = report.evicted.len(),
            reclaimed = report.bytes_reclaimed,
            skipped = report.skipped_busy,
            "evicted tiles"
        );
        Ok(report)
    }

    async fn try_evict(&self, acc: &mut Accounting, tile_id: &str) -> Result<EvictionReport> {
        let lock = self.key_lock(tile_id).await;
        let guard: OwnedMutexGuard<()> = match lock.try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::debug!(tile_id, "skipping busy tile during eviction");
                return Ok(EvictionReport {
                    skipped_busy: 1,
                    ..EvictionReport::default()
                });
            }
        };
        let size = acc.sizes.get(tile_id).copied().unwrap_or(0);
        let removed = self.remove_locked(acc, tile_id).await?;
        drop(guard);

        let mut report = EvictionReport::default();
        if removed {
            report.evicted.push(tile_id.to_string());
            report.bytes_reclaimed = size;
        }
        Ok(report)
    }

    /// Caller holds the tile's key lock and the accounting lock.
    async fn remove_locked(&self, acc: &mut Accounting, tile_id: &str) -> Result<bool> {
        let removed = self.store.delete(tile_id).await?;
        let indexed = acc.sizes.remove(tile_id).is_some();
        let cached = self.hot.write().await.remove(tile_id).is_some();
        Ok(removed || indexed || cached)
    }

    async fn discard_corrupt(&self, tile_id: &str, error: &TideError) -> Result<()> {
        tracing::warn!(tile_id, error = %error, "discarding corrupt tile");
        let mut acc = self.accounting.lock().await;
        self.ensure_loaded(&mut acc).await?;
        self.remove_locked(&mut acc, tile_id).await?;
        self.store.save_metadata(&acc.metadata()).await
    }
}
