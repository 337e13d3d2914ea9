//! # Prediction Service
//!
//! Entry point for callers: answers level, extreme and graph requests for a
//! location and a local calendar day.
//!
//! ## Data path
//! 1. Validate the location (invalid input is the only hard failure)
//! 2. Look for the location's cell tile in the storage manager, then on the
//!    tile server once, caching what it downloads
//! 3. Synthesize harmonically from one frozen [`DayContext`]
//!
//! Tile-backed synthesis is not implemented yet, so a tile hit still computes
//! harmonically; it only changes the reported `data_source` to `Tile`.
//! Network and storage failures never reach the caller: they are logged and the
//! answer is reported as `Harmonic`. Store transactions run under the same
//! cancel token as downloads and a deadline of their own.
//!
//! ## Statistics
//! Request count, mean response time and cache-hit rate accumulate over the
//! service's lifetime until [`TidePredictionService::reset_stats`].

use crate::harmonic::{DayContext, HarmonicSynthesizer};
use crate::lunar::{MoonPhase, MoonPhaseResolver};
use crate::storage::TileStorageManager;
use crate::store::{MemoryTileStore, TileStore};
use crate::tile::tile_id_for;
use crate::tile_fetch::{with_deadline, CancelToken, TileClient};
use crate::{DataSource, GraphPoint, LocationData, Result, TideError, TideExtreme};
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, Offset, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};
use tokio::sync::Mutex;

/// Graph cadence when a request does not name one.
pub const DEFAULT_GRAPH_INTERVAL_MINUTES: i64 = 30;

/// Deadline for one tile store transaction.
pub const DEFAULT_STORAGE_TIMEOUT: StdDuration = StdDuration::from_secs(5);

/// Indochina Time (UTC+7), the default civil offset for day boundaries.
const DEFAULT_UTC_OFFSET_SECS: i32 = 7 * 3600;

/// Convert an hour offset such as `7.0` or `5.5` into a [`FixedOffset`].
pub fn utc_offset_from_hours(hours: f64) -> Result<FixedOffset> {
    if !hours.is_finite() {
        return Err(TideError::InvalidInput(format!("invalid UTC offset {hours}")));
    }
    FixedOffset::east_opt((hours * 3600.0).round() as i32)
        .ok_or_else(|| TideError::InvalidInput(format!("UTC offset out of range: {hours} h")))
}

/// A request for one local day.
#[derive(Clone, Debug)]
pub struct PredictionRequest {
    pub location: LocationData,
    /// Local calendar day
    pub date: NaiveDate,
    pub include_graph: bool,
    /// Local hours `[start, end)` the graph covers; the whole day when unset
    pub hour_range: Option<(u32, u32)>,
    pub graph_interval_minutes: Option<i64>,
}

impl PredictionRequest {
    pub fn new(location: LocationData, date: NaiveDate) -> Self {
        Self {
            location,
            date,
            include_graph: false,
            hour_range: None,
            graph_interval_minutes: None,
        }
    }

    pub fn with_graph(mut self, hour_range: Option<(u32, u32)>) -> Self {
        self.include_graph = true;
        self.hour_range = hour_range;
        self
    }
}

/// Everything computed for one request, from one astronomical epoch.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionResponse {
    pub location: LocationData,
    pub date: NaiveDate,
    pub extremes: Vec<TideExtreme>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph: Option<Vec<GraphPoint>>,
    pub data_source: DataSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tile_id: Option<String>,
    pub from_cache: bool,
    /// Lowest confidence among the extremes, in percent
    pub confidence: u8,
    /// Wall-clock time spent answering, in milliseconds
    pub response_time_ms: f64,
    /// Julian Day of the epoch every value was computed with
    pub epoch_julian_day: f64,
    pub moon_phase: MoonPhase,
}

/// A value plus where it came from.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Sourced<T> {
    pub value: T,
    pub data_source: DataSource,
    pub from_cache: bool,
    pub epoch_julian_day: f64,
}

/// Running counters since construction or the last reset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStats {
    pub total_requests: u64,
    pub cache_hits: u64,
    pub average_response_ms: f64,
    pub cache_hit_rate: f64,
}

#[derive(Debug, Default)]
struct StatsAccumulator {
    total_requests: u64,
    cache_hits: u64,
    total_response_ms: f64,
}

impl StatsAccumulator {
    fn record(&mut self, elapsed_ms: f64, from_cache: bool) {
        self.total_requests += 1;
        self.total_response_ms += elapsed_ms;
        if from_cache {
            self.cache_hits += 1;
        }
    }

    fn snapshot(&self) -> ServiceStats {
        if self.total_requests == 0 {
            return ServiceStats::default();
        }
        let n = self.total_requests as f64;
        ServiceStats {
            total_requests: self.total_requests,
            cache_hits: self.cache_hits,
            average_response_ms: self.total_response_ms / n,
            cache_hit_rate: self.cache_hits as f64 / n,
        }
    }
}

#[derive(Debug)]
struct TileLookup {
    data_source: DataSource,
    from_cache: bool,
    tile_id: Option<String>,
}

impl TileLookup {
    fn harmonic() -> Self {
        Self {
            data_source: DataSource::Harmonic,
            from_cache: false,
            tile_id: None,
        }
    }
}

/// Tide prediction facade over synthesis, tile storage and tile download.
pub struct TidePredictionService<S: TileStore = MemoryTileStore> {
    synthesizer: HarmonicSynthesizer,
    storage: Option<Arc<TileStorageManager<S>>>,
    client: Option<TileClient>,
    cancel: CancelToken,
    storage_timeout: StdDuration,
    moon: MoonPhaseResolver,
    utc_offset: FixedOffset,
    graph_interval_minutes: i64,
    stats: Mutex<StatsAccumulator>,
}

impl<S: TileStore> TidePredictionService<S> {
    /// Harmonic-only service in Indochina Time.
    pub fn new(synthesizer: HarmonicSynthesizer) -> Self {
        Self {
            synthesizer,
            storage: None,
            client: None,
            cancel: CancelToken::new(),
            storage_timeout: DEFAULT_STORAGE_TIMEOUT,
            moon: MoonPhaseResolver::computed_only(),
            utc_offset: FixedOffset::east_opt(DEFAULT_UTC_OFFSET_SECS).unwrap_or_else(|| Utc.fix()),
            graph_interval_minutes: DEFAULT_GRAPH_INTERVAL_MINUTES,
            stats: Mutex::new(StatsAccumulator::default()),
        }
    }

    pub fn with_storage(mut self, storage: Arc<TileStorageManager<S>>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_client(mut self, client: TileClient) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_storage_timeout(mut self, timeout: StdDuration) -> Self {
        self.storage_timeout = timeout;
        self
    }

    pub fn with_moon_phases(mut self, resolver: MoonPhaseResolver) -> Self {
        self.moon = resolver;
        self
    }

    pub fn with_utc_offset(mut self, offset: FixedOffset) -> Self {
        self.utc_offset = offset;
        self
    }

    pub fn with_graph_interval(mut self, minutes: i64) -> Self {
        self.graph_interval_minutes = minutes.clamp(1, 180);
        self
    }

    pub fn synthesizer(&self) -> &HarmonicSynthesizer {
        &self.synthesizer
    }

    pub fn storage(&self) -> Option<&Arc<TileStorageManager<S>>> {
        self.storage.as_ref()
    }

    /// UTC instant of local midnight starting `date`.
    pub fn day_start(&self, date: NaiveDate) -> Result<DateTime<Utc>> {
        date.and_time(NaiveTime::MIN)
            .and_local_timezone(self.utc_offset)
            .single()
            .map(|local| local.with_timezone(&Utc))
            .ok_or_else(|| TideError::InvalidInput(format!("no local midnight on {date}")))
    }

    /// Water level at local `time` on `date`.
    pub async fn predict_level(
        &self,
        location: &LocationData,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<Sourced<f64>> {
        let started = Instant::now();
        let (context, lookup) = self.prepare(location, date).await?;
        let instant = date
            .and_time(time)
            .and_local_timezone(self.utc_offset)
            .single()
            .map(|local| local.with_timezone(&Utc))
            .ok_or_else(|| TideError::InvalidInput(format!("no local time {time} on {date}")))?;

        let level = context.level_at(instant);
        self.record(started, lookup.from_cache).await;
        Ok(Sourced {
            value: level,
            data_source: lookup.data_source,
            from_cache: lookup.from_cache,
            epoch_julian_day: context.epoch_julian_day(),
        })
    }

    /// High and low water on local day `date`.
    pub async fn find_extremes(
        &self,
        location: &LocationData,
        date: NaiveDate,
    ) -> Result<Sourced<Vec<TideExtreme>>> {
        let started = Instant::now();
        let (context, lookup) = self.prepare(location, date).await?;
        let extremes = context.extremes();
        self.record(started, lookup.from_cache).await;
        Ok(Sourced {
            value: extremes,
            data_source: lookup.data_source,
            from_cache: lookup.from_cache,
            epoch_julian_day: context.epoch_julian_day(),
        })
    }

    /// Extremes plus an optional graph for one local day.
    pub async fn get_predictions(&self, request: &PredictionRequest) -> Result<PredictionResponse> {
        let started = Instant::now();
        let graph_window = if request.include_graph {
            Some(self.graph_window(request)?)
        } else {
            None
        };

        let (context, lookup) = self.prepare(&request.location, request.date).await?;
        let extremes = context.extremes();
        let graph = graph_window.map(|(from, to, step)| {
            // Half-open range: the sample at `to` belongs to the next window
            let mut points = context.series(from, to, step);
            points.retain(|p| p.time < to);
            points
        });
        let confidence = extremes.iter().map(|e| e.confidence).min().unwrap_or(0);

        let response_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.record(started, lookup.from_cache).await;

        tracing::debug!(
            location = %request.location.name,
            date = %request.date,
            source = ?lookup.data_source,
            extremes = extremes.len(),
            response_time_ms,
            "answered prediction request"
        );

        Ok(PredictionResponse {
            location: request.location.clone(),
            date: request.date,
            extremes,
            graph,
            data_source: lookup.data_source,
            tile_id: lookup.tile_id,
            from_cache: lookup.from_cache,
            confidence,
            response_time_ms,
            epoch_julian_day: context.epoch_julian_day(),
            moon_phase: self.moon.resolve(request.date),
        })
    }

    pub async fn stats(&self) -> ServiceStats {
        self.stats.lock().await.snapshot()
    }

    pub async fn reset_stats(&self) {
        *self.stats.lock().await = StatsAccumulator::default();
    }

    async fn record(&self, started: Instant, from_cache: bool) {
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.stats.lock().await.record(elapsed_ms, from_cache);
    }

    /// Validate, look up the tile, and freeze the day's epoch.
    async fn prepare(&self, location: &LocationData, date: NaiveDate) -> Result<(DayContext, TileLookup)> {
        location.validate()?;
        let day_start = self.day_start(date)?;
        let lookup = self.lookup_tile(location).await?;
        let context = self.synthesizer.day_context(day_start, location)?;
        Ok((context, lookup))
    }

    fn graph_window(&self, request: &PredictionRequest) -> Result<(DateTime<Utc>, DateTime<Utc>, Duration)> {
        let (start_hour, end_hour) = request.hour_range.unwrap_or((0, 24));
        if start_hour >= end_hour || end_hour > 24 {
            return Err(TideError::InvalidInput(format!(
                "hour range must satisfy 0 <= start < end <= 24, got {start_hour}..{end_hour}"
            )));
        }
        let interval = request
            .graph_interval_minutes
            .unwrap_or(self.graph_interval_minutes);
        if !(1..=180).contains(&interval) {
            return Err(TideError::InvalidInput(format!(
                "graph interval must be within 1..=180 minutes, got {interval}"
            )));
        }
        let day_start = self.day_start(request.date)?;
        Ok((
            day_start + Duration::hours(start_hour.into()),
            day_start + Duration::hours(end_hour.into()),
            Duration::minutes(interval),
        ))
    }

    async fn lookup_tile(&self, location: &LocationData) -> Result<TileLookup> {
        if self.storage.is_none() && self.client.is_none() {
            return Ok(TileLookup::harmonic());
        }
        let tile_id = tile_id_for(location.lat, location.lon)?;

        if let Some(storage) = &self.storage {
            match with_deadline(storage.get(&tile_id), self.storage_timeout, &self.cancel).await {
                Ok(Some(_)) => {
                    return Ok(TileLookup {
                        data_source: DataSource::Tile,
                        from_cache: true,
                        tile_id: Some(tile_id),
                    });
                }
                Ok(None) => {}
                Err(e) if e.is_recoverable() => {
                    tracing::warn!(%tile_id, error = %e, "tile storage failed, continuing without cache");
                }
                Err(e) => return Err(e),
            }
        }

        let Some(client) = &self.client else {
            return Ok(TileLookup::harmonic());
        };
        match client.fetch(&tile_id, &self.cancel).await {
            Ok(Some(package)) => {
                if let Some(storage) = &self.storage {
                    let stored =
                        with_deadline(storage.put_package(package), self.storage_timeout, &self.cancel)
                            .await;
                    if let Err(e) = stored {
                        tracing::warn!(%tile_id, error = %e, "could not cache downloaded tile");
                    }
                }
                Ok(TileLookup {
                    data_source: DataSource::Tile,
                    from_cache: false,
                    tile_id: Some(tile_id),
                })
            }
            Ok(None) => Ok(TileLookup::harmonic()),
            Err(e) => {
                tracing::warn!(%tile_id, error = %e, "tile fetch failed, falling back to harmonic synthesis");
                Ok(TileLookup::harmonic())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packager::{package_cell, PackageOptions};
    use crate::storage::StorageOptions;
    use crate::ExtremeKind;
    use std::time::Duration as StdDuration;

    fn bangkok() -> LocationData {
        LocationData::new(13.7563, 100.5018, "Bangkok")
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 14).unwrap()
    }

    fn harmonic_only() -> TidePredictionService {
        TidePredictionService::new(HarmonicSynthesizer::new())
    }

    async fn with_cached_bangkok_tile() -> TidePredictionService {
        let storage = Arc::new(TileStorageManager::new(
            MemoryTileStore::new(),
            StorageOptions::default(),
        ));
        let pkg = package_cell(13.7563, 100.5018, &PackageOptions::default()).unwrap();
        storage.put_package(pkg).await.unwrap();
        TidePredictionService::new(HarmonicSynthesizer::new()).with_storage(storage)
    }

    #[tokio::test]
    async fn harmonic_when_no_tile_sources() {
        let service = harmonic_only();
        let level = service
            .predict_level(&bangkok(), date(), NaiveTime::from_hms_opt(12, 0, 0).unwrap())
            .await
            .unwrap();
        assert_eq!(level.data_source, DataSource::Harmonic);
        assert!(!level.from_cache);
        assert!(level.value.is_finite());
    }

    #[tokio::test]
    async fn cached_tile_reports_tile_source() {
        let service = with_cached_bangkok_tile().await;
        let extremes = service.find_extremes(&bangkok(), date()).await.unwrap();
        assert_eq!(extremes.data_source, DataSource::Tile);
        assert!(extremes.from_cache);

        // Tile-backed answers are still computed harmonically
        let plain = harmonic_only().find_extremes(&bangkok(), date()).await.unwrap();
        assert_eq!(extremes.value, plain.value);
    }

    #[tokio::test]
    async fn tile_miss_falls_back_to_harmonic() {
        let service = with_cached_bangkok_tile().await;
        let phuket = LocationData::new(7.8804, 98.3923, "Phuket");
        let response = service
            .get_predictions(&PredictionRequest::new(phuket, date()))
            .await
            .unwrap();
        assert_eq!(response.data_source, DataSource::Harmonic);
        assert!(!response.from_cache);
        assert!(response.tile_id.is_none());
    }

    #[tokio::test]
    async fn unreachable_server_falls_back() {
        // Nothing listens on the discard port of localhost
        let client = TileClient::new("http://127.0.0.1:9", StdDuration::from_secs(2)).unwrap();
        let service = harmonic_only().with_client(client);
        let response = service
            .get_predictions(&PredictionRequest::new(bangkok(), date()))
            .await
            .unwrap();
        assert_eq!(response.data_source, DataSource::Harmonic);
        assert!(!response.extremes.is_empty());
    }

    #[tokio::test]
    async fn cancelled_fetch_falls_back() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let client = TileClient::new("http://127.0.0.1:9", StdDuration::from_secs(2)).unwrap();
        let service = harmonic_only().with_client(client).with_cancel_token(cancel);
        let extremes = service.find_extremes(&bangkok(), date()).await.unwrap();
        assert_eq!(extremes.data_source, DataSource::Harmonic);
    }

    /// Store whose reads never complete.
    #[derive(Default)]
    struct StalledStore {
        inner: MemoryTileStore,
    }

    impl TileStore for StalledStore {
        async fn get(&self, _tile_id: &str) -> Result<Option<crate::tile::TilePackage>> {
            std::future::pending().await
        }

        async fn put(&self, package: &crate::tile::TilePackage) -> Result<()> {
            self.inner.put(package).await
        }

        async fn update_record(&self, tile: &crate::tile::TileData) -> Result<()> {
            self.inner.update_record(tile).await
        }

        async fn delete(&self, tile_id: &str) -> Result<bool> {
            self.inner.delete(tile_id).await
        }

        async fn list_all(&self) -> Result<Vec<crate::tile::TileData>> {
            self.inner.list_all().await
        }

        async fn estimate_usage(&self) -> Result<u64> {
            self.inner.estimate_usage().await
        }

        async fn load_metadata(&self) -> Result<Option<crate::store::StorageMetadata>> {
            self.inner.load_metadata().await
        }

        async fn save_metadata(&self, metadata: &crate::store::StorageMetadata) -> Result<()> {
            self.inner.save_metadata(metadata).await
        }
    }

    fn stalled_storage() -> Arc<TileStorageManager<StalledStore>> {
        Arc::new(TileStorageManager::new(
            StalledStore::default(),
            StorageOptions::default(),
        ))
    }

    #[tokio::test]
    async fn stalled_store_times_out_to_harmonic() {
        let service = TidePredictionService::new(HarmonicSynthesizer::new())
            .with_storage(stalled_storage())
            .with_storage_timeout(StdDuration::from_millis(50));
        let extremes = service.find_extremes(&bangkok(), date()).await.unwrap();
        assert_eq!(extremes.data_source, DataSource::Harmonic);
        assert!(!extremes.value.is_empty());

        // The abandoned read released the tile lock
        let again = service.find_extremes(&bangkok(), date()).await.unwrap();
        assert_eq!(again.data_source, DataSource::Harmonic);
    }

    #[tokio::test]
    async fn cancelled_store_read_falls_back() {
        let cancel = CancelToken::new();
        let service = TidePredictionService::new(HarmonicSynthesizer::new())
            .with_storage(stalled_storage())
            .with_cancel_token(cancel.clone());

        let trigger = tokio::spawn(async move {
            tokio::time::sleep(StdDuration::from_millis(20)).await;
            cancel.cancel();
        });
        let level = service
            .predict_level(&bangkok(), date(), NaiveTime::from_hms_opt(6, 0, 0).unwrap())
            .await
            .unwrap();
        trigger.await.unwrap();
        assert_eq!(level.data_source, DataSource::Harmonic);
    }

    #[tokio::test]
    async fn invalid_location_is_an_error() {
        let service = harmonic_only();
        let err = service
            .find_extremes(&LocationData::new(f64::NAN, 100.0, "nowhere"), date())
            .await
            .unwrap_err();
        assert!(matches!(err, TideError::InvalidInput(_)));
        assert_eq!(service.stats().await.total_requests, 0);
    }

    #[tokio::test]
    async fn graph_is_limited_to_hour_range() {
        let service = harmonic_only();
        let request = PredictionRequest {
            graph_interval_minutes: Some(60),
            ..PredictionRequest::new(bangkok(), date()).with_graph(Some((6, 12)))
        };
        let response = service.get_predictions(&request).await.unwrap();
        let graph = response.graph.unwrap();
        assert_eq!(graph.len(), 6);

        let day_start = service.day_start(date()).unwrap();
        assert_eq!(graph[0].time, day_start + Duration::hours(6));
        assert_eq!(graph[5].time, day_start + Duration::hours(11));
    }

    #[tokio::test]
    async fn bad_hour_range_is_rejected() {
        let service = harmonic_only();
        let request = PredictionRequest::new(bangkok(), date()).with_graph(Some((12, 6)));
        assert!(service.get_predictions(&request).await.is_err());
    }

    #[tokio::test]
    async fn response_shares_one_epoch() {
        let service = harmonic_only();
        let request = PredictionRequest::new(bangkok(), date()).with_graph(None);
        let response = service.get_predictions(&request).await.unwrap();

        let day_start = service.day_start(date()).unwrap();
        let context = service.synthesizer().day_context(day_start, &bangkok()).unwrap();
        assert_eq!(response.epoch_julian_day, context.epoch_julian_day());
        for point in response.graph.as_ref().unwrap() {
            assert_eq!(point.level, context.level_at(point.time));
        }
        for extreme in &response.extremes {
            assert!(extreme.time >= day_start && extreme.time <= context.day_end());
        }
    }

    #[tokio::test]
    async fn day_boundaries_follow_utc_offset() {
        let service = harmonic_only();
        let start = service.day_start(date()).unwrap();
        assert_eq!(start.to_rfc3339(), "2025-03-13T17:00:00+00:00");

        let utc = harmonic_only().with_utc_offset(utc_offset_from_hours(0.0).unwrap());
        assert_eq!(utc.day_start(date()).unwrap().to_rfc3339(), "2025-03-14T00:00:00+00:00");
        assert!(utc_offset_from_hours(30.0).is_err());
    }

    #[tokio::test]
    async fn stats_accumulate_until_reset() {
        let service = with_cached_bangkok_tile().await;
        let phuket = LocationData::new(7.8804, 98.3923, "Phuket");
        service.find_extremes(&bangkok(), date()).await.unwrap();
        service.find_extremes(&bangkok(), date()).await.unwrap();
        service.find_extremes(&phuket, date()).await.unwrap();
        service
            .get_predictions(&PredictionRequest::new(phuket, date()))
            .await
            .unwrap();

        let stats = service.stats().await;
        assert_eq!(stats.total_requests, 4);
        assert_eq!(stats.cache_hits, 2);
        assert_eq!(stats.cache_hit_rate, 0.5);
        assert!(stats.average_response_ms >= 0.0);

        service.reset_stats().await;
        assert_eq!(service.stats().await, ServiceStats::default());
    }

    #[tokio::test]
    async fn response_serializes_for_presentation_layers() {
        let service = harmonic_only();
        let response = service
            .get_predictions(&PredictionRequest::new(bangkok(), date()))
            .await
            .unwrap();
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["dataSource"], "harmonic");
        assert_eq!(json["fromCache"], false);
        assert!(json["moonPhase"]["name"].is_string());
        assert!(json.get("graph").is_none());
        let kinds: Vec<_> = response.extremes.iter().map(|e| e.kind).collect();
        assert!(kinds.contains(&ExtremeKind::High));
        assert!(kinds.contains(&ExtremeKind::Low));
    }
}
