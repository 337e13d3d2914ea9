//! # Harmonic Synthesizer
//!
//! Sums the regional constituents into a water level and sweeps a day for high
//! and low water.
//!
//! ## Level synthesis
//! For every constituent with a non-zero regional amplitude `H`:
//!
//! ```text
//! phase  = (speed · hours_since_epoch + phase_lag + u) mod 360
//! level += H · f · cos(phase)
//! ```
//!
//! starting from the region's mean sea level. The result is clamped to
//! `[MLW − 0.5 m, MHW + 0.5 m]` as a physical sanity bound.
//!
//! ## Epochs
//! Astronomical arguments and nodal factors are computed once per day (at
//! local noon of the requested day) and frozen in a [`DayContext`]. Every level,
//! extreme and graph point derived from one context shares that epoch, so a
//! response can never mix two sets of corrections.
//!
//! ## Extreme detection
//! The day is sampled every 15 minutes. A sign change of the first difference
//! marks a turning sample; a three-point parabola through its neighbours refines
//! time and level. Flat days with no turning point still yield one synthetic
//! high and one synthetic low at the regional mean high/low water.
//!
//! The synthesizer holds no mutable state and is safe to share across tasks.

use crate::constituents::{ConstituentDatabase, Region, RegionalDatum};
use crate::ephemerides::{self, AstronomicalArguments};
use crate::error::Result;
use crate::nodal::NodalCorrection;
use crate::{ExtremeKind, GraphPoint, LocationData, TideExtreme};
use chrono::{DateTime, Duration, Utc};

/// Reference instant for constituent phases: 2000-01-01T00:00:00Z.
const HARMONIC_EPOCH_MILLIS: i64 = 946_684_800_000;

/// Default sweep cadence for extreme detection.
pub const SAMPLE_INTERVAL_MINUTES: i64 = 15;

/// Confidence attached to extremes found by sampling the harmonic model.
pub const HARMONIC_CONFIDENCE: u8 = 85;

/// Confidence attached to synthetic extremes on flat days.
pub const SYNTHETIC_CONFIDENCE: u8 = 40;

/// Margin beyond mean high/low water the clamp allows, in metres.
const CLAMP_MARGIN_M: f64 = 0.5;

/// Level differences below this are treated as flat.
const FLAT_EPSILON_M: f64 = 1e-9;

#[derive(Clone, Copy, Debug)]
struct ActiveTerm {
    name: &'static str,
    speed: f64,
    amplitude: f64,
    phase_lag: f64,
    correction: NodalCorrection,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Trend {
    Rising,
    Falling,
}

/// Frozen astronomy and constituent set for one location and one day.
#[derive(Clone, Debug)]
pub struct DayContext {
    location: LocationData,
    region: Region,
    datum: RegionalDatum,
    day_start: DateTime<Utc>,
    args: AstronomicalArguments,
    terms: Vec<ActiveTerm>,
    sample_interval: Duration,
}

impl DayContext {
    pub fn location(&self) -> &LocationData {
        &self.location
    }

    pub fn region(&self) -> Region {
        self.region
    }

    pub fn datum(&self) -> RegionalDatum {
        self.datum
    }

    pub fn day_start(&self) -> DateTime<Utc> {
        self.day_start
    }

    pub fn day_end(&self) -> DateTime<Utc> {
        self.day_start + Duration::hours(24)
    }

    /// Astronomical arguments every value from this context was computed with.
    pub fn arguments(&self) -> &AstronomicalArguments {
        &self.args
    }

    /// Julian Day identifying the epoch of this context.
    pub fn epoch_julian_day(&self) -> f64 {
        self.args.julian_day
    }

    /// Number of constituents contributing to the level.
    pub fn active_constituents(&self) -> usize {
        self.terms.len()
    }

    /// Predicted water level at `instant`, metres above chart datum.
    pub fn level_at(&self, instant: DateTime<Utc>) -> f64 {
        let hours = hours_since_epoch(instant);
        let raw = self.terms.iter().fold(self.datum.mean_sea_level, |level, term| {
            let phase = ephemerides::normalize_degrees(
                term.speed * hours + term.phase_lag + term.correction.u,
            );
            level + term.amplitude * term.correction.f * phase.to_radians().cos()
        });
        raw.clamp(
            self.datum.mean_low_water - CLAMP_MARGIN_M,
            self.datum.mean_high_water + CLAMP_MARGIN_M,
        )
    }

    /// Levels from `from` to `to` inclusive, every `step`.
    pub fn series(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        step: Duration,
    ) -> Vec<GraphPoint> {
        if step <= Duration::zero() || to < from {
            return Vec::new();
        }
        let mut points = Vec::new();
        let mut time = from;
        while time <= to {
            points.push(GraphPoint {
                time,
                level: self.level_at(time),
            });
            time += step;
        }
        points
    }

    /// High and low water events over the 24 hours from `day_start`.
    pub fn extremes(&self) -> Vec<TideExtreme> {
        let samples = self.series(self.day_start, self.day_end(), self.sample_interval);
        let mut extremes = detect_turning_points(&samples, self.sample_interval);

        if extremes.is_empty() {
            tracing::debug!(
                location = %self.location.name,
                region = %self.region,
                "no turning point found, emitting synthetic extremes"
            );
            extremes = self.synthetic_extremes(&samples);
        }
        extremes
    }

    fn synthetic_extremes(&self, samples: &[GraphPoint]) -> Vec<TideExtreme> {
        let by_level = |a: &&GraphPoint, b: &&GraphPoint| a.level.total_cmp(&b.level);
        let high_time = samples
            .iter()
            .max_by(by_level)
            .map(|p| p.time)
            .unwrap_or(self.day_start);
        let low_time = samples
            .iter()
            .min_by(by_level)
            .map(|p| p.time)
            .unwrap_or(self.day_start + Duration::hours(12));

        let mut extremes = vec![
            TideExtreme {
                time: high_time,
                level: self.datum.mean_high_water,
                kind: ExtremeKind::High,
                confidence: SYNTHETIC_CONFIDENCE,
            },
            TideExtreme {
                time: low_time,
                level: self.datum.mean_low_water,
                kind: ExtremeKind::Low,
                confidence: SYNTHETIC_CONFIDENCE,
            },
        ];
        extremes.sort_by_key(|e| e.time);
        extremes
    }
}

/// Stateless level and extreme calculator over the constituent catalogue.
#[derive(Clone, Copy, Debug)]
pub struct HarmonicSynthesizer {
    database: &'static ConstituentDatabase,
    sample_interval_minutes: i64,
}

impl Default for HarmonicSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

impl HarmonicSynthesizer {
    pub fn new() -> Self {
        Self {
            database: ConstituentDatabase::standard(),
            sample_interval_minutes: SAMPLE_INTERVAL_MINUTES,
        }
    }

    /// Override the extreme-detection cadence (clamped to 1..=60 minutes).
    pub fn with_sample_interval(mut self, minutes: i64) -> Self {
        self.sample_interval_minutes = minutes.clamp(1, 60);
        self
    }

    pub fn sample_interval_minutes(&self) -> i64 {
        self.sample_interval_minutes
    }

    /// Freeze astronomy and regional constituents for the day starting at `day_start`.
    pub fn day_context(
        &self,
        day_start: DateTime<Utc>,
        location: &LocationData,
    ) -> Result<DayContext> {
        location.validate()?;

        let region = Region::classify(location.lat, location.lon);
        let args = ephemerides::astronomical_arguments(day_start + Duration::hours(12), location.lon)?;

        let terms: Vec<ActiveTerm> = self
            .database
            .all()
            .iter()
            .filter_map(|c| {
                let cal = c.calibration(region);
                (cal.amplitude > 0.0).then(|| ActiveTerm {
                    name: c.name,
                    speed: c.speed,
                    amplitude: cal.amplitude,
                    phase_lag: cal.phase,
                    correction: c.nodal.evaluate(&args),
                })
            })
            .collect();

        tracing::trace!(
            location = %location.name,
            region = %region,
            constituents = terms.len(),
            "prepared day context"
        );

        Ok(DayContext {
            location: location.clone(),
            region,
            datum: region.datum(),
            day_start,
            args,
            terms,
            sample_interval: Duration::minutes(self.sample_interval_minutes),
        })
    }

    /// Water level at `time` using the epoch of the day starting at `day_start`.
    pub fn predict_level(
        &self,
        day_start: DateTime<Utc>,
        location: &LocationData,
        time: DateTime<Utc>,
    ) -> Result<f64> {
        Ok(self.day_context(day_start, location)?.level_at(time))
    }

    /// High and low water for the 24 hours from `day_start`. Never empty.
    pub fn find_extremes(
        &self,
        day_start: DateTime<Utc>,
        location: &LocationData,
    ) -> Result<Vec<TideExtreme>> {
        Ok(self.day_context(day_start, location)?.extremes())
    }

    /// Contribution of each constituent at `time`, largest first. Diagnostic only.
    pub fn contributions(
        &self,
        context: &DayContext,
        time: DateTime<Utc>,
    ) -> Vec<(&'static str, f64)> {
        let hours = hours_since_epoch(time);
        let mut parts: Vec<_> = context
            .terms
            .iter()
            .map(|term| {
                let phase = ephemerides::normalize_degrees(
                    term.speed * hours + term.phase_lag + term.correction.u,
                );
                (
                    term.name,
                    term.amplitude * term.correction.f * phase.to_radians().cos(),
                )
            })
            .collect();
        parts.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()));
        parts
    }
}

fn hours_since_epoch(instant: DateTime<Utc>) -> f64 {
    (instant.timestamp_millis() - HARMONIC_EPOCH_MILLIS) as f64 / 3_600_000.0
}

fn detect_turning_points(samples: &[GraphPoint], interval: Duration) -> Vec<TideExtreme> {
    let mut extremes = Vec::new();
    let mut previous: Option<Trend> = None;

    for i in 1..samples.len() {
        let diff = samples[i].level - samples[i - 1].level;
        let trend = if diff > FLAT_EPSILON_M {
            Trend::Rising
        } else if diff < -FLAT_EPSILON_M {
            Trend::Falling
        } else {
            continue;
        };

        if let Some(before) = previous {
            if before != trend {
                let kind = match before {
                    Trend::Rising => ExtremeKind::High,
                    Trend::Falling => ExtremeKind::Low,
                };
                extremes.push(refine(samples, i - 1, kind, interval));
            }
        }
        previous = Some(trend);
    }
    extremes
}

/// Fit a parabola through the turning sample and its neighbours.
fn refine(samples: &[GraphPoint], idx: usize, kind: ExtremeKind, interval: Duration) -> TideExtreme {
    let turning = samples[idx];
    let mut extreme = TideExtreme {
        time: turning.time,
        level: turning.level,
        kind,
        confidence: HARMONIC_CONFIDENCE,
    };
    if idx == 0 || idx + 1 >= samples.len() {
        return extreme;
    }

    let (y0, y1, y2) = (samples[idx - 1].level, turning.level, samples[idx + 1].level);
    let curvature = y0 - 2.0 * y1 + y2;
    if curvature.abs() < FLAT_EPSILON_M {
        return extreme;
    }
    let offset = (y0 - y2) / (2.0 * curvature);
    if offset.abs() > 1.0 {
        return extreme;
    }

    let vertex = y1 - (y0 - y2) * offset / 4.0;
    let keeps_kind = match kind {
        ExtremeKind::High => vertex >= y1,
        ExtremeKind::Low => vertex <= y1,
    };
    if keeps_kind {
        let shift_ms = (offset * interval.num_milliseconds() as f64).round() as i64;
        extreme.time = turning.time + Duration::milliseconds(shift_ms);
        extreme.level = vertex;
    }
    extreme
}
