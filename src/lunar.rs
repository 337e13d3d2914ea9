//! Moon phase for a calendar day.
//!
//! [`MoonPhaseResolver`] prefers an injected table of authoritative phases (for
//! instance one published by a national observatory) and falls back to
//! Schaefer's low-precision lunar ephemeris (Sky & Telescope, Mar 1985 / Apr
//! 1994) for days the table does not cover.
//! Accuracy of the fallback: ±1 day for the phase index; a few degrees for λ, β;
//! ~6 % for distance.

use chrono::{Datelike, NaiveDate};
use core::f64::consts::PI;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Mean synodic month in days.
const SYNODIC_MONTH: f64 = 29.530_588_2;

const PHASE_NAMES: [&str; 8] = [
    "New Moon",
    "Waxing Crescent",
    "First Quarter",
    "Waxing Gibbous",
    "Full Moon",
    "Waning Gibbous",
    "Last Quarter",
    "Waning Crescent",
];

/// Everything Schaefer's 1994 routine computes.
#[derive(Debug, Clone, Copy)]
pub struct LunarEphemeris {
    /// Phase index 0 – 7 (0 = new, 4 = full).
    pub phase_index: u8,
    /// Age of the Moon in civil days since New.
    pub age_days: f64,
    /// Illuminated fraction (0–1).
    pub illum_frac: f64,
    /// Geocentric distance in Earth radii.
    pub distance_er: f64,
    /// Ecliptic longitude (deg, low precision).
    pub lon_deg: f64,
    /// Ecliptic latitude (deg, low precision).
    pub lat_deg: f64,
}

/// Schaefer's phase and ephemeris for a proleptic-Gregorian date.
///
/// `day` can be fractional (UTC noon = 0.5).
pub fn schaefer_moon(year: i32, month: u32, day: f64) -> LunarEphemeris {
    // Jan/Feb count as months 13/14 of the previous year
    let (mut y, mut m) = (year, month as i32);
    if m < 3 {
        y -= 1;
        m += 12;
    }
    m += 1;

    // Days since the new moon of 1900-01-00 12 UT
    let days = (365.25 * y as f64).floor() + (30.6 * m as f64).floor() + day - 694_039.09;

    let cycle = frac(days / SYNODIC_MONTH);
    let phase_index = ((cycle * 8.0) + 0.5).floor() as u8 & 7;
    let age_days = cycle * SYNODIC_MONTH;
    let half = SYNODIC_MONTH / 2.0;
    let illum_frac = (1.0 - (age_days - half).abs() / half).clamp(0.0, 1.0);

    // Anomalistic month drives distance
    let dp = frac((days + 2_451_550.1 - 2_451_562.2) / 27.554_549_88) * 2.0 * PI;
    let elongation = 2.0 * cycle * 2.0 * PI;
    let distance_er = 60.4 - 3.3 * dp.cos() - 0.6 * (elongation - dp).cos() - 0.5 * elongation.cos();

    // Draconic month drives latitude
    let np = frac((days + 2_451_550.1 - 2_451_565.2) / 27.212_220_817) * 2.0 * PI;
    let lat_deg = 5.1 * np.sin();

    // Sidereal month drives longitude
    let rp = frac((days + 2_451_550.1 - 2_451_555.8) / 27.321_582_241);
    let lon_deg = (360.0 * rp
        + 6.3 * dp.sin()
        + 1.3 * (elongation - dp).sin()
        + 0.7 * elongation.sin())
        % 360.0;

    LunarEphemeris {
        phase_index,
        age_days,
        illum_frac,
        distance_er,
        lon_deg,
        lat_deg,
    }
}

fn frac(v: f64) -> f64 {
    v - v.floor()
}

/// Where a [`MoonPhase`] came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseSource {
    Table,
    Computed,
}

/// One authoritative table row.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseEntry {
    pub phase_index: u8,
    pub illumination: f64,
}

/// Moon phase of one day as reported in prediction responses.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MoonPhase {
    pub phase_index: u8,
    pub name: &'static str,
    /// Illuminated fraction (0–1)
    pub illumination: f64,
    pub source: PhaseSource,
}

impl MoonPhase {
    /// Spring tides run near new and full moon.
    pub fn is_spring_tide(&self) -> bool {
        matches!(self.phase_index, 0 | 4)
    }
}

/// Two-tier phase lookup: authoritative table first, computation second.
#[derive(Clone, Debug, Default)]
pub struct MoonPhaseResolver {
    table: BTreeMap<NaiveDate, PhaseEntry>,
}

impl MoonPhaseResolver {
    /// Resolver with no table; every day is computed.
    pub fn computed_only() -> Self {
        Self::default()
    }

    pub fn with_table(table: BTreeMap<NaiveDate, PhaseEntry>) -> Self {
        Self { table }
    }

    pub fn table_len(&self) -> usize {
        self.table.len()
    }

    pub fn resolve(&self, date: NaiveDate) -> MoonPhase {
        if let Some(entry) = self.table.get(&date) {
            let phase_index = entry.phase_index & 7;
            return MoonPhase {
                phase_index,
                name: PHASE_NAMES[phase_index as usize],
                illumination: entry.illumination.clamp(0.0, 1.0),
                source: PhaseSource::Table,
            };
        }

        let eph = schaefer_moon(date.year(), date.month(), date.day() as f64 + 0.5);
        MoonPhase {
            phase_index: eph.phase_index,
            name: PHASE_NAMES[eph.phase_index as usize],
            illumination: eph.illum_frac,
            source: PhaseSource::Computed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn known_phases() {
        // Full moon 2024-01-25, new moon 2024-01-11
        assert_eq!(schaefer_moon(2024, 1, 25.5).phase_index, 4);
        assert_eq!(schaefer_moon(2024, 1, 11.5).phase_index, 0);
        assert_eq!(schaefer_moon(2024, 1, 18.5).phase_index, 2);
        assert_eq!(schaefer_moon(2000, 1, 6.5).phase_index, 0);
    }

    #[test]
    fn ephemeris_stays_in_range() {
        for day in 1..=28 {
            let eph = schaefer_moon(2025, 2, day as f64 + 0.5);
            assert!((0.0..=1.0).contains(&eph.illum_frac));
            assert!((0.0..SYNODIC_MONTH).contains(&eph.age_days));
            assert!((55.0..66.0).contains(&eph.distance_er));
            assert!(eph.lat_deg.abs() <= 5.1 + 1e-9);
        }
    }

    #[test]
    fn full_moon_is_mostly_lit() {
        let eph = schaefer_moon(2024, 1, 25.5);
        assert!(eph.illum_frac > 0.95);
        assert_abs_diff_eq!(eph.age_days, 14.49, epsilon = 0.05);
    }

    #[test]
    fn table_wins_over_computation() {
        let mut table = BTreeMap::new();
        table.insert(
            date(2024, 1, 25),
            PhaseEntry {
                phase_index: 5,
                illumination: 0.97,
            },
        );
        let resolver = MoonPhaseResolver::with_table(table);

        let listed = resolver.resolve(date(2024, 1, 25));
        assert_eq!(listed.source, PhaseSource::Table);
        assert_eq!(listed.phase_index, 5);
        assert_eq!(listed.name, "Waning Gibbous");

        let computed = resolver.resolve(date(2024, 1, 11));
        assert_eq!(computed.source, PhaseSource::Computed);
        assert_eq!(computed.name, "New Moon");
        assert!(computed.is_spring_tide());
    }

    #[test]
    fn empty_table_always_computes() {
        let resolver = MoonPhaseResolver::computed_only();
        assert_eq!(resolver.table_len(), 0);
        assert_eq!(resolver.resolve(date(2024, 1, 18)).name, "First Quarter");
    }
}
