//! # Ephemerides
//!
//! Time-scale corrections and the fundamental astronomical arguments that drive
//! the nodal correction engine.
//!
//! ## Time scales
//! - **ΔT** (TT − UT): linear interpolation over five-yearly samples from 1950
//!   to 2035, clamped to the nearest endpoint outside that window
//! - **Leap seconds** (TAI − UTC): step function over the IERS bulletin dates
//! - **Julian Day**: UT-based, straight from the Unix epoch
//!
//! ## Fundamental arguments
//! Mean longitudes in degrees, polynomial in Julian centuries of TT since J2000:
//!
//! | Symbol | Meaning                          |
//! |--------|----------------------------------|
//! | `s`    | Moon's mean longitude            |
//! | `h`    | Sun's mean longitude             |
//! | `p`    | longitude of lunar perigee       |
//! | `N`    | longitude of Moon's ascending node |
//! | `p′`   | longitude of solar perigee       |
//!
//! plus `τ`, a local mean lunar time in hours. Everything here is a pure function
//! of its inputs and safe to call from any number of tasks.

use crate::error::{Result, TideError};
use chrono::{DateTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Julian Day of the Unix epoch (1970-01-01T00:00:00Z).
const UNIX_EPOCH_JD: f64 = 2_440_587.5;

/// Julian Day of J2000.0 (2000-01-01T12:00:00 TT).
pub const J2000_JD: f64 = 2_451_545.0;

const DAYS_PER_CENTURY: f64 = 36_525.0;

/// First year of the ΔT table.
const DELTA_T_FIRST_YEAR: f64 = 1950.0;

/// Spacing of the ΔT samples in years.
const DELTA_T_STEP_YEARS: f64 = 5.0;

/// ΔT samples in seconds, 1950, 1955, … 2035. Values after 2025 are projections.
#[rustfmt::skip]
const DELTA_T_TABLE: [f64; 18] = [
    29.07, 31.07, 33.15, 35.73, 40.18, 45.48,
    50.54, 54.34, 56.86, 60.78, 63.83, 64.69,
    66.07, 67.64, 69.36, 69.20, 70.00, 71.00,
];

/// Effective dates (year, month) and cumulative TAI − UTC in seconds.
const LEAP_SECONDS: [(i32, u32, i32); 28] = [
    (1972, 1, 10),
    (1972, 7, 11),
    (1973, 1, 12),
    (1974, 1, 13),
    (1975, 1, 14),
    (1976, 1, 15),
    (1977, 1, 16),
    (1978, 1, 17),
    (1979, 1, 18),
    (1980, 1, 19),
    (1981, 7, 20),
    (1982, 7, 21),
    (1983, 7, 22),
    (1985, 7, 23),
    (1988, 1, 24),
    (1990, 1, 25),
    (1991, 1, 26),
    (1992, 7, 27),
    (1993, 7, 28),
    (1994, 7, 29),
    (1996, 1, 30),
    (1997, 7, 31),
    (1999, 1, 32),
    (2006, 1, 33),
    (2009, 1, 34),
    (2012, 7, 35),
    (2015, 7, 36),
    (2017, 1, 37),
];

/// Earliest and latest instants the crate accepts, in Unix milliseconds
/// (years 1800 and 2200). Outside this window the polynomial expansions
/// are no longer meaningful for tide work.
const MIN_EPOCH_MILLIS: f64 = -5_364_662_400_000.0;
const MAX_EPOCH_MILLIS: f64 = 7_258_118_400_000.0;

/// The six fundamental arguments for one instant and longitude.
///
/// Angles are in degrees within `[0, 360)`; `tau` is in hours within `[0, 24)`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AstronomicalArguments {
    /// Moon's mean longitude
    pub s: f64,
    /// Sun's mean longitude
    pub h: f64,
    /// Longitude of lunar perigee
    pub p: f64,
    /// Longitude of the Moon's ascending node
    pub n: f64,
    /// Longitude of solar perigee
    pub p1: f64,
    /// Local mean lunar time in hours
    pub tau: f64,
    /// UT Julian Day the arguments were computed for
    pub julian_day: f64,
}

/// Convert a Unix timestamp in milliseconds into an instant.
///
/// This is the gate for externally supplied dates: NaN, infinities and
/// timestamps outside 1800–2200 are rejected rather than clamped.
pub fn instant_from_epoch_millis(millis: f64) -> Result<DateTime<Utc>> {
    if !millis.is_finite() {
        return Err(TideError::InvalidInput(format!(
            "timestamp must be finite, got {millis}"
        )));
    }
    if !(MIN_EPOCH_MILLIS..=MAX_EPOCH_MILLIS).contains(&millis) {
        return Err(TideError::InvalidInput(format!(
            "timestamp {millis} ms is outside the supported range (1800-2200)"
        )));
    }
    Utc.timestamp_millis_opt(millis.round() as i64)
        .single()
        .ok_or_else(|| TideError::InvalidInput(format!("unrepresentable timestamp {millis}")))
}

/// UT Julian Day of an instant.
pub fn julian_day(date: DateTime<Utc>) -> f64 {
    date.timestamp_millis() as f64 / 86_400_000.0 + UNIX_EPOCH_JD
}

/// ΔT = TT − UT in seconds, linearly interpolated from the five-yearly table.
pub fn delta_t_seconds(date: DateTime<Utc>) -> f64 {
    let year = decimal_year(date);
    let last = (DELTA_T_TABLE.len() - 1) as f64;
    let pos = ((year - DELTA_T_FIRST_YEAR) / DELTA_T_STEP_YEARS).clamp(0.0, last);

    let lo = pos.floor() as usize;
    let hi = (lo + 1).min(DELTA_T_TABLE.len() - 1);
    let frac = pos - lo as f64;
    DELTA_T_TABLE[lo] + (DELTA_T_TABLE[hi] - DELTA_T_TABLE[lo]) * frac
}

/// Cumulative TAI − UTC in seconds in effect at `date` (0 before 1972).
pub fn leap_second_offset(date: DateTime<Utc>) -> i32 {
    LEAP_SECONDS
        .iter()
        .rev()
        .find(|(year, month, _)| {
            Utc.with_ymd_and_hms(*year, *month, 1, 0, 0, 0)
                .single()
                .is_some_and(|effective| effective <= date)
        })
        .map(|(_, _, offset)| *offset)
        .unwrap_or(0)
}

/// Compute the fundamental arguments for `date` at `longitude` (degrees east).
pub fn astronomical_arguments(
    date: DateTime<Utc>,
    longitude: f64,
) -> Result<AstronomicalArguments> {
    if !longitude.is_finite() || !(-180.0..=360.0).contains(&longitude) {
        return Err(TideError::InvalidInput(format!(
            "longitude must be within [-180, 360], got {longitude}"
        )));
    }

    let jd = julian_day(date);
    let delta_t = delta_t_seconds(date);
    let t = (jd + delta_t / 86_400.0 - J2000_JD) / DAYS_PER_CENTURY;
    let t2 = t * t;
    let t3 = t2 * t;
    let t4 = t3 * t;

    let s = normalize_degrees(
        218.316_447_7 + 481_267.881_234_21 * t - 0.001_578_6 * t2 + t3 / 538_841.0
            - t4 / 65_194_000.0,
    );
    let h = normalize_degrees(280.466_46 + 36_000.769_83 * t + 0.000_303_2 * t2);
    let p = normalize_degrees(
        83.353_246_5 + 4_069.013_728_7 * t - 0.010_320_0 * t2 - t3 / 80_053.0
            + t4 / 18_999_000.0,
    );
    let n = normalize_degrees(
        125.044_52 - 1_934.136_261 * t + 0.002_070_8 * t2 + t3 / 450_000.0,
    );
    let p1 = normalize_degrees(282.937_35 + 1.719_46 * t + 0.000_46 * t2);

    let ut_hours = date.hour() as f64
        + date.minute() as f64 / 60.0
        + (date.second() as f64 + date.nanosecond() as f64 * 1e-9) / 3600.0;
    let nutation_hours = nutation_in_longitude(n, h, s) / 15.0;
    let tau = normalize_hours(ut_hours + longitude / 15.0 + nutation_hours + delta_t / 3600.0);

    Ok(AstronomicalArguments {
        s,
        h,
        p,
        n,
        p1,
        tau,
        julian_day: jd,
    })
}

/// Wrap an angle into `[0, 360)`.
pub fn normalize_degrees(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(360.0);
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

fn normalize_hours(hours: f64) -> f64 {
    let wrapped = hours.rem_euclid(24.0);
    if wrapped >= 24.0 {
        0.0
    } else {
        wrapped
    }
}

/// Low-precision nutation in longitude, in degrees (IAU 1980 leading terms).
fn nutation_in_longitude(node: f64, sun: f64, moon: f64) -> f64 {
    let (n, l_sun, l_moon) = (node.to_radians(), sun.to_radians(), moon.to_radians());
    let arcsec = -17.20 * n.sin() - 1.32 * (2.0 * l_sun).sin() - 0.23 * (2.0 * l_moon).sin()
        + 0.21 * (2.0 * n).sin();
    arcsec / 3600.0
}

fn decimal_year(date: DateTime<Utc>) -> f64 {
    2000.0 + (julian_day(date) - J2000_JD) / 365.25
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn utc(y: i32, m: u32, d: u32, hh: u32, mm: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, hh, mm, 0).unwrap()
    }

    #[test]
    fn julian_day_of_j2000() {
        assert_abs_diff_eq!(julian_day(utc(2000, 1, 1, 12, 0)), J2000_JD, epsilon = 1e-9);
        assert_abs_diff_eq!(julian_day(utc(1970, 1, 1, 0, 0)), UNIX_EPOCH_JD, epsilon = 1e-9);
    }

    #[test]
    fn delta_t_interpolates_between_samples() {
        // Exactly on the 2000 sample (decimal year is a hair after 2000.0 at noon)
        assert_abs_diff_eq!(delta_t_seconds(utc(2000, 1, 1, 12, 0)), 63.83, epsilon = 0.01);
        // Halfway between 2010 and 2015
        let mid = delta_t_seconds(utc(2012, 7, 2, 0, 0));
        assert!(mid > 66.07 && mid < 67.64, "ΔT {mid} should lie between samples");
    }

    #[test]
    fn delta_t_clamps_outside_table() {
        assert_abs_diff_eq!(delta_t_seconds(utc(1900, 6, 1, 0, 0)), 29.07, epsilon = 1e-9);
        assert_abs_diff_eq!(delta_t_seconds(utc(2090, 6, 1, 0, 0)), 71.00, epsilon = 1e-9);
    }

    #[test]
    fn leap_seconds_step_on_effective_date() {
        assert_eq!(leap_second_offset(utc(1971, 12, 31, 23, 59)), 0);
        assert_eq!(leap_second_offset(utc(1972, 1, 1, 0, 0)), 10);
        assert_eq!(leap_second_offset(utc(2016, 12, 31, 23, 59)), 36);
        assert_eq!(leap_second_offset(utc(2017, 1, 1, 0, 0)), 37);
        assert_eq!(leap_second_offset(utc(2025, 3, 1, 0, 0)), 37);
    }

    #[test]
    fn arguments_are_normalized() {
        for year in [1955, 1987, 2000, 2024, 2049] {
            let args = astronomical_arguments(utc(year, 3, 14, 6, 30), 100.5).unwrap();
            for angle in [args.s, args.h, args.p, args.n, args.p1] {
                assert!((0.0..360.0).contains(&angle), "angle {angle} not normalized");
            }
            assert!((0.0..24.0).contains(&args.tau), "tau {} not wrapped", args.tau);
        }
    }

    #[test]
    fn arguments_near_j2000_match_constant_terms() {
        // At J2000 (plus ΔT) the polynomials are dominated by their constant terms
        let args = astronomical_arguments(utc(2000, 1, 1, 12, 0), 0.0).unwrap();
        assert_abs_diff_eq!(args.h, 280.47, epsilon = 0.01);
        assert_abs_diff_eq!(args.n, 125.04, epsilon = 0.01);
        assert_abs_diff_eq!(args.p1, 282.94, epsilon = 0.01);
    }

    #[test]
    fn node_regresses_over_a_year() {
        let a = astronomical_arguments(utc(2024, 1, 1, 0, 0), 0.0).unwrap();
        let b = astronomical_arguments(utc(2025, 1, 1, 0, 0), 0.0).unwrap();
        // N moves about -19.3 degrees per year
        let delta = normalize_degrees(b.n - a.n) - 360.0;
        assert_abs_diff_eq!(delta, -19.35, epsilon = 0.1);
    }

    #[test]
    fn tau_tracks_longitude() {
        let date = utc(2024, 5, 1, 3, 0);
        let west = astronomical_arguments(date, 0.0).unwrap();
        let east = astronomical_arguments(date, 90.0).unwrap();
        assert_abs_diff_eq!(normalize_hours(east.tau - west.tau), 6.0, epsilon = 1e-6);
    }

    #[test]
    fn rejects_invalid_longitude() {
        let date = utc(2024, 5, 1, 3, 0);
        assert!(matches!(
            astronomical_arguments(date, f64::NAN),
            Err(TideError::InvalidInput(_))
        ));
        assert!(astronomical_arguments(date, 400.0).is_err());
    }

    #[test]
    fn rejects_non_finite_timestamps() {
        assert!(matches!(
            instant_from_epoch_millis(f64::NAN),
            Err(TideError::InvalidInput(_))
        ));
        assert!(instant_from_epoch_millis(f64::INFINITY).is_err());
        assert!(instant_from_epoch_millis(1e16).is_err());
        let ok = instant_from_epoch_millis(946_728_000_000.0).unwrap();
        assert_eq!(ok, utc(2000, 1, 1, 12, 0));
    }
}
