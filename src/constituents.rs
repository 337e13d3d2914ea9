//! # Tidal Constituent Database
//!
//! A fixed catalogue of 37 harmonic constituents with their angular speeds,
//! Doodson decompositions, nodal-correction rules, and amplitude/phase
//! calibrations for the two Thai coastal regions.
//!
//! The catalogue is static reference data. [`ConstituentDatabase::standard`]
//! builds the name index once and hands out a shared `&'static` reference, so
//! any number of tasks can read it concurrently without locking.
//!
//! ## Regional calibration
//! - **Gulf of Thailand**: mixed tide, diurnal dominant (K1, O1 > M2)
//! - **Andaman Sea**: mixed tide, semidiurnal dominant (M2, S2 > K1)
//!
//! Unknown region keys resolve to the Gulf of Thailand.

use crate::nodal::{NodalBase, NodalRule};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

/// Doodson argument rates in degrees per hour: τ, s, h, p, N, p′.
///
/// `N` here is the ascending node itself, which regresses, hence the sign.
pub const DOODSON_RATES: [f64; 6] = [
    14.492_052_1,
    0.549_016_5,
    0.041_068_6,
    0.004_641_8,
    -0.002_206_4,
    0.000_002_0,
];

/// Broad species a constituent belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstituentFamily {
    LongPeriod,
    Diurnal,
    Semidiurnal,
    ShallowWater,
}

/// Coastal region with its own calibration and datum profile.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Region {
    GulfOfThailand,
    AndamanSea,
}

impl Region {
    pub const ALL: [Region; 2] = [Region::GulfOfThailand, Region::AndamanSea];

    /// Stable key used in configuration and tile identifiers.
    pub fn key(self) -> &'static str {
        match self {
            Region::GulfOfThailand => "gulf_of_thailand",
            Region::AndamanSea => "andaman_sea",
        }
    }

    /// Parse a region key. Returns `None` for unsupported keys.
    pub fn from_key(key: &str) -> Option<Region> {
        match key {
            "gulf_of_thailand" | "gulf" => Some(Region::GulfOfThailand),
            "andaman_sea" | "andaman" => Some(Region::AndamanSea),
            _ => None,
        }
    }

    /// Region whose calibration is used when a key is not recognised.
    pub fn fallback() -> Region {
        Region::GulfOfThailand
    }

    /// Classify a coordinate onto the Thai coastline.
    ///
    /// The Andaman side is everything west of 98.9°E north of 8°N, and
    /// west of 100.3°E further south (Satun sits at ~100.07°E).
    pub fn classify(lat: f64, lon: f64) -> Region {
        if (lat >= 8.0 && lon < 98.9) || (lat < 8.0 && lon < 100.3) {
            Region::AndamanSea
        } else {
            Region::GulfOfThailand
        }
    }

    /// Datum levels for the region, metres above chart datum.
    pub fn datum(self) -> RegionalDatum {
        match self {
            Region::GulfOfThailand => RegionalDatum {
                mean_sea_level: 1.85,
                mean_high_water: 3.30,
                mean_low_water: 0.40,
            },
            Region::AndamanSea => RegionalDatum {
                mean_sea_level: 1.90,
                mean_high_water: 3.40,
                mean_low_water: 0.45,
            },
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Reference water levels for a region.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegionalDatum {
    pub mean_sea_level: f64,
    pub mean_high_water: f64,
    pub mean_low_water: f64,
}

/// Amplitude (metres) and phase lag (degrees) of one constituent in one region.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegionalCalibration {
    pub amplitude: f64,
    pub phase: f64,
}

/// One harmonic constituent.
#[derive(Clone, Copy, Debug)]
pub struct TidalConstituent {
    pub name: &'static str,
    /// Angular speed in degrees per hour
    pub speed: f64,
    /// Multiples of τ, s, h, p, N, p′
    pub doodson: [i8; 6],
    pub family: ConstituentFamily,
    pub nodal: NodalRule,
    pub gulf: RegionalCalibration,
    pub andaman: RegionalCalibration,
}

impl TidalConstituent {
    /// Calibration for a region.
    pub fn calibration(&self, region: Region) -> RegionalCalibration {
        match region {
            Region::GulfOfThailand => self.gulf,
            Region::AndamanSea => self.andaman,
        }
    }

    /// Speed implied by the Doodson tuple.
    pub fn doodson_speed(&self) -> f64 {
        self.doodson
            .iter()
            .zip(DOODSON_RATES)
            .map(|(&k, rate)| k as f64 * rate)
            .sum()
    }
}

const fn cal(amplitude: f64, phase: f64) -> RegionalCalibration {
    RegionalCalibration { amplitude, phase }
}

use self::ConstituentFamily::{Diurnal, LongPeriod, Semidiurnal, ShallowWater};
use crate::nodal::NodalBase::{K1, M2, O1};

const M2_ONLY: &[(NodalBase, f64)] = &[(M2, 1.0)];
const M2_INVERSE: &[(NodalBase, f64)] = &[(M2, -1.0)];
const M2_SQUARED: &[(NodalBase, f64)] = &[(M2, 2.0)];
const M2_CUBED: &[(NodalBase, f64)] = &[(M2, 3.0)];
const M2_FOURTH: &[(NodalBase, f64)] = &[(M2, 4.0)];
const M2_THREE_HALVES: &[(NodalBase, f64)] = &[(M2, 1.5)];
const M2_O1: &[(NodalBase, f64)] = &[(M2, 1.0), (O1, 1.0)];
const M2_K1: &[(NodalBase, f64)] = &[(M2, 1.0), (K1, 1.0)];

macro_rules! constituent {
    ($name:expr, $speed:expr, $doodson:expr, $family:expr, $nodal:expr, $gulf:expr, $andaman:expr) => {
        TidalConstituent {
            name: $name,
            speed: $speed,
            doodson: $doodson,
            family: $family,
            nodal: $nodal,
            gulf: $gulf,
            andaman: $andaman,
        }
    };
}

/// The full catalogue, ordered by family then speed.
#[rustfmt::skip]
pub static CONSTITUENTS: [TidalConstituent; 37] = [
    // Long period
    constituent!("Sa",   0.041_068_6, [0, 0, 1, 0, 0, 0],  LongPeriod, NodalRule::Uncorrected, cal(0.250, 250.0), cal(0.120, 220.0)),
    constituent!("Ssa",  0.082_137_3, [0, 0, 2, 0, 0, 0],  LongPeriod, NodalRule::Uncorrected, cal(0.050,  60.0), cal(0.030,  80.0)),
    constituent!("Mm",   0.544_374_7, [0, 1, 0, -1, 0, 0], LongPeriod, NodalRule::Mm,          cal(0.020, 150.0), cal(0.015, 160.0)),
    constituent!("MSf",  1.015_895_8, [0, 2, -2, 0, 0, 0], LongPeriod, NodalRule::Compound(M2_INVERSE), cal(0.015, 100.0), cal(0.010, 110.0)),
    constituent!("Mf",   1.098_033_1, [0, 2, 0, 0, 0, 0],  LongPeriod, NodalRule::Mf,          cal(0.030, 120.0), cal(0.020, 130.0)),
    // Diurnal
    constituent!("2Q1", 12.854_286_2, [1, -3, 0, 2, 0, 0], Diurnal, NodalRule::O1,  cal(0.005, 170.0), cal(0.002, 260.0)),
    constituent!("Q1",  13.398_660_9, [1, -2, 0, 1, 0, 0], Diurnal, NodalRule::O1,  cal(0.040, 230.0), cal(0.015, 290.0)),
    constituent!("RHO1",13.471_514_5, [1, -2, 2, -1, 0, 0],Diurnal, NodalRule::O1,  cal(0.008, 240.0), cal(0.003, 295.0)),
    constituent!("O1",  13.943_035_6, [1, -1, 0, 0, 0, 0], Diurnal, NodalRule::O1,  cal(0.280, 265.0), cal(0.080, 305.0)),
    constituent!("M1",  14.496_693_9, [1, 0, 0, 1, 0, 0],  Diurnal, NodalRule::M1,  cal(0.020, 270.0), cal(0.006, 310.0)),
    constituent!("P1",  14.958_931_4, [1, 1, -2, 0, 0, 0], Diurnal, NodalRule::Uncorrected, cal(0.160, 300.0), cal(0.070, 325.0)),
    constituent!("S1",  15.000_000_0, [1, 1, -1, 0, 0, 1], Diurnal, NodalRule::Uncorrected, cal(0.030, 180.0), cal(0.010, 200.0)),
    constituent!("K1",  15.041_068_6, [1, 1, 0, 0, 0, 0],  Diurnal, NodalRule::K1,  cal(0.550, 305.0), cal(0.210, 330.0)),
    constituent!("J1",  15.585_443_3, [1, 2, 0, -1, 0, 0], Diurnal, NodalRule::J1,  cal(0.025, 330.0), cal(0.010, 350.0)),
    constituent!("OO1", 16.139_101_7, [1, 3, 0, 0, 0, 0],  Diurnal, NodalRule::OO1, cal(0.015, 350.0), cal(0.005,  10.0)),
    // Semidiurnal
    constituent!("2N2", 27.895_354_8, [2, -2, 0, 2, 0, 0], Semidiurnal, NodalRule::M2, cal(0.010,  40.0), cal(0.025,  20.0)),
    constituent!("MU2", 27.968_208_4, [2, -2, 2, 0, 0, 0], Semidiurnal, NodalRule::M2, cal(0.020,  70.0), cal(0.030,  45.0)),
    constituent!("N2",  28.439_729_5, [2, -1, 0, 1, 0, 0], Semidiurnal, NodalRule::M2, cal(0.080, 110.0), cal(0.150,  50.0)),
    constituent!("NU2", 28.512_583_1, [2, -1, 2, -1, 0, 0],Semidiurnal, NodalRule::M2, cal(0.015, 115.0), cal(0.036,  52.0)),
    constituent!("M2",  28.984_104_2, [2, 0, 0, 0, 0, 0],  Semidiurnal, NodalRule::M2, cal(0.420, 130.0), cal(0.750,  65.0)),
    constituent!("LAM2",29.455_625_3, [2, 1, -2, 1, 0, 0], Semidiurnal, NodalRule::M2, cal(0.005, 140.0), cal(0.007,  80.0)),
    constituent!("L2",  29.528_478_9, [2, 1, 0, -1, 0, 0], Semidiurnal, NodalRule::L2, cal(0.020, 150.0), cal(0.030,  85.0)),
    constituent!("T2",  29.958_933_3, [2, 2, -3, 0, 0, 1], Semidiurnal, NodalRule::Uncorrected, cal(0.010, 170.0), cal(0.026,  98.0)),
    constituent!("S2",  30.000_000_0, [2, 2, -2, 0, 0, 0], Semidiurnal, NodalRule::Uncorrected, cal(0.150, 175.0), cal(0.350, 100.0)),
    constituent!("R2",  30.041_066_7, [2, 2, -1, 0, 0, -1],Semidiurnal, NodalRule::Uncorrected, cal(0.002, 175.0), cal(0.004, 100.0)),
    constituent!("K2",  30.082_137_3, [2, 2, 0, 0, 0, 0],  Semidiurnal, NodalRule::K2, cal(0.040, 170.0), cal(0.100,  95.0)),
    constituent!("2SM2",31.015_895_8, [2, 4, -4, 0, 0, 0], Semidiurnal, NodalRule::Compound(M2_INVERSE), cal(0.010, 300.0), cal(0.008, 280.0)),
    // Shallow water and compound
    constituent!("MO3", 42.927_139_8, [3, -1, 0, 0, 0, 0], ShallowWater, NodalRule::Compound(M2_O1),          cal(0.006,  10.0), cal(0.004, 120.0)),
    constituent!("M3",  43.476_156_3, [3, 0, 0, 0, 0, 0],  ShallowWater, NodalRule::Compound(M2_THREE_HALVES), cal(0.004, 200.0), cal(0.006, 150.0)),
    constituent!("MK3", 44.025_172_9, [3, 1, 0, 0, 0, 0],  ShallowWater, NodalRule::Compound(M2_K1),          cal(0.008,  60.0), cal(0.005, 170.0)),
    constituent!("MN4", 57.423_833_7, [4, -1, 0, 1, 0, 0], ShallowWater, NodalRule::Compound(M2_SQUARED),     cal(0.010, 280.0), cal(0.012, 180.0)),
    constituent!("M4",  57.968_208_4, [4, 0, 0, 0, 0, 0],  ShallowWater, NodalRule::Compound(M2_SQUARED),     cal(0.020, 300.0), cal(0.030, 200.0)),
    constituent!("MS4", 58.984_104_2, [4, 2, -2, 0, 0, 0], ShallowWater, NodalRule::Compound(M2_ONLY),        cal(0.015, 330.0), cal(0.020, 250.0)),
    constituent!("S4",  60.000_000_0, [4, 4, -4, 0, 0, 0], ShallowWater, NodalRule::Uncorrected,              cal(0.002,  10.0), cal(0.003, 300.0)),
    constituent!("M6",  86.952_312_7, [6, 0, 0, 0, 0, 0],  ShallowWater, NodalRule::Compound(M2_CUBED),       cal(0.005,  50.0), cal(0.006,  20.0)),
    constituent!("2MS6",87.968_208_4, [6, 2, -2, 0, 0, 0], ShallowWater, NodalRule::Compound(M2_SQUARED),     cal(0.004,  80.0), cal(0.005,  60.0)),
    constituent!("M8", 115.936_416_6, [8, 0, 0, 0, 0, 0],  ShallowWater, NodalRule::Compound(M2_FOURTH),      cal(0.002, 120.0), cal(0.002, 100.0)),
];

/// Read-only view over [`CONSTITUENTS`] with a name index.
#[derive(Debug)]
pub struct ConstituentDatabase {
    constituents: &'static [TidalConstituent],
    by_name: HashMap<&'static str, usize>,
}

impl ConstituentDatabase {
    /// Shared catalogue, built on first use.
    pub fn standard() -> &'static ConstituentDatabase {
        static DATABASE: OnceLock<ConstituentDatabase> = OnceLock::new();
        DATABASE.get_or_init(|| ConstituentDatabase::from_static(&CONSTITUENTS))
    }

    fn from_static(constituents: &'static [TidalConstituent]) -> Self {
        let by_name = constituents
            .iter()
            .enumerate()
            .map(|(idx, c)| (c.name, idx))
            .collect();
        Self {
            constituents,
            by_name,
        }
    }

    pub fn all(&self) -> &'static [TidalConstituent] {
        self.constituents
    }

    pub fn len(&self) -> usize {
        self.constituents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constituents.is_empty()
    }

    /// Look up a constituent by its exact name (e.g. `"M2"`).
    pub fn get(&self, name: &str) -> Option<&'static TidalConstituent> {
        let constituents = self.constituents;
        self.by_name.get(name).map(|&idx| &constituents[idx])
    }

    /// All constituents of one family, in catalogue order.
    pub fn by_family(
        &self,
        family: ConstituentFamily,
    ) -> impl Iterator<Item = &'static TidalConstituent> {
        self.constituents.iter().filter(move |c| c.family == family)
    }

    /// Regional amplitude/phase for a constituent, falling back to the Gulf of
    /// Thailand when `region_key` is not a supported region.
    pub fn regional(&self, name: &str, region_key: &str) -> Option<RegionalCalibration> {
        let region = Region::from_key(region_key).unwrap_or_else(Region::fallback);
        self.get(name).map(|c| c.calibration(region))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalogue_is_complete_and_unique() {
        let db = ConstituentDatabase::standard();
        assert_eq!(db.len(), 37);
        let mut names: Vec<_> = db.all().iter().map(|c| c.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), 37, "constituent names must be unique");
    }

    #[test]
    fn lookup_by_name() {
        let db = ConstituentDatabase::standard();
        let m2 = db.get("M2").unwrap();
        assert_eq!(m2.speed, 28.984_104_2);
        assert_eq!(m2.family, ConstituentFamily::Semidiurnal);
        assert!(db.get("X9").is_none());
    }

    #[test]
    fn doodson_tuples_reproduce_speeds() {
        for c in ConstituentDatabase::standard().all() {
            let implied = c.doodson_speed();
            assert!(
                (implied - c.speed).abs() < 1e-5,
                "{}: Doodson speed {implied} vs tabulated {}",
                c.name,
                c.speed
            );
        }
    }

    #[test]
    fn family_filter() {
        let db = ConstituentDatabase::standard();
        let diurnal: Vec<_> = db.by_family(ConstituentFamily::Diurnal).map(|c| c.name).collect();
        assert!(diurnal.contains(&"K1"));
        assert!(diurnal.contains(&"O1"));
        assert!(!diurnal.contains(&"M2"));
        assert_eq!(db.by_family(ConstituentFamily::LongPeriod).count(), 5);
        assert_eq!(db.by_family(ConstituentFamily::ShallowWater).count(), 10);
        for c in db.by_family(ConstituentFamily::Semidiurnal) {
            assert!(c.speed > 27.0 && c.speed < 32.0, "{} is not semidiurnal", c.name);
        }
    }

    #[test]
    fn regional_lookup_falls_back_to_gulf() {
        let db = ConstituentDatabase::standard();
        let andaman = db.regional("M2", "andaman_sea").unwrap();
        let gulf = db.regional("M2", "gulf_of_thailand").unwrap();
        let unknown = db.regional("M2", "south_china_sea").unwrap();
        assert_eq!(unknown, gulf);
        assert!(andaman.amplitude > gulf.amplitude);
    }

    #[test]
    fn regions_have_expected_character() {
        let db = ConstituentDatabase::standard();
        let amp = |name: &str, region: Region| db.get(name).unwrap().calibration(region).amplitude;
        // Gulf is diurnal dominant, Andaman semidiurnal dominant
        assert!(amp("K1", Region::GulfOfThailand) > amp("M2", Region::GulfOfThailand));
        assert!(amp("M2", Region::AndamanSea) > amp("K1", Region::AndamanSea));
    }

    #[test]
    fn classify_thai_coast() {
        assert_eq!(Region::classify(13.7563, 100.5018), Region::GulfOfThailand); // Bangkok
        assert_eq!(Region::classify(7.8804, 98.3923), Region::AndamanSea); // Phuket
        assert_eq!(Region::classify(9.9658, 98.6348), Region::AndamanSea); // Ranong
        assert_eq!(Region::classify(6.6238, 100.0674), Region::AndamanSea); // Satun
        assert_eq!(Region::classify(7.1898, 100.5954), Region::GulfOfThailand); // Songkhla
        assert_eq!(Region::classify(12.5684, 99.9577), Region::GulfOfThailand); // Hua Hin
    }

    #[test]
    fn region_keys_round_trip() {
        for region in Region::ALL {
            assert_eq!(Region::from_key(region.key()), Some(region));
        }
        assert_eq!(Region::from_key("pacific"), None);
    }
}
