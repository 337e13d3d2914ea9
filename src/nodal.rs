//! # Nodal Correction Engine
//!
//! The Moon's ascending node regresses around the ecliptic every 18.61 years,
//! slowly modulating the amplitude and phase of every lunar constituent. Each
//! constituent is predicted as `f · H · cos(V + u − g)` where:
//!
//! - `f` is the amplitude factor (dimensionless, positive)
//! - `u` is the phase correction in degrees
//!
//! The closed forms follow the Schureman/Doodson tables. Solar constituents
//! are uncorrected (`f = 1`, `u = 0`). Overtides and compound tides are built
//! from their parents: a constituent made of `k` M2 units takes `f = f(M2)^k`
//! and `u = k · u(M2)`. This composition is applied uniformly across the
//! shallow-water family even where a rigorous derivation would differ by a
//! hair, so predicted times stay consistent with published tables.

use crate::constituents::ConstituentDatabase;
use crate::ephemerides::AstronomicalArguments;
use serde::{Deserialize, Serialize};

/// Amplitude factor and phase correction for one constituent at one epoch.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodalCorrection {
    /// Amplitude multiplier
    pub f: f64,
    /// Phase correction in degrees
    pub u: f64,
}

impl NodalCorrection {
    pub const IDENTITY: NodalCorrection = NodalCorrection { f: 1.0, u: 0.0 };

    /// Raise a correction to a (possibly fractional or negative) harmonic order.
    ///
    /// Negative orders describe constituents that subtract a parent
    /// (e.g. 2SM2 = 2·S2 − M2): the amplitude factor uses `|k|`.
    pub fn powf(self, order: f64) -> NodalCorrection {
        NodalCorrection {
            f: self.f.powf(order.abs()),
            u: self.u * order,
        }
    }

    /// Combine two corrections (product of `f`, sum of `u`).
    pub fn compose(self, other: NodalCorrection) -> NodalCorrection {
        NodalCorrection {
            f: self.f * other.f,
            u: self.u + other.u,
        }
    }
}

/// Parent constituents compound rules are built from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodalBase {
    M2,
    O1,
    K1,
}

impl NodalBase {
    fn rule(self) -> NodalRule {
        match self {
            NodalBase::M2 => NodalRule::M2,
            NodalBase::O1 => NodalRule::O1,
            NodalBase::K1 => NodalRule::K1,
        }
    }
}

/// Which closed form a constituent takes its correction from.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum NodalRule {
    /// Solar constituents and anything without a known correction
    Uncorrected,
    M2,
    O1,
    K1,
    K2,
    J1,
    OO1,
    Mm,
    Mf,
    /// Depends on lunar perigee `p` as well as `N`
    M1,
    /// Depends on lunar perigee `p` as well as `N`
    L2,
    /// Product of parent corrections raised to their harmonic order
    Compound(&'static [(NodalBase, f64)]),
}

impl NodalRule {
    /// Evaluate the rule for a set of astronomical arguments.
    pub fn evaluate(&self, args: &AstronomicalArguments) -> NodalCorrection {
        let n = args.n.to_radians();
        let p = args.p.to_radians();
        let (sn, s2n, s3n) = (n.sin(), (2.0 * n).sin(), (3.0 * n).sin());
        let (cn, c2n, c3n) = (n.cos(), (2.0 * n).cos(), (3.0 * n).cos());

        match self {
            NodalRule::Uncorrected => NodalCorrection::IDENTITY,
            NodalRule::M2 => NodalCorrection {
                f: 1.0004 - 0.0373 * cn + 0.0002 * c2n,
                u: -2.14 * sn,
            },
            NodalRule::O1 => NodalCorrection {
                f: 1.0089 + 0.1871 * cn - 0.0147 * c2n + 0.0014 * c3n,
                u: 10.80 * sn - 1.34 * s2n + 0.19 * s3n,
            },
            NodalRule::K1 => NodalCorrection {
                f: 1.0060 + 0.1150 * cn - 0.0088 * c2n + 0.0006 * c3n,
                u: -8.86 * sn + 0.68 * s2n - 0.07 * s3n,
            },
            NodalRule::K2 => NodalCorrection {
                f: 1.0241 + 0.2863 * cn + 0.0083 * c2n - 0.0015 * c3n,
                u: -17.74 * sn + 0.68 * s2n - 0.04 * s3n,
            },
            NodalRule::J1 => NodalCorrection {
                f: 1.1029 + 0.1676 * cn - 0.0170 * c2n + 0.0016 * c3n,
                u: -12.94 * sn + 1.34 * s2n - 0.19 * s3n,
            },
            NodalRule::OO1 => NodalCorrection {
                f: 1.1027 + 0.6504 * cn + 0.0317 * c2n - 0.0014 * c3n,
                u: -36.68 * sn + 4.02 * s2n - 0.57 * s3n,
            },
            NodalRule::Mm => NodalCorrection {
                f: 1.0000 - 0.1300 * cn + 0.0013 * c2n,
                u: 0.0,
            },
            NodalRule::Mf => NodalCorrection {
                f: 1.0429 + 0.4135 * cn - 0.0040 * c2n,
                u: -23.74 * sn + 2.68 * s2n - 0.38 * s3n,
            },
            NodalRule::M1 => {
                let x = 2.0 * p.cos() + 0.4 * (p - n).cos();
                let y = p.sin() + 0.2 * (p - n).sin();
                polar(x, y)
            }
            NodalRule::L2 => {
                let x = 1.0
                    - 0.2505 * (2.0 * p).cos()
                    - 0.1102 * (2.0 * p - n).cos()
                    - 0.0156 * (2.0 * p - 2.0 * n).cos()
                    - 0.0370 * cn;
                let y = -0.2505 * (2.0 * p).sin()
                    - 0.1102 * (2.0 * p - n).sin()
                    - 0.0156 * (2.0 * p - 2.0 * n).sin()
                    - 0.0370 * sn;
                polar(x, y)
            }
            NodalRule::Compound(parts) => parts
                .iter()
                .fold(NodalCorrection::IDENTITY, |acc, &(base, order)| {
                    acc.compose(base.rule().evaluate(args).powf(order))
                }),
        }
    }

    /// Range `f` is documented to stay within over a full nodal and perigee cycle.
    pub fn documented_range(&self) -> (f64, f64) {
        match self {
            NodalRule::Uncorrected => (1.0, 1.0),
            NodalRule::M2 => (0.96, 1.04),
            NodalRule::O1 => (0.80, 1.22),
            NodalRule::K1 => (0.88, 1.13),
            NodalRule::K2 => (0.73, 1.32),
            NodalRule::J1 => (0.91, 1.29),
            NodalRule::OO1 => (0.41, 1.79),
            NodalRule::Mm => (0.87, 1.14),
            NodalRule::Mf => (0.62, 1.47),
            NodalRule::M1 => (0.75, 2.45),
            NodalRule::L2 => (0.55, 1.45),
            NodalRule::Compound(parts) => parts.iter().fold((1.0, 1.0), |(lo, hi), &(base, order)| {
                let (base_lo, base_hi) = base.rule().documented_range();
                (lo * base_lo.powf(order.abs()), hi * base_hi.powf(order.abs()))
            }),
        }
    }
}

fn polar(x: f64, y: f64) -> NodalCorrection {
    NodalCorrection {
        f: x.hypot(y),
        u: y.atan2(x).to_degrees(),
    }
}

/// Nodal correction for a named constituent.
///
/// Names missing from the catalogue are returned uncorrected (`f = 1`, `u = 0`).
pub fn nodal_correction(name: &str, args: &AstronomicalArguments) -> NodalCorrection {
    ConstituentDatabase::standard()
        .get(name)
        .map(|c| c.nodal.evaluate(args))
        .unwrap_or(NodalCorrection::IDENTITY)
}

/// Corrections for every catalogued constituent, in catalogue order.
pub fn nodal_corrections(args: &AstronomicalArguments) -> Vec<(&'static str, NodalCorrection)> {
    ConstituentDatabase::standard()
        .all()
        .iter()
        .map(|c| (c.name, c.nodal.evaluate(args)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn args_with(n: f64, p: f64) -> AstronomicalArguments {
        AstronomicalArguments {
            s: 0.0,
            h: 0.0,
            p,
            n,
            p1: 0.0,
            tau: 0.0,
            julian_day: 2_451_545.0,
        }
    }

    #[test]
    fn f_stays_in_documented_range_over_nodal_cycle() {
        let db = ConstituentDatabase::standard();
        for n_step in 0..360 {
            for p_step in (0..360).step_by(15) {
                let args = args_with(n_step as f64, p_step as f64);
                for c in db.all() {
                    let corr = c.nodal.evaluate(&args);
                    let (lo, hi) = c.nodal.documented_range();
                    assert!(corr.f.is_finite() && corr.u.is_finite(), "{} produced NaN", c.name);
                    assert!(corr.f > 0.0, "{} negative amplitude factor", c.name);
                    assert!(
                        corr.f >= lo - 1e-9 && corr.f <= hi + 1e-9,
                        "{}: f={} outside [{lo}, {hi}] at N={n_step} p={p_step}",
                        c.name,
                        corr.f
                    );
                }
            }
        }
    }

    #[test]
    fn principal_lunar_factors_stay_near_unity() {
        for n_step in 0..360 {
            let args = args_with(n_step as f64, 0.0);
            for name in ["M2", "N2", "O1", "K1", "K2", "Q1"] {
                let f = nodal_correction(name, &args).f;
                assert!((0.7..=1.33).contains(&f), "{name}: f={f} at N={n_step}");
            }
        }
    }

    #[test]
    fn solar_constituents_are_uncorrected() {
        let args = args_with(73.0, 12.0);
        for name in ["S2", "P1", "S1", "T2", "Sa", "Ssa", "S4"] {
            assert_eq!(nodal_correction(name, &args), NodalCorrection::IDENTITY);
        }
    }

    #[test]
    fn unknown_constituent_defaults_to_identity() {
        let args = args_with(200.0, 40.0);
        assert_eq!(nodal_correction("ZZ9", &args), NodalCorrection::IDENTITY);
    }

    #[test]
    fn overtides_compose_from_m2() {
        for n in [0.0, 45.0, 125.0, 270.0] {
            let args = args_with(n, 10.0);
            let m2 = nodal_correction("M2", &args);

            let m4 = nodal_correction("M4", &args);
            assert_abs_diff_eq!(m4.f, m2.f * m2.f, epsilon = 1e-12);
            assert_abs_diff_eq!(m4.u, 2.0 * m2.u, epsilon = 1e-12);

            let m6 = nodal_correction("M6", &args);
            assert_abs_diff_eq!(m6.f, m2.f.powi(3), epsilon = 1e-12);
            assert_abs_diff_eq!(m6.u, 3.0 * m2.u, epsilon = 1e-12);

            let m8 = nodal_correction("M8", &args);
            assert_abs_diff_eq!(m8.f, m2.f.powi(4), epsilon = 1e-12);
            assert_abs_diff_eq!(m8.u, 4.0 * m2.u, epsilon = 1e-12);

            // Uniform composition: MN4 and 2MS6 also take M2 squared
            assert_eq!(nodal_correction("MN4", &args), m4);
            assert_eq!(nodal_correction("2MS6", &args), m4);
        }
    }

    #[test]
    fn subtractive_compounds_flip_phase() {
        let args = args_with(90.0, 0.0);
        let m2 = nodal_correction("M2", &args);
        let two_sm2 = nodal_correction("2SM2", &args);
        assert_abs_diff_eq!(two_sm2.f, m2.f, epsilon = 1e-12);
        assert_abs_diff_eq!(two_sm2.u, -m2.u, epsilon = 1e-12);
    }

    #[test]
    fn mixed_compounds_multiply_parents() {
        let args = args_with(30.0, 0.0);
        let m2 = nodal_correction("M2", &args);
        let k1 = nodal_correction("K1", &args);
        let mk3 = nodal_correction("MK3", &args);
        assert_abs_diff_eq!(mk3.f, m2.f * k1.f, epsilon = 1e-12);
        assert_abs_diff_eq!(mk3.u, m2.u + k1.u, epsilon = 1e-12);
    }

    #[test]
    fn m2_at_node_extremes() {
        // N = 0: f is at its minimum and u vanishes
        let at_zero = nodal_correction("M2", &args_with(0.0, 0.0));
        assert_abs_diff_eq!(at_zero.f, 0.9633, epsilon = 1e-4);
        assert_abs_diff_eq!(at_zero.u, 0.0, epsilon = 1e-12);

        let at_half = nodal_correction("M2", &args_with(180.0, 0.0));
        assert_abs_diff_eq!(at_half.f, 1.0379, epsilon = 1e-4);
    }

    #[test]
    fn full_table_covers_catalogue() {
        let table = nodal_corrections(&args_with(10.0, 20.0));
        assert_eq!(table.len(), ConstituentDatabase::standard().len());
        assert!(table.iter().any(|(name, _)| *name == "M2"));
    }
}
