//! EOB metric potentials A, B and D.
//!
//! Every potential is written once as a function of u = 1/r over `T: Scalar` and
//! evaluated on a `Jet` seeded in r, which yields exact radial derivatives through the
//! logarithms of the 5PN Padé and through the centrifugal radius.

use crate::autodiff::Jet;
use crate::config::{CentrifugalRadius, GravitomagneticTides, TidalModel};
use crate::orbits;
use crate::params::{BinaryKind, EobParameters, TidalParameters, EULER_GAMMA};
use crate::traits::Scalar;
use anyhow::{Context, Result};
use num_traits::{Float, One};
use serde::{Deserialize, Serialize};
use std::f64::consts::{LN_2, PI};

/// Below this value of A the state is treated as having crossed the horizon.
pub const HORIZON_THRESHOLD: f64 = 1e-6;

/// A, B and their radial derivatives at one point.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricValues {
    pub a: f64,
    pub da: f64,
    pub d2a: f64,
    pub b: f64,
    pub db: f64,
    /// A fell below `HORIZON_THRESHOLD`; `a` and `b` hold absolute values.
    pub horizon: bool,
}

impl MetricValues {
    fn from_jets(a: Jet, b: Jet) -> Self {
        let mut values = Self {
            a: a.val,
            da: a.d1,
            d2a: a.d2,
            b: b.val,
            db: b.d1,
            horizon: false,
        };
        if values.a < HORIZON_THRESHOLD {
            values.a = values.a.abs();
            values.b = values.b.abs();
            values.horizon = true;
        }
        values
    }
}

/// Centrifugal radius r_c(r) and its first two derivatives.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RcValues {
    pub rc: f64,
    pub drc: f64,
    pub d2rc: f64,
}

impl RcValues {
    pub fn identity(r: f64) -> Self {
        Self {
            rc: r,
            drc: 1.0,
            d2rc: 0.0,
        }
    }

    fn jet(&self) -> Jet {
        Jet::new(self.rc, self.drc, self.d2rc)
    }
}

/// r_c² = r² + c0 (1 + 2u) + c1 u + c2 u².
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RcCoefficients {
    pub c0: f64,
    pub c1: f64,
    pub c2: f64,
}

impl RcCoefficients {
    /// `None` means r_c = r.
    pub fn new(params: &EobParameters) -> Option<Self> {
        let model = params.models.centrifugal_radius;
        if model == CentrifugalRadius::NoSpin {
            return None;
        }
        let nu = params.nu;
        let x12 = params.x12;
        let (a1, a2) = (params.spin_vars.a1, params.spin_vars.a2);
        if params.use_tides() {
            let [cq1, cq2] = params.tides.c_q;
            let a02 = cq1 * a1 * a1 + 2.0 * a1 * a2 + cq2 * a2 * a2;
            let delta_a2 = x12 * (a1 * a1 * (cq1 + 0.25) - a2 * a2 * (cq2 + 0.25))
                + a1 * a1 * (-17.0 / 4.0 + 3.0 * cq1 - 0.5 * nu)
                + a2 * a2 * (-17.0 / 4.0 + 3.0 * cq2 - 0.5 * nu)
                + a1 * a2 * (nu - 2.0);
            let delta_a2_nnlo = (387.0 / 28.0 - 207.0 / 28.0 * nu) * a02
                + (-2171.0 / 112.0 - 269.0 / 28.0 * nu + 0.375 * nu * nu) * (a1 * a1 + a2 * a2)
                + (-281.0 / 7.0 - 187.0 / 56.0 * nu - 0.75 * nu * nu) * a1 * a2
                + 163.0 / 28.0 * x12 * (cq1 * a1 * a1 - cq2 * a2 * a2)
                + (-29.0 / 112.0 - 2.625 * nu) * x12 * (a1 * a1 - a2 * a2);
            let coefficients = match model {
                CentrifugalRadius::Lo => (a02, 0.0, 0.0),
                CentrifugalRadius::Nlo => (a02, delta_a2, 0.0),
                CentrifugalRadius::Nnlo => (a02, delta_a2, delta_a2_nnlo),
                CentrifugalRadius::NnloS4 => {
                    let [coct1, coct2] = params.tides.c_oct;
                    let [chex1, chex2] = params.tides.c_hex;
                    let delta_a4 = 0.75 * (chex1 - cq1 * cq1) * a1.powi(4)
                        + 3.0 * (coct1 - cq1) * a1.powi(3) * a2
                        + 3.0 * (cq1 * cq2 - 1.0) * a1 * a1 * a2 * a2
                        + 3.0 * (coct2 - cq2) * a1 * a2.powi(3)
                        + 0.75 * (chex2 - cq2 * cq2) * a2.powi(4);
                    (a02, delta_a2, delta_a2_nnlo + delta_a4)
                }
                CentrifugalRadius::NoTides => (2.0 * a1 * a2, 0.0, 0.0),
                CentrifugalRadius::NoSpin => return None,
            };
            let (c0, c1, c2) = coefficients;
            return Some(Self { c0, c1, c2 });
        }

        let ak2 = params.spin_vars.ak2;
        let c_nlo = -a2 * a2 * (1.25 + 1.25 * x12 + 0.5 * nu) - a1 * a1 * (1.25 - 1.25 * x12 + 0.5 * nu)
            + a1 * a2 * (nu - 2.0);
        match model {
            CentrifugalRadius::Nnlo | CentrifugalRadius::NnloS4 => {
                let (a0, a12) = (params.spin_vars.a0, params.spin_vars.a12);
                let c1 = -1.125 * a0 * a0 - (0.625 + nu) * a12 * a12 + 1.25 * x12 * a0 * a12;
                let c2 = -(189.0 / 32.0 + 417.0 / 32.0 * nu) * a0 * a0
                    + (11.0 / 32.0 - 127.0 / 32.0 * nu + 0.375 * nu * nu) * a12 * a12
                    + (89.0 / 16.0 - 2.625 * nu) * x12 * a0 * a12;
                Some(Self { c0: ak2, c1, c2 })
            }
            _ => Some(Self {
                c0: ak2,
                c1: c_nlo,
                c2: 0.0,
            }),
        }
    }

    pub fn eval(&self, r: f64) -> RcValues {
        let rc = self.radius(Jet::variable(r));
        RcValues {
            rc: rc.val,
            drc: rc.d1,
            d2rc: rc.d2,
        }
    }

    fn radius<T: Scalar>(&self, r: T) -> T {
        let u = r.recip();
        let rc2 = r * r
            + T::cst(self.c0) * (T::one() + T::cst(2.0) * u)
            + T::cst(self.c1) * u
            + T::cst(self.c2) * u * u;
        rc2.sqrt()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct TidalPotential {
    model: TidalModel,
    gravitomagnetic: bool,
    couplings: TidalParameters,
    x_a: f64,
    x_b: f64,
    /// Light-ring radius of the NNLO tidal potential; pole of the resummed ℓ = 2 term.
    r_lr: f64,
}

impl TidalPotential {
    fn eval<T: Scalar>(&self, u: T) -> T {
        let k = |x: f64| T::cst(x);
        let c = &self.couplings;
        let u2 = u * u;
        let u6 = u2 * u2 * u2;
        let u8 = u6 * u2;

        let mut a = T::zero();
        for ell in 4..=8 {
            a = a - k(c.kappa_t[ell]) * u.powi(2 * ell as i32 + 2);
        }
        a = a - k(c.kappa_t[3]) * u8 * (T::one() + k(c.bar_alpha3_1) * u + k(c.bar_alpha3_2) * u2);

        a = match self.model {
            TidalModel::Nnlo | TidalModel::Off => {
                a - k(c.kappa_t[2]) * u6 * (T::one() + k(c.bar_alpha2_1) * u + k(c.bar_alpha2_2) * u2)
            }
            TidalModel::Teobresum => {
                let (c1, c2, n1, d2) = (8.533515908, 3.043093411, 0.8400636422, 17.7324036);
                let a_cub = k(2.5) * u * (T::one() - k(c1 + c2) * u + k(c1 * c2) * u2);
                let f23 = (T::one() + k(n1) * u) / (T::one() + k(d2) * u2);
                let a_1sf = a_cub * f23;
                let a_2sf = k(337.0 / 28.0) * u2;
                let oom3u = (T::one() - k(self.r_lr) * u).recip();
                let f0 = T::one() + k(3.0) * u2 * oom3u;
                let f1 = a_1sf * oom3u.powf(k(3.5));
                let f2 = a_2sf * oom3u.powf(k(c.pgsf));
                let body = |kappa: f64, x: f64| k(kappa) * u6 * (f0 + k(x) * f1 + k(x * x) * f2);
                a - body(c.kappa_a[2], self.x_a) - body(c.kappa_b[2], self.x_b)
            }
        };

        if self.gravitomagnetic {
            a = a - k(c.jap_t2) * u6 * u * (T::one() + k(c.bar_alpha2j_1) * u);
        }
        a
    }
}

/// Resolved metric model. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    nu: f64,
    a5: f64,
    a6c: f64,
    tides: Option<TidalPotential>,
    /// Vines-Flanagan coefficient of the tidal B potential, κ^T_2 (8 − 15ν).
    b_tidal: f64,
    rc: Option<RcCoefficients>,
    binary: BinaryKind,
}

impl Metric {
    /// Builds the potentials for a run. The spinning form is used whenever either body
    /// spins; the TEOBResum tidal model first locates the NNLO light ring.
    pub fn new(params: &EobParameters) -> Result<Self> {
        let a5c0 = -4237.0 / 60.0 + 2275.0 / 512.0 * PI * PI + 256.0 / 5.0 * LN_2 + 128.0 / 5.0 * EULER_GAMMA;
        let a5c1 = -221.0 / 6.0 + 41.0 / 32.0 * PI * PI;
        let mut metric = Self {
            nu: params.nu,
            a5: a5c0 + params.nu * a5c1,
            a6c: params.a6c,
            tides: None,
            b_tidal: 0.0,
            rc: params.use_spins().then(|| RcCoefficients::new(params)).flatten(),
            binary: params.binary,
        };
        if !params.use_tides() {
            return Ok(metric);
        }

        let mut tides = TidalPotential {
            model: TidalModel::Nnlo,
            gravitomagnetic: params.models.gravitomagnetic == GravitomagneticTides::Pn,
            couplings: params.tides.clone(),
            x_a: params.x1,
            x_b: params.x2,
            r_lr: 0.0,
        };
        metric.b_tidal = params.tides.kappa_t[2] * (8.0 - 15.0 * params.nu);
        if params.models.tidal == TidalModel::Teobresum {
            let nnlo = Self {
                tides: Some(tides.clone()),
                rc: None,
                ..metric.clone()
            };
            tides.r_lr = orbits::light_ring(&nnlo)
                .require("tidal light ring")
                .context("Failed to locate the light ring of the NNLO tidal potential")?;
            tides.model = TidalModel::Teobresum;
        }
        metric.tides = Some(tides);
        Ok(metric)
    }

    pub fn nu(&self) -> f64 {
        self.nu
    }

    pub fn binary(&self) -> BinaryKind {
        self.binary
    }

    pub fn has_tides(&self) -> bool {
        self.tides.is_some()
    }

    pub fn uses_spin(&self) -> bool {
        self.rc.is_some()
    }

    /// Light ring of the NNLO tidal potential, when the resummed model uses it.
    pub fn tidal_light_ring(&self) -> Option<f64> {
        self.tides
            .as_ref()
            .filter(|t| t.model == TidalModel::Teobresum)
            .map(|t| t.r_lr)
    }

    /// Same potentials with the centrifugal radius of another spin configuration.
    pub fn with_spins(&self, params: &EobParameters) -> Metric {
        Self {
            rc: params.use_spins().then(|| RcCoefficients::new(params)).flatten(),
            ..self.clone()
        }
    }

    /// Same potentials with the spin corrections removed.
    pub fn orbital_part(&self) -> Metric {
        Self {
            rc: None,
            ..self.clone()
        }
    }

    /// Point-mass (1,5) Padé of the 5PN Taylor A potential with its logarithms.
    pub fn a_point_mass<T: Scalar>(&self, u: T) -> T {
        let k = |x: f64| T::cst(x);
        let nu = self.nu;
        let pi2 = PI * PI;
        let pi4 = pi2 * pi2;
        let logu = u.ln();
        let a5 = k(self.a5) + k(64.0 / 5.0) * logu;
        let a6 = k(self.a6c) + k(-7004.0 / 105.0 - 144.0 / 5.0 * nu) * logu;

        let den = k(-768.0 + nu * (3584.0 - 123.0 * pi2)) + k(24.0 * nu) * a5;
        let n1 = k(-3.0) * (k(-512.0 - 32.0 * nu * nu + nu * (3520.0 - 123.0 * pi2)) + k(32.0 * nu) * a5 + k(8.0 * nu) * a6)
            / den;
        let d1 = (k(nu * (-3392.0 + 96.0 * nu + 123.0 * pi2)) - k(48.0 * nu) * a5 - k(24.0 * nu) * a6) / den;
        let d2 = k(2.0) * d1;
        let d3 = k(-2.0 * nu)
            * (k(6016.0 + 3392.0 * nu - 246.0 * pi2 - 123.0 * nu * pi2) + k(48.0) * a6 + k(24.0 * (4.0 + nu)) * a5)
            / den;
        let d4 = k(-nu)
            * (k(-4608.0 * (nu - 4.0)) * a6
                + k(36864.0 + nu * (72192.0 - 2952.0 * pi2)) * a5
                + k(nu * (2048.0 * (5582.0 + 9.0 * nu) - 834432.0 * pi2 + 15129.0 * pi4)))
            / (k(96.0) * den);
        let d5 = k(nu)
            * (k(-24.0 * (1536.0 + nu * (-3776.0 + 123.0 * pi2))) * a6
                + k(nu)
                    * (k(-2304.0) * a5 * a5 + k(96.0 * (-3392.0 + 123.0 * pi2)) * a5
                        - k((-3776.0 + 123.0 * pi2) * (-3008.0 - 96.0 * nu + 123.0 * pi2))))
            / (k(96.0) * den);

        let num = T::one() + n1 * u;
        let den = T::one() + u * (d1 + u * (d2 + u * (d3 + u * (d4 + u * d5))));
        num / den
    }

    /// Orbital A potential (point mass plus tides).
    pub fn a_of_u<T: Scalar>(&self, u: T) -> T {
        let a = self.a_point_mass(u);
        match &self.tides {
            Some(tides) => a + tides.eval(u),
            None => a,
        }
    }

    /// D(u) = 1 / (1 + 6νu² − 2(3ν − 26)νu³).
    pub fn d_of_u<T: Scalar>(&self, u: T) -> T {
        let nu = self.nu;
        let u2 = u * u;
        (T::one() + T::cst(6.0 * nu) * u2 - T::cst(2.0 * (3.0 * nu - 26.0) * nu) * u2 * u).recip()
    }

    /// Non-spinning potentials at r.
    pub fn eval(&self, r: f64) -> MetricValues {
        let r = Jet::variable(r);
        let u = r.recip();
        let a = self.a_of_u(u);
        let mut b = self.d_of_u(u) / a;
        if self.b_tidal != 0.0 {
            b = b + Jet::constant(self.b_tidal) * u.powi(6);
        }
        MetricValues::from_jets(a, b)
    }

    pub fn centrifugal_radius(&self, r: f64) -> RcValues {
        match &self.rc {
            Some(coefficients) => coefficients.eval(r),
            None => RcValues::identity(r),
        }
    }

    /// Spinning potentials: A = A_orb(u_c)(1 + 2u_c)/(1 + 2u), B = r² u_c² D(u_c)/A.
    pub fn eval_spin(&self, r: f64, rc: &RcValues) -> MetricValues {
        let rj = Jet::variable(r);
        let u = rj.recip();
        let uc = rc.jet().recip();
        let two = Jet::constant(2.0);
        let a = self.a_of_u(uc) * (Jet::one() + two * uc) / (Jet::one() + two * u);
        let b = rj * rj * uc * uc * self.d_of_u(uc) / a;
        MetricValues::from_jets(a, b)
    }

    /// Potentials in the form used by the dynamics: spinning when spins are present.
    pub fn at(&self, r: f64) -> (MetricValues, RcValues) {
        if self.uses_spin() {
            let rc = self.centrifugal_radius(r);
            (self.eval_spin(r, &rc), rc)
        } else {
            (self.eval(r), RcValues::identity(r))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InputParameters;

    fn resolve(input: InputParameters) -> EobParameters {
        EobParameters::resolve(&input).expect("valid parameters")
    }

    fn finite_difference(f: impl Fn(f64) -> f64, x: f64, h: f64) -> (f64, f64) {
        let (fp, f0, fm) = (f(x + h), f(x), f(x - h));
        ((fp - fm) / (2.0 * h), (fp - 2.0 * f0 + fm) / (h * h))
    }

    #[test]
    fn test_mass_limit_is_schwarzschild() {
        let mut params = resolve(InputParameters::default());
        params.nu = 0.0;
        params.a6c = 0.0;
        let metric = Metric::new(&params).expect("metric");
        for u in [0.05, 0.1, 0.2, 0.3] {
            let a: f64 = metric.a_point_mass(u);
            assert!((a - (1.0 - 2.0 * u)).abs() < 1e-13, "u = {u}: {a}");
        }
    }

    #[test]
    fn derivatives_agree_with_finite_differences() {
        let params = resolve(InputParameters::default());
        let metric = Metric::new(&params).expect("metric");
        let r = 7.3;
        let values = metric.eval(r);
        let (da, d2a) = finite_difference(|x| metric.eval(x).a, r, 1e-4);
        let (db, _) = finite_difference(|x| metric.eval(x).b, r, 1e-4);
        assert!((values.da - da).abs() < 1e-8);
        assert!((values.d2a - d2a).abs() < 1e-6);
        assert!((values.db - db).abs() < 1e-8);
        assert!(!values.horizon);
    }

    #[test]
    fn horizon_is_flagged() {
        let below = MetricValues::from_jets(Jet::new(-1e-3, 0.5, 0.1), Jet::new(-4.0, 1.0, 0.0));
        assert!(below.horizon);
        assert_eq!((below.a, below.b), (1e-3, 4.0));
        let above = MetricValues::from_jets(Jet::new(0.3, 0.5, 0.1), Jet::new(4.0, 1.0, 0.0));
        assert!(!above.horizon);
    }

    #[test]
    fn spin_metric_reduces_to_orbital_form_without_spin_terms() {
        let params = resolve(InputParameters {
            chi1: 0.5,
            chi2: 0.2,
            ..InputParameters::default()
        });
        let metric = Metric::new(&params).expect("metric");
        assert!(metric.uses_spin());
        let r = 9.0;
        let (spinning, rc) = metric.at(r);
        assert!(rc.rc > r);
        let (drc, d2rc) = finite_difference(|x| metric.centrifugal_radius(x).rc, r, 1e-4);
        assert!((rc.drc - drc).abs() < 1e-8);
        assert!((rc.d2rc - d2rc).abs() < 1e-6);
        let (da, _) = finite_difference(|x| metric.at(x).0.a, r, 1e-4);
        assert!((spinning.da - da).abs() < 1e-8);

        let identity = metric.eval_spin(r, &RcValues::identity(r));
        let plain = metric.eval(r);
        assert!((identity.a - plain.a).abs() < 1e-14);
        assert!((identity.b - plain.b).abs() < 1e-12);
    }

    #[test]
    fn tides_deepen_the_potential_and_move_the_light_ring_out() {
        let params = resolve(InputParameters {
            lambda1: 400.0,
            lambda2: 400.0,
            ..InputParameters::default()
        });
        let metric = Metric::new(&params).expect("metric");
        let r_lr = metric.tidal_light_ring().expect("resummed tides need the light ring");
        assert!(r_lr > 2.1 && r_lr < 5.9, "{r_lr}");
        let orbital = Metric::new(&resolve(InputParameters::default())).expect("bbh");
        assert!(metric.eval(8.0).a < orbital.eval(8.0).a);
    }
}
