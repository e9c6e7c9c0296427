//! Effective and real EOB Hamiltonians with the gyro-gravitomagnetic spin-orbit couplings.
//!
//! The spinning and non-spinning Hamiltonians share one expression: without spins the
//! centrifugal radius is r itself and the gyro couplings vanish. Radial derivatives are
//! carried by `Jet`s built from the metric values, momentum derivatives are analytic.

use crate::autodiff::Jet;
use crate::metric::{MetricValues, RcValues};
use crate::params::EobParameters;
use crate::traits::Scalar;
use num_traits::Float;
use serde::{Deserialize, Serialize};

/// Padé coefficients of the gyro-gravitomagnetic functions G_S and G_S*.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GyroCoefficients {
    pub c10: f64,
    pub c20: f64,
    pub c30: f64,
    pub c02: f64,
    pub c12: f64,
    pub c04: f64,
    pub cs10: f64,
    pub cs20: f64,
    pub cs30: f64,
    pub cs40: f64,
    pub cs02: f64,
    pub cs12: f64,
    pub cs04: f64,
}

impl GyroCoefficients {
    /// `cn3lo` is the effective next-to-next-to-next-to-leading spin-orbit coefficient.
    pub fn new(nu: f64, cn3lo: f64) -> Self {
        let nu2 = nu * nu;
        Self {
            c10: 5.0 / 16.0 * nu,
            c20: 51.0 / 8.0 * nu + 41.0 / 256.0 * nu2,
            c30: nu * cn3lo,
            c02: 27.0 / 16.0 * nu,
            c12: 12.0 * nu - 49.0 / 128.0 * nu2,
            c04: -5.0 / 16.0 * nu + 169.0 / 256.0 * nu2,
            cs10: 0.75 + 0.5 * nu,
            cs20: 27.0 / 16.0 + 29.0 / 4.0 * nu + 0.375 * nu2,
            cs30: nu * cn3lo + 135.0 / 32.0,
            cs40: 2835.0 / 256.0,
            cs02: 1.25 + 1.5 * nu,
            cs12: 4.0 + 11.0 * nu - 0.875 * nu2,
            cs04: 5.0 / 48.0 + 25.0 / 12.0 * nu + 0.375 * nu2,
        }
    }

    fn denominators<T: Scalar>(&self, uc: T, p2: f64) -> (T, T) {
        let k = |x: f64| T::cst(x);
        let p4 = p2 * p2;
        let den = T::one()
            + uc * (k(self.c10) + uc * (k(self.c20) + uc * k(self.c30)))
            + k(self.c02 * p2)
            + k(self.c12 * p2) * uc
            + k(self.c04 * p4);
        let den_s = T::one()
            + uc * (k(self.cs10) + uc * (k(self.cs20) + uc * (k(self.cs30) + uc * k(self.cs40))))
            + k(self.cs02 * p2)
            + k(self.cs12 * p2) * uc
            + k(self.cs04 * p4);
        (den, den_s)
    }

    /// G_S = 2u u_c² h_S and G_S* = (3/2) u_c³ h_S* at squared momentum `p2`.
    pub fn eval<T: Scalar>(&self, u: T, uc: T, p2: f64) -> (T, T) {
        let (den, den_s) = self.denominators(uc, p2);
        let uc2 = uc * uc;
        let gs = T::cst(2.0) * u * uc2 / den;
        let gss = T::cst(1.5) * uc2 * uc / den_s;
        (gs, gss)
    }

    /// (∂G_S/∂p, ∂G_S*/∂p) divided by p.
    pub fn momentum_slopes(&self, u: f64, uc: f64, p2: f64) -> (f64, f64) {
        let (den, den_s) = self.denominators(uc, p2);
        let (h, h_s) = (den.recip(), den_s.recip());
        let g0 = 2.0 * u * uc * uc;
        let g0_s = 1.5 * uc * uc * uc;
        (
            -2.0 * g0 * h * h * (self.c02 + self.c12 * uc + 2.0 * self.c04 * p2),
            -2.0 * g0_s * h_s * h_s * (self.cs02 + self.cs12 * uc + 2.0 * self.cs04 * p2),
        )
    }
}

/// Everything the equations of motion need from one Hamiltonian evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HamiltonianValues {
    /// Real Hamiltonian per unit reduced mass, H/μ.
    pub h: f64,
    /// Real energy in units of M, E = νH.
    pub e: f64,
    pub heff: f64,
    /// Orbital (even-in-spin) part of Heff.
    pub heff_orb: f64,
    pub dheff_dr: f64,
    pub d2heff_dr2: f64,
    pub dheff_dprstar: f64,
    /// ∂²Heff/∂pr*² with the gyro couplings taken at pr* = 0.
    pub d2heff_dprstar2: f64,
    pub dheff_dpphi: f64,
    /// Spin-orbit coupling G̃ = G_S S + G_S* S* and its radial slope.
    pub gyro: f64,
    pub dgyro_dr: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hamiltonian {
    nu: f64,
    /// 2ν(4 − 3ν), coefficient of the pr*⁴ term.
    z3: f64,
    s: f64,
    sstar: f64,
    gyro: Option<GyroCoefficients>,
}

impl Hamiltonian {
    pub fn new(params: &EobParameters) -> Self {
        let nu = params.nu;
        Self {
            nu,
            z3: 2.0 * nu * (4.0 - 3.0 * nu),
            s: params.spin_vars.s,
            sstar: params.spin_vars.sstar,
            gyro: params
                .use_spins()
                .then(|| GyroCoefficients::new(nu, params.cn3lo)),
        }
    }

    pub fn nu(&self) -> f64 {
        self.nu
    }

    pub fn z3(&self) -> f64 {
        self.z3
    }

    pub fn has_spin(&self) -> bool {
        self.gyro.is_some()
    }

    /// Real Hamiltonian H/μ = √(1 + 2ν(Heff − 1))/ν.
    pub fn real(&self, heff: f64) -> f64 {
        (1.0 + 2.0 * self.nu * (heff - 1.0)).sqrt() / self.nu
    }

    fn gyro_jets(&self, u: Jet, uc: Jet, p2: f64) -> Jet {
        match &self.gyro {
            Some(coefficients) => {
                let (gs, gss) = coefficients.eval(u, uc, p2);
                gs * Jet::constant(self.s) + gss * Jet::constant(self.sstar)
            }
            None => Jet::constant(0.0),
        }
    }

    /// Evaluates Heff(r, pφ, pr*) on the given potentials; pass the identity centrifugal
    /// radius and the non-spinning metric for non-spinning binaries.
    pub fn eval(&self, r: f64, pphi: f64, prstar: f64, metric: &MetricValues, rc: &RcValues) -> HamiltonianValues {
        let z3 = self.z3;
        let p2 = prstar * prstar;
        let p4 = p2 * p2;

        let u = Jet::variable(r).recip();
        let uc = Jet::new(rc.rc, rc.drc, rc.d2rc).recip();
        let a = Jet::new(metric.a, metric.da, metric.d2a);
        let uc2 = uc * uc;
        let horb2 = Jet::constant(p2) + a * (Jet::constant(1.0) + uc2 * Jet::constant(pphi * pphi + z3 * p4));
        let horb = horb2.sqrt();
        let gyro = self.gyro_jets(u, uc, p2);
        let heff = horb + gyro * Jet::constant(pphi);

        let (a, uc2, horb) = (a.val, uc2.val, horb.val);
        let (slope, slope_s) = match &self.gyro {
            Some(coefficients) => coefficients.momentum_slopes(u.val, uc.val, p2),
            None => (0.0, 0.0),
        };
        let (curv, curv_s) = match &self.gyro {
            Some(coefficients) => coefficients.momentum_slopes(u.val, uc.val, 0.0),
            None => (0.0, 0.0),
        };
        let radial = 1.0 + 2.0 * a * uc2 * z3 * p2;
        let h = self.real(heff.val);
        HamiltonianValues {
            h,
            e: self.nu * h,
            heff: heff.val,
            heff_orb: horb,
            dheff_dr: heff.d1,
            d2heff_dr2: heff.d2,
            dheff_dprstar: pphi * prstar * (slope * self.s + slope_s * self.sstar) + prstar * radial / horb,
            d2heff_dprstar2: pphi * (curv * self.s + curv_s * self.sstar) + radial / horb,
            dheff_dpphi: gyro.val + pphi * a * uc2 / horb,
            gyro: gyro.val,
            dgyro_dr: gyro.d1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InputParameters;
    use crate::metric::Metric;

    fn setup(input: InputParameters) -> (Metric, Hamiltonian) {
        let params = EobParameters::resolve(&input).expect("valid parameters");
        (Metric::new(&params).expect("metric"), Hamiltonian::new(&params))
    }

    fn heff(metric: &Metric, hamiltonian: &Hamiltonian, r: f64, pphi: f64, prstar: f64) -> HamiltonianValues {
        let (values, rc) = metric.at(r);
        hamiltonian.eval(r, pphi, prstar, &values, &rc)
    }

    #[test]
    fn schwarzschild_circular_orbit_energy() {
        let mut params = EobParameters::resolve(&InputParameters::default()).expect("params");
        params.nu = 0.0;
        params.a6c = 0.0;
        let metric = Metric::new(&params).expect("metric");
        let hamiltonian = Hamiltonian::new(&params);
        let r = 6.0;
        let pphi = (r * r / (r - 3.0)).sqrt();
        let values = heff(&metric, &hamiltonian, r, pphi, 0.0);
        assert!((values.heff - (8.0f64 / 9.0).sqrt()).abs() < 1e-12);
        assert!(values.dheff_dr.abs() < 1e-12, "circular orbits are extrema of Heff");
    }

    fn check_derivatives(input: InputParameters) {
        let (metric, hamiltonian) = setup(input);
        let (r, pphi, prstar) = (8.0, 3.6, -0.02);
        let values = heff(&metric, &hamiltonian, r, pphi, prstar);
        let h = 1e-5;
        let fd = |f: &dyn Fn(f64) -> f64, x: f64| (f(x + h) - f(x - h)) / (2.0 * h);

        let dr = fd(&|x| heff(&metric, &hamiltonian, x, pphi, prstar).heff, r);
        let dpphi = fd(&|x| heff(&metric, &hamiltonian, r, x, prstar).heff, pphi);
        let dprstar = fd(&|x| heff(&metric, &hamiltonian, r, pphi, x).heff, prstar);
        let d2r = fd(&|x| heff(&metric, &hamiltonian, x, pphi, prstar).dheff_dr, r);
        assert!((values.dheff_dr - dr).abs() < 1e-9, "{} vs {dr}", values.dheff_dr);
        assert!((values.dheff_dpphi - dpphi).abs() < 1e-9);
        assert!((values.dheff_dprstar - dprstar).abs() < 1e-9);
        assert!((values.d2heff_dr2 - d2r).abs() < 1e-8);
        assert!((values.e - hamiltonian.nu() * values.h).abs() < 1e-15);
    }

    #[test]
    fn derivatives_without_spin() {
        check_derivatives(InputParameters::default());
    }

    #[test]
    fn derivatives_with_aligned_spins() {
        check_derivatives(InputParameters {
            q: 2.0,
            chi1: 0.6,
            chi2: -0.3,
            ..InputParameters::default()
        });
    }

    #[test]
    fn aligned_spins_strengthen_the_coupling() {
        let (metric, hamiltonian) = setup(InputParameters {
            chi1: 0.5,
            chi2: 0.5,
            ..InputParameters::default()
        });
        let values = heff(&metric, &hamiltonian, 10.0, 3.8, 0.0);
        assert!(hamiltonian.has_spin());
        assert!(values.gyro > 0.0);
        assert!(values.heff > values.heff_orb);
    }
}
