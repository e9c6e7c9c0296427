//! Post-post-circular initial data at a given separation.
//!
//! The circular angular momentum is evaluated on a small radial stencil around r0 so that
//! the radial derivatives of pφ and pr* entering the post-circular corrections can be
//! taken by centered finite differences.

use crate::dynamics::{r_omega, r_omega_spin};
use crate::error::EobError;
use crate::flux::{FluxInput, FluxModel};
use crate::hamiltonian::Hamiltonian;
use crate::interp;
use crate::metric::Metric;
use crate::nqc::NqcCoefficients;
use crate::orbits;
use crate::params::EobParameters;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Half-width of the radial stencil.
const STENCIL_HALF: usize = 6;
const DR_NONSPINNING: f64 = 1e-10;
const DR_SPINNING: f64 = 1e-4;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InitialData {
    pub r: f64,
    pub phi: f64,
    pub pphi: f64,
    pub prstar: f64,
    /// Radial momentum conjugate to r.
    pub pr: f64,
    /// Circular angular momentum before the post-post-circular correction.
    pub j: f64,
    /// Real energy E = νH of the circular orbit.
    pub energy: f64,
    pub omega: f64,
}

impl InitialData {
    /// ODE state in the order (φ, r, pφ, pr*).
    pub fn state(&self) -> [f64; 4] {
        [self.phi, self.r, self.pphi, self.prstar]
    }
}

fn finite(value: f64, quantity: &str) -> Result<f64, EobError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(EobError::InitialData(format!("{quantity} is not finite ({value})")))
    }
}

fn stencil(r0: f64, dr: f64) -> Vec<f64> {
    (0..2 * STENCIL_HALF)
        .map(|i| r0 + (i as f64 - (STENCIL_HALF - 1) as f64) * dr)
        .collect()
}

/// Builds the initial state at separation `r0`, with φ = 0.
pub fn initial_data(params: &EobParameters, metric: &Metric, flux: &FluxModel, r0: f64) -> Result<InitialData> {
    if !(r0.is_finite() && r0 > 0.0) {
        return Err(EobError::InitialData(format!("initial radius must be positive, got {r0}")).into());
    }
    let hamiltonian = Hamiltonian::new(params);
    let data = if hamiltonian.has_spin() {
        spinning(metric, &hamiltonian, flux, r0)
    } else {
        nonspinning(metric, &hamiltonian, flux, r0)
    }
    .with_context(|| format!("initial data at r0 = {r0}"))?;
    info!(
        target: "teob::dynamics",
        r0 = data.r,
        pphi = data.pphi,
        prstar = data.prstar,
        omega = data.omega,
        "initial data"
    );
    Ok(data)
}

fn nonspinning(metric: &Metric, hamiltonian: &Hamiltonian, flux: &FluxModel, r0: f64) -> Result<InitialData> {
    let nu = hamiltonian.nu();
    let nqc = NqcCoefficients::none();
    let radii = stencil(r0, DR_NONSPINNING);
    let n = radii.len();
    let (mut prstar, mut fphi, mut djdr, mut coefficient) = (vec![0.0; n], vec![0.0; n], vec![0.0; n], vec![0.0; n]);
    let mut circular = Vec::with_capacity(n);

    for (i, &r) in radii.iter().enumerate() {
        let values = metric.eval(r);
        let (j, dj) = orbits::circular_pphi(&values, r);
        let j = finite(j, "circular angular momentum")?;
        let heff0 = (values.a * (1.0 + j * j / (r * r))).sqrt();
        let e0 = (1.0 + 2.0 * nu * (heff0 - 1.0)).sqrt();
        let omega = values.a * j / (r * r * e0 * heff0);
        let r_omg = r_omega(r, values.a, values.da, j, nu);
        let v_phi = omega * r_omg;
        let input = FluxInput {
            x: v_phi * v_phi,
            omega,
            r_omega: r_omg,
            e: e0,
            heff: heff0,
            jhat: j / (r_omg * v_phi),
            r,
            prstar: 0.0,
            ddotr: 0.0,
        };
        fphi[i] = finite(flux.flux(&input, &nqc), "flux")?;
        djdr[i] = dj;
        coefficient[i] = (values.b / values.a).sqrt() * e0 * heff0;
        prstar[i] = finite(coefficient[i] * fphi[i] / dj, "prstar")?;
        circular.push((values, j, e0, omega));
    }

    let dprstar_dr = interp::d0_uniform(&prstar, DR_NONSPINNING)?;
    let i = STENCIL_HALF - 1;
    let (values, j, e0, omega) = circular[i];
    let dprstar_dt = dprstar_dr[i] * fphi[i] / djdr[i];
    let p4 = prstar[i].powi(4);
    let pphi = j * (1.0 + 2.0 * coefficient[i] / values.da * dprstar_dt - hamiltonian.z3() * p4 / (j * j)).sqrt();
    debug!(target: "teob::dynamics", j, pphi, dprstar_dt, "post-circular correction");

    Ok(InitialData {
        r: radii[i],
        phi: 0.0,
        pphi: finite(pphi, "pphi")?,
        prstar: prstar[i],
        pr: prstar[i] * (values.b / values.a).sqrt(),
        j,
        energy: e0,
        omega,
    })
}

fn spinning(metric: &Metric, hamiltonian: &Hamiltonian, flux: &FluxModel, r0: f64) -> Result<InitialData> {
    let nqc = NqcCoefficients::none();
    let radii = stencil(r0, DR_SPINNING);
    let n = radii.len();

    let mut pphi = Vec::with_capacity(n);
    for &r in &radii {
        let j = orbits::circular_pphi_spin(metric, hamiltonian, r).require("initial angular momentum")?;
        pphi.push(j);
    }
    let dpphi_dr = interp::d0_uniform(&pphi, DR_SPINNING)?;

    let (mut prstar, mut fphi) = (vec![0.0; n], vec![0.0; n]);
    let mut circular = Vec::with_capacity(n);
    for (i, &r) in radii.iter().enumerate() {
        let (values, rc) = metric.at(r);
        let h = hamiltonian.eval(r, pphi[i], 0.0, &values, &rc);
        let sqrt_ab = (values.a / values.b).sqrt();
        let c0 = sqrt_ab / h.e * h.d2heff_dprstar2;
        let omega = h.dheff_dpphi / h.e;
        let r_omg = r_omega_spin(values.a, values.da, &rc, pphi[i], h.gyro, h.dgyro_dr, h.e);
        let v_phi = r_omg * omega;
        let input = FluxInput {
            x: v_phi * v_phi,
            omega,
            r_omega: r_omg,
            e: h.e,
            heff: h.heff,
            jhat: pphi[i] / (r_omg * v_phi),
            r,
            prstar: 0.0,
            ddotr: 0.0,
        };
        fphi[i] = finite(flux.flux(&input, &nqc), "flux")?;
        prstar[i] = finite(fphi[i] / (dpphi_dr[i] * c0), "prstar")?;
        circular.push((values, rc, h, sqrt_ab, omega));
    }

    // post-post-circular: solve ṗr* = dπ1/dt for pφ at fixed pr*
    let dprstar_dr = interp::d0_uniform(&prstar, DR_SPINNING)?;
    let i = STENCIL_HALF - 1;
    let (values, rc, h, sqrt_ab, omega) = circular[i];
    let dpi1_dt = dprstar_dr[i] / dpphi_dr[i] * fphi[i];
    let (a, da) = (values.a, values.da);
    let uc = rc.rc.recip();
    let uc2 = uc * uc;
    let p4 = prstar[i].powi(4);
    let centrifugal = da - 2.0 * a * uc * rc.drc;
    let qa = -sqrt_ab * uc2 / (2.0 * h.e * h.heff_orb) * centrifugal;
    let qb = -sqrt_ab / h.e * h.dgyro_dr;
    let qc = -dpi1_dt - sqrt_ab / (2.0 * h.e * h.heff_orb) * (da + hamiltonian.z3() * p4 * uc2 * centrifugal);
    let corrected = 0.5 * (-qb + (qb * qb - 4.0 * qa * qc).sqrt()) / qa;
    debug!(target: "teob::dynamics", j = pphi[i], pphi = corrected, "post-post-circular correction");

    Ok(InitialData {
        r: radii[i],
        phi: 0.0,
        pphi: finite(corrected, "pphi")?,
        prstar: prstar[i],
        pr: prstar[i] / sqrt_ab,
        j: pphi[i],
        energy: h.e,
        omega,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InputParameters;

    fn assert_err_contains<T: std::fmt::Debug>(result: Result<T>, needle: &str) {
        let err = result.expect_err("expected error");
        let message = format!("{err:#}");
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    fn build(input: InputParameters, r0: f64) -> Result<InitialData> {
        let params = EobParameters::resolve(&input)?;
        let metric = Metric::new(&params)?;
        let flux = FluxModel::new(&params);
        initial_data(&params, &metric, &flux, r0)
    }

    #[test]
    fn quasi_circular_inspiral_data() {
        let data = build(InputParameters::default(), 20.0).expect("initial data");
        assert_eq!(data.r, 20.0);
        assert_eq!(data.phi, 0.0);
        assert!(data.prstar < 0.0 && data.prstar > -1e-2, "{}", data.prstar);
        assert!((data.pphi / data.j - 1.0).abs() < 1e-3);
        assert!((data.omega * 20f64.powf(1.5) - 1.0).abs() < 0.1);
        assert!(data.energy < 1.0);
    }

    #[test]
    fn tiny_spins_reproduce_the_nonspinning_data() {
        let plain = build(InputParameters::default(), 16.0).expect("non-spinning");
        let spinning = build(
            InputParameters {
                chi1: 1e-8,
                chi2: 1e-8,
                ..InputParameters::default()
            },
            16.0,
        )
        .expect("spinning");
        assert!((spinning.j / plain.j - 1.0).abs() < 1e-7);
        assert!((spinning.pphi / plain.pphi - 1.0).abs() < 1e-5);
        assert!((spinning.prstar / plain.prstar - 1.0).abs() < 1e-2);
        assert!((spinning.omega / plain.omega - 1.0).abs() < 1e-7);
    }

    #[test]
    fn aligned_spins_inspiral_data() {
        let data = build(
            InputParameters {
                q: 3.0,
                chi1: 0.6,
                chi2: -0.2,
                ..InputParameters::default()
            },
            18.0,
        )
        .expect("initial data");
        assert!(data.prstar < 0.0);
        assert!(data.pr < 0.0);
        assert!(data.pphi.is_finite() && data.pphi > 0.0);
    }

    #[test]
    fn rejects_unphysical_radius() {
        assert_err_contains(build(InputParameters::default(), -1.0), "initial radius");
    }
}
