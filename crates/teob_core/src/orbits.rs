//! Adiabatic circular-orbit quantities: light ring, last stable orbit, circular angular
//! momentum and the radius of a circular orbit of given frequency.

use crate::autodiff::Jet;
use crate::hamiltonian::Hamiltonian;
use crate::metric::{Metric, MetricValues};
use crate::params::BinaryKind;
use crate::roots::{self, RootOutcome, RootOutcome2, RootSettings};

fn adiabatic_settings() -> RootSettings {
    RootSettings {
        max_iterations: 200,
        abs_tol: 0.0,
        rel_tol: 1e-10,
    }
}

/// (A, dA/du, d²A/du²) of the orbital potential.
fn a_in_u(metric: &Metric, r: f64) -> (f64, f64, f64) {
    let a = metric.a_of_u(Jet::variable(r.recip()));
    (a.val, a.d1, a.d2)
}

/// Photon orbit, where A + u/2 dA/du vanishes. Spin corrections are ignored.
pub fn light_ring(metric: &Metric) -> RootOutcome {
    let (lo, hi) = match (metric.has_tides(), metric.binary()) {
        (false, _) | (true, BinaryKind::BlackHoles) => (1.8, 3.1),
        (true, BinaryKind::BlackHoleNeutronStar) => (1.8, 5.6),
        (true, BinaryKind::NeutronStars) => (2.1, 5.9),
    };
    roots::brent(
        |r| {
            let (a, da, _) = a_in_u(metric, r);
            a + 0.5 * da / r
        },
        lo,
        hi,
        &adiabatic_settings(),
    )
}

/// Adiabatic last stable orbit of the non-spinning potentials.
pub fn lso(metric: &Metric) -> RootOutcome {
    let hi = if metric.has_tides() { 36.0 } else { 6.2 };
    roots::brent(
        |r| {
            let u = r.recip();
            let (a, da, d2a) = a_in_u(metric, r);
            let db = u * u * da + 2.0 * a * u;
            let d2b = d2a * u * u + 4.0 * u * da + 2.0 * a;
            da * d2b - d2a * db
        },
        4.5,
        hi,
        &adiabatic_settings(),
    )
}

/// Last stable orbit of the spinning Hamiltonian, as (r, pφ) with ∂Heff/∂r = ∂²Heff/∂r² = 0.
///
/// The search starts from the non-spinning orbit when that one exists, otherwise from (3, 2).
pub fn lso_spin(metric: &Metric, hamiltonian: &Hamiltonian) -> RootOutcome2 {
    let start = lso(metric)
        .ok()
        .map(|r| [r, circular_pphi(&metric.eval(r), r).0])
        .filter(|x| x[1].is_finite())
        .unwrap_or([3.0, 2.0]);
    let settings = RootSettings {
        max_iterations: 200,
        abs_tol: 1e-10,
        rel_tol: 1e-12,
    };
    roots::newton_2d(
        |[r, pphi]| {
            let (values, rc) = metric.at(r);
            let h = hamiltonian.eval(r, pphi, 0.0, &values, &rc);
            [h.dheff_dr, h.d2heff_dr2]
        },
        start,
        &settings,
    )
}

/// Circular angular momentum j and dj/dr on the non-spinning potentials.
pub fn circular_pphi(values: &MetricValues, r: f64) -> (f64, f64) {
    let (a, da, d2a) = (values.a, values.da, values.d2a);
    let r3 = r * r * r;
    let j2 = r3 * da / (2.0 * a - r * da);
    let j = j2.sqrt();
    let djdr = -j2 * j / r3 * (2.0 - 3.0 * a / (r * da) - a * d2a / (da * da));
    (j, djdr)
}

/// Circular angular momentum with spins: the pφ at which Heff(r, pφ, 0) is extremal in r.
pub fn circular_pphi_spin(metric: &Metric, hamiltonian: &Hamiltonian, r: f64) -> RootOutcome {
    let (values, rc) = metric.at(r);
    let guess = r / (r - 3.0).sqrt();
    let settings = RootSettings {
        max_iterations: 200,
        abs_tol: 0.0,
        rel_tol: 1e-14,
    };
    roots::bisection(
        |pphi| hamiltonian.eval(r, pphi, 0.0, &values, &rc).dheff_dr,
        0.5 * guess,
        1.5 * guess,
        &settings,
    )
}

/// Orbital frequency of the circular orbit at r.
pub fn circular_frequency(metric: &Metric, hamiltonian: &Hamiltonian, r: f64) -> f64 {
    let (values, rc) = metric.at(r);
    let (a, da) = (values.a, values.da);
    let uc = rc.rc.recip();
    let uc2 = uc * uc;
    let dauc2_dr = uc2 * (da - 2.0 * a * uc * rc.drc);

    let j02 = if hamiltonian.has_spin() {
        let coupling = hamiltonian.eval(r, 0.0, 0.0, &values, &rc);
        let dg = coupling.dgyro_dr;
        let qa = dauc2_dr * dauc2_dr - 4.0 * a * uc2 * dg * dg;
        let qb = 2.0 * da * dauc2_dr - 4.0 * a * dg * dg;
        let qc = da * da;
        let delta = if coupling.gyro == 0.0 && dg == 0.0 {
            0.0
        } else {
            qb * qb - 4.0 * qa * qc
        };
        let sign = if dg > 0.0 { 1.0 } else { -1.0 };
        (-qb + sign * delta.sqrt()) / (2.0 * qa)
    } else {
        -da / dauc2_dr
    };

    let j0 = j02.sqrt();
    let h = hamiltonian.eval(r, j0, 0.0, &values, &rc);
    h.dheff_dpphi / (hamiltonian.nu() * h.h)
}

/// Radius of the circular orbit with orbital frequency `omega`, bracketed around the
/// Kepler estimate.
pub fn radius_from_frequency(metric: &Metric, hamiltonian: &Hamiltonian, omega: f64, r_kepler: f64) -> RootOutcome {
    let settings = RootSettings {
        max_iterations: 200,
        abs_tol: 0.0,
        rel_tol: 1e-14,
    };
    roots::bisection(
        |r| circular_frequency(metric, hamiltonian, r) - omega,
        0.5 * r_kepler,
        1.5 * r_kepler,
        &settings,
    )
}
