//! Precession of the orbital plane and of the two spins.
//!
//! The spins S_A, S_B (in units of M²) and the orbital angular momentum direction L̂ are
//! evolved with the N4LO post-Newtonian precession equations, together with the third
//! Euler angle γ and the orbital frequency Mω. The frequency follows one of three laws:
//! the TaylorT4 balance equation, the resummed EOB flux along a post-Newtonian circular
//! orbit, or a spline of the orbital frequency of an EOB run.
//!
//! α and β are not evolved; they are read off L̂ after every step.

use crate::config::SpinFlux;
use crate::dynamics::Trajectory;
use crate::error::{try_grow, EobError};
use crate::fits;
use crate::flux::{FluxInput, FluxModel};
use crate::hamiltonian::Hamiltonian;
use crate::interp::CubicSpline;
use crate::metric::Metric;
use crate::nqc::NqcCoefficients;
use crate::params::{EobParameters, EULER_GAMMA};
use crate::solvers::{AdaptiveStepper, ErrorControl, Tsit5};
use crate::traits::DynamicalSystem;
use anyhow::{bail, Context, Result};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::f64::consts::{LN_2, PI, TAU};
use tracing::{debug, info, warn};

/// Number of evolved variables.
pub const SPIN_VARS: usize = 13;

const S_A: usize = 0;
const S_B: usize = 3;
const L_HAT: usize = 6;
const ALPHA: usize = 9;
const BETA: usize = 10;
const GAMMA: usize = 11;
const OMEGA: usize = 12;

/// Samples of the orbital frequency skipped at the start of a reference run, where
/// numerical noise can make it decrease.
const REFERENCE_SKIP: usize = 5;

/// Controls of the precession integration, in units of M.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpinOdeSettings {
    /// Initial step; backward runs start with a tenth of it.
    pub dt: f64,
    pub abs_tol: f64,
    pub rel_tol: f64,
    /// Forward runs stop once Mω exceeds this value.
    pub omega_stop: f64,
    pub t_stop: Option<f64>,
    pub t_max: f64,
    pub flux: SpinFlux,
    pub chunk: usize,
    pub max_rejections: usize,
}

impl Default for SpinOdeSettings {
    fn default() -> Self {
        Self {
            dt: 1.0,
            abs_tol: 1e-11,
            rel_tol: 1e-9,
            omega_stop: 0.15,
            t_stop: None,
            t_max: 1e12,
            flux: SpinFlux::Pn,
            chunk: 500,
            max_rejections: 100,
        }
    }
}

/// Euler angles of the co-precessing frame, z-y-z convention.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EulerAngles {
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpinState {
    pub s_a: [f64; 3],
    pub s_b: [f64; 3],
    pub l_hat: [f64; 3],
    pub angles: EulerAngles,
    pub omega: f64,
}

impl SpinState {
    pub fn from_array(y: &[f64; SPIN_VARS]) -> Self {
        Self {
            s_a: [y[S_A], y[S_A + 1], y[S_A + 2]],
            s_b: [y[S_B], y[S_B + 1], y[S_B + 2]],
            l_hat: [y[L_HAT], y[L_HAT + 1], y[L_HAT + 2]],
            angles: EulerAngles {
                alpha: y[ALPHA],
                beta: y[BETA],
                gamma: y[GAMMA],
            },
            omega: y[OMEGA],
        }
    }

    pub fn to_array(&self) -> [f64; SPIN_VARS] {
        let mut y = [0.0; SPIN_VARS];
        y[S_A..S_A + 3].copy_from_slice(&self.s_a);
        y[S_B..S_B + 3].copy_from_slice(&self.s_b);
        y[L_HAT..L_HAT + 3].copy_from_slice(&self.l_hat);
        y[ALPHA] = self.angles.alpha;
        y[BETA] = self.angles.beta;
        y[GAMMA] = self.angles.gamma;
        y[OMEGA] = self.omega;
        y
    }
}

/// Spins decomposed along and across L̂.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpinProjections {
    pub l_hat: [f64; 3],
    pub s_a_parallel: f64,
    pub s_b_parallel: f64,
    pub s_a_perp: [f64; 3],
    pub s_b_perp: [f64; 3],
}

impl SpinProjections {
    fn new(s_a: Vector3<f64>, s_b: Vector3<f64>, l_hat: Vector3<f64>) -> Self {
        let n = l_hat.normalize();
        let (pa, pb) = (s_a.dot(&n), s_b.dot(&n));
        let (perp_a, perp_b) = (s_a - pa * n, s_b - pb * n);
        Self {
            l_hat: n.into(),
            s_a_parallel: pa,
            s_b_parallel: pb,
            s_a_perp: perp_a.into(),
            s_b_perp: perp_b.into(),
        }
    }

    /// |S_A⊥ + S_B⊥|²
    pub fn perpendicular_norm_squared(&self) -> f64 {
        (Vector3::from(self.s_a_perp) + Vector3::from(self.s_b_perp)).norm_squared()
    }
}

/// Time-ordered precession samples.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SpinTrajectory {
    pub t: Vec<f64>,
    pub y: Vec<[f64; SPIN_VARS]>,
}

impl SpinTrajectory {
    pub fn len(&self) -> usize {
        self.t.len()
    }

    pub fn is_empty(&self) -> bool {
        self.t.is_empty()
    }

    pub fn state(&self, i: usize) -> SpinState {
        SpinState::from_array(&self.y[i])
    }

    pub fn last(&self) -> Option<(f64, SpinState)> {
        let i = self.len().checked_sub(1)?;
        Some((self.t[i], self.state(i)))
    }

    fn column(&self, v: usize) -> Vec<f64> {
        self.y.iter().map(|y| y[v]).collect()
    }

    pub fn omega(&self) -> Vec<f64> {
        self.column(OMEGA)
    }

    pub fn push(&mut self, t: f64, y: [f64; SPIN_VARS], chunk: usize) -> Result<()> {
        if let Some(&last) = self.t.last() {
            if t <= last {
                bail!("spin trajectory time must increase (t = {t} after {last}).");
            }
        }
        let chunk = chunk.max(1);
        if self.t.len() == self.t.capacity() {
            try_grow(&mut self.t, chunk)?;
        }
        if self.y.len() == self.y.capacity() {
            try_grow(&mut self.y, chunk)?;
        }
        self.t.push(t);
        self.y.push(y);
        Ok(())
    }

    pub fn truncate(&mut self, n: usize) {
        self.t.truncate(n);
        self.y.truncate(n);
    }

    /// Keeps the samples before `t_join` and appends those of `other` from `t_join` on.
    /// A sample of `other` coinciding with the last kept one is dropped.
    pub fn join(&mut self, other: &SpinTrajectory, t_join: f64) -> Result<()> {
        let (Some(&a0), Some(&b_end)) = (self.t.first(), other.t.last()) else {
            bail!("cannot join empty spin trajectories.");
        };
        if t_join > b_end || t_join <= a0 {
            debug!(target: "teob::spin", t_join, "join time outside range, nothing joined");
            return Ok(());
        }
        let keep = self.t.partition_point(|&t| t < t_join);
        let mut from = other.t.partition_point(|&t| t < t_join);
        if keep > 0 && from < other.len() && (other.t[from] - self.t[keep - 1]).abs() < 1e-10 {
            from += 1;
        }
        self.truncate(keep);
        let appended = other.len() - from;
        try_grow(&mut self.t, appended)?;
        try_grow(&mut self.y, appended)?;
        self.t.extend_from_slice(&other.t[from..]);
        self.y.extend_from_slice(&other.y[from..]);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum BackwardTarget {
    Frequency(f64),
    Time(f64),
}

/// Behaviour past the end of the computed precession.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Boundary {
    /// Integrate further until the requested point is covered.
    ContinueIntegration,
    /// Return the value at the nearest end.
    Clamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpinTermination {
    FrequencyStop,
    Plateau,
    FrequencyMaximum,
    TimeStop,
    NegativeFrequency,
    ReferenceExhausted,
    MaxTime,
}

impl SpinTermination {
    pub fn reason(&self) -> &'static str {
        match self {
            SpinTermination::FrequencyStop => "stop frequency reached",
            SpinTermination::Plateau => "frequency plateau",
            SpinTermination::FrequencyMaximum => "frequency maximum reached",
            SpinTermination::TimeStop => "stop time reached",
            SpinTermination::NegativeFrequency => "negative frequency",
            SpinTermination::ReferenceExhausted => "end of the reference dynamics",
            SpinTermination::MaxTime => "maximum time reached",
        }
    }
}

/// Initial α from the next-to-leading-order in-plane spin configuration at v0 = (πf0)^{1/3}.
pub fn initial_alpha(params: &EobParameters) -> f64 {
    let q = params.q;
    let [c1x, c1y, c1z] = params.chi1_vec;
    let [c2x, c2y, c2z] = params.chi2_vec;
    let v = (PI * params.f0).cbrt();
    let aligned = c1z + q * c2z;
    let x = -3.0 * q * (c1y + q * c2y) * aligned * v + q * (c1y * (4.0 + 3.0 * q) + q * c2y * (3.0 + 4.0 * q));
    let y = 3.0 * q * (c1x + q * c2x) * aligned * v - q * (c1x * (4.0 + 3.0 * q) + q * c2x * (3.0 + 4.0 * q));
    y.atan2(x)
}

fn beta_of(l_z: f64) -> f64 {
    l_z.clamp(-1.0, 1.0).acos()
}

/// α = atan2(L̂y, L̂x), continued from `previous` to avoid 2π jumps.
fn alpha_of(l_x: f64, l_y: f64, previous: f64) -> f64 {
    let alpha = l_y.atan2(l_x);
    alpha + TAU * ((previous - alpha) / TAU).round()
}

fn update_angles(y: &mut [f64; SPIN_VARS], previous_alpha: f64) {
    y[ALPHA] = alpha_of(y[L_HAT], y[L_HAT + 1], previous_alpha);
    y[BETA] = beta_of(y[L_HAT + 2]);
}

/// Mass-ratio dependent coefficients of the precession equations.
#[derive(Debug, Clone)]
struct PrecessionCoefficients {
    nu: f64,
    q: f64,
    v5: [f64; 2],
    v7: [f64; 2],
    v9: [f64; 2],
    cs: [f64; 2],
    cs_l: [f64; 2],
    l2pn: [f64; 2],
}

impl PrecessionCoefficients {
    fn new(nu: f64, q: f64, x1: f64, x2: f64) -> Self {
        let nu2 = nu * nu;
        let nu3 = nu2 * nu;
        let dm = x1 - x2;
        let v7 = 0.5625 + 1.25 * nu - nu2 / 24.0;
        let v7_dm = dm * (-0.5625 + 0.625 * nu);
        let v9 = 0.84375 + 0.1875 * nu - 3.28125 * nu2 - nu3 / 48.0;
        let v9_dm = dm * (-0.84375 + 4.875 * nu - 0.15625 * nu2);
        Self {
            nu,
            q,
            v5: [nu * (2.0 + 1.5 / q), nu * (2.0 + 1.5 * q)],
            v7: [v7 + v7_dm, v7 - v7_dm],
            v9: [v9 + v9_dm, v9 - v9_dm],
            cs: [-0.25 * (3.0 + 1.0 / x1), -0.25 * (3.0 + 1.0 / x2)],
            cs_l: [-(1.0 + 27.0 / x1) / 12.0, -(1.0 + 27.0 / x2) / 12.0],
            l2pn: [1.5 + nu / 6.0, 3.375 - 2.375 * nu + nu2 / 24.0],
        }
    }

    /// Ṡ_A, Ṡ_B, dL̂/dt and dγ/dt.
    fn precession(
        &self,
        v: f64,
        s_a: &Vector3<f64>,
        s_b: &Vector3<f64>,
        l: &Vector3<f64>,
    ) -> (Vector3<f64>, Vector3<f64>, Vector3<f64>, f64) {
        let (v2, v3) = (v * v, v * v * v);
        let v5 = v3 * v2;
        let v6 = v5 * v;
        let v7 = v6 * v;
        let v9 = v7 * v2;

        let q_sab = (s_a / self.q + s_b).dot(l);
        let sab_q = (s_a + s_b * self.q).dot(l);
        let omega_a_nlo = l * (v5 * self.v5[0] - 1.5 * v6 * q_sab) + s_b * (0.5 * v6);
        let omega_b_nlo = l * (v5 * self.v5[1] - 1.5 * v6 * sab_q) + s_a * (0.5 * v6);
        let omega_a_nnlo = omega_a_nlo + l * (v7 * self.v7[0]);
        let omega_b_nnlo = omega_b_nlo + l * (v7 * self.v7[1]);
        let omega_a = omega_a_nnlo + l * (v9 * self.v9[0]);
        let omega_b = omega_b_nnlo + l * (v9 * self.v9[1]);

        let dsa_nlo = omega_a_nlo.cross(s_a);
        let dsb_nlo = omega_b_nlo.cross(s_b);
        let dsa_nnlo = omega_a_nnlo.cross(s_a);
        let dsb_nnlo = omega_b_nnlo.cross(s_b);
        let dsa = omega_a.cross(s_a);
        let dsb = omega_b.cross(s_b);

        // total angular momentum conservation at 2PN
        let l2pn = 1.0 + v2 * self.l2pn[0] + v2 * v2 * self.l2pn[1];
        let v_nu = v / self.nu;
        let (sa_l, sb_l) = (s_a.dot(l), s_b.dot(l));
        let nlo_sum = dsa_nlo + dsb_nlo;
        let coupling_a = -(nlo_sum * (v_nu * sa_l)) + l * (-v_nu * dsb_nlo.dot(s_a) + dsa_nnlo.dot(l));
        let coupling_b = -(nlo_sum * (v_nu * sb_l)) + l * (-v_nu * dsa_nlo.dot(s_b) + dsb_nnlo.dot(l));
        let dl = ((dsa + dsb) * (-v_nu)
            - (dsa_nnlo * self.cs[0] + dsb_nnlo * self.cs[1]) * v3
            - (coupling_a * self.cs_l[0] + coupling_b * self.cs_l[1]) * v3)
            / l2pn;
        let dl = dl - l * dl.dot(l);

        let planar = l.x * l.x + l.y * l.y;
        let dgamma = if planar == 0.0 {
            0.0
        } else {
            l.z * (l.x * dl.y - l.y * dl.x) / planar
        };
        (dsa, dsb, dl, dgamma)
    }
}

/// TaylorT4 frequency derivative with leading spin-orbit, spin-spin and tidal terms.
#[derive(Debug, Clone)]
struct TaylorT4 {
    a: [f64; 8],
    b6: f64,
    beta3: [f64; 2],
    beta5: [f64; 2],
    beta6: [f64; 2],
    beta7: [f64; 2],
    /// S_A·S_B, (S_A·L̂)(S_B·L̂), S_A², (S_A·L̂)², S_B², (S_B·L̂)²
    sigma4: [f64; 6],
    tidal: f64,
}

impl TaylorT4 {
    fn new(params: &EobParameters) -> Self {
        let nu = params.nu;
        let nu2 = nu * nu;
        let nu3 = nu2 * nu;
        let (ma, mb) = (params.x1, params.x2);
        let pi2 = PI * PI;
        let ratio = [mb / ma, ma / mb];
        let beta = |c0: f64, c1: f64| [c0 + ratio[0] * c1, c0 + ratio[1] * c1];

        let mut a = [0.0; 8];
        a[0] = 96.0 / 5.0 * nu;
        a[2] = -743.0 / 336.0 - 11.0 / 4.0 * nu;
        a[3] = 4.0 * PI;
        a[4] = 34103.0 / 18144.0 + 13661.0 / 2016.0 * nu + 59.0 / 18.0 * nu2;
        a[5] = -4159.0 / 672.0 * PI - 189.0 / 8.0 * PI * nu;
        a[6] = 16447322263.0 / 139708800.0 + 16.0 / 3.0 * pi2
            - 856.0 / 105.0 * 16f64.ln()
            - 1712.0 / 105.0 * EULER_GAMMA
            + nu * (451.0 / 48.0 * pi2 - 56198689.0 / 217728.0)
            + nu2 * 541.0 / 896.0
            - nu3 * 5605.0 / 2592.0;
        a[7] = -4415.0 / 4032.0 * PI + 358675.0 / 6048.0 * PI * nu + 91495.0 / 1512.0 * PI * nu2;

        let tidal = if params.use_tides() {
            let lambda = |m: f64, l: f64| 6.0 * m.powi(4) * (12.0 - 11.0 * m) * l;
            lambda(ma, params.tides.lambda_a[2]) + lambda(mb, params.tides.lambda_b[2])
        } else {
            0.0
        };

        Self {
            a,
            b6: -1712.0 / 315.0,
            beta3: beta(113.0 / 12.0, 25.0 / 4.0),
            beta5: beta(31319.0 / 1008.0 - 1159.0 / 24.0 * nu, 809.0 / 84.0 - 281.0 / 8.0 * nu),
            beta6: beta(PI * 75.0 / 2.0, PI * 151.0 / 6.0),
            beta7: beta(
                130325.0 / 756.0 - 796069.0 / 2016.0 * nu + 100019.0 / 864.0 * nu2,
                1195759.0 / 18144.0 - 257023.0 / 1008.0 * nu + 2903.0 / 32.0 * nu2,
            ),
            sigma4: [
                247.0 / (48.0 * nu),
                -721.0 / (48.0 * nu),
                233.0 / (96.0 * ma * ma),
                -719.0 / (96.0 * ma * ma),
                233.0 / (96.0 * mb * mb),
                -719.0 / (96.0 * mb * mb),
            ],
            tidal,
        }
    }

    fn omega_dot(&self, omega: f64, s_a: &Vector3<f64>, s_b: &Vector3<f64>, l: &Vector3<f64>) -> f64 {
        let (sa_l, sb_l) = (s_a.dot(l), s_b.dot(l));
        let projected = |c: &[f64; 2]| c[0] * sa_l + c[1] * sb_l;
        let s = &self.sigma4;
        let sigma4 = s[0] * s_a.dot(s_b)
            + s[1] * sa_l * sb_l
            + s[2] * s_a.norm_squared()
            + s[3] * sa_l * sa_l
            + s[4] * s_b.norm_squared()
            + s[5] * sb_l * sb_l;

        let mut a = self.a;
        a[3] -= projected(&self.beta3);
        a[4] -= sigma4;
        a[5] -= projected(&self.beta5);
        a[6] -= projected(&self.beta6);
        a[7] -= projected(&self.beta7);

        let v = omega.cbrt();
        let ln_omega = omega.ln();
        let mut sum = 1.0 + self.tidal * v.powi(10);
        for (i, ai) in a.iter().enumerate().skip(2) {
            let log = if i == 6 { self.b6 * ln_omega } else { 0.0 };
            sum += (ai + log) * v.powi(i as i32);
        }
        a[0] * omega.powf(11.0 / 3.0) * sum
    }
}

/// Resummed EOB flux along a circular orbit whose angular momentum j(v) and inverse
/// radius u(j) are the post-Newtonian ones, spins projected on L̂.
#[derive(Debug, Clone)]
struct HybridFlux<'a> {
    params: &'a EobParameters,
    metric: Metric,
}

impl HybridFlux<'_> {
    fn omega_dot(&self, omega: f64, s_a: &Vector3<f64>, s_b: &Vector3<f64>, l: &Vector3<f64>) -> f64 {
        let p = self.params;
        let (nu, x1, x2, x12) = (p.nu, p.x1, p.x2, p.x12);
        let [cq1, cq2] = p.tides.c_q;
        let (nu2, nu3, nu4) = (nu * nu, nu * nu * nu, nu * nu * nu * nu);
        let pi2 = PI * PI;

        let c1 = s_a.dot(l) / (x1 * x1);
        let c2 = s_b.dot(l) / (x2 * x2);
        let (a1, a2) = (x1 * c1, x2 * c2);
        let a0 = a1 + a2;
        let a_ab = a1 - a2;
        let a_cq = cq1 * a1 * a1 + 2.0 * a1 * a2 + cq2 * a2 * a2;
        let a_diff = cq1 * a1 * a1 - cq2 * a2 * a2;
        let s_l = x1 * a1 + x2 * a2;
        let sigma_l = x2 * c2 - x1 * c1;

        let v = omega.cbrt();
        let x = v * v;
        let (x2p, x3p, x4p) = (x * x, x * x * x, x * x * x * x);

        // j(v) through 4PN orbital, 3.5PN spin-orbit and 2PN spin-spin
        let j4 = -55.0 / 31104.0 * nu4 - 215.0 / 1728.0 * nu3
            + (356035.0 / 3456.0 - 2255.0 / 576.0 * pi2) * nu2
            + nu * (-64.0 / 3.0 * (16.0 * x).ln() - 6455.0 / 1536.0 * pi2 - 128.0 / 3.0 * EULER_GAMMA
                + 98869.0 / 5760.0)
            + 2835.0 / 128.0;
        let j_orb = [
            1.5 + nu / 6.0,
            27.0 / 8.0 - 19.0 / 8.0 * nu + nu2 / 24.0,
            7.0 / 1296.0 * nu3 + 31.0 / 24.0 * nu2 + (41.0 / 24.0 * pi2 - 6889.0 / 144.0) * nu + 135.0 / 16.0,
            j4,
        ];
        let so = [
            -35.0 / 6.0 * s_l - 2.5 * x12 * sigma_l,
            (-77.0 / 8.0 + 427.0 / 72.0 * nu) * s_l + x12 * (-21.0 / 8.0 + 35.0 / 12.0 * nu) * sigma_l,
            (-405.0 / 16.0 + 1101.0 / 16.0 * nu - 29.0 / 16.0 * nu2) * s_l
                + x12 * (-81.0 / 6.0 + 117.0 / 4.0 * nu - 15.0 / 16.0 * nu2) * sigma_l,
        ];
        let self_coupling = 0.5 + 0.5 * x12 - nu;
        let ss = self_coupling * c1 * c1 + 2.0 * nu * c1 * c2 + self_coupling * c2 * c2;

        let jhat = 1.0 + j_orb[0] * x + j_orb[1] * x2p + j_orb[2] * x3p + j_orb[3] * x4p
            + so[0] * x * v
            + so[1] * x2p * v
            + so[2] * x3p * v
            + ss * x2p;
        let djhat_dx = j_orb[0] + 2.0 * j_orb[1] * x + 3.0 * j_orb[2] * x2p + 4.0 * j_orb[3] * x3p
            - 64.0 / 3.0 * nu * x3p
            + 1.5 * so[0] * v
            + 2.5 * so[1] * x * v
            + 3.5 * so[2] * x2p * v
            + 2.0 * ss * x;
        let djhat_domega = 2.0 / 3.0 * djhat_dx / v;
        let dj_domega = djhat_domega / v - jhat / (3.0 * x2p);

        // u(j)
        let ooj = v / jhat;
        let o = |n: i32| ooj.powi(n);
        let delta_nlo = -33.0 / 8.0 * a0 * a0 + 3.0 * a_cq - 0.125 * (1.0 + 4.0 * nu) * a_ab * a_ab
            + x12 * (0.25 * a0 * a_ab + a_diff);
        let delta_nnlo = -(4419.0 / 224.0 + 1263.0 / 224.0 * nu) * a0 * a0
            + (387.0 / 28.0 - 207.0 / 28.0 * nu) * a_cq
            + (11.0 / 32.0 - 127.0 / 32.0 * nu + 3.0 / 8.0 * nu2) * a_ab * a_ab
            + x12 * (-(29.0 / 112.0 + 21.0 / 8.0 * nu) * a0 * a_ab + 163.0 / 28.0 * a_diff);
        let u_orb = o(2) + 3.0 * o(4) + o(6) * (18.0 - 3.0 * nu)
            + o(8) * (135.0 + (-311.0 / 3.0 + 41.0 / 16.0 * pi2) * nu)
            + o(10)
                * (1134.0
                    - (163063.0 / 120.0 + 64.0 * EULER_GAMMA - 31921.0 / 1024.0 * pi2
                        + 128.0 * LN_2
                        + 64.0 * ooj.ln())
                        * nu
                    + (1321.0 / 12.0 - 205.0 / 64.0 * pi2) * nu2);
        let u_so = -0.75 * (7.0 * a0 + x12 * a_ab) * o(5)
            + ((-465.0 / 8.0 + 11.0 / 4.0 * nu) * a0 - (87.0 / 8.0 + nu / 4.0) * x12 * a_ab) * o(7)
            + ((-1269.0 / 2.0 + 1273.0 / 8.0 * nu + 25.0 / 32.0 * nu2) * a0
                + (-531.0 / 4.0 + 103.0 / 8.0 * nu + 5.0 / 32.0 * nu2) * x12 * a_ab)
                * o(9);
        let u_ss = 2.0 * a_cq * o(6)
            + (441.0 / 8.0 * a0 * a0 + 22.0 * a_cq + (9.0 / 8.0 - 4.5 * nu) * a_ab * a_ab
                + 63.0 / 4.0 * x12 * a0 * a_ab
                + 2.5 * delta_nlo)
                * o(8)
            + ((9009.0 / 8.0 - 1155.0 / 16.0 * nu) * a0 * a0
                + (234.0 - 22.5 * nu) * a_cq
                + (261.0 / 8.0 - 2073.0 / 16.0 * nu - 3.75 * nu2) * a_ab * a_ab
                + (1557.0 / 4.0 - 3.75 * nu) * x12 * a0 * a_ab
                + 29.0 * delta_nlo
                + 3.0 * delta_nnlo)
                * o(10);
        let r = (u_orb + u_so + u_ss).recip();

        let projected = p.with_aligned_spins(c1, c2);
        let metric = self.metric.with_spins(&projected);
        let hamiltonian = Hamiltonian::new(&projected);
        let flux = FluxModel::new(&projected);
        let (values, rc) = metric.at(r);
        let h = hamiltonian.eval(r, jhat / v, 0.0, &values, &rc);
        let input = FluxInput {
            x,
            omega,
            r_omega: x.recip(),
            e: h.e,
            heff: h.heff,
            jhat,
            r,
            prstar: 0.0,
            ddotr: 0.0,
        };
        flux.flux(&input, &NqcCoefficients::none()) / dj_domega
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrequencyLaw {
    TaylorT4,
    Hybrid,
    /// Mω is imposed from outside after every step.
    Frozen,
}

/// Right-hand side of the precession system.
pub struct SpinRhs<'a> {
    precession: PrecessionCoefficients,
    taylor: TaylorT4,
    hybrid: Option<HybridFlux<'a>>,
    law: FrequencyLaw,
}

impl<'a> SpinRhs<'a> {
    pub fn new(params: &'a EobParameters) -> Result<Self> {
        let hybrid = match params.spin_ode.flux {
            SpinFlux::Hybrid => Some(HybridFlux {
                params,
                metric: Metric::new(params).context("potentials of the hybrid spin flux")?,
            }),
            _ => None,
        };
        Ok(Self {
            precession: PrecessionCoefficients::new(params.nu, params.q, params.x1, params.x2),
            taylor: TaylorT4::new(params),
            law: if hybrid.is_some() {
                FrequencyLaw::Hybrid
            } else {
                FrequencyLaw::TaylorT4
            },
            hybrid,
        })
    }

    fn base_law(&self) -> FrequencyLaw {
        if self.hybrid.is_some() {
            FrequencyLaw::Hybrid
        } else {
            FrequencyLaw::TaylorT4
        }
    }
}

impl DynamicalSystem<f64> for SpinRhs<'_> {
    fn dimension(&self) -> usize {
        SPIN_VARS
    }

    fn apply(&self, _t: f64, y: &[f64], out: &mut [f64]) {
        let s_a = Vector3::new(y[S_A], y[S_A + 1], y[S_A + 2]);
        let s_b = Vector3::new(y[S_B], y[S_B + 1], y[S_B + 2]);
        let l = Vector3::new(y[L_HAT], y[L_HAT + 1], y[L_HAT + 2]);
        let omega = y[OMEGA];

        let (dsa, dsb, dl, dgamma) = self.precession.precession(omega.cbrt(), &s_a, &s_b, &l);
        out.iter_mut().for_each(|o| *o = 0.0);
        out[S_A..S_A + 3].copy_from_slice(dsa.as_slice());
        out[S_B..S_B + 3].copy_from_slice(dsb.as_slice());
        out[L_HAT..L_HAT + 3].copy_from_slice(dl.as_slice());
        out[GAMMA] = dgamma;
        out[OMEGA] = match (self.law, &self.hybrid) {
            (FrequencyLaw::Frozen, _) => 0.0,
            (FrequencyLaw::Hybrid, Some(hybrid)) => hybrid.omega_dot(omega, &s_a, &s_b, &l),
            _ => self.taylor.omega_dot(omega, &s_a, &s_b, &l),
        };
    }
}

/// Orbital frequency of an EOB run used as the frequency law.
#[derive(Debug, Clone)]
struct ReferenceFrequency {
    omega_of_t: CubicSpline,
    t_of_omega: CubicSpline,
    omega_start: f64,
    omega_max: f64,
    t_end: f64,
    /// Spin time minus reference time, fixed when the reference takes over.
    shift: Option<f64>,
}

impl ReferenceFrequency {
    fn new(t: &[f64], omega: &[f64]) -> Result<Self> {
        if omega.len() < REFERENCE_SKIP + 4 {
            bail!("reference dynamics too short ({} samples).", omega.len());
        }
        let mut peak = omega.len() - 1;
        for i in REFERENCE_SKIP + 1..omega.len() - 1 {
            if omega[i + 1] <= omega[i] {
                peak = i;
                break;
            }
        }
        let omega_of_t = CubicSpline::new(t, omega)?;
        let t_of_omega = CubicSpline::new(&omega[REFERENCE_SKIP..=peak], &t[REFERENCE_SKIP..=peak])
            .context("inverting the reference frequency")?;
        Ok(Self {
            omega_of_t,
            t_of_omega,
            omega_start: omega[REFERENCE_SKIP],
            omega_max: omega[peak],
            t_end: t[t.len() - 1],
            shift: None,
        })
    }
}

/// Spin-precession integrator and interpolator.
pub struct SpinDynamics<'a> {
    params: &'a EobParameters,
    settings: SpinOdeSettings,
    rhs: SpinRhs<'a>,
    reference: Option<ReferenceFrequency>,
    trajectory: SpinTrajectory,
    /// Next proposed forward step.
    dt: f64,
    /// (t, Mω) where the forward run starts, once a backward run was joined.
    forward_start: Option<(f64, f64)>,
    exhausted: bool,
    angle_splines: Option<[CubicSpline; 3]>,
    spin_splines: Option<Vec<CubicSpline>>,
}

impl<'a> SpinDynamics<'a> {
    /// Sets up the initial data at t = 0, Mω = πf0: spins along their input directions,
    /// L̂ = ẑ. `reference` is the orbital dynamics, used by the EOB frequency law.
    pub fn new(params: &'a EobParameters, reference: Option<&Trajectory>) -> Result<Self> {
        let settings = params.spin_ode;
        if !(settings.dt.is_finite() && settings.dt != 0.0) {
            return Err(EobError::InvalidConfig(format!("spin_odes_dt must be non-zero, got {}", settings.dt)).into());
        }
        let reference = match (settings.flux, reference) {
            (SpinFlux::Eob, Some(orbital)) => {
                let omega = if params.use_spins() {
                    &orbital.omega_orb
                } else {
                    &orbital.omega
                };
                Some(ReferenceFrequency::new(&orbital.t, omega)?)
            }
            (SpinFlux::Eob, None) => {
                warn!(target: "teob::spin", "EOB spin flux without orbital dynamics, using the PN law");
                None
            }
            _ => None,
        };

        let (m1, m2) = (params.x1 * params.x1, params.x2 * params.x2);
        let alpha0 = initial_alpha(params);
        let state = SpinState {
            s_a: params.chi1_vec.map(|c| c * m1),
            s_b: params.chi2_vec.map(|c| c * m2),
            l_hat: [0.0, 0.0, 1.0],
            angles: EulerAngles {
                alpha: alpha0,
                beta: 0.0,
                gamma: alpha0,
            },
            omega: params.omega0(),
        };
        let mut trajectory = SpinTrajectory::default();
        trajectory.push(0.0, state.to_array(), settings.chunk)?;

        Ok(Self {
            params,
            settings,
            rhs: SpinRhs::new(params)?,
            reference,
            trajectory,
            dt: settings.dt.abs(),
            forward_start: None,
            exhausted: false,
            angle_splines: None,
            spin_splines: None,
        })
    }

    pub fn trajectory(&self) -> &SpinTrajectory {
        &self.trajectory
    }

    pub fn into_trajectory(self) -> SpinTrajectory {
        self.trajectory
    }

    /// Splice point of a backward extension, as (t, Mω).
    pub fn forward_start(&self) -> Option<(f64, f64)> {
        self.forward_start
    }

    fn stepper(&self) -> AdaptiveStepper<Tsit5<f64>> {
        let control = ErrorControl {
            abs_tol: self.settings.abs_tol,
            rel_tol: self.settings.rel_tol,
            ..ErrorControl::default()
        };
        let mut stepper = AdaptiveStepper::new(Tsit5::new(SPIN_VARS), SPIN_VARS, control);
        stepper.max_rejections = self.settings.max_rejections;
        stepper
    }

    fn invalidate(&mut self) {
        self.angle_splines = None;
        self.spin_splines = None;
    }

    /// Forward integration from the initial data until the stop frequency, a frequency
    /// maximum or plateau, or the stop time.
    pub fn integrate(&mut self) -> Result<SpinTermination> {
        if self.trajectory.len() != 1 {
            bail!("forward spin integration must start from the initial data.");
        }
        if let Some(reference) = self.reference.as_mut() {
            let omega0 = self.trajectory.y[0][OMEGA];
            if omega0 > reference.omega_max {
                warn!(target: "teob::spin", omega0, "initial frequency above the reference peak, using the PN law");
                self.reference = None;
            } else if omega0 >= reference.omega_start {
                let t_ref = reference.t_of_omega.eval(omega0);
                reference.shift = Some(-t_ref);
                self.trajectory.y[0][OMEGA] = reference.omega_of_t.eval(t_ref);
            }
        }

        let termination = self.advance(Some(self.settings.omega_stop), self.settings.t_stop)?;
        if self.trajectory.len() > 1 {
            // L̂ = ẑ leaves α undefined at t = 0
            let second = self.trajectory.y[1];
            self.trajectory.y[0][ALPHA] = second[ALPHA];
            self.trajectory.y[0][GAMMA] = second[GAMMA];
        }
        let (t, last) = self.trajectory.last().map(|(t, s)| (t, s.omega)).unwrap_or_default();
        info!(
            target: "teob::spin",
            reason = termination.reason(),
            samples = self.trajectory.len(),
            t,
            omega = last,
            "spin precession terminated"
        );
        Ok(termination)
    }

    fn advance(&mut self, omega_stop: Option<f64>, t_stop: Option<f64>) -> Result<SpinTermination> {
        self.invalidate();
        let mut stepper = self.stepper();
        let chunk = self.settings.chunk;
        let t_max = self.settings.t_max;
        let Some((mut t, start)) = self.trajectory.last() else {
            bail!("empty spin trajectory.");
        };
        let mut y = start.to_array();
        let mut dt = self.dt;

        let termination = loop {
            let frozen = self.reference.as_ref().is_some_and(|r| r.shift.is_some());
            self.rhs.law = if frozen {
                FrequencyLaw::Frozen
            } else {
                self.rhs.base_law()
            };
            stepper
                .evolve(&self.rhs, &mut t, t_max, &mut dt, &mut y)
                .with_context(|| format!("spin precession at t = {t}"))?;

            let n = self.trajectory.len();
            let previous = self.trajectory.y[n - 1];
            if !frozen && (y[OMEGA] - previous[OMEGA]).abs() < 1e-9 && n < 10 {
                continue;
            }
            if y[OMEGA] < 0.0 {
                break SpinTermination::NegativeFrequency;
            }
            if !frozen && y[OMEGA] - previous[OMEGA] < 1e-15 {
                break SpinTermination::Plateau;
            }
            update_angles(&mut y, previous[ALPHA]);

            if let Some(reference) = self.reference.as_mut() {
                if frozen && y[OMEGA] > reference.omega_max {
                    break SpinTermination::FrequencyMaximum;
                }
                if reference.shift.is_none() && y[OMEGA] >= reference.omega_start {
                    let shift = t - reference.t_of_omega.eval(y[OMEGA]);
                    debug!(target: "teob::spin", t, shift, "switching to the reference frequency");
                    reference.shift = Some(shift);
                }
                if let Some(shift) = reference.shift {
                    if t - shift > reference.t_end {
                        break SpinTermination::ReferenceExhausted;
                    }
                    y[OMEGA] = reference.omega_of_t.eval(t - shift);
                }
            }

            self.trajectory.push(t, y, chunk)?;
            if omega_stop.is_some_and(|stop| y[OMEGA] > stop) {
                break SpinTermination::FrequencyStop;
            }
            if n > 2 && y[OMEGA] < previous[OMEGA] {
                self.trajectory.truncate(n);
                break SpinTermination::FrequencyMaximum;
            }
            if t_stop.is_some_and(|stop| t > stop) {
                break SpinTermination::TimeStop;
            }
            if t >= t_max {
                break SpinTermination::MaxTime;
            }
        };
        self.dt = dt;
        Ok(termination)
    }

    /// Extends the trajectory to earlier times, until Mω falls below 0.99 `omega_target`.
    ///
    /// The backward samples are reversed and joined in front of the forward ones; the
    /// forward start keeps its time, so backward samples have earlier times.
    pub fn integrate_backwards(&mut self, omega_target: f64) -> Result<()> {
        let Some(first) = self.trajectory.y.first() else {
            bail!("empty spin trajectory.");
        };
        if first[OMEGA] <= omega_target {
            debug!(target: "teob::spin", omega_target, "no backward integration needed");
            return Ok(());
        }
        self.extend_backwards(BackwardTarget::Frequency(omega_target))
    }

    /// Extends the trajectory to earlier times until it covers `t_target`.
    pub fn integrate_backwards_to_time(&mut self, t_target: f64) -> Result<()> {
        let Some(&t0) = self.trajectory.t.first() else {
            bail!("empty spin trajectory.");
        };
        if t_target >= t0 {
            return Ok(());
        }
        self.extend_backwards(BackwardTarget::Time(t_target))
    }

    fn extend_backwards(&mut self, target: BackwardTarget) -> Result<()> {
        let (Some(&t0), Some(&first)) = (self.trajectory.t.first(), self.trajectory.y.first()) else {
            bail!("empty spin trajectory.");
        };
        self.invalidate();
        let mut stepper = self.stepper();
        let t_end = match target {
            BackwardTarget::Frequency(_) => t0 - self.settings.t_max,
            BackwardTarget::Time(t_target) => t_target,
        };
        self.rhs.law = self.rhs.base_law();

        let mut t = t0;
        let mut y = first;
        let mut dt = -0.1 * self.settings.dt.abs();
        let mut samples: Vec<(f64, [f64; SPIN_VARS])> = Vec::new();
        try_grow(&mut samples, self.settings.chunk)?;
        samples.push((t, y));
        let mut last_one = false;
        loop {
            stepper
                .evolve(&self.rhs, &mut t, t_end, &mut dt, &mut y)
                .with_context(|| format!("backward spin precession at t = {t}"))?;
            if y[OMEGA] < 0.0 {
                if let BackwardTarget::Time(t_target) = target {
                    return Err(EobError::OdeIntegration(format!(
                        "backward spin precession reached Mω = 0 at t = {t}, before t = {t_target}"
                    ))
                    .into());
                }
                break;
            }
            let previous_alpha = samples[samples.len() - 1].1[ALPHA];
            update_angles(&mut y, previous_alpha);
            if samples.len() == samples.capacity() {
                try_grow(&mut samples, self.settings.chunk)?;
            }
            samples.push((t, y));
            match target {
                BackwardTarget::Time(_) if t <= t_end => break,
                BackwardTarget::Time(_) => {}
                BackwardTarget::Frequency(omega_target) => {
                    if last_one {
                        break;
                    }
                    last_one = y[OMEGA] < 0.99 * omega_target;
                    if t <= t_end {
                        return Err(EobError::OdeIntegration(format!(
                            "backward spin precession did not reach Mω = {omega_target} by t = {t}"
                        ))
                        .into());
                    }
                }
            }
        }

        samples.reverse();
        let mut joined = SpinTrajectory::default();
        try_grow(&mut joined.t, samples.len() + self.trajectory.len())?;
        try_grow(&mut joined.y, samples.len() + self.trajectory.len())?;
        for (t, y) in samples {
            joined.push(t, y, self.settings.chunk)?;
        }
        joined.join(&self.trajectory, t0)?;
        debug!(
            target: "teob::spin",
            t_start = joined.t[0],
            omega_start = joined.y[0][OMEGA],
            "backward spin precession joined"
        );
        self.trajectory = joined;
        if self.forward_start.is_none() {
            self.forward_start = Some((t0, first[OMEGA]));
        }
        Ok(())
    }

    fn angle_splines(&mut self) -> Result<&[CubicSpline; 3]> {
        if self.angle_splines.is_none() {
            let t = &self.trajectory.t;
            let splines = [
                CubicSpline::new(t, &self.trajectory.column(ALPHA))?,
                CubicSpline::new(t, &self.trajectory.column(BETA))?,
                CubicSpline::new(t, &self.trajectory.column(GAMMA))?,
            ];
            self.angle_splines = Some(splines);
        }
        match &self.angle_splines {
            Some(splines) => Ok(splines),
            None => bail!("spin trajectory too short to interpolate."),
        }
    }

    /// Euler angles at time `t`. Before the first sample `Clamp` returns the initial
    /// angles and `ContinueIntegration` integrates backwards.
    pub fn euler_angles_at_time(&mut self, t: f64, boundary: Boundary) -> Result<EulerAngles> {
        let Some((t_last, last)) = self.trajectory.last() else {
            bail!("empty spin trajectory.");
        };
        if t >= t_last {
            if boundary == Boundary::Clamp || self.exhausted {
                return Ok(last.angles);
            }
            let termination = self.advance(None, Some(t + self.dt))?;
            if termination != SpinTermination::TimeStop {
                debug!(target: "teob::spin", reason = termination.reason(), "spin precession cannot be continued");
                self.exhausted = true;
            }
            if let Some((t_last, last)) = self.trajectory.last() {
                if t >= t_last {
                    return Ok(last.angles);
                }
            }
        }
        if t < self.trajectory.t[0] && boundary == Boundary::ContinueIntegration {
            self.integrate_backwards_to_time(t)?;
        }
        if t <= self.trajectory.t[0] {
            return Ok(self.trajectory.state(0).angles);
        }
        let [alpha, beta, gamma] = self.angle_splines()?;
        Ok(EulerAngles {
            alpha: alpha.eval(t),
            beta: beta.eval(t),
            gamma: gamma.eval(t),
        })
    }

    /// Euler angles on a time grid.
    pub fn euler_angles(&mut self, times: &[f64], boundary: Boundary) -> Result<Vec<EulerAngles>> {
        if boundary == Boundary::ContinueIntegration {
            if let Some(&t_min) = times.iter().min_by(|a, b| a.total_cmp(b)) {
                self.euler_angles_at_time(t_min, boundary)?;
            }
            if let Some(&t_max) = times.last() {
                self.euler_angles_at_time(t_max, boundary)?;
            }
        }
        times.iter().map(|&t| self.euler_angles_at_time(t, boundary)).collect()
    }

    /// Spin projections at orbital frequency Mω. Continuing the integration extends the
    /// trajectory forward or backward as needed.
    pub fn spins_at_frequency(&mut self, omega: f64, boundary: Boundary) -> Result<SpinProjections> {
        let Some((_, last)) = self.trajectory.last() else {
            bail!("empty spin trajectory.");
        };
        let first = self.trajectory.state(0);
        if boundary == Boundary::ContinueIntegration {
            if omega < first.omega {
                self.integrate_backwards(omega)?;
            } else if omega > last.omega && !self.exhausted {
                let termination = self.advance(Some(omega), None)?;
                if termination != SpinTermination::FrequencyStop {
                    self.exhausted = true;
                }
            }
        }

        let first = self.trajectory.state(0);
        let Some((_, last)) = self.trajectory.last() else {
            bail!("empty spin trajectory.");
        };
        let state = if omega <= first.omega {
            first
        } else if omega >= last.omega {
            last
        } else {
            return self.interpolate_spins(omega);
        };
        Ok(SpinProjections::new(
            state.s_a.into(),
            state.s_b.into(),
            state.l_hat.into(),
        ))
    }

    /// Indices of the strictly increasing subsequence of Mω.
    fn monotonic_frequency(&self) -> Vec<usize> {
        let mut keep = Vec::with_capacity(self.trajectory.len());
        for (i, y) in self.trajectory.y.iter().enumerate() {
            if keep.last().map_or(true, |&j: &usize| y[OMEGA] > self.trajectory.y[j][OMEGA]) {
                keep.push(i);
            }
        }
        keep
    }

    /// Time at which the precession reaches orbital frequency Mω, clamped to the run.
    pub fn time_at_frequency(&self, omega: f64) -> Result<f64> {
        let keep = self.monotonic_frequency();
        let x: Vec<f64> = keep.iter().map(|&i| self.trajectory.y[i][OMEGA]).collect();
        let t: Vec<f64> = keep.iter().map(|&i| self.trajectory.t[i]).collect();
        let spline = CubicSpline::new(&x, &t).context("time as a function of the frequency")?;
        Ok(spline.eval(omega.clamp(spline.x_min(), spline.x_max())))
    }

    fn interpolate_spins(&mut self, omega: f64) -> Result<SpinProjections> {
        if self.spin_splines.is_none() {
            let keep = self.monotonic_frequency();
            let x: Vec<f64> = keep.iter().map(|&i| self.trajectory.y[i][OMEGA]).collect();
            let splines = (S_A..ALPHA)
                .map(|v| {
                    let column: Vec<f64> = keep.iter().map(|&i| self.trajectory.y[i][v]).collect();
                    CubicSpline::new(&x, &column)
                })
                .collect::<Result<Vec<_>>>()
                .context("spins as functions of the frequency")?;
            self.spin_splines = Some(splines);
        }
        let Some(splines) = &self.spin_splines else {
            bail!("spin trajectory too short to interpolate.");
        };
        let value = |v: usize| splines[v].eval(omega);
        let vector = |base: usize| Vector3::new(value(base), value(base + 1), value(base + 2));
        Ok(SpinProjections::new(vector(S_A), vector(S_B), vector(L_HAT)))
    }

    pub fn params(&self) -> &EobParameters {
        self.params
    }
}

/// Remnant spin of a precessing binary: aligned-spin fit on the spin components along
/// L̂ at the merger frequency, plus the in-plane spin |S⊥|/M_f².
pub fn precessing_remnant_spin(spins: &mut SpinDynamics) -> Result<f64> {
    let params = spins.params();
    let (nu, x1, x2) = (params.nu, params.x1, params.x2);
    let omega_merger = params.mrg_omega;
    let mass = fits::remnant_mass(nu, x1, x2, params.chi1, params.chi2);
    let projections = spins.spins_at_frequency(omega_merger, Boundary::Clamp)?;
    let chi1 = projections.s_a_parallel / (x1 * x1);
    let chi2 = projections.s_b_parallel / (x2 * x2);
    let aligned = fits::remnant_spin(nu, x1, x2, chi1, chi2);
    let spin = (aligned * aligned + projections.perpendicular_norm_squared() / mass.powi(4)).sqrt();
    debug!(target: "teob::spin", aligned, spin, "precessing remnant spin");
    Ok(spin)
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

    fn precessing() -> InputParameters {
        InputParameters {
            q: 2.0,
            chi1: 0.3,
            chi2: 0.1,
            chi1x: 0.4,
            chi2y: -0.2,
            initial_frequency: 0.004,
            ..InputParameters::default()
        }
    }

    fn resolve(input: InputParameters) -> EobParameters {
        EobParameters::resolve(&input).expect("valid parameters")
    }

    #[test]
    fn aligned_spins_do_not_precess() {
        let params = resolve(InputParameters {
            chi1: 0.5,
            chi2: -0.3,
            ..InputParameters::default()
        });
        let rhs = SpinRhs::new(&params).expect("rhs");
        let state = SpinState {
            s_a: [0.0, 0.0, 0.5 * 0.25],
            s_b: [0.0, 0.0, -0.3 * 0.25],
            l_hat: [0.0, 0.0, 1.0],
            angles: EulerAngles::default(),
            omega: 0.02,
        };
        let mut out = [0.0; SPIN_VARS];
        rhs.apply(0.0, &state.to_array(), &mut out);
        assert!(out[..OMEGA].iter().all(|d| d.abs() < 1e-15), "{out:?}");
        assert!(out[OMEGA] > 0.0);
    }

    #[test]
    fn taylor_t4_reduces_to_the_quadrupole_chirp() {
        let params = resolve(InputParameters::default());
        let taylor = TaylorT4::new(&params);
        let zero = Vector3::zeros();
        let omega = 1e-6;
        let ratio = taylor.omega_dot(omega, &zero, &zero, &Vector3::z()) / (96.0 / 5.0 * 0.25 * omega.powf(11.0 / 3.0));
        assert!((ratio - 1.0).abs() < 1e-3, "{ratio}");
    }

    #[test]
    fn precession_conserves_spin_magnitudes_and_l_hat_norm() {
        let params = resolve(precessing());
        let mut spins = SpinDynamics::new(&params, None).expect("setup");
        spins.integrate().expect("integrates");
        let trajectory = spins.trajectory();
        assert!(trajectory.len() > 10);
        let first = trajectory.state(0);
        let norm = |v: [f64; 3]| Vector3::from(v).norm();
        for i in 0..trajectory.len() {
            let state = trajectory.state(i);
            assert!((norm(state.s_a) / norm(first.s_a) - 1.0).abs() < 1e-6);
            assert!((norm(state.s_b) / norm(first.s_b) - 1.0).abs() < 1e-6);
            assert!((norm(state.l_hat) - 1.0).abs() < 1e-6);
            assert!((0.0..=PI).contains(&state.angles.beta));
        }
        assert!(trajectory.t.windows(2).all(|w| w[1] > w[0]));
        let omega = trajectory.omega();
        assert!(omega.windows(2).all(|w| w[1] >= w[0]));
    }

    #[test]
    fn forward_run_stops_above_the_stop_frequency() {
        let params = resolve(precessing());
        let mut spins = SpinDynamics::new(&params, None).expect("setup");
        let termination = spins.integrate().expect("integrates");
        let (_, last) = spins.trajectory().last().expect("samples");
        match termination {
            SpinTermination::FrequencyStop => assert!(last.omega > params.spin_ode.omega_stop),
            other => assert!(
                matches!(other, SpinTermination::Plateau | SpinTermination::FrequencyMaximum),
                "{other:?}"
            ),
        }
        assert!(last.angles.beta > 0.0);
    }

    #[test]
    fn backward_join_is_monotonic_and_continuous() {
        let params = resolve(precessing());
        let mut spins = SpinDynamics::new(&params, None).expect("setup");
        spins.integrate().expect("forward");
        let forward_len = spins.trajectory().len();
        let omega0 = params.omega0();
        spins.integrate_backwards(0.8 * omega0).expect("backward");

        let trajectory = spins.trajectory();
        assert!(trajectory.len() > forward_len);
        assert!(trajectory.t.windows(2).all(|w| w[1] > w[0]));
        assert!(trajectory.state(0).omega < 0.8 * omega0);
        let (t_splice, omega_splice) = spins.forward_start().expect("spliced");
        assert_eq!(t_splice, 0.0);
        assert_eq!(omega_splice, omega0);

        let splice = trajectory.t.partition_point(|&t| t < 0.0);
        assert_eq!(trajectory.t[splice], 0.0);
        let norm = |i: usize| Vector3::from(trajectory.state(i).s_a).norm();
        assert!((norm(splice - 1) / norm(splice) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn angles_clamp_or_continue_past_the_end() {
        let input = InputParameters {
            spin_odes_t_stop: Some(200.0),
            ..precessing()
        };
        let params = resolve(input);
        let mut spins = SpinDynamics::new(&params, None).expect("setup");
        assert_eq!(spins.integrate().expect("forward"), SpinTermination::TimeStop);
        let (t_end, last) = spins.trajectory().last().expect("samples");

        let clamped = spins.euler_angles_at_time(t_end + 100.0, Boundary::Clamp).expect("clamped");
        assert_eq!(clamped, last.angles);

        let continued = spins
            .euler_angles_at_time(t_end + 100.0, Boundary::ContinueIntegration)
            .expect("continued");
        assert!(spins.trajectory().last().expect("samples").0 >= t_end + 100.0);
        assert_ne!(continued, last.angles);

        let inside = spins.euler_angles_at_time(0.5 * t_end, Boundary::Clamp).expect("inside");
        assert!(inside.beta.is_finite());

        let first = spins.trajectory().state(0).angles;
        let before = spins.euler_angles_at_time(-50.0, Boundary::Clamp).expect("clamped start");
        assert_eq!(before, first);
        assert_eq!(spins.trajectory().t[0], 0.0);

        let earlier = spins
            .euler_angles_at_time(-50.0, Boundary::ContinueIntegration)
            .expect("integrated backwards");
        let trajectory = spins.trajectory();
        assert_eq!(trajectory.t[0], -50.0);
        assert!(trajectory.t.windows(2).all(|w| w[1] > w[0]));
        assert!(trajectory.state(0).omega < params.omega0());
        assert_eq!(earlier, trajectory.state(0).angles);
        assert_eq!(spins.forward_start().map(|(t, _)| t), Some(0.0));
    }

    #[test]
    fn spins_at_frequency_interpolates_inside_the_run() {
        let params = resolve(precessing());
        let mut spins = SpinDynamics::new(&params, None).expect("setup");
        spins.integrate().expect("forward");
        let omega0 = params.omega0();
        let at_start = spins.spins_at_frequency(omega0, Boundary::Clamp).expect("start");
        let s_a = params.chi1_vec.map(|c| c * params.x1 * params.x1);
        assert!((at_start.s_a_parallel - s_a[2]).abs() < 1e-12);

        let later = spins.spins_at_frequency(2.0 * omega0, Boundary::Clamp).expect("later");
        let total = later.s_a_parallel.powi(2) + Vector3::from(later.s_a_perp).norm_squared();
        assert!((total.sqrt() / Vector3::from(s_a).norm() - 1.0).abs() < 1e-6);

        let remnant = precessing_remnant_spin(&mut spins).expect("remnant");
        assert!(remnant > 0.0 && remnant < 1.0, "{remnant}");

        let t = spins.time_at_frequency(2.0 * omega0).expect("inverse");
        let (t_end, _) = spins.trajectory().last().expect("samples");
        assert!(t > 0.0 && t < t_end);
        assert!(spins.time_at_frequency(0.5 * omega0).expect("clamped").abs() < 1e-12);
    }

    #[test]
    fn hybrid_law_chirps() {
        let params = resolve(InputParameters {
            spin_flx: SpinFlux::Hybrid,
            ..precessing()
        });
        let rhs = SpinRhs::new(&params).expect("rhs");
        let mut spins = SpinDynamics::new(&params, None).expect("setup");
        let mut out = [0.0; SPIN_VARS];
        rhs.apply(0.0, &spins.trajectory().y[0], &mut out);
        assert!(out[OMEGA] > 0.0);
        let pn = TaylorT4::new(&params);
        let state = spins.trajectory().state(0);
        let reference = pn.omega_dot(
            state.omega,
            &state.s_a.into(),
            &state.s_b.into(),
            &state.l_hat.into(),
        );
        assert!((out[OMEGA] / reference - 1.0).abs() < 0.3, "{} vs {reference}", out[OMEGA]);
        spins.integrate().expect("integrates");
    }

    #[test]
    fn reference_frequency_takes_over() {
        let params = resolve(InputParameters {
            spin_flx: SpinFlux::Eob,
            ..precessing()
        });
        let omega0 = params.omega0();
        let mut orbital = Trajectory::default();
        for i in 0..400 {
            orbital.t.push(i as f64);
            orbital.omega_orb.push(omega0 * (1.0 + 0.002 * i as f64));
            orbital.omega.push(omega0 * (1.0 + 0.002 * i as f64));
        }
        let mut spins = SpinDynamics::new(&params, Some(&orbital)).expect("setup");
        let termination = spins.integrate().expect("integrates");
        assert_eq!(termination, SpinTermination::ReferenceExhausted);
        let (_, last) = spins.trajectory().last().expect("samples");
        assert!(last.omega > 1.3 * omega0 && last.omega <= 1.8 * omega0 + 1e-12, "{}", last.omega);
    }

    #[test]
    fn rejects_a_zero_step() {
        let mut params = resolve(precessing());
        params.spin_ode.dt = 0.0;
        assert_err_contains(SpinDynamics::new(&params, None).map(|_| ()), "spin_odes_dt");
    }
}
