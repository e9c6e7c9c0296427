//! Factorized and resummed multipoles, h_ℓm = h_ℓm^N Ŝ f_ℓm T_ℓm e^{iδ_ℓm}, and the
//! radiation reaction built from them.
//!
//! All amplitudes are per unit symmetric mass ratio and per unit M/R, evaluated at orbital
//! phase zero. The residual amplitudes f_ℓm = ρ_ℓm^ℓ use the Taylor-expanded ρ_ℓm up to
//! 5PN in the (2,2) mode and up to 3PN in the others; multipoles with ℓ ≥ 5 are kept at
//! Newtonian order dressed by the tail.

use crate::config::FlmModel;
use crate::nqc::{NqcBasis, NqcCoefficients};
use crate::params::{BinaryKind, EobParameters, EULER_GAMMA};
use crate::waveform::{mode_index, mode_lm, KMAX};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Orbital quantities entering one waveform or flux evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FluxInput {
    /// x = v_φ²
    pub x: f64,
    pub omega: f64,
    pub r_omega: f64,
    /// Real energy in units of M, E = νH.
    pub e: f64,
    pub heff: f64,
    /// Newton-normalized angular momentum pφ/(r_ω v_φ).
    pub jhat: f64,
    pub r: f64,
    pub prstar: f64,
    pub ddotr: f64,
}

/// Coefficients of ρ_ℓm − 1 = Σ_n (c_n + e_n eulerlog_m(x)) xⁿ, n = 1..5.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
struct RhoSeries {
    c: [f64; 5],
    log: [f64; 5],
}

impl RhoSeries {
    fn eval(&self, x: f64, eulerlog: f64) -> f64 {
        1.0 + self
            .c
            .iter()
            .zip(&self.log)
            .rev()
            .fold(0.0, |acc, (c, e)| (acc + c + e * eulerlog) * x)
    }

    fn truncate_after(mut self, order: usize) -> Self {
        for n in order..5 {
            self.c[n] = 0.0;
            self.log[n] = 0.0;
        }
        self
    }
}

fn rho_series(l: usize, m: usize, nu: f64) -> RhoSeries {
    let nu2 = nu * nu;
    let nu3 = nu2 * nu;
    let nu4 = nu3 * nu;
    let pi2 = PI * PI;
    let (c, log) = match (l, m) {
        (2, 2) => (
            [
                -43.0 / 42.0 + 55.0 / 84.0 * nu,
                -20555.0 / 10584.0 - 33025.0 / 21168.0 * nu + 19583.0 / 42336.0 * nu2,
                1556919113.0 / 122245200.0 + (41.0 * pi2 / 192.0 - 48993925.0 / 9779616.0) * nu
                    - 6292061.0 / 3259872.0 * nu2
                    + 10620745.0 / 39118464.0 * nu3,
                -387216563023.0 / 160190110080.0,
                -16094530514677.0 / 533967033600.0,
            ],
            [0.0, 0.0, -428.0 / 105.0, 9202.0 / 2205.0, 439877.0 / 55566.0],
        ),
        (2, 1) => (
            [
                -59.0 / 56.0 + 23.0 / 84.0 * nu,
                -47009.0 / 56448.0 - 10993.0 / 14112.0 * nu + 617.0 / 4704.0 * nu2,
                7613184941.0 / 2607897600.0,
                -1168617463883.0 / 911303737344.0,
                -63735873771463.0 / 16569158860800.0,
            ],
            [0.0, 0.0, -107.0 / 105.0, 6313.0 / 5880.0, 5029963.0 / 5927040.0],
        ),
        (3, 3) => (
            [
                -7.0 / 6.0 + 2.0 / 3.0 * nu,
                -6719.0 / 3960.0 - 1861.0 / 990.0 * nu + 149.0 / 330.0 * nu2,
                3203101567.0 / 227026800.0 + (-129509.0 / 25740.0 + 41.0 * pi2 / 192.0) * nu
                    - 274621.0 / 154440.0 * nu2
                    + 12011.0 / 46332.0 * nu3,
                -57566572157.0 / 8562153600.0,
                -903823148417327.0 / 30566888352000.0,
            ],
            [0.0, 0.0, -26.0 / 7.0, 13.0 / 3.0, 87347.0 / 13860.0],
        ),
        (3, 2) => (
            [
                (328.0 - 1115.0 * nu + 320.0 * nu2) / (270.0 * (3.0 * nu - 1.0)),
                (-1444528.0 + 8050045.0 * nu - 4725605.0 * nu2 - 20338960.0 * nu3 + 3085640.0 * nu4)
                    / (1603800.0 * (1.0 - 3.0 * nu).powi(2)),
                5849948554.0 / 940355325.0,
                0.0,
                0.0,
            ],
            [0.0, 0.0, -104.0 / 63.0, 0.0, 0.0],
        ),
        (3, 1) => (
            [
                -13.0 / 18.0 - 2.0 / 9.0 * nu,
                101.0 / 7128.0 - 1685.0 / 1782.0 * nu - 829.0 / 1782.0 * nu2,
                11706720301.0 / 6129723600.0,
                2606097992581.0 / 4854741091200.0,
                0.0,
            ],
            [0.0, 0.0, -26.0 / 63.0, 169.0 / 495.0, 0.0],
        ),
        (4, 4) => (
            [
                (1614.0 - 5870.0 * nu + 2625.0 * nu2) / (1320.0 * (3.0 * nu - 1.0)),
                (-511573572.0 + 2338945704.0 * nu - 313857376.0 * nu2 - 6733146000.0 * nu3
                    + 1252563795.0 * nu4)
                    / (317116800.0 * (1.0 - 3.0 * nu).powi(2)),
                16600939332793.0 / 1098809712000.0,
                0.0,
                0.0,
            ],
            [0.0, 0.0, -12568.0 / 3465.0, 0.0, 0.0],
        ),
        (4, 3) => (
            [
                (222.0 - 547.0 * nu + 160.0 * nu2) / (176.0 * (2.0 * nu - 1.0)),
                -6894273.0 / 7047040.0,
                1664224207351.0 / 195343948800.0,
                0.0,
                0.0,
            ],
            [0.0, 0.0, -1571.0 / 770.0, 0.0, 0.0],
        ),
        (4, 2) => (
            [
                (1146.0 - 3530.0 * nu + 285.0 * nu2) / (1320.0 * (3.0 * nu - 1.0)),
                (-114859044.0 + 295834536.0 * nu + 1204388696.0 * nu2 - 3047981160.0 * nu3
                    - 379526805.0 * nu4)
                    / (317116800.0 * (1.0 - 3.0 * nu).powi(2)),
                848238724511.0 / 219761942400.0,
                0.0,
                0.0,
            ],
            [0.0, 0.0, -3142.0 / 3465.0, 0.0, 0.0],
        ),
        (4, 1) => (
            [
                (602.0 - 1385.0 * nu + 288.0 * nu2) / (528.0 * (2.0 * nu - 1.0)),
                -7775491.0 / 21141120.0,
                1227423222031.0 / 1758095539200.0,
                0.0,
                0.0,
            ],
            [0.0, 0.0, -1571.0 / 6930.0, 0.0, 0.0],
        ),
        _ => ([0.0; 5], [0.0; 5]),
    };
    RhoSeries { c, log }
}

/// Coefficients of δ_ℓm in y^{3/2}, y^{5/2} and y³, with y = (EΩ)^{2/3}.
fn residual_phase_coefficients(l: usize, m: usize, nu: f64) -> [f64; 3] {
    match (l, m) {
        (2, 2) => [7.0 / 3.0, -24.0 * nu, 428.0 * PI / 105.0],
        (2, 1) => [2.0 / 3.0, -493.0 / 42.0 * nu, 0.0],
        (3, 3) => [13.0 / 10.0, -80897.0 / 2430.0 * nu, 0.0],
        (3, 2) => [(10.0 + 33.0 * nu) / (15.0 * (1.0 - 3.0 * nu)), 0.0, 0.0],
        (3, 1) => [13.0 / 30.0, -17.0 / 10.0 * nu, 0.0],
        (4, 4) => [(112.0 + 219.0 * nu) / (120.0 * (1.0 - 3.0 * nu)), 0.0, 0.0],
        (4, 3) => [(486.0 + 4961.0 * nu) / (810.0 * (1.0 - 2.0 * nu)), 0.0, 0.0],
        (4, 2) => [7.0 * (1.0 + 6.0 * nu) / (15.0 * (1.0 - 3.0 * nu)), 0.0, 0.0],
        (4, 1) => [(2.0 + 507.0 * nu) / (10.0 * (1.0 - 2.0 * nu)), 0.0, 0.0],
        (5, 5) => [(96875.0 + 857528.0 * nu) / (131250.0 * (1.0 - 2.0 * nu)), 0.0, 0.0],
        _ => [0.0; 3],
    }
}

fn factorial(n: usize) -> f64 {
    (2..=n).map(|k| k as f64).product()
}

fn double_factorial(n: i64) -> f64 {
    let mut out = 1.0;
    let mut k = n;
    while k > 1 {
        out *= k as f64;
        k -= 2;
    }
    out
}

/// Y_ℓm(π/2, 0) with the Condon–Shortley phase.
fn equatorial_ylm(l: usize, m: i64) -> f64 {
    let (li, ma) = (l as i64, m.abs());
    if ma > li || (li + ma) % 2 != 0 {
        return 0.0;
    }
    let sign = if ((li + ma) / 2) % 2 == 0 { 1.0 } else { -1.0 };
    let plm = sign * double_factorial(li + ma - 1) / double_factorial(li - ma);
    let norm = ((2 * l + 1) as f64 / (4.0 * PI) * factorial((li - ma) as usize)
        / factorial((li + ma) as usize))
    .sqrt();
    let y = norm * plm;
    if m < 0 && ma % 2 == 1 {
        -y
    } else {
        y
    }
}

/// n_ℓm^(ε) c_{ℓ+ε}(ν) Y_{ℓ−ε,−m}(π/2, 0); `scale` replaces c_{ℓ+ε}.
fn newtonian_prefactor(l: usize, m: usize, scale: f64) -> Complex64 {
    let odd = (l + m) % 2 == 1;
    let lf = l as f64;
    let mf = m as f64;
    let im_l = Complex64::i().powi(l as i32) * mf.powi(l as i32);
    let n = if odd {
        let root = ((2.0 * lf + 1.0) * (lf + 2.0) * (lf * lf - mf * mf)
            / ((2.0 * lf - 1.0) * (lf + 1.0) * lf * (lf - 1.0)))
            .sqrt();
        -im_l * Complex64::i() * (16.0 * PI / double_factorial(2 * l as i64 + 1) * root)
    } else {
        let root = ((lf + 1.0) * (lf + 2.0) / (lf * (lf - 1.0))).sqrt();
        im_l * (8.0 * PI / double_factorial(2 * l as i64 + 1) * root)
    };
    let eps = usize::from(odd);
    n * scale * equatorial_ylm(l - eps, -(m as i64))
}

/// c_n(ν) = X2^{n−1} + (−1)ⁿ X1^{n−1}.
fn mass_coefficient(n: usize, x1: f64, x2: f64) -> f64 {
    let sign = if n % 2 == 0 { 1.0 } else { -1.0 };
    x2.powi(n as i32 - 1) + sign * x1.powi(n as i32 - 1)
}

/// ln Γ(z) for Re z ≥ 1/2 (Lanczos, g = 7).
pub fn ln_gamma(z: Complex64) -> Complex64 {
    const G: f64 = 7.0;
    const P: [f64; 9] = [
        0.999_999_999_999_809_9,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_1,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];
    let z = z - 1.0;
    let series = P[1..]
        .iter()
        .enumerate()
        .fold(Complex64::new(P[0], 0.0), |acc, (i, p)| acc + *p / (z + (i + 1) as f64));
    let t = z + G + 0.5;
    0.5 * (2.0 * PI).ln() + (z + 0.5) * t.ln() - t + series.ln()
}

/// Tail factor T_ℓm resumming the leading logarithms of the wave propagation.
pub fn tail_factor(l: usize, m: usize, e_omega: f64, omega: f64) -> Complex64 {
    let r0 = 2.0 / std::f64::consts::E.sqrt();
    let khat = m as f64 * e_omega;
    let lf = l as f64;
    let ratio = (ln_gamma(Complex64::new(lf + 1.0, -2.0 * khat)) - ln_gamma(Complex64::new(lf + 1.0, 0.0))).exp();
    let phase = 2.0 * khat * (2.0 * m as f64 * omega * r0).ln();
    ratio * (PI * khat).exp() * Complex64::from_polar(1.0, phase)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct Multipole {
    l: usize,
    m: usize,
    odd: bool,
    newtonian: Complex64,
    rho: RhoSeries,
    delta: [f64; 3],
    /// γ + ln 2m
    log_offset: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct SpinTerms {
    a0: f64,
    a12: f64,
    x12: f64,
    /// ½(C_Q1 a1² + 2 a1 a2 + C_Q2 a2²)
    quadrupole: f64,
    next_to_leading: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct TidalAmplitude {
    kappa_a2: f64,
    kappa_b2: f64,
    x_a: f64,
    x_b: f64,
}

impl TidalAmplitude {
    fn eval(&self, x: f64) -> f64 {
        let term = |kappa: f64, xa: f64, xb: f64| {
            if kappa == 0.0 {
                return 0.0;
            }
            let beta1 = (-202.0 + 560.0 * xa - 340.0 * xa * xa + 45.0 * xa * xa * xa) / (42.0 * (3.0 - 2.0 * xa));
            2.0 * kappa * (xa / xb + 3.0) * (1.0 + beta1 * x)
        };
        x.powi(5) * (term(self.kappa_a2, self.x_a, self.x_b) + term(self.kappa_b2, self.x_b, self.x_a))
    }
}

/// Multipolar waveform and flux model of one binary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FluxModel {
    nu: f64,
    multipoles: Vec<Multipole>,
    spin: Option<SpinTerms>,
    tides: Option<TidalAmplitude>,
    /// Σ X_i³ χ_i (1 + 3χ_i²) over black-hole bodies.
    horizon: Option<f64>,
    /// |h_22^N| at x = 1.
    newtonian22: f64,
}

impl FluxModel {
    pub fn new(params: &EobParameters) -> Self {
        let (nu, x1, x2, x12) = (params.nu, params.x1, params.x2, params.x12);
        let higher_orders = params.models.flm == FlmModel::Hm;
        let spin = params.use_spins().then(|| {
            let sv = &params.spin_vars;
            let cq = params.tides.c_q;
            SpinTerms {
                a0: sv.a0,
                a12: sv.a12,
                x12,
                quadrupole: 0.5 * (cq[0] * sv.a1 * sv.a1 + 2.0 * sv.a1 * sv.a2 + cq[1] * sv.a2 * sv.a2),
                next_to_leading: params.models.flm != FlmModel::Sslo,
            }
        });

        let multipoles = (0..KMAX)
            .map(|k| {
                let (l, m) = mode_lm(k);
                let odd = (l + m) % 2 == 1;
                let factored = spin.is_some() && (l, m) == (2, 1);
                let scale = if factored {
                    -1.0
                } else {
                    mass_coefficient(l + usize::from(odd), x1, x2)
                };
                let rho = rho_series(l, m, nu);
                let rho = if (l, m) == (2, 2) || higher_orders {
                    rho
                } else {
                    rho.truncate_after(3)
                };
                Multipole {
                    l,
                    m,
                    odd,
                    newtonian: newtonian_prefactor(l, m, scale),
                    rho,
                    delta: residual_phase_coefficients(l, m, nu),
                    log_offset: EULER_GAMMA + (2.0 * m as f64).ln(),
                }
            })
            .collect::<Vec<_>>();

        let tides = params.use_tides().then(|| TidalAmplitude {
            kappa_a2: params.tides.kappa_a[2],
            kappa_b2: params.tides.kappa_b[2],
            x_a: x1,
            x_b: x2,
        });
        let horizon = (params.binary == BinaryKind::BlackHoles && params.use_spins()).then(|| {
            [(x1, params.chi1), (x2, params.chi2)]
                .iter()
                .map(|&(x, chi)| x.powi(3) * chi * (1.0 + 3.0 * chi * chi))
                .sum::<f64>()
        });
        let newtonian22 = newtonian_prefactor(2, 2, mass_coefficient(2, x1, x2)).norm();

        Self {
            nu,
            multipoles,
            spin,
            tides,
            horizon,
            newtonian22,
        }
    }

    pub fn nu(&self) -> f64 {
        self.nu
    }

    /// Residual amplitude f_ℓm, spin and tidal corrections included.
    fn amplitude(&self, mp: &Multipole, x: f64, v: f64, ln_x: f64) -> f64 {
        let eulerlog = mp.log_offset + 0.5 * ln_x;
        let rho = mp.rho.eval(x, eulerlog);
        let mut f = match ((mp.l, mp.m), &self.spin) {
            ((2, 2), Some(spin)) => {
                let v3 = v * x;
                let mut rho = rho + v3 * (-0.5 * spin.a0 - spin.x12 * spin.a12 / 6.0) + x * x * spin.quadrupole;
                if spin.next_to_leading {
                    let nu = self.nu;
                    rho += v3
                        * x
                        * ((-52.0 / 63.0 - 19.0 / 504.0 * nu) * spin.a0
                            - (50.0 / 63.0 + 209.0 / 504.0 * nu) * spin.x12 * spin.a12);
                }
                rho * rho
            }
            ((2, 1), Some(spin)) => spin.x12 * rho * rho - 1.5 * spin.a12 * v,
            _ => rho.powi(mp.l as i32),
        };
        if let (2, 2) = (mp.l, mp.m) {
            if let Some(tides) = &self.tides {
                f += tides.eval(x);
            }
        }
        f
    }

    /// All multipoles at orbital phase zero, NQC corrections excluded.
    pub fn modes(&self, input: &FluxInput) -> [Complex64; KMAX] {
        let x = input.x;
        let v = x.sqrt();
        let ln_x = x.ln();
        let e_omega = input.e * input.omega;
        let y52 = e_omega.powf(5.0 / 3.0);
        let y3 = e_omega * e_omega;

        let mut out = [Complex64::new(0.0, 0.0); KMAX];
        for (h, mp) in out.iter_mut().zip(&self.multipoles) {
            if mp.newtonian.norm() == 0.0 {
                continue;
            }
            let source = if mp.odd { input.jhat } else { input.heff };
            let f = self.amplitude(mp, x, v, ln_x);
            let tail = tail_factor(mp.l, mp.m, e_omega, input.omega);
            let delta = mp.delta[0] * e_omega + mp.delta[1] * y52 + mp.delta[2] * y3;
            let power = (mp.l + usize::from(mp.odd)) as i32;
            *h = mp.newtonian * (v.powi(power) * source * f) * tail * Complex64::from_polar(1.0, delta);
        }
        out
    }

    /// Flux relative to the Newtonian quadrupole, horizon absorption included.
    pub fn normalized_flux(&self, input: &FluxInput, nqc: &NqcCoefficients) -> f64 {
        let modes = self.modes(input);
        let basis = NqcBasis::new(input.r, input.omega, input.prstar, input.ddotr);
        let sum: f64 = modes
            .iter()
            .enumerate()
            .map(|(k, h)| {
                let (_, m) = mode_lm(k);
                (m * m) as f64 * (h * nqc.factor(k, &basis)).norm_sqr()
            })
            .sum();
        let newtonian22 = self.newtonian22 * input.x;
        let horizon = self
            .horizon
            .map_or(0.0, |h| -0.25 * input.x.powf(2.5) * h);
        sum / (4.0 * newtonian22 * newtonian22) + horizon
    }

    /// Azimuthal radiation reaction F_φ driving ṗφ.
    pub fn flux(&self, input: &FluxInput, nqc: &NqcCoefficients) -> f64 {
        let r_omega2 = input.r_omega * input.r_omega;
        let omega2 = input.omega * input.omega;
        -32.0 / 5.0 * self.nu * r_omega2 * r_omega2 * omega2 * omega2 * input.omega
            * self.normalized_flux(input, nqc)
    }
}
