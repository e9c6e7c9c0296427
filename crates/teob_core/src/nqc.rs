//! Next-to-quasi-circular corrections.
//!
//! Each multipole is multiplied by (1 + a1 n1 + a2 n2 + a3 n3) e^{i(b1 n4 + b2 n5 + b3 n6)},
//! where the n_i are functions of the radial motion that vanish on circular orbits. The
//! coefficients either come from NR fits, from a text file, or are solved for on the
//! merger window so that amplitude, frequency and their slopes hit NR-informed values.

use crate::config::NqcFit;
use crate::dynamics::Trajectory;
use crate::error::EobError;
use crate::fits;
use crate::interp::{self, CubicSpline};
use crate::params::EobParameters;
use crate::waveform::{mode_index, mode_lm, Multipoles, KMAX};
use anyhow::{bail, Context, Result};
use nalgebra::{Matrix2, Vector2};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Time after the (2,2) amplitude peak at which the corrections are pinned.
pub const NQC_DELAY: f64 = 2.0;

/// Non-circular basis functions at one dynamics sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NqcBasis {
    pub n: [f64; 6],
}

impl NqcBasis {
    pub fn new(r: f64, omega: f64, prstar: f64, ddotr: f64) -> Self {
        let p2 = prstar * prstar;
        let n4 = prstar / (r * omega);
        let n1 = n4 * n4;
        Self {
            n: [
                n1,
                ddotr / (r * omega * omega),
                n1 * p2,
                n4,
                n4 * r * r * omega * omega,
                n4 * p2,
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NqcModeCoefficients {
    pub a: [f64; 3],
    pub b: [f64; 3],
}

impl NqcModeCoefficients {
    fn factor(&self, basis: &NqcBasis) -> Complex64 {
        let n = &basis.n;
        let amp = 1.0 + self.a[0] * n[0] + self.a[1] * n[1] + self.a[2] * n[2];
        let phase = self.b[0] * n[3] + self.b[1] * n[4] + self.b[2] * n[5];
        Complex64::from_polar(amp, phase)
    }
}

/// Per-multipole coefficients; inactive multipoles are left untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NqcCoefficients {
    modes: Vec<Option<NqcModeCoefficients>>,
}

impl Default for NqcCoefficients {
    fn default() -> Self {
        Self::none()
    }
}

impl NqcCoefficients {
    pub fn none() -> Self {
        Self {
            modes: vec![None; KMAX],
        }
    }

    pub fn set(&mut self, k: usize, coefficients: NqcModeCoefficients) {
        if let Some(slot) = self.modes.get_mut(k) {
            *slot = Some(coefficients);
        }
    }

    pub fn get(&self, k: usize) -> Option<&NqcModeCoefficients> {
        self.modes.get(k).and_then(Option::as_ref)
    }

    pub fn is_active(&self, k: usize) -> bool {
        self.get(k).is_some()
    }

    pub fn active(&self) -> impl Iterator<Item = usize> + '_ {
        (0..KMAX).filter(move |&k| self.is_active(k))
    }

    /// Complex correction of multipole k (1 when inactive).
    pub fn factor(&self, k: usize, basis: &NqcBasis) -> Complex64 {
        match self.get(k) {
            Some(coefficients) => coefficients.factor(basis),
            None => Complex64::new(1.0, 0.0),
        }
    }

    /// Non-spinning NR fits of 2016 for (2,1), (2,2) and (3,3).
    pub fn nospin201602(nu: f64) -> Self {
        let x = 1.0 - 4.0 * nu;
        let x2 = x * x;
        let mut out = Self::none();
        out.set(
            mode_index(2, 1),
            NqcModeCoefficients {
                a: [
                    0.0162387198 * (7.32653082 * x2 + 1.19616248 * x + 0.73496656),
                    -1.80492460 * x2 + 1.78172686 * x + 0.30865284,
                    0.0,
                ],
                b: [
                    -0.0647955017 * (3.59934444 * x2 - 4.08628784 * x + 1.37890907),
                    1.3410693180 * (0.38491989 * x2 + 0.10969453 * x + 0.97513971),
                    0.0,
                ],
            },
        );
        out.set(
            mode_index(2, 2),
            NqcModeCoefficients {
                a: [
                    -0.0805236959 * (1.0 - 2.00332326 * x2) / (1.0 + 3.08595088 * x2),
                    1.5299534255 * (1.0 + 1.16438929 * x2) / (1.0 + 1.92033923 * x2),
                    0.0,
                ],
                b: [
                    0.146768094955 * (0.07417121 * x + 1.01691256),
                    0.896911234248 * (-0.61072011 * x + 0.94295129),
                    0.0,
                ],
            },
        );
        out.set(
            mode_index(3, 3),
            NqcModeCoefficients {
                a: [
                    -0.0377680000 * (1.0 - 14.61548907 * x2) / (1.0 + 2.44559263 * x2),
                    1.9898000000 * (1.0 + 2.09750346 * x2) / (1.0 + 2.57489466 * x2),
                    0.0,
                ],
                b: [
                    0.1418400000 * (1.07430512 - 1.23906804 * x + 4.44910652 * x2),
                    0.6191300000 * (0.80672432 + 4.07432829 * x - 7.47270977 * x2),
                    0.0,
                ],
            },
        );
        out
    }

    /// Spin-aware (2,2) amplitude fits of 2020, switched off outside the calibrated region.
    pub fn spin202002(nu: f64, chi1: f64, chi2: f64) -> Self {
        let x1 = 0.5 * (1.0 + (1.0 - 4.0 * nu).max(0.0).sqrt());
        let x2 = 1.0 - x1;
        let shat = (x1 * x1 * chi1 + x2 * x2 * chi2) / (x1 * x1 + x2 * x2);
        let outside = nu < 0.025 || (nu < 0.09 && shat > 0.83) || (nu < 0.13 && shat > 0.87);
        let (a1, a2) = if outside {
            (0.0, 0.0)
        } else {
            (
                fits::nqc_a1_fit_22(nu, chi1, chi2, true),
                fits::nqc_a2_fit_22(nu, chi1, chi2, true),
            )
        };
        let mut out = Self::none();
        out.set(
            mode_index(2, 2),
            NqcModeCoefficients {
                a: [a1, a2, 0.0],
                b: [0.0; 3],
            },
        );
        out
    }

    /// Parses lines `k l m a1 a2 a3 b1 b2 b3`; `#` starts a comment.
    pub fn parse(text: &str) -> Result<Self> {
        let mut out = Self::none();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 9 {
                bail!("NQC line {}: expected 9 columns, found {}.", lineno + 1, fields.len());
            }
            let k: usize = fields[0]
                .parse()
                .with_context(|| format!("NQC line {}: bad multipole index", lineno + 1))?;
            if k >= KMAX {
                bail!("NQC line {}: multipole index {k} is out of range.", lineno + 1);
            }
            let mut values = [0.0; 6];
            for (value, field) in values.iter_mut().zip(&fields[3..9]) {
                *value = field
                    .parse()
                    .with_context(|| format!("NQC line {}: bad coefficient '{field}'", lineno + 1))?;
            }
            out.set(
                k,
                NqcModeCoefficients {
                    a: [values[0], values[1], values[2]],
                    b: [values[3], values[4], values[5]],
                },
            );
        }
        Ok(out)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(EobError::from)
            .with_context(|| format!("Failed to read NQC coefficients from {}", path.display()))?;
        Self::parse(&text)
    }

    /// Fit- or file-based coefficients; `Compute` starts from the identity and is solved
    /// later on the merger window.
    pub fn from_fit(fit: NqcFit, params: &EobParameters, file: Option<&str>) -> Result<Self> {
        match fit {
            NqcFit::None | NqcFit::Compute => Ok(Self::none()),
            NqcFit::Nospin201602 => Ok(Self::nospin201602(params.nu)),
            NqcFit::Spin202002 => Ok(Self::spin202002(params.nu, params.chi1, params.chi2)),
            NqcFit::FromFile => match file {
                Some(path) => Self::from_file(Path::new(path)),
                None => Err(EobError::InvalidConfig("an NQC coefficient file is required.".into()).into()),
            },
        }
    }
}

/// Target amplitude, frequency and slopes of multipole k at the NQC point, or `None`
/// when no NR information exists for it.
fn nqc_target(params: &EobParameters, k: usize, templates: &[Option<fits::QnmTemplate>]) -> Option<fits::NqcPoint> {
    if k == mode_index(2, 2) {
        let point = fits::nqc_point_22(params.nu, params.x1, params.x2, params.chi1, params.chi2);
        let zerilli = 24f64.sqrt();
        return Some(fits::NqcPoint {
            amp: point.amp * zerilli,
            damp: point.damp * zerilli,
            ..point
        });
    }
    let mbh = params.remnant.as_ref()?.mass;
    templates
        .get(k)
        .copied()
        .flatten()
        .map(|template| fits::nqc_point_postpeak(&template, mbh, NQC_DELAY))
}

fn solve(matrix: Matrix2<f64>, rhs: Vector2<f64>, what: &str) -> Result<Vector2<f64>> {
    match matrix.lu().solve(&rhs) {
        Some(x) if x.iter().all(|v| v.is_finite()) => Ok(x),
        _ => bail!("NQC {what} system is singular."),
    }
}

/// Solves for (a1, a2, b1, b2) of every active multipole with NR information.
///
/// `trajectory` and `hlm` must share a uniform time axis around merger and `hlm` must
/// carry no NQC factor yet.
pub fn compute(
    params: &EobParameters,
    trajectory: &Trajectory,
    hlm: &Multipoles,
    t_omega_peak: f64,
) -> Result<NqcCoefficients> {
    let n = trajectory.len();
    if n < 5 || hlm.len() != n {
        bail!("NQC window needs at least 5 samples shared by dynamics and multipoles.");
    }
    let dt = trajectory.t[1] - trajectory.t[0];
    let t_nqc = t_omega_peak - fits::nqc_timeshift(params.nu, params.chi1) + NQC_DELAY;
    if !(t_nqc >= trajectory.t[0] && t_nqc <= trajectory.t[n - 1]) {
        bail!("NQC point t = {t_nqc} lies outside the merger window.");
    }

    let mut basis = vec![Vec::with_capacity(n); 6];
    for i in 0..n {
        let b = NqcBasis::new(trajectory.r[i], trajectory.omega[i], trajectory.prstar[i], trajectory.ddotr[i]);
        for (series, value) in basis.iter_mut().zip(b.n) {
            series.push(value);
        }
    }
    let at = |series: &[f64]| -> Result<f64> { Ok(CubicSpline::new(&trajectory.t, series)?.eval(t_nqc)) };
    let slope = |series: &[f64]| -> Result<f64> { at(&interp::d0_uniform(series, dt)?) };
    let curvature = |series: &[f64]| -> Result<f64> { at(&interp::d0_uniform(&interp::d0_uniform(series, dt)?, dt)?) };

    let (n1, n2) = (at(&basis[0])?, at(&basis[1])?);
    let (dn1, dn2) = (slope(&basis[0])?, slope(&basis[1])?);
    let (dn4, dn5) = (slope(&basis[3])?, slope(&basis[4])?);
    let (d2n4, d2n5) = (curvature(&basis[3])?, curvature(&basis[4])?);

    let templates = match &params.remnant {
        Some(remnant) => fits::qnm_hybrid_templates(
            params.nu,
            params.x1,
            params.x2,
            params.chi1,
            params.chi2,
            remnant.mass,
            remnant.spin,
            params.use_spins(),
        ),
        None => [None; KMAX],
    };

    let mut out = NqcCoefficients::none();
    for k in hlm.mask.active() {
        let Some(target) = nqc_target(params, k, &templates) else {
            continue;
        };
        let Some(mode) = hlm.mode(k) else { continue };
        let amp = at(&mode.amp)?;
        let damp = slope(&mode.amp)?;
        let omega = slope(&mode.phase)?;
        let domega = curvature(&mode.phase)?;

        let a = solve(
            Matrix2::new(amp * n1, amp * n2, damp * n1 + amp * dn1, damp * n2 + amp * dn2),
            Vector2::new(target.amp - amp, target.damp - damp),
            "amplitude",
        )
        .with_context(|| format!("NQC amplitude of multipole {:?}", mode_lm(k)))?;
        let b = solve(
            Matrix2::new(dn4, dn5, d2n4, d2n5),
            Vector2::new(omega - target.omega, domega - target.domega),
            "frequency",
        )
        .with_context(|| format!("NQC frequency of multipole {:?}", mode_lm(k)))?;

        debug!(
            target: "teob::waveform",
            k,
            a1 = a[0],
            a2 = a[1],
            b1 = b[0],
            b2 = b[1],
            "NQC coefficients"
        );
        out.set(
            k,
            NqcModeCoefficients {
                a: [a[0], a[1], 0.0],
                b: [b[0], b[1], 0.0],
            },
        );
    }
    info!(
        target: "teob::waveform",
        t_nqc,
        modes = out.active().count(),
        "NQC coefficients computed"
    );
    Ok(out)
}
