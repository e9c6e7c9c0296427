//! Multipolar strain.
//!
//! Modes are stored as amplitude and unwrapped phase with h_ℓm = A e^{-iφ} and
//! addressed by the linear index k over (ℓ, m), ℓ = 2..8, m = 1..ℓ. Negative-m
//! modes are never stored: they follow from h_{ℓ,-m} = (-1)^ℓ h*_{ℓm}.

use crate::dynamics::Trajectory;
use crate::error::try_grow;
use crate::flux::FluxModel;
use crate::interp::{self, CubicSpline};
use crate::nqc::{NqcBasis, NqcCoefficients};
use crate::params::EobParameters;
use crate::spin::EulerAngles;
use anyhow::{bail, Result};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tracing::debug;

/// Number of stored multipoles (ℓ = 2..8, m = 1..ℓ).
pub const KMAX: usize = 35;
pub const LMAX: usize = 8;

/// Linear index of (ℓ, m), m ≥ 1.
pub fn mode_index(l: usize, m: usize) -> usize {
    l * (l - 1) / 2 - 1 + (m - 1)
}

/// Inverse of `mode_index`.
pub fn mode_lm(k: usize) -> (usize, usize) {
    let mut base = 0;
    for l in 2..=LMAX {
        if k < base + l {
            return (l, k - base + 1);
        }
        base += l;
    }
    (LMAX, LMAX)
}

/// Selection of active multipoles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "Vec<usize>", try_from = "Vec<usize>")]
pub struct ModeMask {
    active: Vec<bool>,
}

impl ModeMask {
    pub fn none() -> Self {
        Self {
            active: vec![false; KMAX],
        }
    }

    pub fn all() -> Self {
        Self {
            active: vec![true; KMAX],
        }
    }

    pub fn from_indices(indices: &[usize]) -> Result<Self> {
        if indices.is_empty() {
            bail!("at least one multipole must be selected.");
        }
        let mut mask = Self::none();
        for &k in indices {
            if k >= KMAX {
                bail!("multipole index {k} is out of range (0..{KMAX}).");
            }
            mask.active[k] = true;
        }
        Ok(mask)
    }

    pub fn is_active(&self, k: usize) -> bool {
        self.active.get(k).copied().unwrap_or(false)
    }

    pub fn set(&mut self, k: usize, on: bool) {
        if let Some(slot) = self.active.get_mut(k) {
            *slot = on;
        }
    }

    /// Copy with `k` switched on.
    pub fn with(&self, k: usize) -> Self {
        let mut mask = self.clone();
        mask.set(k, true);
        mask
    }

    pub fn active(&self) -> impl Iterator<Item = usize> + '_ {
        self.active.iter().enumerate().filter(|(_, on)| **on).map(|(k, _)| k)
    }

    pub fn count(&self) -> usize {
        self.active().count()
    }
}

impl From<ModeMask> for Vec<usize> {
    fn from(mask: ModeMask) -> Self {
        mask.active().collect()
    }
}

impl TryFrom<Vec<usize>> for ModeMask {
    type Error = anyhow::Error;

    fn try_from(indices: Vec<usize>) -> Result<Self> {
        Self::from_indices(&indices)
    }
}

/// Complex strain sample with the h = A e^{-iφ} convention.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Strain(pub Complex64);

impl Strain {
    pub fn from_amp_phase(amplitude: f64, phase: f64) -> Self {
        Strain(Complex64::from_polar(amplitude, -phase))
    }

    pub fn amplitude(&self) -> f64 {
        self.0.norm()
    }

    /// Phase in (-π, π]; use `Mode` for unwrapped series.
    pub fn phase(&self) -> f64 {
        -self.0.arg()
    }

    pub fn re(&self) -> f64 {
        self.0.re
    }

    pub fn im(&self) -> f64 {
        self.0.im
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mode {
    pub amp: Vec<f64>,
    pub phase: Vec<f64>,
}

impl Mode {
    /// Amplitude and unwrapped phase of a complex series.
    pub fn from_strains(values: &[Strain]) -> Self {
        let amp = values.iter().map(Strain::amplitude).collect();
        let mut phase: Vec<f64> = values.iter().map(Strain::phase).collect();
        interp::unwrap(&mut phase);
        Self { amp, phase }
    }

    pub fn strains(&self) -> Vec<Strain> {
        self.amp
            .iter()
            .zip(&self.phase)
            .map(|(&a, &p)| Strain::from_amp_phase(a, p))
            .collect()
    }

    pub fn strain(&self, i: usize) -> Strain {
        Strain::from_amp_phase(self.amp[i], self.phase[i])
    }

    /// Real and imaginary parts as separate series.
    pub fn re_im(&self) -> (Vec<f64>, Vec<f64>) {
        self.strains().iter().map(|h| (h.re(), h.im())).unzip()
    }

    pub fn len(&self) -> usize {
        self.amp.len()
    }

    pub fn is_empty(&self) -> bool {
        self.amp.is_empty()
    }
}

/// Time-domain multipoles on a shared time axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Multipoles {
    pub time: Vec<f64>,
    pub mask: ModeMask,
    /// One entry per linear index; inactive entries stay empty.
    pub modes: Vec<Mode>,
}

impl Multipoles {
    pub fn new(mask: ModeMask) -> Self {
        Self {
            time: Vec::new(),
            mask,
            modes: vec![Mode::default(); KMAX],
        }
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    pub fn mode(&self, k: usize) -> Option<&Mode> {
        self.mask.is_active(k).then(|| &self.modes[k])
    }

    pub fn mode_lm(&self, l: usize, m: usize) -> Option<&Mode> {
        self.mode(mode_index(l, m))
    }

    pub fn mode_mut(&mut self, k: usize) -> Option<&mut Mode> {
        if self.mask.is_active(k) {
            Some(&mut self.modes[k])
        } else {
            None
        }
    }

    /// Appends one sample of (amplitude, phase) pairs; inactive entries are ignored.
    /// Buffers grow by at least `chunk` samples at a time.
    pub fn push(&mut self, t: f64, values: &[(f64, f64)], chunk: usize) -> Result<()> {
        if values.len() != KMAX {
            bail!("expected {KMAX} multipoles, got {}.", values.len());
        }
        if let Some(&last) = self.time.last() {
            if t <= last {
                bail!("multipole time must increase (t = {t} after {last}).");
            }
        }
        let chunk = chunk.max(1);
        if self.time.len() == self.time.capacity() {
            try_grow(&mut self.time, chunk)?;
        }
        self.time.push(t);
        for k in self.mask.active().collect::<Vec<_>>() {
            let mode = &mut self.modes[k];
            if mode.amp.len() == mode.amp.capacity() {
                try_grow(&mut mode.amp, chunk)?;
                try_grow(&mut mode.phase, chunk)?;
            }
            mode.amp.push(values[k].0);
            mode.phase.push(values[k].1);
        }
        Ok(())
    }

    pub fn unwrap_phases(&mut self) {
        for k in self.mask.active().collect::<Vec<_>>() {
            interp::unwrap(&mut self.modes[k].phase);
        }
    }

    /// Samples with t0 ≤ t ≤ t1.
    pub fn extract(&self, t0: f64, t1: f64) -> Result<Multipoles> {
        if t1 < t0 {
            bail!("bad extraction window: t1 = {t1} < t0 = {t0}.");
        }
        let start = self.time.partition_point(|&t| t < t0);
        let end = self.time.partition_point(|&t| t <= t1);
        if start >= end {
            bail!("nothing to extract in [{t0}, {t1}].");
        }
        Ok(self.slice(start, end))
    }

    fn slice(&self, start: usize, end: usize) -> Multipoles {
        let mut out = Multipoles::new(self.mask.clone());
        out.time = self.time[start..end].to_vec();
        for k in self.mask.active() {
            out.modes[k] = Mode {
                amp: self.modes[k].amp[start..end].to_vec(),
                phase: self.modes[k].phase[start..end].to_vec(),
            };
        }
        out
    }

    /// Keeps the samples before `t_join` and appends those of `other` from `t_join` on.
    /// A sample of `other` coinciding with the last kept one is dropped.
    pub fn join(&mut self, other: &Multipoles, t_join: f64) -> Result<()> {
        if self.mask != other.mask {
            bail!("cannot join multipoles with different masks.");
        }
        let (Some(&a0), Some(&b_end)) = (self.time.first(), other.time.last()) else {
            bail!("cannot join empty multipoles.");
        };
        if t_join > b_end || t_join <= a0 {
            debug!(target: "teob::waveform", t_join, "join time outside range, nothing joined");
            return Ok(());
        }
        let keep = self.time.partition_point(|&t| t < t_join);
        let mut from = other.time.partition_point(|&t| t < t_join);
        if keep > 0 && from < other.len() && (other.time[from] - self.time[keep - 1]).abs() < 1e-10 {
            from += 1;
        }
        let appended = other.len() - from;
        self.time.truncate(keep);
        try_grow(&mut self.time, appended)?;
        self.time.extend_from_slice(&other.time[from..]);
        for k in self.mask.active().collect::<Vec<_>>() {
            let mode = &mut self.modes[k];
            mode.amp.truncate(keep);
            mode.phase.truncate(keep);
            mode.amp.extend_from_slice(&other.modes[k].amp[from..]);
            mode.phase.extend_from_slice(&other.modes[k].phase[from..]);
        }
        Ok(())
    }

    /// Cubic-spline resampling of amplitude and phase on t0 + i dt, i = 0..n.
    pub fn interpolate_uniform(&self, t0: f64, dt: f64, n: usize) -> Result<Multipoles> {
        let mut out = Multipoles::new(self.mask.clone());
        out.time = (0..n).map(|i| t0 + i as f64 * dt).collect();
        for k in self.mask.active() {
            let mode = &self.modes[k];
            out.modes[k] = Mode {
                amp: interp::interpolate_uniform(&self.time, &mode.amp, t0, dt, n)?,
                phase: interp::interpolate_uniform(&self.time, &mode.phase, t0, dt, n)?,
            };
        }
        Ok(out)
    }

    /// Appends `n` samples spaced by `dt` with zero amplitude and frozen phase.
    pub fn extend(&mut self, n: usize, dt: f64) -> Result<()> {
        let Some(&last) = self.time.last() else {
            bail!("cannot extend empty multipoles.");
        };
        try_grow(&mut self.time, n)?;
        self.time.extend((1..=n).map(|i| last + i as f64 * dt));
        for k in self.mask.active().collect::<Vec<_>>() {
            let mode = &mut self.modes[k];
            let phase = mode.phase.last().copied().unwrap_or(0.0);
            mode.amp.resize(mode.amp.len() + n, 0.0);
            mode.phase.resize(mode.phase.len() + n, phase);
        }
        Ok(())
    }

    pub fn shift_time(&mut self, dt: f64) {
        for t in &mut self.time {
            *t += dt;
        }
    }
}

/// Multipoles along the dynamics: Newtonian × f_ℓm × tail × e^{iδ_ℓm} × NQC, with
/// φ_ℓm = mφ − arg of the resummed factors.
///
/// The (2,2) mode is always stored since merger diagnostics rely on it.
pub fn hlm_from_trajectory(
    params: &EobParameters,
    flux: &FluxModel,
    trajectory: &Trajectory,
    nqc: &NqcCoefficients,
) -> Result<Multipoles> {
    let mask = params.output.modes.with(mode_index(2, 2));
    let mut hlm = Multipoles::new(mask);
    let mut values = vec![(0.0, 0.0); KMAX];
    for i in 0..trajectory.len() {
        let input = trajectory.flux_input(i);
        let modes = flux.modes(&input);
        let basis = NqcBasis::new(
            trajectory.r[i],
            trajectory.omega[i],
            trajectory.prstar[i],
            trajectory.ddotr[i],
        );
        for k in hlm.mask.active() {
            let (_, m) = mode_lm(k);
            let h = modes[k] * nqc.factor(k, &basis);
            values[k] = (h.norm(), m as f64 * trajectory.phi[i] - h.arg());
        }
        hlm.push(trajectory.t[i], &values, params.ode.chunk)?;
    }
    hlm.unwrap_phases();
    debug!(
        target: "teob::waveform",
        samples = hlm.len(),
        modes = hlm.mask.count(),
        "multipoles synthesized"
    );
    Ok(hlm)
}

fn factorial(n: i32) -> f64 {
    (2..=n.max(0)).map(f64::from).product()
}

/// Wigner small-d matrix element d^l_{m'm}(β).
pub fn wigner_d(l: i32, mp: i32, m: i32, beta: f64) -> f64 {
    if mp.abs() > l || m.abs() > l {
        return 0.0;
    }
    let (c, s) = ((0.5 * beta).cos(), (0.5 * beta).sin());
    let norm = (factorial(l + mp) * factorial(l - mp) * factorial(l + m) * factorial(l - m)).sqrt();
    let s_min = (m - mp).max(0);
    let s_max = (l + m).min(l - mp);
    let mut sum = 0.0;
    for k in s_min..=s_max {
        let sign = if (mp - m + k) % 2 == 0 { 1.0 } else { -1.0 };
        let denom = factorial(l + m - k) * factorial(k) * factorial(mp - m + k) * factorial(l - mp - k);
        sum += sign * c.powi(2 * l + m - mp - 2 * k) * s.powi(mp - m + 2 * k) / denom;
    }
    norm * sum
}

/// Spin-weight −2 spherical harmonic.
pub fn spin_weighted_ylm(l: i32, m: i32, theta: f64, phi: f64) -> Complex64 {
    let norm = ((2 * l + 1) as f64 / (4.0 * PI)).sqrt();
    Complex64::from_polar(norm * wigner_d(l, m, 2, theta), f64::from(m) * phi)
}

fn parity(l: usize) -> f64 {
    if l % 2 == 0 {
        1.0
    } else {
        -1.0
    }
}

/// h+ and h× with h+ − i h× = Σ_ℓm h_ℓm Y^{-2}_ℓm(ι, φ), scaled by `scale`.
pub fn polarizations(hlm: &Multipoles, inclination: f64, phi: f64, scale: f64) -> (Vec<f64>, Vec<f64>) {
    let weights: Vec<(usize, Complex64, Complex64)> = hlm
        .mask
        .active()
        .map(|k| {
            let (l, m) = mode_lm(k);
            let (li, mi) = (l as i32, m as i32);
            (
                k,
                spin_weighted_ylm(li, mi, inclination, phi),
                parity(l) * spin_weighted_ylm(li, -mi, inclination, phi),
            )
        })
        .collect();
    let mut hp = vec![0.0; hlm.len()];
    let mut hc = vec![0.0; hlm.len()];
    for i in 0..hlm.len() {
        let mut sum = Complex64::new(0.0, 0.0);
        for (k, ylm, ylmm) in &weights {
            let h = hlm.modes[*k].strain(i).0;
            sum += h * ylm + h.conj() * ylmm;
        }
        hp[i] = scale * sum.re;
        hc[i] = -scale * sum.im;
    }
    (hp, hc)
}

/// Inertial-frame multipoles of one ℓ, m = −ℓ..ℓ.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InertialMode {
    pub l: usize,
    pub m: i32,
    pub h: Vec<Complex64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InertialMultipoles {
    pub time: Vec<f64>,
    pub modes: Vec<InertialMode>,
}

impl InertialMultipoles {
    pub fn mode(&self, l: usize, m: i32) -> Option<&InertialMode> {
        self.modes.iter().find(|mode| mode.l == l && mode.m == m)
    }

    /// h+ and h× of the rotated modes.
    pub fn polarizations(&self, inclination: f64, phi: f64, scale: f64) -> (Vec<f64>, Vec<f64>) {
        let weights: Vec<Complex64> = self
            .modes
            .iter()
            .map(|mode| spin_weighted_ylm(mode.l as i32, mode.m, inclination, phi))
            .collect();
        let n = self.time.len();
        let mut hp = vec![0.0; n];
        let mut hc = vec![0.0; n];
        for i in 0..n {
            let sum: Complex64 = self.modes.iter().zip(&weights).map(|(mode, y)| mode.h[i] * y).sum();
            hp[i] = scale * sum.re;
            hc[i] = -scale * sum.im;
        }
        (hp, hc)
    }
}

/// Wigner-D element D^l_{mm'}(α, β, γ) = e^{−imα} d^l_{mm'}(β) e^{im'γ}.
fn wigner_big_d(l: i32, m: i32, mp: i32, angles: &EulerAngles) -> Complex64 {
    let d = wigner_d(l, m, mp, angles.beta);
    Complex64::from_polar(d, f64::from(mp) * angles.gamma - f64::from(m) * angles.alpha)
}

/// Co-precessing (2,0) mode: the leading-order displacement memory sourced by the (2,±2)
/// flux, h₂₀/ν = ν/7 √(5/6π) ∫ |ḣ₂₂/ν|² dt. It is real and non-decreasing. Zero when the
/// (2,2) mode is inactive or the series is too short to differentiate.
pub fn memory_mode_20(hlm: &Multipoles, nu: f64) -> Result<Vec<f64>> {
    let n = hlm.len();
    let Some(mode) = hlm.mode_lm(2, 2) else {
        return Ok(vec![0.0; n]);
    };
    if n < 5 {
        return Ok(vec![0.0; n]);
    }
    let amp_dot = interp::d0_nonuniform(&mode.amp, &hlm.time)?;
    let phase_dot = interp::d0_nonuniform(&mode.phase, &hlm.time)?;
    let flux: Vec<f64> = (0..n)
        .map(|i| amp_dot[i].powi(2) + (mode.amp[i] * phase_dot[i]).powi(2))
        .collect();
    let scale = nu / 7.0 * (5.0 / (6.0 * PI)).sqrt();
    Ok(interp::cumtrapz(&flux, &hlm.time)
        .into_iter()
        .map(|v| scale * v)
        .collect())
}

/// Rotates co-precessing multipoles into the inertial frame, one set of Euler angles per
/// time sample. The co-precessing m = 0 content is the (2,0) memory of [`memory_mode_20`];
/// every other inertial m = 0 mode comes from the rotation of the m ≠ 0 ones.
pub fn twist(
    hlm: &Multipoles,
    angles: &[EulerAngles],
    nu: f64,
) -> Result<InertialMultipoles> {
    if angles.len() != hlm.len() {
        bail!(
            "twist needs one set of Euler angles per sample ({} given, {} samples).",
            angles.len(),
            hlm.len()
        );
    }
    let mut ells: Vec<usize> = hlm.mask.active().map(|k| mode_lm(k).0).collect();
    ells.dedup();

    let n = hlm.len();
    let memory = memory_mode_20(hlm, nu)?;
    let mut modes = Vec::new();
    for &l in &ells {
        let li = l as i32;
        let first = modes.len();
        for m in -li..=li {
            modes.push(InertialMode {
                l,
                m,
                h: vec![Complex64::new(0.0, 0.0); n],
            });
        }
        let mut coprecessing = vec![Complex64::new(0.0, 0.0); 2 * l + 1];
        for i in 0..n {
            coprecessing.iter_mut().for_each(|h| *h = Complex64::new(0.0, 0.0));
            for mp in 1..=l {
                if let Some(mode) = hlm.mode(mode_index(l, mp)) {
                    let h = mode.strain(i).0;
                    coprecessing[l + mp] = h;
                    coprecessing[l - mp] = parity(l) * h.conj();
                }
            }
            if l == 2 {
                coprecessing[l] = Complex64::new(memory[i], 0.0);
            }
            for (j, m) in (-li..=li).enumerate() {
                let mut value = Complex64::new(0.0, 0.0);
                for (jp, mp) in (-li..=li).enumerate() {
                    value += wigner_big_d(li, m, mp, &angles[i]) * coprecessing[jp];
                }
                modes[first + j].h[i] = value;
            }
        }
    }
    Ok(InertialMultipoles {
        time: hlm.time.clone(),
        modes,
    })
}

/// Stationary-phase representation of one mode: h̃*_ℓm(f) = Ã e^{−iΨ}.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FdMode {
    pub freq: Vec<f64>,
    pub amp: Vec<f64>,
    pub phase: Vec<f64>,
    /// Stationary time t(f).
    pub time: Vec<f64>,
}

impl FdMode {
    pub fn len(&self) -> usize {
        self.freq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.freq.is_empty()
    }

    pub fn value(&self, i: usize) -> Complex64 {
        Complex64::from_polar(self.amp[i], -self.phase[i])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultipolesFd {
    pub mask: ModeMask,
    pub modes: Vec<FdMode>,
}

impl MultipolesFd {
    pub fn mode(&self, k: usize) -> Option<&FdMode> {
        self.mask.is_active(k).then(|| &self.modes[k])
    }

    /// Frequency range covered by the active modes.
    pub fn range(&self) -> Option<(f64, f64)> {
        self.mask
            .active()
            .filter_map(|k| Some((*self.modes[k].freq.first()?, *self.modes[k].freq.last()?)))
            .reduce(|a, b| (a.0.min(b.0), a.1.max(b.1)))
    }

    /// Resamples every mode on the shared grid f = f_start + i df, f_start the first
    /// multiple of df inside the covered range. Modes vanish outside their own range.
    pub fn interpolate_uniform(&self, df: f64) -> Result<MultipolesFd> {
        let Some((f_lo, f_hi)) = self.range() else {
            bail!("no frequency-domain multipoles to interpolate.");
        };
        let f_start = (f_lo / df).ceil() * df;
        let n = interp::uniform_size(f_hi, f_start, df);
        let grid: Vec<f64> = (0..n).map(|i| f_start + i as f64 * df).collect();
        let mut out = MultipolesFd {
            mask: self.mask.clone(),
            modes: vec![FdMode::default(); KMAX],
        };
        for k in self.mask.active() {
            let mode = &self.modes[k];
            let mut resampled = FdMode {
                freq: grid.clone(),
                amp: vec![0.0; n],
                phase: vec![0.0; n],
                time: vec![0.0; n],
            };
            if mode.len() >= 2 {
                let amp = CubicSpline::new(&mode.freq, &mode.amp)?;
                let phase = CubicSpline::new(&mode.freq, &mode.phase)?;
                let time = CubicSpline::new(&mode.freq, &mode.time)?;
                for (i, &f) in grid.iter().enumerate() {
                    let fc = f.clamp(amp.x_min(), amp.x_max());
                    if f >= amp.x_min() && f <= amp.x_max() {
                        resampled.amp[i] = amp.eval(f);
                    }
                    resampled.phase[i] = phase.eval(fc);
                    resampled.time[i] = time.eval(fc);
                }
            }
            out.modes[k] = resampled;
        }
        Ok(out)
    }

    /// Multiplies every mode by e^{−2πi f t}.
    pub fn time_shift(&mut self, t: f64) {
        for k in self.mask.active().collect::<Vec<_>>() {
            let mode = &mut self.modes[k];
            for i in 0..mode.len() {
                mode.phase[i] += 2.0 * PI * mode.freq[i] * t;
                mode.time[i] += t;
            }
        }
    }
}

/// Multiplies a frequency series by e^{−2πi f t}.
pub fn time_shift_series(values: &mut [Complex64], freq: &[f64], t: f64) {
    for (h, &f) in values.iter_mut().zip(freq) {
        *h *= Complex64::from_polar(1.0, -2.0 * PI * f * t);
    }
}

/// Stationary-phase approximation of every active mode.
///
/// Each mode is transformed over its chirping part: samples up to the first maximum of
/// ω_ℓm = dφ_ℓm/dt, where ω̇ > 0 and the amplitude is non-zero.
pub fn spa(hlm: &Multipoles) -> Result<MultipolesFd> {
    let mut out = MultipolesFd {
        mask: hlm.mask.clone(),
        modes: vec![FdMode::default(); KMAX],
    };
    for k in hlm.mask.active() {
        let mode = &hlm.modes[k];
        if mode.len() < 5 {
            continue;
        }
        let omega = interp::d0_nonuniform(&mode.phase, &hlm.time)?;
        let omega_dot = interp::d0_nonuniform(&omega, &hlm.time)?;
        let mut fd = FdMode::default();
        for i in 0..mode.len() {
            if i > 0 && omega[i] <= omega[i - 1] {
                if fd.is_empty() {
                    continue;
                }
                break;
            }
            if omega[i] <= 0.0 || omega_dot[i] <= 0.0 || mode.amp[i] <= 0.0 {
                continue;
            }
            let f = omega[i] / (2.0 * PI);
            fd.freq.push(f);
            fd.amp.push(mode.amp[i] * (2.0 * PI / omega_dot[i]).sqrt());
            fd.phase.push(2.0 * PI * f * hlm.time[i] - mode.phase[i] - 0.25 * PI);
            fd.time.push(hlm.time[i]);
        }
        out.modes[k] = fd;
    }
    if out.mask.active().all(|k| out.modes[k].len() < 2) {
        bail!("stationary-phase transform found no chirping samples.");
    }
    Ok(out)
}

/// Frequency-domain h̃+ and h̃× for f > 0 on the common grid of `fd`.
///
/// `rotation` maps the stationary time of a sample to the Euler angles of the
/// co-precessing frame; without it the modes are projected directly.
pub fn fd_polarizations(
    fd: &MultipolesFd,
    inclination: f64,
    phi: f64,
    scale: f64,
    rotation: Option<&dyn Fn(f64) -> EulerAngles>,
) -> Result<(Vec<f64>, Vec<Complex64>, Vec<Complex64>)> {
    let Some(grid) = fd.mask.active().map(|k| &fd.modes[k].freq).find(|f| !f.is_empty()) else {
        bail!("no frequency-domain multipoles.");
    };
    let n = grid.len();
    if fd.mask.active().any(|k| fd.modes[k].len() != n) {
        bail!("frequency-domain multipoles must share one grid; interpolate first.");
    }
    let mut hp = vec![Complex64::new(0.0, 0.0); n];
    let mut hc = vec![Complex64::new(0.0, 0.0); n];
    let ylm_cache: Vec<(i32, Vec<Complex64>)> = (2..=LMAX as i32)
        .map(|l| (l, (-l..=l).map(|m| spin_weighted_ylm(l, m, inclination, phi)).collect()))
        .collect();
    for k in fd.mask.active() {
        let (l, mp) = mode_lm(k);
        let (li, mpi) = (l as i32, mp as i32);
        let ylm = &ylm_cache[l - 2].1;
        let mode = &fd.modes[k];
        for i in 0..n {
            if mode.amp[i] == 0.0 {
                continue;
            }
            let (plus, minus) = match rotation {
                None => (
                    parity(l) * ylm[(li - mpi) as usize],
                    ylm[(li + mpi) as usize].conj(),
                ),
                Some(angles_at) => {
                    let angles = angles_at(mode.time[i]);
                    let mut plus = Complex64::new(0.0, 0.0);
                    let mut minus = Complex64::new(0.0, 0.0);
                    for m in -li..=li {
                        let y = ylm[(li + m) as usize];
                        plus += y * wigner_big_d(li, m, -mpi, &angles);
                        minus += (y * wigner_big_d(li, m, mpi, &angles)).conj();
                    }
                    (parity(l) * plus, minus)
                }
            };
            let s = mode.value(i);
            hp[i] += 0.5 * s * (plus + minus);
            hc[i] += Complex64::new(0.0, 0.5) * s * (plus - minus);
        }
    }
    for h in hp.iter_mut().chain(hc.iter_mut()) {
        *h *= scale;
    }
    Ok((grid.clone(), hp, hc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn assert_err_contains<T: std::fmt::Debug>(result: Result<T>, needle: &str) {
        let err = result.expect_err("expected an error");
        let message = format!("{err:#}");
        assert!(message.contains(needle), "'{message}' does not contain '{needle}'");
    }

    fn chirp(mask: ModeMask, n: usize, dt: f64) -> Multipoles {
        let mut hlm = Multipoles::new(mask);
        for i in 0..n {
            let t = i as f64 * dt;
            let values: Vec<(f64, f64)> = (0..KMAX)
                .map(|k| {
                    let m = mode_lm(k).1 as f64;
                    (1.0 + 0.01 * t, m * (0.1 * t + 0.5e-3 * t * t))
                })
                .collect();
            hlm.push(t, &values, 64).expect("push");
        }
        hlm
    }

    #[test]
    fn linear_index_layout() {
        assert_eq!(mode_index(2, 1), 0);
        assert_eq!(mode_index(2, 2), 1);
        assert_eq!(mode_index(3, 3), 4);
        assert_eq!(mode_index(4, 4), 8);
        assert_eq!(mode_index(5, 5), 13);
        assert_eq!(mode_index(8, 8), KMAX - 1);
        for k in 0..KMAX {
            let (l, m) = mode_lm(k);
            assert_eq!(mode_index(l, m), k);
        }
    }

    #[test]
    fn mask_rejects_unknown_multipoles() {
        assert_err_contains(ModeMask::from_indices(&[1, 35]), "multipole");
        assert_err_contains(ModeMask::from_indices(&[]), "multipole");
        let mask = ModeMask::from_indices(&[1, 4, 1]).expect("valid mask");
        assert_eq!(mask.active().collect::<Vec<_>>(), vec![1, 4]);
        let json = serde_json::to_string(&mask).expect("serialize");
        assert_eq!(json, "[1,4]");
    }

    proptest! {
        #[test]
        fn amplitude_phase_round_trip(amp in 1e-6f64..10.0, phase in -3.0f64..3.0) {
            let h = Strain::from_amp_phase(amp, phase);
            prop_assert!((h.amplitude() - amp).abs() < 1e-12 * amp.max(1.0));
            prop_assert!((h.phase() - phase).abs() < 1e-12);
            let back = Strain(Complex64::new(h.re(), h.im()));
            prop_assert!((back.amplitude() - amp).abs() < 1e-12 * amp.max(1.0));
        }
    }

    #[test]
    fn unwrapped_phase_is_continuous() {
        let values: Vec<Strain> = (0..200).map(|i| Strain::from_amp_phase(1.0, 0.1 * i as f64)).collect();
        let mode = Mode::from_strains(&values);
        for i in 1..mode.len() {
            assert!((mode.phase[i] - mode.phase[i - 1] - 0.1).abs() < 1e-12);
        }
    }

    #[test]
    fn push_requires_increasing_time() {
        let mut hlm = Multipoles::new(ModeMask::all());
        let values = vec![(1.0, 0.0); KMAX];
        hlm.push(0.0, &values, 8).expect("first sample");
        assert_err_contains(hlm.push(0.0, &values, 8), "increase");
        assert_err_contains(hlm.push(1.0, &values[..3], 8), "expected 35");
    }

    #[test]
    fn extract_then_join_restores_the_series() {
        let mask = ModeMask::from_indices(&[mode_index(2, 2)]).expect("mask");
        let full = chirp(mask, 100, 1.0);
        let mut head = full.extract(0.0, 60.0).expect("head");
        let tail = full.extract(40.0, 99.0).expect("tail");
        assert_eq!(head.len(), 61);
        head.join(&tail, 50.0).expect("join");
        assert_eq!(head, full);
        assert!(head.time.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn uniform_resampling_keeps_smooth_phase() {
        let mask = ModeMask::from_indices(&[mode_index(2, 2)]).expect("mask");
        let coarse = chirp(mask, 50, 1.0);
        let fine = coarse.interpolate_uniform(0.0, 0.25, 197).expect("resample");
        let mode = fine.mode_lm(2, 2).expect("(2,2)");
        // natural end conditions only disturb the first and last few knots
        for (t, phase) in fine.time.iter().zip(&mode.phase) {
            if (10.0..=40.0).contains(t) {
                assert!((phase - 2.0 * (0.1 * t + 0.5e-3 * t * t)).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn harmonics_match_closed_forms() {
        let theta = 0.7;
        let phi = 0.3;
        let y22 = spin_weighted_ylm(2, 2, theta, phi);
        let expected = (5.0 / (64.0 * PI)).sqrt() * (1.0 + theta.cos()).powi(2);
        assert!((y22.norm() - expected).abs() < 1e-14);
        assert!((y22.arg() - 2.0 * phi).abs() < 1e-14);
        let y2m2 = spin_weighted_ylm(2, -2, theta, phi);
        let expected = (5.0 / (64.0 * PI)).sqrt() * (1.0 - theta.cos()).powi(2);
        assert!((y2m2.norm() - expected).abs() < 1e-14);
        assert!(spin_weighted_ylm(2, -2, 0.0, 0.0).norm() < 1e-15);
    }

    #[test]
    fn wigner_rows_are_normalized() {
        for l in 2..=LMAX as i32 {
            for m in -l..=l {
                let norm: f64 = (-l..=l).map(|mp| wigner_d(l, m, mp, 1.1).powi(2)).sum();
                assert!((norm - 1.0).abs() < 1e-10, "l = {l}, m = {m}: {norm}");
            }
        }
        assert!((wigner_d(3, 1, 1, 0.0) - 1.0).abs() < 1e-15);
        assert!(wigner_d(3, 1, 2, 0.0).abs() < 1e-15);
    }

    #[test]
    fn face_on_quadrupole_is_circular() {
        let mask = ModeMask::from_indices(&[mode_index(2, 2)]).expect("mask");
        let hlm = chirp(mask, 20, 1.0);
        let (hp, hc) = polarizations(&hlm, 0.0, 0.0, 1.0);
        let y22 = spin_weighted_ylm(2, 2, 0.0, 0.0).norm();
        let mode = hlm.mode_lm(2, 2).expect("(2,2)");
        for i in 0..hp.len() {
            let norm = hp[i].hypot(hc[i]);
            assert!((norm - mode.amp[i] * y22).abs() < 1e-12);
        }
    }

    #[test]
    fn twist_without_precession_is_the_identity() {
        let mask = ModeMask::from_indices(&[mode_index(2, 1), mode_index(2, 2)]).expect("mask");
        let hlm = chirp(mask, 10, 1.0);
        let angles = vec![
            EulerAngles {
                alpha: 0.4,
                beta: 0.0,
                gamma: 0.4,
            };
            hlm.len()
        ];
        let inertial = twist(&hlm, &angles, 0.0).expect("twist");
        let h22 = inertial.mode(2, 2).expect("(2,2)");
        let h20 = inertial.mode(2, 0).expect("(2,0)");
        let h2m2 = inertial.mode(2, -2).expect("(2,-2)");
        let mode = hlm.mode_lm(2, 2).expect("(2,2)");
        for i in 0..hlm.len() {
            assert!((h22.h[i] - mode.strain(i).0).norm() < 1e-12);
            assert!((h2m2.h[i] - mode.strain(i).0.conj()).norm() < 1e-12);
            assert!(h20.h[i].norm() < 1e-12);
        }
    }

    #[test]
    fn twist_preserves_power_and_fills_m_zero() {
        let mask = ModeMask::from_indices(&[mode_index(2, 1), mode_index(2, 2)]).expect("mask");
        let hlm = chirp(mask, 8, 1.0);
        let angles: Vec<EulerAngles> = (0..hlm.len())
            .map(|i| EulerAngles {
                alpha: 0.1 * i as f64,
                beta: 0.6,
                gamma: -0.2,
            })
            .collect();
        let inertial = twist(&hlm, &angles, 0.0).expect("twist");
        for i in 0..hlm.len() {
            let before = 2.0 * (hlm.mode_lm(2, 1).expect("21").amp[i].powi(2)
                + hlm.mode_lm(2, 2).expect("22").amp[i].powi(2));
            let after: f64 = inertial.modes.iter().map(|mode| mode.h[i].norm_sqr()).sum();
            assert!((before - after).abs() < 1e-10 * before);
        }
        assert!(inertial.mode(2, 0).expect("(2,0)").h[3].norm() > 1e-3);
        assert_err_contains(twist(&hlm, &angles[..3], 0.0), "Euler angles");
    }

    #[test]
    fn memory_accumulates_the_quadrupole_flux() {
        let mask = ModeMask::from_indices(&[mode_index(2, 2)]).expect("mask");
        let hlm = chirp(mask, 10, 1.0);
        let memory = memory_mode_20(&hlm, 0.25).expect("memory");
        assert_eq!(memory[0], 0.0);
        assert!(memory.windows(2).all(|w| w[1] >= w[0]));
        // |ḣ₂₂|² = Ȧ² + A²φ̇² with A = 1 + 0.01t, φ = 0.2t + 1e-3t².
        let flux = |t: f64| 1e-4 + ((1.0 + 0.01 * t) * (0.2 + 2e-3 * t)).powi(2);
        let steps = 9000;
        let integral: f64 =
            (0..steps).map(|i| flux((i as f64 + 0.5) * 9.0 / steps as f64)).sum::<f64>() * 9.0
                / steps as f64;
        let expected = 0.25 / 7.0 * (5.0 / (6.0 * PI)).sqrt() * integral;
        assert!((memory[9] - expected).abs() < 1e-3 * expected);

        let no_22 = ModeMask::from_indices(&[mode_index(2, 1)]).expect("mask");
        let memory = memory_mode_20(&chirp(no_22, 10, 1.0), 0.25).expect("memory");
        assert!(memory.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn twist_projects_the_memory_onto_m_zero() {
        let mask = ModeMask::from_indices(&[mode_index(2, 1), mode_index(2, 2)]).expect("mask");
        let hlm = chirp(mask, 10, 1.0);
        let memory = memory_mode_20(&hlm, 0.25).expect("memory");
        let aligned = vec![EulerAngles::default(); hlm.len()];
        let inertial = twist(&hlm, &aligned, 0.25).expect("twist");
        let h20 = inertial.mode(2, 0).expect("(2,0)");
        for i in 0..hlm.len() {
            assert!((h20.h[i] - Complex64::new(memory[i], 0.0)).norm() < 1e-12);
        }

        let beta = 0.6;
        let tilted = vec![
            EulerAngles {
                alpha: 0.3,
                beta,
                gamma: -0.2,
            };
            hlm.len()
        ];
        let with = twist(&hlm, &tilted, 0.25).expect("twist");
        let without = twist(&hlm, &tilted, 0.0).expect("twist");
        let d00 = 0.5 * (3.0 * beta.cos().powi(2) - 1.0);
        for i in 0..hlm.len() {
            let shift = |m: i32| {
                with.mode(2, m).expect("mode").h[i] - without.mode(2, m).expect("mode").h[i]
            };
            assert!((shift(0) - Complex64::new(d00 * memory[i], 0.0)).norm() < 1e-12);
            let expected = wigner_big_d(2, 2, 0, &tilted[i]) * memory[i];
            assert!((shift(2) - expected).norm() < 1e-12);
        }
        assert!(memory[9] > 0.0);
    }

    #[test]
    fn stationary_phase_amplitude_of_a_linear_chirp() {
        let mask = ModeMask::from_indices(&[mode_index(2, 2)]).expect("mask");
        let hlm = chirp(mask, 400, 0.5);
        let fd = spa(&hlm).expect("spa");
        let mode = fd.mode(mode_index(2, 2)).expect("(2,2)");
        // φ22 = 0.2 t + 1e-3 t², so ω̇ = 2e-3
        let i = mode.len() / 2;
        let amp_td = 1.0 + 0.01 * mode.time[i];
        assert!((mode.amp[i] - amp_td * (2.0 * PI / 2e-3).sqrt()).abs() < 1e-6 * mode.amp[i]);
        assert!((mode.freq[i] - (0.2 + 2e-3 * mode.time[i]) / (2.0 * PI)).abs() < 1e-9);
        assert!(mode.freq.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn time_shift_adds_linear_phase() {
        let mask = ModeMask::from_indices(&[mode_index(2, 2)]).expect("mask");
        let hlm = chirp(mask, 200, 0.5);
        let fd = spa(&hlm).expect("spa").interpolate_uniform(1e-4).expect("grid");
        let mut shifted = fd.clone();
        shifted.time_shift(-10.0);
        let k = mode_index(2, 2);
        let (a, b) = (&fd.modes[k], &shifted.modes[k]);
        for i in 0..a.len() {
            let expected = a.value(i) * Complex64::from_polar(1.0, 2.0 * PI * a.freq[i] * 10.0);
            assert!((b.value(i) - expected).norm() < 1e-9 * (1.0 + a.amp[i]));
        }
        let (freq, hp, hc) = fd_polarizations(&fd, 0.3, 0.0, 1.0, None).expect("polarizations");
        assert_eq!(freq.len(), hp.len());
        assert!(hp.iter().zip(&hc).any(|(p, c)| p.norm() > 0.0 && c.norm() > 0.0));
    }

    #[test]
    fn fd_rotation_by_identity_matches_direct_projection() {
        let mask = ModeMask::from_indices(&[mode_index(2, 2), mode_index(3, 3)]).expect("mask");
        let hlm = chirp(mask, 200, 0.5);
        let fd = spa(&hlm).expect("spa").interpolate_uniform(1e-4).expect("grid");
        let identity = |_t: f64| EulerAngles {
            alpha: 0.0,
            beta: 0.0,
            gamma: 0.0,
        };
        let (_, hp0, hc0) = fd_polarizations(&fd, 0.8, 0.2, 1.0, None).expect("direct");
        let (_, hp1, hc1) = fd_polarizations(&fd, 0.8, 0.2, 1.0, Some(&identity)).expect("rotated");
        for i in 0..hp0.len() {
            assert!((hp0[i] - hp1[i]).norm() < 1e-10 * (1.0 + hp0[i].norm()));
            assert!((hc0[i] - hc1[i]).norm() < 1e-10 * (1.0 + hc0[i].norm()));
        }
    }
}
