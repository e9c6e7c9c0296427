//! Orbital EOB dynamics: Hamilton's equations for (φ, r, pφ, pr*) with radiation reaction,
//! integrated until the orbital frequency peaks or a stop condition fires.

use crate::config::OdeTimestep;
use crate::error::{try_grow, EobError};
use crate::flux::{FluxInput, FluxModel};
use crate::hamiltonian::Hamiltonian;
use crate::initial_conditions::InitialData;
use crate::interp;
use crate::metric::{Metric, RcValues};
use crate::nqc::NqcCoefficients;
use crate::orbits;
use crate::params::EobParameters;
use crate::solvers::{AdaptiveStepper, ErrorControl, Tsit5};
use crate::traits::DynamicalSystem;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use tracing::{debug, info, warn};

/// Integration controls, in units of M.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OdeSettings {
    pub timestep: OdeTimestep,
    pub abs_tol: f64,
    pub rel_tol: f64,
    /// Initial (adaptive) or fixed (uniform) step.
    pub dt: f64,
    /// Step used after the frequency peak, and after the LSO in the hybrid stepping.
    pub dt_merger: f64,
    pub t_max: f64,
    /// Stop once r falls below this radius; non-positive disables the check.
    pub stop_radius: f64,
    pub stop_after_peak: bool,
    /// How long to keep integrating once the orbital frequency has peaked.
    pub peak_time_lag: f64,
    /// Growth quantum of the output buffers.
    pub chunk: usize,
    pub max_rejections: usize,
}

impl Default for OdeSettings {
    fn default() -> Self {
        Self {
            timestep: OdeTimestep::Adaptive,
            abs_tol: 1e-13,
            rel_tol: 1e-11,
            dt: 0.5,
            dt_merger: 0.1,
            t_max: 1e12,
            stop_radius: 1.0,
            stop_after_peak: false,
            peak_time_lag: 2.0,
            chunk: 500,
            max_rejections: 100,
        }
    }
}

/// r_ω = r ψ^{1/3}, the radius for which r_ω³Ω² = 1 holds on circular orbits.
pub fn r_omega(r: f64, a: f64, da: f64, pphi: f64, nu: f64) -> f64 {
    let w = (a * (1.0 + pphi * pphi / (r * r))).sqrt();
    let psi = 2.0 * (1.0 + 2.0 * nu * (w - 1.0)) / (r * r * da);
    r * psi.cbrt()
}

/// Spinning r_ω, built from the Hamiltonian at pr* = 0: coupling G̃, its slope and the
/// real energy E0.
pub fn r_omega_spin(a: f64, da: f64, rc: &RcValues, pphi: f64, gyro: f64, dgyro_dr: f64, e0: f64) -> f64 {
    let uc = rc.rc.recip();
    let uc2 = uc * uc;
    let duc_dr = -uc2 * rc.drc;
    let psic = ((duc_dr + dgyro_dr * rc.rc * (a / (pphi * pphi) + a * uc2).sqrt() / a) / (-0.5 * da)).abs();
    (((rc.rc.powi(3) * psic).sqrt().recip() + gyro) / e0).powf(-2.0 / 3.0)
}

/// One right-hand-side evaluation with the auxiliary quantities stored along the trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RhsSample {
    pub phi: f64,
    pub r: f64,
    pub pphi: f64,
    pub prstar: f64,
    /// dφ/dt
    pub omega: f64,
    /// Orbital part of the frequency; equals `omega` without spins.
    pub omega_orb: f64,
    pub dr_dt: f64,
    pub dprstar_dt: f64,
    /// Radiation reaction ṗφ, zero when the flux was not requested.
    pub dpphi_dt: f64,
    pub ddotr: f64,
    pub e: f64,
    pub heff: f64,
    pub r_omega: f64,
    pub v_phi: f64,
    pub jhat: f64,
    pub horizon: bool,
}

impl RhsSample {
    pub fn flux_input(&self) -> FluxInput {
        FluxInput {
            x: self.v_phi * self.v_phi,
            omega: self.omega,
            r_omega: self.r_omega,
            e: self.e,
            heff: self.heff,
            jhat: self.jhat,
            r: self.r,
            prstar: self.prstar,
            ddotr: self.ddotr,
        }
    }
}

/// Equations of motion of the orbital dynamics, state (φ, r, pφ, pr*).
pub struct EobRhs<'a> {
    metric: &'a Metric,
    hamiltonian: Hamiltonian,
    flux: &'a FluxModel,
    nqc: &'a NqcCoefficients,
    horizon: Cell<bool>,
}

impl<'a> EobRhs<'a> {
    pub fn new(params: &EobParameters, metric: &'a Metric, flux: &'a FluxModel, nqc: &'a NqcCoefficients) -> Self {
        Self {
            metric,
            hamiltonian: Hamiltonian::new(params),
            flux,
            nqc,
            horizon: Cell::new(false),
        }
    }

    pub fn metric(&self) -> &Metric {
        self.metric
    }

    pub fn hamiltonian(&self) -> &Hamiltonian {
        &self.hamiltonian
    }

    /// Whether any evaluation since the last reset met A below the horizon threshold.
    pub fn horizon_reached(&self) -> bool {
        self.horizon.get()
    }

    pub fn reset_horizon(&self) {
        self.horizon.set(false);
    }

    pub fn evaluate(&self, y: &[f64], with_flux: bool) -> RhsSample {
        let (phi, r, pphi, prstar) = (y[0], y[1], y[2], y[3]);
        let ham = &self.hamiltonian;
        let nu = ham.nu();
        let (values, rc) = self.metric.at(r);
        if values.horizon {
            self.horizon.set(true);
        }
        let h = ham.eval(r, pphi, prstar, &values, &rc);
        let (a, da, b, db) = (values.a, values.da, values.b, values.db);
        let e = h.e;
        let sqrt_ab = (a / b).sqrt();

        let omega = h.dheff_dpphi / e;
        let dr_dt = sqrt_ab * h.dheff_dprstar / e;
        let dprstar_dt = -sqrt_ab * h.dheff_dr / e;

        let (r_omg, ddotr, omega_orb) = if ham.has_spin() {
            let circular = ham.eval(r, pphi, 0.0, &values, &rc);
            let uc = rc.rc.recip();
            (
                r_omega_spin(a, da, &rc, pphi, circular.gyro, circular.dgyro_dr, circular.e),
                dprstar_dt * sqrt_ab * h.d2heff_dprstar2 / e,
                pphi * a * uc * uc / (e * h.heff_orb),
            )
        } else {
            let z3 = ham.z3();
            let u = r.recip();
            let (u2, p2) = (u * u, prstar * prstar);
            let p3 = p2 * prstar;
            let div_he = 1.0 / (h.heff * e);
            let tmp_e = 1.0 / h.heff + nu / (e * e);
            let radial = prstar + 2.0 * z3 * a * u2 * p3;
            let ddotr_dr = sqrt_ab
                * (radial * (0.5 * (da / a - db / b) - h.dheff_dr * tmp_e)
                    + 2.0 * z3 * (da * u2 - 2.0 * a * u2 * u) * p3)
                * div_he;
            let ddotr_dprstar =
                sqrt_ab * (1.0 + 6.0 * z3 * a * u2 * p2 - radial * h.dheff_dprstar * tmp_e) * div_he;
            (
                r_omega(r, a, da, pphi, nu),
                dprstar_dt * ddotr_dprstar + dr_dt * ddotr_dr,
                omega,
            )
        };

        let v_phi = r_omg * omega;
        let mut sample = RhsSample {
            phi,
            r,
            pphi,
            prstar,
            omega,
            omega_orb,
            dr_dt,
            dprstar_dt,
            dpphi_dt: 0.0,
            ddotr,
            e,
            heff: h.heff,
            r_omega: r_omg,
            v_phi,
            jhat: pphi / (r_omg * v_phi),
            horizon: values.horizon,
        };
        if with_flux {
            sample.dpphi_dt = self.flux.flux(&sample.flux_input(), self.nqc);
        }
        sample
    }
}

impl DynamicalSystem<f64> for EobRhs<'_> {
    fn dimension(&self) -> usize {
        4
    }

    fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
        let sample = self.evaluate(x, true);
        out[0] = sample.omega;
        out[1] = sample.dr_dt;
        out[2] = sample.dpphi_dt;
        out[3] = sample.dprstar_dt;
    }
}

/// Sampled orbital dynamics, one column per stored quantity.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Trajectory {
    pub t: Vec<f64>,
    pub r: Vec<f64>,
    pub phi: Vec<f64>,
    pub pphi: Vec<f64>,
    pub prstar: Vec<f64>,
    pub omega: Vec<f64>,
    pub omega_orb: Vec<f64>,
    pub ddotr: Vec<f64>,
    pub e: Vec<f64>,
    pub heff: Vec<f64>,
    pub r_omega: Vec<f64>,
    pub v_phi: Vec<f64>,
    pub jhat: Vec<f64>,
}

const COLUMNS: usize = 13;

impl Trajectory {
    fn columns(&self) -> [&Vec<f64>; COLUMNS] {
        [
            &self.t,
            &self.r,
            &self.phi,
            &self.pphi,
            &self.prstar,
            &self.omega,
            &self.omega_orb,
            &self.ddotr,
            &self.e,
            &self.heff,
            &self.r_omega,
            &self.v_phi,
            &self.jhat,
        ]
    }

    fn columns_mut(&mut self) -> [&mut Vec<f64>; COLUMNS] {
        [
            &mut self.t,
            &mut self.r,
            &mut self.phi,
            &mut self.pphi,
            &mut self.prstar,
            &mut self.omega,
            &mut self.omega_orb,
            &mut self.ddotr,
            &mut self.e,
            &mut self.heff,
            &mut self.r_omega,
            &mut self.v_phi,
            &mut self.jhat,
        ]
    }

    fn from_columns(columns: Vec<Vec<f64>>) -> Self {
        let mut out = Trajectory::default();
        for (slot, column) in out.columns_mut().into_iter().zip(columns) {
            *slot = column;
        }
        out
    }

    pub fn len(&self) -> usize {
        self.t.len()
    }

    pub fn is_empty(&self) -> bool {
        self.t.is_empty()
    }

    /// Appends one sample; buffers grow by at least `chunk` samples at a time.
    pub fn push(&mut self, t: f64, sample: &RhsSample, chunk: usize) -> Result<()> {
        if let Some(&last) = self.t.last() {
            if t <= last {
                bail!("trajectory time must increase (t = {t} after {last}).");
            }
        }
        let values = [
            t,
            sample.r,
            sample.phi,
            sample.pphi,
            sample.prstar,
            sample.omega,
            sample.omega_orb,
            sample.ddotr,
            sample.e,
            sample.heff,
            sample.r_omega,
            sample.v_phi,
            sample.jhat,
        ];
        let chunk = chunk.max(1);
        for (column, value) in self.columns_mut().into_iter().zip(values) {
            if column.len() == column.capacity() {
                try_grow(column, chunk)?;
            }
            column.push(value);
        }
        Ok(())
    }

    pub fn truncate(&mut self, n: usize) {
        for column in self.columns_mut() {
            column.truncate(n);
        }
    }

    pub fn flux_input(&self, i: usize) -> FluxInput {
        FluxInput {
            x: self.v_phi[i] * self.v_phi[i],
            omega: self.omega[i],
            r_omega: self.r_omega[i],
            e: self.e[i],
            heff: self.heff[i],
            jhat: self.jhat[i],
            r: self.r[i],
            prstar: self.prstar[i],
            ddotr: self.ddotr[i],
        }
    }

    /// Samples with t0 ≤ t ≤ t1.
    pub fn extract(&self, t0: f64, t1: f64) -> Result<Trajectory> {
        if t1 < t0 {
            bail!("bad extraction window: t1 = {t1} < t0 = {t0}.");
        }
        let start = self.t.partition_point(|&t| t < t0);
        let end = self.t.partition_point(|&t| t <= t1);
        if start >= end {
            bail!("nothing to extract in [{t0}, {t1}].");
        }
        Ok(Self::from_columns(
            self.columns().iter().map(|c| c[start..end].to_vec()).collect(),
        ))
    }

    /// Cubic-spline resampling of every column on t0 + i dt, i = 0..n.
    pub fn interpolate_uniform(&self, t0: f64, dt: f64, n: usize) -> Result<Trajectory> {
        let time: Vec<f64> = (0..n).map(|i| t0 + i as f64 * dt).collect();
        let mut columns = vec![time];
        for column in self.columns().iter().skip(1) {
            columns.push(interp::interpolate_uniform(&self.t, column, t0, dt, n)?);
        }
        Ok(Self::from_columns(columns))
    }

    /// Keeps the samples before `t_join` and appends those of `other` from `t_join` on.
    pub fn join(&mut self, other: &Trajectory, t_join: f64) -> Result<()> {
        let (Some(&a0), Some(&b_end)) = (self.t.first(), other.t.last()) else {
            bail!("cannot join empty trajectories.");
        };
        if t_join > b_end || t_join <= a0 {
            debug!(target: "teob::dynamics", t_join, "join time outside range, nothing joined");
            return Ok(());
        }
        let keep = self.t.partition_point(|&t| t < t_join);
        let mut from = other.t.partition_point(|&t| t < t_join);
        if keep > 0 && from < other.len() && (other.t[from] - self.t[keep - 1]).abs() < 1e-10 {
            from += 1;
        }
        let appended = other.len() - from;
        for (column, source) in self.columns_mut().into_iter().zip(other.columns()) {
            column.truncate(keep);
            try_grow(column, appended)?;
            column.extend_from_slice(&source[from..]);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Termination {
    Horizon,
    StopRadius,
    FrequencyPeak,
    MaxTime,
}

impl Termination {
    pub fn reason(&self) -> &'static str {
        match self {
            Termination::Horizon => "horizon reached",
            Termination::StopRadius => "stop radius reached",
            Termination::FrequencyPeak => "frequency peak reached",
            Termination::MaxTime => "maximum time reached",
        }
    }
}

/// First sample after the orbital frequency started decreasing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeakInfo {
    pub t: f64,
    /// Largest frequency seen before the decrease.
    pub omega: f64,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicsRun {
    pub trajectory: Trajectory,
    pub termination: Termination,
    pub peak: Option<PeakInfo>,
    pub steps: usize,
}

/// Integrates from `initial` at t = 0.
pub fn integrate(params: &EobParameters, rhs: &EobRhs, initial: &InitialData) -> Result<DynamicsRun> {
    let settings = &params.ode;
    let spinning = rhs.hamiltonian().has_spin();
    let frequency = |s: &RhsSample| if spinning { s.omega_orb } else { s.omega };

    let r_lso = match settings.timestep {
        OdeTimestep::AdaptiveUniformAfterLso => {
            let r_lso = orbits::lso(rhs.metric()).ok();
            if r_lso.is_none() {
                warn!(target: "teob::dynamics", "no last stable orbit, keeping adaptive steps");
            }
            r_lso
        }
        _ => None,
    };

    let control = ErrorControl {
        abs_tol: settings.abs_tol,
        rel_tol: settings.rel_tol,
        ..ErrorControl::default()
    };
    let mut stepper = AdaptiveStepper::new(Tsit5::new(4), 4, control);
    stepper.max_rejections = settings.max_rejections;

    let mut y = initial.state();
    let mut t = 0.0;
    let mut dt = settings.dt;
    let mut inner = settings.dt;
    let mut t_stop = settings.t_max;

    let mut trajectory = Trajectory::default();
    let first = rhs.evaluate(&y, false);
    trajectory.push(t, &first, settings.chunk)?;
    let mut omega_prev = frequency(&first);
    let mut peak: Option<PeakInfo> = None;
    let mut steps = 0;

    let termination = loop {
        rhs.reset_horizon();
        let uniform = match settings.timestep {
            OdeTimestep::Uniform => true,
            OdeTimestep::Adaptive => peak.is_some(),
            OdeTimestep::AdaptiveUniformAfterLso => {
                let past_lso = r_lso.is_some_and(|r_lso| y[1] <= r_lso);
                if past_lso {
                    dt = settings.dt_merger;
                }
                past_lso
            }
        };
        let step = if uniform {
            let target = t + dt;
            stepper.drive(rhs, &mut t, target, &mut inner, &mut y).map(|_| ())
        } else {
            stepper.evolve(rhs, &mut t, t_stop, &mut dt, &mut y).map(|_| ())
        };

        if peak.is_some() && (step.is_err() || !y[1].is_finite()) {
            break Termination::FrequencyPeak;
        }
        step.with_context(|| format!("orbital dynamics before the frequency peak (t = {t})"))?;
        if !y.iter().all(|v| v.is_finite()) {
            return Err(EobError::OdeIntegration(format!("non-finite state at t = {t}")).into());
        }
        steps += 1;

        let horizon = rhs.horizon_reached();
        let sample = rhs.evaluate(&y, false);
        let current = frequency(&sample);
        if peak.is_some() {
            if current > omega_prev {
                break Termination::FrequencyPeak;
            }
            omega_prev = current;
        }
        trajectory.push(t, &sample, settings.chunk)?;

        let mut stop = horizon.then_some(Termination::Horizon);
        // evolve lands exactly on t_max
        if t >= settings.t_max {
            stop = Some(Termination::MaxTime);
        }
        if settings.stop_radius > 0.0 && sample.r < settings.stop_radius {
            stop = Some(Termination::StopRadius);
        }
        match peak {
            None if current < omega_prev => {
                peak = Some(PeakInfo {
                    t,
                    omega: omega_prev,
                    index: trajectory.len() - 1,
                });
                dt = dt.min(settings.dt_merger);
                inner = dt;
                t_stop = t + settings.peak_time_lag;
                debug!(target: "teob::dynamics", t, omega = omega_prev, dt, "frequency peak reached");
                if settings.stop_after_peak {
                    trajectory.truncate(trajectory.len() - 1);
                    stop = Some(Termination::FrequencyPeak);
                }
            }
            None => omega_prev = current,
            Some(_) if t >= t_stop => stop = Some(Termination::FrequencyPeak),
            Some(_) => {}
        }
        // any successful stop past the peak completes the merger
        if peak.is_some() && stop.is_some() {
            stop = Some(Termination::FrequencyPeak);
        }
        if let Some(stop) = stop {
            break stop;
        }
    };

    let last = trajectory.len() - 1;
    info!(
        target: "teob::dynamics",
        reason = termination.reason(),
        steps,
        samples = trajectory.len(),
        t = trajectory.t[last],
        r = trajectory.r[last],
        "dynamics terminated"
    );
    Ok(DynamicsRun {
        trajectory,
        termination,
        peak,
        steps,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InputParameters;
    use crate::initial_conditions::initial_data;

    fn assert_err_contains<T: std::fmt::Debug>(result: Result<T>, needle: &str) {
        let err = result.expect_err("expected error");
        let message = format!("{err:#}");
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    fn run(input: InputParameters, tweak: impl FnOnce(&mut OdeSettings)) -> DynamicsRun {
        let mut params = EobParameters::resolve(&input).expect("valid parameters");
        tweak(&mut params.ode);
        let metric = Metric::new(&params).expect("metric");
        let flux = FluxModel::new(&params);
        let nqc = NqcCoefficients::none();
        let rhs = EobRhs::new(&params, &metric, &flux, &nqc);
        let initial = initial_data(&params, &metric, &flux, params.r0).expect("initial data");
        integrate(&params, &rhs, &initial).expect("integration")
    }

    fn close_binary() -> InputParameters {
        InputParameters {
            r0: 12.0,
            ..InputParameters::default()
        }
    }

    #[test]
    fn conservative_flow_keeps_circular_orbits_circular() {
        let params = EobParameters::resolve(&InputParameters::default()).expect("params");
        let metric = Metric::new(&params).expect("metric");
        let flux = FluxModel::new(&params);
        let nqc = NqcCoefficients::none();
        let rhs = EobRhs::new(&params, &metric, &flux, &nqc);
        let r = 15.0;
        let pphi = orbits::circular_pphi(&metric.eval(r), r).0;
        let sample = rhs.evaluate(&[0.0, r, pphi, 0.0], false);
        assert_eq!(sample.dr_dt, 0.0);
        assert!(sample.dprstar_dt.abs() < 1e-14);
        assert_eq!(sample.dpphi_dt, 0.0);
        assert!((sample.omega * sample.r_omega.powf(1.5) - 1.0).abs() < 1e-10);

        let radiating = rhs.evaluate(&[0.0, r, pphi, 0.0], true);
        assert!(radiating.dpphi_dt < 0.0);
        assert!(!rhs.horizon_reached());
    }

    #[test]
    fn equal_mass_inspiral_reaches_the_frequency_peak() {
        let run = run(close_binary(), |_| {});
        let trajectory = &run.trajectory;
        assert_eq!(run.termination, Termination::FrequencyPeak);
        let peak = run.peak.expect("peak");
        assert!(peak.omega > 0.1 && peak.omega < 0.3, "{}", peak.omega);
        assert!(trajectory.t.windows(2).all(|w| w[1] > w[0]));
        assert!(trajectory.r.windows(2).all(|w| w[1] <= w[0]));
        let last = trajectory.len() - 1;
        // higher-mode default lag of 10 M plus one merger step
        assert!(trajectory.t[last] - peak.t <= 10.0 + 0.1 + 1e-9);
        assert!(trajectory.r[last] < 3.0);
    }

    #[test]
    fn stops_after_the_peak_report_the_peak() {
        let run = run(close_binary(), |ode| {
            ode.peak_time_lag = 200.0;
            ode.stop_radius = 1.5;
        });
        assert_eq!(run.termination, Termination::FrequencyPeak);
        let peak = run.peak.expect("peak");
        let last = run.trajectory.len() - 1;
        assert!(run.trajectory.r[last] < 1.5);
        assert!(run.trajectory.t[last] - peak.t < 200.0);
    }

    #[test]
    fn inverse_mass_ratio_gives_the_same_trajectory() {
        let heavy_first = run(
            InputParameters {
                r0: 12.0,
                q: 2.0,
                chi1: 0.3,
                chi2: -0.1,
                ..InputParameters::default()
            },
            |_| {},
        );
        let light_first = run(
            InputParameters {
                r0: 12.0,
                q: 0.5,
                chi1: -0.1,
                chi2: 0.3,
                ..InputParameters::default()
            },
            |_| {},
        );
        assert_eq!(heavy_first.termination, light_first.termination);
        assert_eq!(heavy_first.trajectory.t, light_first.trajectory.t);
        assert_eq!(heavy_first.trajectory.r, light_first.trajectory.r);
        assert_eq!(heavy_first.trajectory.phi, light_first.trajectory.phi);
    }

    #[test]
    fn spinning_inspiral_reaches_the_frequency_peak() {
        let run = run(
            InputParameters {
                r0: 12.0,
                q: 2.0,
                chi1: 0.5,
                chi2: 0.3,
                ..InputParameters::default()
            },
            |_| {},
        );
        assert_eq!(run.termination, Termination::FrequencyPeak);
        assert!(run.peak.is_some());
    }

    #[test]
    fn stop_conditions() {
        let by_radius = run(close_binary(), |ode| ode.stop_radius = 8.0);
        assert_eq!(by_radius.termination, Termination::StopRadius);
        assert!(by_radius.trajectory.r.last().copied().unwrap_or(f64::NAN) < 8.0);
        assert!(by_radius.peak.is_none());

        let by_time = run(close_binary(), |ode| ode.t_max = 50.0);
        assert_eq!(by_time.termination, Termination::MaxTime);
        assert_eq!(by_time.trajectory.t.last().copied(), Some(50.0));
        assert!(by_time.trajectory.t.windows(2).all(|w| w[1] > w[0]));

        let at_peak = run(close_binary(), |ode| ode.stop_after_peak = true);
        assert_eq!(at_peak.termination, Termination::FrequencyPeak);
        let peak = at_peak.peak.expect("peak");
        assert_eq!(at_peak.trajectory.len(), peak.index);
    }

    #[test]
    fn uniform_stepping_is_uniform_before_the_peak() {
        let run = run(close_binary(), |ode| {
            ode.timestep = OdeTimestep::Uniform;
            ode.dt = 0.5;
            ode.stop_radius = 6.0;
        });
        let dts: Vec<f64> = run.trajectory.t.windows(2).map(|w| w[1] - w[0]).collect();
        assert!(dts.iter().all(|dt| (dt - 0.5).abs() < 1e-9));
    }

    fn synthetic(n: usize, t0: f64) -> Trajectory {
        let mut trajectory = Trajectory::default();
        for i in 0..n {
            let t = t0 + i as f64;
            let sample = RhsSample {
                r: 10.0 - 0.01 * t,
                phi: 0.1 * t,
                omega: 0.03 + 1e-4 * t,
                ..RhsSample::default()
            };
            trajectory.push(t, &sample, 4).expect("push");
        }
        trajectory
    }

    #[test]
    fn trajectory_utilities() {
        let mut trajectory = synthetic(20, 0.0);
        assert_err_contains(trajectory.push(3.0, &RhsSample::default(), 4), "must increase");

        let window = trajectory.extract(4.0, 7.5).expect("window");
        assert_eq!(window.t, vec![4.0, 5.0, 6.0, 7.0]);
        assert_eq!(window.r.len(), 4);
        assert_err_contains(trajectory.extract(30.0, 40.0), "nothing to extract");

        let fine = trajectory.interpolate_uniform(2.0, 0.25, 9).expect("interpolation");
        assert!((fine.t[8] - 4.0).abs() < 1e-14);
        assert!((fine.phi[3] - 0.275).abs() < 1e-12);

        let tail = synthetic(10, 15.0);
        trajectory.join(&tail, 15.0).expect("join");
        assert_eq!(trajectory.len(), 25);
        assert!(trajectory.t.windows(2).all(|w| w[1] > w[0]));
        assert_eq!(trajectory.phi.len(), 25);
    }
}
