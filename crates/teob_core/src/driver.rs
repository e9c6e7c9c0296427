//! One waveform from a flat option set: parameters, dynamics, multipoles, merger and
//! ringdown, precession, polarizations.

use crate::config::{Domain, InputParameters, NqcFit, OdeTimestep};
use crate::dynamics::{self, EobRhs, PeakInfo, Termination, Trajectory};
use crate::error::EobError;
use crate::flux::FluxModel;
use crate::hamiltonian::Hamiltonian;
use crate::initial_conditions::initial_data;
use crate::interp::{self, CubicSpline};
use crate::metric::Metric;
use crate::nqc::{self, NqcCoefficients};
use crate::orbits;
use crate::params::{BinaryKind, EobParameters, SpinKind, R0_THRESHOLD};
use crate::ringdown::{self, Attachment};
use crate::spin::{self, Boundary, EulerAngles, SpinDynamics, SpinTrajectory};
use crate::waveform::{self, mode_lm, Multipoles};
use anyhow::{bail, Context, Result};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::f64::consts::FRAC_PI_2;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, info, warn};

/// Length of the merger window before the end of the dynamics.
const MERGER_WINDOW: f64 = 20.0;
/// Start of the uniform merger grid before the orbital-frequency peak.
const MERGER_LEAD: f64 = 8.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutput {
    pub domain: Domain,
    /// Time in s (M in geometric units), or frequency in Hz (1/M).
    pub time_or_freq: Vec<f64>,
    /// h+ in the time domain, Re h̃+ in the frequency domain.
    pub hplus: Vec<f64>,
    pub hcross: Vec<f64>,
    /// Imaginary parts in the frequency domain, empty in the time domain.
    pub hplus_im: Vec<f64>,
    pub hcross_im: Vec<f64>,
    pub multipoles: Option<Multipoles>,
    pub dynamics: Option<Trajectory>,
    pub spin_dynamics: Option<SpinTrajectory>,
    pub light_ring: Option<f64>,
    pub lso: Option<f64>,
    pub termination: Termination,
    pub status: i32,
    pub parameters: EobParameters,
}

/// Status code and message of a failed run. Errors outside the taxonomy map to −1.
pub fn status_of(err: &anyhow::Error) -> (i32, String) {
    let code = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<EobError>())
        .map_or(-1, EobError::status_code);
    (code, format!("{err:#}"))
}

/// Time of the orbital-frequency maximum, refined on the grid around the last local
/// maximum.
fn omega_peak_time(trajectory: &Trajectory, frequency: &[f64]) -> Result<f64> {
    let n = frequency.len();
    if n < 5 {
        bail!("too few samples ({n}) to locate the frequency peak.");
    }
    let mut peak = n - 1;
    for j in (0..n - 1).rev() {
        if frequency[j] < frequency[peak] {
            break;
        }
        peak = j;
    }
    let start = peak.saturating_sub(2).min(n - 5);
    interp::find_max_grid(&trajectory.t[start..], &frequency[start..])
}

/// Spin precession together with the map from orbital to precession time.
struct Precession<'a> {
    spins: SpinDynamics<'a>,
    /// Precession time minus orbital time.
    offset: f64,
}

impl Precession<'_> {
    fn angles(&mut self, times: &[f64], ringdown: Option<(&Attachment, &EobParameters)>) -> Result<Vec<EulerAngles>> {
        let shifted: Vec<f64> = times.iter().map(|t| t + self.offset).collect();
        let Some((attachment, params)) = ringdown else {
            return self.spins.euler_angles(&shifted, Boundary::Clamp);
        };
        let t_merger = attachment.t_peak;
        let split = times.partition_point(|&t| t <= t_merger);
        let mut angles = self.spins.euler_angles(&shifted[..split], Boundary::Clamp)?;
        let merger = self.spins.euler_angles_at_time(t_merger + self.offset, Boundary::Clamp)?;
        angles.extend(ringdown::euler_angles(
            params.models.ringdown_euler,
            merger,
            t_merger,
            &attachment.remnant,
            &times[split..],
        ));
        Ok(angles)
    }
}

fn precess<'a>(params: &'a EobParameters, trajectory: &Trajectory) -> Result<Precession<'a>> {
    let mut spins = SpinDynamics::new(params, Some(trajectory))?;
    let termination = spins.integrate().context("spin precession")?;
    debug!(target: "teob::driver", reason = termination.reason(), "precession integrated");

    let omega_start = trajectory.omega_orb.first().copied().unwrap_or_default();
    let first = spins.trajectory().state(0).omega;
    if omega_start < first {
        spins
            .integrate_backwards(omega_start)
            .context("backward spin precession")?;
    }
    let offset = spins.time_at_frequency(omega_start).unwrap_or(0.0);
    Ok(Precession { spins, offset })
}

/// Merger window on a uniform grid, NQC coefficients solved there, and both the window
/// and the full multipoles rebuilt with them.
fn compute_nqc(
    params: &EobParameters,
    flux: &FluxModel,
    trajectory: &mut Trajectory,
    hlm: &mut Multipoles,
    t_omega_peak: f64,
) -> Result<()> {
    let Some(&t_end) = trajectory.t.last() else {
        bail!("empty dynamics.");
    };
    let window = trajectory.extract(t_end - MERGER_WINDOW, t_end + 2.0 * params.ode.dt)?;
    let dt = params.output.dt_merger_interp.min(params.ode.dt);
    let mut t_start = t_omega_peak - MERGER_LEAD;
    while t_start < window.t[0] {
        t_start += dt;
    }
    let n = interp::uniform_size(t_end, t_start, dt);
    let uniform = window.interpolate_uniform(t_start, dt, n)?;

    let bare = waveform::hlm_from_trajectory(params, flux, &uniform, &NqcCoefficients::none())?;
    let coefficients = nqc::compute(params, &uniform, &bare, t_omega_peak)?;
    let merger = waveform::hlm_from_trajectory(params, flux, &uniform, &coefficients)?;
    *hlm = waveform::hlm_from_trajectory(params, flux, trajectory, &coefficients)?;
    hlm.join(&merger, merger.time[0])?;
    trajectory.join(&uniform, uniform.t[0])?;
    debug!(target: "teob::driver", t_start, dt, samples = n, "merger window joined");
    Ok(())
}

/// Runs the full model.
pub fn run(input: &InputParameters) -> Result<RunOutput> {
    let mut params = EobParameters::resolve(input)?;
    let metric = Metric::new(&params)?;
    let hamiltonian = Hamiltonian::new(&params);

    if input.r0 <= 0.0 {
        if params.r0_from_eob_frequency {
            params.r0 = orbits::radius_from_frequency(&metric, &hamiltonian, params.omega0(), params.r0)
                .require("initial radius")?;
        }
        if params.r0 < R0_THRESHOLD {
            warn!(target: "teob::driver", r0 = params.r0, "initial frequency too high, starting at r0 = {R0_THRESHOLD}");
            params.r0 = R0_THRESHOLD;
        }
    }

    let light_ring = if params.output.compute_lr || metric.has_tides() {
        let outcome = metric.tidal_light_ring().or_else(|| orbits::light_ring(&metric).ok());
        if outcome.is_none() {
            warn!(target: "teob::driver", "light ring not found");
        }
        outcome
    } else {
        None
    };
    if let (Some(r_lr), true) = (light_ring, metric.has_tides()) {
        params.ode.stop_radius = 1.01 * r_lr;
    }
    let lso = params.output.compute_lso.then(|| {
        let outcome = if hamiltonian.has_spin() {
            let spinning = orbits::lso_spin(&metric, &hamiltonian);
            spinning.converged().then_some(spinning.root[0])
        } else {
            orbits::lso(&metric).ok()
        };
        if outcome.is_none() {
            warn!(target: "teob::driver", "last stable orbit not found");
        }
        outcome
    });
    let lso = lso.flatten();
    let params = params;

    let flux = FluxModel::new(&params);
    let nqc_flux = NqcCoefficients::from_fit(params.models.nqc_flux, &params, params.models.nqc_flux_file.as_deref())?;
    let nqc_hlm = NqcCoefficients::from_fit(params.models.nqc_hlm, &params, params.models.nqc_hlm_file.as_deref())?;

    let initial = initial_data(&params, &metric, &flux, params.r0)?;
    let rhs = EobRhs::new(&params, &metric, &flux, &nqc_flux);
    let run = dynamics::integrate(&params, &rhs, &initial)?;
    let termination = run.termination;
    let mut trajectory = run.trajectory;
    let mut hlm = waveform::hlm_from_trajectory(&params, &flux, &trajectory, &nqc_hlm)?;

    let merger = params.binary != BinaryKind::NeutronStars && run.peak.is_some();
    let t_omega_peak = match run.peak {
        Some(PeakInfo { .. }) if merger => {
            let frequency = if hamiltonian.has_spin() {
                &trajectory.omega_orb
            } else {
                &trajectory.omega
            };
            Some(omega_peak_time(&trajectory, frequency)?)
        }
        _ => None,
    };
    if let Some(t_peak) = t_omega_peak {
        if params.models.nqc_hlm == NqcFit::Compute {
            compute_nqc(&params, &flux, &mut trajectory, &mut hlm, t_peak).context("NQC corrections")?;
        }
    }

    let mut precession = match params.spins {
        SpinKind::Generic => Some(precess(&params, &trajectory)?),
        _ => None,
    };

    let attachment = match (t_omega_peak, params.remnant) {
        (Some(t_peak), Some(mut remnant)) => {
            if let Some(precession) = precession.as_mut() {
                remnant.spin = spin::precessing_remnant_spin(&mut precession.spins)?;
            }
            let dt = if params.ode.timestep == OdeTimestep::Uniform {
                params.ode.dt
            } else {
                params.output.dt_merger_interp
            };
            Some(ringdown::attach(&mut hlm, &params, remnant, t_peak, params.output.ringdown_extend, dt)?)
        }
        (Some(_), None) => {
            warn!(target: "teob::driver", "no remnant, ringdown skipped");
            None
        }
        _ => None,
    };
    let ringdown = attachment.as_ref().map(|a| (a, &params));

    let inclination = params.output.inclination;
    let phi = FRAC_PI_2 - params.output.coalescence_angle;
    let time_scale = params.units.time_scale;
    let mut output = RunOutput {
        domain: params.output.domain,
        time_or_freq: Vec::new(),
        hplus: Vec::new(),
        hcross: Vec::new(),
        hplus_im: Vec::new(),
        hcross_im: Vec::new(),
        multipoles: None,
        dynamics: None,
        spin_dynamics: None,
        light_ring,
        lso,
        termination,
        status: 0,
        parameters: params.clone(),
    };

    match params.output.domain {
        Domain::Time => {
            if params.output.interp_uniform_grid {
                let (t0, t1) = (hlm.time[0], hlm.time[hlm.len() - 1]);
                let dt = params.output.dt_interp;
                hlm = hlm.interpolate_uniform(t0, dt, interp::uniform_size(t1, t0, dt))?;
            }
            let scale = params.units.amplitude_scale;
            let (hp, hc) = match precession.as_mut() {
                Some(precession) => {
                    let angles = precession.angles(&hlm.time, ringdown)?;
                    waveform::twist(&hlm, &angles, params.nu)?
                        .polarizations(inclination, phi, scale)
                }
                None => waveform::polarizations(&hlm, inclination, phi, scale),
            };
            output.time_or_freq = hlm.time.iter().map(|t| t * time_scale).collect();
            output.hplus = hp;
            output.hcross = hc;
        }
        Domain::Frequency => {
            let mut fd = waveform::spa(&hlm)?.interpolate_uniform(params.output.df)?;
            if params.output.time_shift_fd {
                if let Some(&tc) = hlm.time.last() {
                    fd.time_shift(tc);
                }
            }
            let scale = params.units.amplitude_scale_fd;
            let (freq, hp, hc) = match precession.as_mut() {
                Some(precession) => {
                    let table = AngleTable::new(&hlm.time, &precession.angles(&hlm.time, ringdown)?)?;
                    let rotation = |t: f64| table.eval(t);
                    waveform::fd_polarizations(&fd, inclination, phi, scale, Some(&rotation))?
                }
                None => waveform::fd_polarizations(&fd, inclination, phi, scale, None)?,
            };
            let split = |h: &[Complex64]| -> (Vec<f64>, Vec<f64>) { h.iter().map(|z| (z.re, z.im)).unzip() };
            output.time_or_freq = freq.iter().map(|f| f / time_scale).collect();
            (output.hplus, output.hplus_im) = split(&hp);
            (output.hcross, output.hcross_im) = split(&hc);
        }
    }

    if params.output.multipoles {
        output.multipoles = Some(hlm);
    }
    if params.output.dynamics {
        output.dynamics = Some(trajectory);
        output.spin_dynamics = precession.map(|p| p.spins.into_trajectory());
    }
    if let Some(dir) = &params.output.dir {
        if params.output.hpc || params.output.multipoles || params.output.dynamics {
            write_outputs(&output, Path::new(dir))?;
        }
    }
    info!(
        target: "teob::driver",
        reason = termination.reason(),
        samples = output.time_or_freq.len(),
        "waveform ready"
    );
    Ok(output)
}

/// Euler angles interpolated in time, clamped to the tabulated range.
struct AngleTable {
    splines: [CubicSpline; 3],
}

impl AngleTable {
    fn new(times: &[f64], angles: &[EulerAngles]) -> Result<Self> {
        let column = |f: fn(&EulerAngles) -> f64| angles.iter().map(f).collect::<Vec<_>>();
        Ok(Self {
            splines: [
                CubicSpline::new(times, &column(|a| a.alpha))?,
                CubicSpline::new(times, &column(|a| a.beta))?,
                CubicSpline::new(times, &column(|a| a.gamma))?,
            ],
        })
    }

    fn eval(&self, t: f64) -> EulerAngles {
        let [alpha, beta, gamma] = &self.splines;
        let t = t.clamp(alpha.x_min(), alpha.x_max());
        EulerAngles {
            alpha: alpha.eval(t),
            beta: beta.eval(t),
            gamma: gamma.eval(t),
        }
    }
}

fn write_table(path: &Path, header: &str, columns: &[&[f64]]) -> Result<(), EobError> {
    let mut out = BufWriter::new(fs::File::create(path)?);
    writeln!(out, "# {header}")?;
    let rows = columns.iter().map(|c| c.len()).min().unwrap_or(0);
    for i in 0..rows {
        let line: Vec<String> = columns.iter().map(|c| format!("{:.16e}", c[i])).collect();
        writeln!(out, "{}", line.join(" "))?;
    }
    out.flush()?;
    Ok(())
}

/// Writes the requested text tables into `dir`: `waveform.txt`, `hlm_l{l}_m{m}.txt`,
/// `dyn.txt`, `spin_dyn.txt` and the resolved `parameters.txt`.
pub fn write_outputs(output: &RunOutput, dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(EobError::from)?;
    let settings = &output.parameters.output;
    if settings.hpc {
        match output.domain {
            Domain::Time => write_table(
                &dir.join("waveform.txt"),
                "t h+ hx",
                &[&output.time_or_freq, &output.hplus, &output.hcross],
            )?,
            Domain::Frequency => write_table(
                &dir.join("waveform.txt"),
                "f Re(h+) Im(h+) Re(hx) Im(hx)",
                &[
                    &output.time_or_freq,
                    &output.hplus,
                    &output.hplus_im,
                    &output.hcross,
                    &output.hcross_im,
                ],
            )?,
        }
    }
    if let Some(hlm) = &output.multipoles {
        for k in hlm.mask.active() {
            let (l, m) = mode_lm(k);
            let mode = &hlm.modes[k];
            let (re, im) = mode.re_im();
            write_table(
                &dir.join(format!("hlm_l{l}_m{m}.txt")),
                "t A phi Re Im",
                &[&hlm.time, &mode.amp, &mode.phase, &re, &im],
            )?;
        }
    }
    if let Some(dynamics) = &output.dynamics {
        write_table(
            &dir.join("dyn.txt"),
            "t r phi pphi prstar Omega Omega_orb ddotr E Heff r_omega v_phi jhat",
            &[
                &dynamics.t,
                &dynamics.r,
                &dynamics.phi,
                &dynamics.pphi,
                &dynamics.prstar,
                &dynamics.omega,
                &dynamics.omega_orb,
                &dynamics.ddotr,
                &dynamics.e,
                &dynamics.heff,
                &dynamics.r_omega,
                &dynamics.v_phi,
                &dynamics.jhat,
            ],
        )?;
    }
    if let Some(spins) = &output.spin_dynamics {
        let columns: Vec<Vec<f64>> = (0..spin::SPIN_VARS)
            .map(|v| spins.y.iter().map(|y| y[v]).collect())
            .collect();
        let mut all: Vec<&[f64]> = vec![&spins.t];
        all.extend(columns.iter().map(Vec::as_slice));
        write_table(
            &dir.join("spin_dyn.txt"),
            "t SA_x SA_y SA_z SB_x SB_y SB_z L_x L_y L_z alpha beta gamma Momega",
            &all,
        )?;
    }
    fs::write(dir.join("parameters.txt"), output.parameters.to_parfile()).map_err(EobError::from)?;
    info!(target: "teob::driver", dir = %dir.display(), "outputs written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::waveform::mode_index;

    fn assert_err_contains<T: std::fmt::Debug>(result: Result<T>, needle: &str) {
        let err = result.expect_err("expected error");
        let message = format!("{err:#}");
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    fn equal_mass() -> InputParameters {
        InputParameters {
            initial_frequency: 0.01 / std::f64::consts::PI,
            output_multipoles: true,
            output_dynamics: true,
            ..InputParameters::default()
        }
    }

    #[test]
    fn equal_mass_run_peaks_once_before_ringdown() {
        let output = run(&equal_mass()).expect("run succeeds");
        assert_eq!(output.status, 0);
        assert_eq!(output.termination, Termination::FrequencyPeak);
        assert_eq!(output.termination.reason(), "frequency peak reached");
        assert!(!output.hplus.is_empty());
        assert_eq!(output.hplus.len(), output.time_or_freq.len());
        assert!(output.time_or_freq.windows(2).all(|w| w[1] > w[0]));

        let hlm = output.multipoles.expect("multipoles requested");
        let amp = &hlm.mode(mode_index(2, 2)).expect("(2,2) is always present").amp;
        assert!(!amp.is_empty());
        let peak = amp
            .iter()
            .enumerate()
            .fold(0, |best, (i, &a)| if a > amp[best] { i } else { best });
        assert!(peak > 0 && peak < amp.len() - 1);
        assert!(amp[..=peak].windows(2).all(|w| w[1] >= w[0] - 1e-10));
        assert!(amp[peak..].windows(2).all(|w| w[1] <= w[0] + 1e-10));

        let dynamics = output.dynamics.expect("dynamics requested");
        assert!(dynamics.t.windows(2).all(|w| w[1] > w[0]));
    }

    fn finite(values: &[f64]) -> bool {
        !values.is_empty() && values.iter().all(|v| v.is_finite())
    }

    #[test]
    fn aligned_spin_run_solves_nqc_on_the_merger_window() {
        let input = InputParameters {
            q: 2.0,
            chi1: 0.3,
            chi2: 0.1,
            ..equal_mass()
        };
        let output = run(&input).expect("run succeeds");
        let params = &output.parameters;
        assert_eq!(params.spins, SpinKind::Aligned);
        assert_eq!(params.models.nqc_hlm, NqcFit::Compute);
        assert_eq!(output.termination, Termination::FrequencyPeak);
        assert!(finite(&output.hplus) && finite(&output.hcross));

        // the merger window is joined back on the uniform NQC grid
        let dt = params.output.dt_merger_interp.min(params.ode.dt);
        let dynamics = output.dynamics.expect("dynamics requested");
        let n = dynamics.len();
        assert!(n > 20);
        for w in dynamics.t[n - 20..].windows(2) {
            assert!((w[1] - w[0] - dt).abs() < 1e-9, "{} vs {dt}", w[1] - w[0]);
        }
        let hlm = output.multipoles.expect("multipoles requested");
        assert!(finite(&hlm.mode(mode_index(2, 2)).expect("(2,2)").amp));
    }

    #[test]
    fn precessing_run_evolves_the_spins_and_twists() {
        let input = InputParameters {
            q: 1.5,
            chi1: 0.1,
            chi1x: 0.4,
            chi2y: -0.2,
            ..equal_mass()
        };
        let output = run(&input).expect("run succeeds");
        assert_eq!(output.status, 0);
        assert_eq!(output.parameters.spins, SpinKind::Generic);
        assert!(output.parameters.output.interp_uniform_grid);
        assert!(finite(&output.hplus) && finite(&output.hcross));
        assert_eq!(output.hplus.len(), output.time_or_freq.len());
        let spacing = output.time_or_freq[1] - output.time_or_freq[0];
        assert!(output
            .time_or_freq
            .windows(2)
            .all(|w| (w[1] - w[0] - spacing).abs() < 1e-9 * spacing.max(1.0)));

        let spins = output.spin_dynamics.expect("spin dynamics requested");
        assert!(spins.t.windows(2).all(|w| w[1] > w[0]));
        let mut tilt = 0.0_f64;
        for i in 0..spins.len() {
            let state = spins.state(i);
            tilt = tilt.max(state.angles.beta);
            let [x, y, z] = state.l_hat;
            assert!(((x * x + y * y + z * z).sqrt() - 1.0).abs() < 1e-6);
        }
        assert!(tilt > 1e-3, "orbital plane never tilts: {tilt}");
    }

    #[test]
    fn invalid_configuration_maps_to_its_status() {
        let input = InputParameters {
            q: -2.0,
            ..InputParameters::default()
        };
        let err = run(&input).expect_err("negative mass ratio");
        let (code, message) = status_of(&err);
        assert_eq!(code, 1);
        assert!(message.contains("invalid configuration"), "{message}");
    }

    #[test]
    fn untyped_errors_map_to_minus_one() {
        let (code, message) = status_of(&anyhow::anyhow!("something else"));
        assert_eq!(code, -1);
        assert_eq!(message, "something else");
    }

    #[test]
    fn peak_time_is_refined_between_samples() {
        let mut trajectory = Trajectory::default();
        let omega: Vec<f64> = (0..20).map(|i| 0.2 - 1e-3 * (i as f64 - 12.3).powi(2)).collect();
        trajectory.t = (0..20).map(f64::from).collect();
        let t = omega_peak_time(&trajectory, &omega).expect("peak");
        assert!((t - 12.3).abs() < 1e-6, "{t}");
        assert_err_contains(omega_peak_time(&trajectory, &omega[..3]), "too few samples");
    }

    #[test]
    fn outputs_are_written_as_text_tables() {
        let dir = std::env::temp_dir().join(format!("teob_outputs_{}", std::process::id()));
        let input = InputParameters {
            output_hpc: true,
            output_dir: Some(dir.display().to_string()),
            ..equal_mass()
        };
        let output = run(&input).expect("run succeeds");
        assert!(dir.join("waveform.txt").exists());
        assert!(dir.join("hlm_l2_m2.txt").exists());
        assert!(dir.join("dyn.txt").exists());
        let parfile = fs::read_to_string(dir.join("parameters.txt")).expect("parameters written");
        assert!(parfile.contains("nu = 0.25"), "{parfile}");

        let text = fs::read_to_string(dir.join("waveform.txt")).expect("waveform written");
        assert_eq!(text.lines().count(), output.hplus.len() + 1);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn frequency_domain_run() {
        let input = InputParameters {
            domain: Domain::Frequency,
            ..equal_mass()
        };
        let output = run(&input).expect("run succeeds");
        assert_eq!(output.domain, Domain::Frequency);
        // the default step resolves the inspiral with thousands of bins
        assert!(output.time_or_freq.len() > 1000, "{}", output.time_or_freq.len());
        assert_eq!(output.hplus_im.len(), output.hplus.len());
        assert!(output.time_or_freq.windows(2).all(|w| w[1] > w[0]));
    }
}
