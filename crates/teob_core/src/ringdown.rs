//! Post-merger completion of the multipoles and of the precession angles.
//!
//! Multipoles with a hybrid template are replaced from the matching point on by the
//! template, with the phase shifted to be continuous there. Multipoles with only a
//! fundamental quasi-normal mode decay exponentially from their value at the matching
//! point. Anything else is left as it comes out of the inspiral.

use crate::config::RingdownEuler;
use crate::fits::{self, QnmTemplate};
use crate::interp::CubicSpline;
use crate::nqc::NQC_DELAY;
use crate::params::{EobParameters, Remnant};
use crate::spin::EulerAngles;
use crate::waveform::{mode_lm, Multipoles, KMAX};
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Where the ringdown was attached, in units of M.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    /// Peak of the (2,2) amplitude, origin of the templates.
    pub t_peak: f64,
    /// First time replaced by the ringdown.
    pub t_match: f64,
    pub remnant: Remnant,
}

/// Ringdown model of one multipole.
#[derive(Debug, Clone, Copy)]
enum Model {
    Template(QnmTemplate),
    Fundamental(fits::QnmFrequencies),
}

fn models(params: &EobParameters, remnant: &Remnant) -> [Option<Model>; KMAX] {
    let templates = fits::qnm_hybrid_templates(
        params.nu,
        params.x1,
        params.x2,
        params.chi1,
        params.chi2,
        remnant.mass,
        remnant.spin,
        params.use_spins(),
    );
    std::array::from_fn(|k| {
        if let Some(template) = templates[k] {
            return Some(Model::Template(template));
        }
        let (l, m) = mode_lm(k);
        fits::qnm_frequencies(remnant.spin, l, m).map(Model::Fundamental)
    })
}

/// Extends `hlm` by `extend` samples spaced by `dt` and overwrites every active multipole
/// from the matching point on. `t_omega_peak` is the time of the orbital-frequency peak.
pub fn attach(
    hlm: &mut Multipoles,
    params: &EobParameters,
    remnant: Remnant,
    t_omega_peak: f64,
    extend: usize,
    dt: f64,
) -> Result<Attachment> {
    if !(dt > 0.0 && dt.is_finite()) {
        bail!("ringdown step must be positive, got {dt}.");
    }
    if !(remnant.mass > 0.0 && remnant.spin.abs() < 1.0) {
        bail!("unphysical remnant (M = {}, a = {}).", remnant.mass, remnant.spin);
    }
    if hlm.len() < 3 {
        bail!("too few samples ({}) to attach a ringdown.", hlm.len());
    }
    let t_peak = t_omega_peak - fits::nqc_timeshift(params.nu, params.chi1);
    let t_match = t_peak + NQC_DELAY;
    let Some(&t_last) = hlm.time.last() else {
        bail!("empty multipoles.");
    };
    if t_match > t_last {
        bail!("ringdown matching point t = {t_match} lies after the last sample t = {t_last}.");
    }

    let n_inspiral = hlm.len();
    hlm.extend(extend, dt)?;
    let start = hlm.time.partition_point(|&t| t < t_match);
    let times = hlm.time.clone();
    let inspiral_time = &times[..n_inspiral];
    let mbh = remnant.mass;
    let models = models(params, &remnant);

    let mut attached = 0;
    for k in hlm.mask.active().collect::<Vec<_>>() {
        let Some(model) = models[k] else {
            warn!(target: "teob::waveform", mode = ?mode_lm(k), "no ringdown model, multipole left unchanged");
            continue;
        };
        let Some(mode) = hlm.mode_mut(k) else { continue };
        let phase_match = CubicSpline::new(inspiral_time, &mode.phase[..n_inspiral])?.eval(t_match);
        let amp_match = CubicSpline::new(inspiral_time, &mode.amp[..n_inspiral])?.eval(t_match);
        match model {
            Model::Template(template) => {
                let (amp_offset, phase_offset) = template.eval((t_match - t_peak) / mbh);
                // amplitude and phase both continuous at the matching point
                let scale = if amp_offset > 0.0 { amp_match / amp_offset } else { 1.0 };
                debug!(target: "teob::waveform", mode = ?mode_lm(k), scale, "template rescaled");
                for i in start..times.len() {
                    let (amp, phase) = template.eval((times[i] - t_peak) / mbh);
                    mode.amp[i] = scale * amp;
                    mode.phase[i] = phase - phase_offset + phase_match;
                }
            }
            Model::Fundamental(qnm) => {
                for i in start..times.len() {
                    let tau = (times[i] - t_match) / mbh;
                    mode.amp[i] = amp_match * (-qnm.alpha1 * tau).exp();
                    mode.phase[i] = phase_match + qnm.omega1 * tau;
                }
            }
        }
        attached += 1;
    }
    info!(
        target: "teob::waveform",
        t_peak,
        t_match,
        modes = attached,
        samples = hlm.len(),
        "ringdown attached"
    );
    Ok(Attachment {
        t_peak,
        t_match,
        remnant,
    })
}

/// Euler angles after `t_merger`. `Constant` freezes the merger angles. `Qnms` precesses
/// α at the difference between the (2,2) and (2,1) fundamental frequencies with β fixed
/// and γ following the minimal-rotation condition γ̇ = −α̇ cos β.
pub fn euler_angles(
    model: RingdownEuler,
    merger: EulerAngles,
    t_merger: f64,
    remnant: &Remnant,
    times: &[f64],
) -> Vec<EulerAngles> {
    let rate = match model {
        RingdownEuler::Constant => 0.0,
        RingdownEuler::Qnms => {
            match (
                fits::qnm_frequencies(remnant.spin, 2, 2),
                fits::qnm_frequencies(remnant.spin, 2, 1),
            ) {
                (Some(q22), Some(q21)) => (q22.omega1 - q21.omega1) / remnant.mass,
                _ => 0.0,
            }
        }
    };
    debug!(target: "teob::spin", ?model, rate, "post-merger Euler angles");
    let cos_beta = merger.beta.cos();
    times
        .iter()
        .map(|&t| {
            let dalpha = rate * (t - t_merger).max(0.0);
            EulerAngles {
                alpha: merger.alpha + dalpha,
                beta: merger.beta,
                gamma: merger.gamma - dalpha * cos_beta,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InputParameters;
    use crate::waveform::{mode_index, ModeMask};

    fn assert_err_contains<T: std::fmt::Debug>(result: Result<T>, needle: &str) {
        let err = result.expect_err("expected error");
        let message = format!("{err:#}");
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    fn chirp(mask: ModeMask, n: usize, dt: f64) -> Multipoles {
        let mut hlm = Multipoles::new(mask);
        let mut values = vec![(0.0, 0.0); KMAX];
        for i in 0..n {
            let t = i as f64 * dt;
            for (k, value) in values.iter_mut().enumerate() {
                let (_, m) = mode_lm(k);
                *value = (0.3 + 1e-3 * t, m as f64 * (0.1 * t + 1e-4 * t * t));
            }
            hlm.push(t, &values, 64).expect("increasing time");
        }
        hlm
    }

    fn equal_mass() -> (EobParameters, Remnant) {
        let params = EobParameters::resolve(&InputParameters::default()).expect("valid parameters");
        let remnant = params.remnant.expect("black holes leave a remnant");
        (params, remnant)
    }

    #[test]
    fn template_replaces_the_tail_with_continuous_phase() {
        let (params, remnant) = equal_mass();
        let k22 = mode_index(2, 2);
        let mut hlm = chirp(ModeMask::none().with(k22), 200, 0.5);
        let before = hlm.clone();
        let attachment = attach(&mut hlm, &params, remnant, 90.0, 300, 0.5).expect("attached");

        assert_eq!(hlm.len(), 500);
        assert!(hlm.time.windows(2).all(|w| w[1] > w[0]));
        assert_eq!(attachment.t_match, 90.0 - 1.0 + NQC_DELAY);

        let start = hlm.time.partition_point(|&t| t < attachment.t_match);
        let mode = hlm.mode(k22).expect("active");
        let original = before.mode(k22).expect("active");
        assert_eq!(&mode.amp[..start], &original.amp[..start]);
        assert!((mode.phase[start] - original.phase[start]).abs() < 1e-6);
        assert_eq!(hlm.time[start], attachment.t_match);
        assert!((mode.amp[start] / original.amp[start] - 1.0).abs() < 1e-9);
        assert!(mode.amp[499] < 1e-3 * mode.amp[start]);
        assert!(mode.phase.windows(2).skip(start).all(|w| w[1] > w[0]));
    }

    #[test]
    fn fundamental_mode_decays_from_the_matching_amplitude() {
        let (params, remnant) = equal_mass();
        let k32 = mode_index(3, 2);
        let mut hlm = chirp(ModeMask::none().with(k32), 200, 0.5);
        let attachment = attach(&mut hlm, &params, remnant, 90.0, 100, 0.5).expect("attached");
        let start = hlm.time.partition_point(|&t| t < attachment.t_match);
        let mode = hlm.mode(k32).expect("active");
        let amp = |i: usize| mode.amp[i];
        assert!((amp(start) / (0.3 + 1e-3 * attachment.t_match) - 1.0).abs() < 1e-3);
        assert!((start + 1..hlm.len()).all(|i| amp(i) < amp(i - 1)));
    }

    #[test]
    fn rejects_late_matching_point() {
        let (params, remnant) = equal_mass();
        let mut hlm = chirp(ModeMask::none().with(mode_index(2, 2)), 20, 0.5);
        assert_err_contains(attach(&mut hlm, &params, remnant, 50.0, 10, 0.5), "matching point");
        assert_err_contains(attach(&mut hlm, &params, remnant, 5.0, 10, 0.0), "step must be positive");
    }

    #[test]
    fn post_merger_angles() {
        let (_, remnant) = equal_mass();
        let merger = EulerAngles {
            alpha: 0.3,
            beta: 0.4,
            gamma: -0.3,
        };
        let times = [0.0, 10.0, 20.0];
        let frozen = euler_angles(RingdownEuler::Constant, merger, 5.0, &remnant, &times);
        assert!(frozen.iter().all(|a| *a == merger));

        let precessing = euler_angles(RingdownEuler::Qnms, merger, 5.0, &remnant, &times);
        assert_eq!(precessing[0], merger);
        assert!(precessing[2].alpha > precessing[1].alpha && precessing[1].alpha > merger.alpha);
        assert!(precessing.iter().all(|a| a.beta == merger.beta));
        let dalpha = precessing[2].alpha - merger.alpha;
        assert!((merger.gamma - precessing[2].gamma - dalpha * merger.beta.cos()).abs() < 1e-12);
    }
}
