use crate::error::EobError;
use crate::traits::{DynamicalSystem, EmbeddedSteppable, Scalar, Steppable};
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Tsitouras 5/4 Solver
pub struct Tsit5<T: Scalar> {
    k1: Vec<T>,
    k2: Vec<T>,
    k3: Vec<T>,
    k4: Vec<T>,
    k5: Vec<T>,
    k6: Vec<T>,
    k7: Vec<T>, // FSAL stage, only needed for the embedded error
    tmp: Vec<T>,
}

impl<T: Scalar> Tsit5<T> {
    pub fn new(dim: usize) -> Self {
        let z = T::zero();
        Self {
            k1: vec![z; dim],
            k2: vec![z; dim],
            k3: vec![z; dim],
            k4: vec![z; dim],
            k5: vec![z; dim],
            k6: vec![z; dim],
            k7: vec![z; dim],
            tmp: vec![z; dim],
        }
    }

    /// Evaluates the six stages and writes the 5th order solution into `out`.
    fn stages(&mut self, system: &impl DynamicalSystem<T>, t0: T, state: &[T], dt: T, out: &mut [T]) {
        let c2 = T::cst(0.161);
        let c3 = T::cst(0.327);
        let c4 = T::cst(0.9);
        let c5 = T::cst(0.9800255409045097);

        let a21 = T::cst(0.161);

        let a31 = T::cst(-0.008480655492356989);
        let a32 = T::cst(0.335480655492357);

        let a41 = T::cst(2.897153057105493);
        let a42 = T::cst(-6.359448489975075);
        let a43 = T::cst(4.3622954328695815);

        let a51 = T::cst(5.325864828439257);
        let a52 = T::cst(-11.748883564062828);
        let a53 = T::cst(7.4955393428898365);
        let a54 = T::cst(-0.09249506636175525);

        let a61 = T::cst(5.86145544294642);
        let a62 = T::cst(-12.92096931784711);
        let a63 = T::cst(8.159367898576159);
        let a64 = T::cst(-0.071584973281401);
        let a65 = T::cst(-0.028269050394068383);

        let b1 = T::cst(0.09646076681806523);
        let b2 = T::cst(0.01);
        let b3 = T::cst(0.4798896504144996);
        let b4 = T::cst(1.379008574103742);
        let b5 = T::cst(-3.290069515436099);
        let b6 = T::cst(2.324710524099774);

        let n = state.len();

        system.apply(t0, state, &mut self.k1);

        for i in 0..n {
            self.tmp[i] = state[i] + dt * (a21 * self.k1[i]);
        }
        system.apply(t0 + c2 * dt, &self.tmp, &mut self.k2);

        for i in 0..n {
            self.tmp[i] = state[i] + dt * (a31 * self.k1[i] + a32 * self.k2[i]);
        }
        system.apply(t0 + c3 * dt, &self.tmp, &mut self.k3);

        for i in 0..n {
            self.tmp[i] = state[i] + dt * (a41 * self.k1[i] + a42 * self.k2[i] + a43 * self.k3[i]);
        }
        system.apply(t0 + c4 * dt, &self.tmp, &mut self.k4);

        for i in 0..n {
            self.tmp[i] = state[i]
                + dt * (a51 * self.k1[i] + a52 * self.k2[i] + a53 * self.k3[i] + a54 * self.k4[i]);
        }
        system.apply(t0 + c5 * dt, &self.tmp, &mut self.k5);

        for i in 0..n {
            self.tmp[i] = state[i]
                + dt * (a61 * self.k1[i]
                    + a62 * self.k2[i]
                    + a63 * self.k3[i]
                    + a64 * self.k4[i]
                    + a65 * self.k5[i]);
        }
        system.apply(t0 + dt, &self.tmp, &mut self.k6);

        for i in 0..n {
            out[i] = state[i]
                + dt * (b1 * self.k1[i]
                    + b2 * self.k2[i]
                    + b3 * self.k3[i]
                    + b4 * self.k4[i]
                    + b5 * self.k5[i]
                    + b6 * self.k6[i]);
        }
    }
}

impl<T: Scalar> Steppable<T> for Tsit5<T> {
    fn step(&mut self, system: &impl DynamicalSystem<T>, t: &mut T, state: &mut [T], dt: T) {
        let t0 = *t;
        let mut next = std::mem::take(&mut self.k7);
        next.resize(state.len(), T::zero());
        self.stages(system, t0, state, dt, &mut next);
        state.copy_from_slice(&next);
        self.k7 = next;
        *t = t0 + dt;
    }
}

impl<T: Scalar> EmbeddedSteppable<T> for Tsit5<T> {
    fn order(&self) -> u32 {
        5
    }

    fn trial_step(
        &mut self,
        system: &impl DynamicalSystem<T>,
        t: T,
        state: &[T],
        dt: T,
        out: &mut [T],
        err: &mut [T],
    ) {
        let btilde1 = T::cst(-0.00178001105222577714);
        let btilde2 = T::cst(-0.0008164344596567469);
        let btilde3 = T::cst(0.007880878010261995);
        let btilde4 = T::cst(-0.1447110071732629);
        let btilde5 = T::cst(0.5823571654525552);
        let btilde6 = T::cst(-0.45808210592918697);
        let btilde7 = T::cst(0.015151515151515152);

        self.stages(system, t, state, dt, out);
        system.apply(t + dt, out, &mut self.k7);

        for i in 0..state.len() {
            err[i] = dt
                * (btilde1 * self.k1[i]
                    + btilde2 * self.k2[i]
                    + btilde3 * self.k3[i]
                    + btilde4 * self.k4[i]
                    + btilde5 * self.k5[i]
                    + btilde6 * self.k6[i]
                    + btilde7 * self.k7[i]);
        }
    }
}

/// Standard error control: D_i = abs_tol + rel_tol * |y_i|.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ErrorControl {
    pub abs_tol: f64,
    pub rel_tol: f64,
    /// Safety factor applied to the optimal step.
    pub safety: f64,
    pub max_growth: f64,
    pub max_shrink: f64,
}

impl Default for ErrorControl {
    fn default() -> Self {
        Self {
            abs_tol: 1e-13,
            rel_tol: 1e-11,
            safety: 0.9,
            max_growth: 5.0,
            max_shrink: 0.2,
        }
    }
}

impl ErrorControl {
    /// Largest scaled error component. Non-finite candidates count as infinitely wrong.
    fn ratio(&self, y: &[f64], candidate: &[f64], err: &[f64]) -> f64 {
        let mut worst: f64 = 0.0;
        for i in 0..y.len() {
            if !candidate[i].is_finite() || !err[i].is_finite() {
                return f64::INFINITY;
            }
            let scale = self.abs_tol + self.rel_tol * y[i].abs().max(candidate[i].abs());
            worst = worst.max(err[i].abs() / scale);
        }
        worst
    }
}

/// Outcome of one accepted adaptive step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepReport {
    pub taken: f64,
    pub rejections: usize,
}

/// Adaptive integrator built on an embedded Runge-Kutta pair.
///
/// `evolve` performs exactly one accepted step, shrinking and retrying as
/// needed. The proposed step for the next call is written back into `dt`.
pub struct AdaptiveStepper<S: EmbeddedSteppable<f64>> {
    stepper: S,
    pub control: ErrorControl,
    pub max_rejections: usize,
    pub min_step: f64,
    candidate: Vec<f64>,
    err: Vec<f64>,
}

impl<S: EmbeddedSteppable<f64>> AdaptiveStepper<S> {
    pub fn new(stepper: S, dim: usize, control: ErrorControl) -> Self {
        Self {
            stepper,
            control,
            max_rejections: 100,
            min_step: 1e-14,
            candidate: vec![0.0; dim],
            err: vec![0.0; dim],
        }
    }

    /// Advances (t, y) by one accepted step towards `t_end`, never stepping past it.
    pub fn evolve(
        &mut self,
        system: &impl DynamicalSystem<f64>,
        t: &mut f64,
        t_end: f64,
        dt: &mut f64,
        y: &mut [f64],
    ) -> Result<StepReport> {
        if *dt == 0.0 || !dt.is_finite() {
            bail!(EobError::OdeIntegration(format!("invalid step size {dt}")));
        }
        let direction = dt.signum();
        let order = <f64 as From<u32>>::from(self.stepper.order());
        let mut rejections = 0;
        let mut h = *dt;
        let mut clipped = (*t + h - t_end) * direction > 0.0;
        if clipped {
            h = t_end - *t;
        }

        loop {
            self.stepper
                .trial_step(system, *t, y, h, &mut self.candidate, &mut self.err);
            let ratio = self.control.ratio(y, &self.candidate, &self.err);

            if ratio > 1.1 {
                rejections += 1;
                let factor = if ratio.is_finite() {
                    (self.control.safety * ratio.powf(-1.0 / order)).max(self.control.max_shrink)
                } else {
                    self.control.max_shrink
                };
                h *= factor;
                clipped = false;
                if rejections > self.max_rejections || h.abs() < self.min_step {
                    let reason = if ratio.is_finite() {
                        format!("step size underflow at t = {t} (h = {h:e})")
                    } else {
                        format!("non-finite right-hand side at t = {t}")
                    };
                    bail!(EobError::OdeIntegration(reason));
                }
                continue;
            }

            // a clipped step lands on t_end exactly
            *t = if clipped { t_end } else { *t + h };
            y.copy_from_slice(&self.candidate);

            let mut next = h;
            if ratio < 0.5 {
                let grow = if ratio > 0.0 {
                    self.control.safety * ratio.powf(-1.0 / (order + 1.0))
                } else {
                    self.control.max_growth
                };
                next = h * grow.min(self.control.max_growth);
            }
            // keep the caller's proposal when the step was only clipped at t_end
            if next.abs() >= dt.abs() || rejections > 0 || ratio < 0.5 {
                *dt = next;
            }
            return Ok(StepReport {
                taken: h,
                rejections,
            });
        }
    }

    /// Integrates adaptively from `t` to exactly `t_end`.
    pub fn drive(
        &mut self,
        system: &impl DynamicalSystem<f64>,
        t: &mut f64,
        t_end: f64,
        dt: &mut f64,
        y: &mut [f64],
    ) -> Result<usize> {
        let direction = (t_end - *t).signum();
        if direction == 0.0 {
            return Ok(0);
        }
        if dt.signum() != direction {
            *dt = -*dt;
        }
        let mut steps = 0;
        while (t_end - *t) * direction > 0.0 {
            self.evolve(system, t, t_end, dt, y)?;
            steps += 1;
        }
        *t = t_end;
        Ok(steps)
    }

    pub fn stepper_mut(&mut self) -> &mut S {
        &mut self.stepper
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Decay {
        rate: f64,
    }

    impl DynamicalSystem<f64> for Decay {
        fn dimension(&self) -> usize {
            1
        }

        fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
            out[0] = -self.rate * x[0];
        }
    }

    struct Oscillator;

    impl DynamicalSystem<f64> for Oscillator {
        fn dimension(&self) -> usize {
            2
        }

        fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
            out[0] = x[1];
            out[1] = -x[0];
        }
    }

    struct Blowup;

    impl DynamicalSystem<f64> for Blowup {
        fn dimension(&self) -> usize {
            1
        }

        fn apply(&self, t: f64, _x: &[f64], out: &mut [f64]) {
            out[0] = if t > 0.5 { f64::NAN } else { 1.0 };
        }
    }

    #[test]
    fn fixed_step_tsit5_matches_exponential() {
        let system = Decay { rate: 1.0 };
        let mut solver = Tsit5::new(1);
        let mut t = 0.0;
        let mut y = vec![1.0];
        for _ in 0..10 {
            solver.step(&system, &mut t, &mut y, 0.1);
        }
        assert!((t - 1.0).abs() < 1e-12);
        assert!((y[0] - (-1.0f64).exp()).abs() < 1e-9);
    }

    fn decay_error(steps: usize) -> f64 {
        let system = Decay { rate: 1.0 };
        let mut solver = Tsit5::new(1);
        let (mut t, mut y) = (0.0, vec![1.0]);
        let dt = 1.0 / steps as f64;
        for _ in 0..steps {
            solver.step(&system, &mut t, &mut y, dt);
        }
        (y[0] - (-1.0f64).exp()).abs()
    }

    #[test]
    fn tsit5_converges_at_fifth_order() {
        let (coarse, fine, finer) = (decay_error(10), decay_error(20), decay_error(40));
        assert!(coarse / fine > 24.0, "ratio {}", coarse / fine);
        assert!(fine / finer > 24.0, "ratio {}", fine / finer);
    }

    #[test]
    fn embedded_estimate_bounds_the_local_error() {
        let system = Decay { rate: 1.0 };
        let mut solver = Tsit5::new(1);
        let (mut out, mut err) = (vec![0.0], vec![0.0]);
        solver.trial_step(&system, 0.0, &[1.0], 0.1, &mut out, &mut err);
        let actual = (out[0] - (-0.1f64).exp()).abs();
        assert!(actual < 1e-8, "{actual}");
        assert!(err[0].abs() > actual, "estimate {} below error {actual}", err[0]);
    }

    #[test]
    fn adaptive_drive_tracks_harmonic_oscillator() {
        let control = ErrorControl {
            abs_tol: 1e-12,
            rel_tol: 1e-10,
            ..ErrorControl::default()
        };
        let mut stepper = AdaptiveStepper::new(Tsit5::new(2), 2, control);
        let mut t = 0.0;
        let mut dt = 0.01;
        let mut y = vec![1.0, 0.0];
        let steps = stepper
            .drive(&Oscillator, &mut t, 10.0, &mut dt, &mut y)
            .expect("drive should succeed");
        assert!(steps > 10);
        assert_eq!(t, 10.0);
        assert!((y[0] - 10.0f64.cos()).abs() < 1e-8);
        assert!((y[1] + 10.0f64.sin()).abs() < 1e-8);
    }

    #[test]
    fn clipped_step_lands_on_the_end_time() {
        let mut stepper = AdaptiveStepper::new(Tsit5::new(1), 1, ErrorControl::default());
        let mut t = 0.1;
        let mut dt = 1.0;
        let mut y = vec![1.0];
        let t_end = 0.3;
        while t < t_end {
            stepper
                .evolve(&Decay { rate: 1e-3 }, &mut t, t_end, &mut dt, &mut y)
                .expect("step");
        }
        assert_eq!(t, t_end);
    }

    #[test]
    fn adaptive_step_integrates_backwards() {
        let mut stepper = AdaptiveStepper::new(Tsit5::new(1), 1, ErrorControl::default());
        let mut t = 1.0;
        let mut dt = -0.05;
        let mut y = vec![(-1.0f64).exp()];
        stepper
            .drive(&Decay { rate: 1.0 }, &mut t, 0.0, &mut dt, &mut y)
            .expect("backward drive should succeed");
        assert!((y[0] - 1.0).abs() < 1e-9);
        assert!(dt < 0.0);
    }

    #[test]
    fn non_finite_rhs_is_reported() {
        let mut stepper = AdaptiveStepper::new(Tsit5::new(1), 1, ErrorControl::default());
        let mut t = 0.0;
        let mut dt = 0.1;
        let mut y = vec![0.0];
        let result = stepper.drive(&Blowup, &mut t, 1.0, &mut dt, &mut y);
        let err = result.expect_err("NaN right-hand side must fail");
        assert!(err.to_string().contains("non-finite") || err.to_string().contains("underflow"));
    }
}
