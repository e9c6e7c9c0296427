//! Scalar and planar root finders.
//!
//! The solvers never fail by themselves: they return an outcome with a status, and
//! the caller decides whether a non-converged root is fatal (`RootOutcome::require`)
//! or merely reported.

use crate::error::EobError;
use anyhow::{anyhow, Result};
use nalgebra::{Matrix2, Vector2};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RootStatus {
    Converged,
    /// The function has the same sign at both ends of the bracket.
    BracketInvalid,
    MaxIterations,
    /// Non-finite function value or singular Jacobian.
    SolverFailure,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RootSettings {
    pub max_iterations: usize,
    pub abs_tol: f64,
    pub rel_tol: f64,
}

impl Default for RootSettings {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            abs_tol: 1e-14,
            rel_tol: 1e-12,
        }
    }
}

impl RootSettings {
    pub fn with_tolerance(tolerance: f64, max_iterations: usize) -> Self {
        Self {
            max_iterations,
            abs_tol: tolerance,
            rel_tol: 0.0,
        }
    }

    fn interval_converged(&self, lo: f64, hi: f64) -> bool {
        let scale = if lo.signum() == hi.signum() {
            lo.abs().min(hi.abs())
        } else {
            0.0
        };
        (hi - lo).abs() < self.abs_tol + self.rel_tol * scale
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RootOutcome {
    pub root: f64,
    pub status: RootStatus,
    pub iterations: usize,
}

impl RootOutcome {
    pub fn converged(&self) -> bool {
        self.status == RootStatus::Converged
    }

    /// Converged root or a typed error naming the quantity that was being solved for.
    pub fn require(self, quantity: &'static str) -> Result<f64, EobError> {
        match self.status {
            RootStatus::Converged => Ok(self.root),
            status => Err(EobError::RootFinder { quantity, status }),
        }
    }

    /// Converged root, `None` otherwise.
    pub fn ok(self) -> Option<f64> {
        self.converged().then_some(self.root)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RootOutcome2 {
    pub root: [f64; 2],
    pub status: RootStatus,
    pub iterations: usize,
}

impl RootOutcome2 {
    pub fn converged(&self) -> bool {
        self.status == RootStatus::Converged
    }
}

fn failed(root: f64, status: RootStatus, iterations: usize) -> RootOutcome {
    RootOutcome {
        root,
        status,
        iterations,
    }
}

/// Plain bisection on `[lo, hi]`.
pub fn bisection(mut f: impl FnMut(f64) -> f64, lo: f64, hi: f64, settings: &RootSettings) -> RootOutcome {
    let (mut a, mut b) = if lo <= hi { (lo, hi) } else { (hi, lo) };
    let mut fa = f(a);
    let fb = f(b);
    if !fa.is_finite() || !fb.is_finite() {
        return failed(0.5 * (a + b), RootStatus::SolverFailure, 0);
    }
    if fa == 0.0 {
        return failed(a, RootStatus::Converged, 0);
    }
    if fb == 0.0 {
        return failed(b, RootStatus::Converged, 0);
    }
    if fa.signum() == fb.signum() {
        return failed(0.5 * (a + b), RootStatus::BracketInvalid, 0);
    }

    for iteration in 1..=settings.max_iterations {
        let mid = 0.5 * (a + b);
        let fm = f(mid);
        if !fm.is_finite() {
            return failed(mid, RootStatus::SolverFailure, iteration);
        }
        if fm == 0.0 {
            return failed(mid, RootStatus::Converged, iteration);
        }
        if fm.signum() == fa.signum() {
            a = mid;
            fa = fm;
        } else {
            b = mid;
        }
        if settings.interval_converged(a, b) {
            return failed(0.5 * (a + b), RootStatus::Converged, iteration);
        }
    }
    failed(0.5 * (a + b), RootStatus::MaxIterations, settings.max_iterations)
}

/// Brent's method: inverse quadratic interpolation safeguarded by bisection.
pub fn brent(mut f: impl FnMut(f64) -> f64, lo: f64, hi: f64, settings: &RootSettings) -> RootOutcome {
    let mut a = lo;
    let mut b = hi;
    let mut fa = f(a);
    let mut fb = f(b);
    if !fa.is_finite() || !fb.is_finite() {
        return failed(0.5 * (a + b), RootStatus::SolverFailure, 0);
    }
    if fa == 0.0 {
        return failed(a, RootStatus::Converged, 0);
    }
    if fb == 0.0 {
        return failed(b, RootStatus::Converged, 0);
    }
    if fa.signum() == fb.signum() {
        return failed(0.5 * (a + b), RootStatus::BracketInvalid, 0);
    }

    let mut c = a;
    let mut fc = fa;
    let mut d = b - a;
    let mut e = d;

    for iteration in 1..=settings.max_iterations {
        if fb.signum() == fc.signum() {
            c = a;
            fc = fa;
            d = b - a;
            e = d;
        }
        if fc.abs() < fb.abs() {
            a = b;
            b = c;
            c = a;
            fa = fb;
            fb = fc;
            fc = fa;
        }

        let tol = 2.0 * f64::EPSILON * b.abs() + 0.5 * (settings.abs_tol + settings.rel_tol * b.abs());
        let m = 0.5 * (c - b);
        if fb == 0.0 || m.abs() <= tol {
            return failed(b, RootStatus::Converged, iteration);
        }

        if e.abs() < tol || fa.abs() <= fb.abs() {
            d = m;
            e = m;
        } else {
            let s = fb / fa;
            let (mut p, mut q) = if a == c {
                (2.0 * m * s, 1.0 - s)
            } else {
                let q = fa / fc;
                let r = fb / fc;
                (
                    s * (2.0 * m * q * (q - r) - (b - a) * (r - 1.0)),
                    (q - 1.0) * (r - 1.0) * (s - 1.0),
                )
            };
            if p > 0.0 {
                q = -q;
            } else {
                p = -p;
            }
            if 2.0 * p < (3.0 * m * q - (tol * q).abs()).min((e * q).abs()) {
                e = d;
                d = p / q;
            } else {
                d = m;
                e = m;
            }
        }

        a = b;
        fa = fb;
        b += if d.abs() > tol { d } else { tol.copysign(m) };
        fb = f(b);
        if !fb.is_finite() {
            return failed(b, RootStatus::SolverFailure, iteration);
        }
    }
    failed(b, RootStatus::MaxIterations, settings.max_iterations)
}

/// Newton iteration for a planar system with a forward-difference Jacobian.
pub fn newton_2d(
    mut f: impl FnMut([f64; 2]) -> [f64; 2],
    x0: [f64; 2],
    settings: &RootSettings,
) -> RootOutcome2 {
    let outcome = |root, status, iterations| RootOutcome2 {
        root,
        status,
        iterations,
    };
    let mut x = x0;
    let mut fx = f(x);

    for iteration in 1..=settings.max_iterations {
        if !fx[0].is_finite() || !fx[1].is_finite() {
            return outcome(x, RootStatus::SolverFailure, iteration);
        }
        if fx[0].hypot(fx[1]) < settings.abs_tol {
            return outcome(x, RootStatus::Converged, iteration - 1);
        }

        let step = match newton_step(&mut f, x, fx) {
            Ok(step) => step,
            Err(_) => return outcome(x, RootStatus::SolverFailure, iteration),
        };
        x = [x[0] - step[0], x[1] - step[1]];
        fx = f(x);

        let size = step[0].hypot(step[1]);
        let scale = x[0].hypot(x[1]);
        if size < settings.abs_tol + settings.rel_tol * scale {
            return outcome(x, RootStatus::Converged, iteration);
        }
    }
    outcome(x, RootStatus::MaxIterations, settings.max_iterations)
}

fn newton_step(
    f: &mut impl FnMut([f64; 2]) -> [f64; 2],
    x: [f64; 2],
    fx: [f64; 2],
) -> Result<[f64; 2]> {
    let mut jacobian = Matrix2::zeros();
    for j in 0..2 {
        let h = 1e-7 * x[j].abs().max(1.0);
        let mut shifted = x;
        shifted[j] += h;
        let fs = f(shifted);
        for i in 0..2 {
            jacobian[(i, j)] = (fs[i] - fx[i]) / h;
        }
    }
    let rhs = Vector2::new(fx[0], fx[1]);
    jacobian
        .lu()
        .solve(&rhs)
        .map(|v| [v[0], v[1]])
        .ok_or_else(|| anyhow!("Jacobian is singular."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bisection_finds_sqrt_two() {
        let outcome = bisection(|x| x * x - 2.0, 0.0, 2.0, &RootSettings::default());
        assert!(outcome.converged());
        assert!((outcome.root - 2f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn brent_converges_faster_than_bisection() {
        let settings = RootSettings::default();
        let f = |x: f64| x.cos() - x;
        let slow = bisection(f, 0.0, 1.0, &settings);
        let fast = brent(f, 0.0, 1.0, &settings);
        assert!(fast.converged());
        assert!((fast.root - 0.7390851332151607).abs() < 1e-12);
        assert!(fast.iterations < slow.iterations);
    }

    #[test]
    fn invalid_bracket_is_reported() {
        let outcome = brent(|x| x * x + 1.0, -1.0, 1.0, &RootSettings::default());
        assert_eq!(outcome.status, RootStatus::BracketInvalid);
        let err = outcome.require("light ring").expect_err("must fail");
        assert!(err.to_string().contains("light ring"));
    }

    #[test]
    fn iteration_cap_is_reported() {
        let settings = RootSettings {
            max_iterations: 3,
            abs_tol: 1e-15,
            rel_tol: 0.0,
        };
        let outcome = bisection(|x| x - 0.3, 0.0, 1.0, &settings);
        assert_eq!(outcome.status, RootStatus::MaxIterations);
        assert_eq!(outcome.ok(), None);
    }

    #[test]
    fn repeated_solves_are_bit_identical() {
        let settings = RootSettings::default();
        let f = |x: f64| x.powi(3) - 2.0 * x - 5.0;
        let first = brent(f, 2.0, 3.0, &settings);
        let second = brent(f, 2.0, 3.0, &settings);
        assert_eq!(first.root.to_bits(), second.root.to_bits());
    }

    #[test]
    fn newton_solves_circle_line_intersection() {
        let settings = RootSettings::default();
        let outcome = newton_2d(
            |[x, y]| [x * x + y * y - 4.0, x - y],
            [1.0, 2.0],
            &settings,
        );
        assert!(outcome.converged());
        let expected = 2f64.sqrt();
        assert!((outcome.root[0] - expected).abs() < 1e-9);
        assert!((outcome.root[1] - expected).abs() < 1e-9);
    }

    #[test]
    fn newton_reports_singular_jacobian() {
        let outcome = newton_2d(|[x, _]| [x * x + 1.0, 0.0], [0.0, 0.0], &RootSettings::default());
        assert_eq!(outcome.status, RootStatus::SolverFailure);
    }
}
