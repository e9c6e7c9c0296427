//! Interpolation, finite differences and phase helpers shared by the dynamics,
//! waveform and spin stages.

use anyhow::{bail, Result};
use std::f64::consts::{PI, TAU};

/// Natural cubic spline through strictly increasing abscissae.
#[derive(Debug, Clone)]
pub struct CubicSpline {
    x: Vec<f64>,
    y: Vec<f64>,
    /// Second derivatives at the knots.
    m: Vec<f64>,
}

impl CubicSpline {
    pub fn new(x: &[f64], y: &[f64]) -> Result<Self> {
        let n = x.len();
        if n != y.len() {
            bail!("Spline data length mismatch ({} abscissae, {} ordinates).", n, y.len());
        }
        if n < 3 {
            bail!("Spline needs at least 3 points, got {n}.");
        }
        if x.windows(2).any(|w| !(w[1] > w[0])) {
            bail!("Spline abscissae must be strictly increasing.");
        }

        // Thomas algorithm on the interior second derivatives, m[0] = m[n-1] = 0.
        let mut m = vec![0.0; n];
        let mut diag = vec![0.0; n];
        let mut rhs = vec![0.0; n];
        for i in 1..n - 1 {
            let h0 = x[i] - x[i - 1];
            let h1 = x[i + 1] - x[i];
            diag[i] = 2.0 * (h0 + h1);
            rhs[i] = 6.0 * ((y[i + 1] - y[i]) / h1 - (y[i] - y[i - 1]) / h0);
        }
        for i in 2..n - 1 {
            let h = x[i] - x[i - 1];
            let w = h / diag[i - 1];
            diag[i] -= w * h;
            rhs[i] -= w * rhs[i - 1];
        }
        for i in (1..n - 1).rev() {
            let h1 = x[i + 1] - x[i];
            m[i] = (rhs[i] - h1 * m[i + 1]) / diag[i];
        }

        Ok(Self {
            x: x.to_vec(),
            y: y.to_vec(),
            m,
        })
    }

    pub fn x_min(&self) -> f64 {
        self.x[0]
    }

    pub fn x_max(&self) -> f64 {
        self.x[self.x.len() - 1]
    }

    fn interval(&self, xi: f64) -> usize {
        let n = self.x.len();
        match self.x.partition_point(|&v| v <= xi) {
            0 => 0,
            i if i >= n => n - 2,
            i => i - 1,
        }
    }

    /// Value at `xi`; outside the knots the end cubic is extrapolated.
    pub fn eval(&self, xi: f64) -> f64 {
        let i = self.interval(xi);
        let h = self.x[i + 1] - self.x[i];
        let a = (self.x[i + 1] - xi) / h;
        let b = (xi - self.x[i]) / h;
        a * self.y[i]
            + b * self.y[i + 1]
            + ((a * a * a - a) * self.m[i] + (b * b * b - b) * self.m[i + 1]) * h * h / 6.0
    }

    pub fn eval_deriv(&self, xi: f64) -> f64 {
        let i = self.interval(xi);
        let h = self.x[i + 1] - self.x[i];
        let a = (self.x[i + 1] - xi) / h;
        let b = (xi - self.x[i]) / h;
        (self.y[i + 1] - self.y[i]) / h
            + ((1.0 - 3.0 * a * a) * self.m[i] + (3.0 * b * b - 1.0) * self.m[i + 1]) * h / 6.0
    }

    pub fn eval_many(&self, xs: &[f64]) -> Vec<f64> {
        xs.iter().map(|&xi| self.eval(xi)).collect()
    }
}

/// Samples `y(x)` on the grid `x0 + i*dx`, i = 0..n.
pub fn interpolate_uniform(x: &[f64], y: &[f64], x0: f64, dx: f64, n: usize) -> Result<Vec<f64>> {
    let spline = CubicSpline::new(x, y)?;
    Ok((0..n).map(|i| spline.eval(x0 + i as f64 * dx)).collect())
}

/// Number of samples of the uniform grid `t0:dt:tn`.
pub fn uniform_size(tn: f64, t0: f64, dt: f64) -> usize {
    let n = (tn - t0) / dt + 1.0;
    if n.is_finite() && n > 0.0 {
        n as usize
    } else {
        0
    }
}

/// Start index of the `2*o` point stencil around `x` in the sorted `xp`.
///
/// Returns 0 when `x` lies left of the stencil range and `n - 2o` when it lies right of it.
pub fn find_point_bisection(x: f64, xp: &[f64], o: usize) -> usize {
    let n = xp.len();
    if o == 0 || n < 2 * o {
        return 0;
    }
    let mut i0 = o - 1;
    let mut i1 = n - o;
    if x <= xp[i0] {
        return 0;
    }
    if x > xp[i1] {
        return n - 2 * o;
    }
    while i0 != i1 - 1 {
        let i = (i0 + i1) / 2;
        if x < xp[i] {
            i1 = i;
        } else {
            i0 = i;
        }
    }
    i0 + 1 - o
}

/// Abscissa of the extremum of `f` from a 5-point, possibly non-uniform, stencil
/// centred on the third sample.
pub fn find_max_grid(x: &[f64], f: &[f64]) -> Result<f64> {
    if x.len() < 5 || f.len() < 5 {
        bail!("find_max_grid needs 5 samples.");
    }
    let i = 2;
    let dx: Vec<f64> = (0..4).map(|j| x[j + 1] - x[j]).collect();
    let d1f = 0.5 * (f[i + 1] - f[i]) / dx[i] + 0.5 * (f[i] - f[i - 1]) / dx[i - 1];
    let d2f = 0.25 * ((f[i + 2] - f[i + 1]) / dx[i + 1] - (f[i] - f[i - 1]) / dx[i - 1]) / dx[i]
        + 0.25 * ((f[i + 1] - f[i]) / dx[i] - (f[i - 1] - f[i - 2]) / dx[i - 2]) / dx[i - 1];
    if d2f == 0.0 || !d2f.is_finite() {
        return Ok(x[i]);
    }
    Ok(x[i] - d1f / d2f)
}

/// Fourth-order first derivative on a uniform grid, one-sided at the boundaries.
pub fn d0_uniform(f: &[f64], dx: f64) -> Result<Vec<f64>> {
    let n = f.len();
    if n < 5 {
        bail!("Uniform derivative needs at least 5 points, got {n}.");
    }
    let c = 1.0 / (12.0 * dx);
    let mut df = vec![0.0; n];
    for i in 2..n - 2 {
        df[i] = (8.0 * (f[i + 1] - f[i - 1]) - f[i + 2] + f[i - 2]) * c;
    }
    df[0] = (-25.0 * f[0] + 48.0 * f[1] - 36.0 * f[2] + 16.0 * f[3] - 3.0 * f[4]) * c;
    df[1] = (-3.0 * f[0] - 10.0 * f[1] + 18.0 * f[2] - 6.0 * f[3] + f[4]) * c;
    let i = n - 2;
    df[i] = -(-3.0 * f[i + 1] - 10.0 * f[i] + 18.0 * f[i - 1] - 6.0 * f[i - 2] + f[i - 3]) * c;
    let i = n - 1;
    df[i] = -(-25.0 * f[i] + 48.0 * f[i - 1] - 36.0 * f[i - 2] + 16.0 * f[i - 3] - 3.0 * f[i - 4]) * c;
    Ok(df)
}

/// Fourth-order first derivative on a non-uniform grid (5-point Lagrange stencils).
pub fn d0_nonuniform(f: &[f64], x: &[f64]) -> Result<Vec<f64>> {
    let n = f.len();
    if n != x.len() {
        bail!("Derivative data length mismatch.");
    }
    if n < 5 {
        bail!("Non-uniform derivative needs at least 5 points, got {n}.");
    }
    let mut df = vec![0.0; n];
    df[0] = lagrange_derivative(&x[..5], &f[..5], 0);
    df[1] = lagrange_derivative(&x[..5], &f[..5], 1);
    for k in 2..n - 2 {
        df[k] = lagrange_derivative(&x[k - 2..k + 3], &f[k - 2..k + 3], 2);
    }
    df[n - 2] = lagrange_derivative(&x[n - 5..], &f[n - 5..], 3);
    df[n - 1] = lagrange_derivative(&x[n - 5..], &f[n - 5..], 4);
    Ok(df)
}

/// Derivative at node `i` of the Lagrange polynomial through the given points.
fn lagrange_derivative(x: &[f64], y: &[f64], i: usize) -> f64 {
    let n = x.len();
    let mut dy = 0.0;
    for j in 0..n {
        let denom: f64 = (0..n).filter(|&a| a != j).map(|a| x[j] - x[a]).product();
        let weight = if i != j {
            (0..n)
                .filter(|&b| b != j && b != i)
                .map(|b| x[i] - x[b])
                .product::<f64>()
        } else {
            (0..n)
                .filter(|&c| c != j)
                .map(|c| {
                    (0..n)
                        .filter(|&b| b != j && b != c)
                        .map(|b| x[j] - x[b])
                        .product::<f64>()
                })
                .sum()
        };
        dy += y[j] * weight / denom;
    }
    dy
}

/// Cumulative trapezoidal integral; the first entry is zero.
pub fn cumtrapz(f: &[f64], x: &[f64]) -> Vec<f64> {
    let mut sum = Vec::with_capacity(f.len());
    if f.is_empty() {
        return sum;
    }
    sum.push(0.0);
    for i in 1..f.len().min(x.len()) {
        let last = sum[i - 1];
        sum.push(last + 0.5 * (x[i] - x[i - 1]) * (f[i] + f[i - 1]));
    }
    sum
}

/// Unwraps a phase that is expected to grow monotonically: every decrease is taken as a
/// wrap and compensated with 2π.
pub fn unwrap_monotonic(p: &mut [f64]) {
    if p.len() < 2 {
        return;
    }
    let shift = if p[0] < 0.0 { TAU } else { 0.0 };
    let mut prev = p[0];
    let mut corr = 0.0;
    for value in p.iter_mut().skip(1) {
        let curr = *value + shift;
        if curr < prev {
            corr += TAU;
        }
        *value = curr + corr - shift;
        prev = curr;
    }
}

/// Removes 2π jumps relative to the running increment.
///
/// A decrease by more than π is undone by +2π; an increase larger than `rise_limit`
/// (and π beyond the previous increment) by −2π. Multipole phases use `rise_limit = 2π`,
/// Euler angles `π`.
pub fn unwrap_jumps(p: &mut [f64], rise_limit: f64) {
    if p.len() < 2 {
        return;
    }
    let mut corr = 0.0;
    let mut prev = p[0];
    let mut delta = p[1] - p[0];
    for j in 1..p.len() {
        p[j] += corr;
        let curr = p[j];
        let mut dphi = 0.0;
        if curr < prev - PI && curr - prev < delta - PI {
            dphi = TAU;
        }
        if curr > prev + rise_limit && curr - prev > delta + PI {
            dphi = -TAU;
        }
        corr += dphi;
        p[j] += dphi;
        prev = p[j];
        delta = p[j] - p[j - 1];
    }
}

pub fn unwrap(p: &mut [f64]) {
    unwrap_jumps(p, TAU);
}

pub fn unwrap_euler(p: &mut [f64]) {
    unwrap_jumps(p, PI);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_err_contains<T: std::fmt::Debug>(result: Result<T>, needle: &str) {
        let err = result.expect_err("expected error");
        let message = format!("{err}");
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    #[test]
    fn spline_reproduces_smooth_function() {
        let x: Vec<f64> = (0..200).map(|i| i as f64 * 0.05).collect();
        let y: Vec<f64> = x.iter().map(|v| v.sin()).collect();
        let spline = CubicSpline::new(&x, &y).expect("valid spline");
        for &xi in &[0.73, 2.5, 5.123, 8.9] {
            assert!((spline.eval(xi) - xi.sin()).abs() < 1e-5);
            assert!((spline.eval_deriv(xi) - xi.cos()).abs() < 1e-3);
        }
        assert_eq!(spline.eval(x[17]), y[17]);
    }

    #[test]
    fn spline_rejects_bad_abscissae() {
        assert_err_contains(CubicSpline::new(&[0.0, 1.0, 1.0], &[0.0, 1.0, 2.0]), "strictly increasing");
        assert_err_contains(CubicSpline::new(&[0.0, 1.0], &[0.0, 1.0]), "at least 3");
    }

    #[test]
    fn uniform_derivative_is_exact_for_quartics() {
        let dx = 0.1;
        let f: Vec<f64> = (0..12).map(|i| (i as f64 * dx).powi(4)).collect();
        let df = d0_uniform(&f, dx).expect("enough points");
        for (i, d) in df.iter().enumerate() {
            let x = i as f64 * dx;
            assert!((d - 4.0 * x.powi(3)).abs() < 1e-9, "i = {i}");
        }
    }

    #[test]
    fn nonuniform_derivative_is_exact_for_quartics() {
        let x: Vec<f64> = (0..10).map(|i| (i as f64).powf(1.3) * 0.2).collect();
        let f: Vec<f64> = x.iter().map(|v| v.powi(4) - v).collect();
        let df = d0_nonuniform(&f, &x).expect("enough points");
        for (i, d) in df.iter().enumerate() {
            let exact = 4.0 * x[i].powi(3) - 1.0;
            assert!((d - exact).abs() < 1e-8 * (1.0 + exact.abs()), "i = {i}");
        }
    }

    #[test]
    fn bisection_stencil_bounds() {
        let xp: Vec<f64> = (0..10).map(f64::from).collect();
        assert_eq!(find_point_bisection(-1.0, &xp, 2), 0);
        assert_eq!(find_point_bisection(20.0, &xp, 2), 6);
        assert_eq!(find_point_bisection(4.5, &xp, 2), 3);
        assert_eq!(find_point_bisection(4.5, &xp, 1), 4);
    }

    #[test]
    fn parabola_maximum_is_located() {
        let x = [0.1, 0.3, 0.5, 0.7, 0.9];
        let f: Vec<f64> = x.iter().map(|v| -(v - 0.55) * (v - 0.55)).collect();
        let xmax = find_max_grid(&x, &f).expect("5 samples");
        assert!((xmax - 0.55).abs() < 1e-12);
    }

    #[test]
    fn trapezoid_integrates_linear_exactly() {
        let x = [0.0, 0.5, 2.0, 3.0];
        let sum = cumtrapz(&[1.0, 2.0, 5.0, 7.0], &x);
        assert_eq!(sum.len(), 4);
        let expected = [0.0, 0.75, 6.0, 12.0];
        for (got, want) in sum.iter().zip(expected) {
            assert!((got - want).abs() < 1e-14, "{got} != {want}");
        }
    }

    #[test]
    fn unwrap_removes_wraps() {
        let truth: Vec<f64> = (0..60).map(|i| 0.4 * i as f64).collect();
        let mut wrapped: Vec<f64> = truth
            .iter()
            .map(|p| (p + PI).rem_euclid(TAU) - PI)
            .collect();
        unwrap(&mut wrapped);
        for (a, b) in wrapped.iter().zip(&truth) {
            assert!((a - b).abs() < 1e-12);
        }

        let mut monotone: Vec<f64> = truth.iter().map(|p| p.rem_euclid(TAU)).collect();
        unwrap_monotonic(&mut monotone);
        for (a, b) in monotone.iter().zip(&truth) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn uniform_size_counts_endpoints() {
        assert_eq!(uniform_size(1.0, 0.0, 0.25), 5);
        assert_eq!(uniform_size(0.0, 1.0, 0.25), 0);
    }
}
