use num_traits::{Float, FromPrimitive, Num, NumCast, One, ToPrimitive, Zero};
use std::ops::{
    Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Rem, RemAssign, Sub, SubAssign,
};

/// Second-order forward-mode jet along one direction.
/// val: f(x)
/// d1: f'(x)
/// d2: f''(x)
///
/// Potentials are written once over `T: Scalar` and evaluated on a jet seeded with
/// `Jet::variable(x)` to obtain exact first and second derivatives.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Jet {
    pub val: f64,
    pub d1: f64,
    pub d2: f64,
}

impl Jet {
    pub fn new(val: f64, d1: f64, d2: f64) -> Self {
        Self { val, d1, d2 }
    }

    /// Independent variable: derivative one, curvature zero.
    pub fn variable(x: f64) -> Self {
        Self::new(x, 1.0, 0.0)
    }

    pub fn constant(x: f64) -> Self {
        Self::new(x, 0.0, 0.0)
    }

    /// Applies g with g(v), g'(v), g''(v) using the chain rule.
    fn chain(self, g0: f64, g1: f64, g2: f64) -> Self {
        Self::new(g0, g1 * self.d1, g2 * self.d1 * self.d1 + g1 * self.d2)
    }
}

impl Zero for Jet {
    fn zero() -> Self {
        Self::constant(0.0)
    }
    fn is_zero(&self) -> bool {
        self.val == 0.0 && self.d1 == 0.0 && self.d2 == 0.0
    }
}

impl One for Jet {
    fn one() -> Self {
        Self::constant(1.0)
    }
}

impl Add for Jet {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.val + rhs.val, self.d1 + rhs.d1, self.d2 + rhs.d2)
    }
}

impl Sub for Jet {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.val - rhs.val, self.d1 - rhs.d1, self.d2 - rhs.d2)
    }
}

impl Mul for Jet {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.val * rhs.val,
            self.val * rhs.d1 + self.d1 * rhs.val,
            self.d2 * rhs.val + 2.0 * self.d1 * rhs.d1 + self.val * rhs.d2,
        )
    }
}

impl Div for Jet {
    type Output = Self;
    fn div(self, rhs: Self) -> Self {
        self * rhs.recip()
    }
}

impl Neg for Jet {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.val, -self.d1, -self.d2)
    }
}

impl Rem for Jet {
    type Output = Self;
    fn rem(self, rhs: Self) -> Self {
        // locally x - n*y with n constant
        let n = (self.val / rhs.val).trunc();
        Self::new(
            self.val % rhs.val,
            self.d1 - n * rhs.d1,
            self.d2 - n * rhs.d2,
        )
    }
}

impl AddAssign for Jet {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}
impl SubAssign for Jet {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}
impl MulAssign for Jet {
    fn mul_assign(&mut self, rhs: Self) {
        *self = *self * rhs;
    }
}
impl DivAssign for Jet {
    fn div_assign(&mut self, rhs: Self) {
        *self = *self / rhs;
    }
}
impl RemAssign for Jet {
    fn rem_assign(&mut self, rhs: Self) {
        *self = *self % rhs;
    }
}

impl Num for Jet {
    type FromStrRadixErr = ();
    fn from_str_radix(str: &str, radix: u32) -> Result<Self, Self::FromStrRadixErr> {
        f64::from_str_radix(str, radix)
            .map(Self::constant)
            .map_err(|_| ())
    }
}

impl ToPrimitive for Jet {
    fn to_i64(&self) -> Option<i64> {
        self.val.to_i64()
    }
    fn to_u64(&self) -> Option<u64> {
        self.val.to_u64()
    }
    fn to_f64(&self) -> Option<f64> {
        Some(self.val)
    }
}

impl FromPrimitive for Jet {
    fn from_i64(n: i64) -> Option<Self> {
        Some(Self::constant(n as f64))
    }
    fn from_u64(n: u64) -> Option<Self> {
        Some(Self::constant(n as f64))
    }
    fn from_f64(n: f64) -> Option<Self> {
        Some(Self::constant(n))
    }
}

impl NumCast for Jet {
    fn from<T: ToPrimitive>(n: T) -> Option<Self> {
        n.to_f64().map(Self::constant)
    }
}

impl Float for Jet {
    fn nan() -> Self {
        Self::constant(f64::NAN)
    }
    fn infinity() -> Self {
        Self::constant(f64::INFINITY)
    }
    fn neg_infinity() -> Self {
        Self::constant(f64::NEG_INFINITY)
    }
    fn neg_zero() -> Self {
        Self::new(-0.0, -0.0, -0.0)
    }
    fn min_value() -> Self {
        Self::constant(f64::MIN)
    }
    fn min_positive_value() -> Self {
        Self::constant(f64::MIN_POSITIVE)
    }
    fn max_value() -> Self {
        Self::constant(f64::MAX)
    }
    fn is_nan(self) -> bool {
        self.val.is_nan()
    }
    fn is_infinite(self) -> bool {
        self.val.is_infinite()
    }
    fn is_finite(self) -> bool {
        self.val.is_finite() && self.d1.is_finite() && self.d2.is_finite()
    }
    fn is_normal(self) -> bool {
        self.val.is_normal()
    }
    fn classify(self) -> std::num::FpCategory {
        self.val.classify()
    }
    fn floor(self) -> Self {
        Self::constant(self.val.floor())
    }
    fn ceil(self) -> Self {
        Self::constant(self.val.ceil())
    }
    fn round(self) -> Self {
        Self::constant(self.val.round())
    }
    fn trunc(self) -> Self {
        Self::constant(self.val.trunc())
    }
    fn fract(self) -> Self {
        Self::new(self.val.fract(), self.d1, self.d2)
    }
    fn abs(self) -> Self {
        if self.val >= 0.0 {
            self
        } else {
            -self
        }
    }
    fn signum(self) -> Self {
        Self::constant(self.val.signum())
    }
    fn is_sign_positive(self) -> bool {
        self.val.is_sign_positive()
    }
    fn is_sign_negative(self) -> bool {
        self.val.is_sign_negative()
    }
    fn mul_add(self, a: Self, b: Self) -> Self {
        self * a + b
    }
    fn recip(self) -> Self {
        let r = 1.0 / self.val;
        self.chain(r, -r * r, 2.0 * r * r * r)
    }

    fn powi(self, n: i32) -> Self {
        let nf = <f64 as From<i32>>::from(n);
        let p2 = if n >= 2 || n < 0 {
            nf * (nf - 1.0) * self.val.powi(n - 2)
        } else {
            0.0
        };
        let p1 = if n != 0 { nf * self.val.powi(n - 1) } else { 0.0 };
        self.chain(self.val.powi(n), p1, p2)
    }

    fn powf(self, n: Self) -> Self {
        if n.d1 == 0.0 && n.d2 == 0.0 {
            let p = n.val;
            self.chain(
                self.val.powf(p),
                p * self.val.powf(p - 1.0),
                p * (p - 1.0) * self.val.powf(p - 2.0),
            )
        } else {
            (n * self.ln()).exp()
        }
    }

    fn sqrt(self) -> Self {
        let s = self.val.sqrt();
        self.chain(s, 0.5 / s, -0.25 / (s * self.val))
    }

    fn exp(self) -> Self {
        let e = self.val.exp();
        self.chain(e, e, e)
    }

    fn exp2(self) -> Self {
        let e = self.val.exp2();
        let l = std::f64::consts::LN_2;
        self.chain(e, e * l, e * l * l)
    }
    fn ln(self) -> Self {
        let r = 1.0 / self.val;
        self.chain(self.val.ln(), r, -r * r)
    }
    fn log(self, base: Self) -> Self {
        self.ln() / base.ln()
    }
    fn log2(self) -> Self {
        self.ln() / Self::constant(std::f64::consts::LN_2)
    }
    fn log10(self) -> Self {
        self.ln() / Self::constant(std::f64::consts::LN_10)
    }

    fn max(self, other: Self) -> Self {
        if self.val > other.val {
            self
        } else {
            other
        }
    }
    fn min(self, other: Self) -> Self {
        if self.val < other.val {
            self
        } else {
            other
        }
    }

    fn abs_sub(self, other: Self) -> Self {
        if self.val > other.val {
            self - other
        } else {
            Self::zero()
        }
    }

    fn cbrt(self) -> Self {
        let c = self.val.cbrt();
        let c1 = 1.0 / (3.0 * c * c);
        self.chain(c, c1, -2.0 * c1 / (3.0 * self.val))
    }
    fn hypot(self, other: Self) -> Self {
        (self * self + other * other).sqrt()
    }

    fn sin(self) -> Self {
        let (s, c) = self.val.sin_cos();
        self.chain(s, c, -s)
    }
    fn cos(self) -> Self {
        let (s, c) = self.val.sin_cos();
        self.chain(c, -s, -c)
    }
    fn tan(self) -> Self {
        let t = self.val.tan();
        let sec2 = 1.0 + t * t;
        self.chain(t, sec2, 2.0 * t * sec2)
    }
    fn asin(self) -> Self {
        let w = 1.0 - self.val * self.val;
        let g1 = 1.0 / w.sqrt();
        self.chain(self.val.asin(), g1, self.val * g1 / w)
    }
    fn acos(self) -> Self {
        let w = 1.0 - self.val * self.val;
        let g1 = -1.0 / w.sqrt();
        self.chain(self.val.acos(), g1, self.val * g1 / w)
    }
    fn atan(self) -> Self {
        let w = 1.0 + self.val * self.val;
        self.chain(self.val.atan(), 1.0 / w, -2.0 * self.val / (w * w))
    }
    fn atan2(self, other: Self) -> Self {
        let angle = self.val.atan2(other.val);
        // d(atan2(y, x)) = (x dy - y dx) / (x^2 + y^2), lifted through (y/x)
        let ratio = (self / other).atan();
        Self::new(angle, ratio.d1, ratio.d2)
    }
    fn sin_cos(self) -> (Self, Self) {
        (self.sin(), self.cos())
    }

    fn exp_m1(self) -> Self {
        let e = self.val.exp();
        self.chain(self.val.exp_m1(), e, e)
    }
    fn ln_1p(self) -> Self {
        let r = 1.0 / (1.0 + self.val);
        self.chain(self.val.ln_1p(), r, -r * r)
    }
    fn sinh(self) -> Self {
        let (s, c) = (self.val.sinh(), self.val.cosh());
        self.chain(s, c, s)
    }
    fn cosh(self) -> Self {
        let (s, c) = (self.val.sinh(), self.val.cosh());
        self.chain(c, s, c)
    }
    fn tanh(self) -> Self {
        let t = self.val.tanh();
        let s2 = 1.0 - t * t;
        self.chain(t, s2, -2.0 * t * s2)
    }
    fn asinh(self) -> Self {
        let w = 1.0 + self.val * self.val;
        let g1 = 1.0 / w.sqrt();
        self.chain(self.val.asinh(), g1, -self.val * g1 / w)
    }
    fn acosh(self) -> Self {
        let w = self.val * self.val - 1.0;
        let g1 = 1.0 / w.sqrt();
        self.chain(self.val.acosh(), g1, -self.val * g1 / w)
    }
    fn atanh(self) -> Self {
        let w = 1.0 - self.val * self.val;
        self.chain(self.val.atanh(), 1.0 / w, 2.0 * self.val / (w * w))
    }

    fn integer_decode(self) -> (u64, i16, i8) {
        self.val.integer_decode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::Scalar;

    fn rational<T: Scalar>(x: T) -> T {
        (T::one() + T::cst(2.0) * x) / (T::one() + x * x * x) + x.ln() * x.sqrt()
    }

    #[test]
    fn jet_matches_finite_differences() {
        let x = 1.7;
        let jet = rational(Jet::variable(x));
        let h = 1e-4;
        let fp = rational(x + h);
        let fm = rational(x - h);
        let f0 = rational(x);
        assert!((jet.val - f0).abs() < 1e-14);
        assert!((jet.d1 - (fp - fm) / (2.0 * h)).abs() < 1e-7);
        assert!((jet.d2 - (fp - 2.0 * f0 + fm) / (h * h)).abs() < 1e-5);
    }

    #[test]
    fn power_rules_are_consistent() {
        let x = Jet::variable(2.0);
        let a = x.powi(3);
        assert_eq!(a.val, 8.0);
        assert_eq!(a.d1, 12.0);
        assert_eq!(a.d2, 12.0);
        let b = x.powf(Jet::constant(1.5));
        assert!((b.d1 - 1.5 * 2.0f64.sqrt()).abs() < 1e-14);
        let c = x.cbrt();
        assert!((c.d1 - 1.0 / (3.0 * 2.0f64.powf(2.0 / 3.0))).abs() < 1e-14);
    }

    #[test]
    fn atan2_derivative_follows_ratio() {
        let t = Jet::variable(0.3);
        let y = t.sin();
        let x = t.cos();
        let angle = y.atan2(x);
        assert!((angle.val - 0.3).abs() < 1e-15);
        assert!((angle.d1 - 1.0).abs() < 1e-12);
        assert!(angle.d2.abs() < 1e-12);
    }
}
