//! Forward-mode automatic differentiation.
//!
//! The models are written once, generically over [`Scalar`], so evaluating them
//! with [`Dual`] numbers yields exact directional derivatives. The stiff solver
//! uses this to assemble the Jacobian `df/dx` and the explicit time derivative
//! `df/dt` without finite-difference noise, which matters when rate constants
//! span ten orders of magnitude.

use crate::error::DomainViolation;
use crate::traits::DynamicalSystem;
use nalgebra::DMatrix;
use num_traits::{Float, FromPrimitive, Num, NumCast, One, ToPrimitive, Zero};
use std::num::FpCategory;
use std::ops::{
    Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Rem, RemAssign, Sub, SubAssign,
};

/// Dual number `val + eps·ε` with `ε² = 0`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Dual {
    pub val: f64,
    pub eps: f64,
}

impl Dual {
    pub fn new(val: f64, eps: f64) -> Self {
        Self { val, eps }
    }

    /// A value that does not vary along the seeded direction.
    pub fn constant(val: f64) -> Self {
        Self::new(val, 0.0)
    }

    /// A value seeded as the independent variable.
    pub fn variable(val: f64) -> Self {
        Self::new(val, 1.0)
    }

    /// Applies `f` to the real part, propagating `f'` through the chain rule.
    /// Constants stay constant even where `f'` is infinite.
    fn chain(self, value: f64, derivative: f64) -> Self {
        if self.eps == 0.0 {
            return Self::constant(value);
        }
        Self::new(value, derivative * self.eps)
    }
}

impl Zero for Dual {
    fn zero() -> Self {
        Self::constant(0.0)
    }
    fn is_zero(&self) -> bool {
        self.val == 0.0 && self.eps == 0.0
    }
}

impl One for Dual {
    fn one() -> Self {
        Self::constant(1.0)
    }
}

impl Add for Dual {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.val + rhs.val, self.eps + rhs.eps)
    }
}

impl Sub for Dual {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.val - rhs.val, self.eps - rhs.eps)
    }
}

impl Mul for Dual {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        Self::new(self.val * rhs.val, self.val * rhs.eps + self.eps * rhs.val)
    }
}

impl Div for Dual {
    type Output = Self;
    fn div(self, rhs: Self) -> Self {
        Self::new(
            self.val / rhs.val,
            (self.eps * rhs.val - self.val * rhs.eps) / (rhs.val * rhs.val),
        )
    }
}

impl Rem for Dual {
    type Output = Self;
    fn rem(self, rhs: Self) -> Self {
        // d(a mod b) = da - trunc(a/b)·db away from the discontinuities.
        let quotient = (self.val / rhs.val).trunc();
        Self::new(self.val % rhs.val, self.eps - quotient * rhs.eps)
    }
}

impl Neg for Dual {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.val, -self.eps)
    }
}

impl AddAssign for Dual {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl SubAssign for Dual {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl MulAssign for Dual {
    fn mul_assign(&mut self, rhs: Self) {
        *self = *self * rhs;
    }
}

impl DivAssign for Dual {
    fn div_assign(&mut self, rhs: Self) {
        *self = *self / rhs;
    }
}

impl RemAssign for Dual {
    fn rem_assign(&mut self, rhs: Self) {
        *self = *self % rhs;
    }
}

impl Num for Dual {
    type FromStrRadixErr = <f64 as Num>::FromStrRadixErr;
    fn from_str_radix(text: &str, radix: u32) -> Result<Self, Self::FromStrRadixErr> {
        f64::from_str_radix(text, radix).map(Self::constant)
    }
}

impl ToPrimitive for Dual {
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

impl FromPrimitive for Dual {
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

impl NumCast for Dual {
    fn from<T: ToPrimitive>(n: T) -> Option<Self> {
        n.to_f64().map(Self::constant)
    }
}

impl Float for Dual {
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
        Self::constant(-0.0)
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

    // Classification looks at both parts: a finite value with an infinite
    // slope is not a usable Jacobian entry.
    fn is_nan(self) -> bool {
        self.val.is_nan() || self.eps.is_nan()
    }
    fn is_infinite(self) -> bool {
        self.val.is_infinite() || self.eps.is_infinite()
    }
    fn is_finite(self) -> bool {
        self.val.is_finite() && self.eps.is_finite()
    }
    fn is_normal(self) -> bool {
        self.val.is_normal()
    }
    fn classify(self) -> FpCategory {
        self.val.classify()
    }

    // Piecewise-constant functions have zero slope.
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
        Self::new(self.val.fract(), self.eps)
    }
    fn signum(self) -> Self {
        Self::constant(self.val.signum())
    }

    fn abs(self) -> Self {
        self.chain(self.val.abs(), if self.val >= 0.0 { 1.0 } else { -1.0 })
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
        self.chain(self.val.recip(), -1.0 / (self.val * self.val))
    }

    fn powi(self, n: i32) -> Self {
        if n == 0 {
            return Self::one();
        }
        self.chain(self.val.powi(n), <f64 as From<i32>>::from(n) * self.val.powi(n - 1))
    }
    fn powf(self, n: Self) -> Self {
        let value = self.val.powf(n.val);
        let mut eps = n.val * self.val.powf(n.val - 1.0) * self.eps;
        if n.eps != 0.0 {
            eps += value * self.val.ln() * n.eps;
        }
        Self::new(value, eps)
    }
    fn sqrt(self) -> Self {
        let root = self.val.sqrt();
        self.chain(root, 0.5 / root)
    }
    fn cbrt(self) -> Self {
        let root = self.val.cbrt();
        self.chain(root, 1.0 / (3.0 * root * root))
    }
    fn hypot(self, other: Self) -> Self {
        (self * self + other * other).sqrt()
    }

    fn exp(self) -> Self {
        let e = self.val.exp();
        self.chain(e, e)
    }
    fn exp2(self) -> Self {
        let e = self.val.exp2();
        self.chain(e, e * std::f64::consts::LN_2)
    }
    fn exp_m1(self) -> Self {
        self.chain(self.val.exp_m1(), self.val.exp())
    }
    fn ln(self) -> Self {
        self.chain(self.val.ln(), 1.0 / self.val)
    }
    fn log(self, base: Self) -> Self {
        self.ln() / base.ln()
    }
    fn log2(self) -> Self {
        self.chain(self.val.log2(), 1.0 / (self.val * std::f64::consts::LN_2))
    }
    fn log10(self) -> Self {
        self.chain(self.val.log10(), 1.0 / (self.val * std::f64::consts::LN_10))
    }
    fn ln_1p(self) -> Self {
        self.chain(self.val.ln_1p(), 1.0 / (1.0 + self.val))
    }

    fn max(self, other: Self) -> Self {
        if self.val >= other.val {
            self
        } else {
            other
        }
    }
    fn min(self, other: Self) -> Self {
        if self.val <= other.val {
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

    fn sin(self) -> Self {
        self.chain(self.val.sin(), self.val.cos())
    }
    fn cos(self) -> Self {
        self.chain(self.val.cos(), -self.val.sin())
    }
    fn tan(self) -> Self {
        let t = self.val.tan();
        self.chain(t, 1.0 + t * t)
    }
    fn sin_cos(self) -> (Self, Self) {
        (self.sin(), self.cos())
    }
    fn asin(self) -> Self {
        self.chain(self.val.asin(), 1.0 / (1.0 - self.val * self.val).sqrt())
    }
    fn acos(self) -> Self {
        self.chain(self.val.acos(), -1.0 / (1.0 - self.val * self.val).sqrt())
    }
    fn atan(self) -> Self {
        self.chain(self.val.atan(), 1.0 / (1.0 + self.val * self.val))
    }
    fn atan2(self, other: Self) -> Self {
        let denom = self.val * self.val + other.val * other.val;
        Self::new(
            self.val.atan2(other.val),
            (other.val * self.eps - self.val * other.eps) / denom,
        )
    }

    fn sinh(self) -> Self {
        self.chain(self.val.sinh(), self.val.cosh())
    }
    fn cosh(self) -> Self {
        self.chain(self.val.cosh(), self.val.sinh())
    }
    fn tanh(self) -> Self {
        let t = self.val.tanh();
        self.chain(t, 1.0 - t * t)
    }
    fn asinh(self) -> Self {
        self.chain(self.val.asinh(), 1.0 / (self.val * self.val + 1.0).sqrt())
    }
    fn acosh(self) -> Self {
        self.chain(self.val.acosh(), 1.0 / (self.val * self.val - 1.0).sqrt())
    }
    fn atanh(self) -> Self {
        self.chain(self.val.atanh(), 1.0 / (1.0 - self.val * self.val))
    }

    fn integer_decode(self) -> (u64, i16, i8) {
        self.val.integer_decode()
    }
}

/// Jacobian `df/dx` (row-major in a dense matrix) and explicit time
/// derivative `df/dt` of a system at `(t, x)`.
#[derive(Debug, Clone)]
pub struct Linearization {
    pub jacobian: DMatrix<f64>,
    pub dfdt: Vec<f64>,
}

impl Linearization {
    pub fn is_finite(&self) -> bool {
        self.jacobian.iter().all(|v| v.is_finite()) && self.dfdt.iter().all(|v| v.is_finite())
    }
}

/// Linearizes `system` at `(t, x)` with one dual sweep per state component
/// plus one for time.
///
/// A column whose exact derivative is not finite (`sqrt` at zero) is replaced
/// by a one-sided difference quotient, stepping into the domain: forward
/// first, backward if the forward point is rejected.
pub fn linearize<S>(system: &S, t: f64, x: &[f64]) -> Result<Linearization, DomainViolation>
where
    S: DynamicalSystem<Dual> + ?Sized,
{
    let n = x.len();
    let mut jacobian = DMatrix::zeros(n, n);
    let mut dual_x: Vec<Dual> = x.iter().copied().map(Dual::constant).collect();
    let mut dual_out = vec![Dual::zero(); n];
    let mut base: Option<Vec<f64>> = None;

    for j in 0..n {
        dual_x[j] = Dual::variable(x[j]);
        system.apply(Dual::constant(t), &dual_x, &mut dual_out)?;
        dual_x[j] = Dual::constant(x[j]);

        if dual_out.iter().all(|d| d.eps.is_finite()) {
            for i in 0..n {
                jacobian[(i, j)] = dual_out[i].eps;
            }
            continue;
        }

        let f0 = match base.take() {
            Some(values) => values,
            None => {
                system.apply(Dual::constant(t), &dual_x, &mut dual_out)?;
                dual_out.iter().map(|d| d.val).collect()
            }
        };
        let column = difference_column(system, t, &mut dual_x, &f0, j)?;
        for (i, slope) in column.into_iter().enumerate() {
            jacobian[(i, j)] = slope;
        }
        base = Some(f0);
    }

    system.apply(Dual::variable(t), &dual_x, &mut dual_out)?;
    let dfdt = dual_out.iter().map(|d| d.eps).collect();

    Ok(Linearization { jacobian, dfdt })
}

fn difference_column<S>(
    system: &S,
    t: f64,
    x: &mut [Dual],
    f0: &[f64],
    j: usize,
) -> Result<Vec<f64>, DomainViolation>
where
    S: DynamicalSystem<Dual> + ?Sized,
{
    let xj = x[j].val;
    let delta = f64::EPSILON.sqrt() * xj.abs().max(1.0);
    let mut out = vec![Dual::zero(); x.len()];
    let mut rejected = None;

    for step in [delta, -delta] {
        x[j] = Dual::constant(xj + step);
        let outcome = system.apply(Dual::constant(t), x, &mut out);
        x[j] = Dual::constant(xj);
        match outcome {
            Ok(()) => {
                return Ok(out
                    .iter()
                    .zip(f0)
                    .map(|(shifted, value)| (shifted.val - value) / step)
                    .collect())
            }
            Err(violation) => rejected = Some(violation),
        }
    }
    Err(rejected.unwrap_or(DomainViolation::new(j, xj)))
}

/// Evaluates a generic expression at `x` and returns its value and slope.
pub fn derivative<F>(f: F, x: f64) -> (f64, f64)
where
    F: Fn(Dual) -> Dual,
{
    let out = f(Dual::variable(x));
    (out.val, out.eps)
}
