//! Forward-mode automatic differentiation used for fit Jacobians.

use crate::traits::FitModel;
use num_traits::{Float, FromPrimitive, Num, NumCast, One, ToPrimitive, Zero};
use std::f64::consts::{LN_10, LN_2};
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

    /// A constant (zero derivative).
    pub fn constant(val: f64) -> Self {
        Self::new(val, 0.0)
    }

    /// Applies `f` with known derivative `df` through the chain rule.
    fn chain(self, f: f64, df: f64) -> Self {
        Self::new(f, df * self.eps)
    }
}

impl Zero for Dual {
    fn zero() -> Self {
        Self::new(0.0, 0.0)
    }
    fn is_zero(&self) -> bool {
        self.val == 0.0 && self.eps == 0.0
    }
}

impl One for Dual {
    fn one() -> Self {
        Self::new(1.0, 0.0)
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
        let quotient = self.val / rhs.val;
        Self::new(quotient, (self.eps - quotient * rhs.eps) / rhs.val)
    }
}

impl Neg for Dual {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.val, -self.eps)
    }
}

impl Rem for Dual {
    type Output = Self;
    fn rem(self, rhs: Self) -> Self {
        Self::new(self.val % rhs.val, self.eps)
    }
}

macro_rules! dual_assign_ops {
    ($($trait:ident::$method:ident => $op:tt),* $(,)?) => {
        $(impl $trait for Dual {
            fn $method(&mut self, rhs: Self) {
                *self = *self $op rhs;
            }
        })*
    };
}

dual_assign_ops! {
    AddAssign::add_assign => +,
    SubAssign::sub_assign => -,
    MulAssign::mul_assign => *,
    DivAssign::div_assign => /,
    RemAssign::rem_assign => %,
}

impl Num for Dual {
    type FromStrRadixErr = ();
    fn from_str_radix(str: &str, radix: u32) -> Result<Self, Self::FromStrRadixErr> {
        f64::from_str_radix(str, radix)
            .map(Self::constant)
            .map_err(|_| ())
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
    fn is_nan(self) -> bool {
        self.val.is_nan()
    }
    fn is_infinite(self) -> bool {
        self.val.is_infinite()
    }
    fn is_finite(self) -> bool {
        self.val.is_finite()
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
        Self::new(self.val.fract(), self.eps)
    }
    fn abs(self) -> Self {
        self.chain(self.val.abs(), if self.val < 0.0 { -1.0 } else { 1.0 })
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
        Self::one() / self
    }

    fn powi(self, n: i32) -> Self {
        self.chain(self.val.powi(n), n as f64 * self.val.powi(n - 1))
    }

    fn powf(self, n: Self) -> Self {
        let value = self.val.powf(n.val);
        // ln(x) is only evaluated for a varying exponent, so negative bases stay finite.
        let through_base = match self.eps {
            e if e == 0.0 => 0.0,
            e => n.val * self.val.powf(n.val - 1.0) * e,
        };
        let through_exponent = match n.eps {
            e if e == 0.0 => 0.0,
            e => value * self.val.ln() * e,
        };
        Self::new(value, through_base + through_exponent)
    }

    fn sqrt(self) -> Self {
        let root = self.val.sqrt();
        self.chain(root, 0.5 / root)
    }
    fn exp(self) -> Self {
        let value = self.val.exp();
        self.chain(value, value)
    }

    fn exp2(self) -> Self {
        let value = self.val.exp2();
        self.chain(value, value * LN_2)
    }
    fn ln(self) -> Self {
        self.chain(self.val.ln(), self.val.recip())
    }
    fn log(self, base: Self) -> Self {
        self.ln() / base.ln()
    }
    fn log2(self) -> Self {
        self.chain(self.val.log2(), (self.val * LN_2).recip())
    }
    fn log10(self) -> Self {
        self.chain(self.val.log10(), (self.val * LN_10).recip())
    }

    fn max(self, other: Self) -> Self {
        match self.val > other.val {
            true => self,
            false => other,
        }
    }
    fn min(self, other: Self) -> Self {
        match self.val < other.val {
            true => self,
            false => other,
        }
    }
    fn abs_sub(self, other: Self) -> Self {
        (self - other).max(Self::zero())
    }

    fn cbrt(self) -> Self {
        let root = self.val.cbrt();
        self.chain(root, (3.0 * root * root).recip())
    }
    fn hypot(self, other: Self) -> Self {
        (self * self + other * other).sqrt()
    }

    fn sin(self) -> Self {
        self.chain(self.val.sin(), self.val.cos())
    }
    fn cos(self) -> Self {
        self.chain(self.val.cos(), -self.val.sin())
    }
    fn tan(self) -> Self {
        let value = self.val.tan();
        self.chain(value, 1.0 + value * value)
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
        let radius2 = self.val.mul_add(self.val, other.val * other.val);
        Self::new(
            self.val.atan2(other.val),
            (other.val * self.eps - self.val * other.eps) / radius2,
        )
    }
    fn sin_cos(self) -> (Self, Self) {
        (self.sin(), self.cos())
    }

    fn exp_m1(self) -> Self {
        self.chain(self.val.exp_m1(), self.val.exp())
    }
    fn ln_1p(self) -> Self {
        self.chain(self.val.ln_1p(), 1.0 / (1.0 + self.val))
    }
    fn sinh(self) -> Self {
        self.chain(self.val.sinh(), self.val.cosh())
    }
    fn cosh(self) -> Self {
        self.chain(self.val.cosh(), self.val.sinh())
    }
    fn tanh(self) -> Self {
        let value = self.val.tanh();
        self.chain(value, 1.0 - value * value)
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

/// Jacobian of a model with respect to the parameters flagged in `active`.
///
/// Returns a row-major `x.len() × n_active` matrix: row `i` holds
/// `∂f(x_i)/∂p_j` for every active parameter `j`, one dual sweep per column.
pub fn model_jacobian<M: FitModel>(
    model: &M,
    values: &[f64],
    active: &[usize],
    x: &[f64],
) -> Vec<f64> {
    let cols = active.len();
    let mut jacobian = vec![0.0; x.len() * cols];
    let mut dual_params: Vec<Dual> = values.iter().map(|&v| Dual::constant(v)).collect();

    for (col, &param_idx) in active.iter().enumerate() {
        dual_params[param_idx].eps = 1.0;
        for (row, &xi) in x.iter().enumerate() {
            jacobian[row * cols + col] = model.evaluate(&dual_params, xi).eps;
        }
        dual_params[param_idx].eps = 0.0;
    }

    jacobian
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::Scalar;

    struct Exponential;

    impl FitModel for Exponential {
        fn parameter_keys(&self) -> Vec<String> {
            vec!["amplitude".into(), "rate".into()]
        }

        fn evaluate<T: Scalar>(&self, params: &[T], x: f64) -> T {
            params[0] * (params[1] * T::lift(x)).exp()
        }
    }

    #[test]
    fn product_rule_holds() {
        let x = Dual::new(3.0, 1.0);
        let y = x * x;
        assert_eq!(y.val, 9.0);
        assert_eq!(y.eps, 6.0);
    }

    #[test]
    fn powf_with_constant_exponent_handles_negative_base() {
        let x = Dual::new(-2.0, 1.0);
        let y = x.powf(Dual::constant(2.0));
        assert!((y.val - 4.0).abs() < 1e-12);
        assert!((y.eps + 4.0).abs() < 1e-12);
    }

    #[test]
    fn integer_powers_scale_the_derivative() {
        let x = Dual::new(2.0, 1.0);
        let cube = x.powi(3);
        assert_eq!(cube.val, 8.0);
        assert_eq!(cube.eps, 12.0);
        let inverse = x.powi(-1);
        assert!((inverse.eps + 0.25).abs() < 1e-12);
    }

    #[test]
    fn transcendental_derivatives_match_closed_forms() {
        let x = Dual::new(0.5, 1.0);
        assert!((x.atan().eps - 1.0 / 1.25).abs() < 1e-12);
        assert!((x.tanh().eps - (1.0 - 0.5f64.tanh().powi(2))).abs() < 1e-12);
        assert!((x.log10().eps - 1.0 / (0.5 * std::f64::consts::LN_10)).abs() < 1e-12);
    }

    #[test]
    fn model_jacobian_matches_analytic_derivatives() {
        let values = [2.0, 0.5];
        let x = [0.0, 1.0, 2.0];
        let jac = model_jacobian(&Exponential, &values, &[0, 1], &x);
        for (row, &xi) in x.iter().enumerate() {
            let e = (0.5 * xi).exp();
            assert!((jac[row * 2] - e).abs() < 1e-12);
            assert!((jac[row * 2 + 1] - 2.0 * xi * e).abs() < 1e-12);
        }
    }

    #[test]
    fn model_jacobian_skips_inactive_parameters() {
        let jac = model_jacobian(&Exponential, &[2.0, 0.5], &[1], &[1.0]);
        assert_eq!(jac.len(), 1);
        assert!((jac[0] - 2.0 * 0.5f64.exp()).abs() < 1e-12);
    }
}
