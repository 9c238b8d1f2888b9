use num_traits::{Float, FromPrimitive};
use std::fmt::Debug;

/// A trait for types that can be used as scalars when evaluating models and
/// expressions. Must support basic arithmetic, debug printing, and conversion from f64.
pub trait Scalar: Float + FromPrimitive + Debug + 'static {
    /// Lossless-enough lift of an `f64` constant into the scalar type.
    fn lift(value: f64) -> Self {
        Self::from_f64(value).unwrap_or_else(Self::nan)
    }
}

impl<T: Float + FromPrimitive + Debug + 'static> Scalar for T {}

/// A model that can be fitted: an ordered list of parameters and a function
/// `y = f(x; p)` evaluated generically so Jacobians can come from dual numbers.
pub trait FitModel {
    /// Unique names of the parameters, in the order `evaluate` expects them.
    fn parameter_keys(&self) -> Vec<String>;

    /// Evaluates the model at `x` for the given parameter values.
    fn evaluate<T: Scalar>(&self, params: &[T], x: f64) -> T;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autodiff::Dual;

    struct Quadratic;

    impl FitModel for Quadratic {
        fn parameter_keys(&self) -> Vec<String> {
            vec!["a".to_string()]
        }

        fn evaluate<T: Scalar>(&self, params: &[T], x: f64) -> T {
            params[0] * T::lift(x * x)
        }
    }

    #[test]
    fn lift_converts_constants() {
        assert_eq!(f64::lift(2.5), 2.5);
        assert_eq!(Dual::lift(2.5), Dual::new(2.5, 0.0));
    }

    #[test]
    fn fit_model_evaluates_with_duals() {
        let out = Quadratic.evaluate(&[Dual::new(3.0, 1.0)], 2.0);
        assert_eq!(out.val, 12.0);
        assert_eq!(out.eps, 4.0);
    }
}
