use super::{format_float, scalar_label, Descriptor, DescriptorMeta, DescriptorNumber, FullValue};
use crate::constraints::{Comparison, ConstraintId};
use crate::error::{CoreError, Result};
use crate::units::Unit;
use indexmap::IndexMap;
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};
use tracing::{debug, warn};

/// A fittable number: a [`DescriptorNumber`] with bounds and fitting flags.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    number: DescriptorNumber,
    min: f64,
    max: f64,
    fixed: bool,
    enabled: bool,
    user_constraints: IndexMap<String, ConstraintId>,
}

impl From<DescriptorNumber> for Parameter {
    fn from(number: DescriptorNumber) -> Self {
        Self {
            number,
            min: f64::NEG_INFINITY,
            max: f64::INFINITY,
            fixed: false,
            enabled: true,
            user_constraints: IndexMap::new(),
        }
    }
}

impl Descriptor for Parameter {
    fn meta(&self) -> &DescriptorMeta {
        &self.number.meta
    }

    fn meta_mut(&mut self) -> &mut DescriptorMeta {
        &mut self.number.meta
    }

    fn class_name(&self) -> &str {
        "Parameter"
    }
}

impl Parameter {
    /// An unbounded, free, dimensionless parameter.
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        DescriptorNumber::new(name, value).into()
    }

    pub fn with_unit(mut self, unit: &str) -> Result<Self> {
        let target = Unit::parse(unit)?;
        self.number = self.number.with_parsed_unit(target.clone());
        if target.multiplier() != 1.0 {
            let factor = target.si_scale() / target.base_unit().si_scale();
            self.min *= factor;
            self.max *= factor;
        }
        Ok(self)
    }

    pub fn with_variance(mut self, variance: f64) -> Result<Self> {
        self.number.set_variance(Some(variance))?;
        Ok(self)
    }

    pub fn with_error(mut self, error: f64) -> Result<Self> {
        self.number.set_error(Some(error))?;
        Ok(self)
    }

    pub fn with_min(mut self, min: f64) -> Result<Self> {
        self.set_min(min)?;
        Ok(self)
    }

    pub fn with_max(mut self, max: f64) -> Result<Self> {
        self.set_max(max)?;
        Ok(self)
    }

    pub fn with_fixed(mut self, fixed: bool) -> Self {
        self.fixed = fixed;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.number.meta.display_name = Some(display_name.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.number.meta.description = description.into();
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.number.meta.url = url.into();
        self
    }

    pub fn with_unique_name(mut self, unique_name: impl Into<String>) -> Self {
        self.number.meta.unique_name = Some(unique_name.into());
        self
    }

    pub fn descriptor(&self) -> &DescriptorNumber {
        &self.number
    }

    pub fn value(&self) -> f64 {
        self.number.value()
    }

    pub fn unit(&self) -> &Unit {
        self.number.unit()
    }

    pub fn variance(&self) -> Option<f64> {
        self.number.variance()
    }

    pub fn error(&self) -> Option<f64> {
        self.number.error()
    }

    pub fn full_value(&self) -> FullValue {
        self.number.full_value()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn fixed(&self) -> bool {
        self.fixed
    }

    pub fn free(&self) -> bool {
        !self.fixed
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Constraints run whenever this parameter's value is set, by label.
    pub fn user_constraints(&self) -> &IndexMap<String, ConstraintId> {
        &self.user_constraints
    }

    /// Applies the built-in bound constraints to a candidate value.
    pub fn clamp(&self, value: f64) -> f64 {
        let bounded = Comparison::GreaterEqual.enforce(value, self.min);
        let bounded = Comparison::LessEqual.enforce(bounded, self.max);
        if bounded != value {
            debug!(
                parameter = self.name(),
                requested = value,
                clamped = bounded,
                "value clamped to bounds"
            );
        }
        bounded
    }

    /// Sets the value, clamped into `[min, max]`. Ignored while disabled.
    ///
    /// Returns whether the write happened. User constraints are not run here;
    /// use `Session::set_value` for constraint-aware writes.
    pub fn set_value(&mut self, value: f64) -> bool {
        if !self.enabled {
            warn!(
                parameter = self.name(),
                value, "ignoring write to a disabled parameter"
            );
            return false;
        }
        let clamped = self.clamp(value);
        self.number.set_value(clamped);
        true
    }

    /// Stores a value without clamping or enabled checks.
    pub(crate) fn store_value(&mut self, value: f64) {
        self.number.set_value(value);
    }

    pub fn set_variance(&mut self, variance: Option<f64>) -> Result<()> {
        self.number.set_variance(variance)
    }

    pub fn set_error(&mut self, error: Option<f64>) -> Result<()> {
        self.number.set_error(error)
    }

    pub fn set_min(&mut self, min: f64) -> Result<()> {
        if min.is_nan() || min > self.value() {
            return Err(CoreError::Value(format!(
                "the current value ({}) is smaller than the desired min value ({min})",
                self.value()
            )));
        }
        self.min = min;
        Ok(())
    }

    pub fn set_max(&mut self, max: f64) -> Result<()> {
        if max.is_nan() || max < self.value() {
            return Err(CoreError::Value(format!(
                "the current value ({}) is greater than the desired max value ({max})",
                self.value()
            )));
        }
        self.max = max;
        Ok(())
    }

    /// Replaces both bounds and pulls the value inside them.
    pub(crate) fn replace_bounds(&mut self, min: f64, max: f64) {
        self.min = min;
        self.max = max;
        let clamped = self.clamp(self.value());
        self.number.set_value(clamped);
    }

    pub fn set_fixed(&mut self, fixed: bool) {
        self.fixed = fixed;
    }

    pub fn set_free(&mut self, free: bool) {
        self.fixed = !free;
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Converts value, variance and bounds into `unit`.
    pub fn convert_unit(&mut self, unit: &str) -> Result<()> {
        let target = Unit::parse(unit)?;
        let factor = self.unit().conversion_factor(&target)?;
        self.number.convert_to(&target)?;
        self.min *= factor;
        self.max *= factor;
        Ok(())
    }

    pub(crate) fn insert_user_constraint(&mut self, label: impl Into<String>, id: ConstraintId) {
        self.user_constraints.insert(label.into(), id);
    }

    pub(crate) fn remove_user_constraint(&mut self, label: &str) -> Option<ConstraintId> {
        self.user_constraints.shift_remove(label)
    }

    pub(crate) fn adopt_user_constraints(&mut self, from: &Parameter) {
        self.user_constraints = from.user_constraints.clone();
    }

    pub(crate) fn detach_constraint(&mut self, id: ConstraintId) {
        self.user_constraints.retain(|_, existing| *existing != id);
    }

    fn with_bounds(number: DescriptorNumber, (min, max): (f64, f64)) -> Self {
        let mut parameter = Parameter::from(number);
        parameter.min = min;
        parameter.max = max;
        parameter
    }

    fn bounds(&self) -> (f64, f64) {
        (self.min, self.max)
    }

    fn operand_bounds(&self, other: &Parameter) -> Result<(f64, f64)> {
        let factor = other.unit().conversion_factor(self.unit())?;
        Ok((other.min * factor, other.max * factor))
    }

    pub fn add_parameter(&self, other: &Parameter) -> Result<Self> {
        let number = self.number.add_number(&other.number)?;
        let (lo, hi) = self.operand_bounds(other)?;
        Ok(Self::with_bounds(number, (self.min + lo, self.max + hi)))
    }

    pub fn sub_parameter(&self, other: &Parameter) -> Result<Self> {
        let number = self.number.sub_number(&other.number)?;
        let (lo, hi) = self.operand_bounds(other)?;
        Ok(Self::with_bounds(number, (self.min - hi, self.max - lo)))
    }

    pub fn mul_parameter(&self, other: &Parameter) -> Result<Self> {
        let number = self.number.mul_number(&other.number)?;
        let factor = self.unit().mul(other.unit()).conversion_factor(number.unit())?;
        let (lo, hi) = interval_mul(self.bounds(), other.bounds());
        Ok(Self::with_bounds(number, (lo * factor, hi * factor)))
    }

    pub fn div_parameter(&self, other: &Parameter) -> Result<Self> {
        let number = self.number.div_number(&other.number)?;
        let factor = self.unit().div(other.unit()).conversion_factor(number.unit())?;
        let (lo, hi) = interval_div(self.bounds(), other.bounds());
        Ok(Self::with_bounds(number, (lo * factor, hi * factor)))
    }

    pub fn add_scalar(&self, other: f64) -> Result<Self> {
        let number = self.number.add_scalar(other)?;
        Ok(Self::with_bounds(number, (self.min + other, self.max + other)))
    }

    pub fn sub_scalar(&self, other: f64) -> Result<Self> {
        let number = self.number.sub_scalar(other)?;
        Ok(Self::with_bounds(number, (self.min - other, self.max - other)))
    }

    pub fn rsub_scalar(&self, other: f64) -> Result<Self> {
        let number = self.number.rsub_scalar(other)?;
        Ok(Self::with_bounds(number, (other - self.max, other - self.min)))
    }

    pub fn mul_scalar(&self, other: f64) -> Self {
        let number = self.number.mul_scalar(other);
        Self::with_bounds(number, interval_mul(self.bounds(), (other, other)))
    }

    pub fn div_scalar(&self, other: f64) -> Result<Self> {
        let number = self.number.div_scalar(other)?;
        Ok(Self::with_bounds(number, interval_div(self.bounds(), (other, other))))
    }

    pub fn rdiv_scalar(&self, other: f64) -> Result<Self> {
        let number = self.number.rdiv_scalar(other)?;
        Ok(Self::with_bounds(number, interval_div((other, other), self.bounds())))
    }

    pub fn pow(&self, exponent: f64) -> Result<Self> {
        let number = self.number.pow(exponent)?;
        Ok(Self::with_bounds(number, interval_pow(self.bounds(), exponent)))
    }

    pub fn abs(&self) -> Self {
        let (lo, hi) = self.bounds();
        let bounds = if lo <= 0.0 && hi >= 0.0 {
            (0.0, lo.abs().max(hi.abs()))
        } else {
            let (a, b) = (lo.abs(), hi.abs());
            (a.min(b), a.max(b))
        };
        Self::with_bounds(self.number.abs(), bounds)
    }
}

/// Product that treats `0 * inf` as zero.
fn bound_product(a: f64, b: f64) -> f64 {
    if a == 0.0 || b == 0.0 {
        0.0
    } else {
        a * b
    }
}

fn hull(candidates: &[f64]) -> (f64, f64) {
    candidates
        .iter()
        .filter(|c| !c.is_nan())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &c| {
            (lo.min(c), hi.max(c))
        })
}

fn interval_mul((a_lo, a_hi): (f64, f64), (b_lo, b_hi): (f64, f64)) -> (f64, f64) {
    hull(&[
        bound_product(a_lo, b_lo),
        bound_product(a_lo, b_hi),
        bound_product(a_hi, b_lo),
        bound_product(a_hi, b_hi),
    ])
}

fn interval_div(a: (f64, f64), (b_lo, b_hi): (f64, f64)) -> (f64, f64) {
    if b_lo <= 0.0 && b_hi >= 0.0 {
        return (f64::NEG_INFINITY, f64::INFINITY);
    }
    interval_mul(a, (1.0 / b_hi, 1.0 / b_lo))
}

fn interval_pow((lo, hi): (f64, f64), exponent: f64) -> (f64, f64) {
    let mut candidates = vec![lo.powf(exponent), hi.powf(exponent)];
    if lo < 0.0 && hi > 0.0 {
        candidates.push(0.0f64.powf(exponent));
    }
    let (min, max) = hull(&candidates);
    if min > max {
        (f64::NEG_INFINITY, f64::INFINITY)
    } else {
        (min, max)
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Parameter '{}': {:.4}", self.name(), self.value())?;
        if let Some(error) = self.error().filter(|e| *e != 0.0) {
            write!(f, " ± {error:.4}")?;
        }
        if !self.unit().is_dimensionless() {
            write!(f, " {}", self.unit())?;
        }
        if self.fixed {
            write!(f, " (fixed)")?;
        }
        write!(
            f,
            ", bounds=[{}:{}]>",
            format_float(self.min),
            format_float(self.max)
        )
    }
}

impl Neg for &Parameter {
    type Output = Parameter;

    fn neg(self) -> Parameter {
        Parameter::with_bounds(-&self.number, (-self.max, -self.min))
    }
}

macro_rules! parameter_ops {
    ($trait:ident, $method:ident, $with_param:ident, $with_scalar:expr, $scalar_first:expr) => {
        impl $trait<&Parameter> for &Parameter {
            type Output = Result<Parameter>;

            fn $method(self, rhs: &Parameter) -> Self::Output {
                self.$with_param(rhs)
            }
        }

        impl $trait<&DescriptorNumber> for &Parameter {
            type Output = Result<Parameter>;

            fn $method(self, rhs: &DescriptorNumber) -> Self::Output {
                let value = rhs.value();
                let other = Parameter::with_bounds(rhs.clone(), (value, value));
                self.$with_param(&other)
            }
        }

        impl $trait<f64> for &Parameter {
            type Output = Result<Parameter>;

            fn $method(self, rhs: f64) -> Self::Output {
                $with_scalar(self, rhs)
            }
        }

        impl $trait<&Parameter> for f64 {
            type Output = Result<Parameter>;

            fn $method(self, rhs: &Parameter) -> Self::Output {
                $scalar_first(self, rhs)
            }
        }
    };
}

fn renamed(mut parameter: Parameter, name: String) -> Parameter {
    parameter.number.meta.name = name;
    parameter
}

parameter_ops!(
    Add,
    add,
    add_parameter,
    |p: &Parameter, x: f64| p.add_scalar(x),
    |x: f64, p: &Parameter| p
        .add_scalar(x)
        .map(|r| renamed(r, format!("{} + {}", scalar_label(x), p.name())))
);
parameter_ops!(
    Sub,
    sub,
    sub_parameter,
    |p: &Parameter, x: f64| p.sub_scalar(x),
    |x: f64, p: &Parameter| p.rsub_scalar(x)
);
parameter_ops!(
    Mul,
    mul,
    mul_parameter,
    |p: &Parameter, x: f64| Ok(p.mul_scalar(x)),
    |x: f64, p: &Parameter| Ok(renamed(
        p.mul_scalar(x),
        format!("{} * {}", scalar_label(x), p.name())
    ))
);
parameter_ops!(
    Div,
    div,
    div_parameter,
    |p: &Parameter, x: f64| p.div_scalar(x),
    |x: f64, p: &Parameter| p.rdiv_scalar(x)
);
