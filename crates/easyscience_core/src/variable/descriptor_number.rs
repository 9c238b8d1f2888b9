use super::{impl_meta_builders, scalar_label, Descriptor, DescriptorMeta};
use crate::error::{CoreError, Result};
use crate::units::Unit;
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};

/// Read-only snapshot of a number's value, variance and unit.
#[derive(Debug, Clone, PartialEq)]
pub struct FullValue {
    pub value: f64,
    pub variance: Option<f64>,
    pub unit: Unit,
}

/// A scalar value with a unit and an optional variance.
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorNumber {
    pub(crate) meta: DescriptorMeta,
    value: f64,
    variance: Option<f64>,
    unit: Unit,
}

impl_meta_builders!(DescriptorNumber);

fn check_variance(variance: Option<f64>) -> Result<()> {
    match variance {
        Some(v) if v < 0.0 || v.is_nan() => Err(CoreError::Value(format!(
            "variance must be non-negative, got {v}"
        ))),
        _ => Ok(()),
    }
}

fn error_to_variance(error: Option<f64>) -> Result<Option<f64>> {
    match error {
        Some(e) if e < 0.0 || e.is_nan() => Err(CoreError::Value(format!(
            "error must be non-negative, got {e}"
        ))),
        other => Ok(other.map(|e| e * e)),
    }
}

fn sum_variances(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (None, None) => None,
        (a, b) => Some(a.unwrap_or(0.0) + b.unwrap_or(0.0)),
    }
}

impl DescriptorNumber {
    /// A dimensionless number without variance.
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            meta: DescriptorMeta::new(name),
            value,
            variance: None,
            unit: Unit::dimensionless(),
        }
    }

    /// Sets the unit from text. Numeric multipliers in the unit are folded into
    /// the value (`2` in `"10dm^2"` becomes `0.2 m^2`).
    pub fn with_unit(self, unit: &str) -> Result<Self> {
        Ok(self.with_parsed_unit(Unit::parse(unit)?))
    }

    pub fn with_parsed_unit(mut self, unit: Unit) -> Self {
        self.unit = unit;
        self.fold_unit_multiplier();
        self
    }

    pub fn with_variance(mut self, variance: f64) -> Result<Self> {
        self.set_variance(Some(variance))?;
        Ok(self)
    }

    pub fn with_error(mut self, error: f64) -> Result<Self> {
        self.set_error(Some(error))?;
        Ok(self)
    }

    /// Builds a descriptor from a full value snapshot.
    pub fn from_full_value(name: impl Into<String>, full_value: FullValue) -> Result<Self> {
        check_variance(full_value.variance)?;
        let mut number = Self {
            meta: DescriptorMeta::new(name),
            value: full_value.value,
            variance: full_value.variance,
            unit: full_value.unit,
        };
        number.fold_unit_multiplier();
        Ok(number)
    }

    /// Rebuilds a stored descriptor exactly, keeping any unit multiplier.
    pub(crate) fn restore(meta: DescriptorMeta, value: f64, variance: Option<f64>, unit: Unit) -> Result<Self> {
        check_variance(variance)?;
        Ok(Self {
            meta,
            value,
            variance,
            unit,
        })
    }

    fn fold_unit_multiplier(&mut self) {
        if self.unit.multiplier() != 1.0 {
            let base = self.unit.base_unit();
            // Same dimension by construction.
            let factor = self.unit.si_scale() / base.si_scale();
            self.scale(factor);
            self.unit = base;
        }
    }

    fn scale(&mut self, factor: f64) {
        self.value *= factor;
        self.variance = self.variance.map(|v| v * factor * factor);
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn set_value(&mut self, value: f64) {
        self.value = value;
    }

    pub fn unit(&self) -> &Unit {
        &self.unit
    }

    pub fn variance(&self) -> Option<f64> {
        self.variance
    }

    pub fn set_variance(&mut self, variance: Option<f64>) -> Result<()> {
        check_variance(variance)?;
        self.variance = variance;
        Ok(())
    }

    /// Standard deviation, the square root of the variance.
    pub fn error(&self) -> Option<f64> {
        self.variance.map(f64::sqrt)
    }

    pub fn set_error(&mut self, error: Option<f64>) -> Result<()> {
        self.variance = error_to_variance(error)?;
        Ok(())
    }

    pub fn full_value(&self) -> FullValue {
        FullValue {
            value: self.value,
            variance: self.variance,
            unit: self.unit.clone(),
        }
    }

    /// Converts value and variance into `unit`.
    pub fn convert_unit(&mut self, unit: &str) -> Result<()> {
        let target = Unit::parse(unit)?;
        self.convert_to(&target)
    }

    pub(crate) fn convert_to(&mut self, target: &Unit) -> Result<()> {
        let factor = self.unit.conversion_factor(target)?;
        self.scale(factor);
        self.unit = target.clone();
        Ok(())
    }

    /// The unit without its numeric multiplier.
    pub fn base_unit(&self) -> Unit {
        self.unit.base_unit()
    }

    fn derived(&self, name: String, value: f64, variance: Option<f64>, unit: Unit) -> Self {
        Self {
            meta: DescriptorMeta::new(name),
            value,
            variance,
            unit,
        }
    }

    fn to_base_unit(mut self) -> Self {
        self.fold_unit_multiplier();
        self
    }

    fn require_dimensionless(&self, action: &str) -> Result<()> {
        if self.unit.is_dimensionless() {
            Ok(())
        } else {
            Err(CoreError::Unit(format!(
                "numbers can only be {action} dimensionless values, '{}' has unit '{}'",
                self.name(),
                self.unit
            )))
        }
    }

    pub fn add_number(&self, other: &DescriptorNumber) -> Result<Self> {
        let factor = other.unit.conversion_factor(&self.unit).map_err(|_| {
            CoreError::Unit(format!(
                "values with units '{}' and '{}' cannot be added",
                self.unit, other.unit
            ))
        })?;
        Ok(self.derived(
            format!("{} + {}", self.name(), other.name()),
            self.value + other.value * factor,
            sum_variances(self.variance, other.variance.map(|v| v * factor * factor)),
            self.unit.clone(),
        ))
    }

    pub fn add_scalar(&self, other: f64) -> Result<Self> {
        self.require_dimensionless("added to")?;
        Ok(self.derived(
            format!("{} + {}", self.name(), scalar_label(other)),
            self.value + other,
            self.variance,
            self.unit.clone(),
        ))
    }

    pub fn sub_number(&self, other: &DescriptorNumber) -> Result<Self> {
        let factor = other.unit.conversion_factor(&self.unit).map_err(|_| {
            CoreError::Unit(format!(
                "values with units '{}' and '{}' cannot be subtracted",
                self.unit, other.unit
            ))
        })?;
        Ok(self.derived(
            format!("{} - {}", self.name(), other.name()),
            self.value - other.value * factor,
            sum_variances(self.variance, other.variance.map(|v| v * factor * factor)),
            self.unit.clone(),
        ))
    }

    pub fn sub_scalar(&self, other: f64) -> Result<Self> {
        self.require_dimensionless("subtracted from")?;
        Ok(self.derived(
            format!("{} - {}", self.name(), scalar_label(other)),
            self.value - other,
            self.variance,
            self.unit.clone(),
        ))
    }

    /// `other - self`.
    pub fn rsub_scalar(&self, other: f64) -> Result<Self> {
        self.require_dimensionless("subtracted from")?;
        Ok(self.derived(
            format!("{} - {}", scalar_label(other), self.name()),
            other - self.value,
            self.variance,
            self.unit.clone(),
        ))
    }

    pub fn mul_number(&self, other: &DescriptorNumber) -> Result<Self> {
        let (a, b) = (self.value, other.value);
        let variance = match (self.variance, other.variance) {
            (None, None) => None,
            (va, vb) => Some(a * a * vb.unwrap_or(0.0) + b * b * va.unwrap_or(0.0)),
        };
        Ok(self
            .derived(
                format!("{} * {}", self.name(), other.name()),
                a * b,
                variance,
                self.unit.mul(&other.unit),
            )
            .to_base_unit())
    }

    pub fn mul_scalar(&self, other: f64) -> Self {
        self.derived(
            format!("{} * {}", self.name(), scalar_label(other)),
            self.value * other,
            self.variance.map(|v| v * other * other),
            self.unit.clone(),
        )
    }

    pub fn div_number(&self, other: &DescriptorNumber) -> Result<Self> {
        let (a, b) = (self.value, other.value);
        if b == 0.0 {
            return Err(CoreError::ZeroDivision(format!(
                "cannot divide '{}' by '{}' with value zero",
                self.name(),
                other.name()
            )));
        }
        let variance = match (self.variance, other.variance) {
            (None, None) => None,
            (va, vb) => Some(va.unwrap_or(0.0) / (b * b) + a * a * vb.unwrap_or(0.0) / b.powi(4)),
        };
        Ok(self
            .derived(
                format!("{} / {}", self.name(), other.name()),
                a / b,
                variance,
                self.unit.div(&other.unit),
            )
            .to_base_unit())
    }

    pub fn div_scalar(&self, other: f64) -> Result<Self> {
        if other == 0.0 {
            return Err(CoreError::ZeroDivision(format!(
                "cannot divide '{}' by zero",
                self.name()
            )));
        }
        Ok(self.derived(
            format!("{} / {}", self.name(), scalar_label(other)),
            self.value / other,
            self.variance.map(|v| v / (other * other)),
            self.unit.clone(),
        ))
    }

    /// `other / self`.
    pub fn rdiv_scalar(&self, other: f64) -> Result<Self> {
        let a = self.value;
        if a == 0.0 {
            return Err(CoreError::ZeroDivision(format!(
                "cannot divide by '{}' with value zero",
                self.name()
            )));
        }
        Ok(self
            .derived(
                format!("{} / {}", scalar_label(other), self.name()),
                other / a,
                self.variance.map(|v| other * other * v / a.powi(4)),
                self.unit.recip(),
            )
            .to_base_unit())
    }

    pub fn pow(&self, exponent: f64) -> Result<Self> {
        self.pow_named(exponent, format!("{} ** {}", self.name(), scalar_label(exponent)))
    }

    /// Raise to a dimensionless, variance-free descriptor.
    pub fn pow_number(&self, exponent: &DescriptorNumber) -> Result<Self> {
        exponent.check_exponent()?;
        self.pow_named(exponent.value, format!("{} ** {}", self.name(), exponent.name()))
    }

    /// `base ** exponent` for a plain number base.
    pub fn rpow(base: f64, exponent: &DescriptorNumber) -> Result<f64> {
        exponent.check_exponent()?;
        Ok(base.powf(exponent.value))
    }

    fn check_exponent(&self) -> Result<()> {
        if !self.unit.is_dimensionless() {
            return Err(CoreError::Unit(format!(
                "exponents must be dimensionless, '{}' has unit '{}'",
                self.name(),
                self.unit
            )));
        }
        if self.variance.is_some() {
            return Err(CoreError::Value(format!(
                "exponents must not have variance, '{}' does",
                self.name()
            )));
        }
        Ok(())
    }

    fn pow_named(&self, exponent: f64, name: String) -> Result<Self> {
        let unit = self.unit.powf(exponent)?;
        let a = self.value;
        let value = a.powf(exponent);
        if value.is_nan() {
            return Err(CoreError::Value(format!(
                "the result of {name} is not a number"
            )));
        }
        let variance = self.variance.map(|v| {
            let slope = exponent * a.powf(exponent - 1.0);
            slope * slope * v
        });
        Ok(self.derived(name, value, variance, unit))
    }

    pub fn abs(&self) -> Self {
        self.derived(
            format!("abs({})", self.name()),
            self.value.abs(),
            self.variance,
            self.unit.clone(),
        )
    }
}

impl fmt::Display for DescriptorNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} '{}': {:.4}", self.class_name(), self.name(), self.value)?;
        if let Some(variance) = self.variance.filter(|v| *v != 0.0) {
            write!(f, " ± {:.4}", variance.sqrt())?;
        }
        if !self.unit.is_dimensionless() {
            write!(f, " {}", self.unit)?;
        }
        write!(f, ">")
    }
}

impl Neg for &DescriptorNumber {
    type Output = DescriptorNumber;

    fn neg(self) -> DescriptorNumber {
        self.derived(
            format!("-{}", self.name()),
            -self.value,
            self.variance,
            self.unit.clone(),
        )
    }
}

macro_rules! number_ops {
    ($trait:ident, $method:ident, $with_number:ident, $with_scalar:expr, $scalar_first:expr) => {
        impl $trait<&DescriptorNumber> for &DescriptorNumber {
            type Output = Result<DescriptorNumber>;

            fn $method(self, rhs: &DescriptorNumber) -> Self::Output {
                self.$with_number(rhs)
            }
        }

        impl $trait<f64> for &DescriptorNumber {
            type Output = Result<DescriptorNumber>;

            fn $method(self, rhs: f64) -> Self::Output {
                $with_scalar(self, rhs)
            }
        }

        impl $trait<&DescriptorNumber> for f64 {
            type Output = Result<DescriptorNumber>;

            fn $method(self, rhs: &DescriptorNumber) -> Self::Output {
                $scalar_first(self, rhs)
            }
        }
    };
}

number_ops!(
    Add,
    add,
    add_number,
    |d: &DescriptorNumber, x: f64| d.add_scalar(x),
    |x: f64, d: &DescriptorNumber| d.add_scalar(x).map(|mut r| {
        r.meta.name = format!("{} + {}", scalar_label(x), d.name());
        r
    })
);
number_ops!(
    Sub,
    sub,
    sub_number,
    |d: &DescriptorNumber, x: f64| d.sub_scalar(x),
    |x: f64, d: &DescriptorNumber| d.rsub_scalar(x)
);
number_ops!(
    Mul,
    mul,
    mul_number,
    |d: &DescriptorNumber, x: f64| Ok(d.mul_scalar(x)),
    |x: f64, d: &DescriptorNumber| {
        let mut r = d.mul_scalar(x);
        r.meta.name = format!("{} * {}", scalar_label(x), d.name());
        Ok(r)
    }
);
number_ops!(
    Div,
    div,
    div_number,
    |d: &DescriptorNumber, x: f64| d.div_scalar(x),
    |x: f64, d: &DescriptorNumber| d.rdiv_scalar(x)
);
