use super::{impl_meta_builders, scalar_label, Descriptor, DescriptorMeta, DescriptorNumber};
use crate::error::{CoreError, Result};
use crate::units::Unit;
use nalgebra::DMatrix;
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};

/// A two-dimensional array of values sharing one unit, with optional
/// per-element variances.
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorArray {
    pub(crate) meta: DescriptorMeta,
    value: DMatrix<f64>,
    variance: Option<DMatrix<f64>>,
    unit: Unit,
}

impl_meta_builders!(DescriptorArray);

/// Builds a matrix from row vectors, rejecting ragged input.
pub(crate) fn matrix_from_rows(rows: &[Vec<f64>]) -> Result<DMatrix<f64>> {
    let n_rows = rows.len();
    let n_cols = rows.first().map_or(0, Vec::len);
    if let Some(bad) = rows.iter().position(|r| r.len() != n_cols) {
        return Err(CoreError::Value(format!(
            "rows must all have length {n_cols}, row {bad} has length {}",
            rows[bad].len()
        )));
    }
    Ok(DMatrix::from_fn(n_rows, n_cols, |i, j| rows[i][j]))
}

pub(crate) fn matrix_to_rows(matrix: &DMatrix<f64>) -> Vec<Vec<f64>> {
    matrix
        .row_iter()
        .map(|row| row.iter().copied().collect())
        .collect()
}

fn check_variance(value: &DMatrix<f64>, variance: Option<&DMatrix<f64>>, what: &str) -> Result<()> {
    let Some(variance) = variance else {
        return Ok(());
    };
    if variance.shape() != value.shape() {
        return Err(CoreError::Value(format!(
            "{what} shape {:?} must match the value shape {:?}",
            variance.shape(),
            value.shape()
        )));
    }
    if variance.iter().any(|v| *v < 0.0 || v.is_nan()) {
        return Err(CoreError::Value(format!(
            "{what} must only contain non-negative values"
        )));
    }
    Ok(())
}

fn sum_variances(a: Option<&DMatrix<f64>>, b: Option<DMatrix<f64>>) -> Option<DMatrix<f64>> {
    match (a, b) {
        (None, None) => None,
        (Some(a), None) => Some(a.clone()),
        (None, Some(b)) => Some(b),
        (Some(a), Some(b)) => Some(a + b),
    }
}

/// Element-wise `a²σb² + b²σa²`.
fn product_variance(
    a: &DMatrix<f64>,
    va: Option<&DMatrix<f64>>,
    b: &DMatrix<f64>,
    vb: Option<&DMatrix<f64>>,
) -> Option<DMatrix<f64>> {
    if va.is_none() && vb.is_none() {
        return None;
    }
    Some(DMatrix::from_fn(a.nrows(), a.ncols(), |i, j| {
        let (x, y) = (a[(i, j)], b[(i, j)]);
        x * x * vb.map_or(0.0, |v| v[(i, j)]) + y * y * va.map_or(0.0, |v| v[(i, j)])
    }))
}

/// Element-wise `σa²/b² + a²σb²/b⁴`.
fn quotient_variance(
    a: &DMatrix<f64>,
    va: Option<&DMatrix<f64>>,
    b: &DMatrix<f64>,
    vb: Option<&DMatrix<f64>>,
) -> Option<DMatrix<f64>> {
    if va.is_none() && vb.is_none() {
        return None;
    }
    Some(DMatrix::from_fn(a.nrows(), a.ncols(), |i, j| {
        let (x, y) = (a[(i, j)], b[(i, j)]);
        va.map_or(0.0, |v| v[(i, j)]) / (y * y) + x * x * vb.map_or(0.0, |v| v[(i, j)]) / y.powi(4)
    }))
}

impl DescriptorArray {
    /// A dimensionless array built from rows.
    pub fn new(name: impl Into<String>, rows: &[Vec<f64>]) -> Result<Self> {
        Ok(Self::from_matrix(name, matrix_from_rows(rows)?))
    }

    pub fn from_matrix(name: impl Into<String>, value: DMatrix<f64>) -> Self {
        Self {
            meta: DescriptorMeta::new(name),
            value,
            variance: None,
            unit: Unit::dimensionless(),
        }
    }

    pub(crate) fn restore(
        meta: DescriptorMeta,
        value: DMatrix<f64>,
        variance: Option<DMatrix<f64>>,
        unit: Unit,
    ) -> Result<Self> {
        check_variance(&value, variance.as_ref(), "variance")?;
        Ok(Self {
            meta,
            value,
            variance,
            unit,
        })
    }

    pub fn with_unit(self, unit: &str) -> Result<Self> {
        Ok(self.with_parsed_unit(Unit::parse(unit)?))
    }

    pub fn with_parsed_unit(mut self, unit: Unit) -> Self {
        self.unit = unit;
        self.fold_unit_multiplier();
        self
    }

    pub fn with_variance(mut self, rows: &[Vec<f64>]) -> Result<Self> {
        self.set_variance(Some(matrix_from_rows(rows)?))?;
        Ok(self)
    }

    pub fn with_error(mut self, rows: &[Vec<f64>]) -> Result<Self> {
        self.set_error(Some(matrix_from_rows(rows)?))?;
        Ok(self)
    }

    fn fold_unit_multiplier(&mut self) {
        if self.unit.multiplier() != 1.0 {
            let base = self.unit.base_unit();
            let factor = self.unit.si_scale() / base.si_scale();
            self.scale(factor);
            self.unit = base;
        }
    }

    fn scale(&mut self, factor: f64) {
        self.value *= factor;
        if let Some(variance) = self.variance.as_mut() {
            *variance *= factor * factor;
        }
    }

    pub fn value(&self) -> &DMatrix<f64> {
        &self.value
    }

    pub fn shape(&self) -> (usize, usize) {
        self.value.shape()
    }

    /// Replaces the values; the shape must stay the same.
    pub fn set_value(&mut self, value: DMatrix<f64>) -> Result<()> {
        if value.shape() != self.value.shape() {
            return Err(CoreError::Value(format!(
                "new values of shape {:?} must match the existing shape {:?}",
                value.shape(),
                self.value.shape()
            )));
        }
        self.value = value;
        Ok(())
    }

    pub fn variance(&self) -> Option<&DMatrix<f64>> {
        self.variance.as_ref()
    }

    pub fn set_variance(&mut self, variance: Option<DMatrix<f64>>) -> Result<()> {
        check_variance(&self.value, variance.as_ref(), "variance")?;
        self.variance = variance;
        Ok(())
    }

    pub fn error(&self) -> Option<DMatrix<f64>> {
        self.variance.as_ref().map(|v| v.map(f64::sqrt))
    }

    pub fn set_error(&mut self, error: Option<DMatrix<f64>>) -> Result<()> {
        check_variance(&self.value, error.as_ref(), "error")?;
        self.variance = error.map(|e| e.component_mul(&e));
        Ok(())
    }

    pub fn unit(&self) -> &Unit {
        &self.unit
    }

    pub fn base_unit(&self) -> Unit {
        self.unit.base_unit()
    }

    pub fn convert_unit(&mut self, unit: &str) -> Result<()> {
        let target = Unit::parse(unit)?;
        let factor = self.unit.conversion_factor(&target)?;
        self.scale(factor);
        self.unit = target;
        Ok(())
    }

    fn derived(&self, name: String, value: DMatrix<f64>, variance: Option<DMatrix<f64>>, unit: Unit) -> Self {
        let mut out = Self {
            meta: DescriptorMeta::new(name),
            value,
            variance,
            unit,
        };
        out.fold_unit_multiplier();
        out
    }

    fn require_dimensionless(&self, action: &str) -> Result<()> {
        if self.unit.is_dimensionless() {
            Ok(())
        } else {
            Err(CoreError::Unit(format!(
                "{action} is only allowed for dimensionless arrays, '{}' has unit '{}'",
                self.name(),
                self.unit
            )))
        }
    }

    fn require_shape(&self, shape: (usize, usize)) -> Result<()> {
        if shape == self.value.shape() {
            Ok(())
        } else {
            Err(CoreError::Value(format!(
                "shape {shape:?} must match the shape {:?} of '{}'",
                self.value.shape(),
                self.name()
            )))
        }
    }

    fn broadcast(&self, value: f64) -> DMatrix<f64> {
        DMatrix::from_element(self.value.nrows(), self.value.ncols(), value)
    }

    pub fn add_scalar(&self, other: f64) -> Result<Self> {
        self.require_dimensionless("addition of numbers")?;
        Ok(self.derived(
            format!("{} + {}", self.name(), scalar_label(other)),
            self.value.add_scalar(other),
            self.variance.clone(),
            self.unit.clone(),
        ))
    }

    pub fn add_matrix(&self, other: &DMatrix<f64>) -> Result<Self> {
        self.require_dimensionless("addition of plain matrices")?;
        self.require_shape(other.shape())?;
        Ok(self.derived(
            self.name().to_string(),
            &self.value + other,
            self.variance.clone(),
            self.unit.clone(),
        ))
    }

    pub fn add_array(&self, other: &DescriptorArray) -> Result<Self> {
        let (value, variance) = self.aligned(other, "added")?;
        Ok(self.derived(
            format!("{} + {}", self.name(), other.name()),
            &self.value + value,
            sum_variances(self.variance.as_ref(), variance),
            self.unit.clone(),
        ))
    }

    pub fn sub_scalar(&self, other: f64) -> Result<Self> {
        self.add_scalar(-other).map(|mut out| {
            out.meta.name = format!("{} - {}", self.name(), scalar_label(other));
            out
        })
    }

    pub fn sub_matrix(&self, other: &DMatrix<f64>) -> Result<Self> {
        self.add_matrix(&-other)
    }

    pub fn sub_array(&self, other: &DescriptorArray) -> Result<Self> {
        let (value, variance) = self.aligned(other, "subtracted")?;
        Ok(self.derived(
            format!("{} - {}", self.name(), other.name()),
            &self.value - value,
            sum_variances(self.variance.as_ref(), variance),
            self.unit.clone(),
        ))
    }

    /// `other` converted into this array's unit, checked for shape.
    fn aligned(&self, other: &DescriptorArray, verb: &str) -> Result<(DMatrix<f64>, Option<DMatrix<f64>>)> {
        let factor = other.unit.conversion_factor(&self.unit).map_err(|_| {
            CoreError::Unit(format!(
                "values with units '{}' and '{}' cannot be {verb}",
                self.unit, other.unit
            ))
        })?;
        self.require_shape(other.value.shape())?;
        Ok((
            &other.value * factor,
            other.variance.as_ref().map(|v| v * (factor * factor)),
        ))
    }

    pub fn mul_scalar(&self, other: f64) -> Self {
        self.derived(
            format!("{} * {}", self.name(), scalar_label(other)),
            &self.value * other,
            self.variance.as_ref().map(|v| v * (other * other)),
            self.unit.clone(),
        )
    }

    pub fn mul_number(&self, other: &DescriptorNumber) -> Self {
        let b = self.broadcast(other.value());
        let vb = other.variance().map(|v| self.broadcast(v));
        self.derived(
            format!("{} * {}", self.name(), other.name()),
            &self.value * other.value(),
            product_variance(&self.value, self.variance.as_ref(), &b, vb.as_ref()),
            self.unit.mul(other.unit()),
        )
    }

    /// Element-wise product.
    pub fn mul_array(&self, other: &DescriptorArray) -> Result<Self> {
        self.require_shape(other.value.shape())?;
        Ok(self.derived(
            format!("{} * {}", self.name(), other.name()),
            self.value.component_mul(&other.value),
            product_variance(&self.value, self.variance.as_ref(), &other.value, other.variance.as_ref()),
            self.unit.mul(&other.unit),
        ))
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
            &self.value / other,
            self.variance.as_ref().map(|v| v / (other * other)),
            self.unit.clone(),
        ))
    }

    pub fn div_number(&self, other: &DescriptorNumber) -> Result<Self> {
        if other.value() == 0.0 {
            return Err(CoreError::ZeroDivision(format!(
                "cannot divide '{}' by '{}' with value zero",
                self.name(),
                other.name()
            )));
        }
        let b = self.broadcast(other.value());
        let vb = other.variance().map(|v| self.broadcast(v));
        Ok(self.derived(
            format!("{} / {}", self.name(), other.name()),
            &self.value / other.value(),
            quotient_variance(&self.value, self.variance.as_ref(), &b, vb.as_ref()),
            self.unit.div(other.unit()),
        ))
    }

    /// Element-wise quotient.
    pub fn div_array(&self, other: &DescriptorArray) -> Result<Self> {
        self.require_shape(other.value.shape())?;
        if other.value.iter().any(|v| *v == 0.0) {
            return Err(CoreError::ZeroDivision(format!(
                "'{}' contains zero elements",
                other.name()
            )));
        }
        Ok(self.derived(
            format!("{} / {}", self.name(), other.name()),
            self.value.component_div(&other.value),
            quotient_variance(&self.value, self.variance.as_ref(), &other.value, other.variance.as_ref()),
            self.unit.div(&other.unit),
        ))
    }

    pub fn abs(&self) -> Self {
        self.derived(
            format!("abs({})", self.name()),
            self.value.abs(),
            self.variance.clone(),
            self.unit.clone(),
        )
    }
}

const SUMMARY_EDGE: usize = 3;
const SUMMARY_THRESHOLD: usize = 10;

fn summarize(matrix: &DMatrix<f64>) -> String {
    let summarized = matrix.len() > SUMMARY_THRESHOLD;
    let pick = |n: usize| -> Vec<Option<usize>> {
        if summarized && n > 2 * SUMMARY_EDGE {
            (0..SUMMARY_EDGE)
                .map(Some)
                .chain(std::iter::once(None))
                .chain((n - SUMMARY_EDGE..n).map(Some))
                .collect()
        } else {
            (0..n).map(Some).collect()
        }
    };
    let cols = pick(matrix.ncols());
    let rows: Vec<String> = pick(matrix.nrows())
        .into_iter()
        .map(|row| match row {
            None => "...".to_string(),
            Some(i) => {
                let cells: Vec<String> = cols
                    .iter()
                    .map(|col| match col {
                        None => "...".to_string(),
                        Some(j) => format!("{:.4}", matrix[(i, *j)]),
                    })
                    .collect();
                format!("[{}]", cells.join(" "))
            }
        })
        .collect();
    format!("[{}]", rows.join(" "))
}

impl fmt::Display for DescriptorArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<DescriptorArray '{}': values={}", self.name(), summarize(&self.value))?;
        if let Some(error) = self.error() {
            write!(f, ", errors={}", summarize(&error))?;
        }
        if !self.unit.is_dimensionless() {
            write!(f, ", unit={}", self.unit)?;
        }
        write!(f, ">")
    }
}

impl Neg for &DescriptorArray {
    type Output = DescriptorArray;

    fn neg(self) -> DescriptorArray {
        self.derived(
            format!("-{}", self.name()),
            -&self.value,
            self.variance.clone(),
            self.unit.clone(),
        )
    }
}

impl Add<&DescriptorArray> for &DescriptorArray {
    type Output = Result<DescriptorArray>;

    fn add(self, rhs: &DescriptorArray) -> Self::Output {
        self.add_array(rhs)
    }
}

impl Add<f64> for &DescriptorArray {
    type Output = Result<DescriptorArray>;

    fn add(self, rhs: f64) -> Self::Output {
        self.add_scalar(rhs)
    }
}

impl Add<&DescriptorArray> for f64 {
    type Output = Result<DescriptorArray>;

    fn add(self, rhs: &DescriptorArray) -> Self::Output {
        rhs.add_scalar(self)
    }
}

impl Add<&DMatrix<f64>> for &DescriptorArray {
    type Output = Result<DescriptorArray>;

    fn add(self, rhs: &DMatrix<f64>) -> Self::Output {
        self.add_matrix(rhs)
    }
}

impl Sub<&DescriptorArray> for &DescriptorArray {
    type Output = Result<DescriptorArray>;

    fn sub(self, rhs: &DescriptorArray) -> Self::Output {
        self.sub_array(rhs)
    }
}

impl Sub<f64> for &DescriptorArray {
    type Output = Result<DescriptorArray>;

    fn sub(self, rhs: f64) -> Self::Output {
        self.sub_scalar(rhs)
    }
}

impl Sub<&DMatrix<f64>> for &DescriptorArray {
    type Output = Result<DescriptorArray>;

    fn sub(self, rhs: &DMatrix<f64>) -> Self::Output {
        self.sub_matrix(rhs)
    }
}

impl Mul<&DescriptorArray> for &DescriptorArray {
    type Output = Result<DescriptorArray>;

    fn mul(self, rhs: &DescriptorArray) -> Self::Output {
        self.mul_array(rhs)
    }
}

impl Mul<f64> for &DescriptorArray {
    type Output = DescriptorArray;

    fn mul(self, rhs: f64) -> Self::Output {
        self.mul_scalar(rhs)
    }
}

impl Mul<&DescriptorNumber> for &DescriptorArray {
    type Output = DescriptorArray;

    fn mul(self, rhs: &DescriptorNumber) -> Self::Output {
        self.mul_number(rhs)
    }
}

impl Div<&DescriptorArray> for &DescriptorArray {
    type Output = Result<DescriptorArray>;

    fn div(self, rhs: &DescriptorArray) -> Self::Output {
        self.div_array(rhs)
    }
}

impl Div<f64> for &DescriptorArray {
    type Output = Result<DescriptorArray>;

    fn div(self, rhs: f64) -> Self::Output {
        self.div_scalar(rhs)
    }
}

impl Div<&DescriptorNumber> for &DescriptorArray {
    type Output = Result<DescriptorArray>;

    fn div(self, rhs: &DescriptorNumber) -> Self::Output {
        self.div_number(rhs)
    }
}
