//! Ready-made fit models.
//!
//! A model is a group registered in the session. The Rust values returned
//! here are lightweight handles holding the unique names of the group and its
//! parameters; the numbers themselves stay in the [`Session`].

use crate::error::{CoreError, Result};
use crate::objects::{BaseCollection, BaseObj};
use crate::session::Session;
use crate::traits::{FitModel, Scalar};
use crate::variable::{format_float, Descriptor, Parameter};
use std::fmt;

/// A coefficient given either as a plain value or as an existing parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Coefficient {
    Value(f64),
    Parameter(String),
}

impl From<f64> for Coefficient {
    fn from(value: f64) -> Self {
        Coefficient::Value(value)
    }
}

impl From<&str> for Coefficient {
    fn from(key: &str) -> Self {
        Coefficient::Parameter(key.to_string())
    }
}

impl From<String> for Coefficient {
    fn from(key: String) -> Self {
        Coefficient::Parameter(key)
    }
}

impl Coefficient {
    /// Unique name of the parameter behind this coefficient, registering a
    /// new one named `name` for plain values.
    fn register(self, session: &mut Session, name: &str) -> Result<String> {
        match self {
            Coefficient::Value(value) => session.add(Parameter::new(name, value)),
            Coefficient::Parameter(key) => {
                session.parameter(&key)?;
                Ok(key)
            }
        }
    }
}

fn values_of(session: &Session, keys: &[String]) -> Result<Vec<f64>> {
    keys.iter().map(|k| session.value(k)).collect()
}

/// Straight line `y = m·x + c`.
#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    key: String,
    m: String,
    c: String,
}

impl Line {
    pub const CLASS: &'static str = "Line";

    /// Registers a line with `m = 1` and `c = 0`.
    pub fn new(session: &mut Session) -> Result<Self> {
        Self::with_coefficients(session, 1.0, 0.0)
    }

    pub fn with_coefficients(
        session: &mut Session,
        m: impl Into<Coefficient>,
        c: impl Into<Coefficient>,
    ) -> Result<Self> {
        let m = m.into().register(session, "m")?;
        let c = c.into().register(session, "c")?;
        let key = session.add(
            BaseObj::with_class(Self::CLASS, "line")
                .with_child("m", &m)
                .with_child("c", &c),
        )?;
        Ok(Self { key, m, c })
    }

    /// Handle for a line group that is already registered (e.g. decoded).
    pub fn from_group(session: &Session, key: &str) -> Result<Self> {
        let group = session.group(key)?;
        if group.group_class() != Self::CLASS {
            return Err(CoreError::type_mismatch(Self::CLASS, group.group_class()));
        }
        let child = |attribute: &str| -> Result<String> {
            let child = group
                .child_key(attribute)
                .ok_or_else(|| CoreError::Attribute(format!("'{key}' has no attribute '{attribute}'")))?;
            session.parameter(child)?;
            Ok(child.to_string())
        };
        Ok(Self {
            key: key.to_string(),
            m: child("m")?,
            c: child("c")?,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn m(&self) -> &str {
        &self.m
    }

    pub fn c(&self) -> &str {
        &self.c
    }

    /// Evaluates the line at every `x` with the current parameter values.
    pub fn call(&self, session: &Session, x: &[f64]) -> Result<Vec<f64>> {
        let params = values_of(session, &self.parameter_keys())?;
        Ok(x.iter().map(|&xi| self.evaluate(&params, xi)).collect())
    }

    pub fn describe(&self, session: &Session) -> Result<String> {
        Ok(format!(
            "Line({}, {})",
            session.parameter(&self.m)?,
            session.parameter(&self.c)?
        ))
    }
}

impl FitModel for Line {
    fn parameter_keys(&self) -> Vec<String> {
        vec![self.m.clone(), self.c.clone()]
    }

    fn evaluate<T: Scalar>(&self, params: &[T], x: f64) -> T {
        params[0] * T::lift(x) + params[1]
    }
}

/// Polynomial whose first coefficient multiplies the highest power of `x`.
#[derive(Debug, Clone, PartialEq)]
pub struct Polynomial {
    key: String,
    collection: String,
    coefficients: Vec<String>,
}

impl Polynomial {
    pub const CLASS: &'static str = "Polynomial";

    /// Registers a polynomial. Plain values become parameters `c0`, `c1`, ...
    pub fn new<C: Into<Coefficient>>(
        session: &mut Session,
        name: &str,
        coefficients: impl IntoIterator<Item = C>,
    ) -> Result<Self> {
        let mut keys = Vec::new();
        for (index, coefficient) in coefficients.into_iter().enumerate() {
            keys.push(coefficient.into().register(session, &format!("c{index}"))?);
        }
        let collection = session.add(BaseCollection::new("coefficients").with_items(keys.clone()))?;
        let key = session.add(BaseObj::with_class(Self::CLASS, name).with_child("coefficients", &collection))?;
        Ok(Self {
            key,
            collection,
            coefficients: keys,
        })
    }

    pub fn from_group(session: &Session, key: &str) -> Result<Self> {
        let group = session.group(key)?;
        if group.group_class() != Self::CLASS {
            return Err(CoreError::type_mismatch(Self::CLASS, group.group_class()));
        }
        let collection = group
            .child_key("coefficients")
            .ok_or_else(|| CoreError::Attribute(format!("'{key}' has no attribute 'coefficients'")))?
            .to_string();
        let coefficients = session.collection(&collection)?.items().to_vec();
        for coefficient in &coefficients {
            session.parameter(coefficient)?;
        }
        Ok(Self {
            key: key.to_string(),
            collection,
            coefficients,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Unique name of the coefficient collection.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn coefficients(&self) -> &[String] {
        &self.coefficients
    }

    /// Re-reads the coefficient list after the collection was edited.
    pub fn refresh(&mut self, session: &Session) -> Result<()> {
        *self = Self::from_group(session, &self.key)?;
        Ok(())
    }

    pub fn call(&self, session: &Session, x: &[f64]) -> Result<Vec<f64>> {
        let params = values_of(session, &self.coefficients)?;
        Ok(x.iter().map(|&xi| self.evaluate(&params, xi)).collect())
    }

    /// `Polynomial(name, 1.0x^2 + 2.0x + 3.0)`. Zero terms of degree two and
    /// up are left out.
    pub fn describe(&self, session: &Session) -> Result<String> {
        let values = values_of(session, &self.coefficients)?;
        let degree = values.len().saturating_sub(1);
        let terms: Vec<String> = values
            .iter()
            .enumerate()
            .filter_map(|(i, &value)| {
                let power = degree - i;
                match power {
                    0 => Some(format_float(value)),
                    1 => Some(format!("{}x", format_float(value))),
                    _ if value == 0.0 => None,
                    _ => Some(format!("{}x^{power}", format_float(value))),
                }
            })
            .collect();
        let name = session.get(&self.key)?.name().to_string();
        Ok(format!("Polynomial({name}, {})", terms.join(" + ")))
    }
}

impl FitModel for Polynomial {
    fn parameter_keys(&self) -> Vec<String> {
        self.coefficients.clone()
    }

    fn evaluate<T: Scalar>(&self, params: &[T], x: f64) -> T {
        let x = T::lift(x);
        params.iter().fold(T::zero(), |acc, &c| acc * x + c)
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Line({}: m={}, c={})", self.key, self.m, self.c)
    }
}

impl fmt::Display for Polynomial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Polynomial({}: {})", self.key, self.coefficients.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| start + (stop - start) * i as f64 / (n - 1) as f64)
            .collect()
    }

    fn assert_allclose(a: &[f64], b: &[f64]) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() <= 1e-8 + 1e-5 * y.abs(), "{x} != {y}");
        }
    }

    #[test]
    fn line_from_values() {
        for (m, c) in [(1.0, 2.0), (-1.0, -2.0), (0.72, 6.48)] {
            let mut session = Session::new();
            let line = Line::with_coefficients(&mut session, m, c).unwrap();
            assert_eq!(session.value(line.m()).unwrap(), m);
            assert_eq!(session.value(line.c()).unwrap(), c);

            let x = linspace(0.0, 10.0, 100);
            let expected: Vec<f64> = x.iter().map(|xi| m * xi + c).collect();
            assert_allclose(&line.call(&session, &x).unwrap(), &expected);
        }
    }

    #[test]
    fn line_from_parameters() {
        let mut session = Session::new();
        let m = session.add(Parameter::new("m", 0.72)).unwrap();
        let c = session.add(Parameter::new("c", 6.48)).unwrap();
        let line = Line::with_coefficients(&mut session, m.as_str(), c.as_str()).unwrap();
        assert_eq!(line.m(), m);
        assert_eq!(line.call(&session, &[1.0]).unwrap(), vec![0.72 + 6.48]);
        assert_eq!(session.child(line.key(), "c").unwrap().unique_name(), Some(c.as_str()));
    }

    #[test]
    fn line_defaults_and_description() {
        let mut session = Session::new();
        let line = Line::new(&mut session).unwrap();
        assert_eq!(line.call(&session, &[3.0]).unwrap(), vec![3.0]);
        assert_eq!(
            line.describe(&session).unwrap(),
            "Line(<Parameter 'm': 1.0000, bounds=[-inf:inf]>, <Parameter 'c': 0.0000, bounds=[-inf:inf]>)"
        );
        assert_eq!(Line::from_group(&session, line.key()).unwrap(), line);
    }

    #[test]
    fn polynomial_uses_highest_power_first() {
        let cases: [&[f64]; 5] = [
            &[1.0],
            &[1.0, 2.0],
            &[1.0, 2.0, 3.0],
            &[-1.0, -2.0, -3.0],
            &[0.72, 6.48, -0.48],
        ];
        for coefficients in cases {
            let mut session = Session::new();
            let poly = Polynomial::new(&mut session, "polynomial", coefficients.iter().copied()).unwrap();
            let values: Vec<f64> = poly
                .coefficients()
                .iter()
                .map(|k| session.value(k).unwrap())
                .collect();
            assert_eq!(values, coefficients);

            let x = linspace(0.0, 10.0, 100);
            let expected: Vec<f64> = x
                .iter()
                .map(|&xi| coefficients.iter().fold(0.0, |acc, c| acc * xi + c))
                .collect();
            assert_allclose(&poly.call(&session, &x).unwrap(), &expected);
        }
    }

    #[test]
    fn polynomial_description_and_names() {
        let mut session = Session::new();
        let poly = Polynomial::new(&mut session, "poly", [3.0, 0.0, 2.0, 1.0]).unwrap();
        assert_eq!(session.get(&poly.coefficients()[2]).unwrap().name(), "c2");
        assert_eq!(poly.describe(&session).unwrap(), "Polynomial(poly, 3.0x^3 + 2.0x + 1.0)");
    }

    #[test]
    fn polynomial_refresh_tracks_collection_edits() {
        let mut session = Session::new();
        let mut poly = Polynomial::new(&mut session, "poly", [1.0, 2.0]).unwrap();
        let extra = session.add(Parameter::new("c2", 5.0)).unwrap();
        session.collection_push(poly.collection(), &extra).unwrap();
        poly.refresh(&session).unwrap();
        assert_eq!(poly.call(&session, &[2.0]).unwrap(), vec![4.0 + 4.0 + 5.0]);
    }

    #[test]
    fn from_group_checks_class() {
        let mut session = Session::new();
        let poly = Polynomial::new(&mut session, "poly", [1.0]).unwrap();
        assert!(matches!(Line::from_group(&session, poly.key()), Err(CoreError::Type { .. })));
    }
}
