//! Relations between parameters.
//!
//! A [`Constraint`] computes a value for its *dependent* parameter, either from
//! the dependent's own value (comparisons against a number or its own bounds)
//! or from other *independent* parameters (expressions and functions).
//! Constraints with independents are *external*: registering one disables the
//! dependent so that it only changes through the constraint.
//!
//! Constraints are registered in a [`Session`] and attached to parameters by
//! label. Setting a parameter's value runs the constraints attached to it.

use crate::error::{CoreError, Result};
use crate::expression::CompiledExpression;
use crate::objects::Object;
use crate::session::{Command, Session};
use crate::variable::Parameter;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Longest chain of constraints one value write may trigger.
pub const MAX_CONSTRAINT_DEPTH: usize = 32;

/// Handle of a registered constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConstraintId(pub(crate) u64);

impl fmt::Display for ConstraintId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "constraint#{}", self.0)
    }
}

/// Relational operator of a comparison constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Equal,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
}

impl Comparison {
    pub fn symbol(self) -> &'static str {
        match self {
            Comparison::Equal => "=",
            Comparison::Less => "<",
            Comparison::LessEqual => "<=",
            Comparison::Greater => ">",
            Comparison::GreaterEqual => ">=",
        }
    }

    pub fn holds(self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::Equal => value == threshold,
            Comparison::Less => value < threshold,
            Comparison::LessEqual => value <= threshold,
            Comparison::Greater => value > threshold,
            Comparison::GreaterEqual => value >= threshold,
        }
    }

    /// `value` when the comparison holds, otherwise `threshold`.
    pub fn enforce(self, value: f64, threshold: f64) -> f64 {
        if self.holds(value, threshold) {
            value
        } else {
            threshold
        }
    }
}

impl FromStr for Comparison {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "=" | "==" => Ok(Comparison::Equal),
            "<" => Ok(Comparison::Less),
            "<=" => Ok(Comparison::LessEqual),
            ">" => Ok(Comparison::Greater),
            ">=" => Ok(Comparison::GreaterEqual),
            other => Err(CoreError::Expression(format!(
                "unknown comparison operator '{other}'"
            ))),
        }
    }
}

/// Which of a parameter's own bounds a [`ConstraintKind::SelfBound`] uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    Min,
    Max,
}

pub type NativeFunction = Arc<dyn Fn(&[f64]) -> f64 + Send + Sync>;

/// Function of a [`ConstraintKind::Functional`] constraint.
#[derive(Clone)]
pub enum ConstraintFunction {
    Native(NativeFunction),
    Expression(CompiledExpression),
}

impl ConstraintFunction {
    fn call(&self, values: &[f64]) -> Result<f64> {
        match self {
            ConstraintFunction::Native(f) => Ok(f(values)),
            ConstraintFunction::Expression(e) => e.evaluate(values),
        }
    }
}

impl fmt::Debug for ConstraintFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstraintFunction::Native(_) => f.write_str("Native(<fn>)"),
            ConstraintFunction::Expression(e) => f.debug_tuple("Expression").field(&e.source()).finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ConstraintKind {
    /// `dependent <op> value`, replaced by `value` when false.
    Numeric { operator: Comparison, value: f64 },
    /// `dependent <op> own bound`, replaced by the bound when false.
    SelfBound { operator: Comparison, bound: Bound },
    /// `dependent = <operator> independent`, e.g. `"2*"`.
    Object {
        operator: String,
        expression: CompiledExpression,
    },
    /// `dependent = value - (i0 op0 i1 op1 i2 ...)`.
    MultiObject {
        operators: Vec<String>,
        value: f64,
        expression: CompiledExpression,
    },
    /// `dependent = f(independents)`, or `f(dependent)` without independents.
    Functional { function: ConstraintFunction },
}

#[derive(Debug, Clone)]
pub struct Constraint {
    dependent: String,
    independents: Vec<String>,
    kind: ConstraintKind,
    enabled: bool,
}

fn check_not_self_referencing(dependent: &str, independents: &[String]) -> Result<()> {
    if independents.iter().any(|i| i == dependent) {
        return Err(CoreError::Attribute(
            "a dependent object can not be an independent object".to_string(),
        ));
    }
    Ok(())
}

fn owned(keys: &[&str]) -> Vec<String> {
    keys.iter().map(|k| k.to_string()).collect()
}

impl Constraint {
    fn build(dependent: &str, independents: Vec<String>, kind: ConstraintKind) -> Result<Self> {
        check_not_self_referencing(dependent, &independents)?;
        Ok(Self {
            dependent: dependent.to_string(),
            independents,
            kind,
            enabled: true,
        })
    }

    pub fn numeric(dependent: &str, operator: &str, value: f64) -> Result<Self> {
        let operator = operator.parse()?;
        Self::build(dependent, Vec::new(), ConstraintKind::Numeric { operator, value })
    }

    pub fn self_bound(dependent: &str, operator: &str, bound: Bound) -> Result<Self> {
        let operator = operator.parse()?;
        Self::build(dependent, Vec::new(), ConstraintKind::SelfBound { operator, bound })
    }

    /// `dependent = <operator> independent`. The operator is any expression
    /// prefix such as `"2*"`, `"1 +"`, `"4.5/"` or `""`.
    pub fn object(dependent: &str, operator: &str, independent: &str) -> Result<Self> {
        let expression = CompiledExpression::new(&format!("{operator} x"), &["x"])?;
        Self::build(
            dependent,
            vec![independent.to_string()],
            ConstraintKind::Object {
                operator: operator.to_string(),
                expression,
            },
        )
    }

    /// `dependent = value - (i0 op0 i1 op1 ...)`; one operator between each
    /// pair of independents.
    pub fn multi_object(dependent: &str, independents: &[&str], operators: &[&str], value: f64) -> Result<Self> {
        if independents.is_empty() || operators.len() + 1 != independents.len() {
            return Err(CoreError::Expression(format!(
                "{} independents need {} operators, got {}",
                independents.len(),
                independents.len().saturating_sub(1),
                operators.len()
            )));
        }
        let slots: Vec<String> = (0..independents.len()).map(|i| format!("p{i}")).collect();
        let mut source = slots[0].clone();
        for (op, slot) in operators.iter().zip(&slots[1..]) {
            source.push_str(&format!(" {op} {slot}"));
        }
        let expression = CompiledExpression::new(&source, &slots[..])?;
        Self::build(
            dependent,
            owned(independents),
            ConstraintKind::MultiObject {
                operators: owned(operators),
                value,
                expression,
            },
        )
    }

    /// A native function of the independents' values (or of the dependent's
    /// own value when `independents` is empty).
    pub fn function<F>(dependent: &str, function: F, independents: &[&str]) -> Result<Self>
    where
        F: Fn(&[f64]) -> f64 + Send + Sync + 'static,
    {
        Self::build(
            dependent,
            owned(independents),
            ConstraintKind::Functional {
                function: ConstraintFunction::Native(Arc::new(function)),
            },
        )
    }

    /// An expression in `x` (own value) or `x0`, `x1`, ... (independents).
    pub fn expression(dependent: &str, source: &str, independents: &[&str]) -> Result<Self> {
        let variables: Vec<String> = if independents.is_empty() {
            vec!["x".to_string()]
        } else {
            (0..independents.len()).map(|i| format!("x{i}")).collect()
        };
        let expression = CompiledExpression::new(source, &variables[..])?;
        Self::build(
            dependent,
            owned(independents),
            ConstraintKind::Functional {
                function: ConstraintFunction::Expression(expression),
            },
        )
    }

    pub fn dependent(&self) -> &str {
        &self.dependent
    }

    pub fn independents(&self) -> &[String] {
        &self.independents
    }

    pub fn kind(&self) -> &ConstraintKind {
        &self.kind
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Whether the constraint reads other parameters.
    pub fn external(&self) -> bool {
        !self.independents.is_empty()
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ConstraintKind::Numeric { operator, value } => {
                write!(f, "NumericConstraint({} {} {value})", self.dependent, operator.symbol())
            }
            ConstraintKind::SelfBound { operator, bound } => {
                let bound = match bound {
                    Bound::Min => "min",
                    Bound::Max => "max",
                };
                write!(f, "SelfConstraint({} {} {bound})", self.dependent, operator.symbol())
            }
            ConstraintKind::Object { operator, .. } => write!(
                f,
                "ObjConstraint({} = {operator} {})",
                self.dependent, self.independents[0]
            ),
            ConstraintKind::MultiObject { operators, value, .. } => {
                write!(f, "MultiObjConstraint({} = {value} - (", self.dependent)?;
                for (i, independent) in self.independents.iter().enumerate() {
                    if i > 0 {
                        write!(f, " {} ", operators[i - 1])?;
                    }
                    f.write_str(independent)?;
                }
                f.write_str("))")
            }
            ConstraintKind::Functional { function } => match function {
                ConstraintFunction::Native(_) => write!(f, "FunctionalConstraint({} = <fn>)", self.dependent),
                ConstraintFunction::Expression(e) => {
                    write!(f, "FunctionalConstraint({} = {})", self.dependent, e.source())
                }
            },
        }
    }
}

impl Session {
    pub fn constraint(&self, id: ConstraintId) -> Result<&Constraint> {
        self.constraints
            .get(&id)
            .ok_or_else(|| CoreError::NotFound(id.to_string()))
    }

    pub fn constraint_ids(&self) -> impl Iterator<Item = ConstraintId> + '_ {
        self.constraints.keys().copied()
    }

    /// Registers a constraint. External constraints disable their dependent,
    /// which must be enabled at this point.
    pub fn add_constraint(&mut self, constraint: Constraint) -> Result<ConstraintId> {
        let dependent = self.parameter(constraint.dependent())?;
        if constraint.external() && !dependent.enabled() {
            return Err(CoreError::Attribute(format!(
                "the dependent object '{}' needs to be initially enabled",
                constraint.dependent()
            )));
        }
        for independent in constraint.independents() {
            self.value(independent)?;
        }
        if constraint.external() {
            self.get_as_mut::<Parameter>(constraint.dependent())?.set_enabled(false);
        }
        let id = ConstraintId(self.next_constraint_id);
        self.next_constraint_id += 1;
        debug!(%id, constraint = %constraint, "registered constraint");
        self.constraints.insert(id, constraint);
        Ok(id)
    }

    /// Runs `id` whenever the value of `parameter` is set.
    pub fn attach_constraint(&mut self, parameter: &str, label: &str, id: ConstraintId) -> Result<()> {
        self.constraint(id)?;
        self.get_as_mut::<Parameter>(parameter)?.insert_user_constraint(label, id);
        Ok(())
    }

    pub fn detach_constraint(&mut self, parameter: &str, label: &str) -> Result<ConstraintId> {
        self.get_as_mut::<Parameter>(parameter)?
            .remove_user_constraint(label)
            .ok_or_else(|| CoreError::NotFound(format!("{parameter}.user_constraints['{label}']")))
    }

    /// Registers `constraint` and attaches it to `parameter` under `label`.
    pub fn constrain(&mut self, parameter: &str, label: &str, constraint: Constraint) -> Result<ConstraintId> {
        self.parameter(parameter)?;
        let id = self.add_constraint(constraint)?;
        self.attach_constraint(parameter, label, id)?;
        Ok(id)
    }

    /// Unregisters a constraint, detaches it everywhere and re-enables the
    /// dependent of an external constraint.
    pub fn remove_constraint(&mut self, id: ConstraintId) -> Result<Constraint> {
        let constraint = self
            .constraints
            .shift_remove(&id)
            .ok_or_else(|| CoreError::NotFound(id.to_string()))?;
        let keys: Vec<String> = self.objects.keys().map(str::to_string).collect();
        for key in keys {
            if let Object::Parameter(p) = self.objects.get_mut(&key)? {
                p.detach_constraint(id);
            }
        }
        if constraint.external() {
            if let Ok(dependent) = self.get_as_mut::<Parameter>(constraint.dependent()) {
                dependent.set_enabled(true);
            }
        }
        Ok(constraint)
    }

    /// Enables or disables a constraint. Enabling applies it; for external
    /// constraints the dependent is disabled while the constraint is active.
    pub fn set_constraint_enabled(&mut self, id: ConstraintId, enabled: bool) -> Result<()> {
        let constraint = self
            .constraints
            .get(&id)
            .ok_or_else(|| CoreError::NotFound(id.to_string()))?;
        if constraint.enabled == enabled {
            return Ok(());
        }
        let external = constraint.external();
        let dependent = constraint.dependent.clone();
        let was_writable = self.parameter(&dependent)?.enabled();

        self.set_constraint_flags(id, enabled, external.then_some((dependent.as_str(), !enabled)))?;
        if enabled {
            if let Err(err) = self.apply_constraint(id, false) {
                self.set_constraint_flags(id, false, external.then_some((dependent.as_str(), was_writable)))?;
                return Err(err);
            }
        }
        Ok(())
    }

    fn set_constraint_flags(&mut self, id: ConstraintId, enabled: bool, dependent: Option<(&str, bool)>) -> Result<()> {
        if let Some(constraint) = self.constraints.get_mut(&id) {
            constraint.enabled = enabled;
        }
        if let Some((key, writable)) = dependent {
            self.get_as_mut::<Parameter>(key)?.set_enabled(writable);
        }
        Ok(())
    }

    /// Evaluates a constraint and, unless `no_set`, writes the result into
    /// its dependent. Disabled constraints yield `None`.
    pub fn apply_constraint(&mut self, id: ConstraintId, no_set: bool) -> Result<Option<f64>> {
        self.apply_with_depth(id, no_set, 0)
    }

    fn apply_with_depth(&mut self, id: ConstraintId, no_set: bool, depth: usize) -> Result<Option<f64>> {
        let constraint = self.constraint(id)?;
        if !constraint.enabled() {
            return Ok(None);
        }
        let dependent = constraint.dependent().to_string();
        let value = self.evaluate_constraint(id, None)?;
        debug!(%id, dependent = %dependent, value, no_set, "applying constraint");
        if !no_set {
            self.write_constrained(&dependent, value, depth)?;
        }
        Ok(Some(value))
    }

    /// Value a constraint computes for its dependent. `pending` overrides the
    /// stored value of one parameter.
    fn evaluate_constraint(&self, id: ConstraintId, pending: Option<(&str, f64)>) -> Result<f64> {
        let constraint = self.constraint(id)?;
        let read = |key: &str| -> Result<f64> {
            match pending {
                Some((pending_key, value)) if pending_key == key => Ok(value),
                _ => self.value(key),
            }
        };
        let independents = || -> Result<Vec<f64>> {
            constraint.independents.iter().map(|k| read(k.as_str())).collect()
        };
        match &constraint.kind {
            ConstraintKind::Numeric { operator, value } => {
                Ok(operator.enforce(read(constraint.dependent.as_str())?, *value))
            }
            ConstraintKind::SelfBound { operator, bound } => {
                let parameter = self.parameter(&constraint.dependent)?;
                let threshold = match bound {
                    Bound::Min => parameter.min(),
                    Bound::Max => parameter.max(),
                };
                Ok(operator.enforce(read(constraint.dependent.as_str())?, threshold))
            }
            ConstraintKind::Object { expression, .. } => expression.evaluate(&independents()?),
            ConstraintKind::MultiObject { value, expression, .. } => {
                Ok(value - expression.evaluate(&independents()?)?)
            }
            ConstraintKind::Functional { function } => {
                if constraint.external() {
                    function.call(&independents()?)
                } else {
                    function.call(&[read(constraint.dependent.as_str())?])
                }
            }
        }
    }

    /// Constraint-aware parameter write: clamp to bounds, filter through
    /// internal constraints, store, then propagate to external dependents
    /// without recording their changes.
    pub(crate) fn write_parameter_value(&mut self, key: &str, value: f64, depth: usize) -> Result<()> {
        if depth > MAX_CONSTRAINT_DEPTH {
            return Err(CoreError::Value(format!(
                "constraint chain through '{key}' is deeper than {MAX_CONSTRAINT_DEPTH}"
            )));
        }
        let parameter = self.parameter(key)?;
        if !parameter.enabled() {
            if self.settings.debug {
                return Err(CoreError::Attribute(format!(
                    "parameter '{key}' is disabled and can not be set"
                )));
            }
            warn!(parameter = key, value, "ignoring write to a disabled parameter");
            return Ok(());
        }
        let mut candidate = parameter.clamp(value);
        let ids: Vec<ConstraintId> = parameter.user_constraints().values().copied().collect();

        let mut external = Vec::new();
        for id in ids {
            let Ok(constraint) = self.constraint(id) else {
                continue;
            };
            if !constraint.enabled() {
                continue;
            }
            if constraint.dependent() != key {
                external.push(id);
            } else if !constraint.external() {
                candidate = self.evaluate_constraint(id, Some((key, candidate)))?;
            }
        }

        self.edit_as::<Parameter, _>(key, format!("Setting value of {key}"), |p| {
            p.store_value(candidate);
            Ok(())
        })?;

        let previous = self.stack.force_state(false);
        let outcome = external
            .into_iter()
            .try_for_each(|id| self.apply_with_depth(id, false, depth + 1).map(|_| ()));
        self.stack.force_state(previous);
        outcome
    }

    /// Writes a constraint result into a (usually disabled) dependent as one
    /// recorded edit that leaves its enabled flag untouched.
    fn write_constrained(&mut self, key: &str, value: f64, depth: usize) -> Result<()> {
        let before = self.get(key)?.clone();
        let was_enabled = self.parameter(key)?.enabled();
        self.get_as_mut::<Parameter>(key)?.set_enabled(true);

        let previous = self.stack.force_state(false);
        let outcome = self.write_parameter_value(key, value, depth);
        self.stack.force_state(previous);

        self.get_as_mut::<Parameter>(key)?.set_enabled(was_enabled);
        outcome?;
        let after = self.get(key)?.clone();
        if after != before {
            self.stack.push(Command::snapshot(
                key,
                before,
                after,
                format!("Setting value of {key}"),
            ));
        }
        Ok(())
    }

    /// Brings restored objects back in line with the registry. Dependents of
    /// active external constraints among `keys` are disabled again, then every
    /// external constraint writing or attached to one of `keys` runs.
    pub(crate) fn reapply_constraints(&mut self, keys: &[String]) -> Result<()> {
        let mut ids = Vec::new();
        let mut locked = Vec::new();
        for (id, constraint) in &self.constraints {
            if constraint.enabled() && constraint.external() && keys.iter().any(|k| k == constraint.dependent()) {
                locked.push(constraint.dependent().to_string());
                ids.push(*id);
            }
        }
        for key in keys {
            if let Ok(parameter) = self.parameter(key) {
                for id in parameter.user_constraints().values() {
                    if self.constraint(*id).is_ok_and(|c| c.external()) && !ids.contains(id) {
                        ids.push(*id);
                    }
                }
            }
        }
        for key in locked {
            self.get_as_mut::<Parameter>(&key)?.set_enabled(false);
        }

        let previous = self.stack.force_state(false);
        let outcome = ids
            .into_iter()
            .try_for_each(|id| self.apply_constraint(id, false).map(|_| ()));
        self.stack.force_state(previous);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionSettings;

    fn assert_err_contains<T: std::fmt::Debug>(result: Result<T>, needle: &str) {
        match result {
            Ok(v) => panic!("expected error containing '{needle}', got Ok({v:?})"),
            Err(e) => assert!(
                e.to_string().contains(needle),
                "expected error containing '{needle}', got '{e}'"
            ),
        }
    }

    fn two_pars() -> (Session, String, String) {
        let mut session = Session::new();
        let a = session.add(Parameter::new("a", 1.0)).unwrap();
        let b = session.add(Parameter::new("b", 2.0)).unwrap();
        (session, a, b)
    }

    #[test]
    fn comparison_parsing() {
        assert_eq!("==".parse::<Comparison>().unwrap(), Comparison::Equal);
        assert_eq!(" >= ".parse::<Comparison>().unwrap(), Comparison::GreaterEqual);
        assert!("!=".parse::<Comparison>().is_err());
        assert_eq!(Comparison::Less.enforce(2.0, 1.5), 1.5);
        assert_eq!(Comparison::Less.enforce(1.0, 1.5), 1.0);
    }

    #[test]
    fn numeric_equals() {
        let (mut session, a, b) = two_pars();
        let c = session.add_constraint(Constraint::numeric(&a, "==", 1.0).unwrap()).unwrap();
        session.apply_constraint(c, false).unwrap();
        assert_eq!(session.value(&a).unwrap(), 1.0);

        let c = session.add_constraint(Constraint::numeric(&b, "==", 1.0).unwrap()).unwrap();
        session.apply_constraint(c, false).unwrap();
        assert_eq!(session.value(&b).unwrap(), 1.0);
    }

    #[test]
    fn numeric_greater_and_less() {
        let (mut session, a, b) = two_pars();
        let ga = session.add_constraint(Constraint::numeric(&a, ">", 1.5).unwrap()).unwrap();
        let gb = session.add_constraint(Constraint::numeric(&b, ">", 1.5).unwrap()).unwrap();
        session.apply_constraint(ga, false).unwrap();
        session.apply_constraint(gb, false).unwrap();
        assert_eq!(session.value(&a).unwrap(), 1.5);
        assert_eq!(session.value(&b).unwrap(), 2.0);

        let lb = session.add_constraint(Constraint::numeric(&b, "<", 1.5).unwrap()).unwrap();
        assert_eq!(session.apply_constraint(lb, true).unwrap(), Some(1.5));
        assert_eq!(session.value(&b).unwrap(), 2.0);
    }

    #[test]
    fn object_constraint_operators() {
        for (operator, expected) in [("", 2.0), ("2*", 4.0), ("4.5/", 2.25), ("1 +", 3.0)] {
            let (mut session, a, b) = two_pars();
            let c = session.add_constraint(Constraint::object(&a, operator, &b).unwrap()).unwrap();
            session.apply_constraint(c, false).unwrap();
            assert_eq!(session.value(&a).unwrap(), expected, "operator '{operator}'");
        }
    }

    #[test]
    fn dependent_can_not_be_independent() {
        let (_, a, b) = two_pars();
        assert!(matches!(Constraint::object(&a, "2*", &a), Err(CoreError::Attribute(_))));
        assert!(matches!(
            Constraint::multi_object(&a, &[b.as_str(), a.as_str()], &["+"], 1.0),
            Err(CoreError::Attribute(_))
        ));
    }

    #[test]
    fn setting_a_value_propagates_to_dependents() {
        let mut session = Session::new();
        let p0 = session.add(Parameter::new("a", 1.0)).unwrap();
        let p1 = session.add(Parameter::new("b", 2.0)).unwrap();
        let p2 = session.add(Parameter::new("c", 3.0)).unwrap();
        session.constrain(&p0, "num_1", Constraint::object(&p1, "", &p0).unwrap()).unwrap();
        session.constrain(&p0, "num_2", Constraint::object(&p2, "", &p0).unwrap()).unwrap();

        session.set_value(&p0, 1.5).unwrap();
        for key in [&p0, &p1, &p2] {
            assert_eq!(session.value(key).unwrap(), 1.5);
        }
    }

    #[test]
    fn enabling_and_disabling() {
        let (mut session, a, b) = two_pars();
        let c = session
            .constrain(&a, "num_1", Constraint::object(&a, "", &b).unwrap())
            .unwrap();
        assert!(session.constraint(c).unwrap().enabled());
        assert!(session.parameter(&b).unwrap().enabled());
        assert!(!session.parameter(&a).unwrap().enabled());

        session.set_constraint_enabled(c, false).unwrap();
        assert!(!session.constraint(c).unwrap().enabled());
        assert!(session.parameter(&a).unwrap().enabled());
        assert_eq!(session.apply_constraint(c, false).unwrap(), None);

        session.set_constraint_enabled(c, true).unwrap();
        assert!(!session.parameter(&a).unwrap().enabled());
        assert_eq!(session.value(&a).unwrap(), 2.0);
    }

    #[test]
    fn self_attached_constraint_can_be_re_enabled() {
        let (mut session, a, b) = two_pars();
        let c = session.constrain(&a, "num_1", Constraint::object(&a, "", &b).unwrap()).unwrap();
        for _ in 0..3 {
            session.set_constraint_enabled(c, false).unwrap();
            session.set_value(&b, 4.0).unwrap();
            session.set_constraint_enabled(c, true).unwrap();
            assert_eq!(session.value(&a).unwrap(), 4.0);
            assert!(!session.parameter(&a).unwrap().enabled());
            session.set_value(&b, 2.0).unwrap();
        }
    }

    #[test]
    fn failed_enable_restores_flags() {
        let (mut session, a, b) = two_pars();
        let a_from_b = Constraint::function(&a, |v| v[0] + 1.0, &[b.as_str()]).unwrap();
        let b_from_a = Constraint::function(&b, |v| v[0] + 1.0, &[a.as_str()]).unwrap();
        session.constrain(&b, "a", a_from_b).unwrap();
        session.set_enabled(&a, true).unwrap();
        let back = session.constrain(&a, "b", b_from_a).unwrap();
        session.set_constraint_enabled(back, false).unwrap();
        assert!(session.parameter(&b).unwrap().enabled());

        assert_err_contains(session.set_constraint_enabled(back, true), "deeper than");
        assert!(!session.constraint(back).unwrap().enabled());
        assert!(session.parameter(&b).unwrap().enabled());
    }

    #[test]
    fn dependent_must_start_enabled() {
        let mut session = Session::new();
        let a = session.add(Parameter::new("a", 1.0).with_enabled(false)).unwrap();
        let b = session.add(Parameter::new("b", 1.0)).unwrap();
        assert_err_contains(
            session.add_constraint(Constraint::object(&a, "", &b).unwrap()),
            "initially enabled",
        );
    }

    #[test]
    fn removing_a_constraint_re_enables_the_dependent() {
        let (mut session, a, b) = two_pars();
        let c = session.constrain(&b, "link", Constraint::object(&a, "2*", &b).unwrap()).unwrap();
        assert!(!session.parameter(&a).unwrap().enabled());
        session.remove_constraint(c).unwrap();
        assert!(session.parameter(&a).unwrap().enabled());
        assert!(session.parameter(&b).unwrap().user_constraints().is_empty());
        assert!(session.constraint(c).is_err());
    }

    #[test]
    fn multi_object_constraint() {
        let mut session = Session::new();
        let a = session.add(Parameter::new("a", 0.0)).unwrap();
        let b = session.add(Parameter::new("b", 0.2)).unwrap();
        let c = session.add(Parameter::new("c", 0.3)).unwrap();
        let d = session.add(Parameter::new("d", 0.1)).unwrap();
        let sum = Constraint::multi_object(&a, &[b.as_str(), c.as_str(), d.as_str()], &["+", "-2*"], 1.0)
            .unwrap();
        let id = session.constrain(&b, "sum", sum).unwrap();
        session.apply_constraint(id, false).unwrap();
        assert!((session.value(&a).unwrap() - 0.7).abs() < 1e-12);

        session.set_value(&b, 0.4).unwrap();
        assert!((session.value(&a).unwrap() - 0.5).abs() < 1e-12);
        assert!(Constraint::multi_object(&a, &[b.as_str(), c.as_str()], &["+", "+"], 1.0).is_err());
        assert_eq!(
            session.constraint(id).unwrap().to_string(),
            format!("MultiObjConstraint({a} = 1 - ({b} + {c} -2* {d}))")
        );
    }

    #[test]
    fn functional_constraints() {
        let mut session = Session::new();
        let a = session.add(Parameter::new("a", 1.0)).unwrap();
        let b = session.add(Parameter::new("b", 3.0)).unwrap();
        let square = session
            .constrain(&b, "sq", Constraint::function(&a, |v| v[0] * v[0], &[b.as_str()]).unwrap())
            .unwrap();
        session.apply_constraint(square, false).unwrap();
        assert_eq!(session.value(&a).unwrap(), 9.0);
        session.remove_constraint(square).unwrap();

        let cap = session
            .constrain(&a, "cap", Constraint::expression(&a, "abs(x)", &[]).unwrap())
            .unwrap();
        assert!(!session.constraint(cap).unwrap().external());
        session.set_value(&a, -4.0).unwrap();
        assert_eq!(session.value(&a).unwrap(), 4.0);
    }

    #[test]
    fn internal_constraints_filter_writes() {
        let mut session = Session::new();
        let a = session.add(Parameter::new("a", 1.0).with_max(10.0).unwrap()).unwrap();
        session
            .constrain(&a, "positive", Constraint::numeric(&a, ">=", 0.0).unwrap())
            .unwrap();
        session
            .constrain(&a, "below_max", Constraint::self_bound(&a, "<", Bound::Max).unwrap())
            .unwrap();
        session.set_value(&a, -5.0).unwrap();
        assert_eq!(session.value(&a).unwrap(), 0.0);
        session.set_value(&a, 20.0).unwrap();
        assert_eq!(session.value(&a).unwrap(), 10.0);
    }

    #[test]
    fn disabled_writes_error_in_debug_mode() {
        let mut session = Session::with_settings(SessionSettings {
            debug: true,
            ..Default::default()
        });
        let a = session.add(Parameter::new("a", 1.0).with_enabled(false)).unwrap();
        assert!(matches!(session.set_value(&a, 2.0), Err(CoreError::Attribute(_))));

        session.set_debug(false);
        session.set_value(&a, 2.0).unwrap();
        assert_eq!(session.value(&a).unwrap(), 1.0);
    }

    #[test]
    fn cyclic_chains_are_cut() {
        let mut session = Session::new();
        let a = session.add(Parameter::new("a", 1.0)).unwrap();
        let b = session.add(Parameter::new("b", 1.0)).unwrap();
        let a_from_b = Constraint::function(&a, |v| v[0] + 1.0, &[b.as_str()]).unwrap();
        let b_from_a = Constraint::function(&b, |v| v[0] + 1.0, &[a.as_str()]).unwrap();
        session.constrain(&b, "a", a_from_b).unwrap();
        // `a` is now disabled, so re-enable it before the reverse link.
        session.set_enabled(&a, true).unwrap();
        session.constrain(&a, "b", b_from_a).unwrap();
        session.set_enabled(&b, true).unwrap();
        assert_err_contains(session.set_value(&a, 5.0), "deeper than");
    }

    #[test]
    fn undo_reapplies_external_constraints() {
        let mut session = Session::with_settings(SessionSettings {
            undo_enabled: true,
            ..Default::default()
        });
        let a = session.add(Parameter::new("a", 1.0)).unwrap();
        let b = session.add(Parameter::new("b", 2.0)).unwrap();
        session.constrain(&a, "twice", Constraint::object(&b, "2*", &a).unwrap()).unwrap();

        session.set_value(&a, 3.0).unwrap();
        assert_eq!(session.value(&b).unwrap(), 6.0);
        session.undo().unwrap();
        assert_eq!(session.value(&a).unwrap(), 1.0);
        assert_eq!(session.value(&b).unwrap(), 2.0);
        session.redo().unwrap();
        assert_eq!(session.value(&b).unwrap(), 6.0);
        assert!(!session.parameter(&b).unwrap().enabled());
    }
}
