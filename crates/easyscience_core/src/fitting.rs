//! Least-squares fitting of session parameters.
//!
//! [`Fitter`] runs a Levenberg–Marquardt minimisation over the free, enabled
//! parameters of a [`FitModel`]. Jacobians come from forward-mode dual numbers.
//! Steps are projected onto each parameter's bounds. The optimum and its
//! standard errors are written back into the session as one undo step.

use crate::autodiff::model_jacobian;
use crate::session::Session;
use crate::traits::FitModel;
use anyhow::{anyhow, bail, Context, Result};
use indexmap::IndexMap;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use tracing::{debug, info, warn};

/// Undo macro text used when fit results are written back.
pub const FIT_MACRO: &str = "Fitting routine";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitSettings {
    pub max_iterations: usize,
    /// Relative change of χ² below which the fit counts as converged.
    pub tolerance: f64,
    pub initial_lambda: f64,
    pub lambda_factor: f64,
}

impl Default for FitSettings {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            tolerance: 1e-10,
            initial_lambda: 1e-3,
            lambda_factor: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResults {
    pub success: bool,
    pub iterations: usize,
    pub chi2: f64,
    pub reduced_chi2: f64,
    /// Fitted values keyed `p{unique_name}`.
    pub parameters: IndexMap<String, f64>,
    /// Standard errors keyed like `parameters`. Empty when the curvature
    /// matrix is singular.
    pub errors: IndexMap<String, f64>,
    pub x: Vec<f64>,
    pub y_obs: Vec<f64>,
    pub y_calc: Vec<f64>,
    pub residuals: Vec<f64>,
    pub message: String,
}

/// Key under which a parameter appears in [`FitResults`].
pub fn result_key(unique_name: &str) -> String {
    format!("p{unique_name}")
}

#[derive(Debug, Clone, Default)]
pub struct Fitter {
    settings: FitSettings,
}

/// Relative step for the finite-difference response of constrained parameters.
const RESPONSE_STEP: f64 = 1e-7;

struct Problem<'a, M> {
    model: &'a M,
    keys: &'a [String],
    x: &'a [f64],
    y: &'a [f64],
    weights: Vec<f64>,
    active: Vec<usize>,
    bounds: Vec<(f64, f64)>,
    /// Copy of the session with history off. Trial values are written through
    /// it so constraints move their dependents as they would in the session.
    scratch: RefCell<Session>,
}

impl<M: FitModel> Problem<'_, M> {
    /// Every model parameter once the active ones take `active_values`.
    fn resolve(&self, active_values: &[f64]) -> Result<Vec<f64>> {
        let mut scratch = self.scratch.borrow_mut();
        for (&index, &value) in self.active.iter().zip(active_values) {
            scratch.write_parameter_value(&self.keys[index], value, 0)?;
        }
        let values = self
            .keys
            .iter()
            .map(|key| scratch.value(key))
            .collect::<crate::Result<Vec<f64>>>()?;
        Ok(values)
    }

    fn calculate(&self, values: &[f64]) -> Vec<f64> {
        self.x.iter().map(|&xi| self.model.evaluate(values, xi)).collect()
    }

    /// Weighted residuals `w·(y - f)`.
    fn residuals(&self, active_values: &[f64]) -> Result<DVector<f64>> {
        let calc = self.calculate(&self.resolve(active_values)?);
        Ok(DVector::from_iterator(
            self.y.len(),
            self.y
                .iter()
                .zip(&calc)
                .zip(&self.weights)
                .map(|((y, f), w)| w * (y - f)),
        ))
    }

    /// Weighted Jacobian, `x.len() × active.len()`. Model derivatives come
    /// from dual numbers over every parameter and are chained with the
    /// response of each parameter to the active ones.
    fn jacobian(&self, active_values: &[f64]) -> Result<DMatrix<f64>> {
        let values = self.resolve(active_values)?;
        let all: Vec<usize> = (0..self.keys.len()).collect();
        let raw = model_jacobian(self.model, &values, &all, self.x);
        let model = DMatrix::from_row_slice(self.x.len(), all.len(), &raw);
        let mut jacobian = model * self.response(active_values, &values)?;
        for (mut row, w) in jacobian.row_iter_mut().zip(&self.weights) {
            row *= *w;
        }
        Ok(jacobian)
    }

    /// `∂values/∂active`: identity on the active parameters, forward
    /// differences for anything the constraints move.
    fn response(&self, active_values: &[f64], values: &[f64]) -> Result<DMatrix<f64>> {
        let mut response = DMatrix::zeros(self.keys.len(), self.active.len());
        for (column, &index) in self.active.iter().enumerate() {
            response[(index, column)] = 1.0;
            let mut step = RESPONSE_STEP * active_values[column].abs().max(1.0);
            if active_values[column] + step > self.bounds[column].1 {
                step = -step;
            }
            let mut shifted = active_values.to_vec();
            shifted[column] += step;
            let moved = self.resolve(&shifted)?;
            for (row, (after, before)) in moved.iter().zip(values).enumerate() {
                if !self.active.contains(&row) {
                    response[(row, column)] = (after - before) / step;
                }
            }
        }
        self.resolve(active_values)?;
        Ok(response)
    }

    fn project(&self, active_values: &mut [f64]) {
        for (value, &(min, max)) in active_values.iter_mut().zip(&self.bounds) {
            *value = value.clamp(min, max);
        }
    }
}

impl Fitter {
    pub fn new(settings: FitSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &FitSettings {
        &self.settings
    }

    /// Fits `model` to `(x, y)` and writes the result into `session`.
    ///
    /// `weights` multiply the residuals; all ones when `None`.
    pub fn fit<M: FitModel>(
        &self,
        session: &mut Session,
        model: &M,
        x: &[f64],
        y: &[f64],
        weights: Option<&[f64]>,
    ) -> Result<FitResults> {
        let settings = self.settings;
        if x.is_empty() {
            bail!("No data to fit.");
        }
        if x.len() != y.len() {
            bail!("Data length mismatch: {} x values, {} y values.", x.len(), y.len());
        }
        let weights = match weights {
            Some(w) if w.len() != x.len() => {
                bail!("Weights length mismatch: expected {}, got {}.", x.len(), w.len())
            }
            Some(w) if w.iter().any(|v| *v <= 0.0 || !v.is_finite()) => {
                bail!("Weights must be finite and positive.")
            }
            Some(w) => w.to_vec(),
            None => vec![1.0; x.len()],
        };
        if settings.max_iterations == 0 {
            bail!("max_iterations must be greater than zero.");
        }
        if settings.tolerance <= 0.0 {
            bail!("tolerance must be positive.");
        }
        if settings.initial_lambda <= 0.0 || settings.lambda_factor <= 1.0 {
            bail!("initial_lambda must be positive and lambda_factor greater than one.");
        }

        let keys = model.parameter_keys();
        let mut start = Vec::new();
        let mut active = Vec::new();
        let mut bounds = Vec::new();
        for (index, key) in keys.iter().enumerate() {
            let parameter = session
                .parameter(key)
                .with_context(|| format!("Model parameter '{key}' is not available."))?;
            if parameter.free() && parameter.enabled() {
                start.push(parameter.value());
                active.push(index);
                bounds.push((parameter.min(), parameter.max()));
            }
        }
        if active.is_empty() {
            bail!("Model has no free parameters.");
        }

        let mut scratch = session.clone();
        scratch.stack_mut().set_enabled(false);
        let problem = Problem {
            model,
            keys: &keys,
            x,
            y,
            weights,
            active,
            bounds,
            scratch: RefCell::new(scratch),
        };
        let outcome = self.minimize(&problem, start)?;
        self.write_back(session, &problem, outcome)
    }

    fn minimize<M: FitModel>(&self, problem: &Problem<'_, M>, mut current: Vec<f64>) -> Result<Minimum> {
        let settings = self.settings;
        problem.project(&mut current);
        let mut residuals = problem.residuals(&current)?;
        let mut chi2 = residuals.norm_squared();
        if !chi2.is_finite() {
            bail!("Model evaluates to non-finite values at the starting point.");
        }
        let mut lambda = settings.initial_lambda;
        let mut iterations = 0usize;
        let mut converged = false;

        while iterations < settings.max_iterations {
            iterations += 1;
            let jacobian = problem.jacobian(&current)?;
            let jtj = jacobian.transpose() * &jacobian;
            let gradient = jacobian.transpose() * &residuals;

            let mut accepted = false;
            while lambda < 1e16 {
                let mut damped = jtj.clone();
                for j in 0..damped.nrows() {
                    damped[(j, j)] += lambda * jtj[(j, j)].max(1e-12);
                }
                let Some(step) = damped.lu().solve(&gradient) else {
                    lambda *= settings.lambda_factor;
                    continue;
                };
                let mut trial: Vec<f64> = current.iter().zip(step.iter()).map(|(p, d)| p + d).collect();
                problem.project(&mut trial);
                let trial_residuals = problem.residuals(&trial)?;
                let trial_chi2 = trial_residuals.norm_squared();
                if trial_chi2.is_finite() && trial_chi2 <= chi2 {
                    let improvement = chi2 - trial_chi2;
                    current = trial;
                    residuals = trial_residuals;
                    chi2 = trial_chi2;
                    lambda = (lambda / settings.lambda_factor).max(1e-12);
                    accepted = true;
                    if improvement <= settings.tolerance * chi2.max(settings.tolerance) {
                        converged = true;
                    }
                    break;
                }
                lambda *= settings.lambda_factor;
            }
            debug!(iterations, chi2, lambda, "fit iteration");
            if !accepted {
                // No downhill step left at any damping.
                converged = true;
            }
            if converged {
                break;
            }
        }

        let jacobian = problem.jacobian(&current)?;
        let curvature = jacobian.transpose() * &jacobian;
        Ok(Minimum {
            active_values: current,
            chi2,
            iterations,
            converged,
            covariance: curvature.try_inverse(),
        })
    }

    fn write_back<M: FitModel>(
        &self,
        session: &mut Session,
        problem: &Problem<'_, M>,
        minimum: Minimum,
    ) -> Result<FitResults> {
        let n_active = problem.active.len();
        let dof = problem.x.len().saturating_sub(n_active).max(1);
        let reduced_chi2 = minimum.chi2 / dof as f64;
        let errors: Option<Vec<f64>> = match &minimum.covariance {
            Some(covariance) => Some(
                (0..n_active)
                    .map(|j| (covariance[(j, j)] * reduced_chi2).max(0.0).sqrt())
                    .collect(),
            ),
            None => {
                warn!("curvature matrix is singular; parameter errors are unavailable");
                None
            }
        };

        let mut parameters = IndexMap::new();
        let mut error_map = IndexMap::new();
        session.begin_macro(FIT_MACRO)?;
        let written = (|| -> Result<()> {
            for (slot, (&index, &value)) in problem.active.iter().zip(&minimum.active_values).enumerate() {
                let key = &problem.keys[index];
                session.set_value(key, value)?;
                parameters.insert(result_key(key), session.value(key)?);
                if let Some(errors) = &errors {
                    session.set_error(key, Some(errors[slot]))?;
                    error_map.insert(result_key(key), errors[slot]);
                }
            }
            Ok(())
        })();
        if let Err(err) = written {
            session.stack_mut().abort_macro();
            return Err(err).context("Failed to write fit results back.");
        }
        session.end_macro()?;

        let y_calc = problem.calculate(&problem.resolve(&minimum.active_values)?);
        let residuals: Vec<f64> = problem.y.iter().zip(&y_calc).map(|(y, f)| y - f).collect();
        let message = if minimum.converged {
            format!("Fit converged after {} iterations.", minimum.iterations)
        } else {
            format!(
                "Fit stopped after reaching the maximum of {} iterations.",
                self.settings.max_iterations
            )
        };
        info!(
            success = minimum.converged,
            iterations = minimum.iterations,
            chi2 = minimum.chi2,
            reduced_chi2,
            "fit finished"
        );

        Ok(FitResults {
            success: minimum.converged,
            iterations: minimum.iterations,
            chi2: minimum.chi2,
            reduced_chi2,
            parameters,
            errors: error_map,
            x: problem.x.to_vec(),
            y_obs: problem.y.to_vec(),
            y_calc,
            residuals,
            message,
        })
    }
}

struct Minimum {
    active_values: Vec<f64>,
    chi2: f64,
    iterations: usize,
    converged: bool,
    covariance: Option<DMatrix<f64>>,
}

impl FitResults {
    /// Fitted value of the parameter `unique_name`.
    pub fn value(&self, unique_name: &str) -> Result<f64> {
        self.parameters
            .get(&result_key(unique_name))
            .copied()
            .ok_or_else(|| anyhow!("'{unique_name}' was not fitted."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Line;
    use crate::variable::Parameter;

    fn line_data(m: f64, c: f64) -> (Vec<f64>, Vec<f64>) {
        let x: Vec<f64> = (0..20).map(|i| i as f64 * 0.5).collect();
        let y = x.iter().map(|xi| m * xi + c).collect();
        (x, y)
    }

    #[test]
    fn recovers_exact_line() {
        let mut session = Session::new();
        let line = Line::new(&mut session).unwrap();
        let (x, y) = line_data(2.5, -1.0);
        let results = Fitter::default().fit(&mut session, &line, &x, &y, None).unwrap();
        assert!(results.success, "{}", results.message);
        assert!((session.value(line.m()).unwrap() - 2.5).abs() < 1e-8);
        assert!((session.value(line.c()).unwrap() + 1.0).abs() < 1e-8);
        assert!((results.value(line.m()).unwrap() - 2.5).abs() < 1e-8);
        assert!(results.chi2 < 1e-12);
        assert_eq!(results.residuals.len(), x.len());
    }

    #[test]
    fn fixed_parameters_are_left_alone() {
        let mut session = Session::new();
        let c = session.add(Parameter::new("c", 0.5).with_fixed(true)).unwrap();
        let line = Line::with_coefficients(&mut session, 1.0, c.as_str()).unwrap();
        let (x, y) = line_data(3.0, 0.5);
        let results = Fitter::default().fit(&mut session, &line, &x, &y, None).unwrap();
        assert_eq!(results.parameters.len(), 1);
        assert_eq!(session.value(&c).unwrap(), 0.5);
        assert!((session.value(line.m()).unwrap() - 3.0).abs() < 1e-8);
    }

    #[test]
    fn steps_respect_bounds() {
        let mut session = Session::new();
        let m = session.add(Parameter::new("m", 1.0).with_max(2.0).unwrap()).unwrap();
        let line = Line::with_coefficients(&mut session, m.as_str(), 0.0).unwrap();
        let (x, y) = line_data(3.0, 0.0);
        Fitter::default().fit(&mut session, &line, &x, &y, None).unwrap();
        assert!(session.value(&m).unwrap() <= 2.0);
    }

    #[test]
    fn errors_scale_with_noise() {
        let mut session = Session::new();
        let line = Line::new(&mut session).unwrap();
        let (x, mut y) = line_data(1.0, 2.0);
        for (i, yi) in y.iter_mut().enumerate() {
            *yi += if i % 2 == 0 { 0.1 } else { -0.1 };
        }
        let results = Fitter::default().fit(&mut session, &line, &x, &y, None).unwrap();
        let error = session.parameter(line.m()).unwrap().error().unwrap();
        assert!(error > 0.0);
        assert!((results.errors[&result_key(line.m())] - error).abs() < 1e-12);
        assert!(results.reduced_chi2 > 0.0);
    }

    #[test]
    fn rejects_bad_input() {
        let mut session = Session::new();
        let line = Line::new(&mut session).unwrap();
        let fitter = Fitter::default();
        let err = fitter.fit(&mut session, &line, &[], &[], None).unwrap_err();
        assert!(err.to_string().contains("No data"));
        let err = fitter.fit(&mut session, &line, &[1.0, 2.0], &[1.0], None).unwrap_err();
        assert!(err.to_string().contains("length mismatch"));
        let err = fitter
            .fit(&mut session, &line, &[1.0], &[1.0], Some(&[0.0][..]))
            .unwrap_err();
        assert!(err.to_string().contains("positive"));

        session.set_fixed(line.m(), true).unwrap();
        session.set_fixed(line.c(), true).unwrap();
        let err = fitter.fit(&mut session, &line, &[1.0], &[1.0], None).unwrap_err();
        assert!(err.to_string().contains("no free parameters"));

        let zero = Fitter::new(FitSettings {
            max_iterations: 0,
            ..Default::default()
        });
        assert!(zero.fit(&mut session, &line, &[1.0], &[1.0], None).is_err());
    }
}
