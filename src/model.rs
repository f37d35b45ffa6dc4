//! Model trait and the adapter that hands a model to the least-squares solver.
//!
//! A [`Model`] owns a [`Parameters`] set and evaluates a curve on an energy grid for
//! any parameter set passed to it. [`ModelProblem`] turns a model, a data set and
//! optional weights into a [`Problem`] in the solver's internal (unbounded) coordinates.
//! [`fit`] and [`evaluate`] drive the solver and collect the values, residuals,
//! statistics and standard errors into a [`FitResult`].

use log::{debug, info, warn};
use ndarray::{Array1, Array2};
use std::fmt;

use crate::error::{Result, XpsFitError};
use crate::lm::{ConvergenceStatus, LevenbergMarquardt};
use crate::parameters::Parameters;
use crate::problem::Problem;
use crate::statistics::{self, FitStatistics};
use crate::utils::finite_difference::DEFAULT_EPSILON;

/// A trait representing a model that can be fit to data.
pub trait Model {
    /// Returns a reference to the model's parameters.
    fn parameters(&self) -> &Parameters;

    /// Returns a mutable reference to the model's parameters.
    fn parameters_mut(&mut self) -> &mut Parameters;

    /// Evaluates the model on `x` with an explicit parameter set.
    ///
    /// The solver calls this with trial parameter sets; the model's own parameters
    /// are left untouched.
    ///
    /// # Arguments
    ///
    /// * `params` - Parameter set containing every name the model reads
    /// * `x` - Energy grid
    ///
    /// # Returns
    ///
    /// * Model intensities, one per sample of `x`
    fn eval_with(&self, params: &Parameters, x: &Array1<f64>) -> Result<Array1<f64>>;

    /// Evaluates the model at its current parameter values.
    fn eval(&self, x: &Array1<f64>) -> Result<Array1<f64>> {
        self.eval_with(self.parameters(), x)
    }

    /// Calculates the residuals `y - model(x)` at the current parameter values.
    fn residuals(&self, x: &Array1<f64>, y: &Array1<f64>) -> Result<Array1<f64>> {
        let y_pred = self.eval(x)?;
        if y.len() != y_pred.len() {
            return Err(XpsFitError::DimensionMismatch(format!(
                "Expected {} observed values, got {}",
                y_pred.len(),
                y.len()
            )));
        }
        Ok(y - &y_pred)
    }

    /// Returns the number of varying parameters in the model.
    fn varying_parameter_count(&self) -> usize {
        self.parameters().varying_count()
    }

    /// Returns the names of varying parameters in the model.
    fn varying_parameter_names(&self) -> Vec<String> {
        self.parameters().varying_names()
    }
}

/// Adapter exposing a [`Model`] and a data set as a [`Problem`].
///
/// The solver's parameter vector holds the free parameters in internal coordinates,
/// in [`Parameters::varying_names`] order. Every evaluation maps them back to
/// external values on a copy of the model's parameters, recomputes all expressions and
/// returns `(y - model) * w`.
pub struct ModelProblem<'a, M: Model + ?Sized> {
    model: &'a M,
    x_data: &'a Array1<f64>,
    y_data: &'a Array1<f64>,
    weights: Option<&'a Array1<f64>>,
    template: Parameters,
}

impl<'a, M: Model + ?Sized> ModelProblem<'a, M> {
    /// Create a new adapter.
    ///
    /// # Arguments
    ///
    /// * `model` - The model to adapt
    /// * `x_data` - The independent variable values
    /// * `y_data` - The observed intensities
    /// * `weights` - Optional per-sample weights multiplying the residuals
    ///
    /// # Returns
    ///
    /// * The adapter, or `DimensionMismatch` when the array lengths differ
    pub fn new(
        model: &'a M,
        x_data: &'a Array1<f64>,
        y_data: &'a Array1<f64>,
        weights: Option<&'a Array1<f64>>,
    ) -> Result<Self> {
        if x_data.len() != y_data.len() {
            return Err(XpsFitError::DimensionMismatch(format!(
                "Expected x and y data to have the same length, got {} and {}",
                x_data.len(),
                y_data.len()
            )));
        }
        if let Some(w) = weights {
            if w.len() != y_data.len() {
                return Err(XpsFitError::DimensionMismatch(format!(
                    "Expected {} weights, got {}",
                    y_data.len(),
                    w.len()
                )));
            }
        }
        Ok(Self {
            model,
            x_data,
            y_data,
            weights,
            template: model.parameters().clone(),
        })
    }

    pub fn ndata(&self) -> usize {
        self.x_data.len()
    }

    pub fn nvarys(&self) -> usize {
        self.template.varying_count()
    }

    /// Initial solver vector
    pub fn initial_internal(&self) -> Result<Array1<f64>> {
        Ok(Array1::from_vec(self.template.varying_internal_values()?))
    }

    /// Parameter set corresponding to an internal solver vector
    pub fn parameters_at(&self, internal: &Array1<f64>) -> Result<Parameters> {
        let mut params = self.template.clone();
        params.update_from_internal(&internal.to_vec())?;
        Ok(params)
    }

    /// Weighted residuals for a complete parameter set
    pub fn weighted_residuals(&self, params: &Parameters) -> Result<Array1<f64>> {
        let y_pred = self.model.eval_with(params, self.x_data)?;
        if y_pred.len() != self.y_data.len() {
            return Err(XpsFitError::DimensionMismatch(format!(
                "Model returned {} values for {} samples",
                y_pred.len(),
                self.y_data.len()
            )));
        }
        let mut residuals = self.y_data - &y_pred;
        if let Some(w) = self.weights {
            residuals *= w;
        }
        Ok(residuals)
    }

    /// Jacobian of the weighted residuals with respect to the external values of
    /// the free parameters.
    ///
    /// A step that would leave a bound is taken in the opposite direction.
    pub fn external_jacobian(&self, params: &Parameters) -> Result<Array2<f64>> {
        let names = params.varying_names();
        let base = self.weighted_residuals(params)?;
        let mut jac = Array2::zeros((base.len(), names.len()));

        for (j, name) in names.iter().enumerate() {
            let param = params
                .get(name)
                .ok_or_else(|| XpsFitError::ParameterNotFound(name.clone()))?;
            let value = param.value();
            let mut step = DEFAULT_EPSILON * value.abs().max(1.0);
            if value + step > param.max() {
                step = -step;
            }

            let mut shifted = params.clone();
            shifted.set_value(name, value + step)?;
            shifted.update_expressions()?;
            let perturbed = self.weighted_residuals(&shifted)?;

            let mut column = jac.column_mut(j);
            for i in 0..base.len() {
                column[i] = (perturbed[i] - base[i]) / step;
            }
        }
        Ok(jac)
    }
}

impl<M: Model + ?Sized> Problem for ModelProblem<'_, M> {
    fn eval(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
        let trial = self.parameters_at(params)?;
        self.weighted_residuals(&trial)
    }

    fn parameter_count(&self) -> usize {
        self.nvarys()
    }

    fn residual_count(&self) -> usize {
        self.ndata()
    }
}

/// Result of fitting or evaluating a model against data.
#[derive(Debug, Clone)]
pub struct FitResult {
    /// Final parameter set; `stderr` is filled for free parameters when the
    /// covariance could be estimated
    pub params: Parameters,

    /// Model evaluated at `params`
    pub best_fit: Array1<f64>,

    /// Weighted residuals `(y - best_fit) * w`
    pub residuals: Array1<f64>,

    pub success: bool,

    pub status: ConvergenceStatus,

    pub message: String,

    pub iterations: usize,

    pub func_evals: usize,

    /// Names of the free parameters, in covariance order
    pub var_names: Vec<String>,

    /// Covariance of the free parameters
    pub covariance: Option<Array2<f64>>,

    /// Goodness-of-fit statistics, `None` when the run was interrupted
    pub statistics: Option<FitStatistics>,
}

impl FitResult {
    pub fn interrupted(&self) -> bool {
        self.status == ConvergenceStatus::Interrupted
    }
}

impl fmt::Display for FitResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[[Fit Result]]")?;
        writeln!(f, "  success: {} ({})", self.success, self.message)?;
        writeln!(
            f,
            "  iterations: {}, function evals: {}",
            self.iterations, self.func_evals
        )?;
        match &self.statistics {
            Some(s) => {
                writeln!(f, "  data points: {}, variables: {}", s.ndata, s.nvarys)?;
                writeln!(f, "  chi-square: {:.6e}", s.chisqr)?;
                writeln!(f, "  reduced chi-square: {:.6e}", s.redchi)?;
                writeln!(f, "  Akaike info crit: {:.4}", s.aic)?;
                writeln!(f, "  Bayesian info crit: {:.4}", s.bic)?;
            }
            None => writeln!(f, "  statistics: unknown")?,
        }
        writeln!(f, "[[Variables]]")?;
        for (name, param) in self.params.iter() {
            match (param.expr(), param.stderr) {
                (Some(expr), _) => writeln!(f, "  {}: {:.6} == '{}'", name, param.value(), expr)?,
                (None, Some(err)) => writeln!(f, "  {}: {:.6} +/- {:.6}", name, param.value(), err)?,
                (None, None) if param.vary() => writeln!(f, "  {}: {:.6}", name, param.value())?,
                (None, None) => writeln!(f, "  {}: {:.6} (fixed)", name, param.value())?,
            }
        }
        Ok(())
    }
}

/// Fit a model to data and write the result back into the model's parameters.
///
/// # Arguments
///
/// * `model` - The model to fit
/// * `x_data` - The independent variable values
/// * `y_data` - The observed intensities
/// * `weights` - Optional per-sample residual weights
/// * `solver` - Configured solver, possibly carrying an interrupt flag
/// * `scale_covariance` - Scale the covariance by the reduced chi-square
///
/// # Returns
///
/// * `Result<FitResult>` - Solver failures to converge are reported in the result,
///   not as errors
pub fn fit<M: Model + ?Sized>(
    model: &mut M,
    x_data: &Array1<f64>,
    y_data: &Array1<f64>,
    weights: Option<&Array1<f64>>,
    solver: &LevenbergMarquardt,
    scale_covariance: bool,
) -> Result<FitResult> {
    let problem = ModelProblem::new(&*model, x_data, y_data, weights)?;
    let initial = problem.initial_internal()?;
    let outcome = solver.minimize(&problem, initial)?;

    let mut params = problem.parameters_at(&outcome.params)?;
    let residuals = problem.weighted_residuals(&params)?;
    let var_names = params.varying_names();
    let interrupted = outcome.status == ConvergenceStatus::Interrupted;

    let statistics = if interrupted {
        None
    } else {
        Some(FitStatistics::from_residuals(&residuals, var_names.len()))
    };

    let covariance = match (&statistics, var_names.is_empty()) {
        (Some(stats), false) => {
            let scale = if scale_covariance { stats.redchi } else { 1.0 };
            let jac = problem.external_jacobian(&params)?;
            match statistics::covariance(&jac, scale) {
                Ok(covar) => Some(covar),
                Err(e) => {
                    warn!("Could not estimate uncertainties: {}", e);
                    None
                }
            }
        }
        _ => None,
    };

    if let Some(covar) = &covariance {
        let errors = statistics::standard_errors(covar);
        for (name, err) in var_names.iter().zip(errors.iter()) {
            if let Some(param) = params.get_mut(name) {
                param.stderr = Some(*err);
            }
        }
    }

    let best_fit = model.eval_with(&params, x_data)?;
    *model.parameters_mut() = params.clone();

    match &statistics {
        Some(stats) => info!(
            "Fit finished: {} after {} iterations, redchi = {:.4e}",
            outcome.message, outcome.iterations, stats.redchi
        ),
        None => info!(
            "Fit interrupted after {} iterations",
            outcome.iterations
        ),
    }

    Ok(FitResult {
        params,
        best_fit,
        residuals,
        success: outcome.success,
        status: outcome.status,
        message: outcome.message,
        iterations: outcome.iterations,
        func_evals: outcome.func_evals,
        var_names,
        covariance,
        statistics,
    })
}

/// Evaluate a model with every parameter held at its current value.
///
/// Produces the same result structure as [`fit`] with zero iterations and no free
/// parameters. `y_data` may be `None` (simulation), in which case the residuals are
/// empty and no statistics are computed.
pub fn evaluate<M: Model + ?Sized>(
    model: &M,
    x_data: &Array1<f64>,
    y_data: Option<&Array1<f64>>,
    weights: Option<&Array1<f64>>,
) -> Result<FitResult> {
    let mut params = model.parameters().clone();
    params.update_expressions()?;
    let best_fit = model.eval_with(&params, x_data)?;

    let (residuals, statistics) = match y_data {
        Some(y) => {
            let problem = ModelProblem::new(model, x_data, y, weights)?;
            let residuals = problem.weighted_residuals(&params)?;
            let stats = FitStatistics::from_residuals(&residuals, 0);
            (residuals, Some(stats))
        }
        None => (Array1::zeros(0), None),
    };
    debug!("Evaluated model with {} parameters", params.len());

    Ok(FitResult {
        params,
        best_fit,
        residuals,
        success: true,
        status: ConvergenceStatus::NoFreeParameters,
        message: "Evaluated without fitting".to_string(),
        iterations: 0,
        func_evals: 1,
        var_names: Vec::new(),
        covariance: None,
        statistics,
    })
}
