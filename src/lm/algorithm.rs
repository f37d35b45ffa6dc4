//! Implementation of the Levenberg-Marquardt algorithm.
//!
//! Damped Gauss-Newton iterations on `(J^T J + λ D) δ = -J^T r` with Marquardt
//! scaling `D = diag(J^T J)`. The normal equations are factorized with faer's
//! Cholesky decomposition. An optional shared interrupt flag is polled once per
//! iteration; when it is raised the loop stops and reports the last accepted point.

use faer::linalg::solvers::{Llt as FaerLlt, Solve as FaerSolve};
use faer::{Mat, Side};
use log::debug;
use ndarray::{Array1, Array2};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Result, XpsFitError};
use crate::problem::Problem;
use crate::utils::finite_difference::jacobian_at;

use super::config::LmConfig;
use super::convergence::ConvergenceStatus;

/// Result of the Levenberg-Marquardt optimization.
#[derive(Debug, Clone)]
pub struct LmResult {
    /// Parameter vector at the last accepted point
    pub params: Array1<f64>,

    /// Residuals at `params`
    pub residuals: Array1<f64>,

    /// Sum of squared residuals
    pub cost: f64,

    /// Number of accepted iterations
    pub iterations: usize,

    /// Number of residual evaluations, including those spent on Jacobians
    pub func_evals: usize,

    pub status: ConvergenceStatus,

    /// Whether the optimization converged
    pub success: bool,

    pub message: String,
}

impl LmResult {
    pub fn interrupted(&self) -> bool {
        self.status == ConvergenceStatus::Interrupted
    }
}

impl fmt::Display for LmResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Optimization Result:")?;
        writeln!(f, "  Success: {}", self.success)?;
        writeln!(f, "  Message: {}", self.message)?;
        writeln!(f, "  Cost: {:.6e}", self.cost)?;
        writeln!(f, "  Iterations: {}", self.iterations)?;
        writeln!(f, "  Function evaluations: {}", self.func_evals)?;
        Ok(())
    }
}

/// The Levenberg-Marquardt optimizer.
#[derive(Debug, Clone, Default)]
pub struct LevenbergMarquardt {
    config: LmConfig,
    interrupt: Option<Arc<AtomicBool>>,
}

impl LevenbergMarquardt {
    /// Create a new Levenberg-Marquardt optimizer with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new Levenberg-Marquardt optimizer with the given configuration.
    pub fn with_config(config: LmConfig) -> Self {
        Self {
            config,
            interrupt: None,
        }
    }

    pub fn config(&self) -> &LmConfig {
        &self.config
    }

    /// Set the maximum number of iterations.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.config.max_iterations = max_iterations;
        self
    }

    /// Set the tolerance for the relative decrease of the cost.
    pub fn with_ftol(mut self, ftol: f64) -> Self {
        self.config.ftol = ftol;
        self
    }

    /// Set the tolerance for the relative step length.
    pub fn with_xtol(mut self, xtol: f64) -> Self {
        self.config.xtol = xtol;
        self
    }

    /// Set the tolerance for the gradient norm.
    pub fn with_gtol(mut self, gtol: f64) -> Self {
        self.config.gtol = gtol;
        self
    }

    /// Share a stop flag with another thread. Setting it to `true` ends the run at
    /// the start of the next iteration.
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(flag);
        self
    }

    fn interrupted(&self) -> bool {
        self.interrupt
            .as_ref()
            .map(|flag| flag.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    /// Minimize the sum of squared residuals of `problem`.
    ///
    /// # Arguments
    ///
    /// * `problem` - The problem to solve
    /// * `initial_params` - Initial guess for the parameter values
    ///
    /// # Returns
    ///
    /// * `Result<LmResult>` - The result of the optimization. Non-convergence and
    ///   interruption are reported through `success`/`status`, not as errors.
    pub fn minimize<P: Problem + ?Sized>(
        &self,
        problem: &P,
        initial_params: Array1<f64>,
    ) -> Result<LmResult> {
        let n_params = problem.parameter_count();
        if initial_params.len() != n_params {
            return Err(XpsFitError::DimensionMismatch(format!(
                "Expected {} parameters, got {}",
                n_params,
                initial_params.len()
            )));
        }

        let mut params = initial_params;
        let mut residuals = problem.eval(&params)?;
        let mut func_evals = 1;
        let mut cost = sum_of_squares(&residuals);
        let mut iterations = 0;

        let finish = |params: Array1<f64>,
                      residuals: Array1<f64>,
                      cost: f64,
                      iterations: usize,
                      func_evals: usize,
                      status: ConvergenceStatus| {
            debug!(
                "LM finished after {} iterations ({} evaluations): {:?}",
                iterations, func_evals, status
            );
            LmResult {
                params,
                residuals,
                cost,
                iterations,
                func_evals,
                status,
                success: status.is_converged(),
                message: status.description().to_string(),
            }
        };

        if !cost.is_finite() {
            return Ok(finish(
                params,
                residuals,
                cost,
                0,
                func_evals,
                ConvergenceStatus::NumericalError,
            ));
        }
        if n_params == 0 {
            return Ok(finish(
                params,
                residuals,
                cost,
                0,
                func_evals,
                ConvergenceStatus::NoFreeParameters,
            ));
        }

        let mut lambda = self.config.initial_lambda;

        loop {
            if self.interrupted() {
                return Ok(finish(
                    params,
                    residuals,
                    cost,
                    iterations,
                    func_evals,
                    ConvergenceStatus::Interrupted,
                ));
            }
            if iterations >= self.config.max_iterations {
                return Ok(finish(
                    params,
                    residuals,
                    cost,
                    iterations,
                    func_evals,
                    ConvergenceStatus::MaxIterationsReached,
                ));
            }

            let jac = if problem.has_custom_jacobian() {
                problem.jacobian(&params)?
            } else {
                func_evals += n_params;
                jacobian_at(problem, &params, &residuals, Some(self.config.diff_step))?
            };

            let jtj = jac.t().dot(&jac);
            let gradient = jac.t().dot(&residuals);

            let gnorm = gradient.iter().fold(0.0_f64, |m, g| m.max(g.abs()));
            if !gnorm.is_finite() {
                return Ok(finish(
                    params,
                    residuals,
                    cost,
                    iterations,
                    func_evals,
                    ConvergenceStatus::NumericalError,
                ));
            }
            if gnorm <= self.config.gtol {
                return Ok(finish(
                    params,
                    residuals,
                    cost,
                    iterations,
                    func_evals,
                    ConvergenceStatus::GradientConvergence,
                ));
            }

            // Inner loop: raise lambda until a step lowers the cost
            loop {
                let step = match solve_damped(&jtj, &gradient, lambda) {
                    Some(step) => step,
                    None => {
                        lambda *= self.config.lambda_up_factor;
                        if lambda > self.config.max_lambda {
                            return Ok(finish(
                                params,
                                residuals,
                                cost,
                                iterations,
                                func_evals,
                                ConvergenceStatus::LambdaOverflow,
                            ));
                        }
                        continue;
                    }
                };

                let step_norm = l2_norm(&step);
                let param_norm = l2_norm(&params);
                let small_step = step_norm <= self.config.xtol * (param_norm + self.config.xtol);

                let trial = &params + &step;
                let trial_residuals = problem.eval(&trial)?;
                func_evals += 1;
                let trial_cost = sum_of_squares(&trial_residuals);

                if trial_cost.is_finite() && trial_cost < cost {
                    let reduction = (cost - trial_cost) / cost.max(f64::MIN_POSITIVE);

                    params = trial;
                    residuals = trial_residuals;
                    cost = trial_cost;
                    iterations += 1;
                    lambda = (lambda * self.config.lambda_down_factor).max(self.config.min_lambda);

                    debug!(
                        "LM iteration {}: cost = {:.6e}, lambda = {:.1e}",
                        iterations, cost, lambda
                    );

                    if reduction <= self.config.ftol {
                        return Ok(finish(
                            params,
                            residuals,
                            cost,
                            iterations,
                            func_evals,
                            ConvergenceStatus::FunctionValueConvergence,
                        ));
                    }
                    if small_step {
                        return Ok(finish(
                            params,
                            residuals,
                            cost,
                            iterations,
                            func_evals,
                            ConvergenceStatus::ParameterConvergence,
                        ));
                    }
                    break;
                }

                // Rejected. A vanishing step means we already sit in the minimum.
                if small_step {
                    return Ok(finish(
                        params,
                        residuals,
                        cost,
                        iterations,
                        func_evals,
                        ConvergenceStatus::ParameterConvergence,
                    ));
                }

                lambda *= self.config.lambda_up_factor;
                if lambda > self.config.max_lambda {
                    return Ok(finish(
                        params,
                        residuals,
                        cost,
                        iterations,
                        func_evals,
                        ConvergenceStatus::LambdaOverflow,
                    ));
                }
            }
        }
    }
}

/// Solve `(J^T J + λ diag(J^T J)) δ = -J^T r` by Cholesky factorization.
///
/// Returns `None` when the damped matrix is not positive definite.
fn solve_damped(jtj: &Array2<f64>, gradient: &Array1<f64>, lambda: f64) -> Option<Array1<f64>> {
    let n = gradient.len();
    // Columns with no sensitivity still need a positive diagonal
    let scale: Vec<f64> = (0..n)
        .map(|i| {
            let d = jtj[[i, i]];
            if d > 0.0 && d.is_finite() {
                d
            } else {
                1.0
            }
        })
        .collect();

    let a = Mat::<f64>::from_fn(n, n, |i, j| {
        if i == j {
            jtj[[i, j]] + lambda * scale[i]
        } else {
            jtj[[i, j]]
        }
    });
    let rhs = Mat::<f64>::from_fn(n, 1, |i, _| -gradient[i]);

    let llt = FaerLlt::new(a.as_ref(), Side::Lower).ok()?;
    let solution = llt.solve(rhs.as_ref());

    let step = Array1::from_shape_fn(n, |i| solution[(i, 0)]);
    if step.iter().all(|v| v.is_finite()) {
        Some(step)
    } else {
        None
    }
}

fn sum_of_squares(residuals: &Array1<f64>) -> f64 {
    residuals.iter().map(|r| r * r).sum()
}

fn l2_norm(v: &Array1<f64>) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    struct ExpDecay {
        x: Array1<f64>,
        y: Array1<f64>,
    }

    impl Problem for ExpDecay {
        fn eval(&self, p: &Array1<f64>) -> Result<Array1<f64>> {
            Ok(&self.y - &self.x.mapv(|x| p[0] * (-p[1] * x).exp() + p[2]))
        }

        fn parameter_count(&self) -> usize {
            3
        }

        fn residual_count(&self) -> usize {
            self.x.len()
        }
    }

    fn decay() -> ExpDecay {
        let x = Array1::linspace(0.0, 10.0, 50);
        let y = x.mapv(|x: f64| 5.0 * (-0.7 * x).exp() + 1.5);
        ExpDecay { x, y }
    }

    #[test]
    fn test_exponential_fit() {
        let problem = decay();
        let result = LevenbergMarquardt::new()
            .minimize(&problem, Array1::from_vec(vec![1.0, 0.2, 0.0]))
            .unwrap();

        assert!(result.success, "{}", result.message);
        assert_relative_eq!(result.params[0], 5.0, epsilon = 1e-5);
        assert_relative_eq!(result.params[1], 0.7, epsilon = 1e-5);
        assert_relative_eq!(result.params[2], 1.5, epsilon = 1e-5);
        assert!(result.cost < 1e-12);
    }

    #[test]
    fn test_interrupt_before_first_iteration() {
        let problem = decay();
        let flag = Arc::new(AtomicBool::new(true));
        let result = LevenbergMarquardt::new()
            .with_interrupt(flag)
            .minimize(&problem, Array1::from_vec(vec![1.0, 0.2, 0.0]))
            .unwrap();

        assert!(!result.success);
        assert!(result.interrupted());
        assert_eq!(result.iterations, 0);
        assert_eq!(result.params[0], 1.0);
    }

    #[test]
    fn test_max_iterations() {
        let problem = decay();
        let result = LevenbergMarquardt::new()
            .with_max_iterations(1)
            .minimize(&problem, Array1::from_vec(vec![1.0, 0.2, 0.0]))
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.status, ConvergenceStatus::MaxIterationsReached);
    }

    #[test]
    fn test_non_finite_start() {
        struct Nan;
        impl Problem for Nan {
            fn eval(&self, _p: &Array1<f64>) -> Result<Array1<f64>> {
                Ok(Array1::from_elem(3, f64::NAN))
            }
            fn parameter_count(&self) -> usize {
                1
            }
            fn residual_count(&self) -> usize {
                3
            }
        }

        let result = LevenbergMarquardt::new()
            .minimize(&Nan, Array1::from_vec(vec![0.0]))
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.status, ConvergenceStatus::NumericalError);
    }

    #[test]
    fn test_dimension_mismatch() {
        let problem = decay();
        assert!(LevenbergMarquardt::new()
            .minimize(&problem, Array1::from_vec(vec![1.0]))
            .is_err());
    }
}
