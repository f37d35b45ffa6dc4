//! Problem definition for least-squares solvers.
//!
//! A [`Problem`] maps a flat parameter vector onto a residual vector. The solver in
//! [`crate::lm`] minimizes the sum of squared residuals. [`crate::model::ModelProblem`]
//! is the implementation that connects a composite spectral model to the solver.

use crate::error::Result;
use ndarray::{Array1, Array2};

/// A nonlinear least-squares problem.
pub trait Problem {
    /// Evaluate the residuals at the given parameter values.
    ///
    /// # Arguments
    ///
    /// * `params` - Parameter vector of length [`Problem::parameter_count`]
    ///
    /// # Returns
    ///
    /// * Residual vector of length [`Problem::residual_count`]
    fn eval(&self, params: &Array1<f64>) -> Result<Array1<f64>>;

    /// Number of parameters.
    fn parameter_count(&self) -> usize;

    /// Number of residuals.
    fn residual_count(&self) -> usize;

    /// Jacobian of the residuals, `J[i, j] = d r_i / d p_j`.
    ///
    /// Defaults to forward finite differences.
    fn jacobian(&self, params: &Array1<f64>) -> Result<Array2<f64>> {
        crate::utils::finite_difference::jacobian(self, params, None)
    }

    /// Whether [`Problem::jacobian`] is analytic. The solver uses finite differences
    /// with its configured step otherwise.
    fn has_custom_jacobian(&self) -> bool {
        false
    }

    /// Sum of squared residuals.
    fn eval_cost(&self, params: &Array1<f64>) -> Result<f64> {
        let residuals = self.eval(params)?;
        Ok(residuals.iter().map(|r| r * r).sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// y = a * exp(-b x) on a fixed grid
    struct Decay {
        x: Array1<f64>,
        y: Array1<f64>,
    }

    impl Problem for Decay {
        fn eval(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
            Ok(&self.y - &self.x.mapv(|x| params[0] * (-params[1] * x).exp()))
        }

        fn parameter_count(&self) -> usize {
            2
        }

        fn residual_count(&self) -> usize {
            self.x.len()
        }
    }

    #[test]
    fn test_default_jacobian_and_cost() {
        let x = Array1::linspace(0.0, 2.0, 5);
        let y = x.mapv(|x: f64| 3.0 * (-0.5 * x).exp());
        let problem = Decay { x: x.clone(), y };
        let params = Array1::from_vec(vec![3.0, 0.5]);

        assert_relative_eq!(problem.eval_cost(&params).unwrap(), 0.0, epsilon = 1e-20);

        let jac = problem.jacobian(&params).unwrap();
        assert_eq!(jac.dim(), (5, 2));
        for (i, &xi) in x.iter().enumerate() {
            assert_relative_eq!(jac[[i, 0]], -(-0.5 * xi).exp(), epsilon = 1e-6);
            assert_relative_eq!(jac[[i, 1]], 3.0 * xi * (-0.5 * xi).exp(), epsilon = 1e-6);
        }
    }
}
