//! Forward finite-difference Jacobian.

use crate::error::{Result, XpsFitError};
use crate::problem::Problem;
use ndarray::{Array1, Array2};

/// Default relative step, the square root of machine epsilon.
pub const DEFAULT_EPSILON: f64 = 1.490_116_119_384_765_6e-8;

/// Compute the Jacobian matrix using forward finite differences.
///
/// The step for parameter `j` is `eps * max(|p_j|, 1)`.
///
/// # Arguments
///
/// * `problem` - The problem to evaluate
/// * `params` - The parameter values at which to evaluate the Jacobian
/// * `epsilon` - The relative step (defaults to [`DEFAULT_EPSILON`])
///
/// # Returns
///
/// * `Result<Array2<f64>>` - The `n_residuals x n_params` Jacobian
pub fn jacobian<P: Problem + ?Sized>(
    problem: &P,
    params: &Array1<f64>,
    epsilon: Option<f64>,
) -> Result<Array2<f64>> {
    let residuals = problem.eval(params)?;
    jacobian_at(problem, params, &residuals, epsilon)
}

/// Same as [`jacobian`] but reuses residuals already evaluated at `params`.
pub fn jacobian_at<P: Problem + ?Sized>(
    problem: &P,
    params: &Array1<f64>,
    residuals: &Array1<f64>,
    epsilon: Option<f64>,
) -> Result<Array2<f64>> {
    let eps = epsilon.unwrap_or(DEFAULT_EPSILON);
    let n_params = params.len();
    let n_residuals = residuals.len();

    if n_residuals != problem.residual_count() {
        return Err(XpsFitError::DimensionMismatch(format!(
            "Expected {} residuals, got {}",
            problem.residual_count(),
            n_residuals
        )));
    }

    let mut jac = Array2::zeros((n_residuals, n_params));
    let mut perturbed = params.clone();

    for j in 0..n_params {
        let step = eps * params[j].abs().max(1.0);
        perturbed[j] = params[j] + step;
        let residuals_perturbed = problem.eval(&perturbed)?;
        perturbed[j] = params[j];

        let mut column = jac.column_mut(j);
        for i in 0..n_residuals {
            column[i] = (residuals_perturbed[i] - residuals[i]) / step;
        }
    }

    Ok(jac)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    struct Quadratic;

    impl Problem for Quadratic {
        fn eval(&self, p: &Array1<f64>) -> Result<Array1<f64>> {
            Ok(Array1::from_vec(vec![p[0] * p[0], p[0] * p[1], 300.0 * p[1]]))
        }

        fn parameter_count(&self) -> usize {
            2
        }

        fn residual_count(&self) -> usize {
            3
        }
    }

    #[test]
    fn test_forward_difference() {
        let p = Array1::from_vec(vec![2.0, 284.6]);
        let jac = jacobian(&Quadratic, &p, None).unwrap();

        assert_relative_eq!(jac[[0, 0]], 4.0, epsilon = 1e-6);
        assert_relative_eq!(jac[[0, 1]], 0.0);
        assert_relative_eq!(jac[[1, 0]], 284.6, epsilon = 1e-5);
        assert_relative_eq!(jac[[1, 1]], 2.0, epsilon = 1e-5);
        assert_relative_eq!(jac[[2, 1]], 300.0, epsilon = 1e-4);
    }
}
