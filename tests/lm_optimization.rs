//! Integration tests for the Levenberg-Marquardt solver on plain residual problems.

use approx::assert_relative_eq;
use ndarray::{array, Array1, Array2};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use xpsfit_rs::lm::{ConvergenceStatus, LevenbergMarquardt, LmConfig};
use xpsfit_rs::{Problem, Result, XpsFitError};

/// f(x) = a * x + b
struct LinearModel {
    x_data: Array1<f64>,
    y_data: Array1<f64>,
}

impl LinearModel {
    fn new(x_data: Array1<f64>, y_data: Array1<f64>) -> Self {
        assert_eq!(x_data.len(), y_data.len(), "x and y data must have the same length");
        Self { x_data, y_data }
    }
}

impl Problem for LinearModel {
    fn eval(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
        if params.len() != 2 {
            return Err(XpsFitError::DimensionMismatch(format!(
                "Expected 2 parameters, got {}",
                params.len()
            )));
        }
        let (a, b) = (params[0], params[1]);
        Ok(self
            .x_data
            .iter()
            .zip(self.y_data.iter())
            .map(|(x, y)| a * x + b - y)
            .collect())
    }

    fn parameter_count(&self) -> usize {
        2
    }

    fn residual_count(&self) -> usize {
        self.x_data.len()
    }

    fn jacobian(&self, _params: &Array1<f64>) -> Result<Array2<f64>> {
        let n = self.x_data.len();
        let mut jac = Array2::zeros((n, 2));
        for i in 0..n {
            jac[[i, 0]] = self.x_data[i];
            jac[[i, 1]] = 1.0;
        }
        Ok(jac)
    }

    fn has_custom_jacobian(&self) -> bool {
        true
    }
}

/// f(x) = a * exp(-b * x), numerical Jacobian
struct ExponentialModel {
    x_data: Array1<f64>,
    y_data: Array1<f64>,
}

impl Problem for ExponentialModel {
    fn eval(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
        let (a, b) = (params[0], params[1]);
        Ok(self
            .x_data
            .iter()
            .zip(self.y_data.iter())
            .map(|(x, y)| a * (-b * x).exp() - y)
            .collect())
    }

    fn parameter_count(&self) -> usize {
        2
    }

    fn residual_count(&self) -> usize {
        self.x_data.len()
    }
}

/// (1-x)² + 100(y-x²)² as two residuals
struct RosenbrockProblem;

impl Problem for RosenbrockProblem {
    fn eval(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
        let (x, y) = (params[0], params[1]);
        Ok(array![1.0 - x, 10.0 * (y - x.powi(2))])
    }

    fn parameter_count(&self) -> usize {
        2
    }

    fn residual_count(&self) -> usize {
        2
    }

    fn jacobian(&self, params: &Array1<f64>) -> Result<Array2<f64>> {
        let x = params[0];
        Ok(array![[-1.0, 0.0], [-20.0 * x, 10.0]])
    }

    fn has_custom_jacobian(&self) -> bool {
        true
    }
}

#[test]
fn test_linear_fit() {
    let x = array![0.0, 1.0, 2.0, 3.0, 4.0, 5.0];
    let y = array![3.1, 4.9, 7.1, 8.9, 11.1, 12.9];
    let model = LinearModel::new(x, y);

    let result = LevenbergMarquardt::new().minimize(&model, array![1.0, 1.0]).unwrap();

    assert!(result.success, "{}", result.message);
    assert_relative_eq!(result.params[0], 2.0, epsilon = 0.1);
    assert_relative_eq!(result.params[1], 3.0, epsilon = 0.1);
    assert!(result.cost < 0.2);
}

#[test]
fn test_exact_linear_data() {
    let x = array![0.0, 1.0, 2.0, 3.0];
    let y = array![1.0, 3.0, 5.0, 7.0];
    let model = LinearModel::new(x, y);

    let result = LevenbergMarquardt::new().minimize(&model, array![0.0, 0.0]).unwrap();

    assert!(result.success, "{}", result.message);
    assert_relative_eq!(result.params[0], 2.0, epsilon = 1e-6);
    assert_relative_eq!(result.params[1], 1.0, epsilon = 1e-6);
}

#[test]
fn test_exponential_fit() {
    let x = array![0.0, 0.5, 1.0, 1.5, 2.0, 2.5, 3.0, 3.5, 4.0];
    let y = array![2.02, 1.67, 1.21, 0.98, 0.81, 0.62, 0.45, 0.39, 0.29];
    let model = ExponentialModel { x_data: x, y_data: y };

    let config = LmConfig {
        max_iterations: 100,
        ftol: 1e-6,
        xtol: 1e-6,
        gtol: 1e-6,
        ..LmConfig::default()
    };
    let result = LevenbergMarquardt::with_config(config)
        .minimize(&model, array![1.0, 0.1])
        .unwrap();

    assert!(result.success, "{}", result.message);
    assert_relative_eq!(result.params[0], 2.0, epsilon = 0.1);
    assert_relative_eq!(result.params[1], 0.5, epsilon = 0.1);
    assert!(result.cost < 0.01);
}

#[test]
fn test_rosenbrock_optimization() {
    let config = LmConfig {
        max_iterations: 200,
        ..LmConfig::default()
    };
    let result = LevenbergMarquardt::with_config(config)
        .minimize(&RosenbrockProblem, array![-1.2, 1.0])
        .unwrap();

    assert!(result.success, "{}", result.message);
    assert_relative_eq!(result.params[0], 1.0, epsilon = 1e-4);
    assert_relative_eq!(result.params[1], 1.0, epsilon = 1e-4);
    assert!(result.cost < 1e-8);
}

#[test]
fn test_multiple_starting_points() {
    let x = array![0.0, 1.0, 2.0, 3.0, 4.0, 5.0];
    let y = array![3.0, 5.0, 7.0, 9.0, 11.0, 13.0];
    let model = LinearModel::new(x, y);
    let lm = LevenbergMarquardt::new();

    let starting_points = [
        array![1.0, 1.0],
        array![0.0, 0.0],
        array![10.0, 10.0],
        array![-5.0, -5.0],
    ];

    for (i, initial_params) in starting_points.iter().enumerate() {
        let result = lm.minimize(&model, initial_params.clone()).unwrap();
        assert_relative_eq!(result.params[0], 2.0, epsilon = 1e-4);
        assert_relative_eq!(result.params[1], 3.0, epsilon = 1e-4);
        assert!(result.cost < 1e-8, "starting point {} ended at cost {}", i, result.cost);
    }
}

#[test]
fn test_raised_interrupt_returns_start() {
    let flag = Arc::new(AtomicBool::new(true));
    let result = LevenbergMarquardt::new()
        .with_interrupt(flag)
        .minimize(&RosenbrockProblem, array![-1.2, 1.0])
        .unwrap();

    assert_eq!(result.status, ConvergenceStatus::Interrupted);
    assert_eq!(result.params, array![-1.2, 1.0]);
}

#[test]
fn test_wrong_parameter_count() {
    let model = LinearModel::new(array![0.0, 1.0], array![0.0, 1.0]);
    let err = LevenbergMarquardt::new().minimize(&model, array![1.0, 1.0, 1.0]);
    assert!(matches!(err, Err(XpsFitError::DimensionMismatch(_))));
}
