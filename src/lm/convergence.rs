//! Termination states of the Levenberg-Marquardt loop.

use serde::{Deserialize, Serialize};

/// Why the optimizer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvergenceStatus {
    /// Relative decrease of the sum of squares fell below `ftol`.
    FunctionValueConvergence,

    /// Relative step length fell below `xtol`.
    ParameterConvergence,

    /// Max-norm of the gradient fell below `gtol`.
    GradientConvergence,

    /// Nothing left to optimize.
    NoFreeParameters,

    MaxIterationsReached,

    /// Damping grew past `max_lambda` without finding a better point.
    LambdaOverflow,

    /// The residuals became NaN or infinite.
    NumericalError,

    /// The interrupt flag was raised.
    Interrupted,
}

impl ConvergenceStatus {
    /// Returns true if the optimization has converged.
    pub fn is_converged(&self) -> bool {
        matches!(
            self,
            ConvergenceStatus::FunctionValueConvergence
                | ConvergenceStatus::ParameterConvergence
                | ConvergenceStatus::GradientConvergence
                | ConvergenceStatus::NoFreeParameters
        )
    }

    /// Returns a description of the convergence status.
    pub fn description(&self) -> &'static str {
        match self {
            ConvergenceStatus::FunctionValueConvergence => {
                "Fit succeeded: relative reduction in sum of squares is at most ftol"
            }
            ConvergenceStatus::ParameterConvergence => {
                "Fit succeeded: relative step between iterates is at most xtol"
            }
            ConvergenceStatus::GradientConvergence => {
                "Fit succeeded: gradient is orthogonal to the residuals within gtol"
            }
            ConvergenceStatus::NoFreeParameters => "No free parameters: model evaluated as is",
            ConvergenceStatus::MaxIterationsReached => {
                "Fit aborted: maximum number of iterations reached"
            }
            ConvergenceStatus::LambdaOverflow => {
                "Fit aborted: damping reached its maximum without reducing the sum of squares"
            }
            ConvergenceStatus::NumericalError => {
                "Fit aborted: residuals are not finite (check zero or negative data with weights)"
            }
            ConvergenceStatus::Interrupted => "Fit interrupted by user",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_flags() {
        assert!(ConvergenceStatus::GradientConvergence.is_converged());
        assert!(!ConvergenceStatus::Interrupted.is_converged());
        assert!(ConvergenceStatus::Interrupted
            .description()
            .contains("interrupted"));
    }
}
