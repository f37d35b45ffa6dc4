//! # Goodness-of-fit statistics and parameter uncertainties
//!
//! Chi-square, reduced chi-square, AIC and BIC follow lmfit's definitions:
//!
//! ```text
//! chisqr = sum(r²)            nfree  = ndata - nvarys
//! redchi = chisqr / nfree     -2lnL  = ndata * ln(chisqr / ndata)
//! aic    = -2lnL + 2 nvarys   bic    = -2lnL + ln(ndata) nvarys
//! ```
//!
//! The covariance matrix is `inv(J^T J)`, scaled by `redchi` when requested, with
//! `J` the Jacobian of the weighted residuals with respect to the external
//! parameter values.

use faer::linalg::solvers::{Llt as FaerLlt, Solve as FaerSolve};
use faer::{Mat, Side};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::error::{Result, XpsFitError};

/// Goodness-of-fit statistics of a fit or evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitStatistics {
    pub ndata: usize,
    pub nvarys: usize,
    pub nfree: usize,
    pub chisqr: f64,
    pub redchi: f64,
    pub aic: f64,
    pub bic: f64,
}

impl FitStatistics {
    /// Statistics of a (weighted) residual vector with `nvarys` free parameters.
    ///
    /// # Examples
    ///
    /// ```
    /// use ndarray::Array1;
    /// use xpsfit_rs::statistics::FitStatistics;
    ///
    /// let stats = FitStatistics::from_residuals(&Array1::from_elem(10, 1.0), 2);
    /// assert_eq!(stats.chisqr, 10.0);
    /// assert_eq!(stats.nfree, 8);
    /// assert_eq!(stats.redchi, 10.0 / 8.0);
    /// ```
    pub fn from_residuals(residuals: &Array1<f64>, nvarys: usize) -> Self {
        let ndata = residuals.len();
        let nfree = ndata.saturating_sub(nvarys);
        let chisqr: f64 = residuals.iter().map(|r| r * r).sum();
        let redchi = chisqr / nfree.max(1) as f64;

        let n = ndata.max(1) as f64;
        let neg2_log_likel = n * (chisqr.max(1e-250 * n) / n).ln();
        let aic = neg2_log_likel + 2.0 * nvarys as f64;
        let bic = neg2_log_likel + n.ln() * nvarys as f64;

        Self {
            ndata,
            nvarys,
            nfree,
            chisqr,
            redchi,
            aic,
            bic,
        }
    }
}

/// Covariance matrix `scale * inv(J^T J)`.
///
/// # Arguments
///
/// * `jacobian` - `ndata x nvarys` Jacobian of the weighted residuals
/// * `scale` - Multiplier, normally the reduced chi-square
///
/// # Returns
///
/// * The `nvarys x nvarys` covariance, or `SingularMatrix` when `J^T J` is not
///   positive definite
pub fn covariance(jacobian: &Array2<f64>, scale: f64) -> Result<Array2<f64>> {
    let n = jacobian.ncols();
    let jtj = jacobian.t().dot(jacobian);
    if jtj.iter().any(|v| !v.is_finite()) {
        return Err(XpsFitError::LinearAlgebra(
            "J^T J contains non-finite entries".to_string(),
        ));
    }

    let a = Mat::<f64>::from_fn(n, n, |i, j| jtj[[i, j]]);
    let llt = FaerLlt::new(a.as_ref(), Side::Lower).map_err(|_| XpsFitError::SingularMatrix)?;
    let identity = Mat::<f64>::from_fn(n, n, |i, j| if i == j { 1.0 } else { 0.0 });
    let inverse = llt.solve(identity.as_ref());

    let covar = Array2::from_shape_fn((n, n), |(i, j)| {
        // symmetrize round-off
        0.5 * (inverse[(i, j)] + inverse[(j, i)]) * scale
    });
    if covar.diag().iter().any(|v| !v.is_finite() || *v < 0.0) {
        return Err(XpsFitError::SingularMatrix);
    }
    Ok(covar)
}

/// Correlation matrix, `covar[i,j] / sqrt(covar[i,i] covar[j,j])`.
pub fn correlation(covar: &Array2<f64>) -> Array2<f64> {
    let n = covar.nrows();
    Array2::from_shape_fn((n, n), |(i, j)| {
        if i == j {
            return 1.0;
        }
        let denom = (covar[[i, i]] * covar[[j, j]]).sqrt();
        if denom > 0.0 {
            covar[[i, j]] / denom
        } else {
            0.0
        }
    })
}

/// Square roots of the covariance diagonal.
pub fn standard_errors(covar: &Array2<f64>) -> Array1<f64> {
    covar.diag().mapv(|v| if v > 0.0 { v.sqrt() } else { 0.0 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_statistics_match_lmfit_definitions() {
        let residuals = array![0.5, -1.0, 1.5, -0.5, 1.0, 0.0];
        let stats = FitStatistics::from_residuals(&residuals, 2);

        let chisqr = 0.25 + 1.0 + 2.25 + 0.25 + 1.0;
        assert_relative_eq!(stats.chisqr, chisqr);
        assert_eq!(stats.nfree, 4);
        assert_relative_eq!(stats.redchi, chisqr / 4.0);

        let neg2 = 6.0 * (chisqr / 6.0).ln();
        assert_relative_eq!(stats.aic, neg2 + 4.0, epsilon = 1e-12);
        assert_relative_eq!(stats.bic, neg2 + 6.0_f64.ln() * 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_perfect_fit_is_finite() {
        let stats = FitStatistics::from_residuals(&Array1::zeros(5), 1);
        assert!(stats.aic.is_finite());
        assert!(stats.bic.is_finite());
    }

    #[test]
    fn test_covariance_of_linear_model() {
        // y = a + b x: J columns are 1 and x
        let x = array![0.0, 1.0, 2.0, 3.0];
        let mut jac = Array2::zeros((4, 2));
        for i in 0..4 {
            jac[[i, 0]] = 1.0;
            jac[[i, 1]] = x[i];
        }
        let covar = covariance(&jac, 1.0).unwrap();

        // inv([[4, 6], [6, 14]]) = [[0.7, -0.3], [-0.3, 0.2]]
        assert_relative_eq!(covar[[0, 0]], 0.7, epsilon = 1e-12);
        assert_relative_eq!(covar[[0, 1]], -0.3, epsilon = 1e-12);
        assert_relative_eq!(covar[[1, 1]], 0.2, epsilon = 1e-12);

        let errs = standard_errors(&covar);
        assert_relative_eq!(errs[1], 0.2_f64.sqrt(), epsilon = 1e-12);

        let correl = correlation(&covar);
        assert_relative_eq!(correl[[0, 1]], -0.3 / (0.7_f64 * 0.2).sqrt(), epsilon = 1e-12);
        assert_eq!(correl[[1, 1]], 1.0);
    }

    #[test]
    fn test_singular_covariance() {
        let mut jac = Array2::zeros((3, 2));
        jac.column_mut(0).fill(1.0);
        assert!(covariance(&jac, 1.0).is_err());
    }
}
