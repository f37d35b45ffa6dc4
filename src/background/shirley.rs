//! Iterative Shirley background.
//!
//! The background at each energy is proportional to the peak intensity integrated
//! from that energy down to the right-hand minimum. Processing runs in descending
//! energy order; ascending input is reversed internally and restored on output.

use log::{debug, warn};
use ndarray::{s, Array1};
use serde::{Deserialize, Serialize};

use super::orientation::Oriented;
use crate::error::{Result, XpsFitError};
use crate::utils::integrate::trapezoid;

/// Convergence settings of the Shirley iteration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShirleyConfig {
    /// Stop once the squared change of the background drops below `tol²`. Default: 1e-5
    pub tol: f64,

    /// Maximum number of refinements. Default: 10
    pub max_iterations: usize,
}

impl Default for ShirleyConfig {
    fn default() -> Self {
        Self {
            tol: 1e-5,
            max_iterations: 10,
        }
    }
}

impl ShirleyConfig {
    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }
}

/// Shirley background of a single spectrum.
///
/// # Arguments
///
/// * `x` - Monotonic energy grid, ascending or descending
/// * `y` - Intensities
/// * `config` - Tolerance and iteration limit
///
/// # Returns
///
/// * The background in the order of `x`. A maximum at either end of the spectrum has
///   no defined step and yields an all-zero background.
///
/// # Examples
///
/// ```
/// use ndarray::Array1;
/// use xpsfit_rs::background::{shirley, ShirleyConfig};
///
/// let x = Array1::linspace(300.0, 270.0, 61);
/// let y = x.mapv(|v: f64| {
///     let step = if v > 285.0 { 200.0 } else { 0.0 };
///     100.0 + step + 1000.0 * (-(v - 285.0).powi(2) / 2.0).exp()
/// });
/// let bg = shirley(&x, &y, &ShirleyConfig::default()).unwrap();
/// assert!(bg[0] > bg[60]);
/// ```
pub fn shirley(x: &Array1<f64>, y: &Array1<f64>, config: &ShirleyConfig) -> Result<Array1<f64>> {
    if x.len() != y.len() {
        return Err(XpsFitError::DimensionMismatch(format!(
            "x has {} samples, y has {}",
            x.len(),
            y.len()
        )));
    }
    let n = y.len();
    if n < 3 {
        warn!("Shirley background needs at least 3 samples, got {}", n);
        return Ok(Array1::zeros(n));
    }

    let data = Oriented::descending(x, y);
    let (x, y) = (&data.x, &data.y);

    let maxidx = argmax(y.iter());
    if maxidx == 0 || maxidx == n - 1 {
        warn!("Shirley background: maximum at the spectrum boundary, returning zero background");
        return Ok(Array1::zeros(n));
    }

    let lmidx = argmin(y.slice(s![..maxidx]).iter());
    let rmidx = maxidx + argmin(y.slice(s![maxidx..]).iter());
    let yl = y[lmidx];
    let yr = y[rmidx];

    let mut bg = Array1::<f64>::zeros(n);
    bg.slice_mut(s![..lmidx]).fill(yl - yr);

    for iteration in 0..config.max_iterations {
        let integrand = &y.slice(s![lmidx..=rmidx]) - yr - &bg.slice(s![lmidx..=rmidx]);
        let ksum = trapezoid(x.slice(s![lmidx..=rmidx]), integrand.view());
        if ksum == 0.0 || !ksum.is_finite() {
            warn!("Shirley background: vanishing peak integral, stopping refinement");
            break;
        }
        let k = (yl - yr) / ksum;

        let mut updated = bg.clone();
        for i in lmidx..rmidx {
            let tail = trapezoid(x.slice(s![i..=rmidx]), integrand.slice(s![i - lmidx..]));
            updated[i] = k * tail;
        }

        let change: f64 = (&updated - &bg).mapv(|d| d * d).sum();
        bg = updated;
        if change < config.tol * config.tol {
            debug!("Shirley background converged after {} iterations", iteration + 1);
            break;
        }
    }

    Ok(data.restore(bg + yr))
}

fn argmax<'a>(values: impl Iterator<Item = &'a f64>) -> usize {
    values
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
        .0
}

fn argmin<'a>(values: impl Iterator<Item = &'a f64>) -> usize {
    values
        .enumerate()
        .fold((0, f64::INFINITY), |best, (i, &v)| if v < best.1 { (i, v) } else { best })
        .0
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn step_spectrum(x: &Array1<f64>) -> Array1<f64> {
        x.mapv(|v| {
            let step = 300.0 * 0.5 * (1.0 + libm::erf((v - 285.0) / 0.8));
            150.0 + step + 2000.0 * (-(v - 285.0).powi(2) / (2.0 * 0.7 * 0.7)).exp()
        })
    }

    fn minima(y: &Array1<f64>) -> (usize, usize) {
        let maxidx = argmax(y.iter());
        let lmidx = argmin(y.slice(s![..maxidx]).iter());
        let rmidx = maxidx + argmin(y.slice(s![maxidx..]).iter());
        (lmidx, rmidx)
    }

    #[test]
    fn test_boundary_values_descending() {
        let x = Array1::linspace(295.0, 275.0, 201);
        let y = step_spectrum(&x);
        let bg = shirley(&x, &y, &ShirleyConfig::default()).unwrap();

        let (lmidx, rmidx) = minima(&y);
        assert_relative_eq!(bg[lmidx], y[lmidx], epsilon = 1e-9);
        assert_relative_eq!(bg[rmidx], y[rmidx], epsilon = 1e-9);
        // flat outside the minima
        assert_relative_eq!(bg[0], y[lmidx], epsilon = 1e-9);
        assert_relative_eq!(bg[200], y[rmidx], epsilon = 1e-9);
        // monotonic step between them
        for i in lmidx..rmidx {
            assert!(bg[i] >= bg[i + 1] - 1e-9);
        }
    }

    #[test]
    fn test_orientation_is_restored() {
        let xd = Array1::linspace(295.0, 275.0, 201);
        let yd = step_spectrum(&xd);
        let bgd = shirley(&xd, &yd, &ShirleyConfig::default()).unwrap();

        let xa = xd.slice(s![..;-1]).to_owned();
        let ya = yd.slice(s![..;-1]).to_owned();
        let bga = shirley(&xa, &ya, &ShirleyConfig::default()).unwrap();

        for i in 0..201 {
            assert_relative_eq!(bga[i], bgd[200 - i], epsilon = 1e-9);
        }
    }

    #[test]
    fn test_maximum_at_boundary_gives_zero() {
        let x = Array1::linspace(290.0, 280.0, 11);
        let y = x.mapv(|v| v - 280.0);
        let bg = shirley(&x, &y, &ShirleyConfig::default()).unwrap();
        assert!(bg.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_tolerance_is_configurable() {
        let x = Array1::linspace(295.0, 275.0, 201);
        let y = step_spectrum(&x);
        let one = shirley(&x, &y, &ShirleyConfig::default().with_max_iterations(1)).unwrap();
        let many = shirley(&x, &y, &ShirleyConfig::default().with_tol(1e-12).with_max_iterations(50))
            .unwrap();
        // both satisfy the boundary condition, the interior differs
        let (lmidx, _) = minima(&y);
        assert_relative_eq!(one[lmidx], many[lmidx], epsilon = 1e-9);
        assert!((&one - &many).iter().any(|d| d.abs() > 1e-6));
    }

    #[test]
    fn test_length_mismatch() {
        let x = Array1::linspace(0.0, 1.0, 5);
        let y = Array1::zeros(4);
        assert!(shirley(&x, &y, &ShirleyConfig::default()).is_err());
    }
}
