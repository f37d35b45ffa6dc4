//! Clipping a spectrum to an energy window.

use ndarray::{s, Array1};
use serde::{Deserialize, Serialize};

use crate::error::{Result, XpsFitError};

/// Energy window; the bounds may be given in either order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitRange {
    pub xmin: f64,
    pub xmax: f64,
}

impl FitRange {
    pub fn new(xmin: f64, xmax: f64) -> Self {
        Self { xmin, xmax }
    }

    /// Bounds as `(low, high)`
    pub fn ordered(&self) -> (f64, f64) {
        if self.xmin > self.xmax {
            (self.xmax, self.xmin)
        } else {
            (self.xmin, self.xmax)
        }
    }
}

/// Clip `(x, y)` to the samples with `x` inside `[xmin, xmax]`.
///
/// # Arguments
///
/// * `x` - Monotonic energy grid, ascending or descending
/// * `y` - Intensities
/// * `xmin`, `xmax` - Window bounds, in either order
///
/// # Returns
///
/// * Owned copies of the contiguous sub-arrays, in the direction of the input
///
/// # Errors
///
/// * [`XpsFitError::EmptyRange`] when no sample lies inside the window
///
/// # Examples
///
/// ```
/// use ndarray::array;
/// use xpsfit_rs::range::fit_range;
///
/// let x = array![5.0, 4.0, 3.0, 2.0, 1.0];
/// let y = array![50.0, 40.0, 30.0, 20.0, 10.0];
/// let (xc, yc) = fit_range(&x, &y, 1.5, 4.0).unwrap();
/// assert_eq!(xc, array![4.0, 3.0, 2.0]);
/// assert_eq!(yc, array![40.0, 30.0, 20.0]);
/// ```
pub fn fit_range(
    x: &Array1<f64>,
    y: &Array1<f64>,
    xmin: f64,
    xmax: f64,
) -> Result<(Array1<f64>, Array1<f64>)> {
    if x.len() != y.len() {
        return Err(XpsFitError::DimensionMismatch(format!(
            "x has {} samples, y has {}",
            x.len(),
            y.len()
        )));
    }
    let (lo, hi) = FitRange::new(xmin, xmax).ordered();
    let n = x.len();
    let empty = || {
        let (dlo, dhi) = if n == 0 {
            (f64::NAN, f64::NAN)
        } else {
            (x[0].min(x[n - 1]), x[0].max(x[n - 1]))
        };
        XpsFitError::EmptyRange {
            xmin: lo,
            xmax: hi,
            lo: dlo,
            hi: dhi,
        }
    };
    if n == 0 || lo.is_nan() || hi.is_nan() {
        return Err(empty());
    }

    let inside = |v: f64| v >= lo && v <= hi;
    let start = x.iter().position(|&v| inside(v)).ok_or_else(empty)?;
    let end = n - x.iter().rev().position(|&v| inside(v)).ok_or_else(empty)?;

    if start == 0 && end == n {
        return Ok((x.clone(), y.clone()));
    }
    Ok((
        x.slice(s![start..end]).to_owned(),
        y.slice(s![start..end]).to_owned(),
    ))
}
