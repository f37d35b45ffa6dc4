//! Trapezoid integrals over sampled spectra.

use ndarray::{Array1, ArrayView1};

/// Trapezoid integral of `y` over `x`. Sign follows the direction of `x`.
pub fn trapezoid(x: ArrayView1<f64>, y: ArrayView1<f64>) -> f64 {
    x.windows(2)
        .into_iter()
        .zip(y.windows(2))
        .map(|(xw, yw)| 0.5 * (xw[1] - xw[0]) * (yw[0] + yw[1]))
        .sum()
}

/// `out[i] = sum(values[i..])`
pub fn cumulative_sum_from_end(values: ArrayView1<f64>) -> Array1<f64> {
    let mut out = Array1::zeros(values.len());
    let mut acc = 0.0;
    for i in (0..values.len()).rev() {
        acc += values[i];
        out[i] = acc;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_trapezoid() {
        let x = Array1::linspace(0.0, 1.0, 101);
        let y = x.mapv(|v| 2.0 * v);
        assert_relative_eq!(trapezoid(x.view(), y.view()), 1.0, epsilon = 1e-12);

        // descending abscissa integrates with a negative sign
        let xr = x.slice(ndarray::s![..;-1]).to_owned();
        let yr = y.slice(ndarray::s![..;-1]).to_owned();
        assert_relative_eq!(trapezoid(xr.view(), yr.view()), -1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_cumulative_sum_from_end() {
        let out = cumulative_sum_from_end(array![1.0, 2.0, 3.0].view());
        assert_eq!(out, array![6.0, 5.0, 3.0]);
    }
}
