//! Edge-padded convolution used by the Doniach and Fermi-edge kernels.
//!
//! The data are extended at both ends by replicating their boundary values over
//! `min(len(data), len(kernel))` samples, convolved in "valid" mode, and the centered
//! window with the length of the input is returned. The padding suppresses the
//! artificial drop-off a finite convolution would otherwise produce at the spectrum edges.
//!
//! [`fft_convolve`] multiplies spectra with `rustfft`; [`direct_convolve`] evaluates
//! the same sum in the spatial domain and serves as the reference implementation.

use ndarray::Array1;
use num_complex::Complex;
use rustfft::FftPlanner;

use crate::error::{Result, XpsFitError};

/// Edge-padded "valid" convolution via FFT.
///
/// # Arguments
///
/// * `data` - Signal sampled on the energy grid
/// * `kernel` - Convolution kernel, centered in its own array
///
/// # Returns
///
/// * Array with the length of `data`
///
/// # Errors
///
/// `InvalidInput` when either input is empty or the kernel is more than
/// `2 * len(data) + 1` samples long.
///
/// # Examples
///
/// ```
/// use ndarray::{array, Array1};
/// use xpsfit_rs::convolution::fft_convolve;
///
/// let data = array![1.0, 2.0, 3.0, 4.0, 5.0];
/// let spike = array![0.0, 0.0, 1.0, 0.0, 0.0];
/// let out = fft_convolve(&data, &spike).unwrap();
/// for (a, b) in out.iter().zip(data.iter()) {
///     assert!((a - b).abs() < 1e-12);
/// }
/// ```
pub fn fft_convolve(data: &Array1<f64>, kernel: &Array1<f64>) -> Result<Array1<f64>> {
    let layout = Layout::new(data.len(), kernel.len())?;
    let padded = edge_pad(data, layout.pad);

    let full_len = padded.len() + kernel.len() - 1;
    let mut planner = FftPlanner::<f64>::new();
    let forward = planner.plan_fft_forward(full_len);
    let inverse = planner.plan_fft_inverse(full_len);

    let mut a: Vec<Complex<f64>> = padded.iter().map(|&v| Complex::new(v, 0.0)).collect();
    a.resize(full_len, Complex::new(0.0, 0.0));
    let mut b: Vec<Complex<f64>> = kernel.iter().map(|&v| Complex::new(v, 0.0)).collect();
    b.resize(full_len, Complex::new(0.0, 0.0));

    forward.process(&mut a);
    forward.process(&mut b);
    for (ai, bi) in a.iter_mut().zip(b.iter()) {
        *ai *= *bi;
    }
    inverse.process(&mut a);

    let scale = 1.0 / full_len as f64;
    let start = layout.window_start();
    Ok(Array1::from_iter(
        a[start..start + data.len()].iter().map(|c| c.re * scale),
    ))
}

/// Edge-padded "valid" convolution evaluated directly in the spatial domain.
///
/// Numerically equivalent to [`fft_convolve`]; O(n·m).
pub fn direct_convolve(data: &Array1<f64>, kernel: &Array1<f64>) -> Result<Array1<f64>> {
    let layout = Layout::new(data.len(), kernel.len())?;
    let padded = edge_pad(data, layout.pad);
    let m = kernel.len();
    let start = layout.window_start();

    Ok(Array1::from_shape_fn(data.len(), |i| {
        // index into the full linear convolution
        let t = start + i;
        let lo = t.saturating_sub(padded.len() - 1);
        let hi = t.min(m - 1);
        (lo..=hi).map(|j| padded[t - j] * kernel[j]).sum()
    }))
}

/// Unit-sum Gaussian kernel on the grid `x`, centered at `mean(x)`.
///
/// A width too small to be resolved by the grid degenerates into a unit spike at the
/// sample nearest to the center.
pub fn gaussian_kernel(x: &Array1<f64>, sigma: f64) -> Array1<f64> {
    if x.is_empty() {
        return Array1::zeros(0);
    }
    let mean = x.sum() / x.len() as f64;
    let sigma = sigma.abs();
    let mut kernel = x.mapv(|v| (-(v - mean).powi(2) / (2.0 * sigma * sigma)).exp());
    let total = kernel.sum();

    if total > 0.0 && total.is_finite() {
        kernel /= total;
    } else {
        kernel.fill(0.0);
        let nearest = x
            .iter()
            .enumerate()
            .min_by(|a, b| (a.1 - mean).abs().total_cmp(&(b.1 - mean).abs()))
            .map(|(i, _)| i)
            .unwrap_or(0);
        kernel[nearest] = 1.0;
    }
    kernel
}

/// Index bookkeeping shared by both convolution variants.
struct Layout {
    len: usize,
    kernel_len: usize,
    pad: usize,
}

impl Layout {
    fn new(len: usize, kernel_len: usize) -> Result<Self> {
        if len == 0 || kernel_len == 0 {
            return Err(XpsFitError::InvalidInput(
                "convolution of an empty array".to_string(),
            ));
        }
        if kernel_len > 2 * len + 1 {
            return Err(XpsFitError::InvalidInput(format!(
                "kernel of {} samples is too long for {} data samples",
                kernel_len, len
            )));
        }
        Ok(Self {
            len,
            kernel_len,
            pad: len.min(kernel_len),
        })
    }

    /// Offset of the returned window in the full linear convolution
    fn window_start(&self) -> usize {
        let valid_len = self.len + 2 * self.pad - self.kernel_len + 1;
        (self.kernel_len - 1) + (valid_len - self.len) / 2
    }
}

fn edge_pad(data: &Array1<f64>, pad: usize) -> Vec<f64> {
    let first = data[0];
    let last = data[data.len() - 1];
    let mut out = Vec::with_capacity(data.len() + 2 * pad);
    out.extend(std::iter::repeat(first).take(pad));
    out.extend(data.iter().copied());
    out.extend(std::iter::repeat(last).take(pad));
    out
}
