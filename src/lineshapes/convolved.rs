//! Gaussian-broadened Doniach and Fermi-edge kernels.
//!
//! Each kernel builds an unbroadened profile on the energy grid, convolves it with a
//! unit-sum Gaussian centered in the grid and scales the result. The Doniach kernels
//! are normalised to their own maximum so that `amplitude` is the peak height.

use ndarray::Array1;

use super::builtin::{doniach, fermi_step};
use crate::convolution::{fft_convolve, gaussian_kernel};
use crate::error::{Result, XpsFitError};

/// Doniach-Sunjic peak broadened by a Gaussian of width `gaussian_sigma`.
///
/// # Arguments
///
/// * `x` - Energy grid
/// * `amplitude` - Peak height of the result
/// * `sigma` - Lorentzian width of the Doniach profile
/// * `gamma` - Doniach asymmetry
/// * `gaussian_sigma` - Width of the Gaussian broadening
/// * `center` - Position of the Doniach profile
///
/// # Returns
///
/// * Intensities with maximum `amplitude`, or `DivisionByZero` when the convolution
///   vanishes everywhere
pub fn singlett(
    x: &Array1<f64>,
    amplitude: f64,
    sigma: f64,
    gamma: f64,
    gaussian_sigma: f64,
    center: f64,
) -> Result<Array1<f64>> {
    let profile = doniach(x, 1.0, center, sigma, gamma);
    let conv = fft_convolve(&profile, &gaussian_kernel(x, gaussian_sigma))?;
    rescale_to_height(conv, amplitude, "singlett")
}

/// Spin-orbit split pair of Doniach peaks sharing one Gaussian broadening.
///
/// The secondary component sits at `center - soc`, has relative weight
/// `height_ratio` and Lorentzian width `sigma * fct_coster_kronig`.
#[allow(clippy::too_many_arguments)]
pub fn dublett(
    x: &Array1<f64>,
    amplitude: f64,
    sigma: f64,
    gamma: f64,
    gaussian_sigma: f64,
    center: f64,
    soc: f64,
    height_ratio: f64,
    fct_coster_kronig: f64,
) -> Result<Array1<f64>> {
    let primary = doniach(x, 1.0, center, sigma, gamma);
    let secondary = doniach(x, height_ratio, center - soc, sigma * fct_coster_kronig, gamma);
    let conv = fft_convolve(&(primary + secondary), &gaussian_kernel(x, gaussian_sigma))?;
    rescale_to_height(conv, amplitude, "dublett")
}

/// Fermi-Dirac edge broadened by a Gaussian of width `sigma`, scaled by `amplitude`.
pub fn fermi_edge(
    x: &Array1<f64>,
    amplitude: f64,
    center: f64,
    kt: f64,
    sigma: f64,
) -> Result<Array1<f64>> {
    let step = fermi_step(x, center, kt);
    let conv = fft_convolve(&step, &gaussian_kernel(x, sigma))?;
    Ok(conv * amplitude)
}

fn rescale_to_height(conv: Array1<f64>, amplitude: f64, kernel: &str) -> Result<Array1<f64>> {
    let peak = conv.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !peak.is_finite() || peak == 0.0 {
        return Err(XpsFitError::DivisionByZero(format!(
            "{} convolution has maximum {}",
            kernel, peak
        )));
    }
    Ok(conv * (amplitude / peak))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn grid() -> Array1<f64> {
        Array1::linspace(275.0, 295.0, 401)
    }

    fn argmax(y: &Array1<f64>) -> usize {
        y.iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap()
    }

    #[test]
    fn test_singlett_peaks_at_amplitude() {
        let x = grid();
        let y = singlett(&x, 1500.0, 0.3, 0.05, 0.4, 284.6).unwrap();
        assert_eq!(y.len(), x.len());
        let i = argmax(&y);
        assert_relative_eq!(y[i], 1500.0, epsilon = 1e-9);
        assert!((x[i] - 284.6).abs() < 0.2, "peak at {}", x[i]);
    }

    #[test]
    fn test_dublett_components() {
        let x = grid();
        let y = dublett(&x, 1000.0, 0.2, 0.0, 0.3, 289.0, 4.0, 0.5, 1.0).unwrap();
        let i = argmax(&y);
        assert_relative_eq!(y[i], 1000.0, epsilon = 1e-9);
        assert!((x[i] - 289.0).abs() < 0.1);

        // secondary at center - soc with half the height
        let j = x.iter().position(|&v| (v - 285.0).abs() < 1e-9).unwrap();
        assert!(y[j] > 400.0 && y[j] < 600.0, "secondary height {}", y[j]);
    }

    #[test]
    fn test_zero_amplitude_is_allowed() {
        let x = grid();
        let y = singlett(&x, 0.0, 0.3, 0.05, 0.4, 284.6).unwrap();
        assert!(y.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_vanishing_profile_is_rejected() {
        let x = grid();
        // height_ratio -1 with identical components cancels the profile exactly
        let err = dublett(&x, 1.0, 0.3, 0.0, 0.4, 284.6, 0.0, -1.0, 1.0).unwrap_err();
        assert!(matches!(err, XpsFitError::DivisionByZero(_)));
    }

    #[test]
    fn test_fermi_edge() {
        let x = Array1::linspace(-2.0, 2.0, 401);
        let y = fermi_edge(&x, 200.0, 0.0, 0.026, 0.1).unwrap();
        assert_relative_eq!(y[400], 200.0, epsilon = 1e-6);
        assert!(y[0].abs() < 1e-6);
        assert_relative_eq!(y[200], 100.0, epsilon = 1.0);
    }
}
