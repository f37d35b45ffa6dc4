//! Standard peak functions, following lmfit's `lineshapes` definitions.
//!
//! All functions are area-normalised: `amplitude` is the integral of the peak, not
//! its height. Widths below [`TINY`] are floored to avoid division by zero.

use ndarray::Array1;
use num_complex::Complex64;
use std::f64::consts::{LN_2, PI, SQRT_2};

use super::faddeeva::faddeeva;

/// Floor applied to widths before dividing by them.
pub const TINY: f64 = 1e-300;

/// sqrt(2π)
pub const S2PI: f64 = 2.506_628_274_631_000_2;

#[inline]
fn floor(width: f64) -> f64 {
    width.max(TINY)
}

/// `A / (sqrt(2π) σ) exp(-(x - c)² / (2σ²))`
pub fn gaussian(x: &Array1<f64>, amplitude: f64, center: f64, sigma: f64) -> Array1<f64> {
    let sigma = floor(sigma);
    let scale = amplitude / (S2PI * sigma);
    x.mapv(|v| scale * (-(v - center).powi(2) / (2.0 * sigma * sigma)).exp())
}

/// `A / π · σ / ((x - c)² + σ²)`
pub fn lorentzian(x: &Array1<f64>, amplitude: f64, center: f64, sigma: f64) -> Array1<f64> {
    let sigma = floor(sigma);
    x.mapv(|v| amplitude / PI * sigma / ((v - center).powi(2) + sigma * sigma))
}

/// Voigt profile; `gamma` is the Lorentzian half width.
pub fn voigt(x: &Array1<f64>, amplitude: f64, center: f64, sigma: f64, gamma: f64) -> Array1<f64> {
    let denom = floor(sigma * SQRT_2);
    let norm = amplitude / floor(sigma * S2PI);
    x.mapv(|v| norm * faddeeva(Complex64::new(v - center, gamma) / denom).re)
}

/// Pseudo-Voigt: `(1 - f)` Gaussian with the same FWHM plus `f` Lorentzian.
pub fn pvoigt(
    x: &Array1<f64>,
    amplitude: f64,
    center: f64,
    sigma: f64,
    fraction: f64,
) -> Array1<f64> {
    let sigma_g = sigma / (2.0 * LN_2).sqrt();
    gaussian(x, amplitude, center, sigma_g) * (1.0 - fraction)
        + lorentzian(x, amplitude, center, sigma) * fraction
}

/// Exponentially modified Gaussian.
pub fn exp_gaussian(
    x: &Array1<f64>,
    amplitude: f64,
    center: f64,
    sigma: f64,
    gamma: f64,
) -> Array1<f64> {
    let gss = gamma * sigma * sigma;
    let denom = floor(SQRT_2 * sigma);
    x.mapv(|v| {
        let arg1 = gamma * (center + gss / 2.0 - v);
        let arg2 = (center + gss - v) / denom;
        amplitude * (gamma / 2.0) * arg1.exp() * libm::erfc(arg2)
    })
}

/// Gaussian multiplied by `1 + erf(γ (x - c) / (sqrt(2) σ))`.
pub fn skewed_gaussian(
    x: &Array1<f64>,
    amplitude: f64,
    center: f64,
    sigma: f64,
    gamma: f64,
) -> Array1<f64> {
    let beta = gamma / floor(SQRT_2 * sigma);
    let asym = x.mapv(|v| 1.0 + libm::erf(beta * (v - center)));
    gaussian(x, amplitude, center, sigma) * asym
}

/// Voigt multiplied by `1 + erf(skew (x - c) / (sqrt(2) σ))`.
pub fn skewed_voigt(
    x: &Array1<f64>,
    amplitude: f64,
    center: f64,
    sigma: f64,
    gamma: f64,
    skew: f64,
) -> Array1<f64> {
    let beta = skew / floor(SQRT_2 * sigma);
    let asym = x.mapv(|v| 1.0 + libm::erf(beta * (v - center)));
    voigt(x, amplitude, center, sigma, gamma) * asym
}

/// Breit-Wigner-Fano resonance, `A (qσ/2 + x - c)² / ((σ/2)² + (x - c)²)`.
pub fn breit_wigner(
    x: &Array1<f64>,
    amplitude: f64,
    center: f64,
    sigma: f64,
    q: f64,
) -> Array1<f64> {
    let gam = sigma / 2.0;
    x.mapv(|v| {
        let d = v - center;
        let denom = (gam * gam + d * d).max(TINY);
        amplitude * (q * gam + d).powi(2) / denom
    })
}

/// Log-normal distribution, zero for `x <= 0`.
pub fn lognormal(x: &Array1<f64>, amplitude: f64, center: f64, sigma: f64) -> Array1<f64> {
    let sigma = floor(sigma);
    x.mapv(|v| {
        if v <= 0.0 {
            return 0.0;
        }
        amplitude / (v * sigma * S2PI) * (-(v.ln() - center).powi(2) / (2.0 * sigma * sigma)).exp()
    })
}

/// Doniach-Sunjic lineshape.
///
/// ```text
/// A / σ^(1-γ) · cos(πγ/2 + (1-γ) atan((x-c)/σ)) / (1 + ((x-c)/σ)²)^((1-γ)/2)
/// ```
pub fn doniach(x: &Array1<f64>, amplitude: f64, center: f64, sigma: f64, gamma: f64) -> Array1<f64> {
    let sigma = floor(sigma);
    let gm1 = 1.0 - gamma;
    let scale = amplitude / sigma.powf(gm1);
    x.mapv(|v| {
        let arg = (v - center) / sigma;
        scale * (PI * gamma / 2.0 + gm1 * arg.atan()).cos() / (1.0 + arg * arg).powf(gm1 / 2.0)
    })
}

/// Fermi-Dirac occupation step rising from 0 below `center` to 1 above it.
///
/// Energies are binding energies, so occupied states lie above the edge.
pub fn fermi_step(x: &Array1<f64>, center: f64, kt: f64) -> Array1<f64> {
    let kt = floor(kt);
    x.mapv(|v| {
        let arg = -(v - center) / kt;
        // exp overflow yields 1/inf = 0, the correct limit
        1.0 / (arg.exp() + 1.0)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::integrate::trapezoid;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn grid() -> Array1<f64> {
        Array1::linspace(-60.0, 60.0, 24001)
    }

    fn area(x: &Array1<f64>, y: &Array1<f64>) -> f64 {
        trapezoid(x.view(), y.view())
    }

    #[test]
    fn test_gaussian() {
        let x = grid();
        let y = gaussian(&x, 3.0, 1.0, 0.5);
        assert_relative_eq!(area(&x, &y), 3.0, epsilon = 1e-8);
        let peak = gaussian(&Array1::from_vec(vec![1.0]), 3.0, 1.0, 0.5)[0];
        assert_relative_eq!(peak, 3.0 / (S2PI * 0.5), epsilon = 1e-12);
    }

    #[test]
    fn test_lorentzian_height() {
        let y = lorentzian(&Array1::from_vec(vec![2.0, 3.0]), 1.0, 2.0, 1.0);
        assert_relative_eq!(y[0], 1.0 / PI, epsilon = 1e-12);
        assert_relative_eq!(y[1], 0.5 / PI, epsilon = 1e-12);
    }

    #[test]
    fn test_voigt_limits() {
        let x = Array1::linspace(-5.0, 5.0, 101);
        let v = voigt(&x, 2.0, 0.3, 0.8, 0.0);
        let g = gaussian(&x, 2.0, 0.3, 0.8);
        for (a, b) in v.iter().zip(g.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-6);
        }

        let x = grid();
        let v = voigt(&x, 2.0, 0.0, 0.5, 0.3);
        // the Lorentzian tail beyond the grid carries 2γ/(π·60) of the area
        assert_relative_eq!(area(&x, &v), 2.0, epsilon = 1e-2);
    }

    #[test]
    fn test_pvoigt_mixes_components() {
        let x = Array1::linspace(-3.0, 3.0, 61);
        let g = pvoigt(&x, 1.0, 0.0, 0.7, 0.0);
        let l = pvoigt(&x, 1.0, 0.0, 0.7, 1.0);
        assert_eq!(l, lorentzian(&x, 1.0, 0.0, 0.7));
        assert_abs_diff_eq!(g[30], 1.0 / (S2PI * 0.7 / (2.0 * LN_2).sqrt()), epsilon = 1e-12);
    }

    #[test]
    fn test_exp_gaussian_area() {
        let x = grid();
        let y = exp_gaussian(&x, 1.5, 0.0, 0.4, 2.0);
        assert_relative_eq!(area(&x, &y), 1.5, epsilon = 1e-6);
    }

    #[test]
    fn test_skewed_gaussian_area_preserved() {
        let x = grid();
        let y = skewed_gaussian(&x, 1.0, 0.0, 1.0, 3.0);
        assert_relative_eq!(area(&x, &y), 1.0, epsilon = 1e-6);
        let sym = skewed_gaussian(&x, 1.0, 0.0, 1.0, 0.0);
        assert_relative_eq!(sym[12000], gaussian(&x, 1.0, 0.0, 1.0)[12000]);
    }

    #[test]
    fn test_skewed_voigt_at_center() {
        let x = Array1::from_vec(vec![0.0]);
        let y = skewed_voigt(&x, 1.0, 0.0, 0.5, 0.2, 4.0);
        assert_relative_eq!(y[0], voigt(&x, 1.0, 0.0, 0.5, 0.2)[0], epsilon = 1e-12);
    }

    #[test]
    fn test_breit_wigner() {
        let x = Array1::from_vec(vec![1.0, 1e6]);
        let y = breit_wigner(&x, 2.0, 1.0, 0.5, 3.0);
        // at the center: A q²
        assert_relative_eq!(y[0], 18.0, epsilon = 1e-12);
        assert_relative_eq!(y[1], 2.0, epsilon = 1e-4);
    }

    #[test]
    fn test_lognormal() {
        let x = Array1::linspace(-1.0, 100.0, 20001);
        let y = lognormal(&x, 1.0, 0.5, 0.3);
        assert_eq!(y[0], 0.0);
        assert_relative_eq!(area(&x, &y), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_doniach_reduces_to_lorentzian() {
        let x = Array1::linspace(280.0, 290.0, 11);
        let d = doniach(&x, 1.0, 285.0, 0.4, 0.0);
        // γ = 0: A σ / ((x-c)² + σ²) = π · lorentzian
        let l = lorentzian(&x, PI, 285.0, 0.4);
        for (a, b) in d.iter().zip(l.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_doniach_asymmetry() {
        let x = Array1::from_vec(vec![284.0, 286.0]);
        let d = doniach(&x, 1.0, 285.0, 0.4, 0.2);
        // the tail extends towards lower x
        assert!(d[0] > d[1]);
    }

    #[test]
    fn test_fermi_step() {
        let x = Array1::from_vec(vec![-1.0, 0.0, 1.0, -1e5, 1e5]);
        let f = fermi_step(&x, 0.0, 0.026);
        assert_abs_diff_eq!(f[0], 0.0, epsilon = 1e-12);
        assert_relative_eq!(f[1], 0.5);
        assert_abs_diff_eq!(f[2], 1.0, epsilon = 1e-12);
        assert_eq!(f[3], 0.0);
        assert_eq!(f[4], 1.0);
    }
}
