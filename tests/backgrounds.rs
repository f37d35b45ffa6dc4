//! Property tests for the fit range and the self-consistent backgrounds on random
//! spectra.

use approx::assert_relative_eq;
use ndarray::{s, Array1};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use xpsfit_rs::background::{shirley, tougaard, LossFunction, ShirleyConfig, TougaardCache, TougaardConfig};
use xpsfit_rs::range::fit_range;
use xpsfit_rs::XpsFitError;

/// Peak on a step background with a little multiplicative noise, descending energies
fn random_spectrum(rng: &mut ChaCha8Rng) -> (Array1<f64>, Array1<f64>) {
    let n = rng.gen_range(60..200);
    let hi: f64 = rng.gen_range(290.0..310.0);
    let width = rng.gen_range(15.0..30.0);
    let x = Array1::linspace(hi, hi - width, n);

    let center = hi - width * rng.gen_range(0.35..0.65);
    let sigma = rng.gen_range(0.5..2.0);
    let height = rng.gen_range(500.0..5000.0);
    let step = rng.gen_range(0.05..0.3) * height;
    let base = rng.gen_range(50.0..200.0);

    let y = x.mapv(|v| {
        let peak = height * (-(v - center).powi(2) / (2.0 * sigma * sigma)).exp();
        let edge = step * 0.5 * (1.0 + libm::erf((v - center) / sigma));
        (base + edge + peak) * (1.0 + rng.gen_range(-0.005..0.005))
    });
    (x, y)
}

fn argmax(y: &[f64]) -> usize {
    y.iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
        .0
}

fn argmin(y: &[f64]) -> usize {
    y.iter()
        .enumerate()
        .fold((0, f64::INFINITY), |best, (i, &v)| if v < best.1 { (i, v) } else { best })
        .0
}

#[test]
fn test_fit_range_is_contiguous_and_inside_window() {
    let mut rng = ChaCha8Rng::seed_from_u64(11);
    for _ in 0..200 {
        let n = rng.gen_range(2..80);
        let descending = rng.gen_bool(0.5);
        let (a, b): (f64, f64) = (rng.gen_range(0.0..100.0), rng.gen_range(200.0..300.0));
        let x = if descending {
            Array1::linspace(b, a, n)
        } else {
            Array1::linspace(a, b, n)
        };
        let y = x.mapv(|v| v * 2.0 + 1.0);

        // pick a window that holds at least one sample
        let i = rng.gen_range(0..n);
        let j = rng.gen_range(0..n);
        let pad = rng.gen_range(0.0..0.5);
        let (lo, hi) = (x[i].min(x[j]) - pad, x[i].max(x[j]) + pad);
        let (xmin, xmax) = if rng.gen_bool(0.5) { (lo, hi) } else { (hi, lo) };

        let (xc, yc) = fit_range(&x, &y, xmin, xmax).unwrap();
        assert!(!xc.is_empty());
        assert_eq!(xc.len(), yc.len());
        assert!(xc.iter().all(|&v| v >= lo && v <= hi));

        // a contiguous slice of the input, in the input's direction
        let start = x.iter().position(|&v| v == xc[0]).unwrap();
        assert_eq!(xc, x.slice(s![start..start + xc.len()]));
        assert_eq!(yc, y.slice(s![start..start + yc.len()]));

        // and maximal: the neighbours fall outside the window
        if start > 0 {
            assert!(x[start - 1] < lo || x[start - 1] > hi);
        }
        if start + xc.len() < n {
            let next = x[start + xc.len()];
            assert!(next < lo || next > hi);
        }
    }
}

#[test]
fn test_fit_range_outside_data_is_empty() {
    let x = Array1::linspace(300.0, 280.0, 21);
    let y = Array1::ones(21);
    assert!(matches!(
        fit_range(&x, &y, 250.0, 260.0),
        Err(XpsFitError::EmptyRange { .. })
    ));
    // between two samples
    assert!(matches!(
        fit_range(&x, &y, 290.2, 290.8),
        Err(XpsFitError::EmptyRange { .. })
    ));
}

#[test]
fn test_shirley_meets_data_at_both_minima() {
    let mut rng = ChaCha8Rng::seed_from_u64(5);
    for _ in 0..25 {
        let (x, y) = random_spectrum(&mut rng);
        let bg = shirley(&x, &y, &ShirleyConfig::default()).unwrap();

        let values = y.to_vec();
        let maxidx = argmax(&values);
        let lmidx = argmin(&values[..maxidx]);
        let rmidx = maxidx + argmin(&values[maxidx..]);

        assert_relative_eq!(bg[lmidx], y[lmidx], max_relative = 1e-9);
        assert_relative_eq!(bg[rmidx], y[rmidx], max_relative = 1e-9);

        // same result on the ascending copy
        let xa = x.slice(s![..;-1]).to_owned();
        let ya = y.slice(s![..;-1]).to_owned();
        let bga = shirley(&xa, &ya, &ShirleyConfig::default()).unwrap();
        let n = x.len();
        assert_relative_eq!(bga[n - 1 - lmidx], y[lmidx], max_relative = 1e-9);
    }
}

#[test]
fn test_tougaard_matches_high_energy_end() {
    let mut rng = ChaCha8Rng::seed_from_u64(9);
    let cache = TougaardCache::new();
    let config = TougaardConfig::default();
    let loss = LossFunction::default();

    for _ in 0..10 {
        let (x, y) = random_spectrum(&mut rng);
        let n = x.len();
        let result = tougaard(&x, &y, 2866.0, &loss, &config, &cache).unwrap();

        assert!(result.converged);
        assert!(result.b > 0.0);
        let step = y[0] - y[n - 1];
        let reached = result.background[0] - y[n - 1];
        assert!((reached - step).abs() <= 2e-6 * step.abs());
    }
    assert_eq!(cache.misses(), 10);
}

#[test]
fn test_tougaard_cache_scales_linearly_in_b() {
    let mut rng = ChaCha8Rng::seed_from_u64(3);
    let (x, y) = random_spectrum(&mut rng);
    let cache = TougaardCache::new();
    let loss = LossFunction::default();
    let config = TougaardConfig::default();

    let b = 1500.0;
    let first = cache.background(&x, &y, b, &loss, &config).unwrap();
    let second = cache.background(&x, &y, 2.5 * b, &loss, &config).unwrap();

    assert_eq!(cache.misses(), 1);
    assert_eq!(cache.hits(), 1);
    for (a, c) in first.iter().zip(second.iter()) {
        assert_relative_eq!(*c, 2.5 * a, max_relative = 1e-12);
    }

    // another loss function is another entry
    let other = LossFunction { c: 1000.0, ..loss };
    cache.background(&x, &y, b, &other, &config).unwrap();
    assert_eq!(cache.misses(), 2);
    assert_eq!(cache.len(), 2);
}
