//! Tougaard background from the universal inelastic-loss cross section.
//!
//! With `T = x_i - x_j` the energy loss between sample `i` and a sample `j` at lower
//! binding energy, the background shape is
//!
//! ```text
//! S_i = sum_{j >= i} T / ((C + C_d T²)² + D T²) · (y_j - y_last) · Δx
//! ```
//!
//! summed over the spectrum extended by `extend` eV of constant intensity. The
//! background is `B · S`. [`tougaard`] determines `B` self-consistently so that the
//! background meets the data at the high binding energy end; [`TougaardCache`] keeps
//! the `B = 1` shape so that refining only `B` does not repeat the O(n²) sum.

use log::{debug, warn};
use ndarray::Array1;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::orientation::Oriented;
use crate::error::{Result, XpsFitError};

/// Settings of the Tougaard background.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TougaardConfig {
    /// Extension of the spectrum beyond its low binding energy end, in eV. Default: 30
    pub extend: f64,

    /// Number of trailing samples averaged for the extension. Default: 10
    pub tail_samples: usize,

    /// Relative tolerance on the boundary mismatch. Default: 1e-6
    pub tol: f64,

    /// Maximum number of B updates. Default: 100
    pub max_iterations: usize,
}

impl Default for TougaardConfig {
    fn default() -> Self {
        Self {
            extend: 30.0,
            tail_samples: 10,
            tol: 1e-6,
            max_iterations: 100,
        }
    }
}

impl TougaardConfig {
    pub fn with_extend(mut self, extend: f64) -> Self {
        self.extend = extend;
        self
    }

    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }
}

/// Loss-function coefficients. `C_d = 1, D = 0` is the two-parameter form.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LossFunction {
    pub c: f64,
    pub c_d: f64,
    pub d: f64,
}

impl Default for LossFunction {
    fn default() -> Self {
        Self {
            c: 1643.0,
            c_d: 1.0,
            d: 1.0,
        }
    }
}

impl LossFunction {
    #[inline]
    fn kernel(&self, t: f64) -> f64 {
        let denom = (self.c + self.c_d * t * t).powi(2) + self.d * t * t;
        if denom == 0.0 {
            0.0
        } else {
            t / denom
        }
    }
}

/// Result of the self-consistent Tougaard background.
#[derive(Debug, Clone)]
pub struct TougaardBackground {
    /// Background in the order of the input
    pub background: Array1<f64>,

    /// Scale factor reached by the iteration
    pub b: f64,

    pub iterations: usize,

    pub converged: bool,
}

/// Memo of `B = 1` Tougaard shapes keyed by a hash of the spectrum, the loss
/// coefficients and the extension.
///
/// Shared between threads behind an `Arc`; distinct spectra never collide on the
/// same entry, so concurrent fits over different data are safe. The memo holds at
/// most `capacity` shapes and evicts the oldest insertion first, so a fit that
/// frees `C`, `C_d` or `D` cycles through entries instead of growing the map.
#[derive(Debug)]
pub struct TougaardCache {
    entries: Mutex<Entries>,
    capacity: usize,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

#[derive(Debug, Default)]
struct Entries {
    shapes: HashMap<u64, Arc<Array1<f64>>>,
    order: VecDeque<u64>,
}

impl Entries {
    fn insert(&mut self, key: u64, shape: Arc<Array1<f64>>, capacity: usize) {
        if self.shapes.insert(key, shape).is_some() {
            // another thread computed the same shape first
            return;
        }
        self.order.push_back(key);
        while self.order.len() > capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.shapes.remove(&oldest);
                debug!("Tougaard cache evicted an entry ({} kept)", self.shapes.len());
            }
        }
    }

    fn clear(&mut self) {
        self.shapes.clear();
        self.order.clear();
    }
}

impl Default for TougaardCache {
    fn default() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }
}

impl TougaardCache {
    /// Shapes kept by [`TougaardCache::new`]
    pub const DEFAULT_CAPACITY: usize = 32;

    pub fn new() -> Self {
        Self::default()
    }

    /// Memo that keeps at most `capacity` shapes. A capacity of zero is raised to one.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(Entries::default()),
            capacity: capacity.max(1),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    /// `B = 1` background shape, computed on a miss
    ///
    /// # Arguments
    ///
    /// * `x`, `y` - Spectrum in either order
    /// * `loss` - Loss-function coefficients
    /// * `config` - Extension settings
    ///
    /// # Returns
    ///
    /// * The shape in the order of `x`
    pub fn shape(
        &self,
        x: &Array1<f64>,
        y: &Array1<f64>,
        loss: &LossFunction,
        config: &TougaardConfig,
    ) -> Result<Arc<Array1<f64>>> {
        let key = cache_key(x, y, loss, config);
        if let Some(shape) = self.lock().shapes.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!("Tougaard cache hit ({} samples)", x.len());
            return Ok(Arc::clone(shape));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!("Tougaard cache miss ({} samples)", x.len());
        let shape = Arc::new(loss_shape(x, y, loss, config)?);
        self.lock().insert(key, Arc::clone(&shape), self.capacity);
        Ok(shape)
    }

    /// Active-mode background `B · S`
    pub fn background(
        &self,
        x: &Array1<f64>,
        y: &Array1<f64>,
        b: f64,
        loss: &LossFunction,
        config: &TougaardConfig,
    ) -> Result<Array1<f64>> {
        Ok(self.shape(x, y, loss, config)?.as_ref() * b)
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> usize {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Entries> {
        // entries are inserted whole, so a poisoned map is still consistent
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn cache_key(x: &Array1<f64>, y: &Array1<f64>, loss: &LossFunction, config: &TougaardConfig) -> u64 {
    let mut hasher = DefaultHasher::new();
    x.len().hash(&mut hasher);
    for v in x.iter().chain(y.iter()) {
        v.to_bits().hash(&mut hasher);
    }
    for v in [loss.c, loss.c_d, loss.d, config.extend] {
        v.to_bits().hash(&mut hasher);
    }
    config.tail_samples.hash(&mut hasher);
    hasher.finish()
}

/// Self-consistent static Tougaard background.
///
/// Starting from `b_start`, the scale is updated with the damped correction
/// `B -= offset / (B S_0) · B / 2` until the background meets the data at the high
/// binding energy end within `config.tol` relative error.
///
/// # Returns
///
/// * `y_last + B · S` in the order of `x`, and the final `B`. Empty input yields an
///   empty background.
pub fn tougaard(
    x: &Array1<f64>,
    y: &Array1<f64>,
    b_start: f64,
    loss: &LossFunction,
    config: &TougaardConfig,
    cache: &TougaardCache,
) -> Result<TougaardBackground> {
    if x.is_empty() || y.is_empty() {
        warn!("Tougaard background of an empty spectrum, returning zero background");
        return Ok(TougaardBackground {
            background: Array1::zeros(x.len().max(y.len())),
            b: b_start,
            iterations: 0,
            converged: false,
        });
    }

    let shape = cache.shape(x, y, loss, config)?;
    let n = x.len();
    // index of the high binding energy end, and of the low one
    let (high, low) = if x[0] >= x[n - 1] { (0, n - 1) } else { (n - 1, 0) };
    let y_last = y[low];
    let step = y[high] - y_last;
    let s0 = shape[high];

    if s0 == 0.0 || !s0.is_finite() {
        warn!("Tougaard background: loss integral vanishes, returning flat background");
        return Ok(TougaardBackground {
            background: Array1::from_elem(n, y_last),
            b: b_start,
            iterations: 0,
            converged: false,
        });
    }

    let mut b = if b_start == 0.0 || !b_start.is_finite() { 1.0 } else { b_start };
    let mut converged = false;
    let mut iterations = 0;
    while iterations < config.max_iterations {
        let boundary = b * s0;
        let offset = boundary - step;
        if offset.abs() <= config.tol * boundary.abs() {
            converged = true;
            break;
        }
        b -= offset / boundary * b * 0.5;
        iterations += 1;
    }

    if converged {
        debug!("Tougaard B = {:.6e} after {} iterations", b, iterations);
    } else {
        warn!(
            "Tougaard background did not converge in {} iterations (B = {:.6e})",
            config.max_iterations, b
        );
    }

    Ok(TougaardBackground {
        background: shape.as_ref() * b + y_last,
        b,
        iterations,
        converged,
    })
}

/// `B = 1` shape in the order of `x`
fn loss_shape(
    x: &Array1<f64>,
    y: &Array1<f64>,
    loss: &LossFunction,
    config: &TougaardConfig,
) -> Result<Array1<f64>> {
    if x.len() != y.len() {
        return Err(XpsFitError::DimensionMismatch(format!(
            "x has {} samples, y has {}",
            x.len(),
            y.len()
        )));
    }
    let n = x.len();
    if n < 2 {
        return Ok(Array1::zeros(n));
    }

    let data = Oriented::descending(x, y);
    let dx = (data.x[0] - data.x[n - 1]).abs() / (n - 1) as f64;
    if dx == 0.0 {
        return Err(XpsFitError::InvalidInput(
            "Tougaard background needs a non-degenerate energy grid".to_string(),
        ));
    }

    let tail = config.tail_samples.clamp(1, n);
    let fill = data.y.slice(ndarray::s![n - tail..]).mean().unwrap_or(data.y[n - 1]);
    let extra = (config.extend.max(0.0) / dx).ceil() as usize;

    let mut xs = data.x.to_vec();
    let mut ys = data.y.to_vec();
    for k in 1..=extra {
        xs.push(data.x[n - 1] - k as f64 * dx);
        ys.push(fill);
    }
    let y_last = data.y[n - 1];

    let shape: Vec<f64> = (0..n)
        .into_par_iter()
        .map(|i| {
            (i..xs.len())
                .map(|j| loss.kernel(xs[i] - xs[j]) * (ys[j] - y_last) * dx)
                .sum()
        })
        .collect();

    Ok(data.restore(Array1::from_vec(shape)))
}
