//! Backgrounds as composite-model components.
//!
//! Each active kind becomes a [`BackgroundComponent`] with a fixed parameter schema.
//! The data-dependent kinds (active Shirley, active Tougaard, slope) keep a copy of
//! the measured intensities they are defined on.

use ndarray::{Array1, Zip};
use std::f64::consts::PI;
use std::sync::Arc;

use super::orientation::Oriented;
use super::tougaard::{LossFunction, TougaardCache, TougaardConfig};
use super::{BackgroundKind, EdgeSide};
use crate::composite::Component;
use crate::error::{Result, XpsFitError};
use crate::parameters::{Parameter, Parameters};
use crate::utils::integrate::cumulative_sum_from_end;

/// Default Tougaard scale factor
pub const TOUGAARD_B: f64 = 2866.0;

/// Measured spectrum and Tougaard settings bound to a data-dependent component.
#[derive(Debug, Clone)]
pub struct BackgroundData {
    pub y: Arc<Array1<f64>>,
    pub cache: Arc<TougaardCache>,
    pub tougaard: TougaardConfig,
}

/// An active background term.
#[derive(Debug, Clone)]
pub struct BackgroundComponent {
    kind: BackgroundKind,
    prefix: String,
    params: Parameters,
    data: Option<BackgroundData>,
}

impl BackgroundComponent {
    /// Create an active background with default parameters.
    ///
    /// # Errors
    ///
    /// * [`XpsFitError::Configuration`] for static kinds, which are not components
    /// * [`XpsFitError::InvalidInput`] when a data-dependent kind gets no data
    pub fn new(kind: BackgroundKind, data: Option<BackgroundData>) -> Result<Self> {
        if kind.is_static() {
            return Err(XpsFitError::Configuration(format!(
                "{} is subtracted before the fit and has no model component",
                kind
            )));
        }
        if kind.needs_data() && data.is_none() {
            return Err(XpsFitError::InvalidInput(format!(
                "{} background needs measured intensities",
                kind
            )));
        }

        let prefix = kind.prefix().to_string();
        let mut params = Parameters::new();
        let mut add = |name: &str, value: f64, min: f64, max: f64, vary: bool| -> Result<()> {
            let mut p = Parameter::with_bounds(&format!("{}{}", prefix, name), value, min, max)?;
            p.set_vary(vary)?;
            params.add(p)?;
            Ok(())
        };
        let inf = f64::INFINITY;
        match kind {
            BackgroundKind::ActiveShirley => {
                add("k", 1e-3, 0.0, inf, true)?;
                add("const", 0.0, -inf, inf, true)?;
            }
            BackgroundKind::ActiveTougaard => {
                let loss = LossFunction::default();
                add("B", TOUGAARD_B, 0.0, inf, true)?;
                add("C", loss.c, -inf, inf, false)?;
                add("C_d", loss.c_d, -inf, inf, false)?;
                add("D", loss.d, -inf, inf, false)?;
            }
            BackgroundKind::Polynomial { degree } => {
                for i in 0..=degree {
                    add(&format!("c{}", i), 0.0, -inf, inf, true)?;
                }
            }
            BackgroundKind::Arctan | BackgroundKind::Erf => {
                add("amplitude", 1.0, -inf, inf, true)?;
                add("center", 0.0, -inf, inf, true)?;
                add("sigma", 1.0, 0.0, inf, true)?;
            }
            BackgroundKind::Slope => {
                add("k", 0.0, -inf, inf, true)?;
            }
            BackgroundKind::VbmCutoff { .. } => {
                add("center", 0.0, -inf, inf, true)?;
                for i in 1..=4 {
                    add(&format!("d{}", i), 0.0, -inf, inf, true)?;
                }
            }
            BackgroundKind::StaticShirley | BackgroundKind::StaticTougaard => {}
        }

        Ok(Self {
            kind,
            prefix,
            params,
            data,
        })
    }

    pub fn kind(&self) -> BackgroundKind {
        self.kind
    }

    pub fn parameters_mut(&mut self) -> &mut Parameters {
        &mut self.params
    }

    pub fn param_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    /// Data-driven starting values. `keep` lists unprefixed names already set by the
    /// caller, which are left alone.
    pub fn guess(&mut self, x: &Array1<f64>, y: &Array1<f64>, keep: &[&str]) -> Result<()> {
        let n = x.len();
        if n == 0 || y.len() != n {
            return Ok(());
        }
        let (high, low) = if x[0] >= x[n - 1] { (0, n - 1) } else { (n - 1, 0) };
        let y_high = y[high];
        let y_low = y[low];
        let ymin = y.iter().copied().fold(f64::INFINITY, f64::min);
        let x_mid = 0.5 * (x[0] + x[n - 1]);
        let x_at_max = y
            .iter()
            .zip(x.iter())
            .fold((f64::NEG_INFINITY, x_mid), |best, (&yv, &xv)| if yv > best.0 { (yv, xv) } else { best })
            .1;

        let mut guesses: Vec<(&str, f64)> = Vec::new();
        match self.kind {
            BackgroundKind::ActiveShirley => {
                let total: f64 = y.iter().map(|v| v - y_low).sum();
                guesses.push(("const", y_low));
                if total > 0.0 && y_high > y_low {
                    guesses.push(("k", (y_high - y_low) / total));
                }
            }
            BackgroundKind::Polynomial { .. } => guesses.push(("c0", ymin)),
            BackgroundKind::Arctan | BackgroundKind::Erf => {
                guesses.push(("amplitude", y_high - y_low));
                guesses.push(("center", x_at_max));
            }
            BackgroundKind::VbmCutoff { .. } => guesses.push(("center", x_mid)),
            _ => {}
        }

        for (name, value) in guesses {
            if keep.contains(&name) || !value.is_finite() {
                continue;
            }
            let full = self.param_name(name);
            self.params.set_value(&full, value)?;
        }
        Ok(())
    }

    fn value(&self, params: &Parameters, name: &str) -> Result<f64> {
        Ok(params.value(&format!("{}{}", self.prefix, name))?)
    }

    fn data(&self, x: &Array1<f64>) -> Result<&BackgroundData> {
        let data = self.data.as_ref().ok_or_else(|| {
            XpsFitError::InvalidInput(format!("{} background has no data", self.kind))
        })?;
        if data.y.len() != x.len() {
            return Err(XpsFitError::DimensionMismatch(format!(
                "{} background holds {} samples, evaluated on {}",
                self.kind,
                data.y.len(),
                x.len()
            )));
        }
        Ok(data)
    }
}

impl Component for BackgroundComponent {
    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn label(&self) -> String {
        self.kind.to_string()
    }

    fn parameters(&self) -> &Parameters {
        &self.params
    }

    fn eval_with(&self, params: &Parameters, x: &Array1<f64>) -> Result<Array1<f64>> {
        match self.kind {
            BackgroundKind::ActiveShirley => {
                let data = self.data(x)?;
                let k = self.value(params, "k")?;
                let c = self.value(params, "const")?;
                Ok(active_shirley(x, &data.y, k, c))
            }
            BackgroundKind::ActiveTougaard => {
                let data = self.data(x)?;
                let loss = LossFunction {
                    c: self.value(params, "C")?,
                    c_d: self.value(params, "C_d")?,
                    d: self.value(params, "D")?,
                };
                let b = self.value(params, "B")?;
                let n = x.len();
                let y_low = if n == 0 {
                    0.0
                } else if x[0] >= x[n - 1] {
                    data.y[n - 1]
                } else {
                    data.y[0]
                };
                Ok(data.cache.background(x, &data.y, b, &loss, &data.tougaard)? + y_low)
            }
            BackgroundKind::Polynomial { degree } => {
                let coefs = (0..=degree)
                    .map(|i| self.value(params, &format!("c{}", i)))
                    .collect::<Result<Vec<f64>>>()?;
                Ok(polynomial(x, &coefs))
            }
            BackgroundKind::Arctan => Ok(arctan_step(
                x,
                self.value(params, "amplitude")?,
                self.value(params, "center")?,
                self.value(params, "sigma")?,
            )),
            BackgroundKind::Erf => Ok(erf_step(
                x,
                self.value(params, "amplitude")?,
                self.value(params, "center")?,
                self.value(params, "sigma")?,
            )),
            BackgroundKind::Slope => {
                let data = self.data(x)?;
                Ok(slope(x, &data.y, self.value(params, "k")?))
            }
            BackgroundKind::VbmCutoff { side } => {
                let center = self.value(params, "center")?;
                let coefs = (1..=4)
                    .map(|i| self.value(params, &format!("d{}", i)))
                    .collect::<Result<Vec<f64>>>()?;
                Ok(edge_polynomial(x, side, center, &coefs))
            }
            BackgroundKind::StaticShirley | BackgroundKind::StaticTougaard => {
                Err(XpsFitError::Configuration(format!(
                    "{} cannot be evaluated as a component",
                    self.kind
                )))
            }
        }
    }
}

/// `c0 + c1 x + c2 x² + ...`
pub fn polynomial(x: &Array1<f64>, coefs: &[f64]) -> Array1<f64> {
    x.mapv(|v| coefs.iter().rev().fold(0.0, |acc, c| acc * v + c))
}

/// `A (1/2 + atan((x - c)/σ)/π)`
pub fn arctan_step(x: &Array1<f64>, amplitude: f64, center: f64, sigma: f64) -> Array1<f64> {
    let sigma = sigma.max(crate::lineshapes::builtin::TINY);
    x.mapv(|v| amplitude * (0.5 + ((v - center) / sigma).atan() / PI))
}

/// `A/2 (1 + erf((x - c)/σ))`
pub fn erf_step(x: &Array1<f64>, amplitude: f64, center: f64, sigma: f64) -> Array1<f64> {
    let sigma = sigma.max(crate::lineshapes::builtin::TINY);
    x.mapv(|v| amplitude * 0.5 * (1.0 + libm::erf((v - center) / sigma)))
}

/// Active Shirley term: `const + k Σ_{j ≥ i} (y_j - const)`, summed toward low binding
/// energy.
pub fn active_shirley(x: &Array1<f64>, y: &Array1<f64>, k: f64, c: f64) -> Array1<f64> {
    let data = Oriented::descending(x, y);
    let tail = cumulative_sum_from_end((&data.y - c).view());
    data.restore(tail * k + c)
}

/// Slope term: `k` times the double tail sum of `y - min(y)`.
pub fn slope(x: &Array1<f64>, y: &Array1<f64>, k: f64) -> Array1<f64> {
    let data = Oriented::descending(x, y);
    let ymin = data.y.iter().copied().fold(f64::INFINITY, f64::min);
    let once = cumulative_sum_from_end((&data.y - ymin).view());
    let twice = cumulative_sum_from_end(once.view());
    data.restore(twice * k)
}

/// Degree-4 polynomial in `x - center` without constant term, zero on the inactive side
pub fn edge_polynomial(x: &Array1<f64>, side: EdgeSide, center: f64, coefs: &[f64]) -> Array1<f64> {
    let mut out = Array1::zeros(x.len());
    Zip::from(&mut out).and(x).for_each(|o, &v| {
        let active = match side {
            EdgeSide::Vbm => v >= center,
            EdgeSide::Cutoff => v <= center,
        };
        if active {
            let t = v - center;
            *o = coefs.iter().rev().fold(0.0, |acc, c| (acc + c) * t);
        }
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn data(y: &Array1<f64>) -> BackgroundData {
        BackgroundData {
            y: Arc::new(y.clone()),
            cache: Arc::new(TougaardCache::new()),
            tougaard: TougaardConfig::default(),
        }
    }

    #[test]
    fn test_polynomial_and_edges() {
        let x = array![-1.0, 0.0, 2.0];
        assert_eq!(polynomial(&x, &[1.0, 2.0, 3.0]), array![2.0, 1.0, 17.0]);

        let vbm = edge_polynomial(&x, EdgeSide::Vbm, 0.0, &[1.0, 1.0, 0.0, 0.0]);
        assert_eq!(vbm, array![0.0, 0.0, 6.0]);
        let cutoff = edge_polynomial(&x, EdgeSide::Cutoff, 0.0, &[1.0, 0.0, 0.0, 0.0]);
        assert_eq!(cutoff, array![-1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_steps() {
        let x = array![-1e6, 0.0, 1e6];
        let a = arctan_step(&x, 2.0, 0.0, 1.0);
        let e = erf_step(&x, 2.0, 0.0, 1.0);
        assert_relative_eq!(a[1], 1.0, epsilon = 1e-12);
        assert_relative_eq!(e[1], 1.0, epsilon = 1e-12);
        assert_relative_eq!(a[2], 2.0, epsilon = 1e-5);
        assert_relative_eq!(e[0], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_active_shirley_orientation() {
        let x = array![3.0, 2.0, 1.0];
        let y = array![5.0, 4.0, 1.0];
        let bg = active_shirley(&x, &y, 0.5, 1.0);
        // tail sums toward low binding energy: 7, 3, 0
        assert_eq!(bg, array![4.5, 2.5, 1.0]);

        let xa = array![1.0, 2.0, 3.0];
        let ya = array![1.0, 4.0, 5.0];
        assert_eq!(active_shirley(&xa, &ya, 0.5, 1.0), array![1.0, 2.5, 4.5]);
    }

    #[test]
    fn test_component_parameters() {
        let y = Array1::from_elem(5, 2.0);
        let shirley = BackgroundComponent::new(BackgroundKind::ActiveShirley, Some(data(&y))).unwrap();
        assert!(shirley.parameters().contains("bg_shirley_k"));
        assert!(shirley.parameters().contains("bg_shirley_const"));

        let tougaard = BackgroundComponent::new(BackgroundKind::ActiveTougaard, Some(data(&y))).unwrap();
        assert!(tougaard.parameters().get("bg_tougaard_B").unwrap().vary());
        assert!(!tougaard.parameters().get("bg_tougaard_C").unwrap().vary());

        let poly = BackgroundComponent::new(BackgroundKind::Polynomial { degree: 2 }, None).unwrap();
        assert_eq!(poly.parameters().len(), 3);

        assert!(BackgroundComponent::new(BackgroundKind::Slope, None).is_err());
        assert!(BackgroundComponent::new(BackgroundKind::StaticShirley, None).is_err());
    }

    #[test]
    fn test_active_tougaard_uses_cache() {
        let x = Array1::linspace(295.0, 275.0, 41);
        let y = x.mapv(|v: f64| 100.0 + 50.0 * (1.0 + libm::erf(v - 285.0)));
        let bd = data(&y);
        let cache = Arc::clone(&bd.cache);
        let component = BackgroundComponent::new(BackgroundKind::ActiveTougaard, Some(bd)).unwrap();

        let mut params = component.parameters().clone();
        let first = component.eval_with(&params, &x).unwrap();
        params.set_value("bg_tougaard_B", 2.0 * TOUGAARD_B).unwrap();
        let second = component.eval_with(&params, &x).unwrap();

        assert_eq!(cache.misses(), 1);
        assert_eq!(cache.hits(), 1);
        for i in 0..x.len() {
            assert_relative_eq!(second[i] - y[40], 2.0 * (first[i] - y[40]), max_relative = 1e-12);
        }
    }

    #[test]
    fn test_guess_keeps_explicit_values() {
        let x = Array1::linspace(290.0, 280.0, 11);
        let y = x.mapv(|v| v - 200.0);
        let mut poly = BackgroundComponent::new(BackgroundKind::Polynomial { degree: 0 }, None).unwrap();
        poly.guess(&x, &y, &[]).unwrap();
        assert_relative_eq!(poly.parameters().value("pg_c0").unwrap(), 80.0);

        let mut kept = BackgroundComponent::new(BackgroundKind::Polynomial { degree: 0 }, None).unwrap();
        kept.guess(&x, &y, &["c0"]).unwrap();
        assert_relative_eq!(kept.parameters().value("pg_c0").unwrap(), 0.0);
    }
}
