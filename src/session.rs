//! One fit, evaluation or simulation from the parameter tables to the mapped-back
//! result.
//!
//! The flow of [`run`] is:
//!
//! 1. clip the spectrum to the fit range (or build a synthetic grid when simulating)
//! 2. compute a static Shirley/Tougaard background and subtract it
//! 3. assemble peaks and active backgrounds into a [`CompositeModel`]
//! 4. install cross-peak links, then the user limits
//! 5. fit or evaluate
//! 6. decompose the model into components and write the values back into the tables
//!
//! Configuration errors surface before the solver runs. Non-convergence and
//! interruption are fields of the result.

use log::{info, warn};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::assembler::{assemble, check_peak_indices, AssemblyData};
use crate::background::{
    check_exclusive, static_background, BackgroundKind, BackgroundSpec, ShirleyConfig,
    StaticBackground, TougaardCache, TougaardConfig,
};
use crate::composite::CompositeModel;
use crate::error::{Result, XpsFitError};
use crate::limits::apply_limits;
use crate::linker::apply_links;
use crate::lm::{LevenbergMarquardt, LmConfig};
use crate::model::{self, FitResult, Model};
use crate::parameters::Parameters;
use crate::peaks::{LimitSpec, ParamValue, PeakMetrics, PeakSpec, ReferenceLink};
use crate::range::{fit_range, FitRange};

/// What to do with the assembled model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Mode {
    /// Vary the free parameters
    #[default]
    Fit,
    /// Compute the model at the table values against the measured data
    Evaluate,
    /// Compute the model at the table values on a synthetic grid, without data
    Simulate,
}

/// Residual weighting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Weighting {
    /// `1/sqrt(y)`, counting statistics. Falls back to unweighted residuals when any
    /// intensity is zero or negative.
    #[default]
    Poisson,
    None,
}

/// Settings of a fit session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    pub lm: LmConfig,
    pub shirley: ShirleyConfig,
    pub tougaard: TougaardConfig,
    pub weighting: Weighting,
    /// Grid size in simulate mode. Default: 500
    pub simulate_points: usize,
    /// Scale the covariance by the reduced chi-square. Default: true
    pub scale_covariance: bool,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            lm: LmConfig::default(),
            shirley: ShirleyConfig::default(),
            tougaard: TougaardConfig::default(),
            weighting: Weighting::Poisson,
            simulate_points: 500,
            scale_covariance: true,
        }
    }
}

impl FitConfig {
    pub fn with_lm(mut self, lm: LmConfig) -> Self {
        self.lm = lm;
        self
    }

    pub fn with_shirley(mut self, shirley: ShirleyConfig) -> Self {
        self.shirley = shirley;
        self
    }

    pub fn with_tougaard(mut self, tougaard: TougaardConfig) -> Self {
        self.tougaard = tougaard;
        self
    }

    pub fn with_weighting(mut self, weighting: Weighting) -> Self {
        self.weighting = weighting;
        self
    }

    pub fn with_simulate_points(mut self, points: usize) -> Self {
        self.simulate_points = points;
        self
    }

    pub fn with_scale_covariance(mut self, scale: bool) -> Self {
        self.scale_covariance = scale;
        self
    }
}

/// Everything one invocation needs.
#[derive(Debug, Clone, Default)]
pub struct FitRequest {
    pub x: Array1<f64>,
    /// Measured intensities; may be empty when simulating
    pub y: Array1<f64>,
    pub range: Option<FitRange>,
    pub backgrounds: Vec<BackgroundSpec>,
    pub peaks: Vec<PeakSpec>,
    pub links: Vec<ReferenceLink>,
    pub limits: Vec<LimitSpec>,
    pub mode: Mode,
}

impl FitRequest {
    pub fn new(x: Array1<f64>, y: Array1<f64>) -> Self {
        Self {
            x,
            y,
            ..Self::default()
        }
    }

    pub fn with_range(mut self, xmin: f64, xmax: f64) -> Self {
        self.range = Some(FitRange::new(xmin, xmax));
        self
    }

    pub fn with_background(mut self, spec: BackgroundSpec) -> Self {
        self.backgrounds.push(spec);
        self
    }

    pub fn with_peak(mut self, spec: PeakSpec) -> Self {
        self.peaks.push(spec);
        self
    }

    pub fn with_link(mut self, link: ReferenceLink) -> Self {
        self.links.push(link);
        self
    }

    pub fn with_limit(mut self, limit: LimitSpec) -> Self {
        self.limits.push(limit);
        self
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }
}

/// One component of the decomposed model.
#[derive(Debug, Clone)]
pub struct ComponentCurve {
    pub prefix: String,
    pub label: String,
    /// Peak table index, `None` for backgrounds
    pub peak_index: Option<usize>,
    pub values: Array1<f64>,
}

/// Result of [`run`].
#[derive(Debug, Clone)]
pub struct FitOutcome {
    pub mode: Mode,
    /// Energy grid the model was computed on
    pub x: Array1<f64>,
    /// Clipped measured intensities, `None` when simulating
    pub y: Option<Array1<f64>>,
    pub result: FitResult,
    pub static_background: Option<StaticBackground>,
    pub components: Vec<ComponentCurve>,
    pub peak_metrics: BTreeMap<usize, PeakMetrics>,
    /// Tables with the final values written back
    pub peaks: Vec<PeakSpec>,
    pub backgrounds: Vec<BackgroundSpec>,
    pub links: Vec<ReferenceLink>,
}

impl FitOutcome {
    /// Model plus static background, comparable to the measured intensities
    pub fn total(&self) -> Array1<f64> {
        match &self.static_background {
            Some(bg) => &self.result.best_fit + &bg.background,
            None => self.result.best_fit.clone(),
        }
    }

    /// Static background plus every background component
    pub fn background(&self) -> Array1<f64> {
        let mut total = match &self.static_background {
            Some(bg) => bg.background.clone(),
            None => Array1::zeros(self.x.len()),
        };
        for c in self.components.iter().filter(|c| c.peak_index.is_none()) {
            total += &c.values;
        }
        total
    }
}

/// Run one fit, evaluation or simulation.
///
/// # Arguments
///
/// * `request` - Data, tables and mode
/// * `config` - Solver, background and weighting settings
/// * `cache` - Tougaard shape cache, shared between runs on the same data
/// * `interrupt` - Cooperative cancellation flag polled by the solver
///
/// # Errors
///
/// * [`XpsFitError::Configuration`] for conflicting backgrounds, duplicate peak
///   indices and invalid links
/// * [`XpsFitError::EmptyRange`] when the fit range selects no samples
/// * [`XpsFitError::InvalidInput`] for empty or mismatched data
pub fn run(
    request: &FitRequest,
    config: &FitConfig,
    cache: &Arc<TougaardCache>,
    interrupt: Option<Arc<AtomicBool>>,
) -> Result<FitOutcome> {
    check_exclusive(&request.backgrounds)?;
    check_peak_indices(&request.peaks)?;

    let (x, measured) = prepare_data(request, config)?;

    let static_bg = match &measured {
        Some(y) => static_background(
            &request.backgrounds,
            &x,
            y,
            &config.shirley,
            &config.tougaard,
            cache,
        )?,
        None => {
            if let Some(spec) = request.backgrounds.iter().find(|s| s.kind.is_static()) {
                warn!("Skipping static {} background: no measured intensities", spec.kind);
            }
            None
        }
    };
    let y_fit = match (&measured, &static_bg) {
        (Some(y), Some(bg)) => Some(y - &bg.background),
        (Some(y), None) => Some(y.clone()),
        _ => None,
    };

    let data = AssemblyData {
        x: x.clone(),
        y: y_fit.clone(),
        cache: Arc::clone(cache),
        tougaard: config.tougaard,
    };
    let mut composite = assemble(&request.peaks, &request.backgrounds, Some(&data))?;
    apply_links(composite.parameters_mut(), &request.peaks, &request.links)?;
    apply_limits(composite.parameters_mut(), &request.peaks, &request.limits)?;
    composite.parameters_mut().update_expressions()?;

    let weights = match (&measured, config.weighting) {
        (Some(y), Weighting::Poisson) => poisson_weights(y),
        _ => None,
    };

    let result = match (request.mode, &y_fit) {
        (Mode::Fit, Some(y)) => {
            let mut solver = LevenbergMarquardt::with_config(config.lm.clone());
            if let Some(flag) = interrupt {
                solver = solver.with_interrupt(flag);
            }
            model::fit(&mut composite, &x, y, weights.as_ref(), &solver, config.scale_covariance)?
        }
        (Mode::Evaluate, Some(y)) => model::evaluate(&composite, &x, Some(y), weights.as_ref())?,
        _ => model::evaluate(&composite, &x, None, None)?,
    };

    let components = decompose(&composite, &result.params, &x, &request.peaks)?;
    let peak_metrics = components
        .iter()
        .filter_map(|c| c.peak_index.map(|i| (i, PeakMetrics::from_curve(&x, &c.values))))
        .collect();

    let peaks = map_peaks(&result.params, &request.peaks);
    let backgrounds = map_backgrounds(&result.params, &request.backgrounds, static_bg.as_ref());
    let links = map_links(&result.params, &request.peaks, &request.links);

    info!(
        "{:?} finished on {} samples: {}",
        request.mode,
        x.len(),
        result.message
    );

    Ok(FitOutcome {
        mode: request.mode,
        x,
        y: measured,
        result,
        static_background: static_bg,
        components,
        peak_metrics,
        peaks,
        backgrounds,
        links,
    })
}

/// Clipped grid and intensities, or a synthetic grid in simulate mode
fn prepare_data(request: &FitRequest, config: &FitConfig) -> Result<(Array1<f64>, Option<Array1<f64>>)> {
    if request.mode == Mode::Simulate {
        let n = config.simulate_points.max(2);
        let descending = request.x.len() < 2 || request.x[0] >= request.x[request.x.len() - 1];
        let (lo, hi) = match (request.range, request.x.len()) {
            (Some(range), _) => range.ordered(),
            (None, len) if len > 0 => {
                let (a, b) = (request.x[0], request.x[len - 1]);
                (a.min(b), a.max(b))
            }
            _ => {
                return Err(XpsFitError::InvalidInput(
                    "simulation needs a fit range or an energy grid".to_string(),
                ))
            }
        };
        let grid = if descending {
            Array1::linspace(hi, lo, n)
        } else {
            Array1::linspace(lo, hi, n)
        };
        return Ok((grid, None));
    }

    if request.x.is_empty() {
        return Err(XpsFitError::InvalidInput("empty spectrum".to_string()));
    }
    if request.x.len() != request.y.len() {
        return Err(XpsFitError::DimensionMismatch(format!(
            "x has {} samples, y has {}",
            request.x.len(),
            request.y.len()
        )));
    }
    let (x, y) = match request.range {
        Some(range) => fit_range(&request.x, &request.y, range.xmin, range.xmax)?,
        None => (request.x.clone(), request.y.clone()),
    };
    Ok((x, Some(y)))
}

/// `1/sqrt(y)`, or `None` if any intensity would divide by zero
pub fn poisson_weights(y: &Array1<f64>) -> Option<Array1<f64>> {
    if y.iter().all(|&v| v > 0.0 && v.is_finite()) {
        Some(y.mapv(|v| 1.0 / v.sqrt()))
    } else {
        warn!("Intensities contain zero or negative values, fitting unweighted residuals");
        None
    }
}

fn decompose(
    model: &CompositeModel,
    params: &Parameters,
    x: &Array1<f64>,
    peaks: &[PeakSpec],
) -> Result<Vec<ComponentCurve>> {
    let curves = model.eval_components(params, x)?;
    Ok(model
        .components()
        .iter()
        .zip(curves)
        .map(|(c, (prefix, values))| ComponentCurve {
            peak_index: peaks.iter().find(|p| p.prefix() == prefix).map(|p| p.peak_index),
            label: c.label(),
            prefix,
            values,
        })
        .collect())
}

/// Final value and fixed flag of one parameter. Linked parameters keep the flag they
/// had in the table.
fn table_entry(params: &Parameters, full: &str, previous: Option<&ParamValue>) -> Option<ParamValue> {
    let param = params.get(full)?;
    let fixed = if param.expr().is_some() {
        previous.map(|p| p.fixed).unwrap_or(false)
    } else {
        !param.vary()
    };
    Some(ParamValue {
        value: Some(param.value()),
        fixed,
    })
}

/// Write fitted peak values back into the peak table.
pub fn map_peaks(params: &Parameters, peaks: &[PeakSpec]) -> Vec<PeakSpec> {
    peaks
        .iter()
        .map(|spec| {
            let prefix = spec.prefix();
            let mut out = spec.clone();
            for name in spec.shape.param_names() {
                let full = format!("{}{}", prefix, name);
                if let Some(entry) = table_entry(params, &full, spec.parameters.get(*name)) {
                    out.parameters.insert(name.to_string(), entry);
                }
            }
            out
        })
        .collect()
}

/// Write fitted background values back, including the self-consistent static
/// Tougaard `B`.
pub fn map_backgrounds(
    params: &Parameters,
    backgrounds: &[BackgroundSpec],
    static_bg: Option<&StaticBackground>,
) -> Vec<BackgroundSpec> {
    backgrounds
        .iter()
        .map(|spec| {
            let mut out = spec.clone();
            if spec.kind.is_static() {
                if let (BackgroundKind::StaticTougaard, Some(t)) =
                    (spec.kind, static_bg.and_then(|s| s.tougaard.as_ref()))
                {
                    let fixed = spec.parameters.get("B").map(|p| p.fixed).unwrap_or(false);
                    out.parameters.insert(
                        "B".to_string(),
                        ParamValue {
                            value: Some(t.b),
                            fixed,
                        },
                    );
                }
                return out;
            }
            let prefix = spec.kind.prefix();
            for (full, _) in params.iter() {
                if let Some(name) = full.strip_prefix(prefix) {
                    if let Some(entry) = table_entry(params, full, spec.parameters.get(name)) {
                        out.parameters.insert(name.to_string(), entry);
                    }
                }
            }
            out
        })
        .collect()
}

/// Write fitted ratios and offsets back into the link table.
pub fn map_links(params: &Parameters, peaks: &[PeakSpec], links: &[ReferenceLink]) -> Vec<ReferenceLink> {
    links
        .iter()
        .map(|link| {
            let mut out = *link;
            if let Some(peak) = peaks.iter().find(|p| p.peak_index == link.peak_index) {
                let full = format!("{}{}", peak.prefix(), link.kind.ratio_param());
                if let Some(param) = params.get(&full) {
                    out.value = Some(param.value());
                    out.fixed = !param.vary();
                }
            }
            out
        })
        .collect()
}
