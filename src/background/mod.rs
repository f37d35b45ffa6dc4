//! # Backgrounds
//!
//! Two self-consistent algorithms and a set of parametric adapters:
//!
//! - [`shirley`]: iterative Shirley step
//! - [`tougaard`]: inelastic loss-function integral, with a [`TougaardCache`] of
//!   `B = 1` shapes for the active mode
//! - [`adapters`]: polynomial, arctan/erf steps, slope, VBM/cutoff and the active
//!   Shirley/Tougaard terms as composite-model components
//!
//! Static kinds are computed once and subtracted from the data before the fit; active
//! kinds are components whose parameters are refined with the peaks.

pub mod adapters;
mod orientation;
pub mod shirley;
pub mod tougaard;

use log::debug;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Result, XpsFitError};
use crate::peaks::ParamValue;

pub use adapters::BackgroundComponent;
pub use shirley::{shirley, ShirleyConfig};
pub use tougaard::{tougaard, LossFunction, TougaardBackground, TougaardCache, TougaardConfig};

/// Side of a VBM/cutoff polynomial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeSide {
    /// Active where `x >= center`
    Vbm,
    /// Active where `x <= center`
    Cutoff,
}

/// Background kinds. Several may be combined additively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackgroundKind {
    StaticShirley,
    ActiveShirley,
    StaticTougaard,
    ActiveTougaard,
    Polynomial { degree: usize },
    Arctan,
    Erf,
    Slope,
    VbmCutoff { side: EdgeSide },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Shirley,
    Tougaard,
    Polynomial,
    Arctan,
    Erf,
    Slope,
    Edge(EdgeSide),
}

impl BackgroundKind {
    fn family(&self) -> Family {
        match self {
            BackgroundKind::StaticShirley | BackgroundKind::ActiveShirley => Family::Shirley,
            BackgroundKind::StaticTougaard | BackgroundKind::ActiveTougaard => Family::Tougaard,
            BackgroundKind::Polynomial { .. } => Family::Polynomial,
            BackgroundKind::Arctan => Family::Arctan,
            BackgroundKind::Erf => Family::Erf,
            BackgroundKind::Slope => Family::Slope,
            BackgroundKind::VbmCutoff { side } => Family::Edge(*side),
        }
    }

    /// Precomputed and subtracted from the data instead of fitted
    pub fn is_static(&self) -> bool {
        matches!(self, BackgroundKind::StaticShirley | BackgroundKind::StaticTougaard)
    }

    /// Evaluation reads the measured intensities, not only `x`
    pub fn needs_data(&self) -> bool {
        matches!(
            self,
            BackgroundKind::ActiveShirley | BackgroundKind::ActiveTougaard | BackgroundKind::Slope
        )
    }

    /// Parameter prefix of the component
    pub fn prefix(&self) -> &'static str {
        match self {
            BackgroundKind::StaticShirley | BackgroundKind::ActiveShirley => "bg_shirley_",
            BackgroundKind::StaticTougaard | BackgroundKind::ActiveTougaard => "bg_tougaard_",
            BackgroundKind::Polynomial { .. } => "pg_",
            BackgroundKind::Arctan => "bg_arctan_",
            BackgroundKind::Erf => "bg_erf_",
            BackgroundKind::Slope => "bg_slope_",
            BackgroundKind::VbmCutoff {
                side: EdgeSide::Vbm,
            } => "bg_vbm_",
            BackgroundKind::VbmCutoff {
                side: EdgeSide::Cutoff,
            } => "bg_cutoff_",
        }
    }
}

impl fmt::Display for BackgroundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackgroundKind::Polynomial { degree } => write!(f, "Polynomial(degree {})", degree),
            BackgroundKind::VbmCutoff { side } => write!(f, "{:?}", side),
            other => write!(f, "{:?}", other),
        }
    }
}

/// One selected background with its parameter table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackgroundSpec {
    pub kind: BackgroundKind,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParamValue>,
}

impl BackgroundSpec {
    pub fn new(kind: BackgroundKind) -> Self {
        Self {
            kind,
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_value(mut self, name: &str, value: f64) -> Self {
        self.parameters.insert(name.to_string(), ParamValue::new(value));
        self
    }

    pub fn with_fixed(mut self, name: &str, value: f64) -> Self {
        self.parameters.insert(name.to_string(), ParamValue::fixed(value));
        self
    }

    pub fn value(&self, name: &str) -> Option<f64> {
        self.parameters.get(name).and_then(|p| p.value)
    }

    /// Loss-function coefficients from `C`, `C_d` and `D`, falling back to the defaults
    pub fn loss_function(&self) -> LossFunction {
        let default = LossFunction::default();
        LossFunction {
            c: self.value("C").unwrap_or(default.c),
            c_d: self.value("C_d").unwrap_or(default.c_d),
            d: self.value("D").unwrap_or(default.d),
        }
    }
}

/// Reject background selections that cannot be combined.
///
/// Static Shirley and static Tougaard are mutually exclusive, as are the static and
/// active variant of one family. Each kind may be selected at most once.
pub fn check_exclusive(specs: &[BackgroundSpec]) -> Result<()> {
    for (i, a) in specs.iter().enumerate() {
        for b in &specs[i + 1..] {
            let (ka, kb) = (a.kind, b.kind);
            if ka.family() == kb.family() {
                return Err(XpsFitError::Configuration(format!(
                    "background kinds {} and {} cannot both be selected",
                    ka, kb
                )));
            }
            if ka.is_static() && kb.is_static() {
                return Err(XpsFitError::Configuration(format!(
                    "static backgrounds {} and {} are mutually exclusive",
                    ka, kb
                )));
            }
        }
    }
    Ok(())
}

/// Precomputed background subtracted from the data before the fit.
#[derive(Debug, Clone)]
pub struct StaticBackground {
    pub kind: BackgroundKind,
    pub background: Array1<f64>,
    /// Self-consistent Tougaard result, when the kind is `StaticTougaard`
    pub tougaard: Option<TougaardBackground>,
}

/// Compute the static background of a selection, if it contains one.
///
/// # Arguments
///
/// * `specs` - Selected backgrounds, already checked with [`check_exclusive`]
/// * `x`, `y` - Clipped spectrum
/// * `shirley_config`, `tougaard_config` - Algorithm settings
/// * `cache` - Tougaard shape cache
pub fn static_background(
    specs: &[BackgroundSpec],
    x: &Array1<f64>,
    y: &Array1<f64>,
    shirley_config: &ShirleyConfig,
    tougaard_config: &TougaardConfig,
    cache: &TougaardCache,
) -> Result<Option<StaticBackground>> {
    let Some(spec) = specs.iter().find(|s| s.kind.is_static()) else {
        return Ok(None);
    };
    let result = match spec.kind {
        BackgroundKind::StaticShirley => StaticBackground {
            kind: spec.kind,
            background: shirley(x, y, shirley_config)?,
            tougaard: None,
        },
        _ => {
            let b_start = spec.value("B").unwrap_or(adapters::TOUGAARD_B);
            let result = tougaard(x, y, b_start, &spec.loss_function(), tougaard_config, cache)?;
            StaticBackground {
                kind: spec.kind,
                background: result.background.clone(),
                tougaard: Some(result),
            }
        }
    };
    debug!("Computed static {} background", spec.kind);
    Ok(Some(result))
}
