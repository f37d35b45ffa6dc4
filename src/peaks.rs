//! Peak descriptions and the peak component of a composite model.
//!
//! [`PeakShape`] is the closed set of supported lineshapes. Each variant carries a
//! fixed parameter schema and answers capability questions (which parameter holds the
//! Lorentzian width, whether it has a spin-orbit splitting, ...) directly, so the
//! linker and the limit applier never have to inspect parameter names.

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::composite::Component;
use crate::error::{Result, XpsFitError};
use crate::lineshapes;
use crate::parameters::{Parameter, Parameters};

/// Supported peak lineshapes, in the order of their table index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PeakShape {
    Gaussian,
    Lorentzian,
    Voigt,
    PseudoVoigt,
    ExpGaussian,
    SkewedGaussian,
    SkewedVoigt,
    BreitWigner,
    Lognormal,
    Doniach,
    ConvGaussDoniachDublett,
    ConvGaussDoniachSinglett,
    FermiEdge,
}

/// Peak-level parameter categories shared by links and limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ParamKind {
    Amplitude,
    Center,
    LorentzianWidth,
    GaussianWidth,
    Gamma,
    Soc,
    HeightRatio,
}

impl ParamKind {
    pub const ALL: [ParamKind; 7] = [
        ParamKind::Amplitude,
        ParamKind::Center,
        ParamKind::LorentzianWidth,
        ParamKind::GaussianWidth,
        ParamKind::Gamma,
        ParamKind::Soc,
        ParamKind::HeightRatio,
    ];

    /// Name of the local parameter holding the ratio (or offset) of a link
    pub fn ratio_param(&self) -> &'static str {
        match self {
            ParamKind::Amplitude => "amp_ratio",
            ParamKind::Center => "center_diff",
            ParamKind::LorentzianWidth => "lorentzian_ratio",
            ParamKind::GaussianWidth => "gaussian_ratio",
            ParamKind::Gamma => "gamma_ratio",
            ParamKind::Soc => "soc_ratio",
            ParamKind::HeightRatio => "rel_height_ratio",
        }
    }

    /// Links on the center add an offset; every other link multiplies
    pub fn is_offset(&self) -> bool {
        matches!(self, ParamKind::Center)
    }

    pub fn operator(&self) -> &'static str {
        if self.is_offset() {
            "+"
        } else {
            "*"
        }
    }

    /// Neutral link value: zero offset or unit ratio
    pub fn neutral_value(&self) -> f64 {
        if self.is_offset() {
            0.0
        } else {
            1.0
        }
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParamKind::Amplitude => "amplitude",
            ParamKind::Center => "center",
            ParamKind::LorentzianWidth => "lorentzian_width",
            ParamKind::GaussianWidth => "gaussian_width",
            ParamKind::Gamma => "gamma",
            ParamKind::Soc => "soc",
            ParamKind::HeightRatio => "height_ratio",
        };
        f.write_str(name)
    }
}

/// Default value and bounds of a schema parameter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamDefault {
    pub value: f64,
    pub min: f64,
    pub max: f64,
}

impl ParamDefault {
    const fn new(value: f64, min: f64, max: f64) -> Self {
        Self { value, min, max }
    }

    const fn free(value: f64) -> Self {
        Self::new(value, f64::NEG_INFINITY, f64::INFINITY)
    }

    const fn positive(value: f64) -> Self {
        Self::new(value, 0.0, f64::INFINITY)
    }
}

impl PeakShape {
    pub const ALL: [PeakShape; 13] = [
        PeakShape::Gaussian,
        PeakShape::Lorentzian,
        PeakShape::Voigt,
        PeakShape::PseudoVoigt,
        PeakShape::ExpGaussian,
        PeakShape::SkewedGaussian,
        PeakShape::SkewedVoigt,
        PeakShape::BreitWigner,
        PeakShape::Lognormal,
        PeakShape::Doniach,
        PeakShape::ConvGaussDoniachDublett,
        PeakShape::ConvGaussDoniachSinglett,
        PeakShape::FermiEdge,
    ];

    /// Shape for a table index
    pub fn from_index(index: usize) -> Result<Self> {
        Self::ALL.get(index).copied().ok_or_else(|| {
            XpsFitError::Configuration(format!("unknown peak shape index {}", index))
        })
    }

    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Short tag used in parameter prefixes
    pub fn tag(&self) -> &'static str {
        match self {
            PeakShape::Gaussian => "g",
            PeakShape::Lorentzian => "l",
            PeakShape::Voigt => "v",
            PeakShape::PseudoVoigt => "pv",
            PeakShape::ExpGaussian => "eg",
            PeakShape::SkewedGaussian => "sg",
            PeakShape::SkewedVoigt => "sv",
            PeakShape::BreitWigner => "bwf",
            PeakShape::Lognormal => "lgn",
            PeakShape::Doniach => "d",
            PeakShape::ConvGaussDoniachDublett => "gdd",
            PeakShape::ConvGaussDoniachSinglett => "gds",
            PeakShape::FermiEdge => "fe",
        }
    }

    /// Parameter prefix of the peak with the given table index, e.g. `v2_`
    pub fn prefix(&self, peak_index: usize) -> String {
        format!("{}{}_", self.tag(), peak_index)
    }

    /// Parameter names, in the argument order of the lineshape function
    pub fn param_names(&self) -> &'static [&'static str] {
        match self {
            PeakShape::Gaussian | PeakShape::Lorentzian | PeakShape::Lognormal => {
                &["amplitude", "center", "sigma"]
            }
            PeakShape::Voigt
            | PeakShape::ExpGaussian
            | PeakShape::SkewedGaussian
            | PeakShape::Doniach => &["amplitude", "center", "sigma", "gamma"],
            PeakShape::PseudoVoigt => &["amplitude", "center", "sigma", "fraction"],
            PeakShape::SkewedVoigt => &["amplitude", "center", "sigma", "gamma", "skew"],
            PeakShape::BreitWigner => &["amplitude", "center", "sigma", "q"],
            PeakShape::ConvGaussDoniachSinglett => {
                &["amplitude", "sigma", "gamma", "gaussian_sigma", "center"]
            }
            PeakShape::ConvGaussDoniachDublett => &[
                "amplitude",
                "sigma",
                "gamma",
                "gaussian_sigma",
                "center",
                "soc",
                "height_ratio",
                "fct_coster_kronig",
            ],
            PeakShape::FermiEdge => &["amplitude", "center", "kt", "sigma"],
        }
    }

    pub fn has_param(&self, name: &str) -> bool {
        self.param_names().contains(&name)
    }

    pub fn is_doniach_family(&self) -> bool {
        matches!(
            self,
            PeakShape::Doniach
                | PeakShape::ConvGaussDoniachDublett
                | PeakShape::ConvGaussDoniachSinglett
        )
    }

    /// Peak height equals `amplitude` instead of the peak area
    pub fn amplitude_is_height(&self) -> bool {
        matches!(
            self,
            PeakShape::ConvGaussDoniachDublett
                | PeakShape::ConvGaussDoniachSinglett
                | PeakShape::FermiEdge
                | PeakShape::BreitWigner
        )
    }

    /// Parameter holding the Lorentzian width
    pub fn lorentzian_width_param(&self) -> Option<&'static str> {
        match self {
            PeakShape::Voigt | PeakShape::SkewedVoigt => Some("gamma"),
            PeakShape::Lorentzian
            | PeakShape::PseudoVoigt
            | PeakShape::BreitWigner
            | PeakShape::Doniach
            | PeakShape::ConvGaussDoniachDublett
            | PeakShape::ConvGaussDoniachSinglett => Some("sigma"),
            _ => None,
        }
    }

    /// Parameter holding the Gaussian width
    pub fn gaussian_width_param(&self) -> Option<&'static str> {
        match self {
            PeakShape::Gaussian
            | PeakShape::Voigt
            | PeakShape::SkewedVoigt
            | PeakShape::ExpGaussian
            | PeakShape::SkewedGaussian
            | PeakShape::Lognormal
            | PeakShape::FermiEdge => Some("sigma"),
            PeakShape::ConvGaussDoniachDublett | PeakShape::ConvGaussDoniachSinglett => {
                Some("gaussian_sigma")
            }
            _ => None,
        }
    }

    pub fn has_gamma(&self) -> bool {
        matches!(self, PeakShape::ExpGaussian | PeakShape::SkewedGaussian) || self.is_doniach_family()
    }

    pub fn has_soc(&self) -> bool {
        matches!(self, PeakShape::ConvGaussDoniachDublett)
    }

    pub fn has_height_ratio(&self) -> bool {
        self.has_soc()
    }

    /// Schema parameter addressed by a parameter kind, if the shape has one
    pub fn resolve(&self, kind: ParamKind) -> Option<&'static str> {
        match kind {
            ParamKind::Amplitude => Some("amplitude"),
            ParamKind::Center => Some("center"),
            ParamKind::LorentzianWidth => self.lorentzian_width_param(),
            ParamKind::GaussianWidth => self.gaussian_width_param(),
            ParamKind::Gamma => self.has_gamma().then_some("gamma"),
            ParamKind::Soc => self.has_soc().then_some("soc"),
            ParamKind::HeightRatio => self.has_height_ratio().then_some("height_ratio"),
        }
    }

    /// Default value and bounds of a schema parameter
    pub fn default_for(&self, name: &str) -> Option<ParamDefault> {
        if !self.has_param(name) {
            return None;
        }
        let narrow = self.is_doniach_family() || *self == PeakShape::FermiEdge;
        let default = match name {
            "amplitude" => ParamDefault::positive(1.0),
            "center" => ParamDefault::free(0.0),
            "sigma" if narrow => ParamDefault::positive(0.1),
            "sigma" => ParamDefault::positive(1.0),
            "gamma" if self.is_doniach_family() => ParamDefault::new(0.02, 0.0, 1.0),
            "gamma" if *self == PeakShape::SkewedGaussian => ParamDefault::free(0.0),
            "gamma" => ParamDefault::positive(1.0),
            "fraction" => ParamDefault::new(0.5, 0.0, 1.0),
            "skew" => ParamDefault::free(0.0),
            "q" => ParamDefault::free(1.0),
            "gaussian_sigma" => ParamDefault::positive(0.2),
            "soc" => ParamDefault::free(2.0),
            "height_ratio" => ParamDefault::positive(0.5),
            "fct_coster_kronig" => ParamDefault::positive(1.0),
            "kt" => ParamDefault::positive(0.026),
            _ => return None,
        };
        Some(default)
    }

    /// Evaluate the lineshape with values in [`Self::param_names`] order.
    pub fn evaluate(&self, x: &Array1<f64>, p: &[f64]) -> Result<Array1<f64>> {
        if p.len() != self.param_names().len() {
            return Err(XpsFitError::DimensionMismatch(format!(
                "{:?} takes {} parameters, got {}",
                self,
                self.param_names().len(),
                p.len()
            )));
        }
        let y = match self {
            PeakShape::Gaussian => lineshapes::gaussian(x, p[0], p[1], p[2]),
            PeakShape::Lorentzian => lineshapes::lorentzian(x, p[0], p[1], p[2]),
            PeakShape::Voigt => lineshapes::voigt(x, p[0], p[1], p[2], p[3]),
            PeakShape::PseudoVoigt => lineshapes::pvoigt(x, p[0], p[1], p[2], p[3]),
            PeakShape::ExpGaussian => lineshapes::exp_gaussian(x, p[0], p[1], p[2], p[3]),
            PeakShape::SkewedGaussian => lineshapes::skewed_gaussian(x, p[0], p[1], p[2], p[3]),
            PeakShape::SkewedVoigt => lineshapes::skewed_voigt(x, p[0], p[1], p[2], p[3], p[4]),
            PeakShape::BreitWigner => lineshapes::breit_wigner(x, p[0], p[1], p[2], p[3]),
            PeakShape::Lognormal => lineshapes::lognormal(x, p[0], p[1], p[2]),
            PeakShape::Doniach => lineshapes::doniach(x, p[0], p[1], p[2], p[3]),
            PeakShape::ConvGaussDoniachSinglett => {
                lineshapes::singlett(x, p[0], p[1], p[2], p[3], p[4])?
            }
            PeakShape::ConvGaussDoniachDublett => {
                lineshapes::dublett(x, p[0], p[1], p[2], p[3], p[4], p[5], p[6], p[7])?
            }
            PeakShape::FermiEdge => lineshapes::fermi_edge(x, p[0], p[1], p[2], p[3])?,
        };
        Ok(y)
    }
}

impl fmt::Display for PeakShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A table cell: optional value plus the fixed flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamValue {
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub fixed: bool,
}

impl ParamValue {
    pub fn new(value: f64) -> Self {
        Self {
            value: Some(value),
            fixed: false,
        }
    }

    pub fn fixed(value: f64) -> Self {
        Self {
            value: Some(value),
            fixed: true,
        }
    }
}

/// One peak column of the parameter table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeakSpec {
    pub shape: PeakShape,

    /// 1-based, unique within a fit
    pub peak_index: usize,

    #[serde(default)]
    pub parameters: BTreeMap<String, ParamValue>,
}

impl PeakSpec {
    pub fn new(shape: PeakShape, peak_index: usize) -> Self {
        Self {
            shape,
            peak_index,
            parameters: BTreeMap::new(),
        }
    }

    /// Set a free starting value
    pub fn with_value(mut self, name: &str, value: f64) -> Self {
        self.parameters.insert(name.to_string(), ParamValue::new(value));
        self
    }

    /// Set a value held fixed during the fit
    pub fn with_fixed(mut self, name: &str, value: f64) -> Self {
        self.parameters.insert(name.to_string(), ParamValue::fixed(value));
        self
    }

    pub fn prefix(&self) -> String {
        self.shape.prefix(self.peak_index)
    }

    pub fn value(&self, name: &str) -> Option<f64> {
        self.parameters.get(name).and_then(|p| p.value)
    }
}

/// Cross-peak link: the `kind` parameter of `peak_index` follows the same parameter
/// of `target_peak_index`, scaled by (or offset by) `value`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferenceLink {
    pub peak_index: usize,
    pub kind: ParamKind,
    pub target_peak_index: usize,
    /// Ratio or offset; unset means unit ratio or zero offset
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub fixed: bool,
}

impl ReferenceLink {
    pub fn new(peak_index: usize, kind: ParamKind, target_peak_index: usize) -> Self {
        Self {
            peak_index,
            kind,
            target_peak_index,
            value: None,
            fixed: false,
        }
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_fixed(mut self, fixed: bool) -> Self {
        self.fixed = fixed;
        self
    }
}

/// Parameter addressed by a limit row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LimitKey {
    /// Shape-resolved peak parameter
    Param(ParamKind),
    /// Ratio or offset parameter created by a link
    Ratio(ParamKind),
    /// Shape-specific schema parameter such as `fraction`, `skew` or `kt`
    Named(String),
}

impl LimitKey {
    /// Unprefixed parameter name on a peak of `shape`
    pub fn resolve(&self, shape: PeakShape) -> Option<String> {
        match self {
            LimitKey::Param(kind) => shape.resolve(*kind).map(str::to_string),
            LimitKey::Ratio(kind) => Some(kind.ratio_param().to_string()),
            LimitKey::Named(name) => shape.has_param(name).then(|| name.clone()),
        }
    }
}

/// One row of the limit table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitSpec {
    pub peak_index: usize,
    pub key: LimitKey,
    /// The "use limit" flag
    pub enabled: bool,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

impl LimitSpec {
    pub fn new(peak_index: usize, key: LimitKey, min: Option<f64>, max: Option<f64>) -> Self {
        Self {
            peak_index,
            key,
            enabled: true,
            min,
            max,
        }
    }
}

/// A peak instantiated with its prefixed parameter set.
#[derive(Debug, Clone)]
pub struct PeakComponent {
    shape: PeakShape,
    peak_index: usize,
    prefix: String,
    names: Vec<String>,
    params: Parameters,
}

impl PeakComponent {
    /// Create a peak with the shape's default parameters.
    ///
    /// # Examples
    ///
    /// ```
    /// use xpsfit_rs::peaks::{PeakComponent, PeakShape};
    ///
    /// let peak = PeakComponent::new(PeakShape::ConvGaussDoniachDublett, 3).unwrap();
    /// assert_eq!(peak.prefix(), "gdd3_");
    /// assert!(peak.parameters().contains("gdd3_fct_coster_kronig"));
    /// ```
    pub fn new(shape: PeakShape, peak_index: usize) -> Result<Self> {
        let prefix = shape.prefix(peak_index);
        let mut params = Parameters::new();
        let mut names = Vec::with_capacity(shape.param_names().len());
        for name in shape.param_names() {
            let full = format!("{}{}", prefix, name);
            let default = shape
                .default_for(name)
                .ok_or_else(|| XpsFitError::ParameterNotFound(full.clone()))?;
            params.add(Parameter::with_bounds(&full, default.value, default.min, default.max)?)?;
            names.push(full);
        }
        Ok(Self {
            shape,
            peak_index,
            prefix,
            names,
            params,
        })
    }

    pub fn shape(&self) -> PeakShape {
        self.shape
    }

    pub fn peak_index(&self) -> usize {
        self.peak_index
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn parameters(&self) -> &Parameters {
        &self.params
    }

    pub fn parameters_mut(&mut self) -> &mut Parameters {
        &mut self.params
    }

    /// Prefixed name of a schema parameter
    pub fn param_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    /// Fill `center` and `amplitude` from the data, keeping any other value.
    ///
    /// The center goes to the energy of the highest sample; the amplitude is chosen so
    /// that the peak height matches the data's height above its minimum.
    pub fn guess(&mut self, x: &Array1<f64>, y: &Array1<f64>, center: bool, amplitude: bool) -> Result<()> {
        if x.is_empty() || x.len() != y.len() {
            return Ok(());
        }
        let (imax, ymax) = y
            .iter()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best });
        let ymin = y.iter().copied().fold(f64::INFINITY, f64::min);

        if center {
            let name = self.param_name("center");
            self.params.set_value(&name, x[imax])?;
        }
        if amplitude {
            let height = ymax - ymin;
            let name = self.param_name("amplitude");
            self.params.set_value(&name, 1.0)?;
            let unit = self.eval_with(&self.params, x)?;
            let unit_height = unit.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            if height > 0.0 && unit_height > 0.0 && unit_height.is_finite() {
                self.params.set_value(&name, height / unit_height)?;
            }
        }
        Ok(())
    }
}

impl Component for PeakComponent {
    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn label(&self) -> String {
        format!("{} {}", self.shape, self.peak_index)
    }

    fn parameters(&self) -> &Parameters {
        &self.params
    }

    fn eval_with(&self, params: &Parameters, x: &Array1<f64>) -> Result<Array1<f64>> {
        let values = self
            .names
            .iter()
            .map(|name| params.value(name).map_err(XpsFitError::from))
            .collect::<Result<Vec<f64>>>()?;
        self.shape.evaluate(x, &values)
    }
}

/// Area, height and full width at half maximum of a sampled peak.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeakMetrics {
    pub area: f64,
    pub height: f64,
    pub fwhm: f64,
}

impl PeakMetrics {
    /// Metrics of a component curve. The area is taken over `|Δx|`; the FWHM is
    /// interpolated linearly at half height and is zero when either flank does not
    /// drop below half height inside the grid.
    pub fn from_curve(x: &Array1<f64>, y: &Array1<f64>) -> Self {
        let n = x.len().min(y.len());
        if n == 0 {
            return Self {
                area: 0.0,
                height: 0.0,
                fwhm: 0.0,
            };
        }
        let area: f64 = (1..n)
            .map(|i| 0.5 * (x[i] - x[i - 1]).abs() * (y[i] + y[i - 1]))
            .sum();
        let (imax, height) = y
            .iter()
            .take(n)
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best });

        let half = height / 2.0;
        let crossing = |range: Box<dyn Iterator<Item = usize>>| -> Option<f64> {
            let mut prev = imax;
            for i in range {
                if y[i] < half {
                    let t = (half - y[i]) / (y[prev] - y[i]);
                    return Some(x[i] + t * (x[prev] - x[i]));
                }
                prev = i;
            }
            None
        };
        let left = crossing(Box::new((0..imax).rev()));
        let right = crossing(Box::new(imax + 1..n));
        let fwhm = match (left, right) {
            (Some(a), Some(b)) => (b - a).abs(),
            _ => 0.0,
        };

        Self { area, height, fwhm }
    }
}
