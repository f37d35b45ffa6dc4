//! Building the composite model from the peak and background tables.
//!
//! Every peak becomes a [`PeakComponent`] and every active background a
//! [`BackgroundComponent`]. Parameters start from the shape defaults, are overwritten
//! by explicit table values, and unset peak centers and amplitudes are guessed from
//! the data when measured intensities are available.

use log::{debug, warn};
use ndarray::Array1;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::background::adapters::BackgroundData;
use crate::background::{check_exclusive, BackgroundComponent, BackgroundSpec, TougaardCache, TougaardConfig};
use crate::composite::CompositeModel;
use crate::error::{Result, XpsFitError};
use crate::model::Model;
use crate::parameters::Parameters;
use crate::peaks::{ParamValue, PeakComponent, PeakSpec};

/// Spectrum the model is built for.
#[derive(Debug, Clone)]
pub struct AssemblyData {
    pub x: Array1<f64>,
    /// Measured intensities after static background subtraction; `None` when simulating
    pub y: Option<Array1<f64>>,
    pub cache: Arc<TougaardCache>,
    pub tougaard: TougaardConfig,
}

/// Reject duplicate or zero peak indices.
pub fn check_peak_indices(peaks: &[PeakSpec]) -> Result<()> {
    let mut seen = HashSet::new();
    for peak in peaks {
        if peak.peak_index == 0 {
            return Err(XpsFitError::Configuration(
                "peak indices start at 1".to_string(),
            ));
        }
        if !seen.insert(peak.peak_index) {
            return Err(XpsFitError::Configuration(format!(
                "peak index {} is used twice",
                peak.peak_index
            )));
        }
    }
    Ok(())
}

/// Write explicit table values into a component's parameters.
///
/// Names outside the component's schema are ignored. A listed name varies unless its
/// `fixed` flag is set; a value outside the bounds is clamped.
pub fn apply_overrides(
    params: &mut Parameters,
    prefix: &str,
    values: &BTreeMap<String, ParamValue>,
) -> Result<()> {
    for (name, entry) in values {
        let full = format!("{}{}", prefix, name);
        let Some(param) = params.get_mut(&full) else {
            debug!("Ignoring '{}': not a parameter of this component", full);
            continue;
        };
        if let Some(value) = entry.value {
            let stored = param.set_value_clamped(value);
            if stored != value {
                warn!("{} = {} is outside its bounds, clamped to {}", full, value, stored);
            }
        }
        param.set_vary(!entry.fixed)?;
    }
    Ok(())
}

/// Build one peak component.
pub fn build_peak(spec: &PeakSpec, data: Option<&AssemblyData>) -> Result<PeakComponent> {
    let mut peak = PeakComponent::new(spec.shape, spec.peak_index)?;
    let prefix = peak.prefix().to_string();
    apply_overrides(peak.parameters_mut(), &prefix, &spec.parameters)?;

    if let Some(AssemblyData { x, y: Some(y), .. }) = data {
        let guess_center = spec.value("center").is_none();
        let guess_amplitude = spec.value("amplitude").is_none();
        if guess_center || guess_amplitude {
            peak.guess(x, y, guess_center, guess_amplitude)?;
            debug!("Guessed starting values for peak {}", prefix);
        }
    }
    Ok(peak)
}

/// Build one active background component, or `None` when it cannot be built on the
/// given data (a data-dependent kind while simulating).
pub fn build_background(
    spec: &BackgroundSpec,
    data: Option<&AssemblyData>,
) -> Result<Option<BackgroundComponent>> {
    let measured = data.and_then(|d| d.y.as_ref().map(|y| (d, y)));
    if spec.kind.needs_data() && measured.is_none() {
        warn!("Skipping {} background: it needs measured intensities", spec.kind);
        return Ok(None);
    }

    let bound = measured.filter(|_| spec.kind.needs_data()).map(|(d, y)| BackgroundData {
        y: Arc::new(y.clone()),
        cache: Arc::clone(&d.cache),
        tougaard: d.tougaard,
    });
    let mut component = BackgroundComponent::new(spec.kind, bound)?;

    if let Some((d, y)) = measured {
        let keep: Vec<&str> = spec
            .parameters
            .iter()
            .filter(|(_, v)| v.value.is_some())
            .map(|(k, _)| k.as_str())
            .collect();
        component.guess(&d.x, y, &keep)?;
    }
    let prefix = spec.kind.prefix();
    apply_overrides(component.parameters_mut(), prefix, &spec.parameters)?;
    Ok(Some(component))
}

/// Assemble peaks and active backgrounds into one composite model.
///
/// # Arguments
///
/// * `peaks` - Peak table, in column order
/// * `backgrounds` - Selected backgrounds; static kinds are skipped here
/// * `data` - Spectrum used for guesses and data-dependent backgrounds
///
/// # Errors
///
/// * [`XpsFitError::Configuration`] for duplicate peak indices or conflicting
///   backgrounds
pub fn assemble(
    peaks: &[PeakSpec],
    backgrounds: &[BackgroundSpec],
    data: Option<&AssemblyData>,
) -> Result<CompositeModel> {
    check_peak_indices(peaks)?;
    check_exclusive(backgrounds)?;

    let mut model = CompositeModel::new();
    for spec in backgrounds.iter().filter(|s| !s.kind.is_static()) {
        if let Some(component) = build_background(spec, data)? {
            model.add_component(Box::new(component))?;
        }
    }
    for spec in peaks {
        model.add_component(Box::new(build_peak(spec, data)?))?;
    }
    debug!(
        "Assembled {} components with {} parameters",
        model.len(),
        model.parameters().len()
    );
    Ok(model)
}
