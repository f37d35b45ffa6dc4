//! Cross-peak parameter links.
//!
//! A link ties a parameter of one peak to the same kind of parameter on another:
//!
//! ```text
//! <target_prefix><base> * <current_prefix><ratio>     (amplitude, widths, gamma, soc, height ratio)
//! <target_prefix>center + <current_prefix>center_diff
//! ```
//!
//! The ratio (or offset) becomes a parameter of its own on the current peak, so it can
//! be fixed, varied or bounded like any other. The linked parameter stops being free.

use log::debug;
use std::collections::{HashMap, HashSet};

use crate::error::{Result, XpsFitError};
use crate::parameters::{Parameter, ParameterError, Parameters};
use crate::peaks::{PeakShape, PeakSpec, ReferenceLink};

/// A link checked against the peak table.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedLink {
    /// Prefixed name of the dependent parameter
    pub param: String,
    /// Prefixed name of the ratio or offset parameter
    pub ratio_param: String,
    pub expr: String,
    pub value: f64,
    pub fixed: bool,
}

/// Check a link against the peak table and build its expression.
///
/// # Errors
///
/// * [`XpsFitError::Configuration`] if the link points at its own peak, names a peak
///   that does not exist, or a kind one of the two shapes does not have
///
/// # Examples
///
/// ```
/// use std::collections::HashMap;
/// use xpsfit_rs::linker::resolve_link;
/// use xpsfit_rs::peaks::{ParamKind, PeakShape, ReferenceLink};
///
/// let shapes = HashMap::from([(1, PeakShape::Voigt), (2, PeakShape::Lorentzian)]);
/// let link = ReferenceLink::new(2, ParamKind::LorentzianWidth, 1).with_value(1.5);
/// let resolved = resolve_link(&link, &shapes).unwrap();
/// assert_eq!(resolved.expr, "v1_gamma * l2_lorentzian_ratio");
/// assert_eq!(resolved.param, "l2_sigma");
/// ```
pub fn resolve_link(link: &ReferenceLink, shapes: &HashMap<usize, PeakShape>) -> Result<ResolvedLink> {
    if link.target_peak_index == link.peak_index {
        return Err(XpsFitError::Configuration(format!(
            "peak {} references itself for {}",
            link.peak_index, link.kind
        )));
    }
    let shape = *shapes.get(&link.peak_index).ok_or_else(|| {
        XpsFitError::Configuration(format!("link on unknown peak {}", link.peak_index))
    })?;
    let target = *shapes.get(&link.target_peak_index).ok_or_else(|| {
        XpsFitError::Configuration(format!(
            "peak {} references unknown peak {}",
            link.peak_index, link.target_peak_index
        ))
    })?;

    let local = shape.resolve(link.kind).ok_or_else(|| {
        XpsFitError::Configuration(format!("{} peak {} has no {}", shape, link.peak_index, link.kind))
    })?;
    let base = target.resolve(link.kind).ok_or_else(|| {
        XpsFitError::Configuration(format!(
            "{} peak {} has no {} to reference",
            target, link.target_peak_index, link.kind
        ))
    })?;

    let prefix = shape.prefix(link.peak_index);
    let ratio_param = format!("{}{}", prefix, link.kind.ratio_param());
    Ok(ResolvedLink {
        param: format!("{}{}", prefix, local),
        expr: format!(
            "{}{} {} {}",
            target.prefix(link.target_peak_index),
            base,
            link.kind.operator(),
            ratio_param
        ),
        ratio_param,
        value: link.value.unwrap_or_else(|| link.kind.neutral_value()),
        fixed: link.fixed,
    })
}

/// Install the expressions of all links on an assembled parameter set.
///
/// Every link is checked before anything is changed, so a rejected table leaves
/// `params` untouched apart from links that fail only on installation (cycles).
///
/// # Errors
///
/// * [`XpsFitError::Configuration`] for self-references, unknown peaks, missing
///   capabilities, two links on the same parameter, or a dependency cycle
pub fn apply_links(params: &mut Parameters, peaks: &[PeakSpec], links: &[ReferenceLink]) -> Result<()> {
    let shapes: HashMap<usize, PeakShape> = peaks.iter().map(|p| (p.peak_index, p.shape)).collect();

    let mut seen = HashSet::new();
    let mut resolved = Vec::with_capacity(links.len());
    for link in links {
        if !seen.insert((link.peak_index, link.kind)) {
            return Err(XpsFitError::Configuration(format!(
                "peak {} has more than one {} link",
                link.peak_index, link.kind
            )));
        }
        resolved.push(resolve_link(link, &shapes)?);
    }

    for link in resolved {
        if !params.contains(&link.param) {
            return Err(XpsFitError::ParameterNotFound(link.param));
        }
        let mut ratio = Parameter::new(&link.ratio_param, link.value);
        ratio.set_vary(!link.fixed)?;
        params.add(ratio)?;

        params.set_expr(&link.param, &link.expr).map_err(|err| match err {
            ParameterError::CircularDependency { name } => XpsFitError::Configuration(format!(
                "links on '{}' form a cycle",
                name
            )),
            other => XpsFitError::from(other),
        })?;
        debug!("{} = {}", link.param, link.expr);
    }
    Ok(())
}
