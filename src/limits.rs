//! User bounds from the limit table.

use log::debug;

use crate::error::Result;
use crate::parameters::Parameters;
use crate::peaks::{LimitSpec, PeakSpec};

/// Apply every enabled limit row with at least one bound.
///
/// Rows are skipped (and logged at debug level) when the flag is unset, both bounds
/// are empty, the peak is unknown, or the addressed parameter does not exist on the
/// peak. Ratio parameters only exist once the corresponding link was installed.
///
/// # Returns
///
/// * The number of rows applied
pub fn apply_limits(params: &mut Parameters, peaks: &[PeakSpec], limits: &[LimitSpec]) -> Result<usize> {
    let mut applied = 0;
    for limit in limits {
        if !limit.enabled || (limit.min.is_none() && limit.max.is_none()) {
            continue;
        }
        let Some(peak) = peaks.iter().find(|p| p.peak_index == limit.peak_index) else {
            debug!("Ignoring limit on unknown peak {}", limit.peak_index);
            continue;
        };
        let Some(name) = limit.key.resolve(peak.shape) else {
            debug!("Ignoring limit {:?}: {} has no such parameter", limit.key, peak.shape);
            continue;
        };
        let full = format!("{}{}", peak.prefix(), name);
        let Some(param) = params.get_mut(&full) else {
            debug!("Ignoring limit on missing parameter '{}'", full);
            continue;
        };

        let min = limit.min.unwrap_or(param.min());
        let max = limit.max.unwrap_or(param.max());
        param.set_bounds(min, max)?;
        debug!("{} bounded to [{}, {}]", full, min, max);
        applied += 1;
    }
    Ok(applied)
}
