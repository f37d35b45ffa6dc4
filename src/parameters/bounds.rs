//! Parameter bounds
//!
//! Bounds on a fit parameter and the Minuit-style transform that maps a bounded
//! external value onto an unbounded internal coordinate the solver can move freely in.
//! Peak amplitudes and widths are bounded below by zero, asymmetry parameters are
//! bounded on both sides, and user limit rows (see [`crate::limits`]) narrow them further.

use serde::{Deserialize, Serialize};
use std::f64::{INFINITY, NEG_INFINITY};
use thiserror::Error;

/// Errors that can occur when working with parameter bounds
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BoundsError {
    #[error("Invalid bounds: min ({min}) must not exceed max ({max})")]
    InvalidBounds { min: f64, max: f64 },

    #[error("Parameter value {value} is outside bounds: [{min}, {max}]")]
    ValueOutsideBounds { value: f64, min: f64, max: f64 },

    #[error("Non-finite parameter value is not allowed")]
    NonFiniteValue,
}

/// Lower and upper limit of a parameter. Infinite values mean "unbounded".
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

// Infinite limits are written as `null` so the JSON stays portable.
impl Serialize for Bounds {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("Bounds", 2)?;
        let min = if self.min.is_finite() { Some(self.min) } else { None };
        let max = if self.max.is_finite() { Some(self.max) } else { None };
        state.serialize_field("min", &min)?;
        state.serialize_field("max", &max)?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for Bounds {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct BoundsHelper {
            #[serde(default)]
            min: Option<f64>,
            #[serde(default)]
            max: Option<f64>,
        }

        let helper = BoundsHelper::deserialize(deserializer)?;
        Ok(Bounds {
            min: helper.min.unwrap_or(NEG_INFINITY),
            max: helper.max.unwrap_or(INFINITY),
        })
    }
}

impl Default for Bounds {
    fn default() -> Self {
        Self {
            min: NEG_INFINITY,
            max: INFINITY,
        }
    }
}

impl Bounds {
    /// Create bounds from a min and max value
    ///
    /// # Arguments
    ///
    /// * `min` - Lower limit (may be `-inf`)
    /// * `max` - Upper limit (may be `inf`)
    ///
    /// # Returns
    ///
    /// The bounds, or `BoundsError::InvalidBounds` when `min > max` or either limit is NaN
    ///
    /// # Examples
    ///
    /// ```
    /// use xpsfit_rs::parameters::Bounds;
    ///
    /// let bounds = Bounds::new(0.0, 1.0).unwrap();
    /// assert!(bounds.is_within_bounds(0.5));
    /// assert!(Bounds::new(1.0, 0.0).is_err());
    /// ```
    pub fn new(min: f64, max: f64) -> Result<Self, BoundsError> {
        if min.is_nan() || max.is_nan() || min > max {
            return Err(BoundsError::InvalidBounds { min, max });
        }
        Ok(Self { min, max })
    }

    /// Bounds with no limits on either side
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Bounds limited from below only
    pub fn min_only(min: f64) -> Self {
        Self { min, max: INFINITY }
    }

    /// Bounds limited from above only
    pub fn max_only(max: f64) -> Self {
        Self {
            min: NEG_INFINITY,
            max,
        }
    }

    pub fn is_within_bounds(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    pub fn has_lower_bound(&self) -> bool {
        self.min.is_finite()
    }

    pub fn has_upper_bound(&self) -> bool {
        self.max.is_finite()
    }

    /// Clamp a value into the bounds
    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }
}

/// Minuit-style transform between bounded external values and unbounded internal values
///
/// * lower bound only: `ext = min - 1 + sqrt(int² + 1)`
/// * upper bound only: `ext = max + 1 - sqrt(int² + 1)`
/// * both bounds: `ext = min + (sin(int) + 1) (max - min) / 2`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundsTransform {
    bounds: Bounds,
}

impl BoundsTransform {
    pub fn new(bounds: Bounds) -> Self {
        Self { bounds }
    }

    /// Transform an internal (solver) value to the external (physical) value
    ///
    /// # Arguments
    ///
    /// * `internal_value` - Value in the unbounded solver coordinate
    ///
    /// # Returns
    ///
    /// The physical value, guaranteed to lie within the bounds
    pub fn to_external(&self, internal_value: f64) -> f64 {
        let b = &self.bounds;
        match (b.has_lower_bound(), b.has_upper_bound()) {
            (false, false) => internal_value,
            (true, false) => b.min - 1.0 + (internal_value * internal_value + 1.0).sqrt(),
            (false, true) => b.max + 1.0 - (internal_value * internal_value + 1.0).sqrt(),
            (true, true) => b.min + (internal_value.sin() + 1.0) * (b.max - b.min) / 2.0,
        }
    }

    /// Transform an external (physical) value to the internal (solver) value
    ///
    /// # Arguments
    ///
    /// * `external_value` - Physical value, must be finite and within bounds
    ///
    /// # Returns
    ///
    /// The solver coordinate, or an error when the value is non-finite or out of bounds
    pub fn to_internal(&self, external_value: f64) -> Result<f64, BoundsError> {
        if !external_value.is_finite() {
            return Err(BoundsError::NonFiniteValue);
        }

        let b = &self.bounds;
        if !b.is_within_bounds(external_value) {
            return Err(BoundsError::ValueOutsideBounds {
                value: external_value,
                min: b.min,
                max: b.max,
            });
        }

        let internal = match (b.has_lower_bound(), b.has_upper_bound()) {
            (false, false) => external_value,
            (true, false) => ((external_value - b.min + 1.0).powi(2) - 1.0).sqrt(),
            (false, true) => ((b.max - external_value + 1.0).powi(2) - 1.0).sqrt(),
            (true, true) => {
                if b.max == b.min {
                    0.0
                } else {
                    let scaled = 2.0 * (external_value - b.min) / (b.max - b.min) - 1.0;
                    scaled.clamp(-1.0, 1.0).asin()
                }
            }
        };
        Ok(internal)
    }
}
