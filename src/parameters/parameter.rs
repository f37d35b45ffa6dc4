//! A single named fit parameter
//!
//! A parameter carries a value, a `vary` flag, bounds and an optional expression.
//! Setting an expression makes the parameter dependent: it is removed from the set of
//! free variables and recomputed from the other parameters on every evaluation.

use crate::parameters::bounds::{Bounds, BoundsError, BoundsTransform};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when working with parameters
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParameterError {
    #[error("Parameter '{name}' cannot have both an expression and be varied")]
    ExpressionAndVary { name: String },

    #[error("Bounds error: {0}")]
    BoundsError(#[from] BoundsError),

    #[error("Cannot evaluate expression for parameter '{name}': {message}")]
    ExpressionEvaluation { name: String, message: String },

    #[error("Parameter '{name}' not found")]
    ParameterNotFound { name: String },

    #[error("Parameter '{name}' already exists")]
    DuplicateParameter { name: String },

    #[error("Circular dependency in expression for parameter '{name}'")]
    CircularDependency { name: String },

    #[error("Expected {expected} internal values, got {actual}")]
    InternalLength { expected: usize, actual: usize },
}

/// A parameter for the least-squares solver, similar to lmfit's `Parameter`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,

    value: f64,

    /// Value at creation time
    init_value: f64,

    vary: bool,

    bounds: Bounds,

    expr: Option<String>,

    /// Standard error of the parameter (set after fitting)
    pub stderr: Option<f64>,
}

impl Parameter {
    /// Create a free, unbounded parameter
    ///
    /// # Examples
    ///
    /// ```
    /// use xpsfit_rs::parameters::Parameter;
    ///
    /// let param = Parameter::new("g1_center", 284.6);
    /// assert_eq!(param.value(), 284.6);
    /// assert!(param.vary());
    /// ```
    pub fn new(name: &str, value: f64) -> Self {
        Self {
            name: name.to_string(),
            value,
            init_value: value,
            vary: true,
            bounds: Bounds::default(),
            expr: None,
            stderr: None,
        }
    }

    /// Create a free parameter with bounds. The value is clamped into `[min, max]`.
    ///
    /// # Arguments
    ///
    /// * `name` - Name of the parameter
    /// * `value` - Initial value
    /// * `min` - Lower bound (`-inf` for none)
    /// * `max` - Upper bound (`inf` for none)
    ///
    /// # Returns
    ///
    /// The parameter, or an error if `min > max`
    pub fn with_bounds(name: &str, value: f64, min: f64, max: f64) -> Result<Self, ParameterError> {
        let bounds = Bounds::new(min, max)?;
        let value = bounds.clamp(value);
        Ok(Self {
            bounds,
            ..Self::new(name, value)
        })
    }

    /// Create a dependent parameter computed from `expr`
    pub fn with_expr(name: &str, value: f64, expr: &str) -> Self {
        Self {
            vary: false,
            expr: Some(expr.to_string()),
            ..Self::new(name, value)
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    /// Set the value of the parameter
    ///
    /// # Returns
    ///
    /// `Ok(())`, or `BoundsError::ValueOutsideBounds` when the value is outside the bounds
    /// (the stored value is left untouched in that case)
    pub fn set_value(&mut self, value: f64) -> Result<(), ParameterError> {
        if !self.bounds.is_within_bounds(value) {
            return Err(ParameterError::BoundsError(BoundsError::ValueOutsideBounds {
                value,
                min: self.bounds.min,
                max: self.bounds.max,
            }));
        }
        self.value = value;
        Ok(())
    }

    /// Set the value, clamping it into the bounds. Returns the stored value.
    pub fn set_value_clamped(&mut self, value: f64) -> f64 {
        self.value = self.bounds.clamp(value);
        self.value
    }

    pub fn init_value(&self) -> f64 {
        self.init_value
    }

    pub fn vary(&self) -> bool {
        self.vary
    }

    /// Set whether the solver may vary this parameter
    ///
    /// Dependent parameters can't be varied; clear the expression first.
    pub fn set_vary(&mut self, vary: bool) -> Result<(), ParameterError> {
        if vary && self.expr.is_some() {
            return Err(ParameterError::ExpressionAndVary {
                name: self.name.clone(),
            });
        }
        self.vary = vary;
        Ok(())
    }

    pub fn min(&self) -> f64 {
        self.bounds.min
    }

    pub fn max(&self) -> f64 {
        self.bounds.max
    }

    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    /// Replace the bounds and clamp the current value into them
    pub fn set_bounds(&mut self, min: f64, max: f64) -> Result<(), ParameterError> {
        let bounds = Bounds::new(min, max)?;
        self.bounds = bounds;
        self.value = bounds.clamp(self.value);
        Ok(())
    }

    pub fn set_min(&mut self, min: f64) -> Result<(), ParameterError> {
        self.set_bounds(min, self.bounds.max)
    }

    pub fn set_max(&mut self, max: f64) -> Result<(), ParameterError> {
        self.set_bounds(self.bounds.min, max)
    }

    pub fn expr(&self) -> Option<&str> {
        self.expr.as_deref()
    }

    /// Install or clear the expression
    ///
    /// Installing an expression sets `vary = false`. Clearing it leaves `vary` as is.
    pub fn set_expr(&mut self, expr: Option<&str>) {
        match expr {
            Some(e) => {
                self.expr = Some(e.to_string());
                self.vary = false;
            }
            None => self.expr = None,
        }
    }

    pub fn to_internal(&self) -> Result<f64, ParameterError> {
        BoundsTransform::new(self.bounds)
            .to_internal(self.value)
            .map_err(ParameterError::from)
    }

    pub fn from_internal(&self, internal_value: f64) -> f64 {
        BoundsTransform::new(self.bounds).to_external(internal_value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::INFINITY;

    #[test]
    fn test_parameter_creation() {
        let param = Parameter::new("g1_center", 284.6);
        assert_eq!(param.name(), "g1_center");
        assert_eq!(param.init_value(), 284.6);
        assert!(param.vary());
        assert!(param.expr().is_none());

        let param = Parameter::with_bounds("g1_sigma", -1.0, 0.0, INFINITY).unwrap();
        assert_eq!(param.value(), 0.0);
        assert_eq!(param.min(), 0.0);

        let param = Parameter::with_expr("d2_soc", 5.0, "d1_soc * d2_soc_ratio");
        assert!(!param.vary());
        assert_eq!(param.expr(), Some("d1_soc * d2_soc_ratio"));
    }

    #[test]
    fn test_set_value_respects_bounds() {
        let mut param = Parameter::with_bounds("d1_gamma", 0.1, 0.0, 1.0).unwrap();
        param.set_value(0.3).unwrap();
        assert_eq!(param.value(), 0.3);

        assert!(param.set_value(1.5).is_err());
        assert_eq!(param.value(), 0.3);

        assert_eq!(param.set_value_clamped(1.5), 1.0);
    }

    #[test]
    fn test_vary_and_expr() {
        let mut param = Parameter::new("g2_amplitude", 10.0);
        param.set_expr(Some("g1_amplitude * g2_amp_ratio"));
        assert!(!param.vary());
        assert!(matches!(
            param.set_vary(true),
            Err(ParameterError::ExpressionAndVary { .. })
        ));

        param.set_expr(None);
        assert!(!param.vary());
        param.set_vary(true).unwrap();
        assert!(param.vary());
    }

    #[test]
    fn test_set_bounds_clamps() {
        let mut param = Parameter::new("g1_center", 290.0);
        param.set_bounds(280.0, 288.0).unwrap();
        assert_eq!(param.value(), 288.0);

        param.set_min(289.0).unwrap_err();
        param.set_max(300.0).unwrap();
        assert_eq!(param.max(), 300.0);
    }

    #[test]
    fn test_internal_round_trip() {
        let param = Parameter::with_bounds("pv1_fraction", 0.25, 0.0, 1.0).unwrap();
        let internal = param.to_internal().unwrap();
        assert!((param.from_internal(internal) - 0.25).abs() < 1e-12);
    }
}
