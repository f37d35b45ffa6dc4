//! Sum of prefixed components sharing one parameter set.
//!
//! Every peak and active background contributes a [`Component`] whose parameter names
//! carry a unique prefix. The [`CompositeModel`] owns the union of those parameters,
//! so expressions may reference parameters of any component, and evaluates to the sum
//! of the component curves.

use log::debug;
use ndarray::Array1;
use std::fmt::Debug;

use crate::error::{Result, XpsFitError};
use crate::model::Model;
use crate::parameters::{ParameterError, Parameters};

/// A prefixed building block of a [`CompositeModel`].
pub trait Component: Debug + Send + Sync {
    /// Parameter prefix, e.g. `gdd1_` or `bg_shirley_`
    fn prefix(&self) -> &str;

    /// Human readable name used for the component decomposition
    fn label(&self) -> String;

    /// The component's own parameters with default values
    fn parameters(&self) -> &Parameters;

    /// Evaluate the component, reading its values from `params`.
    ///
    /// `params` is usually the composite's full parameter set; only the names under
    /// [`Component::prefix`] are read.
    fn eval_with(&self, params: &Parameters, x: &Array1<f64>) -> Result<Array1<f64>>;
}

/// Sum of components over a shared parameter set.
#[derive(Debug, Default)]
pub struct CompositeModel {
    components: Vec<Box<dyn Component>>,
    params: Parameters,
}

impl CompositeModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a component and merge its parameters.
    ///
    /// # Errors
    ///
    /// * [`XpsFitError::Configuration`] if the prefix or any parameter name is already
    ///   in use; the model is left unchanged.
    pub fn add_component(&mut self, component: Box<dyn Component>) -> Result<()> {
        if self.components.iter().any(|c| c.prefix() == component.prefix()) {
            return Err(XpsFitError::Configuration(format!(
                "duplicate component prefix '{}'",
                component.prefix()
            )));
        }
        self.params
            .merge(component.parameters().clone())
            .map_err(|err| match err {
                ParameterError::DuplicateParameter { name } => XpsFitError::Configuration(
                    format!("parameter '{}' is defined by two components", name),
                ),
                other => XpsFitError::from(other),
            })?;
        debug!(
            "Added component '{}' with {} parameters",
            component.label(),
            component.parameters().len()
        );
        self.components.push(component);
        Ok(())
    }

    pub fn components(&self) -> &[Box<dyn Component>] {
        &self.components
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Individual component curves at the given parameter values, in insertion order
    pub fn eval_components(
        &self,
        params: &Parameters,
        x: &Array1<f64>,
    ) -> Result<Vec<(String, Array1<f64>)>> {
        self.components
            .iter()
            .map(|c| Ok((c.prefix().to_string(), c.eval_with(params, x)?)))
            .collect()
    }
}

impl Model for CompositeModel {
    fn parameters(&self) -> &Parameters {
        &self.params
    }

    fn parameters_mut(&mut self) -> &mut Parameters {
        &mut self.params
    }

    fn eval_with(&self, params: &Parameters, x: &Array1<f64>) -> Result<Array1<f64>> {
        let mut total = Array1::zeros(x.len());
        for component in &self.components {
            let y = component.eval_with(params, x)?;
            if y.len() != x.len() {
                return Err(XpsFitError::DimensionMismatch(format!(
                    "component '{}' returned {} values for {} samples",
                    component.prefix(),
                    y.len(),
                    x.len()
                )));
            }
            total += &y;
        }
        Ok(total)
    }
}

/// Composite of two components.
///
/// # Examples
///
/// ```
/// use ndarray::Array1;
/// use xpsfit_rs::composite::add;
/// use xpsfit_rs::model::Model;
/// use xpsfit_rs::peaks::{PeakComponent, PeakShape};
///
/// let a = PeakComponent::new(PeakShape::Gaussian, 1).unwrap();
/// let b = PeakComponent::new(PeakShape::Lorentzian, 2).unwrap();
/// let model = add(Box::new(a), Box::new(b)).unwrap();
/// assert_eq!(model.parameters().len(), 6);
/// let y = model.eval(&Array1::linspace(-2.0, 2.0, 5)).unwrap();
/// assert_eq!(y.len(), 5);
/// ```
pub fn add(a: Box<dyn Component>, b: Box<dyn Component>) -> Result<CompositeModel> {
    let mut model = CompositeModel::new();
    model.add_component(a)?;
    model.add_component(b)?;
    Ok(model)
}
