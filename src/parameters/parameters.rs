//! Parameters collection
//!
//! [`Parameters`] is the merged, globally unique namespace of every peak and background
//! parameter of a composite model. It keeps entries ordered by name so the layout of the
//! solver's internal vector is deterministic, evaluates dependent (expression) parameters in
//! dependency order, and rejects circular links.

use crate::parameters::expression::{EvaluationContext, Expression, ExpressionError};
use crate::parameters::parameter::{Parameter, ParameterError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// Errors raised when (de)serializing a parameter collection
#[derive(Error, Debug)]
pub enum SerializationError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid parameters: {0}")]
    Parameter(#[from] ParameterError),
}

/// A collection of named parameters, similar to lmfit's `Parameters`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Parameters {
    params: BTreeMap<String, Parameter>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter to the collection
    ///
    /// # Arguments
    ///
    /// * `param` - The parameter to add
    ///
    /// # Returns
    ///
    /// `Ok(())`, or `ParameterError::DuplicateParameter` when the name is already taken
    pub fn add(&mut self, param: Parameter) -> Result<(), ParameterError> {
        if self.params.contains_key(param.name()) {
            return Err(ParameterError::DuplicateParameter {
                name: param.name().to_string(),
            });
        }
        self.params.insert(param.name().to_string(), param);
        Ok(())
    }

    pub fn add_param(&mut self, name: &str, value: f64) -> Result<(), ParameterError> {
        self.add(Parameter::new(name, value))
    }

    pub fn add_param_with_bounds(
        &mut self,
        name: &str,
        value: f64,
        min: f64,
        max: f64,
    ) -> Result<(), ParameterError> {
        self.add(Parameter::with_bounds(name, value, min, max)?)
    }

    /// Add a dependent parameter and evaluate it immediately
    ///
    /// # Examples
    ///
    /// ```
    /// use xpsfit_rs::parameters::Parameters;
    ///
    /// let mut params = Parameters::new();
    /// params.add_param("d1_soc", 5.8).unwrap();
    /// params.add_param("d2_soc_ratio", 1.0).unwrap();
    /// params.add_param_with_expr("d2_soc", 0.0, "d1_soc * d2_soc_ratio").unwrap();
    /// assert_eq!(params.value("d2_soc").unwrap(), 5.8);
    /// ```
    pub fn add_param_with_expr(
        &mut self,
        name: &str,
        value: f64,
        expr: &str,
    ) -> Result<(), ParameterError> {
        self.add(Parameter::new(name, value))?;
        if let Err(err) = self.set_expr(name, expr) {
            self.params.remove(name);
            return Err(err);
        }
        Ok(())
    }

    /// Install an expression on an existing parameter
    ///
    /// The expression must parse, reference only known parameters, and must not create a
    /// dependency cycle. On any failure the parameter is left exactly as it was.
    pub fn set_expr(&mut self, name: &str, expr: &str) -> Result<(), ParameterError> {
        let parsed = Expression::parse(expr).map_err(|e| ParameterError::ExpressionEvaluation {
            name: name.to_string(),
            message: e.to_string(),
        })?;
        for var in parsed.variables() {
            if var == name {
                return Err(ParameterError::CircularDependency {
                    name: name.to_string(),
                });
            }
            if !self.params.contains_key(&var) {
                return Err(ParameterError::ExpressionEvaluation {
                    name: name.to_string(),
                    message: format!("unknown parameter '{}'", var),
                });
            }
        }

        let param = self.get_mut_or_err(name)?;
        let previous = (param.expr().map(str::to_string), param.vary());
        param.set_expr(Some(expr));

        if let Err(err) = self.update_expressions() {
            let param = self.get_mut_or_err(name)?;
            param.set_expr(previous.0.as_deref());
            // vary was only ever true without an expression
            if previous.0.is_none() {
                param.set_vary(previous.1)?;
            }
            return Err(err);
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.params.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Parameter> {
        self.params.get_mut(name)
    }

    fn get_mut_or_err(&mut self, name: &str) -> Result<&mut Parameter, ParameterError> {
        self.params
            .get_mut(name)
            .ok_or_else(|| ParameterError::ParameterNotFound {
                name: name.to_string(),
            })
    }

    /// Current value of a parameter
    pub fn value(&self, name: &str) -> Result<f64, ParameterError> {
        self.params
            .get(name)
            .map(Parameter::value)
            .ok_or_else(|| ParameterError::ParameterNotFound {
                name: name.to_string(),
            })
    }

    /// Set the value of a parameter, clamped into its bounds
    pub fn set_value(&mut self, name: &str, value: f64) -> Result<f64, ParameterError> {
        Ok(self.get_mut_or_err(name)?.set_value_clamped(value))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.params.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Parameter> {
        self.params.remove(name)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.params.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Parameter)> {
        self.params.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut Parameter)> {
        self.params.iter_mut()
    }

    /// Names of the free parameters, in the order of the solver's internal vector
    pub fn varying_names(&self) -> Vec<String> {
        self.params
            .values()
            .filter(|p| p.vary())
            .map(|p| p.name().to_string())
            .collect()
    }

    pub fn varying_count(&self) -> usize {
        self.params.values().filter(|p| p.vary()).count()
    }

    /// Internal (unbounded) coordinates of the free parameters
    pub fn varying_internal_values(&self) -> Result<Vec<f64>, ParameterError> {
        self.params
            .values()
            .filter(|p| p.vary())
            .map(Parameter::to_internal)
            .collect()
    }

    /// Update the free parameters from internal coordinates, then recompute all expressions
    ///
    /// # Arguments
    ///
    /// * `values` - One internal value per free parameter, in [`Self::varying_names`] order
    ///
    /// # Returns
    ///
    /// `Ok(())`, or an error on a length mismatch or a failing expression
    pub fn update_from_internal(&mut self, values: &[f64]) -> Result<(), ParameterError> {
        let expected = self.varying_count();
        if values.len() != expected {
            return Err(ParameterError::InternalLength {
                expected,
                actual: values.len(),
            });
        }

        for (param, &internal) in self.params.values_mut().filter(|p| p.vary()).zip(values) {
            let external = param.from_internal(internal);
            param.set_value_clamped(external);
        }

        self.update_expressions()
    }

    /// Recompute every dependent parameter in dependency order
    ///
    /// Computed values are clamped into the dependent parameter's own bounds.
    pub fn update_expressions(&mut self) -> Result<(), ParameterError> {
        let order = self.expression_order()?;
        for (name, expr) in order {
            let value = expr
                .evaluate(self)
                .map_err(|e| ParameterError::ExpressionEvaluation {
                    name: name.clone(),
                    message: e.to_string(),
                })?;
            self.get_mut_or_err(&name)?.set_value_clamped(value);
        }
        Ok(())
    }

    /// Dependent parameters with their parsed expressions, sorted so that every
    /// expression comes after the expressions it reads from
    fn expression_order(&self) -> Result<Vec<(String, Expression)>, ParameterError> {
        let mut parsed: HashMap<&str, Expression> = HashMap::new();
        for (name, param) in &self.params {
            if let Some(expr) = param.expr() {
                let expr =
                    Expression::parse(expr).map_err(|e| ParameterError::ExpressionEvaluation {
                        name: name.clone(),
                        message: e.to_string(),
                    })?;
                parsed.insert(name.as_str(), expr);
            }
        }

        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit<'a>(
            name: &'a str,
            parsed: &'a HashMap<&'a str, Expression>,
            marks: &mut HashMap<&'a str, Mark>,
            order: &mut Vec<&'a str>,
        ) -> Result<(), ParameterError> {
            match marks.get(name) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => {
                    return Err(ParameterError::CircularDependency {
                        name: name.to_string(),
                    })
                }
                None => {}
            }
            let Some(expr) = parsed.get(name) else {
                return Ok(());
            };
            marks.insert(name, Mark::Visiting);
            for var in expr.variables() {
                if let Some((key, _)) = parsed.get_key_value(var.as_str()) {
                    visit(key, parsed, marks, order)?;
                }
            }
            marks.insert(name, Mark::Done);
            order.push(name);
            Ok(())
        }

        let mut names: Vec<&str> = parsed.keys().copied().collect();
        names.sort_unstable();

        let mut marks = HashMap::new();
        let mut order = Vec::with_capacity(names.len());
        for name in names {
            visit(name, &parsed, &mut marks, &mut order)?;
        }

        Ok(order
            .into_iter()
            .map(|name| (name.to_string(), parsed[name].clone()))
            .collect())
    }

    /// Evaluate an arbitrary expression against the current values
    pub fn eval_expression(&self, expr: &str) -> Result<f64, ParameterError> {
        Expression::parse(expr)
            .and_then(|e| e.evaluate(self))
            .map_err(|e| ParameterError::ExpressionEvaluation {
                name: expr.to_string(),
                message: e.to_string(),
            })
    }

    /// Move every parameter of `other` into this collection
    ///
    /// Fails with `DuplicateParameter` on the first name collision; nothing is merged then.
    pub fn merge(&mut self, other: Parameters) -> Result<(), ParameterError> {
        if let Some(name) = other.params.keys().find(|n| self.params.contains_key(*n)) {
            return Err(ParameterError::DuplicateParameter { name: name.clone() });
        }
        self.params.extend(other.params);
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, SerializationError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load parameters from JSON and re-validate their expressions
    pub fn from_json(json: &str) -> Result<Self, SerializationError> {
        let mut params: Parameters = serde_json::from_str(json)?;
        params.update_expressions()?;
        Ok(params)
    }
}

impl EvaluationContext for Parameters {
    fn get_variable(&self, name: &str) -> Result<f64, ExpressionError> {
        self.params
            .get(name)
            .map(Parameter::value)
            .ok_or_else(|| ExpressionError::UndefinedVariable {
                name: name.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn dublett_pair() -> Parameters {
        let mut params = Parameters::new();
        params.add_param("d1_soc", 5.8).unwrap();
        params.add_param("d1_amplitude", 1000.0).unwrap();
        params.add_param_with_bounds("d2_soc_ratio", 1.0, 0.0, f64::INFINITY).unwrap();
        params.add_param("d2_amp_ratio", 0.5).unwrap();
        params.add_param("d2_soc", 0.0).unwrap();
        params.add_param("d2_amplitude", 0.0).unwrap();
        params
    }

    #[test]
    fn test_add_and_duplicates() {
        let mut params = Parameters::new();
        params.add_param("g1_center", 284.6).unwrap();
        assert!(matches!(
            params.add_param("g1_center", 1.0),
            Err(ParameterError::DuplicateParameter { .. })
        ));
        assert_eq!(params.len(), 1);
        assert_eq!(params.value("g1_center").unwrap(), 284.6);
        assert!(params.value("g1_sigma").is_err());
    }

    #[test]
    fn test_varying_order_is_sorted() {
        let mut params = Parameters::new();
        params.add_param("z", 1.0).unwrap();
        params.add_param("a", 2.0).unwrap();
        params.add_param("m", 3.0).unwrap();
        params.get_mut("m").unwrap().set_vary(false).unwrap();

        assert_eq!(params.varying_names(), vec!["a", "z"]);
    }

    #[test]
    fn test_set_expr_links_values() {
        let mut params = dublett_pair();
        params.set_expr("d2_soc", "d1_soc * d2_soc_ratio").unwrap();
        params.set_expr("d2_amplitude", "d1_amplitude * d2_amp_ratio").unwrap();

        assert!(!params.get("d2_soc").unwrap().vary());
        assert_relative_eq!(params.value("d2_soc").unwrap(), 5.8);
        assert_relative_eq!(params.value("d2_amplitude").unwrap(), 500.0);

        params.set_value("d1_soc", 6.0).unwrap();
        params.update_expressions().unwrap();
        assert_relative_eq!(params.value("d2_soc").unwrap(), 6.0);
    }

    #[test]
    fn test_set_expr_rejects_bad_links() {
        let mut params = dublett_pair();
        assert!(matches!(
            params.set_expr("d2_soc", "d2_soc * 2"),
            Err(ParameterError::CircularDependency { .. })
        ));
        assert!(params.set_expr("d2_soc", "d9_soc * 2").is_err());

        params.set_expr("d2_soc", "d1_soc * d2_soc_ratio").unwrap();
        let err = params.set_expr("d1_soc", "d2_soc + 1").unwrap_err();
        assert!(matches!(err, ParameterError::CircularDependency { .. }));
        // the failed link is rolled back
        assert!(params.get("d1_soc").unwrap().expr().is_none());
        assert!(params.get("d1_soc").unwrap().vary());
    }

    #[test]
    fn test_chained_expressions_evaluate_in_order() {
        let mut params = Parameters::new();
        params.add_param("a_center", 100.0).unwrap();
        params.add_param("c_center", 0.0).unwrap();
        params.add_param("b_center", 0.0).unwrap();
        // c depends on b which depends on a; alphabetical order would be wrong
        params.set_expr("b_center", "a_center + 1").unwrap();
        params.set_expr("c_center", "b_center + 1").unwrap();
        params.set_value("a_center", 200.0).unwrap();
        params.update_expressions().unwrap();
        assert_relative_eq!(params.value("c_center").unwrap(), 202.0);
    }

    #[test]
    fn test_update_from_internal() {
        let mut params = dublett_pair();
        params.set_expr("d2_soc", "d1_soc * d2_soc_ratio").unwrap();
        params.set_expr("d2_amplitude", "d1_amplitude * d2_amp_ratio").unwrap();

        let names = params.varying_names();
        assert_eq!(names, vec!["d1_amplitude", "d1_soc", "d2_amp_ratio", "d2_soc_ratio"]);

        let mut internal = params.varying_internal_values().unwrap();
        internal[1] = 4.0;
        params.update_from_internal(&internal).unwrap();
        assert_relative_eq!(params.value("d1_soc").unwrap(), 4.0);
        assert_relative_eq!(params.value("d2_soc").unwrap(), 4.0, epsilon = 1e-12);

        assert!(matches!(
            params.update_from_internal(&[1.0]),
            Err(ParameterError::InternalLength { .. })
        ));
    }

    #[test]
    fn test_expression_value_is_clamped() {
        let mut params = Parameters::new();
        params.add_param("s1_sigma", -3.0).unwrap();
        params.add_param_with_bounds("s2_sigma", 1.0, 0.0, f64::INFINITY).unwrap();
        params.set_expr("s2_sigma", "s1_sigma * 2").unwrap();
        assert_eq!(params.value("s2_sigma").unwrap(), 0.0);
    }

    #[test]
    fn test_merge() {
        let mut a = Parameters::new();
        a.add_param("g1_center", 1.0).unwrap();
        let mut b = Parameters::new();
        b.add_param("g2_center", 2.0).unwrap();
        a.merge(b).unwrap();
        assert_eq!(a.len(), 2);

        let mut c = Parameters::new();
        c.add_param("g1_center", 3.0).unwrap();
        assert!(a.merge(c).is_err());
        assert_eq!(a.value("g1_center").unwrap(), 1.0);
    }

    #[test]
    fn test_json_round_trip() {
        let mut params = dublett_pair();
        params.set_expr("d2_soc", "d1_soc * d2_soc_ratio").unwrap();
        let json = params.to_json().unwrap();
        let restored = Parameters::from_json(&json).unwrap();
        assert_eq!(restored.len(), params.len());
        assert_eq!(
            restored.get("d2_soc").unwrap().expr(),
            Some("d1_soc * d2_soc_ratio")
        );
        assert_eq!(restored.get("d2_soc_ratio").unwrap().min(), 0.0);
        assert!(restored.get("d2_soc_ratio").unwrap().max().is_infinite());
    }
}
