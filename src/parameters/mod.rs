//! # Parameter System
//!
//! Named solver parameters with bounds and expressions, in the spirit of lmfit.
//!
//! - [`Parameter`]: value, `vary` flag, bounds and optional expression
//! - [`Parameters`]: the merged namespace of a composite model, with dependency-ordered
//!   expression evaluation
//! - [`Bounds`] and [`BoundsTransform`]: bounds and the Minuit internal/external mapping
//! - [`Expression`]: parser/evaluator for link expressions such as `d1_soc * d2_soc_ratio`
//!
//! ```rust
//! use xpsfit_rs::parameters::Parameters;
//!
//! let mut params = Parameters::new();
//! params.add_param_with_bounds("d1_amplitude", 1200.0, 0.0, f64::INFINITY).unwrap();
//! params.add_param("d2_amp_ratio", 0.5).unwrap();
//! params.add_param_with_expr("d2_amplitude", 0.0, "d1_amplitude * d2_amp_ratio").unwrap();
//!
//! assert_eq!(params.value("d2_amplitude").unwrap(), 600.0);
//! assert_eq!(params.varying_names(), vec!["d1_amplitude", "d2_amp_ratio"]);
//! ```

pub mod bounds;
pub mod expression;
pub mod parameter;
pub mod parameters;

pub use bounds::{Bounds, BoundsError, BoundsTransform};
pub use expression::{EvaluationContext, Expression, ExpressionError};
pub use parameter::{Parameter, ParameterError};
pub use parameters::{Parameters, SerializationError};
