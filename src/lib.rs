//! # xpsfit-rs
//!
//! `xpsfit-rs` fits photoelectron (XPS) and absorption (XAS) spectra with sums of
//! peak lineshapes and backgrounds by nonlinear least squares.
//!
//! The library provides:
//! - Peak lineshapes, including Gaussian-broadened Doniach-Sunjic singletts and
//!   spin-orbit dubletts and a broadened Fermi edge
//! - Shirley and Tougaard backgrounds with their self-consistency loops, plus
//!   polynomial, step, slope and VBM/cutoff terms
//! - Model assembly from peak and background tables, cross-peak ratio links and
//!   user limits
//! - A Levenberg-Marquardt solver with bounded parameters, algebraic constraints,
//!   standard errors and lmfit-style goodness-of-fit statistics
//! - Threaded execution with cooperative cancellation
//!
//! ## Basic Usage
//!
//! ```
//! use std::sync::Arc;
//! use ndarray::Array1;
//! use xpsfit_rs::background::{BackgroundKind, BackgroundSpec, TougaardCache};
//! use xpsfit_rs::lineshapes::gaussian;
//! use xpsfit_rs::peaks::{PeakShape, PeakSpec};
//! use xpsfit_rs::session::{run, FitConfig, FitRequest};
//!
//! let x = Array1::linspace(295.0, 275.0, 201);
//! let y = gaussian(&x, 800.0, 285.0, 0.9) + 200.0;
//!
//! let request = FitRequest::new(x, y)
//!     .with_background(BackgroundSpec::new(BackgroundKind::Polynomial { degree: 0 }))
//!     .with_peak(PeakSpec::new(PeakShape::Gaussian, 1).with_value("sigma", 1.0));
//!
//! let outcome = run(&request, &FitConfig::default(), &Arc::new(TougaardCache::new()), None).unwrap();
//! let center = outcome.peaks[0].value("center").unwrap();
//! assert!((center - 285.0).abs() < 1e-3);
//! ```

// Solver
pub mod error;
pub mod lm;
pub mod model;
pub mod parameters;
pub mod problem;
pub mod statistics;
pub mod utils;

// Spectral building blocks
pub mod background;
pub mod convolution;
pub mod lineshapes;
pub mod range;

// Model assembly and orchestration
pub mod assembler;
pub mod composite;
pub mod limits;
pub mod linker;
pub mod peaks;
pub mod session;
pub mod worker;

// Re-exports for convenience
pub use error::{Result, XpsFitError};
pub use lm::LevenbergMarquardt;
pub use model::{FitResult, Model};
pub use parameters::{Parameter, Parameters};
pub use peaks::{ParamKind, PeakShape, PeakSpec, ReferenceLink};
pub use problem::Problem;
pub use session::{run, FitConfig, FitOutcome, FitRequest, Mode};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
