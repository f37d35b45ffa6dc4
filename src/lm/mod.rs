//! Levenberg-Marquardt algorithm implementation.
//!
//! The solver behind every fit: it minimizes the (weighted) residual of a
//! [`Problem`](crate::problem::Problem) over the internal coordinates of the free
//! parameters, and can be stopped cooperatively from another thread.

pub mod algorithm;
pub mod config;
pub mod convergence;

pub use algorithm::{LevenbergMarquardt, LmResult};
pub use config::LmConfig;
pub use convergence::ConvergenceStatus;
