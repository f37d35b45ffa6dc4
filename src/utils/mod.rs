//! Numerical helpers shared by the solver and the background algorithms.

pub mod finite_difference;
pub mod integrate;

pub use finite_difference::jacobian;
pub use integrate::{cumulative_sum_from_end, trapezoid};
