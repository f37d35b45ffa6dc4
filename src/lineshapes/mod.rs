//! # Lineshapes
//!
//! Pure functions mapping an energy grid and physical parameters onto intensities.
//!
//! - [`builtin`]: the standard lmfit peak functions (Gaussian, Lorentzian, Voigt family,
//!   exponential/skewed Gaussian, Breit-Wigner, log-normal, Doniach-Sunjic)
//! - [`convolved`]: Gaussian-broadened Doniach singlett/dublett and Fermi edge
//! - [`faddeeva`]: the complex error function behind the Voigt profile

pub mod builtin;
pub mod convolved;
pub mod faddeeva;

pub use builtin::{
    breit_wigner, doniach, exp_gaussian, fermi_step, gaussian, lognormal, lorentzian, pvoigt,
    skewed_gaussian, skewed_voigt, voigt,
};
pub use convolved::{dublett, fermi_edge, singlett};
pub use faddeeva::faddeeva;
