//! Surface-layer meteorology for the wind solver.
//!
//! This module supplies everything the initializers and the stability
//! weighting need from the atmosphere:
//! - Vertical wind profiles (uniform, log, power law, Monin-Obukhov)
//! - Solar position and slope irradiance with terrain shading
//! - Surface properties by vegetation
//! - Diurnal slope flow and the surface energy balance
//! - Pasquill stability classes and the anisotropic weighting field
//!
//! # References
//!
//! - Holtslag, A.A.M., van Ulden, A.P. (1983). "A simple scheme for daytime estimates of the surface fluxes."
//! - van Ulden, A.P., Holtslag, A.A.M. (1985). "Estimation of atmospheric boundary layer parameters for diffusion applications."
//! - Pasquill, F. (1961). "The estimation of the dispersion of windborne material."
//! - Spencer, J.W. (1971). "Fourier series representation of the position of the sun."

pub mod diurnal;
pub mod profile;
pub mod solar;
pub mod stability;
pub mod surface;

pub use diurnal::{compute_diurnal, coriolis_parameter, DiurnalInputs, DiurnalSolution, SlopeFlowCoefficients};
pub use profile::{ProfileKind, WindProfile};
pub use solar::{SolarPosition, SurfaceExposure};
pub use stability::{BoundaryLayer, StabilityClass, StabilityEstimator, StabilityField};
pub use surface::{SurfaceProperties, Vegetation};
