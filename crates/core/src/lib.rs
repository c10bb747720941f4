//! Mass-Conserving Wind Solver Core Library
//!
//! Computes a divergence-free 3-D wind field over complex terrain from a
//! coarse initial guess, following the diagnostic approach of WindNinja.
//!
//! ## Pipeline
//!
//! - Terrain-following hexahedral mesh over a DEM
//! - Initial field from a domain average, weather stations or surface grids
//! - Stability weighting from insolation, cloud cover and wind speed
//! - Finite-element assembly of the weighted Poisson equation for the
//!   correction potential
//! - Preconditioned conjugate gradient with a MINRES fallback
//! - Reconstruction `U = U0 + R∇phi`
//! - Optional outer loop matching the solved field to station observations

// Core types and utilities
pub mod core_types;
pub mod error;

// Geometry and meteorology
pub mod atmosphere;
pub mod grid;

// Pipeline stages
pub mod init;
pub mod simulation;
pub mod solver;

// Re-export core types
pub use core_types::{LengthUnits, SpeedUnits, Vec3, WeatherStation};
pub use error::{WindError, WindResult};

// Re-export pipeline types
pub use grid::{Mesh, MeshConfig, MeshResolution, Raster, ScalarField, VectorField};
pub use init::{FieldInitializer, InitializationMethod};
pub use simulation::{
    CancellationToken, MetadataLock, ProgressSink, RunReport, SimulationConfig, WindArmy, WindOutput, WindRun,
    WindSimulation,
};
