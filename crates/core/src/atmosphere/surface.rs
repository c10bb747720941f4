//! Surface properties by vegetation type

use serde::{Deserialize, Serialize};

/// Uniform vegetation cover of the domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Vegetation {
    #[default]
    Grass,
    Brush,
    Trees,
}

/// Aerodynamic and energy-balance properties of the ground cover
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurfaceProperties {
    /// Roughness length z0 (m)
    pub roughness_length: f64,
    /// Height of the roughness elements (m)
    pub roughness_height: f64,
    /// Zero-plane displacement height (m)
    pub displacement_height: f64,
    /// Shortwave albedo
    pub albedo: f64,
    /// Bowen ratio (sensible over latent heat flux)
    pub bowen: f64,
    /// Fraction of net radiation going into the ground
    pub cg: f64,
    /// Anthropogenic heat flux (W/m²)
    pub anthropogenic: f64,
}

impl Vegetation {
    pub const fn surface(self) -> SurfaceProperties {
        match self {
            Vegetation::Grass => SurfaceProperties {
                roughness_length: 0.01,
                roughness_height: 0.0,
                displacement_height: 0.0,
                albedo: 0.25,
                bowen: 1.0,
                cg: 0.15,
                anthropogenic: 0.0,
            },
            Vegetation::Brush => SurfaceProperties {
                roughness_length: 0.43,
                roughness_height: 2.3,
                displacement_height: 1.8,
                albedo: 0.25,
                bowen: 1.0,
                cg: 0.15,
                anthropogenic: 0.0,
            },
            Vegetation::Trees => SurfaceProperties {
                roughness_length: 1.0,
                roughness_height: 15.4,
                displacement_height: 12.0,
                albedo: 0.1,
                bowen: 1.0,
                cg: 0.15,
                anthropogenic: 0.0,
            },
        }
    }
}

impl Default for SurfaceProperties {
    fn default() -> Self {
        Vegetation::Grass.surface()
    }
}
