//! Atmospheric stability weighting
//!
//! The mass-conservation functional weights horizontal and vertical
//! adjustments separately. Under unstable (daytime, convective) air the
//! solver is free to push flow over terrain; under stable air it must
//! route flow around it. The weights come from a Pasquill class chosen from
//! the surface shortwave balance, wind speed and cloud cover.

use super::diurnal::{coriolis_parameter, surface_shortwave, DiurnalSolution, VON_KARMAN};
use super::solar::SurfaceExposure;
use super::surface::SurfaceProperties;
use crate::error::{WindError, WindResult};
use crate::grid::{FieldDims, Mesh, Raster, ScalarField};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Boundary-layer depth used when the surface wind is calm (m)
pub const CALM_ABL_HEIGHT: f64 = 1000.0;

/// Pasquill-Gifford stability class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StabilityClass {
    A,
    AB,
    B,
    BC,
    C,
    CD,
    D,
    E,
    F,
}

impl StabilityClass {
    /// Ratio of horizontal to vertical weighting
    pub const fn alpha(self) -> f64 {
        match self {
            StabilityClass::A => 5.0,
            StabilityClass::AB => 4.25,
            StabilityClass::B => 3.5,
            StabilityClass::BC => 2.75,
            StabilityClass::C => 2.0,
            StabilityClass::CD => 1.5,
            StabilityClass::D => 1.0,
            StabilityClass::E => 0.5,
            StabilityClass::F => 0.2,
        }
    }

    /// Class from the shortwave balance (W/m²), surface wind (m/s) and cloud fraction
    pub fn classify(shortwave: f64, wind_speed: f64, cloud_cover: f64) -> Self {
        use StabilityClass::{A, AB, B, BC, C, CD, D, E, F};
        if shortwave > 600.0 {
            match wind_speed {
                s if s < 2.0 => A,
                s if s < 3.0 => AB,
                s if s < 5.0 => B,
                _ => C,
            }
        } else if shortwave > 350.0 {
            match wind_speed {
                s if s < 2.0 => AB,
                s if s < 3.0 => B,
                s if s < 5.0 => BC,
                s if s < 6.0 => CD,
                _ => D,
            }
        } else if shortwave > 0.0 {
            match wind_speed {
                s if s < 2.0 => B,
                s if s < 5.0 => C,
                _ => D,
            }
        } else if cloud_cover > 0.5 {
            if wind_speed < 3.0 {
                E
            } else {
                D
            }
        } else {
            match wind_speed {
                s if s < 3.0 => F,
                s if s < 5.0 => E,
                _ => D,
            }
        }
    }
}

// ============================================================================
// STABILITY FIELD
// ============================================================================

/// Per-node anisotropic weights `(alpha_h, alpha_v)`, both strictly positive
#[derive(Debug, Clone)]
pub struct StabilityField {
    alpha_h: ScalarField,
    alpha_v: ScalarField,
}

impl StabilityField {
    /// Isotropic weighting, `alpha_h = alpha_v = 1`
    pub fn neutral(dims: FieldDims) -> Self {
        StabilityField {
            alpha_h: ScalarField::filled(dims, 1.0),
            alpha_v: ScalarField::filled(dims, 1.0),
        }
    }

    /// `alpha_h = 1`, `alpha_v = 1 / alpha` with one alpha per mesh column
    ///
    /// # Errors
    /// Returns [`WindError::InvalidInput`] if `alpha` does not hold one
    /// positive, finite value per column.
    pub fn from_column_alpha(dims: FieldDims, alpha: &[f64]) -> WindResult<Self> {
        if alpha.len() != dims.layer_len() {
            return Err(WindError::invalid_input(format!(
                "{} alpha values for {} mesh columns",
                alpha.len(),
                dims.layer_len()
            )));
        }
        if let Some(bad) = alpha.iter().find(|a| !a.is_finite() || **a <= 0.0) {
            return Err(WindError::invalid_input(format!(
                "stability alpha must be positive, got {bad}"
            )));
        }
        let mut alpha_v = ScalarField::zeros(dims);
        alpha_v.par_layers_mut().for_each(|layer| {
            for (v, a) in layer.iter_mut().zip(alpha) {
                *v = 1.0 / a;
            }
        });
        Ok(StabilityField {
            alpha_h: ScalarField::filled(dims, 1.0),
            alpha_v,
        })
    }

    #[inline]
    pub fn dims(&self) -> FieldDims {
        self.alpha_h.dims()
    }

    #[inline]
    pub fn alpha_h(&self) -> &ScalarField {
        &self.alpha_h
    }

    #[inline]
    pub fn alpha_v(&self) -> &ScalarField {
        &self.alpha_v
    }

    /// Weights interpolated inside an element with shape-function values `n`
    #[inline]
    pub fn interpolate(&self, nodes: &[usize; 8], n: &[f64; 8]) -> (f64, f64) {
        let h = self.alpha_h.as_slice();
        let v = self.alpha_v.as_slice();
        let mut out = (0.0, 0.0);
        for a in 0..8 {
            out.0 += n[a] * h[nodes[a]];
            out.1 += n[a] * v[nodes[a]];
        }
        out
    }
}

// ============================================================================
// BOUNDARY LAYER
// ============================================================================

/// Surface-layer similarity parameters per mesh column
#[derive(Debug, Clone)]
pub struct BoundaryLayer {
    /// Obukhov length (m); 0 means neutral
    pub obukhov_length: Raster,
    /// Friction velocity (m/s)
    pub friction_velocity: Raster,
    /// Boundary-layer depth (m)
    pub abl_height: Raster,
}

impl BoundaryLayer {
    /// Neutral layer from the log law and the Rossby-number depth `0.2 u*/f`
    ///
    /// # Errors
    /// Propagates raster construction errors.
    pub fn neutral(
        speed: &Raster,
        surface: &SurfaceProperties,
        input_height: f64,
        latitude: f64,
    ) -> WindResult<Self> {
        let f = coriolis_parameter(latitude);
        let log_ratio = ((input_height + surface.roughness_height - surface.displacement_height)
            / surface.roughness_length)
            .ln();
        let friction_velocity = speed.map(|s| s * VON_KARMAN / log_ratio);
        let abl_height = friction_velocity.map(|u_star| {
            let h = 0.2 * u_star / f;
            if h > 0.0 {
                h
            } else {
                CALM_ABL_HEIGHT
            }
        });
        Ok(BoundaryLayer {
            obukhov_length: Raster::filled(speed.header().clone(), 0.0)?,
            friction_velocity,
            abl_height,
        })
    }

    /// Layer parameters produced by the diurnal surface balance
    pub fn from_diurnal(solution: &DiurnalSolution) -> Self {
        BoundaryLayer {
            obukhov_length: solution.obukhov_length.clone(),
            friction_velocity: solution.friction_velocity.clone(),
            abl_height: solution.abl_height.map(|h| if h > 0.0 { h } else { CALM_ABL_HEIGHT }),
        }
    }
}

// ============================================================================
// ESTIMATOR
// ============================================================================

/// Builds the stability weighting for one run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StabilityEstimator {
    /// Off gives isotropic weights
    pub enabled: bool,
    /// Fixed alpha in place of the class table
    pub user_alpha: Option<f64>,
    pub time: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
}

impl StabilityEstimator {
    /// Shortwave balance of every column
    pub fn column_shortwave(exposure: &SurfaceExposure, cloud: &Raster) -> Vec<f64> {
        let ncols = cloud.ncols();
        (0..cloud.nrows() * ncols)
            .map(|idx| {
                let (i, j) = (idx / ncols, idx % ncols);
                surface_shortwave(exposure.intensity_at(i, j), exposure.is_shaded(i, j), cloud.get(i, j))
            })
            .collect()
    }

    /// Weighting field for `mesh` given the column surface wind and cloud cover
    ///
    /// `exposure` is reused when the caller already computed it for the mesh DEM.
    ///
    /// # Errors
    /// Returns [`WindError::InvalidInput`] when a grid does not match the mesh
    /// footprint or the user alpha is not positive.
    pub fn estimate(
        &self,
        mesh: &Mesh,
        speed: &Raster,
        cloud: &Raster,
        exposure: Option<&SurfaceExposure>,
    ) -> WindResult<StabilityField> {
        let dims = mesh.dims();
        if !self.enabled {
            return Ok(StabilityField::neutral(dims));
        }
        mesh.check_column_raster(speed)?;
        mesh.check_column_raster(cloud)?;

        if let Some(alpha) = self.user_alpha {
            debug!(alpha, "using user stability alpha");
            return StabilityField::from_column_alpha(dims, &vec![alpha; dims.layer_len()]);
        }

        let computed;
        let exposure = match exposure {
            Some(e) => e,
            None => {
                computed = SurfaceExposure::compute(mesh.dem(), self.time, self.latitude, self.longitude);
                &computed
            }
        };
        let shortwave = Self::column_shortwave(exposure, cloud);
        let alpha: Vec<f64> = shortwave
            .iter()
            .zip(speed.data())
            .zip(cloud.data())
            .map(|((q, s), c)| StabilityClass::classify(*q, *s, *c).alpha())
            .collect();
        debug!(
            min_alpha = alpha.iter().copied().fold(f64::INFINITY, f64::min),
            max_alpha = alpha.iter().copied().fold(0.0, f64::max),
            "stability classes assigned"
        );
        StabilityField::from_column_alpha(dims, &alpha)
    }
}
