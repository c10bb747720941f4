//! Terrain elevation and topography derivatives
//!
//! Digital Elevation Model (DEM) helpers: synthetic DEM generators, Horn
//! slope/aspect per cell and ray-marched terrain shading for a given sun
//! position. All DEMs are [`Raster`]s in meters.

use super::raster::{Raster, RasterHeader};
use crate::core_types::wind::north_to_math_angle;
use crate::error::WindResult;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Precomputed slope and aspect per DEM cell
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerrainAnalysis {
    /// Slope at each cell (degrees, 0 = flat)
    pub slope: Vec<f64>,
    /// Aspect at each cell (degrees, 0 = north-facing, clockwise)
    pub aspect: Vec<f64>,
    /// Cells west to east
    pub ncols: usize,
    /// Cells south to north
    pub nrows: usize,
}

impl TerrainAnalysis {
    /// Horn slope and aspect for every cell of `dem`
    ///
    /// Edge cells reuse the nearest interior neighbour (clamped 3x3 window).
    ///
    /// # Scientific Reference
    /// Horn, B.K.P. (1981). "Hill Shading and the Reflectance Map."
    /// Proceedings of the IEEE, 69(1), 14-47.
    pub fn from_dem(dem: &Raster) -> Self {
        let ncols = dem.ncols();
        let nrows = dem.nrows();
        let d = dem.cell_size();

        let cells: Vec<(f64, f64)> = (0..nrows * ncols)
            .into_par_iter()
            .map(|idx| {
                let (i, j) = (idx / ncols, idx % ncols);
                let z = |di: isize, dj: isize| {
                    let ii = (i as isize + di).clamp(0, nrows as isize - 1) as usize;
                    let jj = (j as isize + dj).clamp(0, ncols as isize - 1) as usize;
                    dem.get(ii, jj)
                };
                // z[0] z[1] z[2]   (NW) (N) (NE)
                // z[3] z[4] z[5]   (W)  (C) (E)
                // z[6] z[7] z[8]   (SW) (S) (SE)
                let nw = z(1, -1);
                let n = z(1, 0);
                let ne = z(1, 1);
                let w = z(0, -1);
                let e = z(0, 1);
                let sw = z(-1, -1);
                let s = z(-1, 0);
                let se = z(-1, 1);

                let dz_dx = ((ne + 2.0 * e + se) - (nw + 2.0 * w + sw)) / (8.0 * d);
                let dz_dy = ((nw + 2.0 * n + ne) - (sw + 2.0 * s + se)) / (8.0 * d);

                let slope = dz_dx.hypot(dz_dy).atan().to_degrees();
                // Direction of steepest descent, 0 = north
                let aspect = if dz_dx == 0.0 && dz_dy == 0.0 {
                    0.0
                } else {
                    (-dz_dx).atan2(-dz_dy).to_degrees().rem_euclid(360.0)
                };
                (slope, aspect)
            })
            .collect();

        let (slope, aspect) = cells.into_iter().unzip();
        TerrainAnalysis {
            slope,
            aspect,
            ncols,
            nrows,
        }
    }

    #[inline]
    pub fn slope_at(&self, i: usize, j: usize) -> f64 {
        self.slope[i * self.ncols + j]
    }

    #[inline]
    pub fn aspect_at(&self, i: usize, j: usize) -> f64 {
        self.aspect[i * self.ncols + j]
    }
}

/// Cells in shadow of surrounding terrain for a sun at the given azimuth
/// (degrees clockwise from north) and elevation (degrees above horizon)
///
/// With the sun at or below the horizon every cell is shaded.
pub fn compute_shade(dem: &Raster, sun_azimuth: f64, sun_elevation: f64) -> Vec<bool> {
    let ncols = dem.ncols();
    let nrows = dem.nrows();
    if sun_elevation <= 0.0 {
        return vec![true; ncols * nrows];
    }

    let cs = dem.cell_size();
    let theta = north_to_math_angle(sun_azimuth).to_radians();
    let (step_x, step_y) = (theta.cos() * cs, theta.sin() * cs);
    let rise_per_step = sun_elevation.to_radians().tan() * cs;
    let header = dem.header();
    let max_elev = dem.max_value().unwrap_or(0.0);

    (0..nrows * ncols)
        .into_par_iter()
        .map(|idx| {
            let (i, j) = (idx / ncols, idx % ncols);
            let (mut x, mut y) = header.cell_center(i, j);
            let mut ray_z = dem.get(i, j);
            loop {
                x += step_x;
                y += step_y;
                ray_z += rise_per_step;
                if ray_z > max_elev || !header.contains(x, y) {
                    return false;
                }
                if let Some(ground) = dem.interpolate_bilinear(x, y) {
                    if ground > ray_z {
                        return true;
                    }
                }
            }
        })
        .collect()
}

// ============================================================================
// SYNTHETIC DEMS
// ============================================================================

fn synthetic_header(ncols: usize, nrows: usize, resolution: f64) -> RasterHeader {
    RasterHeader::new(ncols, nrows, 0.0, 0.0, resolution)
}

/// Flat terrain at a constant elevation
///
/// # Errors
/// Returns [`crate::WindError::InvalidInput`] for an empty grid.
pub fn flat(ncols: usize, nrows: usize, resolution: f64, elevation: f64) -> WindResult<Raster> {
    Raster::filled(synthetic_header(ncols, nrows, resolution), elevation)
}

/// Terrain with a single Gaussian hill centred in the domain
///
/// # Errors
/// Returns [`crate::WindError::InvalidInput`] for an empty grid.
pub fn single_hill(
    ncols: usize,
    nrows: usize,
    resolution: f64,
    base_elevation: f64,
    hill_height: f64,
    hill_radius: f64,
) -> WindResult<Raster> {
    let header = synthetic_header(ncols, nrows, resolution);
    let center_x = header.x_length() / 2.0;
    let center_y = header.y_length() / 2.0;
    let h = header.clone();
    Raster::from_fn(header, move |i, j| {
        let (x, y) = h.cell_center(i, j);
        let dist_sq = (x - center_x).powi(2) + (y - center_y).powi(2);
        base_elevation + hill_height * (-dist_sq / (hill_radius * hill_radius)).exp()
    })
}

/// Two Gaussian hills east and west of a shallow north-south valley
///
/// # Errors
/// Returns [`crate::WindError::InvalidInput`] for an empty grid.
pub fn valley_between_hills(
    ncols: usize,
    nrows: usize,
    resolution: f64,
    base_elevation: f64,
    hill_height: f64,
) -> WindResult<Raster> {
    let header = synthetic_header(ncols, nrows, resolution);
    let width = header.x_length();
    let center_y = header.y_length() / 2.0;
    let hill_radius = width * 0.2;
    let h = header.clone();
    Raster::from_fn(header, move |i, j| {
        let (x, y) = h.cell_center(i, j);
        let hill = |hx: f64| {
            let dist_sq = (x - hx).powi(2) + (y - center_y).powi(2);
            hill_height * (-dist_sq / (hill_radius * hill_radius)).exp()
        };
        let valley_x = (x - width / 2.0) / (width * 0.25);
        let valley_depth = -10.0 * (-(valley_x * valley_x)).exp();
        base_elevation + hill(width * 0.25) + hill(width * 0.75) + valley_depth
    })
}

/// Planar slope rising toward the given compass bearing
///
/// # Errors
/// Returns [`crate::WindError::InvalidInput`] for an empty grid.
pub fn inclined_plane(
    ncols: usize,
    nrows: usize,
    resolution: f64,
    base_elevation: f64,
    slope_deg: f64,
    uphill_bearing: f64,
) -> WindResult<Raster> {
    let header = synthetic_header(ncols, nrows, resolution);
    let theta = north_to_math_angle(uphill_bearing).to_radians();
    let grade = slope_deg.to_radians().tan();
    let h = header.clone();
    Raster::from_fn(header, move |i, j| {
        let (x, y) = h.cell_center(i, j);
        base_elevation + grade * (x * theta.cos() + y * theta.sin())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_flat_terrain() {
        let dem = flat(10, 10, 5.0, 50.0).unwrap();
        let analysis = TerrainAnalysis::from_dem(&dem);
        assert_eq!(dem.get(5, 5), 50.0);
        assert_relative_eq!(analysis.slope_at(5, 5), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_single_hill() {
        let dem = single_hill(41, 41, 5.0, 50.0, 100.0, 50.0).unwrap();

        // Peak should be at center
        let peak = dem.get(20, 20);
        assert!(peak > 140.0 && peak <= 150.0, "peak {peak}");

        // Corners should be close to base
        assert!(dem.get(0, 0) < 60.0);

        let analysis = TerrainAnalysis::from_dem(&dem);
        assert!(analysis.slope_at(20, 20) < 1.0, "peak should be flat");
        // Northern flank of the hill faces north
        let aspect = analysis.aspect_at(26, 20);
        assert!(analysis.slope_at(26, 20) > 5.0);
        assert!(!(5.0..=355.0).contains(&aspect), "aspect {aspect}");
        // Eastern flank faces east
        assert_relative_eq!(analysis.aspect_at(20, 26), 90.0, epsilon = 1e-6);
    }

    #[test]
    fn test_valley() {
        let dem = valley_between_hills(80, 40, 5.0, 50.0, 80.0).unwrap();
        let hill1 = dem.get(20, 20);
        let hill2 = dem.get(20, 60);
        let valley = dem.get(20, 40);
        assert!(hill1 > 80.0 && hill2 > 80.0);
        assert!(valley < hill1 && valley < hill2);
    }

    #[test]
    fn test_inclined_plane_slope_and_aspect() {
        // Rises toward the east: faces west
        let dem = inclined_plane(20, 20, 10.0, 0.0, 20.0, 90.0).unwrap();
        let analysis = TerrainAnalysis::from_dem(&dem);
        assert_relative_eq!(analysis.slope_at(10, 10), 20.0, epsilon = 1e-9);
        assert_relative_eq!(analysis.aspect_at(10, 10), 270.0, epsilon = 1e-9);
    }

    #[test]
    fn test_shade_behind_ridge() {
        // Plane rising to the east, sun in the west
        let dem = inclined_plane(20, 20, 10.0, 0.0, 20.0, 90.0).unwrap();
        let lit = compute_shade(&dem, 270.0, 30.0);
        assert!(lit.iter().all(|s| !s));

        // Sun in the east, lower than the 20 degree slope
        let shaded = compute_shade(&dem, 90.0, 10.0);
        assert!(shaded[10 * 20 + 5], "slope steeper than the sun should self-shade");

        let night = compute_shade(&dem, 90.0, -5.0);
        assert!(night.iter().all(|s| *s));
    }
}
