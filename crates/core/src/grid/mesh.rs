//! Terrain-following structured mesh
//!
//! Node (i, j, 0) sits on the centre of DEM cell (i, j); the column above
//! it is stretched geometrically from the ground to a flat domain top.
//! Horizontal coordinates are local to the DEM's lower-left corner, so
//! `x = (j + 0.5) * resolution` and `y = (i + 0.5) * resolution`.

use super::element::{shape_functions, HexElement, NODE_OFFSETS};
use super::field::{FieldDims, ScalarField, VectorField};
use super::raster::{Interpolation, Raster, RasterHeader};
use crate::core_types::vec3::Vec3;
use crate::error::{WindError, WindResult};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Horizontal resolution choice
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MeshResolution {
    /// About 4000 horizontal cells
    Coarse,
    /// About 10000 horizontal cells
    Medium,
    /// About 20000 horizontal cells
    Fine,
    /// Explicit cell size in meters
    Custom(f64),
}

impl MeshResolution {
    /// Target number of horizontal cells for the named choices
    pub const fn target_cells(self) -> Option<usize> {
        match self {
            MeshResolution::Coarse => Some(4000),
            MeshResolution::Medium => Some(10000),
            MeshResolution::Fine => Some(20000),
            MeshResolution::Custom(_) => None,
        }
    }

    /// Cell size in meters for a DEM
    pub fn cell_size_for(self, dem: &RasterHeader) -> f64 {
        match self {
            MeshResolution::Custom(res) => res,
            named => {
                let target = named.target_cells().unwrap_or(4000) as f64;
                let x_len = (dem.ncols + 1) as f64 * dem.cell_size;
                let y_len = (dem.nrows + 1) as f64 * dem.cell_size;
                let nx = 2.0 * target.sqrt() * (x_len / (x_len + y_len));
                let ny = 2.0 * target.sqrt() * (y_len / (x_len + y_len));
                (x_len / nx + y_len / ny) / 2.0
            }
        }
    }
}

/// Mesh construction parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MeshConfig {
    pub resolution: MeshResolution,
    /// Number of node layers, ground included
    pub vertical_layers: usize,
    /// Ratio between successive layer thicknesses
    pub vertical_growth: f64,
    /// Horizontal cell size over first-layer thickness
    pub max_aspect_ratio: f64,
    /// Explicit domain depth above the highest DEM point
    pub domain_height: Option<f64>,
    /// Lowest acceptable domain depth is three times this
    /// (output wind height plus the tallest roughness element)
    pub min_clearance: f64,
}

impl Default for MeshConfig {
    fn default() -> Self {
        MeshConfig {
            resolution: MeshResolution::Coarse,
            vertical_layers: 20,
            vertical_growth: 1.3,
            max_aspect_ratio: 400.0,
            domain_height: None,
            min_clearance: 6.1,
        }
    }
}

/// Element hit by a point query, with natural coordinates inside it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElementHit {
    /// Element row, column and layer
    pub ei: usize,
    pub ej: usize,
    pub ek: usize,
    pub xi: f64,
    pub eta: f64,
    pub zeta: f64,
}

/// Immutable terrain-following mesh
#[derive(Debug, Clone)]
pub struct Mesh {
    dims: FieldDims,
    resolution: f64,
    /// DEM resampled to the mesh resolution; node (i, j, 0) is its cell (i, j)
    dem: Raster,
    z: ScalarField,
    domain_top: f64,
}

impl Mesh {
    /// Build the standard stretched mesh over a DEM
    ///
    /// # Errors
    /// Returns [`WindError::InvalidInput`] when the DEM contains no-data, the
    /// mesh would have fewer than 3 nodes in a horizontal direction or 2
    /// layers, or the geometry parameters are out of range.
    pub fn build_standard(dem: &Raster, config: &MeshConfig) -> WindResult<Mesh> {
        if dem.has_nodata() {
            return Err(WindError::invalid_input("DEM contains no-data cells"));
        }
        let resolution = config.resolution.cell_size_for(dem.header());
        if !(resolution.is_finite() && resolution > 0.0) {
            return Err(WindError::invalid_input(format!(
                "mesh resolution {resolution} must be positive"
            )));
        }
        if config.vertical_layers < 2 {
            return Err(WindError::invalid_input("mesh needs at least 2 vertical layers"));
        }
        if config.vertical_growth.is_nan() || config.vertical_growth <= 0.0 || config.vertical_growth == 1.0 {
            return Err(WindError::invalid_input(format!(
                "vertical growth {} must be positive and not 1",
                config.vertical_growth
            )));
        }
        if config.max_aspect_ratio.is_nan() || config.max_aspect_ratio <= 0.0 {
            return Err(WindError::invalid_input("max aspect ratio must be positive"));
        }

        let dem = if (resolution - dem.cell_size()).abs() <= 1e-9 * resolution {
            dem.clone()
        } else if resolution < dem.cell_size() {
            dem.resample(resolution, Interpolation::Bilinear)?
        } else {
            dem.resample(resolution, Interpolation::Nearest)?
        };
        if dem.nrows() < 3 || dem.ncols() < 3 {
            return Err(WindError::invalid_input(format!(
                "mesh of {}x{} columns is too small; at least 3x3 is required",
                dem.nrows(),
                dem.ncols()
            )));
        }

        let max_elev = dem.max_value().unwrap_or(0.0);
        let n = config.vertical_layers;
        let g = config.vertical_growth;
        let depth = match config.domain_height {
            Some(h) if h > 0.0 => h,
            Some(h) => {
                return Err(WindError::invalid_input(format!(
                    "domain height {h} must be positive"
                )))
            }
            None => {
                let first_cell = resolution / config.max_aspect_ratio;
                let stretched = first_cell * (g.powi(n as i32) - 1.0) / (g - 1.0);
                stretched.max(3.0 * config.min_clearance)
            }
        };
        let domain_top = depth + max_elev;

        let dims = FieldDims::new(dem.nrows(), dem.ncols(), n);
        let ncols = dims.ncols;
        let mut z = ScalarField::zeros(dims);
        let bottom_weight = g.powi(1 - n as i32);
        z.par_layers_mut().enumerate().for_each(|(k, layer)| {
            let frac = if k == 0 {
                0.0
            } else {
                (g.powi(k as i32 - n as i32 + 1) - bottom_weight) / (1.0 - bottom_weight)
            };
            for (idx, zk) in layer.iter_mut().enumerate() {
                let elev = dem.get(idx / ncols, idx % ncols);
                *zk = (domain_top - elev) * frac + elev;
            }
        });

        info!(
            "Mesh built: {}x{}x{} nodes, resolution {:.2} m, domain top {:.1} m",
            dims.nrows, dims.ncols, dims.nlayers, resolution, domain_top
        );
        debug!(
            "First layer thickness {:.3} m at column (0, 0)",
            z.at(0, 0, 1) - z.at(0, 0, 0)
        );

        Ok(Mesh {
            dims,
            resolution,
            dem,
            z,
            domain_top,
        })
    }

    #[inline]
    pub fn dims(&self) -> FieldDims {
        self.dims
    }

    /// Horizontal node spacing in meters
    #[inline]
    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    /// Elevation of the flat domain top
    #[inline]
    pub fn domain_top(&self) -> f64 {
        self.domain_top
    }

    /// DEM at mesh resolution
    #[inline]
    pub fn dem(&self) -> &Raster {
        &self.dem
    }

    /// Absolute easting/northing of the DEM lower-left corner
    #[inline]
    pub fn origin(&self) -> (f64, f64) {
        (self.dem.header().xll_corner, self.dem.header().yll_corner)
    }

    /// Local x of column j
    #[inline]
    pub fn x(&self, j: usize) -> f64 {
        (j as f64 + 0.5) * self.resolution
    }

    /// Local y of row i
    #[inline]
    pub fn y(&self, i: usize) -> f64 {
        (i as f64 + 0.5) * self.resolution
    }

    /// Node elevations
    #[inline]
    pub fn z(&self) -> &ScalarField {
        &self.z
    }

    /// Ground elevation under column (i, j)
    #[inline]
    pub fn ground(&self, i: usize, j: usize) -> f64 {
        self.z.at(i, j, 0)
    }

    /// Height of node (i, j, k) above ground
    #[inline]
    pub fn agl(&self, i: usize, j: usize, k: usize) -> f64 {
        self.z.at(i, j, k) - self.z.at(i, j, 0)
    }

    /// Local position of node (i, j, k)
    #[inline]
    pub fn node_position(&self, i: usize, j: usize, k: usize) -> Vec3 {
        Vec3::new(self.x(j), self.y(i), self.z.at(i, j, k))
    }

    /// Convert absolute coordinates to local ones
    #[inline]
    pub fn to_local(&self, x_abs: f64, y_abs: f64) -> (f64, f64) {
        let (xll, yll) = self.origin();
        (x_abs - xll, y_abs - yll)
    }

    /// Hexahedron whose south-west ground node is (ei, ej, ek)
    pub fn element(&self, ei: usize, ej: usize, ek: usize) -> HexElement {
        let mut nodes = [0; 8];
        let mut coords = [Vec3::zeros(); 8];
        for (a, (di, dj, dk)) in NODE_OFFSETS.iter().enumerate() {
            let (i, j, k) = (ei + di, ej + dj, ek + dk);
            nodes[a] = self.dims.index(i, j, k);
            coords[a] = self.node_position(i, j, k);
        }
        HexElement { nodes, coords }
    }

    /// Whether a local (x, y) lies inside the node hull
    pub fn contains_local(&self, x: f64, y: f64) -> bool {
        let lo = 0.5 * self.resolution;
        x >= lo && y >= lo && x <= self.x(self.dims.ncols - 1) && y <= self.y(self.dims.nrows - 1)
    }

    /// Ground elevation at local (x, y) by bilinear interpolation of the nodes
    pub fn ground_at(&self, x: f64, y: f64) -> Option<f64> {
        let (ei, ej, xi, eta) = self.locate_column(x, y)?;
        Some(self.bilinear_layer(ei, ej, 0, xi, eta))
    }

    fn locate_column(&self, x: f64, y: f64) -> Option<(usize, usize, f64, f64)> {
        if !self.contains_local(x, y) {
            return None;
        }
        let fx = x / self.resolution - 0.5;
        let fy = y / self.resolution - 0.5;
        let ej = (fx.floor() as usize).min(self.dims.ncols - 2);
        let ei = (fy.floor() as usize).min(self.dims.nrows - 2);
        let xi = 2.0 * (fx - ej as f64) - 1.0;
        let eta = 2.0 * (fy - ei as f64) - 1.0;
        Some((ei, ej, xi, eta))
    }

    fn bilinear_layer(&self, ei: usize, ej: usize, k: usize, xi: f64, eta: f64) -> f64 {
        let tx = 0.5 * (xi + 1.0);
        let ty = 0.5 * (eta + 1.0);
        let z00 = self.z.at(ei, ej, k);
        let z01 = self.z.at(ei, ej + 1, k);
        let z10 = self.z.at(ei + 1, ej, k);
        let z11 = self.z.at(ei + 1, ej + 1, k);
        (1.0 - ty) * ((1.0 - tx) * z00 + tx * z01) + ty * ((1.0 - tx) * z10 + tx * z11)
    }

    /// Element containing the local point (x, y, z_abs)
    pub fn locate(&self, x: f64, y: f64, z: f64) -> Option<ElementHit> {
        let (ei, ej, xi, eta) = self.locate_column(x, y)?;
        let mut below = self.bilinear_layer(ei, ej, 0, xi, eta);
        if z < below {
            return None;
        }
        for ek in 0..self.dims.nlayers - 1 {
            let above = self.bilinear_layer(ei, ej, ek + 1, xi, eta);
            if z <= above {
                let zeta = 2.0 * (z - below) / (above - below) - 1.0;
                return Some(ElementHit {
                    ei,
                    ej,
                    ek,
                    xi,
                    eta,
                    zeta,
                });
            }
            below = above;
        }
        None
    }

    /// Trilinear interpolation of a vector field at the local point (x, y, z_abs)
    pub fn sample(&self, field: &VectorField, x: f64, y: f64, z: f64) -> Option<[f64; 3]> {
        let hit = self.locate(x, y, z)?;
        let n = shape_functions(hit.xi, hit.eta, hit.zeta);
        let mut out = [0.0; 3];
        for (a, (di, dj, dk)) in NODE_OFFSETS.iter().enumerate() {
            let idx = self.dims.index(hit.ei + di, hit.ej + dj, hit.ek + dk);
            out[0] += n[a] * field.u.as_slice()[idx];
            out[1] += n[a] * field.v.as_slice()[idx];
            out[2] += n[a] * field.w.as_slice()[idx];
        }
        Some(out)
    }

    /// Check that a raster is laid out one cell per mesh column
    ///
    /// # Errors
    /// Returns [`WindError::InvalidInput`] when the raster does not match the mesh footprint.
    pub fn check_column_raster(&self, raster: &Raster) -> WindResult<()> {
        if raster.nrows() != self.dims.nrows || raster.ncols() != self.dims.ncols {
            return Err(WindError::invalid_input(format!(
                "grid of {}x{} does not match mesh of {}x{} columns",
                raster.nrows(),
                raster.ncols(),
                self.dims.nrows,
                self.dims.ncols
            )));
        }
        Ok(())
    }

    /// A raster shaped like the mesh footprint, filled with `value`
    ///
    /// # Errors
    /// Propagates raster construction errors.
    pub fn column_raster(&self, value: f64) -> WindResult<Raster> {
        Raster::filled(self.dem.header().clone(), value)
    }

    /// Parallel map over columns producing a footprint raster
    ///
    /// # Errors
    /// Propagates raster construction errors.
    pub fn column_raster_from_fn(&self, f: impl Fn(usize, usize) -> f64 + Sync) -> WindResult<Raster> {
        Raster::from_fn(self.dem.header().clone(), f)
    }

    /// Mean thickness of the first layer
    pub fn mean_first_layer(&self) -> f64 {
        let n = self.dims.layer_len();
        let first = self.z.layer(1);
        let ground = self.z.layer(0);
        first
            .par_iter()
            .zip(ground.par_iter())
            .map(|(a, b)| a - b)
            .sum::<f64>()
            / n as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::terrain;
    use approx::assert_relative_eq;

    fn custom(res: f64, layers: usize) -> MeshConfig {
        MeshConfig {
            resolution: MeshResolution::Custom(res),
            vertical_layers: layers,
            ..MeshConfig::default()
        }
    }

    #[test]
    fn test_named_resolution_targets_cell_count() {
        let dem = terrain::flat(200, 100, 30.0, 0.0).unwrap();
        let res = MeshResolution::Coarse.cell_size_for(dem.header());
        let cells = (201.0 * 30.0 / res) * (101.0 * 30.0 / res);
        assert!((cells - 4000.0).abs() / 4000.0 < 0.15, "cells {cells}");
        assert!(MeshResolution::Fine.cell_size_for(dem.header()) < res);
    }

    #[test]
    fn test_column_stretching() {
        let dem = terrain::flat(10, 10, 100.0, 500.0).unwrap();
        let mesh = Mesh::build_standard(&dem, &custom(100.0, 20)).unwrap();
        let g: f64 = 1.3;
        let expected_depth = 0.25 * (g.powi(20) - 1.0) / (g - 1.0);
        assert_relative_eq!(mesh.domain_top(), 500.0 + expected_depth, epsilon = 1e-9);

        assert_eq!(mesh.z().at(3, 3, 0), 500.0);
        assert_relative_eq!(mesh.z().at(3, 3, 19), mesh.domain_top(), epsilon = 1e-9);
        let dz0 = mesh.agl(3, 3, 1);
        let dz1 = mesh.z().at(3, 3, 2) - mesh.z().at(3, 3, 1);
        assert_relative_eq!(dz1 / dz0, 1.3, epsilon = 1e-9);
        assert_relative_eq!(mesh.mean_first_layer(), dz0, epsilon = 1e-9);
    }

    #[test]
    fn test_minimum_clearance_applied() {
        let dem = terrain::flat(5, 5, 10.0, 0.0).unwrap();
        let config = MeshConfig {
            min_clearance: 30.0,
            ..custom(10.0, 5)
        };
        let mesh = Mesh::build_standard(&dem, &config).unwrap();
        assert_relative_eq!(mesh.domain_top(), 90.0, epsilon = 1e-9);
    }

    #[test]
    fn test_resampled_when_resolution_differs() {
        let dem = terrain::flat(20, 10, 50.0, 0.0).unwrap();
        let mesh = Mesh::build_standard(&dem, &custom(100.0, 5)).unwrap();
        assert_eq!(mesh.dims().ncols, 10);
        assert_eq!(mesh.dims().nrows, 5);
    }

    #[test]
    fn test_too_small_rejected() {
        let dem = terrain::flat(2, 8, 10.0, 0.0).unwrap();
        assert!(Mesh::build_standard(&dem, &custom(10.0, 5)).is_err());
    }

    #[test]
    fn test_locate_and_sample_linear_field() {
        let dem = terrain::single_hill(12, 12, 50.0, 100.0, 80.0, 200.0).unwrap();
        let config = MeshConfig {
            domain_height: Some(500.0),
            ..custom(50.0, 8)
        };
        let mesh = Mesh::build_standard(&dem, &config).unwrap();
        let dims = mesh.dims();
        let mut field = VectorField::zeros(dims);
        for k in 0..dims.nlayers {
            for i in 0..dims.nrows {
                for j in 0..dims.ncols {
                    let p = mesh.node_position(i, j, k);
                    field.u.set(i, j, k, 0.01 * p.x);
                    field.v.set(i, j, k, -0.02 * p.y);
                    field.w.set(i, j, k, 0.001 * p.z);
                }
            }
        }

        // At a node the sample is exact
        let p = mesh.node_position(4, 5, 3);
        let s = mesh.sample(&field, p.x, p.y, p.z).unwrap();
        assert_relative_eq!(s[0], 0.01 * p.x, epsilon = 1e-9);
        assert_relative_eq!(s[2], 0.001 * p.z, epsilon = 1e-9);

        // Between nodes horizontally the linear x-field is reproduced
        let x = mesh.x(4) + 20.0;
        let y = mesh.y(6) + 10.0;
        let z = mesh.ground_at(x, y).unwrap() + 30.0;
        let s = mesh.sample(&field, x, y, z).unwrap();
        assert_relative_eq!(s[0], 0.01 * x, epsilon = 1e-9);
        assert_relative_eq!(s[1], -0.02 * y, epsilon = 1e-9);

        // Outside the node hull and below ground
        assert!(mesh.sample(&field, 1.0, 300.0, 200.0).is_none());
        assert!(mesh.locate(x, y, z - 100.0).is_none());
    }
}
