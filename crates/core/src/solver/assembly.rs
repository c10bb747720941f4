//! Finite-element assembly of the mass-conservation system
//!
//! The correction potential phi satisfies `∫ ∇N_k · R ∇phi = ∫ N_k ∇·U0` over
//! trilinear hexahedra with 2x2x2 Gauss quadrature, `R = diag(Rx, Ry, Rz)`
//! built from the stability weights. Lateral and top nodes carry `phi = 0`;
//! the ground is a natural boundary.
//!
//! The matrix has the fixed 27-point pattern of the structured mesh. Element
//! layers are assembled in two colours: every element of layer `ek` touches
//! only node layers `ek` and `ek + 1`, so layers of equal parity write
//! disjoint row ranges and run in parallel.

use crate::atmosphere::StabilityField;
use crate::core_types::Vec3;
use crate::error::{WindError, WindResult};
use crate::grid::{FieldDims, HexElement, Mesh, VectorField};
use nalgebra_sparse::CsrMatrix;
use rayon::prelude::*;
use tracing::debug;

/// Correction weights `(Rx, Ry, Rz)` for stability weights `alpha_h`, `alpha_v`
#[inline]
pub fn correction_weights(alpha_h: f64, alpha_v: f64) -> Vec3 {
    let h = 1.0 / (2.0 * alpha_h * alpha_h);
    Vec3::new(h, h, 1.0 / (2.0 * alpha_v * alpha_v))
}

/// Assembled linear system `A phi = b`
#[derive(Debug, Clone)]
pub struct SparseSystem {
    /// Symmetric positive definite stiffness matrix
    pub matrix: CsrMatrix<f64>,
    pub rhs: Vec<f64>,
    /// Nodes pinned to `phi = 0`
    pub dirichlet: Vec<bool>,
}

impl SparseSystem {
    #[inline]
    pub fn len(&self) -> usize {
        self.rhs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rhs.is_empty()
    }

    /// `y = A x`, rows in parallel
    pub fn apply(&self, x: &[f64], y: &mut [f64]) {
        let offsets = self.matrix.row_offsets();
        let cols = self.matrix.col_indices();
        let vals = self.matrix.values();
        y.par_iter_mut().enumerate().for_each(|(r, out)| {
            let range = offsets[r]..offsets[r + 1];
            *out = cols[range.clone()]
                .iter()
                .zip(&vals[range])
                .map(|(c, a)| a * x[*c])
                .sum();
        });
    }

    /// Diagonal of the matrix
    pub fn diagonal(&self) -> Vec<f64> {
        let offsets = self.matrix.row_offsets();
        let cols = self.matrix.col_indices();
        let vals = self.matrix.values();
        (0..self.len())
            .into_par_iter()
            .map(|r| {
                let range = offsets[r]..offsets[r + 1];
                cols[range.clone()]
                    .binary_search(&r)
                    .map_or(0.0, |pos| vals[range.start + pos])
            })
            .collect()
    }
}

/// Row offsets and column indices of the 27-point pattern
pub fn sparsity_pattern(dims: FieldDims) -> (Vec<usize>, Vec<usize>) {
    let n = dims.len();
    let mut offsets = Vec::with_capacity(n + 1);
    let mut cols = Vec::with_capacity(27 * n);
    offsets.push(0);
    let span = |c: usize, len: usize| c.saturating_sub(1)..=(c + 1).min(len - 1);
    for idx in 0..n {
        let (i, j, k) = dims.coords(idx);
        // Layer-major indexing: k outermost keeps columns sorted
        for kk in span(k, dims.nlayers) {
            for ii in span(i, dims.nrows) {
                for jj in span(j, dims.ncols) {
                    cols.push(dims.index(ii, jj, kk));
                }
            }
        }
        offsets.push(cols.len());
    }
    (offsets, cols)
}

/// Split `data` into the ascending, disjoint `ranges`
pub(crate) fn split_ranges<'a, T>(mut data: &'a mut [T], ranges: &[(usize, usize)]) -> Vec<&'a mut [T]> {
    let mut out = Vec::with_capacity(ranges.len());
    let mut consumed = 0;
    for &(start, end) in ranges {
        let (_, rest) = std::mem::take(&mut data).split_at_mut(start - consumed);
        let (chunk, rest) = rest.split_at_mut(end - start);
        out.push(chunk);
        data = rest;
        consumed = end;
    }
    out
}

struct ElementContribution {
    stiffness: [[f64; 8]; 8],
    load: [f64; 8],
}

/// Builds [`SparseSystem`]s for one mesh and stability weighting
///
/// Holds no state between calls; every [`assemble`](Self::assemble) starts
/// from a fresh matrix.
#[derive(Debug, Clone, Copy)]
pub struct MassConservationBuilder<'a> {
    mesh: &'a Mesh,
    stability: &'a StabilityField,
}

impl<'a> MassConservationBuilder<'a> {
    /// # Errors
    /// Returns [`WindError::InvalidInput`] when the weights do not match the mesh.
    pub fn new(mesh: &'a Mesh, stability: &'a StabilityField) -> WindResult<Self> {
        if stability.dims() != mesh.dims() {
            return Err(WindError::invalid_input(
                "stability field does not match the mesh",
            ));
        }
        Ok(MassConservationBuilder { mesh, stability })
    }

    fn element_contribution(&self, hex: &HexElement, initial: &VectorField) -> WindResult<ElementContribution> {
        let points = hex.gauss_points().ok_or_else(|| {
            WindError::invalid_input(format!(
                "degenerate mesh element at node {}",
                hex.nodes[0]
            ))
        })?;
        let (u, v, w) = (initial.u.as_slice(), initial.v.as_slice(), initial.w.as_slice());
        let velocity: [Vec3; 8] = hex.nodes.map(|n| Vec3::new(u[n], v[n], w[n]));

        let mut out = ElementContribution {
            stiffness: [[0.0; 8]; 8],
            load: [0.0; 8],
        };
        for p in &points {
            let (alpha_h, alpha_v) = self.stability.interpolate(&hex.nodes, &p.n);
            let r = correction_weights(alpha_h, alpha_v);
            let divergence: f64 = p.grad.iter().zip(&velocity).map(|(g, vel)| g.dot(vel)).sum();
            for a in 0..8 {
                out.load[a] += p.n[a] * divergence * p.det_j;
                let weighted = p.grad[a].component_mul(&r) * p.det_j;
                for b in 0..8 {
                    out.stiffness[a][b] += weighted.dot(&p.grad[b]);
                }
            }
        }
        Ok(out)
    }

    /// Assemble the system for initial field `initial`
    ///
    /// # Errors
    /// Returns [`WindError::InvalidInput`] for a field of the wrong shape or a
    /// degenerate element.
    pub fn assemble(&self, initial: &VectorField) -> WindResult<SparseSystem> {
        let dims = self.mesh.dims();
        if initial.dims() != dims {
            return Err(WindError::invalid_input(
                "initial wind field does not match the mesh",
            ));
        }
        let (offsets, cols) = sparsity_pattern(dims);
        let mut values = vec![0.0; cols.len()];
        let mut rhs = vec![0.0; dims.len()];
        let layer = dims.layer_len();
        let (erows, ecols, elayers) = dims.elements();

        for colour in 0..2 {
            let layers: Vec<usize> = (colour..elayers).step_by(2).collect();
            let value_ranges: Vec<(usize, usize)> = layers
                .iter()
                .map(|&ek| (offsets[ek * layer], offsets[(ek + 2) * layer]))
                .collect();
            let rhs_ranges: Vec<(usize, usize)> =
                layers.iter().map(|&ek| (ek * layer, (ek + 2) * layer)).collect();
            let value_slabs = split_ranges(&mut values, &value_ranges);
            let rhs_slabs = split_ranges(&mut rhs, &rhs_ranges);

            layers
                .par_iter()
                .zip(value_slabs)
                .zip(rhs_slabs)
                .try_for_each(|((&ek, vals), loads)| -> WindResult<()> {
                    let value_base = offsets[ek * layer];
                    let row_base = ek * layer;
                    for ei in 0..erows {
                        for ej in 0..ecols {
                            let hex = self.mesh.element(ei, ej, ek);
                            let contribution = self.element_contribution(&hex, initial)?;
                            for (a, &row) in hex.nodes.iter().enumerate() {
                                loads[row - row_base] += contribution.load[a];
                                let row_cols = &cols[offsets[row]..offsets[row + 1]];
                                for (b, &col) in hex.nodes.iter().enumerate() {
                                    if let Ok(pos) = row_cols.binary_search(&col) {
                                        vals[offsets[row] + pos - value_base] += contribution.stiffness[a][b];
                                    }
                                }
                            }
                        }
                    }
                    Ok(())
                })?;
        }

        let dirichlet: Vec<bool> = (0..dims.len())
            .map(|idx| {
                let (i, j, k) = dims.coords(idx);
                dims.is_dirichlet(i, j, k)
            })
            .collect();
        apply_dirichlet(dims, &offsets, &cols, &mut values, &mut rhs, &dirichlet);

        let nnz = values.len();
        let matrix = CsrMatrix::try_from_csr_data(dims.len(), dims.len(), offsets, cols, values)
            .map_err(|e| WindError::invalid_input(format!("malformed stiffness matrix: {e}")))?;
        debug!(
            nodes = dims.len(),
            nnz,
            elements = dims.element_count(),
            "mass-conservation system assembled"
        );
        Ok(SparseSystem {
            matrix,
            rhs,
            dirichlet,
        })
    }
}

/// Pin Dirichlet rows to `phi = 0`, keeping the matrix symmetric
fn apply_dirichlet(
    dims: FieldDims,
    offsets: &[usize],
    cols: &[usize],
    values: &mut [f64],
    rhs: &mut [f64],
    dirichlet: &[bool],
) {
    let layer = dims.layer_len();
    let value_ranges: Vec<(usize, usize)> = (0..dims.nlayers)
        .map(|k| (offsets[k * layer], offsets[(k + 1) * layer]))
        .collect();
    split_ranges(values, &value_ranges)
        .into_par_iter()
        .zip(rhs.par_chunks_mut(layer))
        .enumerate()
        .for_each(|(k, (vals, loads))| {
            let value_base = offsets[k * layer];
            for (local, load) in loads.iter_mut().enumerate() {
                let row = k * layer + local;
                let pinned = dirichlet[row];
                if pinned {
                    *load = 0.0;
                }
                for pos in offsets[row]..offsets[row + 1] {
                    let col = cols[pos];
                    let value = &mut vals[pos - value_base];
                    if col == row {
                        if pinned && *value <= 0.0 {
                            *value = 1.0;
                        }
                    } else if pinned || dirichlet[col] {
                        *value = 0.0;
                    }
                }
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{terrain, MeshConfig, MeshResolution};
    use approx::assert_relative_eq;

    fn mesh(dem: &crate::grid::Raster) -> Mesh {
        let config = MeshConfig {
            resolution: MeshResolution::Custom(dem.cell_size()),
            vertical_layers: 5,
            ..MeshConfig::default()
        };
        Mesh::build_standard(dem, &config).unwrap()
    }

    #[test]
    fn test_pattern_is_sorted_27_point() {
        let dims = FieldDims::new(4, 5, 3);
        let (offsets, cols) = sparsity_pattern(dims);
        assert_eq!(offsets.len(), dims.len() + 1);
        let interior = dims.index(1, 1, 1);
        assert_eq!(offsets[interior + 1] - offsets[interior], 27);
        let corner = dims.index(0, 0, 0);
        assert_eq!(offsets[corner + 1] - offsets[corner], 8);
        for r in 0..dims.len() {
            let row = &cols[offsets[r]..offsets[r + 1]];
            assert!(row.windows(2).all(|w| w[0] < w[1]));
            assert!(row.contains(&r));
        }
    }

    #[test]
    fn test_split_ranges_skips_gaps() {
        let mut data: Vec<usize> = (0..10).collect();
        let parts = split_ranges(&mut data, &[(1, 3), (5, 6), (8, 10)]);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], &[1, 2]);
        assert_eq!(parts[1], &[5]);
        assert_eq!(parts[2], &[8, 9]);
    }

    #[test]
    fn test_system_is_symmetric_with_pinned_boundary() {
        let dem = terrain::single_hill(7, 7, 50.0, 100.0, 60.0, 100.0).unwrap();
        let mesh = mesh(&dem);
        let stability = StabilityField::neutral(mesh.dims());
        let mut wind = VectorField::zeros(mesh.dims());
        wind.u.fill(4.0);
        let system = MassConservationBuilder::new(&mesh, &stability)
            .unwrap()
            .assemble(&wind)
            .unwrap();

        let dense = nalgebra::DMatrix::from(&system.matrix);
        assert_relative_eq!(dense.clone(), dense.transpose(), epsilon = 1e-9);
        let dims = mesh.dims();
        let pinned = dims.index(0, 3, 2);
        assert!(system.dirichlet[pinned]);
        assert_eq!(system.rhs[pinned], 0.0);
        let row = system.matrix.row(pinned);
        assert_eq!(row.values().iter().filter(|v| **v != 0.0).count(), 1);
        // Positive diagonal everywhere
        assert!(system.diagonal().iter().all(|d| *d > 0.0));
        // Flow over a hill is divergent in the initial guess
        assert!(system.rhs.iter().any(|b| b.abs() > 1e-9));
    }

    #[test]
    fn test_uniform_flow_over_flat_ground_has_no_load() {
        let dem = terrain::flat(6, 6, 100.0, 0.0).unwrap();
        let mesh = mesh(&dem);
        let stability = StabilityField::neutral(mesh.dims());
        let mut wind = VectorField::zeros(mesh.dims());
        wind.u.fill(3.0);
        wind.v.fill(-1.0);
        let system = MassConservationBuilder::new(&mesh, &stability)
            .unwrap()
            .assemble(&wind)
            .unwrap();
        assert!(system.rhs.iter().all(|b| b.abs() < 1e-9));
    }

    #[test]
    fn test_weights_follow_alpha() {
        let r = correction_weights(1.0, 0.5);
        assert_relative_eq!(r.x, 0.5);
        assert_relative_eq!(r.y, 0.5);
        assert_relative_eq!(r.z, 2.0);
    }
}
