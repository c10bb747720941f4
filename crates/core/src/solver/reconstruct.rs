//! Corrected wind field `U = U0 + R∇phi` and divergence diagnostics
//!
//! Gradients are evaluated at element Gauss points and carried to the nodes
//! by inverse-distance weighting over the elements sharing each node.

use super::assembly::correction_weights;
use crate::atmosphere::StabilityField;
use crate::core_types::Vec3;
use crate::error::{WindError, WindResult};
use crate::grid::{FieldDims, Mesh, ScalarField, VectorField};
use rayon::prelude::*;

/// Gauss-point positions and values of one element
type PointValues = [(Vec3, Vec3); 8];

fn element_index(dims: FieldDims, ei: usize, ej: usize, ek: usize) -> usize {
    let (er, ec, _) = dims.elements();
    ek * er * ec + ei * ec + ej
}

/// Elements sharing node (i, j, k), as (ei, ej, ek)
fn adjacent_elements(dims: FieldDims, i: usize, j: usize, k: usize) -> impl Iterator<Item = (usize, usize, usize)> {
    let (er, ec, el) = dims.elements();
    let range = |n: usize, max: usize| n.saturating_sub(1)..=n.min(max.saturating_sub(1));
    range(k, el).flat_map(move |ek| {
        range(i, er).flat_map(move |ei| range(j, ec).map(move |ej| (ei, ej, ek)))
    })
}

fn degenerate(ei: usize, ej: usize, ek: usize) -> WindError {
    WindError::invalid_input(format!("degenerate mesh element ({ei}, {ej}, {ek})"))
}

/// Applies the solved potential to the initial field
#[derive(Debug, Clone, Copy)]
pub struct FieldReconstructor<'a> {
    mesh: &'a Mesh,
    stability: &'a StabilityField,
}

impl<'a> FieldReconstructor<'a> {
    /// # Errors
    /// Returns [`WindError::InvalidInput`] when the weights do not match the mesh.
    pub fn new(mesh: &'a Mesh, stability: &'a StabilityField) -> WindResult<Self> {
        if stability.dims() != mesh.dims() {
            return Err(WindError::invalid_input(
                "stability field does not match the mesh",
            ));
        }
        Ok(FieldReconstructor { mesh, stability })
    }

    /// `R∇phi` at every Gauss point
    fn gauss_corrections(&self, phi: &[f64]) -> WindResult<Vec<PointValues>> {
        let dims = self.mesh.dims();
        let (er, ec, el) = dims.elements();
        (0..er * ec * el)
            .into_par_iter()
            .map(|e| {
                let (ek, rem) = (e / (er * ec), e % (er * ec));
                let (ei, ej) = (rem / ec, rem % ec);
                let hex = self.mesh.element(ei, ej, ek);
                let points = hex.gauss_points().ok_or_else(|| degenerate(ei, ej, ek))?;
                Ok(points.map(|p| {
                    let grad: Vec3 = p.grad.iter().zip(&hex.nodes).map(|(g, n)| g * phi[*n]).sum();
                    let (alpha_h, alpha_v) = self.stability.interpolate(&hex.nodes, &p.n);
                    (p.position, grad.component_mul(&correction_weights(alpha_h, alpha_v)))
                }))
            })
            .collect()
    }

    /// Corrected field for potential `phi`
    ///
    /// # Errors
    /// Returns [`WindError::InvalidInput`] when `initial` or `phi` do not match
    /// the mesh or an element is degenerate.
    pub fn reconstruct(&self, initial: &VectorField, phi: &[f64]) -> WindResult<VectorField> {
        let dims = self.mesh.dims();
        if initial.dims() != dims || phi.len() != dims.len() {
            return Err(WindError::invalid_input(
                "potential or initial field does not match the mesh",
            ));
        }
        let corrections = self.gauss_corrections(phi)?;
        let layer = dims.layer_len();
        let mut out = initial.clone();
        let VectorField { u, v, w } = &mut out;

        u.par_layers_mut()
            .zip(v.par_layers_mut())
            .zip(w.par_layers_mut())
            .enumerate()
            .for_each(|(k, ((u, v), w))| {
                for c in 0..layer {
                    let (i, j) = (c / dims.ncols, c % dims.ncols);
                    let node = self.mesh.node_position(i, j, k);
                    let mut sum = Vec3::zeros();
                    let mut weight = 0.0;
                    for (ei, ej, ek) in adjacent_elements(dims, i, j, k) {
                        for (position, correction) in &corrections[element_index(dims, ei, ej, ek)] {
                            let d = (position - node).norm();
                            let wt = if d > 0.0 { 1.0 / d } else { 1.0e12 };
                            sum += correction * wt;
                            weight += wt;
                        }
                    }
                    if weight > 0.0 {
                        let avg = sum / weight;
                        u[c] += avg.x;
                        v[c] += avg.y;
                        w[c] += avg.z;
                    }
                }
            });
        Ok(out)
    }
}

/// Volume-averaged divergence of `field` in every element
///
/// Ordered layer-major like the nodes: `ek * er * ec + ei * ec + ej`.
///
/// # Errors
/// Returns [`WindError::InvalidInput`] for a field of the wrong shape or a
/// degenerate element.
pub fn element_divergence(mesh: &Mesh, field: &VectorField) -> WindResult<Vec<f64>> {
    let dims = mesh.dims();
    if field.dims() != dims {
        return Err(WindError::invalid_input("wind field does not match the mesh"));
    }
    let (er, ec, el) = dims.elements();
    let (u, v, w) = (field.u.as_slice(), field.v.as_slice(), field.w.as_slice());
    (0..er * ec * el)
        .into_par_iter()
        .map(|e| {
            let (ek, rem) = (e / (er * ec), e % (er * ec));
            let (ei, ej) = (rem / ec, rem % ec);
            let hex = mesh.element(ei, ej, ek);
            let points = hex.gauss_points().ok_or_else(|| degenerate(ei, ej, ek))?;
            let mut integral = 0.0;
            let mut volume = 0.0;
            for p in &points {
                let div: f64 = p
                    .grad
                    .iter()
                    .zip(&hex.nodes)
                    .map(|(g, &n)| g.x * u[n] + g.y * v[n] + g.z * w[n])
                    .sum();
                integral += div * p.det_j;
                volume += p.det_j;
            }
            Ok(integral / volume)
        })
        .collect()
}

/// Element-averaged divergence interpolated to the nodes
///
/// # Errors
/// See [`element_divergence`].
pub fn divergence(mesh: &Mesh, field: &VectorField) -> WindResult<ScalarField> {
    let dims = mesh.dims();
    let per_element = element_divergence(mesh, field)?;
    let mut out = ScalarField::zeros(dims);
    out.par_layers_mut().enumerate().for_each(|(k, values)| {
        for (c, value) in values.iter_mut().enumerate() {
            let (i, j) = (c / dims.ncols, c % dims.ncols);
            let (sum, count) = adjacent_elements(dims, i, j, k)
                .map(|(ei, ej, ek)| per_element[element_index(dims, ei, ej, ek)])
                .fold((0.0, 0usize), |(s, n), d| (s + d, n + 1));
            if count > 0 {
                *value = sum / count as f64;
            }
        }
    });
    Ok(out)
}

/// Root-mean-square element divergence
///
/// # Errors
/// See [`element_divergence`].
pub fn rms_divergence(mesh: &Mesh, field: &VectorField) -> WindResult<f64> {
    let per_element = element_divergence(mesh, field)?;
    if per_element.is_empty() {
        return Ok(0.0);
    }
    let sum_sq: f64 = per_element.par_iter().map(|d| d * d).sum();
    Ok((sum_sq / per_element.len() as f64).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{terrain, MeshConfig, MeshResolution};
    use approx::assert_relative_eq;

    fn flat_mesh() -> Mesh {
        let dem = terrain::flat(6, 5, 100.0, 0.0).unwrap();
        let config = MeshConfig {
            resolution: MeshResolution::Custom(100.0),
            vertical_layers: 4,
            ..MeshConfig::default()
        };
        Mesh::build_standard(&dem, &config).unwrap()
    }

    #[test]
    fn test_adjacency_counts() {
        let dims = FieldDims::new(4, 5, 3);
        assert_eq!(adjacent_elements(dims, 0, 0, 0).count(), 1);
        assert_eq!(adjacent_elements(dims, 1, 1, 1).count(), 8);
        assert_eq!(adjacent_elements(dims, 3, 2, 2).count(), 2);
    }

    #[test]
    fn test_zero_potential_keeps_field() {
        let mesh = flat_mesh();
        let stability = StabilityField::neutral(mesh.dims());
        let mut wind = VectorField::zeros(mesh.dims());
        wind.u.fill(2.0);
        let out = FieldReconstructor::new(&mesh, &stability)
            .unwrap()
            .reconstruct(&wind, &vec![0.0; mesh.dims().len()])
            .unwrap();
        assert_eq!(out, wind);
    }

    #[test]
    fn test_linear_potential_adds_weighted_gradient() {
        let mesh = flat_mesh();
        let dims = mesh.dims();
        let stability = StabilityField::neutral(dims);
        let phi: Vec<f64> = (0..dims.len())
            .map(|idx| {
                let (i, j, k) = dims.coords(idx);
                let p = mesh.node_position(i, j, k);
                0.5 * p.x - 2.0 * p.z
            })
            .collect();
        let out = FieldReconstructor::new(&mesh, &stability)
            .unwrap()
            .reconstruct(&VectorField::zeros(dims), &phi)
            .unwrap();
        // R = 1/2 for isotropic weights
        let [u, v, w] = out.at(2, 3, 1);
        assert_relative_eq!(u, 0.25, epsilon = 1e-9);
        assert_relative_eq!(v, 0.0, epsilon = 1e-9);
        assert_relative_eq!(w, -1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_divergence_of_expanding_flow() {
        let mesh = flat_mesh();
        let dims = mesh.dims();
        let mut wind = VectorField::zeros(dims);
        for idx in 0..dims.len() {
            let (i, j, k) = dims.coords(idx);
            let p = mesh.node_position(i, j, k);
            wind.u.as_mut_slice()[idx] = 0.01 * p.x;
            wind.v.as_mut_slice()[idx] = 0.02 * p.y;
        }
        let nodal = divergence(&mesh, &wind).unwrap();
        assert!(nodal.as_slice().iter().all(|d| (d - 0.03).abs() < 1e-9));
        assert_relative_eq!(rms_divergence(&mesh, &wind).unwrap(), 0.03, epsilon = 1e-9);
    }
}
