//! Trilinear 8-node hexahedral element
//!
//! Local node order, with (i, j, k) the element's south-west ground node:
//!
//! ```text
//!   0 (i,   j,   k)    4 (i,   j,   k+1)
//!   1 (i,   j+1, k)    5 (i,   j+1, k+1)
//!   2 (i+1, j+1, k)    6 (i+1, j+1, k+1)
//!   3 (i+1, j,   k)    7 (i+1, j,   k+1)
//! ```
//!
//! ξ runs along x (columns), η along y (rows) and ζ along z (layers).

use crate::core_types::vec3::Vec3;
use nalgebra::Matrix3;

/// Natural coordinates of the eight local nodes
pub const NODE_NATURAL: [[f64; 3]; 8] = [
    [-1.0, -1.0, -1.0],
    [1.0, -1.0, -1.0],
    [1.0, 1.0, -1.0],
    [-1.0, 1.0, -1.0],
    [-1.0, -1.0, 1.0],
    [1.0, -1.0, 1.0],
    [1.0, 1.0, 1.0],
    [-1.0, 1.0, 1.0],
];

/// (di, dj, dk) offset of each local node from the element origin
pub const NODE_OFFSETS: [(usize, usize, usize); 8] = [
    (0, 0, 0),
    (0, 1, 0),
    (1, 1, 0),
    (1, 0, 0),
    (0, 0, 1),
    (0, 1, 1),
    (1, 1, 1),
    (1, 0, 1),
];

/// 2-point Gauss-Legendre abscissa, weight 1
pub const GAUSS_ABSCISSA: f64 = 0.577_350_269_189_625_8;

/// Trilinear shape functions at (ξ, η, ζ)
#[inline]
pub fn shape_functions(xi: f64, eta: f64, zeta: f64) -> [f64; 8] {
    let mut n = [0.0; 8];
    for (a, nat) in NODE_NATURAL.iter().enumerate() {
        n[a] = 0.125 * (1.0 + nat[0] * xi) * (1.0 + nat[1] * eta) * (1.0 + nat[2] * zeta);
    }
    n
}

/// Shape function derivatives with respect to (ξ, η, ζ)
#[inline]
pub fn shape_derivatives(xi: f64, eta: f64, zeta: f64) -> [[f64; 3]; 8] {
    let mut d = [[0.0; 3]; 8];
    for (a, nat) in NODE_NATURAL.iter().enumerate() {
        let (fx, fy, fz) = (1.0 + nat[0] * xi, 1.0 + nat[1] * eta, 1.0 + nat[2] * zeta);
        d[a] = [
            0.125 * nat[0] * fy * fz,
            0.125 * nat[1] * fx * fz,
            0.125 * nat[2] * fx * fy,
        ];
    }
    d
}

/// Shape function values and global gradients at one point of an element
#[derive(Debug, Clone, Copy)]
pub struct ElementPoint {
    /// N_a at the point
    pub n: [f64; 8],
    /// ∇N_a in global coordinates
    pub grad: [Vec3; 8],
    /// Jacobian determinant (volume scale)
    pub det_j: f64,
    /// Global position of the point
    pub position: Vec3,
}

/// One hexahedron with its global node indices and coordinates
#[derive(Debug, Clone, Copy)]
pub struct HexElement {
    pub nodes: [usize; 8],
    pub coords: [Vec3; 8],
}

impl HexElement {
    /// Evaluate shape functions and their global gradients at (ξ, η, ζ)
    ///
    /// Returns `None` for a degenerate (non-invertible or inverted) element.
    pub fn evaluate(&self, xi: f64, eta: f64, zeta: f64) -> Option<ElementPoint> {
        let n = shape_functions(xi, eta, zeta);
        let dn = shape_derivatives(xi, eta, zeta);

        let mut jac = Matrix3::<f64>::zeros();
        let mut position = Vec3::zeros();
        for a in 0..8 {
            let c = &self.coords[a];
            position += c * n[a];
            for r in 0..3 {
                jac[(r, 0)] += dn[a][r] * c.x;
                jac[(r, 1)] += dn[a][r] * c.y;
                jac[(r, 2)] += dn[a][r] * c.z;
            }
        }
        let det_j = jac.determinant();
        if !(det_j.is_finite() && det_j > 0.0) {
            return None;
        }
        let inv = jac.try_inverse()?;

        let mut grad = [Vec3::zeros(); 8];
        for a in 0..8 {
            grad[a] = inv * Vec3::new(dn[a][0], dn[a][1], dn[a][2]);
        }
        Some(ElementPoint {
            n,
            grad,
            det_j,
            position,
        })
    }

    /// The 2x2x2 Gauss points (all weights are 1)
    pub fn gauss_points(&self) -> Option<[ElementPoint; 8]> {
        let g = GAUSS_ABSCISSA;
        // NODE_NATURAL[0] is the (-,-,-) corner
        let mut out = [self.evaluate(-g, -g, -g)?; 8];
        for (slot, nat) in out.iter_mut().zip(NODE_NATURAL.iter()).skip(1) {
            *slot = self.evaluate(nat[0] * g, nat[1] * g, nat[2] * g)?;
        }
        Some(out)
    }

    /// Element volume via Gauss quadrature
    pub fn volume(&self) -> Option<f64> {
        Some(self.gauss_points()?.iter().map(|p| p.det_j).sum())
    }

    /// Geometric centre (mean of the nodes)
    pub fn centroid(&self) -> Vec3 {
        self.coords.iter().sum::<Vec3>() / 8.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_box(dx: f64, dy: f64, dz: f64) -> HexElement {
        let mut coords = [Vec3::zeros(); 8];
        for (c, (di, dj, dk)) in coords.iter_mut().zip(NODE_OFFSETS) {
            *c = Vec3::new(dj as f64 * dx, di as f64 * dy, dk as f64 * dz);
        }
        HexElement {
            nodes: [0, 1, 2, 3, 4, 5, 6, 7],
            coords,
        }
    }

    #[test]
    fn test_partition_of_unity() {
        let n = shape_functions(0.3, -0.2, 0.7);
        assert_relative_eq!(n.iter().sum::<f64>(), 1.0, epsilon = 1e-14);
        let d = shape_derivatives(0.3, -0.2, 0.7);
        for axis in 0..3 {
            let s: f64 = d.iter().map(|g| g[axis]).sum();
            assert_relative_eq!(s, 0.0, epsilon = 1e-14);
        }
    }

    #[test]
    fn test_box_volume_and_jacobian() {
        let hex = unit_box(10.0, 20.0, 2.0);
        assert_relative_eq!(hex.volume().unwrap(), 400.0, epsilon = 1e-9);
        let p = hex.evaluate(0.0, 0.0, 0.0).unwrap();
        assert_relative_eq!(p.det_j, 50.0, epsilon = 1e-12);
        assert_relative_eq!(p.position, Vec3::new(5.0, 10.0, 1.0), epsilon = 1e-12);
    }

    #[test]
    fn test_gradient_of_linear_field_is_exact() {
        // Sheared column: top face higher on the east side
        let mut hex = unit_box(10.0, 10.0, 5.0);
        hex.coords[5].z += 3.0;
        hex.coords[6].z += 3.0;
        let f = |p: &Vec3| 2.0 * p.x - 1.0 * p.y + 0.5 * p.z;
        let values: Vec<f64> = hex.coords.iter().map(f).collect();
        for gp in hex.gauss_points().unwrap() {
            let grad: Vec3 = gp.grad.iter().zip(&values).map(|(g, v)| g * *v).sum();
            assert_relative_eq!(grad, Vec3::new(2.0, -1.0, 0.5), epsilon = 1e-10);
        }
    }

    #[test]
    fn test_inverted_element_rejected() {
        let mut hex = unit_box(1.0, 1.0, 1.0);
        for c in &mut hex.coords[4..] {
            c.z = -1.0;
        }
        assert!(hex.evaluate(0.0, 0.0, 0.0).is_none());
    }
}
