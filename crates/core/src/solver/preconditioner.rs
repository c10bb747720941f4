//! Preconditioners for the symmetric stiffness system

use super::assembly::SparseSystem;
use rayon::prelude::*;
use tracing::warn;

/// Approximate inverse of the system matrix
#[derive(Debug, Clone)]
pub enum Preconditioner {
    /// Symmetric Gauss-Seidel (SSOR with ω = 1)
    Ssor { diagonal: Vec<f64> },
    /// Diagonal scaling
    Jacobi { inverse_diagonal: Vec<f64> },
}

impl Preconditioner {
    pub fn ssor(system: &SparseSystem) -> Self {
        Preconditioner::Ssor {
            diagonal: system.diagonal(),
        }
    }

    pub fn jacobi(system: &SparseSystem) -> Self {
        let inverse_diagonal = system
            .diagonal()
            .into_par_iter()
            .map(|d| if d != 0.0 && d.is_finite() { 1.0 / d } else { 1.0 })
            .collect();
        Preconditioner::Jacobi { inverse_diagonal }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Preconditioner::Ssor { .. } => "SSOR",
            Preconditioner::Jacobi { .. } => "Jacobi",
        }
    }

    /// `z = M⁻¹ r`; returns false when the result is not finite
    pub fn apply(&self, system: &SparseSystem, r: &[f64], z: &mut [f64]) -> bool {
        match self {
            Preconditioner::Jacobi { inverse_diagonal } => {
                z.par_iter_mut()
                    .zip(r.par_iter().zip(inverse_diagonal.par_iter()))
                    .for_each(|(z, (r, d))| *z = r * d);
            }
            Preconditioner::Ssor { diagonal } => {
                let offsets = system.matrix.row_offsets();
                let cols = system.matrix.col_indices();
                let vals = system.matrix.values();
                let n = r.len();
                // (D + L) y = r
                for row in 0..n {
                    let mut sum = r[row];
                    for pos in offsets[row]..offsets[row + 1] {
                        let col = cols[pos];
                        if col >= row {
                            break;
                        }
                        sum -= vals[pos] * z[col];
                    }
                    z[row] = sum / diagonal[row];
                }
                // (D + U) z = D y
                for row in (0..n).rev() {
                    let mut sum = diagonal[row] * z[row];
                    for pos in (offsets[row]..offsets[row + 1]).rev() {
                        let col = cols[pos];
                        if col <= row {
                            break;
                        }
                        sum -= vals[pos] * z[col];
                    }
                    z[row] = sum / diagonal[row];
                }
            }
        }
        z.par_iter().all(|v| v.is_finite())
    }

    /// Apply, switching `self` to Jacobi if SSOR produces a non-finite value
    pub fn apply_or_degrade(&mut self, system: &SparseSystem, r: &[f64], z: &mut [f64]) -> bool {
        if self.apply(system, r, z) {
            return true;
        }
        if matches!(self, Preconditioner::Ssor { .. }) {
            warn!("SSOR sweep produced non-finite values, switching to Jacobi");
            *self = Preconditioner::jacobi(system);
            return self.apply(system, r, z);
        }
        false
    }
}
