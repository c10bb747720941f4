//! Arena-backed nodal fields
//!
//! Every per-node quantity lives in one contiguous `Vec<f64>` indexed
//! layer-major: `k * nrows * ncols + i * ncols + j`. A whole layer is a
//! contiguous slice, so layer loops split with `par_chunks_mut(layer_len)`
//! and each worker owns a disjoint slice.

use crate::error::{WindError, WindResult};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::ops::{Index, IndexMut};

/// Node counts of a structured mesh
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDims {
    /// Nodes south to north
    pub nrows: usize,
    /// Nodes west to east
    pub ncols: usize,
    /// Nodes ground to top
    pub nlayers: usize,
}

impl FieldDims {
    pub const fn new(nrows: usize, ncols: usize, nlayers: usize) -> Self {
        FieldDims {
            nrows,
            ncols,
            nlayers,
        }
    }

    /// Nodes in one horizontal layer
    #[inline]
    pub const fn layer_len(&self) -> usize {
        self.nrows * self.ncols
    }

    /// Total node count
    #[inline]
    pub const fn len(&self) -> usize {
        self.nrows * self.ncols * self.nlayers
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flat index of node (i, j, k), or `None` when out of range
    #[inline]
    pub const fn checked_index(&self, i: usize, j: usize, k: usize) -> Option<usize> {
        if i < self.nrows && j < self.ncols && k < self.nlayers {
            Some(k * self.layer_len() + i * self.ncols + j)
        } else {
            None
        }
    }

    /// Flat index of node (i, j, k)
    ///
    /// # Panics
    /// Panics if any coordinate is outside the mesh.
    #[inline]
    pub fn index(&self, i: usize, j: usize, k: usize) -> usize {
        match self.checked_index(i, j, k) {
            Some(idx) => idx,
            None => panic!(
                "node ({i}, {j}, {k}) outside mesh of {}x{}x{}",
                self.nrows, self.ncols, self.nlayers
            ),
        }
    }

    /// Inverse of [`FieldDims::index`]
    #[inline]
    pub const fn coords(&self, idx: usize) -> (usize, usize, usize) {
        let k = idx / self.layer_len();
        let rem = idx % self.layer_len();
        (rem / self.ncols, rem % self.ncols, k)
    }

    /// Element counts (one less than nodes in every direction)
    #[inline]
    pub const fn elements(&self) -> (usize, usize, usize) {
        (
            self.nrows.saturating_sub(1),
            self.ncols.saturating_sub(1),
            self.nlayers.saturating_sub(1),
        )
    }

    /// Total number of hexahedral elements
    #[inline]
    pub const fn element_count(&self) -> usize {
        let (er, ec, el) = self.elements();
        er * ec * el
    }

    /// Node on the lateral boundary or the top surface
    #[inline]
    pub const fn is_dirichlet(&self, i: usize, j: usize, k: usize) -> bool {
        i == 0 || j == 0 || i + 1 == self.nrows || j + 1 == self.ncols || k + 1 == self.nlayers
    }
}

/// One `f64` per mesh node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarField {
    dims: FieldDims,
    data: Vec<f64>,
}

impl ScalarField {
    /// Zero-filled field
    pub fn zeros(dims: FieldDims) -> Self {
        Self::filled(dims, 0.0)
    }

    pub fn filled(dims: FieldDims, value: f64) -> Self {
        ScalarField {
            dims,
            data: vec![value; dims.len()],
        }
    }

    /// Wrap an existing buffer
    ///
    /// # Errors
    /// Returns [`WindError::InvalidInput`] when the buffer length does not match `dims`.
    pub fn from_vec(dims: FieldDims, data: Vec<f64>) -> WindResult<Self> {
        if data.len() != dims.len() {
            return Err(WindError::invalid_input(format!(
                "field buffer holds {} values, mesh has {} nodes",
                data.len(),
                dims.len()
            )));
        }
        Ok(ScalarField { dims, data })
    }

    #[inline]
    pub fn dims(&self) -> FieldDims {
        self.dims
    }

    /// Checked read
    #[inline]
    pub fn get(&self, i: usize, j: usize, k: usize) -> Option<f64> {
        self.dims.checked_index(i, j, k).map(|idx| self.data[idx])
    }

    /// Bounds-checked read
    ///
    /// # Panics
    /// Panics if (i, j, k) is outside the mesh.
    #[inline]
    pub fn at(&self, i: usize, j: usize, k: usize) -> f64 {
        self.data[self.dims.index(i, j, k)]
    }

    /// Bounds-checked write
    ///
    /// # Panics
    /// Panics if (i, j, k) is outside the mesh.
    #[inline]
    pub fn set(&mut self, i: usize, j: usize, k: usize, value: f64) {
        let idx = self.dims.index(i, j, k);
        self.data[idx] = value;
    }

    #[inline]
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<f64> {
        self.data
    }

    /// Contiguous slice of layer `k`
    pub fn layer(&self, k: usize) -> &[f64] {
        let n = self.dims.layer_len();
        &self.data[k * n..(k + 1) * n]
    }

    /// Parallel iterator over mutable layers, ground first
    pub fn par_layers_mut(&mut self) -> rayon::slice::ChunksMut<'_, f64> {
        let n = self.dims.layer_len().max(1);
        self.data.par_chunks_mut(n)
    }

    pub fn fill(&mut self, value: f64) {
        self.data.fill(value);
    }

    /// True when every node holds exactly zero
    pub fn is_all_zero(&self) -> bool {
        self.data.par_iter().all(|v| *v == 0.0)
    }

    pub fn is_all_finite(&self) -> bool {
        self.data.par_iter().all(|v| v.is_finite())
    }

    /// Largest absolute value, zero for an empty field
    pub fn max_abs(&self) -> f64 {
        self.data.par_iter().map(|v| v.abs()).reduce(|| 0.0, f64::max)
    }
}

impl Index<(usize, usize, usize)> for ScalarField {
    type Output = f64;

    fn index(&self, (i, j, k): (usize, usize, usize)) -> &f64 {
        &self.data[self.dims.index(i, j, k)]
    }
}

impl IndexMut<(usize, usize, usize)> for ScalarField {
    fn index_mut(&mut self, (i, j, k): (usize, usize, usize)) -> &mut f64 {
        let idx = self.dims.index(i, j, k);
        &mut self.data[idx]
    }
}

/// Three components per node: u east, v north, w up
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorField {
    pub u: ScalarField,
    pub v: ScalarField,
    pub w: ScalarField,
}

impl VectorField {
    pub fn zeros(dims: FieldDims) -> Self {
        VectorField {
            u: ScalarField::zeros(dims),
            v: ScalarField::zeros(dims),
            w: ScalarField::zeros(dims),
        }
    }

    #[inline]
    pub fn dims(&self) -> FieldDims {
        self.u.dims()
    }

    /// Velocity vector at node (i, j, k)
    ///
    /// # Panics
    /// Panics if (i, j, k) is outside the mesh.
    #[inline]
    pub fn at(&self, i: usize, j: usize, k: usize) -> [f64; 3] {
        let idx = self.dims().index(i, j, k);
        [
            self.u.as_slice()[idx],
            self.v.as_slice()[idx],
            self.w.as_slice()[idx],
        ]
    }

    /// Horizontal speed at node (i, j, k)
    pub fn horizontal_speed(&self, i: usize, j: usize, k: usize) -> f64 {
        let [u, v, _] = self.at(i, j, k);
        u.hypot(v)
    }

    pub fn is_all_zero(&self) -> bool {
        self.u.is_all_zero() && self.v.is_all_zero() && self.w.is_all_zero()
    }

    pub fn is_all_finite(&self) -> bool {
        self.u.is_all_finite() && self.v.is_all_finite() && self.w.is_all_finite()
    }

    /// Largest nodal speed magnitude
    pub fn max_speed(&self) -> f64 {
        self.u
            .as_slice()
            .par_iter()
            .zip(self.v.as_slice().par_iter())
            .zip(self.w.as_slice().par_iter())
            .map(|((u, v), w)| (u * u + v * v + w * w).sqrt())
            .reduce(|| 0.0, f64::max)
    }
}
