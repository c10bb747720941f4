//! Grid-based data structures: rasters, terrain, the solver mesh and nodal fields

pub mod element;
pub mod field;
pub mod mesh;
pub mod raster;
pub mod terrain;

// Re-export main types
pub use element::HexElement;
pub use field::{FieldDims, ScalarField, VectorField};
pub use mesh::{Mesh, MeshConfig, MeshResolution};
pub use raster::{Interpolation, PointSample, Raster, RasterHeader};
pub use terrain::TerrainAnalysis;
