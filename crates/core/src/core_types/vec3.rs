//! Vector type alias for 3D positions and velocities.

use nalgebra::Vector3;

/// 3D vector type for mesh coordinates, gradients and wind vectors.
///
/// This is a simple alias for `nalgebra::Vector3<f64>`; the solver works in
/// double precision throughout.
pub type Vec3 = Vector3<f64>;
