//! Mass-conservation solver
//!
//! Assembly of the weighted Poisson system, its iterative solution and the
//! reconstruction of the corrected wind field. [`conserve_mass`] runs the
//! three steps for one initial field.

pub mod assembly;
pub mod linear;
pub mod preconditioner;
pub mod reconstruct;
#[allow(clippy::module_name_repetitions)]
mod r#trait;

pub use assembly::{correction_weights, MassConservationBuilder, SparseSystem};
pub use linear::{solve_with_fallback, FallbackSolve, Minres, Pcg, SolverConfig};
pub use preconditioner::Preconditioner;
pub use r#trait::{LinearSolver, SolveContext, SolveReport};
pub use reconstruct::{divergence, element_divergence, rms_divergence, FieldReconstructor};

use crate::atmosphere::StabilityField;
use crate::error::WindResult;
use crate::grid::{Mesh, VectorField};
use crate::simulation::{CancellationToken, ProgressSink, ProgressStage};
use tracing::debug;

/// Divergence-free field produced by one solve
#[derive(Debug, Clone)]
pub struct SolvedField {
    pub wind: VectorField,
    /// Solver that converged
    pub solver: &'static str,
    pub iterations: usize,
    /// Final relative residual
    pub residual: f64,
}

/// Assemble, solve and reconstruct for one initial field
///
/// Checks for cancellation after assembly and after the solve.
///
/// # Errors
/// Returns [`crate::WindError::SolverDiverged`] when no solver converges,
/// [`crate::WindError::Cancelled`] on cancellation, or
/// [`crate::WindError::InvalidInput`] for inconsistent inputs.
pub fn conserve_mass(
    mesh: &Mesh,
    stability: &StabilityField,
    initial: &VectorField,
    config: SolverConfig,
    progress: &dyn ProgressSink,
    cancel: &CancellationToken,
) -> WindResult<SolvedField> {
    let system = MassConservationBuilder::new(mesh, stability)?.assemble(initial)?;
    progress.progress(ProgressStage::Assembled, 100.0);
    cancel.check()?;

    let FallbackSolve { report, solver } = solve_with_fallback(&system, config, SolveContext { progress, cancel })?;
    progress.progress(ProgressStage::Solved, 100.0);
    cancel.check()?;

    let wind = FieldReconstructor::new(mesh, stability)?.reconstruct(initial, &report.solution)?;
    debug!(max_speed = wind.max_speed(), "corrected field reconstructed");
    Ok(SolvedField {
        wind,
        solver,
        iterations: report.iterations,
        residual: report.residual,
    })
}
