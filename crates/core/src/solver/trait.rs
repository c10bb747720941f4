//! Linear solver trait definition

use super::assembly::SparseSystem;
use crate::error::WindResult;
use crate::simulation::{CancellationToken, ProgressSink};

/// Result of one iterative solve
#[derive(Debug, Clone)]
pub struct SolveReport {
    /// Approximate solution, only meaningful when `converged`
    pub solution: Vec<f64>,
    pub iterations: usize,
    /// Final relative residual `‖b - A x‖ / ‖b‖`
    pub residual: f64,
    pub converged: bool,
}

/// Observers of a running solve
#[derive(Clone, Copy)]
pub struct SolveContext<'a> {
    pub progress: &'a dyn ProgressSink,
    pub cancel: &'a CancellationToken,
}

/// Iterative solver for the symmetric mass-conservation system
///
/// Non-convergence is reported through [`SolveReport::converged`]; the
/// `Err` path is reserved for cancellation so callers can fall back to
/// another solver.
pub trait LinearSolver: Send + Sync {
    /// Name for logs and run reports
    fn name(&self) -> &'static str;

    /// Solve `A x = b` from a zero initial guess
    ///
    /// # Errors
    /// Returns [`crate::WindError::Cancelled`] when the token is cancelled
    /// during the iteration.
    fn solve(&self, system: &SparseSystem, ctx: SolveContext<'_>) -> WindResult<SolveReport>;
}
