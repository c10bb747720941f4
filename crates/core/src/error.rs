//! Error taxonomy for wind runs
//!
//! Every fallible operation in the crate returns [`WindResult`]. Fatal run
//! failures (`InvalidInput`, `SolverDiverged`, `MatchingExhausted`) abort the
//! run before any output is published; `Cancelled` is the cooperative abort
//! path and is not a failure.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the crate
pub type WindResult<T> = Result<T, WindError>;

/// Number of mesh cells a station influence radius should span when matching.
pub const RECOMMENDED_RADIUS_CELLS: f64 = 10.0;

/// Wind solver error type
#[derive(Error, Debug)]
pub enum WindError {
    /// Inputs or stations outside the mesh footprint, malformed configuration
    #[error("invalid input: {message}")]
    InvalidInput {
        /// What was wrong with the input
        message: String,
    },

    /// Both the conjugate gradient solve and the MINRES fallback failed
    #[error(
        "linear solver diverged: {message} (last attempt: {iterations} iterations, residual {residual:.3e})"
    )]
    SolverDiverged {
        /// Which solvers were tried and why they stopped
        message: String,
        /// Iterations performed by the last attempt
        iterations: usize,
        /// Relative residual reached by the last attempt
        residual: f64,
    },

    /// The station matching loop hit its iteration cap
    #[error(
        "station matching did not converge after {iterations} iterations; mesh resolution is {mesh_resolution:.2} m and the smallest influence radius is {}; \
         the radius of influence should span at least {} mesh cells ({:.2} m)",
        format_radius(.min_radius, .mesh_resolution),
        RECOMMENDED_RADIUS_CELLS,
        recommended_radius(.mesh_resolution)
    )]
    MatchingExhausted {
        /// Matching iterations performed
        iterations: usize,
        /// Horizontal mesh resolution in meters
        mesh_resolution: f64,
        /// Smallest positive station influence radius in meters, if any station is bounded
        min_radius: Option<f64>,
    },

    /// Cooperative cancellation was requested
    #[error("run cancelled")]
    Cancelled,

    /// I/O failure while reading inputs or writing grids
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Malformed grid file
    #[error("parse error in {path} line {line}: {message}")]
    Parse {
        /// File involved
        path: PathBuf,
        /// 1-based line number
        line: usize,
        /// Description
        message: String,
    },

    /// Malformed JSON configuration
    #[error("configuration error: {0}")]
    Config(#[from] serde_json::Error),

    /// A worker pool for a run could not be started
    #[error("failed to start worker threads: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl WindError {
    /// Build an [`WindError::InvalidInput`] from any message
    pub fn invalid_input(message: impl Into<String>) -> Self {
        WindError::InvalidInput {
            message: message.into(),
        }
    }

    /// Wrap an I/O error with the path that produced it
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        WindError::Io {
            path: path.into(),
            source,
        }
    }

    /// True for the cooperative abort path
    pub fn is_cancellation(&self) -> bool {
        matches!(self, WindError::Cancelled)
    }
}

#[allow(clippy::ref_option)]
fn format_radius(min_radius: &Option<f64>, mesh_resolution: &f64) -> String {
    let mesh_resolution = *mesh_resolution;
    match *min_radius {
        Some(radius) if mesh_resolution > 0.0 => {
            format!("{radius:.2} m ({:.2} cells)", radius / mesh_resolution)
        }
        Some(radius) => format!("{radius:.2} m"),
        None => "unbounded".to_string(),
    }
}

fn recommended_radius(mesh_resolution: &f64) -> f64 {
    RECOMMENDED_RADIUS_CELLS * *mesh_resolution
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matching_exhausted_message_has_diagnostics() {
        let err = WindError::MatchingExhausted {
            iterations: 150,
            mesh_resolution: 100.0,
            min_radius: Some(40.0),
        };
        let msg = err.to_string();
        assert!(msg.contains("150"), "missing iteration count: {msg}");
        assert!(msg.contains("100.00 m"), "missing mesh resolution: {msg}");
        assert!(msg.contains("40.00 m"), "missing radius: {msg}");
        assert!(msg.contains("0.40 cells"), "missing ratio: {msg}");
        assert!(msg.contains("1000.00 m"), "missing recommendation: {msg}");
    }

    #[test]
    fn test_unbounded_radius_message() {
        let err = WindError::MatchingExhausted {
            iterations: 3,
            mesh_resolution: 50.0,
            min_radius: None,
        };
        assert!(err.to_string().contains("unbounded"));
    }

    #[test]
    fn test_cancellation_flag() {
        assert!(WindError::Cancelled.is_cancellation());
        assert!(!WindError::invalid_input("x").is_cancellation());
    }
}
