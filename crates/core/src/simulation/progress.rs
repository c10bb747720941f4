//! Progress reporting and cooperative cancellation

use crate::error::{WindError, WindResult};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Severity of a status message
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MessageLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// Checkpoint in a run at which progress is published
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgressStage {
    MeshBuilt,
    Initialized,
    Assembled,
    /// Inside a linear solve
    Solving,
    Solved,
    /// Outer station-matching iteration (1-based)
    MatchingIteration(usize),
    Finished,
}

/// Receiver of status messages and percent-complete notifications
///
/// Shared between the rayon workers of a run, hence `Send + Sync`.
pub trait ProgressSink: Send + Sync {
    fn message(&self, level: MessageLevel, text: &str);

    /// `percent` is in [0, 100]
    fn progress(&self, stage: ProgressStage, percent: f64);
}

/// Default sink forwarding everything to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProgress {
    /// Run number within an army
    pub run: usize,
}

impl TracingProgress {
    pub fn new(run: usize) -> Self {
        TracingProgress { run }
    }
}

impl ProgressSink for TracingProgress {
    fn message(&self, level: MessageLevel, text: &str) {
        match level {
            MessageLevel::Debug => debug!(run = self.run, "{}", text),
            MessageLevel::Info => info!(run = self.run, "{}", text),
            MessageLevel::Warning => warn!(run = self.run, "{}", text),
            MessageLevel::Error => error!(run = self.run, "{}", text),
        }
    }

    fn progress(&self, stage: ProgressStage, percent: f64) {
        match stage {
            ProgressStage::Solving => debug!(run = self.run, percent, "solver progress"),
            _ => info!(run = self.run, ?stage, percent, "progress"),
        }
    }
}

/// Sink that drops everything
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentProgress;

impl ProgressSink for SilentProgress {
    fn message(&self, _level: MessageLevel, _text: &str) {}
    fn progress(&self, _stage: ProgressStage, _percent: f64) {}
}

/// Linear-solver residual mapped to an approximate time percentage
///
/// The residual percent `100 - 100 (res - tol) / (res0 - tol)` grows slowly
/// at first, so it is bent with `1.8 e^(0.0401 p)` and capped at 99.
pub fn solver_time_percent(residual: f64, initial_residual: f64, tolerance: f64) -> f64 {
    let span = initial_residual - tolerance;
    if span <= 0.0 || !span.is_finite() {
        return 99.0;
    }
    let p = (100.0 - 100.0 * (residual - tolerance) / span).clamp(0.0, 100.0);
    (1.8 * (0.0401 * p).exp()).min(99.0)
}

/// Station-matching mismatch mapped to an approximate time percentage
pub fn matching_time_percent(difference: f64, initial_difference: f64, tolerance: f64) -> f64 {
    let span = initial_difference - tolerance;
    let p = if span > 0.0 && span.is_finite() {
        (100.0 - 100.0 * (difference - tolerance) / span).clamp(0.0, 100.0)
    } else {
        100.0
    };
    let x = 1.0 - p / 100.0;
    const EXPONENT: f64 = 0.46371;
    let t = -100.0 * (2f64.powf(EXPONENT) * (x / (1.0 + x * x)).powf(EXPONENT) - 1.0);
    t.min(99.0)
}

/// Cooperative cancellation flag, cheap to clone and share across runs
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Checkpoint
    ///
    /// # Errors
    /// Returns [`WindError::Cancelled`] once [`CancellationToken::cancel`] was called.
    #[inline]
    pub fn check(&self) -> WindResult<()> {
        if self.is_cancelled() {
            Err(WindError::Cancelled)
        } else {
            Ok(())
        }
    }
}
