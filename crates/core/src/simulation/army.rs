//! Batches of independent runs executed side by side
//!
//! Each run gets one thread of an army-wide pool sized to the run count and
//! spins up its own pool of `number_cpus` workers inside it. Runs share only
//! the metadata lock and the cancellation token.

use super::progress::{CancellationToken, ProgressSink, TracingProgress};
use super::{MetadataLock, WindRun, WindSimulation};
use crate::error::WindResult;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use tracing::{error, info};

/// An ordered set of runs
#[derive(Debug, Clone)]
pub struct WindArmy {
    runs: Vec<WindSimulation>,
    lock: MetadataLock,
}

impl Default for WindArmy {
    fn default() -> Self {
        Self::new()
    }
}

impl WindArmy {
    /// An army whose runs share `MetadataLock::global()`
    pub fn new() -> Self {
        WindArmy {
            runs: Vec::new(),
            lock: MetadataLock::global(),
        }
    }

    /// Add a run; it is switched to the army's metadata lock
    pub fn push(&mut self, run: WindSimulation) {
        self.runs.push(run.with_lock(self.lock.clone()));
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn runs(&self) -> &[WindSimulation] {
        &self.runs
    }

    /// Run everything, reporting through `tracing`
    ///
    /// # Errors
    /// Returns [`crate::WindError::ThreadPool`] when the army pool cannot
    /// start. Failures of individual runs are returned in their slot.
    pub fn run(&self, cancel: &CancellationToken) -> WindResult<Vec<WindResult<WindRun>>> {
        self.run_with(cancel, TracingProgress::new)
    }

    /// Run everything with a sink per run, built from the run index
    ///
    /// Results keep the order in which runs were pushed.
    ///
    /// # Errors
    /// See [`WindArmy::run`].
    pub fn run_with<S: ProgressSink>(
        &self,
        cancel: &CancellationToken,
        make_sink: impl Fn(usize) -> S + Sync,
    ) -> WindResult<Vec<WindResult<WindRun>>> {
        if self.runs.is_empty() {
            return Ok(Vec::new());
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(self.runs.len())
            .thread_name(|i| format!("wind-run-{i}"))
            .build()?;
        info!(runs = self.runs.len(), "starting army");

        let results: Vec<WindResult<WindRun>> = pool.install(|| {
            self.runs
                .par_iter()
                .enumerate()
                .map(|(index, simulation)| {
                    let sink = make_sink(index);
                    let result = simulation.run(&sink, cancel);
                    match &result {
                        Ok(run) => info!(run = index, assemblies = run.report.assemblies, "run finished"),
                        Err(e) if e.is_cancellation() => info!(run = index, "run cancelled"),
                        Err(e) => error!(run = index, error = %e, "run failed"),
                    }
                    result
                })
                .collect()
        });
        Ok(results)
    }
}
