//! One wind run from configuration to output grids
//!
//! [`WindSimulation`] owns the DEM and configuration of a run and executes
//! the pipeline
//!
//! ```text
//! mesh -> initialize -> stability -> assemble -> solve -> reconstruct
//! ```
//!
//! once, or repeatedly under the [`StationMatchingController`] for point
//! initialization with station matching. Runs execute inside their own rayon
//! pool of `number_cpus` threads; [`WindArmy`] runs many of them side by side.

pub mod army;
pub mod config;
pub mod matching;
pub mod metadata_lock;
pub mod output;
pub mod progress;

pub use army::WindArmy;
pub use config::SimulationConfig;
pub use matching::{MatchOutcome, MatchState, MatchingConfig, MatchingPhase, Pass, StationMatchingController};
pub use metadata_lock::{MetadataGuard, MetadataLock};
pub use output::WindOutput;
pub use progress::{CancellationToken, MessageLevel, ProgressSink, ProgressStage, SilentProgress, TracingProgress};

use crate::atmosphere::{BoundaryLayer, StabilityEstimator, SurfaceProperties};
use crate::core_types::WeatherStation;
use crate::error::WindResult;
use crate::grid::{Mesh, Raster, VectorField};
use crate::init::{make_initializer, InitInputs, InitializationMethod, WeatherModelSource};
use crate::solver::conserve_mass;
use rayon::ThreadPoolBuilder;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, info_span};

/// Summary of how a run reached its field
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    /// Outer passes, 1 for runs without station matching
    pub matching_iterations: usize,
    /// Linear systems assembled
    pub assemblies: usize,
    /// Solver that produced the final field, `None` for a null run
    pub solver: Option<&'static str>,
    pub solver_iterations: usize,
    /// Final relative residual of the last solve
    pub residual: f64,
    /// Input wind was calm everywhere and nothing was solved
    pub null_run: bool,
    pub final_state: MatchingPhase,
}

/// Finished run: the mesh, the corrected field and what produced it
#[derive(Debug, Clone)]
pub struct WindRun {
    pub mesh: Mesh,
    pub wind: VectorField,
    pub boundary_layer: BoundaryLayer,
    pub surface: SurfaceProperties,
    /// Height of the output surface above the roughness elements (m)
    pub output_height: f64,
    pub report: RunReport,
}

impl WindRun {
    /// Speed and direction grids at the configured output height
    ///
    /// # Errors
    /// Returns [`crate::WindError::InvalidInput`] when the output height lies
    /// above the domain.
    pub fn output(&self) -> WindResult<WindOutput> {
        if self.report.null_run {
            return WindOutput::calm(&self.mesh, self.output_height);
        }
        WindOutput::from_field(
            &self.mesh,
            &self.wind,
            &self.boundary_layer,
            &self.surface,
            self.output_height,
        )
    }
}

/// Field and diagnostics of one initialize-and-solve pass
#[derive(Debug)]
struct PassResult {
    wind: VectorField,
    boundary_layer: BoundaryLayer,
    solver: Option<(&'static str, usize, f64)>,
}

impl AsRef<VectorField> for PassResult {
    fn as_ref(&self) -> &VectorField {
        &self.wind
    }
}

/// Observers shared by every stage of a run
#[derive(Clone, Copy)]
struct RunContext<'a> {
    mesh: &'a Mesh,
    progress: &'a dyn ProgressSink,
    cancel: &'a CancellationToken,
}

/// A configured run over one DEM
#[derive(Debug, Clone)]
pub struct WindSimulation {
    config: SimulationConfig,
    dem: Raster,
    surface_source: Option<Arc<dyn WeatherModelSource>>,
    weather_source: Option<Arc<dyn WeatherModelSource>>,
    lock: MetadataLock,
}

impl WindSimulation {
    /// Validate `config` and take ownership of the DEM
    ///
    /// Grid sources named in the configuration are attached; in-memory
    /// sources can be set afterwards.
    ///
    /// # Errors
    /// Returns [`crate::WindError::InvalidInput`] for an invalid configuration.
    pub fn new(config: SimulationConfig, dem: Raster) -> WindResult<Self> {
        let surface_source = config
            .surface_source
            .clone()
            .map(|s| Arc::new(s) as Arc<dyn WeatherModelSource>);
        let weather_source = config
            .weather_source
            .clone()
            .map(|s| Arc::new(s) as Arc<dyn WeatherModelSource>);
        let simulation = WindSimulation {
            config,
            dem,
            surface_source,
            weather_source,
            lock: MetadataLock::global(),
        };
        simulation.check_sources()?;
        Ok(simulation)
    }

    /// Read the DEM named by `config.dem_path` under the metadata lock
    ///
    /// # Errors
    /// Returns [`crate::WindError::InvalidInput`] when no DEM is configured
    /// and propagates read and validation errors.
    pub fn from_config(config: SimulationConfig) -> WindResult<Self> {
        let path = config
            .dem_path
            .clone()
            .ok_or_else(|| crate::WindError::invalid_input("no DEM configured (demPath)"))?;
        let dem = MetadataLock::global().with(|_| Raster::read_esri_ascii(&path))?;
        Self::new(config, dem)
    }

    /// Share a different metadata lock
    pub fn with_lock(mut self, lock: MetadataLock) -> Self {
        self.lock = lock;
        self
    }

    /// Replace the gridded or NinjaFOAM surface source
    ///
    /// # Errors
    /// See [`WindSimulation::new`].
    pub fn with_surface_source(mut self, source: Arc<dyn WeatherModelSource>) -> WindResult<Self> {
        self.surface_source = Some(source);
        self.check_sources()?;
        Ok(self)
    }

    /// Replace the weather-model source
    ///
    /// # Errors
    /// See [`WindSimulation::new`].
    pub fn with_weather_source(mut self, source: Arc<dyn WeatherModelSource>) -> WindResult<Self> {
        self.weather_source = Some(source);
        self.check_sources()?;
        Ok(self)
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn dem(&self) -> &Raster {
        &self.dem
    }

    pub fn lock(&self) -> &MetadataLock {
        &self.lock
    }

    fn check_sources(&self) -> WindResult<()> {
        self.config
            .validate_with_sources(self.surface_source.is_some(), self.weather_source.is_some())
    }

    fn estimator(&self) -> StabilityEstimator {
        StabilityEstimator {
            enabled: self.config.stability_flag,
            user_alpha: self.config.user_alpha,
            time: self.config.time,
            latitude: self.config.latitude,
            longitude: self.config.longitude,
        }
    }

    fn init_inputs<'a>(&'a self, stations: &'a [WeatherStation]) -> InitInputs<'a> {
        let config = &self.config;
        InitInputs {
            input_speed: config.input_speed_mps(),
            input_direction: config.input_direction,
            input_height: config.input_wind_height,
            cloud_cover: config.cloud_cover,
            air_temperature: *config.air_temperature.to_kelvin(),
            surface: config.vegetation.surface(),
            profile: config.profile,
            diurnal: config.diurnal_winds,
            slope_flow: config.slope_flow,
            time: config.time,
            latitude: config.latitude,
            longitude: config.longitude,
            stations,
            surface_source: self.surface_source.as_deref(),
            weather_source: self.weather_source.as_deref(),
            lock: &self.lock,
        }
    }

    /// Initialize from `stations` and, unless the initial field is calm,
    /// solve for the corrected field
    fn pass(&self, ctx: RunContext<'_>, stations: &[WeatherStation]) -> WindResult<Pass<PassResult>> {
        let initializer = make_initializer(self.config.initialization_method);
        let init = initializer.initialize_fields(ctx.mesh, &self.init_inputs(stations))?;
        ctx.progress.progress(ProgressStage::Initialized, 100.0);
        ctx.cancel.check()?;

        let calm_stations = stations.iter().all(|s| s.speed == 0.0 && s.w_speed == 0.0);
        if calm_stations && init.wind.is_all_zero() {
            return Ok(Pass::Null(PassResult {
                wind: init.wind,
                boundary_layer: init.boundary_layer,
                solver: None,
            }));
        }

        let stability = self
            .estimator()
            .estimate(ctx.mesh, &init.surface_speed, &init.cloud_cover, init.exposure.as_ref())?;
        let solved = conserve_mass(
            ctx.mesh,
            &stability,
            &init.wind,
            self.config.solver,
            ctx.progress,
            ctx.cancel,
        )?;
        Ok(Pass::Solved(PassResult {
            wind: solved.wind,
            boundary_layer: init.boundary_layer,
            solver: Some((solved.solver, solved.iterations, solved.residual)),
        }))
    }

    /// Execute the run in a pool of `number_cpus` threads
    ///
    /// # Errors
    /// Returns [`crate::WindError::InvalidInput`] for inconsistent inputs,
    /// [`crate::WindError::SolverDiverged`] or
    /// [`crate::WindError::MatchingExhausted`] for numerical failures,
    /// [`crate::WindError::Cancelled`] on cancellation and
    /// [`crate::WindError::ThreadPool`] when the worker threads cannot start.
    pub fn run(&self, progress: &dyn ProgressSink, cancel: &CancellationToken) -> WindResult<WindRun> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(self.config.number_cpus)
            .build()?;
        pool.install(|| self.run_in_pool(progress, cancel))
    }

    fn run_in_pool(&self, progress: &dyn ProgressSink, cancel: &CancellationToken) -> WindResult<WindRun> {
        let config = &self.config;
        let _span = info_span!("wind_run", method = ?config.initialization_method).entered();

        let mesh = Mesh::build_standard(&self.dem, &config.mesh_config())?;
        progress.progress(ProgressStage::MeshBuilt, 100.0);
        cancel.check()?;
        let ctx = RunContext {
            mesh: &mesh,
            progress,
            cancel,
        };

        let point = config.initialization_method == InitializationMethod::Point;
        let stations = if point { config.stations_si() } else { Vec::new() };
        let mut assemblies = 0;
        let (result, matching_iterations, null_run, final_state) = if point && config.match_wx_stations {
            let matching = MatchingConfig {
                tolerance: config.match_tolerance,
                relaxation: config.outer_relaxation,
                max_iterations: config.max_matching_iterations,
                roughness_height: config.vegetation.surface().roughness_height,
            };
            let mut controller = StationMatchingController::new(&mesh, &stations, matching);
            let outcome = controller.run(progress, cancel, |trial| {
                let pass = self.pass(ctx, trial)?;
                if matches!(pass, Pass::Solved(_)) {
                    assemblies += 1;
                }
                Ok(pass)
            })?;
            (outcome.pass, outcome.iterations, outcome.null_run, outcome.phase)
        } else {
            match self.pass(ctx, &stations)? {
                Pass::Null(result) => (result, 1, true, MatchingPhase::Converged),
                Pass::Solved(result) => {
                    assemblies += 1;
                    (result, 1, false, MatchingPhase::Converged)
                }
            }
        };
        if null_run {
            info!("input wind is calm everywhere, returning a calm field");
        }

        let (solver, solver_iterations, residual) = match result.solver {
            Some((name, iterations, residual)) => (Some(name), iterations, residual),
            None => (None, 0, 0.0),
        };
        let report = RunReport {
            matching_iterations,
            assemblies,
            solver,
            solver_iterations,
            residual,
            null_run,
            final_state,
        };
        progress.progress(ProgressStage::Finished, 100.0);
        info!(
            matching_iterations,
            assemblies,
            solver = solver.unwrap_or("none"),
            max_speed = result.wind.max_speed(),
            "wind run finished"
        );
        Ok(WindRun {
            mesh,
            wind: result.wind,
            boundary_layer: result.boundary_layer,
            surface: config.vegetation.surface(),
            output_height: config.output_wind_height,
            report,
        })
    }
}
