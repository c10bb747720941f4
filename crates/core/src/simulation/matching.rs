//! Outer loop adjusting station inputs until the solved field reproduces them
//!
//! Each pass re-initializes from trial station values, re-solves and samples
//! the corrected field at the stations. Trial u/v/w are moved toward the
//! observations with a relaxed secant step; a step that made a component
//! worse is replaced by a half step from the last accepted input.

use super::progress::{matching_time_percent, CancellationToken, MessageLevel, ProgressSink, ProgressStage};
use crate::core_types::{smallest_influence_radius, speed_direction_to_uv, uv_to_speed_direction, WeatherStation};
use crate::error::{WindError, WindResult};
use crate::grid::{Mesh, VectorField};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Phase of the matching state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MatchingPhase {
    /// Building U0 and the weighting for the current trial
    #[default]
    Init,
    Solve,
    Evaluate,
    /// Every station within tolerance
    Converged,
    /// Trial inputs adjusted, another pass follows
    Retry,
    /// Iteration cap reached without convergence
    Exhausted,
}

/// Per-station search state, owned by one controller
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchState {
    /// Consecutive half-step retries for u, v and w
    pub tries: [u32; 3],
    /// Input fed to the next pass
    ///
    /// Only u and v drive the point initialization and the acceptance test.
    /// w is stepped alongside for the debug trace and for the calm-input
    /// check, so a vertical mismatch never holds up convergence.
    pub trial: [f64; 3],
    /// Last accepted input
    pub previous_input: [f64; 3],
    /// Field value produced by `previous_input`
    pub previous_output: [f64; 3],
}

impl MatchState {
    fn observed(station: &WeatherStation) -> Self {
        let (u, v) = station.uv();
        let trial = [u, v, station.w_speed];
        MatchState {
            tries: [0; 3],
            trial,
            previous_input: trial,
            previous_output: trial,
        }
    }

    /// Move every component toward `truth` given the field value `output`
    fn step(&mut self, truth: [f64; 3], output: [f64; 3], iteration: usize, relaxation: f64) -> bool {
        let mut retried = false;
        for c in 0..3 {
            let worse = (output[c] - truth[c]).abs() > (self.previous_output[c] - truth[c]).abs();
            if worse && iteration > 1 && self.tries[c] < 1 {
                self.tries[c] += 1;
                let scale = f64::from(1u32 << self.tries[c]);
                self.trial[c] =
                    self.previous_input[c] + relaxation * (truth[c] - self.previous_output[c]) / scale;
                retried = true;
            } else {
                self.tries[c] = 0;
                self.previous_input[c] = self.trial[c];
                self.previous_output[c] = output[c];
                self.trial[c] += relaxation * (truth[c] - output[c]);
            }
        }
        retried
    }
}

/// Settings of the outer loop
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchingConfig {
    /// Acceptance half-width on u and v (m/s)
    pub tolerance: f64,
    pub relaxation: f64,
    pub max_iterations: usize,
    /// Roughness element height added to the station sensor height (m)
    pub roughness_height: f64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        MatchingConfig {
            tolerance: 0.22,
            relaxation: 1.0,
            max_iterations: 150,
            roughness_height: 0.0,
        }
    }
}

/// Result of one initialize-and-solve pass
#[derive(Debug)]
pub enum Pass<T> {
    /// The initial field was identically zero and nothing was solved
    Null(T),
    Solved(T),
}

/// Final pass and how the loop ended
#[derive(Debug)]
pub struct MatchOutcome<T> {
    pub pass: T,
    /// Passes run, 1-based
    pub iterations: usize,
    pub phase: MatchingPhase,
    pub null_run: bool,
}

/// Comparison of a solved field with the observations
#[derive(Debug, Clone, Copy, PartialEq)]
struct Evaluation {
    matched: bool,
    /// Largest |observed - modelled| over u and v
    max_difference: f64,
}

/// Drives [`Pass`]es until the stations match or the cap is hit
#[derive(Debug)]
pub struct StationMatchingController<'a> {
    mesh: &'a Mesh,
    stations: &'a [WeatherStation],
    config: MatchingConfig,
    states: Vec<MatchState>,
    phase: MatchingPhase,
    iteration: usize,
    initial_difference: f64,
}

impl<'a> StationMatchingController<'a> {
    /// `stations` must already be in SI units
    pub fn new(mesh: &'a Mesh, stations: &'a [WeatherStation], config: MatchingConfig) -> Self {
        StationMatchingController {
            mesh,
            stations,
            config,
            states: stations.iter().map(MatchState::observed).collect(),
            phase: MatchingPhase::Init,
            iteration: 0,
            initial_difference: 0.0,
        }
    }

    pub fn phase(&self) -> MatchingPhase {
        self.phase
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn states(&self) -> &[MatchState] {
        &self.states
    }

    /// Stations carrying the current trial inputs
    pub fn trial_stations(&self) -> Vec<WeatherStation> {
        self.stations
            .iter()
            .zip(&self.states)
            .map(|(station, state)| {
                let (speed, direction) = uv_to_speed_direction(state.trial[0], state.trial[1]);
                WeatherStation {
                    speed,
                    direction,
                    w_speed: state.trial[2],
                    ..station.clone()
                }
            })
            .collect()
    }

    /// Field at a station's sensor, `None` when it is off the mesh
    fn sample_at(&self, station: &WeatherStation, wind: &VectorField) -> Option<[f64; 3]> {
        let (x, y) = self.mesh.to_local(station.x, station.y);
        let ground = self.mesh.ground_at(x, y)?;
        let z = station.height + self.config.roughness_height + ground;
        self.mesh.sample(wind, x, y, z)
    }

    /// Compare `wind` with the observations and prepare the next trial
    fn evaluate(&mut self, wind: &VectorField) -> Evaluation {
        let mut matched = true;
        let mut max_difference: f64 = 0.0;
        for (index, station) in self.stations.iter().enumerate() {
            let Some(output) = self.sample_at(station, wind) else {
                debug!(station = %station.name, "station outside the mesh, skipped");
                continue;
            };
            let (true_u, true_v) = speed_direction_to_uv(station.speed, station.direction);
            let truth = [true_u, true_v, station.w_speed];
            let du = true_u - output[0];
            let dv = true_v - output[1];
            if du.abs() > self.config.tolerance || dv.abs() > self.config.tolerance {
                matched = false;
            }
            max_difference = max_difference.max(du.abs()).max(dv.abs());

            let state = &mut self.states[index];
            debug!(
                station = %station.name,
                u_diff = du,
                v_diff = dv,
                w_diff = truth[2] - output[2],
                try_u = state.trial[0],
                try_v = state.trial[1],
                "station match check"
            );
            if state.step(truth, output, self.iteration, self.config.relaxation) {
                debug!(station = %station.name, "last step was worse, trying half of it");
            }
        }
        Evaluation { matched, max_difference }
    }

    fn exhausted(&self) -> WindError {
        WindError::MatchingExhausted {
            iterations: self.iteration,
            mesh_resolution: self.mesh.resolution(),
            min_radius: smallest_influence_radius(self.stations),
        }
    }

    /// Run passes until convergence
    ///
    /// `pass` receives the trial stations, builds U0 and the weighting from
    /// them and returns the corrected field (or [`Pass::Null`] when there is
    /// nothing to solve). Per-station counters are reset here, once.
    ///
    /// # Errors
    /// Returns [`WindError::MatchingExhausted`] when the iteration cap is hit,
    /// [`WindError::Cancelled`] on cancellation, and propagates pass errors.
    pub fn run<T: AsRef<VectorField>>(
        &mut self,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
        mut pass: impl FnMut(&[WeatherStation]) -> WindResult<Pass<T>>,
    ) -> WindResult<MatchOutcome<T>> {
        self.states = self.stations.iter().map(MatchState::observed).collect();
        self.iteration = 0;
        self.initial_difference = 0.0;
        info!(
            stations = self.stations.len(),
            tolerance = self.config.tolerance,
            max_iterations = self.config.max_iterations,
            "starting station matching"
        );

        loop {
            self.iteration += 1;
            cancel.check()?;
            progress.message(
                MessageLevel::Debug,
                &format!("matching loop iteration {}", self.iteration),
            );

            self.phase = MatchingPhase::Init;
            let trial = self.trial_stations();
            self.phase = MatchingPhase::Solve;
            let solved = match pass(&trial)? {
                Pass::Null(result) => {
                    info!("all input speeds are zero, skipping station matching");
                    self.phase = MatchingPhase::Converged;
                    return Ok(MatchOutcome {
                        pass: result,
                        iterations: self.iteration,
                        phase: self.phase,
                        null_run: true,
                    });
                }
                Pass::Solved(result) => result,
            };

            self.phase = MatchingPhase::Evaluate;
            let evaluation = self.evaluate(solved.as_ref());
            if self.iteration == 1 {
                self.initial_difference = evaluation.max_difference;
            }
            progress.progress(
                ProgressStage::MatchingIteration(self.iteration),
                matching_time_percent(evaluation.max_difference, self.initial_difference, self.config.tolerance),
            );

            if evaluation.matched {
                self.phase = MatchingPhase::Converged;
                info!(
                    iterations = self.iteration,
                    max_difference = evaluation.max_difference,
                    "stations matched"
                );
                return Ok(MatchOutcome {
                    pass: solved,
                    iterations: self.iteration,
                    phase: self.phase,
                    null_run: false,
                });
            }
            if self.iteration >= self.config.max_iterations {
                self.phase = MatchingPhase::Exhausted;
                warn!(
                    iterations = self.iteration,
                    max_difference = evaluation.max_difference,
                    "station matching did not converge"
                );
                return Err(self.exhausted());
            }
            self.phase = MatchingPhase::Retry;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{terrain, MeshConfig, MeshResolution};
    use crate::simulation::progress::SilentProgress;
    use approx::assert_relative_eq;

    #[derive(Debug)]
    struct Field(VectorField);

    impl AsRef<VectorField> for Field {
        fn as_ref(&self) -> &VectorField {
            &self.0
        }
    }

    fn mesh() -> Mesh {
        let dem = terrain::flat(6, 6, 100.0, 0.0).unwrap();
        let config = MeshConfig {
            resolution: MeshResolution::Custom(100.0),
            vertical_layers: 8,
            ..MeshConfig::default()
        };
        Mesh::build_standard(&dem, &config).unwrap()
    }

    /// Uniform field scaled by `gain` from the first trial station
    fn uniform(mesh: &Mesh, stations: &[WeatherStation], gain: f64) -> Field {
        let (u, v) = stations[0].uv();
        let mut wind = VectorField::zeros(mesh.dims());
        wind.u.fill(gain * u);
        wind.v.fill(gain * v);
        Field(wind)
    }

    #[test]
    fn test_step_moves_toward_observation() {
        let mut state = MatchState::observed(&WeatherStation::new("a", 0.0, 0.0, 10.0, 5.0, 270.0));
        assert_relative_eq!(state.trial[0], 5.0, epsilon = 1e-12);
        state.step([5.0, 0.0, 0.0], [4.0, 0.0, 0.0], 1, 1.0);
        assert_relative_eq!(state.trial[0], 6.0, epsilon = 1e-12);
        assert_eq!(state.previous_output[0], 4.0);

        // Worse than last time: half step from the accepted input
        assert!(state.step([5.0, 0.0, 0.0], [3.0, 0.0, 0.0], 2, 1.0));
        assert_eq!(state.tries[0], 1);
        assert_relative_eq!(state.trial[0], 5.5, epsilon = 1e-12);

        // Still worse but already retried once: full step, counter reset
        assert!(!state.step([5.0, 0.0, 0.0], [3.5, 0.0, 0.0], 3, 1.0));
        assert_eq!(state.tries[0], 0);
        assert_relative_eq!(state.trial[0], 7.0, epsilon = 1e-12);
    }

    #[test]
    fn test_linear_response_converges() {
        let mesh = mesh();
        let stations = [WeatherStation::new("a", 300.0, 300.0, 10.0, 5.0, 270.0)];
        let mut controller = StationMatchingController::new(&mesh, &stations, MatchingConfig::default());
        let outcome = controller
            .run(&SilentProgress, &CancellationToken::new(), |trial| {
                Ok(Pass::Solved(uniform(&mesh, trial, 0.8)))
            })
            .unwrap();
        assert_eq!(outcome.phase, MatchingPhase::Converged);
        assert!(!outcome.null_run);
        assert!(outcome.iterations > 1 && outcome.iterations < 10);
        let speed = outcome.pass.0.horizontal_speed(2, 2, 3);
        assert!((speed - 5.0).abs() <= 0.22 * 2f64.sqrt());
    }

    #[test]
    fn test_vertical_mismatch_does_not_block_convergence() {
        let mesh = mesh();
        let stations = [WeatherStation {
            w_speed: 2.0,
            ..WeatherStation::new("a", 300.0, 300.0, 10.0, 5.0, 270.0)
        }];
        let mut controller = StationMatchingController::new(&mesh, &stations, MatchingConfig::default());
        let outcome = controller
            .run(&SilentProgress, &CancellationToken::new(), |trial| {
                Ok(Pass::Solved(uniform(&mesh, trial, 1.0)))
            })
            .unwrap();
        assert_eq!(outcome.phase, MatchingPhase::Converged);
        assert_eq!(outcome.iterations, 1);
        // The field carried no w, so the trial w stepped up by the full gap
        assert_relative_eq!(controller.states()[0].trial[2], 4.0, epsilon = 1e-12);
        assert_relative_eq!(controller.trial_stations()[0].w_speed, 4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_unresponsive_field_exhausts() {
        let mesh = mesh();
        let stations = [WeatherStation::new("a", 300.0, 300.0, 10.0, 5.0, 270.0).with_influence_radius(30.0)];
        let config = MatchingConfig {
            max_iterations: 7,
            ..MatchingConfig::default()
        };
        let mut controller = StationMatchingController::new(&mesh, &stations, config);
        let mut passes = 0;
        let err = controller
            .run(&SilentProgress, &CancellationToken::new(), |_| {
                passes += 1;
                Ok(Pass::Solved(Field(VectorField::zeros(mesh.dims()))))
            })
            .unwrap_err();
        assert_eq!(passes, 7);
        assert_eq!(controller.phase(), MatchingPhase::Exhausted);
        match err {
            WindError::MatchingExhausted {
                iterations,
                mesh_resolution,
                min_radius,
            } => {
                assert_eq!(iterations, 7);
                assert_eq!(mesh_resolution, 100.0);
                assert_eq!(min_radius, Some(30.0));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_null_pass_short_circuits() {
        let mesh = mesh();
        let stations = [WeatherStation::new("a", 300.0, 300.0, 10.0, 0.0, 0.0)];
        let mut controller = StationMatchingController::new(&mesh, &stations, MatchingConfig::default());
        let outcome = controller
            .run(&SilentProgress, &CancellationToken::new(), |_| {
                Ok(Pass::Null(Field(VectorField::zeros(mesh.dims()))))
            })
            .unwrap();
        assert!(outcome.null_run);
        assert_eq!(outcome.iterations, 1);
    }

    #[test]
    fn test_stations_off_mesh_are_skipped() {
        let mesh = mesh();
        let stations = [
            WeatherStation::new("in", 300.0, 300.0, 10.0, 5.0, 270.0),
            WeatherStation::new("out", 5000.0, 5000.0, 10.0, 50.0, 90.0),
        ];
        let mut controller = StationMatchingController::new(&mesh, &stations, MatchingConfig::default());
        let outcome = controller
            .run(&SilentProgress, &CancellationToken::new(), |trial| {
                Ok(Pass::Solved(uniform(&mesh, trial, 1.0)))
            })
            .unwrap();
        assert_eq!(outcome.iterations, 1);
        assert_eq!(controller.states()[1].trial, MatchState::observed(&stations[1]).trial);
    }

    #[test]
    fn test_cancellation_stops_the_loop() {
        let mesh = mesh();
        let stations = [WeatherStation::new("a", 300.0, 300.0, 10.0, 5.0, 270.0)];
        let cancel = CancellationToken::new();
        let mut controller = StationMatchingController::new(&mesh, &stations, MatchingConfig::default());
        let err = controller
            .run(&SilentProgress, &cancel, |_| {
                cancel.cancel();
                Ok(Pass::Solved(Field(VectorField::zeros(mesh.dims()))))
            })
            .unwrap_err();
        assert!(err.is_cancellation());
        assert_eq!(controller.iteration(), 2);
    }
}
