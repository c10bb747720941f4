//! End-to-end properties of the mass-conservation pipeline

use approx::assert_relative_eq;
use std::sync::Mutex;
use windfield_core::atmosphere::{ProfileKind, StabilityField, WindProfile};
use windfield_core::grid::{terrain, FieldDims};
use windfield_core::init::InitInputs;
use windfield_core::simulation::{MessageLevel, ProgressStage, SilentProgress};
use windfield_core::solver::{
    element_divergence, rms_divergence, solve_with_fallback, FieldReconstructor, MassConservationBuilder,
    SolveContext, SolverConfig,
};
use windfield_core::{
    CancellationToken, FieldInitializer, Mesh, MeshResolution, MetadataLock, ProgressSink, SimulationConfig,
    VectorField, WindError, WindSimulation,
};

#[ctor::ctor]
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn hill_config() -> SimulationConfig {
    SimulationConfig {
        mesh_resolution: MeshResolution::Custom(100.0),
        vertical_layers: 10,
        input_speed: 5.0,
        input_direction: 270.0,
        ..SimulationConfig::default()
    }
}

fn hill_mesh(config: &SimulationConfig) -> Mesh {
    let dem = terrain::single_hill(16, 16, 100.0, 1000.0, 250.0, 400.0).unwrap();
    Mesh::build_standard(&dem, &config.mesh_config()).unwrap()
}

fn domain_average_inputs<'a>(config: &SimulationConfig, lock: &'a MetadataLock) -> InitInputs<'a> {
    InitInputs {
        input_speed: config.input_speed,
        input_direction: config.input_direction,
        input_height: config.input_wind_height,
        cloud_cover: config.cloud_cover,
        air_temperature: 293.15,
        surface: config.vegetation.surface(),
        profile: config.profile,
        diurnal: false,
        slope_flow: config.slope_flow,
        time: config.time,
        latitude: config.latitude,
        longitude: config.longitude,
        stations: &[],
        surface_source: None,
        weather_source: None,
        lock,
    }
}

/// Records the non-solver stages it sees
#[derive(Default)]
struct StageRecorder {
    stages: Mutex<Vec<ProgressStage>>,
}

impl ProgressSink for StageRecorder {
    fn message(&self, _level: MessageLevel, _text: &str) {}

    fn progress(&self, stage: ProgressStage, _percent: f64) {
        if stage != ProgressStage::Solving {
            self.stages.lock().unwrap().push(stage);
        }
    }
}

/// Cancels its token as soon as a system has been assembled
struct CancelAfterAssembly {
    token: CancellationToken,
}

impl ProgressSink for CancelAfterAssembly {
    fn message(&self, _level: MessageLevel, _text: &str) {}

    fn progress(&self, stage: ProgressStage, _percent: f64) {
        if stage == ProgressStage::Assembled {
            self.token.cancel();
        }
    }
}

#[test]
fn test_calm_input_is_a_null_run() {
    let config = SimulationConfig {
        input_speed: 0.0,
        ..hill_config()
    };
    let dem = terrain::single_hill(12, 12, 100.0, 1000.0, 200.0, 300.0).unwrap();
    let run = WindSimulation::new(config, dem)
        .unwrap()
        .run(&SilentProgress, &CancellationToken::new())
        .unwrap();

    assert!(run.report.null_run);
    assert_eq!(run.report.assemblies, 0);
    assert_eq!(run.report.solver, None);
    assert!(run.wind.is_all_zero());

    let output = run.output().unwrap();
    assert!(output.speed.data().iter().all(|&s| s == 0.0));
}

/// RMS element divergence per element layer, away from the lateral walls
fn interior_layer_divergence(mesh: &Mesh, field: &VectorField) -> Vec<f64> {
    let (er, ec, el) = mesh.dims().elements();
    let per_element = element_divergence(mesh, field).unwrap();
    (0..el)
        .map(|ek| {
            let mut sum = 0.0;
            let mut count = 0.0;
            for ei in 1..er - 1 {
                for ej in 1..ec - 1 {
                    let d = per_element[ek * er * ec + ei * ec + ej];
                    sum += d * d;
                    count += 1.0;
                }
            }
            (sum / count).sqrt()
        })
        .collect()
}

/// Solve over the hill and return the initial and corrected fields
fn hill_solution(solver: SolverConfig) -> (Mesh, VectorField, VectorField) {
    let config = hill_config();
    let mesh = hill_mesh(&config);
    let lock = MetadataLock::new();
    let init = FieldInitializer::DomainAverage
        .initialize_fields(&mesh, &domain_average_inputs(&config, &lock))
        .unwrap();
    let stability = StabilityField::neutral(mesh.dims());

    let system = MassConservationBuilder::new(&mesh, &stability)
        .unwrap()
        .assemble(&init.wind)
        .unwrap();
    let cancel = CancellationToken::new();
    let ctx = SolveContext {
        progress: &SilentProgress,
        cancel: &cancel,
    };
    let solved = solve_with_fallback(&system, solver, ctx).unwrap();
    let corrected = FieldReconstructor::new(&mesh, &stability)
        .unwrap()
        .reconstruct(&init.wind, &solved.report.solution)
        .unwrap();
    assert!(corrected.is_all_finite());
    (mesh, init.wind, corrected)
}

/// Assert every interior element layer above the ground cells and below
/// the lid lost at least `1 / factor` of its divergence
fn assert_interior_reduction(solver: SolverConfig, factor: f64) {
    let (mesh, initial, corrected) = hill_solution(solver);
    let before = interior_layer_divergence(&mesh, &initial);
    let after = interior_layer_divergence(&mesh, &corrected);
    let top = before.len() - 1;
    for ek in 2..top {
        assert!(before[ek] > 0.0, "layer {ek} has no initial divergence");
        assert!(
            after[ek] < before[ek] / factor,
            "layer {ek}: divergence {:.3e} -> {:.3e}",
            before[ek],
            after[ek]
        );
    }

    let total_before = rms_divergence(&mesh, &initial).unwrap();
    let total_after = rms_divergence(&mesh, &corrected).unwrap();
    assert!(total_after < total_before);
}

#[test]
fn test_tight_solve_removes_interior_divergence_over_a_hill() {
    assert_interior_reduction(
        SolverConfig {
            tolerance: 1e-8,
            ..SolverConfig::default()
        },
        5.0,
    );
}

#[test]
fn test_default_solve_reduces_interior_divergence_over_a_hill() {
    assert_interior_reduction(SolverConfig::default(), 2.0);
}

#[test]
fn test_profiles_reproduce_the_input_speed_at_the_input_height() {
    let config = hill_config();
    let mesh = hill_mesh(&config);
    let lock = MetadataLock::new();
    let surface = config.vegetation.surface();

    for kind in [
        ProfileKind::Uniform,
        ProfileKind::Logarithmic,
        ProfileKind::PowerLaw,
        ProfileKind::MoninObukhov,
    ] {
        let inputs = InitInputs {
            profile: kind,
            ..domain_average_inputs(&config, &lock)
        };
        let init = FieldInitializer::DomainAverage.initialize_fields(&mesh, &inputs).unwrap();
        let (i, j) = (5, 7);
        let profile = WindProfile {
            kind,
            input_speed: init.surface_speed.get(i, j),
            input_height: init.input_height,
            roughness_length: surface.roughness_length,
            roughness_height: surface.roughness_height,
            displacement_height: surface.displacement_height,
            obukhov_length: init.boundary_layer.obukhov_length.get(i, j),
            abl_height: init.boundary_layer.abl_height.get(i, j),
        };
        let at_input = profile.speed_at(init.input_height + surface.roughness_height);
        assert_relative_eq!(at_input, config.input_speed, epsilon = 1e-9);

        // Nodes carry the same profile
        let k = 4;
        let agl = mesh.agl(i, j, k);
        assert_relative_eq!(
            init.wind.horizontal_speed(i, j, k),
            profile.speed_at(agl),
            epsilon = 1e-9
        );
    }
}

#[test]
fn test_rebuilding_the_system_is_idempotent() {
    let config = hill_config();
    let mesh = hill_mesh(&config);
    let lock = MetadataLock::new();
    let init = FieldInitializer::DomainAverage
        .initialize_fields(&mesh, &domain_average_inputs(&config, &lock))
        .unwrap();
    let stability = StabilityField::neutral(mesh.dims());
    let builder = MassConservationBuilder::new(&mesh, &stability).unwrap();
    let solver = SolverConfig {
        tolerance: 1e-8,
        ..SolverConfig::default()
    };
    let cancel = CancellationToken::new();

    let first = builder.assemble(&init.wind).unwrap();
    let second = builder.assemble(&init.wind).unwrap();
    assert_eq!(first.matrix.values(), second.matrix.values());
    assert_eq!(first.rhs, second.rhs);

    let ctx = SolveContext {
        progress: &SilentProgress,
        cancel: &cancel,
    };
    let phi_a = solve_with_fallback(&first, solver, ctx).unwrap().report.solution;
    let phi_b = solve_with_fallback(&second, solver, ctx).unwrap().report.solution;
    let scale = phi_a.iter().fold(0.0_f64, |m, p| m.max(p.abs())).max(1e-12);
    for (a, b) in phi_a.iter().zip(&phi_b) {
        assert!((a - b).abs() <= 1e-6 * scale, "phi differs: {a} vs {b}");
    }
}

#[test]
fn test_neutral_weights_match_mesh_shape() {
    let config = hill_config();
    let mesh = hill_mesh(&config);
    let wrong = StabilityField::neutral(FieldDims::new(3, 3, 3));
    assert!(matches!(
        MassConservationBuilder::new(&mesh, &wrong),
        Err(WindError::InvalidInput { .. })
    ));
}

#[test]
fn test_progress_stages_arrive_in_pipeline_order() {
    let dem = terrain::single_hill(12, 12, 100.0, 1000.0, 200.0, 300.0).unwrap();
    let recorder = StageRecorder::default();
    let run = WindSimulation::new(hill_config(), dem)
        .unwrap()
        .run(&recorder, &CancellationToken::new())
        .unwrap();
    assert_eq!(run.report.assemblies, 1);

    let stages = recorder.stages.into_inner().unwrap();
    assert_eq!(
        stages,
        [
            ProgressStage::MeshBuilt,
            ProgressStage::Initialized,
            ProgressStage::Assembled,
            ProgressStage::Solved,
            ProgressStage::Finished,
        ]
    );
}

#[test]
fn test_cancellation_after_assembly_aborts_the_run() {
    let dem = terrain::single_hill(12, 12, 100.0, 1000.0, 200.0, 300.0).unwrap();
    let token = CancellationToken::new();
    let sink = CancelAfterAssembly { token: token.clone() };
    let result = WindSimulation::new(hill_config(), dem).unwrap().run(&sink, &token);
    assert!(matches!(result, Err(WindError::Cancelled)));
}
