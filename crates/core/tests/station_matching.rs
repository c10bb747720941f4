//! Station matching through full runs

use approx::assert_relative_eq;
use windfield_core::grid::terrain;
use windfield_core::simulation::{MatchingPhase, SilentProgress};
use windfield_core::{
    CancellationToken, InitializationMethod, MeshResolution, SimulationConfig, WeatherStation, WindArmy, WindError,
    WindSimulation,
};

#[ctor::ctor]
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn point_config(station: WeatherStation, layers: usize) -> SimulationConfig {
    SimulationConfig {
        initialization_method: InitializationMethod::Point,
        match_wx_stations: true,
        mesh_resolution: MeshResolution::Custom(100.0),
        vertical_layers: layers,
        stations: vec![station],
        ..SimulationConfig::default()
    }
}

#[test]
fn test_single_station_on_flat_ground_converges() {
    // Even column count puts the domain centre between nodes
    let station = WeatherStation::new("centre", 500.0, 500.0, 10.0, 5.0, 270.0);
    let dem = terrain::flat(10, 10, 100.0, 0.0).unwrap();
    let run = WindSimulation::new(point_config(station, 20), dem)
        .unwrap()
        .run(&SilentProgress, &CancellationToken::new())
        .unwrap();

    assert_eq!(run.report.final_state, MatchingPhase::Converged);
    assert!(run.report.matching_iterations >= 1);
    assert!(run.report.matching_iterations < 150);
    assert_eq!(run.report.assemblies, run.report.matching_iterations);
    assert!(!run.report.null_run);

    let output = run.output().unwrap();
    let (i, j) = (5, 5);
    assert!(
        (output.speed.get(i, j) - 5.0).abs() < 0.22 + 0.05,
        "speed at the station column: {}",
        output.speed.get(i, j)
    );
    assert_relative_eq!(output.direction.get(i, j), 270.0, epsilon = 1.0);
}

#[test]
fn test_radius_smaller_than_a_cell_exhausts_matching() {
    // No node centre lies within 30 m of the station, so nothing is ever
    // initialized and the output cannot approach the observation
    let station = WeatherStation::new("tiny", 400.0, 400.0, 10.0, 5.0, 270.0).with_influence_radius(30.0);
    let dem = terrain::flat(8, 8, 100.0, 0.0).unwrap();
    let config = SimulationConfig {
        max_matching_iterations: 150,
        ..point_config(station, 8)
    };
    let result = WindSimulation::new(config, dem)
        .unwrap()
        .run(&SilentProgress, &CancellationToken::new());

    match result {
        Err(err @ WindError::MatchingExhausted { .. }) => {
            let WindError::MatchingExhausted { iterations, .. } = &err else {
                unreachable!()
            };
            assert_eq!(*iterations, 150);
            let message = err.to_string();
            assert!(message.contains("100.00 m"), "mesh resolution missing: {message}");
            assert!(message.contains("30.00 m"), "radius missing: {message}");
        }
        other => panic!("expected MatchingExhausted, got {other:?}"),
    }
}

#[test]
fn test_calm_station_is_a_null_run() {
    let station = WeatherStation::new("calm", 300.0, 300.0, 10.0, 0.0, 0.0);
    let dem = terrain::flat(6, 6, 100.0, 0.0).unwrap();
    let run = WindSimulation::new(point_config(station, 8), dem)
        .unwrap()
        .run(&SilentProgress, &CancellationToken::new())
        .unwrap();
    assert!(run.report.null_run);
    assert_eq!(run.report.assemblies, 0);
    assert_eq!(run.report.matching_iterations, 1);
    assert!(run.wind.is_all_zero());
}

#[test]
fn test_station_off_the_dem_is_rejected() {
    let station = WeatherStation::new("far", 5000.0, 5000.0, 10.0, 5.0, 270.0);
    let dem = terrain::flat(6, 6, 100.0, 0.0).unwrap();
    let result = WindSimulation::new(point_config(station, 8), dem)
        .and_then(|sim| sim.run(&SilentProgress, &CancellationToken::new()));
    assert!(matches!(result, Err(WindError::InvalidInput { .. })));
}

#[test]
fn test_army_mixes_matched_and_domain_average_runs() {
    let dem = terrain::flat(10, 10, 100.0, 0.0).unwrap();
    let station = WeatherStation::new("centre", 500.0, 500.0, 10.0, 4.0, 200.0);
    let domain_average = SimulationConfig {
        mesh_resolution: MeshResolution::Custom(100.0),
        vertical_layers: 10,
        input_speed: 3.0,
        input_direction: 90.0,
        ..SimulationConfig::default()
    };

    let mut army = WindArmy::new();
    army.push(WindSimulation::new(point_config(station, 20), dem.clone()).unwrap());
    army.push(WindSimulation::new(domain_average, dem).unwrap());
    let results = army.run(&CancellationToken::new()).unwrap();

    let matched = results[0].as_ref().unwrap();
    assert_eq!(matched.report.final_state, MatchingPhase::Converged);
    let plain = results[1].as_ref().unwrap();
    assert_eq!(plain.report.assemblies, 1);
    let output = plain.output().unwrap();
    assert_relative_eq!(output.direction.get(4, 4), 90.0, epsilon = 1.0);
}
