use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use windfield_core::{CancellationToken, SimulationConfig, WindArmy, WindResult, WindRun, WindSimulation};

/// Mass-conserving wind solver
#[derive(Parser, Debug)]
#[command(name = "windfield")]
#[command(about = "Diagnostic wind simulation over complex terrain", long_about = None)]
struct Args {
    /// Run configuration (JSON); repeat to run several side by side
    #[arg(short, long = "config", required = true)]
    configs: Vec<PathBuf>,

    /// DEM (ESRI ASCII grid) used in place of each config's demPath
    #[arg(short, long)]
    dem: Option<PathBuf>,

    /// Directory for the speed and direction grids
    #[arg(short, long, default_value = ".")]
    out: PathBuf,

    /// Worker threads per run, overriding numberCPUs
    #[arg(short = 'j', long)]
    threads: Option<usize>,

    /// Print each run report as JSON
    #[arg(long)]
    report: bool,
}

fn load(path: &PathBuf, args: &Args) -> WindResult<WindSimulation> {
    let mut config = SimulationConfig::from_json_file(path)?;
    if let Some(dem) = &args.dem {
        config.dem_path = Some(dem.clone());
    }
    if let Some(threads) = args.threads {
        config.number_cpus = threads;
    }
    WindSimulation::from_config(config)
}

fn write_run(run: &WindRun, stem: &str, args: &Args) -> WindResult<()> {
    let output = run.output()?;
    let (speed, direction) = output.write_esri_ascii(&args.out, stem)?;
    info!(speed = %speed.display(), direction = %direction.display(), "grids written");
    if args.report {
        match serde_json::to_string_pretty(&run.report) {
            Ok(json) => println!("{json}"),
            Err(e) => error!(error = %e, "could not serialize run report"),
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    if let Err(e) = std::fs::create_dir_all(&args.out) {
        error!(dir = %args.out.display(), error = %e, "cannot create output directory");
        return ExitCode::FAILURE;
    }

    let mut army = WindArmy::new();
    let mut stems = Vec::new();
    for path in &args.configs {
        match load(path, &args) {
            Ok(simulation) => {
                army.push(simulation);
                let stem = path
                    .file_stem()
                    .map_or_else(|| format!("run{}", stems.len()), |s| s.to_string_lossy().into_owned());
                stems.push(stem);
            }
            Err(e) => {
                error!(config = %path.display(), error = %e, "invalid run");
                return ExitCode::FAILURE;
            }
        }
    }

    let results = match army.run(&CancellationToken::new()) {
        Ok(results) => results,
        Err(e) => {
            error!(error = %e, "army failed to start");
            return ExitCode::FAILURE;
        }
    };

    let mut failed = 0;
    for (result, stem) in results.iter().zip(&stems) {
        let written = result.as_ref().map_err(ToString::to_string).and_then(|run| {
            write_run(run, stem, &args).map_err(|e| e.to_string())
        });
        if let Err(message) = written {
            error!(run = %stem, error = %message, "run failed");
            failed += 1;
        }
    }

    if failed == 0 {
        info!(runs = stems.len(), "all runs finished");
        ExitCode::SUCCESS
    } else {
        error!(failed, runs = stems.len(), "some runs failed");
        ExitCode::FAILURE
    }
}
