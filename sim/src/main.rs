//! DRONE EKF: run the twelve-state vision-aided EKF over recorded or synthetic flight logs.
//!
//! Commands:
//!
//! - `run`: play one CSV flight log (or every CSV in a directory) through the filter and write the
//!   estimate history to `<output>/<stem>_ekf.csv`.
//! - `gen`: write a seeded synthetic flight log with noisy poses, for testing and tuning.
//! - `config`: write a template run configuration (TOML/JSON/YAML).
//!
//! A run can also be described entirely by a configuration file passed with `--config`, in which case
//! the subcommand is ignored.

mod common;

use clap::{Args, Parser, Subcommand};
use common::{
    get_csv_files, init_logger, output_file_for, validate_input_path, validate_output_path,
};
use drone_ekf::kalman::{
    CovarianceUpdate, DEFAULT_MEASUREMENT_NOISE_SCALE, DEFAULT_PROCESS_NOISE_SCALE,
    ExtendedKalmanFilter, FilterConfig,
};
use drone_ekf::sim::{
    DEFAULT_DT, FlightRecord, PosePolicy, SimulationConfig, SyntheticFlightConfig,
    generate_flight, run_filter,
};
use log::{error, info};
use rayon::prelude::*;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

const LONG_ABOUT: &str = "DRONE EKF: a twelve-state extended Kalman filter for vision-aided drones.

The filter propagates position, velocity, Euler attitude and body rate with IMU samples and corrects
the position with vision poses. Flight logs are CSV files with the columns

    time, acc_x, acc_y, acc_z, gyro_x, gyro_y, gyro_z, poses

where `poses` holds a pose such as \"(x, y, z, qx, qy, qz, qw)\" on rows that have one and is empty
otherwise.

You can run the filter either by:
  1. Loading all parameters from a configuration file (TOML/JSON/YAML) with --config
  2. Specifying parameters via command-line flags on the `run` subcommand";

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "Run a vision-aided drone EKF over flight logs.", long_about = LONG_ABOUT)]
struct Cli {
    /// Run from a configuration file (TOML/JSON/YAML). Overrides any subcommand.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Command to execute (ignored if --config is provided)
    #[command(subcommand)]
    command: Option<Command>,

    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Log file path (if not specified, logs to stderr)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Process multiple input files in parallel
    #[arg(long, global = true)]
    parallel: bool,
}

#[derive(Subcommand, Clone, Debug)]
enum Command {
    #[command(
        name = "run",
        about = "Run the filter over flight logs",
        long_about = "Run the EKF over a CSV flight log or a directory of them. Each IMU row drives a predict step and each row with a usable pose drives a position update."
    )]
    Run(RunArgs),
    #[command(name = "gen", about = "Generate a synthetic flight log")]
    Generate(GenArgs),
    #[command(name = "config", about = "Generate a template configuration file")]
    CreateConfig(ConfigArgs),
}

#[derive(Args, Clone, Debug)]
struct RunArgs {
    /// Input CSV file path or directory containing CSV files
    #[arg(short, long, value_parser)]
    input: PathBuf,

    /// Output directory; each input produces {stem}_ekf.csv
    #[arg(short, long, value_parser)]
    output: PathBuf,

    /// Scale of the diagonal process noise covariance Q
    #[arg(long, default_value_t = DEFAULT_PROCESS_NOISE_SCALE)]
    process_noise: f64,

    /// Scale of the diagonal measurement noise covariance R
    #[arg(long, default_value_t = DEFAULT_MEASUREMENT_NOISE_SCALE)]
    measurement_noise: f64,

    /// What to do with rows whose pose is missing or malformed (skip, zero-fill)
    #[arg(long, default_value = "skip")]
    pose_policy: PosePolicy,

    /// Time step in seconds used when timestamps cannot be parsed
    #[arg(long, default_value_t = DEFAULT_DT)]
    default_dt: f64,

    /// Use the Joseph form for the covariance update
    #[arg(long)]
    joseph: bool,
}

impl RunArgs {
    fn to_config(&self, parallel: bool) -> SimulationConfig {
        SimulationConfig {
            input: self.input.to_string_lossy().into_owned(),
            output: self.output.to_string_lossy().into_owned(),
            pose_policy: self.pose_policy,
            default_dt: self.default_dt,
            parallel,
            filter: FilterConfig {
                process_noise_scale: self.process_noise,
                measurement_noise_scale: self.measurement_noise,
                covariance_update: if self.joseph {
                    CovarianceUpdate::Joseph
                } else {
                    CovarianceUpdate::Standard
                },
            },
        }
    }
}

#[derive(Args, Clone, Debug)]
struct GenArgs {
    /// Output CSV file path
    #[arg(short, long, value_parser)]
    output: PathBuf,

    /// Number of rows
    #[arg(long, default_value_t = 500)]
    steps: usize,

    /// Sample period in seconds
    #[arg(long, default_value_t = 0.1)]
    dt: f64,

    /// Record a pose every N rows (0 disables poses)
    #[arg(long, default_value_t = 5)]
    pose_interval: usize,

    /// Standard deviation of the pose noise in meters
    #[arg(long, default_value_t = 0.05)]
    pose_noise: f64,

    /// Standard deviation of the accelerometer noise in m/s^2
    #[arg(long, default_value_t = 0.0)]
    accel_noise: f64,

    /// Standard deviation of the gyroscope noise in rad/s
    #[arg(long, default_value_t = 0.0)]
    gyro_noise: f64,

    /// Random seed
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

impl From<&GenArgs> for SyntheticFlightConfig {
    fn from(args: &GenArgs) -> Self {
        SyntheticFlightConfig {
            steps: args.steps,
            dt: args.dt,
            pose_interval: args.pose_interval,
            pose_noise_std: args.pose_noise,
            accel_noise_std: args.accel_noise,
            gyro_noise_std: args.gyro_noise,
            seed: args.seed,
            ..SyntheticFlightConfig::default()
        }
    }
}

#[derive(Args, Clone, Debug)]
struct ConfigArgs {
    /// Configuration file to write; the format follows the extension (.toml, .json, .yaml)
    #[arg(short, long, value_parser)]
    output: PathBuf,
}

/// Run the filter over a single flight log and write its estimate history
fn process_file(
    input_file: &Path,
    output: &Path,
    config: &SimulationConfig,
) -> Result<(), Box<dyn Error>> {
    info!("Processing file: {}", input_file.display());
    let records = FlightRecord::from_csv(input_file)?;
    info!(
        "Read {} records from {}",
        records.len(),
        input_file.display()
    );

    let mut ekf = ExtendedKalmanFilter::from_config(&config.filter)?;
    let mut result = run_filter(&mut ekf, &records, config)?;
    if let Some(stem) = input_file.file_stem().and_then(|s| s.to_str()) {
        result.name = stem.to_string();
    }
    info!("Final estimate: {}", ekf.drone_state());

    let output_file = output_file_for(input_file, output)?;
    result.to_csv(&output_file)?;
    info!("Results written to {}", output_file.display());
    Ok(())
}

/// Process every flight log named by the configuration
fn run_simulation(config: &SimulationConfig) -> Result<(), Box<dyn Error>> {
    config.filter.validate()?;
    info!("Input: {}", config.input);
    info!("Output: {}", config.output);
    info!("Filter: {:?}", config.filter);
    info!("Pose policy: {:?}", config.pose_policy);

    let input = Path::new(&config.input);
    let output = Path::new(&config.output);
    validate_input_path(input)?;
    validate_output_path(output)?;

    let csv_files = get_csv_files(input)?;
    let is_multiple = csv_files.len() > 1;
    if is_multiple {
        info!("Processing {} CSV files from directory", csv_files.len());
    }

    if config.parallel && is_multiple {
        info!("Running in parallel mode");
        let errors = Mutex::new(Vec::new());
        csv_files.par_iter().for_each(|input_file| {
            if let Err(e) = process_file(input_file, output, config) {
                error!("Error processing {}: {}", input_file.display(), e);
                errors
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push((input_file.clone(), e.to_string()));
            }
        });
        let errors = errors.into_inner().unwrap_or_else(PoisonError::into_inner);
        if !errors.is_empty() {
            for (file, err) in &errors {
                error!("  {}: {}", file.display(), err);
            }
            return Err(format!("{} file(s) failed to process", errors.len()).into());
        }
    } else {
        let mut failures = 0usize;
        for input_file in &csv_files {
            if let Err(e) = process_file(input_file, output, config) {
                if !is_multiple {
                    return Err(e);
                }
                failures += 1;
                error!("Error processing {}: {}", input_file.display(), e);
            }
        }
        if failures > 0 {
            return Err(format!("{failures} file(s) failed to process").into());
        }
    }
    Ok(())
}

/// Execute a run described by a configuration file
fn run_from_config(config_path: &Path, cli_parallel: bool) -> Result<(), Box<dyn Error>> {
    info!("Loading configuration from {}", config_path.display());
    let mut config = SimulationConfig::from_file(config_path)?;
    if cli_parallel {
        config.parallel = true;
    }
    run_simulation(&config)
}

fn generate(args: &GenArgs) -> Result<(), Box<dyn Error>> {
    let flight = generate_flight(&SyntheticFlightConfig::from(args))?;
    if let Some(parent) = args.output.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    FlightRecord::to_csv(&flight.records, &args.output)?;
    info!(
        "Wrote {} synthetic records to {}",
        flight.records.len(),
        args.output.display()
    );
    Ok(())
}

fn create_config_file(args: &ConfigArgs) -> Result<(), Box<dyn Error>> {
    let template = SimulationConfig {
        input: "data/flight.csv".to_string(),
        output: "results".to_string(),
        ..SimulationConfig::default()
    };
    template.to_file(&args.output)?;
    info!("Template configuration written to {}", args.output.display());
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logger(&cli.log_level, cli.log_file.as_ref())?;

    if let Some(ref config_path) = cli.config {
        return run_from_config(config_path, cli.parallel);
    }

    match cli.command {
        Some(Command::Run(args)) => run_simulation(&args.to_config(cli.parallel)),
        Some(Command::Generate(args)) => generate(&args),
        Some(Command::CreateConfig(args)) => create_config_file(&args),
        None => {
            eprintln!("Error: No command provided. Use -h or --help for usage information.");
            std::process::exit(1);
        }
    }
}
