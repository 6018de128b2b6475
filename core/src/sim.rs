//! Flight log loading and offline filter playback.
//!
//! This module provides:
//! - A struct (`FlightRecord`) for reading and writing recorded flight data to/from CSV files
//! - The playback loop (`run_filter`) that drives any [`NavigationFilter`] through a recorded flight
//! - `NavigationResult` for storing and exporting the estimate history
//! - `SimulationConfig`, a serializable run configuration (JSON, YAML or TOML)
//! - A seeded synthetic flight generator for testing and demonstration
//!
//! A flight log is a CSV with one row per IMU sample. Rows that carry a vision pose in the `poses`
//! column also produce a position update. Everything about how a row becomes a filter call lives
//! here, so the filter itself never sees raw text.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use std::str::FromStr;

use chrono::DateTime;
use log::{debug, info, warn};
use nalgebra::Vector3;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::error::FilterError;
use crate::kalman::FilterConfig;
use crate::measurements::{PoseParseError, PositionMeasurement, parse_pose};
use crate::{ControlInput, NavigationFilter, StateVector, forward};

/// Timestamp layout used by the phone and flight-controller loggers
///
/// The fractional seconds are optional: `21:47:58+0000` and `21:47:58.125+0000` both parse.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f%z";
/// Time step assumed when consecutive timestamps cannot be parsed (seconds)
pub const DEFAULT_DT: f64 = 1.0;

/// Struct representing a single row of a recorded flight.
///
/// IMU columns are in the body frame. The `poses` column holds the raw text of the vision pose
/// (for example `"(x, y, z, qx, qy, qz, qw)"`) and is empty on rows without one.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct FlightRecord {
    /// Seconds as a float, RFC 3339, or `YYYY-MM-DD hh:mm:ss+zzzz`
    pub time: String,
    /// Linear acceleration along the x-axis in m/s^2
    pub acc_x: f64,
    /// Linear acceleration along the y-axis in m/s^2
    pub acc_y: f64,
    /// Linear acceleration along the z-axis in m/s^2
    pub acc_z: f64,
    /// Rotation rate around the x-axis in rad/s
    pub gyro_x: f64,
    /// Rotation rate around the y-axis in rad/s
    pub gyro_y: f64,
    /// Rotation rate around the z-axis in rad/s
    pub gyro_z: f64,
    /// Raw vision pose text, if this row has one
    #[serde(default)]
    pub poses: Option<String>,
}

impl FlightRecord {
    /// Reads a CSV file and returns a vector of `FlightRecord` structs.
    ///
    /// # Arguments
    /// * `path` - Path to the CSV file to read.
    ///
    /// # Returns
    /// * `Ok(Vec<FlightRecord>)` if successful.
    /// * `Err` if the file cannot be read or parsed.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Vec<Self>, Box<dyn std::error::Error>> {
        let mut rdr = csv::Reader::from_path(path)?;
        let mut records = Vec::new();
        for result in rdr.deserialize() {
            let record: Self = result?;
            records.push(record);
        }
        Ok(records)
    }

    /// Writes a slice of `FlightRecord` structs to a CSV file.
    pub fn to_csv<P: AsRef<Path>>(records: &[Self], path: P) -> io::Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for record in records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// The IMU sample of this row as a filter control input.
    pub fn control_input(&self) -> ControlInput {
        ControlInput::new(
            Vector3::new(self.acc_x, self.acc_y, self.acc_z),
            Vector3::new(self.gyro_x, self.gyro_y, self.gyro_z),
        )
    }
}

/// What the playback loop does with a row whose pose is absent or cannot be parsed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PosePolicy {
    /// Predict only; no measurement update for that row.
    #[default]
    Skip,
    /// Update against a zero position. Reproduces logs processed by older tooling that coerced
    /// unparseable poses to the origin.
    ZeroFill,
}

impl FromStr for PosePolicy {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "skip" => Ok(PosePolicy::Skip),
            "zero-fill" | "zero" => Ok(PosePolicy::ZeroFill),
            other => Err(format!(
                "unknown pose policy '{other}', expected 'skip' or 'zero-fill'"
            )),
        }
    }
}

impl PosePolicy {
    /// Resolve the measurement for a row, if any.
    ///
    /// Absent poses are logged at debug level and malformed ones at warn level.
    pub fn resolve(&self, time: &str, pose: Option<&str>) -> Option<PositionMeasurement> {
        match pose.map(parse_pose) {
            Some(Ok(z)) => return Some(z),
            None | Some(Err(PoseParseError::Empty)) => {
                debug!("{time}: no pose")
            }
            Some(Err(e)) => warn!("{time}: unusable pose ({e})"),
        }
        match self {
            PosePolicy::Skip => None,
            PosePolicy::ZeroFill => Some(PositionMeasurement::default()),
        }
    }
}

/// Parse a timestamp into seconds.
///
/// Accepts a plain number of seconds, an RFC 3339 string, or the logger format
/// [`TIMESTAMP_FORMAT`]. Date-times are returned as seconds since the Unix epoch.
pub fn parse_timestamp(time: &str) -> Option<f64> {
    let time = time.trim();
    if let Ok(seconds) = time.parse::<f64>() {
        return seconds.is_finite().then_some(seconds);
    }
    DateTime::parse_from_rfc3339(time)
        .or_else(|_| DateTime::parse_from_str(time, TIMESTAMP_FORMAT))
        .ok()
        .map(|t| t.timestamp_micros() as f64 * 1e-6)
}

/// Time elapsed between two timestamps, or `default_dt` if either cannot be parsed.
///
/// The result is not checked for sign; the caller decides what to do with out-of-order rows.
/// Falling back to `default_dt` is logged at warn level.
pub fn compute_dt(previous: &str, current: &str, default_dt: f64) -> f64 {
    match (parse_timestamp(previous), parse_timestamp(current)) {
        (Some(prev), Some(cur)) => cur - prev,
        _ => {
            warn!("cannot parse time step {previous:?} -> {current:?}, using {default_dt} s");
            default_dt
        }
    }
}

/// One row of filter output
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct NavigationRecord {
    pub time: String,
    /// Time step applied by the predict for this row (0 for the first row and for skipped predicts)
    pub dt: f64,
    pub pos_x: f64,
    pub pos_y: f64,
    pub pos_z: f64,
    pub vel_x: f64,
    pub vel_y: f64,
    pub vel_z: f64,
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
    pub rate_x: f64,
    pub rate_y: f64,
    pub rate_z: f64,
    /// Position standard deviations, `sqrt(diag P)`
    pub pos_std_x: f64,
    pub pos_std_y: f64,
    pub pos_std_z: f64,
    /// Whether a measurement update was applied on this row
    pub updated: bool,
}

impl NavigationRecord {
    /// Snapshot a filter after processing a row.
    pub fn from_filter<F: NavigationFilter + ?Sized>(
        filter: &F,
        time: &str,
        dt: f64,
        updated: bool,
    ) -> Self {
        let x = filter.get_estimate();
        let p = filter.get_certainty();
        NavigationRecord {
            time: time.to_string(),
            dt,
            pos_x: x[0],
            pos_y: x[1],
            pos_z: x[2],
            vel_x: x[3],
            vel_y: x[4],
            vel_z: x[5],
            roll: x[6],
            pitch: x[7],
            yaw: x[8],
            rate_x: x[9],
            rate_y: x[10],
            rate_z: x[11],
            pos_std_x: p[(0, 0)].max(0.0).sqrt(),
            pos_std_y: p[(1, 1)].max(0.0).sqrt(),
            pos_std_z: p[(2, 2)].max(0.0).sqrt(),
            updated,
        }
    }
    /// The state stored in this row
    pub fn state(&self) -> StateVector {
        StateVector::from_column_slice(&[
            self.pos_x,
            self.pos_y,
            self.pos_z,
            self.vel_x,
            self.vel_y,
            self.vel_z,
            self.roll,
            self.pitch,
            self.yaw,
            self.rate_x,
            self.rate_y,
            self.rate_z,
        ])
    }
    pub fn position(&self) -> Vector3<f64> {
        Vector3::new(self.pos_x, self.pos_y, self.pos_z)
    }
}

/// Estimate history of one filter run.
#[derive(Clone, Debug, Default)]
pub struct NavigationResult {
    /// Name or identifier for this navigation solution
    pub name: String,
    /// One entry per processed input row
    pub records: Vec<NavigationRecord>,
}

impl NavigationResult {
    /// Creates a new NavigationResult with no records.
    pub fn new(name: &str) -> Self {
        NavigationResult {
            name: name.to_string(),
            records: Vec::new(),
        }
    }
    pub fn len(&self) -> usize {
        self.records.len()
    }
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
    /// Number of rows on which a measurement update was applied
    pub fn update_count(&self) -> usize {
        self.records.iter().filter(|r| r.updated).count()
    }
    /// Final estimate, if any row was processed
    pub fn final_state(&self) -> Option<StateVector> {
        self.records.last().map(NavigationRecord::state)
    }

    /// Writes the navigation result to a CSV file.
    ///
    /// # Arguments
    /// * `path` - Path where the CSV file will be saved
    ///
    /// # Returns
    /// * `io::Result<()>` - Ok if successful, Err otherwise
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for record in &self.records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Loads a navigation result previously written with [`NavigationResult::to_csv`].
    pub fn from_csv<P: AsRef<Path>>(path: P, name: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let mut rdr = csv::Reader::from_path(path)?;
        let mut result = NavigationResult::new(name);
        for record in rdr.deserialize() {
            result.records.push(record?);
        }
        Ok(result)
    }
}

/// Play a recorded flight through a navigation filter.
///
/// The first record establishes the time base and its estimate is recorded as-is; if it carries a
/// pose, that pose is fused without a preceding predict. For every following record the time step is
/// computed from the timestamps (falling back to `config.default_dt`), the filter is propagated with the
/// record's IMU sample, and the pose policy decides whether a measurement update follows.
///
/// Rows with a negative or non-finite time step, or with a non-finite IMU sample, are logged and their
/// predict is skipped. A singular innovation covariance aborts the run.
///
/// # Arguments
/// * `filter` - The filter to drive. It is left holding the final estimate.
/// * `records` - Recorded flight rows in file order
/// * `config` - Playback settings (pose policy and fallback time step)
pub fn run_filter<F: NavigationFilter>(
    filter: &mut F,
    records: &[FlightRecord],
    config: &SimulationConfig,
) -> Result<NavigationResult, FilterError> {
    let mut result = NavigationResult::new("EKF");
    let Some((first, rest)) = records.split_first() else {
        return Ok(result);
    };
    result.records.reserve(records.len());

    let updated = apply_pose(filter, first, config.pose_policy)?;
    result
        .records
        .push(NavigationRecord::from_filter(filter, &first.time, 0.0, updated));

    let mut previous = &first.time;
    for record in rest {
        let mut dt = compute_dt(previous, &record.time, config.default_dt);
        previous = &record.time;
        if !dt.is_finite() || dt < 0.0 {
            warn!("{}: skipping predict for time step {dt}", record.time);
            dt = 0.0;
        } else if let Err(e) = filter.predict(&record.control_input(), dt) {
            match e {
                FilterError::InvalidInput(_) => {
                    warn!("{}: skipping predict ({e})", record.time);
                    dt = 0.0;
                }
                FilterError::SingularMatrix { .. } => return Err(e),
            }
        }
        let updated = apply_pose(filter, record, config.pose_policy)?;
        result
            .records
            .push(NavigationRecord::from_filter(filter, &record.time, dt, updated));
    }
    info!(
        "Processed {} records with {} measurement updates",
        result.len(),
        result.update_count()
    );
    Ok(result)
}

fn apply_pose<F: NavigationFilter>(
    filter: &mut F,
    record: &FlightRecord,
    policy: PosePolicy,
) -> Result<bool, FilterError> {
    let Some(z) = policy.resolve(&record.time, record.poses.as_deref()) else {
        return Ok(false);
    };
    match filter.update(&z) {
        Ok(()) => Ok(true),
        Err(FilterError::InvalidInput(msg)) => {
            warn!("{}: measurement rejected ({msg})", record.time);
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

fn default_dt() -> f64 {
    DEFAULT_DT
}

/// Settings for a playback run, serializable to JSON, YAML or TOML
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Input CSV file or directory of CSV files
    #[serde(default)]
    pub input: String,
    /// Output directory
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub pose_policy: PosePolicy,
    /// Time step used when timestamps cannot be parsed (seconds)
    #[serde(default = "default_dt")]
    pub default_dt: f64,
    /// Process multiple input files in parallel
    #[serde(default)]
    pub parallel: bool,
    #[serde(default)]
    pub filter: FilterConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            input: String::new(),
            output: String::new(),
            pose_policy: PosePolicy::default(),
            default_dt: DEFAULT_DT,
            parallel: false,
            filter: FilterConfig::default(),
        }
    }
}

impl SimulationConfig {
    /// Write the configuration to a JSON file (pretty-printed).
    pub fn to_json<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self).map_err(io::Error::other)
    }
    /// Read the configuration from a JSON file.
    pub fn from_json<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_json::from_reader(file).map_err(io::Error::other)
    }
    /// Write the configuration as YAML.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        let s = serde_yaml::to_string(self).map_err(io::Error::other)?;
        file.write_all(s.as_bytes())
    }
    /// Read the configuration from YAML.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_yaml::from_reader(file).map_err(io::Error::other)
    }
    /// Write the configuration as TOML.
    pub fn to_toml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        let s = toml::to_string(self).map_err(io::Error::other)?;
        file.write_all(s.as_bytes())
    }
    /// Read the configuration from TOML.
    pub fn from_toml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let mut s = String::new();
        let mut file = File::open(path)?;
        file.read_to_string(&mut s)?;
        toml::from_str(&s).map_err(io::Error::other)
    }
    /// Generic write: choose format by file extension (.json/.yaml/.yml/.toml)
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let p = path.as_ref();
        match extension(p).as_deref() {
            Some("json") => self.to_json(p),
            Some("yaml") | Some("yml") => self.to_yaml(p),
            Some("toml") => self.to_toml(p),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "unsupported file extension",
            )),
        }
    }
    /// Generic read: choose format by file extension (.json/.yaml/.yml/.toml)
    pub fn from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let p = path.as_ref();
        match extension(p).as_deref() {
            Some("json") => Self::from_json(p),
            Some("yaml") | Some("yml") => Self::from_yaml(p),
            Some("toml") => Self::from_toml(p),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "unsupported file extension",
            )),
        }
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
}

/// Parameters of a generated flight
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyntheticFlightConfig {
    /// Number of rows
    pub steps: usize,
    /// Sample period (seconds)
    pub dt: f64,
    /// A pose is recorded every `pose_interval` rows; 0 disables poses
    pub pose_interval: usize,
    /// Standard deviation of the pose position noise (meters)
    pub pose_noise_std: f64,
    /// Standard deviation of the accelerometer noise (m/s^2)
    pub accel_noise_std: f64,
    /// Standard deviation of the gyroscope noise (rad/s)
    pub gyro_noise_std: f64,
    /// Amplitude of the horizontal acceleration (m/s^2)
    pub accel_amplitude: f64,
    /// Angular frequency of the horizontal acceleration (rad/s)
    pub accel_frequency: f64,
    /// Constant yaw rate (rad/s)
    pub yaw_rate: f64,
    pub seed: u64,
}

impl Default for SyntheticFlightConfig {
    fn default() -> Self {
        SyntheticFlightConfig {
            steps: 500,
            dt: 0.1,
            pose_interval: 5,
            pose_noise_std: 0.05,
            accel_noise_std: 0.0,
            gyro_noise_std: 0.0,
            accel_amplitude: 1.0,
            accel_frequency: 0.5,
            yaw_rate: 0.1,
            seed: 42,
        }
    }
}

/// A generated flight log and the true state at every row
#[derive(Clone, Debug)]
pub struct SyntheticFlight {
    pub records: Vec<FlightRecord>,
    pub truth: Vec<StateVector>,
}

/// Generate a flight from a smooth horizontal acceleration profile.
///
/// The true trajectory starts at rest at the origin and is integrated with [`forward`], the same
/// model the filter uses. Row `k` carries the IMU sample that moves the truth from row `k-1` to row `k`,
/// which is how [`run_filter`] consumes it. IMU and pose values are corrupted with seeded Gaussian noise.
pub fn generate_flight(config: &SyntheticFlightConfig) -> Result<SyntheticFlight, FilterError> {
    if !config.dt.is_finite() || config.dt <= 0.0 {
        return Err(FilterError::invalid(format!(
            "sample period must be positive, got {}",
            config.dt
        )));
    }
    let noise = |std: f64, what: &str| {
        if !std.is_finite() || std < 0.0 {
            return Err(FilterError::invalid(format!(
                "{what} noise std must be finite and non-negative, got {std}"
            )));
        }
        Normal::new(0.0, std)
            .map_err(|e| FilterError::invalid(format!("{what} noise std {std}: {e}")))
    };
    let accel_noise = noise(config.accel_noise_std, "accelerometer")?;
    let gyro_noise = noise(config.gyro_noise_std, "gyroscope")?;
    let pose_noise = noise(config.pose_noise_std, "pose")?;
    let mut rng = StdRng::seed_from_u64(config.seed);

    let mut records = Vec::with_capacity(config.steps);
    let mut truth = Vec::with_capacity(config.steps);
    let mut state = StateVector::zeros();
    for k in 0..config.steps {
        let t = k as f64 * config.dt;
        let phase = config.accel_frequency * t;
        let control = ControlInput::new(
            Vector3::new(
                config.accel_amplitude * phase.sin(),
                config.accel_amplitude * phase.cos(),
                0.0,
            ),
            Vector3::new(0.0, 0.0, config.yaw_rate),
        );
        if k > 0 {
            state = forward(&state, &control, config.dt);
        }
        let poses = if config.pose_interval > 0 && k % config.pose_interval == 0 {
            Some(format!(
                "({:.6}, {:.6}, {:.6}, 0.0, 0.0, 0.0, 1.0)",
                state[0] + pose_noise.sample(&mut rng),
                state[1] + pose_noise.sample(&mut rng),
                state[2] + pose_noise.sample(&mut rng),
            ))
        } else {
            None
        };
        records.push(FlightRecord {
            time: format!("{t:.6}"),
            acc_x: control.accel[0] + accel_noise.sample(&mut rng),
            acc_y: control.accel[1] + accel_noise.sample(&mut rng),
            acc_z: control.accel[2] + accel_noise.sample(&mut rng),
            gyro_x: control.gyro[0] + gyro_noise.sample(&mut rng),
            gyro_y: control.gyro[1] + gyro_noise.sample(&mut rng),
            gyro_z: control.gyro[2] + gyro_noise.sample(&mut rng),
            poses,
        });
        truth.push(state);
    }
    debug!(
        "Generated {} rows ({} with poses)",
        records.len(),
        records.iter().filter(|r| r.poses.is_some()).count()
    );
    Ok(SyntheticFlight { records, truth })
}

/// Root-mean-square position error of a result against a truth sequence of the same length
pub fn position_rmse(result: &NavigationResult, truth: &[StateVector]) -> Option<f64> {
    if result.is_empty() || result.len() != truth.len() {
        return None;
    }
    let sum: f64 = result
        .records
        .iter()
        .zip(truth)
        .map(|(r, x)| (r.position() - x.fixed_rows::<3>(0)).norm_squared())
        .sum();
    Some((sum / result.len() as f64).sqrt())
}
