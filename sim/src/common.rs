//! Shared helpers for the command line driver: logger setup, input discovery and output naming.

use std::error::Error;
use std::path::{Path, PathBuf};

/// Suffix appended to the input file stem when naming filter output
pub const OUTPUT_SUFFIX: &str = "_ekf";

/// Module prefix shared by the filter library and this binary
pub const LOG_TARGET: &str = "drone_ekf";
/// Environment variable with extra `env_logger` directives, e.g. `drone_ekf::sim=trace`
pub const LOG_ENV: &str = "DRONE_EKF_LOG";

/// Parse a `--log-level` value, falling back to `info` with a note on stderr.
pub fn parse_log_level(log_level: &str) -> log::LevelFilter {
    log_level.parse::<log::LevelFilter>().unwrap_or_else(|_| {
        eprintln!("Invalid log level '{log_level}', defaulting to 'info'");
        log::LevelFilter::Info
    })
}

/// Level for third-party crates: never chattier than `warn`.
pub fn dependency_level(level: log::LevelFilter) -> log::LevelFilter {
    level.min(log::LevelFilter::Warn)
}

/// Set up `env_logger`, writing to stderr or appending to `log_file`.
///
/// `log_level` applies to the `drone_ekf` modules; other crates are capped at `warn`. Directives in
/// [`LOG_ENV`] are applied last and override both.
pub fn init_logger(log_level: &str, log_file: Option<&PathBuf>) -> Result<(), Box<dyn Error>> {
    use std::io::Write;

    let level = parse_log_level(log_level);
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(dependency_level(level))
        .filter_module(LOG_TARGET, level);
    if let Ok(directives) = std::env::var(LOG_ENV) {
        builder.parse_filters(&directives);
    }
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} [{}] {} - {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.target(),
            record.args()
        )
    });

    if let Some(log_path) = log_file {
        if let Some(parent) = log_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.try_init()?;
    Ok(())
}

/// Fail early if the input path is missing or is not a regular file or directory.
pub fn validate_input_path(input: &Path) -> Result<(), Box<dyn Error>> {
    if !input.exists() {
        return Err(format!("Input path '{}' does not exist.", input.display()).into());
    }
    if !input.is_file() && !input.is_dir() {
        return Err(format!(
            "Input path '{}' is neither a file nor a directory.",
            input.display()
        )
        .into());
    }
    Ok(())
}

fn is_csv(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
}

/// Flight logs to process: the file itself, or every CSV directly inside a directory (sorted).
pub fn get_csv_files(input: &Path) -> Result<Vec<PathBuf>, Box<dyn Error>> {
    if input.is_file() {
        if !is_csv(input) {
            return Err(format!("Input file '{}' is not a CSV file.", input.display()).into());
        }
        return Ok(vec![input.to_path_buf()]);
    }
    if !input.is_dir() {
        return Err(format!(
            "Input path '{}' is neither a file nor a directory.",
            input.display()
        )
        .into());
    }
    let mut csv_files: Vec<PathBuf> = std::fs::read_dir(input)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_csv(path))
        .collect();
    if csv_files.is_empty() {
        return Err(format!("No CSV files found in directory '{}'.", input.display()).into());
    }
    csv_files.sort();
    Ok(csv_files)
}

/// Create the output directory if it does not exist yet.
pub fn validate_output_path(output: &Path) -> Result<(), Box<dyn Error>> {
    if !output.exists() {
        std::fs::create_dir_all(output)?;
    }
    Ok(())
}

/// `<output>/<input stem>_ekf.csv`
pub fn output_file_for(input_file: &Path, output: &Path) -> Result<PathBuf, Box<dyn Error>> {
    let stem = input_file
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| format!("Input file path '{}' has no file name", input_file.display()))?;
    Ok(output.join(format!("{stem}{OUTPUT_SUFFIX}.csv")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::tempdir;

    #[test]
    fn log_levels() {
        assert_eq!(parse_log_level("debug"), log::LevelFilter::Debug);
        assert_eq!(parse_log_level("TRACE"), log::LevelFilter::Trace);
        assert_eq!(parse_log_level("loud"), log::LevelFilter::Info);
        assert_eq!(dependency_level(log::LevelFilter::Trace), log::LevelFilter::Warn);
        assert_eq!(dependency_level(log::LevelFilter::Error), log::LevelFilter::Error);
        assert_eq!(dependency_level(log::LevelFilter::Off), log::LevelFilter::Off);
    }

    #[test]
    fn input_path_file_and_directory() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("flight.csv");
        File::create(&file_path).unwrap();
        assert!(validate_input_path(&file_path).is_ok());
        assert!(validate_input_path(dir.path()).is_ok());
        assert!(validate_input_path(Path::new("/nonexistent/flight/logs")).is_err());
    }

    #[test]
    fn csv_discovery_in_directory() {
        let dir = tempdir().unwrap();
        File::create(dir.path().join("b.csv")).unwrap();
        File::create(dir.path().join("a.CSV")).unwrap();
        File::create(dir.path().join("notes.txt")).unwrap();

        let files = get_csv_files(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].file_name().unwrap(), "a.CSV");
        assert_eq!(files[1].file_name().unwrap(), "b.csv");
    }

    #[test]
    fn csv_discovery_rejects_non_csv_and_empty() {
        let dir = tempdir().unwrap();
        assert!(get_csv_files(dir.path()).is_err());
        let txt = dir.path().join("flight.txt");
        File::create(&txt).unwrap();
        assert!(get_csv_files(&txt).is_err());
    }

    #[test]
    fn single_csv_is_returned_as_is() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("flight.csv");
        File::create(&file_path).unwrap();
        assert_eq!(get_csv_files(&file_path).unwrap(), vec![file_path]);
    }

    #[test]
    fn output_directory_is_created() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("nested").join("out");
        assert!(!out.exists());
        validate_output_path(&out).unwrap();
        assert!(out.is_dir());
        assert!(validate_output_path(&out).is_ok());
    }

    #[test]
    fn output_file_naming() {
        let out = output_file_for(Path::new("logs/flight_03.csv"), Path::new("results")).unwrap();
        assert_eq!(out, Path::new("results").join("flight_03_ekf.csv"));
        assert!(output_file_for(Path::new(".."), Path::new("results")).is_err());
    }
}
