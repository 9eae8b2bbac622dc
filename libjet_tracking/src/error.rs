use std::path::PathBuf;
use thiserror::Error;

use super::monitor::MonitorMessage;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Error)]
pub enum SourceError {
    #[error("Sample source could not reach channel {0}")]
    Unreachable(String),
    #[error("Sample source failed to decode channel {0}")]
    Decode(String),
    #[error("Sample source returned a non-finite reading (i0: {0}, diff: {1})")]
    NonFinite(f64, f64),
    #[error("Sample source lock was poisoned by a panicking reader")]
    Poisoned,
}

#[derive(Debug, Error)]
pub enum ShotFileError {
    #[error("Could not open shot file because file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Shot file failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Shot file failed to parse a value on line {0}: {1}")]
    ParsingError(usize, std::num::ParseFloatError),
    #[error("Shot file line {0} has {1} azimuthal bins; expected {2}")]
    BadBinCount(usize, usize, usize),
    #[error("Shot file line {0} has no azimuthal bins")]
    MissingBins(usize),
    #[error("Shot file contained no shots")]
    Empty,
    #[error("Shot records could not be shaped into a matrix: {0}")]
    ShapeError(#[from] ndarray::ShapeError),
}

#[derive(Debug, Error)]
pub enum SyntheticError {
    #[error("Synthetic data parameter {0} is invalid: {1}")]
    BadParameter(&'static str, rand_distr::NormalError),
    #[error("Synthetic data needs at least one shot and one bin")]
    EmptyShape,
}

#[derive(Debug, Clone, Error)]
pub enum BufferError {
    #[error("Rolling buffer capacity must be at least 1")]
    ZeroCapacity,
}

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("Calibration was given no data")]
    NoData,
    #[error("Calibration was given {0} I0 values but {1} azimuthal profiles")]
    MismatchedLengths(usize, usize),
    #[error("Calibration found no shots with I0 inside the accepted window ({0}, {1})")]
    NoShotsInWindow(f64, f64),
    #[error("Calibration phase {phase} collected {count} valid {quantity} samples; 2 are required")]
    InsufficientSamples {
        phase: u8,
        quantity: &'static str,
        count: usize,
    },
    #[error("Linear response fit failed on {0} shots; their I0 values are degenerate")]
    DegenerateFit(usize),
    #[error("Calibration could not locate a peak in the averaged azimuthal profile")]
    NoAzavPeak,
    #[error("Calibration was cancelled by a stop request")]
    Cancelled,
    #[error("Calibration failed due to shot file error: {0}")]
    ShotFileError(#[from] ShotFileError),
}

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Calibration artifact failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Calibration artifact failed to convert to yaml: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Calibration artifact failed to format its timestamp: {0}")]
    TimeFormatError(#[from] time::error::Format),
}

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Monitor failed due to rolling buffer error: {0}")]
    BufferError(#[from] BufferError),
    #[error("Monitor failed due to Send error: {0}")]
    SendError(#[from] std::sync::mpsc::SendError<MonitorMessage>),
    #[error("Monitor failed to spawn its ingestion thread: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Monitor ingestion thread panicked")]
    Panicked,
}
