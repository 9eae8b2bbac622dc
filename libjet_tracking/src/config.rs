use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::calibration::CalibrationParams;
use super::error::ConfigError;
use super::settings::{
    clamp_nsamp, clamp_samprate, clamp_sigma, CorrectionMode, Settings, DEFAULT_BUFFER_SIZE,
    DEFAULT_CALIBRATION_RATE, DEFAULT_NOTIFICATION_TOLERANCE, DEFAULT_NSAMP,
    DEFAULT_PHASE_ONE_SECS, DEFAULT_PHASE_TWO_SECS, DEFAULT_SAMPRATE, DEFAULT_SIGMA,
};
use super::source::{I0Channel, SimulationParams};

const RESULTS_FILE_NAME: &str = "calibration_results.yml";

/// Structure representing the application configuration. Contains the offline calibration
/// parameters, the streaming monitor parameters and the simulated source parameters.
/// Configs are seralizable and deserializable to YAML using serde and serde_yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub shot_path: PathBuf,
    pub results_path: PathBuf,
    pub bins: usize,
    pub lr_thresh: f64,
    pub line_fit_points: usize,
    pub delta_bin: usize,
    pub sigma: f64,
    pub nsamp: usize,
    pub samprate: u32,
    pub buffer_size: usize,
    pub notification_tolerance: usize,
    pub i0_channel: I0Channel,
    pub live: bool,
    pub correction_mode: CorrectionMode,
    pub calibration_phase_one_secs: f64,
    pub calibration_phase_two_secs: f64,
    pub calibration_rate: f64,
    pub sim_i0_level: f64,
    pub sim_diff_level: f64,
    pub sim_noise: f64,
    pub sim_drop_rate: f64,
    pub sim_seed: Option<u64>,
}

impl Default for Config {
    /// Generate a new Config object. Paths are empty/invalid, everything else takes the
    /// standard beamline defaults
    fn default() -> Self {
        let calib = CalibrationParams::default();
        let sim = SimulationParams::default();
        Self {
            shot_path: PathBuf::from("None"),
            results_path: PathBuf::from("None"),
            bins: calib.bins,
            lr_thresh: calib.lr_thresh,
            line_fit_points: calib.line_fit_points,
            delta_bin: calib.delta_bin,
            sigma: DEFAULT_SIGMA,
            nsamp: DEFAULT_NSAMP,
            samprate: DEFAULT_SAMPRATE,
            buffer_size: DEFAULT_BUFFER_SIZE,
            notification_tolerance: DEFAULT_NOTIFICATION_TOLERANCE,
            i0_channel: I0Channel::default(),
            live: true,
            correction_mode: CorrectionMode::default(),
            calibration_phase_one_secs: DEFAULT_PHASE_ONE_SECS,
            calibration_phase_two_secs: DEFAULT_PHASE_TWO_SECS,
            calibration_rate: DEFAULT_CALIBRATION_RATE,
            sim_i0_level: sim.i0_level,
            sim_diff_level: sim.diff_level,
            sim_noise: sim.noise,
            sim_drop_rate: sim.drop_rate,
            sim_seed: sim.seed,
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful. Out-of-range monitor values are clamped with a warning
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        let mut config = serde_yaml::from_str::<Self>(&yaml_str)?;
        config.enforce_ranges();
        Ok(config)
    }

    /// Write the configuration to a YAML file
    pub fn write_config_file(&self, config_path: &Path) -> Result<(), ConfigError> {
        let yaml_str = serde_yaml::to_string(self)?;
        std::fs::write(config_path, yaml_str)?;
        Ok(())
    }

    /// Clamp the monitor parameters to their valid ranges
    pub fn enforce_ranges(&mut self) {
        let sigma = clamp_sigma(self.sigma).unwrap_or(DEFAULT_SIGMA);
        if sigma != self.sigma {
            log::warn!("Config sigma {} out of range, using {}", self.sigma, sigma);
            self.sigma = sigma;
        }
        let nsamp = clamp_nsamp(self.nsamp);
        if nsamp != self.nsamp {
            log::warn!("Config nsamp {} out of range, using {}", self.nsamp, nsamp);
            self.nsamp = nsamp;
        }
        let samprate = clamp_samprate(self.samprate);
        if samprate != self.samprate {
            log::warn!(
                "Config samprate {} out of range, using {}",
                self.samprate,
                samprate
            );
            self.samprate = samprate;
        }
    }

    /// Build the runtime monitor settings
    pub fn monitor_settings(&self) -> Settings {
        let mut settings = Settings::default();
        settings.set_sigma(self.sigma);
        settings.set_nsamp(self.nsamp);
        settings.set_samprate(self.samprate);
        settings.i0_channel = self.i0_channel;
        settings.live = self.live;
        settings.correction_mode = self.correction_mode;
        settings.buffer_size = self.buffer_size;
        settings.notification_tolerance = self.notification_tolerance;
        settings.phase_one =
            secs_or_default(self.calibration_phase_one_secs, DEFAULT_PHASE_ONE_SECS);
        settings.phase_two =
            secs_or_default(self.calibration_phase_two_secs, DEFAULT_PHASE_TWO_SECS);
        settings.calibration_rate = self.calibration_rate;
        settings
    }

    /// Build the offline calibration parameters
    pub fn calibration_params(&self) -> CalibrationParams {
        CalibrationParams {
            bins: self.bins,
            lr_thresh: self.lr_thresh,
            line_fit_points: self.line_fit_points,
            delta_bin: self.delta_bin,
        }
    }

    /// Build the simulated source parameters
    pub fn simulation_params(&self) -> SimulationParams {
        SimulationParams {
            i0_level: self.sim_i0_level,
            diff_level: self.sim_diff_level,
            noise: self.sim_noise,
            drop_rate: self.sim_drop_rate,
            seed: self.sim_seed,
        }
    }

    /// Get the path to the shot file used for offline calibration
    pub fn get_shot_file(&self) -> Result<PathBuf, ConfigError> {
        if self.shot_path.exists() {
            Ok(self.shot_path.clone())
        } else {
            Err(ConfigError::BadFilePath(self.shot_path.clone()))
        }
    }

    /// Get the path of the calibration artifact. The results directory must exist or be creatable
    pub fn get_results_file(&self) -> Result<PathBuf, ConfigError> {
        if !self.results_path.exists() {
            std::fs::create_dir_all(&self.results_path)?;
        }
        Ok(self.results_path.join(RESULTS_FILE_NAME))
    }
}

fn secs_or_default(secs: f64, default: f64) -> Duration {
    if secs.is_finite() && secs > 0.0 {
        Duration::from_secs_f64(secs)
    } else {
        Duration::from_secs_f64(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        let mut config = Config::default();
        config.sigma = 2.5;
        config.i0_channel = I0Channel::Wave8;
        config.write_config_file(&path).unwrap();
        let read = Config::read_config_file(&path).unwrap();
        assert_eq!(read.sigma, 2.5);
        assert_eq!(read.i0_channel, I0Channel::Wave8);
        assert_eq!(read.nsamp, DEFAULT_NSAMP);
    }

    #[test]
    fn test_missing_config_file() {
        let result = Config::read_config_file(Path::new("/definitely/not/here.yml"));
        assert!(matches!(result, Err(ConfigError::BadFilePath(_))));
    }

    #[test]
    fn test_out_of_range_values_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        std::fs::write(&path, "sigma: 12.0\nnsamp: 1\nsamprate: 1000\n").unwrap();
        let config = Config::read_config_file(&path).unwrap();
        assert_eq!(config.sigma, 5.0);
        assert_eq!(config.nsamp, 5);
        assert_eq!(config.samprate, 300);
        let settings = config.monitor_settings();
        assert_eq!(settings.samprate(), 300);
        assert_eq!(settings.buffer_size, DEFAULT_BUFFER_SIZE);
    }

    #[test]
    fn test_results_directory_created() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            results_path: dir.path().join("cal/Run_7"),
            ..Config::default()
        };
        let file = config.get_results_file().unwrap();
        assert!(dir.path().join("cal/Run_7").exists());
        assert_eq!(file.file_name().unwrap(), RESULTS_FILE_NAME);
    }
}
