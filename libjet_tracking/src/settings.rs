use std::ops::RangeInclusive;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::source::I0Channel;

pub const SIGMA_RANGE: RangeInclusive<f64> = 0.1..=5.0;
pub const NSAMP_RANGE: RangeInclusive<usize> = 5..=300;
pub const SAMPRATE_RANGE: RangeInclusive<u32> = 2..=300;

pub const DEFAULT_SIGMA: f64 = 1.0;
pub const DEFAULT_NSAMP: usize = 50;
pub const DEFAULT_SAMPRATE: u32 = 50;
pub const DEFAULT_BUFFER_SIZE: usize = 300;
pub const DEFAULT_NOTIFICATION_TOLERANCE: usize = 100;
pub const DEFAULT_PHASE_ONE_SECS: f64 = 2.0;
pub const DEFAULT_PHASE_TWO_SECS: f64 = 3.0;
pub const DEFAULT_CALIBRATION_RATE: f64 = 2.0;

/// Motor correction mode. Accepted from the user and logged; no correction loop exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CorrectionMode {
    #[default]
    Manual,
    Automatic,
}

/// Runtime parameters of the streaming monitor.
///
/// The setters clamp sigma, nsamp and samprate to their valid ranges.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    sigma: f64,
    nsamp: usize,
    samprate: u32,
    pub i0_channel: I0Channel,
    pub live: bool,
    pub correction_mode: CorrectionMode,
    pub buffer_size: usize,
    pub notification_tolerance: usize,
    pub phase_one: Duration,
    pub phase_two: Duration,
    pub calibration_rate: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sigma: DEFAULT_SIGMA,
            nsamp: DEFAULT_NSAMP,
            samprate: DEFAULT_SAMPRATE,
            i0_channel: I0Channel::default(),
            live: true,
            correction_mode: CorrectionMode::default(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            notification_tolerance: DEFAULT_NOTIFICATION_TOLERANCE,
            phase_one: Duration::from_secs_f64(DEFAULT_PHASE_ONE_SECS),
            phase_two: Duration::from_secs_f64(DEFAULT_PHASE_TWO_SECS),
            calibration_rate: DEFAULT_CALIBRATION_RATE,
        }
    }
}

impl Settings {
    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    pub fn nsamp(&self) -> usize {
        self.nsamp
    }

    pub fn samprate(&self) -> u32 {
        self.samprate
    }

    /// Set the flagging multiplier, clamped to 0.1 - 5.0. NaN is ignored.
    pub fn set_sigma(&mut self, sigma: f64) {
        if let Some(value) = clamp_sigma(sigma) {
            self.sigma = value;
        }
    }

    /// Set the rolling-average period in samples, clamped to 5 - 300
    pub fn set_nsamp(&mut self, nsamp: usize) {
        self.nsamp = clamp_nsamp(nsamp);
    }

    /// Set the ingestion rate in samples per second, clamped to 2 - 300
    pub fn set_samprate(&mut self, samprate: u32) {
        self.samprate = clamp_samprate(samprate);
    }

    /// Time budget of one ingestion iteration
    pub fn sample_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.samprate as f64)
    }

    /// Time between two samples during a live calibration phase
    pub fn calibration_period(&self) -> Duration {
        if self.calibration_rate.is_finite() && self.calibration_rate > 0.0 {
            Duration::from_secs_f64(1.0 / self.calibration_rate)
        } else {
            Duration::from_secs_f64(1.0 / DEFAULT_CALIBRATION_RATE)
        }
    }
}

pub fn clamp_sigma(sigma: f64) -> Option<f64> {
    if sigma.is_nan() {
        None
    } else {
        Some(sigma.clamp(*SIGMA_RANGE.start(), *SIGMA_RANGE.end()))
    }
}

pub fn clamp_nsamp(nsamp: usize) -> usize {
    nsamp.clamp(*NSAMP_RANGE.start(), *NSAMP_RANGE.end())
}

pub fn clamp_samprate(samprate: u32) -> u32 {
    samprate.clamp(*SAMPRATE_RANGE.start(), *SAMPRATE_RANGE.end())
}

/// Parse user text for sigma. Non-numeric text keeps the last good value,
/// out-of-range numbers are clamped.
pub fn parse_sigma(text: &str, last_good: f64) -> f64 {
    match text.trim().parse::<f64>() {
        Ok(v) => clamp_sigma(v).unwrap_or(last_good),
        Err(_) => last_good,
    }
}

/// Parse user text for nsamp. Fractions are truncated, as the entry only accepts counts.
pub fn parse_nsamp(text: &str, last_good: usize) -> usize {
    match text.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => clamp_nsamp(v.max(0.0) as usize),
        _ => last_good,
    }
}

/// Parse user text for samprate
pub fn parse_samprate(text: &str, last_good: u32) -> u32 {
    match text.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => clamp_samprate(v.clamp(0.0, u32::MAX as f64) as u32),
        _ => last_good,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setters_clamp() {
        let mut settings = Settings::default();
        settings.set_sigma(10.0);
        assert_eq!(settings.sigma(), 5.0);
        settings.set_sigma(0.0);
        assert_eq!(settings.sigma(), 0.1);
        settings.set_sigma(f64::NAN);
        assert_eq!(settings.sigma(), 0.1);
        settings.set_nsamp(1);
        assert_eq!(settings.nsamp(), 5);
        settings.set_nsamp(1000);
        assert_eq!(settings.nsamp(), 300);
        settings.set_samprate(0);
        assert_eq!(settings.samprate(), 2);
        settings.set_samprate(301);
        assert_eq!(settings.samprate(), 300);
    }

    #[test]
    fn test_parse_rejects_text() {
        assert_eq!(parse_sigma("abc", 1.5), 1.5);
        assert_eq!(parse_sigma(" 2.5 ", 1.5), 2.5);
        assert_eq!(parse_sigma("7", 1.5), 5.0);
        assert_eq!(parse_nsamp("", 50), 50);
        assert_eq!(parse_nsamp("3", 50), 5);
        assert_eq!(parse_samprate("1e9", 50), 300);
        assert_eq!(parse_samprate("fast", 50), 50);
    }

    #[test]
    fn test_periods() {
        let mut settings = Settings::default();
        settings.set_samprate(50);
        assert_eq!(settings.sample_period(), Duration::from_millis(20));
        assert_eq!(settings.calibration_period(), Duration::from_millis(500));
    }
}
