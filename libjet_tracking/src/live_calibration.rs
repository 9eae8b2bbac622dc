//! The short live calibration pass run by the streaming monitor.
//!
//! Phase one samples the source for a fixed wall-clock time and takes the raw mean and
//! standard deviation of each quantity. Phase two samples again, drops values more than
//! two standard deviations *below* the phase one mean, keeping everything above it, and its
//! statistics become the flagging bands.
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::error::CalibrationError;
use super::sample::RawReading;
use super::settings::Settings;
use super::source::{read_shared, SharedSource};
use super::stats::{mean, sample_stdev};

/// Phase two rejects values below `mean - REJECTION_SIGMA * stdev` of phase one
pub const REJECTION_SIGMA: f64 = 2.0;

/// Reference (mean, standard deviation) of one monitored quantity
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct IntensityBand {
    pub mean: f64,
    pub stdev: f64,
}

impl IntensityBand {
    pub fn new(mean: f64, stdev: f64) -> Self {
        Self { mean, stdev }
    }

    /// Values strictly below `mean - sigma * stdev` are flagged
    pub fn lower_limit(&self, sigma: f64) -> f64 {
        self.mean - sigma * self.stdev
    }

    pub fn is_below(&self, value: f64, sigma: f64) -> bool {
        value < self.lower_limit(sigma)
    }

    fn from_values(
        values: &[f64],
        phase: u8,
        quantity: &'static str,
    ) -> Result<Self, CalibrationError> {
        match (mean(values), sample_stdev(values)) {
            (Some(mean), Some(stdev)) => Ok(Self { mean, stdev }),
            _ => Err(CalibrationError::InsufficientSamples {
                phase,
                quantity,
                count: values.len(),
            }),
        }
    }
}

/// Bands for all three monitored quantities
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationBands {
    pub i0: IntensityBand,
    pub diff: IntensityBand,
    pub ratio: IntensityBand,
}

#[derive(Debug, Default)]
struct PhaseSamples {
    i0: Vec<f64>,
    diff: Vec<f64>,
    ratio: Vec<f64>,
    /// Readings with at least one non-finite quantity
    invalid: usize,
}

impl PhaseSamples {
    fn push(&mut self, reading: &RawReading) {
        self.push_above(reading, [f64::NEG_INFINITY; 3]);
    }

    /// Keep each quantity independently unless it sits too far below its reference mean
    fn push_filtered(&mut self, reading: &RawReading, reference: &CalibrationBands) {
        self.push_above(
            reading,
            [
                reference.i0.lower_limit(REJECTION_SIGMA),
                reference.diff.lower_limit(REJECTION_SIGMA),
                reference.ratio.lower_limit(REJECTION_SIGMA),
            ],
        );
    }

    /// Non-finite values never enter the statistics. The ratio of a reading with a
    /// non-finite channel is not valid either, even though it reads as 0.
    fn push_above(&mut self, reading: &RawReading, floors: [f64; 3]) {
        let ratio = if reading.is_finite() {
            reading.ratio()
        } else {
            self.invalid += 1;
            f64::NAN
        };
        let targets = [&mut self.i0, &mut self.diff, &mut self.ratio];
        let values = [reading.i0, reading.diff, ratio];
        for ((target, value), floor) in targets.into_iter().zip(values).zip(floors) {
            if value.is_finite() && value >= floor {
                target.push(value);
            }
        }
    }

    fn bands(&self, phase: u8) -> Result<CalibrationBands, CalibrationError> {
        if self.invalid > 0 {
            log::warn!(
                "Calibration phase {phase} skipped non-finite values in {} readings",
                self.invalid
            );
        }
        Ok(CalibrationBands {
            i0: IntensityBand::from_values(&self.i0, phase, "i0")?,
            diff: IntensityBand::from_values(&self.diff, phase, "diff")?,
            ratio: IntensityBand::from_values(&self.ratio, phase, "ratio")?,
        })
    }
}

/// Raw statistics of a set of readings (phase one)
pub fn raw_bands(readings: &[RawReading]) -> Result<CalibrationBands, CalibrationError> {
    let mut samples = PhaseSamples::default();
    readings.iter().for_each(|r| samples.push(r));
    samples.bands(1)
}

/// Statistics after one-sided low outlier rejection against `reference` (phase two)
pub fn filtered_bands(
    readings: &[RawReading],
    reference: &CalibrationBands,
) -> Result<CalibrationBands, CalibrationError> {
    let mut samples = PhaseSamples::default();
    readings
        .iter()
        .for_each(|r| samples.push_filtered(r, reference));
    samples.bands(2)
}

/// Sample the source until the deadline passes. Read errors are logged and skipped.
fn collect_phase(
    source: &SharedSource,
    duration: Duration,
    period: Duration,
    stop: &AtomicBool,
    on_tick: &mut dyn FnMut(),
) -> Result<Vec<RawReading>, CalibrationError> {
    let deadline = Instant::now() + duration;
    let mut readings = Vec::new();
    loop {
        if stop.load(Ordering::Relaxed) {
            return Err(CalibrationError::Cancelled);
        }
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        on_tick();
        match read_shared(source) {
            Ok(reading) => readings.push(reading),
            Err(e) => log::warn!("Calibration sample skipped: {e}"),
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        std::thread::sleep(period.min(remaining));
    }
    Ok(readings)
}

/// Run both calibration phases against the live source.
///
/// Each phase ends on its wall-clock deadline no matter how many samples arrived. A phase
/// without at least two valid samples of every quantity fails the calibration.
pub fn calibrate(
    source: &SharedSource,
    settings: &Settings,
    stop: &AtomicBool,
) -> Result<CalibrationBands, CalibrationError> {
    calibrate_with(source, settings, stop, &mut || ())
}

/// `calibrate`, calling `on_tick` before every read so the caller can keep servicing
/// requests (a channel switch, say) while the pass runs.
pub fn calibrate_with(
    source: &SharedSource,
    settings: &Settings,
    stop: &AtomicBool,
    on_tick: &mut dyn FnMut(),
) -> Result<CalibrationBands, CalibrationError> {
    let period = settings.calibration_period();

    log::info!(
        "Calibration phase 1: sampling for {:.1} s",
        settings.phase_one.as_secs_f64()
    );
    let first = collect_phase(source, settings.phase_one, period, stop, on_tick)?;
    let reference = raw_bands(&first)?;
    log::info!(
        "Calibration phase 1 done with {} samples -- i0: {:.4} +/- {:.4}",
        first.len(),
        reference.i0.mean,
        reference.i0.stdev
    );

    log::info!(
        "Calibration phase 2: sampling for {:.1} s",
        settings.phase_two.as_secs_f64()
    );
    let second = collect_phase(source, settings.phase_two, period, stop, on_tick)?;
    let bands = filtered_bands(&second, &reference)?;
    log::info!(
        "Calibration phase 2 done with {} samples -- i0: {:.4}+/-{:.4}, diff: {:.4}+/-{:.4}, \
         ratio: {:.4}+/-{:.4}",
        second.len(),
        bands.i0.mean,
        bands.i0.stdev,
        bands.diff.mean,
        bands.diff.stdev,
        bands.ratio.mean,
        bands.ratio.stdev
    );
    Ok(bands)
}
