//! The offline calibration engine.
//!
//! From a batch of historical shots: cut the I0 distribution around its main peak, average
//! the azimuthal profiles of the accepted shots, locate the diffraction peak bin, integrate
//! each accepted shot around it and fit integrated intensity against I0.
use ndarray::{Array1, Axis};

use super::error::CalibrationError;
use super::peak::{
    calc_azav_peak, get_integrated_intensity, peak_lr, PeakWindow, BINS, DELTA_BIN,
    LINE_FIT_POINTS, LR_THRESH,
};
use super::shot_file::ShotRecords;
use super::stats::{linspace, polyfit_line, population_stdev};

/// Tunables of the offline calibration
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationParams {
    /// Histogram bins for the I0 distribution, also the number of points in the fitted line
    pub bins: usize,
    /// Fraction of the peak count at which the I0 window is cut
    pub lr_thresh: f64,
    /// Bins averaged at each end of the profile for the baseline guess
    pub line_fit_points: usize,
    /// Half width of the integration window around the peak bin
    pub delta_bin: usize,
}

impl Default for CalibrationParams {
    fn default() -> Self {
        Self {
            bins: BINS,
            lr_thresh: LR_THRESH,
            line_fit_points: LINE_FIT_POINTS,
            delta_bin: DELTA_BIN,
        }
    }
}

/// Linear response of integrated intensity to I0
#[derive(Debug, Clone, PartialEq)]
pub struct LinearFit {
    /// Sampled fit line for plotting
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub slope: f64,
    pub intercept: f64,
    /// Population standard deviation of the integrated intensities
    pub sigma: f64,
}

/// Fit `intensity = slope * i0 + intercept` and sample the line over `[i_low, i_high]`.
///
/// `sigma` is the spread of the intensities themselves, not of their residuals from the line.
pub fn fit_limits(
    i0_data: &[f64],
    peak_vals: &[f64],
    i_low: f64,
    i_high: f64,
    bins: usize,
) -> Result<LinearFit, CalibrationError> {
    if i0_data.len() != peak_vals.len() {
        return Err(CalibrationError::MismatchedLengths(
            i0_data.len(),
            peak_vals.len(),
        ));
    }
    let (slope, intercept) = polyfit_line(i0_data, peak_vals)
        .ok_or(CalibrationError::DegenerateFit(i0_data.len()))?;
    let sigma =
        population_stdev(peak_vals).ok_or(CalibrationError::DegenerateFit(peak_vals.len()))?;
    let x = linspace(i_low, i_high, bins);
    let y = x.iter().map(|xi| xi * slope + intercept).collect();
    Ok(LinearFit {
        x,
        y,
        slope,
        intercept,
        sigma,
    })
}

/// Everything the offline calibration derives, for the artifact and for plotting.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationResult {
    pub i0_low: f64,
    pub i0_high: f64,
    pub i0_med: f64,
    /// Histogram of all I0 values with the accepted window
    pub i0_window: PeakWindow,
    pub ave_azav: Vec<f64>,
    pub peak_azav_bin: usize,
    /// May be negative or past the profile; integration clips it
    pub left_azav_bin: i64,
    pub right_azav_bin: i64,
    /// Integrated intensity of the averaged profile
    pub integrated_intensity: f64,
    /// I0 and integrated intensity of every accepted shot
    pub i0_used: Vec<f64>,
    pub peak_vals: Vec<f64>,
    pub fit: LinearFit,
}

impl CalibrationResult {
    pub fn n_shots_used(&self) -> usize {
        self.i0_used.len()
    }

    /// Human readable summary, one entry per line
    pub fn summary(&self) -> Vec<String> {
        vec![
            format!(
                "I0 window: ({:.4}, {:.4}), median {:.4}",
                self.i0_low, self.i0_high, self.i0_med
            ),
            format!(
                "Shots used: {} of {}",
                self.n_shots_used(),
                self.i0_window.hist.iter().sum::<u64>()
            ),
            format!(
                "Azimuthal peak bin: {} (integrating bins {} to {})",
                self.peak_azav_bin, self.left_azav_bin, self.right_azav_bin
            ),
            format!("Integrated intensity: {:.4}", self.integrated_intensity),
            format!(
                "Fit: intensity = {:.4} * I0 + {:.4}, sigma {:.4}",
                self.fit.slope, self.fit.intercept, self.fit.sigma
            ),
        ]
    }
}

/// Run the offline calibration over a batch of shots
pub fn run_calibration(
    records: &ShotRecords,
    params: &CalibrationParams,
) -> Result<CalibrationResult, CalibrationError> {
    if records.is_empty() || records.n_bins() == 0 {
        return Err(CalibrationError::NoData);
    }
    if records.n_shots() != records.azav.nrows() {
        return Err(CalibrationError::MismatchedLengths(
            records.n_shots(),
            records.azav.nrows(),
        ));
    }

    let window =
        peak_lr(&records.i0, params.lr_thresh, params.bins).ok_or(CalibrationError::NoData)?;
    let (i0_low, i0_high) = (window.low, window.high);

    let accepted: Vec<usize> = records
        .i0
        .iter()
        .enumerate()
        .filter(|(_, &i0)| i0 > i0_low && i0 < i0_high)
        .map(|(idx, _)| idx)
        .collect();
    if accepted.is_empty() {
        return Err(CalibrationError::NoShotsInWindow(i0_low, i0_high));
    }
    log::info!(
        "Accepted {} of {} shots with I0 in ({i0_low:.4}, {i0_high:.4})",
        accepted.len(),
        records.n_shots()
    );

    let azav_use = records.azav.select(Axis(0), &accepted);
    let ave_azav: Array1<f64> = azav_use
        .mean_axis(Axis(0))
        .ok_or(CalibrationError::NoShotsInWindow(i0_low, i0_high))?;
    let ave_azav = ave_azav.to_vec();

    let peak_azav_bin =
        calc_azav_peak(&ave_azav, params.line_fit_points).ok_or(CalibrationError::NoAzavPeak)?;
    let integrated_intensity = get_integrated_intensity(&ave_azav, peak_azav_bin, params.delta_bin);

    let i0_used: Vec<f64> = accepted.iter().map(|&idx| records.i0[idx]).collect();
    let peak_vals: Vec<f64> = azav_use
        .outer_iter()
        .map(|profile| {
            let profile = profile.to_vec();
            get_integrated_intensity(&profile, peak_azav_bin, params.delta_bin)
        })
        .collect();

    let fit = fit_limits(&i0_used, &peak_vals, i0_low, i0_high, params.bins)?;

    Ok(CalibrationResult {
        i0_low,
        i0_high,
        i0_med: window.med,
        i0_window: window,
        ave_azav,
        peak_azav_bin,
        left_azav_bin: peak_azav_bin as i64 - params.delta_bin as i64,
        right_azav_bin: peak_azav_bin as i64 + params.delta_bin as i64,
        integrated_intensity,
        i0_used,
        peak_vals,
        fit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_fit_limits_population_sigma() {
        let i0 = [1.0, 2.0, 3.0, 4.0];
        let vals = [2.0, 4.0, 6.0, 8.0];
        let fit = fit_limits(&i0, &vals, 1.0, 4.0, 4).unwrap();
        assert_relative_eq!(fit.slope, 2.0, epsilon = 1e-12);
        assert_relative_eq!(fit.intercept, 0.0, epsilon = 1e-12);
        // perfect fit, yet sigma is the spread of the values: sqrt(5)
        assert_relative_eq!(fit.sigma, 5.0_f64.sqrt(), epsilon = 1e-12);
        assert_eq!(fit.x, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(fit.y, vec![2.0, 4.0, 6.0, 8.0]);
    }

    #[test]
    fn test_fit_limits_degenerate() {
        assert!(matches!(
            fit_limits(&[1.0, 1.0], &[2.0, 3.0], 0.0, 1.0, 10),
            Err(CalibrationError::DegenerateFit(2))
        ));
        assert!(matches!(
            fit_limits(&[1.0, 2.0], &[2.0], 0.0, 1.0, 10),
            Err(CalibrationError::MismatchedLengths(2, 1))
        ));
    }

    #[test]
    fn test_run_calibration_rejects_empty() {
        let records = ShotRecords::from_profiles(vec![], &[]).unwrap();
        assert!(matches!(
            run_calibration(&records, &CalibrationParams::default()),
            Err(CalibrationError::NoData)
        ));
    }

    #[test]
    fn test_run_calibration_small_batch() {
        // I0 peaked in [4, 5) over [0, 10], profile peaked at bin 6 scaled by I0
        let mut i0 = vec![0.0, 10.0];
        for (bin, count) in [1, 5, 10, 20, 40, 20, 10, 5, 1, 1].iter().enumerate() {
            for k in 0..*count {
                i0.push(bin as f64 + (k as f64 + 0.5) / *count as f64);
            }
        }
        let profiles: Vec<Vec<f64>> = i0
            .iter()
            .map(|shot_i0| {
                (0..16)
                    .map(|bin| {
                        let d = bin as f64 - 6.0;
                        shot_i0 * 10.0 * (-(d * d) / 8.0).exp() + 0.5
                    })
                    .collect()
            })
            .collect();
        let records = ShotRecords::from_profiles(i0, &profiles).unwrap();
        let params = CalibrationParams {
            bins: 10,
            lr_thresh: 0.1,
            line_fit_points: 3,
            delta_bin: 2,
        };
        let result = run_calibration(&records, &params).unwrap();
        assert_eq!(result.peak_azav_bin, 6);
        assert_eq!(result.left_azav_bin, 4);
        assert_eq!(result.right_azav_bin, 8);
        // bins 0, 8 and 9 fall outside the window
        assert_relative_eq!(result.i0_low, 1.0, epsilon = 1e-12);
        assert_relative_eq!(result.i0_high, 8.0, epsilon = 1e-12);
        assert_eq!(result.n_shots_used(), 110);
        assert!(result.i0_used.iter().all(|&v| v > result.i0_low && v < result.i0_high));
        assert!(result.fit.slope > 0.0);
        assert_eq!(result.fit.x.len(), 10);
        assert_eq!(result.summary().len(), 5);
    }
}
