//! Synthetic calibration data: a Gaussian diffraction ring on a linear baseline whose
//! amplitude follows I0, with additive noise and a normally distributed I0.
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use super::error::SyntheticError;
use super::peak::gaussian;
use super::shot_file::ShotRecords;

#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticParams {
    pub n_shots: usize,
    pub n_bins: usize,
    /// True ring position, in bins
    pub peak_bin: f64,
    /// Width parameter of the ring, same convention as `peak::gaussian`
    pub peak_width: f64,
    /// Ring amplitude per unit I0
    pub gain: f64,
    pub baseline_slope: f64,
    pub baseline_intercept: f64,
    /// Standard deviation of the additive per-bin noise
    pub noise: f64,
    pub i0_mean: f64,
    pub i0_stdev: f64,
    pub seed: Option<u64>,
}

impl Default for SyntheticParams {
    fn default() -> Self {
        Self {
            n_shots: 1000,
            n_bins: 100,
            peak_bin: 42.0,
            peak_width: 4.0,
            gain: 10.0,
            baseline_slope: 0.01,
            baseline_intercept: 1.0,
            noise: 0.1,
            i0_mean: 1.0,
            i0_stdev: 0.1,
            seed: None,
        }
    }
}

impl SyntheticParams {
    /// The noise-free profile of a shot with the given I0
    pub fn clean_profile(&self, i0: f64) -> Vec<f64> {
        (0..self.n_bins)
            .map(|bin| {
                gaussian(
                    bin as f64,
                    self.gain * i0,
                    self.peak_bin,
                    self.peak_width,
                    self.baseline_slope,
                    self.baseline_intercept,
                )
            })
            .collect()
    }

    /// Slope of integrated intensity against I0 for an integration window of
    /// `[peak_bin - delta_bin, peak_bin + delta_bin)`
    pub fn expected_slope(&self, peak_bin: usize, delta_bin: usize) -> f64 {
        let low = peak_bin.saturating_sub(delta_bin);
        let high = (peak_bin + delta_bin).min(self.n_bins);
        (low..high)
            .map(|bin| gaussian(bin as f64, self.gain, self.peak_bin, self.peak_width, 0.0, 0.0))
            .sum()
    }
}

/// Generate a batch of shots
pub fn generate(params: &SyntheticParams) -> Result<ShotRecords, SyntheticError> {
    if params.n_shots == 0 || params.n_bins == 0 {
        return Err(SyntheticError::EmptyShape);
    }
    let mut rng = match params.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let i0_dist = Normal::new(params.i0_mean, params.i0_stdev)
        .map_err(|e| SyntheticError::BadParameter("i0_stdev", e))?;
    let noise_dist =
        Normal::new(0.0, params.noise).map_err(|e| SyntheticError::BadParameter("noise", e))?;

    let i0: Vec<f64> = (0..params.n_shots)
        .map(|_| i0_dist.sample(&mut rng))
        .collect();
    let mut azav = Array2::<f64>::zeros((params.n_shots, params.n_bins));
    for (mut row, &shot_i0) in azav.outer_iter_mut().zip(i0.iter()) {
        for (value, clean) in row.iter_mut().zip(params.clean_profile(shot_i0)) {
            *value = clean + noise_dist.sample(&mut rng);
        }
    }
    log::debug!(
        "Generated {} synthetic shots of {} bins",
        params.n_shots,
        params.n_bins
    );
    Ok(ShotRecords { i0, azav })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_generate_shape_and_seed() {
        let params = SyntheticParams {
            n_shots: 20,
            n_bins: 30,
            peak_bin: 10.0,
            seed: Some(3),
            ..SyntheticParams::default()
        };
        let first = generate(&params).unwrap();
        let second = generate(&params).unwrap();
        assert_eq!(first.azav.shape(), &[20, 30]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_noise_free_profile_peaks_at_ring() {
        let params = SyntheticParams {
            baseline_slope: 0.0,
            ..SyntheticParams::default()
        };
        let profile = params.clean_profile(1.0);
        assert_relative_eq!(profile[42], 11.0);
        assert!(profile[41] < profile[42] && profile[43] < profile[42]);
    }

    #[test]
    fn test_bad_parameters() {
        let params = SyntheticParams {
            noise: f64::NAN,
            ..SyntheticParams::default()
        };
        assert!(matches!(
            generate(&params),
            Err(SyntheticError::BadParameter("noise", _))
        ));
        let params = SyntheticParams {
            n_shots: 0,
            ..SyntheticParams::default()
        };
        assert!(matches!(generate(&params), Err(SyntheticError::EmptyShape)));
    }
}
