//! Peak finding on I0 histograms and on averaged azimuthal profiles.
//!
//! `peak_lr` cuts an I0 distribution down to the population around its main peak,
//! `calc_azav_peak` locates the diffraction ring in a radial profile with a Gaussian on a
//! linear baseline, and `get_integrated_intensity` sums the bins around that peak.
use nalgebra::{Matrix5, Vector5};

use super::stats::{argmax, histogram, polyfit_line};

pub const LR_THRESH: f64 = 0.1;
pub const BINS: usize = 100;
pub const LINE_FIT_POINTS: usize = 5;
pub const DELTA_BIN: usize = 5;

const MAX_FIT_ITERATIONS: usize = 200;
const FIT_TOLERANCE: f64 = 1e-10;

/// Result of cutting a distribution around its histogram peak.
#[derive(Debug, Clone, PartialEq)]
pub struct PeakWindow {
    pub hist: Vec<u64>,
    pub edges: Vec<f64>,
    pub peak_idx: usize,
    pub left_idx: usize,
    pub right_idx: usize,
    pub low: f64,
    pub high: f64,
    pub med: f64,
}

/// Find max of the histogram, then search right and left until the population falls below
/// `threshold * peak_count`.
///
/// Assumes a unimodal distribution; a second peak of similar height produces a meaningless
/// cut. Ties on the maximum go to the lowest bin. When no bin on a side drops below the
/// threshold, that side's edge stays at the peak bin. None when the data has no finite values.
pub fn peak_lr(data: &[f64], threshold: f64, bins: usize) -> Option<PeakWindow> {
    let (hist, edges) = histogram(data, bins)?;

    let peak_val = *hist.iter().max()?;
    let peak_idx = hist.iter().position(|&c| c == peak_val)?;
    let cut = threshold * peak_val as f64;

    let right_idx = peak_idx
        + hist[peak_idx..]
            .iter()
            .position(|&c| (c as f64) < cut)
            .unwrap_or(0);
    let left_idx = peak_idx
        - hist[..peak_idx]
            .iter()
            .rev()
            .position(|&c| (c as f64) < cut)
            .unwrap_or(0);

    Some(PeakWindow {
        low: edges[left_idx],
        high: edges[right_idx],
        med: edges[peak_idx],
        hist,
        edges,
        peak_idx,
        left_idx,
        right_idx,
    })
}

/// Gaussian on a linear baseline: `a * exp(-((x - mean) / 2 / std)^2) + m * x + b`
pub fn gaussian(x: f64, a: f64, mean: f64, std: f64, m: f64, b: f64) -> f64 {
    a * (-((x - mean) / 2.0 / std).powi(2)).exp() + (m * x + b)
}

/// Fit the baseline line through the averages of the first and last `fit_points` bins.
///
/// Returns (slope, intercept), None when the profile is too short for two distinct ends.
pub fn fit_line(ave_azav: &[f64], fit_points: usize) -> Option<(f64, f64)> {
    let len = ave_azav.len();
    if fit_points == 0 || len < fit_points {
        return None;
    }
    let x0 = fit_points as f64 / 2.0;
    let x1 = len as f64 - fit_points as f64 / 2.0;
    let y0 = ave_azav[..fit_points].iter().sum::<f64>() / fit_points as f64;
    let y1 = ave_azav[len - fit_points..].iter().sum::<f64>() / fit_points as f64;
    polyfit_line(&[x0, x1], &[y0, y1])
}

/// Get the peak bin of an averaged azimuthal profile.
///
/// Fits a Gaussian with a linear offset; if the fit fails for any reason the index of the
/// raw maximum is used instead. Always returns an index inside the profile. None only for
/// an empty profile.
pub fn calc_azav_peak(ave_azav: &[f64], line_fit_points: usize) -> Option<usize> {
    let fallback = argmax(ave_azav)?;
    match fit_azav_gaussian(ave_azav, line_fit_points) {
        Some(params) => {
            let peak = params[1].round();
            if peak >= 0.0 && peak < ave_azav.len() as f64 {
                Some(peak as usize)
            } else {
                log::info!("Gaussian fit peak {} outside profile, using max", params[1]);
                Some(fallback)
            }
        }
        None => {
            log::info!("Failed to fit Gaussian, using peak");
            Some(fallback)
        }
    }
}

/// Sum the profile over `[peak_bin - delta_bin, peak_bin + delta_bin)`.
///
/// Out of range window ends are clipped to the profile, an empty window sums to zero.
pub fn get_integrated_intensity(ave_azav: &[f64], peak_bin: usize, delta_bin: usize) -> f64 {
    let low = peak_bin.saturating_sub(delta_bin).min(ave_azav.len());
    let high = peak_bin.saturating_add(delta_bin).min(ave_azav.len());
    if low >= high {
        return 0.0;
    }
    ave_azav[low..high].iter().sum()
}

/// Initial guess [a, mean, std, m, b] for the Gaussian fit
fn initial_guess(ave_azav: &[f64], line_fit_points: usize) -> Option<Vector5<f64>> {
    let len = ave_azav.len() as f64;
    let (m, b) = fit_line(ave_azav, line_fit_points)?;
    let total: f64 = ave_azav.iter().sum();
    if total == 0.0 || !total.is_finite() {
        return None;
    }
    let mean = ave_azav
        .iter()
        .enumerate()
        .map(|(i, v)| i as f64 * v)
        .sum::<f64>()
        / total;
    let std = (0..ave_azav.len())
        .map(|i| (i as f64 - mean).powi(2) / len)
        .sum::<f64>()
        .sqrt();
    let a = ave_azav.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let guess = Vector5::new(a, mean, std, m, b);
    if guess.iter().all(|p| p.is_finite()) && std > 0.0 {
        Some(guess)
    } else {
        None
    }
}

fn residuals_and_jacobian(
    x: &[f64],
    y: &[f64],
    p: &Vector5<f64>,
) -> (f64, Matrix5<f64>, Vector5<f64>) {
    let (a, mean, std, m, b) = (p[0], p[1], p[2], p[3], p[4]);
    let mut cost = 0.0;
    let mut jtj = Matrix5::<f64>::zeros();
    let mut jtr = Vector5::<f64>::zeros();
    for (&xi, &yi) in x.iter().zip(y.iter()) {
        let u = (xi - mean) / (2.0 * std);
        let e = (-u * u).exp();
        let r = gaussian(xi, a, mean, std, m, b) - yi;
        // d model / d [a, mean, std, m, b]
        let j = Vector5::new(e, a * e * u / std, a * e * 2.0 * u * u / std, xi, 1.0);
        cost += r * r;
        jtj += j * j.transpose();
        jtr += j * r;
    }
    (cost, jtj, jtr)
}

fn cost_at(x: &[f64], y: &[f64], p: &Vector5<f64>) -> f64 {
    x.iter()
        .zip(y.iter())
        .map(|(&xi, &yi)| {
            let r = gaussian(xi, p[0], p[1], p[2], p[3], p[4]) - yi;
            r * r
        })
        .sum()
}

/// Levenberg-Marquardt fit of the Gaussian-on-a-line model. Returns [a, mean, std, m, b]
fn fit_azav_gaussian(ave_azav: &[f64], line_fit_points: usize) -> Option<Vector5<f64>> {
    if ave_azav.len() < 5 || ave_azav.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let x: Vec<f64> = (0..ave_azav.len()).map(|i| i as f64).collect();
    let mut params = initial_guess(ave_azav, line_fit_points)?;
    let mut lambda = 1e-3;
    let mut converged = false;

    for _ in 0..MAX_FIT_ITERATIONS {
        let (cost, jtj, jtr) = residuals_and_jacobian(&x, ave_azav, &params);
        if !cost.is_finite() {
            return None;
        }

        let mut damped = jtj;
        for i in 0..5 {
            damped[(i, i)] += lambda * jtj[(i, i)].max(1e-12);
        }
        let step = damped.lu().solve(&(-jtr))?;
        if step.iter().any(|s| !s.is_finite()) {
            return None;
        }

        let trial = params + step;
        let trial_cost = cost_at(&x, ave_azav, &trial);
        if trial_cost.is_finite() && trial_cost <= cost {
            params = trial;
            lambda = (lambda / 10.0).max(1e-12);
            let rel_change = (cost - trial_cost) / cost.max(f64::MIN_POSITIVE);
            if rel_change < FIT_TOLERANCE || step.norm() < FIT_TOLERANCE {
                converged = true;
                break;
            }
        } else {
            lambda *= 10.0;
            if lambda > 1e12 {
                // No downhill step left; accept only if we are at a stationary point
                converged = jtr.norm() < 1e-6 * (1.0 + cost);
                break;
            }
        }
    }

    if converged && params.iter().all(|p| p.is_finite()) && params[2] != 0.0 {
        Some(params)
    } else {
        None
    }
}
