//! Small statistics helpers shared by the calibration engine and the streaming monitor.
//!
//! Semantics follow the conventions the beamline analysis scripts were written against:
//! `sample_stdev` divides by n - 1, `population_stdev` by n, and `histogram` uses equal
//! width bins spanning the data with the last bin closed on the right.

/// Arithmetic mean. None for an empty slice
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (n - 1). None for fewer than two values
pub fn sample_stdev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let mu = mean(values)?;
    let ss: f64 = values.iter().map(|v| (v - mu) * (v - mu)).sum();
    Some((ss / (values.len() - 1) as f64).sqrt())
}

/// Population standard deviation (n). None for an empty slice
pub fn population_stdev(values: &[f64]) -> Option<f64> {
    let mu = mean(values)?;
    let ss: f64 = values.iter().map(|v| (v - mu) * (v - mu)).sum();
    Some((ss / values.len() as f64).sqrt())
}

/// Index of the first maximum, skipping NaN. None only for an empty slice
pub fn argmax(values: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (idx, &v) in values.iter().enumerate() {
        if v.is_nan() {
            continue;
        }
        match best {
            Some((_, b)) if v <= b => (),
            _ => best = Some((idx, v)),
        }
    }
    match best {
        Some((idx, _)) => Some(idx),
        None if values.is_empty() => None,
        None => Some(0),
    }
}

/// `n` evenly spaced values from `start` to `stop`, both inclusive
pub fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => vec![],
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            (0..n)
                .map(|i| {
                    if i == n - 1 {
                        stop
                    } else {
                        start + step * i as f64
                    }
                })
                .collect()
        }
    }
}

/// Histogram of the finite values with `bins` equal width bins.
///
/// Returns (counts, edges) with `edges.len() == bins + 1`. Identical data are spread over
/// a unit-wide range centered on the value. None when there are no finite values or no bins.
pub fn histogram(values: &[f64], bins: usize) -> Option<(Vec<u64>, Vec<f64>)> {
    if bins == 0 {
        return None;
    }
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    let (mut lo, mut hi) = finite
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    if finite.is_empty() {
        return None;
    }
    if lo == hi {
        lo -= 0.5;
        hi += 0.5;
    }
    let edges = linspace(lo, hi, bins + 1);
    let width = hi - lo;
    let mut counts = vec![0u64; bins];
    for v in finite {
        let mut idx = (((v - lo) / width) * bins as f64).floor() as usize;
        if idx >= bins {
            idx = bins - 1;
        }
        counts[idx] += 1;
    }
    Some((counts, edges))
}

/// Least squares line through (x, y). Returns (slope, intercept).
///
/// None when fewer than two points are given or x has no spread.
pub fn polyfit_line(x: &[f64], y: &[f64]) -> Option<(f64, f64)> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    let x_mean = mean(x)?;
    let y_mean = mean(y)?;
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    for (xi, yi) in x.iter().zip(y.iter()) {
        sxy += (xi - x_mean) * (yi - y_mean);
        sxx += (xi - x_mean) * (xi - x_mean);
    }
    if sxx == 0.0 || !sxx.is_finite() {
        return None;
    }
    let slope = sxy / sxx;
    Some((slope, y_mean - slope * x_mean))
}
