/// Divide, mapping a zero or invalid denominator (and any invalid result) to 0.
///
/// Readings that failed to decode arrive as NaN, so NaN/inf play the role of an invalid value.
pub fn divide_or_zero(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 || !denominator.is_finite() || !numerator.is_finite() {
        return 0.0;
    }
    let result = numerator / denominator;
    if result.is_finite() {
        result
    } else {
        0.0
    }
}

/// One raw read of the sample source: the selected I0 channel and the diffraction intensity.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RawReading {
    pub i0: f64,
    pub diff: f64,
}

impl RawReading {
    pub fn new(i0: f64, diff: f64) -> Self {
        Self { i0, diff }
    }

    /// `diff / i0`, 0 when I0 is zero or invalid
    pub fn ratio(&self) -> f64 {
        divide_or_zero(self.diff, self.i0)
    }

    pub fn is_finite(&self) -> bool {
        self.i0.is_finite() && self.diff.is_finite()
    }
}

/// One experiment event as seen by the streaming monitor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShotSample {
    pub i0: f64,
    pub diff: f64,
    pub ratio: f64,
    /// Seconds since the monitor started
    pub timestamp: f64,
}

impl ShotSample {
    pub fn new(reading: RawReading, timestamp: f64) -> Self {
        Self {
            i0: reading.i0,
            diff: reading.diff,
            ratio: reading.ratio(),
            timestamp,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.i0.is_finite() && self.diff.is_finite() && self.ratio.is_finite()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratio_fallbacks() {
        assert_eq!(RawReading::new(0.0, 5.0).ratio(), 0.0);
        assert_eq!(RawReading::new(f64::NAN, 5.0).ratio(), 0.0);
        assert_eq!(RawReading::new(f64::INFINITY, 5.0).ratio(), 0.0);
        assert_eq!(RawReading::new(2.0, 5.0).ratio(), 2.5);
    }

    #[test]
    fn test_divide_overflow_is_zero() {
        assert_eq!(divide_or_zero(f64::MAX, 1e-300), 0.0);
        assert_eq!(divide_or_zero(-4.0, 2.0), -2.0);
    }

    #[test]
    fn test_shot_sample_carries_ratio() {
        let shot = ShotSample::new(RawReading::new(4.0, 2.0), 1.5);
        assert_eq!(shot.ratio, 0.5);
        assert_eq!(shot.timestamp, 1.5);
    }

    #[test]
    fn test_non_finite_readings() {
        assert!(RawReading::new(1.0, 2.0).is_finite());
        assert!(!RawReading::new(f64::NAN, 2.0).is_finite());
        assert!(!RawReading::new(1.0, f64::INFINITY).is_finite());
        // the ratio falls back to 0 but the sample is still invalid
        let shot = ShotSample::new(RawReading::new(f64::NAN, 2.0), 0.0);
        assert_eq!(shot.ratio, 0.0);
        assert!(!shot.is_finite());
    }
}
