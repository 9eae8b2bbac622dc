use serde::{Deserialize, Serialize};

use super::buffer::RollingBuffer;

pub const MSG_NOT_CALIBRATED: &str = "not calibrated";
pub const MSG_MISSED_SHOT: &str = "warning, missed shots";
pub const MSG_DROPPED_SHOT: &str = "lots of dropped shots";
pub const MSG_LOW_INTENSITY: &str = "low intensity";
pub const MSG_GOOD: &str = "everything is good";

/// Severity of a status report, in increasing order of urgency
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StatusLevel {
    Green,
    Yellow,
    Orange,
    Red,
}

impl StatusLevel {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Green => "green",
            Self::Yellow => "yellow",
            Self::Orange => "orange",
            Self::Red => "red",
        }
    }
}

/// The kinds of anomalous shot the monitor flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagKind {
    /// Diffraction/I0 ratio below its band
    LowIntensity,
    /// Diffraction below its band
    MissedShot,
    /// I0 below its band
    DroppedShot,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub message: String,
    pub level: StatusLevel,
}

impl StatusReport {
    pub fn new(message: &str, level: StatusLevel) -> Self {
        Self {
            message: String::from(message),
            level,
        }
    }
}

/// The three flagged-event windows. A non-zero entry is a flagged shot.
#[derive(Debug, Clone, PartialEq)]
pub struct FlagBuffers {
    pub low_intensity: RollingBuffer,
    pub missed_shot: RollingBuffer,
    pub dropped_shot: RollingBuffer,
}

impl FlagBuffers {
    pub fn get_mut(&mut self, kind: FlagKind) -> &mut RollingBuffer {
        match kind {
            FlagKind::LowIntensity => &mut self.low_intensity,
            FlagKind::MissedShot => &mut self.missed_shot,
            FlagKind::DroppedShot => &mut self.dropped_shot,
        }
    }
}

/// Roll the flag windows up into one status.
///
/// Missed shots outrank dropped shots, which outrank low intensity. Only counts strictly
/// above `tolerance` raise a warning. An uncalibrated monitor always reports so.
pub fn evaluate_status(flags: &FlagBuffers, tolerance: usize, calibrated: bool) -> StatusReport {
    if !calibrated {
        return StatusReport::new(MSG_NOT_CALIBRATED, StatusLevel::Orange);
    }
    if flags.missed_shot.count_nonzero() > tolerance {
        StatusReport::new(MSG_MISSED_SHOT, StatusLevel::Red)
    } else if flags.dropped_shot.count_nonzero() > tolerance {
        StatusReport::new(MSG_DROPPED_SHOT, StatusLevel::Yellow)
    } else if flags.low_intensity.count_nonzero() > tolerance {
        StatusReport::new(MSG_LOW_INTENSITY, StatusLevel::Orange)
    } else {
        StatusReport::new(MSG_GOOD, StatusLevel::Green)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags_with(low: usize, missed: usize, dropped: usize) -> FlagBuffers {
        let mut flags = FlagBuffers {
            low_intensity: RollingBuffer::new(300).unwrap(),
            missed_shot: RollingBuffer::new(300).unwrap(),
            dropped_shot: RollingBuffer::new(300).unwrap(),
        };
        for _ in 0..low {
            flags.low_intensity.push(1.0);
        }
        for _ in 0..missed {
            flags.missed_shot.push(1.0);
        }
        for _ in 0..dropped {
            flags.dropped_shot.push(1.0);
        }
        flags
    }

    #[test]
    fn test_missed_shot_has_priority() {
        let report = evaluate_status(&flags_with(150, 150, 150), 100, true);
        assert_eq!(report.message, MSG_MISSED_SHOT);
        assert_eq!(report.level, StatusLevel::Red);
    }

    #[test]
    fn test_dropped_over_low_intensity() {
        let report = evaluate_status(&flags_with(150, 10, 150), 100, true);
        assert_eq!(report.level, StatusLevel::Yellow);
        let report = evaluate_status(&flags_with(150, 10, 10), 100, true);
        assert_eq!(report, StatusReport::new(MSG_LOW_INTENSITY, StatusLevel::Orange));
    }

    #[test]
    fn test_tolerance_is_strict() {
        let report = evaluate_status(&flags_with(100, 100, 100), 100, true);
        assert_eq!(report.level, StatusLevel::Green);
        assert_eq!(report.message, MSG_GOOD);
    }

    #[test]
    fn test_uncalibrated_ignores_flags() {
        let report = evaluate_status(&flags_with(300, 300, 300), 100, false);
        assert_eq!(report.message, MSG_NOT_CALIBRATED);
        assert_eq!(report.level, StatusLevel::Orange);
    }
}
