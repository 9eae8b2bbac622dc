use serde::{Deserialize, Serialize};
use std::path::Path;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use super::calibration::CalibrationResult;
use super::error::ArtifactError;

/// The record an offline calibration leaves behind, serialized to YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationArtifact {
    pub i0_low: f64,
    pub i0_high: f64,
    pub peak_azav_bin: usize,
    pub left_azav_bin: i64,
    pub right_azav_bin: i64,
    pub slope_fit: f64,
    pub intercept: f64,
    pub sigma: f64,
    pub integrated_intensity: f64,
    pub n_shots_used: usize,
    /// UTC, RFC 3339
    pub created: String,
}

impl CalibrationArtifact {
    /// Stamp a calibration result with the current time
    pub fn from_result(result: &CalibrationResult) -> Result<Self, ArtifactError> {
        Ok(Self {
            i0_low: result.i0_low,
            i0_high: result.i0_high,
            peak_azav_bin: result.peak_azav_bin,
            left_azav_bin: result.left_azav_bin,
            right_azav_bin: result.right_azav_bin,
            slope_fit: result.fit.slope,
            intercept: result.fit.intercept,
            sigma: result.fit.sigma,
            integrated_intensity: result.integrated_intensity,
            n_shots_used: result.n_shots_used(),
            created: OffsetDateTime::now_utc().format(&Rfc3339)?,
        })
    }

    pub fn write(&self, path: &Path) -> Result<(), ArtifactError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let yaml_str = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml_str)?;
        log::info!("Wrote calibration results to {}", path.display());
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self, ArtifactError> {
        let yaml_str = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{run_calibration, CalibrationParams};
    use crate::synthetic::{generate, SyntheticParams};

    #[test]
    fn test_artifact_file() {
        let records = generate(&SyntheticParams {
            n_shots: 1000,
            seed: Some(11),
            ..SyntheticParams::default()
        })
        .unwrap();
        let result = run_calibration(&records, &CalibrationParams::default()).unwrap();
        let artifact = CalibrationArtifact::from_result(&result).unwrap();
        assert_eq!(artifact.n_shots_used, result.n_shots_used());
        assert_eq!(
            artifact.right_azav_bin - artifact.left_azav_bin,
            2 * CalibrationParams::default().delta_bin as i64
        );
        assert!(artifact.created.ends_with('Z'));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Run_3/calibration_results.yml");
        artifact.write(&path).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("peak_azav_bin:"));
        assert!(contents.contains("slope_fit:"));
        assert_eq!(CalibrationArtifact::read(&path).unwrap(), artifact);
    }
}
