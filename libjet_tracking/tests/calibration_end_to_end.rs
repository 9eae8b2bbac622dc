use libjet_tracking::artifact::CalibrationArtifact;
use libjet_tracking::calibration::{run_calibration, CalibrationParams};
use libjet_tracking::config::Config;
use libjet_tracking::shot_file::ShotRecords;
use libjet_tracking::synthetic::{generate, SyntheticParams};

fn synthetic_run(seed: u64) -> (SyntheticParams, ShotRecords) {
    let params = SyntheticParams {
        n_shots: 1000,
        n_bins: 100,
        peak_bin: 42.0,
        seed: Some(seed),
        ..SyntheticParams::default()
    };
    let records = generate(&params).unwrap();
    (params, records)
}

#[test]
fn test_recovers_injected_peak_and_slope() {
    for seed in [1, 2, 3] {
        let (truth, records) = synthetic_run(seed);
        let params = CalibrationParams::default();
        let result = run_calibration(&records, &params).unwrap();

        let peak_error = (result.peak_azav_bin as f64 - truth.peak_bin).abs();
        assert!(
            peak_error <= 1.0,
            "seed {}: peak bin {} too far from {}",
            seed,
            result.peak_azav_bin,
            truth.peak_bin
        );

        let expected = truth.expected_slope(result.peak_azav_bin, params.delta_bin);
        let relative = (result.fit.slope - expected).abs() / expected;
        assert!(
            relative < 0.05,
            "seed {}: slope {} vs expected {}",
            seed,
            result.fit.slope,
            expected
        );

        assert!(result.i0_low < truth.i0_mean && truth.i0_mean < result.i0_high);
        assert!(result.n_shots_used() > 500);
    }
}

#[test]
fn test_pipeline_through_files() {
    let dir = tempfile::tempdir().unwrap();
    let (_, records) = synthetic_run(9);
    let shot_path = dir.path().join("shots.txt");
    records.write(&shot_path).unwrap();

    let config = Config {
        shot_path: shot_path.clone(),
        results_path: dir.path().join("results"),
        ..Config::default()
    };
    let read_back = ShotRecords::read(&config.get_shot_file().unwrap()).unwrap();
    assert_eq!(read_back.n_shots(), 1000);

    let result = run_calibration(&read_back, &config.calibration_params()).unwrap();
    let artifact = CalibrationArtifact::from_result(&result).unwrap();
    let results_file = config.get_results_file().unwrap();
    artifact.write(&results_file).unwrap();

    let stored = CalibrationArtifact::read(&results_file).unwrap();
    assert_eq!(stored.peak_azav_bin, result.peak_azav_bin);
    assert_eq!(stored.slope_fit, result.fit.slope);
    assert_eq!(stored.sigma, result.fit.sigma);
}
