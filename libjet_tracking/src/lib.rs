//! # jet_tracking
//!
//! jet_tracking is beamline monitoring tooling for X-ray liquid jet experiments, written in
//! Rust. It has two halves:
//!
//! - an offline calibration which, from a batch of historical shots (an I0 value and an
//! azimuthally averaged diffraction profile per shot), derives the accepted I0 window, the
//! diffraction peak bin, an integrated intensity and a linear fit of integrated intensity
//! against I0;
//! - a streaming monitor which reads one (I0, diffraction) pair per shot, keeps rolling
//! windows of the last shots, averages them periodically, flags shots that fall below
//! their calibrated band and rolls the flags up into a single health status.
//!
//! ## Installation
//!
//! The only method of install is from source. If you have not used Rust before, see the
//! [Rust docs](https://www.rust-lang.org/tools/install) for installation instructions.
//!
//! To build and install the GUI use `cargo install --path ./jet_tracking` from the top
//! level repository. To build and install the CLI use
//! `cargo install --path ./jet_tracking_cli`.
//!
//! ## Configuration
//!
//! The GUI and CLI share a YAML configuration file. Configurations can be saved in the GUI
//! using File->Save and loaded using File->Open; the CLI writes a template with
//! `jet_tracking_cli new`. A configuration file looks like:
//!
//! ```yml
//! shot_path: None
//! results_path: None
//! bins: 100
//! lr_thresh: 0.1
//! line_fit_points: 5
//! delta_bin: 5
//! sigma: 1.0
//! nsamp: 50
//! samprate: 50
//! buffer_size: 300
//! notification_tolerance: 100
//! i0_channel: GasAttenuator
//! live: true
//! correction_mode: Manual
//! calibration_phase_one_secs: 2.0
//! calibration_phase_two_secs: 3.0
//! calibration_rate: 2.0
//! sim_i0_level: 0.8
//! sim_diff_level: 0.4
//! sim_noise: 0.05
//! sim_drop_rate: 0.01
//! sim_seed: null
//! ```
//!
//! `sigma` is limited to 0.1-5.0, `nsamp` to 5-300 and `samprate` to 2-300 Hz. Values
//! outside those ranges are clamped when the file is loaded.
//!
//! ## Shot files
//!
//! Offline calibration reads plain text shot files, one shot per line, the I0 value followed
//! by the azimuthal bins, comma separated. Lines starting with `#` are comments.
//!
//! ```text
//! # i0, then 100 azimuthal bins per shot
//! 0.9812,1.02,1.01,...
//! ```
//!
//! ## Output
//!
//! The offline calibration writes `calibration_results.yml` to the results directory:
//!
//! ```yml
//! i0_low: 0.81
//! i0_high: 1.17
//! peak_azav_bin: 42
//! left_azav_bin: 37
//! right_azav_bin: 47
//! slope_fit: 62.1
//! intercept: 10.3
//! sigma: 5.9
//! integrated_intensity: 72.4
//! n_shots_used: 962
//! created: 2024-07-30T17:02:11.482Z
//! ```
//!
//! Both applications also write a log file. If an error occurs the log contains the detailed
//! status of the run and the issue that occurred.
pub mod artifact;
pub mod buffer;
pub mod calibration;
pub mod config;
pub mod error;
pub mod live_calibration;
pub mod monitor;
pub mod peak;
pub mod sample;
pub mod settings;
pub mod shot_file;
pub mod source;
pub mod stats;
pub mod status;
pub mod synthetic;
