//! # jet_tracking
//!
//! Part of the jet_tracking crate family.
//!
//! This is the jet tracking monitor with a GUI using [egui](https://github.com/emilk/egui).
//!
//! ## Install
//!
//! Use `cargo install --path ./jet_tracking`
//!
//! ## Use
//!
//! To launch the application simply invoke it after it is installed
//!
//! ```bash
//! jet_tracking
//! ```
//!
//! Click Start to begin streaming, then Calibrate to take a short live calibration. The
//! status area turns green while the beam and jet are healthy.
//!
//! ## Controls
//!
//! - Live / Simulated: read the beamline channels or the built in simulated beam
//! - Manual / Automatic: correction mode. Recorded only, no motor is moved
//! - Sigma: width of the flagging band in standard deviations (0.1 - 5.0)
//! - Number of samples: rolling averages are taken every this many shots (5 - 300)
//! - Sampling rate: shots read per second (2 - 300)
//! - I0 channel: Gas Attenuator or Wave8
//!
//! Configurations can be saved using File->Save and loaded using File->Open

mod app;
use app::JetTrackingApp;
use std::fs::File;

/// The program entry point
fn main() {
    // Setup logging to a file
    match File::create("./jet_tracking.log") {
        Ok(log_file) => {
            if let Err(e) = simplelog::WriteLogger::init(
                simplelog::LevelFilter::Info,
                simplelog::Config::default(),
                log_file,
            ) {
                eprintln!("Could not initialize logging: {e}");
            }
        }
        Err(e) => eprintln!("Could not create log file jet_tracking.log: {e}"),
    }
    log::info!("Starting Jet Tracking UI");

    let native_options = eframe::NativeOptions {
        viewport: eframe::egui::ViewportBuilder::default()
            .with_title("Jet Tracking")
            .with_inner_size(eframe::epaint::vec2(1100.0, 700.0))
            .with_min_inner_size(eframe::epaint::vec2(800.0, 500.0)),
        ..Default::default()
    };
    match eframe::run_native(
        "jet_tracking",
        native_options,
        Box::new(|cc| Ok(Box::new(JetTrackingApp::new(cc)))),
    ) {
        Ok(()) => (),
        Err(e) => log::error!("Eframe error: {}", e),
    }
}
