use std::collections::VecDeque;
use std::path::Path;
use std::sync::mpsc;

use eframe::egui::{Color32, DragValue, RichText};
use egui_plot::{HLine, Legend, Line, Plot, PlotPoints};
use rfd::FileDialog;

use libjet_tracking::config::Config;
use libjet_tracking::live_calibration::CalibrationBands;
use libjet_tracking::monitor::{
    AverageSnapshot, BufferSnapshot, MonitorCommand, MonitorHandle, MonitorMessage, MonitorMode,
    MESSAGE_CAPACITY,
};
use libjet_tracking::settings::{CorrectionMode, NSAMP_RANGE, SAMPRATE_RANGE, SIGMA_RANGE};
use libjet_tracking::source::{share, I0Channel, SharedSource, UnavailableLive, ValueReader};
use libjet_tracking::status::{StatusLevel, StatusReport, MSG_NOT_CALIBRATED};

const MAX_LOG_LINES: usize = 200;
const PLOT_HEIGHT: f32 = 180.0;
const LIVE_UNAVAILABLE: &str =
    "No control system connection is available; live reads will fail. Use Simulated.";

fn render_error_dialog(show: &mut bool, ctx: &eframe::egui::Context) {
    eframe::egui::Window::new("Error")
        .open(show)
        .show(ctx, |ui| {
            ui.label("There was an error! Check the log file jet_tracking.log for more information.")
        });
}

fn status_color(level: StatusLevel) -> Color32 {
    match level {
        StatusLevel::Green => Color32::GREEN,
        StatusLevel::Yellow => Color32::YELLOW,
        StatusLevel::Orange => Color32::from_rgb(255, 165, 0),
        StatusLevel::Red => Color32::RED,
    }
}

/// Pair up a time window with a value window, skipping slots not yet filled
fn time_series(time: &[f64], values: &[f64]) -> PlotPoints {
    time.iter()
        .zip(values.iter())
        .filter(|(t, _)| **t > 0.0)
        .map(|(t, v)| [*t, *v])
        .collect()
}

/// One live plot: the per-shot values, their rolling average and the calibrated limit
fn render_quantity_plot(
    ui: &mut eframe::egui::Ui,
    name: &str,
    shots: (&[f64], &[f64]),
    averages: Option<(&[f64], &[f64])>,
    lower_limit: Option<f64>,
) {
    ui.label(RichText::new(name).color(Color32::LIGHT_BLUE).size(14.0));
    Plot::new(name)
        .height(PLOT_HEIGHT)
        .legend(Legend::default())
        .show_grid([true, true])
        .show(ui, |plot_ui| {
            plot_ui.line(
                Line::new(time_series(shots.0, shots.1))
                    .color(Color32::LIGHT_GRAY)
                    .name("shots"),
            );
            if let Some((time, values)) = averages {
                plot_ui.line(
                    Line::new(time_series(time, values))
                        .color(Color32::LIGHT_GREEN)
                        .width(2.0)
                        .name("average"),
                );
            }
            if let Some(limit) = lower_limit {
                plot_ui.hline(HLine::new(limit).color(Color32::RED).name("lower limit"));
            }
        });
}

/// The UI app which inherits the eframe::App trait.
///
/// Owns the one shared value reader and the streaming monitor started on top of it. Dropping
/// the app stops the monitor.
pub struct JetTrackingApp {
    config: Config,
    source: SharedSource,
    monitor: Option<MonitorHandle>,
    monitor_rx: mpsc::Receiver<MonitorMessage>,
    monitor_tx: mpsc::SyncSender<MonitorMessage>,
    mode: MonitorMode,
    status: StatusReport,
    bands: Option<CalibrationBands>,
    buffers: Option<BufferSnapshot>,
    averages: Option<AverageSnapshot>,
    log_lines: VecDeque<String>,
    show_error_window: bool,
}

impl JetTrackingApp {
    /// Create the application
    pub fn new(cc: &eframe::CreationContext<'_>) -> Self {
        let mut visuals = eframe::egui::Visuals::dark();
        visuals.override_text_color = Some(Color32::LIGHT_GRAY);
        cc.egui_ctx.set_visuals(visuals);
        let mut config = Config::default();
        if config.live {
            log::warn!("No control system connection; the UI starts on the simulated beam");
            config.live = false;
        }
        let source = share(ValueReader::new(
            Box::new(UnavailableLive),
            config.simulation_params(),
            config.live,
            config.i0_channel,
        ));
        let (tx, rx) = mpsc::sync_channel::<MonitorMessage>(MESSAGE_CAPACITY);
        JetTrackingApp {
            config,
            source,
            monitor: None,
            monitor_rx: rx,
            monitor_tx: tx,
            mode: MonitorMode::Running,
            status: StatusReport::new(MSG_NOT_CALIBRATED, StatusLevel::Orange),
            bands: None,
            buffers: None,
            averages: None,
            log_lines: VecDeque::new(),
            show_error_window: false,
        }
    }

    fn push_log(&mut self, line: String) {
        if self.log_lines.len() == MAX_LOG_LINES {
            self.log_lines.pop_front();
        }
        self.log_lines.push_back(line);
    }

    /// Live reads always fail without a control system client, so say so where the user looks
    fn warn_if_live(&mut self, before: &Config) {
        if self.config.live && !before.live {
            log::warn!("{LIVE_UNAVAILABLE}");
            self.push_log(String::from(LIVE_UNAVAILABLE));
        }
    }

    /// Start the monitor on the shared reader
    fn start_monitor(&mut self) {
        if self.monitor.is_some() {
            return;
        }
        match MonitorHandle::spawn(
            self.source.clone(),
            self.config.monitor_settings(),
            self.monitor_tx.clone(),
        ) {
            Ok(handle) => {
                log::info!("Monitor started from UI");
                self.push_log(String::from("Monitor started"));
                self.bands = None;
                self.monitor = Some(handle);
            }
            Err(e) => {
                log::error!("Could not start monitor: {e}");
                self.show_error_window = true;
            }
        }
    }

    /// Stop the monitor and wait for it
    fn stop_monitor(&mut self) {
        if let Some(handle) = self.monitor.take() {
            match handle.stop() {
                Ok(()) => log::info!("Monitor complete"),
                Err(e) => {
                    self.show_error_window = true;
                    log::error!("Monitor error: {e}");
                }
            }
            self.mode = MonitorMode::Running;
            self.push_log(String::from("Monitor stopped"));
        }
    }

    fn request_calibration(&mut self) {
        if self.monitor.is_none() {
            self.start_monitor();
        }
        if let Some(handle) = &self.monitor {
            handle.request_calibration();
        }
    }

    /// Forward changed settings to the running monitor
    fn send_changes(&self, before: &Config) {
        let Some(handle) = &self.monitor else {
            return;
        };
        let config = &self.config;
        let mut commands = Vec::new();
        if config.sigma != before.sigma {
            commands.push(MonitorCommand::SetSigma(config.sigma));
        }
        if config.nsamp != before.nsamp {
            commands.push(MonitorCommand::SetNsamp(config.nsamp));
        }
        if config.samprate != before.samprate {
            commands.push(MonitorCommand::SetSamprate(config.samprate));
        }
        if config.i0_channel != before.i0_channel {
            commands.push(MonitorCommand::SetI0Channel(config.i0_channel));
        }
        if config.live != before.live {
            commands.push(MonitorCommand::SetLive(config.live));
        }
        if config.correction_mode != before.correction_mode {
            commands.push(MonitorCommand::SetCorrectionMode(config.correction_mode));
        }
        for command in commands {
            if !handle.send(command) {
                log::warn!("Monitor is no longer receiving commands");
                break;
            }
        }
    }

    fn poll_messages(&mut self) {
        loop {
            match self.monitor_rx.try_recv() {
                Ok(MonitorMessage::Buffers(buffers)) => self.buffers = Some(buffers),
                Ok(MonitorMessage::Averages(averages)) => self.averages = Some(averages),
                Ok(MonitorMessage::Status(status)) => {
                    if status != self.status {
                        self.push_log(format!("Status: {}", status.message));
                    }
                    self.status = status;
                }
                Ok(MonitorMessage::Calibrated(bands)) => {
                    self.push_log(format!(
                        "Calibrated: I0 {:.4} +/- {:.4}, diff {:.4} +/- {:.4}",
                        bands.i0.mean, bands.i0.stdev, bands.diff.mean, bands.diff.stdev
                    ));
                    self.bands = Some(bands);
                }
                Ok(MonitorMessage::CalibrationFailed(reason)) => {
                    self.push_log(format!("Calibration failed: {reason}"));
                    self.bands = None;
                }
                Ok(MonitorMessage::ModeChanged(mode)) => {
                    if mode == MonitorMode::Calibrating {
                        self.push_log(String::from("Calibrating..."));
                    }
                    self.mode = mode;
                }
                Err(mpsc::TryRecvError::Empty) => break,
                Err(mpsc::TryRecvError::Disconnected) => {
                    log::error!("Channels became disconnected!");
                    self.show_error_window = true;
                    break;
                }
            }
        }
    }

    /// Write the current Config to a file
    fn write_config(&mut self, path: &Path) {
        if let Err(e) = self.config.write_config_file(path) {
            self.show_error_window = true;
            log::error!("Could not write config to {}: {e}", path.display());
        }
    }

    /// Read the Config from a file
    fn read_config(&mut self, path: &Path) {
        match Config::read_config_file(path) {
            Ok(conf) => {
                let before = std::mem::replace(&mut self.config, conf);
                self.send_changes(&before);
                self.warn_if_live(&before);
                if self.config.simulation_params() != before.simulation_params() {
                    log::info!("Simulation parameters take effect on the next application start");
                }
            }
            Err(e) => {
                self.show_error_window = true;
                log::error!("{}", e)
            }
        }
    }

    fn render_plots(&self, ui: &mut eframe::egui::Ui) {
        let Some(buffers) = &self.buffers else {
            ui.label("No data yet. Press Start.");
            return;
        };
        let sigma = self.config.sigma;
        let averages = self.averages.as_ref();
        render_quantity_plot(
            ui,
            "Ratio (diff / I0)",
            (&buffers.time, &buffers.ratio),
            averages.map(|a| (a.time.as_slice(), a.ratio.as_slice())),
            self.bands.map(|b| b.ratio.lower_limit(sigma)),
        );
        render_quantity_plot(
            ui,
            "I0",
            (&buffers.time, &buffers.i0),
            averages.map(|a| (a.time.as_slice(), a.i0.as_slice())),
            self.bands.map(|b| b.i0.lower_limit(sigma)),
        );
        render_quantity_plot(
            ui,
            "Diffraction intensity",
            (&buffers.time, &buffers.diff),
            averages.map(|a| (a.time.as_slice(), a.diff.as_slice())),
            self.bands.map(|b| b.diff.lower_limit(sigma)),
        );
    }

    fn render_controls(&mut self, ui: &mut eframe::egui::Ui) {
        ui.label(
            RichText::new("Configuration")
                .color(Color32::LIGHT_BLUE)
                .size(18.0),
        );
        eframe::egui::Grid::new("ConfigGrid").show(ui, |ui| {
            ui.label("Data source");
            ui.horizontal(|ui| {
                ui.radio_value(&mut self.config.live, true, "Live");
                ui.radio_value(&mut self.config.live, false, "Simulated");
            });
            ui.end_row();

            ui.label("Correction");
            ui.horizontal(|ui| {
                ui.radio_value(
                    &mut self.config.correction_mode,
                    CorrectionMode::Manual,
                    "Manual",
                );
                ui.radio_value(
                    &mut self.config.correction_mode,
                    CorrectionMode::Automatic,
                    "Automatic",
                );
            });
            ui.end_row();

            ui.label("Sigma");
            ui.add(
                DragValue::new(&mut self.config.sigma)
                    .speed(0.05)
                    .range(SIGMA_RANGE),
            );
            ui.end_row();

            ui.label("Number of samples");
            ui.add(
                DragValue::new(&mut self.config.nsamp)
                    .speed(1)
                    .range(NSAMP_RANGE),
            );
            ui.end_row();

            ui.label("Sampling rate (Hz)");
            ui.add(
                DragValue::new(&mut self.config.samprate)
                    .speed(1)
                    .range(SAMPRATE_RANGE),
            );
            ui.end_row();

            ui.label("I0 channel");
            ui.horizontal(|ui| {
                ui.selectable_value(
                    &mut self.config.i0_channel,
                    I0Channel::GasAttenuator,
                    I0Channel::GasAttenuator.label(),
                );
                ui.selectable_value(
                    &mut self.config.i0_channel,
                    I0Channel::Wave8,
                    I0Channel::Wave8.label(),
                );
            });
            ui.end_row();
        });

        ui.separator();
        ui.label(RichText::new("Status").color(Color32::LIGHT_BLUE).size(18.0));
        let tracking = match self.mode {
            MonitorMode::Calibrating => RichText::new("calibrating").color(Color32::LIGHT_BLUE),
            MonitorMode::Running => {
                RichText::new(&self.status.message).color(status_color(self.status.level))
            }
        };
        ui.label(tracking.size(20.0).strong());
        match &self.bands {
            Some(bands) => {
                ui.label(format!(
                    "Calibrated I0: {:.4} +/- {:.4}",
                    bands.i0.mean, bands.i0.stdev
                ));
                ui.label(format!(
                    "Calibrated diff: {:.4} +/- {:.4}",
                    bands.diff.mean, bands.diff.stdev
                ));
            }
            None => {
                ui.label("Calibrated I0: -");
                ui.label("Calibrated diff: -");
            }
        }

        ui.separator();
        ui.horizontal(|ui| {
            let running = self.monitor.is_some();
            if ui
                .add_enabled(
                    self.mode == MonitorMode::Running,
                    eframe::egui::Button::new("Calibrate"),
                )
                .clicked()
            {
                self.request_calibration();
            }
            if ui
                .add_enabled(!running, eframe::egui::Button::new("Start"))
                .clicked()
            {
                self.start_monitor();
            }
            if ui
                .add_enabled(running, eframe::egui::Button::new("Stop"))
                .clicked()
            {
                self.stop_monitor();
            }
        });

        ui.separator();
        ui.label(RichText::new("Messages").color(Color32::LIGHT_BLUE).size(18.0));
        eframe::egui::ScrollArea::vertical()
            .stick_to_bottom(true)
            .show(ui, |ui| {
                for line in self.log_lines.iter() {
                    ui.label(line);
                }
            });
    }
}

impl eframe::App for JetTrackingApp {
    fn update(&mut self, ctx: &eframe::egui::Context, _frame: &mut eframe::Frame) {
        self.poll_messages();
        if self.monitor.as_ref().is_some_and(|m| m.is_finished()) {
            self.stop_monitor();
        }
        render_error_dialog(&mut self.show_error_window, ctx);

        eframe::egui::TopBottomPanel::top("menu").show(ctx, |ui| {
            ui.menu_button("File", |ui| {
                if ui.button("Open...").clicked() {
                    if let Some(path) = FileDialog::new()
                        .set_directory(std::env::current_dir().unwrap_or_default())
                        .add_filter("YAML file", &["yaml", "yml"])
                        .pick_file()
                    {
                        self.read_config(&path);
                    }
                    ui.close_menu();
                }
                if ui.button("Save...").clicked() {
                    if let Some(path) = FileDialog::new()
                        .set_directory(std::env::current_dir().unwrap_or_default())
                        .add_filter("YAML file", &["yaml", "yml"])
                        .save_file()
                    {
                        self.write_config(&path);
                    }
                    ui.close_menu();
                }
            });
        });

        let before = self.config.clone();
        eframe::egui::SidePanel::right("controls")
            .min_width(320.0)
            .show(ctx, |ui| self.render_controls(ui));
        self.send_changes(&before);
        self.warn_if_live(&before);

        eframe::egui::CentralPanel::default().show(ctx, |ui| {
            eframe::egui::ScrollArea::vertical().show(ui, |ui| self.render_plots(ui));
        });

        ctx.request_repaint_after(std::time::Duration::from_millis(50));
    }
}
