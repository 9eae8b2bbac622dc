use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use indicatif_log_bridge::LogWrapper;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use libjet_tracking::artifact::CalibrationArtifact;
use libjet_tracking::calibration::run_calibration;
use libjet_tracking::config::Config;
use libjet_tracking::monitor::{MonitorHandle, MonitorMessage, MonitorMode, MESSAGE_CAPACITY};
use libjet_tracking::settings::{parse_nsamp, parse_samprate, parse_sigma, Settings};
use libjet_tracking::shot_file::ShotRecords;
use libjet_tracking::source::{share, UnavailableLive, ValueReader};
use libjet_tracking::status::StatusReport;
use libjet_tracking::synthetic::{generate, SyntheticParams};

fn make_template_config(path: &Path) {
    match Config::default().write_config_file(path) {
        Ok(()) => log::info!("Done."),
        Err(e) => log::error!("Could not write template config: {e}"),
    }
}

fn generate_shots(config: &Config, args: &ArgMatches) {
    let params = SyntheticParams {
        n_shots: *args.get_one::<usize>("shots").unwrap_or(&1000),
        n_bins: config.bins,
        seed: args.get_one::<u64>("seed").copied(),
        ..SyntheticParams::default()
    };
    log::info!(
        "Generating {} synthetic shots of {} bins, ring at bin {}",
        params.n_shots,
        params.n_bins,
        params.peak_bin
    );
    let records = match generate(&params) {
        Ok(r) => r,
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };
    match records.write(&config.shot_path) {
        Ok(()) => log::info!("Wrote shots to {}", config.shot_path.display()),
        Err(e) => log::error!("{e}"),
    }
}

fn calibrate(config: &Config, pb_manager: &MultiProgress) {
    log::info!("Shot file: {}", config.shot_path.to_string_lossy());
    log::info!("Results Path: {}", config.results_path.to_string_lossy());

    let spinner = pb_manager.add(ProgressBar::new_spinner());
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message("Reading shots...");
    let records = match config
        .get_shot_file()
        .map_err(|e| e.to_string())
        .and_then(|path| ShotRecords::read(&path).map_err(|e| e.to_string()))
    {
        Ok(r) => r,
        Err(e) => {
            spinner.finish_and_clear();
            log::error!("{e}");
            return;
        }
    };
    log::info!(
        "Loaded {} shots of {} azimuthal bins.",
        records.n_shots(),
        records.n_bins()
    );

    spinner.set_message("Calibrating...");
    let result = run_calibration(&records, &config.calibration_params());
    spinner.finish_and_clear();
    let result = match result {
        Ok(r) => r,
        Err(e) => {
            log::error!("Calibration failed with error: {e}");
            return;
        }
    };
    for line in result.summary() {
        log::info!("{line}");
    }

    let written = CalibrationArtifact::from_result(&result)
        .map_err(|e| e.to_string())
        .and_then(|artifact| {
            let path = config.get_results_file().map_err(|e| e.to_string())?;
            artifact.write(&path).map_err(|e| e.to_string())
        });
    match written {
        Ok(()) => log::info!("Successfully calibrated!"),
        Err(e) => log::error!("Could not write calibration results: {e}"),
    }
}

fn warn_if_not_number(name: &str, text: &str) {
    if text.trim().parse::<f64>().is_err() {
        log::warn!("Ignoring {name} {text:?}: not a number; keeping the configured value");
    }
}

/// Apply the text overrides of the monitor command. Out of range values are clamped.
fn apply_overrides(settings: &mut Settings, args: &ArgMatches) {
    if let Some(text) = args.get_one::<String>("sigma") {
        warn_if_not_number("sigma", text);
        settings.set_sigma(parse_sigma(text, settings.sigma()));
    }
    if let Some(text) = args.get_one::<String>("nsamp") {
        warn_if_not_number("nsamp", text);
        settings.set_nsamp(parse_nsamp(text, settings.nsamp()));
    }
    if let Some(text) = args.get_one::<String>("samprate") {
        warn_if_not_number("samprate", text);
        settings.set_samprate(parse_samprate(text, settings.samprate()));
    }
}

fn monitor(config: &Config, args: &ArgMatches, pb_manager: &MultiProgress) {
    let duration = *args.get_one::<u64>("duration").unwrap_or(&60);
    let mut settings = config.monitor_settings();
    apply_overrides(&mut settings, args);
    if settings.live {
        log::warn!("No control system connection from the CLI; using the simulated beam");
        settings.live = false;
    }
    log::info!(
        "Monitoring for {duration} s -- sigma: {}, nsamp: {}, samprate: {} Hz",
        settings.sigma(),
        settings.nsamp(),
        settings.samprate()
    );

    let source = share(ValueReader::new(
        Box::new(UnavailableLive),
        config.simulation_params(),
        settings.live,
        settings.i0_channel,
    ));
    let (tx, rx) = mpsc::sync_channel::<MonitorMessage>(MESSAGE_CAPACITY);
    let handle = match MonitorHandle::spawn(source, settings, tx) {
        Ok(h) => h,
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };
    if args.get_flag("calibrate") {
        handle.request_calibration();
    }

    let pb = pb_manager.add(ProgressBar::new(duration));
    if let Ok(style) = ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} s {msg}") {
        pb.set_style(style);
    }
    let start = Instant::now();
    let mut last_status: Option<StatusReport> = None;
    let mut shots: u64 = 0;

    loop {
        std::thread::sleep(Duration::from_millis(200));
        for message in rx.try_iter() {
            match message {
                MonitorMessage::Buffers(_) => shots += 1,
                MonitorMessage::Status(status) => {
                    if last_status.as_ref() != Some(&status) {
                        log::info!("Status: {} ({})", status.message, status.level.name());
                        pb.set_message(status.message.clone());
                        last_status = Some(status);
                    }
                }
                MonitorMessage::Calibrated(bands) => log::info!(
                    "Calibrated -- i0: {:.4}+/-{:.4}, diff: {:.4}+/-{:.4}, ratio: {:.4}+/-{:.4}",
                    bands.i0.mean,
                    bands.i0.stdev,
                    bands.diff.mean,
                    bands.diff.stdev,
                    bands.ratio.mean,
                    bands.ratio.stdev
                ),
                MonitorMessage::CalibrationFailed(reason) => {
                    log::error!("Calibration failed: {reason}")
                }
                MonitorMessage::ModeChanged(MonitorMode::Calibrating) => {
                    pb.set_message("calibrating")
                }
                MonitorMessage::ModeChanged(MonitorMode::Running) => (),
                MonitorMessage::Averages(_) => (),
            }
        }

        let elapsed = start.elapsed().as_secs();
        pb.set_position(elapsed.min(duration));
        if elapsed >= duration || handle.is_finished() {
            break;
        }
    }

    pb.finish();
    match handle.stop() {
        Ok(()) => log::info!("Received {shots} buffer updates."),
        Err(e) => log::error!("Monitor failed with error: {e}"),
    }
}

fn main() {
    // Create a cli
    let matches = Command::new("jet_tracking_cli")
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .subcommand(
            Command::new("generate")
                .about("Write a synthetic shot file to the configured shot path")
                .arg(
                    Arg::new("shots")
                        .short('n')
                        .long("shots")
                        .value_parser(value_parser!(usize))
                        .help("Number of shots"),
                )
                .arg(
                    Arg::new("seed")
                        .short('s')
                        .long("seed")
                        .value_parser(value_parser!(u64))
                        .help("Random seed"),
                ),
        )
        .subcommand(
            Command::new("calibrate")
                .about("Run the offline calibration on the configured shot file"),
        )
        .subcommand(
            Command::new("monitor")
                .about("Run the streaming monitor on the simulated beam")
                .arg(
                    Arg::new("duration")
                        .short('d')
                        .long("duration")
                        .value_parser(value_parser!(u64))
                        .help("Seconds to monitor"),
                )
                .arg(
                    Arg::new("calibrate")
                        .short('c')
                        .long("calibrate")
                        .action(ArgAction::SetTrue)
                        .help("Take a live calibration first"),
                )
                .arg(Arg::new("sigma").long("sigma").help("Flagging band width (0.1 - 5.0)"))
                .arg(Arg::new("nsamp").long("nsamp").help("Samples per rolling average (5 - 300)"))
                .arg(Arg::new("samprate").long("samprate").help("Samples per second (2 - 300)")),
        )
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .global(true)
                .help("Path to the configuration file"),
        )
        .get_matches();

    // Initialize feedback
    let logger = simplelog::TermLogger::new(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    let pb_manager = MultiProgress::new();

    LogWrapper::new(pb_manager.clone(), logger)
        .try_init()
        .expect("Could not create logging/progress!");

    // Parse the cli
    let config_path = match matches.get_one::<String>("path") {
        Some(p) => PathBuf::from(p),
        None => {
            log::error!("A configuration path is required (-p/--path)");
            return;
        }
    };

    if let Some(("new", _)) = matches.subcommand() {
        log::info!(
            "Making a template config at {}...",
            config_path.to_string_lossy()
        );
        make_template_config(&config_path);
        return;
    }

    // Load our config
    log::info!("Loading config from {}...", config_path.to_string_lossy());
    let config = match Config::read_config_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };
    log::info!("Config successfully loaded.");

    match matches.subcommand() {
        Some(("generate", args)) => generate_shots(&config, args),
        Some(("calibrate", _)) => calibrate(&config, &pb_manager),
        Some(("monitor", args)) => monitor(&config, args, &pb_manager),
        _ => log::error!("No subcommand given; see --help"),
    }

    log::info!("Done.");
}
