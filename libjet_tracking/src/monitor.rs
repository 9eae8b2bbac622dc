//! The streaming monitor.
//!
//! `StreamingMonitor` holds the rolling windows and does the per-shot bookkeeping; it has
//! no notion of threads or time and is driven one `ShotSample` at a time. `MonitorHandle`
//! runs it on its own thread against a `SharedSource`, paced to the sample rate, receiving
//! `MonitorCommand`s and emitting `MonitorMessage`s over mpsc channels.
//!
//! The output channel is bounded. When the consumer falls behind, buffer and average
//! snapshots are dropped; events wait on the monitor side until there is room, with only the
//! newest pending status kept.
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use super::buffer::RollingBuffer;
use super::error::{CalibrationError, MonitorError};
use super::live_calibration::{calibrate_with, CalibrationBands};
use super::sample::ShotSample;
use super::settings::{CorrectionMode, Settings};
use super::source::{read_finite, I0Channel, SharedSource};
use super::status::{evaluate_status, FlagBuffers, FlagKind, StatusReport};

/// A flagged reading of exactly zero is stored as this so it still counts as a flag
pub const FLAGGED_ZERO: f64 = f64::MIN_POSITIVE;

/// Consecutive source failures between two repeated warnings
const SOURCE_FAILURE_LOG_INTERVAL: u64 = 500;

/// Suggested capacity of the bounded channel handed to `MonitorHandle::spawn`
pub const MESSAGE_CAPACITY: usize = 64;

/// Dropped snapshots between two repeated notices
const DROPPED_SNAPSHOT_LOG_INTERVAL: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorMode {
    Running,
    Calibrating,
}

/// Configuration changes and requests sent to a running monitor
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorCommand {
    SetSigma(f64),
    SetNsamp(usize),
    SetSamprate(u32),
    SetI0Channel(I0Channel),
    SetLive(bool),
    SetCorrectionMode(CorrectionMode),
    Calibrate,
}

/// Copy of the per-shot windows, oldest first
#[derive(Debug, Clone, PartialEq)]
pub struct BufferSnapshot {
    pub i0: Vec<f64>,
    pub diff: Vec<f64>,
    pub ratio: Vec<f64>,
    pub time: Vec<f64>,
    pub low_intensity: Vec<f64>,
    pub missed_shot: Vec<f64>,
    pub dropped_shot: Vec<f64>,
}

/// Copy of the rolling-average windows, oldest first
#[derive(Debug, Clone, PartialEq)]
pub struct AverageSnapshot {
    pub i0: Vec<f64>,
    pub diff: Vec<f64>,
    pub ratio: Vec<f64>,
    pub time: Vec<f64>,
}

/// Messages sent from the monitor thread to its consumers
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorMessage {
    Status(StatusReport),
    Buffers(BufferSnapshot),
    Averages(AverageSnapshot),
    Calibrated(CalibrationBands),
    CalibrationFailed(String),
    ModeChanged(MonitorMode),
}

#[derive(Debug, Clone, PartialEq)]
struct QuantityBuffers {
    i0: RollingBuffer,
    diff: RollingBuffer,
    ratio: RollingBuffer,
    time: RollingBuffer,
}

impl QuantityBuffers {
    fn new(capacity: usize) -> Result<Self, MonitorError> {
        Ok(Self {
            i0: RollingBuffer::new(capacity)?,
            diff: RollingBuffer::new(capacity)?,
            ratio: RollingBuffer::new(capacity)?,
            time: RollingBuffer::new(capacity)?,
        })
    }
}

/// What a single ingested sample caused
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IngestOutcome {
    /// The sample had a non-finite reading and was not recorded
    pub rejected: bool,
    /// Flags raised for this sample
    pub flagged: Vec<FlagKind>,
    /// The rolling averages received a new point
    pub averages_updated: bool,
    /// Status re-evaluated on an nsamp boundary
    pub status: Option<StatusReport>,
}

/// Rolling buffers, calibration bands and flagging state of one monitor.
#[derive(Debug, Clone)]
pub struct StreamingMonitor {
    settings: Settings,
    mode: MonitorMode,
    calibrated: bool,
    count: u64,
    bands: CalibrationBands,
    buffers: QuantityBuffers,
    flags: FlagBuffers,
    averages: QuantityBuffers,
}

impl StreamingMonitor {
    /// Create a monitor in running mode, uncalibrated. Fails on a zero buffer size.
    pub fn new(settings: Settings) -> Result<Self, MonitorError> {
        let capacity = settings.buffer_size;
        Ok(Self {
            buffers: QuantityBuffers::new(capacity)?,
            flags: FlagBuffers {
                low_intensity: RollingBuffer::new(capacity)?,
                missed_shot: RollingBuffer::new(capacity)?,
                dropped_shot: RollingBuffer::new(capacity)?,
            },
            averages: QuantityBuffers::new(capacity)?,
            settings,
            mode: MonitorMode::Running,
            calibrated: false,
            count: 0,
            bands: CalibrationBands::default(),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn mode(&self) -> MonitorMode {
        self.mode
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    /// Number of samples ingested in running mode
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn bands(&self) -> &CalibrationBands {
        &self.bands
    }

    pub fn flags(&self) -> &FlagBuffers {
        &self.flags
    }

    /// Current status without waiting for the next nsamp boundary
    pub fn status(&self) -> StatusReport {
        evaluate_status(
            &self.flags,
            self.settings.notification_tolerance,
            self.calibrated,
        )
    }

    /// Apply a command. Returns the new mode when it changed.
    pub fn apply(&mut self, command: MonitorCommand) -> Option<MonitorMode> {
        match command {
            MonitorCommand::SetSigma(sigma) => self.settings.set_sigma(sigma),
            MonitorCommand::SetNsamp(nsamp) => self.settings.set_nsamp(nsamp),
            MonitorCommand::SetSamprate(rate) => self.settings.set_samprate(rate),
            MonitorCommand::SetI0Channel(channel) => self.settings.i0_channel = channel,
            MonitorCommand::SetLive(live) => self.settings.live = live,
            MonitorCommand::SetCorrectionMode(mode) => {
                if mode != self.settings.correction_mode {
                    log::info!("Correction mode set to {mode:?}; no motor correction is performed");
                }
                self.settings.correction_mode = mode;
            }
            MonitorCommand::Calibrate => return self.begin_calibration(),
        }
        None
    }

    /// Enter calibration mode. The previous calibration no longer counts.
    pub fn begin_calibration(&mut self) -> Option<MonitorMode> {
        self.calibrated = false;
        if self.mode == MonitorMode::Calibrating {
            return None;
        }
        log::info!("Monitor entering calibration mode");
        self.mode = MonitorMode::Calibrating;
        Some(self.mode)
    }

    /// Finish a calibration pass. On success the bands are published to the flagging logic.
    pub fn finish_calibration(&mut self, result: &Result<CalibrationBands, CalibrationError>) {
        match result {
            Ok(bands) => {
                self.bands = *bands;
                self.calibrated = true;
                log::info!("Monitor calibrated");
            }
            Err(e) => {
                self.calibrated = false;
                log::error!("Calibration failed: {e}");
            }
        }
        self.mode = MonitorMode::Running;
    }

    /// Take one sample in running mode. Samples offered while calibrating are ignored and
    /// samples with a non-finite reading are rejected.
    pub fn ingest(&mut self, sample: &ShotSample) -> IngestOutcome {
        let mut outcome = IngestOutcome::default();
        if self.mode != MonitorMode::Running {
            return outcome;
        }
        if !sample.is_finite() {
            outcome.rejected = true;
            return outcome;
        }

        let past_first_fill = self.count >= self.settings.buffer_size as u64;
        self.count += 1;
        self.buffers.i0.push(sample.i0);
        self.buffers.diff.push(sample.diff);
        self.buffers.ratio.push(sample.ratio);
        self.buffers.time.push(sample.timestamp);

        if past_first_fill {
            outcome.flagged = self.flag_event(sample);
        }

        if self.count % self.settings.nsamp() as u64 == 0 {
            outcome.averages_updated = self.update_averages(sample.timestamp);
            outcome.status = Some(self.status());
        }
        outcome
    }

    /// Compare the latest sample against the bands and record a flag (or 0) per kind
    fn flag_event(&mut self, sample: &ShotSample) -> Vec<FlagKind> {
        let sigma = self.settings.sigma();
        let checks = [
            (FlagKind::LowIntensity, sample.ratio, self.bands.ratio),
            (FlagKind::DroppedShot, sample.i0, self.bands.i0),
            (FlagKind::MissedShot, sample.diff, self.bands.diff),
        ];
        let mut flagged = Vec::new();
        for (kind, value, band) in checks {
            if band.is_below(value, sigma) {
                let recorded = if value == 0.0 { FLAGGED_ZERO } else { value };
                self.flags.get_mut(kind).push(recorded);
                flagged.push(kind);
            } else {
                self.flags.get_mut(kind).push(0.0);
            }
        }
        flagged
    }

    /// Append the means of the current windows, leaving out dropped shots
    fn update_averages(&mut self, timestamp: f64) -> bool {
        let dropped = &self.flags.dropped_shot;
        let means = (
            self.buffers.i0.masked_mean(dropped),
            self.buffers.diff.masked_mean(dropped),
            self.buffers.ratio.masked_mean(dropped),
        );
        match means {
            (Some(i0), Some(diff), Some(ratio)) => {
                self.averages.i0.push(i0);
                self.averages.diff.push(diff);
                self.averages.ratio.push(ratio);
                self.averages.time.push(timestamp);
                true
            }
            _ => {
                log::debug!("Every shot in the window was dropped; no average this period");
                false
            }
        }
    }

    pub fn buffer_snapshot(&self) -> BufferSnapshot {
        BufferSnapshot {
            i0: self.buffers.i0.to_vec(),
            diff: self.buffers.diff.to_vec(),
            ratio: self.buffers.ratio.to_vec(),
            time: self.buffers.time.to_vec(),
            low_intensity: self.flags.low_intensity.to_vec(),
            missed_shot: self.flags.missed_shot.to_vec(),
            dropped_shot: self.flags.dropped_shot.to_vec(),
        }
    }

    pub fn average_snapshot(&self) -> AverageSnapshot {
        AverageSnapshot {
            i0: self.averages.i0.to_vec(),
            diff: self.averages.diff.to_vec(),
            ratio: self.averages.ratio.to_vec(),
            time: self.averages.time.to_vec(),
        }
    }
}

/// Handle to a monitor running on its own thread.
///
/// Dropping the handle stops the thread and waits for it.
#[derive(Debug)]
pub struct MonitorHandle {
    stop: Arc<AtomicBool>,
    commands: Sender<MonitorCommand>,
    worker: Option<JoinHandle<Result<(), MonitorError>>>,
}

impl MonitorHandle {
    /// Build the monitor and start its ingestion thread.
    ///
    /// The monitor state is constructed before the thread starts, so configuration errors
    /// surface here.
    pub fn spawn(
        source: SharedSource,
        settings: Settings,
        tx: SyncSender<MonitorMessage>,
    ) -> Result<Self, MonitorError> {
        let monitor = StreamingMonitor::new(settings)?;
        let stop = Arc::new(AtomicBool::new(false));
        let (command_tx, command_rx) = mpsc::channel::<MonitorCommand>();
        let thread_stop = stop.clone();
        let worker = std::thread::Builder::new()
            .name(String::from("jet_monitor"))
            .spawn(move || {
                run_monitor(monitor, source, command_rx, Outbox::new(tx), thread_stop)
            })?;
        Ok(Self {
            stop,
            commands: command_tx,
            worker: Some(worker),
        })
    }

    /// Send a command to the monitor. Returns false if the monitor thread is gone
    pub fn send(&self, command: MonitorCommand) -> bool {
        self.commands.send(command).is_ok()
    }

    pub fn request_calibration(&self) -> bool {
        self.send(MonitorCommand::Calibrate)
    }

    pub fn is_finished(&self) -> bool {
        match &self.worker {
            Some(worker) => worker.is_finished(),
            None => true,
        }
    }

    /// Ask the thread to stop at its next iteration boundary and wait for it
    pub fn stop(mut self) -> Result<(), MonitorError> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<(), MonitorError> {
        self.stop.store(true, Ordering::Relaxed);
        match self.worker.take() {
            Some(worker) => match worker.join() {
                Ok(result) => result,
                Err(_) => Err(MonitorError::Panicked),
            },
            None => Ok(()),
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::error!("Monitor stopped with error: {e}");
        }
    }
}

/// Sending side of the bounded output channel
#[derive(Debug)]
struct Outbox {
    tx: SyncSender<MonitorMessage>,
    pending: VecDeque<MonitorMessage>,
    dropped: u64,
}

impl Outbox {
    fn new(tx: SyncSender<MonitorMessage>) -> Self {
        Self {
            tx,
            pending: VecDeque::new(),
            dropped: 0,
        }
    }

    /// Queue an event. A newer status replaces one still waiting.
    fn event(&mut self, message: MonitorMessage) -> Result<(), MonitorError> {
        if matches!(message, MonitorMessage::Status(_)) {
            self.pending.retain(|m| !matches!(m, MonitorMessage::Status(_)));
        }
        self.pending.push_back(message);
        self.flush()
    }

    /// Send a snapshot if there is room, otherwise drop it
    fn snapshot(&mut self, message: MonitorMessage) -> Result<(), MonitorError> {
        self.flush()?;
        if !self.pending.is_empty() {
            self.drop_snapshot();
            return Ok(());
        }
        match self.tx.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.drop_snapshot();
                Ok(())
            }
            Err(TrySendError::Disconnected(message)) => Err(mpsc::SendError(message).into()),
        }
    }

    /// Move waiting events into the channel, oldest first, until it is full
    fn flush(&mut self) -> Result<(), MonitorError> {
        while let Some(message) = self.pending.pop_front() {
            match self.tx.try_send(message) {
                Ok(()) => (),
                Err(TrySendError::Full(message)) => {
                    self.pending.push_front(message);
                    break;
                }
                Err(TrySendError::Disconnected(message)) => {
                    return Err(mpsc::SendError(message).into())
                }
            }
        }
        Ok(())
    }

    fn drop_snapshot(&mut self) {
        if self.dropped % DROPPED_SNAPSHOT_LOG_INTERVAL == 0 {
            log::debug!("Monitor consumer is behind; dropped {} snapshots", self.dropped + 1);
        }
        self.dropped += 1;
    }
}

/// Push the reader-facing settings down to the shared source
fn sync_source(source: &SharedSource, settings: &Settings) {
    match source.lock() {
        Ok(mut guard) => {
            guard.set_live(settings.live);
            guard.set_i0_channel(settings.i0_channel);
        }
        Err(_) => log::error!("Sample source lock poisoned; source settings not applied"),
    }
}

/// Apply every queued command, re-syncing the source when a reader setting changed.
/// Returns the new mode if a command changed it.
fn drain_commands(
    monitor: &mut StreamingMonitor,
    commands: &Receiver<MonitorCommand>,
    source: &SharedSource,
) -> Option<MonitorMode> {
    let mut source_dirty = false;
    let mut mode_change = None;
    while let Ok(command) = commands.try_recv() {
        source_dirty |= matches!(
            command,
            MonitorCommand::SetLive(_) | MonitorCommand::SetI0Channel(_)
        );
        if let Some(mode) = monitor.apply(command) {
            mode_change = Some(mode);
        }
    }
    if source_dirty {
        sync_source(source, monitor.settings());
    }
    mode_change
}

/// The ingestion loop. Runs until the stop flag is set or a consumer hangs up.
fn run_monitor(
    mut monitor: StreamingMonitor,
    source: SharedSource,
    commands: Receiver<MonitorCommand>,
    mut outbox: Outbox,
    stop: Arc<AtomicBool>,
) -> Result<(), MonitorError> {
    log::info!(
        "Monitor started -- sigma: {}, nsamp: {}, samprate: {} Hz, I0 channel: {}",
        monitor.settings().sigma(),
        monitor.settings().nsamp(),
        monitor.settings().samprate(),
        monitor.settings().i0_channel.label()
    );
    sync_source(&source, monitor.settings());
    outbox.event(MonitorMessage::Status(monitor.status()))?;

    let start = Instant::now();
    let mut source_failures: u64 = 0;

    while !stop.load(Ordering::Relaxed) {
        let iteration_start = Instant::now();

        if let Some(mode) = drain_commands(&mut monitor, &commands, &source) {
            outbox.event(MonitorMessage::ModeChanged(mode))?;
        }

        if monitor.mode() == MonitorMode::Calibrating {
            let settings = monitor.settings().clone();
            // No command changes the mode mid-pass; a repeated calibrate request is a no-op
            let result = calibrate_with(&source, &settings, &stop, &mut || {
                drain_commands(&mut monitor, &commands, &source);
            });
            if let Err(CalibrationError::Cancelled) = result {
                log::info!("Calibration interrupted by stop request");
                break;
            }
            monitor.finish_calibration(&result);
            match result {
                Ok(bands) => outbox.event(MonitorMessage::Calibrated(bands))?,
                Err(e) => outbox.event(MonitorMessage::CalibrationFailed(e.to_string()))?,
            }
            outbox.event(MonitorMessage::ModeChanged(monitor.mode()))?;
            outbox.event(MonitorMessage::Status(monitor.status()))?;
            continue;
        }

        match read_finite(&source) {
            Ok(reading) => {
                if source_failures > 0 {
                    log::info!("Sample source recovered after {source_failures} failed reads");
                    source_failures = 0;
                }
                let sample = ShotSample::new(reading, start.elapsed().as_secs_f64());
                let outcome = monitor.ingest(&sample);
                outbox.snapshot(MonitorMessage::Buffers(monitor.buffer_snapshot()))?;
                if outcome.averages_updated {
                    outbox.snapshot(MonitorMessage::Averages(monitor.average_snapshot()))?;
                }
                if let Some(status) = outcome.status {
                    outbox.event(MonitorMessage::Status(status))?;
                }
            }
            Err(e) => {
                if source_failures % SOURCE_FAILURE_LOG_INTERVAL == 0 {
                    log::warn!("Sample source read failed: {e}");
                }
                source_failures += 1;
                // keep waiting events moving even while the source is down
                outbox.flush()?;
            }
        }

        let period = monitor.settings().sample_period();
        let elapsed = iteration_start.elapsed();
        if elapsed < period {
            std::thread::sleep(period - elapsed);
        } else {
            log::debug!(
                "Monitor iteration took {:.1} ms, over the {:.1} ms budget",
                elapsed.as_secs_f64() * 1000.0,
                period.as_secs_f64() * 1000.0
            );
        }
    }

    log::info!("Monitor stopped after {} samples", monitor.count());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live_calibration::IntensityBand;
    use crate::sample::RawReading;
    use crate::status::{StatusLevel, MSG_GOOD, MSG_MISSED_SHOT, MSG_NOT_CALIBRATED};

    fn small_settings(buffer_size: usize, nsamp: usize) -> Settings {
        let mut settings = Settings::default();
        settings.buffer_size = buffer_size;
        settings.set_nsamp(nsamp);
        settings.notification_tolerance = 2;
        settings
    }

    fn calibrated_monitor(settings: Settings) -> StreamingMonitor {
        let mut monitor = StreamingMonitor::new(settings).unwrap();
        monitor.begin_calibration();
        monitor.finish_calibration(&Ok(CalibrationBands {
            i0: IntensityBand::new(10.0, 2.0),
            diff: IntensityBand::new(10.0, 2.0),
            ratio: IntensityBand::new(1.0, 0.1),
        }));
        monitor
    }

    fn shot(i0: f64, diff: f64, t: f64) -> ShotSample {
        ShotSample::new(RawReading::new(i0, diff), t)
    }

    #[test]
    fn test_zero_buffer_fails_fast() {
        let mut settings = Settings::default();
        settings.buffer_size = 0;
        assert!(matches!(
            StreamingMonitor::new(settings),
            Err(MonitorError::BufferError(_))
        ));
    }

    #[test]
    fn test_no_flagging_before_first_fill() {
        let mut monitor = calibrated_monitor(small_settings(5, 5));
        for i in 0..5 {
            let outcome = monitor.ingest(&shot(1.0, 1.0, i as f64));
            assert!(outcome.flagged.is_empty());
        }
        assert_eq!(monitor.flags().dropped_shot.count_nonzero(), 0);
        // the sixth sample is past the first fill
        let outcome = monitor.ingest(&shot(1.0, 1.0, 5.0));
        assert_eq!(
            outcome.flagged,
            vec![FlagKind::DroppedShot, FlagKind::MissedShot]
        );
    }

    #[test]
    fn test_flag_thresholds() {
        let mut monitor = calibrated_monitor(small_settings(5, 5));
        for i in 0..5 {
            monitor.ingest(&shot(10.0, 10.0, i as f64));
        }
        // i0 = 7 < 8 is flagged, diff = 9 is not; ratio 9/7 is fine
        let outcome = monitor.ingest(&shot(7.0, 9.0, 5.0));
        assert_eq!(outcome.flagged, vec![FlagKind::DroppedShot]);
        assert_eq!(monitor.flags().dropped_shot.latest(), 7.0);
        assert_eq!(monitor.flags().missed_shot.latest(), 0.0);

        // sigma scales the band
        monitor.apply(MonitorCommand::SetSigma(2.0));
        let outcome = monitor.ingest(&shot(7.0, 9.0, 6.0));
        assert!(outcome.flagged.is_empty());
    }

    #[test]
    fn test_zero_reading_still_counts() {
        let mut monitor = calibrated_monitor(small_settings(5, 5));
        for i in 0..5 {
            monitor.ingest(&shot(10.0, 10.0, i as f64));
        }
        let outcome = monitor.ingest(&shot(0.0, 10.0, 5.0));
        assert!(outcome.flagged.contains(&FlagKind::DroppedShot));
        // ratio falls back to 0 for a zero I0
        assert!(outcome.flagged.contains(&FlagKind::LowIntensity));
        assert_eq!(monitor.flags().dropped_shot.count_nonzero(), 1);
        assert_eq!(monitor.flags().low_intensity.count_nonzero(), 1);
    }

    #[test]
    fn test_averages_every_nsamp_skip_dropped() {
        let mut monitor = calibrated_monitor(small_settings(5, 5));
        for i in 0..5 {
            monitor.ingest(&shot(10.0, 10.0, i as f64));
        }
        let mut outcome = IngestOutcome::default();
        // four good shots and one dropped shot
        for (i, i0) in [10.0, 10.0, 1.0, 10.0, 10.0].iter().enumerate() {
            outcome = monitor.ingest(&shot(*i0, 10.0, 5.0 + i as f64));
        }
        assert!(outcome.averages_updated);
        assert_eq!(outcome.status.as_ref().unwrap().message, MSG_GOOD);
        let averages = monitor.average_snapshot();
        assert_eq!(averages.i0.len(), 5);
        assert_eq!(*averages.i0.last().unwrap(), 10.0);
        assert_eq!(*averages.time.last().unwrap(), 9.0);
    }

    #[test]
    fn test_status_goes_red_on_missed_shots() {
        let mut monitor = calibrated_monitor(small_settings(5, 5));
        let mut last_status = None;
        for i in 0..15 {
            let outcome = monitor.ingest(&shot(10.0, 1.0, i as f64));
            if outcome.status.is_some() {
                last_status = outcome.status;
            }
        }
        let status = last_status.unwrap();
        assert_eq!(status.message, MSG_MISSED_SHOT);
        assert_eq!(status.level, StatusLevel::Red);
    }

    #[test]
    fn test_uncalibrated_status() {
        let mut monitor = StreamingMonitor::new(small_settings(5, 5)).unwrap();
        let mut outcome = IngestOutcome::default();
        for i in 0..5 {
            outcome = monitor.ingest(&shot(1.0, 1.0, i as f64));
        }
        assert_eq!(outcome.status.unwrap().message, MSG_NOT_CALIBRATED);
    }

    #[test]
    fn test_calibration_state_machine() {
        let mut monitor = StreamingMonitor::new(small_settings(5, 5)).unwrap();
        assert_eq!(monitor.mode(), MonitorMode::Running);
        assert_eq!(
            monitor.apply(MonitorCommand::Calibrate),
            Some(MonitorMode::Calibrating)
        );
        // samples are ignored while calibrating
        monitor.ingest(&shot(1.0, 1.0, 0.0));
        assert_eq!(monitor.count(), 0);

        monitor.finish_calibration(&Err(CalibrationError::NoData));
        assert_eq!(monitor.mode(), MonitorMode::Running);
        assert!(!monitor.is_calibrated());

        monitor.begin_calibration();
        monitor.finish_calibration(&Ok(CalibrationBands::default()));
        assert!(monitor.is_calibrated());

        // a new request invalidates the old calibration
        monitor.apply(MonitorCommand::Calibrate);
        assert!(!monitor.is_calibrated());
    }

    #[test]
    fn test_non_finite_sample_is_rejected() {
        let mut monitor = calibrated_monitor(small_settings(10, 5));
        let outcome = monitor.ingest(&shot(f64::NAN, 1.0, 0.0));
        assert!(outcome.rejected);
        assert_eq!(monitor.count(), 0);
        let mut last = IngestOutcome::default();
        for i in 1..=10 {
            last = monitor.ingest(&shot(1.0, 1.0, i as f64));
            assert!(!last.rejected);
        }
        assert!(last.averages_updated);
        let averages = monitor.average_snapshot();
        assert!(averages.i0.iter().all(|v| v.is_finite()));
        assert_eq!(*averages.i0.last().unwrap(), 1.0);
        assert!(monitor.buffer_snapshot().i0.iter().all(|v| *v == 1.0));
    }

    #[test]
    fn test_outbox_drops_snapshots_but_keeps_events() {
        let (tx, rx) = mpsc::sync_channel(1);
        let mut outbox = Outbox::new(tx);
        let monitor = StreamingMonitor::new(small_settings(5, 5)).unwrap();
        let good = StatusReport::new(MSG_GOOD, StatusLevel::Green);
        let missed = StatusReport::new(MSG_MISSED_SHOT, StatusLevel::Red);

        outbox
            .snapshot(MonitorMessage::Buffers(monitor.buffer_snapshot()))
            .unwrap();
        outbox
            .snapshot(MonitorMessage::Buffers(monitor.buffer_snapshot()))
            .unwrap();
        assert_eq!(outbox.dropped, 1);

        // the channel is full, so events wait and only the newest status survives
        outbox.event(MonitorMessage::Status(good)).unwrap();
        outbox
            .event(MonitorMessage::ModeChanged(MonitorMode::Running))
            .unwrap();
        outbox.event(MonitorMessage::Status(missed.clone())).unwrap();
        assert_eq!(outbox.pending.len(), 2);

        assert!(matches!(rx.recv().unwrap(), MonitorMessage::Buffers(_)));
        outbox.flush().unwrap();
        assert_eq!(
            rx.recv().unwrap(),
            MonitorMessage::ModeChanged(MonitorMode::Running)
        );
        // a snapshot never overtakes a waiting event
        outbox
            .snapshot(MonitorMessage::Buffers(monitor.buffer_snapshot()))
            .unwrap();
        assert_eq!(rx.recv().unwrap(), MonitorMessage::Status(missed));
        assert!(rx.try_recv().is_err());

        drop(rx);
        assert!(matches!(
            outbox.event(MonitorMessage::ModeChanged(MonitorMode::Running)),
            Err(MonitorError::SendError(_))
        ));
    }

    #[test]
    fn test_commands_clamp() {
        let mut monitor = StreamingMonitor::new(Settings::default()).unwrap();
        monitor.apply(MonitorCommand::SetNsamp(1));
        monitor.apply(MonitorCommand::SetSamprate(10_000));
        monitor.apply(MonitorCommand::SetSigma(-1.0));
        assert_eq!(monitor.settings().nsamp(), 5);
        assert_eq!(monitor.settings().samprate(), 300);
        assert_eq!(monitor.settings().sigma(), 0.1);
    }
}
