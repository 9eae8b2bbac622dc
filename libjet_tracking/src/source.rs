//! Per-shot sample sources.
//!
//! The monitor reads one `RawReading` per iteration from a `SharedSource`. The application
//! constructs exactly one `ValueReader` at start up and hands clones of the same
//! `SharedSource` to every consumer, so there is only ever one underlying connection.
use std::collections::VecDeque;
use std::f64::consts::TAU;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use super::error::SourceError;
use super::sample::RawReading;

/// The instrument channel used as the I0 reading
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum I0Channel {
    /// Gas attenuator in the FEE
    #[default]
    GasAttenuator,
    Wave8,
}

impl I0Channel {
    pub fn key(&self) -> &'static str {
        match self {
            Self::GasAttenuator => "gatt",
            Self::Wave8 => "wave8",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::GasAttenuator => "Gas Attenuator",
            Self::Wave8 => "Wave8",
        }
    }
}

impl std::fmt::Display for I0Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// Anything that can produce one (I0, diff) reading per call.
pub trait SampleSource: Send {
    fn read_value(&mut self) -> Result<RawReading, SourceError>;

    /// Switch between live and simulated data. Sources without that notion ignore it
    fn set_live(&mut self, _live: bool) {}

    /// Select the I0 channel. Sources without that notion ignore it
    fn set_i0_channel(&mut self, _channel: I0Channel) {}
}

/// The one reader instance shared between the monitor and any other consumer.
pub type SharedSource = Arc<Mutex<dyn SampleSource>>;

/// Wrap a source for sharing
pub fn share<S: SampleSource + 'static>(source: S) -> SharedSource {
    Arc::new(Mutex::new(source))
}

/// Take the lock on a shared source just long enough for one read
pub fn read_shared(source: &SharedSource) -> Result<RawReading, SourceError> {
    match source.lock() {
        Ok(mut guard) => guard.read_value(),
        Err(_) => Err(SourceError::Poisoned),
    }
}

/// Like `read_shared`, but a reading with a non-finite I0 or diff is an error
pub fn read_finite(source: &SharedSource) -> Result<RawReading, SourceError> {
    let reading = read_shared(source)?;
    if reading.is_finite() {
        Ok(reading)
    } else {
        Err(SourceError::NonFinite(reading.i0, reading.diff))
    }
}

/// Connection to the beamline process variables.
///
/// The control-system client lives outside this crate; the embedding application supplies it.
pub trait LiveBackend: Send {
    fn read(&mut self, channel: I0Channel) -> Result<RawReading, SourceError>;
}

/// Stand-in backend used when no control-system client is available
#[derive(Debug, Default)]
pub struct UnavailableLive;

impl LiveBackend for UnavailableLive {
    fn read(&mut self, channel: I0Channel) -> Result<RawReading, SourceError> {
        Err(SourceError::Unreachable(channel.key().to_string()))
    }
}

/// Parameters of the simulated beam
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationParams {
    pub i0_level: f64,
    pub diff_level: f64,
    /// Relative gaussian noise on both channels
    pub noise: f64,
    /// Probability that a shot is dropped (no beam)
    pub drop_rate: f64,
    pub seed: Option<u64>,
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            i0_level: 0.8,
            diff_level: 0.4,
            noise: 0.05,
            drop_rate: 0.01,
            seed: None,
        }
    }
}

/// Slowly oscillating beam with gaussian noise and occasional dropped shots.
#[derive(Debug)]
pub struct SimulatedSource {
    params: SimulationParams,
    rng: StdRng,
    noise: Option<Normal<f64>>,
    start: Instant,
}

const SIM_DRIFT_PERIOD_SECS: f64 = 30.0;
const SIM_DRIFT_AMPLITUDE: f64 = 0.05;

impl SimulatedSource {
    pub fn new(params: SimulationParams) -> Self {
        let rng = match params.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let noise = Normal::new(0.0, params.noise.abs()).ok();
        Self {
            params,
            rng,
            noise,
            start: Instant::now(),
        }
    }

    fn jitter(&mut self) -> f64 {
        match &self.noise {
            Some(dist) => dist.sample(&mut self.rng),
            None => 0.0,
        }
    }
}

impl SampleSource for SimulatedSource {
    fn read_value(&mut self) -> Result<RawReading, SourceError> {
        let t = self.start.elapsed().as_secs_f64();
        let drift = 1.0 + SIM_DRIFT_AMPLITUDE * (TAU * t / SIM_DRIFT_PERIOD_SECS).sin();
        if self.rng.gen_bool(self.params.drop_rate.clamp(0.0, 1.0)) {
            let i0 = self.params.i0_level * self.jitter().abs();
            let diff = self.params.diff_level * self.jitter().abs();
            return Ok(RawReading::new(i0, diff));
        }
        let i0 = self.params.i0_level * drift * (1.0 + self.jitter());
        let diff = self.params.diff_level * drift * (1.0 + self.jitter());
        Ok(RawReading::new(i0, diff))
    }
}

/// Plays back a fixed sequence of readings, wrapping around at the end.
#[derive(Debug, Clone)]
pub struct ReplaySource {
    readings: VecDeque<RawReading>,
}

impl ReplaySource {
    pub fn new(readings: Vec<RawReading>) -> Self {
        Self {
            readings: readings.into(),
        }
    }
}

impl SampleSource for ReplaySource {
    fn read_value(&mut self) -> Result<RawReading, SourceError> {
        match self.readings.pop_front() {
            Some(reading) => {
                self.readings.push_back(reading);
                Ok(reading)
            }
            None => Err(SourceError::Unreachable(String::from("replay"))),
        }
    }
}

/// The beamline value reader: live process variables or the simulated beam.
pub struct ValueReader {
    live: bool,
    channel: I0Channel,
    backend: Box<dyn LiveBackend>,
    simulated: SimulatedSource,
}

impl ValueReader {
    pub fn new(
        backend: Box<dyn LiveBackend>,
        simulation: SimulationParams,
        live: bool,
        channel: I0Channel,
    ) -> Self {
        Self {
            live,
            channel,
            backend,
            simulated: SimulatedSource::new(simulation),
        }
    }
}

impl SampleSource for ValueReader {
    fn read_value(&mut self) -> Result<RawReading, SourceError> {
        if self.live {
            self.backend.read(self.channel)
        } else {
            self.simulated.read_value()
        }
    }

    fn set_live(&mut self, live: bool) {
        if live != self.live {
            log::info!(
                "Value reader switching to {} data",
                if live { "live" } else { "simulated" }
            );
        }
        self.live = live;
    }

    fn set_i0_channel(&mut self, channel: I0Channel) {
        if channel != self.channel {
            log::info!("Value reader now reading I0 from {}", channel.label());
        }
        self.channel = channel;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_live_reports_channel() {
        let mut reader = ValueReader::new(
            Box::new(UnavailableLive),
            SimulationParams::default(),
            true,
            I0Channel::Wave8,
        );
        match reader.read_value() {
            Err(SourceError::Unreachable(name)) => assert_eq!(name, "wave8"),
            other => panic!("unexpected read {other:?}"),
        }
        reader.set_live(false);
        assert!(reader.read_value().is_ok());
    }

    #[test]
    fn test_simulated_source_is_seeded() {
        let params = SimulationParams {
            seed: Some(7),
            drop_rate: 0.0,
            ..SimulationParams::default()
        };
        let mut source = SimulatedSource::new(params.clone());
        for _ in 0..100 {
            let reading = source.read_value().unwrap();
            assert!(reading.i0 > 0.0);
            assert!((reading.i0 - params.i0_level).abs() < params.i0_level * 0.5);
        }
    }

    #[test]
    fn test_replay_wraps() {
        let mut source =
            ReplaySource::new(vec![RawReading::new(1.0, 2.0), RawReading::new(3.0, 4.0)]);
        let reads: Vec<f64> = (0..4).map(|_| source.read_value().unwrap().i0).collect();
        assert_eq!(reads, vec![1.0, 3.0, 1.0, 3.0]);
        assert!(ReplaySource::new(vec![]).read_value().is_err());
    }

    #[test]
    fn test_shared_source_reads() {
        let shared = share(ReplaySource::new(vec![RawReading::new(2.0, 1.0)]));
        let other = Arc::clone(&shared);
        assert_eq!(read_shared(&shared).unwrap().i0, 2.0);
        assert_eq!(read_shared(&other).unwrap().diff, 1.0);
    }

    #[test]
    fn test_read_finite_rejects_nan() {
        let shared = share(ReplaySource::new(vec![
            RawReading::new(f64::NAN, 1.0),
            RawReading::new(2.0, 1.0),
        ]));
        assert!(matches!(
            read_finite(&shared),
            Err(SourceError::NonFinite(_, _))
        ));
        assert_eq!(read_finite(&shared).unwrap().i0, 2.0);
    }
}
