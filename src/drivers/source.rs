use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::drivers::buffer::DEFAULT_CAPACITY_SAMPLES;
use crate::drivers::clock::{ClockControl, ClockGenerator, ClockSettings};
use crate::drivers::packet::TIMESTAMP_UNSET;
use crate::drivers::stream::{SourceKind, StreamDescriptor};
use crate::drivers::synth::{NoiseFloor, Synthesizer, Waveform};
use crate::drivers::{ChannelBuffer, SamplePacket, SimError, SimResult};

/// How long `stop` waits for the generator thread before giving up.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Fade window of the attenuated AP band.
pub const DEFAULT_DECAY_WINDOW_SECS: f64 = 60.0;

/// What goes into the per-sample timestamp column.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimestampMode {
    /// Every sample carries `TIMESTAMP_UNSET`.
    #[default]
    Unset,
    /// Seconds since stream start derived from the sample index.
    SampleClock,
}

impl TimestampMode {
    fn stamp(self, sample_index: u64, sample_rate_hz: f64) -> f64 {
        match self {
            TimestampMode::Unset => TIMESTAMP_UNSET,
            TimestampMode::SampleClock => sample_index as f64 / sample_rate_hz,
        }
    }
}

/// Static configuration of one simulated source.
#[derive(Clone, Debug)]
pub struct SourceConfig {
    pub descriptor: StreamDescriptor,
    pub packet_size: usize,
    pub buffer_capacity: usize,
    pub waveform: Waveform,
    /// Amplitude and seed of an additive noise floor.
    pub noise: Option<(f32, u64)>,
    pub clock: ClockSettings,
    /// Clock whose rising edges drive edge-triggered waveforms. Without one
    /// the source's own clock is used.
    pub trigger: Option<Arc<ClockControl>>,
    pub timestamps: TimestampMode,
    pub stop_timeout: Duration,
}

impl SourceConfig {
    /// Defaults for the band or device described by `descriptor`.
    pub fn new(descriptor: StreamDescriptor) -> Self {
        let kind = descriptor.kind;
        Self {
            packet_size: kind.packet_size(),
            buffer_capacity: DEFAULT_CAPACITY_SAMPLES,
            waveform: kind.default_waveform(DEFAULT_DECAY_WINDOW_SECS),
            noise: None,
            clock: ClockSettings::default(),
            trigger: None,
            timestamps: TimestampMode::default(),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            descriptor,
        }
    }

    pub fn validate(&self) -> SimResult<()> {
        let rate = self.descriptor.sample_rate_hz;
        if !(rate.is_finite() && rate > 0.0) {
            return Err(SimError::InvalidSampleRate(rate));
        }
        if self.descriptor.num_channels == 0 {
            return Err(SimError::InvalidChannelCount(0));
        }
        if self.packet_size == 0 {
            return Err(SimError::InvalidPacketSize);
        }
        if self.buffer_capacity == 0 {
            return Err(SimError::InvalidBufferCapacity);
        }
        if let Some((amplitude, _)) = self.noise {
            if !amplitude.is_finite() {
                return Err(SimError::Settings(format!(
                    "noise amplitude must be finite, got {amplitude}"
                )));
            }
        }
        ClockGenerator::new(self.clock).validate_for(rate)
    }

    fn synthesizer(&self) -> Synthesizer {
        let noise = self
            .noise
            .map(|(amplitude, seed)| NoiseFloor::new(amplitude, seed));
        Synthesizer::new(self.waveform.clone(), noise)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceState {
    Idle,
    Running,
    /// A stop was requested but the thread has not been seen exiting.
    Stopping,
}

/// Counters written by the generator thread and read by anyone.
#[derive(Debug, Default)]
struct RunShared {
    stop: AtomicBool,
    samples_generated: AtomicU64,
    clock_level: AtomicU64,
}

struct RunHandle {
    thread: JoinHandle<()>,
    // Disconnects when the generator thread drops its sender on exit.
    exited: Receiver<()>,
}

/// One simulated device or band with its own generator thread.
pub struct SignalSource {
    config: SourceConfig,
    buffer: Arc<ChannelBuffer>,
    clock: Arc<ClockControl>,
    shared: Arc<RunShared>,
    state: SourceState,
    run: Option<RunHandle>,
}

impl SignalSource {
    pub fn new(config: SourceConfig) -> SimResult<Self> {
        config.validate()?;
        let buffer = ChannelBuffer::new(config.descriptor.num_channels, config.buffer_capacity)?;
        Ok(Self {
            clock: Arc::new(ClockControl::new(config.clock)),
            buffer: Arc::new(buffer),
            shared: Arc::new(RunShared::default()),
            state: SourceState::Idle,
            run: None,
            config,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.descriptor.name
    }

    pub fn kind(&self) -> SourceKind {
        self.config.descriptor.kind
    }

    pub fn descriptor(&self) -> &StreamDescriptor {
        &self.config.descriptor
    }

    pub fn sample_rate_hz(&self) -> f64 {
        self.config.descriptor.sample_rate_hz
    }

    pub fn num_channels(&self) -> usize {
        self.config.descriptor.num_channels
    }

    pub fn packet_size(&self) -> usize {
        self.config.packet_size
    }

    /// Consumer side of this source's samples.
    pub fn buffer(&self) -> Arc<ChannelBuffer> {
        Arc::clone(&self.buffer)
    }

    /// Handle other sources can use as their trigger.
    pub fn clock_control(&self) -> Arc<ClockControl> {
        Arc::clone(&self.clock)
    }

    pub fn clock_settings(&self) -> ClockSettings {
        self.clock.settings()
    }

    /// Takes effect at the next batch boundary of a running source.
    pub fn set_clock_frequency(&mut self, frequency_hz: f64) -> SimResult<()> {
        let mut candidate = ClockGenerator::new(self.clock.settings());
        candidate.configure(frequency_hz);
        candidate.validate_for(self.sample_rate_hz())?;
        self.clock.set_frequency(frequency_hz);
        self.config.clock.frequency_hz = frequency_hz;
        Ok(())
    }

    pub fn set_clock_enabled(&mut self, enabled: bool) {
        self.clock.set_enabled(enabled);
        self.config.clock.enabled = enabled;
    }

    pub fn set_stop_timeout(&mut self, timeout: Duration) {
        self.config.stop_timeout = timeout;
    }

    /// Samples generated in the current (or last) run.
    pub fn samples_generated(&self) -> u64 {
        self.shared.samples_generated.load(Ordering::Acquire)
    }

    /// Sync line level at the end of the last completed batch.
    pub fn clock_level(&self) -> u64 {
        self.shared.clock_level.load(Ordering::Relaxed)
    }

    pub fn state(&mut self) -> SourceState {
        self.reap();
        self.state
    }

    pub fn is_running(&self) -> bool {
        match &self.run {
            Some(run) => !run.thread.is_finished(),
            None => false,
        }
    }

    pub fn clear_buffer(&mut self) -> SimResult<()> {
        self.reap();
        if self.state != SourceState::Idle {
            return Err(SimError::SourceRunning(self.name().to_string()));
        }
        self.buffer.clear();
        Ok(())
    }

    /// Starts a fresh run with sample index 0.
    pub fn start(&mut self) -> SimResult<()> {
        self.launch(false)
    }

    /// Starts a run that continues numbering where the last one stopped.
    pub fn resume(&mut self) -> SimResult<()> {
        self.launch(true)
    }

    fn launch(&mut self, resume: bool) -> SimResult<()> {
        self.reap();
        match self.state {
            SourceState::Idle => {}
            SourceState::Running => return Err(SimError::AlreadyRunning(self.name().to_string())),
            SourceState::Stopping => return Err(SimError::SourceRunning(self.name().to_string())),
        }

        let first_index = if resume {
            self.samples_generated()
        } else {
            self.shared.samples_generated.store(0, Ordering::Release);
            0
        };
        self.shared.stop.store(false, Ordering::Release);
        self.shared.clock_level.store(0, Ordering::Relaxed);

        let (exited_tx, exited_rx) = mpsc::channel();
        let worker = Worker {
            name: self.name().to_string(),
            sample_rate_hz: self.sample_rate_hz(),
            packet_size: self.config.packet_size,
            num_channels: self.num_channels(),
            buffer: Arc::clone(&self.buffer),
            clock: Arc::clone(&self.clock),
            trigger: self.config.trigger.clone(),
            synth: self.config.synthesizer(),
            timestamps: self.config.timestamps,
            shared: Arc::clone(&self.shared),
            next_index: first_index,
            _exited: exited_tx,
        };
        let thread = thread::Builder::new()
            .name(self.name().to_string())
            .spawn(move || worker.run())
            .map_err(|source| SimError::Spawn {
                source_name: self.name().to_string(),
                source,
            })?;

        self.run = Some(RunHandle {
            thread,
            exited: exited_rx,
        });
        self.state = SourceState::Running;
        info!(
            "{}: started at sample {} ({} ch @ {} Hz, {} samples/packet)",
            self.name(),
            first_index,
            self.num_channels(),
            self.sample_rate_hz(),
            self.config.packet_size
        );
        Ok(())
    }

    /// Requests the generator to exit and waits for it, up to the stop
    /// timeout. On timeout the source stays in `Stopping`.
    pub fn stop(&mut self) -> SimResult<()> {
        let Some(run) = self.run.take() else {
            self.state = SourceState::Idle;
            return Ok(());
        };
        self.shared.stop.store(true, Ordering::Release);
        self.state = SourceState::Stopping;

        let timeout = self.config.stop_timeout;
        match run.exited.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if run.thread.join().is_err() {
                    warn!("{}: generator thread panicked", self.name());
                }
                self.state = SourceState::Idle;
                info!(
                    "{}: stopped after {} samples",
                    self.name(),
                    self.samples_generated()
                );
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => {
                self.run = Some(run);
                error!("{}: generator did not exit within {:?}", self.name(), timeout);
                Err(SimError::StopTimeout {
                    source_name: self.name().to_string(),
                    waited: timeout,
                })
            }
        }
    }

    // Collects a generator that exited on its own.
    fn reap(&mut self) {
        let finished = self
            .run
            .as_ref()
            .map_or(false, |run| run.thread.is_finished());
        if finished {
            if let Some(run) = self.run.take() {
                if run.thread.join().is_err() {
                    warn!("{}: generator thread panicked", self.name());
                }
            }
            self.state = SourceState::Idle;
        }
    }
}

impl Drop for SignalSource {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            error!("{}: {err}", self.name());
        }
    }
}

/// Wall-clock schedule for the generation loop.
///
/// Batch `k` is due `k * batch_secs` after the start. Falling more than one
/// batch behind moves the schedule forward instead of bursting.
#[derive(Debug)]
struct Pacer {
    batch_secs: f64,
    batches: u64,
    slip: Duration,
}

impl Pacer {
    fn new(batch_secs: f64) -> Self {
        Self {
            batch_secs,
            batches: 0,
            slip: Duration::ZERO,
        }
    }

    /// Records a finished batch; returns how long to sleep given the time
    /// elapsed since the start.
    fn after_batch(&mut self, elapsed: Duration) -> Option<Duration> {
        self.batches += 1;
        let due = Duration::from_secs_f64(self.batches as f64 * self.batch_secs) + self.slip;
        if elapsed < due {
            return Some(due - elapsed);
        }
        let behind = elapsed - due;
        if behind.as_secs_f64() > self.batch_secs {
            self.slip += behind;
            debug!("pacer fell {behind:?} behind; rebasing schedule");
        }
        None
    }
}

struct Worker {
    name: String,
    sample_rate_hz: f64,
    packet_size: usize,
    num_channels: usize,
    buffer: Arc<ChannelBuffer>,
    clock: Arc<ClockControl>,
    trigger: Option<Arc<ClockControl>>,
    synth: Synthesizer,
    timestamps: TimestampMode,
    shared: Arc<RunShared>,
    next_index: u64,
    _exited: Sender<()>,
}

impl Worker {
    fn run(mut self) {
        let fs = self.sample_rate_hz;
        let mut clock = ClockGenerator::new(self.clock.settings());
        // The paired line is replayed here so no clock state crosses threads.
        let mut trigger_clock = self
            .trigger
            .as_ref()
            .map(|control| ClockGenerator::new(control.settings()));
        let mut pacer = Pacer::new(self.packet_size as f64 / fs);
        let mut packet = SamplePacket::with_capacity(self.num_channels, self.packet_size);
        let mut frame = vec![0.0f32; self.num_channels];
        let started = Instant::now();
        debug!("{}: generator loop entered", self.name);

        while !self.shared.stop.load(Ordering::Acquire) {
            clock.apply(self.clock.settings());
            if let (Some(replica), Some(control)) = (trigger_clock.as_mut(), self.trigger.as_ref()) {
                replica.apply(control.settings());
            }

            packet.clear();
            for _ in 0..self.packet_size {
                let n = self.next_index;
                let edge = clock.advance(n, fs);
                let trigger_edge = match trigger_clock.as_mut() {
                    Some(replica) => replica.advance(n, fs),
                    None => edge,
                };
                self.synth.render(n, fs, trigger_edge, &mut frame);
                packet.push_sample(&frame, n, self.timestamps.stamp(n, fs), clock.level());
                self.next_index += 1;
            }

            if let Err(err) = self.buffer.append(&packet) {
                error!("{}: dropping generator: {err}", self.name);
                break;
            }
            self.shared
                .samples_generated
                .store(self.next_index, Ordering::Release);
            self.shared
                .clock_level
                .store(clock.level(), Ordering::Relaxed);

            if let Some(delay) = pacer.after_batch(started.elapsed()) {
                thread::sleep(delay);
            }
        }
        debug!("{}: generator loop exited at sample {}", self.name, self.next_index);
    }
}
