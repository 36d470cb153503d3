//! Signal models for the simulated sources.
//!
//! Every model is a pure function of the running sample index, the sample
//! rate and its own parameters, so two runs with the same configuration
//! produce the same stream. The only stateful pieces are the optional noise
//! floor (an owned, seeded generator) and the action-potential model, which
//! remembers the last trigger edge.

use std::f64::consts::PI;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::drivers::clock::Edge;

/// Segment boundaries of the action-potential trace, in ms after the edge.
pub const DEPOLARIZATION_START_MS: f64 = 0.8;
pub const REPOLARIZATION_START_MS: f64 = 1.3;
pub const HYPERPOLARIZATION_START_MS: f64 = 1.8;

pub const RESTING_POTENTIAL_MV: f64 = 10.0;
pub const THRESHOLD_POTENTIAL_MV: f64 = -25.0;
pub const PEAK_POTENTIAL_MV: f64 = -100.0;

/// How a single computed value is spread over the channels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelPolicy {
    /// Every channel carries the same value.
    Broadcast,
    /// Even channels carry the value, odd channels its negation.
    AlternatingSign,
}

impl ChannelPolicy {
    fn spread(self, value: f32, out: &mut [f32]) {
        match self {
            ChannelPolicy::Broadcast => out.fill(value),
            ChannelPolicy::AlternatingSign => {
                for (c, slot) in out.iter_mut().enumerate() {
                    *slot = if c % 2 == 0 { value } else { -value };
                }
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tone {
    pub amplitude: f64,
    pub frequency_hz: f64,
    pub policy: ChannelPolicy,
}

/// Signal model selected when a source is built.
#[derive(Clone, Debug, PartialEq)]
pub enum Waveform {
    Tone(Tone),
    /// Tone faded linearly to zero over `2 * decay_window_secs`.
    AttenuatedTone { tone: Tone, decay_window_secs: f64 },
    /// Piecewise-linear spike fired on every rising trigger edge.
    ActionPotential,
    /// Recorded values replayed in a loop on every channel.
    Looped { table: Arc<[f32]> },
}

/// `amplitude * sin(2π n / (fs / f))`.
pub fn tone_value(n: u64, sample_rate_hz: f64, amplitude: f64, frequency_hz: f64) -> f64 {
    amplitude * (2.0 * PI * n as f64 / (sample_rate_hz / frequency_hz)).sin()
}

/// Linear fade from 1 at the start of the stream to 0 after
/// `2 * decay_window_secs` worth of samples.
pub fn attenuation_envelope(total_samples: u64, decay_window_secs: f64, sample_rate_hz: f64) -> f64 {
    let span = 2.0 * decay_window_secs * sample_rate_hz;
    if span <= 0.0 {
        return 0.0;
    }
    (1.0 - total_samples as f64 / span).max(0.0)
}

/// Membrane potential `t_ms` after a trigger edge; `None` means no edge yet.
pub fn action_potential_mv(t_ms: Option<f64>) -> f64 {
    let Some(t) = t_ms else {
        return RESTING_POTENTIAL_MV;
    };
    let ramp = |from: f64, to: f64, start: f64, end: f64| from + (to - from) * (t - start) / (end - start);
    if t < 0.0 {
        RESTING_POTENTIAL_MV
    } else if t < DEPOLARIZATION_START_MS {
        ramp(RESTING_POTENTIAL_MV, THRESHOLD_POTENTIAL_MV, 0.0, DEPOLARIZATION_START_MS)
    } else if t < REPOLARIZATION_START_MS {
        ramp(
            THRESHOLD_POTENTIAL_MV,
            PEAK_POTENTIAL_MV,
            DEPOLARIZATION_START_MS,
            REPOLARIZATION_START_MS,
        )
    } else if t < HYPERPOLARIZATION_START_MS {
        ramp(
            PEAK_POTENTIAL_MV,
            RESTING_POTENTIAL_MV,
            REPOLARIZATION_START_MS,
            HYPERPOLARIZATION_START_MS,
        )
    } else {
        RESTING_POTENTIAL_MV
    }
}

/// Additive uniform noise in `[-amplitude, amplitude)` from an owned seed.
#[derive(Clone, Debug)]
pub struct NoiseFloor {
    amplitude: f32,
    seed: u64,
    rng: StdRng,
}

impl NoiseFloor {
    pub fn new(amplitude: f32, seed: u64) -> Self {
        Self {
            amplitude: amplitude.abs(),
            seed,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn reset(&mut self) {
        self.rng = StdRng::seed_from_u64(self.seed);
    }

    fn add_to(&mut self, out: &mut [f32]) {
        if self.amplitude == 0.0 {
            return;
        }
        for v in out {
            *v += self.rng.gen_range(-self.amplitude..self.amplitude);
        }
    }
}

/// Per-run synthesis state for one source.
#[derive(Clone, Debug)]
pub struct Synthesizer {
    waveform: Waveform,
    noise: Option<NoiseFloor>,
    last_rising_edge: Option<u64>,
}

impl Synthesizer {
    pub fn new(waveform: Waveform, noise: Option<NoiseFloor>) -> Self {
        Self {
            waveform,
            noise,
            last_rising_edge: None,
        }
    }

    pub fn waveform(&self) -> &Waveform {
        &self.waveform
    }

    /// Returns to the state of a fresh stream.
    pub fn reset(&mut self) {
        self.last_rising_edge = None;
        if let Some(noise) = &mut self.noise {
            noise.reset();
        }
    }

    /// Writes one sample for every channel into `out`.
    ///
    /// `n` is the stream-global sample index, which also counts the samples
    /// generated since the stream started. `trigger` is the edge the
    /// trigger clock produced at `n`, if any.
    pub fn render(&mut self, n: u64, sample_rate_hz: f64, trigger: Option<Edge>, out: &mut [f32]) {
        if trigger == Some(Edge::Rising) {
            self.last_rising_edge = Some(n);
        }
        match &self.waveform {
            Waveform::Tone(tone) => {
                let v = tone_value(n, sample_rate_hz, tone.amplitude, tone.frequency_hz);
                tone.policy.spread(v as f32, out);
            }
            Waveform::AttenuatedTone {
                tone,
                decay_window_secs,
            } => {
                let v = tone_value(n, sample_rate_hz, tone.amplitude, tone.frequency_hz)
                    * attenuation_envelope(n, *decay_window_secs, sample_rate_hz);
                tone.policy.spread(v as f32, out);
            }
            Waveform::ActionPotential => {
                let t_ms = self
                    .last_rising_edge
                    .map(|edge| 1000.0 * n.saturating_sub(edge) as f64 / sample_rate_hz);
                out.fill(action_potential_mv(t_ms) as f32);
            }
            Waveform::Looped { table } => {
                let v = if table.is_empty() {
                    0.0
                } else {
                    table[(n % table.len() as u64) as usize]
                };
                out.fill(v);
            }
        }
        if let Some(noise) = &mut self.noise {
            noise.add_to(out);
        }
    }
}
