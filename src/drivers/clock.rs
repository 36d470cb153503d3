use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::drivers::SimError;

/// Transition produced by a single `advance` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Edge {
    Rising,
    Falling,
}

/// Simulated TTL sync line.
///
/// The level toggles whenever the running sample index lands on a multiple
/// of the half-period expressed in samples. Disabling forces the level low
/// but keeps the configured frequency.
#[derive(Clone, Debug)]
pub struct ClockGenerator {
    enabled: bool,
    half_period_secs: Option<f64>,
    level: bool,
}

impl Default for ClockGenerator {
    fn default() -> Self {
        Self::new(ClockSettings::default())
    }
}

impl ClockGenerator {
    pub fn new(settings: ClockSettings) -> Self {
        let mut clock = Self {
            enabled: settings.enabled,
            half_period_secs: None,
            level: false,
        };
        clock.configure(settings.frequency_hz);
        clock
    }

    /// Non-positive or non-finite frequencies disable toggling.
    pub fn configure(&mut self, frequency_hz: f64) {
        self.half_period_secs = if frequency_hz.is_finite() && frequency_hz > 0.0 {
            Some(1.0 / (2.0 * frequency_hz))
        } else {
            self.level = false;
            None
        };
    }

    pub fn enable(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.level = false;
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn half_period_secs(&self) -> Option<f64> {
        self.half_period_secs
    }

    pub fn frequency_hz(&self) -> f64 {
        self.half_period_secs.map_or(0.0, |half| 1.0 / (2.0 * half))
    }

    /// Half-period in samples at `sample_rate_hz`; `None` while unconfigured.
    pub fn samples_per_half_period(&self, sample_rate_hz: f64) -> Option<u64> {
        self.half_period_secs
            .map(|half| (sample_rate_hz * half).round().max(0.0) as u64)
    }

    /// Checks that the configured frequency yields a usable divisor.
    pub fn validate_for(&self, sample_rate_hz: f64) -> Result<(), SimError> {
        match self.samples_per_half_period(sample_rate_hz) {
            Some(0) => Err(SimError::InvalidClockFrequency {
                frequency_hz: self.frequency_hz(),
                sample_rate_hz,
            }),
            _ => Ok(()),
        }
    }

    /// Current line state as an event code (0 or 1).
    pub fn level(&self) -> u64 {
        u64::from(self.level)
    }

    /// Advances the line to `sample_index`. Call once per generated sample.
    pub fn advance(&mut self, sample_index: u64, sample_rate_hz: f64) -> Option<Edge> {
        if !self.enabled || sample_index == 0 {
            return None;
        }
        let divisor = self.samples_per_half_period(sample_rate_hz)?;
        if divisor == 0 || sample_index % divisor != 0 {
            return None;
        }
        self.level = !self.level;
        Some(if self.level { Edge::Rising } else { Edge::Falling })
    }

    pub fn apply(&mut self, settings: ClockSettings) {
        if settings.frequency_hz != self.frequency_hz() {
            self.configure(settings.frequency_hz);
        }
        if settings.enabled != self.enabled {
            self.enable(settings.enabled);
        }
    }
}

/// Persisted clock configuration.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockSettings {
    pub frequency_hz: f64,
    pub enabled: bool,
}

impl Default for ClockSettings {
    fn default() -> Self {
        Self {
            frequency_hz: 1.0,
            enabled: true,
        }
    }
}

/// Host-side handle for changing a running source's clock.
///
/// The generator thread owns its `ClockGenerator` and pulls these values at
/// every batch boundary.
#[derive(Debug)]
pub struct ClockControl {
    frequency_bits: AtomicU64,
    enabled: AtomicBool,
}

impl ClockControl {
    pub fn new(settings: ClockSettings) -> Self {
        Self {
            frequency_bits: AtomicU64::new(settings.frequency_hz.to_bits()),
            enabled: AtomicBool::new(settings.enabled),
        }
    }

    pub fn settings(&self) -> ClockSettings {
        ClockSettings {
            frequency_hz: f64::from_bits(self.frequency_bits.load(Ordering::Acquire)),
            enabled: self.enabled.load(Ordering::Acquire),
        }
    }

    pub fn set_frequency(&self, frequency_hz: f64) {
        self.frequency_bits
            .store(frequency_hz.to_bits(), Ordering::Release);
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }
}
