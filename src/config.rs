use std::fs;
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::drivers::buffer::DEFAULT_CAPACITY_SAMPLES;
use crate::drivers::source::DEFAULT_DECAY_WINDOW_SECS;
use crate::drivers::stream::SourceKind;
use crate::drivers::{ClockGenerator, ClockSettings, SimError, SimResult, TimestampMode};

pub const PROBES_RANGE: (i32, i32) = (0, 20);
pub const CHANNELS_PER_PROBE_RANGE: (i32, i32) = (1, 10_000);
pub const AUX_DEVICES_RANGE: (i32, i32) = (0, 20);
pub const CHANNELS_PER_AUX_RANGE: (i32, i32) = (1, 32);
/// Up to one minute of history at the fastest source rate.
pub const BUFFER_SAMPLES_RANGE: (usize, usize) = (1, 1_800_000);

/// Values the host can set, persisted as JSON.
///
/// Counts stay `i32` because they arrive from untyped host parameters and are
/// range-checked in `validate`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorSettings {
    pub num_probes: i32,
    pub channels_per_probe: i32,
    pub num_aux_devices: i32,
    pub channels_per_aux_device: i32,
    pub clock: ClockSettings,
    /// Ring size of every source, in samples.
    pub buffer_samples: usize,
    /// Fade window of the AP band.
    pub decay_window_secs: f64,
    /// Adds an action-potential train per probe, triggered by its AP clock.
    pub spike_trains: bool,
    /// Uniform noise amplitude added to every source; 0 disables it.
    pub noise_floor: f32,
    pub seed: u64,
    pub timestamps: TimestampMode,
    pub stop_timeout_ms: u64,
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self {
            num_probes: 1,
            channels_per_probe: 384,
            num_aux_devices: 1,
            channels_per_aux_device: 16,
            clock: ClockSettings::default(),
            buffer_samples: DEFAULT_CAPACITY_SAMPLES,
            decay_window_secs: DEFAULT_DECAY_WINDOW_SECS,
            spike_trains: false,
            noise_floor: 0.0,
            seed: 0x5eed,
            timestamps: TimestampMode::Unset,
            stop_timeout_ms: 2_000,
        }
    }
}

fn check_range(parameter: &'static str, value: i32, (min, max): (i32, i32)) -> SimResult<()> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(SimError::OutOfRange {
            parameter,
            value: value.into(),
            min: min.into(),
            max: max.into(),
        })
    }
}

impl SimulatorSettings {
    pub fn with_counts(
        num_probes: i32,
        channels_per_probe: i32,
        num_aux_devices: i32,
        channels_per_aux_device: i32,
    ) -> Self {
        Self {
            num_probes,
            channels_per_probe,
            num_aux_devices,
            channels_per_aux_device,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> SimResult<()> {
        check_range("num_probes", self.num_probes, PROBES_RANGE)?;
        check_range("channels_per_probe", self.channels_per_probe, CHANNELS_PER_PROBE_RANGE)?;
        check_range("num_aux_devices", self.num_aux_devices, AUX_DEVICES_RANGE)?;
        check_range(
            "channels_per_aux_device",
            self.channels_per_aux_device,
            CHANNELS_PER_AUX_RANGE,
        )?;
        let (min_buffer, max_buffer) = BUFFER_SAMPLES_RANGE;
        if !(min_buffer..=max_buffer).contains(&self.buffer_samples) {
            return Err(SimError::OutOfRange {
                parameter: "buffer_samples",
                value: i64::try_from(self.buffer_samples).unwrap_or(i64::MAX),
                min: min_buffer as i64,
                max: max_buffer as i64,
            });
        }
        if !(self.decay_window_secs.is_finite() && self.decay_window_secs >= 0.0) {
            return Err(SimError::Settings(format!(
                "decay window must be a non-negative number of seconds, got {}",
                self.decay_window_secs
            )));
        }
        if !(self.noise_floor.is_finite() && self.noise_floor >= 0.0) {
            return Err(SimError::Settings(format!(
                "noise floor must be non-negative, got {}",
                self.noise_floor
            )));
        }
        let clock = ClockGenerator::new(self.clock);
        for kind in self.source_kinds() {
            clock.validate_for(kind.sample_rate_hz())?;
        }
        Ok(())
    }

    /// Kinds of source these settings produce, without repeats.
    pub fn source_kinds(&self) -> Vec<SourceKind> {
        let mut kinds = Vec::new();
        if self.num_probes > 0 {
            kinds.push(SourceKind::ApBand);
            kinds.push(SourceKind::LfpBand);
            if self.spike_trains {
                kinds.push(SourceKind::SpikeTrain);
            }
        }
        if self.num_aux_devices > 0 {
            kinds.push(SourceKind::AuxDevice);
        }
        kinds
    }

    /// Number of sources a manager builds from these settings.
    pub fn source_count(&self) -> usize {
        let per_probe = if self.spike_trains { 3 } else { 2 };
        self.num_probes.max(0) as usize * per_probe + self.num_aux_devices.max(0) as usize
    }

    pub fn load(path: impl AsRef<Path>) -> SimResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|err| SimError::Settings(format!("{}: {err}", path.display())))?;
        let settings: Self = serde_json::from_str(&text)?;
        settings.validate()?;
        info!("loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> SimResult<()> {
        let path = path.as_ref();
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text)
            .map_err(|err| SimError::Settings(format!("{}: {err}", path.display())))?;
        info!("saved settings to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = SimulatorSettings::default();
        settings.validate().unwrap();
        assert_eq!(settings.channels_per_probe, 384);
        assert_eq!(settings.channels_per_aux_device, 16);
        assert_eq!(settings.source_count(), 3);
    }

    #[test]
    fn counts_outside_host_ranges_are_rejected() {
        let cases = [
            SimulatorSettings::with_counts(21, 384, 1, 16),
            SimulatorSettings::with_counts(1, 0, 1, 16),
            SimulatorSettings::with_counts(1, 10_001, 1, 16),
            SimulatorSettings::with_counts(1, 384, -1, 16),
            SimulatorSettings::with_counts(1, 384, 1, 33),
        ];
        for settings in cases {
            assert!(
                matches!(settings.validate(), Err(SimError::OutOfRange { .. })),
                "{settings:?}"
            );
        }
        SimulatorSettings::with_counts(0, 1, 0, 1).validate().unwrap();
    }

    #[test]
    fn buffer_size_outside_range_is_rejected() {
        for buffer_samples in [0, 1_800_001, usize::MAX / 8] {
            let mut settings = SimulatorSettings::default();
            settings.buffer_samples = buffer_samples;
            assert!(
                matches!(
                    settings.validate(),
                    Err(SimError::OutOfRange { parameter: "buffer_samples", .. })
                ),
                "{buffer_samples}"
            );
        }
        let mut settings = SimulatorSettings::default();
        settings.buffer_samples = BUFFER_SAMPLES_RANGE.1;
        settings.validate().unwrap();
    }

    #[test]
    fn clock_is_checked_against_slowest_present_rate() {
        let mut settings = SimulatorSettings::with_counts(1, 4, 0, 1);
        settings.clock.frequency_hz = 5_000.0; // no whole half-period at 2.5 kHz
        assert!(matches!(
            settings.validate(),
            Err(SimError::InvalidClockFrequency { .. })
        ));
        // Without probes only the 30 kHz aux rate matters.
        settings.num_probes = 0;
        settings.num_aux_devices = 1;
        settings.validate().unwrap();
    }

    #[test]
    fn partial_documents_fill_in_defaults() {
        let settings: SimulatorSettings =
            serde_json::from_str(r#"{ "num_probes": 3, "clock": { "frequency_hz": 4.0 } }"#).unwrap();
        assert_eq!(settings.num_probes, 3);
        assert_eq!(settings.channels_per_probe, 384);
        assert_eq!(settings.clock.frequency_hz, 4.0);
        assert!(settings.clock.enabled);
    }

    #[test]
    fn save_then_load_from_disk() {
        let path = std::env::temp_dir().join(format!("neurosim-settings-{}.json", std::process::id()));
        let mut settings = SimulatorSettings::with_counts(2, 32, 0, 8);
        settings.spike_trains = true;
        settings.clock.enabled = false;
        settings.save(&path).unwrap();
        let loaded = SimulatorSettings::load(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded, settings);
        assert_eq!(loaded.source_count(), 6);
    }

    #[test]
    fn load_reports_missing_and_invalid_files() {
        let missing = std::env::temp_dir().join("neurosim-does-not-exist.json");
        assert!(matches!(
            SimulatorSettings::load(&missing),
            Err(SimError::Settings(_))
        ));

        let path = std::env::temp_dir().join(format!("neurosim-bad-{}.json", std::process::id()));
        std::fs::write(&path, r#"{ "num_probes": 99 }"#).unwrap();
        let result = SimulatorSettings::load(&path);
        std::fs::remove_file(&path).ok();
        assert!(matches!(result, Err(SimError::OutOfRange { parameter: "num_probes", .. })));
    }
}
