use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};

use crate::config::SimulatorSettings;
use crate::drivers::clock::ClockControl;
use crate::drivers::{
    ChannelBuffer, ClockGenerator, ClockSettings, SignalSource, SimError, SimResult, SourceConfig,
    SourceFailure, SourceKind, StreamDescriptor,
};

/// Owns every simulated source and moves them through start/stop together.
///
/// Sources are ordered per probe (AP, LFP, then APT when spike trains are
/// on), followed by the auxiliary devices.
pub struct SourceManager {
    settings: SimulatorSettings,
    sources: Vec<SignalSource>,
}

impl Default for SourceManager {
    /// A manager with no sources.
    fn default() -> Self {
        Self {
            settings: SimulatorSettings::with_counts(0, 1, 0, 1),
            sources: Vec::new(),
        }
    }
}

impl SourceManager {
    pub fn new(settings: SimulatorSettings) -> SimResult<Self> {
        let mut manager = Self::default();
        manager.configure(settings)?;
        Ok(manager)
    }

    /// Replaces every source with ones built from `settings`.
    ///
    /// Running sources are stopped first. If the settings are invalid the
    /// manager is left empty. A failure to stop an old source is returned
    /// after the new sources are in place.
    pub fn configure(&mut self, settings: SimulatorSettings) -> SimResult<()> {
        let stopped = self.stop_all();
        if let Err(err) = &stopped {
            error!("reconfiguring with sources that did not stop: {err}");
        }
        self.sources.clear();

        settings.validate()?;
        self.sources = build_sources(&settings)?;
        info!(
            "configured {} sources ({} probes x {} ch, {} aux x {} ch)",
            self.sources.len(),
            settings.num_probes,
            settings.channels_per_probe,
            settings.num_aux_devices,
            settings.channels_per_aux_device
        );
        self.settings = settings;
        stopped
    }

    /// Host entry point taking the four raw count parameters.
    pub fn configure_counts(
        &mut self,
        num_probes: i32,
        channels_per_probe: i32,
        num_aux_devices: i32,
        channels_per_aux_device: i32,
    ) -> SimResult<()> {
        let settings = SimulatorSettings {
            num_probes,
            channels_per_probe,
            num_aux_devices,
            channels_per_aux_device,
            ..self.settings.clone()
        };
        self.configure(settings)
    }

    pub fn settings(&self) -> &SimulatorSettings {
        &self.settings
    }

    /// Clears every buffer and starts every source. Failures do not stop the
    /// remaining sources from starting.
    pub fn start_all(&mut self) -> SimResult<()> {
        let total = self.sources.len();
        let mut failures = Vec::new();
        for source in &mut self.sources {
            let started = source.clear_buffer().and_then(|()| {
                source.buffer().reset_counters();
                source.start()
            });
            if let Err(error) = started {
                warn!("{}: start failed: {error}", source.name());
                failures.push(SourceFailure {
                    source_name: source.name().to_string(),
                    error,
                });
            }
        }
        info!("started {} of {total} sources", total - failures.len());
        SimError::aggregate(total, failures)
    }

    /// Stops every source, each bounded by its stop timeout.
    pub fn stop_all(&mut self) -> SimResult<()> {
        let total = self.sources.len();
        let mut failures = Vec::new();
        for source in &mut self.sources {
            if let Err(error) = source.stop() {
                failures.push(SourceFailure {
                    source_name: source.name().to_string(),
                    error,
                });
            }
        }
        SimError::aggregate(total, failures)
    }

    /// Sets the clock frequency of every source; rejected as a whole if any
    /// source's rate cannot represent it.
    pub fn set_clock_frequency(&mut self, frequency_hz: f64) -> SimResult<()> {
        let candidate = ClockGenerator::new(ClockSettings {
            frequency_hz,
            enabled: true,
        });
        for source in &self.sources {
            candidate.validate_for(source.sample_rate_hz())?;
        }
        for source in &mut self.sources {
            source.set_clock_frequency(frequency_hz)?;
        }
        self.settings.clock.frequency_hz = frequency_hz;
        Ok(())
    }

    pub fn set_clock_enabled(&mut self, index: usize, enabled: bool) -> SimResult<()> {
        let source = self
            .sources
            .get_mut(index)
            .ok_or(SimError::NoSuchSource(index))?;
        source.set_clock_enabled(enabled);
        Ok(())
    }

    /// Enables or disables every clock and records it in the settings.
    pub fn set_clocks_enabled(&mut self, enabled: bool) {
        for source in &mut self.sources {
            source.set_clock_enabled(enabled);
        }
        self.settings.clock.enabled = enabled;
    }

    pub fn clock_settings(&self, index: usize) -> SimResult<ClockSettings> {
        self.source(index).map(SignalSource::clock_settings)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn sources(&self) -> &[SignalSource] {
        &self.sources
    }

    pub fn source(&self, index: usize) -> SimResult<&SignalSource> {
        self.sources.get(index).ok_or(SimError::NoSuchSource(index))
    }

    pub fn find(&self, name: &str) -> Option<&SignalSource> {
        self.sources.iter().find(|s| s.name() == name)
    }

    pub fn streams(&self) -> Vec<StreamDescriptor> {
        self.sources.iter().map(|s| s.descriptor().clone()).collect()
    }

    pub fn buffer(&self, index: usize) -> SimResult<Arc<ChannelBuffer>> {
        self.source(index).map(SignalSource::buffer)
    }

    pub fn is_any_running(&self) -> bool {
        self.sources.iter().any(SignalSource::is_running)
    }
}

impl Drop for SourceManager {
    fn drop(&mut self) {
        if let Err(err) = self.stop_all() {
            error!("{err}");
        }
    }
}

fn source_config(settings: &SimulatorSettings, descriptor: StreamDescriptor, index: usize) -> SourceConfig {
    let kind = descriptor.kind;
    let mut config = SourceConfig::new(descriptor);
    config.buffer_capacity = settings.buffer_samples;
    config.waveform = kind.default_waveform(settings.decay_window_secs);
    if settings.noise_floor > 0.0 {
        config.noise = Some((settings.noise_floor, settings.seed.wrapping_add(index as u64)));
    }
    config.clock = settings.clock;
    config.timestamps = settings.timestamps;
    config.stop_timeout = Duration::from_millis(settings.stop_timeout_ms);
    config
}

fn build_sources(settings: &SimulatorSettings) -> SimResult<Vec<SignalSource>> {
    let mut sources = Vec::with_capacity(settings.source_count());
    let channels_per_probe = settings.channels_per_probe as usize;
    let channels_per_aux = settings.channels_per_aux_device as usize;

    for probe in 0..settings.num_probes as usize {
        let ap = SignalSource::new(source_config(
            settings,
            StreamDescriptor::probe_band(SourceKind::ApBand, probe, channels_per_probe),
            sources.len(),
        ))?;
        let ap_clock: Arc<ClockControl> = ap.clock_control();
        sources.push(ap);

        let lfp = source_config(
            settings,
            StreamDescriptor::probe_band(SourceKind::LfpBand, probe, channels_per_probe),
            sources.len(),
        );
        sources.push(SignalSource::new(lfp)?);

        if settings.spike_trains {
            let mut apt = source_config(
                settings,
                StreamDescriptor::probe_band(SourceKind::SpikeTrain, probe, channels_per_probe),
                sources.len(),
            );
            apt.trigger = Some(ap_clock);
            sources.push(SignalSource::new(apt)?);
        }
    }

    for device in 0..settings.num_aux_devices as usize {
        let config = source_config(
            settings,
            StreamDescriptor::aux_device(device, channels_per_aux),
            sources.len(),
        );
        sources.push(SignalSource::new(config)?);
    }
    Ok(sources)
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Instant;

    use super::*;

    fn small(num_probes: i32, num_aux: i32) -> SimulatorSettings {
        let mut settings = SimulatorSettings::with_counts(num_probes, 4, num_aux, 2);
        settings.buffer_samples = 60_000;
        settings
    }

    fn wait_until(mut ready: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !ready() {
            assert!(Instant::now() < deadline, "timed out");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn builds_two_bands_per_probe_and_one_source_per_device() {
        let manager = SourceManager::new(SimulatorSettings::with_counts(2, 8, 1, 3)).unwrap();
        let names: Vec<_> = manager.sources().iter().map(|s| s.name().to_string()).collect();
        assert_eq!(names, ["Probe-A-AP", "Probe-A-LFP", "Probe-B-AP", "Probe-B-LFP", "Dev0"]);

        let ap = manager.find("Probe-B-AP").unwrap();
        assert_eq!(ap.sample_rate_hz(), 30_000.0);
        assert_eq!(ap.num_channels(), 8);
        assert_eq!(ap.packet_size(), 300);
        let lfp = manager.source(1).unwrap();
        assert_eq!(lfp.sample_rate_hz(), 2_500.0);
        assert_eq!(lfp.packet_size(), 25);
        assert_eq!(manager.source(4).unwrap().num_channels(), 3);
        assert!(matches!(manager.source(5), Err(SimError::NoSuchSource(5))));

        let streams = manager.streams();
        assert_eq!(streams[4].identifier, "NI0");
        assert_eq!(manager.buffer(0).unwrap().capacity(), 48_000);
    }

    #[test]
    fn spike_trains_add_a_paired_source_per_probe() {
        let mut settings = small(1, 0);
        settings.spike_trains = true;
        let manager = SourceManager::new(settings).unwrap();
        assert_eq!(manager.len(), 3);
        assert_eq!(manager.source(2).unwrap().kind(), SourceKind::SpikeTrain);
        assert_eq!(manager.source(2).unwrap().name(), "Probe-A-APT");
    }

    #[test]
    fn invalid_counts_leave_no_sources() {
        let mut manager = SourceManager::new(small(1, 1)).unwrap();
        assert_eq!(manager.len(), 3);
        let err = manager.configure_counts(1, 20_000, 1, 2).unwrap_err();
        assert!(matches!(err, SimError::OutOfRange { parameter: "channels_per_probe", .. }));
        assert!(manager.is_empty());
        manager.start_all().unwrap();
        assert!(!manager.is_any_running());
    }

    #[test]
    fn start_all_then_stop_all_leaves_nothing_running() {
        let mut manager = SourceManager::new(small(1, 1)).unwrap();
        manager.start_all().unwrap();
        assert!(manager.is_any_running());
        wait_until(|| manager.sources().iter().all(|s| s.samples_generated() >= 100));

        manager.stop_all().unwrap();
        assert!(!manager.is_any_running());
        for source in manager.sources() {
            let drained = source.buffer().drain(usize::MAX);
            assert_eq!(drained.first_index(), Some(0));
            assert_eq!(drained.len() as u64, source.samples_generated());
        }
    }

    #[test]
    fn start_all_begins_from_empty_buffers() {
        let mut manager = SourceManager::new(small(0, 1)).unwrap();
        manager.start_all().unwrap();
        wait_until(|| manager.sources()[0].samples_generated() >= 600);
        manager.stop_all().unwrap();
        assert!(!manager.buffer(0).unwrap().is_empty());

        manager.start_all().unwrap();
        wait_until(|| manager.sources()[0].samples_generated() >= 300);
        manager.stop_all().unwrap();
        let drained = manager.buffer(0).unwrap().drain(usize::MAX);
        assert_eq!(drained.first_index(), Some(0));
    }

    #[test]
    fn reconfigure_while_running_stops_old_sources_first() {
        let mut manager = SourceManager::new(small(1, 1)).unwrap();
        manager.start_all().unwrap();
        let old_buffer = manager.buffer(0).unwrap();
        wait_until(|| old_buffer.len() >= 300);

        manager.configure_counts(2, 2, 0, 1).unwrap();
        assert_eq!(manager.len(), 4);
        assert!(!manager.is_any_running());

        // The old generator is gone: its buffer no longer grows.
        let len = old_buffer.len();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(old_buffer.len(), len);
        assert!(manager.sources().iter().all(|s| s.buffer().is_empty()));
    }

    #[test]
    fn clock_changes_apply_to_all_sources_or_none() {
        let mut manager = SourceManager::new(small(1, 1)).unwrap();
        assert!(manager.set_clock_frequency(5_000.0).is_err());
        assert!(manager
            .sources()
            .iter()
            .all(|s| s.clock_settings().frequency_hz == 1.0));

        manager.set_clock_frequency(20.0).unwrap();
        assert_eq!(manager.settings().clock.frequency_hz, 20.0);
        assert_eq!(manager.clock_settings(2).unwrap().frequency_hz, 20.0);

        manager.set_clock_enabled(1, false).unwrap();
        assert!(!manager.clock_settings(1).unwrap().enabled);
        assert!(manager.clock_settings(0).unwrap().enabled);
        assert!(matches!(
            manager.set_clock_enabled(9, true),
            Err(SimError::NoSuchSource(9))
        ));

        manager.set_clocks_enabled(false);
        assert!(!manager.settings().clock.enabled);
        assert!(manager.sources().iter().all(|s| !s.clock_settings().enabled));
    }

    #[test]
    fn noise_seeds_differ_per_source_but_repeat_per_configuration() {
        let mut settings = small(0, 2);
        settings.noise_floor = 5.0;
        settings.clock.enabled = false;

        let first_packets = |settings: &SimulatorSettings| {
            let mut manager = SourceManager::new(settings.clone()).unwrap();
            manager.start_all().unwrap();
            wait_until(|| manager.sources().iter().all(|s| s.samples_generated() >= 300));
            manager.stop_all().unwrap();
            (0..manager.len())
                .map(|i| manager.buffer(i).unwrap().drain(300).samples)
                .collect::<Vec<_>>()
        };
        let a = first_packets(&settings);
        let b = first_packets(&settings);
        assert_eq!(a, b);
        assert_ne!(a[0], a[1]);
    }

    #[test]
    fn stuck_source_is_reported_as_fatal() {
        let mut manager = SourceManager::new(small(0, 1)).unwrap();
        // Half a second of sleep per batch against a 1 ms stop timeout.
        let mut config = SourceConfig::new(StreamDescriptor::aux_device(0, 1));
        config.descriptor.sample_rate_hz = 1_000.0;
        config.packet_size = 500;
        config.stop_timeout = Duration::from_millis(1);
        manager.sources = vec![SignalSource::new(config).unwrap()];

        manager.start_all().unwrap();
        wait_until(|| manager.sources()[0].samples_generated() >= 500);
        let err = manager.stop_all().unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(err.worst().unwrap().source_name, "Dev0");
        assert!(matches!(
            err.worst().unwrap().error,
            SimError::StopTimeout { .. }
        ));

        manager.sources[0].set_stop_timeout(Duration::from_secs(5));
        manager.stop_all().unwrap();
        assert!(!manager.is_any_running());
    }

    #[test]
    fn disabled_clocks_give_zero_event_codes_on_every_kind() {
        let mut settings = small(1, 1);
        settings.spike_trains = true;
        settings.clock.frequency_hz = 100.0;
        let mut manager = SourceManager::new(settings).unwrap();
        manager.set_clocks_enabled(false);
        let kinds: Vec<SourceKind> = manager.sources().iter().map(SignalSource::kind).collect();
        assert_eq!(
            kinds,
            [
                SourceKind::ApBand,
                SourceKind::LfpBand,
                SourceKind::SpikeTrain,
                SourceKind::AuxDevice
            ]
        );

        manager.start_all().unwrap();
        // Several half periods of the 100 Hz clock on every source.
        wait_until(|| {
            manager
                .sources()
                .iter()
                .all(|s| s.samples_generated() as f64 >= 0.05 * s.sample_rate_hz())
        });
        manager.stop_all().unwrap();
        for source in manager.sources() {
            let codes = source.buffer().drain(usize::MAX).event_codes;
            assert!(!codes.is_empty(), "{}", source.name());
            assert!(codes.iter().all(|&code| code == 0), "{}", source.name());
        }
    }

    #[test]
    fn oversized_buffer_setting_is_an_error_not_a_panic() {
        let mut settings = small(1, 0);
        settings.buffer_samples = usize::MAX / 8;
        assert!(matches!(
            SourceManager::new(settings),
            Err(SimError::OutOfRange { parameter: "buffer_samples", .. })
        ));
    }
}
