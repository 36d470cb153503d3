use serde::{Deserialize, Serialize};

use crate::drivers::synth::{ChannelPolicy, Tone, Waveform};

/// Scale the host applies to turn raw values into microvolts.
pub const BIT_VOLTS: f32 = 0.195;

pub const AP_SAMPLE_RATE_HZ: f64 = 30_000.0;
pub const LFP_SAMPLE_RATE_HZ: f64 = 2_500.0;
pub const AUX_SAMPLE_RATE_HZ: f64 = 30_000.0;

/// Category of simulated device or band.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    /// High-rate spike band of a probe.
    ApBand,
    /// Low-rate local field potential band of a probe.
    LfpBand,
    /// Action-potential train driven by a probe's sync line.
    SpikeTrain,
    /// General-purpose analog/digital acquisition device.
    AuxDevice,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelKind {
    Electrode,
    Adc,
}

impl SourceKind {
    pub fn sample_rate_hz(self) -> f64 {
        match self {
            SourceKind::ApBand | SourceKind::SpikeTrain => AP_SAMPLE_RATE_HZ,
            SourceKind::LfpBand => LFP_SAMPLE_RATE_HZ,
            SourceKind::AuxDevice => AUX_SAMPLE_RATE_HZ,
        }
    }

    /// Samples produced per pacing step (10 ms at the default rates).
    pub fn packet_size(self) -> usize {
        match self {
            SourceKind::ApBand | SourceKind::SpikeTrain | SourceKind::AuxDevice => 300,
            SourceKind::LfpBand => 25,
        }
    }

    pub fn channel_kind(self) -> ChannelKind {
        match self {
            SourceKind::AuxDevice => ChannelKind::Adc,
            _ => ChannelKind::Electrode,
        }
    }

    /// Signal model used unless the caller overrides it.
    pub fn default_waveform(self, decay_window_secs: f64) -> Waveform {
        match self {
            // A probe in air: mains hum that fades while the probe settles.
            SourceKind::ApBand => Waveform::AttenuatedTone {
                tone: Tone {
                    amplitude: 1000.0,
                    frequency_hz: 60.0,
                    policy: ChannelPolicy::Broadcast,
                },
                decay_window_secs,
            },
            SourceKind::LfpBand => Waveform::Tone(Tone {
                amplitude: 1000.0,
                frequency_hz: 60.0,
                policy: ChannelPolicy::AlternatingSign,
            }),
            SourceKind::SpikeTrain => Waveform::ActionPotential,
            SourceKind::AuxDevice => Waveform::Tone(Tone {
                amplitude: 1000.0,
                frequency_hz: 10.0,
                policy: ChannelPolicy::Broadcast,
            }),
        }
    }

    fn band_label(self) -> &'static str {
        match self {
            SourceKind::ApBand => "AP",
            SourceKind::LfpBand => "LFP",
            SourceKind::SpikeTrain => "APT",
            SourceKind::AuxDevice => "NIDAQ",
        }
    }
}

/// Metadata the host needs to describe one stream and its channels.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub name: String,
    pub identifier: String,
    pub description: String,
    pub kind: SourceKind,
    pub sample_rate_hz: f64,
    pub num_channels: usize,
    pub channel_kind: ChannelKind,
    pub bit_volts: f32,
    pub sync_line: String,
    pub sync_description: String,
}

impl StreamDescriptor {
    /// Descriptor for band `kind` of probe `probe` (0-based).
    pub fn probe_band(kind: SourceKind, probe: usize, num_channels: usize) -> Self {
        let letter = probe_letter(probe);
        let band = kind.band_label();
        let rate = kind.sample_rate_hz();
        Self {
            name: format!("Probe-{letter}-{band}"),
            identifier: format!("SP{probe}_{band}"),
            description: format!("Neural data sampled @ {}", format_rate(rate)),
            kind,
            sample_rate_hz: rate,
            num_channels,
            channel_kind: kind.channel_kind(),
            bit_volts: BIT_VOLTS,
            sync_line: format!("{band} Sync Line"),
            sync_description: format!(
                "Synchronization signal from the {band} band of simulated probe {probe}"
            ),
        }
    }

    pub fn aux_device(device: usize, num_channels: usize) -> Self {
        let kind = SourceKind::AuxDevice;
        let rate = kind.sample_rate_hz();
        Self {
            name: format!("Dev{device}"),
            identifier: format!("NI{device}"),
            description: format!("NIDAQ @ {}", format_rate(rate)),
            kind,
            sample_rate_hz: rate,
            num_channels,
            channel_kind: kind.channel_kind(),
            bit_volts: BIT_VOLTS,
            sync_line: "NIDAQ Sync Line".to_string(),
            sync_description: format!("Synchronization signal from the NIDAQ {device}"),
        }
    }

    /// Host-facing channel names, `CH1` upwards.
    pub fn channel_names(&self) -> Vec<String> {
        (1..=self.num_channels).map(|i| format!("CH{i}")).collect()
    }
}

/// `A`..`Z`, then `AA`, `AB`, ...
pub fn probe_letter(index: usize) -> String {
    let mut n = index + 1;
    let mut out = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        out.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

fn format_rate(rate_hz: f64) -> String {
    if rate_hz >= 1000.0 {
        format!("{}kHz", rate_hz / 1000.0)
    } else {
        format!("{rate_hz}Hz")
    }
}
