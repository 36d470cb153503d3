use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use crate::drivers::{SamplePacket, SimError};

/// Samples kept per source when nothing else is configured.
pub const DEFAULT_CAPACITY_SAMPLES: usize = 48_000;

struct Ring {
    samples: VecDeque<f32>, // sample-major, num_channels per sample
    sample_indices: VecDeque<u64>,
    timestamps: VecDeque<f64>,
    event_codes: VecDeque<u64>,
    overwritten: u64,
}

impl Ring {
    fn len(&self) -> usize {
        self.sample_indices.len()
    }

    fn drop_oldest(&mut self, count: usize, num_channels: usize) {
        self.samples.drain(..count * num_channels);
        self.sample_indices.drain(..count);
        self.timestamps.drain(..count);
        self.event_codes.drain(..count);
    }
}

/// Bounded ring of recent samples shared between one generator thread and
/// one consumer.
///
/// Every operation takes the internal lock once, so a concurrent `append`
/// and `drain` never observe a partially copied packet. When full, the
/// oldest samples are overwritten and counted in `overwritten_samples`.
pub struct ChannelBuffer {
    num_channels: usize,
    capacity: usize,
    ring: Mutex<Ring>,
}

impl ChannelBuffer {
    pub fn new(num_channels: usize, capacity: usize) -> Result<Self, SimError> {
        if num_channels == 0 {
            return Err(SimError::InvalidChannelCount(0));
        }
        if capacity == 0 || num_channels.checked_mul(capacity).is_none() {
            return Err(SimError::InvalidBufferCapacity);
        }
        // Grows on demand up to `capacity`.
        Ok(Self {
            num_channels,
            capacity,
            ring: Mutex::new(Ring {
                samples: VecDeque::new(),
                sample_indices: VecDeque::new(),
                timestamps: VecDeque::new(),
                event_codes: VecDeque::new(),
                overwritten: 0,
            }),
        })
    }

    pub fn with_history_seconds(
        num_channels: usize,
        sample_rate_hz: f64,
        history_seconds: f64,
    ) -> Result<Self, SimError> {
        if !(sample_rate_hz.is_finite() && sample_rate_hz > 0.0) {
            return Err(SimError::InvalidSampleRate(sample_rate_hz));
        }
        let capacity = (sample_rate_hz * history_seconds).ceil();
        if !(capacity.is_finite() && capacity >= 1.0) {
            return Err(SimError::InvalidBufferCapacity);
        }
        Self::new(num_channels, capacity as usize)
    }

    fn lock(&self) -> MutexGuard<'_, Ring> {
        // A panicking writer leaves the ring structurally intact.
        self.ring.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    /// Maximum number of samples retained.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Samples lost to overwriting since construction or `reset_counters`.
    pub fn overwritten_samples(&self) -> u64 {
        self.lock().overwritten
    }

    pub fn append(&self, packet: &SamplePacket) -> Result<(), SimError> {
        packet.validate()?;
        if packet.num_channels() != self.num_channels {
            return Err(SimError::ChannelMismatch {
                expected: self.num_channels,
                actual: packet.num_channels(),
            });
        }
        // Only the newest `capacity` samples of an oversized packet can survive.
        let incoming = packet.len();
        let skip = incoming.saturating_sub(self.capacity);
        let kept = incoming - skip;

        let mut ring = self.lock();
        let overflow = (ring.len() + kept).saturating_sub(self.capacity);
        if overflow > 0 {
            ring.drop_oldest(overflow, self.num_channels);
        }
        ring.overwritten += (overflow + skip) as u64;

        let ch = self.num_channels;
        ring.samples
            .extend(packet.samples[skip * ch..].iter().copied());
        ring.sample_indices
            .extend(packet.sample_indices[skip..].iter().copied());
        ring.timestamps
            .extend(packet.timestamps[skip..].iter().copied());
        ring.event_codes
            .extend(packet.event_codes[skip..].iter().copied());
        Ok(())
    }

    /// Removes and returns up to `max_samples` of the oldest samples.
    pub fn drain(&self, max_samples: usize) -> SamplePacket {
        let mut ring = self.lock();
        let take = max_samples.min(ring.len());
        let ch = self.num_channels;
        let mut out = SamplePacket::with_capacity(ch, take);
        out.samples.extend(ring.samples.drain(..take * ch));
        out.sample_indices.extend(ring.sample_indices.drain(..take));
        out.timestamps.extend(ring.timestamps.drain(..take));
        out.event_codes.extend(ring.event_codes.drain(..take));
        out
    }

    /// Copies the newest `max_samples` without consuming them.
    pub fn snapshot(&self, max_samples: usize) -> SamplePacket {
        let ring = self.lock();
        let take = max_samples.min(ring.len());
        let skip = ring.len() - take;
        let ch = self.num_channels;
        let mut out = SamplePacket::with_capacity(ch, take);
        out.samples.extend(ring.samples.iter().skip(skip * ch).copied());
        out.sample_indices
            .extend(ring.sample_indices.iter().skip(skip).copied());
        out.timestamps.extend(ring.timestamps.iter().skip(skip).copied());
        out.event_codes.extend(ring.event_codes.iter().skip(skip).copied());
        out
    }

    /// Empties the ring. Callers must ensure the writer is idle.
    pub fn clear(&self) {
        let mut ring = self.lock();
        ring.samples.clear();
        ring.sample_indices.clear();
        ring.timestamps.clear();
        ring.event_codes.clear();
    }

    pub fn reset_counters(&self) {
        self.lock().overwritten = 0;
    }
}
