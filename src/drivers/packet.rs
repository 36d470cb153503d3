use crate::drivers::SimError;

/// Timestamp written when no wall-clock source is wired in.
pub const TIMESTAMP_UNSET: f64 = -1.0;

/// Batch of multi-channel samples with per-sample metadata.
///
/// Samples are stored sample-major: the value of channel `c` at sample `s`
/// lives at `samples[s * num_channels + c]`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SamplePacket {
    num_channels: usize,
    pub samples: Vec<f32>,
    pub sample_indices: Vec<u64>,
    pub timestamps: Vec<f64>,
    pub event_codes: Vec<u64>,
}

impl SamplePacket {
    pub fn with_capacity(num_channels: usize, samples_per_packet: usize) -> Self {
        Self {
            num_channels,
            samples: Vec::with_capacity(num_channels * samples_per_packet),
            sample_indices: Vec::with_capacity(samples_per_packet),
            timestamps: Vec::with_capacity(samples_per_packet),
            event_codes: Vec::with_capacity(samples_per_packet),
        }
    }

    /// Appends one sample across all channels. `frame` must hold exactly
    /// `num_channels` values.
    pub fn push_sample(&mut self, frame: &[f32], sample_index: u64, timestamp: f64, event_code: u64) {
        debug_assert_eq!(frame.len(), self.num_channels);
        self.samples.extend_from_slice(frame);
        self.sample_indices.push(sample_index);
        self.timestamps.push(timestamp);
        self.event_codes.push(event_code);
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.sample_indices.clear();
        self.timestamps.clear();
        self.event_codes.clear();
    }

    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    /// Number of samples (not values) in the packet.
    pub fn len(&self) -> usize {
        self.sample_indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sample_indices.is_empty()
    }

    /// All channel values for sample `s`.
    pub fn frame(&self, s: usize) -> Option<&[f32]> {
        let start = s.checked_mul(self.num_channels)?;
        self.samples.get(start..start + self.num_channels)
    }

    pub fn channel(&self, c: usize) -> impl Iterator<Item = f32> + '_ {
        let stride = self.num_channels.max(1);
        let skip = if c < self.num_channels { c } else { self.samples.len() };
        self.samples.iter().skip(skip).step_by(stride).copied()
    }

    pub fn first_index(&self) -> Option<u64> {
        self.sample_indices.first().copied()
    }

    pub fn last_index(&self) -> Option<u64> {
        self.sample_indices.last().copied()
    }

    pub fn validate(&self) -> Result<(), SimError> {
        if self.num_channels == 0 {
            return Err(SimError::InvalidChannelCount(0));
        }
        let len = self.len();
        if self.timestamps.len() != len || self.event_codes.len() != len {
            return Err(SimError::MalformedPacket(format!(
                "{} indices, {} timestamps, {} event codes",
                len,
                self.timestamps.len(),
                self.event_codes.len()
            )));
        }
        if self.samples.len() != len * self.num_channels {
            return Err(SimError::MalformedPacket(format!(
                "{} values for {} samples x {} channels",
                self.samples.len(),
                len,
                self.num_channels
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet() -> SamplePacket {
        let mut p = SamplePacket::with_capacity(3, 2);
        p.push_sample(&[1.0, 2.0, 3.0], 10, TIMESTAMP_UNSET, 0);
        p.push_sample(&[4.0, 5.0, 6.0], 11, TIMESTAMP_UNSET, 1);
        p
    }

    #[test]
    fn frames_and_channels_follow_sample_major_layout() {
        let p = packet();
        assert_eq!(p.len(), 2);
        assert_eq!(p.frame(1).unwrap(), &[4.0, 5.0, 6.0]);
        assert!(p.frame(2).is_none());
        assert_eq!(p.channel(1).collect::<Vec<_>>(), vec![2.0, 5.0]);
        assert_eq!(p.channel(7).count(), 0);
        assert_eq!(p.first_index(), Some(10));
        assert_eq!(p.last_index(), Some(11));
        p.validate().unwrap();
    }

    #[test]
    fn validate_rejects_ragged_packets() {
        let mut p = packet();
        p.event_codes.pop();
        assert!(matches!(p.validate(), Err(SimError::MalformedPacket(_))));

        let mut p = packet();
        p.samples.pop();
        assert!(matches!(p.validate(), Err(SimError::MalformedPacket(_))));
    }

    #[test]
    fn clear_keeps_channel_count() {
        let mut p = packet();
        p.clear();
        assert!(p.is_empty());
        assert_eq!(p.num_channels(), 3);
    }
}
