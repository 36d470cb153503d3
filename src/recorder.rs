use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use log::info;

use crate::drivers::{SamplePacket, SimError, SimResult, StreamDescriptor};

/// Writes drained packets as CSV: one row per sample with its index,
/// timestamp, event code and up to `max_channels` channel values.
pub struct PacketRecorder<W: Write = BufWriter<File>> {
    writer: W,
    num_channels: usize,
    columns: usize,
    rows: u64,
}

impl PacketRecorder {
    /// Creates `<dir>/<stream>_<unix secs>.csv`.
    pub fn create(
        dir: impl AsRef<Path>,
        descriptor: &StreamDescriptor,
        max_channels: usize,
    ) -> SimResult<(Self, PathBuf)> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let path = dir.join(format!("{}_{}.csv", descriptor.name, stamp));
        let file = File::create(&path)?;
        let recorder = Self::new(
            BufWriter::new(file),
            &descriptor.channel_names(),
            max_channels,
        )?;
        info!("recording {} to {}", descriptor.name, path.display());
        Ok((recorder, path))
    }
}

impl<W: Write> PacketRecorder<W> {
    pub fn new(mut writer: W, channel_names: &[String], max_channels: usize) -> SimResult<Self> {
        let columns = channel_names.len().min(max_channels);
        write!(writer, "sample_index,timestamp,event_code")?;
        for name in &channel_names[..columns] {
            write!(writer, ",{name}")?;
        }
        writeln!(writer)?;
        Ok(Self {
            writer,
            num_channels: channel_names.len(),
            columns,
            rows: 0,
        })
    }

    pub fn write_packet(&mut self, packet: &SamplePacket) -> SimResult<()> {
        if packet.num_channels() != self.num_channels {
            return Err(SimError::ChannelMismatch {
                expected: self.num_channels,
                actual: packet.num_channels(),
            });
        }
        for s in 0..packet.len() {
            write!(
                self.writer,
                "{},{},{}",
                packet.sample_indices[s], packet.timestamps[s], packet.event_codes[s]
            )?;
            if let Some(frame) = packet.frame(s) {
                for value in &frame[..self.columns] {
                    write!(self.writer, ",{value:.3}")?;
                }
            }
            writeln!(self.writer)?;
        }
        self.rows += packet.len() as u64;
        Ok(())
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Flushes and hands back the underlying writer.
    pub fn finish(mut self) -> SimResult<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::TIMESTAMP_UNSET;

    fn names(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("CH{i}")).collect()
    }

    #[test]
    fn writes_header_and_one_row_per_sample() {
        let mut recorder = PacketRecorder::new(Vec::new(), &names(3), 2).unwrap();
        let mut packet = SamplePacket::with_capacity(3, 2);
        packet.push_sample(&[1.0, 2.0, 3.0], 0, TIMESTAMP_UNSET, 0);
        packet.push_sample(&[-1.5, 0.25, 9.0], 1, TIMESTAMP_UNSET, 1);
        recorder.write_packet(&packet).unwrap();
        assert_eq!(recorder.rows(), 2);

        let text = String::from_utf8(recorder.finish().unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "sample_index,timestamp,event_code,CH1,CH2");
        assert_eq!(lines[1], "0,-1,0,1.000,2.000");
        assert_eq!(lines[2], "1,-1,1,-1.500,0.250");
    }

    #[test]
    fn rejects_packets_from_another_stream() {
        let mut recorder = PacketRecorder::new(Vec::new(), &names(2), 8).unwrap();
        let mut packet = SamplePacket::with_capacity(4, 1);
        packet.push_sample(&[0.0; 4], 0, TIMESTAMP_UNSET, 0);
        assert!(matches!(
            recorder.write_packet(&packet),
            Err(SimError::ChannelMismatch { expected: 2, actual: 4 })
        ));
    }

    #[test]
    fn create_names_file_after_stream() {
        let dir = std::env::temp_dir().join(format!("neurosim-rec-{}", std::process::id()));
        let descriptor = StreamDescriptor::aux_device(0, 2);
        let (recorder, path) = PacketRecorder::create(&dir, &descriptor, 16).unwrap();
        recorder.finish().unwrap();
        let file_name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(file_name.starts_with("Dev0_") && file_name.ends_with(".csv"));
        let header = fs::read_to_string(&path).unwrap();
        assert_eq!(header.trim_end(), "sample_index,timestamp,event_code,CH1,CH2");
        fs::remove_dir_all(&dir).ok();
    }
}
