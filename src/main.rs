// src/main.rs
mod gui;

use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use log::{info, warn};
use neurosim::config::SimulatorSettings;
use neurosim::drivers::SourceManager;
use neurosim::recorder::PacketRecorder;

// 录制时每个流最多写多少通道
const RECORD_MAX_CHANNELS: usize = 16;

#[derive(Parser, Debug)]
#[command(name = "neurosim")]
#[command(version, about = "Synthetic multi-channel neural acquisition")]
struct Args {
    /// Settings file (JSON); defaults are used when omitted
    config: Option<PathBuf>,

    /// Run without the monitor window for this many seconds
    #[arg(long, value_name = "SECS", value_parser = parse_seconds)]
    headless: Option<f64>,

    /// Write every stream to CSV files in this directory (headless only)
    #[arg(long, value_name = "DIR")]
    record: Option<PathBuf>,

    /// Print the stream descriptors as JSON and exit
    #[arg(long)]
    describe: bool,

    /// Write the effective settings to this path and exit
    #[arg(long, value_name = "PATH")]
    write_config: Option<PathBuf>,
}

fn parse_seconds(value: &str) -> Result<f64, String> {
    let secs: f64 = value
        .parse()
        .map_err(|_| format!("invalid duration {value:?}"))?;
    if secs.is_finite() && secs > 0.0 {
        Ok(secs)
    } else {
        Err(format!("duration must be positive, got {secs}"))
    }
}

// 无界面模式：当消费者，定时取数据并打印统计
fn run_headless(manager: &mut SourceManager, secs: f64, record: Option<&PathBuf>) -> Result<()> {
    let mut recorders = Vec::new();
    if let Some(dir) = record {
        for source in manager.sources() {
            let (recorder, _) = PacketRecorder::create(dir, source.descriptor(), RECORD_MAX_CHANNELS)
                .with_context(|| format!("opening recording for {}", source.name()))?;
            recorders.push(recorder);
        }
    }

    manager.start_all().context("starting sources")?;
    let started = Instant::now();
    let run_for = Duration::from_secs_f64(secs);
    let mut drained = vec![0u64; manager.len()];
    let mut last_report = Instant::now();

    while started.elapsed() < run_for {
        thread::sleep(Duration::from_millis(100));
        for (i, source) in manager.sources().iter().enumerate() {
            let packet = source.buffer().drain(usize::MAX);
            drained[i] += packet.len() as u64;
            if let Some(recorder) = recorders.get_mut(i) {
                recorder
                    .write_packet(&packet)
                    .with_context(|| format!("recording {}", source.name()))?;
            }
        }
        if last_report.elapsed() >= Duration::from_secs(1) {
            last_report = Instant::now();
            for (i, source) in manager.sources().iter().enumerate() {
                info!(
                    "{}: {} generated, {} drained, {} overwritten, sync={}",
                    source.name(),
                    source.samples_generated(),
                    drained[i],
                    source.buffer().overwritten_samples(),
                    source.clock_level()
                );
            }
        }
    }

    manager.stop_all().context("stopping sources")?;
    let elapsed = started.elapsed().as_secs_f64();
    for source in manager.sources() {
        let rate = source.samples_generated() as f64 / elapsed;
        if (rate - source.sample_rate_hz()).abs() > 0.05 * source.sample_rate_hz() {
            warn!(
                "{}: effective rate {rate:.0} Hz vs target {} Hz",
                source.name(),
                source.sample_rate_hz()
            );
        }
    }
    for recorder in recorders {
        let rows = recorder.rows();
        recorder.finish().context("flushing recording")?;
        info!("recording closed after {rows} rows");
    }
    Ok(())
}

// 入口函数
fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let settings = match &args.config {
        Some(path) => SimulatorSettings::load(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => SimulatorSettings::default(),
    };
    if let Some(path) = &args.write_config {
        settings
            .save(path)
            .with_context(|| format!("writing settings to {}", path.display()))?;
        return Ok(());
    }

    let mut manager = SourceManager::new(settings).context("building sources")?;
    if args.describe {
        println!("{}", serde_json::to_string_pretty(&manager.streams())?);
        return Ok(());
    }

    match args.headless {
        Some(secs) => run_headless(&mut manager, secs, args.record.as_ref()),
        None => {
            if args.record.is_some() {
                warn!("--record only applies to --headless runs");
            }
            gui::run(manager).map_err(|err| anyhow!("monitor window failed: {err}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("neurosim").chain(list.iter().copied()))
    }

    #[test]
    fn parses_flags_and_config_path() {
        let parsed = args(&["rig.json", "--headless", "2.5", "--record", "out", "--describe"]).unwrap();
        assert_eq!(parsed.config, Some(PathBuf::from("rig.json")));
        assert_eq!(parsed.headless, Some(2.5));
        assert_eq!(parsed.record, Some(PathBuf::from("out")));
        assert!(parsed.describe);
        assert!(parsed.write_config.is_none());
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(args(&["--headless"]).is_err());
        assert!(args(&["--headless", "soon"]).is_err());
        assert!(args(&["--headless", "-1"]).is_err());
        assert!(args(&["--verbose"]).is_err());
        assert!(args(&["a.json", "b.json"]).is_err());
    }

    #[test]
    fn headless_run_records_every_stream() {
        let dir = std::env::temp_dir().join(format!("neurosim-headless-{}", std::process::id()));
        let mut manager = SourceManager::new(SimulatorSettings::with_counts(1, 2, 1, 2)).unwrap();
        run_headless(&mut manager, 0.3, Some(&dir)).unwrap();
        assert!(!manager.is_any_running());
        let files = std::fs::read_dir(&dir).unwrap().count();
        std::fs::remove_dir_all(&dir).ok();
        assert_eq!(files, 3);
    }
}
