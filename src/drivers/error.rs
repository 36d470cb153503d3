use std::fmt;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("sample rate must be a finite value greater than zero, got {0}")]
    InvalidSampleRate(f64),
    #[error("channel count must be greater than zero, got {0}")]
    InvalidChannelCount(i64),
    #[error("packet size must be greater than zero")]
    InvalidPacketSize,
    #[error("buffer capacity must be greater than zero")]
    InvalidBufferCapacity,
    #[error("clock frequency {frequency_hz} Hz has no whole half-period at {sample_rate_hz} Hz")]
    InvalidClockFrequency {
        frequency_hz: f64,
        sample_rate_hz: f64,
    },
    #[error("{parameter} = {value} is outside {min}..={max}")]
    OutOfRange {
        parameter: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },
    #[error("channel count mismatch: expected {expected}, got {actual}")]
    ChannelMismatch { expected: usize, actual: usize },
    #[error("malformed packet: {0}")]
    MalformedPacket(String),
    #[error("source {0} is already running")]
    AlreadyRunning(String),
    #[error("source {0} is running; stop it first")]
    SourceRunning(String),
    #[error("failed to spawn generator thread for {source_name}")]
    Spawn {
        source_name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("source {source_name} did not stop within {waited:?}")]
    StopTimeout {
        source_name: String,
        waited: Duration,
    },
    #[error("no source at index {0}")]
    NoSuchSource(usize),
    #[error("settings: {0}")]
    Settings(String),
    #[error("{}", summarize(.total, .failures))]
    SourceFailures {
        total: usize,
        failures: Vec<SourceFailure>,
    },
}

impl SimError {
    /// A stuck generator thread cannot be recovered by the caller.
    pub fn is_fatal(&self) -> bool {
        match self {
            SimError::StopTimeout { .. } => true,
            SimError::SourceFailures { failures, .. } => {
                failures.iter().any(|f| f.error.is_fatal())
            }
            _ => false,
        }
    }

    /// Folds per-source failures into one error, or `Ok` when there were none.
    pub fn aggregate(total: usize, failures: Vec<SourceFailure>) -> SimResult<()> {
        if failures.is_empty() {
            Ok(())
        } else {
            Err(SimError::SourceFailures { total, failures })
        }
    }

    /// The failure that best describes an aggregate: fatal ones win.
    pub fn worst(&self) -> Option<&SourceFailure> {
        match self {
            SimError::SourceFailures { failures, .. } => worst_of(failures),
            _ => None,
        }
    }
}

fn worst_of(failures: &[SourceFailure]) -> Option<&SourceFailure> {
    failures
        .iter()
        .find(|f| f.error.is_fatal())
        .or_else(|| failures.first())
}

fn summarize(total: &usize, failures: &[SourceFailure]) -> String {
    match worst_of(failures) {
        Some(worst) => format!(
            "{} of {total} sources failed; worst: {worst}",
            failures.len()
        ),
        None => format!("0 of {total} sources failed"),
    }
}

impl From<serde_json::Error> for SimError {
    fn from(value: serde_json::Error) -> Self {
        SimError::Settings(value.to_string())
    }
}

impl From<std::io::Error> for SimError {
    fn from(value: std::io::Error) -> Self {
        SimError::Settings(value.to_string())
    }
}

/// One source's contribution to an aggregated failure.
#[derive(Debug)]
pub struct SourceFailure {
    pub source_name: String,
    pub error: SimError,
}

impl fmt::Display for SourceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.source_name, self.error)
    }
}

pub type SimResult<T> = Result<T, SimError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(name: &str, error: SimError) -> SourceFailure {
        SourceFailure {
            source_name: name.into(),
            error,
        }
    }

    #[test]
    fn aggregate_without_failures_is_ok() {
        assert!(SimError::aggregate(3, Vec::new()).is_ok());
    }

    #[test]
    fn aggregate_prefers_fatal_failure_as_worst() {
        let err = SimError::aggregate(
            3,
            vec![
                failure("Probe-A-AP", SimError::AlreadyRunning("Probe-A-AP".into())),
                failure(
                    "Dev0",
                    SimError::StopTimeout {
                        source_name: "Dev0".into(),
                        waited: Duration::from_millis(5),
                    },
                ),
            ],
        )
        .unwrap_err();
        assert!(err.is_fatal());
        let text = err.to_string();
        assert!(text.starts_with("2 of 3 sources failed"));
        assert!(text.contains("worst: Dev0"));
        assert_eq!(err.worst().unwrap().source_name, "Dev0");
    }

    #[test]
    fn non_fatal_aggregate_is_not_fatal() {
        let err = SimError::aggregate(
            1,
            vec![failure("Dev0", SimError::AlreadyRunning("Dev0".into()))],
        )
        .unwrap_err();
        assert!(!err.is_fatal());
    }
}
